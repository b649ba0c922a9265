//! # stackwire-registry
//!
//! The parameter registry lets independently deployed stacks discover values
//! exported by other stacks.
//!
//! - **Entry**: versioned parameter entries and the persisted snapshot.
//! - **Store**: the injectable persistence seam (in-memory and JSON file).
//! - **Registry**: `export` / `import` / `revoke` with in-use tracking.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod entry;
pub mod registry;
pub mod store;

pub use entry::{ExportOwner, ParameterEntry, RegistrySnapshot};
pub use registry::{NewParameter, ParameterRegistry};
pub use store::{JsonFileParameterStore, MemoryParameterStore, ParameterStore};

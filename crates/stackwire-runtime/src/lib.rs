//! # stackwire-runtime
//!
//! Resource lifecycle management for Stackwire.
//!
//! Handles:
//! - **Provider**: the cloud collaborator seam and kind-based dispatch.
//! - **Digest**: SHA-256 fingerprints for ids and plans.
//! - **Simulated**: a deterministic in-memory cloud for tests and dry runs.
//! - **Lifecycle**: the node state machine.
//! - **State**: durable deployment records.
//! - **Provisioner**: per-stack apply and destroy.
//! - **Engine**: plan, apply, and destroy across stacks.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cancel;
pub mod digest;
pub mod engine;
pub mod lifecycle;
pub mod provider;
pub mod provisioner;
pub mod simulated;
pub mod state;

pub use cancel::CancelHandle;
pub use engine::{Action, ApplyResult, DestroyResult, Engine, ExitStatus, NodeReport, Plan, PlannedOperation};
pub use provider::{ProviderError, ProviderSet, ResourceProvider, ResourceRequest};
pub use simulated::SimulatedCloud;
pub use state::{DeploymentState, JsonFileStateStore, MemoryStateStore, StateStore};

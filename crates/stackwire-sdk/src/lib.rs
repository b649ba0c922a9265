//! # stackwire-sdk
//!
//! Public SDK for using Stackwire as a Rust library.
//!
//! Provides:
//! - [`StackBuilder`](builder::StackBuilder) and
//!   [`ResourceBuilder`](builder::ResourceBuilder): fluent declaration of
//!   stacks, resources, parameters, and exports.
//! - [`blueprint`]: the vectorAzul parameter-store and configuration stacks.
//!
//! Planning and execution go through [`Engine`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use stackwire_sdk::{blueprint, Engine, ProviderSet, SimulatedCloud, StackwireConfig};
//!
//! # async fn run() -> stackwire_sdk::Result<()> {
//! let engine = Engine::in_memory(
//!     &StackwireConfig::default(),
//!     ProviderSet::uniform(Arc::new(SimulatedCloud::new())),
//! );
//! let plan = engine.plan(vec![blueprint::parameter_store_stack()?])?;
//! let result = engine.apply(&plan).await;
//! std::process::exit(result.status.code());
//! # }
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod blueprint;
pub mod builder;

pub use builder::{ResourceBuilder, StackBuilder};
pub use stackwire_common::config::StackwireConfig;
pub use stackwire_common::error::{Result, StackwireError};
pub use stackwire_common::types::{NodeState, RemovalPolicy, ResourceKind};
pub use stackwire_compose::model::{StackUnit, Value};
pub use stackwire_registry::{NewParameter, ParameterRegistry};
pub use stackwire_runtime::{
    ApplyResult, CancelHandle, DestroyResult, Engine, ExitStatus, Plan, ProviderSet, SimulatedCloud,
};

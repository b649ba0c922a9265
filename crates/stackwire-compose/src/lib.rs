//! # stackwire-compose
//!
//! Declarations and planning for Stackwire stacks.
//!
//! Handles:
//! - **Model**: resource, output, and stack declarations with tagged `Value`s.
//! - **Template**: `sub` interpolation strings parsed into references.
//! - **Loader**: YAML stack documents.
//! - **Validator**: structural checks and security findings.
//! - **Graph**: generic dependency graph with cycle detection and stable ordering.
//! - **Builder**: per-stack resource graphs with import binding.
//! - **Resolver**: the single pass turning declared values into concrete ones.
//! - **Composer**: defaults, tags, and cross-stack ordering.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod builder;
pub mod composer;
pub mod graph;
pub mod loader;
pub mod model;
pub mod resolver;
pub mod template;
pub mod validator;

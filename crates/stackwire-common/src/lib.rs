//! # stackwire-common
//!
//! Shared types, error definitions, configuration models, constants, and
//! persistence helpers used across the entire Stackwire workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and provides the primitives every other crate builds upon.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod persist;
pub mod types;

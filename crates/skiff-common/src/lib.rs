//! # skiff-common
//!
//! Shared utilities and types for the Skiff network drivers.
//!
//! This crate provides common functionality used across all Skiff crates:
//! - Network and endpoint ID generation and validation
//! - Standard configuration paths
//! - Common error types

#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod paths;

pub use error::{SkiffError, SkiffResult};
pub use id::{EndpointId, NetworkId};
pub use paths::SkiffPaths;

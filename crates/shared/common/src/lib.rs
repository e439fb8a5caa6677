//! Common utilities shared by the repository crates.
//!
//! This crate provides:
//! - Store and repository error types
//! - Repository configuration
//! - Tracing bootstrap

pub mod config;
pub mod error;
pub mod telemetry;

pub use config::RepositoryConfig;
pub use error::{
    AggregateBulkError, BulkFailure, OptionExt, RepoError, RepoResult, StoreError, StoreResult,
};
pub use telemetry::init_tracing;

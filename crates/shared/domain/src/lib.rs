//! Domain layer - Document model shared by every repository.
//!
//! This crate contains pure types with no I/O: document identity, the
//! capability traits entities implement, and partition key values.

pub mod constants;
pub mod document;
pub mod partition_key;

pub use constants::*;
pub use document::{Document, DocumentIdentity, HasParent, ParentedDocument};
pub use partition_key::PartitionKey;

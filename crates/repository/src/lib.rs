//! Document Repository Library
//!
//! Generic repositories over a partitioned document store. Every document
//! lives in one shared container, partitioned by owner (and optionally by
//! discriminator), and every write carries an optimistic-concurrency etag.
//!
//! Layers, bottom-up:
//! - `store`: the `DocumentStore` capability plus an in-memory implementation
//! - `partition`, `batch`, `diagnostics`: key construction, transactional
//!   chunking, cross-partition hints
//! - `provision`: lazy, idempotent database/container creation
//! - `retry`, `bulk`: throttle retries and bounded-concurrency fan-out
//! - `repository`: the CRUD, owner-scoped and parent-scoped traits and
//!   the generic `Repository` implementing them

pub mod batch;
pub mod bulk;
pub mod diagnostics;
pub mod partition;
pub mod provision;
pub mod repository;
pub mod retry;
pub mod store;

pub use bulk::{BulkOperationCoordinator, BulkOptions};
pub use partition::PartitionKeyStrategy;
pub use provision::{ContainerHandle, ContainerProvisioner};
pub use repository::{
    CrudRepository, DeleteRepository, EntityFactory, OwnedItemRepository, ParentedItemRepository, QueryOutcome,
    ReadRepository, Repository, WriteRepository,
};
pub use retry::RetryPolicy;
pub use store::{DocumentStore, InMemoryStore, QuerySpec};

#[cfg(any(test, feature = "test-utils"))]
pub use store::MockDocumentStore;

//! Document store capability.
//!
//! The repository talks to the backing store only through `DocumentStore`.
//! One store instance (and its connection pool) is meant to be shared by
//! every repository in the process via `Arc<dyn DocumentStore>`.

mod memory;
mod query;

pub use memory::InMemoryStore;
pub use query::{Filter, OrderBy, QuerySpec};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use common::StoreResult;
use domain::PartitionKey;

use crate::provision::ContainerHandle;

#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;

/// Stream of query result pages, pulled one round trip at a time.
pub type PageStream = BoxStream<'static, StoreResult<QueryPage>>;

/// Container definition used when provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    /// One path, or the full hierarchical path list
    pub partition_key_paths: Vec<String>,
}

/// Outcome of a successful write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteResponse {
    pub etag: String,
    pub timestamp: i64,
    pub diagnostics: String,
    pub request_charge: f64,
}

/// Outcome of a successful point read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResponse {
    pub document: Value,
    pub diagnostics: String,
    pub request_charge: f64,
}

/// Outcome of a successful delete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteResponse {
    pub diagnostics: String,
    pub request_charge: f64,
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPage {
    pub items: Vec<Value>,
    /// Free-form store diagnostics for this round trip
    pub diagnostics: String,
    pub request_charge: f64,
    pub has_more: bool,
}

/// One upsert inside a transactional batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub document: Value,
    pub if_match: Option<String>,
}

/// Partitioned document store.
///
/// Every method is one network round trip, except `query`, whose stream
/// issues one round trip per page.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Names of existing databases
    async fn list_databases(&self) -> StoreResult<Vec<String>>;

    /// Create a database with provisioned throughput
    async fn create_database(&self, name: &str, throughput: u32) -> StoreResult<()>;

    /// Names of existing containers in `database`
    async fn list_containers(&self, database: &str) -> StoreResult<Vec<String>>;

    /// Create a container in `database`
    async fn create_container(&self, database: &str, spec: ContainerSpec) -> StoreResult<()>;

    /// Insert or replace a document. `if_match` makes the write conditional
    /// on the stored etag.
    async fn upsert(
        &self,
        container: &ContainerHandle,
        document: Value,
        partition_key: PartitionKey,
        if_match: Option<String>,
    ) -> StoreResult<WriteResponse>;

    /// Apply every upsert atomically within one partition key
    async fn execute_batch(
        &self,
        container: &ContainerHandle,
        partition_key: PartitionKey,
        items: Vec<BatchItem>,
    ) -> StoreResult<Vec<WriteResponse>>;

    /// Point read by id and partition key
    async fn read_item(
        &self,
        container: &ContainerHandle,
        id: &str,
        partition_key: PartitionKey,
    ) -> StoreResult<ReadResponse>;

    /// Delete by id and partition key
    async fn delete(
        &self,
        container: &ContainerHandle,
        id: &str,
        partition_key: PartitionKey,
    ) -> StoreResult<DeleteResponse>;

    /// Run a query, scoped to one partition key when given
    fn query(
        &self,
        container: &ContainerHandle,
        spec: QuerySpec,
        partition_key: Option<PartitionKey>,
    ) -> PageStream;
}

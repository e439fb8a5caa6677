//! Base repository traits, split by capability.
//!
//! Adapters depend on the narrowest trait they need. Every method here is
//! unscoped: it does not know the owner, so reads may fan out across
//! partitions.

use async_trait::async_trait;

use common::RepoResult;
use domain::Document;

/// Read operations (Query)
#[async_trait]
pub trait ReadRepository<T: Document>: Send + Sync {
    /// Find a document by id across all partitions
    async fn get_by_id(&self, id: &str) -> RepoResult<Option<T>>;

    /// Every document of this repository's discriminator
    async fn get_all(&self) -> RepoResult<Vec<T>>;
}

/// Write operations (Command)
#[async_trait]
pub trait WriteRepository<T: Document>: Send + Sync {
    /// Upsert one document.
    ///
    /// An empty id is replaced by a generated one. A non-empty etag makes
    /// the write conditional; a stale etag fails with
    /// `RepoError::OptimisticConcurrency`. The returned document carries the
    /// etag and timestamp of the write.
    async fn save(&self, item: T) -> RepoResult<T>;

    /// Upsert many documents as transactional chunks.
    ///
    /// Each chunk is atomic within one partition key. A rejected chunk fails
    /// the call; chunks already applied stay applied.
    async fn save_batch(&self, items: Vec<T>) -> RepoResult<Vec<T>>;
}

/// Delete operations
#[async_trait]
pub trait DeleteRepository<T: Document>: Send + Sync {
    /// Look the document up by id, then delete it under its own key.
    ///
    /// A missing document is `RepoError::NotFound`.
    async fn delete_by_id(&self, id: &str) -> RepoResult<()>;
}

/// Full CRUD repository
pub trait CrudRepository<T: Document>:
    ReadRepository<T> + WriteRepository<T> + DeleteRepository<T>
{
}

// Auto-implement CrudRepository for types implementing all traits
impl<T, R> CrudRepository<T> for R
where
    T: Document,
    R: ReadRepository<T> + WriteRepository<T> + DeleteRepository<T>,
{
}

//! Owner-scoped repository operations.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use common::{RepoResult, StoreError};
use domain::{Document, FIELD_DISCRIMINATOR, FIELD_TIMESTAMP};

use super::base::CrudRepository;
use super::document_repository::Repository;
use crate::store::QuerySpec;

/// Repository whose documents all belong to an owner.
///
/// Reads that name the owner are scoped to one partition key and report
/// "not found" as `Ok(None)`.
#[async_trait]
pub trait OwnedItemRepository<T: Document>: CrudRepository<T> {
    /// Every document of `owner_id`, newest first
    async fn get_all_by_owner(&self, owner_id: &str) -> RepoResult<Vec<T>>;

    /// Point read; `Ok(None)` when absent
    async fn get_by_owner_and_id(&self, owner_id: &str, id: &str) -> RepoResult<Option<T>>;

    /// Delete under the item's own key, without a lookup
    async fn delete(&self, item: &T) -> RepoResult<()>;

    /// Save every item with bounded concurrency and throttle retries.
    ///
    /// Items that still fail are reported together in
    /// `RepoError::AggregateBulk`; the rest are persisted.
    async fn save_all(&self, items: Vec<T>, cancel: &CancellationToken) -> RepoResult<()>;

    /// Delete every document of `owner_id` with bounded concurrency.
    async fn delete_all_by_owner_id(&self, owner_id: &str, cancel: &CancellationToken) -> RepoResult<()>;
}

#[async_trait]
impl<T: Document> OwnedItemRepository<T> for Repository<T> {
    async fn get_all_by_owner(&self, owner_id: &str) -> RepoResult<Vec<T>> {
        let spec = QuerySpec::new().order_by_desc(FIELD_TIMESTAMP);
        self.query(spec, Some(self.key_for_owner(owner_id))).await
    }

    async fn get_by_owner_and_id(&self, owner_id: &str, id: &str) -> RepoResult<Option<T>> {
        let handle = self.initialize().await?;
        let key = self.key_for_owner(owner_id);

        let response = match self.store().read_item(handle, id, key).await {
            Ok(response) => response,
            Err(StoreError::NotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // Owner-only keys share a partition across discriminators
        let discriminator = response.document.get(FIELD_DISCRIMINATOR).and_then(Value::as_str);
        if discriminator != Some(self.discriminator()) {
            debug!(id = %id, found = ?discriminator, "Point read hit another document type");
            return Ok(None);
        }

        Ok(Some(serde_json::from_value(response.document)?))
    }

    async fn delete(&self, item: &T) -> RepoResult<()> {
        let key = self.strategy().key_of(item);
        self.delete_with_key(item.id(), key).await
    }

    async fn save_all(&self, items: Vec<T>, cancel: &CancellationToken) -> RepoResult<()> {
        self.save_all_with(items, self.bulk_options(), cancel).await
    }

    async fn delete_all_by_owner_id(&self, owner_id: &str, cancel: &CancellationToken) -> RepoResult<()> {
        let items = self.get_all_by_owner(owner_id).await?;
        if items.is_empty() {
            debug!(owner_id = %owner_id, "Nothing to delete");
            return Ok(());
        }

        self.delete_all_with(items, self.bulk_options(), cancel).await
    }
}

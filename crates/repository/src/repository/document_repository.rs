//! Generic repository over one document type.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use common::{OptionExt, RepoError, RepoResult, RepositoryConfig, StoreError};
use domain::{Document, PartitionKey, FIELD_DISCRIMINATOR, FIELD_ID, TRANSACTIONAL_BATCH_SIZE};

use super::base::{DeleteRepository, ReadRepository, WriteRepository};
use crate::batch::get_batches;
use crate::bulk::{BulkOperationCoordinator, BulkOptions};
use crate::diagnostics::indicates_cross_partition;
use crate::partition::PartitionKeyStrategy;
use crate::provision::{ContainerHandle, ContainerProvisioner};
use crate::store::{BatchItem, DocumentStore, QuerySpec, WriteResponse};

/// Builds fresh entities; the repository reads its discriminator from one.
pub type EntityFactory<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Drained query result with its cost.
#[derive(Debug, Clone)]
pub struct QueryOutcome<T> {
    pub items: Vec<T>,
    pub pages: usize,
    /// Sum of every page's request charge
    pub request_charge: f64,
    /// Any page's diagnostics suggested a fan-out
    pub cross_partition: bool,
}

/// Repository for one document type in a shared, partitioned container.
///
/// Implements the unscoped CRUD traits here and the owner-scoped traits in
/// `owned` and `parented`. The container is provisioned on first use.
pub struct Repository<T: Document> {
    store: Arc<dyn DocumentStore>,
    config: Arc<RepositoryConfig>,
    strategy: PartitionKeyStrategy,
    provisioner: ContainerProvisioner,
    discriminator: String,
    factory: EntityFactory<T>,
    bulk_options: BulkOptions,
}

impl<T: Document> Repository<T> {
    /// Create a repository.
    ///
    /// Fails with `RepoError::Configuration` when the config is invalid or
    /// the factory produces an entity without a discriminator.
    pub fn new<F>(store: Arc<dyn DocumentStore>, config: Arc<RepositoryConfig>, factory: F) -> RepoResult<Self>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        config.validate_config()?;

        let factory: EntityFactory<T> = Arc::new(factory);
        let discriminator = factory().discriminator().to_string();
        if discriminator.trim().is_empty() {
            return Err(RepoError::configuration(
                "entity factory produced an empty discriminator",
            ));
        }

        let strategy = PartitionKeyStrategy::from_config(&config)?;
        let provisioner = ContainerProvisioner::new(store.clone(), config.clone(), strategy.clone());
        let bulk_options = BulkOptions::from_config(&config);

        Ok(Self {
            store,
            config,
            strategy,
            provisioner,
            discriminator,
            factory,
            bulk_options,
        })
    }

    /// Discriminator stamped on every document this repository writes
    pub fn discriminator(&self) -> &str {
        &self.discriminator
    }

    pub(crate) fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn strategy(&self) -> &PartitionKeyStrategy {
        &self.strategy
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn bulk_options(&self) -> BulkOptions {
        self.bulk_options
    }

    /// A fresh entity from the factory
    pub fn create(&self) -> T {
        (self.factory)()
    }

    /// Provision (once) and return the backing container.
    pub async fn initialize(&self) -> RepoResult<&ContainerHandle> {
        self.provisioner.initialize().await
    }

    /// Partition key for `owner_id` under this repository's discriminator
    pub fn key_for_owner(&self, owner_id: &str) -> PartitionKey {
        self.strategy.key_for(owner_id, &self.discriminator)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Run a query and drain every page into one list.
    ///
    /// A discriminator filter is added unless `partition_key` already
    /// narrows to this repository's discriminator. Without a partition key
    /// the query may fan out across partitions.
    pub async fn query(&self, spec: QuerySpec, partition_key: Option<PartitionKey>) -> RepoResult<Vec<T>> {
        Ok(self.query_with_stats(spec, partition_key).await?.items)
    }

    /// Same as `query`, also reporting what the drain cost.
    pub async fn query_with_stats(
        &self,
        spec: QuerySpec,
        partition_key: Option<PartitionKey>,
    ) -> RepoResult<QueryOutcome<T>> {
        let handle = self.initialize().await?;
        let spec = self.compose(spec, partition_key.as_ref())?;
        let query_text = spec.to_query_text();
        let scoped = partition_key.is_some();

        let mut pages = self.store.query(handle, spec, partition_key);
        let mut outcome = QueryOutcome {
            items: Vec::new(),
            pages: 0,
            request_charge: 0.0,
            cross_partition: false,
        };

        while let Some(page) = pages.next().await {
            let page = page?;
            outcome.pages += 1;
            outcome.request_charge += page.request_charge;

            if indicates_cross_partition(&page.diagnostics) {
                outcome.cross_partition = true;
                warn!(
                    container = %handle,
                    query = %query_text,
                    scoped,
                    page = outcome.pages,
                    "Query spans multiple partitions"
                );
            }

            for value in page.items {
                outcome.items.push(serde_json::from_value(value)?);
            }
        }

        debug!(
            container = %handle,
            query = %query_text,
            items = outcome.items.len(),
            pages = outcome.pages,
            request_charge = outcome.request_charge,
            "Query drained"
        );

        Ok(outcome)
    }

    /// Layer the repository discriminator and default page size onto `spec`.
    ///
    /// A caller filter on the discriminator must name this repository's
    /// own; anything else is rejected rather than widening the query to
    /// other document types.
    fn compose(&self, spec: QuerySpec, partition_key: Option<&PartitionKey>) -> RepoResult<QuerySpec> {
        if let Some(foreign) = spec
            .filters
            .iter()
            .find(|f| f.field == FIELD_DISCRIMINATOR && f.value.as_str() != Some(self.discriminator.as_str()))
        {
            return Err(RepoError::configuration(format!(
                "query filters discriminator {} on a '{}' repository",
                foreign.value, self.discriminator
            )));
        }

        let spec = match spec.page_size {
            Some(_) => spec,
            None => spec.with_page_size(self.config.query_page_size),
        };

        let narrowed = partition_key.is_some_and(|pk| pk.narrows_discriminator(&self.discriminator));
        if narrowed || spec.has_filter(FIELD_DISCRIMINATOR) {
            Ok(spec)
        } else {
            Ok(spec.where_eq(FIELD_DISCRIMINATOR, self.discriminator.clone()))
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Fill in a generated id and the repository discriminator when missing.
    fn prepare(&self, item: &mut T) {
        let identity = item.identity_mut();
        if identity.id.is_empty() {
            identity.id = Uuid::new_v4().to_string();
        }
        if identity.discriminator.is_empty() {
            identity.discriminator = self.discriminator.clone();
        }
    }

    /// Delete by id under a known partition key.
    pub async fn delete_with_key(&self, id: &str, partition_key: PartitionKey) -> RepoResult<()> {
        let handle = self.initialize().await?;

        self.store
            .delete(handle, id, partition_key)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => RepoError::not_found(id),
                other => other.into(),
            })?;

        debug!(container = %handle, id = %id, "Document deleted");
        Ok(())
    }

    /// Save every item through the bulk coordinator with explicit options.
    pub async fn save_all_with(
        &self,
        items: Vec<T>,
        options: BulkOptions,
        cancel: &CancellationToken,
    ) -> RepoResult<()> {
        BulkOperationCoordinator::new(options)
            .run(
                items,
                move |item| async move { self.save(item).await.map(|_| ()) },
                cancel,
            )
            .await
    }

    /// Delete every item through the bulk coordinator with explicit options.
    pub async fn delete_all_with(
        &self,
        items: Vec<T>,
        options: BulkOptions,
        cancel: &CancellationToken,
    ) -> RepoResult<()> {
        BulkOperationCoordinator::new(options)
            .run(
                items,
                move |item| async move {
                    let key = self.strategy.key_of(&item);
                    self.delete_with_key(item.id(), key).await
                },
                cancel,
            )
            .await
    }
}

/// Etag precondition for a write; new documents write unconditionally.
fn precondition<T: Document>(item: &T) -> Option<String> {
    match item.etag() {
        "" => None,
        etag => Some(etag.to_string()),
    }
}

fn apply_write<T: Document>(item: &mut T, response: &WriteResponse) {
    let identity = item.identity_mut();
    identity.etag = response.etag.clone();
    identity.timestamp = response.timestamp;
}

fn write_error(error: StoreError, id: &str) -> RepoError {
    match error {
        StoreError::PreconditionFailed => RepoError::concurrency(id),
        other => other.into(),
    }
}

// =============================================================================
// Base trait implementations
// =============================================================================

#[async_trait]
impl<T: Document> ReadRepository<T> for Repository<T> {
    async fn get_by_id(&self, id: &str) -> RepoResult<Option<T>> {
        debug!(id = %id, discriminator = %self.discriminator, "Unscoped lookup, probably cross-partition");

        let spec = QuerySpec::new().where_eq(FIELD_ID, id);
        Ok(self.query(spec, None).await?.into_iter().next())
    }

    async fn get_all(&self) -> RepoResult<Vec<T>> {
        debug!(discriminator = %self.discriminator, "Unscoped listing, probably cross-partition");

        self.query(QuerySpec::new(), None).await
    }
}

#[async_trait]
impl<T: Document> WriteRepository<T> for Repository<T> {
    async fn save(&self, mut item: T) -> RepoResult<T> {
        let handle = self.initialize().await?;
        self.prepare(&mut item);

        let key = self.strategy.key_of(&item);
        let if_match = precondition(&item);
        let document = serde_json::to_value(&item)?;

        let response = self
            .store
            .upsert(handle, document, key, if_match)
            .await
            .map_err(|e| write_error(e, item.id()))?;

        apply_write(&mut item, &response);
        debug!(
            container = %handle,
            id = %item.id(),
            request_charge = response.request_charge,
            "Document saved"
        );

        Ok(item)
    }

    async fn save_batch(&self, mut items: Vec<T>) -> RepoResult<Vec<T>> {
        let handle = self.initialize().await?;
        for item in items.iter_mut() {
            self.prepare(item);
        }

        let mut saved = Vec::with_capacity(items.len());
        for chunk in get_batches(&items, TRANSACTIONAL_BATCH_SIZE) {
            let key = self.strategy.key_of(&chunk[0]);

            if let Some(stray) = chunk.iter().find(|item| self.strategy.key_of(*item) != key) {
                return Err(RepoError::MixedPartitionBatch {
                    id: stray.id().to_string(),
                    expected: key.to_string(),
                    found: self.strategy.key_of(stray).to_string(),
                });
            }

            let batch = chunk
                .iter()
                .map(|item| -> RepoResult<BatchItem> {
                    Ok(BatchItem {
                        document: serde_json::to_value(item)?,
                        if_match: precondition(item),
                    })
                })
                .collect::<RepoResult<Vec<_>>>()?;

            let responses = self
                .store
                .execute_batch(handle, key.clone(), batch)
                .await
                .map_err(|e| write_error(e, chunk[0].id()))?;

            debug!(container = %handle, partition_key = %key, items = chunk.len(), "Batch committed");

            for (item, response) in chunk.iter().zip(&responses) {
                let mut item = item.clone();
                apply_write(&mut item, response);
                saved.push(item);
            }
        }

        Ok(saved)
    }
}

#[async_trait]
impl<T: Document> DeleteRepository<T> for Repository<T> {
    async fn delete_by_id(&self, id: &str) -> RepoResult<()> {
        let item = self.get_by_id(id).await?.ok_or_not_found(id)?;
        let key = self.strategy.key_of(&item);

        self.delete_with_key(id, key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::DocumentIdentity;
    use serde::{Deserialize, Serialize};

    use crate::store::{InMemoryStore, MockDocumentStore};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Note {
        #[serde(flatten)]
        identity: DocumentIdentity,
        text: String,
    }

    impl Document for Note {
        fn identity(&self) -> &DocumentIdentity {
            &self.identity
        }

        fn identity_mut(&mut self) -> &mut DocumentIdentity {
            &mut self.identity
        }
    }

    fn note() -> Note {
        Note {
            identity: DocumentIdentity::new("", "note"),
            text: String::new(),
        }
    }

    fn config(hierarchical: bool) -> Arc<RepositoryConfig> {
        Arc::new(RepositoryConfig {
            hierarchical_partition_key: hierarchical,
            ..RepositoryConfig::default()
        })
    }

    fn repository(store: Arc<dyn DocumentStore>, hierarchical: bool) -> Repository<Note> {
        Repository::new(store, config(hierarchical), note).unwrap()
    }

    #[test]
    fn test_empty_discriminator_rejected() {
        let result = Repository::new(Arc::new(InMemoryStore::new()), config(true), || Note {
            identity: DocumentIdentity::new("", ""),
            text: String::new(),
        });

        assert!(matches!(result, Err(RepoError::Configuration(_))));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = Arc::new(RepositoryConfig {
            max_concurrency: 0,
            ..RepositoryConfig::default()
        });
        let result = Repository::new(Arc::new(InMemoryStore::new()), config, note);

        assert!(matches!(result, Err(RepoError::Configuration(_))));
    }

    #[test]
    fn test_compose_adds_discriminator_when_unscoped() {
        let repo = repository(Arc::new(InMemoryStore::new()), true);

        let spec = repo.compose(QuerySpec::new(), None).unwrap();
        assert!(spec.has_filter(FIELD_DISCRIMINATOR));
        assert_eq!(spec.page_size, Some(repo.config().query_page_size));
    }

    #[test]
    fn test_compose_skips_filter_for_hierarchical_key() {
        let repo = repository(Arc::new(InMemoryStore::new()), true);
        let key = repo.key_for_owner("o1");

        let spec = repo.compose(QuerySpec::new(), Some(&key)).unwrap();
        assert!(!spec.has_filter(FIELD_DISCRIMINATOR));
    }

    #[test]
    fn test_compose_keeps_filter_for_owner_only_key() {
        let repo = repository(Arc::new(InMemoryStore::new()), false);
        let key = repo.key_for_owner("o1");

        let spec = repo.compose(QuerySpec::new().with_page_size(5), Some(&key)).unwrap();
        assert!(spec.has_filter(FIELD_DISCRIMINATOR));
        assert_eq!(spec.page_size, Some(5));
    }

    #[test]
    fn test_compose_rejects_foreign_discriminator() {
        let repo = repository(Arc::new(InMemoryStore::new()), true);
        let key = repo.key_for_owner("o1");

        let unscoped = repo.compose(QuerySpec::new().where_eq(FIELD_DISCRIMINATOR, "comment"), None);
        assert!(matches!(unscoped, Err(RepoError::Configuration(_))));

        let scoped = repo.compose(QuerySpec::new().where_eq(FIELD_DISCRIMINATOR, "comment"), Some(&key));
        assert!(matches!(scoped, Err(RepoError::Configuration(_))));
    }

    #[test]
    fn test_compose_accepts_own_discriminator() {
        let repo = repository(Arc::new(InMemoryStore::new()), true);

        let spec = repo
            .compose(QuerySpec::new().where_eq(FIELD_DISCRIMINATOR, "note"), None)
            .unwrap();
        assert_eq!(spec.filters.len(), 1);
    }

    #[tokio::test]
    async fn test_precondition_failure_maps_to_concurrency() {
        let mut store = MockDocumentStore::new();
        store
            .expect_list_databases()
            .returning(|| Ok(vec!["app".to_string()]));
        store
            .expect_list_containers()
            .returning(|_| Ok(vec!["items".to_string()]));
        store
            .expect_upsert()
            .withf(|_, _, _, if_match| if_match.as_deref() == Some("\"v1\""))
            .times(1)
            .returning(|_, _, _, _| Err(StoreError::PreconditionFailed));

        let repo = repository(Arc::new(store), true);
        let mut stale = repo.create();
        stale.identity.id = "n1".to_string();
        stale.identity.partition_key = "o1".to_string();
        stale.identity.etag = "\"v1\"".to_string();

        let err = repo.save(stale).await.unwrap_err();
        assert!(matches!(err, RepoError::OptimisticConcurrency { ref id } if id == "n1"));
    }

    #[tokio::test]
    async fn test_other_store_errors_propagate() {
        let mut store = MockDocumentStore::new();
        store
            .expect_list_databases()
            .returning(|| Ok(vec!["app".to_string()]));
        store
            .expect_list_containers()
            .returning(|_| Ok(vec!["items".to_string()]));
        store
            .expect_upsert()
            .returning(|_, _, _, _| Err(StoreError::unavailable("maintenance")));

        let repo = repository(Arc::new(store), true);
        let mut item = repo.create();
        item.identity.partition_key = "o1".to_string();

        let err = repo.save(item).await.unwrap_err();
        assert_eq!(err.code(), "STORE_ERROR");
    }
}

//! Database and container provisioning.
//!
//! Provisioning runs lazily before the first repository operation and the
//! resulting handle is cached. With provisioning disabled the repository
//! attaches to a database/container that must already exist.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use common::{RepoError, RepoResult, RepositoryConfig, StoreError};

use crate::partition::PartitionKeyStrategy;
use crate::store::{ContainerSpec, DocumentStore};

/// Resolved location of the container a repository reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle {
    pub database: String,
    pub container: String,
}

impl ContainerHandle {
    pub fn new(database: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            container: container.into(),
        }
    }
}

impl std::fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.database, self.container)
    }
}

/// Idempotently ensures the backing database and container exist.
pub struct ContainerProvisioner {
    store: Arc<dyn DocumentStore>,
    config: Arc<RepositoryConfig>,
    strategy: PartitionKeyStrategy,
    handle: OnceCell<ContainerHandle>,
}

impl ContainerProvisioner {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        config: Arc<RepositoryConfig>,
        strategy: PartitionKeyStrategy,
    ) -> Self {
        Self {
            store,
            config,
            strategy,
            handle: OnceCell::new(),
        }
    }

    /// Resolve the container handle, provisioning on first call.
    ///
    /// Concurrent first callers wait on a single initialization. A failed
    /// attempt is not cached, so the next call tries again.
    pub async fn initialize(&self) -> RepoResult<&ContainerHandle> {
        self.handle.get_or_try_init(|| self.provision()).await
    }

    /// Check whether a handle has been cached.
    pub fn is_initialized(&self) -> bool {
        self.handle.initialized()
    }

    async fn provision(&self) -> RepoResult<ContainerHandle> {
        let handle = ContainerHandle::new(&self.config.database_name, &self.config.container_name);

        if !self.config.provision {
            debug!(container = %handle, "Provisioning disabled, attaching to existing container");
            return Ok(handle);
        }

        self.ensure_database(&handle.database).await?;
        self.ensure_container(&handle).await?;

        Ok(handle)
    }

    async fn ensure_database(&self, name: &str) -> RepoResult<()> {
        let existing = self
            .store
            .list_databases()
            .await
            .map_err(|e| provisioning_failed("database", name, e))?;

        if existing.iter().any(|db| db == name) {
            debug!(database = %name, "Reusing existing database");
            return Ok(());
        }

        match self
            .store
            .create_database(name, self.config.database_throughput)
            .await
        {
            Ok(()) => {
                info!(database = %name, throughput = self.config.database_throughput, "Database created");
                Ok(())
            }
            // Another process created it between list and create
            Err(StoreError::Conflict(_)) => Ok(()),
            Err(e) => Err(provisioning_failed("database", name, e)),
        }
    }

    async fn ensure_container(&self, handle: &ContainerHandle) -> RepoResult<()> {
        let existing = self
            .store
            .list_containers(&handle.database)
            .await
            .map_err(|e| provisioning_failed("container", &handle.container, e))?;

        if existing.iter().any(|c| c == &handle.container) {
            debug!(container = %handle, "Reusing existing container");
            return Ok(());
        }

        let spec = ContainerSpec {
            name: handle.container.clone(),
            partition_key_paths: self.strategy.container_paths(),
        };

        match self.store.create_container(&handle.database, spec).await {
            Ok(()) => {
                info!(
                    container = %handle,
                    paths = ?self.strategy.container_paths(),
                    "Container created"
                );
                Ok(())
            }
            Err(StoreError::Conflict(_)) => Ok(()),
            Err(e) => Err(provisioning_failed("container", &handle.container, e)),
        }
    }
}

fn provisioning_failed(resource: &'static str, name: &str, source: StoreError) -> RepoError {
    error!(resource, name = %name, error = %source, "Provisioning failed");
    RepoError::provisioning(resource, name, source)
}

//! Unified error handling for the repository layer.
//!
//! Two error types live here:
//! - `StoreError`: outcomes reported by the backing document store
//! - `RepoError`: what repository operations return to adapters
//!
//! Neither type formats user-facing messages; adapters map `code()` to
//! whatever their surface needs.

use std::time::Duration;

use domain::DocumentIdentity;
use thiserror::Error;

// =============================================================================
// Store Errors
// =============================================================================

/// Failure reported by the document store for a single request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Resource not found")]
    NotFound,

    /// If-Match etag did not equal the stored version
    #[error("Precondition failed")]
    PreconditionFailed,

    #[error("{0} already exists")]
    Conflict(String),

    /// Rate limited; `retry_after` is the store's hint when it sends one
    #[error("Request rate is too large")]
    Throttled { retry_after: Option<Duration> },

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// HTTP-style status code the store would report
    pub fn status_code(&self) -> u16 {
        match self {
            StoreError::NotFound => 404,
            StoreError::PreconditionFailed => 412,
            StoreError::Conflict(_) => 409,
            StoreError::Throttled { .. } => 429,
            StoreError::BadRequest(_) => 400,
            StoreError::Unavailable(_) => 503,
        }
    }

    pub fn throttled(retry_after: Option<Duration>) -> Self {
        StoreError::Throttled { retry_after }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        StoreError::BadRequest(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        StoreError::Unavailable(msg.into())
    }
}

/// Store result type alias
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Repository Errors
// =============================================================================

/// Repository error types.
#[derive(Error, Debug)]
pub enum RepoError {
    /// Unscoped lookup found nothing. Scoped point reads return `Ok(None)` instead.
    #[error("Document {id} not found")]
    NotFound { id: String },

    /// Save precondition failed; reload and retry with the fresh etag
    #[error("Document {id} was modified by another writer")]
    OptimisticConcurrency { id: String },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Throttled by the document store")]
    Throttled { retry_after: Option<Duration> },

    #[error("Failed to provision {resource} '{name}'")]
    Provisioning {
        resource: &'static str,
        name: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    AggregateBulk(#[from] AggregateBulkError),

    /// A transactional batch chunk contained more than one partition key
    #[error("Document {id} has partition key {found}, batch is bound to {expected}")]
    MixedPartitionBatch {
        id: String,
        expected: String,
        found: String,
    },

    #[error("Serialization error")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Document store error")]
    Store(#[source] StoreError),
}

impl RepoError {
    /// Get error code for adapters
    pub fn code(&self) -> &'static str {
        match self {
            RepoError::NotFound { .. } => "NOT_FOUND",
            RepoError::OptimisticConcurrency { .. } => "CONCURRENCY_CONFLICT",
            RepoError::Configuration(_) => "CONFIGURATION_ERROR",
            RepoError::Throttled { .. } => "THROTTLED",
            RepoError::Provisioning { .. } => "PROVISIONING_ERROR",
            RepoError::AggregateBulk(_) => "BULK_FAILURE",
            RepoError::MixedPartitionBatch { .. } => "MIXED_PARTITION_BATCH",
            RepoError::Serialization(_) => "SERIALIZATION_ERROR",
            RepoError::Cancelled => "CANCELLED",
            RepoError::Store(_) => "STORE_ERROR",
        }
    }

    /// True for rate-limit signals, whether raised directly or wrapped
    pub fn is_throttled(&self) -> bool {
        matches!(
            self,
            RepoError::Throttled { .. } | RepoError::Store(StoreError::Throttled { .. })
        )
    }

    /// Store-suggested delay before retrying, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RepoError::Throttled { retry_after }
            | RepoError::Store(StoreError::Throttled { retry_after }) => *retry_after,
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RepoError::NotFound { .. } | RepoError::Store(StoreError::NotFound)
        )
    }
}

/// Convenience constructors
impl RepoError {
    pub fn not_found(id: impl Into<String>) -> Self {
        RepoError::NotFound { id: id.into() }
    }

    pub fn concurrency(id: impl Into<String>) -> Self {
        RepoError::OptimisticConcurrency { id: id.into() }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        RepoError::Configuration(msg.into())
    }

    pub fn provisioning(resource: &'static str, name: impl Into<String>, source: StoreError) -> Self {
        RepoError::Provisioning {
            resource,
            name: name.into(),
            source,
        }
    }
}

// =============================================================================
// Store Error Conversion
// =============================================================================

impl From<StoreError> for RepoError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Throttled { retry_after } => RepoError::Throttled { retry_after },
            other => RepoError::Store(other),
        }
    }
}

// =============================================================================
// Bulk Failures
// =============================================================================

/// One item that could not be written after its retries ran out.
///
/// Only the item's identity (id, partition key, discriminator, etag) is
/// kept, not the entity itself. Callers holding the original batch match
/// on `item.id` to recover the payload.
#[derive(Debug)]
pub struct BulkFailure {
    pub item: DocumentIdentity,
    pub error: RepoError,
}

/// Every per-item failure left over from a bulk operation.
#[derive(Error, Debug, Default)]
#[error("{} bulk item(s) failed", .failures.len())]
pub struct AggregateBulkError {
    pub failures: Vec<BulkFailure>,
}

impl AggregateBulkError {
    pub fn new(failures: Vec<BulkFailure>) -> Self {
        Self { failures }
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Ids of the failed items
    pub fn ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.item.id.as_str()).collect()
    }
}

/// Result type alias
pub type RepoResult<T> = Result<T, RepoError>;

/// Extension trait for Option -> RepoError conversion
pub trait OptionExt<T> {
    fn ok_or_not_found(self, id: &str) -> RepoResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, id: &str) -> RepoResult<T> {
        self.ok_or_else(|| RepoError::not_found(id))
    }
}

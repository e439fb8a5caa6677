//! Domain-level constants.
//!
//! Wire names and defaults shared by every repository instance.

// =============================================================================
// Document Fields
// =============================================================================

/// Document id field
pub const FIELD_ID: &str = "id";

/// Partition key value field (by convention the owner id)
pub const FIELD_PARTITION_KEY: &str = "pk";

/// Entity type tag field
pub const FIELD_DISCRIMINATOR: &str = "discriminator";

/// Store-assigned version token
pub const FIELD_ETAG: &str = "_etag";

/// Store-assigned unix timestamp
pub const FIELD_TIMESTAMP: &str = "_ts";

/// Parent document id field
pub const FIELD_PARENT_ID: &str = "parentId";

/// Parent document discriminator field
pub const FIELD_PARENT_DISCRIMINATOR: &str = "parentDiscriminator";

// =============================================================================
// Partitioning
// =============================================================================

/// Default key-path spec: owner then discriminator
pub const DEFAULT_PARTITION_KEY_PATHS: &str = "/pk,/discriminator";

/// Separator between segments of a key-path spec
pub const PARTITION_KEY_PATH_SEPARATOR: char = ',';

// =============================================================================
// Batching & Bulk Operations
// =============================================================================

/// Items per transactional batch
pub const TRANSACTIONAL_BATCH_SIZE: usize = 50;

/// Default number of bulk item operations in flight
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Default retry budget per bulk item
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Base delay for exponential backoff (milliseconds)
pub const DEFAULT_BASE_BACKOFF_MS: u64 = 100;

// =============================================================================
// Provisioning
// =============================================================================

/// Default database name
pub const DEFAULT_DATABASE_NAME: &str = "app";

/// Default container name
pub const DEFAULT_CONTAINER_NAME: &str = "items";

/// Default provisioned throughput for new databases
pub const DEFAULT_DATABASE_THROUGHPUT: u32 = 400;

/// Default page size requested from the store
pub const DEFAULT_QUERY_PAGE_SIZE: usize = 100;

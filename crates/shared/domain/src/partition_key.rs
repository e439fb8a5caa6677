//! Partition key value object.

use serde::{Deserialize, Serialize};

/// Routing value the store uses to place a document.
///
/// A single-segment key is the owner id alone; a hierarchical key adds the
/// discriminator as a second segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PartitionKey {
    Single(String),
    Hierarchical(String, String),
}

impl PartitionKey {
    /// Owner segment (always present)
    pub fn owner(&self) -> &str {
        match self {
            PartitionKey::Single(owner) | PartitionKey::Hierarchical(owner, _) => owner,
        }
    }

    /// Discriminator segment, if this key carries one
    pub fn discriminator(&self) -> Option<&str> {
        match self {
            PartitionKey::Single(_) => None,
            PartitionKey::Hierarchical(_, discriminator) => Some(discriminator),
        }
    }

    /// Segments in path order
    pub fn segments(&self) -> Vec<&str> {
        match self {
            PartitionKey::Single(owner) => vec![owner],
            PartitionKey::Hierarchical(owner, discriminator) => vec![owner, discriminator],
        }
    }

    pub fn is_hierarchical(&self) -> bool {
        matches!(self, PartitionKey::Hierarchical(..))
    }

    /// Check whether this key alone narrows a query to one discriminator.
    pub fn narrows_discriminator(&self, discriminator: &str) -> bool {
        self.discriminator() == Some(discriminator)
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionKey::Single(owner) => write!(f, "[\"{}\"]", owner),
            PartitionKey::Hierarchical(owner, discriminator) => {
                write!(f, "[\"{}\",\"{}\"]", owner, discriminator)
            }
        }
    }
}

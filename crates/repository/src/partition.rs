//! Partition key construction.

use common::{RepoError, RepoResult, RepositoryConfig};
use domain::{Document, PartitionKey, PARTITION_KEY_PATH_SEPARATOR};

/// Most segments a hierarchical key can carry: owner, then discriminator.
const MAX_KEY_SEGMENTS: usize = 2;

/// Builds partition keys from owner and discriminator values.
///
/// Holds the parsed key-path spec (`/pk` or `/pk,/discriminator`). Keys are
/// hierarchical only when both the flag is set and the spec has two
/// segments; otherwise the key is the owner id alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionKeyStrategy {
    paths: Vec<String>,
    hierarchical: bool,
}

impl PartitionKeyStrategy {
    /// Parse a comma-separated key-path spec.
    ///
    /// An empty spec, a blank segment, a segment without a leading `/`, or
    /// more than two segments is a configuration error.
    pub fn new(spec: &str, hierarchical: bool) -> RepoResult<Self> {
        if spec.trim().is_empty() {
            return Err(RepoError::configuration("partition key path spec is empty"));
        }

        let paths: Vec<String> = spec
            .split(PARTITION_KEY_PATH_SEPARATOR)
            .map(|segment| segment.trim().to_string())
            .collect();

        if let Some(bad) = paths.iter().find(|p| p.len() < 2 || !p.starts_with('/')) {
            return Err(RepoError::configuration(format!(
                "invalid partition key path '{}' in '{}'",
                bad, spec
            )));
        }

        if paths.len() > MAX_KEY_SEGMENTS {
            return Err(RepoError::configuration(format!(
                "partition key path spec '{}' has {} segments, at most {} are supported",
                spec,
                paths.len(),
                MAX_KEY_SEGMENTS
            )));
        }

        Ok(Self {
            paths,
            hierarchical,
        })
    }

    pub fn from_config(config: &RepositoryConfig) -> RepoResult<Self> {
        Self::new(&config.partition_key_paths, config.hierarchical_partition_key)
    }

    /// Parsed key paths, in order
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// True when keys built with the configured flag carry two segments
    pub fn is_hierarchical(&self) -> bool {
        self.hierarchical && self.paths.len() >= MAX_KEY_SEGMENTS
    }

    /// Build a key, overriding the configured hierarchical flag.
    pub fn build_key(&self, owner_id: &str, discriminator: &str, hierarchical: bool) -> PartitionKey {
        if hierarchical && self.paths.len() >= MAX_KEY_SEGMENTS {
            PartitionKey::Hierarchical(owner_id.to_string(), discriminator.to_string())
        } else {
            PartitionKey::Single(owner_id.to_string())
        }
    }

    /// Build a key using the configured hierarchical flag.
    pub fn key_for(&self, owner_id: &str, discriminator: &str) -> PartitionKey {
        self.build_key(owner_id, discriminator, self.hierarchical)
    }

    /// Key for an entity's own owner and discriminator.
    pub fn key_of<T: Document>(&self, item: &T) -> PartitionKey {
        self.key_for(item.owner_id(), item.discriminator())
    }

    /// Paths a new container is created with: the full list in
    /// hierarchical mode, else only the first.
    pub fn container_paths(&self) -> Vec<String> {
        if self.is_hierarchical() {
            self.paths.clone()
        } else {
            self.paths.iter().take(1).cloned().collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchical_two_segment_key() {
        let strategy = PartitionKeyStrategy::new("/pk,/discriminator", true).unwrap();
        let key = strategy.build_key("owner-1", "note", true);

        assert_eq!(
            key,
            PartitionKey::Hierarchical("owner-1".to_string(), "note".to_string())
        );
        assert_eq!(key.segments().len(), 2);
    }

    #[test]
    fn test_non_hierarchical_key_is_owner() {
        let strategy = PartitionKeyStrategy::new("/pk,/discriminator", true).unwrap();
        let key = strategy.build_key("owner-1", "note", false);

        assert_eq!(key, PartitionKey::Single("owner-1".to_string()));
    }

    #[test]
    fn test_single_segment_spec_ignores_flag() {
        let strategy = PartitionKeyStrategy::new("/pk", true).unwrap();

        assert!(!strategy.is_hierarchical());
        assert_eq!(
            strategy.key_for("owner-1", "note"),
            PartitionKey::Single("owner-1".to_string())
        );
        assert_eq!(strategy.container_paths(), vec!["/pk".to_string()]);
    }

    #[test]
    fn test_segments_are_trimmed() {
        let strategy = PartitionKeyStrategy::new(" /pk , /discriminator ", true).unwrap();

        assert_eq!(strategy.paths(), &["/pk".to_string(), "/discriminator".to_string()]);
    }

    #[test]
    fn test_empty_spec_is_configuration_error() {
        let err = PartitionKeyStrategy::new("", true).unwrap_err();
        assert!(matches!(err, RepoError::Configuration(_)));

        let err = PartitionKeyStrategy::new("   ", false).unwrap_err();
        assert!(matches!(err, RepoError::Configuration(_)));
    }

    #[test]
    fn test_blank_or_relative_segment_rejected() {
        assert!(PartitionKeyStrategy::new("/pk,,", true).is_err());
        assert!(PartitionKeyStrategy::new("pk", false).is_err());
        assert!(PartitionKeyStrategy::new("/", false).is_err());
    }

    #[test]
    fn test_three_segments_rejected() {
        let err = PartitionKeyStrategy::new("/a,/b,/c", true).unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }
}

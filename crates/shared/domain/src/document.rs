//! Stored document identity and the capability traits entities implement.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Identity and versioning fields carried by every stored document.
///
/// `id` is unique within (`pk`, `discriminator`) when hierarchical keys are
/// enabled, otherwise within `pk` alone. `etag` and `timestamp` are owned by
/// the store; callers only ever echo them back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentIdentity {
    #[serde(default)]
    pub id: String,
    /// Partition key value, by convention the owner id
    #[serde(rename = "pk", default)]
    pub partition_key: String,
    #[serde(default)]
    pub discriminator: String,
    /// Empty until the store has accepted a write
    #[serde(rename = "_etag", default, skip_serializing_if = "String::is_empty")]
    pub etag: String,
    #[serde(rename = "_ts", default)]
    pub timestamp: i64,
}

impl DocumentIdentity {
    /// Identity for a new document owned by `owner`.
    pub fn new(owner: impl Into<String>, discriminator: impl Into<String>) -> Self {
        Self {
            partition_key: owner.into(),
            discriminator: discriminator.into(),
            ..Self::default()
        }
    }

    /// True until the store has assigned a version token.
    pub fn is_new(&self) -> bool {
        self.etag.is_empty()
    }
}

/// A typed entity that can be persisted as a document.
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn identity(&self) -> &DocumentIdentity;

    fn identity_mut(&mut self) -> &mut DocumentIdentity;

    fn id(&self) -> &str {
        &self.identity().id
    }

    fn owner_id(&self) -> &str {
        &self.identity().partition_key
    }

    fn discriminator(&self) -> &str {
        &self.identity().discriminator
    }

    fn etag(&self) -> &str {
        &self.identity().etag
    }

    fn timestamp(&self) -> i64 {
        self.identity().timestamp
    }
}

/// Capability for documents that belong to a parent document
/// (e.g. comments under a note), beyond the owner relationship.
pub trait HasParent: Document {
    fn parent_id(&self) -> &str;

    fn parent_discriminator(&self) -> &str;
}

/// Embeddable base for entities with a parent.
///
/// Entities flatten this into their own struct and forward the traits:
///
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Comment {
///     #[serde(flatten)]
///     base: ParentedDocument,
///     text: String,
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentedDocument {
    #[serde(flatten)]
    pub identity: DocumentIdentity,
    #[serde(rename = "parentId", default)]
    pub parent_id: String,
    #[serde(rename = "parentDiscriminator", default)]
    pub parent_discriminator: String,
}

impl ParentedDocument {
    pub fn new(
        owner: impl Into<String>,
        discriminator: impl Into<String>,
        parent_id: impl Into<String>,
        parent_discriminator: impl Into<String>,
    ) -> Self {
        Self {
            identity: DocumentIdentity::new(owner, discriminator),
            parent_id: parent_id.into(),
            parent_discriminator: parent_discriminator.into(),
        }
    }
}

impl Document for ParentedDocument {
    fn identity(&self) -> &DocumentIdentity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut DocumentIdentity {
        &mut self.identity
    }
}

impl HasParent for ParentedDocument {
    fn parent_id(&self) -> &str {
        &self.parent_id
    }

    fn parent_discriminator(&self) -> &str {
        &self.parent_discriminator
    }
}

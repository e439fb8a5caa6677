//! Parent-scoped queries for documents that reference another document.

use async_trait::async_trait;

use common::RepoResult;
use domain::{HasParent, FIELD_PARENT_DISCRIMINATOR, FIELD_PARENT_ID, FIELD_TIMESTAMP};

use super::document_repository::Repository;
use super::owned::OwnedItemRepository;
use crate::store::QuerySpec;

#[async_trait]
pub trait ParentedItemRepository<T: HasParent>: OwnedItemRepository<T> {
    /// Children of `parent_id` within the owner's partition, newest first.
    ///
    /// `parent_discriminator` narrows further when the same parent id may
    /// name documents of different types.
    async fn get_all_by_parent_id(
        &self,
        owner_id: &str,
        parent_id: &str,
        parent_discriminator: Option<&str>,
    ) -> RepoResult<Vec<T>>;
}

#[async_trait]
impl<T: HasParent> ParentedItemRepository<T> for Repository<T> {
    async fn get_all_by_parent_id(
        &self,
        owner_id: &str,
        parent_id: &str,
        parent_discriminator: Option<&str>,
    ) -> RepoResult<Vec<T>> {
        let mut spec = QuerySpec::new().where_eq(FIELD_PARENT_ID, parent_id);
        if let Some(parent_discriminator) = parent_discriminator {
            spec = spec.where_eq(FIELD_PARENT_DISCRIMINATOR, parent_discriminator);
        }

        self.query(
            spec.order_by_desc(FIELD_TIMESTAMP),
            Some(self.key_for_owner(owner_id)),
        )
        .await
    }
}

//! Repository layer for data access.

mod base;
mod document_repository;
mod owned;
mod parented;

pub use base::{CrudRepository, DeleteRepository, ReadRepository, WriteRepository};
pub use document_repository::{EntityFactory, QueryOutcome, Repository};
pub use owned::OwnedItemRepository;
pub use parented::ParentedItemRepository;

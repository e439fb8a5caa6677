//! Integration tests for the document repositories.
//!
//! Every test runs against `InMemoryStore`, which enforces etags, atomic
//! batches and partition keys the way the real store does.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use common::{RepoError, RepositoryConfig};
use docrepo::{
    ContainerHandle, DeleteRepository, InMemoryStore, OwnedItemRepository, ParentedItemRepository,
    QuerySpec, ReadRepository, Repository, WriteRepository,
};
use domain::{Document, DocumentIdentity, HasParent, ParentedDocument, PartitionKey, FIELD_DISCRIMINATOR};

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Note {
    #[serde(flatten)]
    identity: DocumentIdentity,
    title: String,
}

impl Document for Note {
    fn identity(&self) -> &DocumentIdentity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut DocumentIdentity {
        &mut self.identity
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Comment {
    #[serde(flatten)]
    base: ParentedDocument,
    body: String,
}

impl Document for Comment {
    fn identity(&self) -> &DocumentIdentity {
        &self.base.identity
    }

    fn identity_mut(&mut self) -> &mut DocumentIdentity {
        &mut self.base.identity
    }
}

impl HasParent for Comment {
    fn parent_id(&self) -> &str {
        &self.base.parent_id
    }

    fn parent_discriminator(&self) -> &str {
        &self.base.parent_discriminator
    }
}

fn new_note() -> Note {
    Note {
        identity: DocumentIdentity::new("", "note"),
        title: String::new(),
    }
}

fn new_comment() -> Comment {
    Comment {
        base: ParentedDocument::new("", "comment", "", ""),
        body: String::new(),
    }
}

fn note(owner: &str, title: &str) -> Note {
    Note {
        identity: DocumentIdentity::new(owner, "note"),
        title: title.to_string(),
    }
}

fn note_with_id(owner: &str, id: &str) -> Note {
    let mut note = note(owner, id);
    note.identity.id = id.to_string();
    note
}

fn comment(owner: &str, parent_id: &str, parent_discriminator: &str, body: &str) -> Comment {
    Comment {
        base: ParentedDocument::new(owner, "comment", parent_id, parent_discriminator),
        body: body.to_string(),
    }
}

fn handle() -> ContainerHandle {
    ContainerHandle::new("app", "items")
}

fn config() -> RepositoryConfig {
    RepositoryConfig {
        base_backoff_ms: 1,
        max_retries: 2,
        ..RepositoryConfig::default()
    }
}

struct Fixture {
    store: Arc<InMemoryStore>,
    notes: Repository<Note>,
    comments: Repository<Comment>,
}

fn fixture_with(store: InMemoryStore, config: RepositoryConfig) -> Fixture {
    common::init_tracing("warn");

    let store = Arc::new(store);
    let config = Arc::new(config);
    let notes = assert_ok!(Repository::new(store.clone(), config.clone(), new_note));
    let comments = assert_ok!(Repository::new(store.clone(), config, new_comment));

    Fixture {
        store,
        notes,
        comments,
    }
}

fn fixture() -> Fixture {
    fixture_with(InMemoryStore::new(), config())
}

// =============================================================================
// Save
// =============================================================================

#[tokio::test]
async fn test_save_assigns_id_and_keeps_it() {
    let f = fixture();

    let saved = assert_ok!(f.notes.save(note("o1", "first")).await);
    assert!(!saved.id().is_empty());
    assert!(!saved.etag().is_empty());

    let id = saved.id().to_string();
    let mut edited = saved;
    edited.title = "edited".to_string();
    let resaved = assert_ok!(f.notes.save(edited).await);

    assert_eq!(resaved.id(), id);
    assert_eq!(f.store.document_count(&handle()), 1);

    let loaded = assert_ok!(f.notes.get_by_owner_and_id("o1", &id).await).unwrap();
    assert_eq!(loaded.title, "edited");
    assert_eq!(loaded.etag(), resaved.etag());
}

#[tokio::test]
async fn test_stale_etag_is_concurrency_error() {
    let f = fixture();

    let first = assert_ok!(f.notes.save(note("o1", "v1")).await);
    let stale = first.clone();
    assert_ok!(f.notes.save(first).await);

    let err = assert_err!(f.notes.save(stale.clone()).await);
    assert!(matches!(err, RepoError::OptimisticConcurrency { ref id } if id == stale.id()));
}

#[tokio::test]
async fn test_new_items_never_fail_precondition() {
    let f = fixture();

    for i in 0..5 {
        assert_ok!(f.notes.save(note("o1", &format!("n{}", i))).await);
    }

    assert_eq!(f.store.document_count(&handle()), 5);
}

#[tokio::test]
async fn test_save_stamps_repository_discriminator() {
    let f = fixture();
    let mut blank = note("o1", "untyped");
    blank.identity.discriminator = String::new();

    let saved = assert_ok!(f.notes.save(blank).await);

    assert_eq!(saved.discriminator(), "note");
}

#[tokio::test]
async fn test_save_retry_policy_absorbs_transient_throttling() {
    let f = fixture();
    f.store.throttle("n1", 2, Some(Duration::from_millis(1)));
    let repo = &f.notes;

    let err = assert_err!(repo.save(note_with_id("o1", "n1")).await);
    assert!(err.is_throttled());

    let policy = repo.bulk_options().retry;
    let saved = policy
        .execute(&CancellationToken::new(), move || repo.save(note_with_id("o1", "n1")))
        .await;

    assert_eq!(assert_ok!(saved).id(), "n1");
}

// =============================================================================
// Transactional Batches
// =============================================================================

#[tokio::test]
async fn test_save_batch_commits_chunks_of_fifty() {
    let f = fixture();
    let items: Vec<Note> = (0..120).map(|i| note("o1", &format!("n{}", i))).collect();

    let saved = assert_ok!(f.notes.save_batch(items).await);

    assert_eq!(saved.len(), 120);
    assert_eq!(f.store.batch_calls(), 3);
    assert_eq!(f.store.document_count(&handle()), 120);
    assert!(saved.iter().all(|n| !n.id().is_empty() && !n.etag().is_empty()));
}

#[tokio::test]
async fn test_save_batch_rejects_mixed_partition_keys() {
    let f = fixture();
    let items = vec![note_with_id("o1", "a"), note_with_id("o2", "b")];

    let err = assert_err!(f.notes.save_batch(items).await);

    assert!(matches!(err, RepoError::MixedPartitionBatch { ref id, .. } if id == "b"));
    assert_eq!(f.store.batch_calls(), 0);
    assert_eq!(f.store.document_count(&handle()), 0);
}

#[tokio::test]
async fn test_rejected_chunk_keeps_earlier_chunks() {
    let f = fixture();
    let items: Vec<Note> = (0..60).map(|i| note_with_id("o1", &format!("n{}", i))).collect();
    f.store.reject_batches_with("n55");

    assert_err!(f.notes.save_batch(items).await);

    assert_eq!(f.store.batch_calls(), 2);
    assert_eq!(f.store.document_count(&handle()), 50);
    assert!(!f.store.contains_id(&handle(), "n55"));
}

#[tokio::test]
async fn test_save_batch_empty_is_noop() {
    let f = fixture();

    let saved = assert_ok!(f.notes.save_batch(Vec::new()).await);

    assert!(saved.is_empty());
    assert_eq!(f.store.batch_calls(), 0);
}

// =============================================================================
// Reads
// =============================================================================

#[tokio::test]
async fn test_get_all_by_owner_is_newest_first() {
    let config = RepositoryConfig {
        query_page_size: 2,
        ..config()
    };
    let f = fixture_with(InMemoryStore::new(), config);

    let mut saved_ids = Vec::new();
    for i in 0..5 {
        let saved = assert_ok!(f.notes.save(note("o1", &format!("n{}", i))).await);
        saved_ids.push(saved.id().to_string());
    }
    assert_ok!(f.notes.save(note("o2", "other owner")).await);
    assert_ok!(f.comments.save(comment("o1", &saved_ids[0], "note", "hi")).await);

    let notes = assert_ok!(f.notes.get_all_by_owner("o1").await);

    saved_ids.reverse();
    let ids: Vec<&str> = notes.iter().map(|n| n.id()).collect();
    assert_eq!(ids, saved_ids);
    assert!(notes.windows(2).all(|w| w[0].timestamp() > w[1].timestamp()));
}

#[tokio::test]
async fn test_scoped_read_missing_is_none() {
    let f = fixture();
    let saved = assert_ok!(f.notes.save(note("o1", "mine")).await);

    assert!(assert_ok!(f.notes.get_by_owner_and_id("o1", "missing").await).is_none());
    assert!(assert_ok!(f.notes.get_by_owner_and_id("o2", saved.id()).await).is_none());
}

#[tokio::test]
async fn test_owner_only_key_filters_other_discriminators() {
    let config = RepositoryConfig {
        hierarchical_partition_key: false,
        ..config()
    };
    let f = fixture_with(InMemoryStore::new(), config);

    let mut shared = comment("o1", "p1", "note", "same id as a note would use");
    shared.base.identity.id = "shared".to_string();
    assert_ok!(f.comments.save(shared).await);
    assert_ok!(f.notes.save(note("o1", "a note")).await);

    assert!(assert_ok!(f.notes.get_by_owner_and_id("o1", "shared").await).is_none());
    assert_eq!(assert_ok!(f.notes.get_all_by_owner("o1").await).len(), 1);
    assert_eq!(assert_ok!(f.comments.get_all_by_owner("o1").await).len(), 1);
}

#[tokio::test]
async fn test_unscoped_reads_span_owners() {
    let f = fixture_with(InMemoryStore::new().with_physical_partitions(4), config());

    let first = assert_ok!(f.notes.save(note("o1", "a")).await);
    assert_ok!(f.notes.save(note("o2", "b")).await);
    assert_ok!(f.notes.save(note("o3", "c")).await);
    assert_ok!(f.comments.save(comment("o1", first.id(), "note", "not a note")).await);

    let all = assert_ok!(f.notes.get_all().await);
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|n| n.discriminator() == "note"));

    let found = assert_ok!(f.notes.get_by_id(first.id()).await);
    assert_eq!(found.map(|n| n.title), Some("a".to_string()));
    assert!(assert_ok!(f.notes.get_by_id("missing").await).is_none());
}

#[tokio::test]
async fn test_query_rejects_other_discriminator() {
    let f = fixture();

    let first = assert_ok!(f.notes.save(note("o1", "a")).await);
    assert_ok!(f.comments.save(comment("o1", first.id(), "note", "not a note")).await);

    let foreign = QuerySpec::new().where_eq(FIELD_DISCRIMINATOR, "comment");
    let err = assert_err!(f.notes.query(foreign.clone(), None).await);
    assert!(matches!(err, RepoError::Configuration(_)));

    let scoped = f.notes.query(foreign, Some(f.notes.key_for_owner("o1"))).await;
    assert!(matches!(scoped, Err(RepoError::Configuration(_))));

    let own = QuerySpec::new().where_eq(FIELD_DISCRIMINATOR, "note");
    let found = assert_ok!(f.notes.query(own, None).await);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].title, "a");
}

#[tokio::test]
async fn test_query_reports_charge_and_fan_out() {
    let f = fixture_with(InMemoryStore::new().with_physical_partitions(4), config());

    assert_ok!(f.notes.save(note("o1", "a")).await);
    assert_ok!(f.notes.save(note("o2", "b")).await);
    assert_ok!(f.notes.save(note("o3", "c")).await);

    let unscoped = assert_ok!(
        f.notes
            .query_with_stats(QuerySpec::new().with_page_size(2), None)
            .await
    );
    assert_eq!(unscoped.items.len(), 3);
    assert_eq!(unscoped.pages, 2);
    assert!(unscoped.cross_partition);
    // 2.8 per page plus 0.4 per item
    assert!((unscoped.request_charge - 6.8).abs() < 1e-9);

    let scoped = assert_ok!(
        f.notes
            .query_with_stats(QuerySpec::new(), Some(f.notes.key_for_owner("o1")))
            .await
    );
    assert_eq!(scoped.items.len(), 1);
    assert_eq!(scoped.pages, 1);
    assert!(!scoped.cross_partition);
    assert!(scoped.request_charge > 0.0);
}

#[tokio::test]
async fn test_get_all_by_parent_id() {
    let f = fixture();

    assert_ok!(f.comments.save(comment("o1", "p1", "note", "first")).await);
    assert_ok!(f.comments.save(comment("o1", "p1", "task", "on a task")).await);
    assert_ok!(f.comments.save(comment("o1", "p1", "note", "second")).await);
    assert_ok!(f.comments.save(comment("o1", "p2", "note", "elsewhere")).await);
    assert_ok!(f.comments.save(comment("o2", "p1", "note", "other owner")).await);

    let all = assert_ok!(f.comments.get_all_by_parent_id("o1", "p1", None).await);
    let bodies: Vec<&str> = all.iter().map(|c| c.body.as_str()).collect();
    assert_eq!(bodies, vec!["second", "on a task", "first"]);

    let on_notes = assert_ok!(f.comments.get_all_by_parent_id("o1", "p1", Some("note")).await);
    assert_eq!(on_notes.len(), 2);
    assert!(on_notes
        .iter()
        .all(|c| c.parent_id() == "p1" && c.parent_discriminator() == "note"));
}

// =============================================================================
// Deletes
// =============================================================================

#[tokio::test]
async fn test_delete_by_id_looks_up_key() {
    let f = fixture();
    let saved = assert_ok!(f.notes.save(note("o1", "doomed")).await);

    assert_ok!(f.notes.delete_by_id(saved.id()).await);

    assert_eq!(f.store.document_count(&handle()), 0);
    let err = assert_err!(f.notes.delete_by_id(saved.id()).await);
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_delete_item_uses_own_key() {
    let f = fixture();
    let saved = assert_ok!(f.notes.save(note("o1", "doomed")).await);
    let key = PartitionKey::Hierarchical("o1".to_string(), "note".to_string());
    assert!(f.store.get(&handle(), &key, saved.id()).is_some());

    assert_ok!(f.notes.delete(&saved).await);

    assert!(f.store.get(&handle(), &key, saved.id()).is_none());
}

#[tokio::test]
async fn test_delete_all_by_owner_id() {
    let f = fixture();
    for i in 0..6 {
        assert_ok!(f.notes.save(note("o1", &format!("n{}", i))).await);
    }
    let keep = assert_ok!(f.notes.save(note("o2", "keep")).await);
    assert_ok!(f.comments.save(comment("o1", "p1", "note", "keep too")).await);

    assert_ok!(f.notes.delete_all_by_owner_id("o1", &CancellationToken::new()).await);

    assert!(assert_ok!(f.notes.get_all_by_owner("o1").await).is_empty());
    assert!(f.store.contains_id(&handle(), keep.id()));
    assert_eq!(assert_ok!(f.comments.get_all_by_owner("o1").await).len(), 1);
}

#[tokio::test]
async fn test_delete_all_for_empty_owner_is_noop() {
    let f = fixture();

    assert_ok!(f.notes.delete_all_by_owner_id("nobody", &CancellationToken::new()).await);

    assert_eq!(f.store.delete_calls(), 0);
}

// =============================================================================
// Bulk Saves
// =============================================================================

#[tokio::test]
async fn test_bulk_save_respects_max_concurrency() {
    let config = RepositoryConfig {
        max_concurrency: 4,
        ..config()
    };
    let store = InMemoryStore::new().with_write_latency(Duration::from_millis(5));
    let f = fixture_with(store, config);
    let items: Vec<Note> = (0..40).map(|i| note("o1", &format!("n{}", i))).collect();

    assert_ok!(f.notes.save_all(items, &CancellationToken::new()).await);

    assert_eq!(f.store.document_count(&handle()), 40);
    assert!(f.store.max_in_flight() <= 4);
    assert!(f.store.max_in_flight() >= 1);
}

#[tokio::test]
async fn test_bulk_save_reports_every_exhausted_item() {
    let f = fixture();
    let items: Vec<Note> = (0..10).map(|i| note_with_id("o1", &format!("n{}", i))).collect();
    for id in ["n2", "n5", "n7"] {
        f.store.throttle_always(id);
    }

    let err = assert_err!(f.notes.save_all(items, &CancellationToken::new()).await);

    let RepoError::AggregateBulk(aggregate) = err else {
        panic!("expected aggregate bulk error");
    };
    let mut failed = aggregate.ids();
    failed.sort();
    assert_eq!(failed, vec!["n2", "n5", "n7"]);
    assert!(aggregate.failures.iter().all(|failure| failure.error.is_throttled()));
    assert_eq!(f.store.document_count(&handle()), 7);
}

#[tokio::test]
async fn test_bulk_save_recovers_from_transient_throttling() {
    let f = fixture();
    let items: Vec<Note> = (0..5).map(|i| note_with_id("o1", &format!("n{}", i))).collect();
    f.store.throttle("n1", 2, None);
    f.store.throttle("n3", 1, Some(Duration::from_millis(2)));

    assert_ok!(f.notes.save_all(items, &CancellationToken::new()).await);

    assert_eq!(f.store.document_count(&handle()), 5);
}

#[tokio::test]
async fn test_cancelled_bulk_save_writes_nothing() {
    let f = fixture();
    let items: Vec<Note> = (0..5).map(|i| note_with_id("o1", &format!("n{}", i))).collect();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = assert_err!(f.notes.save_all(items, &cancel).await);

    let RepoError::AggregateBulk(aggregate) = err else {
        panic!("expected aggregate bulk error");
    };
    assert_eq!(aggregate.len(), 5);
    assert_eq!(f.store.upsert_calls(), 0);
}

// =============================================================================
// Provisioning
// =============================================================================

#[tokio::test]
async fn test_initialize_twice_provisions_once() {
    let f = fixture();

    assert_ok!(f.notes.initialize().await);
    assert_ok!(f.notes.initialize().await);
    assert_ok!(f.notes.save(note("o1", "after init")).await);

    assert_eq!(f.store.create_database_calls(), 1);
    assert_eq!(f.store.create_container_calls(), 1);
}

#[tokio::test]
async fn test_repositories_share_one_container() {
    let f = fixture();

    assert_ok!(f.notes.initialize().await);
    assert_ok!(f.comments.initialize().await);

    // The second repository finds what the first created
    assert_eq!(f.store.create_database_calls(), 1);
    assert_eq!(f.store.create_container_calls(), 1);
}

//! In-process document store.
//!
//! Behaves like the real store where the repository can observe it: etags
//! and `_ts` are assigned on every write, If-Match preconditions are
//! enforced, batches are all-or-nothing, queries come back in pages with
//! diagnostics text, and provisioning calls are counted. Fault injection
//! (throttling, batch rejection) and an in-flight write high-water mark make
//! it usable as an instrumented fake in tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use uuid::Uuid;

use common::{StoreError, StoreResult};
use domain::{
    PartitionKey, DEFAULT_QUERY_PAGE_SIZE, FIELD_ETAG, FIELD_ID, FIELD_TIMESTAMP,
};

use super::{
    BatchItem, ContainerSpec, DeleteResponse, DocumentStore, PageStream, QueryPage, QuerySpec,
    ReadResponse, WriteResponse,
};
use crate::provision::ContainerHandle;

const POINT_READ_CHARGE: f64 = 1.0;
const WRITE_CHARGE: f64 = 5.7;
const QUERY_PAGE_CHARGE: f64 = 2.8;
const QUERY_ITEM_CHARGE: f64 = 0.4;

/// Physical partition ranges a container is spread over
const DEFAULT_PHYSICAL_PARTITIONS: usize = 4;

#[derive(Default)]
struct State {
    databases: BTreeMap<String, DatabaseState>,
    clock: i64,
}

struct DatabaseState {
    throughput: u32,
    containers: BTreeMap<String, ContainerState>,
}

struct ContainerState {
    partition_key_paths: Vec<String>,
    /// Keyed by (rendered partition key, id)
    documents: BTreeMap<(String, String), StoredDocument>,
}

struct StoredDocument {
    partition_key: PartitionKey,
    body: Value,
}

impl StoredDocument {
    fn etag(&self) -> Option<&str> {
        self.body.get(FIELD_ETAG).and_then(Value::as_str)
    }
}

impl State {
    /// Next write timestamp; strictly increasing even within one second.
    fn tick(&mut self) -> i64 {
        let now = chrono::Utc::now().timestamp();
        self.clock = std::cmp::max(self.clock + 1, now);
        self.clock
    }

    fn container(&self, handle: &ContainerHandle) -> StoreResult<&ContainerState> {
        self.databases
            .get(&handle.database)
            .and_then(|db| db.containers.get(&handle.container))
            .ok_or(StoreError::NotFound)
    }

    fn container_mut(&mut self, handle: &ContainerHandle) -> StoreResult<&mut ContainerState> {
        self.databases
            .get_mut(&handle.database)
            .and_then(|db| db.containers.get_mut(&handle.container))
            .ok_or(StoreError::NotFound)
    }
}

struct ThrottleRule {
    /// `None` throttles forever
    remaining: Option<u32>,
    retry_after: Option<Duration>,
}

#[derive(Default)]
struct Faults {
    throttled: HashMap<String, ThrottleRule>,
    rejected_batch_ids: HashSet<String>,
}

#[derive(Default)]
struct Metrics {
    create_database: AtomicUsize,
    create_container: AtomicUsize,
    upserts: AtomicUsize,
    batches: AtomicUsize,
    deletes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Metrics {
    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(self)
    }
}

/// Decrements the in-flight counter when a write completes.
struct InFlight<'a>(&'a Metrics);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory `DocumentStore`.
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    faults: Arc<Mutex<Faults>>,
    metrics: Arc<Metrics>,
    page_size: usize,
    write_latency: Duration,
    physical_partitions: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            faults: Arc::new(Mutex::new(Faults::default())),
            metrics: Arc::new(Metrics::default()),
            page_size: DEFAULT_QUERY_PAGE_SIZE,
            write_latency: Duration::ZERO,
            physical_partitions: DEFAULT_PHYSICAL_PARTITIONS,
        }
    }

    /// Default page size when a query does not request one
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Time each write spends "on the wire"
    pub fn with_write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = latency;
        self
    }

    pub fn with_physical_partitions(mut self, partitions: usize) -> Self {
        self.physical_partitions = partitions.max(1);
        self
    }

    /// Create a database and container up front without counting it as
    /// a provisioning call.
    pub fn with_container(self, database: &str, container: &str, partition_key_paths: &[&str]) -> Self {
        {
            let mut state = lock(&self.state);
            let db = state
                .databases
                .entry(database.to_string())
                .or_insert_with(|| DatabaseState {
                    throughput: 0,
                    containers: BTreeMap::new(),
                });
            db.containers.insert(
                container.to_string(),
                ContainerState {
                    partition_key_paths: partition_key_paths.iter().map(|p| p.to_string()).collect(),
                    documents: BTreeMap::new(),
                },
            );
        }
        self
    }

    // =========================================================================
    // Fault Injection
    // =========================================================================

    /// Throttle the next `times` writes of document `id`.
    pub fn throttle(&self, id: &str, times: u32, retry_after: Option<Duration>) {
        lock(&self.faults).throttled.insert(
            id.to_string(),
            ThrottleRule {
                remaining: Some(times),
                retry_after,
            },
        );
    }

    /// Throttle every write of document `id`.
    pub fn throttle_always(&self, id: &str) {
        lock(&self.faults).throttled.insert(
            id.to_string(),
            ThrottleRule {
                remaining: None,
                retry_after: None,
            },
        );
    }

    /// Reject any transactional batch that contains document `id`.
    pub fn reject_batches_with(&self, id: &str) {
        lock(&self.faults).rejected_batch_ids.insert(id.to_string());
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn create_database_calls(&self) -> usize {
        self.metrics.create_database.load(Ordering::SeqCst)
    }

    pub fn create_container_calls(&self) -> usize {
        self.metrics.create_container.load(Ordering::SeqCst)
    }

    /// Single-document upserts attempted, including throttled ones
    pub fn upsert_calls(&self) -> usize {
        self.metrics.upserts.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.metrics.batches.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.metrics.deletes.load(Ordering::SeqCst)
    }

    /// Highest number of writes observed in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.metrics.max_in_flight.load(Ordering::SeqCst)
    }

    /// Throughput a database was created with
    pub fn database_throughput(&self, database: &str) -> Option<u32> {
        lock(&self.state).databases.get(database).map(|db| db.throughput)
    }

    /// Stored body of a document, if present
    pub fn get(&self, container: &ContainerHandle, partition_key: &PartitionKey, id: &str) -> Option<Value> {
        let state = lock(&self.state);
        state
            .container(container)
            .ok()
            .and_then(|c| c.documents.get(&(partition_key.to_string(), id.to_string())))
            .map(|d| d.body.clone())
    }

    /// Check whether any partition of the container holds document `id`.
    pub fn contains_id(&self, container: &ContainerHandle, id: &str) -> bool {
        let state = lock(&self.state);
        state
            .container(container)
            .map(|c| c.documents.keys().any(|(_, doc_id)| doc_id == id))
            .unwrap_or(false)
    }

    pub fn document_count(&self, container: &ContainerHandle) -> usize {
        let state = lock(&self.state);
        state
            .container(container)
            .map(|c| c.documents.len())
            .unwrap_or(0)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn simulate_latency(&self) {
        if self.write_latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.write_latency).await;
        }
    }

    fn check_throttle(&self, id: &str) -> StoreResult<()> {
        let mut faults = lock(&self.faults);
        if let Some(rule) = faults.throttled.get_mut(id) {
            match rule.remaining.as_mut() {
                None => return Err(StoreError::throttled(rule.retry_after)),
                Some(0) => {}
                Some(remaining) => {
                    *remaining -= 1;
                    return Err(StoreError::throttled(rule.retry_after));
                }
            }
        }
        Ok(())
    }

    fn snapshot(
        &self,
        container: &ContainerHandle,
        spec: &QuerySpec,
        partition_key: Option<&PartitionKey>,
    ) -> StoreResult<QuerySnapshot> {
        let state = lock(&self.state);
        let target = state.container(container)?;

        let mut items: Vec<Value> = target
            .documents
            .values()
            .filter(|d| partition_key.map_or(true, |pk| d.partition_key == *pk))
            .filter(|d| spec.matches(&d.body))
            .map(|d| d.body.clone())
            .collect();
        items.sort_by(|a, b| spec.compare(a, b));

        let ranges = match partition_key {
            Some(_) => 1,
            None => {
                let distinct: BTreeSet<&String> = target.documents.keys().map(|(pk, _)| pk).collect();
                distinct.len().clamp(1, self.physical_partitions)
            }
        };

        Ok(QuerySnapshot {
            query_text: spec.to_query_text(),
            items,
            ranges,
        })
    }
}

struct QuerySnapshot {
    query_text: String,
    items: Vec<Value>,
    ranges: usize,
}

impl QuerySnapshot {
    fn diagnostics(&self, retrieved: usize) -> String {
        let partitions: Vec<Value> = (0..self.ranges)
            .map(|r| json!({ "PartitionKeyRangeId": r.to_string() }))
            .collect();
        json!({
            "query": self.query_text,
            "retrievedDocumentCount": retrieved,
            "partitions": partitions,
        })
        .to_string()
    }
}

struct QueryCursor {
    store: InMemoryStore,
    container: ContainerHandle,
    spec: QuerySpec,
    partition_key: Option<PartitionKey>,
    page_size: usize,
    snapshot: Option<QuerySnapshot>,
    offset: usize,
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn list_databases(&self) -> StoreResult<Vec<String>> {
        Ok(lock(&self.state).databases.keys().cloned().collect())
    }

    async fn create_database(&self, name: &str, throughput: u32) -> StoreResult<()> {
        self.metrics.create_database.fetch_add(1, Ordering::SeqCst);
        let mut state = lock(&self.state);
        if state.databases.contains_key(name) {
            return Err(StoreError::Conflict(format!("Database {}", name)));
        }
        state.databases.insert(
            name.to_string(),
            DatabaseState {
                throughput,
                containers: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn list_containers(&self, database: &str) -> StoreResult<Vec<String>> {
        let state = lock(&self.state);
        let db = state.databases.get(database).ok_or(StoreError::NotFound)?;
        Ok(db.containers.keys().cloned().collect())
    }

    async fn create_container(&self, database: &str, spec: ContainerSpec) -> StoreResult<()> {
        self.metrics.create_container.fetch_add(1, Ordering::SeqCst);
        if spec.partition_key_paths.is_empty() {
            return Err(StoreError::bad_request("container requires a partition key path"));
        }
        let mut state = lock(&self.state);
        let db = state.databases.get_mut(database).ok_or(StoreError::NotFound)?;
        if db.containers.contains_key(&spec.name) {
            return Err(StoreError::Conflict(format!("Container {}", spec.name)));
        }
        db.containers.insert(
            spec.name,
            ContainerState {
                partition_key_paths: spec.partition_key_paths,
                documents: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn upsert(
        &self,
        container: &ContainerHandle,
        mut document: Value,
        partition_key: PartitionKey,
        if_match: Option<String>,
    ) -> StoreResult<WriteResponse> {
        let _in_flight = self.metrics.enter();
        self.metrics.upserts.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let id = document_id(&document)?;
        self.check_throttle(&id)?;

        let mut state = lock(&self.state);
        let timestamp = state.tick();
        let target = state.container_mut(container)?;
        check_partition_key(&target.partition_key_paths, &document, &partition_key)?;

        let key = (partition_key.to_string(), id);
        if let Some(expected) = if_match.as_deref() {
            let current = target.documents.get(&key).and_then(StoredDocument::etag);
            if current != Some(expected) {
                return Err(StoreError::PreconditionFailed);
            }
        }

        let etag = new_etag();
        stamp(&mut document, &etag, timestamp);
        target.documents.insert(
            key,
            StoredDocument {
                partition_key,
                body: document,
            },
        );

        Ok(WriteResponse {
            etag,
            timestamp,
            diagnostics: String::new(),
            request_charge: WRITE_CHARGE,
        })
    }

    async fn execute_batch(
        &self,
        container: &ContainerHandle,
        partition_key: PartitionKey,
        items: Vec<BatchItem>,
    ) -> StoreResult<Vec<WriteResponse>> {
        let _in_flight = self.metrics.enter();
        self.metrics.batches.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let ids = items
            .iter()
            .map(|item| document_id(&item.document))
            .collect::<StoreResult<Vec<String>>>()?;

        {
            let faults = lock(&self.faults);
            if let Some(id) = ids.iter().find(|id| faults.rejected_batch_ids.contains(*id)) {
                return Err(StoreError::bad_request(format!("batch rejected at document {}", id)));
            }
        }

        let mut state = lock(&self.state);
        let timestamp = state.tick();
        let target = state.container_mut(container)?;
        let rendered_key = partition_key.to_string();

        // Validate everything before applying anything
        for (item, id) in items.iter().zip(&ids) {
            check_partition_key(&target.partition_key_paths, &item.document, &partition_key)?;
            if let Some(expected) = item.if_match.as_deref() {
                let current = target
                    .documents
                    .get(&(rendered_key.clone(), id.clone()))
                    .and_then(StoredDocument::etag);
                if current != Some(expected) {
                    return Err(StoreError::PreconditionFailed);
                }
            }
        }

        let responses = items
            .into_iter()
            .zip(ids)
            .map(|(item, id)| {
                let mut document = item.document;
                let etag = new_etag();
                stamp(&mut document, &etag, timestamp);
                target.documents.insert(
                    (rendered_key.clone(), id),
                    StoredDocument {
                        partition_key: partition_key.clone(),
                        body: document,
                    },
                );
                WriteResponse {
                    etag,
                    timestamp,
                    diagnostics: String::new(),
                    request_charge: WRITE_CHARGE,
                }
            })
            .collect();

        Ok(responses)
    }

    async fn read_item(
        &self,
        container: &ContainerHandle,
        id: &str,
        partition_key: PartitionKey,
    ) -> StoreResult<ReadResponse> {
        let state = lock(&self.state);
        let document = state
            .container(container)?
            .documents
            .get(&(partition_key.to_string(), id.to_string()))
            .map(|d| d.body.clone())
            .ok_or(StoreError::NotFound)?;

        Ok(ReadResponse {
            document,
            diagnostics: String::new(),
            request_charge: POINT_READ_CHARGE,
        })
    }

    async fn delete(
        &self,
        container: &ContainerHandle,
        id: &str,
        partition_key: PartitionKey,
    ) -> StoreResult<DeleteResponse> {
        let _in_flight = self.metrics.enter();
        self.metrics.deletes.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        self.check_throttle(id)?;

        let mut state = lock(&self.state);
        state
            .container_mut(container)?
            .documents
            .remove(&(partition_key.to_string(), id.to_string()))
            .ok_or(StoreError::NotFound)?;

        Ok(DeleteResponse {
            diagnostics: String::new(),
            request_charge: WRITE_CHARGE,
        })
    }

    fn query(
        &self,
        container: &ContainerHandle,
        spec: QuerySpec,
        partition_key: Option<PartitionKey>,
    ) -> PageStream {
        let cursor = QueryCursor {
            store: self.clone(),
            container: container.clone(),
            page_size: spec.page_size.unwrap_or(self.page_size).max(1),
            spec,
            partition_key,
            snapshot: None,
            offset: 0,
        };

        stream::unfold(Some(cursor), |cursor| async move {
            let mut cursor = cursor?;
            tokio::task::yield_now().await;

            let snapshot = match cursor.snapshot.take() {
                Some(snapshot) => snapshot,
                None => match cursor.store.snapshot(
                    &cursor.container,
                    &cursor.spec,
                    cursor.partition_key.as_ref(),
                ) {
                    Ok(snapshot) => snapshot,
                    Err(e) => return Some((Err(e), None)),
                },
            };

            let end = std::cmp::min(cursor.offset + cursor.page_size, snapshot.items.len());
            let items = snapshot.items[cursor.offset..end].to_vec();
            let has_more = end < snapshot.items.len();
            let page = QueryPage {
                diagnostics: snapshot.diagnostics(items.len()),
                request_charge: QUERY_PAGE_CHARGE + QUERY_ITEM_CHARGE * items.len() as f64,
                items,
                has_more,
            };

            cursor.offset = end;
            cursor.snapshot = Some(snapshot);
            Some((Ok(page), has_more.then_some(cursor)))
        })
        .boxed()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn new_etag() -> String {
    format!("\"{}\"", Uuid::new_v4())
}

fn document_id(document: &Value) -> StoreResult<String> {
    document
        .get(FIELD_ID)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| StoreError::bad_request("document requires a non-empty id"))
}

fn stamp(document: &mut Value, etag: &str, timestamp: i64) {
    if let Value::Object(fields) = document {
        fields.insert(FIELD_ETAG.to_string(), json!(etag));
        fields.insert(FIELD_TIMESTAMP.to_string(), json!(timestamp));
    }
}

/// The document's values at the container's key paths must equal the key.
fn check_partition_key(paths: &[String], document: &Value, key: &PartitionKey) -> StoreResult<()> {
    let segments = key.segments();
    if segments.len() != paths.len() {
        return Err(StoreError::bad_request(format!(
            "partition key {} has {} segment(s), container expects {}",
            key,
            segments.len(),
            paths.len()
        )));
    }

    for (path, expected) in paths.iter().zip(segments) {
        let field = path.trim_start_matches('/');
        if document.get(field).and_then(Value::as_str) != Some(expected) {
            return Err(StoreError::bad_request(format!(
                "document value at {} does not match partition key {}",
                path, key
            )));
        }
    }

    Ok(())
}

//! In-memory fakes for the data source, lease store, and observer.

use crate::changefeed::{ChangeFeedObserver, CloseReason, Lease, LeaseStore, ObserverContext};
use crate::datasource::DataSource;
use crate::error::{DataSourceError, LeaseError, ObserverError};
use crate::query::{compare_documents, compare_values, sort_value};
use crate::routing::{KeyRange, PartitionKeyRange};
use crate::types::{Document, FeedPage, QuerySpec, QueryState, SortDirection, SortSpec};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct DocRecord {
    rid: u64,
    key: String,
    document: Document,
}

/// Continuation cursor for ORDER BY fetches against the fake: position in
/// the (sort keys, rid) order.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderCursor {
    keys: Vec<serde_json::Value>,
    rid: u64,
}

/// Where a document falls relative to an ORDER BY cursor.
fn cmp_to_cursor(doc: &DocRecord, cursor: &OrderCursor, order_by: &[SortSpec]) -> Ordering {
    for (spec, cursor_key) in order_by.iter().zip(&cursor.keys) {
        let ordering = compare_values(sort_value(&doc.document, &spec.path), cursor_key);
        let ordering = match spec.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    doc.rid.cmp(&cursor.rid)
}

struct CollectionState {
    topology: Vec<PartitionKeyRange>,
    split_parents: HashSet<String>,
    documents: Vec<DocRecord>,
    next_range_id: u64,
    injected: VecDeque<DataSourceError>,
}

/// An in-memory document container with a live, splittable partition map
/// and configurable failure injection.
///
/// Documents carry a monotonically increasing record id; unordered and
/// change-feed continuations are record-id cursors, which stay valid across
/// splits because every fetch re-filters by the requested range.
pub struct InMemoryCollection {
    state: Mutex<CollectionState>,
    next_rid: AtomicU64,
}

impl InMemoryCollection {
    /// An empty container with a single range covering the key space.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CollectionState {
                topology: vec![PartitionKeyRange::new("0", "", "")],
                split_parents: HashSet::new(),
                documents: Vec::new(),
                next_range_id: 1,
                injected: VecDeque::new(),
            }),
            next_rid: AtomicU64::new(1),
        }
    }

    /// Insert a document under an effective partition key.
    pub fn insert(&self, key: impl Into<String>, document: Document) {
        let rid = self.next_rid.fetch_add(1, AtomicOrdering::SeqCst);
        self.state.lock().documents.push(DocRecord {
            rid,
            key: key.into(),
            document,
        });
    }

    /// Snapshot of the current partition map, in key-space order.
    pub fn ranges(&self) -> Vec<PartitionKeyRange> {
        let mut ranges = self.state.lock().topology.clone();
        crate::routing::sort_by_min(&mut ranges);
        ranges
    }

    /// Number of documents stored.
    pub fn len(&self) -> usize {
        self.state.lock().documents.len()
    }

    /// Whether the container is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split a live range in two at the median stored key. Requests against
    /// the old range id fail with a split signal from then on.
    pub fn split_partition(&self, range_id: &str) -> Result<(), String> {
        let mut state = self.state.lock();

        let position = state
            .topology
            .iter()
            .position(|r| r.id == range_id)
            .ok_or_else(|| format!("range {range_id} not found"))?;
        let parent = state.topology[position].clone();

        let mut keys: Vec<&str> = state
            .documents
            .iter()
            .filter(|d| parent.range.contains_point(&d.key))
            .map(|d| d.key.as_str())
            .collect();
        keys.sort_unstable();
        keys.dedup();

        let midpoint = keys
            .get(keys.len() / 2)
            .copied()
            .filter(|k| *k > parent.range.min.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}m", parent.range.min));
        if !parent.range.contains_point(&midpoint) || midpoint == parent.range.min {
            return Err(format!("no usable split point for range {range_id}"));
        }

        let left_id = state.next_range_id.to_string();
        let right_id = (state.next_range_id + 1).to_string();
        state.next_range_id += 2;

        state.topology.remove(position);
        state.topology.push(PartitionKeyRange::new(
            left_id,
            parent.range.min.clone(),
            midpoint.clone(),
        ));
        state.topology.push(PartitionKeyRange::new(
            right_id,
            midpoint,
            parent.range.max.clone(),
        ));
        state.split_parents.insert(parent.id);
        Ok(())
    }

    /// Inject `count` throttling failures onto upcoming fetches.
    pub fn inject_throttles(&self, count: usize) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state
                .injected
                .push_back(DataSourceError::Throttled { retry_after: None });
        }
    }

    /// Inject an arbitrary failure onto the next fetch.
    pub fn fail_next_fetch(&self, error: DataSourceError) {
        self.state.lock().injected.push_back(error);
    }

    fn take_injected(&self) -> Option<DataSourceError> {
        self.state.lock().injected.pop_front()
    }

    /// Split signal for vanished ranges, resource-gone for ids that never
    /// existed.
    fn missing_range_error(state: &CollectionState, range_id: &str) -> DataSourceError {
        if state.split_parents.contains(range_id) {
            DataSourceError::Split {
                range_id: range_id.to_string(),
            }
        } else {
            DataSourceError::ResourceGone(format!("partition {range_id}"))
        }
    }
}

impl Default for InMemoryCollection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for InMemoryCollection {
    async fn fetch_page(
        &self,
        query: &QuerySpec,
        range: &PartitionKeyRange,
        state: Option<&QueryState>,
        page_size: usize,
        _cancel: &CancellationToken,
    ) -> Result<FeedPage, DataSourceError> {
        if let Some(err) = self.take_injected() {
            return Err(err);
        }

        let guard = self.state.lock();
        if !guard.topology.iter().any(|r| r.id == range.id) {
            return Err(Self::missing_range_error(&guard, &range.id));
        }

        let mut in_range: Vec<DocRecord> = guard
            .documents
            .iter()
            .filter(|d| range.range.contains_point(&d.key))
            .cloned()
            .collect();
        drop(guard);

        if query.is_ordered() {
            in_range.sort_by(|a, b| {
                compare_documents(&a.document, &b.document, &query.order_by)
                    .then_with(|| a.rid.cmp(&b.rid))
            });

            let cursor: Option<OrderCursor> = match state {
                Some(s) => Some(
                    serde_json::from_str(s.value())
                        .map_err(|e| DataSourceError::Service(format!("bad cursor: {e}")))?,
                ),
                None => None,
            };
            let remaining: Vec<DocRecord> = match cursor {
                None => in_range,
                Some(cursor) => in_range
                    .into_iter()
                    .filter(|d| cmp_to_cursor(d, &cursor, &query.order_by) == Ordering::Greater)
                    .collect(),
            };

            let page: Vec<DocRecord> = remaining.iter().take(page_size).cloned().collect();
            let state = if remaining.len() > page.len() {
                let last = page.last().expect("non-empty page when more remain");
                let cursor = OrderCursor {
                    keys: query
                        .order_by
                        .iter()
                        .map(|s| sort_value(&last.document, &s.path).clone())
                        .collect(),
                    rid: last.rid,
                };
                Some(QueryState::new(
                    serde_json::to_string(&cursor).expect("cursor serializes"),
                ))
            } else {
                None
            };
            Ok(FeedPage::new(
                page.into_iter().map(|d| d.document).collect(),
                state,
            ))
        } else {
            in_range.sort_by_key(|d| d.rid);
            let cursor: u64 = match state {
                Some(s) => s
                    .value()
                    .parse()
                    .map_err(|e| DataSourceError::Service(format!("bad cursor: {e}")))?,
                None => 0,
            };
            let remaining: Vec<DocRecord> =
                in_range.into_iter().filter(|d| d.rid > cursor).collect();
            let page: Vec<DocRecord> = remaining.iter().take(page_size).cloned().collect();
            let state = if remaining.len() > page.len() {
                page.last().map(|d| QueryState::new(d.rid.to_string()))
            } else {
                None
            };
            Ok(FeedPage::new(
                page.into_iter().map(|d| d.document).collect(),
                state,
            ))
        }
    }

    async fn read_change_feed(
        &self,
        partition_id: &str,
        continuation: Option<&str>,
        page_size: usize,
        _cancel: &CancellationToken,
    ) -> Result<FeedPage, DataSourceError> {
        if let Some(err) = self.take_injected() {
            return Err(err);
        }

        let guard = self.state.lock();
        let Some(partition) = guard.topology.iter().find(|r| r.id == partition_id) else {
            return Err(Self::missing_range_error(&guard, partition_id));
        };

        let cursor: u64 = match continuation {
            Some(c) => c
                .parse()
                .map_err(|e| DataSourceError::Service(format!("bad continuation: {e}")))?,
            None => 0,
        };

        let mut changes: Vec<DocRecord> = guard
            .documents
            .iter()
            .filter(|d| partition.range.contains_point(&d.key) && d.rid > cursor)
            .cloned()
            .collect();
        drop(guard);
        changes.sort_by_key(|d| d.rid);
        changes.truncate(page_size);

        let next_cursor = changes.last().map(|d| d.rid).unwrap_or(cursor);
        Ok(FeedPage::new(
            changes.into_iter().map(|d| d.document).collect(),
            Some(QueryState::new(next_cursor.to_string())),
        ))
    }

    async fn partition_ranges(&self) -> Result<Vec<PartitionKeyRange>, DataSourceError> {
        Ok(self.ranges())
    }

    async fn overlapping_ranges(
        &self,
        range: &KeyRange,
        _force_refresh: bool,
    ) -> Result<Vec<PartitionKeyRange>, DataSourceError> {
        let mut overlapping: Vec<PartitionKeyRange> = self
            .state
            .lock()
            .topology
            .iter()
            .filter(|r| r.range.overlaps(range))
            .cloned()
            .collect();
        crate::routing::sort_by_min(&mut overlapping);
        Ok(overlapping)
    }
}

struct LeaseBacking {
    leases: Mutex<HashMap<String, Lease>>,
    acquires: Mutex<HashMap<String, usize>>,
    deletes: Mutex<HashMap<String, usize>>,
    property_updates: Mutex<HashMap<String, usize>>,
    next_etag: AtomicU64,
}

impl LeaseBacking {
    fn etag(&self) -> Option<String> {
        Some(self.next_etag.fetch_add(1, AtomicOrdering::SeqCst).to_string())
    }
}

/// An in-memory lease store. Each instance acts as one host identity;
/// [`InMemoryLeaseStore::for_host`] derives another host over the same
/// shared backing so tests can race two hosts.
pub struct InMemoryLeaseStore {
    host: String,
    backing: Arc<LeaseBacking>,
}

impl InMemoryLeaseStore {
    /// Fresh store for one host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            backing: Arc::new(LeaseBacking {
                leases: Mutex::new(HashMap::new()),
                acquires: Mutex::new(HashMap::new()),
                deletes: Mutex::new(HashMap::new()),
                property_updates: Mutex::new(HashMap::new()),
                next_etag: AtomicU64::new(1),
            }),
        }
    }

    /// Another host's view of the same backing.
    pub fn for_host(&self, host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            backing: Arc::clone(&self.backing),
        }
    }

    /// Insert a lease record directly, bypassing acquire.
    pub fn seed(&self, lease: Lease) {
        let etag = self.backing.etag();
        self.backing
            .leases
            .lock()
            .insert(lease.lease_token().to_string(), lease.with_etag(etag));
    }

    /// Overwrite a lease's owner directly (simulates another host taking
    /// over behind this host's back).
    pub fn force_owner(&self, token: &str, owner: Option<&str>) {
        let mut leases = self.backing.leases.lock();
        if let Some(existing) = leases.remove(token) {
            let etag = self.backing.etag();
            leases.insert(
                token.to_string(),
                existing.with_owner(owner.map(String::from)).with_etag(etag),
            );
        }
    }

    /// Current stored lease, if any.
    pub fn get(&self, token: &str) -> Option<Lease> {
        self.backing.leases.lock().get(token).cloned()
    }

    /// How many times `acquire` was attempted for a token.
    pub fn acquire_count(&self, token: &str) -> usize {
        self.backing.acquires.lock().get(token).copied().unwrap_or(0)
    }

    /// How many times a token's lease was actually deleted.
    pub fn delete_count(&self, token: &str) -> usize {
        self.backing.deletes.lock().get(token).copied().unwrap_or(0)
    }

    /// How many times `update_properties` ran for a token.
    pub fn update_properties_count(&self, token: &str) -> usize {
        self.backing
            .property_updates
            .lock()
            .get(token)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn acquire(&self, lease: &Lease) -> Result<Lease, LeaseError> {
        let token = lease.lease_token().to_string();
        *self
            .backing
            .acquires
            .lock()
            .entry(token.clone())
            .or_insert(0) += 1;

        let mut leases = self.backing.leases.lock();
        let updated = match leases.get(&token) {
            Some(existing) => {
                if let Some(owner) = existing.owner() {
                    if owner != self.host {
                        return Err(LeaseError::Lost {
                            lease_token: token,
                            owner: Some(owner.to_string()),
                        });
                    }
                }
                existing
                    .clone()
                    .with_owner(Some(self.host.clone()))
                    .with_properties(lease.properties().clone())
                    .with_etag(self.backing.etag())
            }
            None => lease
                .clone()
                .with_owner(Some(self.host.clone()))
                .with_etag(self.backing.etag()),
        };
        leases.insert(token, updated.clone());
        Ok(updated)
    }

    async fn renew(&self, lease: &Lease) -> Result<Lease, LeaseError> {
        let token = lease.lease_token().to_string();
        let mut leases = self.backing.leases.lock();
        let Some(existing) = leases.get(&token) else {
            return Err(LeaseError::NotFound(token));
        };
        if existing.owner() != Some(self.host.as_str()) {
            return Err(LeaseError::Lost {
                lease_token: token,
                owner: existing.owner().map(String::from),
            });
        }
        let renewed = existing.clone().with_etag(self.backing.etag());
        leases.insert(token, renewed.clone());
        Ok(renewed)
    }

    async fn release(&self, lease: &Lease) -> Result<(), LeaseError> {
        let token = lease.lease_token().to_string();
        let mut leases = self.backing.leases.lock();
        let Some(existing) = leases.get(&token) else {
            return Err(LeaseError::NotFound(token));
        };
        let released = existing
            .clone()
            .with_owner(None)
            .with_etag(self.backing.etag());
        leases.insert(token, released);
        Ok(())
    }

    async fn delete(&self, lease: &Lease) -> Result<(), LeaseError> {
        let token = lease.lease_token().to_string();
        if self.backing.leases.lock().remove(&token).is_some() {
            *self.backing.deletes.lock().entry(token).or_insert(0) += 1;
        }
        Ok(())
    }

    async fn update_properties(&self, lease: &Lease) -> Result<Lease, LeaseError> {
        let token = lease.lease_token().to_string();
        *self
            .backing
            .property_updates
            .lock()
            .entry(token.clone())
            .or_insert(0) += 1;

        let mut leases = self.backing.leases.lock();
        let Some(existing) = leases.get(&token) else {
            return Err(LeaseError::NotFound(token));
        };
        if existing.owner() != Some(self.host.as_str()) {
            return Err(LeaseError::Lost {
                lease_token: token,
                owner: existing.owner().map(String::from),
            });
        }
        let updated = existing
            .clone()
            .with_properties(lease.properties().clone())
            .with_etag(self.backing.etag());
        leases.insert(token, updated.clone());
        Ok(updated)
    }

    async fn checkpoint(&self, lease: &Lease, continuation: &str) -> Result<Lease, LeaseError> {
        let token = lease.lease_token().to_string();
        let mut leases = self.backing.leases.lock();
        let Some(existing) = leases.get(&token) else {
            return Err(LeaseError::NotFound(token));
        };
        if existing.owner() != Some(self.host.as_str()) {
            return Err(LeaseError::Lost {
                lease_token: token,
                owner: existing.owner().map(String::from),
            });
        }
        let updated = existing
            .clone()
            .with_continuation(Some(continuation.to_string()))
            .with_etag(self.backing.etag());
        leases.insert(token, updated.clone());
        Ok(updated)
    }

    async fn list(&self) -> Result<Vec<Lease>, LeaseError> {
        Ok(self.backing.leases.lock().values().cloned().collect())
    }
}

/// Observer that records every callback for assertions.
pub struct RecordingObserver {
    opens: Mutex<Vec<String>>,
    batches: Mutex<Vec<(String, Vec<Document>)>>,
    closes: Mutex<Vec<(String, CloseReason)>>,
    fail_process: bool,
}

impl RecordingObserver {
    /// Observer whose callbacks all succeed.
    pub fn new() -> Self {
        Self {
            opens: Mutex::new(Vec::new()),
            batches: Mutex::new(Vec::new()),
            closes: Mutex::new(Vec::new()),
            fail_process: false,
        }
    }

    /// Observer whose `process_changes` always fails.
    pub fn failing() -> Self {
        Self {
            fail_process: true,
            ..Self::new()
        }
    }

    /// Partitions opened so far.
    pub fn opened(&self) -> Vec<String> {
        self.opens.lock().clone()
    }

    /// Total documents delivered across every batch.
    pub fn total_documents(&self) -> usize {
        self.batches.lock().iter().map(|(_, docs)| docs.len()).sum()
    }

    /// Every document delivered, in delivery order.
    pub fn documents(&self) -> Vec<Document> {
        self.batches
            .lock()
            .iter()
            .flat_map(|(_, docs)| docs.clone())
            .collect()
    }

    /// Recorded `(lease_token, reason)` close calls.
    pub fn closes(&self) -> Vec<(String, CloseReason)> {
        self.closes.lock().clone()
    }
}

impl Default for RecordingObserver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeFeedObserver for RecordingObserver {
    async fn open(&self, context: &ObserverContext) -> Result<(), ObserverError> {
        self.opens.lock().push(context.lease_token.clone());
        Ok(())
    }

    async fn process_changes(
        &self,
        context: &ObserverContext,
        changes: Vec<Document>,
        _cancel: &CancellationToken,
    ) -> Result<(), ObserverError> {
        if self.fail_process {
            return Err(ObserverError::msg("observer failure"));
        }
        self.batches
            .lock()
            .push((context.lease_token.clone(), changes));
        Ok(())
    }

    async fn close(&self, context: &ObserverContext, reason: CloseReason) {
        self.closes
            .lock()
            .push((context.lease_token.clone(), reason));
    }
}

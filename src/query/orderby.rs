//! Order-preserving cross-partition merge.
//!
//! Every participating range yields documents already sorted by the query's
//! ORDER BY columns; this module merges those streams into one totally
//! ordered sequence. The merge is blocking, not best-effort: a slow range
//! holds the merge at its position rather than being skipped, and ties on
//! the sort keys break deterministically by range id.

use crate::config::QueryOptions;
use crate::datasource::DataSource;
use crate::error::Error;
use crate::query::buffered::BufferedRangeEnumerator;
use crate::query::enumerator::{FeedRangeEnumerator, RangePageSource};
use crate::query::mapper::resolve_partition_mapping;
use crate::query::token::PartitionedToken;
use crate::routing::PartitionKeyRange;
use crate::types::{Document, QuerySpec, QueryState, SortDirection, SortSpec};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Total order over JSON sort values: missing/null, then booleans, then
/// numbers, then strings; composite values compare by their serialization.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ if rank(a) != rank(b) => rank(a).cmp(&rank(b)),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Extract one sort value from a document by dot-separated path.
pub(crate) fn sort_value<'a>(document: &'a Document, path: &str) -> &'a Value {
    let mut current = document;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return &Value::Null,
        }
    }
    current
}

/// Compare two documents under the query's ORDER BY columns.
pub(crate) fn compare_documents(a: &Document, b: &Document, order_by: &[SortSpec]) -> Ordering {
    for spec in order_by {
        let ordering = compare_values(sort_value(a, &spec.path), sort_value(b, &spec.path));
        let ordering = match spec.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// One range's stream with its buffered head documents.
struct MergeSlot {
    cursor: BufferedRangeEnumerator,
    /// Documents of the current page not yet emitted. The slot only joins
    /// comparisons while this is non-empty.
    page: VecDeque<Document>,
}

impl MergeSlot {
    fn head(&self) -> Option<&Document> {
        self.page.front()
    }
}

/// Cross-partition enumerator for ORDER BY queries: a k-way merge over
/// per-range cursors, transparent to splits.
pub struct OrderByEnumerator {
    source: Arc<dyn DataSource>,
    query: QuerySpec,
    options: QueryOptions,
    slots: Vec<MergeSlot>,
    faulted: bool,
}

impl OrderByEnumerator {
    /// Start a fresh merge over every current range.
    pub async fn start(
        source: Arc<dyn DataSource>,
        query: QuerySpec,
        options: QueryOptions,
    ) -> Result<Self, Error> {
        if !query.is_ordered() {
            return Err(Error::Config(
                "order-by enumerator requires ORDER BY columns".into(),
            ));
        }
        let ranges = source.partition_ranges().await?;
        let slots = ranges
            .into_iter()
            .map(|range| Self::slot(&source, &query, &options, range, None))
            .collect();
        Ok(Self {
            source,
            query,
            options,
            slots,
            faulted: false,
        })
    }

    /// Resume a merge from a serialized token set. Ranges left of the resume
    /// point were drained by the earlier session and do not participate.
    pub async fn resume(
        source: Arc<dyn DataSource>,
        query: QuerySpec,
        options: QueryOptions,
        continuation: &str,
    ) -> Result<Self, Error> {
        if !query.is_ordered() {
            return Err(Error::Config(
                "order-by enumerator requires ORDER BY columns".into(),
            ));
        }
        let tokens = PartitionedToken::deserialize_all(continuation)?;
        let ranges = source.partition_ranges().await?;
        let mapping = resolve_partition_mapping(&ranges, &tokens)?;

        let mut slots = Vec::new();
        let (target_range, target_token) = mapping.target;
        slots.push(Self::slot(
            &source,
            &query,
            &options,
            target_range,
            target_token.and_then(|t| t.token).map(QueryState::new),
        ));
        for (range, token) in mapping.right {
            slots.push(Self::slot(
                &source,
                &query,
                &options,
                range,
                token.and_then(|t| t.token).map(QueryState::new),
            ));
        }

        Ok(Self {
            source,
            query,
            options,
            slots,
            faulted: false,
        })
    }

    fn slot(
        source: &Arc<dyn DataSource>,
        query: &QuerySpec,
        options: &QueryOptions,
        range: PartitionKeyRange,
        state: Option<QueryState>,
    ) -> MergeSlot {
        MergeSlot {
            cursor: BufferedRangeEnumerator::new(Box::new(FeedRangeEnumerator::new(
                source.clone(),
                query.clone(),
                range,
                options.page_size,
                state,
            ))),
            page: VecDeque::new(),
        }
    }

    /// Emit the next document in merged order.
    ///
    /// `None` means the merge is complete. Non-split failures abort the
    /// enumeration (fail-fast); splits are re-routed internally and never
    /// surface to the caller.
    pub async fn next_document(
        &mut self,
        cancel: &CancellationToken,
    ) -> Option<Result<Document, Error>> {
        if self.faulted {
            return None;
        }

        if let Err(err) = self.fill_slots(cancel).await {
            self.faulted = true;
            return Some(Err(err));
        }
        if cancel.is_cancelled() {
            return None;
        }

        let winner = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.head().is_some())
            .min_by(|(_, a), (_, b)| {
                compare_documents(
                    a.head().expect("filtered to non-empty"),
                    b.head().expect("filtered to non-empty"),
                    &self.query.order_by,
                )
                .then_with(|| a.cursor.range().id.cmp(&b.cursor.range().id))
            })
            .map(|(idx, _)| idx)?;

        let slot = &mut self.slots[winner];
        let document = slot.page.pop_front().expect("winner has a head document");

        // Start the next page early so the exhausted slot is ready by the
        // time it must compete again.
        if self.options.buffered
            && slot.page.is_empty()
            && slot.cursor.has_more()
            && !slot.cursor.is_prefetching()
        {
            slot.cursor.prefetch(cancel);
        }

        Some(Ok(document))
    }

    /// Drain every remaining document in merged order.
    pub async fn drain(&mut self, cancel: &CancellationToken) -> Result<Vec<Document>, Error> {
        let mut documents = Vec::new();
        while let Some(result) = self.next_document(cancel).await {
            documents.push(result?);
        }
        Ok(documents)
    }

    /// Refill every empty slot that still has pages, replacing split ranges
    /// with their children; drop slots that are fully drained.
    async fn fill_slots(&mut self, cancel: &CancellationToken) -> Result<(), Error> {
        let mut idx = 0;
        while idx < self.slots.len() {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let slot = &mut self.slots[idx];
            if slot.head().is_some() {
                idx += 1;
                continue;
            }
            if !slot.cursor.has_more() {
                self.slots.remove(idx);
                continue;
            }

            match slot.cursor.next_page(cancel).await {
                None => {
                    if slot.cursor.has_more() {
                        // Cancelled mid-fetch.
                        return Ok(());
                    }
                }
                Some(Ok(page)) => {
                    slot.page.extend(page.documents);
                    if slot.page.is_empty() && !slot.cursor.has_more() {
                        self.slots.remove(idx);
                        continue;
                    }
                    // An empty page with more to come is re-polled on the
                    // same slot; no index advance either way until the slot
                    // has a head document.
                }
                Some(Err(err)) if err.is_split() => {
                    self.substitute_children(idx).await?;
                    // Children land at `idx`; refill them on this pass.
                }
                Some(Err(err)) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Replace the split slot with one slot per child range, each resuming
    /// from the parent's last state.
    async fn substitute_children(&mut self, idx: usize) -> Result<(), Error> {
        let slot = self.slots.remove(idx);
        debug_assert!(slot.page.is_empty(), "split surfaces only on page fetch");
        let parent_range = slot.cursor.range().clone();
        let parent_state = slot.cursor.state().cloned();

        let children = self
            .source
            .overlapping_ranges(&parent_range.range, true)
            .await?;
        let mut children: Vec<PartitionKeyRange> = children
            .into_iter()
            .filter(|r| r.id != parent_range.id)
            .collect();
        if children.is_empty() {
            return Err(Error::Internal(format!(
                "no child ranges for split partition {}",
                parent_range.id
            )));
        }
        crate::routing::sort_by_min(&mut children);

        debug!(
            parent = %parent_range.id,
            children = children.len(),
            "replacing split range in merge"
        );

        for (offset, child) in children.into_iter().enumerate() {
            self.slots.insert(
                idx + offset,
                Self::slot(
                    &self.source,
                    &self.query,
                    &self.options,
                    child,
                    parent_state.clone(),
                ),
            );
        }
        Ok(())
    }
}

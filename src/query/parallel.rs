//! Unordered cross-partition enumeration.
//!
//! Ranges are drained strictly in key-space order: the lexicographically
//! first incomplete range produces every page until it is exhausted or
//! split. Output order therefore equals range order, and the continuation
//! snapshot only ever needs to describe the in-flight range plus the
//! untouched ranges to its right.

use crate::config::QueryOptions;
use crate::datasource::DataSource;
use crate::error::Error;
use crate::query::buffered::BufferedRangeEnumerator;
use crate::query::enumerator::{FeedRangeEnumerator, RangePageSource};
use crate::query::mapper::resolve_partition_mapping;
use crate::query::token::PartitionedToken;
use crate::routing::PartitionKeyRange;
use crate::types::{Document, QuerySpec, QueryState};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// One page of a cross-partition enumeration.
#[derive(Debug, Clone)]
pub struct CrossPartitionPage {
    /// Documents from a single underlying range, in range order.
    pub documents: Vec<Document>,

    /// Request charge of the underlying round trip.
    pub request_charge: f64,

    /// Correlation id of the underlying round trip.
    pub activity_id: Uuid,

    /// Serialized token set resuming the enumeration after this page, or
    /// `None` once every range is drained.
    pub continuation: Option<String>,
}

/// Cross-partition enumerator for unordered (parallel) queries.
pub struct CrossPartitionEnumerator {
    source: Arc<dyn DataSource>,
    query: QuerySpec,
    options: QueryOptions,
    queue: VecDeque<Box<dyn RangePageSource>>,
}

impl CrossPartitionEnumerator {
    /// Start a fresh enumeration over every current range.
    pub async fn start(
        source: Arc<dyn DataSource>,
        query: QuerySpec,
        options: QueryOptions,
    ) -> Result<Self, Error> {
        let mut ranges = source.partition_ranges().await?;
        crate::routing::sort_by_min(&mut ranges);

        let queue = ranges
            .into_iter()
            .map(|range| Self::make_source(&source, &query, &options, range, None))
            .collect();

        Ok(Self {
            source,
            query,
            options,
            queue,
        })
    }

    /// Resume an enumeration from a serialized token set, re-anchoring the
    /// tokens onto the current topology. Ranges left of the resume point
    /// were drained by the earlier session and are not re-read.
    pub async fn resume(
        source: Arc<dyn DataSource>,
        query: QuerySpec,
        options: QueryOptions,
        continuation: &str,
    ) -> Result<Self, Error> {
        let tokens = PartitionedToken::deserialize_all(continuation)?;
        let ranges = source.partition_ranges().await?;
        let mapping = resolve_partition_mapping(&ranges, &tokens)?;

        let mut queue: VecDeque<Box<dyn RangePageSource>> = VecDeque::new();
        let (target_range, target_token) = mapping.target;
        queue.push_back(Self::make_source(
            &source,
            &query,
            &options,
            target_range,
            target_token.and_then(|t| t.token).map(QueryState::new),
        ));
        for (range, token) in mapping.right {
            queue.push_back(Self::make_source(
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
            queue,
        })
    }

    fn make_source(
        source: &Arc<dyn DataSource>,
        query: &QuerySpec,
        options: &QueryOptions,
        range: PartitionKeyRange,
        state: Option<QueryState>,
    ) -> Box<dyn RangePageSource> {
        let cursor = FeedRangeEnumerator::new(
            source.clone(),
            query.clone(),
            range,
            options.page_size,
            state,
        );
        if options.buffered {
            Box::new(BufferedRangeEnumerator::new(Box::new(cursor)))
        } else {
            Box::new(cursor)
        }
    }

    /// Serialized resume tokens for the current position, or `None` when
    /// every range is drained.
    pub fn continuation(&self) -> Option<String> {
        if self.queue.is_empty() {
            return None;
        }
        let tokens: Vec<PartitionedToken> = self
            .queue
            .iter()
            .map(|cursor| {
                PartitionedToken::new(
                    cursor.range().range.clone(),
                    cursor.state().map(|s| s.value().to_string()),
                )
            })
            .collect();
        Some(PartitionedToken::serialize_all(&tokens))
    }

    /// Fetch the next page from the first incomplete range.
    ///
    /// `None` means the enumeration is complete (or the call was cancelled
    /// with the position intact). A retryable error (throttle, timeout)
    /// leaves the position untouched so the call can simply be repeated;
    /// splits are handled internally and never surface.
    pub async fn next_page(
        &mut self,
        cancel: &CancellationToken,
    ) -> Option<Result<CrossPartitionPage, Error>> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            let front = self.queue.front_mut()?;
            match front.next_page(cancel).await {
                None => {
                    if front.has_more() {
                        // Cancelled mid-call; position intact.
                        return None;
                    }
                    self.queue.pop_front();
                }
                Some(Ok(page)) => {
                    if front.has_more() {
                        front.prefetch(cancel);
                    } else {
                        self.queue.pop_front();
                    }
                    return Some(Ok(CrossPartitionPage {
                        documents: page.documents,
                        request_charge: page.request_charge,
                        activity_id: page.activity_id,
                        continuation: self.continuation(),
                    }));
                }
                Some(Err(err)) if err.is_split() => {
                    if let Err(fatal) = self.replace_front_with_children().await {
                        return Some(Err(fatal));
                    }
                }
                Some(Err(err)) => return Some(Err(err.into())),
            }
        }
    }

    /// Swap the split front range for its children, each seeded with the
    /// parent's last state so no document is lost or repeated.
    async fn replace_front_with_children(&mut self) -> Result<(), Error> {
        let parent = self.queue.pop_front().expect("split came from the front");
        let parent_state = parent.state().cloned();
        let parent_range = parent.range().clone();

        let children = self
            .source
            .overlapping_ranges(&parent_range.range, true)
            .await?;
        let mut children: Vec<PartitionKeyRange> = children
            .into_iter()
            .filter(|r| r.id != parent_range.id)
            .collect();
        if children.is_empty() {
            warn!(range_id = %parent_range.id, "split signalled but no child ranges found");
            return Err(Error::Internal(format!(
                "no child ranges for split partition {}",
                parent_range.id
            )));
        }
        crate::routing::sort_by_min(&mut children);

        debug!(
            parent = %parent_range.id,
            children = children.len(),
            "replacing split range with children"
        );

        for child in children.into_iter().rev() {
            self.queue.push_front(Self::make_source(
                &self.source,
                &self.query,
                &self.options,
                child,
                parent_state.clone(),
            ));
        }
        Ok(())
    }
}

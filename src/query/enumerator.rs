//! Per-partition-range page cursors.

use crate::datasource::DataSource;
use crate::error::DataSourceError;
use crate::routing::PartitionKeyRange;
use crate::types::{FeedPage, QuerySpec, QueryState};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result of one page fetch.
pub type PageResult = Result<FeedPage, DataSourceError>;

/// An async cursor over one partition-key range's pages.
///
/// `next_page` advances exactly one page and is not safe to call
/// concurrently with itself. `None` means no page was produced: either the
/// range is drained (`has_more` is false) or the call was cancelled before
/// the fetch started (state untouched, resumable). After a non-retryable
/// failure the cursor is terminal and must not be advanced again without
/// caller-level recovery; retryable failures (throttle, timeout) leave the
/// resumption state untouched so the same call can simply be retried.
#[async_trait]
pub trait RangePageSource: Send {
    /// The range this cursor reads.
    fn range(&self) -> &PartitionKeyRange;

    /// Resumption state for the next page, `None` before the first page of
    /// a fresh range or after the last.
    fn state(&self) -> Option<&QueryState>;

    /// Whether another page may be produced.
    fn has_more(&self) -> bool;

    /// Fetch the next page.
    async fn next_page(&mut self, cancel: &CancellationToken) -> Option<PageResult>;

    /// Hint that the next page will be wanted soon. Buffering decorators
    /// start a speculative fetch; plain cursors ignore it.
    fn prefetch(&mut self, _cancel: &CancellationToken) {}
}

/// Direct, unbuffered cursor backed by the data source.
pub struct FeedRangeEnumerator {
    source: Arc<dyn DataSource>,
    query: QuerySpec,
    range: PartitionKeyRange,
    page_size: usize,
    state: Option<QueryState>,
    started: bool,
    drained: bool,
    faulted: bool,
}

impl FeedRangeEnumerator {
    /// Cursor over `range`, optionally resuming from a prior state. A state
    /// captured against a parent range is valid here: the data source
    /// re-filters by the requested range.
    pub fn new(
        source: Arc<dyn DataSource>,
        query: QuerySpec,
        range: PartitionKeyRange,
        page_size: usize,
        state: Option<QueryState>,
    ) -> Self {
        Self {
            source,
            query,
            range,
            page_size,
            state,
            started: false,
            drained: false,
            faulted: false,
        }
    }

    /// Whether the first page has been fetched.
    pub fn started(&self) -> bool {
        self.started
    }
}

#[async_trait]
impl RangePageSource for FeedRangeEnumerator {
    fn range(&self) -> &PartitionKeyRange {
        &self.range
    }

    fn state(&self) -> Option<&QueryState> {
        self.state.as_ref()
    }

    fn has_more(&self) -> bool {
        !self.drained && !self.faulted
    }

    async fn next_page(&mut self, cancel: &CancellationToken) -> Option<PageResult> {
        if !self.has_more() || cancel.is_cancelled() {
            return None;
        }

        let result = self
            .source
            .fetch_page(
                &self.query,
                &self.range,
                self.state.as_ref(),
                self.page_size,
                cancel,
            )
            .await;

        match result {
            Ok(page) => {
                self.started = true;
                self.state = page.state.clone();
                self.drained = self.state.is_none();
                Some(Ok(page))
            }
            Err(err) => {
                if !err.is_retryable() {
                    self.faulted = true;
                }
                Some(Err(err))
            }
        }
    }
}

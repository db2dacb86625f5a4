//! Single-page read-ahead for range cursors.

use crate::error::DataSourceError;
use crate::query::enumerator::{PageResult, RangePageSource};
use crate::routing::PartitionKeyRange;
use crate::types::QueryState;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type InnerSource = Box<dyn RangePageSource + 'static>;

/// Decorator that speculatively fetches the next page while the caller
/// consumes the current one. Read-ahead is bounded to exactly one page; a
/// prefetch that fails holds its error until the result is consumed, at
/// which point it surfaces like any other fetch failure.
pub struct BufferedRangeEnumerator {
    /// The wrapped cursor; absent while a prefetch task owns it.
    inner: Option<InnerSource>,

    /// Outstanding prefetch, if any. The task keeps its result until the
    /// next `next_page` call consumes it.
    inflight: Option<JoinHandle<(InnerSource, Option<PageResult>)>>,

    // Mirrors of the inner cursor, valid while it is checked out.
    range: PartitionKeyRange,
    state: Option<QueryState>,
    inner_has_more: bool,
}

impl BufferedRangeEnumerator {
    /// Wrap a cursor.
    pub fn new(inner: InnerSource) -> Self {
        let range = inner.range().clone();
        let state = inner.state().cloned();
        let inner_has_more = inner.has_more();
        Self {
            inner: Some(inner),
            inflight: None,
            range,
            state,
            inner_has_more,
        }
    }

    /// Start fetching the next page in the background. No-op when the
    /// cursor is exhausted. Requesting a second prefetch while one is
    /// outstanding is a caller error.
    pub fn prefetch(&mut self, cancel: &CancellationToken) {
        debug_assert!(self.inflight.is_none(), "prefetch already outstanding");
        if self.inflight.is_some() || !self.inner_has_more {
            return;
        }
        let Some(mut inner) = self.inner.take() else {
            return;
        };
        let cancel = cancel.clone();
        self.inflight = Some(tokio::spawn(async move {
            let result = inner.next_page(&cancel).await;
            (inner, result)
        }));
    }

    /// Whether a prefetched result is in flight or awaiting consumption.
    pub fn is_prefetching(&self) -> bool {
        self.inflight.is_some()
    }

    fn sync_mirrors(&mut self) {
        if let Some(inner) = self.inner.as_ref() {
            self.state = inner.state().cloned();
            self.inner_has_more = inner.has_more();
        }
    }
}

#[async_trait]
impl RangePageSource for BufferedRangeEnumerator {
    fn range(&self) -> &PartitionKeyRange {
        &self.range
    }

    fn state(&self) -> Option<&QueryState> {
        self.state.as_ref()
    }

    fn has_more(&self) -> bool {
        self.inflight.is_some() || self.inner_has_more
    }

    async fn next_page(&mut self, cancel: &CancellationToken) -> Option<PageResult> {
        if let Some(task) = self.inflight.take() {
            match task.await {
                Ok((inner, result)) => {
                    self.inner = Some(inner);
                    self.sync_mirrors();
                    return result;
                }
                Err(join_err) => {
                    self.inner_has_more = false;
                    return Some(Err(DataSourceError::Service(format!(
                        "prefetch task failed: {join_err}"
                    ))));
                }
            }
        }

        let result = self.inner.as_mut()?.next_page(cancel).await;
        self.sync_mirrors();
        result
    }

    fn prefetch(&mut self, cancel: &CancellationToken) {
        BufferedRangeEnumerator::prefetch(self, cancel);
    }
}

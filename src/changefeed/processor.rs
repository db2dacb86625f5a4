//! Per-partition change-feed pulling.

use crate::changefeed::lease::Lease;
use crate::changefeed::observer::{ChangeFeedObserver, ObserverContext};
use crate::changefeed::store::LeaseStore;
use crate::config::ProcessorOptions;
use crate::datasource::DataSource;
use crate::error::{DataSourceError, FeedError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The feed-pulling half of a partition supervisor.
#[async_trait]
pub trait FeedProcessor: Send + Sync {
    /// Pull pages and dispatch them to the observer until cancelled or a
    /// terminal condition occurs. Cancellation returns `Ok(())`.
    async fn run(&self, cancel: CancellationToken) -> Result<(), FeedError>;
}

/// Default processor: polls the change feed for one partition, invokes the
/// observer per batch, and checkpoints the continuation through the lease
/// store after every successfully observed batch.
pub struct PartitionProcessor {
    source: Arc<dyn DataSource>,
    store: Arc<dyn LeaseStore>,
    observer: Arc<dyn ChangeFeedObserver>,
    /// Shared with the renewer; the processor owns the continuation, the
    /// renewer owns the etag.
    lease: Arc<Mutex<Lease>>,
    options: ProcessorOptions,
}

impl PartitionProcessor {
    /// Processor for one owned lease.
    pub fn new(
        source: Arc<dyn DataSource>,
        store: Arc<dyn LeaseStore>,
        observer: Arc<dyn ChangeFeedObserver>,
        lease: Arc<Mutex<Lease>>,
        options: ProcessorOptions,
    ) -> Self {
        Self {
            source,
            store,
            observer,
            lease,
            options,
        }
    }

    async fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[async_trait]
impl FeedProcessor for PartitionProcessor {
    async fn run(&self, cancel: CancellationToken) -> Result<(), FeedError> {
        let lease_token = self.lease.lock().lease_token().to_string();
        let context = ObserverContext::new(&lease_token);

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let continuation = self
                .lease
                .lock()
                .continuation()
                .map(str::to_string);

            let page = self
                .source
                .read_change_feed(
                    &lease_token,
                    continuation.as_deref(),
                    self.options.page_size,
                    &cancel,
                )
                .await;

            let page = match page {
                Ok(page) => page,
                Err(DataSourceError::Throttled { retry_after }) => {
                    let delay = retry_after.unwrap_or(self.options.throttle_backoff);
                    debug!(lease_token = %lease_token, ?delay, "feed read throttled");
                    if !Self::sleep_unless_cancelled(delay, &cancel).await {
                        return Ok(());
                    }
                    continue;
                }
                Err(DataSourceError::Timeout) => {
                    warn!(lease_token = %lease_token, "feed read timed out, retrying");
                    continue;
                }
                Err(DataSourceError::Split { .. }) => {
                    // The controller seeds the children from the freshest
                    // continuation we had, not the stored checkpoint.
                    return Err(FeedError::Split {
                        lease_token,
                        last_continuation: continuation,
                    });
                }
                Err(DataSourceError::ResourceGone(resource)) => {
                    return Err(FeedError::ResourceGone(resource));
                }
                Err(DataSourceError::ReadSessionNotAvailable(detail)) => {
                    return Err(FeedError::ReadSessionNotAvailable(detail));
                }
                Err(DataSourceError::Service(detail)) => {
                    return Err(FeedError::Other(detail));
                }
            };

            if !page.documents.is_empty() {
                self.observer
                    .process_changes(&context, page.documents.clone(), &cancel)
                    .await
                    .map_err(FeedError::Observer)?;

                if let Some(state) = page.state.as_ref() {
                    let snapshot = self.lease.lock().clone();
                    let updated = self.store.checkpoint(&snapshot, state.value()).await?;
                    *self.lease.lock() = updated;
                }
            }

            if page.documents.is_empty()
                && !Self::sleep_unless_cancelled(self.options.poll_interval, &cancel).await
            {
                return Ok(());
            }
        }
    }
}

//! Per-partition supervision: one renewal task, one processing task.

use crate::changefeed::lease::Lease;
use crate::changefeed::observer::{ChangeFeedObserver, CloseReason, ObserverContext};
use crate::changefeed::processor::{FeedProcessor, PartitionProcessor};
use crate::changefeed::renewer::{IntervalLeaseRenewer, LeaseRenewer};
use crate::changefeed::store::LeaseStore;
use crate::config::ProcessorOptions;
use crate::datasource::DataSource;
use crate::error::{FeedError, LeaseError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A running guardian for one owned partition.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Run until cancelled or one of the partition's tasks terminates.
    /// Cancellation returns `Ok(())`; organic failures propagate after the
    /// observer is closed with the classified reason.
    async fn run(&self, cancel: CancellationToken) -> Result<(), FeedError>;
}

/// Produces a supervisor per acquired lease, so the controller never needs
/// to know how supervisors are wired.
pub trait SupervisorFactory: Send + Sync {
    /// Build the supervisor for one lease.
    fn create(&self, lease: &Lease) -> Arc<dyn Supervisor>;
}

/// Default supervisor: races lease renewal against feed processing.
/// Whichever ends first cancels the other; both are awaited, the
/// terminating condition is classified, and the observer is closed with
/// that reason before the error propagates.
pub struct PartitionSupervisor {
    lease_token: String,
    observer: Arc<dyn ChangeFeedObserver>,
    processor: Arc<dyn FeedProcessor>,
    renewer: Arc<dyn LeaseRenewer>,
}

impl PartitionSupervisor {
    /// Supervisor over explicit task implementations.
    pub fn new(
        lease_token: impl Into<String>,
        observer: Arc<dyn ChangeFeedObserver>,
        processor: Arc<dyn FeedProcessor>,
        renewer: Arc<dyn LeaseRenewer>,
    ) -> Self {
        Self {
            lease_token: lease_token.into(),
            observer,
            processor,
            renewer,
        }
    }

    fn classify(outcome: &Result<(), FeedError>) -> CloseReason {
        match outcome {
            Ok(()) => CloseReason::Shutdown,
            Err(FeedError::Split { .. }) => CloseReason::Split,
            Err(FeedError::ResourceGone(_)) => CloseReason::ResourceGone,
            Err(FeedError::ReadSessionNotAvailable(_)) => CloseReason::ReadSessionNotAvailable,
            Err(FeedError::Observer(_)) => CloseReason::ObserverError,
            Err(FeedError::Lease(err)) if err.is_lost() => CloseReason::LeaseLost,
            Err(_) => CloseReason::Unknown,
        }
    }
}

#[async_trait]
impl Supervisor for PartitionSupervisor {
    async fn run(&self, cancel: CancellationToken) -> Result<(), FeedError> {
        let context = ObserverContext::new(&self.lease_token);
        self.observer
            .open(&context)
            .await
            .map_err(FeedError::Observer)?;

        let siblings = cancel.child_token();

        let renewer = Arc::clone(&self.renewer);
        let renew_cancel = siblings.clone();
        let mut renew_task =
            tokio::spawn(async move { renewer.run(renew_cancel).await });

        let processor = Arc::clone(&self.processor);
        let process_cancel = siblings.clone();
        let mut process_task =
            tokio::spawn(async move { processor.run(process_cancel).await });

        // Race the tasks; the first to finish cancels its sibling, then
        // both are awaited before anything is classified.
        let (renew_result, process_result) = tokio::select! {
            renew = &mut renew_task => {
                siblings.cancel();
                let process = (&mut process_task).await;
                (renew, process)
            }
            process = &mut process_task => {
                siblings.cancel();
                let renew = (&mut renew_task).await;
                (renew, process)
            }
        };

        let renew_result: Result<(), LeaseError> = match renew_result {
            Ok(result) => result,
            Err(join_err) => Err(LeaseError::Store(format!("renewal task failed: {join_err}"))),
        };
        let process_result: Result<(), FeedError> = match process_result {
            Ok(result) => result,
            Err(join_err) => Err(FeedError::Other(format!("processing task failed: {join_err}"))),
        };

        // A renewal failure outranks the processor's reaction to being
        // cancelled out from under it; otherwise the processor's own
        // failure is the story.
        let outcome: Result<(), FeedError> = match (renew_result, process_result) {
            (Err(renew_err), _) => Err(FeedError::Lease(renew_err)),
            (Ok(()), Err(process_err)) => Err(process_err),
            (Ok(()), Ok(())) => Ok(()),
        };

        let reason = Self::classify(&outcome);
        debug!(
            lease_token = %self.lease_token,
            %reason,
            "closing partition observer"
        );
        self.observer.close(&context, reason).await;

        if let Err(err) = &outcome {
            warn!(lease_token = %self.lease_token, error = %err, "partition supervision ended");
        }
        outcome
    }
}

/// Default factory wiring [`PartitionProcessor`] and
/// [`IntervalLeaseRenewer`] around a shared lease cell per partition.
pub struct PartitionSupervisorFactory {
    source: Arc<dyn DataSource>,
    store: Arc<dyn LeaseStore>,
    observer: Arc<dyn ChangeFeedObserver>,
    options: ProcessorOptions,
}

impl PartitionSupervisorFactory {
    /// Factory over the production task implementations.
    pub fn new(
        source: Arc<dyn DataSource>,
        store: Arc<dyn LeaseStore>,
        observer: Arc<dyn ChangeFeedObserver>,
        options: ProcessorOptions,
    ) -> Self {
        Self {
            source,
            store,
            observer,
            options,
        }
    }
}

impl SupervisorFactory for PartitionSupervisorFactory {
    fn create(&self, lease: &Lease) -> Arc<dyn Supervisor> {
        let shared = Arc::new(Mutex::new(lease.clone()));
        let processor = Arc::new(PartitionProcessor::new(
            Arc::clone(&self.source),
            Arc::clone(&self.store),
            Arc::clone(&self.observer),
            Arc::clone(&shared),
            self.options.clone(),
        ));
        let renewer = Arc::new(IntervalLeaseRenewer::new(
            Arc::clone(&self.store),
            shared,
            self.options.clone(),
        ));
        Arc::new(PartitionSupervisor::new(
            lease.lease_token(),
            Arc::clone(&self.observer),
            processor,
            renewer,
        ))
    }
}

//! Periodic lease renewal.

use crate::changefeed::lease::Lease;
use crate::changefeed::store::LeaseStore;
use crate::config::ProcessorOptions;
use crate::error::LeaseError;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The heartbeat half of a partition supervisor.
#[async_trait]
pub trait LeaseRenewer: Send + Sync {
    /// Renew until cancelled (`Ok(())`) or the lease is definitively lost.
    async fn run(&self, cancel: CancellationToken) -> Result<(), LeaseError>;
}

/// Default renewer: refreshes the lease etag on an interval with random
/// jitter so a fleet of hosts does not renew in lockstep. Transient store
/// errors are retried at the next tick; only an ownership conflict stops
/// the loop.
pub struct IntervalLeaseRenewer {
    store: Arc<dyn LeaseStore>,
    /// Shared with the processor; renewal only touches the etag, the
    /// checkpoint path owns the continuation.
    lease: Arc<Mutex<Lease>>,
    options: ProcessorOptions,
}

impl IntervalLeaseRenewer {
    /// Renewer for one owned lease.
    pub fn new(
        store: Arc<dyn LeaseStore>,
        lease: Arc<Mutex<Lease>>,
        options: ProcessorOptions,
    ) -> Self {
        Self {
            store,
            lease,
            options,
        }
    }

    fn next_delay(&self) -> Duration {
        let jitter_ms = self.options.renew_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        self.options.renew_interval + jitter
    }
}

#[async_trait]
impl LeaseRenewer for IntervalLeaseRenewer {
    async fn run(&self, cancel: CancellationToken) -> Result<(), LeaseError> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.next_delay()) => {}
            }

            let snapshot = self.lease.lock().clone();
            match self.store.renew(&snapshot).await {
                Ok(renewed) => {
                    debug!(lease_token = %snapshot.lease_token(), "lease renewed");
                    let mut lease = self.lease.lock();
                    *lease = lease.clone().with_etag(renewed.etag().map(String::from));
                }
                Err(err) if err.is_lost() => {
                    warn!(lease_token = %snapshot.lease_token(), "lease lost during renewal");
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        lease_token = %snapshot.lease_token(),
                        error = %err,
                        "lease renewal failed, will retry"
                    );
                }
            }
        }
    }
}

//! Lease/partition controller.
//!
//! Tracks every lease this host owns, runs one supervised task per lease,
//! and reacts to splits by replacing the parent lease with its children.
//! The registry is the only structure touched by concurrent callers
//! (discovery, split recursion, external registration) and every
//! check-then-act on it happens under one mutex, never across an await.

use crate::changefeed::lease::Lease;
use crate::changefeed::store::LeaseStore;
use crate::changefeed::supervisor::SupervisorFactory;
use crate::changefeed::synchronizer::PartitionSynchronizer;
use crate::error::{Error, FeedError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct PartitionHandle {
    cancel: CancellationToken,
    join: Mutex<Option<JoinHandle<()>>>,
}

struct ControllerInner {
    host_name: String,
    store: Arc<dyn LeaseStore>,
    synchronizer: Arc<dyn PartitionSynchronizer>,
    factory: Arc<dyn SupervisorFactory>,
    registry: Mutex<HashMap<String, Arc<PartitionHandle>>>,
    shutdown: CancellationToken,
}

/// Coordinates lease ownership and per-partition supervision for one host.
/// Cheap to clone; clones share the same registry and lifecycle.
#[derive(Clone)]
pub struct PartitionController {
    inner: Arc<ControllerInner>,
}

impl PartitionController {
    /// Controller for one host over the shared collaborators.
    pub fn new(
        host_name: impl Into<String>,
        store: Arc<dyn LeaseStore>,
        synchronizer: Arc<dyn PartitionSynchronizer>,
        factory: Arc<dyn SupervisorFactory>,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                host_name: host_name.into(),
                store,
                synchronizer,
                factory,
                registry: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Register every lease this host already owns and launch supervision
    /// for each.
    pub async fn initialize(&self) -> Result<()> {
        let leases = self.inner.store.list().await.map_err(Error::Lease)?;
        let own: Vec<Lease> = leases
            .into_iter()
            .filter(|l| l.owner() == Some(self.inner.host_name.as_str()))
            .collect();
        info!(
            host = %self.inner.host_name,
            leases = own.len(),
            "initializing partition controller"
        );
        for lease in own {
            if let Err(err) = self.add_or_update_lease(&lease).await {
                warn!(
                    lease_token = %lease.lease_token(),
                    error = %err,
                    "failed to register owned lease at startup"
                );
            }
        }
        Ok(())
    }

    /// Register a lease with this host.
    ///
    /// Untracked tokens are acquired and get a supervisor; tokens already
    /// tracked get an idempotent property refresh and no second supervisor.
    /// An ownership conflict during acquire surfaces as
    /// [`crate::error::LeaseError::Lost`] and is resolved by yielding.
    pub async fn add_or_update_lease(&self, lease: &Lease) -> Result<()> {
        let token = lease.lease_token().to_string();

        // Reserve the slot first so a concurrent call for the same token
        // cannot launch a second supervisor.
        let reserved = {
            let mut registry = self.inner.registry.lock();
            if registry.contains_key(&token) {
                None
            } else {
                let handle = Arc::new(PartitionHandle {
                    cancel: self.inner.shutdown.child_token(),
                    join: Mutex::new(None),
                });
                registry.insert(token.clone(), Arc::clone(&handle));
                Some(handle)
            }
        };

        let Some(handle) = reserved else {
            self.inner
                .store
                .update_properties(lease)
                .await
                .map_err(Error::Lease)?;
            debug!(lease_token = %token, "refreshed properties of tracked lease");
            return Ok(());
        };

        match self.inner.store.acquire(lease).await {
            Ok(acquired) => {
                info!(
                    lease_token = %token,
                    host = %self.inner.host_name,
                    "acquired lease, launching supervisor"
                );
                let join = self.spawn_supervision(acquired, handle.cancel.clone());
                *handle.join.lock() = Some(join);
                Ok(())
            }
            Err(err) => {
                self.inner.registry.lock().remove(&token);
                Err(Error::Lease(err))
            }
        }
    }

    /// Number of partitions currently tracked (owned or being acquired).
    pub fn tracked_partitions(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Cancel every supervisor and await their completion.
    pub async fn shutdown(&self) {
        info!(host = %self.inner.host_name, "shutting down partition controller");
        self.inner.shutdown.cancel();

        let handles: Vec<Arc<PartitionHandle>> =
            self.inner.registry.lock().values().cloned().collect();
        for handle in handles {
            let join = handle.join.lock().take();
            if let Some(join) = join {
                let _ = join.await;
            }
        }
        self.inner.registry.lock().clear();
    }

    fn spawn_supervision(&self, lease: Lease, cancel: CancellationToken) -> JoinHandle<()> {
        let supervisor = self.inner.factory.create(&lease);
        let controller = self.clone();
        tokio::spawn(async move {
            let result = supervisor.run(cancel).await;
            // Erased: split handling re-enters lease registration, which
            // would otherwise make this future type recursive.
            let follow_up: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> =
                Box::pin(controller.on_partition_stopped(lease, result));
            follow_up.await;
        })
    }

    // Takes `self` by value so the erased follow-up future below owns its
    // controller handle.
    async fn on_partition_stopped(self, lease: Lease, result: std::result::Result<(), FeedError>) {
        match result {
            Ok(()) => {
                debug!(lease_token = %lease.lease_token(), "supervision ended cleanly");
                self.remove_and_release(&lease).await;
            }
            Err(FeedError::Split {
                last_continuation, ..
            }) => {
                // Seed the children from the freshest continuation the
                // processor had, not the stored checkpoint.
                let parent = match last_continuation {
                    Some(continuation) => lease.with_continuation(Some(continuation)),
                    None => lease,
                };
                self.handle_split(parent).await;
            }
            Err(FeedError::Lease(err)) if err.is_lost() => {
                info!(
                    lease_token = %lease.lease_token(),
                    "lease lost to another host, dropping tracking"
                );
                self.remove_tracking(lease.lease_token());
            }
            Err(err) => {
                warn!(
                    lease_token = %lease.lease_token(),
                    error = %err,
                    "supervision failed, releasing lease"
                );
                self.remove_and_release(&lease).await;
            }
        }
    }

    /// Replace a split parent with its children.
    ///
    /// Disposition rules: a synchronizer failure keeps the parent lease
    /// (released, retried later); zero children means another host finished
    /// the split, so the parent is deleted; a child acquire conflict
    /// abandons the remaining children but the parent is still deleted,
    /// because whoever owns the children owns the data.
    async fn handle_split(&self, parent: Lease) {
        info!(lease_token = %parent.lease_token(), "handling partition split");

        let children = match self.inner.synchronizer.split_partition(&parent).await {
            Ok(children) => children,
            Err(err) => {
                warn!(
                    lease_token = %parent.lease_token(),
                    error = %err,
                    "split synchronization failed, keeping parent lease for retry"
                );
                self.remove_and_release(&parent).await;
                return;
            }
        };

        if children.is_empty() {
            info!(
                lease_token = %parent.lease_token(),
                "child leases already created by another host"
            );
        }

        for child in children {
            let child = child.with_properties(parent.properties().clone());
            match self.add_or_update_lease(&child).await {
                Ok(()) => {}
                Err(Error::Lease(err)) if err.is_lost() => {
                    info!(
                        lease_token = %child.lease_token(),
                        "child lease owned elsewhere, yielding the split"
                    );
                    break;
                }
                Err(err) => {
                    warn!(
                        lease_token = %child.lease_token(),
                        error = %err,
                        "failed to register child lease"
                    );
                    break;
                }
            }
        }

        if let Err(err) = self.inner.store.delete(&parent).await {
            warn!(
                lease_token = %parent.lease_token(),
                error = %err,
                "failed to delete split parent lease"
            );
        }
        self.remove_tracking(parent.lease_token());
    }

    fn remove_tracking(&self, token: &str) {
        self.inner.registry.lock().remove(token);
    }

    async fn remove_and_release(&self, lease: &Lease) {
        self.remove_tracking(lease.lease_token());
        if let Err(err) = self.inner.store.release(lease).await {
            warn!(
                lease_token = %lease.lease_token(),
                error = %err,
                "failed to release lease"
            );
        }
    }
}

//! The user-facing observer seam for change-feed batches.

use crate::error::ObserverError;
use crate::types::Document;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Why processing for one partition stopped. Exactly one reason is chosen
/// by classifying the terminating condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The host is shutting down (caller-initiated cancellation).
    Shutdown,
    /// The lease was taken by another host.
    LeaseLost,
    /// The partition split; children take over.
    Split,
    /// The feed or container no longer exists.
    ResourceGone,
    /// The read session is not available.
    ReadSessionNotAvailable,
    /// The observer's own callback failed.
    ObserverError,
    /// Anything else.
    Unknown,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CloseReason::Shutdown => "shutdown",
            CloseReason::LeaseLost => "lease lost",
            CloseReason::Split => "split",
            CloseReason::ResourceGone => "resource gone",
            CloseReason::ReadSessionNotAvailable => "read session not available",
            CloseReason::ObserverError => "observer error",
            CloseReason::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Per-partition context handed to every observer callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverContext {
    /// The lease token of the partition being processed.
    pub lease_token: String,
}

impl ObserverContext {
    /// Context for one partition.
    pub fn new(lease_token: impl Into<String>) -> Self {
        Self {
            lease_token: lease_token.into(),
        }
    }
}

/// User-supplied callbacks invoked with batches of changed documents.
///
/// One observer instance may serve many partitions concurrently; the
/// context identifies which partition each call belongs to. Lifecycle per
/// partition: `open`, zero or more `process_changes`, then exactly one
/// `close` with the reason processing stopped.
#[async_trait]
pub trait ChangeFeedObserver: Send + Sync {
    /// Called once before the first batch for a partition.
    async fn open(&self, context: &ObserverContext) -> Result<(), ObserverError>;

    /// Called with each batch of changed documents.
    async fn process_changes(
        &self,
        context: &ObserverContext,
        changes: Vec<Document>,
        cancel: &CancellationToken,
    ) -> Result<(), ObserverError>;

    /// Called once when processing for a partition stops.
    async fn close(&self, context: &ObserverContext, reason: CloseReason);
}

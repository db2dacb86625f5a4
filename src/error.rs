//! Error types for partition orchestration.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for meridian operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Errors surfaced by the backing data source.
    #[error("data source error: {0}")]
    DataSource(#[from] DataSourceError),

    /// Lease store errors.
    #[error("lease error: {0}")]
    Lease(#[from] LeaseError),

    /// Change-feed processing errors.
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// Continuation-token resume errors.
    #[error("continuation error: {0}")]
    Continuation(#[from] ContinuationError),

    /// Errors raised by user-supplied observer callbacks.
    #[error("observer error: {0}")]
    Observer(#[from] ObserverError),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failures returned by a page fetch or topology lookup.
///
/// The split variant is a control-flow signal, not a user-visible failure:
/// composing enumerators and the partition controller intercept it and
/// re-route to child ranges.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataSourceError {
    /// Request was throttled (429-equivalent). Retryable after the hint.
    #[error("request throttled, retry after {retry_after:?}")]
    Throttled { retry_after: Option<Duration> },

    /// The partition-key range no longer exists because it was split.
    #[error("partition {range_id} was split")]
    Split { range_id: String },

    /// The feed or container is gone entirely.
    #[error("resource gone: {0}")]
    ResourceGone(String),

    /// The read session is not available on the contacted replica.
    #[error("read session not available: {0}")]
    ReadSessionNotAvailable(String),

    /// The request timed out. Retryable.
    #[error("request timed out")]
    Timeout,

    /// Any other service-side failure. Propagated as-is.
    #[error("service error: {0}")]
    Service(String),
}

impl DataSourceError {
    /// Whether the caller may retry the same request without re-routing.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DataSourceError::Throttled { .. } | DataSourceError::Timeout)
    }

    /// Whether this failure means the range was replaced by children.
    pub fn is_split(&self) -> bool {
        matches!(self, DataSourceError::Split { .. })
    }
}

/// Lease store errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LeaseError {
    /// The lease is owned by another host or the etag no longer matches.
    /// Ownership conflicts resolve by yielding, never by retrying.
    #[error("lease {lease_token} lost{owner_suffix}", owner_suffix = .owner.as_deref().map(|o| format!(" to {o}")).unwrap_or_default())]
    Lost {
        lease_token: String,
        owner: Option<String>,
    },

    /// No lease exists for the given token.
    #[error("lease not found: {0}")]
    NotFound(String),

    /// Underlying store failure (I/O, serialization, quorum).
    #[error("lease store error: {0}")]
    Store(String),
}

impl LeaseError {
    /// Create a lost-lease error without a known new owner.
    pub fn lost(lease_token: impl Into<String>) -> Self {
        LeaseError::Lost {
            lease_token: lease_token.into(),
            owner: None,
        }
    }

    /// Whether this error means another host holds the lease.
    pub fn is_lost(&self) -> bool {
        matches!(self, LeaseError::Lost { .. })
    }
}

/// Terminal outcome of feed processing for one partition.
///
/// Produced by the processor and renewal tasks, classified by the supervisor
/// into an observer close reason, and matched on by the controller for split
/// re-routing.
#[derive(Error, Debug)]
pub enum FeedError {
    /// The partition split mid-feed. Carries the last continuation the
    /// processor had in hand so the controller can seed the children from it
    /// rather than from the lease's possibly-stale stored checkpoint.
    #[error("partition {lease_token} split during processing")]
    Split {
        lease_token: String,
        last_continuation: Option<String>,
    },

    /// The feed resource was deleted.
    #[error("feed resource gone: {0}")]
    ResourceGone(String),

    /// The read session is not available.
    #[error("read session not available: {0}")]
    ReadSessionNotAvailable(String),

    /// The user-supplied observer callback failed.
    #[error(transparent)]
    Observer(#[from] ObserverError),

    /// A lease operation failed (renewal or checkpoint).
    #[error(transparent)]
    Lease(#[from] LeaseError),

    /// Unclassified processing failure.
    #[error("feed processing failed: {0}")]
    Other(String),
}

/// Errors from resuming a cross-partition query from continuation tokens.
///
/// These are fatal, non-retryable conditions: guessing a resume point risks
/// silent data loss or duplication.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContinuationError {
    /// A token could not be parsed or carries an inverted range.
    #[error("malformed continuation token: {0}")]
    MalformedToken(String),

    /// No current range contains the resume point of any supplied token.
    #[error("no target partition found for the supplied continuation tokens")]
    NoResumeTarget,

    /// More than one current range claimed the resume point.
    #[error("ambiguous resume target: {candidates} candidate partitions")]
    AmbiguousResumeTarget { candidates: usize },
}

/// Wrapper attributing a failure to user-supplied observer code rather than
/// the infrastructure.
#[derive(Error, Debug)]
#[error("observer callback failed: {0}")]
pub struct ObserverError(#[source] pub Box<dyn std::error::Error + Send + Sync>);

impl ObserverError {
    /// Wrap a user-callback failure.
    pub fn new(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        ObserverError(err.into())
    }

    /// Wrap a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        ObserverError(message.into().into())
    }
}

//! The lease-store seam.
//!
//! Lease persistence (format, container, consistency) is an external
//! collaborator's concern; this crate only needs the operations below, each
//! enforcing optimistic concurrency via the lease's etag.

use crate::changefeed::lease::Lease;
use crate::error::LeaseError;
use async_trait::async_trait;

/// Durable store of lease records shared by every competing host.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Take ownership of a lease, creating it if it does not exist yet.
    /// Fails with [`LeaseError::Lost`] when another host holds it.
    async fn acquire(&self, lease: &Lease) -> Result<Lease, LeaseError>;

    /// Refresh the lease's etag to keep ownership. Fails with
    /// [`LeaseError::Lost`] when ownership moved since the last renewal.
    async fn renew(&self, lease: &Lease) -> Result<Lease, LeaseError>;

    /// Give up ownership, leaving the lease for another host.
    async fn release(&self, lease: &Lease) -> Result<(), LeaseError>;

    /// Delete the lease record entirely (used for split parents once the
    /// children are durably acquired).
    async fn delete(&self, lease: &Lease) -> Result<(), LeaseError>;

    /// Persist new custom properties.
    async fn update_properties(&self, lease: &Lease) -> Result<Lease, LeaseError>;

    /// Commit a continuation checkpoint. Fails with [`LeaseError::Lost`]
    /// when the lease moved, which makes the checkpoint path a second
    /// ownership probe alongside renewal.
    async fn checkpoint(&self, lease: &Lease, continuation: &str) -> Result<Lease, LeaseError>;

    /// Every lease currently visible in the store.
    async fn list(&self) -> Result<Vec<Lease>, LeaseError>;
}

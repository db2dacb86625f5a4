//! Change-feed processing over lease-managed partitions.
//!
//! A fleet of hosts competes for per-partition leases. Each host runs a
//! [`PartitionController`] that acquires leases, launches one
//! [`PartitionSupervisor`] per owned partition (lease renewal racing feed
//! processing), and replaces a parent lease with child leases when the
//! partition splits.

mod controller;
mod lease;
mod observer;
mod processor;
mod renewer;
mod store;
mod supervisor;
mod synchronizer;

pub use controller::PartitionController;
pub use lease::Lease;
pub use observer::{ChangeFeedObserver, CloseReason, ObserverContext};
pub use processor::{FeedProcessor, PartitionProcessor};
pub use renewer::{IntervalLeaseRenewer, LeaseRenewer};
pub use store::LeaseStore;
pub use supervisor::{
    PartitionSupervisor, PartitionSupervisorFactory, Supervisor, SupervisorFactory,
};
pub use synchronizer::{PartitionSynchronizer, PartitionSynchronizerCore};

//! Client-side partition orchestration for a partitioned, multi-region
//! document store.
//!
//! This crate implements the two coordination-heavy halves of such a
//! client:
//! - **Change-feed processing**: a fleet of competing hosts divides the
//!   container's physical partitions among themselves via leases, runs one
//!   supervised processor per owned partition, and reacts to partition
//!   splits by atomically replacing a parent lease with child leases.
//! - **Cross-partition queries**: per-range page cursors composed into a
//!   single stream — strict range order for unordered queries, a k-way
//!   sorted merge for ORDER BY queries — with continuation tokens that
//!   re-anchor onto the current topology after splits.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                    PartitionController                    │
//! │  lease registry · split disposition · graceful drain      │
//! └────────────┬──────────────────────────────┬───────────────┘
//!              ▼                              ▼
//!    ┌──────────────────┐          ┌────────────────────┐
//!    │ PartitionSupervi-│  ...one  │ PartitionSynchroni-│
//!    │ sor (renew ∥ feed)│per lease│ zer (split → kids) │
//!    └────────┬─────────┘          └────────────────────┘
//!             ▼
//!    ┌──────────────────┐   ┌─────────────────────────────┐
//!    │ PartitionProces- │   │  CrossPartition / OrderBy   │
//!    │ sor (pull+observe)│  │  enumerators (query side)   │
//!    └────────┬─────────┘   └──────────────┬──────────────┘
//!             ▼                            ▼
//!    ┌───────────────────────────────────────────────────┐
//!    │        DataSource / LeaseStore (collaborators)    │
//!    └───────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use meridian::changefeed::{
//!     Lease, PartitionController, PartitionSupervisorFactory, PartitionSynchronizerCore,
//! };
//! use meridian::testing::{InMemoryCollection, InMemoryLeaseStore, RecordingObserver};
//! use meridian::ProcessorOptions;
//! use std::sync::Arc;
//!
//! # async fn run() -> meridian::Result<()> {
//! let collection = Arc::new(InMemoryCollection::new());
//! let store = Arc::new(InMemoryLeaseStore::new("host-a"));
//! let observer = Arc::new(RecordingObserver::new());
//!
//! let factory = Arc::new(PartitionSupervisorFactory::new(
//!     collection.clone(),
//!     store.clone(),
//!     observer.clone(),
//!     ProcessorOptions::default(),
//! ));
//! let synchronizer = Arc::new(PartitionSynchronizerCore::new(
//!     collection.clone(),
//!     store.clone(),
//! ));
//! let controller =
//!     PartitionController::new("host-a", store.clone(), synchronizer, factory);
//!
//! controller.initialize().await?;
//! // ... the controller now supervises every owned partition ...
//! controller.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Consistency model
//!
//! - **Partition ownership**: at most one supervisor per partition token per
//!   host, enforced by a mutex-guarded registry; across hosts, ownership is
//!   arbitrated by the lease store's optimistic concurrency.
//! - **Split handling**: children are seeded from the processor's freshest
//!   continuation, so a change-feed consumer sees no gaps and no duplicates
//!   across the boundary; the parent lease is only deleted once the split
//!   is resolved (ownership conflicts yield; topology failures retry).
//! - **Query resume**: continuation tokens are range-scoped; after a split
//!   they fan out over the children via half-open interval matching, and a
//!   corrupt resume state fails loudly instead of guessing.

pub mod changefeed;
pub mod config;
pub mod datasource;
pub mod error;
pub mod query;
pub mod routing;
pub mod testing;
pub mod types;

pub use config::{ProcessorOptions, QueryOptions};
pub use datasource::DataSource;
pub use error::{
    ContinuationError, DataSourceError, Error, FeedError, LeaseError, ObserverError, Result,
};
pub use routing::{KeyRange, PartitionKeyRange};
pub use types::{Document, FeedPage, QuerySpec, QueryState, SortDirection, SortSpec};

// Most-used types from each subsystem.
pub use changefeed::{
    ChangeFeedObserver, CloseReason, Lease, LeaseStore, ObserverContext, PartitionController,
};
pub use query::{CrossPartitionEnumerator, OrderByEnumerator, PartitionedToken};

//! The data-source seam.
//!
//! Everything network-shaped is behind this trait: page fetches for queries,
//! change-feed reads, and partition-map lookups. The wire transport, auth,
//! and serialization live in the implementation, not here.

use crate::error::DataSourceError;
use crate::routing::{KeyRange, PartitionKeyRange};
use crate::types::{FeedPage, QuerySpec, QueryState};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Backing document store for queries and change feeds.
///
/// Implementations must return [`DataSourceError::Split`] when asked about a
/// partition-key range that has been replaced by children; that signal drives
/// all re-routing in this crate.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Fetch one page of query results from a single partition-key range.
    ///
    /// `state` is the opaque resumption state from the previous page of the
    /// same logical cursor, or `None` to start from the beginning of the
    /// range. A state captured against a parent range remains valid against
    /// its children (the service re-filters by the requested range).
    async fn fetch_page(
        &self,
        query: &QuerySpec,
        range: &PartitionKeyRange,
        state: Option<&QueryState>,
        page_size: usize,
        cancel: &CancellationToken,
    ) -> Result<FeedPage, DataSourceError>;

    /// Read one page of the change feed for a physical partition.
    ///
    /// `continuation` is the last committed checkpoint, or `None` to read
    /// from the beginning of the feed.
    async fn read_change_feed(
        &self,
        partition_id: &str,
        continuation: Option<&str>,
        page_size: usize,
        cancel: &CancellationToken,
    ) -> Result<FeedPage, DataSourceError>;

    /// The current full partition-key-range list for the container.
    async fn partition_ranges(&self) -> Result<Vec<PartitionKeyRange>, DataSourceError>;

    /// The current ranges overlapping `range`. With `force_refresh` the
    /// implementation must bypass any cached routing map; this is how split
    /// children are discovered.
    async fn overlapping_ranges(
        &self,
        range: &KeyRange,
        force_refresh: bool,
    ) -> Result<Vec<PartitionKeyRange>, DataSourceError>;
}

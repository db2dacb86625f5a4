//! Split resolution: computing child leases for a split parent.

use crate::changefeed::lease::Lease;
use crate::changefeed::store::LeaseStore;
use crate::datasource::DataSource;
use crate::error::Error;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Computes the child leases that replace a split parent.
#[async_trait]
pub trait PartitionSynchronizer: Send + Sync {
    /// Resolve the parent's current child ranges into fresh, unowned child
    /// leases seeded with the parent's continuation. May return an empty
    /// list when a concurrent host already created every child lease. Any
    /// error here means the topology could not be resolved; the caller
    /// keeps the parent and retries later.
    async fn split_partition(&self, parent: &Lease) -> Result<Vec<Lease>, Error>;
}

/// Default synchronizer backed by the data source's routing map and the
/// shared lease store.
pub struct PartitionSynchronizerCore {
    source: Arc<dyn DataSource>,
    store: Arc<dyn LeaseStore>,
}

impl PartitionSynchronizerCore {
    /// Synchronizer over the shared collaborators.
    pub fn new(source: Arc<dyn DataSource>, store: Arc<dyn LeaseStore>) -> Self {
        Self { source, store }
    }
}

#[async_trait]
impl PartitionSynchronizer for PartitionSynchronizerCore {
    async fn split_partition(&self, parent: &Lease) -> Result<Vec<Lease>, Error> {
        let ranges = self
            .source
            .overlapping_ranges(parent.range(), true)
            .await?;

        let children: Vec<_> = ranges
            .into_iter()
            .filter(|r| r.id != parent.lease_token())
            .collect();
        if children.is_empty() {
            // The routing map still shows the parent: the split signal was
            // spurious or the map is stale. Keep the parent and retry.
            warn!(
                lease_token = %parent.lease_token(),
                "split signalled but routing map still shows the parent"
            );
            return Err(Error::Internal(format!(
                "partition {} has not split",
                parent.lease_token()
            )));
        }

        let existing: HashSet<String> = self
            .store
            .list()
            .await
            .map_err(Error::Lease)?
            .into_iter()
            .map(|l| l.lease_token().to_string())
            .collect();

        let mut created = Vec::new();
        for child in children {
            if existing.contains(&child.id) {
                // Another host already created this child lease.
                continue;
            }
            created.push(
                Lease::new(&child.id, child.range.clone())
                    .with_continuation(parent.continuation().map(String::from)),
            );
        }

        info!(
            lease_token = %parent.lease_token(),
            children = created.len(),
            "resolved split into child leases"
        );
        Ok(created)
    }
}

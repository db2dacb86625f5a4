//! End-to-end change-feed tests over the in-memory fakes: real processor,
//! renewer, supervisor, synchronizer, and controller wired together.

#[cfg(test)]
mod tests {
    use crate::changefeed::{
        CloseReason, Lease, LeaseStore, PartitionController, PartitionSupervisorFactory,
        PartitionSynchronizerCore,
    };
    use crate::config::ProcessorOptions;
    use crate::testing::{InMemoryCollection, InMemoryLeaseStore, RecordingObserver};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_options() -> ProcessorOptions {
        ProcessorOptions::default()
            .with_page_size(2)
            .with_poll_interval(Duration::from_millis(5))
            .with_renew_interval(Duration::from_millis(20))
            .with_renew_jitter(Duration::from_millis(2))
            .with_throttle_backoff(Duration::from_millis(1))
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..600 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met within timeout");
    }

    fn wire(
        collection: &Arc<InMemoryCollection>,
        store: &Arc<InMemoryLeaseStore>,
        observer: &Arc<RecordingObserver>,
    ) -> PartitionController {
        let factory = Arc::new(PartitionSupervisorFactory::new(
            collection.clone(),
            Arc::clone(store) as Arc<dyn LeaseStore>,
            observer.clone(),
            fast_options(),
        ));
        let synchronizer = Arc::new(PartitionSynchronizerCore::new(
            collection.clone(),
            Arc::clone(store) as Arc<dyn LeaseStore>,
        ));
        PartitionController::new(
            "host-a",
            Arc::clone(store) as Arc<dyn LeaseStore>,
            synchronizer,
            factory,
        )
    }

    #[tokio::test]
    async fn test_feed_processes_documents_and_checkpoints() {
        let collection = Arc::new(InMemoryCollection::new());
        for i in 0..6 {
            collection.insert(format!("k{i}"), json!({ "id": i }));
        }
        let store = Arc::new(InMemoryLeaseStore::new("host-a"));
        let observer = Arc::new(RecordingObserver::new());
        let controller = wire(&collection, &store, &observer);

        let partition = collection.ranges()[0].clone();
        controller
            .add_or_update_lease(&Lease::new(&partition.id, partition.range.clone()))
            .await
            .unwrap();

        wait_until(|| observer.total_documents() == 6).await;
        controller.shutdown().await;

        assert_eq!(observer.total_documents(), 6);
        let stored = store.get(&partition.id).unwrap();
        assert_eq!(stored.continuation(), Some("6"));
        assert_eq!(
            observer.closes(),
            vec![(partition.id.clone(), CloseReason::Shutdown)]
        );
    }

    #[tokio::test]
    async fn test_feed_survives_split_without_gaps_or_duplicates() {
        let collection = Arc::new(InMemoryCollection::new());
        for i in 0..6 {
            collection.insert(format!("k{i}"), json!({ "id": i }));
        }
        let store = Arc::new(InMemoryLeaseStore::new("host-a"));
        let observer = Arc::new(RecordingObserver::new());
        let controller = wire(&collection, &store, &observer);

        let parent = collection.ranges()[0].clone();
        controller
            .add_or_update_lease(&Lease::new(&parent.id, parent.range.clone()))
            .await
            .unwrap();
        wait_until(|| observer.total_documents() == 6).await;

        // Split the live partition, then write to both sides of the cut.
        collection.split_partition(&parent.id).unwrap();
        for i in 6..12 {
            // Alternates below and above the median of the original keys.
            let key = if i % 2 == 0 { format!("k0-{i}") } else { format!("k9-{i}") };
            collection.insert(key, json!({ "id": i }));
        }

        wait_until(|| observer.total_documents() == 12).await;
        wait_until(|| controller.tracked_partitions() == 2).await;
        controller.shutdown().await;

        // Exactly once across the boundary.
        let ids: Vec<u64> = observer
            .documents()
            .iter()
            .map(|d| d["id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids.len(), 12);
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 12);

        // The parent lease is gone, replaced by owned children.
        assert_eq!(store.delete_count(&parent.id), 1);
        assert!(store.get(&parent.id).is_none());
        let closes = observer.closes();
        assert!(closes.contains(&(parent.id.clone(), CloseReason::Split)));

        // Children were processed under their own lease tokens.
        let child_ids: HashSet<String> = collection
            .ranges()
            .iter()
            .map(|r| r.id.clone())
            .collect();
        for child_id in &child_ids {
            assert!(store.get(child_id).is_some(), "child lease {child_id} exists");
        }
    }

    #[tokio::test]
    async fn test_feed_recovers_from_throttling() {
        let collection = Arc::new(InMemoryCollection::new());
        for i in 0..4 {
            collection.insert(format!("k{i}"), json!({ "id": i }));
        }
        collection.inject_throttles(3);

        let store = Arc::new(InMemoryLeaseStore::new("host-a"));
        let observer = Arc::new(RecordingObserver::new());
        let controller = wire(&collection, &store, &observer);

        let partition = collection.ranges()[0].clone();
        controller
            .add_or_update_lease(&Lease::new(&partition.id, partition.range.clone()))
            .await
            .unwrap();

        wait_until(|| observer.total_documents() == 4).await;
        controller.shutdown().await;
        assert_eq!(observer.total_documents(), 4);
    }
}

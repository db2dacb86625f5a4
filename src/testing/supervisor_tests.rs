//! Supervisor close-reason classification tests with scripted tasks.

#[cfg(test)]
mod tests {
    use crate::changefeed::{
        CloseReason, FeedProcessor, LeaseRenewer, PartitionSupervisor, Supervisor,
    };
    use crate::error::{FeedError, LeaseError, ObserverError};
    use crate::testing::RecordingObserver;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const LEASE_TOKEN: &str = "partitionId";

    /// Renewer scripted to either hold until cancelled or fail at once.
    struct ScriptedRenewer {
        failure: Mutex<Option<LeaseError>>,
        saw_cancel: AtomicBool,
    }

    impl ScriptedRenewer {
        fn idle() -> Self {
            Self {
                failure: Mutex::new(None),
                saw_cancel: AtomicBool::new(false),
            }
        }

        fn failing(err: LeaseError) -> Self {
            Self {
                failure: Mutex::new(Some(err)),
                saw_cancel: AtomicBool::new(false),
            }
        }

        fn was_cancelled(&self) -> bool {
            self.saw_cancel.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LeaseRenewer for ScriptedRenewer {
        async fn run(&self, cancel: CancellationToken) -> Result<(), LeaseError> {
            if let Some(err) = self.failure.lock().take() {
                return Err(err);
            }
            cancel.cancelled().await;
            self.saw_cancel.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    enum ProcessorScript {
        Idle,
        Split,
        ResourceGone,
        ReadSessionNotAvailable,
        ObserverFailure,
        Generic,
    }

    struct ScriptedProcessor {
        script: ProcessorScript,
        saw_cancel: AtomicBool,
    }

    impl ScriptedProcessor {
        fn new(script: ProcessorScript) -> Self {
            Self {
                script,
                saw_cancel: AtomicBool::new(false),
            }
        }

        fn was_cancelled(&self) -> bool {
            self.saw_cancel.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FeedProcessor for ScriptedProcessor {
        async fn run(&self, cancel: CancellationToken) -> Result<(), FeedError> {
            match self.script {
                ProcessorScript::Idle => {
                    cancel.cancelled().await;
                    self.saw_cancel.store(true, Ordering::SeqCst);
                    Ok(())
                }
                ProcessorScript::Split => Err(FeedError::Split {
                    lease_token: LEASE_TOKEN.to_string(),
                    last_continuation: Some("lastContinuation".to_string()),
                }),
                ProcessorScript::ResourceGone => {
                    Err(FeedError::ResourceGone("db/coll".to_string()))
                }
                ProcessorScript::ReadSessionNotAvailable => {
                    Err(FeedError::ReadSessionNotAvailable("session".to_string()))
                }
                ProcessorScript::ObserverFailure => {
                    Err(FeedError::Observer(ObserverError::msg("user code failed")))
                }
                ProcessorScript::Generic => Err(FeedError::Other("processorException".to_string())),
            }
        }
    }

    fn supervisor(
        observer: Arc<RecordingObserver>,
        processor: Arc<ScriptedProcessor>,
        renewer: Arc<ScriptedRenewer>,
    ) -> PartitionSupervisor {
        PartitionSupervisor::new(LEASE_TOKEN, observer, processor, renewer)
    }

    fn sole_close_reason(observer: &RecordingObserver) -> CloseReason {
        let closes = observer.closes();
        assert_eq!(closes.len(), 1);
        assert_eq!(closes[0].0, LEASE_TOKEN);
        closes[0].1
    }

    #[tokio::test]
    async fn test_cancellation_shuts_down_both_tasks() {
        let observer = Arc::new(RecordingObserver::new());
        let processor = Arc::new(ScriptedProcessor::new(ProcessorScript::Idle));
        let renewer = Arc::new(ScriptedRenewer::idle());
        let sut = supervisor(observer.clone(), processor.clone(), renewer.clone());

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        let run = tokio::spawn(async move { sut.run(cancel).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        stopper.cancel();
        run.await.unwrap().unwrap();

        assert!(processor.was_cancelled());
        assert!(renewer.was_cancelled());
        assert_eq!(observer.opened(), vec![LEASE_TOKEN.to_string()]);
        assert_eq!(sole_close_reason(&observer), CloseReason::Shutdown);
    }

    #[tokio::test]
    async fn test_renewer_failure_cancels_processor() {
        let observer = Arc::new(RecordingObserver::new());
        let processor = Arc::new(ScriptedProcessor::new(ProcessorScript::Idle));
        let renewer = Arc::new(ScriptedRenewer::failing(LeaseError::lost(LEASE_TOKEN)));
        let sut = supervisor(observer.clone(), processor.clone(), renewer);

        let err = sut.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, FeedError::Lease(ref e) if e.is_lost()));
        assert!(processor.was_cancelled());
        assert_eq!(sole_close_reason(&observer), CloseReason::LeaseLost);
    }

    #[tokio::test]
    async fn test_processor_failure_cancels_renewer() {
        let observer = Arc::new(RecordingObserver::new());
        let processor = Arc::new(ScriptedProcessor::new(ProcessorScript::Generic));
        let renewer = Arc::new(ScriptedRenewer::idle());
        let sut = supervisor(observer.clone(), processor, renewer.clone());

        let err = sut.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, FeedError::Other(_)));
        assert!(renewer.was_cancelled());
        assert_eq!(sole_close_reason(&observer), CloseReason::Unknown);
    }

    #[tokio::test]
    async fn test_observer_error_close_reason() {
        let observer = Arc::new(RecordingObserver::new());
        let processor = Arc::new(ScriptedProcessor::new(ProcessorScript::ObserverFailure));
        let renewer = Arc::new(ScriptedRenewer::idle());
        let sut = supervisor(observer.clone(), processor, renewer);

        let err = sut.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, FeedError::Observer(_)));
        assert_eq!(sole_close_reason(&observer), CloseReason::ObserverError);
    }

    #[tokio::test]
    async fn test_resource_gone_close_reason() {
        let observer = Arc::new(RecordingObserver::new());
        let processor = Arc::new(ScriptedProcessor::new(ProcessorScript::ResourceGone));
        let renewer = Arc::new(ScriptedRenewer::idle());
        let sut = supervisor(observer.clone(), processor, renewer);

        let err = sut.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, FeedError::ResourceGone(_)));
        assert_eq!(sole_close_reason(&observer), CloseReason::ResourceGone);
    }

    #[tokio::test]
    async fn test_read_session_close_reason() {
        let observer = Arc::new(RecordingObserver::new());
        let processor = Arc::new(ScriptedProcessor::new(
            ProcessorScript::ReadSessionNotAvailable,
        ));
        let renewer = Arc::new(ScriptedRenewer::idle());
        let sut = supervisor(observer.clone(), processor, renewer);

        let err = sut.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, FeedError::ReadSessionNotAvailable(_)));
        assert_eq!(
            sole_close_reason(&observer),
            CloseReason::ReadSessionNotAvailable
        );
    }

    #[tokio::test]
    async fn test_split_closes_observer_then_propagates() {
        let observer = Arc::new(RecordingObserver::new());
        let processor = Arc::new(ScriptedProcessor::new(ProcessorScript::Split));
        let renewer = Arc::new(ScriptedRenewer::idle());
        let sut = supervisor(observer.clone(), processor, renewer.clone());

        // The split is not swallowed here: the observer is closed with the
        // split reason and the error still reaches the controller.
        let err = sut.run(CancellationToken::new()).await.unwrap_err();
        match err {
            FeedError::Split {
                last_continuation, ..
            } => assert_eq!(last_continuation.as_deref(), Some("lastContinuation")),
            other => panic!("expected split, got {other:?}"),
        }
        assert!(renewer.was_cancelled());
        assert_eq!(sole_close_reason(&observer), CloseReason::Split);
    }

    #[tokio::test]
    async fn test_open_failure_skips_tasks() {
        struct FailingOpen;
        #[async_trait]
        impl crate::changefeed::ChangeFeedObserver for FailingOpen {
            async fn open(
                &self,
                _context: &crate::changefeed::ObserverContext,
            ) -> Result<(), ObserverError> {
                Err(ObserverError::msg("open failed"))
            }
            async fn process_changes(
                &self,
                _context: &crate::changefeed::ObserverContext,
                _changes: Vec<crate::types::Document>,
                _cancel: &CancellationToken,
            ) -> Result<(), ObserverError> {
                Ok(())
            }
            async fn close(
                &self,
                _context: &crate::changefeed::ObserverContext,
                _reason: CloseReason,
            ) {
            }
        }

        let processor = Arc::new(ScriptedProcessor::new(ProcessorScript::Idle));
        let renewer = Arc::new(ScriptedRenewer::idle());
        let sut = PartitionSupervisor::new(
            LEASE_TOKEN,
            Arc::new(FailingOpen),
            processor.clone(),
            renewer,
        );

        let err = sut.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, FeedError::Observer(_)));
        assert!(!processor.was_cancelled());
    }
}

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::app::ports::PersistencePort;
use crate::constants::{INGESTION_RESULTS_KEY, UPLOAD_KEY};
use crate::dedupe::DuplicateDetector;
use crate::error::{IngestError, Result};
use crate::transport::retry::RetryController;
use crate::transport::{AssetTransport, Descriptor, Operation, TimeoutPolicy};
use crate::types::{Credential, DuplicateRecord, IngestFailure, IngestionResult, UploadRequest};
use crate::validation::ValidationRules;

/// Use case for submitting one piece of content to the catalog
pub struct IngestUseCase {
    transport: Arc<dyn AssetTransport>,
    retry: RetryController,
    duplicates: Arc<DuplicateDetector>,
    store: Arc<dyn PersistencePort>,
    rules: ValidationRules,
    timeouts: TimeoutPolicy,
    credential: Credential,
    history_limit: usize,
    history_lock: tokio::sync::Mutex<()>,
}

impl IngestUseCase {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn AssetTransport>,
        retry: RetryController,
        duplicates: Arc<DuplicateDetector>,
        store: Arc<dyn PersistencePort>,
        rules: ValidationRules,
        timeouts: TimeoutPolicy,
        credential: Credential,
        history_limit: usize,
    ) -> Self {
        Self {
            transport,
            retry,
            duplicates,
            store,
            rules,
            timeouts,
            credential,
            history_limit,
            history_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Validate, short-circuit on known content, then upload under admission
    /// and retry. Never returns `Err`: every outcome is an [`IngestionResult`].
    #[instrument(skip_all, fields(request_id = %request.id(), kind = %request.asset_kind(), bytes = request.size_bytes()))]
    pub async fn submit(&self, request: &UploadRequest, cancel: &CancellationToken) -> IngestionResult {
        let mut result = IngestionResult::for_request(request);

        if let Err(e) = self.rules.validate(request) {
            info!(error = %e, "Submission failed validation");
            return finish(result, Err(e));
        }

        match self
            .duplicates
            .check_duplicate(request.content_hash(), request.asset_kind(), &request.owner_scope())
            .await
        {
            Ok(check) => {
                if let Some(record) = check.matched_record {
                    info!(existing_asset_id = record.existing_asset_id, "Content already submitted, skipping upload");
                    result.asset_id = Some(record.existing_asset_id);
                    result.duplicate_of = Some(record);
                    return finish(result, Ok(()));
                }
            }
            Err(e) => warn!(error = %e, "Duplicate lookup failed, uploading anyway"),
        }

        let timeout = self.timeouts.for_payload(request.size_bytes());
        let transport = self.transport.as_ref();
        let credential = &self.credential;
        let run = self
            .retry
            .run(UPLOAD_KEY, request.id(), cancel, move |attempt| async move {
                debug!(attempt, timeout_secs = timeout.as_secs(), "Upload attempt");
                let descriptor = Descriptor { operation: Operation::Upload(request), credential, timeout };
                let outcome = transport.attempt(&descriptor).await;
                let asset_id = outcome.result.and_then(|success| {
                    success
                        .asset_id
                        .ok_or_else(|| IngestError::retryable("upload succeeded without an asset id", None))
                });
                (Some(outcome.transport), asset_id)
            })
            .await;
        result.attempts = run.attempts;

        match run.result {
            Ok(asset_id) => {
                info!(asset_id, attempts = result.attempts.len(), "Submission accepted");
                result.asset_id = Some(asset_id);
                let result = finish(result, Ok(()));
                self.persist_success(&result).await;
                result
            }
            Err(e) => {
                match &e {
                    IngestError::Cancelled => info!("Submission cancelled, request can be resubmitted"),
                    _ => warn!(error = %e, kind = %e.kind(), "Submission failed"),
                }
                finish(result, Err(e))
            }
        }
    }

    /// Record the duplicate entry and append to history. The upload already
    /// happened, so storage trouble is only logged.
    async fn persist_success(&self, result: &IngestionResult) {
        let Some(asset_id) = result.asset_id else { return };
        let record = DuplicateRecord {
            content_hash: result.content_hash.clone(),
            owner_scope: result.owner_scope.normalized(),
            existing_asset_id: asset_id,
            asset_kind: result.asset_kind,
            recorded_at: result.completed_at,
        };
        if let Err(e) = self.duplicates.record(record).await {
            warn!(error = %e, asset_id, "Failed to store duplicate record");
        }
        if let Err(e) = self.append_history(result).await {
            warn!(error = %e, asset_id, "Failed to append ingestion history");
        }
    }

    /// Held across the read and the write so concurrent successes all land.
    async fn append_history(&self, result: &IngestionResult) -> Result<()> {
        let _guard = self.history_lock.lock().await;
        let mut history = self.store.get(INGESTION_RESULTS_KEY).await?;
        history.push(serde_json::to_value(result)?);
        if history.len() > self.history_limit {
            let excess = history.len() - self.history_limit;
            history.drain(..excess);
        }
        self.store.put(INGESTION_RESULTS_KEY, history).await
    }

    /// Stored successful results, oldest first
    pub async fn history(&self) -> Result<Vec<IngestionResult>> {
        let raw = self.store.get(INGESTION_RESULTS_KEY).await?;
        let mut results = Vec::with_capacity(raw.len());
        for value in raw {
            match serde_json::from_value::<IngestionResult>(value) {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "Skipping malformed history entry"),
            }
        }
        Ok(results)
    }
}

fn finish(mut result: IngestionResult, outcome: Result<()>) -> IngestionResult {
    if let Err(e) = outcome {
        result.error = Some(IngestFailure::from(&e));
    }
    result.completed_at = Utc::now();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DUPLICATE_RECORDS_KEY;
    use crate::error::ErrorKind;
    use crate::infra::document_store::InMemoryDocumentStore;
    use crate::rate_limiter::{Limits, RateLimiter};
    use crate::transport::retry::RetryPolicy;
    use crate::transport::{TransportOutcome, TransportSuccess};
    use crate::types::{AssetKind, OwnerScope, TransportKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Plays back a list of outcomes, one per attempt.
    struct ScriptedTransport {
        script: Mutex<Vec<Result<TransportSuccess>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<TransportSuccess>>) -> Arc<Self> {
            Arc::new(Self { script: Mutex::new(script), calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl AssetTransport for ScriptedTransport {
        fn kind(&self) -> TransportKind {
            TransportKind::Direct
        }

        async fn attempt(&self, _descriptor: &Descriptor<'_>) -> TransportOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            let result = if script.is_empty() {
                Err(IngestError::retryable("script exhausted", None))
            } else {
                script.remove(0)
            };
            TransportOutcome { transport: TransportKind::Direct, result }
        }
    }

    /// Yields on every read so interleaved submissions actually overlap.
    #[derive(Default)]
    struct YieldingStore {
        inner: InMemoryDocumentStore,
    }

    #[async_trait]
    impl PersistencePort for YieldingStore {
        async fn get(&self, list_key: &str) -> Result<Vec<serde_json::Value>> {
            let records = self.inner.get(list_key).await?;
            tokio::task::yield_now().await;
            Ok(records)
        }

        async fn put(&self, list_key: &str, records: Vec<serde_json::Value>) -> Result<()> {
            self.inner.put(list_key, records).await
        }
    }

    fn use_case<S: PersistencePort + 'static>(transport: Arc<ScriptedTransport>, store: Arc<S>) -> IngestUseCase {
        let limiter = Arc::new(RateLimiter::new(Limits::new(100, 1_000)));
        IngestUseCase::new(
            transport,
            RetryController::new(limiter, RetryPolicy::default()),
            Arc::new(DuplicateDetector::new(store.clone())),
            store,
            ValidationRules::default(),
            TimeoutPolicy::default(),
            Credential::new("token"),
            2,
        )
    }

    fn png(seed: u8) -> UploadRequest {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend(std::iter::repeat(seed).take(64));
        UploadRequest::new(bytes, "Icon", AssetKind::Image, OwnerScope::Individual)
    }

    fn ok(id: u64) -> Result<TransportSuccess> {
        Ok(TransportSuccess { asset_id: Some(id), data: None })
    }

    #[tokio::test]
    async fn successful_upload_is_recorded_and_deduplicated() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let transport = ScriptedTransport::new(vec![ok(501)]);
        let uc = use_case(transport.clone(), store);
        let cancel = CancellationToken::new();

        let first = uc.submit(&png(1), &cancel).await;
        assert!(first.is_success());
        assert_eq!(first.asset_id, Some(501));
        assert_eq!(first.attempts.len(), 1);

        let second = uc.submit(&png(1), &cancel).await;
        assert!(second.is_duplicate());
        assert_eq!(second.asset_id, Some(501));
        assert!(second.attempts.is_empty());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn validation_failure_never_reaches_transport() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let transport = ScriptedTransport::new(vec![ok(1)]);
        let uc = use_case(transport.clone(), store);
        let request = UploadRequest::new(Vec::new(), "Empty", AssetKind::Image, OwnerScope::Individual);
        let result = uc.submit(&request, &CancellationToken::new()).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::Validation));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fatal_failure_is_not_persisted() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let transport = ScriptedTransport::new(vec![Err(IngestError::fatal("Image was moderated", Some(400)))]);
        let uc = use_case(transport, store.clone());
        let result = uc.submit(&png(2), &CancellationToken::new()).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::Fatal));
        assert_eq!(result.attempts.len(), 1);
        assert!(store.get(INGESTION_RESULTS_KEY).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_submission_is_resumable() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let uc = use_case(ScriptedTransport::new(vec![ok(3)]), store.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = uc.submit(&png(3), &cancel).await;
        assert!(result.is_resumable());
        assert!(result.asset_id.is_none());
        assert!(store.get(INGESTION_RESULTS_KEY).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_is_capped() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let uc = use_case(ScriptedTransport::new(vec![ok(10), ok(11), ok(12)]), store);
        let cancel = CancellationToken::new();
        for seed in 0..3 {
            assert!(uc.submit(&png(seed), &cancel).await.is_success());
        }
        let history = uc.history().await.unwrap();
        let ids: Vec<_> = history.iter().filter_map(|r| r.asset_id).collect();
        assert_eq!(ids, vec![11, 12]);
    }

    #[tokio::test]
    async fn concurrent_successes_keep_every_record() {
        let store = Arc::new(YieldingStore::default());
        let transport = ScriptedTransport::new(vec![ok(20), ok(21)]);
        let uc = use_case(transport.clone(), store.clone());
        let cancel = CancellationToken::new();
        let (first_req, second_req) = (png(5), png(6));

        let (first, second) = tokio::join!(uc.submit(&first_req, &cancel), uc.submit(&second_req, &cancel));
        assert!(first.is_success());
        assert!(second.is_success());
        assert_eq!(store.get(DUPLICATE_RECORDS_KEY).await.unwrap().len(), 2);
        assert_eq!(uc.history().await.unwrap().len(), 2);

        let again = uc.submit(&png(5), &cancel).await;
        assert!(again.is_duplicate());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }
}

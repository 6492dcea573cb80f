//! Wires the ingestion and status use cases from configuration.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app::ingest_use_case::IngestUseCase;
use crate::app::ports::{HttpClientPort, PersistencePort, PrivilegedTransportPort};
use crate::app::status_use_case::StatusUseCase;
use crate::config::Config;
use crate::dedupe::DuplicateDetector;
use crate::error::Result;
use crate::rate_limiter::AdmissionMode;
use crate::resolver::{CatalogProbe, DetailPageProbe, PhraseMatcher, ReachabilityProbe, SignalProbe, StatusResolver};
use crate::transport::retry::RetryController;
use crate::transport::{select_transport, DirectTransport};
use crate::types::{
    AssetKind, AssetStatusVerdict, Credential, DuplicateCheckResult, IngestionResult, OwnerScope, UploadRequest,
};

/// Collaborators supplied by the host
pub struct Collaborators {
    pub store: Arc<dyn PersistencePort>,
    pub http: Arc<dyn HttpClientPort>,
    pub privileged: Option<Arc<dyn PrivilegedTransportPort>>,
}

/// Front door for submitting content and reconciling moderation status
pub struct IngestionEngine {
    ingest: IngestUseCase,
    status: StatusUseCase,
    duplicates: Arc<DuplicateDetector>,
}

impl IngestionEngine {
    pub fn new(ingest: IngestUseCase, status: StatusUseCase, duplicates: Arc<DuplicateDetector>) -> Self {
        Self { ingest, status, duplicates }
    }

    pub fn from_config(config: &Config, credential: Credential, collaborators: Collaborators) -> Result<Self> {
        let Collaborators { store, http, privileged } = collaborators;
        let limiter = Arc::new(config.rate_limits.build());
        let mode = config.rate_limits.mode;

        let transport = select_transport(
            privileged,
            DirectTransport::new(http.clone(), config.endpoints.clone(), config.auth.clone()),
        );
        info!(transport = %transport.kind(), mode = ?mode, "Ingestion engine configured");

        let duplicates = Arc::new(DuplicateDetector::new(store.clone()));
        let ingest = IngestUseCase::new(
            transport.clone(),
            RetryController::new(limiter.clone(), config.retry.clone()).with_mode(mode),
            duplicates.clone(),
            store,
            config.validation.clone(),
            config.timeouts.clone(),
            credential.clone(),
            config.storage.history_limit,
        );

        let resolver_cfg = &config.resolver;
        let matcher = PhraseMatcher::new(&resolver_cfg.pending_phrases, &resolver_cfg.declined_phrases)?;
        let probes: Vec<Arc<dyn SignalProbe>> = vec![
            Arc::new(ReachabilityProbe::public(http.clone(), &config.endpoints)),
            Arc::new(ReachabilityProbe::authenticated(http.clone(), &config.endpoints, config.auth.clone())),
            Arc::new(CatalogProbe::new(
                transport,
                Duration::from_secs(resolver_cfg.pending_age_threshold_secs),
            )),
            Arc::new(DetailPageProbe::new(http, &config.endpoints, matcher)),
        ];
        // Status probes always queue for admission.
        let resolver = StatusResolver::new(
            probes,
            RetryController::new(limiter, config.probe_retry.clone()).with_mode(AdmissionMode::Throttle),
            credential,
            Duration::from_secs(resolver_cfg.probe_timeout_secs),
        );
        let status = StatusUseCase::new(
            resolver,
            Duration::from_secs(resolver_cfg.poll_interval_secs),
            resolver_cfg.max_polls,
        );

        Ok(Self::new(ingest, status, duplicates))
    }

    pub async fn submit(&self, request: &UploadRequest, cancel: &CancellationToken) -> IngestionResult {
        self.ingest.submit(request, cancel).await
    }

    pub async fn resolve_status(
        &self,
        asset_id: u64,
        asset_kind: AssetKind,
        cancel: &CancellationToken,
    ) -> Result<AssetStatusVerdict> {
        self.status.resolve_status(asset_id, asset_kind, cancel).await
    }

    pub async fn resolve_status_fresh(
        &self,
        asset_id: u64,
        asset_kind: AssetKind,
        cancel: &CancellationToken,
    ) -> Result<AssetStatusVerdict> {
        self.status.resolve_status_fresh(asset_id, asset_kind, cancel).await
    }

    pub async fn poll_until_settled(
        &self,
        asset_id: u64,
        asset_kind: AssetKind,
        cancel: &CancellationToken,
    ) -> Result<AssetStatusVerdict> {
        self.status.poll_until_settled(asset_id, asset_kind, cancel).await
    }

    pub async fn check_duplicate(
        &self,
        content_hash: &str,
        asset_kind: AssetKind,
        owner_scope: &OwnerScope,
    ) -> Result<DuplicateCheckResult> {
        self.duplicates.check_duplicate(content_hash, asset_kind, owner_scope).await
    }

    pub async fn check_duplicate_by_asset_id(&self, asset_id: u64) -> Result<DuplicateCheckResult> {
        self.duplicates.check_duplicate_by_asset_id(asset_id).await
    }

    pub async fn history(&self) -> Result<Vec<IngestionResult>> {
        self.ingest.history().await
    }
}

//! One upload/check call against the upstream catalog.
//!
//! The preferred channel is a host-provided privileged transport; when the host
//! has none, or it fails transiently, the call goes over the direct network
//! path. Which arrangement is used is decided once in [`select_transport`].

pub mod classify;
pub mod direct;
pub mod privileged;
pub mod retry;

use crate::app::ports::PrivilegedTransportPort;
use crate::error::{ErrorKind, Result};
use crate::types::{AssetKind, Credential, TransportKind, UploadRequest};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub use direct::DirectTransport;
pub use privileged::PrivilegedTransport;

#[derive(Clone, Copy, Debug)]
pub enum Operation<'a> {
    Upload(&'a UploadRequest),
    CheckStatus { asset_id: u64, asset_kind: AssetKind },
}

#[derive(Clone, Copy, Debug)]
pub struct Descriptor<'a> {
    pub operation: Operation<'a>,
    pub credential: &'a Credential,
    pub timeout: Duration,
}

#[derive(Clone, Debug, Default)]
pub struct TransportSuccess {
    pub asset_id: Option<u64>,
    pub data: Option<serde_json::Value>,
}

#[derive(Debug)]
pub struct TransportOutcome {
    pub transport: TransportKind,
    pub result: Result<TransportSuccess>,
}

impl TransportOutcome {
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn asset_id(&self) -> Option<u64> {
        self.result.as_ref().ok().and_then(|s| s.asset_id)
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.result.as_ref().err().map(|e| e.kind())
    }
}

#[async_trait]
pub trait AssetTransport: Send + Sync {
    fn kind(&self) -> TransportKind;
    async fn attempt(&self, descriptor: &Descriptor<'_>) -> TransportOutcome;
}

/// Privileged first; a retryable privileged failure falls through to the direct
/// call inside the same attempt. Fatal privileged answers are final.
pub struct FallbackTransport {
    primary: PrivilegedTransport,
    fallback: DirectTransport,
}

impl FallbackTransport {
    pub fn new(primary: PrivilegedTransport, fallback: DirectTransport) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl AssetTransport for FallbackTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Privileged
    }

    async fn attempt(&self, descriptor: &Descriptor<'_>) -> TransportOutcome {
        let outcome = self.primary.attempt(descriptor).await;
        match &outcome.result {
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "Privileged transport failed, falling back to direct call");
                self.fallback.attempt(descriptor).await
            }
            _ => outcome,
        }
    }
}

/// Choose the transport arrangement once, at construction.
pub fn select_transport(
    privileged: Option<Arc<dyn PrivilegedTransportPort>>,
    direct: DirectTransport,
) -> Arc<dyn AssetTransport> {
    match privileged {
        Some(port) => Arc::new(FallbackTransport::new(PrivilegedTransport::new(port), direct)),
        None => Arc::new(direct),
    }
}

/// Per-call timeout scaled by payload size and clamped to a ceiling
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutPolicy {
    pub base_secs: u64,
    pub per_mb_secs: u64,
    pub ceiling_secs: u64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self { base_secs: 30, per_mb_secs: 10, ceiling_secs: 300 }
    }
}

impl TimeoutPolicy {
    pub fn for_payload(&self, bytes: usize) -> Duration {
        let mb = (bytes as u64).div_ceil(1024 * 1024);
        let secs = self.base_secs.saturating_add(self.per_mb_secs.saturating_mul(mb));
        Duration::from_secs(secs.min(self.ceiling_secs.max(self.base_secs)))
    }
}

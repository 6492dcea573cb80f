use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::error::{IngestError, Result};
use crate::resolver::StatusResolver;
use crate::types::{AssetKind, AssetStatusVerdict};

/// Use case for answering "what happened to this asset?"
pub struct StatusUseCase {
    resolver: StatusResolver,
    poll_interval: Duration,
    max_polls: u32,
}

impl StatusUseCase {
    pub fn new(resolver: StatusResolver, poll_interval: Duration, max_polls: u32) -> Self {
        Self { resolver, poll_interval, max_polls }
    }

    pub fn resolver(&self) -> &StatusResolver {
        &self.resolver
    }

    pub async fn resolve_status(
        &self,
        asset_id: u64,
        asset_kind: AssetKind,
        cancel: &CancellationToken,
    ) -> Result<AssetStatusVerdict> {
        self.resolver.resolve(asset_id, asset_kind, cancel).await
    }

    /// Ignore any cached verdict and query every signal again
    pub async fn resolve_status_fresh(
        &self,
        asset_id: u64,
        asset_kind: AssetKind,
        cancel: &CancellationToken,
    ) -> Result<AssetStatusVerdict> {
        self.resolver.resolve_fresh(asset_id, asset_kind, cancel).await
    }

    /// Resolve repeatedly until a conclusive verdict or the poll budget runs
    /// out. Returns the last verdict seen; an unresolvable round is only an
    /// error if no round produced a verdict.
    #[instrument(skip(self, cancel))]
    pub async fn poll_until_settled(
        &self,
        asset_id: u64,
        asset_kind: AssetKind,
        cancel: &CancellationToken,
    ) -> Result<AssetStatusVerdict> {
        let polls = self.max_polls.max(1);
        let mut last: Result<AssetStatusVerdict> = Err(IngestError::Unresolvable { asset_id });

        for poll in 1..=polls {
            match self.resolver.resolve(asset_id, asset_kind, cancel).await {
                Ok(verdict) if verdict.is_conclusive() => {
                    info!(poll, state = %verdict.state, "Status settled");
                    return Ok(verdict);
                }
                Ok(verdict) => {
                    debug!(poll, state = %verdict.state, "Status not settled yet");
                    last = Ok(verdict);
                }
                Err(IngestError::Cancelled) => return Err(IngestError::Cancelled),
                Err(e @ IngestError::Unresolvable { .. }) => {
                    debug!(poll, error = %e, "No signal this round");
                    if last.is_err() {
                        last = Err(e);
                    }
                }
                Err(e) => return Err(e),
            }

            if poll < polls {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(IngestError::Cancelled),
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }
        info!(polls, "Poll budget exhausted without a conclusive verdict");
        last
    }
}

//! Multi-signal moderation status resolution.
//!
//! No single upstream query says whether an asset was approved. Each
//! [`SignalProbe`] observes one imperfect source; [`StatusResolver`] runs them
//! in precedence order and fuses their readings into an
//! [`AssetStatusVerdict`].
//!
//! The first probe in the list is primary and always runs alone. If it is
//! not conclusive, every remaining probe that still applies is dispatched
//! concurrently and their signals are interpreted in list order; the first
//! conclusive reading wins. With no conclusive reading the verdict defaults
//! to pending, unless not a single signal could be obtained, which is
//! reported as [`IngestError::Unresolvable`].

pub mod phrases;
pub mod probes;

use crate::constants::STATUS_KEY;
use crate::error::{ErrorKind, IngestError, Result};
use crate::metrics::ResolverMetrics;
use crate::transport::retry::RetryController;
use crate::types::{AssetKind, AssetStatusVerdict, Credential, SignalSource, VerdictState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub use phrases::{PhraseMatch, PhraseMatcher};
pub use probes::{CatalogDetails, CatalogProbe, DetailPageProbe, ReachabilityProbe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    NotFound,
    /// Exists but the caller may not see it
    Forbidden,
}

/// What a probe actually observed, before any interpretation
#[derive(Debug, Clone, PartialEq)]
pub enum RawIndicator {
    Reachability(Reachability),
    Catalog(CatalogDetails),
    PageText(PhraseMatch),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    None,
    Weak,
    Strong,
}

/// One observation from one source. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSignal {
    pub source: SignalSource,
    pub raw_indicator: RawIndicator,
    pub confidence: Confidence,
}

/// Result of interpreting a signal against what is already known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    Conclusive(VerdictState),
    Inconclusive,
}

/// Facts accumulated while interpreting signals for one resolution
#[derive(Debug, Clone)]
pub struct FusionState {
    pub now: DateTime<Utc>,
    /// Public probe saw the asset exists but could not view it
    pub gated: bool,
    /// The owner's credential can see the asset
    pub owner_visible: bool,
    pub display_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl FusionState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now, gated: false, owner_visible: false, display_name: None, created_at: None }
    }

    pub fn age(&self) -> Option<chrono::Duration> {
        self.created_at.map(|created| self.now - created)
    }
}

/// Asset a resolution is about, plus what every probe needs to reach it
#[derive(Debug, Clone, Copy)]
pub struct ProbeTarget<'a> {
    pub asset_id: u64,
    pub asset_kind: AssetKind,
    pub credential: &'a Credential,
    pub timeout: Duration,
}

#[async_trait]
pub trait SignalProbe: Send + Sync {
    fn source(&self) -> SignalSource;

    /// Whether this probe has anything to add given the readings so far
    fn applies(&self, _state: &FusionState) -> bool {
        true
    }

    async fn probe(&self, target: &ProbeTarget<'_>) -> Result<StatusSignal>;

    fn interpret(&self, signal: &StatusSignal, state: &mut FusionState) -> Reading;
}

pub struct StatusResolver {
    probes: Vec<Arc<dyn SignalProbe>>,
    retry: RetryController,
    credential: Credential,
    probe_timeout: Duration,
    verdicts: Mutex<HashMap<u64, AssetStatusVerdict>>,
}

impl StatusResolver {
    /// `probes` are in precedence order; the first is primary.
    pub fn new(
        probes: Vec<Arc<dyn SignalProbe>>,
        retry: RetryController,
        credential: Credential,
        probe_timeout: Duration,
    ) -> Self {
        Self { probes, retry, credential, probe_timeout, verdicts: Mutex::new(HashMap::new()) }
    }

    pub fn cached(&self, asset_id: u64) -> Option<AssetStatusVerdict> {
        self.verdicts.lock().unwrap_or_else(PoisonError::into_inner).get(&asset_id).cloned()
    }

    /// Drop any cached verdict so the next resolution queries the signals again.
    pub fn forget(&self, asset_id: u64) {
        self.verdicts.lock().unwrap_or_else(PoisonError::into_inner).remove(&asset_id);
    }

    /// Cached conclusive verdicts are returned without touching the network.
    pub async fn resolve(
        &self,
        asset_id: u64,
        asset_kind: AssetKind,
        cancel: &CancellationToken,
    ) -> Result<AssetStatusVerdict> {
        if let Some(verdict) = self.cached(asset_id) {
            debug!(asset_id, state = %verdict.state, "Returning cached verdict");
            return Ok(verdict);
        }
        let verdict = self.fuse(asset_id, asset_kind, cancel).await?;
        if verdict.is_conclusive() {
            self.verdicts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(asset_id, verdict.clone());
        }
        Ok(verdict)
    }

    pub async fn resolve_fresh(
        &self,
        asset_id: u64,
        asset_kind: AssetKind,
        cancel: &CancellationToken,
    ) -> Result<AssetStatusVerdict> {
        self.forget(asset_id);
        self.resolve(asset_id, asset_kind, cancel).await
    }

    #[instrument(skip(self, cancel))]
    async fn fuse(
        &self,
        asset_id: u64,
        asset_kind: AssetKind,
        cancel: &CancellationToken,
    ) -> Result<AssetStatusVerdict> {
        let target = ProbeTarget {
            asset_id,
            asset_kind,
            credential: &self.credential,
            timeout: self.probe_timeout,
        };
        let mut state = FusionState::new(Utc::now());
        let mut obtained = 0usize;

        let Some((primary, rest)) = self.probes.split_first() else {
            return Err(IngestError::Config("status resolver has no signal probes".into()));
        };

        if let Some(signal) = self.observe(primary.as_ref(), &target, cancel).await? {
            obtained += 1;
            if let Reading::Conclusive(verdict_state) = primary.interpret(&signal, &mut state) {
                return Ok(self.verdict(asset_id, asset_kind, verdict_state, Some(signal.source), &state));
            }
        }

        let applicable: Vec<&Arc<dyn SignalProbe>> = rest.iter().filter(|p| p.applies(&state)).collect();
        let observed = join_all(applicable.iter().map(|p| self.observe(p.as_ref(), &target, cancel))).await;

        for (probe, signal) in applicable.into_iter().zip(observed) {
            let Some(signal) = signal? else { continue };
            obtained += 1;
            if let Reading::Conclusive(verdict_state) = probe.interpret(&signal, &mut state) {
                return Ok(self.verdict(asset_id, asset_kind, verdict_state, Some(signal.source), &state));
            }
        }

        if obtained == 0 {
            warn!(asset_id, "No status signal could be obtained");
            ResolverMetrics::record_unresolvable();
            return Err(IngestError::Unresolvable { asset_id });
        }
        Ok(self.verdict(asset_id, asset_kind, VerdictState::Pending, None, &state))
    }

    /// Run one probe under admission and retry. Failures other than
    /// cancellation come back as `None`.
    async fn observe(
        &self,
        probe: &dyn SignalProbe,
        target: &ProbeTarget<'_>,
        cancel: &CancellationToken,
    ) -> Result<Option<StatusSignal>> {
        let source = probe.source();
        let run = self
            .retry
            .run(STATUS_KEY, Uuid::new_v4(), cancel, move |_| async move { (None, probe.probe(target).await) })
            .await;
        match run.result {
            Ok(signal) => {
                debug!(%source, confidence = ?signal.confidence, indicator = ?signal.raw_indicator, "Signal observed");
                Ok(Some(signal))
            }
            Err(e) if e.kind() == ErrorKind::Cancelled => Err(e),
            Err(e) => {
                let unavailable = IngestError::SignalUnavailable { signal: source, message: e.to_string() };
                debug!(error = %unavailable, "Treating signal as inconclusive");
                ResolverMetrics::record_signal_unavailable(source);
                Ok(None)
            }
        }
    }

    fn verdict(
        &self,
        asset_id: u64,
        asset_kind: AssetKind,
        state: VerdictState,
        decided_by: Option<SignalSource>,
        fusion: &FusionState,
    ) -> AssetStatusVerdict {
        info!(asset_id, %state, decided_by = ?decided_by, "Status resolved");
        ResolverMetrics::record_verdict(state, decided_by);
        AssetStatusVerdict {
            asset_id,
            asset_kind,
            state,
            display_name: fusion.display_name.clone(),
            resolved_at: fusion.now,
            decided_by,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::{Limits, RateLimiter};
    use crate::transport::retry::RetryPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed signal (or failure) and a fixed reading.
    struct FixedProbe {
        source: SignalSource,
        outcome: Option<Reading>,
        calls: AtomicUsize,
    }

    impl FixedProbe {
        fn new(source: SignalSource, outcome: Option<Reading>) -> Arc<Self> {
            Arc::new(Self { source, outcome, calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl SignalProbe for FixedProbe {
        fn source(&self) -> SignalSource {
            self.source
        }

        async fn probe(&self, _target: &ProbeTarget<'_>) -> Result<StatusSignal> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Some(_) => Ok(StatusSignal {
                    source: self.source,
                    raw_indicator: RawIndicator::PageText(PhraseMatch::NoMatch),
                    confidence: Confidence::Weak,
                }),
                None => Err(IngestError::fatal("unreachable", Some(404))),
            }
        }

        fn interpret(&self, _signal: &StatusSignal, _state: &mut FusionState) -> Reading {
            self.outcome.unwrap_or(Reading::Inconclusive)
        }
    }

    fn resolver(probes: Vec<Arc<FixedProbe>>) -> StatusResolver {
        let probes = probes.into_iter().map(|p| p as Arc<dyn SignalProbe>).collect();
        let limiter = Arc::new(RateLimiter::new(Limits::new(1_000, 1_000)));
        let policy = RetryPolicy { max_attempts: 1, ..RetryPolicy::default() };
        StatusResolver::new(probes, RetryController::new(limiter, policy), Credential::new("t"), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn first_conclusive_reading_in_list_order_wins() {
        let primary = FixedProbe::new(SignalSource::PublicReachability, Some(Reading::Inconclusive));
        let catalog = FixedProbe::new(SignalSource::CatalogMetadata, Some(Reading::Conclusive(VerdictState::Declined)));
        let page = FixedProbe::new(SignalSource::DetailPage, Some(Reading::Conclusive(VerdictState::Accepted)));
        let r = resolver(vec![primary, catalog, page]);
        let verdict = r.resolve(7, AssetKind::Image, &CancellationToken::new()).await.unwrap();
        assert_eq!(verdict.state, VerdictState::Declined);
        assert_eq!(verdict.decided_by, Some(SignalSource::CatalogMetadata));
    }

    #[tokio::test]
    async fn inconclusive_signals_default_to_pending() {
        let primary = FixedProbe::new(SignalSource::PublicReachability, None);
        let page = FixedProbe::new(SignalSource::DetailPage, Some(Reading::Inconclusive));
        let r = resolver(vec![primary, page]);
        let verdict = r.resolve(7, AssetKind::Image, &CancellationToken::new()).await.unwrap();
        assert_eq!(verdict.state, VerdictState::Pending);
        assert_eq!(verdict.decided_by, None);
        assert!(r.cached(7).is_none());
    }

    #[tokio::test]
    async fn no_signal_at_all_is_unresolvable() {
        let r = resolver(vec![
            FixedProbe::new(SignalSource::PublicReachability, None),
            FixedProbe::new(SignalSource::CatalogMetadata, None),
        ]);
        let err = r.resolve(9, AssetKind::Audio, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, IngestError::Unresolvable { asset_id: 9 }));
    }

    #[tokio::test]
    async fn conclusive_verdicts_are_cached_until_requeried() {
        let primary = FixedProbe::new(SignalSource::PublicReachability, Some(Reading::Conclusive(VerdictState::Accepted)));
        let r = resolver(vec![primary.clone()]);
        let cancel = CancellationToken::new();
        r.resolve(3, AssetKind::Decal, &cancel).await.unwrap();
        r.resolve(3, AssetKind::Decal, &cancel).await.unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        r.resolve_fresh(3, AssetKind::Decal, &cancel).await.unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancellation_propagates() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let r = resolver(vec![FixedProbe::new(SignalSource::PublicReachability, None)]);
        let err = r.resolve(1, AssetKind::Image, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}

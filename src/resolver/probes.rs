//! Concrete signal probes, in the order the resolver normally holds them.

use crate::app::ports::{HttpClientPort, HttpRequest};
use crate::config::{AuthConfig, Endpoints};
use crate::constants::asset_url;
use crate::error::{IngestError, Result};
use crate::resolver::phrases::{visible_text, PhraseMatch, PhraseMatcher};
use crate::resolver::{
    Confidence, FusionState, ProbeTarget, RawIndicator, Reachability, Reading, SignalProbe, StatusSignal,
};
use crate::transport::classify::{classify_failure, classify_status};
use crate::transport::{AssetTransport, Descriptor, Operation};
use crate::types::{SignalSource, VerdictState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

/// Fetches the asset's delivery URL, either anonymously or as the owner.
pub struct ReachabilityProbe {
    http: Arc<dyn HttpClientPort>,
    url_template: String,
    auth: Option<AuthConfig>,
}

impl ReachabilityProbe {
    pub fn public(http: Arc<dyn HttpClientPort>, endpoints: &Endpoints) -> Self {
        Self { http, url_template: endpoints.delivery_url.clone(), auth: None }
    }

    pub fn authenticated(http: Arc<dyn HttpClientPort>, endpoints: &Endpoints, auth: AuthConfig) -> Self {
        Self { http, url_template: endpoints.delivery_url.clone(), auth: Some(auth) }
    }

    fn reachability(status: u16, body: &str) -> Result<Reachability> {
        match status {
            200..=399 => Ok(Reachability::Reachable),
            404 | 410 => Ok(Reachability::NotFound),
            401 | 403 => Ok(Reachability::Forbidden),
            _ => Err(classify_status(status, body)),
        }
    }
}

#[async_trait]
impl SignalProbe for ReachabilityProbe {
    fn source(&self) -> SignalSource {
        match self.auth {
            None => SignalSource::PublicReachability,
            Some(_) => SignalSource::AuthenticatedReachability,
        }
    }

    /// The owner's view only matters once the public view was refused.
    fn applies(&self, state: &FusionState) -> bool {
        self.auth.is_none() || state.gated
    }

    async fn probe(&self, target: &ProbeTarget<'_>) -> Result<StatusSignal> {
        let mut request = HttpRequest::get(asset_url(&self.url_template, target.asset_id)).timeout(target.timeout);
        if let Some(auth) = &self.auth {
            request = request.header(&auth.header, auth.header_value(target.credential));
        }
        let resp = self.http.send(request).await.map_err(classify_failure)?;
        let reachability = Self::reachability(resp.status, &resp.text())?;
        let confidence = match reachability {
            Reachability::Forbidden => Confidence::Weak,
            _ => Confidence::Strong,
        };
        Ok(StatusSignal {
            source: self.source(),
            raw_indicator: RawIndicator::Reachability(reachability),
            confidence,
        })
    }

    fn interpret(&self, signal: &StatusSignal, state: &mut FusionState) -> Reading {
        let RawIndicator::Reachability(reachability) = &signal.raw_indicator else {
            return Reading::Inconclusive;
        };
        match (self.auth.is_some(), *reachability) {
            (false, Reachability::Reachable) => Reading::Conclusive(VerdictState::Accepted),
            (false, Reachability::NotFound) => Reading::Conclusive(VerdictState::Declined),
            (false, Reachability::Forbidden) => {
                state.gated = true;
                Reading::Inconclusive
            }
            // The owner seeing an asset says nothing about whether it was approved.
            (true, Reachability::Reachable) => {
                state.owner_visible = true;
                Reading::Inconclusive
            }
            (true, Reachability::NotFound) => Reading::Conclusive(VerdictState::Declined),
            (true, Reachability::Forbidden) => Reading::Inconclusive,
        }
    }
}

/// Catalog record fields the resolver cares about. Field names vary between
/// the privileged channel and the public API, hence the aliases.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CatalogDetails {
    #[serde(alias = "Name", alias = "name", alias = "displayName")]
    pub display_name: Option<String>,
    #[serde(alias = "Created", alias = "created", alias = "createdUtc")]
    pub created: Option<DateTime<Utc>>,
    #[serde(alias = "IsForSale", alias = "isForSale")]
    pub is_for_sale: Option<bool>,
    #[serde(alias = "IsPublicDomain", alias = "isPublicDomain")]
    pub is_public_domain: Option<bool>,
    #[serde(alias = "IsModerated", alias = "isModerated")]
    pub is_moderated: Option<bool>,
    #[serde(alias = "IsRestricted", alias = "isRestricted")]
    pub is_restricted: Option<bool>,
    #[serde(alias = "IsDeleted", alias = "isDeleted")]
    pub is_deleted: Option<bool>,
}

impl CatalogDetails {
    pub fn is_taken_down(&self) -> bool {
        [self.is_moderated, self.is_restricted, self.is_deleted]
            .iter()
            .any(|flag| flag.unwrap_or(false))
    }

    pub fn is_publicly_offered(&self) -> bool {
        self.is_for_sale.unwrap_or(false) || self.is_public_domain.unwrap_or(false)
    }
}

/// Looks the asset up in the catalog through the transport layer.
pub struct CatalogProbe {
    transport: Arc<dyn AssetTransport>,
    pending_age_threshold: chrono::Duration,
}

impl CatalogProbe {
    pub fn new(transport: Arc<dyn AssetTransport>, pending_age_threshold: std::time::Duration) -> Self {
        let pending_age_threshold =
            chrono::Duration::from_std(pending_age_threshold).unwrap_or_else(|_| chrono::Duration::seconds(300));
        Self { transport, pending_age_threshold }
    }
}

#[async_trait]
impl SignalProbe for CatalogProbe {
    fn source(&self) -> SignalSource {
        SignalSource::CatalogMetadata
    }

    async fn probe(&self, target: &ProbeTarget<'_>) -> Result<StatusSignal> {
        let descriptor = Descriptor {
            operation: Operation::CheckStatus { asset_id: target.asset_id, asset_kind: target.asset_kind },
            credential: target.credential,
            timeout: target.timeout,
        };
        let success = self.transport.attempt(&descriptor).await.result?;
        let details = match success.data {
            Some(data) => serde_json::from_value::<CatalogDetails>(data)
                .map_err(|e| IngestError::fatal(format!("unreadable catalog record: {}", e), None))?,
            None => CatalogDetails::default(),
        };
        Ok(StatusSignal {
            source: SignalSource::CatalogMetadata,
            raw_indicator: RawIndicator::Catalog(details),
            confidence: Confidence::Weak,
        })
    }

    fn interpret(&self, signal: &StatusSignal, state: &mut FusionState) -> Reading {
        let RawIndicator::Catalog(details) = &signal.raw_indicator else {
            return Reading::Inconclusive;
        };
        if details.display_name.is_some() {
            state.display_name = details.display_name.clone();
        }
        if details.created.is_some() {
            state.created_at = details.created;
        }

        if details.is_taken_down() {
            return Reading::Conclusive(VerdictState::Declined);
        }
        if !state.gated && details.is_publicly_offered() {
            return Reading::Conclusive(VerdictState::Accepted);
        }
        match state.age() {
            Some(age) if age < self.pending_age_threshold => Reading::Conclusive(VerdictState::Pending),
            Some(_) if state.owner_visible => Reading::Conclusive(VerdictState::Declined),
            _ => Reading::Inconclusive,
        }
    }
}

/// Scrapes the public detail page for review/removal wording.
pub struct DetailPageProbe {
    http: Arc<dyn HttpClientPort>,
    url_template: String,
    matcher: PhraseMatcher,
}

impl DetailPageProbe {
    pub fn new(http: Arc<dyn HttpClientPort>, endpoints: &Endpoints, matcher: PhraseMatcher) -> Self {
        Self { http, url_template: endpoints.detail_page_url.clone(), matcher }
    }
}

#[async_trait]
impl SignalProbe for DetailPageProbe {
    fn source(&self) -> SignalSource {
        SignalSource::DetailPage
    }

    async fn probe(&self, target: &ProbeTarget<'_>) -> Result<StatusSignal> {
        let request = HttpRequest::get(asset_url(&self.url_template, target.asset_id)).timeout(target.timeout);
        let resp = self.http.send(request).await.map_err(classify_failure)?;
        let body = resp.text();
        // Removed assets often come back as a 404 page that still says why.
        if !resp.is_success() && !matches!(resp.status, 404 | 410) {
            return Err(classify_status(resp.status, &body));
        }
        let found = self.matcher.classify(&visible_text(&body));
        let confidence = match found {
            PhraseMatch::NoMatch => Confidence::None,
            _ => Confidence::Weak,
        };
        Ok(StatusSignal { source: SignalSource::DetailPage, raw_indicator: RawIndicator::PageText(found), confidence })
    }

    fn interpret(&self, signal: &StatusSignal, _state: &mut FusionState) -> Reading {
        match &signal.raw_indicator {
            RawIndicator::PageText(PhraseMatch::Pending(_)) => Reading::Conclusive(VerdictState::Pending),
            RawIndicator::PageText(PhraseMatch::Declined(_)) => Reading::Conclusive(VerdictState::Declined),
            _ => Reading::Inconclusive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::{HttpFailure, HttpResponse};
    use crate::transport::{TransportOutcome, TransportSuccess};
    use crate::types::{AssetKind, Credential, TransportKind};
    use serde_json::json;
    use std::time::Duration;

    struct FixedHttp(u16, &'static str);

    #[async_trait]
    impl HttpClientPort for FixedHttp {
        async fn send(&self, _request: HttpRequest) -> std::result::Result<HttpResponse, HttpFailure> {
            Ok(HttpResponse { status: self.0, headers: vec![], bytes: self.1.as_bytes().to_vec() })
        }
    }

    struct FixedCatalog(serde_json::Value);

    #[async_trait]
    impl AssetTransport for FixedCatalog {
        fn kind(&self) -> TransportKind {
            TransportKind::Direct
        }

        async fn attempt(&self, _descriptor: &Descriptor<'_>) -> TransportOutcome {
            TransportOutcome {
                transport: TransportKind::Direct,
                result: Ok(TransportSuccess { asset_id: None, data: Some(self.0.clone()) }),
            }
        }
    }

    fn target(credential: &Credential) -> ProbeTarget<'_> {
        ProbeTarget { asset_id: 55, asset_kind: AssetKind::Image, credential, timeout: Duration::from_secs(5) }
    }

    fn catalog_signal(value: serde_json::Value) -> StatusSignal {
        StatusSignal {
            source: SignalSource::CatalogMetadata,
            raw_indicator: RawIndicator::Catalog(serde_json::from_value(value).unwrap()),
            confidence: Confidence::Weak,
        }
    }

    fn catalog_probe() -> CatalogProbe {
        CatalogProbe::new(Arc::new(FixedCatalog(json!({}))), Duration::from_secs(300))
    }

    #[tokio::test]
    async fn forbidden_public_view_marks_gated() {
        let probe = ReachabilityProbe::public(Arc::new(FixedHttp(403, "")), &Endpoints::default());
        let credential = Credential::new("t");
        let signal = probe.probe(&target(&credential)).await.unwrap();
        let mut state = FusionState::new(Utc::now());
        assert_eq!(probe.interpret(&signal, &mut state), Reading::Inconclusive);
        assert!(state.gated);
    }

    #[tokio::test]
    async fn server_errors_are_probe_failures() {
        let probe = ReachabilityProbe::public(Arc::new(FixedHttp(503, "busy")), &Endpoints::default());
        let credential = Credential::new("t");
        let err = probe.probe(&target(&credential)).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn authenticated_probe_only_applies_when_gated() {
        let probe = ReachabilityProbe::authenticated(Arc::new(FixedHttp(200, "")), &Endpoints::default(), AuthConfig::default());
        let mut state = FusionState::new(Utc::now());
        assert!(!probe.applies(&state));
        state.gated = true;
        assert!(probe.applies(&state));
    }

    #[test]
    fn owner_visibility_is_never_acceptance() {
        let probe = ReachabilityProbe::authenticated(Arc::new(FixedHttp(200, "")), &Endpoints::default(), AuthConfig::default());
        let signal = StatusSignal {
            source: SignalSource::AuthenticatedReachability,
            raw_indicator: RawIndicator::Reachability(Reachability::Reachable),
            confidence: Confidence::Strong,
        };
        let mut state = FusionState::new(Utc::now());
        assert_eq!(probe.interpret(&signal, &mut state), Reading::Inconclusive);
        assert!(state.owner_visible);
    }

    #[test]
    fn young_catalog_record_leans_pending() {
        let now = Utc::now();
        let mut state = FusionState::new(now);
        state.gated = true;
        state.owner_visible = true;
        let created = (now - chrono::Duration::seconds(60)).to_rfc3339();
        let reading = catalog_probe().interpret(&catalog_signal(json!({"Name": "Logo", "Created": created})), &mut state);
        assert_eq!(reading, Reading::Conclusive(VerdictState::Pending));
        assert_eq!(state.display_name.as_deref(), Some("Logo"));
    }

    #[test]
    fn old_owner_only_record_is_declined() {
        let now = Utc::now();
        let mut state = FusionState::new(now);
        state.gated = true;
        state.owner_visible = true;
        let created = (now - chrono::Duration::hours(2)).to_rfc3339();
        let reading = catalog_probe().interpret(&catalog_signal(json!({"Created": created})), &mut state);
        assert_eq!(reading, Reading::Conclusive(VerdictState::Declined));
    }

    #[test]
    fn restriction_flag_declines_regardless_of_age() {
        let now = Utc::now();
        let mut state = FusionState::new(now);
        let reading = catalog_probe()
            .interpret(&catalog_signal(json!({"Created": now.to_rfc3339(), "IsModerated": true})), &mut state);
        assert_eq!(reading, Reading::Conclusive(VerdictState::Declined));
    }

    #[test]
    fn public_offer_accepts_only_when_not_gated() {
        let probe = catalog_probe();
        let mut open = FusionState::new(Utc::now());
        let signal = catalog_signal(json!({"IsForSale": true, "IsDeleted": null}));
        assert_eq!(probe.interpret(&signal, &mut open), Reading::Conclusive(VerdictState::Accepted));

        let mut gated = FusionState::new(Utc::now());
        gated.gated = true;
        assert_eq!(probe.interpret(&signal, &mut gated), Reading::Inconclusive);
    }

    #[tokio::test]
    async fn catalog_probe_reads_transport_payload() {
        let probe = CatalogProbe::new(
            Arc::new(FixedCatalog(json!({"displayName": "Hat", "isForSale": false}))),
            Duration::from_secs(300),
        );
        let credential = Credential::new("t");
        let signal = probe.probe(&target(&credential)).await.unwrap();
        match signal.raw_indicator {
            RawIndicator::Catalog(details) => assert_eq!(details.display_name.as_deref(), Some("Hat")),
            other => panic!("unexpected indicator {:?}", other),
        }
    }

    #[tokio::test]
    async fn removed_page_served_as_404_still_reads() {
        let matcher = PhraseMatcher::new(
            &crate::constants::default_pending_phrases(),
            &crate::constants::default_declined_phrases(),
        )
        .unwrap();
        let http = Arc::new(FixedHttp(404, "<html><body><h1>Item not available</h1></body></html>"));
        let probe = DetailPageProbe::new(http, &Endpoints::default(), matcher);
        let credential = Credential::new("t");
        let signal = probe.probe(&target(&credential)).await.unwrap();
        let mut state = FusionState::new(Utc::now());
        assert_eq!(probe.interpret(&signal, &mut state), Reading::Conclusive(VerdictState::Declined));
    }
}

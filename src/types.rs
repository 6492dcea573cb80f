use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of asset being submitted to the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Image,
    Decal,
    Audio,
    Model,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Image => "image",
            AssetKind::Decal => "decal",
            AssetKind::Audio => "audio",
            AssetKind::Model => "model",
        }
    }

    /// Asset type name the upstream upload API expects
    pub fn upstream_name(&self) -> &'static str {
        match self {
            AssetKind::Image => "Image",
            AssetKind::Decal => "Decal",
            AssetKind::Audio => "Audio",
            AssetKind::Model => "Model",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity context an asset is submitted under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerScope {
    Individual,
    Group(u64),
}

impl OwnerScope {
    pub const INDIVIDUAL_SENTINEL: &'static str = "individual";

    pub fn from_group(group_id: Option<u64>) -> Self {
        match group_id {
            Some(id) => OwnerScope::Group(id),
            None => OwnerScope::Individual,
        }
    }

    /// Stable key used to scope duplicate records.
    pub fn normalized(&self) -> String {
        match self {
            OwnerScope::Individual => Self::INDIVIDUAL_SENTINEL.to_string(),
            OwnerScope::Group(id) => format!("group:{}", id),
        }
    }

    pub fn group_id(&self) -> Option<u64> {
        match self {
            OwnerScope::Individual => None,
            OwnerScope::Group(id) => Some(*id),
        }
    }
}

/// Opaque bearer token supplied by the caller. Never persisted or logged.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// A single piece of content to submit. Immutable once created; the content
/// hash is computed once here and travels with the request.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    id: Uuid,
    content_bytes: Vec<u8>,
    content_hash: String,
    display_name: String,
    description: Option<String>,
    asset_kind: AssetKind,
    owner_scope: OwnerScope,
}

impl UploadRequest {
    pub fn new(
        content_bytes: Vec<u8>,
        display_name: impl Into<String>,
        asset_kind: AssetKind,
        owner_scope: OwnerScope,
    ) -> Self {
        let content_hash = crate::dedupe::content_hash(&content_bytes);
        Self {
            id: Uuid::new_v4(),
            content_bytes,
            content_hash,
            display_name: display_name.into(),
            description: None,
            asset_kind,
            owner_scope,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn content_bytes(&self) -> &[u8] {
        &self.content_bytes
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn asset_kind(&self) -> AssetKind {
        self.asset_kind
    }

    pub fn owner_scope(&self) -> OwnerScope {
        self.owner_scope
    }

    pub fn size_bytes(&self) -> usize {
        self.content_bytes.len()
    }
}

/// Which channel carried an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Privileged,
    Direct,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Privileged => f.write_str("privileged"),
            TransportKind::Direct => f.write_str("direct"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
}

/// One iteration of the retry loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadAttempt {
    pub request_id: Uuid,
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub transport_used: Option<TransportKind>,
    pub outcome: AttemptOutcome,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
}

/// Error summary stored on a terminal result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub status: Option<u16>,
}

impl From<&crate::error::IngestError> for IngestFailure {
    fn from(err: &crate::error::IngestError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            status: err.status(),
        }
    }
}

/// Terminal record of a submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionResult {
    pub request_id: Uuid,
    pub content_hash: String,
    pub asset_kind: AssetKind,
    pub owner_scope: OwnerScope,
    pub display_name: String,
    pub asset_id: Option<u64>,
    pub error: Option<IngestFailure>,
    pub attempts: Vec<UploadAttempt>,
    pub duplicate_of: Option<DuplicateRecord>,
    pub completed_at: DateTime<Utc>,
}

impl IngestionResult {
    pub(crate) fn for_request(request: &UploadRequest) -> Self {
        Self {
            request_id: request.id(),
            content_hash: request.content_hash().to_string(),
            asset_kind: request.asset_kind(),
            owner_scope: request.owner_scope(),
            display_name: request.display_name().to_string(),
            asset_id: None,
            error: None,
            attempts: Vec::new(),
            duplicate_of: None,
            completed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.asset_id.is_some() && self.error.is_none()
    }

    pub fn is_duplicate(&self) -> bool {
        self.duplicate_of.is_some()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// A cancelled submission never reached a terminal upstream answer and can
    /// be submitted again with the same request.
    pub fn is_resumable(&self) -> bool {
        matches!(self.error_kind(), Some(ErrorKind::Cancelled))
    }
}

/// Independent external source of moderation evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    PublicReachability,
    AuthenticatedReachability,
    CatalogMetadata,
    DetailPage,
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalSource::PublicReachability => "public_reachability",
            SignalSource::AuthenticatedReachability => "authenticated_reachability",
            SignalSource::CatalogMetadata => "catalog_metadata",
            SignalSource::DetailPage => "detail_page",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictState {
    Pending,
    Accepted,
    Declined,
}

impl VerdictState {
    pub fn is_final(&self) -> bool {
        !matches!(self, VerdictState::Pending)
    }
}

impl fmt::Display for VerdictState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictState::Pending => f.write_str("pending"),
            VerdictState::Accepted => f.write_str("accepted"),
            VerdictState::Declined => f.write_str("declined"),
        }
    }
}

/// Fused moderation verdict for one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetStatusVerdict {
    pub asset_id: u64,
    pub asset_kind: AssetKind,
    pub state: VerdictState,
    /// Taken from the catalog record, so absent when an earlier signal
    /// settled the verdict before the catalog was read.
    pub display_name: Option<String>,
    pub resolved_at: DateTime<Utc>,
    /// Set when a signal decided the verdict; `None` means the default applied.
    pub decided_by: Option<SignalSource>,
}

impl AssetStatusVerdict {
    /// Accepted/declined reached through a deciding signal; stable until re-queried.
    pub fn is_conclusive(&self) -> bool {
        self.state.is_final() && self.decided_by.is_some()
    }
}

/// Remembers which asset a given content hash became under an owner scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateRecord {
    pub content_hash: String,
    pub owner_scope: String,
    pub existing_asset_id: u64,
    pub asset_kind: AssetKind,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateCheckResult {
    pub is_duplicate: bool,
    pub matched_record: Option<DuplicateRecord>,
}

impl DuplicateCheckResult {
    pub fn none() -> Self {
        Self { is_duplicate: false, matched_record: None }
    }

    pub fn matched(record: DuplicateRecord) -> Self {
        Self { is_duplicate: true, matched_record: Some(record) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_scope_normalization() {
        assert_eq!(OwnerScope::from_group(None).normalized(), "individual");
        assert_eq!(OwnerScope::from_group(Some(42)).normalized(), "group:42");
    }

    #[test]
    fn credential_debug_is_redacted() {
        let cred = Credential::new("super-secret-token");
        assert_eq!(format!("{:?}", cred), "Credential(***)");
    }

    #[test]
    fn upload_request_hashes_once_on_creation() {
        let req = UploadRequest::new(b"abc".to_vec(), "Logo", AssetKind::Decal, OwnerScope::Individual);
        assert_eq!(
            req.content_hash(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(req.size_bytes(), 3);
    }
}

use crate::error::Result;
use crate::types::{AssetKind, Credential, OwnerScope};
use async_trait::async_trait;
use std::time::Duration;

/// Opaque key-value document store owned by the host application
#[async_trait]
pub trait PersistencePort: Send + Sync {
    /// Ordered records stored under `list_key`; empty when absent.
    async fn get(&self, list_key: &str) -> Result<Vec<serde_json::Value>>;
    /// Overwrite the list stored under `list_key`.
    async fn put(&self, list_key: &str, records: Vec<serde_json::Value>) -> Result<()>;
}

/// Response shape shared by both privileged calls
#[derive(Clone, Debug, Default)]
pub struct PrivilegedResponse {
    pub success: bool,
    pub asset_id: Option<u64>,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub status: Option<u16>,
}

/// Host-provided channel that can reach the upstream without origin
/// restrictions. Optional; when absent every call goes direct.
#[async_trait]
pub trait PrivilegedTransportPort: Send + Sync {
    async fn upload_asset(
        &self,
        bytes: &[u8],
        name: &str,
        asset_kind: AssetKind,
        credential: &Credential,
        owner_scope: &OwnerScope,
    ) -> PrivilegedResponse;

    async fn check_asset_status(
        &self,
        asset_id: u64,
        asset_kind: AssetKind,
        credential: &Credential,
    ) -> PrivilegedResponse;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Clone, Debug)]
pub struct MultipartPart {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
pub enum HttpBody {
    #[default]
    Empty,
    Bytes { content_type: String, bytes: Vec<u8> },
    Multipart(Vec<MultipartPart>),
}

#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: HttpBody,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: HttpBody::Empty,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self { method: HttpMethod::Post, ..Self::get(url) }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: HttpBody) -> Self {
        self.body = body;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

/// Any status is a response; only transport-level failures are errors.
#[derive(Clone, Debug, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub bytes: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HttpFailure {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Other(String),
}

#[async_trait]
pub trait HttpClientPort: Send + Sync {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, HttpFailure>;
}

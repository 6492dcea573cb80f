use crate::app::ports::{HttpBody, HttpClientPort, HttpRequest, MultipartPart};
use crate::config::{AuthConfig, Endpoints};
use crate::constants::{asset_url, CSRF_HEADER};
use crate::error::{IngestError, Result};
use crate::transport::classify::{classify_failure, classify_status, upload_response};
use crate::transport::{AssetTransport, Descriptor, Operation, TransportOutcome, TransportSuccess};
use crate::types::{AssetKind, Credential, OwnerScope, TransportKind, UploadRequest};
use crate::validation::detect_format;
use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

/// Direct HTTP path to the upstream API
pub struct DirectTransport {
    http: Arc<dyn HttpClientPort>,
    endpoints: Endpoints,
    auth: AuthConfig,
    csrf_token: Mutex<Option<String>>,
}

impl DirectTransport {
    pub fn new(http: Arc<dyn HttpClientPort>, endpoints: Endpoints, auth: AuthConfig) -> Self {
        Self { http, endpoints, auth, csrf_token: Mutex::new(None) }
    }

    fn cached_token(&self) -> Option<String> {
        self.csrf_token.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn store_token(&self, token: Option<String>) {
        *self.csrf_token.lock().unwrap_or_else(PoisonError::into_inner) = token;
    }

    /// Anti-forgery token for state-changing calls. Best effort: any failure
    /// just means the call goes out without one.
    async fn csrf_token(&self, credential: &Credential, timeout: Duration) -> Option<String> {
        if let Some(token) = self.cached_token() {
            return Some(token);
        }
        let request = HttpRequest::post(&self.endpoints.csrf_url)
            .header(&self.auth.header, self.auth.header_value(credential))
            .timeout(timeout);
        match self.http.send(request).await {
            Ok(resp) => {
                let token = resp.header(CSRF_HEADER).map(str::to_string);
                if token.is_none() {
                    debug!(status = resp.status, "No anti-forgery token in response");
                }
                self.store_token(token.clone());
                token
            }
            Err(e) => {
                debug!(error = %e, "Anti-forgery token fetch failed");
                None
            }
        }
    }

    fn upload_form(request: &UploadRequest) -> HttpBody {
        let mut creator = serde_json::Map::new();
        if let OwnerScope::Group(id) = request.owner_scope() {
            creator.insert("groupId".into(), json!(id));
        }
        let meta = json!({
            "assetType": request.asset_kind().upstream_name(),
            "displayName": request.display_name(),
            "description": request.description().unwrap_or_default(),
            "creationContext": { "creator": creator },
        });
        let format = detect_format(request.content_bytes());
        let content_type = format.map(|f| f.mime_type()).unwrap_or("application/octet-stream");
        let file_name = match format {
            Some(f) => format!("{}.{}", request.display_name(), f.extension()),
            None => request.display_name().to_string(),
        };
        HttpBody::Multipart(vec![
            MultipartPart {
                name: "request".into(),
                file_name: None,
                content_type: "application/json".into(),
                bytes: meta.to_string().into_bytes(),
            },
            MultipartPart {
                name: "fileContent".into(),
                file_name: Some(file_name),
                content_type: content_type.into(),
                bytes: request.content_bytes().to_vec(),
            },
        ])
    }

    async fn upload(&self, request: &UploadRequest, credential: &Credential, timeout: Duration) -> Result<TransportSuccess> {
        let token = self.csrf_token(credential, timeout).await;
        let mut http_request = HttpRequest::post(&self.endpoints.upload_url)
            .header(&self.auth.header, self.auth.header_value(credential))
            .body(Self::upload_form(request))
            .timeout(timeout);
        if let Some(token) = &token {
            http_request = http_request.header(CSRF_HEADER, token.as_str());
        }

        let resp = self.http.send(http_request).await.map_err(classify_failure)?;

        // A 403 that hands back a fresh token means ours expired; retry with it.
        if resp.status == 403 {
            if let Some(fresh) = resp.header(CSRF_HEADER) {
                if token.as_deref() != Some(fresh) {
                    self.store_token(Some(fresh.to_string()));
                    return Err(IngestError::retryable("anti-forgery token refreshed", Some(403)));
                }
            }
        }

        let success = upload_response(&resp)?;
        info!(asset_id = ?success.asset_id, kind = %request.asset_kind(), "Upload accepted by upstream");
        Ok(success)
    }

    async fn check(&self, asset_id: u64, asset_kind: AssetKind, credential: &Credential, timeout: Duration) -> Result<TransportSuccess> {
        let request = HttpRequest::get(asset_url(&self.endpoints.catalog_url, asset_id))
            .header(&self.auth.header, self.auth.header_value(credential))
            .timeout(timeout);
        let resp = self.http.send(request).await.map_err(classify_failure)?;
        if !resp.is_success() {
            return Err(classify_status(resp.status, &resp.text()));
        }
        let data: serde_json::Value = serde_json::from_slice(&resp.bytes).map_err(|e| {
            IngestError::retryable(format!("malformed catalog payload for {} {}: {}", asset_kind, asset_id, e), Some(resp.status))
        })?;
        Ok(TransportSuccess { asset_id: Some(asset_id), data: Some(data) })
    }
}

#[async_trait]
impl AssetTransport for DirectTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Direct
    }

    async fn attempt(&self, descriptor: &Descriptor<'_>) -> TransportOutcome {
        let result = match descriptor.operation {
            Operation::Upload(request) => self.upload(request, descriptor.credential, descriptor.timeout).await,
            Operation::CheckStatus { asset_id, asset_kind } => {
                self.check(asset_id, asset_kind, descriptor.credential, descriptor.timeout).await
            }
        };
        TransportOutcome { transport: TransportKind::Direct, result }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::{HttpFailure, HttpMethod, HttpResponse};
    use crate::error::ErrorKind;
    use tokio::sync::Mutex as AsyncMutex;

    /// Replays canned responses and records every request.
    struct ScriptedHttp {
        responses: AsyncMutex<Vec<std::result::Result<HttpResponse, HttpFailure>>>,
        seen: AsyncMutex<Vec<HttpRequest>>,
    }

    impl ScriptedHttp {
        fn new(responses: Vec<std::result::Result<HttpResponse, HttpFailure>>) -> Arc<Self> {
            Arc::new(Self { responses: AsyncMutex::new(responses), seen: AsyncMutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl HttpClientPort for ScriptedHttp {
        async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, HttpFailure> {
            self.seen.lock().await.push(request);
            let mut responses = self.responses.lock().await;
            if responses.is_empty() {
                Err(HttpFailure::Other("no scripted response".into()))
            } else {
                responses.remove(0)
            }
        }
    }

    fn resp(status: u16, headers: &[(&str, &str)], body: &str) -> std::result::Result<HttpResponse, HttpFailure> {
        Ok(HttpResponse {
            status,
            headers: headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            bytes: body.as_bytes().to_vec(),
        })
    }

    fn png_request(scope: OwnerScope) -> UploadRequest {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.resize(32, 1);
        UploadRequest::new(bytes, "Badge", AssetKind::Image, scope)
    }

    #[tokio::test]
    async fn upload_sends_csrf_token_and_parses_id() {
        let http = ScriptedHttp::new(vec![
            resp(403, &[("x-csrf-token", "tok-1")], ""),
            resp(200, &[], r#"{"assetId": 991}"#),
        ]);
        let transport = DirectTransport::new(http.clone(), Endpoints::default(), AuthConfig::default());
        let request = png_request(OwnerScope::Group(12));
        let credential = Credential::new("secret");
        let success = transport.upload(&request, &credential, Duration::from_secs(5)).await.unwrap();
        assert_eq!(success.asset_id, Some(991));

        let seen = http.seen.lock().await;
        assert_eq!(seen.len(), 2);
        let upload = &seen[1];
        assert_eq!(upload.method, HttpMethod::Post);
        assert!(upload.headers.iter().any(|(k, v)| k == "x-csrf-token" && v == "tok-1"));
        assert!(upload.headers.iter().any(|(k, v)| k == "Authorization" && v == "Bearer secret"));
        match &upload.body {
            HttpBody::Multipart(parts) => {
                let meta: serde_json::Value = serde_json::from_slice(&parts[0].bytes).unwrap();
                assert_eq!(meta["creationContext"]["creator"]["groupId"], 12);
                assert_eq!(parts[1].content_type, "image/png");
            }
            other => panic!("expected multipart body, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_token_does_not_block_upload() {
        let http = ScriptedHttp::new(vec![
            Err(HttpFailure::Timeout),
            resp(200, &[], "12345"),
        ]);
        let transport = DirectTransport::new(http.clone(), Endpoints::default(), AuthConfig::default());
        let request = png_request(OwnerScope::Individual);
        let success = transport
            .upload(&request, &Credential::new("x"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(success.asset_id, Some(12345));
        assert!(!http.seen.lock().await[1].has_header("x-csrf-token"));
    }

    #[tokio::test]
    async fn stale_token_is_refreshed_and_retryable() {
        let http = ScriptedHttp::new(vec![
            resp(200, &[("x-csrf-token", "old")], ""),
            resp(403, &[("x-csrf-token", "new")], "Token Validation Failed"),
        ]);
        let transport = DirectTransport::new(http, Endpoints::default(), AuthConfig::default());
        let request = png_request(OwnerScope::Individual);
        let err = transport
            .upload(&request, &Credential::new("x"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Retryable);
        assert_eq!(transport.cached_token().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn check_parses_catalog_json() {
        let http = ScriptedHttp::new(vec![resp(200, &[], r#"{"Name": "Badge"}"#)]);
        let transport = DirectTransport::new(http.clone(), Endpoints::default(), AuthConfig::default());
        let success = transport
            .check(5, AssetKind::Image, &Credential::new("x"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(success.data.unwrap()["Name"], "Badge");
        assert!(http.seen.lock().await[0].url.contains("/5/"));
    }
}

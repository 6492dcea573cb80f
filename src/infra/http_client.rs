use crate::app::ports::{HttpBody, HttpClientPort, HttpFailure, HttpMethod, HttpRequest, HttpResponse};
use crate::constants::USER_AGENT;
use async_trait::async_trait;
use reqwest::header::USER_AGENT as USER_AGENT_HEADER;

/// Direct network collaborator backed by a shared `reqwest::Client`.
/// Non-2xx responses come back as responses so callers can read error bodies.
pub struct ReqwestHttp {
    client: reqwest::Client,
}

impl Default for ReqwestHttp {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestHttp {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build_form(parts: Vec<crate::app::ports::MultipartPart>) -> Result<reqwest::multipart::Form, HttpFailure> {
        let mut form = reqwest::multipart::Form::new();
        for part in parts {
            let mut p = reqwest::multipart::Part::bytes(part.bytes)
                .mime_str(&part.content_type)
                .map_err(|e| HttpFailure::Other(format!("invalid content type '{}': {}", part.content_type, e)))?;
            if let Some(file_name) = part.file_name {
                p = p.file_name(file_name);
            }
            form = form.part(part.name, p);
        }
        Ok(form)
    }
}

fn map_error(e: reqwest::Error) -> HttpFailure {
    if e.is_timeout() {
        HttpFailure::Timeout
    } else if e.is_connect() {
        HttpFailure::Connect(e.to_string())
    } else {
        HttpFailure::Other(e.to_string())
    }
}

#[async_trait]
impl HttpClientPort for ReqwestHttp {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpFailure> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        builder = builder.timeout(request.timeout);
        if !request.has_header("user-agent") {
            builder = builder.header(USER_AGENT_HEADER, USER_AGENT);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.body {
            HttpBody::Empty => builder,
            HttpBody::Bytes { content_type, bytes } => builder
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(bytes),
            HttpBody::Multipart(parts) => builder.multipart(Self::build_form(parts)?),
        };

        tracing::debug!(method = ?request.method, url = %request.url, "HTTP request");
        let resp = builder.send().await.map_err(map_error)?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let bytes = resp.bytes().await.map_err(map_error)?.to_vec();
        tracing::debug!(status, size = bytes.len(), "HTTP response");
        Ok(HttpResponse { status, headers, bytes })
    }
}

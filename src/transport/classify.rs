//! Fatal vs retryable classification at the transport boundary.

use crate::app::ports::{HttpFailure, HttpResponse};
use crate::error::IngestError;
use crate::transport::TransportSuccess;
use serde_json::Value;

/// Body fragments the upstream uses when it refuses content outright.
const FATAL_MARKERS: &[&str] = &[
    "too large",
    "file size",
    "unsupported",
    "invalid file",
    "invalid format",
    "corrupt",
    "could not be decoded",
    "moderat",
    "inappropriate",
    "rejected",
    "not allowed",
];

const MAX_MESSAGE_CHARS: usize = 300;

/// Network-level failures never carry an upstream verdict, so all of them retry.
pub fn classify_failure(failure: HttpFailure) -> IngestError {
    match failure {
        HttpFailure::Timeout => IngestError::retryable("request timed out", None),
        HttpFailure::Connect(msg) => IngestError::retryable(format!("connection failed: {}", msg), None),
        HttpFailure::Other(msg) => IngestError::retryable(msg, None),
    }
}

/// Classify a non-2xx response.
pub fn classify_status(status: u16, body: &str) -> IngestError {
    let message = format!("HTTP {}: {}", status, upstream_message(body));
    match status {
        408 | 425 | 429 => IngestError::retryable(message, Some(status)),
        500..=599 => IngestError::retryable(message, Some(status)),
        401 => IngestError::fatal(format!("credential rejected ({})", message), Some(status)),
        413 => IngestError::fatal(format!("content too large ({})", message), Some(status)),
        415 => IngestError::fatal(format!("unsupported format ({})", message), Some(status)),
        400..=499 => IngestError::fatal(message, Some(status)),
        _ => IngestError::retryable(message, Some(status)),
    }
}

/// Classify an error string from a channel that may not expose a status.
pub fn classify_message(message: &str, status: Option<u16>) -> IngestError {
    if let Some(status) = status {
        if !(200..300).contains(&status) {
            return classify_status(status, message);
        }
    }
    let lower = message.to_lowercase();
    if FATAL_MARKERS.iter().any(|m| lower.contains(m)) {
        IngestError::fatal(truncate(message), status)
    } else {
        IngestError::retryable(truncate(message), status)
    }
}

/// Interpret an upload response: 2xx must carry an asset id.
pub fn upload_response(resp: &HttpResponse) -> Result<TransportSuccess, IngestError> {
    if !resp.is_success() {
        return Err(classify_status(resp.status, &resp.text()));
    }
    match parse_asset_id(&resp.bytes) {
        Some(asset_id) => Ok(TransportSuccess {
            asset_id: Some(asset_id),
            data: serde_json::from_slice(&resp.bytes).ok(),
        }),
        None => Err(IngestError::retryable(
            format!("success response carried no asset id: {}", truncate(&resp.text())),
            Some(resp.status),
        )),
    }
}

/// Accepts a bare numeric body or JSON carrying the id under a known key.
pub fn parse_asset_id(body: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(body).ok()?.trim();
    if let Ok(id) = text.parse::<u64>() {
        return Some(id);
    }
    let json: Value = serde_json::from_str(text).ok()?;
    asset_id_from_json(&json)
}

pub fn asset_id_from_json(json: &Value) -> Option<u64> {
    for key in ["assetId", "AssetId", "asset_id", "id"] {
        if let Some(id) = json.get(key).and_then(as_id) {
            return Some(id);
        }
    }
    json.get("response").and_then(asset_id_from_json)
}

fn as_id(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .filter(|id| *id > 0)
}

/// Best-effort human message from an error body.
pub fn upstream_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        if let Some(msg) = json.get("message").and_then(Value::as_str) {
            return truncate(msg);
        }
        if let Some(msg) = json
            .get("errors")
            .and_then(Value::as_array)
            .and_then(|errs| errs.first())
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
        {
            return truncate(msg);
        }
    }
    truncate(body.trim())
}

fn truncate(s: &str) -> String {
    if s.chars().count() <= MAX_MESSAGE_CHARS {
        s.to_string()
    } else {
        let cut: String = s.chars().take(MAX_MESSAGE_CHARS).collect();
        format!("{}…", cut)
    }
}

use crate::app::ports::{PrivilegedResponse, PrivilegedTransportPort};
use crate::error::{IngestError, Result};
use crate::transport::classify::{asset_id_from_json, classify_message};
use crate::transport::{AssetTransport, Descriptor, Operation, TransportOutcome, TransportSuccess};
use crate::types::TransportKind;
use async_trait::async_trait;
use std::sync::Arc;

/// Calls through the host's privileged channel
pub struct PrivilegedTransport {
    port: Arc<dyn PrivilegedTransportPort>,
}

impl PrivilegedTransport {
    pub fn new(port: Arc<dyn PrivilegedTransportPort>) -> Self {
        Self { port }
    }

    fn interpret(response: PrivilegedResponse, expect_asset_id: bool) -> Result<TransportSuccess> {
        if !response.success {
            let message = response.error.as_deref().unwrap_or("privileged call failed");
            return Err(classify_message(message, response.status));
        }
        let asset_id = response
            .asset_id
            .or_else(|| response.data.as_ref().and_then(asset_id_from_json));
        if expect_asset_id && asset_id.is_none() {
            return Err(IngestError::retryable(
                "privileged upload reported success without an asset id",
                response.status,
            ));
        }
        Ok(TransportSuccess { asset_id, data: response.data })
    }
}

#[async_trait]
impl AssetTransport for PrivilegedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Privileged
    }

    async fn attempt(&self, descriptor: &Descriptor<'_>) -> TransportOutcome {
        let credential = descriptor.credential;
        let result = match descriptor.operation {
            Operation::Upload(request) => {
                let owner_scope = request.owner_scope();
                let call = self.port.upload_asset(
                    request.content_bytes(),
                    request.display_name(),
                    request.asset_kind(),
                    credential,
                    &owner_scope,
                );
                match tokio::time::timeout(descriptor.timeout, call).await {
                    Ok(response) => Self::interpret(response, true),
                    Err(_) => Err(IngestError::retryable("privileged upload timed out", None)),
                }
            }
            Operation::CheckStatus { asset_id, asset_kind } => {
                let call = self.port.check_asset_status(asset_id, asset_kind, credential);
                match tokio::time::timeout(descriptor.timeout, call).await {
                    Ok(response) => Self::interpret(response, false),
                    Err(_) => Err(IngestError::retryable("privileged status check timed out", None)),
                }
            }
        };
        TransportOutcome { transport: TransportKind::Privileged, result }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn success_with_id_in_data_is_accepted() {
        let response = PrivilegedResponse {
            success: true,
            data: Some(json!({"assetId": 31})),
            ..Default::default()
        };
        let success = PrivilegedTransport::interpret(response, true).unwrap();
        assert_eq!(success.asset_id, Some(31));
    }

    #[test]
    fn success_without_id_is_malformed() {
        let response = PrivilegedResponse { success: true, ..Default::default() };
        let err = PrivilegedTransport::interpret(response, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Retryable);
    }

    #[test]
    fn status_checks_do_not_need_an_id() {
        let response = PrivilegedResponse {
            success: true,
            data: Some(json!({"Name": "x"})),
            ..Default::default()
        };
        assert!(PrivilegedTransport::interpret(response, false).is_ok());
    }
}

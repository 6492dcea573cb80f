use crate::error::{IngestError, Result};
use crate::metrics::TransportMetrics;
use crate::rate_limiter::{AdmissionMode, RateLimiter};
use crate::types::{AttemptOutcome, TransportKind, UploadAttempt};
use chrono::Utc;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Backoff after failed attempt `n` is `backoff_unit_ms * 2^n`
    pub backoff_unit_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, backoff_unit_ms: 1_000, max_backoff_ms: 60_000 }
    }
}

impl RetryPolicy {
    pub fn backoff_for(&self, failed_attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(failed_attempt);
        Duration::from_millis(self.backoff_unit_ms.saturating_mul(factor).min(self.max_backoff_ms))
    }
}

/// Outcome of a retried operation plus the attempt history that produced it
#[derive(Debug)]
pub struct RetryRun<T> {
    pub result: Result<T>,
    pub attempts: Vec<UploadAttempt>,
}

/// Runs an operation under rate-limit admission with bounded exponential
/// backoff. Attempts are strictly sequential.
pub struct RetryController {
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    mode: AdmissionMode,
}

impl RetryController {
    pub fn new(limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self { limiter, policy, mode: AdmissionMode::Throttle }
    }

    pub fn with_mode(mut self, mode: AdmissionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn admit(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        match self.mode {
            AdmissionMode::FailFast => self.limiter.try_admit(key),
            AdmissionMode::Throttle => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(IngestError::Cancelled),
                    _ = self.limiter.await_admission(key) => Ok(()),
                }
            }
        }
    }

    /// `op` receives the 1-based attempt number and reports which transport
    /// carried the attempt alongside its result.
    pub async fn run<T, F, Fut>(
        &self,
        key: &str,
        request_id: Uuid,
        cancel: &CancellationToken,
        mut op: F,
    ) -> RetryRun<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = (Option<TransportKind>, Result<T>)>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempts = Vec::new();
        let mut attempt_number = 0;

        loop {
            attempt_number += 1;
            if let Err(e) = self.admit(key, cancel).await {
                return RetryRun { result: Err(e), attempts };
            }

            let started_at = Utc::now();
            let (transport_used, result) = tokio::select! {
                biased;
                _ = cancel.cancelled() => (None, Err(IngestError::Cancelled)),
                out = op(attempt_number) => out,
            };

            let err = match result {
                Ok(value) => {
                    TransportMetrics::record_attempt(key, transport_used, true);
                    attempts.push(UploadAttempt {
                        request_id,
                        attempt_number,
                        started_at,
                        transport_used,
                        outcome: AttemptOutcome::Succeeded,
                        error_kind: None,
                        error_message: None,
                    });
                    return RetryRun { result: Ok(value), attempts };
                }
                Err(err) => err,
            };

            TransportMetrics::record_attempt(key, transport_used, false);
            attempts.push(UploadAttempt {
                request_id,
                attempt_number,
                started_at,
                transport_used,
                outcome: AttemptOutcome::Failed,
                error_kind: Some(err.kind()),
                error_message: Some(err.to_string()),
            });

            if !err.is_retryable() {
                debug!(key, attempt_number, error = %err, "Attempt failed without retry");
                return RetryRun { result: Err(err), attempts };
            }
            if attempt_number >= max_attempts {
                warn!(key, attempt_number, error = %err, "Retry budget exhausted");
                return RetryRun {
                    result: Err(IngestError::RetriesExhausted { attempts: attempt_number, last: Box::new(err) }),
                    attempts,
                };
            }

            let delay = self.policy.backoff_for(attempt_number);
            warn!(key, attempt_number, delay_ms = delay.as_millis() as u64, error = %err, "Attempt failed, backing off");
            TransportMetrics::record_backoff(delay.as_secs_f64());
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return RetryRun { result: Err(IngestError::Cancelled), attempts };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

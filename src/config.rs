use crate::error::{IngestError, Result};
use crate::rate_limiter::{AdmissionMode, Limits, RateLimiter};
use crate::transport::retry::RetryPolicy;
use crate::transport::TimeoutPolicy;
use crate::types::Credential;
use crate::validation::ValidationRules;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "ingest.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoints: Endpoints,
    pub auth: AuthConfig,
    pub rate_limits: RateLimitConfig,
    pub retry: RetryPolicy,
    pub probe_retry: RetryPolicy,
    pub timeouts: TimeoutPolicy,
    pub resolver: ResolverConfig,
    pub validation: ValidationRules,
    pub storage: StorageConfig,
}

/// Upstream URLs. Per-asset URLs carry an `{id}` placeholder.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub upload_url: String,
    pub csrf_url: String,
    pub delivery_url: String,
    pub catalog_url: String,
    pub detail_page_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            upload_url: "https://apis.catalog.local/assets/v1/assets".to_string(),
            csrf_url: "https://auth.catalog.local/v2/logout".to_string(),
            delivery_url: "https://delivery.catalog.local/v1/asset/?id={id}".to_string(),
            catalog_url: "https://economy.catalog.local/v2/assets/{id}/details".to_string(),
            detail_page_url: "https://www.catalog.local/library/{id}".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Environment variable holding the bearer token
    pub credential_env: String,
    pub header: String,
    pub scheme: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            credential_env: "ASSET_INGEST_CREDENTIAL".to_string(),
            header: "Authorization".to_string(),
            scheme: "Bearer".to_string(),
        }
    }
}

impl AuthConfig {
    pub fn header_value(&self, credential: &Credential) -> String {
        if self.scheme.is_empty() {
            credential.expose().to_string()
        } else {
            format!("{} {}", self.scheme, credential.expose())
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub mode: AdmissionMode,
    pub default: Limits,
    /// Configured keys are laid over the built-in upload and status limits.
    #[serde(deserialize_with = "keys_over_defaults")]
    pub keys: HashMap<String, Limits>,
}

fn default_keys() -> HashMap<String, Limits> {
    let mut keys = HashMap::new();
    keys.insert(
        crate::constants::UPLOAD_KEY.to_string(),
        Limits::new(5, 60_000).with_min_delay(1_000),
    );
    keys.insert(
        crate::constants::STATUS_KEY.to_string(),
        Limits::new(30, 60_000).with_min_delay(200),
    );
    keys
}

fn keys_over_defaults<'de, D>(deserializer: D) -> std::result::Result<HashMap<String, Limits>, D::Error>
where
    D: Deserializer<'de>,
{
    let configured = HashMap::<String, Limits>::deserialize(deserializer)?;
    let mut keys = default_keys();
    keys.extend(configured);
    Ok(keys)
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { mode: AdmissionMode::Throttle, default: Limits::default(), keys: default_keys() }
    }
}

impl RateLimitConfig {
    pub fn build(&self) -> RateLimiter {
        self.keys
            .iter()
            .fold(RateLimiter::new(self.default.clone()), |limiter, (key, limits)| {
                limiter.with_key_limits(key.clone(), limits.clone())
            })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Assets younger than this lean pending rather than declined
    pub pending_age_threshold_secs: u64,
    pub pending_phrases: Vec<String>,
    pub declined_phrases: Vec<String>,
    pub probe_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub max_polls: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            pending_age_threshold_secs: 300,
            pending_phrases: crate::constants::default_pending_phrases(),
            declined_phrases: crate::constants::default_declined_phrases(),
            probe_timeout_secs: 20,
            poll_interval_secs: 30,
            max_polls: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub state_dir: PathBuf,
    /// Successful results kept in the history list
    pub history_limit: usize,
    pub log_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { state_dir: PathBuf::from("state"), history_limit: 500, log_dir: PathBuf::from("logs") }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            auth: AuthConfig::default(),
            rate_limits: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            probe_retry: RetryPolicy::default(),
            timeouts: TimeoutPolicy::default(),
            resolver: ResolverConfig::default(),
            validation: ValidationRules::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else `ingest.toml` when present, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 || self.probe_retry.max_attempts == 0 {
            return Err(IngestError::Config("max_attempts must be at least 1".into()));
        }
        for (key, limits) in std::iter::once(("default", &self.rate_limits.default))
            .chain(self.rate_limits.keys.iter().map(|(k, v)| (k.as_str(), v)))
        {
            if limits.max_requests == 0 || limits.window_ms == 0 {
                return Err(IngestError::Config(format!(
                    "rate limit '{}' needs max_requests and window_ms above zero",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Read the credential from the configured environment variable.
    pub fn credential(&self) -> Result<Credential> {
        let raw = std::env::var(&self.auth.credential_env).map_err(|_| {
            IngestError::Config(format!(
                "credential environment variable '{}' is not set",
                self.auth.credential_env
            ))
        })?;
        let credential = Credential::new(raw);
        if credential.is_empty() {
            return Err(IngestError::Config(format!(
                "credential environment variable '{}' is empty",
                self.auth.credential_env
            )));
        }
        Ok(credential)
    }
}

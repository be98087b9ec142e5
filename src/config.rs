//! Configuration for the provider client, network RPC, polling, and mirror
//!
//! Every section has serde defaults, so a partial JSON file or a handful of
//! `A3S_AGENTBUS_*` environment variables is enough to get started.

use crate::error::{AgentBusError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "A3S_AGENTBUS_";

/// A string that redacts its value in Debug and Display output
///
/// Keeps the provider secret out of logs and error messages.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Access the secret value (only for outbound headers)
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentBusConfig {
    pub provider: ProviderConfig,
    pub network: NetworkConfig,
    pub polling: PollingConfig,
    pub mirror: MirrorConfig,
    pub session: SessionConfig,
}

/// External AI/transaction provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// Base URL; `/chat`, `/execute`, and `/status/{id}` are appended
    pub base_url: String,

    /// Secret sent in the `x-secret-key` header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<SecretString>,

    /// Per-request timeout; outbound calls are never unbounded
    pub request_timeout_secs: u64,

    /// Chains sent in the request context when a task names none
    pub chain_ids: Vec<u64>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nebula-api.thirdweb.com".to_string(),
            secret_key: None,
            request_timeout_secs: 60,
            chain_ids: vec![1],
        }
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Check credentials and limits
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(AgentBusError::Config(
                "Provider base URL is not configured".to_string(),
            ));
        }
        if self.secret_key.as_ref().map_or(true, SecretString::is_empty) {
            return Err(AgentBusError::Config(
                "Provider secret key is not configured".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(AgentBusError::Config(
                "Provider request timeout must be > 0".to_string(),
            ));
        }
        if self.chain_ids.is_empty() {
            return Err(AgentBusError::Config(
                "At least one provider chain id is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Network JSON-RPC endpoints used for session-key submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkConfig {
    /// chain id → RPC URL
    pub rpc_urls: HashMap<u64, String>,

    pub request_timeout_secs: u64,

    /// Tip added on top of `eth_gasPrice` when the action carries no fee
    pub priority_fee_wei: u64,

    /// Gas limit used when estimation fails and the action carries none
    pub fallback_gas_limit: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_urls: HashMap::new(),
            request_timeout_secs: 20,
            priority_fee_wei: 1_000_000_000,
            fallback_gas_limit: 300_000,
        }
    }
}

impl NetworkConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Status polling for provider requests that return only a correlation id
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollingConfig {
    pub interval_ms: u64,

    /// Hard wall-clock ceiling for the whole polling loop
    pub max_duration_ms: u64,

    /// Optional cap on status calls within the ceiling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3_000,
            max_duration_ms: 60_000,
            max_attempts: None,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }
}

/// Write-behind mirror to durable storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MirrorConfig {
    /// Attempts per record write before dead-lettering (>= 1)
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 200,
            max_delay_ms: 10_000,
        }
    }
}

impl MirrorConfig {
    /// Exponential backoff `base * 2^attempt`, capped at `max_delay_ms`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp_delay = self.base_delay_ms.saturating_mul(1u64 << attempt.min(10));
        Duration::from_millis(exp_delay.min(self.max_delay_ms))
    }
}

/// Session key defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub default_duration_hours: u32,
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_duration_hours: 24,
            sweep_interval_secs: 300,
        }
    }
}

impl SessionConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl AgentBusConfig {
    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            AgentBusError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        serde_json::from_str(&json).map_err(|e| {
            AgentBusError::Config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Load from `A3S_AGENTBUS_*` environment variables over defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (environment-shaped)
    ///
    /// Recognized keys, all prefixed with `A3S_AGENTBUS_`: `PROVIDER_URL`,
    /// `SECRET_KEY`, `REQUEST_TIMEOUT_SECS`, `CHAIN_IDS` (comma list),
    /// `RPC_URLS` (`chain=url` comma list), `POLL_INTERVAL_MS`,
    /// `POLL_MAX_DURATION_MS`, `POLL_MAX_ATTEMPTS`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let mut config = Self::default();

        if let Some(url) = get("PROVIDER_URL") {
            config.provider.base_url = url;
        }
        if let Some(secret) = get("SECRET_KEY") {
            config.provider.secret_key = Some(SecretString::new(secret));
        }
        if let Some(raw) = get("REQUEST_TIMEOUT_SECS") {
            config.provider.request_timeout_secs = parse_number(&raw, "REQUEST_TIMEOUT_SECS")?;
        }
        if let Some(raw) = get("CHAIN_IDS") {
            config.provider.chain_ids = raw
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| parse_number(s, "CHAIN_IDS"))
                .collect::<Result<_>>()?;
        }
        if let Some(raw) = get("RPC_URLS") {
            for pair in raw.split(',').filter(|s| !s.trim().is_empty()) {
                let (chain, url) = pair.split_once('=').ok_or_else(|| {
                    AgentBusError::Config(format!("RPC_URLS entry '{}' must be chain=url", pair))
                })?;
                config
                    .network
                    .rpc_urls
                    .insert(parse_number(chain, "RPC_URLS")?, url.trim().to_string());
            }
        }
        if let Some(raw) = get("POLL_INTERVAL_MS") {
            config.polling.interval_ms = parse_number(&raw, "POLL_INTERVAL_MS")?;
        }
        if let Some(raw) = get("POLL_MAX_DURATION_MS") {
            config.polling.max_duration_ms = parse_number(&raw, "POLL_MAX_DURATION_MS")?;
        }
        if let Some(raw) = get("POLL_MAX_ATTEMPTS") {
            config.polling.max_attempts = Some(parse_number(&raw, "POLL_MAX_ATTEMPTS")?);
        }

        Ok(config)
    }

    /// Validate everything except provider credentials
    ///
    /// Missing credentials are not fatal at startup: agents built from such a
    /// config answer every request with an error envelope instead.
    pub fn validate(&self) -> Result<()> {
        if self.polling.interval_ms == 0 {
            return Err(AgentBusError::Config(
                "Polling interval must be > 0".to_string(),
            ));
        }
        if self.polling.max_duration_ms < self.polling.interval_ms {
            return Err(AgentBusError::Config(
                "Polling max duration must be >= polling interval".to_string(),
            ));
        }
        if self.mirror.max_attempts == 0 {
            return Err(AgentBusError::Config(
                "Mirror max attempts must be >= 1".to_string(),
            ));
        }
        if self.session.sweep_interval_secs == 0 {
            return Err(AgentBusError::Config(
                "Session sweep interval must be > 0".to_string(),
            ));
        }
        if self.network.request_timeout_secs == 0 {
            return Err(AgentBusError::Config(
                "Network request timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(raw: &str, key: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e| {
        AgentBusError::Config(format!("{}{} = '{}': {}", ENV_PREFIX, key, raw, e))
    })
}

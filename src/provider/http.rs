//! HTTP client for the hosted transaction provider

use super::response::{parse_provider_response, parse_status_response};
use super::{PollStatus, ProviderOutcome, ProviderRequest, TransactionProvider};
use crate::config::{ProviderConfig, SecretString};
use crate::error::{AgentBusError, Result};
use async_trait::async_trait;
use serde_json::Value;

const SECRET_KEY_HEADER: &str = "x-secret-key";

/// Longest slice of an error body kept in error messages
const MAX_ERROR_BODY: usize = 512;

/// Provider client speaking JSON over HTTPS
pub struct HttpTransactionProvider {
    base_url: String,
    secret_key: SecretString,
    client: reqwest::Client,
}

impl HttpTransactionProvider {
    /// Build a client, failing fast when credentials are missing
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        config.validate()?;
        let secret_key = config
            .secret_key
            .clone()
            .ok_or_else(|| AgentBusError::Config("Provider secret key is not configured".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path);
        tracing::debug!(url = %url, "Provider request");

        let response = self
            .client
            .post(&url)
            .header(SECRET_KEY_HEADER, self.secret_key.expose())
            .json(body)
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path);
        tracing::debug!(url = %url, "Provider status request");

        let response = self
            .client
            .get(&url)
            .header(SECRET_KEY_HEADER, self.secret_key.expose())
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn read_json(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let mut reason = text.trim().to_string();
            if reason.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !reason.is_char_boundary(cut) {
                    cut -= 1;
                }
                reason.truncate(cut);
            }
            if reason.is_empty() {
                reason = status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string();
            }
            return Err(AgentBusError::Provider {
                status: Some(status.as_u16()),
                reason,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Ok(value),
            Err(_) => Ok(Value::String(text)),
        }
    }
}

#[async_trait]
impl TransactionProvider for HttpTransactionProvider {
    async fn chat(&self, request: &ProviderRequest) -> Result<ProviderOutcome> {
        let body = self.post("chat", &request.to_body()).await?;
        Ok(parse_provider_response(&body))
    }

    async fn execute(&self, request: &ProviderRequest) -> Result<ProviderOutcome> {
        let body = self.post("execute", &request.to_body()).await?;
        let outcome = parse_provider_response(&body);
        tracing::debug!(outcome = outcome.label(), "Provider execute answered");
        Ok(outcome)
    }

    async fn transaction_status(&self, request_id: &str) -> Result<PollStatus> {
        let body = self.get(&format!("status/{}", request_id)).await?;
        Ok(parse_status_response(&body))
    }

    fn name(&self) -> &str {
        "nebula"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(secret: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            base_url: "http://127.0.0.1:1/".to_string(),
            secret_key: secret.map(SecretString::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_secret_fails_fast() {
        let err = HttpTransactionProvider::from_config(&config(None))
            .err()
            .unwrap();
        assert!(matches!(err, AgentBusError::Config(_)));
        assert!(HttpTransactionProvider::from_config(&config(Some("  "))).is_err());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let provider = HttpTransactionProvider::from_config(&config(Some("sk"))).unwrap();
        assert_eq!(provider.base_url(), "http://127.0.0.1:1");
        assert_eq!(provider.name(), "nebula");
    }
}

//! Normalization of transaction provider responses
//!
//! Providers are inconsistent about field names (`transaction_hash`, `txHash`,
//! `hash`; `message`, `content`, `response`) and about whether an action's
//! `data` is an object or a JSON-encoded string. Everything tolerant of that
//! lives here; the rest of the crate only sees `ProviderOutcome`.

use crate::error::{AgentBusError, Result};
use crate::provider::PollStatus;
use crate::types::UnsignedTransaction;
use serde_json::{Map, Value};

const HASH_FIELDS: &[&str] = &["transaction_hash", "transactionHash", "txHash", "hash"];
const TEXT_FIELDS: &[&str] = &["message", "content", "response"];
const SESSION_FIELDS: &[&str] = &["session_id", "sessionId"];
const REQUEST_FIELDS: &[&str] = &["request_id", "requestId"];
const FAILED_STATUSES: &[&str] = &["failed", "error", "reverted", "rejected"];

/// Normalized provider answer
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOutcome {
    /// The provider broadcast the transaction itself
    Hash(String),
    /// The provider prepared transactions for someone else to sign
    Actions {
        actions: Vec<ProviderAction>,
        session_id: Option<String>,
        request_id: Option<String>,
    },
    /// Only a correlation id came back; the result must be polled
    Pending {
        request_id: String,
        session_id: Option<String>,
    },
    /// Free-text answer
    Text(String),
    /// Explicit error or an unusable body
    Error(String),
}

impl ProviderOutcome {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Actions { session_id, .. } | Self::Pending { session_id, .. } => {
                session_id.as_deref()
            }
            _ => None,
        }
    }

    /// Short label used in logs and reasoning traces
    pub fn label(&self) -> &'static str {
        match self {
            Self::Hash(_) => "hash",
            Self::Actions { .. } => "actions",
            Self::Pending { .. } => "pending",
            Self::Text(_) => "text",
            Self::Error(_) => "error",
        }
    }
}

/// One action descriptor returned by the provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderAction {
    /// Action type, e.g. `sign_transaction`
    pub kind: String,
    /// Raw descriptor payload, already decoded if it arrived as a string
    pub data: Value,
}

impl ProviderAction {
    /// Turn the descriptor into a transaction, using `default_chain_id` when
    /// the action does not name one
    pub fn to_unsigned(&self, default_chain_id: u64) -> Result<UnsignedTransaction> {
        let data = self.data.as_object().ok_or_else(|| {
            AgentBusError::provider(format!("action '{}' carries no transaction object", self.kind))
        })?;

        let to = string_field(data, &["to"])
            .ok_or_else(|| AgentBusError::provider(format!("action '{}' has no recipient", self.kind)))?;

        let chain_id = match first_field(data, &["chainId", "chain_id"]) {
            Some(value) => quantity_u64(value).ok_or_else(|| {
                AgentBusError::provider(format!("action '{}' has an invalid chain id", self.kind))
            })?,
            None => default_chain_id,
        };

        Ok(UnsignedTransaction {
            to,
            value: first_field(data, &["value"])
                .and_then(quantity_string)
                .unwrap_or_else(|| "0".to_string()),
            data: string_field(data, &["data", "input"]).unwrap_or_else(|| "0x".to_string()),
            gas: first_field(data, &["gas", "gasLimit", "gas_limit"]).and_then(quantity_string),
            chain_id,
            from: string_field(data, &["from"]),
            nonce: first_field(data, &["nonce"]).and_then(quantity_u64),
            max_fee_per_gas: first_field(data, &["maxFeePerGas", "max_fee_per_gas"])
                .and_then(quantity_string),
            max_priority_fee_per_gas: first_field(
                data,
                &["maxPriorityFeePerGas", "max_priority_fee_per_gas"],
            )
            .and_then(quantity_string),
        })
    }
}

/// Classify a provider response body
///
/// Precedence: explicit error, hash, non-empty actions, text, correlation id.
/// A body with both text and a request id is treated as text.
pub fn parse_provider_response(body: &Value) -> ProviderOutcome {
    let Some(obj) = body.as_object() else {
        return match body.as_str() {
            Some(text) if !text.trim().is_empty() => ProviderOutcome::Text(text.to_string()),
            _ => ProviderOutcome::Error(format!("unexpected provider response: {}", body)),
        };
    };

    if let Some(reason) = error_reason(obj) {
        return ProviderOutcome::Error(reason);
    }

    if let Some(hash) = string_field(obj, HASH_FIELDS) {
        return ProviderOutcome::Hash(hash);
    }

    let session_id = string_field(obj, SESSION_FIELDS);
    let request_id = string_field(obj, REQUEST_FIELDS);

    let actions = parse_actions(obj);
    if !actions.is_empty() {
        return ProviderOutcome::Actions {
            actions,
            session_id,
            request_id,
        };
    }

    if let Some(text) = string_field(obj, TEXT_FIELDS) {
        return ProviderOutcome::Text(text);
    }

    match request_id {
        Some(request_id) => ProviderOutcome::Pending {
            request_id,
            session_id,
        },
        None => ProviderOutcome::Error("provider response had no hash, actions, text or request id".to_string()),
    }
}

/// Classify a status-lookup body
pub fn parse_status_response(body: &Value) -> PollStatus {
    let Some(obj) = body.as_object() else {
        return PollStatus::Pending;
    };

    if let Some(reason) = error_reason(obj) {
        return PollStatus::Failed(reason);
    }
    if let Some(hash) = string_field(obj, HASH_FIELDS) {
        return PollStatus::Confirmed(hash);
    }
    match obj.get("status").and_then(Value::as_str) {
        Some(status) if FAILED_STATUSES.contains(&status.to_ascii_lowercase().as_str()) => {
            let reason = string_field(obj, &["reason", "message"])
                .unwrap_or_else(|| format!("provider reported status '{}'", status));
            PollStatus::Failed(reason)
        }
        _ => PollStatus::Pending,
    }
}

fn parse_actions(obj: &Map<String, Value>) -> Vec<ProviderAction> {
    let Some(items) = obj.get("actions").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let item = item.as_object()?;
            let kind = string_field(item, &["type", "kind"]).unwrap_or_else(|| "unknown".to_string());
            let data = match item.get("data") {
                Some(Value::String(raw)) => {
                    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
                }
                Some(value) => value.clone(),
                // Some providers inline the transaction fields on the action itself
                None => Value::Object(item.clone()),
            };
            Some(ProviderAction { kind, data })
        })
        .collect()
}

fn error_reason(obj: &Map<String, Value>) -> Option<String> {
    match obj.get("error")? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(inner) => Some(
            string_field(inner, &["message", "reason"]).unwrap_or_else(|| Value::Object(inner.clone()).to_string()),
        ),
        other => Some(other.to_string()),
    }
}

fn first_field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| obj.get(*name))
        .find(|value| !value.is_null())
}

fn string_field(obj: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| obj.get(*name).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn quantity_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn quantity_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => crate::evm::parse_u64_quantity(s, "quantity").ok(),
        _ => None,
    }
}

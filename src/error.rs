//! Error types for a3s-agentbus

use thiserror::Error;

/// Errors that can occur on the bus, in agents, or in the transaction lifecycle
#[derive(Debug, Error)]
pub enum AgentBusError {
    /// Missing or invalid configuration (credentials, URLs, chain ids)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider answered with a non-success status or an unusable body
    #[error("Provider error{}: {reason}", status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    Provider {
        status: Option<u16>,
        reason: String,
    },

    /// Outbound HTTP transport failure (connect, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record, session, or subscription not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Status change that would move a record backwards or out of a terminal state
    #[error("Invalid transition for transaction '{id}': {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    /// Confirmation with a hash that differs from the one already recorded
    #[error("Transaction '{id}' already confirmed with hash {existing_hash}")]
    AlreadyConfirmed {
        id: String,
        existing_hash: String,
    },

    /// Building or signing a transaction with a session key failed
    #[error("Signing error: {0}")]
    Signing(String),

    /// Network JSON-RPC rejected a call
    #[error("Network RPC error for {method}: {reason}")]
    Rpc {
        method: String,
        reason: String,
    },

    /// Durable store read/write failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Bus subscription management failure
    #[error("Failed to subscribe to topic '{topic}': {reason}")]
    Subscribe {
        topic: String,
        reason: String,
    },
}

impl AgentBusError {
    /// Shorthand for a provider error without an HTTP status
    pub fn provider(reason: impl Into<String>) -> Self {
        Self::Provider {
            status: None,
            reason: reason.into(),
        }
    }
}

/// Result type alias for agent bus operations
pub type Result<T> = std::result::Result<T, AgentBusError>;

//! Transaction provider trait: the external AI/transaction API
//!
//! The provider is a black box that answers a natural-language request with a
//! transaction hash, a list of actions to sign, a correlation id to poll, or
//! text. `HttpTransactionProvider` talks to the real service; tests plug in
//! scripted implementations.

use crate::error::{AgentBusError, Result};
use crate::types::UnsignedTransaction;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

pub mod http;
pub mod response;

pub use http::HttpTransactionProvider;
pub use response::{parse_provider_response, parse_status_response, ProviderAction, ProviderOutcome};

/// Result of one status lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Confirmed(String),
    Failed(String),
    Pending,
}

/// Request sent to the provider's `chat` or `execute` endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub message: String,
    /// User wallet the operation acts for
    pub from: Option<String>,
    pub chain_ids: Vec<u64>,
    /// Let the provider sign and broadcast with its own key
    pub auto_execute: bool,
    /// Address of a session key the provider may delegate to
    pub signer: Option<String>,
    /// Provider conversation to continue
    pub session_id: Option<String>,
}

impl ProviderRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            from: None,
            chain_ids: Vec::new(),
            auto_execute: false,
            signer: None,
            session_id: None,
        }
    }

    pub fn with_from(mut self, wallet: impl Into<String>) -> Self {
        self.from = Some(wallet.into());
        self
    }

    pub fn with_chain_ids(mut self, chain_ids: Vec<u64>) -> Self {
        self.chain_ids = chain_ids;
        self
    }

    pub fn with_auto_execute(mut self, auto_execute: bool) -> Self {
        self.auto_execute = auto_execute;
        self
    }

    pub fn with_signer(mut self, signer: impl Into<String>) -> Self {
        self.signer = Some(signer.into());
        self
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    /// Chain used when an action names none
    pub fn default_chain_id(&self) -> u64 {
        self.chain_ids.first().copied().unwrap_or(1)
    }

    /// Same request, asking only for transaction data with no broadcast
    pub fn prepare_only(&self) -> Self {
        let mut prepared = self.clone();
        prepared.auto_execute = false;
        prepared.message = format!(
            "Prepare the transaction data only, do not execute it: {}",
            self.message
        );
        prepared
    }

    /// JSON body in the provider's wire format
    pub fn to_body(&self) -> Value {
        let mut context = Map::new();
        if let Some(from) = &self.from {
            context.insert("from".to_string(), json!(from));
        }
        context.insert("chain_ids".to_string(), json!(self.chain_ids));
        context.insert(
            "auto_execute_transactions".to_string(),
            json!(self.auto_execute),
        );
        if let Some(signer) = &self.signer {
            context.insert("signer".to_string(), json!(signer));
        }

        let mut body = json!({
            "message": self.message,
            "context": context,
            "stream": false,
        });
        if let Some(session_id) = &self.session_id {
            body["session_id"] = json!(session_id);
        }
        body
    }
}

/// External AI/transaction API
#[async_trait]
pub trait TransactionProvider: Send + Sync {
    /// Single-shot conversational call, never broadcasts
    async fn chat(&self, request: &ProviderRequest) -> Result<ProviderOutcome>;

    /// Execution call; broadcasts when `auto_execute` is set
    async fn execute(&self, request: &ProviderRequest) -> Result<ProviderOutcome>;

    /// Look up a request previously answered with only a correlation id
    async fn transaction_status(&self, request_id: &str) -> Result<PollStatus>;

    /// Ask for structured, unsigned transaction data
    ///
    /// Default implementation re-issues the request through `execute` with
    /// auto-execution off and takes the first returned action.
    async fn prepare_transaction(&self, request: &ProviderRequest) -> Result<UnsignedTransaction> {
        let prepared = request.prepare_only();
        match self.execute(&prepared).await? {
            ProviderOutcome::Actions { actions, .. } => actions
                .first()
                .ok_or_else(|| AgentBusError::provider("provider returned no actions"))?
                .to_unsigned(request.default_chain_id()),
            ProviderOutcome::Error(reason) => Err(AgentBusError::provider(reason)),
            other => Err(AgentBusError::provider(format!(
                "expected transaction data, provider returned {}",
                other.label()
            ))),
        }
    }

    /// Provider name (e.g., "nebula", "scripted")
    fn name(&self) -> &str;
}

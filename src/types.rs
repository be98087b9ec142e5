//! Core message types for the a3s-agentbus system
//!
//! All wire types use camelCase JSON serialization. An envelope travels as
//! `{id, type, timestamp, senderId, targetId, payload}`; the `type` string
//! selects the typed payload variant of [`Message`].

use crate::lifecycle::TransactionStatus;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known topic strings
pub mod topics {
    pub const EXECUTE_TASK: &str = "execute_task";
    pub const NEBULA_REQUEST: &str = "nebula_request";
    pub const AGENT_RESPONSE: &str = "agent_response";
    pub const TASK_STEP_COMPLETE: &str = "task_step_complete";
    pub const ERROR_RESPONSE: &str = "error_response";
    pub const CONFIRM_TRANSACTION: &str = "confirm_transaction";
}

/// A single message on the bus
///
/// The bus delivers by topic (derived from `message`), never by address;
/// `target_id` is advisory routing information for consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireEnvelope", try_from = "WireEnvelope")]
pub struct Envelope {
    /// Unique envelope identifier (msg-<uuid>)
    pub id: String,

    /// Unix timestamp in milliseconds, re-stamped on send
    pub timestamp: u64,

    /// Agent that produced this envelope
    pub sender_id: String,

    /// Intended recipient, if any
    pub target_id: Option<String>,

    /// Typed payload
    pub message: Message,
}

impl Envelope {
    /// Create a new envelope with auto-generated id and timestamp
    pub fn new(sender_id: impl Into<String>, message: Message) -> Self {
        Self {
            id: format!("msg-{}", uuid::Uuid::new_v4()),
            timestamp: now_millis(),
            sender_id: sender_id.into(),
            target_id: None,
            message,
        }
    }

    /// Set the advisory target
    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    /// Topic this envelope is published on
    pub fn topic(&self) -> &str {
        self.message.kind()
    }

    /// Build a response addressed back to this envelope's sender
    pub fn reply(&self, sender_id: impl Into<String>, message: Message) -> Envelope {
        Envelope::new(sender_id, message).with_target(self.sender_id.clone())
    }

    /// Build an `error_response` referencing this envelope
    pub fn error_reply(&self, sender_id: impl Into<String>, error: impl Into<String>) -> Envelope {
        let report = ErrorReport {
            error: error.into(),
            original_message_id: self.id.clone(),
            task_id: self.message.task_id().map(str::to_string),
        };
        self.reply(sender_id, Message::ErrorResponse(report))
    }
}

/// Typed message payloads, one variant per known topic
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Workflow step asking an agent to carry out a task
    ExecuteTask(TaskRequest),
    /// Direct request to the transaction provider
    NebulaRequest(TaskRequest),
    /// Final answer for a request
    AgentResponse(TaskResult),
    /// Answer for one workflow step
    TaskStepComplete(TaskResult),
    /// Failure report
    ErrorResponse(ErrorReport),
    /// Externally obtained hash for a manually signed transaction
    ConfirmTransaction(ConfirmRequest),
    /// Any other topic; payload is carried untouched
    Passthrough { kind: String, payload: Value },
}

impl Message {
    /// Topic string of this message
    pub fn kind(&self) -> &str {
        match self {
            Message::ExecuteTask(_) => topics::EXECUTE_TASK,
            Message::NebulaRequest(_) => topics::NEBULA_REQUEST,
            Message::AgentResponse(_) => topics::AGENT_RESPONSE,
            Message::TaskStepComplete(_) => topics::TASK_STEP_COMPLETE,
            Message::ErrorResponse(_) => topics::ERROR_RESPONSE,
            Message::ConfirmTransaction(_) => topics::CONFIRM_TRANSACTION,
            Message::Passthrough { kind, .. } => kind,
        }
    }

    /// Task identifier carried by the payload, if any
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Message::ExecuteTask(req) | Message::NebulaRequest(req) => Some(&req.task_id),
            Message::AgentResponse(res) | Message::TaskStepComplete(res) => Some(&res.task_id),
            Message::ErrorResponse(report) => report.task_id.as_deref(),
            Message::ConfirmTransaction(_) | Message::Passthrough { .. } => None,
        }
    }

    fn payload_value(&self) -> Value {
        let result = match self {
            Message::ExecuteTask(req) | Message::NebulaRequest(req) => serde_json::to_value(req),
            Message::AgentResponse(res) | Message::TaskStepComplete(res) => {
                serde_json::to_value(res)
            }
            Message::ErrorResponse(report) => serde_json::to_value(report),
            Message::ConfirmTransaction(req) => serde_json::to_value(req),
            Message::Passthrough { payload, .. } => Ok(payload.clone()),
        };
        // Plain structs with string keys always serialize
        result.unwrap_or(Value::Null)
    }

    fn from_wire(kind: String, payload: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind.as_str() {
            topics::EXECUTE_TASK => Message::ExecuteTask(serde_json::from_value(payload)?),
            topics::NEBULA_REQUEST => Message::NebulaRequest(serde_json::from_value(payload)?),
            topics::AGENT_RESPONSE => Message::AgentResponse(serde_json::from_value(payload)?),
            topics::TASK_STEP_COMPLETE => {
                Message::TaskStepComplete(serde_json::from_value(payload)?)
            }
            topics::ERROR_RESPONSE => Message::ErrorResponse(serde_json::from_value(payload)?),
            topics::CONFIRM_TRANSACTION => {
                Message::ConfirmTransaction(serde_json::from_value(payload)?)
            }
            _ => Message::Passthrough { kind, payload },
        })
    }
}

/// Whether an operation reads chain state or writes a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    Read,
    Write,
}

/// Request payload for `execute_task` / `nebula_request`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    /// Correlates the request with its originating task
    pub task_id: String,

    /// Free-text description of what to do
    pub description: String,

    /// Structured parameters
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,

    /// Wallet on whose behalf the operation runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_wallet: Option<String>,

    /// Target chain; falls back to the configured default chains
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,

    /// Explicit classification; inferred from the description when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<OperationClass>,

    /// Provider conversation to continue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl TaskRequest {
    /// Create a request with a task id and description
    pub fn new(task_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    /// Set the wallet
    pub fn with_wallet(mut self, wallet: impl Into<String>) -> Self {
        self.user_wallet = Some(wallet.into());
        self
    }

    /// Set the chain id
    pub fn with_chain(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    /// Force a classification
    pub fn with_operation(mut self, operation: OperationClass) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Explicit classification, else keyword match on the description
    pub fn operation_class(&self) -> OperationClass {
        if let Some(operation) = self.operation {
            return operation;
        }
        let description = self.description.to_lowercase();
        let is_write = description
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|word| WRITE_KEYWORDS.contains(&word));
        if is_write {
            OperationClass::Write
        } else {
            OperationClass::Read
        }
    }
}

/// Words that mark a description as a state-changing operation
const WRITE_KEYWORDS: &[&str] = &[
    "send", "transfer", "swap", "approve", "deploy", "mint", "stake", "unstake", "bridge",
    "buy", "sell", "withdraw", "deposit", "burn", "claim", "execute", "pay",
];

/// Result payload for `agent_response` / `task_step_complete`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,

    /// Human-readable outcome
    pub result: String,

    /// Whether the operation succeeded (manual-signing handoff counts as success)
    #[serde(default)]
    pub success: bool,

    /// Steps taken while producing the result
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain_of_thought: Vec<String>,

    /// Transaction record id for write operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TransactionStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,

    /// Set when the user's own wallet must sign `transaction_data`
    #[serde(default)]
    pub requires_manual_signing: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_data: Option<UnsignedTransaction>,
}

/// Payload for `error_response`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub error: String,
    pub original_message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// Payload for `confirm_transaction`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub transaction_id: String,
    pub transaction_hash: String,
}

/// Structured, not-yet-signed transaction
///
/// Quantities are kept as strings (decimal or 0x-hex) exactly as the
/// provider returned them; conversion happens at signing time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedTransaction {
    pub to: String,

    #[serde(default = "default_zero")]
    pub value: String,

    #[serde(default = "default_empty_data")]
    pub data: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<String>,

    pub chain_id: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<String>,
}

fn default_zero() -> String {
    "0".to_string()
}

fn default_empty_data() -> String {
    "0x".to_string()
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    timestamp: u64,
    sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_id: Option<String>,
    #[serde(default)]
    payload: Value,
}

impl From<Envelope> for WireEnvelope {
    fn from(envelope: Envelope) -> Self {
        Self {
            kind: envelope.message.kind().to_string(),
            payload: envelope.message.payload_value(),
            id: envelope.id,
            timestamp: envelope.timestamp,
            sender_id: envelope.sender_id,
            target_id: envelope.target_id,
        }
    }
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = serde_json::Error;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        Ok(Self {
            message: Message::from_wire(wire.kind, wire.payload)?,
            id: wire.id,
            timestamp: wire.timestamp,
            sender_id: wire.sender_id,
            target_id: wire.target_id,
        })
    }
}

/// Current time in Unix milliseconds
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

//! Transaction status record and its state machine

use crate::types::{now_millis, UnsignedTransaction};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a submitted blockchain operation
///
/// Moves only forward: `pending → submitted → {confirmed | failed}` or
/// directly `pending → {confirmed | failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a legal forward step
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Submitted) | (Pending, Confirmed) | (Pending, Failed)
                | (Submitted, Confirmed)
                | (Submitted, Failed)
        )
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider endpoint a record was created through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMethod {
    Chat,
    Execute,
}

/// Category of a terminal failure, surfaced to users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    AutoExecutionFailed,
    SigningFailed,
    TimedOut,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoExecutionFailed => "auto-execution failed",
            Self::SigningFailed => "signing failed",
            Self::TimedOut => "timed out",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One submitted blockchain operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    /// Record identifier (tx-<uuid>)
    pub id: String,

    pub task_id: String,

    /// Set once known; never changes after confirmation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,

    pub status: TransactionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_wallet: Option<String>,

    /// Provider correlation id for polling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Provider conversation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    pub execution_method: ExecutionMethod,

    /// Prepared transaction awaiting a manual signature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned_tx: Option<UnsignedTransaction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Unix milliseconds
    pub created_at: u64,
    pub updated_at: u64,
}

impl TransactionRecord {
    pub fn new(
        task_id: impl Into<String>,
        user_wallet: Option<String>,
        execution_method: ExecutionMethod,
    ) -> Self {
        let now = now_millis();
        Self {
            id: format!("tx-{}", uuid::Uuid::new_v4()),
            task_id: task_id.into(),
            transaction_hash: None,
            status: TransactionStatus::Pending,
            user_wallet,
            request_id: None,
            session_id: None,
            execution_method,
            unsigned_tx: None,
            failure_kind: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the record is waiting for an externally signed hash
    pub fn awaiting_manual_signature(&self) -> bool {
        self.unsigned_tx.is_some() && !self.status.is_terminal()
    }
}

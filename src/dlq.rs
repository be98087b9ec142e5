//! Dead letters for mirror writes that exhausted their retries
//!
//! The durable mirror is best-effort. When a record cannot be written after
//! the configured attempts it is handed to a `DeadLetterHandler` so an
//! operator can replay or inspect it; the in-memory state is unaffected.

use crate::error::Result;
use crate::lifecycle::TransactionRecord;
use crate::types::now_millis;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A record the mirror gave up on
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// Snapshot that failed to persist
    pub record: TransactionRecord,

    /// Last store error
    pub reason: String,

    pub attempts: u32,

    /// Unix timestamp in milliseconds when the write was abandoned
    pub dead_lettered_at: u64,
}

impl DeadLetter {
    pub fn new(record: TransactionRecord, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            record,
            reason: reason.into(),
            attempts,
            dead_lettered_at: now_millis(),
        }
    }
}

/// Destination for abandoned mirror writes
#[async_trait]
pub trait DeadLetterHandler: Send + Sync {
    async fn handle(&self, letter: DeadLetter) -> Result<()>;

    /// Number of letters currently held
    async fn count(&self) -> Result<usize>;

    /// Most recent letters first
    async fn list(&self, limit: usize) -> Result<Vec<DeadLetter>>;
}

/// In-memory handler with a bounded capacity; oldest letters are dropped
pub struct MemoryDeadLetterHandler {
    letters: Arc<RwLock<Vec<DeadLetter>>>,
    max_letters: usize,
}

impl MemoryDeadLetterHandler {
    pub fn new(max_letters: usize) -> Self {
        Self {
            letters: Arc::new(RwLock::new(Vec::new())),
            max_letters,
        }
    }
}

impl Default for MemoryDeadLetterHandler {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl DeadLetterHandler for MemoryDeadLetterHandler {
    async fn handle(&self, letter: DeadLetter) -> Result<()> {
        tracing::warn!(
            transaction = %letter.record.id,
            status = %letter.record.status,
            attempts = letter.attempts,
            reason = %letter.reason,
            "Mirror write dead-lettered"
        );

        let mut letters = self.letters.write().await;
        letters.push(letter);

        if self.max_letters > 0 && letters.len() > self.max_letters {
            let drain_count = letters.len() - self.max_letters;
            letters.drain(..drain_count);
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.letters.read().await.len())
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let letters = self.letters.read().await;
        Ok(letters.iter().rev().take(limit).cloned().collect())
    }
}

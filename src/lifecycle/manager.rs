//! Transaction lifecycle manager
//!
//! Owns the authoritative map of transaction records. Every change is
//! applied to the map under one write lock, validated against the status
//! state machine, and then queued for the durable mirror.

use super::record::{ExecutionMethod, FailureKind, TransactionRecord, TransactionStatus};
use crate::error::{AgentBusError, Result};
use crate::mirror::TransactionMirror;
use crate::state::TransactionStore;
use crate::types::{now_millis, UnsignedTransaction};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Number of records in each status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub submitted: usize,
    pub confirmed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.submitted + self.confirmed + self.failed
    }
}

/// Authoritative in-memory transaction records with an optional durable mirror
#[derive(Default)]
pub struct TransactionManager {
    records: RwLock<HashMap<String, TransactionRecord>>,
    mirror: Option<TransactionMirror>,
}

impl TransactionManager {
    /// Manager without durable storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager mirroring every change through `mirror`
    pub fn with_mirror(mirror: TransactionMirror) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            mirror: Some(mirror),
        }
    }

    pub fn mirror(&self) -> Option<&TransactionMirror> {
        self.mirror.as_ref()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, TransactionRecord>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, TransactionRecord>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, record: &TransactionRecord) {
        if let Some(mirror) = &self.mirror {
            mirror.enqueue(record.clone());
        }
    }

    /// Create a `pending` record for a submitted operation
    pub fn create(
        &self,
        task_id: impl Into<String>,
        user_wallet: Option<String>,
        execution_method: ExecutionMethod,
    ) -> TransactionRecord {
        let record = TransactionRecord::new(task_id, user_wallet, execution_method);
        {
            let mut records = self.write();
            records.insert(record.id.clone(), record.clone());
            self.persist(&record);
        }

        tracing::info!(
            transaction = %record.id,
            task = %record.task_id,
            "Transaction record created"
        );
        record
    }

    /// Apply `change` to a copy of the record and commit it when it succeeds
    ///
    /// The snapshot is queued for the mirror before the lock is released, so
    /// the mirror sees a record's updates in the order they were applied.
    fn modify<F>(&self, id: &str, change: F) -> Result<TransactionRecord>
    where
        F: FnOnce(&mut TransactionRecord) -> Result<bool>,
    {
        let mut records = self.write();
        let current = records
            .get(id)
            .ok_or_else(|| AgentBusError::NotFound(format!("transaction '{}'", id)))?;

        let mut next = current.clone();
        if !change(&mut next)? {
            return Ok(next);
        }
        next.updated_at = now_millis().max(current.updated_at);
        records.insert(id.to_string(), next.clone());
        self.persist(&next);
        Ok(next)
    }

    fn advance(record: &mut TransactionRecord, next: TransactionStatus) -> Result<()> {
        if !record.status.can_transition_to(next) {
            return Err(AgentBusError::InvalidTransition {
                id: record.id.clone(),
                from: record.status.to_string(),
                to: next.to_string(),
            });
        }
        tracing::info!(
            transaction = %record.id,
            from = %record.status,
            to = %next,
            "Transaction status changed"
        );
        record.status = next;
        Ok(())
    }

    /// `pending → submitted`, recording provider correlation ids
    pub fn mark_submitted(
        &self,
        id: &str,
        session_id: Option<String>,
        request_id: Option<String>,
    ) -> Result<TransactionRecord> {
        self.modify(id, |record| {
            Self::advance(record, TransactionStatus::Submitted)?;
            if session_id.is_some() {
                record.session_id = session_id;
            }
            if request_id.is_some() {
                record.request_id = request_id;
            }
            Ok(true)
        })
    }

    /// Record provider correlation ids without changing status
    pub fn attach_correlation(
        &self,
        id: &str,
        request_id: Option<String>,
        session_id: Option<String>,
    ) -> Result<TransactionRecord> {
        self.modify(id, |record| {
            let mut changed = false;
            if request_id.is_some() && record.request_id != request_id {
                record.request_id = request_id;
                changed = true;
            }
            if session_id.is_some() && record.session_id != session_id {
                record.session_id = session_id;
                changed = true;
            }
            Ok(changed)
        })
    }

    /// Store the prepared transaction awaiting a manual signature
    pub fn attach_unsigned_tx(&self, id: &str, tx: UnsignedTransaction) -> Result<TransactionRecord> {
        self.modify(id, |record| {
            if record.status.is_terminal() {
                return Err(AgentBusError::InvalidTransition {
                    id: record.id.clone(),
                    from: record.status.to_string(),
                    to: "awaiting signature".to_string(),
                });
            }
            record.unsigned_tx = Some(tx);
            Ok(true)
        })
    }

    /// Advance a non-terminal record to `confirmed` with `hash`
    ///
    /// Confirming again with the same hash is a no-op. A different hash on
    /// a confirmed record is rejected, as is confirming a failed record.
    pub fn confirm_transaction(&self, id: &str, hash: &str) -> Result<TransactionRecord> {
        let hash = hash.trim();
        if hash.is_empty() {
            return Err(AgentBusError::Config(
                "transaction hash must not be empty".to_string(),
            ));
        }

        self.modify(id, |record| match record.status {
            TransactionStatus::Confirmed => match record.transaction_hash.as_deref() {
                Some(existing) if existing.eq_ignore_ascii_case(hash) => Ok(false),
                existing => {
                    tracing::warn!(
                        transaction = %record.id,
                        existing = existing.unwrap_or(""),
                        offered = %hash,
                        "Rejected confirmation with a different hash"
                    );
                    Err(AgentBusError::AlreadyConfirmed {
                        id: record.id.clone(),
                        existing_hash: existing.unwrap_or_default().to_string(),
                    })
                }
            },
            _ => {
                Self::advance(record, TransactionStatus::Confirmed)?;
                record.transaction_hash = Some(hash.to_string());
                Ok(true)
            }
        })
    }

    /// Advance a non-terminal record to `failed`
    pub fn mark_failed(
        &self,
        id: &str,
        kind: FailureKind,
        reason: impl Into<String>,
    ) -> Result<TransactionRecord> {
        let reason = reason.into();
        self.modify(id, |record| {
            Self::advance(record, TransactionStatus::Failed)?;
            tracing::warn!(transaction = %record.id, kind = %kind, reason = %reason, "Transaction failed");
            record.failure_kind = Some(kind);
            record.failure_reason = Some(reason);
            Ok(true)
        })
    }

    pub fn get(&self, id: &str) -> Option<TransactionRecord> {
        self.read().get(id).cloned()
    }

    /// Records for a task, oldest first
    pub fn list_by_task(&self, task_id: &str) -> Vec<TransactionRecord> {
        self.collect(|r| r.task_id == task_id)
    }

    /// Records for a wallet (case-insensitive), oldest first
    pub fn list_by_wallet(&self, wallet: &str) -> Vec<TransactionRecord> {
        let wallet = wallet.trim();
        self.collect(|r| {
            r.user_wallet
                .as_deref()
                .is_some_and(|w| w.eq_ignore_ascii_case(wallet))
        })
    }

    fn collect(&self, filter: impl Fn(&TransactionRecord) -> bool) -> Vec<TransactionRecord> {
        let mut list: Vec<_> = self.read().values().filter(|r| filter(r)).cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        list
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for record in self.read().values() {
            match record.status {
                TransactionStatus::Pending => counts.pending += 1,
                TransactionStatus::Submitted => counts.submitted += 1,
                TransactionStatus::Confirmed => counts.confirmed += 1,
                TransactionStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Load records from durable storage that are not already in memory
    ///
    /// Intended for startup; records already held in memory win.
    pub async fn restore(&self, store: &dyn TransactionStore) -> Result<usize> {
        let stored = store.list().await?;
        let mut records = self.write();
        let mut restored = 0;
        for record in stored {
            if !records.contains_key(&record.id) {
                records.insert(record.id.clone(), record);
                restored += 1;
            }
        }
        tracing::info!(restored, total = records.len(), "Transaction records restored");
        Ok(restored)
    }
}

//! Durable transaction record storage
//!
//! The in-memory `TransactionManager` is authoritative; a `TransactionStore`
//! is the audit copy written behind it by the mirror and read back by
//! `TransactionManager::restore` at startup.

use crate::error::{AgentBusError, Result};
use crate::lifecycle::TransactionRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

/// Key-value persistence of transaction records by id
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert or replace the record with the same id
    async fn upsert(&self, record: &TransactionRecord) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<TransactionRecord>>;

    /// Every stored record, oldest first
    async fn list(&self) -> Result<Vec<TransactionRecord>>;
}

/// JSON file-based store
///
/// Keeps the full map in memory and rewrites the file on each upsert.
/// Atomic writes via temp file + rename to prevent corruption.
pub struct FileTransactionStore {
    path: PathBuf,
    records: Mutex<HashMap<String, TransactionRecord>>,
}

impl FileTransactionStore {
    /// Open the store at `path`, loading any existing records
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = load_file(&path)?;
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, records: &HashMap<String, TransactionRecord>) -> Result<()> {
        let json = serde_json::to_string_pretty(records)?;
        let tmp_path = self.path.with_extension("tmp");

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AgentBusError::Persistence(format!(
                    "Failed to create store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        std::fs::write(&tmp_path, json).map_err(|e| {
            AgentBusError::Persistence(format!(
                "Failed to write store file {}: {}",
                tmp_path.display(),
                e
            ))
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            AgentBusError::Persistence(format!(
                "Failed to rename store file {} to {}: {}",
                tmp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::debug!(path = %self.path.display(), count = records.len(), "Transaction store saved");
        Ok(())
    }
}

fn load_file(path: &Path) -> Result<HashMap<String, TransactionRecord>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }

    let json = std::fs::read_to_string(path).map_err(|e| {
        AgentBusError::Persistence(format!("Failed to read store file {}: {}", path.display(), e))
    })?;

    let records: HashMap<String, TransactionRecord> = serde_json::from_str(&json).map_err(|e| {
        AgentBusError::Persistence(format!("Failed to parse store file {}: {}", path.display(), e))
    })?;

    tracing::debug!(path = %path.display(), count = records.len(), "Transaction store loaded");
    Ok(records)
}

fn sorted(records: impl Iterator<Item = TransactionRecord>) -> Vec<TransactionRecord> {
    let mut list: Vec<_> = records.collect();
    list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    list
}

#[async_trait]
impl TransactionStore for FileTransactionStore {
    async fn upsert(&self, record: &TransactionRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        let previous = records.insert(record.id.clone(), record.clone());
        if let Err(e) = self.save(&records) {
            // Keep the cache consistent with what is on disk
            match previous {
                Some(previous) => records.insert(record.id.clone(), previous),
                None => records.remove(&record.id),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<TransactionRecord>> {
        Ok(self.records.lock().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<TransactionRecord>> {
        let records = self.records.lock().await;
        Ok(sorted(records.values().cloned()))
    }
}

/// In-memory store for development and testing
#[derive(Default)]
pub struct MemoryTransactionStore {
    records: RwLock<HashMap<String, TransactionRecord>>,
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl TransactionStore for MemoryTransactionStore {
    async fn upsert(&self, record: &TransactionRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<TransactionRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<TransactionRecord>> {
        let records = self.records.read().await;
        Ok(sorted(records.values().cloned()))
    }
}

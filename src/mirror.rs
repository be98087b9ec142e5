//! Write-behind mirror from the in-memory transaction map to durable storage
//!
//! Records are queued in transition order and written by one worker task, so
//! the durable copy may lag but never reorders updates for a record. Failed
//! writes are retried with exponential backoff and then dead-lettered.

use crate::config::MirrorConfig;
use crate::dlq::{DeadLetter, DeadLetterHandler};
use crate::error::{AgentBusError, Result};
use crate::lifecycle::TransactionRecord;
use crate::state::TransactionStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

enum MirrorCommand {
    Write(TransactionRecord),
    Flush(oneshot::Sender<()>),
}

#[derive(Default)]
struct MirrorCounters {
    queued: AtomicU64,
    written: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
}

/// Mirror statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorStats {
    pub queued: u64,
    pub written: u64,
    pub retried: u64,
    pub dead_lettered: u64,
}

/// Handle to the mirror worker; cheap to clone
#[derive(Clone)]
pub struct TransactionMirror {
    sender: mpsc::UnboundedSender<MirrorCommand>,
    counters: Arc<MirrorCounters>,
}

impl TransactionMirror {
    /// Spawn the mirror worker on the current Tokio runtime
    pub fn spawn(
        store: Arc<dyn TransactionStore>,
        dead_letters: Arc<dyn DeadLetterHandler>,
        config: MirrorConfig,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AgentBusError::Config(format!("mirror needs an async runtime: {}", e)))?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let counters = Arc::new(MirrorCounters::default());
        runtime.spawn(run_worker(
            receiver,
            store,
            dead_letters,
            config,
            counters.clone(),
        ));

        Ok(Self { sender, counters })
    }

    /// Queue a snapshot for writing; never blocks
    pub fn enqueue(&self, record: TransactionRecord) {
        let id = record.id.clone();
        if self.sender.send(MirrorCommand::Write(record)).is_ok() {
            self.counters.queued.fetch_add(1, Ordering::Relaxed);
        } else {
            tracing::error!(transaction = %id, "Mirror worker stopped, record not persisted");
        }
    }

    /// Wait until every record queued before this call has been handled
    pub async fn flush(&self) -> Result<()> {
        let (done, wait) = oneshot::channel();
        self.sender
            .send(MirrorCommand::Flush(done))
            .map_err(|_| AgentBusError::Persistence("mirror worker stopped".to_string()))?;
        wait.await
            .map_err(|_| AgentBusError::Persistence("mirror worker stopped".to_string()))
    }

    pub fn stats(&self) -> MirrorStats {
        MirrorStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            written: self.counters.written.load(Ordering::Relaxed),
            retried: self.counters.retried.load(Ordering::Relaxed),
            dead_lettered: self.counters.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<MirrorCommand>,
    store: Arc<dyn TransactionStore>,
    dead_letters: Arc<dyn DeadLetterHandler>,
    config: MirrorConfig,
    counters: Arc<MirrorCounters>,
) {
    while let Some(command) = receiver.recv().await {
        match command {
            MirrorCommand::Write(record) => {
                write_with_retry(&record, store.as_ref(), dead_letters.as_ref(), &config, &counters)
                    .await
            }
            MirrorCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Mirror worker stopped");
}

async fn write_with_retry(
    record: &TransactionRecord,
    store: &dyn TransactionStore,
    dead_letters: &dyn DeadLetterHandler,
    config: &MirrorConfig,
    counters: &MirrorCounters,
) {
    let max_attempts = config.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 0..max_attempts {
        match store.upsert(record).await {
            Ok(()) => {
                counters.written.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(transaction = %record.id, status = %record.status, "Record mirrored");
                return;
            }
            Err(e) => {
                last_error = e.to_string();
                if attempt + 1 < max_attempts {
                    let delay = config.delay_for_attempt(attempt);
                    counters.retried.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        transaction = %record.id,
                        attempt = attempt + 1,
                        max_attempts,
                        "Mirror write failed, retrying in {:?}: {}",
                        delay,
                        last_error
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
    let letter = DeadLetter::new(record.clone(), last_error, max_attempts);
    if let Err(e) = dead_letters.handle(letter).await {
        tracing::error!(transaction = %record.id, error = %e, "Dead-letter handler failed");
    }
}

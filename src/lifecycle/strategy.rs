//! Execution strategy chain for write operations
//!
//! One run drives one transaction record through an ordered fallback
//! policy:
//!
//! 1. Auto-execution by the provider.
//! 2. Session-key signing when the provider returns actions and the wallet
//!    holds a usable session key.
//! 3. Manual-signing handoff: prepared, unsigned data for the user's wallet.
//! 4. Polling when the provider returns only a correlation id.
//!
//! Steps for one record run strictly in sequence. Every step appends to a
//! human-readable trace returned with the result.

use super::manager::TransactionManager;
use super::record::{ExecutionMethod, FailureKind, TransactionRecord, TransactionStatus};
use crate::config::PollingConfig;
use crate::error::{AgentBusError, Result};
use crate::network::TransactionSender;
use crate::provider::{PollStatus, ProviderAction, ProviderOutcome, ProviderRequest, TransactionProvider};
use crate::session::{SessionKeyData, SessionKeyStore, SIGN_TRANSACTION};
use crate::types::{TaskRequest, TaskResult, UnsignedTransaction};
use std::sync::Arc;
use std::time::Duration;

/// How a strategy run ended
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutcome {
    /// On-chain hash known
    Confirmed { hash: String },
    /// Handed back for the user's wallet to sign
    ManualSigning { transaction: UnsignedTransaction },
    /// Terminal failure
    Failed { kind: FailureKind, reason: String },
}

/// Outcome of one strategy run with the record and reasoning trace
#[derive(Debug, Clone)]
pub struct StrategyResult {
    pub record: TransactionRecord,
    pub outcome: StrategyOutcome,
    pub trace: Vec<String>,
}

impl StrategyResult {
    /// User-facing summary; failures name the record id and reason category
    pub fn summary(&self) -> String {
        match &self.outcome {
            StrategyOutcome::Confirmed { hash } => {
                format!("Transaction {} confirmed with hash {}", self.record.id, hash)
            }
            StrategyOutcome::ManualSigning { transaction } => format!(
                "Transaction {} requires manual signing: send {} wei to {} on chain {} from your wallet, then confirm the hash",
                self.record.id, transaction.value, transaction.to, transaction.chain_id
            ),
            StrategyOutcome::Failed { kind, reason } => {
                format!("Transaction {} failed ({}): {}", self.record.id, kind, reason)
            }
        }
    }

    /// Bus payload for this result
    pub fn to_task_result(&self, task_id: &str) -> TaskResult {
        let mut result = TaskResult {
            task_id: task_id.to_string(),
            result: self.summary(),
            success: !matches!(self.outcome, StrategyOutcome::Failed { .. }),
            chain_of_thought: self.trace.clone(),
            transaction_id: Some(self.record.id.clone()),
            status: Some(self.record.status),
            transaction_hash: self.record.transaction_hash.clone(),
            ..Default::default()
        };
        if let StrategyOutcome::ManualSigning { transaction } = &self.outcome {
            result.requires_manual_signing = true;
            result.transaction_data = Some(transaction.clone());
        }
        result
    }
}

/// Shared collaborators of the strategy chain
pub struct ExecutionStrategy {
    provider: Arc<dyn TransactionProvider>,
    sessions: Arc<SessionKeyStore>,
    sender: Option<Arc<dyn TransactionSender>>,
    manager: Arc<TransactionManager>,
    polling: PollingConfig,
    chain_ids: Vec<u64>,
}

/// Per-run state threaded through the steps
struct Run {
    record_id: String,
    request: ProviderRequest,
    trace: Vec<String>,
}

impl Run {
    fn note(&mut self, step: impl Into<String>) {
        let step = step.into();
        tracing::debug!(transaction = %self.record_id, "{}", step);
        self.trace.push(step);
    }
}

impl ExecutionStrategy {
    pub fn new(
        provider: Arc<dyn TransactionProvider>,
        sessions: Arc<SessionKeyStore>,
        manager: Arc<TransactionManager>,
    ) -> Self {
        Self {
            provider,
            sessions,
            sender: None,
            manager,
            polling: PollingConfig::default(),
            chain_ids: vec![1],
        }
    }

    /// Network sender used for session-key signing
    pub fn with_sender(mut self, sender: Arc<dyn TransactionSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    /// Chains offered to the provider when a request names none
    pub fn with_chain_ids(mut self, chain_ids: Vec<u64>) -> Self {
        if !chain_ids.is_empty() {
            self.chain_ids = chain_ids;
        }
        self
    }

    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// Drive a new record for `task` through the chain
    pub async fn run(&self, task: &TaskRequest) -> StrategyResult {
        let record = self.manager.create(
            task.task_id.clone(),
            task.user_wallet.clone(),
            ExecutionMethod::Execute,
        );

        let session = task
            .user_wallet
            .as_deref()
            .and_then(|wallet| self.sessions.get_session_key(wallet))
            .filter(|session| session.allows(SIGN_TRANSACTION));

        let chain_ids = task
            .chain_id
            .map(|id| vec![id])
            .unwrap_or_else(|| self.chain_ids.clone());
        let mut request = ProviderRequest::new(task.description.clone())
            .with_chain_ids(chain_ids)
            .with_auto_execute(true)
            .with_session(task.session_id.clone());
        if let Some(wallet) = &task.user_wallet {
            request = request.with_from(wallet.clone());
        }
        if let Some(session) = &session {
            request = request.with_signer(session.address.clone());
        }

        let mut run = Run {
            record_id: record.id.clone(),
            request,
            trace: Vec::new(),
        };
        run.note(format!("Created transaction record {}", record.id));

        let (outcome, record) = match self.execute_chain(&mut run, session.as_ref()).await {
            Ok(outcome) => {
                let record = self.manager.get(&run.record_id).unwrap_or(record);
                (outcome, record)
            }
            Err(e) => {
                // The record changed underneath the run; report what it holds now
                tracing::error!(transaction = %run.record_id, error = %e, "Strategy aborted");
                run.note(format!("Strategy aborted: {}", e));
                self.settle_aborted(&run.record_id, record, e)
            }
        };

        tracing::info!(
            transaction = %record.id,
            task = %record.task_id,
            status = %record.status,
            "Strategy finished"
        );
        StrategyResult {
            record,
            outcome,
            trace: run.trace,
        }
    }

    async fn execute_chain(
        &self,
        run: &mut Run,
        session: Option<&SessionKeyData>,
    ) -> Result<StrategyOutcome> {
        run.note("Requesting auto-execution from the provider");
        let response = self.provider.execute(&run.request).await;

        match response {
            Ok(ProviderOutcome::Hash(hash)) => {
                run.note(format!("Provider executed the transaction: {}", hash));
                self.confirm(run, &hash)
            }
            Ok(ProviderOutcome::Actions {
                actions,
                session_id,
                request_id,
            }) => {
                run.note(format!("Provider returned {} action(s) to sign", actions.len()));
                self.manager.mark_submitted(&run.record_id, session_id.clone(), request_id)?;
                run.request.session_id = session_id.or(run.request.session_id.take());
                self.sign_with_session(run, session, &actions).await
            }
            Ok(ProviderOutcome::Pending {
                request_id,
                session_id,
            }) => {
                run.note(format!("Provider accepted the request as {}", request_id));
                self.manager.attach_correlation(
                    &run.record_id,
                    Some(request_id.clone()),
                    session_id,
                )?;
                self.poll(run, &request_id).await
            }
            Ok(ProviderOutcome::Text(text)) => {
                run.note(format!("Auto-execution produced no transaction: {}", text));
                self.manual_fallback(run, FailureKind::AutoExecutionFailed, &[]).await
            }
            Ok(ProviderOutcome::Error(reason)) => {
                run.note(format!("Auto-execution failed: {}", reason));
                self.manual_fallback(run, FailureKind::AutoExecutionFailed, &[]).await
            }
            Err(e) => {
                run.note(format!("Auto-execution failed: {}", e));
                self.manual_fallback(run, FailureKind::AutoExecutionFailed, &[]).await
            }
        }
    }

    async fn sign_with_session(
        &self,
        run: &mut Run,
        session: Option<&SessionKeyData>,
        actions: &[ProviderAction],
    ) -> Result<StrategyOutcome> {
        let (Some(session), Some(sender)) = (session, self.sender.as_ref()) else {
            run.note("No usable session key, falling back to manual signing");
            return self
                .manual_fallback(run, FailureKind::AutoExecutionFailed, actions)
                .await;
        };

        let tx = match first_transaction(actions, run.request.default_chain_id()) {
            Ok(tx) => tx,
            Err(e) => {
                run.note(format!("Actions are not a signable transaction: {}", e));
                return self
                    .manual_fallback(run, FailureKind::AutoExecutionFailed, actions)
                    .await;
            }
        };

        if !sender.supports_chain(tx.chain_id) {
            run.note(format!(
                "No network route for chain {}, falling back to manual signing",
                tx.chain_id
            ));
            return self
                .manual_fallback(run, FailureKind::AutoExecutionFailed, actions)
                .await;
        }

        run.note(format!(
            "Signing with session key {} on chain {}",
            session.address, tx.chain_id
        ));
        match sender.send_transaction(session, &tx).await {
            Ok(hash) => {
                run.note(format!("Network accepted the transaction: {}", hash));
                self.confirm(run, &hash)
            }
            Err(e) => {
                run.note(format!("Session-key submission failed: {}", e));
                self.fail(run, FailureKind::SigningFailed, e.to_string())
            }
        }
    }

    async fn poll(&self, run: &mut Run, request_id: &str) -> Result<StrategyOutcome> {
        let interval = self.polling.interval();
        let max_attempts = self.polling.max_attempts;
        let provider = self.provider.clone();
        let mut attempts = 0u32;
        let mut notes = Vec::new();

        let polled = tokio::time::timeout(self.polling.max_duration(), async {
            loop {
                if max_attempts.is_some_and(|max| attempts >= max) {
                    return None;
                }
                attempts += 1;
                match provider.transaction_status(request_id).await {
                    Ok(PollStatus::Pending) => {}
                    Ok(status) => return Some(status),
                    Err(e) => notes.push(format!("Status check {} failed: {}", attempts, e)),
                }
                if max_attempts.is_some_and(|max| attempts >= max) {
                    return None;
                }
                tokio::time::sleep(interval).await;
            }
        })
        .await;

        for note in notes {
            run.note(note);
        }

        match polled {
            Ok(Some(PollStatus::Confirmed(hash))) => {
                run.note(format!("Polling found hash {} after {} check(s)", hash, attempts));
                self.confirm(run, &hash)
            }
            Ok(Some(PollStatus::Failed(reason))) => {
                run.note(format!("Provider reported failure: {}", reason));
                self.fail(run, FailureKind::AutoExecutionFailed, reason)
            }
            Ok(Some(PollStatus::Pending)) | Ok(None) => {
                run.note(format!("No result after {} status check(s)", attempts));
                self.manual_fallback(run, FailureKind::TimedOut, &[]).await
            }
            Err(_) => {
                run.note(format!(
                    "No result within {} after {} status check(s)",
                    format_duration(self.polling.max_duration()),
                    attempts
                ));
                self.manual_fallback(run, FailureKind::TimedOut, &[]).await
            }
        }
    }

    /// Hand the transaction back for the user's own wallet to sign
    ///
    /// Uses the first convertible action when the provider already sent
    /// some, else asks the provider to prepare the data.
    async fn manual_fallback(
        &self,
        run: &mut Run,
        cause: FailureKind,
        actions: &[ProviderAction],
    ) -> Result<StrategyOutcome> {
        let prepared = match first_transaction(actions, run.request.default_chain_id()) {
            Ok(tx) => Ok(tx),
            Err(_) => {
                run.note("Asking the provider to prepare transaction data");
                self.provider.prepare_transaction(&run.request).await
            }
        };

        match prepared {
            Ok(transaction) => {
                self.manager
                    .attach_unsigned_tx(&run.record_id, transaction.clone())?;
                run.note("Prepared transaction for manual signing");
                Ok(StrategyOutcome::ManualSigning { transaction })
            }
            Err(e) => {
                run.note(format!("Could not prepare transaction data: {}", e));
                self.fail(run, cause, format!("manual preparation failed: {}", e))
            }
        }
    }

    /// Outcome for a run whose record was changed by someone else
    fn settle_aborted(
        &self,
        id: &str,
        created: TransactionRecord,
        error: AgentBusError,
    ) -> (StrategyOutcome, TransactionRecord) {
        let current = self.manager.get(id).unwrap_or(created);
        let record = if current.status.is_terminal() {
            current
        } else {
            match self
                .manager
                .mark_failed(id, FailureKind::AutoExecutionFailed, error.to_string())
            {
                Ok(record) => record,
                Err(_) => self.manager.get(id).unwrap_or(current),
            }
        };

        let outcome = match record.status {
            TransactionStatus::Confirmed => StrategyOutcome::Confirmed {
                hash: record.transaction_hash.clone().unwrap_or_default(),
            },
            _ => StrategyOutcome::Failed {
                kind: record.failure_kind.unwrap_or(FailureKind::AutoExecutionFailed),
                reason: record
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| error.to_string()),
            },
        };
        (outcome, record)
    }

    fn confirm(&self, run: &mut Run, hash: &str) -> Result<StrategyOutcome> {
        let record = self.manager.confirm_transaction(&run.record_id, hash)?;
        Ok(StrategyOutcome::Confirmed {
            hash: record.transaction_hash.unwrap_or_else(|| hash.to_string()),
        })
    }

    fn fail(&self, run: &mut Run, kind: FailureKind, reason: String) -> Result<StrategyOutcome> {
        self.manager.mark_failed(&run.record_id, kind, reason.clone())?;
        run.note(format!("Marked failed: {}", kind));
        Ok(StrategyOutcome::Failed { kind, reason })
    }
}

fn first_transaction(actions: &[ProviderAction], default_chain_id: u64) -> Result<UnsignedTransaction> {
    actions
        .first()
        .ok_or_else(|| AgentBusError::provider("no actions"))?
        .to_unsigned(default_chain_id)
}

fn format_duration(duration: Duration) -> String {
    if duration.as_millis() % 1000 == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Provider replaying canned execute outcomes and poll results
    struct Canned {
        execute: Mutex<Vec<Result<ProviderOutcome>>>,
        polls: Mutex<Vec<PollStatus>>,
        prepared: Option<UnsignedTransaction>,
    }

    #[async_trait]
    impl TransactionProvider for Canned {
        async fn chat(&self, _request: &ProviderRequest) -> Result<ProviderOutcome> {
            Ok(ProviderOutcome::Text("n/a".to_string()))
        }

        async fn execute(&self, request: &ProviderRequest) -> Result<ProviderOutcome> {
            assert!(request.auto_execute);
            let mut queue = self.execute.lock().unwrap();
            if queue.is_empty() {
                return Ok(ProviderOutcome::Error("exhausted".to_string()));
            }
            queue.remove(0)
        }

        async fn transaction_status(&self, _request_id: &str) -> Result<PollStatus> {
            let mut polls = self.polls.lock().unwrap();
            Ok(if polls.is_empty() { PollStatus::Pending } else { polls.remove(0) })
        }

        async fn prepare_transaction(&self, _request: &ProviderRequest) -> Result<UnsignedTransaction> {
            self.prepared
                .clone()
                .ok_or_else(|| AgentBusError::provider("cannot prepare"))
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    fn strategy(provider: Canned) -> ExecutionStrategy {
        ExecutionStrategy::new(
            Arc::new(provider),
            Arc::new(SessionKeyStore::new()),
            Arc::new(TransactionManager::new()),
        )
        .with_polling(PollingConfig {
            interval_ms: 1,
            max_duration_ms: 1_000,
            max_attempts: Some(2),
        })
    }

    fn canned(execute: Vec<Result<ProviderOutcome>>) -> Canned {
        Canned {
            execute: Mutex::new(execute),
            polls: Mutex::new(Vec::new()),
            prepared: None,
        }
    }

    #[tokio::test]
    async fn test_text_without_preparation_fails_with_category() {
        let strategy = strategy(canned(vec![Ok(ProviderOutcome::Text("hello".to_string()))]));
        let result = strategy.run(&TaskRequest::new("t1", "send 1 ETH")).await;

        assert_eq!(result.record.status, TransactionStatus::Failed);
        let summary = result.summary();
        assert!(summary.contains(&result.record.id));
        assert!(summary.contains("auto-execution failed"));
        assert!(!result.to_task_result("t1").success);
    }

    #[tokio::test]
    async fn test_provider_error_falls_back_to_prepared_data() {
        let mut provider = canned(vec![Err(AgentBusError::Provider {
            status: Some(502),
            reason: "bad gateway".to_string(),
        })]);
        provider.prepared = Some(UnsignedTransaction {
            to: "0x1111111111111111111111111111111111111111".to_string(),
            value: "5".to_string(),
            chain_id: 1,
            ..Default::default()
        });
        let strategy = strategy(provider);
        let result = strategy.run(&TaskRequest::new("t1", "send 5 wei")).await;

        assert!(matches!(result.outcome, StrategyOutcome::ManualSigning { .. }));
        assert_eq!(result.record.status, TransactionStatus::Pending);
        let payload = result.to_task_result("t1");
        assert!(payload.requires_manual_signing);
        assert_eq!(payload.transaction_data.unwrap().value, "5");
    }

    #[tokio::test]
    async fn test_polling_failure_is_terminal() {
        let mut provider = canned(vec![Ok(ProviderOutcome::Pending {
            request_id: "r1".to_string(),
            session_id: None,
        })]);
        provider.polls = Mutex::new(vec![
            PollStatus::Pending,
            PollStatus::Failed("reverted".to_string()),
        ]);
        let strategy = strategy(provider);
        let result = strategy.run(&TaskRequest::new("t1", "stake")).await;

        assert_eq!(result.record.status, TransactionStatus::Failed);
        assert_eq!(result.record.request_id.as_deref(), Some("r1"));
        assert_eq!(
            result.outcome,
            StrategyOutcome::Failed {
                kind: FailureKind::AutoExecutionFailed,
                reason: "reverted".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_wall_clock_ceiling() {
        let provider = canned(vec![Ok(ProviderOutcome::Pending {
            request_id: "r1".to_string(),
            session_id: None,
        })]);
        let strategy = strategy(provider).with_polling(PollingConfig {
            interval_ms: 1_000,
            max_duration_ms: 5_000,
            max_attempts: None,
        });
        let result = strategy.run(&TaskRequest::new("t1", "mint")).await;

        // Nothing to prepare, so the timeout ends as a failure in that category
        assert_eq!(
            result.outcome,
            StrategyOutcome::Failed {
                kind: FailureKind::TimedOut,
                reason: "manual preparation failed: Provider error: cannot prepare".to_string()
            }
        );
        assert!(result.trace.iter().any(|s| s.contains("within 5s")));
        assert!(result.summary().contains("timed out"));
    }

    /// Confirms the run's record out of band while answering with actions
    struct ConfirmedElsewhere {
        manager: Arc<TransactionManager>,
    }

    #[async_trait]
    impl TransactionProvider for ConfirmedElsewhere {
        async fn chat(&self, _request: &ProviderRequest) -> Result<ProviderOutcome> {
            Ok(ProviderOutcome::Text("n/a".to_string()))
        }

        async fn execute(&self, _request: &ProviderRequest) -> Result<ProviderOutcome> {
            for record in self.manager.list_by_task("t1") {
                self.manager.confirm_transaction(&record.id, "0xwallet")?;
            }
            Ok(ProviderOutcome::Actions {
                actions: Vec::new(),
                session_id: None,
                request_id: None,
            })
        }

        async fn transaction_status(&self, _request_id: &str) -> Result<PollStatus> {
            Ok(PollStatus::Pending)
        }

        fn name(&self) -> &str {
            "confirmed-elsewhere"
        }
    }

    #[tokio::test]
    async fn test_aborted_run_reports_the_stored_record() {
        let manager = Arc::new(TransactionManager::new());
        let strategy = ExecutionStrategy::new(
            Arc::new(ConfirmedElsewhere {
                manager: manager.clone(),
            }),
            Arc::new(SessionKeyStore::new()),
            manager.clone(),
        );
        let result = strategy.run(&TaskRequest::new("t1", "send 1 ETH")).await;

        assert_eq!(
            result.outcome,
            StrategyOutcome::Confirmed {
                hash: "0xwallet".to_string()
            }
        );
        assert_eq!(result.record.status, TransactionStatus::Confirmed);
        assert!(result.trace.iter().any(|s| s.starts_with("Strategy aborted")));
        assert!(result.to_task_result("t1").success);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(60)), "60s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
    }
}

//! Blockchain execution agent
//!
//! Answers `execute_task` with `task_step_complete`, `nebula_request` with
//! `agent_response`, and applies `confirm_transaction` callbacks. Reads go
//! straight to the provider's chat endpoint; writes run the execution
//! strategy chain.

use super::{initialize, Agent, AgentContext};
use crate::bus::MessageBus;
use crate::config::AgentBusConfig;
use crate::error::Result;
use crate::lifecycle::{ExecutionStrategy, TransactionManager};
use crate::network::{RpcTransactionSender, TransactionSender};
use crate::provider::{HttpTransactionProvider, ProviderOutcome, ProviderRequest, TransactionProvider};
use crate::session::SessionKeyStore;
use crate::types::{topics, ConfirmRequest, Envelope, Message, OperationClass, TaskRequest, TaskResult};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

pub const CAPABILITY_EXECUTION: &str = "blockchain_execution";
pub const CAPABILITY_TRANSACTIONS: &str = "transaction_management";
pub const CAPABILITY_SESSION_SIGNING: &str = "session_key_signing";

struct Runtime {
    provider: Arc<dyn TransactionProvider>,
    strategy: ExecutionStrategy,
    chain_ids: Vec<u64>,
}

/// Agent that turns task requests into provider calls and transactions
pub struct ExecutionAgent {
    context: AgentContext,
    /// `Err` holds the configuration problem every request is answered with
    runtime: std::result::Result<Runtime, String>,
}

impl ExecutionAgent {
    /// Create and subscribe an agent using `strategy`
    pub fn new(
        id: impl Into<String>,
        bus: Arc<MessageBus>,
        provider: Arc<dyn TransactionProvider>,
        strategy: ExecutionStrategy,
        chain_ids: Vec<u64>,
    ) -> Result<Arc<Self>> {
        Self::start(
            AgentContext::new(id, bus),
            Ok(Runtime {
                provider,
                strategy,
                chain_ids,
            }),
        )
    }

    /// Create an agent that answers every request with a configuration error
    pub fn unconfigured(
        id: impl Into<String>,
        bus: Arc<MessageBus>,
        reason: impl Into<String>,
    ) -> Result<Arc<Self>> {
        Self::start(AgentContext::new(id, bus), Err(reason.into()))
    }

    /// Build the HTTP provider and RPC sender from configuration
    ///
    /// A provider configuration error does not fail construction; the agent
    /// runs and reports the error on every request instead.
    pub fn from_config(
        id: impl Into<String>,
        bus: Arc<MessageBus>,
        config: &AgentBusConfig,
        sessions: Arc<SessionKeyStore>,
        manager: Arc<TransactionManager>,
    ) -> Result<Arc<Self>> {
        let id = id.into();
        let provider: Arc<dyn TransactionProvider> =
            match HttpTransactionProvider::from_config(&config.provider) {
                Ok(provider) => Arc::new(provider),
                Err(e) => {
                    tracing::warn!(agent = %id, error = %e, "Execution agent starting unconfigured");
                    return Self::unconfigured(id, bus, e.to_string());
                }
            };

        let mut strategy = ExecutionStrategy::new(provider.clone(), sessions, manager)
            .with_polling(config.polling.clone())
            .with_chain_ids(config.provider.chain_ids.clone());
        if !config.network.rpc_urls.is_empty() {
            let sender: Arc<dyn TransactionSender> =
                Arc::new(RpcTransactionSender::from_config(&config.network)?);
            strategy = strategy.with_sender(sender);
        }

        Self::new(id, bus, provider, strategy, config.provider.chain_ids.clone())
    }

    fn start(context: AgentContext, runtime: std::result::Result<Runtime, String>) -> Result<Arc<Self>> {
        let agent = Arc::new(Self { context, runtime });
        initialize(&agent)?;
        Ok(agent)
    }

    /// Configuration problem, if the agent is running unconfigured
    pub fn configuration_error(&self) -> Option<&str> {
        self.runtime.as_ref().err().map(String::as_str)
    }

    async fn run_task(&self, runtime: &Runtime, task: &TaskRequest) -> std::result::Result<TaskResult, String> {
        self.context.set_state("lastTaskId", json!(task.task_id));
        let processed = self
            .context
            .get_state("processedTasks")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        self.context.set_state("processedTasks", json!(processed + 1));

        match task.operation_class() {
            OperationClass::Read => self.answer_read(runtime, task).await,
            OperationClass::Write => {
                self.context
                    .log(&format!("Executing write operation for task {}", task.task_id));
                let result = runtime.strategy.run(task).await;
                Ok(result.to_task_result(&task.task_id))
            }
        }
    }

    async fn answer_read(&self, runtime: &Runtime, task: &TaskRequest) -> std::result::Result<TaskResult, String> {
        let chain_ids = task
            .chain_id
            .map(|id| vec![id])
            .unwrap_or_else(|| runtime.chain_ids.clone());
        let mut request = ProviderRequest::new(task.description.clone())
            .with_chain_ids(chain_ids)
            .with_session(task.session_id.clone());
        if let Some(wallet) = &task.user_wallet {
            request = request.with_from(wallet.clone());
        }

        let mut trace = vec![
            "Classified as a read operation".to_string(),
            format!("Asked {} for an answer", runtime.provider.name()),
        ];
        let text = match runtime.provider.chat(&request).await {
            Ok(ProviderOutcome::Text(text)) => text,
            Ok(ProviderOutcome::Hash(hash)) => format!("Transaction hash: {}", hash),
            Ok(ProviderOutcome::Actions { actions, .. }) => format!(
                "The provider proposed {} transaction(s); submit the request as a write operation to execute them",
                actions.len()
            ),
            Ok(ProviderOutcome::Pending { request_id, .. }) => {
                format!("Request {} is still being processed", request_id)
            }
            Ok(ProviderOutcome::Error(reason)) => return Err(format!("Provider error: {}", reason)),
            Err(e) => return Err(e.to_string()),
        };
        trace.push("Received answer".to_string());

        Ok(TaskResult {
            task_id: task.task_id.clone(),
            result: text,
            success: true,
            chain_of_thought: trace,
            ..Default::default()
        })
    }

    fn confirm(&self, runtime: &Runtime, envelope: &Envelope, request: &ConfirmRequest) -> Envelope {
        let manager = runtime.strategy.manager();
        match manager.confirm_transaction(&request.transaction_id, &request.transaction_hash) {
            Ok(record) => {
                self.context.log(&format!("Confirmed transaction {}", record.id));
                let result = TaskResult {
                    task_id: record.task_id.clone(),
                    result: format!(
                        "Transaction {} confirmed with hash {}",
                        record.id,
                        record.transaction_hash.as_deref().unwrap_or_default()
                    ),
                    success: true,
                    transaction_id: Some(record.id.clone()),
                    status: Some(record.status),
                    transaction_hash: record.transaction_hash.clone(),
                    ..Default::default()
                };
                envelope.reply(self.id(), Message::AgentResponse(result))
            }
            Err(e) => envelope.error_reply(self.id(), e.to_string()),
        }
    }
}

#[async_trait]
impl Agent for ExecutionAgent {
    fn context(&self) -> &AgentContext {
        &self.context
    }

    fn topics(&self) -> Vec<String> {
        vec![
            topics::EXECUTE_TASK.to_string(),
            topics::NEBULA_REQUEST.to_string(),
            topics::CONFIRM_TRANSACTION.to_string(),
        ]
    }

    fn capabilities(&self) -> Vec<String> {
        vec![
            CAPABILITY_EXECUTION.to_string(),
            CAPABILITY_TRANSACTIONS.to_string(),
            CAPABILITY_SESSION_SIGNING.to_string(),
        ]
    }

    /// Task requests may poll for a long time, so they do not hold up the
    /// mailbox. Confirmations stay in order.
    fn runs_concurrently(&self, envelope: &Envelope) -> bool {
        matches!(
            envelope.message,
            Message::ExecuteTask(_) | Message::NebulaRequest(_)
        )
    }

    async fn handle_message(&self, envelope: Envelope) -> Option<Envelope> {
        let handled = matches!(
            envelope.message,
            Message::ExecuteTask(_) | Message::NebulaRequest(_) | Message::ConfirmTransaction(_)
        );
        if !handled {
            return None;
        }

        let runtime = match &self.runtime {
            Ok(runtime) => runtime,
            Err(reason) => {
                return Some(envelope.error_reply(self.id(), format!("Agent is not configured: {}", reason)))
            }
        };

        let reply = match &envelope.message {
            Message::ExecuteTask(task) => match self.run_task(runtime, task).await {
                Ok(result) => envelope.reply(self.id(), Message::TaskStepComplete(result)),
                Err(e) => envelope.error_reply(self.id(), e),
            },
            Message::NebulaRequest(task) => match self.run_task(runtime, task).await {
                Ok(result) => envelope.reply(self.id(), Message::AgentResponse(result)),
                Err(e) => envelope.error_reply(self.id(), e),
            },
            Message::ConfirmTransaction(request) => self.confirm(runtime, &envelope, request),
            _ => return None,
        };
        Some(reply)
    }
}

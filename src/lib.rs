//! # a3s-agentbus
//!
//! Agent message bus and blockchain transaction lifecycle orchestration for
//! the A3S ecosystem.
//!
//! ## Overview
//!
//! Independent agents talk over a typed, in-process publish/subscribe bus.
//! Write operations are delegated to an external AI/transaction provider and
//! tracked as transaction records that move through a bounded status
//! machine, with fallbacks from provider auto-execution to session-key
//! signing, manual signing, and polling.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use a3s_agentbus::{
//!     AgentBusConfig, Envelope, ExecutionAgent, FileTransactionStore, MemoryDeadLetterHandler,
//!     Message, MessageBus, SessionKeyStore, TaskRequest, TransactionManager, TransactionMirror,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> a3s_agentbus::Result<()> {
//! let config = AgentBusConfig::from_env()?;
//! config.validate()?;
//!
//! let bus = Arc::new(MessageBus::new());
//! let sessions = Arc::new(SessionKeyStore::with_config(config.session.clone()));
//! let _sweeper = sessions.clone().start_sweeper();
//!
//! let store = Arc::new(FileTransactionStore::open("data/transactions.json")?);
//! let mirror = TransactionMirror::spawn(
//!     store,
//!     Arc::new(MemoryDeadLetterHandler::default()),
//!     config.mirror.clone(),
//! )?;
//! let manager = Arc::new(TransactionManager::with_mirror(mirror));
//!
//! let _executor = ExecutionAgent::from_config("executor", bus.clone(), &config, sessions, manager)?;
//!
//! let request = TaskRequest::new("task-1", "send 0.01 ETH to 0x1111111111111111111111111111111111111111")
//!     .with_wallet("0xabc0000000000000000000000000000000000001");
//! bus.publish(Envelope::new("orchestrator", Message::ExecuteTask(request)));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **MessageBus**: topic-keyed router with per-subscription mailboxes
//! - **Agent** trait: named worker with private state, wired by `initialize`
//! - **SessionKeyStore**: ephemeral signing keys per wallet with expiry
//! - **TransactionManager**: authoritative record map, mirrored write-behind
//! - **ExecutionStrategy**: auto-execute, session-key sign, manual sign, poll
//! - **TransactionProvider** / **TransactionSender**: external API seams

pub mod agent;
pub mod bus;
pub mod config;
pub mod dlq;
pub mod error;
pub mod evm;
pub mod lifecycle;
pub mod mirror;
pub mod network;
pub mod provider;
pub mod session;
pub mod state;
pub mod types;

// Re-export core types
pub use agent::{initialize, Agent, AgentContext, AgentDirectory, ExecutionAgent};
pub use bus::{handler_fn, BusInfo, MessageBus, MessageHandler, SubscriptionId};
pub use config::{
    AgentBusConfig, MirrorConfig, NetworkConfig, PollingConfig, ProviderConfig, SecretString,
    SessionConfig,
};
pub use dlq::{DeadLetter, DeadLetterHandler, MemoryDeadLetterHandler};
pub use error::{AgentBusError, Result};
pub use lifecycle::{
    ExecutionMethod, ExecutionStrategy, FailureKind, StatusCounts, StrategyOutcome,
    StrategyResult, TransactionManager, TransactionRecord, TransactionStatus,
};
pub use mirror::{MirrorStats, TransactionMirror};
pub use network::{JsonRpcClient, RpcTransactionSender, TransactionSender};
pub use provider::{
    parse_provider_response, parse_status_response, HttpTransactionProvider, PollStatus,
    ProviderAction, ProviderOutcome, ProviderRequest, TransactionProvider,
};
pub use session::{SessionKeyData, SessionKeyStore, SIGN_TRANSACTION, UNIVERSAL_PERMISSION};
pub use state::{FileTransactionStore, MemoryTransactionStore, TransactionStore};
pub use types::{
    topics, ConfirmRequest, Envelope, ErrorReport, Message, OperationClass, TaskRequest,
    TaskResult, UnsignedTransaction,
};

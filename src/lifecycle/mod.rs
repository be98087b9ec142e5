//! Transaction lifecycle: status records, the manager that owns them, and
//! the execution strategy chain that drives them

pub mod manager;
pub mod record;
pub mod strategy;

pub use manager::{StatusCounts, TransactionManager};
pub use record::{ExecutionMethod, FailureKind, TransactionRecord, TransactionStatus};
pub use strategy::{ExecutionStrategy, StrategyOutcome, StrategyResult};

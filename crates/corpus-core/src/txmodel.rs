//! Transaction context record.

use crate::backend::TxHandle;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Pending,
    Active,
    Preparing,
    Prepared,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
    Failed,
}

/// Which backend an operation-log entry or partial-commit failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Graph,
    Relational,
}

#[derive(Debug, Clone)]
pub struct OperationLogEntry {
    pub backend: BackendKind,
    pub description: String,
    pub at: DateTime<Utc>,
}

impl OperationLogEntry {
    pub fn new(backend: BackendKind, description: impl Into<String>) -> Self {
        Self {
            backend,
            description: description.into(),
            at: Utc::now(),
        }
    }

    /// A `partial_commit` log entry, naming the side whose second-phase
    /// commit failed after the other side's had already succeeded.
    pub fn partial_commit(failed_side: BackendKind) -> Self {
        Self::new(failed_side, "partial_commit")
    }
}

/// Record of a single cross-store transaction.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    pub transaction_id: Uuid,
    pub nested: bool,
    pub timeout: Option<Duration>,
    pub state: TxState,
    pub graph_tx_handle: Option<TxHandle>,
    pub sql_tx_handle: Option<TxHandle>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub operation_log: Vec<OperationLogEntry>,
}

impl TransactionContext {
    pub fn new(nested: bool, timeout: Option<Duration>) -> Self {
        Self {
            transaction_id: Uuid::new_v4(),
            nested,
            timeout,
            state: TxState::Pending,
            graph_tx_handle: None,
            sql_tx_handle: None,
            start_time: Utc::now(),
            end_time: None,
            operation_log: Vec::new(),
        }
    }

    pub fn log(&mut self, entry: OperationLogEntry) {
        self.operation_log.push(entry);
    }

    pub fn finish(&mut self, state: TxState) {
        self.state = state;
        self.end_time = Some(Utc::now());
    }
}

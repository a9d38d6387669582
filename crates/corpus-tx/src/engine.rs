//! Transaction engine: a registry of live cross-store transaction
//! contexts, 1PC/2PC commit, rollback, and timeout handling.
//!
//! Grounded on `dashflow-registry`'s `dashmap`-keyed in-memory registries for
//! the live-context table; the commit/rollback state machine itself is
//! authored fresh since nothing in the retrieved pack coordinates two
//! heterogeneous stores in one transaction.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use corpus_core::{BackendAdapter, BackendKind, CorpusError, OperationLogEntry, Params, Result, Row, TransactionContext, TxHandle, TxState};

use crate::supervisor::ConnectionSupervisor;

pub struct TransactionEngine<G: BackendAdapter, S: BackendAdapter> {
    graph: ConnectionSupervisor<G>,
    sql: ConnectionSupervisor<S>,
    contexts: DashMap<Uuid, TransactionContext>,
    /// Operation logs retained past `commit`'s registry cleanup for
    /// transactions whose commit ended in `partial_commit` — the one case
    /// where a caller needs to inspect the log after `commit` returns, since
    /// one side already landed its write and the other did not.
    partial_commits: DashMap<Uuid, Vec<OperationLogEntry>>,
    default_timeout: Duration,
    two_phase_commit: bool,
    log_to_relational: bool,
}

impl<G: BackendAdapter + 'static, S: BackendAdapter + 'static> TransactionEngine<G, S> {
    pub fn new(
        graph: ConnectionSupervisor<G>,
        sql: ConnectionSupervisor<S>,
        default_timeout: Duration,
        two_phase_commit: bool,
        log_to_relational: bool,
    ) -> Self {
        Self {
            graph,
            sql,
            contexts: DashMap::new(),
            partial_commits: DashMap::new(),
            default_timeout,
            two_phase_commit,
            log_to_relational,
        }
    }

    pub fn live_transaction_count(&self) -> usize {
        self.contexts.len()
    }

    /// The operation log of a transaction whose commit ended in
    /// `partial_commit`, retained under `tx_id` after `commit` returns. `None`
    /// once there is nothing retained for that id — either the transaction
    /// never partially committed, or its log was never recorded.
    pub fn partial_commit_log(&self, tx_id: Uuid) -> Option<Vec<OperationLogEntry>> {
        self.partial_commits.get(&tx_id).map(|e| e.value().clone())
    }

    /// Assigns a fresh id; nesting is detected by registry emptiness at the
    /// moment of the call. Non-nested contexts open real driver
    /// transactions on both adapters; nested ones share the outermost
    /// context's handles and open nothing new.
    pub async fn begin(&self, timeout: Option<Duration>) -> Result<Uuid> {
        let nested = !self.contexts.is_empty();
        let mut ctx = TransactionContext::new(nested, Some(timeout.unwrap_or(self.default_timeout)));

        if !nested {
            self.graph.ensure_connected().await?;
            self.sql.ensure_connected().await?;
            ctx.graph_tx_handle = Some(self.graph.adapter().begin_transaction().await?);
            ctx.sql_tx_handle = Some(self.sql.adapter().begin_transaction().await?);
        } else if let Some(outer) = self.outermost_handles() {
            ctx.graph_tx_handle = outer.0;
            ctx.sql_tx_handle = outer.1;
        }

        ctx.state = TxState::Active;
        let id = ctx.transaction_id;
        self.contexts.insert(id, ctx);
        Ok(id)
    }

    /// Any live context's handles identify the same driver-level
    /// transaction once nesting begins, since nested `begin` never opens a
    /// new one; the first context found is as good as any.
    fn outermost_handles(&self) -> Option<(Option<TxHandle>, Option<TxHandle>)> {
        self.contexts.iter().next().map(|e| (e.graph_tx_handle.clone(), e.sql_tx_handle.clone()))
    }

    fn handles_for(&self, tx_id: Uuid) -> Result<(Option<TxHandle>, Option<TxHandle>)> {
        let ctx = self.contexts.get(&tx_id).ok_or_else(|| no_such_transaction(tx_id))?;
        Ok((ctx.graph_tx_handle.clone(), ctx.sql_tx_handle.clone()))
    }

    fn set_state(&self, tx_id: Uuid, state: TxState) {
        if let Some(mut ctx) = self.contexts.get_mut(&tx_id) {
            let terminal = matches!(state, TxState::Committed | TxState::RolledBack | TxState::Failed);
            ctx.state = state;
            if terminal {
                ctx.end_time = Some(Utc::now());
            }
        }
    }

    fn append_log(&self, tx_id: Uuid, entry: OperationLogEntry) {
        if let Some(mut ctx) = self.contexts.get_mut(&tx_id) {
            ctx.log(entry);
        }
    }

    /// Runs `query` against the named backend inside `tx_id`'s context,
    /// appending an operation-log entry (and, if enabled, persisting it to
    /// `transaction_logs`).
    pub async fn execute(&self, tx_id: Uuid, backend: BackendKind, query: &str, params: Params) -> Result<Vec<Row>> {
        let (graph_handle, sql_handle) = self.handles_for(tx_id)?;

        let rows = match backend {
            BackendKind::Graph => {
                let handle = graph_handle.ok_or_else(|| CorpusError::TransactionError("transaction has no graph handle".to_string()))?;
                self.graph.adapter().execute_query(query, params, Some(&handle)).await?
            }
            BackendKind::Relational => {
                let handle = sql_handle.ok_or_else(|| CorpusError::TransactionError("transaction has no relational handle".to_string()))?;
                self.sql.adapter().execute_query(query, params, Some(&handle)).await?
            }
        };

        self.append_log(tx_id, OperationLogEntry::new(backend, query.to_string()));
        if self.log_to_relational {
            self.persist_log_entry(tx_id, backend, query).await;
        }

        Ok(rows)
    }

    /// Best-effort: `transaction_logs` is ambient bookkeeping, not a
    /// correctness invariant, so a failure to persist is logged and
    /// swallowed rather than failing the caller's operation.
    async fn persist_log_entry(&self, tx_id: Uuid, backend: BackendKind, description: &str) {
        let backend_name = match backend {
            BackendKind::Graph => "graph",
            BackendKind::Relational => "relational",
        };
        let query = "INSERT INTO transaction_logs (transaction_id, backend, description, at) VALUES (:transaction_id, :backend, :description, now())";
        let mut named = std::collections::HashMap::new();
        named.insert("transaction_id".to_string(), serde_json::Value::String(tx_id.to_string()));
        named.insert("backend".to_string(), serde_json::Value::String(backend_name.to_string()));
        named.insert("description".to_string(), serde_json::Value::String(description.to_string()));
        if let Err(e) = self.sql.adapter().execute_query(query, Params::Named(named), None).await {
            tracing::warn!(error = %e, %tx_id, "failed to persist transaction_logs entry");
        }
    }

    /// 1PC (default) commits graph then relational; 2PC (opt-in) prepares
    /// both before committing both. Nested contexts only run bookkeeping —
    /// no driver-level commit happens underneath an already-open outer
    /// transaction.
    pub async fn commit(&self, tx_id: Uuid) -> Result<()> {
        let nested = {
            let ctx = self.contexts.get(&tx_id).ok_or_else(|| no_such_transaction(tx_id))?;
            ctx.nested
        };

        if nested {
            self.set_state(tx_id, TxState::Committed);
            self.contexts.remove(&tx_id);
            return Ok(());
        }

        let (graph_handle, sql_handle) = self.handles_for(tx_id)?;
        let graph_handle = graph_handle.ok_or_else(|| CorpusError::TransactionError("transaction has no graph handle".to_string()))?;
        let sql_handle = sql_handle.ok_or_else(|| CorpusError::TransactionError("transaction has no relational handle".to_string()))?;

        let result = if self.two_phase_commit {
            self.commit_2pc(tx_id, &graph_handle, &sql_handle).await
        } else {
            self.commit_1pc(tx_id, &graph_handle, &sql_handle).await
        };

        if let Some(ctx) = self.contexts.get(&tx_id) {
            if ctx.operation_log.iter().any(|e| e.description == "partial_commit") {
                self.partial_commits.insert(tx_id, ctx.operation_log.clone());
            }
        }
        self.contexts.remove(&tx_id);
        result
    }

    async fn commit_1pc(&self, tx_id: Uuid, graph_handle: &TxHandle, sql_handle: &TxHandle) -> Result<()> {
        if let Err(e) = self.graph.adapter().commit_transaction(graph_handle).await {
            self.set_state(tx_id, TxState::Failed);
            return Err(CorpusError::TransactionError(format!("graph commit failed: {e}")));
        }

        match self.sql.adapter().commit_transaction(sql_handle).await {
            Ok(()) => {
                self.set_state(tx_id, TxState::Committed);
                Ok(())
            }
            Err(e) => {
                self.append_log(tx_id, OperationLogEntry::partial_commit(BackendKind::Relational));
                self.set_state(tx_id, TxState::Failed);
                Err(CorpusError::TransactionError(format!(
                    "partial commit: relational commit failed after graph commit succeeded: {e}"
                )))
            }
        }
    }

    async fn commit_2pc(&self, tx_id: Uuid, graph_handle: &TxHandle, sql_handle: &TxHandle) -> Result<()> {
        self.set_state(tx_id, TxState::Preparing);
        let graph_prepared = self.graph.adapter().prepare_transaction(graph_handle).await;
        let sql_prepared = self.sql.adapter().prepare_transaction(sql_handle).await;

        if graph_prepared.is_err() || sql_prepared.is_err() {
            let _ = self.graph.adapter().rollback_transaction(graph_handle).await;
            let _ = self.sql.adapter().rollback_transaction(sql_handle).await;
            self.set_state(tx_id, TxState::Failed);
            return Err(CorpusError::TransactionError("prepare failed on one or more backends; rolled back both".to_string()));
        }

        self.set_state(tx_id, TxState::Prepared);
        self.set_state(tx_id, TxState::Committing);

        if let Err(e) = self.graph.adapter().commit_prepared(graph_handle).await {
            self.set_state(tx_id, TxState::Failed);
            return Err(CorpusError::TransactionError(format!("graph commit_prepared failed: {e}")));
        }

        match self.sql.adapter().commit_prepared(sql_handle).await {
            Ok(()) => {
                self.set_state(tx_id, TxState::Committed);
                Ok(())
            }
            Err(e) => {
                self.append_log(tx_id, OperationLogEntry::partial_commit(BackendKind::Relational));
                self.set_state(tx_id, TxState::Failed);
                Err(CorpusError::TransactionError(format!(
                    "partial commit: relational commit_prepared failed after graph commit_prepared succeeded: {e}"
                )))
            }
        }
    }

    /// Runs `rollback_transaction` on both adapters for a non-nested
    /// context; a nested context's rollback is bookkeeping only, mirroring
    /// `commit`'s nested no-op.
    pub async fn rollback(&self, tx_id: Uuid) -> Result<()> {
        let (nested, graph_handle, sql_handle) = {
            let ctx = self.contexts.get(&tx_id).ok_or_else(|| no_such_transaction(tx_id))?;
            (ctx.nested, ctx.graph_tx_handle.clone(), ctx.sql_tx_handle.clone())
        };

        if nested {
            self.set_state(tx_id, TxState::RolledBack);
            self.contexts.remove(&tx_id);
            return Ok(());
        }

        self.set_state(tx_id, TxState::RollingBack);
        let mut errors = Vec::new();
        if let Some(h) = &graph_handle {
            if let Err(e) = self.graph.adapter().rollback_transaction(h).await {
                errors.push(e);
            }
        }
        if let Some(h) = &sql_handle {
            if let Err(e) = self.sql.adapter().rollback_transaction(h).await {
                errors.push(e);
            }
        }

        self.contexts.remove(&tx_id);

        if errors.is_empty() {
            self.set_state(tx_id, TxState::RolledBack);
            Ok(())
        } else {
            let cause = errors.remove(0);
            Err(CorpusError::rollback_failed("rollback failed on one or more backends", cause))
        }
    }

    /// Wraps `f` in a cancellable timer scoped to `tx_id`'s configured
    /// timeout. Expiry or a body error both trigger rollback before the
    /// original error propagates; a rollback failure itself chains the
    /// original as `TransactionRollbackError`'s cause.
    pub async fn with_timeout<T, F, Fut>(&self, tx_id: Uuid, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = {
            let ctx = self.contexts.get(&tx_id).ok_or_else(|| no_such_transaction(tx_id))?;
            ctx.timeout.unwrap_or(self.default_timeout)
        };

        match tokio::time::timeout(timeout, f()).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(body_err)) => Err(self.rollback_then_chain(tx_id, body_err).await),
            Err(_elapsed) => {
                let timeout_err = CorpusError::OperationTimeoutError(timeout.as_secs());
                Err(self.rollback_then_chain(tx_id, timeout_err).await)
            }
        }
    }

    async fn rollback_then_chain(&self, tx_id: Uuid, original: CorpusError) -> CorpusError {
        match self.rollback(tx_id).await {
            Ok(()) => original,
            Err(rollback_err) => CorpusError::rollback_failed(rollback_err.to_string(), original),
        }
    }
}

fn no_such_transaction(tx_id: Uuid) -> CorpusError {
    CorpusError::TransactionError(format!("no such live transaction {tx_id}"))
}

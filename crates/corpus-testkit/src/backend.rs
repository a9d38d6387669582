use crate::dispatch;
use async_trait::async_trait;
use corpus_core::{AdapterState, BackendAdapter, ConnectionState, CorpusError, Params, Result, Row, TxHandle};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use uuid::Uuid;

/// A named table of rows, keyed like a SQL table or a graph node/edge
/// collection (`"ASTNode"`, `"ASTNode_EDGES"`, `"corpus_intent_mapping"`, ...).
pub(crate) type Tables = HashMap<String, Vec<Row>>;

struct TxSnapshot {
    tables: Tables,
    prepared: bool,
}

/// In-memory stand-in for either the graph or the relational `BackendAdapter`.
///
/// Transactions are implemented by snapshotting the whole table set at
/// `begin_transaction` and restoring it on `rollback_transaction`; writes
/// made inside a transaction are applied directly to the live tables (no
/// per-handle isolation), which is sufficient for the single-writer test
/// scenarios this double exists for.
pub struct InMemoryBackend {
    label: &'static str,
    state: AdapterState,
    connected: AtomicBool,
    pub(crate) tables: RwLock<Tables>,
    txns: DashMap<Uuid, TxSnapshot>,
    migrations: RwLock<std::collections::HashSet<String>>,
    vector_capable: AtomicBool,
    fail_next_connect: AtomicBool,
    fail_next_query: AtomicBool,
    fail_next_prepare: AtomicBool,
    fail_next_commit: AtomicBool,
    fail_next_commit_prepared: AtomicBool,
}

impl InMemoryBackend {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            state: AdapterState::new(),
            connected: AtomicBool::new(false),
            tables: RwLock::new(HashMap::new()),
            txns: DashMap::new(),
            migrations: RwLock::new(std::collections::HashSet::new()),
            vector_capable: AtomicBool::new(true),
            fail_next_connect: AtomicBool::new(false),
            fail_next_query: AtomicBool::new(false),
            fail_next_prepare: AtomicBool::new(false),
            fail_next_commit: AtomicBool::new(false),
            fail_next_commit_prepared: AtomicBool::new(false),
        }
    }

    pub fn graph() -> Self {
        Self::new("graph")
    }

    pub fn relational() -> Self {
        Self::new("relational")
    }

    /// Whether `CREATE EXTENSION IF NOT EXISTS vector` should succeed on its
    /// next probe. Defaults to `true`; set `false` to exercise the
    /// no-vector-support path.
    pub fn set_vector_capable(&self, capable: bool) {
        self.vector_capable.store(capable, Ordering::SeqCst);
    }

    pub fn fail_next_connect(&self) {
        self.fail_next_connect.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_query(&self) {
        self.fail_next_query.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_prepare(&self) {
        self.fail_next_prepare.store(true, Ordering::SeqCst);
    }

    pub fn live_transaction_count(&self) -> usize {
        self.txns.len()
    }

    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_commit_prepared(&self) {
        self.fail_next_commit_prepared.store(true, Ordering::SeqCst);
    }

    /// Seeds rows into `table` directly, bypassing query dispatch — used to
    /// pre-populate `corpus_search_documents` or any other externally
    /// provisioned table a test wants to assert reads against.
    pub fn seed(&self, table: &str, rows: Vec<Row>) {
        self.tables.write().unwrap().entry(table.to_string()).or_default().extend(rows);
    }

    pub fn snapshot(&self, table: &str) -> Vec<Row> {
        self.tables.read().unwrap().get(table).cloned().unwrap_or_default()
    }

    pub(crate) fn label(&self) -> &'static str {
        self.label
    }

    fn connection_error(&self, message: String) -> CorpusError {
        if self.label == "graph" {
            CorpusError::GraphConnectionError(message)
        } else {
            CorpusError::PostgresConnectionError(message)
        }
    }
}

#[async_trait]
impl BackendAdapter for InMemoryBackend {
    async fn connect(&self) -> Result<()> {
        if self.fail_next_connect.swap(false, Ordering::SeqCst) {
            self.state.set_state(ConnectionState::Failed);
            return Err(self.connection_error(format!("{} connect failed (injected)", self.label)));
        }
        self.connected.store(true, Ordering::SeqCst);
        self.state.set_state(ConnectionState::Connected);
        self.state.close_breaker();
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.state.set_state(ConnectionState::Closed);
        self.txns.clear();
        Ok(())
    }

    async fn health_check(&self) -> Result<(bool, u64)> {
        Ok((self.connected.load(Ordering::SeqCst), 0))
    }

    async fn execute_query(&self, query: &str, params: Params, _tx: Option<&TxHandle>) -> Result<Vec<Row>> {
        if self.fail_next_query.swap(false, Ordering::SeqCst) {
            return Err(CorpusError::DataOperationError(format!("{} query failed (injected)", self.label)));
        }
        dispatch::execute_query(self, query, &dispatch::named_params(&params))
    }

    async fn batch_insert(&self, query: &str, rows: Vec<Params>, _batch_size: usize) -> Result<u64> {
        if self.fail_next_query.swap(false, Ordering::SeqCst) {
            return Err(CorpusError::DataOperationError(format!("{} batch insert failed (injected)", self.label)));
        }
        dispatch::batch_insert(self, query, rows)
    }

    async fn begin_transaction(&self) -> Result<TxHandle> {
        let id = Uuid::new_v4();
        let tables = self.tables.read().unwrap().clone();
        self.txns.insert(id, TxSnapshot { tables, prepared: false });
        Ok(TxHandle(id.to_string()))
    }

    async fn commit_transaction(&self, handle: &TxHandle) -> Result<()> {
        let id = parse_handle(handle)?;
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(CorpusError::TransactionError(format!("{} commit failed (injected)", self.label)));
        }
        self.txns.remove(&id).ok_or_else(|| CorpusError::TransactionError(format!("unknown transaction {id}")))?;
        Ok(())
    }

    async fn rollback_transaction(&self, handle: &TxHandle) -> Result<()> {
        let id = parse_handle(handle)?;
        let (_, snapshot) = self
            .txns
            .remove(&id)
            .ok_or_else(|| CorpusError::TransactionError(format!("unknown transaction {id}")))?;
        *self.tables.write().unwrap() = snapshot.tables;
        Ok(())
    }

    async fn prepare_transaction(&self, handle: &TxHandle) -> Result<()> {
        let id = parse_handle(handle)?;
        if self.fail_next_prepare.swap(false, Ordering::SeqCst) {
            return Err(CorpusError::TransactionError(format!("{} prepare failed (injected)", self.label)));
        }
        let mut entry = self
            .txns
            .get_mut(&id)
            .ok_or_else(|| CorpusError::TransactionError(format!("unknown transaction {id}")))?;
        entry.prepared = true;
        Ok(())
    }

    async fn commit_prepared(&self, handle: &TxHandle) -> Result<()> {
        let id = parse_handle(handle)?;
        if self.fail_next_commit_prepared.swap(false, Ordering::SeqCst) {
            return Err(CorpusError::TransactionError(format!("{} commit_prepared failed (injected)", self.label)));
        }
        let removed = self.txns.remove(&id);
        match removed {
            Some((_, snapshot)) if snapshot.prepared => Ok(()),
            Some((id, snapshot)) => {
                self.txns.insert(id, snapshot);
                Err(CorpusError::TransactionError(format!("{id} was never prepared")))
            }
            None => Err(CorpusError::TransactionError(format!("unknown transaction {id}"))),
        }
    }

    fn connection_state(&self) -> ConnectionState {
        self.state.state()
    }

    fn adapter_state(&self) -> &AdapterState {
        &self.state
    }
}

fn parse_handle(handle: &TxHandle) -> Result<Uuid> {
    Uuid::parse_str(&handle.0).map_err(|e| CorpusError::TransactionError(format!("malformed transaction handle: {e}")))
}

/// Returns `true` the first time `id` is seen (mirrors the real
/// `corpus_migrations` `ON CONFLICT DO NOTHING RETURNING id` semantics,
/// where a non-empty `RETURNING` set means "just applied").
pub(crate) fn mark_migration(backend: &InMemoryBackend, id: &str) -> bool {
    backend.migrations.write().unwrap().insert(id.to_string())
}

pub(crate) fn vector_capable(backend: &InMemoryBackend) -> bool {
    backend.vector_capable.load(Ordering::SeqCst)
}

pub(crate) fn value_row(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> Row {
    let mut row = Row::new();
    for (k, v) in pairs {
        row.insert(k.to_string(), v);
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_failure_injection_surfaces_once() {
        let backend = InMemoryBackend::graph();
        backend.fail_next_connect();
        assert!(backend.connect().await.is_err());
        assert!(backend.connect().await.is_ok());
    }

    #[tokio::test]
    async fn rollback_restores_pre_transaction_state() {
        let backend = InMemoryBackend::relational();
        backend.seed("corpus_search_documents", vec![value_row([("id", Value::String("doc-1".to_string()))])]);

        let tx = backend.begin_transaction().await.unwrap();
        backend.tables.write().unwrap().entry("corpus_search_documents".to_string()).or_default().push(value_row([(
            "id",
            Value::String("doc-2".to_string()),
        )]));
        assert_eq!(backend.snapshot("corpus_search_documents").len(), 2);

        backend.rollback_transaction(&tx).await.unwrap();
        assert_eq!(backend.snapshot("corpus_search_documents").len(), 1);
    }

    #[tokio::test]
    async fn commit_prepared_requires_prior_prepare() {
        let backend = InMemoryBackend::graph();
        let tx = backend.begin_transaction().await.unwrap();
        assert!(backend.commit_prepared(&tx).await.is_err());

        let tx2 = backend.begin_transaction().await.unwrap();
        backend.prepare_transaction(&tx2).await.unwrap();
        assert!(backend.commit_prepared(&tx2).await.is_ok());
    }

    #[tokio::test]
    async fn injected_commit_failure_leaves_transaction_open_for_rollback() {
        let backend = InMemoryBackend::graph();
        let tx = backend.begin_transaction().await.unwrap();
        backend.fail_next_commit();
        assert!(backend.commit_transaction(&tx).await.is_err());
        assert!(backend.rollback_transaction(&tx).await.is_ok());
    }
}

//! The `Corpus` facade: owns one `Config`, two adapters each behind a
//! `ConnectionSupervisor`, one shared `HealthMonitor`, one
//! `TransactionEngine`, and the three domain services. Every public method
//! is a thin forwarder, gated by the same `initialized` flag.
//!
//! Grounded on `dashflow-registry::client::RegistryClient`'s
//! connect/close-lifecycle shape (one struct owning a supervised connection
//! plus derived services), generalized to two supervised adapters and a
//! cross-store transaction engine.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use corpus_core::{BackendAdapter, BackendKind, Config, CorpusError, Params, Result, RetryPolicy, Row, TxHandle};
use corpus_ingest::{AstGraph, AstIngestor, IngestReport};
use corpus_intent::{IntentMapping, IntentStore, LinkResult, VectorMatch};
use corpus_search::{SearchEngine, SearchQuery, SearchResult};
use corpus_tx::{ConnectionSupervisor, HealthMonitor, TransactionEngine};

fn retry_policy(config: &Config) -> RetryPolicy {
    RetryPolicy::exponential(config.max_retry_attempts)
        .with_backoff_factor(config.retry_backoff_factor)
        .with_max_delay(Duration::from_secs(config.retry_max_delay))
}

/// Single entry point wiring every lower layer together. Generic over the
/// two adapter types so the same code runs against the real drivers
/// (`ProductionCorpus`) and against `corpus_testkit::InMemoryBackend` in
/// tests.
pub struct Corpus<G: BackendAdapter + 'static, S: BackendAdapter + 'static> {
    config: Config,
    graph_supervisor: Arc<ConnectionSupervisor<G>>,
    sql_supervisor: Arc<ConnectionSupervisor<S>>,
    health_monitor: HealthMonitor,
    tx_engine: TransactionEngine<G, S>,
    ingestor: AstIngestor<G>,
    intent_store: Arc<IntentStore<S>>,
    search_engine: SearchEngine<G, S>,
    initialized: AtomicBool,
}

impl<G: BackendAdapter + 'static, S: BackendAdapter + 'static> Corpus<G, S> {
    /// Wires every collaborator but connects nothing; call [`initialize`]
    /// before using any other method. `*_connection_error` tell the
    /// supervisors which `CorpusError` variant a breaker-open or exhausted
    /// retry should surface as, since the facade is generic over the
    /// adapter type and cannot otherwise tell graph from relational.
    ///
    /// [`initialize`]: Corpus::initialize
    pub fn new(
        config: Config,
        graph_adapter: Arc<G>,
        sql_adapter: Arc<S>,
        graph_connection_error: fn(String) -> CorpusError,
        sql_connection_error: fn(String) -> CorpusError,
    ) -> Self {
        let policy = retry_policy(&config);

        let graph_supervisor = Arc::new(ConnectionSupervisor::new(Arc::clone(&graph_adapter), policy, graph_connection_error));
        let sql_supervisor = Arc::new(ConnectionSupervisor::new(Arc::clone(&sql_adapter), policy, sql_connection_error));

        // The Transaction Engine owns its own supervisor pair, sharing the
        // same underlying adapters (and so the same `AdapterState`) as the
        // ones handed to the domain services below. 1PC is the default
        // commit mode; `config.two_phase_commit` is the only opt-in into 2PC.
        let tx_engine = TransactionEngine::new(
            ConnectionSupervisor::new(Arc::clone(&graph_adapter), policy, graph_connection_error),
            ConnectionSupervisor::new(Arc::clone(&sql_adapter), policy, sql_connection_error),
            Duration::from_secs(config.timeout_seconds),
            config.two_phase_commit,
            true,
        );

        let ingestor = AstIngestor::new(Arc::clone(&graph_supervisor));
        let intent_store = Arc::new(IntentStore::new(Arc::clone(&sql_supervisor)));
        let search_engine = SearchEngine::new(Arc::clone(&graph_supervisor), Arc::clone(&sql_supervisor), Arc::clone(&intent_store));

        Self {
            config,
            graph_supervisor,
            sql_supervisor,
            health_monitor: HealthMonitor::new(),
            tx_engine,
            ingestor,
            intent_store,
            search_engine,
            initialized: AtomicBool::new(false),
        }
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CorpusError::NotInitialized)
        }
    }

    async fn with_timeout<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(Duration::from_secs(self.config.timeout_seconds), fut).await {
            Ok(result) => result,
            Err(_) => Err(CorpusError::OperationTimeoutError(self.config.timeout_seconds)),
        }
    }

    /// Connects both adapters with retry, runs the Intent Store's migration
    /// bookkeeping, and starts the health loop. Idempotent.
    pub async fn initialize(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        tokio::try_join!(self.graph_supervisor.ensure_connected(), self.sql_supervisor.ensure_connected())?;
        self.intent_store.init_schema().await?;

        let health_interval = Duration::from_secs(self.config.health_check_interval);
        self.health_monitor.spawn(
            Arc::clone(self.graph_supervisor.adapter()) as Arc<dyn BackendAdapter>,
            Arc::clone(self.sql_supervisor.adapter()) as Arc<dyn BackendAdapter>,
            health_interval,
            self.config.enable_auto_reconnect,
        );

        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!("corpus facade initialized");
        Ok(())
    }

    /// Cancels the health loop and disconnects both adapters. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.health_monitor.stop();
        let graph_result = self.graph_supervisor.adapter().disconnect().await;
        let sql_result = self.sql_supervisor.adapter().disconnect().await;
        graph_result?;
        sql_result?;
        Ok(())
    }

    pub async fn execute_graph_query(&self, query: &str, params: Params, tx: Option<&TxHandle>) -> Result<Vec<Row>> {
        self.ensure_initialized()?;
        self.graph_supervisor.ensure_connected().await?;
        self.with_timeout(self.graph_supervisor.adapter().execute_query(query, params, tx)).await
    }

    pub async fn execute_relational_query(&self, query: &str, params: Params, tx: Option<&TxHandle>) -> Result<Vec<Row>> {
        self.ensure_initialized()?;
        self.sql_supervisor.ensure_connected().await?;
        self.with_timeout(self.sql_supervisor.adapter().execute_query(query, params, tx)).await
    }

    pub async fn batch_insert_graph(&self, query: &str, rows: Vec<Params>, batch_size: usize) -> Result<u64> {
        self.ensure_initialized()?;
        self.graph_supervisor.ensure_connected().await?;
        self.with_timeout(self.graph_supervisor.adapter().batch_insert(query, rows, batch_size)).await
    }

    pub async fn batch_insert_relational(&self, query: &str, rows: Vec<Params>, batch_size: usize) -> Result<u64> {
        self.ensure_initialized()?;
        self.sql_supervisor.ensure_connected().await?;
        self.with_timeout(self.sql_supervisor.adapter().batch_insert(query, rows, batch_size)).await
    }

    /// Runs `f` inside a cross-store transaction: begins, runs `f` under the
    /// transaction's timeout (rolling back on error or expiry, per
    /// `TransactionEngine::with_timeout`), then commits on success. `f`
    /// receives the transaction id to pass into [`execute_in_transaction`].
    ///
    /// [`execute_in_transaction`]: Corpus::execute_in_transaction
    pub async fn transaction<F, Fut, T>(&self, timeout: Option<Duration>, f: F) -> Result<T>
    where
        F: FnOnce(Uuid) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.ensure_initialized()?;
        let tx_id = self.tx_engine.begin(timeout).await?;
        let value = self.tx_engine.with_timeout(tx_id, || f(tx_id)).await?;
        self.tx_engine.commit(tx_id).await?;
        Ok(value)
    }

    /// Routes a query through `tx_id`'s registered handles. The only way
    /// code running inside a [`transaction`] closure reaches a backend.
    ///
    /// [`transaction`]: Corpus::transaction
    pub async fn execute_in_transaction(&self, tx_id: Uuid, backend: BackendKind, query: &str, params: Params) -> Result<Vec<Row>> {
        self.ensure_initialized()?;
        self.tx_engine.execute(tx_id, backend, query, params).await
    }

    /// The operation log of a transaction whose [`transaction`] commit ended
    /// in `partial_commit` — `None` if `tx_id` never partially committed.
    ///
    /// [`transaction`]: Corpus::transaction
    pub fn partial_commit_log(&self, tx_id: Uuid) -> Option<Vec<corpus_core::OperationLogEntry>> {
        self.tx_engine.partial_commit_log(tx_id)
    }

    pub async fn store_ast_graph(&self, graph: &AstGraph, source_id: &str, metadata: Option<&HashMap<String, Value>>) -> Result<IngestReport> {
        self.ensure_initialized()?;
        self.with_timeout(self.ingestor.store_ast_graph(graph, source_id, metadata)).await
    }

    pub async fn search_unified(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        self.ensure_initialized()?;
        Ok(self.search_engine.search(query).await)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn link(
        &self,
        intent_id: &str,
        ast_node_ids: &[String],
        source_id: &str,
        confidence: f64,
        metadata: Option<&Value>,
        vector: Option<&[f32]>,
    ) -> Result<LinkResult> {
        self.ensure_initialized()?;
        self.with_timeout(self.intent_store.link(intent_id, ast_node_ids, source_id, confidence, metadata, vector))
            .await
    }

    pub async fn get_ast_nodes_by_intent(&self, intent_id: &str, min_confidence: f64) -> Result<Vec<IntentMapping>> {
        self.ensure_initialized()?;
        self.with_timeout(self.intent_store.get_ast_nodes_by_intent(intent_id, min_confidence)).await
    }

    pub async fn get_intents_for_ast(&self, ast_node_id: &str, min_confidence: f64) -> Result<Vec<IntentMapping>> {
        self.ensure_initialized()?;
        self.with_timeout(self.intent_store.get_intents_for_ast(ast_node_id, min_confidence)).await
    }

    pub async fn update_confidence(&self, intent_id: &str, ast_node_id: &str, new_confidence: f64) -> Result<bool> {
        self.ensure_initialized()?;
        self.with_timeout(self.intent_store.update_confidence(intent_id, ast_node_id, new_confidence))
            .await
    }

    pub async fn remove(&self, intent_id: &str, ast_node_id: Option<&str>) -> Result<u64> {
        self.ensure_initialized()?;
        self.with_timeout(self.intent_store.remove(intent_id, ast_node_id)).await
    }

    pub async fn search_by_vector(&self, vector: &[f32], limit: usize, threshold: f64) -> Result<Vec<VectorMatch>> {
        self.ensure_initialized()?;
        self.with_timeout(self.intent_store.search_by_vector(vector, limit, threshold)).await
    }
}

impl Corpus<corpus_graph::Neo4jBackend, corpus_sql::PostgresBackend> {
    /// Convenience constructor for the production adapter pair, reading
    /// connection details straight off `config`. Does not connect; call
    /// [`initialize`] afterwards.
    ///
    /// [`initialize`]: Corpus::initialize
    pub fn connect(config: Config) -> Self {
        let graph_adapter = Arc::new(corpus_graph::Neo4jBackend::new(
            config.graph_uri.clone(),
            config.graph_user.clone(),
            config.graph_secret().to_string(),
            config.enable_auto_reconnect,
        ));
        let sql_adapter = Arc::new(corpus_sql::PostgresBackend::new(
            config.relational_dsn.clone(),
            config.connection_pool_size,
            Duration::from_secs(config.timeout_seconds),
            config.enable_auto_reconnect,
        ));
        Self::new(
            config,
            graph_adapter,
            sql_adapter,
            CorpusError::GraphConnectionError,
            CorpusError::PostgresConnectionError,
        )
    }
}

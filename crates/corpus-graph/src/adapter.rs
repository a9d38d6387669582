//! `Neo4jBackend`: the graph side of `corpus_core::BackendAdapter`.
//!
//! Grounded on `dashflow-neo4j::neo4j_graph::Neo4jGraph`'s
//! connect/query shape, generalized from a single-shot LangChain query
//! surface to the full adapter contract (transactions, 2PC stub,
//! auto-reconnect, batch inserts with accumulated counters).

use async_trait::async_trait;
use corpus_core::{
    AdapterState, BackendAdapter, ConnectionState, CorpusError, Params, Result, Row, TxHandle,
};
use dashmap::DashMap;
use neo4rs::{Graph, Query};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use uuid::Uuid;

use crate::rows::row_to_map;

/// `serde_json::Value` → `neo4rs::BoltType`, recursively. neo4rs has no
/// blanket `From<serde_json::Value>` impl, only per-primitive ones, so JSON
/// values coming out of `corpus_core::Params` are walked by hand.
fn json_to_bolt(v: &serde_json::Value) -> neo4rs::BoltType {
    use serde_json::Value;
    match v {
        Value::Null => neo4rs::BoltType::Null(neo4rs::BoltNull),
        Value::Bool(b) => neo4rs::BoltType::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                neo4rs::BoltType::from(i)
            } else {
                neo4rs::BoltType::from(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => neo4rs::BoltType::from(s.clone()),
        Value::Array(items) => {
            let list: Vec<neo4rs::BoltType> = items.iter().map(json_to_bolt).collect();
            neo4rs::BoltType::List(list.into())
        }
        Value::Object(map) => {
            let mut bolt_map = std::collections::HashMap::new();
            for (k, v) in map {
                bolt_map.insert(k.clone(), json_to_bolt(v));
            }
            neo4rs::BoltType::Map(bolt_map.into())
        }
    }
}

fn to_query(query: &str, params: Params) -> Query {
    let mut q = Query::new(query.to_string());
    match params {
        Params::Positional(values) => {
            for (i, v) in values.iter().enumerate() {
                q = q.param(&format!("p{i}"), json_to_bolt(v));
            }
        }
        Params::Named(named) => {
            for (k, v) in &named {
                q = q.param(k, json_to_bolt(v));
            }
        }
    }
    q
}

/// Neo4j-backed `BackendAdapter`. Holds the driver's connection pool behind
/// an `RwLock` so `disconnect`/reconnect can swap it out without blocking
/// concurrent readers, and a table of open driver transactions keyed by the
/// opaque `TxHandle` the Transaction Engine hands back to callers.
pub struct Neo4jBackend {
    uri: String,
    user: String,
    secret: String,
    auto_reconnect: bool,
    graph: RwLock<Option<Arc<Graph>>>,
    state: AdapterState,
    txns: DashMap<String, AsyncMutex<neo4rs::Txn>>,
}

impl Neo4jBackend {
    pub fn new(uri: impl Into<String>, user: impl Into<String>, secret: impl Into<String>, auto_reconnect: bool) -> Self {
        Self {
            uri: uri.into(),
            user: user.into(),
            secret: secret.into(),
            auto_reconnect,
            graph: RwLock::new(None),
            state: AdapterState::new(),
            txns: DashMap::new(),
        }
    }

    async fn graph_handle(&self) -> Result<Arc<Graph>> {
        self.graph
            .read()
            .await
            .clone()
            .ok_or_else(|| CorpusError::GraphConnectionError("not connected".to_string()))
    }

    async fn open_driver_connection(&self) -> Result<Graph> {
        // Mirrors dashflow-neo4j::Neo4jGraph::new, which dials with
        // Graph::new(uri, user, password) and leaves database selection to
        // the URI/default database.
        Graph::new(&self.uri, &self.user, &self.secret)
            .await
            .map_err(|e| CorpusError::GraphConnectionError(e.to_string()))
    }

    async fn reconnect(&self) -> Result<()> {
        self.state.set_state(ConnectionState::Reconnecting);
        match self.open_driver_connection().await {
            Ok(g) => {
                *self.graph.write().await = Some(Arc::new(g));
                self.state.set_state(ConnectionState::Connected);
                self.state.close_breaker();
                Ok(())
            }
            Err(e) => {
                self.state.set_state(ConnectionState::Failed);
                self.state.open_breaker();
                Err(e)
            }
        }
    }

    /// Runs one UNWIND-batched statement and returns the driver-reported
    /// created-node + created-relationship count for that batch alone.
    async fn run_batch(&self, graph: &Graph, query: &str, batch: &[Params]) -> Result<u64> {
        let rows: Vec<neo4rs::BoltType> = batch
            .iter()
            .map(|p| match p {
                Params::Positional(v) => json_to_bolt(&serde_json::Value::Array(v.clone())),
                Params::Named(m) => json_to_bolt(&serde_json::to_value(m).unwrap_or_default()),
            })
            .collect();
        let q = Query::new(query.to_string()).param("rows", neo4rs::BoltType::List(rows.into()));
        let mut result = graph
            .execute(q)
            .await
            .map_err(|e| CorpusError::DataOperationError(e.to_string()))?;
        while result
            .next()
            .await
            .map_err(|e| CorpusError::DataOperationError(e.to_string()))?
            .is_some()
        {}
        let summary = result
            .finish()
            .await
            .map_err(|e| CorpusError::DataOperationError(e.to_string()))?;
        let stats = summary.stats();
        Ok((stats.nodes_created + stats.relationships_created) as u64)
    }
}

#[async_trait]
impl BackendAdapter for Neo4jBackend {
    async fn connect(&self) -> Result<()> {
        self.state.set_state(ConnectionState::Connecting);
        match self.open_driver_connection().await {
            Ok(g) => {
                *self.graph.write().await = Some(Arc::new(g));
                self.state.set_state(ConnectionState::Connected);
                self.state.close_breaker();
                Ok(())
            }
            Err(e) => {
                self.state.set_state(ConnectionState::Failed);
                self.state.open_breaker();
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        *self.graph.write().await = None;
        self.txns.clear();
        self.state.set_state(ConnectionState::Closed);
        Ok(())
    }

    async fn health_check(&self) -> Result<(bool, u64)> {
        let started = Instant::now();
        let healthy = match self.graph_handle().await {
            Ok(g) => g.execute(Query::new("RETURN 1".to_string())).await.is_ok(),
            Err(_) => false,
        };
        let latency_ms = started.elapsed().as_millis() as u64;
        self.state.record_health(healthy, latency_ms);
        Ok((healthy, latency_ms))
    }

    async fn execute_query(&self, query: &str, params: Params, tx: Option<&TxHandle>) -> Result<Vec<Row>> {
        if let Some(handle) = tx {
            let entry = self
                .txns
                .get(&handle.0)
                .ok_or_else(|| CorpusError::GraphConnectionError(format!("no open graph transaction {}", handle.0)))?;
            let mut txn = entry.value().lock().await;
            let q = to_query(query, params);
            let mut stream = txn
                .execute(q)
                .await
                .map_err(|e| CorpusError::DataOperationError(e.to_string()))?;
            let mut out = Vec::new();
            while let Some(row) = stream
                .next()
                .await
                .map_err(|e| CorpusError::DataOperationError(e.to_string()))?
            {
                out.push(row_to_map(&row));
            }
            return Ok(out);
        }

        let graph = self.graph_handle().await?;
        let q = to_query(query, params.clone());
        match graph.execute(q).await {
            Ok(mut stream) => {
                let mut out = Vec::new();
                while let Some(row) = stream
                    .next()
                    .await
                    .map_err(|e| CorpusError::DataOperationError(e.to_string()))?
                {
                    out.push(row_to_map(&row));
                }
                Ok(out)
            }
            Err(e) if self.auto_reconnect => {
                tracing::warn!(error = %e, "graph query failed, attempting single reconnect");
                self.reconnect().await?;
                let graph = self.graph_handle().await?;
                let q = to_query(query, params);
                let mut stream = graph
                    .execute(q)
                    .await
                    .map_err(|e| CorpusError::GraphConnectionError(e.to_string()))?;
                let mut out = Vec::new();
                while let Some(row) = stream
                    .next()
                    .await
                    .map_err(|e| CorpusError::DataOperationError(e.to_string()))?
                {
                    out.push(row_to_map(&row));
                }
                Ok(out)
            }
            Err(e) => Err(CorpusError::GraphConnectionError(e.to_string())),
        }
    }

    async fn batch_insert(&self, query: &str, rows: Vec<Params>, batch_size: usize) -> Result<u64> {
        let graph = self.graph_handle().await?;
        let batch_size = batch_size.max(1);
        let mut total = 0u64;
        for chunk in rows.chunks(batch_size) {
            total += self.run_batch(&graph, query, chunk).await?;
        }
        Ok(total)
    }

    async fn begin_transaction(&self) -> Result<TxHandle> {
        let graph = self.graph_handle().await?;
        let txn = graph
            .start_txn()
            .await
            .map_err(|e| CorpusError::GraphConnectionError(e.to_string()))?;
        let id = Uuid::new_v4().to_string();
        self.txns.insert(id.clone(), AsyncMutex::new(txn));
        Ok(TxHandle(id))
    }

    async fn commit_transaction(&self, handle: &TxHandle) -> Result<()> {
        let (_, entry) = self
            .txns
            .remove(&handle.0)
            .ok_or_else(|| CorpusError::TransactionError(format!("no open graph transaction {}", handle.0)))?;
        entry
            .into_inner()
            .commit()
            .await
            .map_err(|e| CorpusError::TransactionError(e.to_string()))
    }

    async fn rollback_transaction(&self, handle: &TxHandle) -> Result<()> {
        let (_, entry) = self
            .txns
            .remove(&handle.0)
            .ok_or_else(|| CorpusError::TransactionError(format!("no open graph transaction {}", handle.0)))?;
        entry
            .into_inner()
            .rollback()
            .await
            .map_err(|e| CorpusError::TransactionError(e.to_string()))
    }

    async fn prepare_transaction(&self, handle: &TxHandle) -> Result<()> {
        tracing::warn!(handle = %handle.0, "graph backend has no native two-phase commit; prepare is a no-op");
        Ok(())
    }

    async fn commit_prepared(&self, handle: &TxHandle) -> Result<()> {
        self.commit_transaction(handle).await
    }

    fn connection_state(&self) -> ConnectionState {
        self.state.state()
    }

    fn adapter_state(&self) -> &AdapterState {
        &self.state
    }
}

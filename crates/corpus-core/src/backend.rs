//! Backend capability interface shared by the graph and relational stores.
//!
//! One trait expresses the capability set both stores must provide;
//! `corpus-graph` and `corpus-sql` are its two concrete implementations.
//! The Connection Supervisor (`corpus-tx::supervisor`) and Transaction
//! Engine (`corpus-tx::engine`) depend only on `BackendAdapter`, never on a
//! driver crate — mirroring `dashflow-memory`'s store traits, which never
//! name `redis`/`mongodb` outside a backend-specific submodule.

use crate::error::Result;
use crate::state::{AdapterState, ConnectionState};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// A single result row: column name → value.
pub type Row = HashMap<String, Value>;

/// Query parameters, supporting both positional and named binding styles.
/// Named placeholders are rewritten to positional form by the adapter
/// before dispatch — a deterministic textual rewrite, not runtime
/// reflection.
#[derive(Debug, Clone)]
pub enum Params {
    Positional(Vec<Value>),
    Named(HashMap<String, Value>),
}

impl Params {
    pub fn none() -> Self {
        Self::Positional(Vec::new())
    }
}

impl From<Vec<Value>> for Params {
    fn from(v: Vec<Value>) -> Self {
        Self::Positional(v)
    }
}

impl From<HashMap<String, Value>> for Params {
    fn from(v: HashMap<String, Value>) -> Self {
        Self::Named(v)
    }
}

/// Rewrites `:name`/`%(name)s`-style named placeholders in `query` to
/// positional form (`$1`, `$2`, ...), returning the rewritten query and the
/// parameters in call order. Deterministic textual scan, no reflection.
///
/// A `:` immediately following another `:` is the second half of a
/// Postgres `::type` cast marker, not a placeholder start — `:x::vector`
/// must not have `vector` rebound as a second occurrence of a `vector`
/// parameter key.
pub fn rewrite_named_params(query: &str, named: &HashMap<String, Value>) -> (String, Vec<Value>) {
    let mut out = String::with_capacity(query.len());
    let mut ordered = Vec::new();
    let bytes = query.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        let is_cast_marker = i > 0 && bytes[i - 1] == b':';
        if c == ':' && !is_cast_marker && i + 1 < bytes.len() && (bytes[i + 1] as char).is_alphabetic() {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && ((bytes[end] as char).is_alphanumeric() || bytes[end] == b'_') {
                end += 1;
            }
            let name = &query[start..end];
            if let Some(v) = named.get(name) {
                ordered.push(v.clone());
                out.push_str(&format!("${}", ordered.len()));
                i = end;
                continue;
            }
        }
        if c == '%' && query[i..].starts_with("%(") {
            if let Some(close) = query[i..].find(")s") {
                let name = &query[i + 2..i + close];
                if let Some(v) = named.get(name) {
                    ordered.push(v.clone());
                    out.push_str(&format!("${}", ordered.len()));
                    i += close + 2;
                    continue;
                }
            }
        }
        out.push(c);
        i += 1;
    }
    (out, ordered)
}

/// Opaque handle to a driver-level transaction/session, held by the
/// Transaction Engine and threaded back into `execute_query` calls that
/// must run inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxHandle(pub String);

/// Driver-agnostic capability set both backing stores expose.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;

    /// Returns `(healthy, latency_ms)`.
    async fn health_check(&self) -> Result<(bool, u64)>;

    /// Runs `query` with `params`. With `tx` given, runs inside that
    /// transaction's session; otherwise opens a short-lived session.
    async fn execute_query(&self, query: &str, params: Params, tx: Option<&TxHandle>) -> Result<Vec<Row>>;

    /// Partitions `rows` into slices of `batch_size` and runs one query per
    /// slice in a single session, returning the accumulated count reported
    /// by the driver's statement counters across all batches, not just the
    /// first.
    async fn batch_insert(&self, query: &str, rows: Vec<Params>, batch_size: usize) -> Result<u64>;

    async fn begin_transaction(&self) -> Result<TxHandle>;
    async fn commit_transaction(&self, handle: &TxHandle) -> Result<()>;
    async fn rollback_transaction(&self, handle: &TxHandle) -> Result<()>;

    /// First phase of 2PC. The graph backend has no native 2PC: its
    /// implementation is a no-op that logs a warning.
    async fn prepare_transaction(&self, handle: &TxHandle) -> Result<()>;

    /// Second phase of 2PC. For the graph backend this delegates to
    /// `commit_transaction`.
    async fn commit_prepared(&self, handle: &TxHandle) -> Result<()>;

    fn connection_state(&self) -> ConnectionState;
    fn adapter_state(&self) -> &AdapterState;

    /// Default batch size used when a caller does not specify one.
    fn default_batch_size(&self) -> usize {
        1000
    }
}

pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_colon_named_params() {
        let mut named = HashMap::new();
        named.insert("id".to_string(), Value::from(42));
        named.insert("name".to_string(), Value::from("x"));
        let (q, ordered) = rewrite_named_params("SELECT * FROM t WHERE id = :id AND name = :name", &named);
        assert_eq!(q, "SELECT * FROM t WHERE id = $1 AND name = $2");
        assert_eq!(ordered, vec![Value::from(42), Value::from("x")]);
    }

    #[test]
    fn rewrites_percent_named_params() {
        let mut named = HashMap::new();
        named.insert("id".to_string(), Value::from(7));
        let (q, ordered) = rewrite_named_params("SELECT * FROM t WHERE id = %(id)s", &named);
        assert_eq!(q, "SELECT * FROM t WHERE id = $1");
        assert_eq!(ordered, vec![Value::from(7)]);
    }

    #[test]
    fn leaves_unmatched_placeholders_alone() {
        let named = HashMap::new();
        let (q, ordered) = rewrite_named_params("SELECT * FROM t WHERE id = :missing", &named);
        assert_eq!(q, "SELECT * FROM t WHERE id = :missing");
        assert!(ordered.is_empty());
    }

    #[test]
    fn a_cast_marker_is_not_mistaken_for_a_second_placeholder() {
        let mut named = HashMap::new();
        named.insert("vec_literal".to_string(), Value::from("[0.1]"));
        named.insert("vector".to_string(), Value::from("should never be bound"));
        let (q, ordered) = rewrite_named_params("VALUES (:vec_literal::vector)", &named);
        assert_eq!(q, "VALUES ($1::vector)");
        assert_eq!(ordered, vec![Value::from("[0.1]")]);
    }
}

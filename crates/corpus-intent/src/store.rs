//! `IntentStore`: a relational-only service built on a
//! `ConnectionSupervisor` over the SQL `BackendAdapter`. Schema init
//! records applied migrations so a repeat call is idempotent.

use crate::model::{IntentMapping, LinkResult, VectorMatch, VECTOR_DIMENSION};
use chrono::{DateTime, Utc};
use corpus_core::{BackendAdapter, CorpusError, Params, Result, Row, TxHandle};
use corpus_tx::ConnectionSupervisor;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const MAPPING_TABLE_MIGRATION: (&str, &str) = (
    "0001_intent_mapping_table",
    "CREATE TABLE IF NOT EXISTS corpus_intent_mapping ( \
        intent_id TEXT NOT NULL, \
        ast_node_id TEXT NOT NULL, \
        source_id TEXT NOT NULL, \
        confidence DOUBLE PRECISION NOT NULL, \
        metadata JSONB, \
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
        PRIMARY KEY (intent_id, ast_node_id) \
    )",
);

const MAPPING_INDEX_MIGRATIONS: &[(&str, &str)] = &[
    (
        "0002_intent_mapping_intent_id_idx",
        "CREATE INDEX IF NOT EXISTS corpus_intent_mapping_intent_id_idx ON corpus_intent_mapping (intent_id)",
    ),
    (
        "0003_intent_mapping_ast_node_id_idx",
        "CREATE INDEX IF NOT EXISTS corpus_intent_mapping_ast_node_id_idx ON corpus_intent_mapping (ast_node_id)",
    ),
    (
        "0004_intent_mapping_source_id_idx",
        "CREATE INDEX IF NOT EXISTS corpus_intent_mapping_source_id_idx ON corpus_intent_mapping (source_id)",
    ),
];

const UPSERT_MAPPING_SQL: &str = "INSERT INTO corpus_intent_mapping \
    (intent_id, ast_node_id, source_id, confidence, metadata, created_at, updated_at) \
    VALUES (:intent_id, :ast_node_id, :source_id, :confidence, :metadata, now(), now()) \
    ON CONFLICT (intent_id, ast_node_id) DO UPDATE SET \
        source_id = EXCLUDED.source_id, \
        confidence = EXCLUDED.confidence, \
        metadata = EXCLUDED.metadata, \
        updated_at = now()";

const SELECT_BY_INTENT_SQL: &str = "SELECT intent_id, ast_node_id, source_id, confidence, metadata, created_at, updated_at \
    FROM corpus_intent_mapping WHERE intent_id = :intent_id AND confidence >= :min_confidence \
    ORDER BY confidence DESC, created_at DESC";

const SELECT_BY_AST_NODE_SQL: &str = "SELECT intent_id, ast_node_id, source_id, confidence, metadata, created_at, updated_at \
    FROM corpus_intent_mapping WHERE ast_node_id = :ast_node_id AND confidence >= :min_confidence \
    ORDER BY confidence DESC, created_at DESC";

const UPDATE_CONFIDENCE_SQL: &str = "UPDATE corpus_intent_mapping SET confidence = :new_confidence, updated_at = now() \
    WHERE intent_id = :intent_id AND ast_node_id = :ast_node_id RETURNING ast_node_id";

const DELETE_ONE_SQL: &str =
    "DELETE FROM corpus_intent_mapping WHERE intent_id = :intent_id AND ast_node_id = :ast_node_id RETURNING ast_node_id";
const DELETE_ALL_FOR_INTENT_SQL: &str = "DELETE FROM corpus_intent_mapping WHERE intent_id = :intent_id RETURNING ast_node_id";

const VECTOR_EXTENSION_PROBE_SQL: &str = "CREATE EXTENSION IF NOT EXISTS vector";
const VECTOR_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS corpus_intent_vectors ( \
    intent_id TEXT PRIMARY KEY, \
    vector vector(768) NOT NULL \
)";
const UPSERT_VECTOR_SQL: &str = "INSERT INTO corpus_intent_vectors (intent_id, vector) \
    VALUES (:intent_id, :vec_literal::vector) \
    ON CONFLICT (intent_id) DO UPDATE SET vector = EXCLUDED.vector";
const DELETE_VECTOR_SQL: &str = "DELETE FROM corpus_intent_vectors WHERE intent_id = :intent_id";
const SEARCH_BY_VECTOR_SQL: &str = "SELECT intent_id, 1 - (vector <=> :query_vector::vector) AS similarity \
    FROM corpus_intent_vectors \
    WHERE 1 - (vector <=> :query_vector::vector) >= :threshold \
    ORDER BY vector <=> :query_vector::vector \
    LIMIT :result_limit";

const MIGRATIONS_TABLE_SQL: &str =
    "CREATE TABLE IF NOT EXISTS corpus_migrations (id TEXT PRIMARY KEY, applied_at TIMESTAMPTZ NOT NULL DEFAULT now())";
const MARK_MIGRATION_APPLIED_SQL: &str = "INSERT INTO corpus_migrations (id) VALUES (:id) ON CONFLICT DO NOTHING RETURNING id";

fn named(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> Params {
    let mut map = HashMap::new();
    for (k, v) in pairs {
        map.insert(k.to_string(), v);
    }
    Params::Named(map)
}

fn get_str(row: &Row, key: &str) -> Result<String> {
    row.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CorpusError::DataOperationError(format!("missing/invalid column {key}")))
}

fn get_f64(row: &Row, key: &str) -> Result<f64> {
    row.get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| CorpusError::DataOperationError(format!("missing/invalid column {key}")))
}

fn get_timestamp(row: &Row, key: &str) -> Result<DateTime<Utc>> {
    row.get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| CorpusError::DataOperationError(format!("missing/invalid column {key}")))
}

fn row_to_mapping(row: &Row) -> Result<IntentMapping> {
    Ok(IntentMapping {
        intent_id: get_str(row, "intent_id")?,
        ast_node_id: get_str(row, "ast_node_id")?,
        source_id: get_str(row, "source_id")?,
        confidence: get_f64(row, "confidence")?,
        metadata: row.get("metadata").cloned().filter(|v| !v.is_null()),
        created_at: get_timestamp(row, "created_at")?,
        updated_at: get_timestamp(row, "updated_at")?,
    })
}

fn validate_confidence(confidence: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(CorpusError::ValidationError(format!("confidence {confidence} out of range [0,1]")));
    }
    Ok(())
}

fn validate_vector(vector: &[f32]) -> Result<()> {
    if vector.len() != VECTOR_DIMENSION {
        return Err(CorpusError::ValidationError(format!(
            "vector must have exactly {VECTOR_DIMENSION} elements, got {}",
            vector.len()
        )));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(CorpusError::ValidationError("vector elements must be finite numbers".to_string()));
    }
    Ok(())
}

fn vector_literal(vector: &[f32]) -> String {
    let mut s = String::with_capacity(vector.len() * 8 + 2);
    s.push('[');
    for (i, v) in vector.iter().enumerate() {
        if i > 0 {
            s.push(',');
        }
        s.push_str(&v.to_string());
    }
    s.push(']');
    s
}

pub struct IntentStore<S: BackendAdapter + 'static> {
    supervisor: Arc<ConnectionSupervisor<S>>,
    vector_capable: AtomicBool,
}

impl<S: BackendAdapter + 'static> IntentStore<S> {
    pub fn new(supervisor: Arc<ConnectionSupervisor<S>>) -> Self {
        Self {
            supervisor,
            vector_capable: AtomicBool::new(false),
        }
    }

    pub fn vector_capable(&self) -> bool {
        self.vector_capable.load(Ordering::Relaxed)
    }

    /// Idempotent schema init: mapping table + indexes always; the vector
    /// table only if the store advertises `vector` extension support.
    /// Applied migration ids are recorded so a repeat call is a no-op.
    pub async fn init_schema(&self) -> Result<()> {
        self.supervisor.ensure_connected().await?;
        let adapter = self.supervisor.adapter();

        adapter.execute_query(MIGRATIONS_TABLE_SQL, Params::none(), None).await?;
        self.apply_migration(MAPPING_TABLE_MIGRATION.0, MAPPING_TABLE_MIGRATION.1).await?;
        for (id, sql) in MAPPING_INDEX_MIGRATIONS {
            self.apply_migration(id, sql).await?;
        }

        match adapter.execute_query(VECTOR_EXTENSION_PROBE_SQL, Params::none(), None).await {
            Ok(_) => {
                self.apply_migration("0005_intent_vector_table", VECTOR_TABLE_SQL).await?;
                self.vector_capable.store(true, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::warn!(error = %e, "vector extension unavailable; vector operations will be no-ops");
                self.vector_capable.store(false, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    async fn apply_migration(&self, id: &str, sql: &str) -> Result<()> {
        let adapter = self.supervisor.adapter();
        let marked = adapter
            .execute_query(MARK_MIGRATION_APPLIED_SQL, named([("id", Value::String(id.to_string()))]), None)
            .await?;
        if marked.is_empty() {
            return Ok(());
        }
        adapter.execute_query(sql, Params::none(), None).await.map(|_| ())
    }

    /// Links `intent_id` to every id in `ast_node_ids`, upserting one mapping
    /// row per node inside a single transaction; any row failure rolls the
    /// whole call back.
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
        if intent_id.trim().is_empty() {
            return Err(CorpusError::ValidationError("intent_id must not be empty".to_string()));
        }
        if ast_node_ids.is_empty() {
            return Err(CorpusError::ValidationError("ast_node_ids must not be empty".to_string()));
        }
        if source_id.trim().is_empty() {
            return Err(CorpusError::ValidationError("source_id must not be empty".to_string()));
        }
        validate_confidence(confidence)?;
        if let Some(v) = vector {
            validate_vector(v)?;
        }

        self.supervisor.ensure_connected().await?;
        let adapter = self.supervisor.adapter();
        let tx = adapter.begin_transaction().await?;

        let mut mapping_ids = Vec::with_capacity(ast_node_ids.len());
        for ast_node_id in ast_node_ids {
            let params = named([
                ("intent_id", Value::String(intent_id.to_string())),
                ("ast_node_id", Value::String(ast_node_id.clone())),
                ("source_id", Value::String(source_id.to_string())),
                ("confidence", Value::from(confidence)),
                ("metadata", metadata.cloned().unwrap_or(Value::Null)),
            ]);
            if let Err(e) = adapter.execute_query(UPSERT_MAPPING_SQL, params, Some(&tx)).await {
                self.rollback_ignoring_error(&tx).await;
                return Err(e);
            }
            mapping_ids.push(format!("{intent_id}:{ast_node_id}"));
        }

        let mut vector_stored = false;
        if let Some(vector) = vector {
            if self.vector_capable() {
                let params = named([
                    ("intent_id", Value::String(intent_id.to_string())),
                    ("vec_literal", Value::String(vector_literal(vector))),
                ]);
                if let Err(e) = adapter.execute_query(UPSERT_VECTOR_SQL, params, Some(&tx)).await {
                    self.rollback_ignoring_error(&tx).await;
                    return Err(e);
                }
                vector_stored = true;
            } else {
                tracing::warn!(intent_id, "vector storage unavailable, skipping vector for this link");
            }
        }

        adapter.commit_transaction(&tx).await?;
        Ok(LinkResult {
            mapped_ast_nodes: ast_node_ids.len() as u64,
            mapping_ids,
            vector_stored,
        })
    }

    async fn rollback_ignoring_error(&self, tx: &TxHandle) {
        if let Err(e) = self.supervisor.adapter().rollback_transaction(tx).await {
            tracing::warn!(error = %e, "rollback after link failure itself failed");
        }
    }

    pub async fn get_ast_nodes_by_intent(&self, intent_id: &str, min_confidence: f64) -> Result<Vec<IntentMapping>> {
        self.supervisor.ensure_connected().await?;
        let params = named([
            ("intent_id", Value::String(intent_id.to_string())),
            ("min_confidence", Value::from(min_confidence)),
        ]);
        let rows = self.supervisor.adapter().execute_query(SELECT_BY_INTENT_SQL, params, None).await?;
        rows.iter().map(row_to_mapping).collect()
    }

    pub async fn get_intents_for_ast(&self, ast_node_id: &str, min_confidence: f64) -> Result<Vec<IntentMapping>> {
        self.supervisor.ensure_connected().await?;
        let params = named([
            ("ast_node_id", Value::String(ast_node_id.to_string())),
            ("min_confidence", Value::from(min_confidence)),
        ]);
        let rows = self.supervisor.adapter().execute_query(SELECT_BY_AST_NODE_SQL, params, None).await?;
        rows.iter().map(row_to_mapping).collect()
    }

    pub async fn update_confidence(&self, intent_id: &str, ast_node_id: &str, new_confidence: f64) -> Result<bool> {
        validate_confidence(new_confidence)?;
        self.supervisor.ensure_connected().await?;
        let params = named([
            ("intent_id", Value::String(intent_id.to_string())),
            ("ast_node_id", Value::String(ast_node_id.to_string())),
            ("new_confidence", Value::from(new_confidence)),
        ]);
        let rows = self.supervisor.adapter().execute_query(UPDATE_CONFIDENCE_SQL, params, None).await?;
        Ok(!rows.is_empty())
    }

    /// Deletes the single `(intent_id, ast_node_id)` row, or every row for
    /// `intent_id` (dropping its vector row too) when `ast_node_id` is `None`.
    pub async fn remove(&self, intent_id: &str, ast_node_id: Option<&str>) -> Result<u64> {
        self.supervisor.ensure_connected().await?;
        let adapter = self.supervisor.adapter();
        let deleted = match ast_node_id {
            Some(ast_node_id) => {
                let params = named([
                    ("intent_id", Value::String(intent_id.to_string())),
                    ("ast_node_id", Value::String(ast_node_id.to_string())),
                ]);
                adapter.execute_query(DELETE_ONE_SQL, params, None).await?
            }
            None => {
                let rows = adapter
                    .execute_query(DELETE_ALL_FOR_INTENT_SQL, named([("intent_id", Value::String(intent_id.to_string()))]), None)
                    .await?;
                if self.vector_capable() {
                    adapter
                        .execute_query(DELETE_VECTOR_SQL, named([("intent_id", Value::String(intent_id.to_string()))]), None)
                        .await?;
                }
                rows
            }
        };
        Ok(deleted.len() as u64)
    }

    /// Cosine-similarity search over stored vectors; a no-op returning an
    /// empty result when vector storage is unavailable.
    pub async fn search_by_vector(&self, vector: &[f32], limit: usize, threshold: f64) -> Result<Vec<VectorMatch>> {
        validate_vector(vector)?;
        if !self.vector_capable() {
            tracing::warn!("search_by_vector called without vector storage available; returning no results");
            return Ok(Vec::new());
        }
        self.supervisor.ensure_connected().await?;
        let params = named([
            ("query_vector", Value::String(vector_literal(vector))),
            ("threshold", Value::from(threshold)),
            ("result_limit", Value::from(limit as i64)),
        ]);
        let rows = self.supervisor.adapter().execute_query(SEARCH_BY_VECTOR_SQL, params, None).await?;
        rows.iter()
            .map(|row| {
                Ok(VectorMatch {
                    intent_id: get_str(row, "intent_id")?,
                    similarity: get_f64(row, "similarity")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_confidence() {
        assert!(validate_confidence(1.5).is_err());
        assert!(validate_confidence(-0.1).is_err());
        assert!(validate_confidence(0.0).is_ok());
        assert!(validate_confidence(1.0).is_ok());
    }

    #[test]
    fn rejects_wrong_length_vector() {
        let short = vec![0.0f32; 10];
        assert!(validate_vector(&short).is_err());
        let full = vec![0.0f32; VECTOR_DIMENSION];
        assert!(validate_vector(&full).is_ok());
    }

    #[test]
    fn vector_literal_formats_as_bracketed_csv() {
        assert_eq!(vector_literal(&[1.0, 2.5, -3.0]), "[1,2.5,-3]");
    }
}

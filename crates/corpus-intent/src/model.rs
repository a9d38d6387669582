//! Intent mapping/vector data model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

pub const VECTOR_DIMENSION: usize = 768;

#[derive(Debug, Clone, Serialize)]
pub struct IntentMapping {
    pub intent_id: String,
    pub ast_node_id: String,
    pub source_id: String,
    pub confidence: f64,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of a `link` call.
#[derive(Debug, Clone, Serialize)]
pub struct LinkResult {
    pub mapped_ast_nodes: u64,
    pub mapping_ids: Vec<String>,
    pub vector_stored: bool,
}

/// One hit from `search_by_vector`.
#[derive(Debug, Clone, Serialize)]
pub struct VectorMatch {
    pub intent_id: String,
    pub similarity: f64,
}

//! AST graph payload and ingestion report.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A single AST node in an ingestion payload. `extra` carries any
/// caller-supplied properties beyond the fixed fields, all of which are
/// merged onto the stored `ASTNode`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstNode {
    pub id: String,
    pub node_type: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub line_number: Option<u32>,
    /// Overrides the ingestion call's `source_id` for this node only.
    /// Rarely used: most payloads rely on the call-level `source_id`.
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    Child,
    Next,
    DependsOn,
}

impl EdgeType {
    /// Cypher relationship-type literal baked into the query text: this
    /// workspace does not assume an APOC-style dynamic relationship
    /// facility is installed, so each type gets its own static query.
    pub fn as_cypher_label(self) -> &'static str {
        match self {
            EdgeType::Child => "CHILD",
            EdgeType::Next => "NEXT",
            EdgeType::DependsOn => "DEPENDS_ON",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstEdge {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AstGraph {
    #[serde(default)]
    pub nodes: Vec<AstNode>,
    #[serde(default)]
    pub edges: Vec<AstEdge>,
}

/// Result of a `store_ast_graph` call.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct IngestReport {
    pub created_nodes: u64,
    pub created_edges: u64,
    pub elapsed_ms: u64,
    pub nodes_per_second: f64,
}

//! `AstIngestor`: AST ingestion, built on a `ConnectionSupervisor` over the
//! graph `BackendAdapter` so it inherits retry/circuit-breaker gating for
//! free, exactly like the domain services in `dashflow-memory` that never
//! dial a driver themselves.

use crate::model::{AstEdge, AstGraph, AstNode, EdgeType, IngestReport};
use corpus_core::{BackendAdapter, CorpusError, Params, Result, DEFAULT_BATCH_SIZE};
use corpus_tx::ConnectionSupervisor;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

const NODE_MERGE_QUERY: &str = "UNWIND $rows AS row \
MERGE (n:ASTNode {id: row.id, source_id: row.source_id}) \
SET n += row.props";

fn edge_merge_query(edge_type: EdgeType) -> String {
    format!(
        "UNWIND $rows AS row \
MATCH (a:ASTNode {{id: row.source, source_id: row.source_id}}) \
MATCH (b:ASTNode {{id: row.target, source_id: row.source_id}}) \
MERGE (a)-[:{}]->(b)",
        edge_type.as_cypher_label()
    )
}

fn validate(graph: &AstGraph) -> Result<()> {
    let mut ids = HashSet::with_capacity(graph.nodes.len());
    for node in &graph.nodes {
        if node.id.trim().is_empty() {
            return Err(CorpusError::ValidationError("node id must not be empty".to_string()));
        }
        if node.node_type.trim().is_empty() {
            return Err(CorpusError::ValidationError(format!("node {} missing node_type", node.id)));
        }
        ids.insert(node.id.as_str());
    }
    for edge in &graph.edges {
        if !ids.contains(edge.source.as_str()) {
            return Err(CorpusError::ValidationError(format!(
                "edge source {} does not reference a node in this payload",
                edge.source
            )));
        }
        if !ids.contains(edge.target.as_str()) {
            return Err(CorpusError::ValidationError(format!(
                "edge target {} does not reference a node in this payload",
                edge.target
            )));
        }
    }
    Ok(())
}

fn node_params(node: &AstNode, call_source_id: &str, metadata: Option<&HashMap<String, Value>>) -> Params {
    let mut props = serde_json::Map::new();
    props.insert("node_type".to_string(), Value::String(node.node_type.clone()));
    if let Some(value) = &node.value {
        props.insert("value".to_string(), Value::String(value.clone()));
    }
    if let Some(line) = node.line_number {
        props.insert("line_number".to_string(), Value::from(line));
    }
    for (k, v) in &node.extra {
        props.insert(k.clone(), v.clone());
    }
    if let Some(metadata) = metadata {
        for (k, v) in metadata {
            props.insert(k.clone(), v.clone());
        }
    }

    let effective_source_id = node.source_id.as_deref().unwrap_or(call_source_id);
    let mut row = HashMap::new();
    row.insert("id".to_string(), Value::String(node.id.clone()));
    row.insert("source_id".to_string(), Value::String(effective_source_id.to_string()));
    row.insert("props".to_string(), Value::Object(props));
    Params::Named(row)
}

fn edge_params(edge: &AstEdge, call_source_id: &str) -> Params {
    let mut row = HashMap::new();
    row.insert("source".to_string(), Value::String(edge.source.clone()));
    row.insert("target".to_string(), Value::String(edge.target.clone()));
    row.insert("source_id".to_string(), Value::String(call_source_id.to_string()));
    Params::Named(row)
}

pub struct AstIngestor<G: BackendAdapter + 'static> {
    supervisor: Arc<ConnectionSupervisor<G>>,
}

impl<G: BackendAdapter + 'static> AstIngestor<G> {
    pub fn new(supervisor: Arc<ConnectionSupervisor<G>>) -> Self {
        Self { supervisor }
    }

    /// Stores `graph` under `source_id`, merging `metadata` onto every node
    /// this call creates or updates. Validation runs before any store
    /// mutation; a driver failure partway through leaves whichever batches
    /// already committed in place — partial effects are not undone here,
    /// callers wanting atomicity wrap this in a transaction.
    pub async fn store_ast_graph(
        &self,
        graph: &AstGraph,
        source_id: &str,
        metadata: Option<&HashMap<String, Value>>,
    ) -> Result<IngestReport> {
        validate(graph)?;
        self.supervisor.ensure_connected().await?;
        let adapter = self.supervisor.adapter();
        let started = Instant::now();

        let node_rows: Vec<Params> = graph.nodes.iter().map(|n| node_params(n, source_id, metadata)).collect();
        let created_nodes = adapter.batch_insert(NODE_MERGE_QUERY, node_rows, DEFAULT_BATCH_SIZE).await?;

        let mut edges_by_type: HashMap<EdgeType, Vec<Params>> = HashMap::new();
        for edge in &graph.edges {
            edges_by_type.entry(edge.edge_type).or_default().push(edge_params(edge, source_id));
        }
        let mut created_edges = 0u64;
        for (edge_type, rows) in edges_by_type {
            let query = edge_merge_query(edge_type);
            created_edges += adapter.batch_insert(&query, rows, DEFAULT_BATCH_SIZE).await?;
        }

        let elapsed = started.elapsed();
        let elapsed_secs = elapsed.as_secs_f64();
        let nodes_per_second = if elapsed_secs > 0.0 { created_nodes as f64 / elapsed_secs } else { created_nodes as f64 };

        Ok(IngestReport {
            created_nodes,
            created_edges,
            elapsed_ms: elapsed.as_millis() as u64,
            nodes_per_second,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AstGraph;

    fn node(id: &str, node_type: &str) -> AstNode {
        AstNode {
            id: id.to_string(),
            node_type: node_type.to_string(),
            value: None,
            line_number: None,
            source_id: None,
            extra: HashMap::new(),
        }
    }

    #[test]
    fn rejects_edge_referencing_unknown_node() {
        let graph = AstGraph {
            nodes: vec![node("a", "Call")],
            edges: vec![AstEdge {
                source: "a".to_string(),
                target: "missing".to_string(),
                edge_type: EdgeType::Child,
            }],
        };
        assert!(matches!(validate(&graph), Err(CorpusError::ValidationError(_))));
    }

    #[test]
    fn rejects_blank_node_type() {
        let graph = AstGraph {
            nodes: vec![node("a", "   ")],
            edges: vec![],
        };
        assert!(matches!(validate(&graph), Err(CorpusError::ValidationError(_))));
    }

    #[test]
    fn accepts_well_formed_payload() {
        let graph = AstGraph {
            nodes: vec![node("a", "Call"), node("b", "Ident")],
            edges: vec![AstEdge {
                source: "a".to_string(),
                target: "b".to_string(),
                edge_type: EdgeType::Child,
            }],
        };
        assert!(validate(&graph).is_ok());
    }
}

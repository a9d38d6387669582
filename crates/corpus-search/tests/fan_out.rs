//! Integration tests against `corpus_testkit::InMemoryBackend`: graph and
//! text branches read back seeded rows, results from both branches merge
//! when they share an id, and `max_results` is respected end to end.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use corpus_core::{CorpusError, RetryPolicy};
use corpus_intent::IntentStore;
use corpus_search::{SearchEngine, SearchFilters, SearchOrigin, SearchQuery, SearchType};
use corpus_testkit::InMemoryBackend;
use corpus_tx::ConnectionSupervisor;
use serde_json::Value;

fn policy() -> RetryPolicy {
    RetryPolicy::exponential(0).with_max_delay(Duration::from_secs(1))
}

fn row(pairs: Vec<(&'static str, Value)>) -> corpus_core::Row {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

async fn engine() -> (SearchEngine<InMemoryBackend, InMemoryBackend>, Arc<InMemoryBackend>, Arc<InMemoryBackend>) {
    let graph_adapter = Arc::new(InMemoryBackend::graph());
    let sql_adapter = Arc::new(InMemoryBackend::relational());

    let graph = Arc::new(ConnectionSupervisor::new(graph_adapter.clone(), policy(), CorpusError::GraphConnectionError));
    let sql = Arc::new(ConnectionSupervisor::new(sql_adapter.clone(), policy(), CorpusError::PostgresConnectionError));
    let intent = Arc::new(IntentStore::new(sql.clone()));

    (SearchEngine::new(graph, sql, intent), graph_adapter, sql_adapter)
}

#[tokio::test]
async fn graph_branch_finds_seeded_nodes_by_substring() {
    let (engine, graph_adapter, _sql_adapter) = engine().await;
    graph_adapter.seed(
        "ASTNode",
        vec![row(vec![
            ("id", Value::String("widget_helper".to_string())),
            ("source_id", Value::String("file.py".to_string())),
            ("node_type", Value::String("function".to_string())),
            ("value", Value::String("def widget_helper(): pass".to_string())),
            ("line_number", Value::from(10)),
        ])],
    );

    let query = SearchQuery::new("widget", HashSet::from([SearchType::Graph]), SearchFilters::new(10).unwrap());
    let results = engine.search(&query).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "widget_helper");
    assert_eq!(results[0].origin, SearchOrigin::Graph);
}

#[tokio::test]
async fn text_branch_reads_seeded_documents() {
    let (engine, _graph_adapter, sql_adapter) = engine().await;
    sql_adapter.seed(
        "corpus_search_documents",
        vec![row(vec![
            ("id", Value::String("doc-1".to_string())),
            ("source_id", Value::String("file.py".to_string())),
            ("node_type", Value::String("function".to_string())),
            ("content", Value::String("gadget factory implementation".to_string())),
            ("file_path", Value::String("file.py".to_string())),
            ("line_number", Value::from(4)),
        ])],
    );

    let query = SearchQuery::new("gadget", HashSet::from([SearchType::Text]), SearchFilters::new(10).unwrap());
    let results = engine.search(&query).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "doc-1");
    assert_eq!(results[0].origin, SearchOrigin::Text);
    assert!(!results[0].highlights.is_empty());
}

#[tokio::test]
async fn matching_ids_across_graph_and_text_branches_merge_into_one_unified_result() {
    let (engine, graph_adapter, sql_adapter) = engine().await;
    graph_adapter.seed(
        "ASTNode",
        vec![row(vec![
            ("id", Value::String("shared-id".to_string())),
            ("source_id", Value::String("file.py".to_string())),
            ("node_type", Value::String("function".to_string())),
            ("value", Value::String("shared-id".to_string())),
            ("line_number", Value::Null),
        ])],
    );
    sql_adapter.seed(
        "corpus_search_documents",
        vec![row(vec![
            ("id", Value::String("shared-id".to_string())),
            ("source_id", Value::String("file.py".to_string())),
            ("node_type", Value::String("function".to_string())),
            ("content", Value::String("shared-id".to_string())),
            ("file_path", Value::Null),
            ("line_number", Value::Null),
        ])],
    );

    let query = SearchQuery::new("shared-id", HashSet::from([SearchType::Graph, SearchType::Text]), SearchFilters::new(10).unwrap());
    let results = engine.search(&query).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].origin, SearchOrigin::Unified);
}

#[test]
fn zero_max_results_is_rejected() {
    let err = SearchFilters::new(0).unwrap_err();
    assert!(matches!(err, CorpusError::ValidationError(_)));
}

#[tokio::test]
async fn max_results_of_one_returns_at_most_one_result() {
    let (engine, graph_adapter, _sql_adapter) = engine().await;
    graph_adapter.seed(
        "ASTNode",
        vec![
            row(vec![
                ("id", Value::String("alpha".to_string())),
                ("source_id", Value::Null),
                ("node_type", Value::Null),
                ("value", Value::String("alpha".to_string())),
                ("line_number", Value::Null),
            ]),
            row(vec![
                ("id", Value::String("alphabet".to_string())),
                ("source_id", Value::Null),
                ("node_type", Value::Null),
                ("value", Value::String("alphabet".to_string())),
                ("line_number", Value::Null),
            ]),
        ],
    );

    let query = SearchQuery::new("alpha", HashSet::from([SearchType::Graph]), SearchFilters::new(1).unwrap());
    let results = engine.search(&query).await;
    assert_eq!(results.len(), 1);
}

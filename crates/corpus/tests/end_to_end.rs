//! End-to-end scenarios against the facade, wired to two
//! `corpus_testkit::InMemoryBackend`s standing in for the real drivers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use corpus::{AstEdge, AstGraph, AstNode, Config, ConfigBuilder, Corpus, CorpusError, EdgeType, Row, SearchFilters, SearchOrigin, SearchQuery, SearchType};
use corpus_testkit::InMemoryBackend;
use serde_json::Value;

fn row(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> Row {
    let mut row: Row = HashMap::new();
    for (k, v) in pairs {
        row.insert(k.to_string(), v);
    }
    row
}

type TestCorpus = Corpus<InMemoryBackend, InMemoryBackend>;

async fn build() -> (TestCorpus, Arc<InMemoryBackend>, Arc<InMemoryBackend>) {
    build_with(Config::builder().max_retry_attempts(0)).await
}

async fn build_with(config: ConfigBuilder) -> (TestCorpus, Arc<InMemoryBackend>, Arc<InMemoryBackend>) {
    let graph = Arc::new(InMemoryBackend::graph());
    let sql = Arc::new(InMemoryBackend::relational());
    let facade = Corpus::new(
        config.build().unwrap(),
        Arc::clone(&graph),
        Arc::clone(&sql),
        CorpusError::GraphConnectionError,
        CorpusError::PostgresConnectionError,
    );
    facade.initialize().await.unwrap();
    (facade, graph, sql)
}

fn f_py_graph() -> AstGraph {
    AstGraph {
        nodes: vec![
            AstNode {
                id: "n1".to_string(),
                node_type: "Module".to_string(),
                value: None,
                line_number: None,
                source_id: None,
                extra: Default::default(),
            },
            AstNode {
                id: "n2".to_string(),
                node_type: "FunctionDef".to_string(),
                value: Some("f".to_string()),
                line_number: Some(1),
                source_id: None,
                extra: Default::default(),
            },
        ],
        edges: vec![AstEdge {
            source: "n1".to_string(),
            target: "n2".to_string(),
            edge_type: EdgeType::Child,
        }],
    }
}

/// S1 — AST idempotency: ingesting the same graph twice leaves one node per
/// id and one edge, and the second call creates no new nodes.
#[tokio::test]
async fn s1_ast_ingestion_is_idempotent() {
    let (facade, graph, _sql) = build().await;

    let first = facade.store_ast_graph(&f_py_graph(), "f.py", None).await.unwrap();
    let second = facade.store_ast_graph(&f_py_graph(), "f.py", None).await.unwrap();

    let nodes = graph.snapshot("ASTNode");
    let edges = graph.snapshot("ASTNode_EDGES");
    assert_eq!(nodes.len(), 2);
    assert_eq!(edges.len(), 1);
    assert!(second.created_nodes <= first.created_nodes);
}

/// S2 — a dangling edge endpoint is refused before any store mutation.
#[tokio::test]
async fn s2_validation_refusal_leaves_the_store_unchanged() {
    let (facade, graph, _sql) = build().await;

    let bad = AstGraph {
        nodes: vec![AstNode {
            id: "n1".to_string(),
            node_type: "Module".to_string(),
            value: None,
            line_number: None,
            source_id: None,
            extra: Default::default(),
        }],
        edges: vec![AstEdge {
            source: "n1".to_string(),
            target: "ghost".to_string(),
            edge_type: EdgeType::Child,
        }],
    };

    let err = facade.store_ast_graph(&bad, "f.py", None).await.unwrap_err();
    assert!(matches!(err, CorpusError::ValidationError(_)));
    assert!(graph.snapshot("ASTNode").is_empty());
}

/// S3 — with the default 1PC commit mode, a transaction whose body raises
/// rolls back on both sides; no partial write survives.
#[tokio::test]
async fn s3_transaction_rolls_back_on_body_error() {
    use corpus::{BackendKind, Params};

    let (facade, graph, sql) = build().await;
    let facade_ref = &facade;

    let result: Result<(), CorpusError> = facade
        .transaction(None, move |tx_id| async move {
            facade_ref
                .execute_in_transaction(tx_id, BackendKind::Graph, "MERGE (n:ASTNode {id: $id}) SET n += $props", Params::none())
                .await?;
            Err(CorpusError::DataOperationError("body raised".to_string()))
        })
        .await;

    assert!(result.is_err());
    assert_eq!(graph.live_transaction_count(), 0);
    assert_eq!(sql.live_transaction_count(), 0);
}

/// S4 — with 2PC enabled, a `commit_prepared` failure on the relational side
/// after the graph side already committed surfaces as a `TransactionError`
/// (the "partial commit" mode), and the labelled `partial_commit` log entry
/// stays inspectable through `partial_commit_log` after `transaction`
/// returns.
#[tokio::test]
async fn s4_two_phase_commit_failure_surfaces_as_transaction_error() {
    use corpus::{BackendKind, Params};
    use std::sync::Mutex;

    let (facade, _graph, sql) = build_with(Config::builder().max_retry_attempts(0).two_phase_commit(true)).await;
    sql.fail_next_commit_prepared();
    let facade_ref = &facade;
    let tx_id_holder: Arc<Mutex<Option<uuid::Uuid>>> = Arc::new(Mutex::new(None));
    let holder_ref = Arc::clone(&tx_id_holder);

    let result: Result<(), CorpusError> = facade
        .transaction(None, move |tx_id| {
            *holder_ref.lock().unwrap() = Some(tx_id);
            async move {
                facade_ref
                    .execute_in_transaction(tx_id, BackendKind::Graph, "MERGE (n:ASTNode {id: $id}) SET n += $props", Params::none())
                    .await?;
                Ok(())
            }
        })
        .await;

    assert!(matches!(result, Err(CorpusError::TransactionError(_))));

    let tx_id = tx_id_holder.lock().unwrap().unwrap();
    let log = facade.partial_commit_log(tx_id).expect("partial commit log should be retained");
    assert!(log.iter().any(|e| e.description == "partial_commit"));
}

/// S5 — a query that matches both the graph branch (exact value match) and
/// the text branch (full-text row under the same id) merges into a single
/// `unified` result scoring above the graph branch's own floor.
#[tokio::test]
async fn s5_unified_search_merges_graph_and_text_hits() {
    let (facade, _graph, sql) = build().await;

    let payload = AstGraph {
        nodes: vec![AstNode {
            id: "calc_1".to_string(),
            node_type: "FunctionDef".to_string(),
            value: Some("calculate_sum".to_string()),
            line_number: Some(10),
            source_id: None,
            extra: Default::default(),
        }],
        edges: vec![],
    };
    facade.store_ast_graph(&payload, "s1", None).await.unwrap();

    sql.seed(
        "corpus_search_documents",
        vec![row([
            ("id", Value::String("calc_1".to_string())),
            ("source_id", Value::String("s1".to_string())),
            ("node_type", Value::String("FunctionDef".to_string())),
            ("content", Value::String("calculate_sum helper function".to_string())),
        ])],
    );

    let query = SearchQuery::new("calculate_sum", HashSet::from([SearchType::Graph, SearchType::Text]), SearchFilters::new(10).unwrap());
    let results = facade.search_unified(&query).await.unwrap();

    assert_eq!(results.len(), 1);
    let top = &results[0];
    assert_eq!(top.content.as_deref(), Some("calculate_sum"));
    assert!(top.score >= 0.8, "score was {}", top.score);
    assert_eq!(top.origin, SearchOrigin::Unified);
}

/// S6 — a near-identical vector clears a high similarity threshold; an
/// opposing vector does not clear a much lower one.
#[tokio::test]
async fn s6_vector_search_respects_the_threshold() {
    let (facade, _graph, _sql) = build().await;

    let close = vec![0.1_f32; 768];
    let far = vec![-0.1_f32; 768];
    let query = vec![0.11_f32; 768];

    facade.link("intent-v", &["n1".to_string()], "s1", 1.0, None, Some(&close)).await.unwrap();

    let hits = facade.search_by_vector(&query, 10, 0.9).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].similarity > 0.9, "similarity was {}", hits[0].similarity);

    let no_hits = facade.search_by_vector(&far, 10, 0.5).await.unwrap();
    assert!(no_hits.is_empty());
}

/// The facade's `initialized` gate: calling before `initialize` fails
/// closed, and `close`/`initialize` are both idempotent.
#[tokio::test]
async fn lifecycle_guard_and_idempotent_init_close() {
    let graph = Arc::new(InMemoryBackend::graph());
    let sql = Arc::new(InMemoryBackend::relational());
    let config = Config::builder().max_retry_attempts(0).build().unwrap();
    let facade: TestCorpus = Corpus::new(config, graph, sql, CorpusError::GraphConnectionError, CorpusError::PostgresConnectionError);

    let err = facade
        .execute_graph_query("MATCH (n) RETURN n", corpus::Params::none(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CorpusError::NotInitialized));

    facade.initialize().await.unwrap();
    facade.initialize().await.unwrap();
    facade.close().await.unwrap();
    facade.close().await.unwrap();

    let err = facade
        .execute_graph_query("MATCH (n) RETURN n", corpus::Params::none(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CorpusError::NotInitialized));
}

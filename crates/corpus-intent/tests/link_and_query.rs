//! Integration tests against `corpus_testkit::InMemoryBackend`: the
//! round-trip law between `link` and the two lookup methods, and the
//! confidence/vector boundary validations.

use std::sync::Arc;
use std::time::Duration;

use corpus_core::{CorpusError, RetryPolicy};
use corpus_intent::IntentStore;
use corpus_testkit::InMemoryBackend;
use corpus_tx::ConnectionSupervisor;

fn policy() -> RetryPolicy {
    RetryPolicy::exponential(0).with_max_delay(Duration::from_secs(1))
}

async fn store() -> IntentStore<InMemoryBackend> {
    let adapter = Arc::new(InMemoryBackend::relational());
    let supervisor = Arc::new(ConnectionSupervisor::new(adapter, policy(), CorpusError::PostgresConnectionError));
    let store = IntentStore::new(supervisor);
    store.init_schema().await.unwrap();
    store
}

#[tokio::test]
async fn linked_nodes_round_trip_through_both_lookups() {
    let store = store().await;

    store
        .link("intent-a", &["n1".to_string(), "n2".to_string()], "file.py", 0.9, None, None)
        .await
        .unwrap();

    let by_intent = store.get_ast_nodes_by_intent("intent-a", 0.0).await.unwrap();
    assert_eq!(by_intent.len(), 2);
    assert!(by_intent.iter().any(|m| m.ast_node_id == "n1"));
    assert!(by_intent.iter().any(|m| m.ast_node_id == "n2"));

    let by_ast = store.get_intents_for_ast("n1", 0.0).await.unwrap();
    assert_eq!(by_ast.len(), 1);
    assert_eq!(by_ast[0].intent_id, "intent-a");
}

#[tokio::test]
async fn min_confidence_filters_out_lower_scored_links() {
    let store = store().await;
    store.link("intent-a", &["n1".to_string()], "f.py", 0.3, None, None).await.unwrap();
    store.link("intent-a", &["n2".to_string()], "f.py", 0.8, None, None).await.unwrap();

    let high_only = store.get_ast_nodes_by_intent("intent-a", 0.5).await.unwrap();
    assert_eq!(high_only.len(), 1);
    assert_eq!(high_only[0].ast_node_id, "n2");
}

#[tokio::test]
async fn confidence_boundaries_zero_and_one_are_accepted() {
    let store = store().await;
    assert!(store.link("i", &["n1".to_string()], "f.py", 0.0, None, None).await.is_ok());
    assert!(store.link("i", &["n2".to_string()], "f.py", 1.0, None, None).await.is_ok());
}

#[tokio::test]
async fn confidence_just_outside_the_unit_range_is_rejected() {
    let store = store().await;
    let low = store.link("i", &["n1".to_string()], "f.py", -0.0001, None, None).await;
    let high = store.link("i", &["n1".to_string()], "f.py", 1.0001, None, None).await;
    assert!(matches!(low, Err(CorpusError::ValidationError(_))));
    assert!(matches!(high, Err(CorpusError::ValidationError(_))));
}

#[tokio::test]
async fn vector_length_must_be_exactly_768() {
    let store = store().await;
    let too_short = vec![0.0_f32; 767];
    let too_long = vec![0.0_f32; 769];
    let exact = vec![0.0_f32; 768];

    assert!(matches!(
        store.link("i", &["n1".to_string()], "f.py", 0.5, None, Some(&too_short)).await,
        Err(CorpusError::ValidationError(_))
    ));
    assert!(matches!(
        store.link("i", &["n1".to_string()], "f.py", 0.5, None, Some(&too_long)).await,
        Err(CorpusError::ValidationError(_))
    ));
    assert!(store.link("i", &["n1".to_string()], "f.py", 0.5, None, Some(&exact)).await.is_ok());
}

#[tokio::test]
async fn update_confidence_and_remove_affect_only_the_targeted_row() {
    let store = store().await;
    store
        .link("i", &["n1".to_string(), "n2".to_string()], "f.py", 0.4, None, None)
        .await
        .unwrap();

    assert!(store.update_confidence("i", "n1", 0.95).await.unwrap());
    let mappings = store.get_ast_nodes_by_intent("i", 0.0).await.unwrap();
    let n1 = mappings.iter().find(|m| m.ast_node_id == "n1").unwrap();
    assert_eq!(n1.confidence, 0.95);

    let deleted = store.remove("i", Some("n1")).await.unwrap();
    assert_eq!(deleted, 1);
    let remaining = store.get_ast_nodes_by_intent("i", 0.0).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].ast_node_id, "n2");
}

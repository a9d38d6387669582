//! Literal query-text dispatch. The double recognizes the concrete
//! Cypher/SQL shapes emitted by `corpus-ingest`, `corpus-intent`,
//! `corpus-search` and `corpus-tx`'s best-effort logging, rather than
//! parsing a query language.

use crate::backend::{mark_migration, value_row, vector_capable, InMemoryBackend};
use chrono::Utc;
use corpus_core::{CorpusError, Params, Result, Row};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

pub(crate) fn named_params(params: &Params) -> HashMap<String, Value> {
    match params {
        Params::Named(m) => m.clone(),
        Params::Positional(_) => HashMap::new(),
    }
}

fn str_list(params: &HashMap<String, Value>, key: &str) -> Option<Vec<String>> {
    params
        .get(key)
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
}

fn usize_param(params: &HashMap<String, Value>, key: &str, default: usize) -> usize {
    params.get(key).and_then(Value::as_i64).map(|v| v.max(0) as usize).unwrap_or(default)
}

pub(crate) fn execute_query(backend: &InMemoryBackend, query: &str, params: &HashMap<String, Value>) -> Result<Vec<Row>> {
    let q = query.trim();
    let upper = q.to_ascii_uppercase();

    if q.contains("CREATE EXTENSION IF NOT EXISTS vector") {
        return if vector_capable(backend) {
            Ok(Vec::new())
        } else {
            Err(CorpusError::SchemaError(format!("{}: vector extension not available", backend.label())))
        };
    }
    if upper.starts_with("CREATE ") {
        return Ok(Vec::new());
    }
    if q.contains("corpus_migrations") {
        return Ok(mark_migration_row(backend, params));
    }
    if q.contains("MATCH (n:ASTNode) WHERE") {
        return Ok(search_ast_nodes(backend, params));
    }
    if q.contains("corpus_intent_mapping") {
        return Ok(dispatch_intent_mapping(backend, &upper, params));
    }
    if q.contains("corpus_intent_vectors") {
        return Ok(dispatch_intent_vectors(backend, &upper, params));
    }
    if q.contains("corpus_search_documents") {
        return Ok(search_documents(backend, params));
    }
    if q.contains("transaction_logs") {
        return Ok(Vec::new());
    }

    tracing::debug!(query = q, "in-memory backend: unrecognized query, treated as a no-op");
    Ok(Vec::new())
}

pub(crate) fn batch_insert(backend: &InMemoryBackend, query: &str, rows: Vec<Params>) -> Result<u64> {
    let upper = query.to_ascii_uppercase();
    let mut created = 0u64;

    if upper.contains("MERGE (N:ASTNODE") {
        let mut tables = backend.tables.write().unwrap();
        for row_params in rows {
            let row = params_to_object(row_params);
            if upsert_ast_node(&mut tables, &row) {
                created += 1;
            }
        }
        return Ok(created);
    }

    if upper.contains("MERGE (A)-[:") {
        let edge_type = extract_relationship_type(query).unwrap_or_else(|| "UNKNOWN".to_string());
        let mut tables = backend.tables.write().unwrap();
        for row_params in rows {
            let row = params_to_object(row_params);
            if create_edge(&mut tables, &row, &edge_type) {
                created += 1;
            }
        }
        return Ok(created);
    }

    if let Some(table) = extract_insert_table(query) {
        let mut tables = backend.tables.write().unwrap();
        for row_params in rows {
            tables.entry(table.clone()).or_default().push(params_to_object(row_params));
            created += 1;
        }
        return Ok(created);
    }

    tracing::debug!(query, "in-memory backend: batch_insert against an unrecognized query, no rows stored");
    Ok(rows.len() as u64)
}

fn params_to_object(params: Params) -> Row {
    match params {
        Params::Named(m) => m,
        Params::Positional(values) => values
            .into_iter()
            .enumerate()
            .map(|(i, v)| (format!("col{i}"), v))
            .collect(),
    }
}

fn extract_relationship_type(query: &str) -> Option<String> {
    let start = query.find("[:")? + 2;
    let end = query[start..].find(']')? + start;
    Some(query[start..end].to_string())
}

fn extract_insert_table(query: &str) -> Option<String> {
    let upper = query.to_ascii_uppercase();
    let idx = upper.find("INSERT INTO")? + "INSERT INTO".len();
    let rest = query[idx..].trim_start();
    let end = rest.find(|c: char| c.is_whitespace() || c == '(').unwrap_or(rest.len());
    Some(rest[..end].to_string())
}

fn upsert_ast_node(tables: &mut HashMap<String, Vec<Row>>, row: &Row) -> bool {
    let id = row.get("id").cloned().unwrap_or(Value::Null);
    let source_id = row.get("source_id").cloned().unwrap_or(Value::Null);
    let props = row.get("props").and_then(Value::as_object).cloned().unwrap_or_default();

    let table = tables.entry("ASTNode".to_string()).or_default();
    if let Some(existing) = table.iter_mut().find(|r| r.get("id") == Some(&id) && r.get("source_id") == Some(&source_id)) {
        for (k, v) in props {
            existing.insert(k, v);
        }
        false
    } else {
        let mut new_row = value_row([("id", id), ("source_id", source_id)]);
        for (k, v) in props {
            new_row.insert(k, v);
        }
        table.push(new_row);
        true
    }
}

fn create_edge(tables: &mut HashMap<String, Vec<Row>>, row: &Row, edge_type: &str) -> bool {
    let source = row.get("source").cloned().unwrap_or(Value::Null);
    let target = row.get("target").cloned().unwrap_or(Value::Null);
    let source_id = row.get("source_id").cloned().unwrap_or(Value::Null);

    let nodes_exist = {
        let nodes = tables.get("ASTNode").cloned().unwrap_or_default();
        let has = |id: &Value| nodes.iter().any(|n| n.get("id") == Some(id) && n.get("source_id") == Some(&source_id));
        has(&source) && has(&target)
    };
    if !nodes_exist {
        return false;
    }

    let edges = tables.entry("ASTNode_EDGES".to_string()).or_default();
    let already = edges.iter().any(|e| {
        e.get("source") == Some(&source)
            && e.get("target") == Some(&target)
            && e.get("source_id") == Some(&source_id)
            && e.get("type").and_then(Value::as_str) == Some(edge_type)
    });
    if already {
        return false;
    }
    edges.push(value_row([
        ("source", source),
        ("target", target),
        ("source_id", source_id),
        ("type", Value::String(edge_type.to_string())),
    ]));
    true
}

fn mark_migration_row(backend: &InMemoryBackend, params: &HashMap<String, Value>) -> Vec<Row> {
    let Some(id) = params.get("id").and_then(Value::as_str) else {
        return Vec::new();
    };
    if mark_migration(backend, id) {
        vec![value_row([("id", Value::String(id.to_string()))])]
    } else {
        Vec::new()
    }
}

fn search_ast_nodes(backend: &InMemoryBackend, params: &HashMap<String, Value>) -> Vec<Row> {
    let tables = backend.tables.read().unwrap();
    let Some(table) = tables.get("ASTNode") else {
        return Vec::new();
    };
    let needle = params.get("needle").and_then(Value::as_str).unwrap_or_default().to_lowercase();
    let node_types = str_list(params, "node_types");
    let source_ids = str_list(params, "source_ids");
    let max_results = usize_param(params, "max_results", 10);

    table
        .iter()
        .filter(|row| {
            let id_match = row.get("id").and_then(Value::as_str).map(|s| s.to_lowercase().contains(&needle)).unwrap_or(false);
            let value_match = row.get("value").and_then(Value::as_str).map(|s| s.to_lowercase().contains(&needle)).unwrap_or(false);
            (id_match || value_match)
                && node_types
                    .as_ref()
                    .map_or(true, |types| row.get("node_type").and_then(Value::as_str).map(|t| types.iter().any(|x| x == t)).unwrap_or(false))
                && source_ids
                    .as_ref()
                    .map_or(true, |ids| row.get("source_id").and_then(Value::as_str).map(|s| ids.iter().any(|x| x == s)).unwrap_or(false))
        })
        .take(max_results)
        .map(|row| {
            value_row([
                ("id", row.get("id").cloned().unwrap_or(Value::Null)),
                ("source_id", row.get("source_id").cloned().unwrap_or(Value::Null)),
                ("node_type", row.get("node_type").cloned().unwrap_or(Value::Null)),
                ("value", row.get("value").cloned().unwrap_or(Value::Null)),
                ("line_number", row.get("line_number").cloned().unwrap_or(Value::Null)),
            ])
        })
        .collect()
}

fn dispatch_intent_mapping(backend: &InMemoryBackend, upper: &str, params: &HashMap<String, Value>) -> Vec<Row> {
    if upper.starts_with("INSERT") {
        upsert_intent_mapping(backend, params)
    } else if upper.starts_with("SELECT") && upper.contains("WHERE INTENT_ID") {
        select_intent_mapping(backend, params, "intent_id")
    } else if upper.starts_with("SELECT") {
        select_intent_mapping(backend, params, "ast_node_id")
    } else if upper.starts_with("UPDATE") {
        update_confidence(backend, params)
    } else if upper.starts_with("DELETE") && upper.contains("AND AST_NODE_ID") {
        delete_mapping(backend, params, true)
    } else if upper.starts_with("DELETE") {
        delete_mapping(backend, params, false)
    } else {
        Vec::new()
    }
}

fn upsert_intent_mapping(backend: &InMemoryBackend, params: &HashMap<String, Value>) -> Vec<Row> {
    let mut tables = backend.tables.write().unwrap();
    let table = tables.entry("corpus_intent_mapping".to_string()).or_default();
    let intent_id = params.get("intent_id").cloned().unwrap_or(Value::Null);
    let ast_node_id = params.get("ast_node_id").cloned().unwrap_or(Value::Null);
    let now = Value::String(Utc::now().to_rfc3339());

    if let Some(existing) = table.iter_mut().find(|r| r.get("intent_id") == Some(&intent_id) && r.get("ast_node_id") == Some(&ast_node_id)) {
        existing.insert("source_id".to_string(), params.get("source_id").cloned().unwrap_or(Value::Null));
        existing.insert("confidence".to_string(), params.get("confidence").cloned().unwrap_or(Value::Null));
        existing.insert("metadata".to_string(), params.get("metadata").cloned().unwrap_or(Value::Null));
        existing.insert("updated_at".to_string(), now);
    } else {
        table.push(value_row([
            ("intent_id", intent_id),
            ("ast_node_id", ast_node_id),
            ("source_id", params.get("source_id").cloned().unwrap_or(Value::Null)),
            ("confidence", params.get("confidence").cloned().unwrap_or(Value::Null)),
            ("metadata", params.get("metadata").cloned().unwrap_or(Value::Null)),
            ("created_at", now.clone()),
            ("updated_at", now),
        ]));
    }
    Vec::new()
}

fn select_intent_mapping(backend: &InMemoryBackend, params: &HashMap<String, Value>, key: &str) -> Vec<Row> {
    let tables = backend.tables.read().unwrap();
    let Some(table) = tables.get("corpus_intent_mapping") else {
        return Vec::new();
    };
    let wanted = params.get(key).and_then(Value::as_str).unwrap_or_default();
    let min_confidence = params.get("min_confidence").and_then(Value::as_f64).unwrap_or(0.0);

    let mut rows: Vec<Row> = table
        .iter()
        .filter(|r| r.get(key).and_then(Value::as_str) == Some(wanted) && r.get("confidence").and_then(Value::as_f64).unwrap_or(0.0) >= min_confidence)
        .cloned()
        .collect();

    rows.sort_by(|a, b| {
        let ca = a.get("confidence").and_then(Value::as_f64).unwrap_or(0.0);
        let cb = b.get("confidence").and_then(Value::as_f64).unwrap_or(0.0);
        cb.partial_cmp(&ca).unwrap_or(Ordering::Equal).then_with(|| {
            let da = a.get("created_at").and_then(Value::as_str).unwrap_or_default();
            let db = b.get("created_at").and_then(Value::as_str).unwrap_or_default();
            db.cmp(da)
        })
    });
    rows
}

fn update_confidence(backend: &InMemoryBackend, params: &HashMap<String, Value>) -> Vec<Row> {
    let mut tables = backend.tables.write().unwrap();
    let Some(table) = tables.get_mut("corpus_intent_mapping") else {
        return Vec::new();
    };
    let intent_id = params.get("intent_id").cloned().unwrap_or(Value::Null);
    let ast_node_id = params.get("ast_node_id").cloned().unwrap_or(Value::Null);
    let new_confidence = params.get("new_confidence").cloned().unwrap_or(Value::Null);

    if let Some(row) = table.iter_mut().find(|r| r.get("intent_id") == Some(&intent_id) && r.get("ast_node_id") == Some(&ast_node_id)) {
        row.insert("confidence".to_string(), new_confidence);
        row.insert("updated_at".to_string(), Value::String(Utc::now().to_rfc3339()));
        vec![value_row([("ast_node_id", ast_node_id)])]
    } else {
        Vec::new()
    }
}

fn delete_mapping(backend: &InMemoryBackend, params: &HashMap<String, Value>, single: bool) -> Vec<Row> {
    let mut tables = backend.tables.write().unwrap();
    let Some(table) = tables.get_mut("corpus_intent_mapping") else {
        return Vec::new();
    };
    let intent_id = params.get("intent_id").cloned().unwrap_or(Value::Null);
    let ast_node_id = params.get("ast_node_id").cloned().unwrap_or(Value::Null);

    let mut removed = Vec::new();
    table.retain(|r| {
        let matches = r.get("intent_id") == Some(&intent_id) && (!single || r.get("ast_node_id") == Some(&ast_node_id));
        if matches {
            removed.push(value_row([("ast_node_id", r.get("ast_node_id").cloned().unwrap_or(Value::Null))]));
        }
        !matches
    });
    removed
}

fn dispatch_intent_vectors(backend: &InMemoryBackend, upper: &str, params: &HashMap<String, Value>) -> Vec<Row> {
    if upper.starts_with("INSERT") {
        upsert_vector(backend, params)
    } else if upper.starts_with("DELETE") {
        delete_vector(backend, params)
    } else {
        search_by_vector(backend, params)
    }
}

fn upsert_vector(backend: &InMemoryBackend, params: &HashMap<String, Value>) -> Vec<Row> {
    let mut tables = backend.tables.write().unwrap();
    let table = tables.entry("corpus_intent_vectors".to_string()).or_default();
    let intent_id = params.get("intent_id").cloned().unwrap_or(Value::Null);
    let vector = params.get("vec_literal").cloned().unwrap_or(Value::Null);
    table.retain(|r| r.get("intent_id") != Some(&intent_id));
    table.push(value_row([("intent_id", intent_id), ("vector", vector)]));
    Vec::new()
}

fn delete_vector(backend: &InMemoryBackend, params: &HashMap<String, Value>) -> Vec<Row> {
    let mut tables = backend.tables.write().unwrap();
    let Some(table) = tables.get_mut("corpus_intent_vectors") else {
        return Vec::new();
    };
    let intent_id = params.get("intent_id").cloned().unwrap_or(Value::Null);
    table.retain(|r| r.get("intent_id") != Some(&intent_id));
    Vec::new()
}

fn search_by_vector(backend: &InMemoryBackend, params: &HashMap<String, Value>) -> Vec<Row> {
    let tables = backend.tables.read().unwrap();
    let Some(table) = tables.get("corpus_intent_vectors") else {
        return Vec::new();
    };
    let query_vector = parse_vector_literal(params.get("query_vector").and_then(Value::as_str).unwrap_or_default());
    let threshold = params.get("threshold").and_then(Value::as_f64).unwrap_or(0.0);
    let limit = usize_param(params, "result_limit", 10);

    let mut hits: Vec<(String, f64)> = table
        .iter()
        .filter_map(|row| {
            let intent_id = row.get("intent_id")?.as_str()?.to_string();
            let vector = parse_vector_literal(row.get("vector")?.as_str()?);
            let similarity = cosine_similarity(&query_vector, &vector);
            (similarity >= threshold).then_some((intent_id, similarity))
        })
        .collect();

    hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    hits.truncate(limit);
    hits.into_iter()
        .map(|(intent_id, similarity)| value_row([("intent_id", Value::String(intent_id)), ("similarity", Value::from(similarity))]))
        .collect()
}

fn search_documents(backend: &InMemoryBackend, params: &HashMap<String, Value>) -> Vec<Row> {
    let tables = backend.tables.read().unwrap();
    let Some(table) = tables.get("corpus_search_documents") else {
        return Vec::new();
    };
    let text = params.get("text").and_then(Value::as_str).unwrap_or_default().to_lowercase();
    let terms: Vec<&str> = text.split_whitespace().collect();
    let node_types = str_list(params, "node_types");
    let source_ids = str_list(params, "source_ids");
    let max_results = usize_param(params, "max_results", 10);

    let mut hits: Vec<(Row, f64)> = table
        .iter()
        .filter_map(|row| {
            if terms.is_empty() {
                return None;
            }
            let content = row.get("content").and_then(Value::as_str).unwrap_or_default().to_lowercase();
            let matched = terms.iter().filter(|t| content.contains(**t)).count();
            if matched == 0 {
                return None;
            }
            if let Some(types) = &node_types {
                if !row.get("node_type").and_then(Value::as_str).map(|t| types.iter().any(|x| x == t)).unwrap_or(false) {
                    return None;
                }
            }
            if let Some(ids) = &source_ids {
                if !row.get("source_id").and_then(Value::as_str).map(|s| ids.iter().any(|x| x == s)).unwrap_or(false) {
                    return None;
                }
            }
            let rank = matched as f64 / terms.len() as f64;
            let mut out = row.clone();
            out.insert("rank".to_string(), Value::from(rank));
            Some((out, rank))
        })
        .collect();

    hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    hits.truncate(max_results);
    hits.into_iter().map(|(r, _)| r).collect()
}

fn parse_vector_literal(literal: &str) -> Vec<f32> {
    literal
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<f32>().ok())
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn parses_bracketed_vector_literal() {
        assert_eq!(parse_vector_literal("[1,2.5,-3]"), vec![1.0, 2.5, -3.0]);
    }

    #[test]
    fn extracts_relationship_type_from_merge_clause() {
        let q = "UNWIND $rows AS row MATCH (a:ASTNode {id: row.source}) MATCH (b:ASTNode {id: row.target}) MERGE (a)-[:CHILD]->(b)";
        assert_eq!(extract_relationship_type(q), Some("CHILD".to_string()));
    }

    #[test]
    fn extracts_insert_table_name() {
        assert_eq!(extract_insert_table("INSERT INTO transaction_logs (a, b) VALUES ($1, $2)"), Some("transaction_logs".to_string()));
    }
}

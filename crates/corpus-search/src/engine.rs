//! `SearchEngine`: three branches run concurrently via
//! `futures::future::join_all`; a branch failure is logged and contributes
//! no results rather than failing the whole call.

use crate::model::{SearchFilters, SearchOrigin, SearchQuery, SearchResult, SearchType, SearchWeights};
use corpus_core::{BackendAdapter, Params, Row};
use corpus_intent::IntentStore;
use corpus_tx::ConnectionSupervisor;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Intent store default; the search query shape carries no separate
/// threshold field, so the fan-out uses the store's own default.
const VECTOR_SEARCH_THRESHOLD: f64 = 0.7;

pub struct SearchEngine<G: BackendAdapter + 'static, S: BackendAdapter + 'static> {
    graph: Arc<ConnectionSupervisor<G>>,
    sql: Arc<ConnectionSupervisor<S>>,
    intent: Arc<IntentStore<S>>,
}

impl<G, S> SearchEngine<G, S>
where
    G: BackendAdapter + 'static,
    S: BackendAdapter + 'static,
{
    pub fn new(graph: Arc<ConnectionSupervisor<G>>, sql: Arc<ConnectionSupervisor<S>>, intent: Arc<IntentStore<S>>) -> Self {
        Self { graph, sql, intent }
    }

    pub async fn search(&self, query: &SearchQuery) -> Vec<SearchResult> {
        let types = effective_types(query);

        let mut branch_futures: Vec<Pin<Box<dyn Future<Output = Vec<SearchResult>> + Send + '_>>> = Vec::new();
        if types.contains(&SearchType::Graph) {
            branch_futures.push(Box::pin(self.run_graph_branch(query)));
        }
        if types.contains(&SearchType::Text) {
            branch_futures.push(Box::pin(self.run_text_branch(query)));
        }
        if types.contains(&SearchType::Vector) && query.vector.is_some() {
            branch_futures.push(Box::pin(self.run_vector_branch(query)));
        }

        let branch_results = futures::future::join_all(branch_futures).await;
        let candidates: Vec<SearchResult> = branch_results.into_iter().flatten().collect();
        merge_candidates(candidates, query.weights.normalized(), query.filters.max_results)
    }

    async fn run_graph_branch(&self, query: &SearchQuery) -> Vec<SearchResult> {
        if let Err(e) = self.graph.ensure_connected().await {
            tracing::warn!(error = %e, "graph search branch: connect failed");
            return Vec::new();
        }

        let needle = query.text.to_lowercase();
        let mut where_clauses = vec!["(toLower(n.id) CONTAINS $needle OR toLower(n.value) CONTAINS $needle)".to_string()];
        let mut params = HashMap::new();
        params.insert("needle".to_string(), Value::String(needle.clone()));

        let node_types_filtered = query.filters.node_types.is_some();
        if let Some(node_types) = &query.filters.node_types {
            where_clauses.push("n.node_type IN $node_types".to_string());
            params.insert(
                "node_types".to_string(),
                Value::Array(node_types.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(source_ids) = &query.filters.source_ids {
            where_clauses.push("n.source_id IN $source_ids".to_string());
            params.insert(
                "source_ids".to_string(),
                Value::Array(source_ids.iter().cloned().map(Value::String).collect()),
            );
        }
        params.insert("max_results".to_string(), Value::from(query.filters.max_results as i64));

        let cypher = format!(
            "MATCH (n:ASTNode) WHERE {} \
             RETURN n.id AS id, n.source_id AS source_id, n.node_type AS node_type, n.value AS value, n.line_number AS line_number \
             LIMIT $max_results",
            where_clauses.join(" AND ")
        );

        let rows = match self.graph.adapter().execute_query(&cypher, Params::Named(params), None).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "graph search branch failed");
                return Vec::new();
            }
        };

        rows.iter().filter_map(|row| graph_row_to_result(row, &needle, node_types_filtered)).collect()
    }

    async fn run_text_branch(&self, query: &SearchQuery) -> Vec<SearchResult> {
        if let Err(e) = self.sql.ensure_connected().await {
            tracing::warn!(error = %e, "text search branch: connect failed");
            return Vec::new();
        }

        let mut where_clauses = vec!["tsv @@ plainto_tsquery('english', :text)".to_string()];
        let mut params = HashMap::new();
        params.insert("text".to_string(), Value::String(query.text.clone()));

        if let Some(source_ids) = &query.filters.source_ids {
            where_clauses.push("source_id = ANY(:source_ids)".to_string());
            params.insert(
                "source_ids".to_string(),
                Value::Array(source_ids.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(node_types) = &query.filters.node_types {
            where_clauses.push("node_type = ANY(:node_types)".to_string());
            params.insert(
                "node_types".to_string(),
                Value::Array(node_types.iter().cloned().map(Value::String).collect()),
            );
        }
        params.insert("max_results".to_string(), Value::from(query.filters.max_results as i64));

        let sql = format!(
            "SELECT id, source_id, node_type, content, file_path, line_number, \
             ts_rank(tsv, plainto_tsquery('english', :text)) AS rank \
             FROM corpus_search_documents WHERE {} ORDER BY rank DESC LIMIT :max_results",
            where_clauses.join(" AND ")
        );

        let rows = match self.sql.adapter().execute_query(&sql, Params::Named(params), None).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "text search branch failed");
                return Vec::new();
            }
        };

        rows.iter().map(|row| text_row_to_result(row, &query.text)).collect()
    }

    async fn run_vector_branch(&self, query: &SearchQuery) -> Vec<SearchResult> {
        let Some(vector) = &query.vector else {
            return Vec::new();
        };
        match self.intent.search_by_vector(vector, query.filters.max_results, VECTOR_SEARCH_THRESHOLD).await {
            Ok(matches) => matches
                .into_iter()
                .map(|m| SearchResult {
                    id: m.intent_id,
                    source_id: None,
                    node_type: None,
                    content: None,
                    score: m.similarity,
                    origin: SearchOrigin::Vector,
                    metadata: Value::Null,
                    highlights: Vec::new(),
                    file_path: None,
                    line_number: None,
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "vector search branch failed");
                Vec::new()
            }
        }
    }
}

fn effective_types(query: &SearchQuery) -> HashSet<SearchType> {
    if query.search_types.contains(&SearchType::Unified) {
        let mut set = HashSet::from([SearchType::Graph, SearchType::Text]);
        if query.vector.is_some() {
            set.insert(SearchType::Vector);
        }
        set
    } else {
        query.search_types.clone()
    }
}

fn graph_row_to_result(row: &Row, needle: &str, node_types_filtered: bool) -> Option<SearchResult> {
    let id = row.get("id")?.as_str()?.to_string();
    let source_id = row.get("source_id").and_then(Value::as_str).map(str::to_string);
    let node_type = row.get("node_type").and_then(Value::as_str).map(str::to_string);
    let value = row.get("value").and_then(Value::as_str).map(str::to_string);
    let line_number = row.get("line_number").and_then(Value::as_u64).map(|v| v as u32);

    let id_lower = id.to_lowercase();
    let value_lower = value.as_deref().map(str::to_lowercase);
    let mut score = if id_lower == needle {
        1.0
    } else if value_lower.as_deref() == Some(needle) {
        0.9
    } else if value_lower.as_deref().is_some_and(|v| v.contains(needle)) {
        0.7
    } else if id_lower.contains(needle) {
        0.6
    } else {
        0.4
    };
    if node_types_filtered {
        score = (score * 1.2_f64).min(1.0);
    }

    Some(SearchResult {
        id,
        source_id,
        node_type,
        content: value,
        score,
        origin: SearchOrigin::Graph,
        metadata: Value::Null,
        highlights: Vec::new(),
        file_path: None,
        line_number,
    })
}

fn text_row_to_result(row: &Row, query_text: &str) -> SearchResult {
    let id = row.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
    let source_id = row.get("source_id").and_then(Value::as_str).map(str::to_string);
    let node_type = row.get("node_type").and_then(Value::as_str).map(str::to_string);
    let content = row.get("content").and_then(Value::as_str).map(str::to_string);
    let file_path = row.get("file_path").and_then(Value::as_str).map(str::to_string);
    let line_number = row.get("line_number").and_then(Value::as_u64).map(|v| v as u32);
    let rank = row.get("rank").and_then(Value::as_f64).unwrap_or(0.0);
    let score = rank.clamp(0.0, 1.0);
    let highlights = content.as_deref().map(|c| extract_highlights(c, query_text)).unwrap_or_default();

    SearchResult {
        id,
        source_id,
        node_type,
        content,
        score,
        origin: SearchOrigin::Text,
        metadata: Value::Null,
        highlights,
        file_path,
        line_number,
    }
}

/// Up to three `±50`-character snippets around each query term's first
/// occurrence, char-boundary safe.
fn extract_highlights(content: &str, query_text: &str) -> Vec<String> {
    let lower = content.to_lowercase();
    let mut highlights = Vec::new();
    for term in query_text.split_whitespace() {
        if highlights.len() >= 3 {
            break;
        }
        let term_lower = term.to_lowercase();
        if term_lower.is_empty() {
            continue;
        }
        let Some(byte_pos) = lower.find(&term_lower) else {
            continue;
        };
        let start = content[..byte_pos].char_indices().rev().nth(49).map(|(i, _)| i).unwrap_or(0);
        let end_from = byte_pos + term.len();
        let end = content[end_from..].char_indices().nth(50).map(|(i, _)| end_from + i).unwrap_or(content.len());

        let mut snippet = String::new();
        if start > 0 {
            snippet.push_str("...");
        }
        snippet.push_str(&content[start..end]);
        if end < content.len() {
            snippet.push_str("...");
        }
        highlights.push(snippet);
    }
    highlights
}

fn branch_weight(origin: SearchOrigin, weights: SearchWeights) -> f64 {
    match origin {
        SearchOrigin::Graph => weights.graph,
        SearchOrigin::Vector => weights.vector,
        SearchOrigin::Text => weights.text,
        SearchOrigin::Unified => 0.0,
    }
}

/// Groups candidates by id; a group of 2+ (the same entity surfaced by more
/// than one branch) collapses into one `origin = unified` result whose score
/// is the weighted mean of the contributing branches' scores, renormalized
/// over just those branches. Vector-branch ids are intent ids while
/// graph/text-branch ids are AST node ids, so in practice a group only
/// ever forms when those id spaces happen to coincide; this is inherent to
/// the three branches searching distinct entity kinds, not a merge bug.
fn merge_candidates(candidates: Vec<SearchResult>, weights: SearchWeights, max_results: usize) -> Vec<SearchResult> {
    let mut groups: HashMap<String, Vec<SearchResult>> = HashMap::new();
    for candidate in candidates {
        groups.entry(candidate.id.clone()).or_default().push(candidate);
    }

    let mut merged: Vec<SearchResult> = groups
        .into_iter()
        .map(|(id, mut group)| {
            if group.len() == 1 {
                return group.pop().unwrap();
            }

            let mut weighted_sum = 0.0;
            let mut weight_total = 0.0;
            for item in &group {
                let w = branch_weight(item.origin, weights);
                weighted_sum += w * item.score;
                weight_total += w;
            }
            let score = if weight_total > 0.0 { weighted_sum / weight_total } else { 0.0 };

            let mut content = None;
            let mut node_type = None;
            let mut source_id = None;
            let mut file_path = None;
            let mut line_number = None;
            let mut highlights = Vec::new();
            for item in group {
                content = content.or(item.content);
                node_type = node_type.or(item.node_type);
                source_id = source_id.or(item.source_id);
                file_path = file_path.or(item.file_path);
                line_number = line_number.or(item.line_number);
                highlights.extend(item.highlights);
            }
            highlights.truncate(3);

            SearchResult {
                id,
                source_id,
                node_type,
                content,
                score,
                origin: SearchOrigin::Unified,
                metadata: Value::Null,
                highlights,
                file_path,
                line_number,
            }
        })
        .collect();

    merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    merged.truncate(max_results.max(1));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, origin: SearchOrigin, score: f64) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            source_id: None,
            node_type: None,
            content: None,
            score,
            origin,
            metadata: Value::Null,
            highlights: Vec::new(),
            file_path: None,
            line_number: None,
        }
    }

    #[test]
    fn singleton_group_passes_through_unchanged() {
        let merged = merge_candidates(vec![result("a", SearchOrigin::Graph, 0.6)], SearchWeights::default(), 10);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].origin, SearchOrigin::Graph);
        assert_eq!(merged[0].score, 0.6);
    }

    #[test]
    fn overlapping_group_becomes_weighted_unified() {
        let merged = merge_candidates(
            vec![result("a", SearchOrigin::Graph, 1.0), result("a", SearchOrigin::Text, 0.5)],
            SearchWeights::default(),
            10,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].origin, SearchOrigin::Unified);
        // weights graph=0.4, text=0.2 -> (0.4*1.0 + 0.2*0.5) / 0.6
        assert!((merged[0].score - ((0.4 * 1.0 + 0.2 * 0.5) / 0.6)).abs() < 1e-9);
    }

    #[test]
    fn results_capped_at_max_results() {
        let merged = merge_candidates(
            vec![result("a", SearchOrigin::Graph, 0.9), result("b", SearchOrigin::Graph, 0.8), result("c", SearchOrigin::Graph, 0.7)],
            SearchWeights::default(),
            2,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, "a");
    }

    #[test]
    fn extract_highlights_finds_up_to_three_terms() {
        let content = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda";
        let highlights = extract_highlights(content, "alpha beta gamma delta");
        assert_eq!(highlights.len(), 3);
    }
}

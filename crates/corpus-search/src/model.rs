//! Search query/result data model.

use corpus_core::{CorpusError, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchType {
    Graph,
    Text,
    Vector,
    Unified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SearchOrigin {
    Graph,
    Text,
    Vector,
    Unified,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub node_types: Option<Vec<String>>,
    pub source_ids: Option<Vec<String>>,
    pub file_patterns: Option<Vec<String>>,
    pub date_from: Option<chrono::DateTime<chrono::Utc>>,
    pub date_to: Option<chrono::DateTime<chrono::Utc>>,
    pub min_confidence: f64,
    pub max_results: usize,
    pub metadata_filters: HashMap<String, Value>,
}

impl SearchFilters {
    /// `max_results` must be at least 1; a caller asking for zero results
    /// gets a `ValidationError` rather than a silently empty response.
    pub fn new(max_results: usize) -> Result<Self> {
        if max_results == 0 {
            return Err(CorpusError::ValidationError("max_results must be at least 1".to_string()));
        }
        Ok(Self {
            max_results,
            ..Default::default()
        })
    }
}

/// Per-branch merge weights. Default `{graph: 0.4, vector: 0.4, text: 0.2}`;
/// any caller-supplied mapping is renormalized to sum to 1.
#[derive(Debug, Clone, Copy)]
pub struct SearchWeights {
    pub graph: f64,
    pub vector: f64,
    pub text: f64,
}

impl Default for SearchWeights {
    fn default() -> Self {
        Self {
            graph: 0.4,
            vector: 0.4,
            text: 0.2,
        }
    }
}

impl SearchWeights {
    pub fn normalized(self) -> Self {
        let sum = self.graph + self.vector + self.text;
        if sum <= 0.0 {
            return Self::default();
        }
        Self {
            graph: self.graph / sum,
            vector: self.vector / sum,
            text: self.text / sum,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub text: String,
    pub search_types: HashSet<SearchType>,
    pub filters: SearchFilters,
    pub vector: Option<Vec<f32>>,
    pub weights: SearchWeights,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, search_types: HashSet<SearchType>, filters: SearchFilters) -> Self {
        Self {
            text: text.into(),
            search_types,
            filters,
            vector: None,
            weights: SearchWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub source_id: Option<String>,
    pub node_type: Option<String>,
    pub content: Option<String>,
    pub score: f64,
    pub origin: SearchOrigin,
    pub metadata: Value,
    pub highlights: Vec<String>,
    pub file_path: Option<String>,
    pub line_number: Option<u32>,
}

//! Row materialization: `neo4rs::Row` → `corpus_core::Row`, a mapping from
//! column name to value.
//!
//! `neo4rs::Row` deserializes generically via serde (`Row::to::<T>()`), so a
//! whole row converts directly into a `HashMap<String, serde_json::Value>`
//! without hand-rolled per-type matching.

use corpus_core::Row;
use std::collections::HashMap;

pub fn row_to_map(row: &neo4rs::Row) -> Row {
    row.to::<HashMap<String, serde_json::Value>>().unwrap_or_default()
}

//! # corpus-graph
//!
//! Neo4j-backed implementation of `corpus_core::BackendAdapter`. Grounded
//! on `dashflow-neo4j::neo4j_graph::Neo4jGraph`, generalized from a
//! LangChain-style `GraphStore::query`/schema-introspection surface to a
//! connect/health/execute/batch-insert/transaction contract. Vector search
//! and the Cypher-QA schema helpers that `dashflow-neo4j` carries for LLM
//! chains have no counterpart here and were dropped (see `DESIGN.md`).

mod adapter;
mod rows;

pub use adapter::Neo4jBackend;
pub use rows::row_to_map;

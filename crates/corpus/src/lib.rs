//! # corpus
//!
//! The single entry point wiring connection configuration, the two backend
//! adapters each behind a connection supervisor, the transaction engine, and
//! the three domain services — AST ingestion, the intent store, and search
//! fan-out.
//!
//! [`Corpus`] is generic over the two adapter types so the same facade code
//! runs against the real `corpus_graph::Neo4jBackend` /
//! `corpus_sql::PostgresBackend` pair in production and against
//! `corpus_testkit::InMemoryBackend` in tests. [`ProductionCorpus`] names
//! the concrete production instantiation.

mod facade;

pub use facade::Corpus;

/// The facade wired to the real Neo4j and PostgreSQL adapters.
pub type ProductionCorpus = Corpus<corpus_graph::Neo4jBackend, corpus_sql::PostgresBackend>;

pub use corpus_core::{BackendKind, Config, ConfigBuilder, CorpusError, OperationLogEntry, Params, Result, Row, TxHandle};
pub use corpus_ingest::{AstEdge, AstGraph, AstNode, EdgeType, IngestReport};
pub use corpus_intent::{IntentMapping, LinkResult, VectorMatch};
pub use corpus_search::{SearchFilters, SearchOrigin, SearchQuery, SearchResult, SearchType, SearchWeights};

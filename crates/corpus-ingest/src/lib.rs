//! # corpus-ingest
//!
//! AST ingestion: turns an AST graph payload into `MERGE`d
//! `ASTNode`s/relationships via a graph `BackendAdapter`.

pub mod ingestor;
pub mod model;

pub use ingestor::AstIngestor;
pub use model::{AstEdge, AstGraph, AstNode, EdgeType, IngestReport};

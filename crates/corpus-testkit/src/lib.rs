//! In-memory `BackendAdapter` test double.
//!
//! One [`InMemoryBackend`] type plays both roles — graph and relational —
//! in different test setups, since the trait contract is identical for
//! both. It recognizes the literal query text emitted by `corpus-ingest`,
//! `corpus-intent`, `corpus-search` and `corpus-tx`'s own best-effort
//! logging, rather than implementing a Cypher/SQL parser.

mod backend;
mod dispatch;

pub use backend::InMemoryBackend;

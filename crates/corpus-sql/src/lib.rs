//! # corpus-sql
//!
//! PostgreSQL-backed implementation of `corpus_core::BackendAdapter`.
//! Grounded on `dashflow-sql-database::SQLDatabase`'s pool construction
//! and row→JSON mapping (`Column`/`TypeInfo`/`try_get`), generalized from
//! a single read-only `run_query` surface built for LLM tool-calling into
//! a connect/health/execute/batch-insert/2PC contract. The LangChain-facing
//! tool surface (`QuerySQLDataBaseTool`, `InfoSQLDatabaseTool`,
//! `ListSQLDatabaseTool`, `QuerySQLCheckerTool`, `SQLDatabaseToolkit`, the
//! `Tool` trait impls, and MySQL support) has no counterpart here and was
//! dropped (see `DESIGN.md`).

mod adapter;
mod rows;

pub use adapter::PostgresBackend;
pub use rows::pg_row_to_map;

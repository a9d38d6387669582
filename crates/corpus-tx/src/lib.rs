//! # corpus-tx
//!
//! Connection supervisor and cross-store transaction engine. Depends only
//! on `corpus_core::BackendAdapter`, never on `corpus-graph` or
//! `corpus-sql` directly — the facade crate wires concrete adapters in.

pub mod engine;
pub mod supervisor;

pub use engine::TransactionEngine;
pub use supervisor::{ConnectionSupervisor, HealthMonitor};

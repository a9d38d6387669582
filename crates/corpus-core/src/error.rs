//! Error taxonomy for the unified data-access layer.
//!
//! Flat, non-hierarchical: one `CorpusError` variant per failure mode, no
//! `ConnectionError` vs `ConnectionException` duplication, no alternate
//! `TimeoutError` spelling.

use thiserror::Error;

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CorpusError>;

/// All error kinds surfaced to callers of the facade.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CorpusError {
    /// Config construction violated an invariant.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Graph backend connectivity failure.
    #[error("graph connection error: {0}")]
    GraphConnectionError(String),

    /// Relational backend connectivity failure.
    #[error("postgres connection error: {0}")]
    PostgresConnectionError(String),

    /// Pool acquisition exceeded `timeout_seconds`.
    #[error("pool exhausted: {0}")]
    PoolExhaustedError(String),

    /// A user-facing operation exceeded its timeout.
    #[error("operation timed out after {0}s")]
    OperationTimeoutError(u64),

    /// Connection-supervisor retry loop exhausted all attempts.
    #[error("retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhaustedError {
        attempts: u32,
        last_error: Box<CorpusError>,
    },

    /// Payload failed validation before any store mutation occurred.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// A store mutation failed.
    #[error("data operation error: {0}")]
    DataOperationError(String),

    /// Schema init/introspection failed.
    #[error("schema error: {0}")]
    SchemaError(String),

    /// Health-check-specific failure.
    #[error("health check error: {0}")]
    HealthCheckError(String),

    /// Commit/prepare failure in the transaction engine.
    #[error("transaction error: {0}")]
    TransactionError(String),

    /// Rollback itself failed, chained to the error that triggered it.
    #[error("transaction rollback error: {message} (triggered by: {cause})")]
    TransactionRollbackError {
        message: String,
        cause: Box<CorpusError>,
    },

    /// The facade was used before `initialize()` or after `close()`.
    #[error("facade not initialized")]
    NotInitialized,
}

impl CorpusError {
    pub fn retry_exhausted(attempts: u32, last_error: CorpusError) -> Self {
        Self::RetryExhaustedError {
            attempts,
            last_error: Box::new(last_error),
        }
    }

    pub fn rollback_failed(message: impl Into<String>, cause: CorpusError) -> Self {
        Self::TransactionRollbackError {
            message: message.into(),
            cause: Box::new(cause),
        }
    }

    /// Connectivity errors are retry-eligible outside a transaction.
    pub fn is_retryable_connectivity(&self) -> bool {
        matches!(
            self,
            Self::GraphConnectionError(_) | Self::PostgresConnectionError(_) | Self::PoolExhaustedError(_)
        )
    }
}

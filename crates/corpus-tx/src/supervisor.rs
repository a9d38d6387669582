//! Connection supervisor: retry+backoff, circuit breaker, and a background
//! health loop wrapped around a `BackendAdapter`.
//!
//! Grounded on `dashflow-registry::client`'s use of
//! `dashflow::core::retry::{RetryPolicy, with_retry}` around connection
//! attempts — generalized here to also gate attempts on the breaker
//! (`corpus_core::state::AdapterState`) before ever dialing the driver.

use corpus_core::{with_retry, BackendAdapter, CorpusError, Result, RetryPolicy};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Wraps a single backend adapter with retry/backoff and circuit-breaker
/// gating. The health loop that probes *both* adapters together lives in
/// `HealthMonitor`, since it is a facade-level concern, not a per-adapter one.
pub struct ConnectionSupervisor<A: BackendAdapter> {
    adapter: Arc<A>,
    retry_policy: RetryPolicy,
    breaker_open_error: fn(String) -> CorpusError,
}

impl<A: BackendAdapter + 'static> ConnectionSupervisor<A> {
    pub fn new(adapter: Arc<A>, retry_policy: RetryPolicy, breaker_open_error: fn(String) -> CorpusError) -> Self {
        Self {
            adapter,
            retry_policy,
            breaker_open_error,
        }
    }

    pub fn adapter(&self) -> &Arc<A> {
        &self.adapter
    }

    /// Lazily connects with retry if the adapter is not currently
    /// `Connected`.
    pub async fn ensure_connected(&self) -> Result<()> {
        if self.adapter.adapter_state().is_connected() {
            return Ok(());
        }

        if self.adapter.adapter_state().breaker_blocking(self.retry_policy.max_delay) {
            return Err((self.breaker_open_error)("circuit breaker open, retry_max_delay not yet elapsed".to_string()));
        }

        let adapter = Arc::clone(&self.adapter);
        with_retry(&self.retry_policy, move || {
            let adapter = Arc::clone(&adapter);
            async move { adapter.connect().await }
        })
        .await
    }
}

/// Background task that periodically probes a graph and a relational
/// adapter together and schedules a reconnect for whichever is unhealthy
/// when auto-reconnect is enabled. Cancellation is by task abort, which is
/// safe here because neither probe nor reconnect holds a lock across the
/// call.
pub struct HealthMonitor {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self { handle: Mutex::new(None) }
    }

    pub fn spawn(
        &self,
        graph: Arc<dyn BackendAdapter>,
        relational: Arc<dyn BackendAdapter>,
        interval: Duration,
        auto_reconnect: bool,
    ) {
        if interval.is_zero() {
            return;
        }
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for adapter in [&graph, &relational] {
                    probe_and_maybe_reconnect(adapter.as_ref(), auto_reconnect).await;
                }
            }
        });
        *self.handle.lock() = Some(task);
    }

    /// Cancel-safe at facade shutdown: aborts the loop between tick/probe
    /// suspension points.
    pub fn stop(&self) {
        if let Some(h) = self.handle.lock().take() {
            h.abort();
        }
    }
}

async fn probe_and_maybe_reconnect(adapter: &dyn BackendAdapter, auto_reconnect: bool) {
    match adapter.health_check().await {
        Ok((true, _)) => {}
        Ok((false, latency_ms)) => {
            tracing::warn!(latency_ms, "health probe reported unhealthy");
            maybe_reconnect(adapter, auto_reconnect).await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "health probe failed");
            maybe_reconnect(adapter, auto_reconnect).await;
        }
    }
}

async fn maybe_reconnect(adapter: &dyn BackendAdapter, auto_reconnect: bool) {
    if !auto_reconnect {
        return;
    }
    if let Err(e) = adapter.connect().await {
        tracing::warn!(error = %e, "health-loop reconnect failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpus_testkit::InMemoryBackend;

    fn graph_error(message: String) -> CorpusError {
        CorpusError::GraphConnectionError(message)
    }

    #[tokio::test]
    async fn ensure_connected_dials_when_not_connected() {
        let adapter = Arc::new(InMemoryBackend::graph());
        let supervisor = ConnectionSupervisor::new(Arc::clone(&adapter), RetryPolicy::exponential(0), graph_error);
        assert!(!adapter.adapter_state().is_connected());
        supervisor.ensure_connected().await.unwrap();
        assert!(adapter.adapter_state().is_connected());
    }

    #[tokio::test]
    async fn ensure_connected_is_a_no_op_once_connected() {
        let adapter = Arc::new(InMemoryBackend::graph());
        let supervisor = ConnectionSupervisor::new(Arc::clone(&adapter), RetryPolicy::exponential(0), graph_error);
        supervisor.ensure_connected().await.unwrap();

        adapter.fail_next_connect();
        supervisor.ensure_connected().await.unwrap();
    }

    #[tokio::test]
    async fn open_breaker_blocks_without_dialing() {
        let adapter = Arc::new(InMemoryBackend::graph());
        adapter.adapter_state().open_breaker();
        let supervisor = ConnectionSupervisor::new(
            Arc::clone(&adapter),
            RetryPolicy::exponential(0).with_max_delay(Duration::from_secs(60)),
            graph_error,
        );

        let err = supervisor.ensure_connected().await.unwrap_err();
        assert!(matches!(err, CorpusError::GraphConnectionError(_)));
        assert!(!adapter.adapter_state().is_connected());
    }

    #[tokio::test]
    async fn retries_past_a_single_connect_failure() {
        let adapter = Arc::new(InMemoryBackend::graph());
        adapter.fail_next_connect();
        let supervisor = ConnectionSupervisor::new(
            Arc::clone(&adapter),
            RetryPolicy::exponential(2).with_max_delay(Duration::from_millis(1)),
            graph_error,
        );

        supervisor.ensure_connected().await.unwrap();
        assert!(adapter.adapter_state().is_connected());
    }
}


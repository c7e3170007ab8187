//! Timeout-protected execution of remote units of work
//!
//! Every remote call the orchestrator makes goes through [`Executor`]. The
//! unit is spawned onto the runtime and raced against a timer; whichever
//! finishes first decides the [`ExecutionResult`]. A unit that loses the race
//! is detached, not aborted, so callers must keep retried work idempotent.

use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_core::fail_open::panic_message;
use strata_core::{ExecutionResult, StrataError, ToolEvent};
use tracing::{debug, warn};

use crate::events::EventHub;

/// Runs units of work with a timeout budget and reports them to an [`EventHub`]
#[derive(Clone)]
pub struct Executor {
    timeout: Duration,
    hub: Option<Arc<EventHub>>,
}

impl Executor {
    /// Create an executor with a default per-call budget
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, hub: None }
    }

    /// Emit a [`ToolEvent`] to `hub` after every execution
    pub fn with_hub(mut self, hub: Arc<EventHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Execute with the executor's default budget
    pub async fn execute<F, Fut, T, E>(
        &self,
        operation_name: &str,
        args: serde_json::Value,
        unit: F,
    ) -> ExecutionResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Display + Send + 'static,
    {
        self.execute_with_timeout(operation_name, args, self.timeout, unit)
            .await
    }

    /// Execute `unit` racing it against `timeout`
    ///
    /// Never panics and never returns an error: unit failures, panics and
    /// timeouts all come back as failure envelopes. A timeout carries
    /// `execution timeout after <ms>ms`.
    pub async fn execute_with_timeout<F, Fut, T, E>(
        &self,
        operation_name: &str,
        args: serde_json::Value,
        timeout: Duration,
        unit: F,
    ) -> ExecutionResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Display + Send + 'static,
    {
        let budget_ms = millis(timeout);
        let started = Instant::now();
        debug!("Executing {} (budget {}ms)", operation_name, budget_ms);

        let result = if timeout.is_zero() {
            ExecutionResult::failure("timeout must be greater than 0ms")
        } else {
            let handle = tokio::spawn(unit());

            // Dropping the JoinHandle on timeout detaches the task
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(Ok(data))) => ExecutionResult::success(data),
                Ok(Ok(Err(e))) => ExecutionResult::failure(e.to_string()),
                Ok(Err(join_error)) if join_error.is_panic() => {
                    let payload = join_error.into_panic();
                    ExecutionResult::failure(format!(
                        "execution panicked: {}",
                        panic_message(payload.as_ref())
                    ))
                }
                Ok(Err(_)) => ExecutionResult::failure("execution cancelled"),
                Err(_) => ExecutionResult::failure(StrataError::Timeout(budget_ms).to_string()),
            }
        };

        let result = result.with_execution_time(millis(started.elapsed()));

        if !result.success {
            warn!("{} failed: {}", operation_name, result.error_message());
        }

        if let Some(hub) = &self.hub {
            hub.emit(ToolEvent::new(operation_name, args, result.to_json()));
        }

        result
    }
}

/// Whole milliseconds, saturating at `u64::MAX`
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_success_envelope() {
        let executor = Executor::new(Duration::from_secs(1));
        let result = executor
            .execute("add", json!({"a": 2, "b": 3}), || async {
                Ok::<_, StrataError>(5)
            })
            .await;

        assert!(result.success);
        assert_eq!(result.data, Some(5));
        assert!(result.error.is_none());
        assert!(result.execution_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_error_is_captured() {
        let executor = Executor::new(Duration::from_secs(1));
        let result = executor
            .execute("fail", json!({}), || async {
                Err::<u32, _>(StrataError::Tracker("rate limited".to_string()))
            })
            .await;

        assert!(!result.success);
        assert!(result.data.is_none());
        assert_eq!(result.error.as_deref(), Some("Tracker error: rate limited"));
    }

    #[tokio::test]
    async fn test_timeout_reports_budget() {
        let executor = Executor::new(Duration::from_secs(5));
        let result = executor
            .execute_with_timeout("slow", json!({}), Duration::from_millis(50), || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, StrataError>(())
            })
            .await;

        assert!(!result.success);
        assert!(result.is_timeout());
        assert_eq!(result.error.as_deref(), Some("execution timeout after 50ms"));
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(250)), 250);
        assert_eq!(millis(Duration::from_micros(1500)), 1);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn test_unbounded_budget_runs_to_completion() {
        let executor = Executor::new(Duration::MAX);
        let result = executor
            .execute("quick", json!({}), || async { Ok::<_, StrataError>(7) })
            .await;

        assert!(result.success);
        assert_eq!(result.data, Some(7));
    }

    #[tokio::test]
    async fn test_timed_out_work_is_abandoned_not_aborted() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let executor = Executor::new(Duration::from_millis(20));
        let result = executor
            .execute("late", json!({}), move || async move {
                tokio::time::sleep(Duration::from_millis(80)).await;
                flag.store(true, Ordering::SeqCst);
                Ok::<_, StrataError>(())
            })
            .await;
        assert!(result.is_timeout());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panic_is_captured() {
        let executor = Executor::new(Duration::from_secs(1));
        let result: ExecutionResult<u32> = executor
            .execute("explode", json!({}), || async {
                if true {
                    panic!("remote client bug");
                }
                Ok::<_, StrataError>(1)
            })
            .await;

        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("execution panicked: remote client bug")
        );
    }

    #[tokio::test]
    async fn test_zero_timeout_is_rejected() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        let executor = Executor::new(Duration::ZERO);
        let result = executor
            .execute("never", json!({}), move || {
                flag.store(true, Ordering::SeqCst);
                async { Ok::<_, StrataError>(()) }
            })
            .await;

        assert!(!result.success);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_event_emitted_per_execution() {
        let hub = Arc::new(EventHub::new());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        hub.subscribe(move |event| {
            let _ = tx.send((event.operation_name.clone(), event.result.success));
        });

        let executor = Executor::new(Duration::from_secs(1)).with_hub(hub);
        executor
            .execute("create_issue", json!({"title": "[EPIC] Login"}), || async {
                Ok::<_, StrataError>(1)
            })
            .await;

        let (name, success) = rx.recv().await.unwrap();
        assert_eq!(name, "create_issue");
        assert!(success);
    }
}

//! Fail-open utilities for graceful degradation
//!
//! Use these for infrastructure operations (event delivery, report files,
//! logging) whose failure must never change the outcome of an orchestration.
//!
//! DO NOT use fail-open for:
//! - Work-item creation (business logic)
//! - Parent validation (correctness)
//! - Review comments (traceability)

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

use crate::Result;

/// Execute an async operation that should fail open
///
/// Logs the error via `tracing::warn!` on failure and returns `None`.
///
/// ```no_run
/// use strata_core::fail_open::fail_open;
/// use strata_core::Result;
///
/// async fn write_report() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let written = fail_open("report_writer", || write_report()).await;
///     // written is None if write_report() failed
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

/// Run a synchronous callback, containing any panic it raises
///
/// Returns `false` if the callback panicked. The panic is logged, never
/// propagated to the caller.
pub fn fail_open_call<F>(operation_name: &str, f: F) -> bool
where
    F: FnOnce(),
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            warn!(
                "{} panicked (fail-open): {}",
                operation_name,
                panic_message(payload.as_ref())
            );
            false
        }
    }
}

/// Best-effort text from a panic payload
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StrataError;

    #[tokio::test]
    async fn test_fail_open_success() {
        let result = fail_open("test_op", || async { Ok::<_, StrataError>(42) }).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn test_fail_open_failure() {
        let result = fail_open("test_op", || async {
            Err::<i32, _>(StrataError::Other("test error".to_string()))
        })
        .await;
        assert_eq!(result, None);
    }

    #[test]
    fn test_fail_open_call_contains_panic() {
        assert!(fail_open_call("ok_callback", || {}));
        assert!(!fail_open_call("bad_callback", || panic!("subscriber blew up")));
    }

    #[test]
    fn test_panic_message_variants() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}

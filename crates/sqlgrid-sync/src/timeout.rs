use sqlgrid_core::{Result, SqlgridError};
use std::future::Future;
use std::time::Duration;

/// Run one store call under the configured statement timeout.
///
/// On elapse the call's future is dropped; drivers stop the statement on drop
/// (the SQLite driver interrupts its session).
pub(crate) async fn bounded<T>(
    limit: Option<Duration>,
    what: &str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    let Some(limit) = limit else {
        return call.await;
    };
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation = what, timeout_ms = limit.as_millis() as u64, "store call timed out");
            Err(SqlgridError::Timeout(format!(
                "{} did not finish within {} ms",
                what,
                limit.as_millis()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1)
        };
        let err = bounded(Some(Duration::from_millis(100)), "query", slow)
            .await
            .unwrap_err();
        assert!(matches!(err, SqlgridError::Timeout(_)));
    }

    #[tokio::test]
    async fn unbounded_calls_pass_through() {
        let value = bounded(None, "query", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}

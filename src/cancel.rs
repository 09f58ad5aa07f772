//! Cancellable collaborator calls.
//!
//! Every call that leaves the process (embedding, file evidence, host info)
//! goes through [`cancellable`], which races it against the caller's token
//! and wraps collaborator failures with the operation that caused them.

use std::future::Future;

use kowalski_core::{Error, Result};
use tokio_util::sync::CancellationToken;

pub async fn cancellable<T, F>(token: &CancellationToken, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    if token.is_cancelled() {
        return Err(Error::Cancelled(operation.to_string()));
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled(operation.to_string())),
        result = fut => result.map_err(|e| Error::provider(operation, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_passes_through_result() {
        let token = CancellationToken::new();
        let value = cancellable(&token, "embed", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_wraps_collaborator_error() {
        let token = CancellationToken::new();
        let err = cancellable::<(), _>(&token, "embed query", async {
            Err(anyhow::anyhow!("connection refused"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
        assert!(err.to_string().contains("embed query"));
    }

    #[tokio::test]
    async fn test_cancelled_while_pending() {
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            child.cancel();
        });
        let err = cancellable(&token, "embed", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled(op) if op == "embed"));
    }
}

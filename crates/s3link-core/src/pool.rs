//! Backend connection pool
//!
//! A fixed number of permits stands in for connections to the backend. Each
//! call checks one out for its whole duration; the permit goes back when the
//! guard is dropped, whether the call finished, failed or timed out.

use crate::error::{BackendError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

/// Bounded pool of backend connections
#[derive(Clone, Debug)]
pub struct ConnectionPool {
    permits: Arc<Semaphore>,
    size: usize,
    dial_timeout: Duration,
}

/// A checked-out connection; returned to the pool on drop
#[derive(Debug)]
pub struct PooledConnection {
    _permit: OwnedSemaphorePermit,
}

impl ConnectionPool {
    /// Create a pool with `size` connections and a per-call timeout
    pub fn new(size: usize, dial_timeout: Duration) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
            dial_timeout,
        }
    }

    /// Wait for a free connection, giving up after the dial timeout
    pub async fn checkout(&self) -> Result<PooledConnection> {
        match tokio::time::timeout(self.dial_timeout, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(PooledConnection { _permit: permit }),
            Ok(Err(_)) => Err(BackendError::Unavailable("connection pool closed".to_string())),
            Err(_) => Err(BackendError::Unavailable(format!(
                "no backend connection available within {:?}",
                self.dial_timeout
            ))),
        }
    }

    /// Run one backend call on a pooled connection under the dial timeout
    pub async fn run<F, T>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _conn = self.checkout().await?;
        match tokio::time::timeout(self.dial_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout = ?self.dial_timeout, "backend call timed out");
                Err(BackendError::Unavailable(format!(
                    "{} timed out after {:?}",
                    operation, self.dial_timeout
                )))
            }
        }
    }

    /// Connections currently free
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Total connections
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permit_released_after_success_and_failure() {
        let pool = ConnectionPool::new(2, Duration::from_secs(1));

        let ok: Result<u8> = pool.run("ok", async { Ok(1) }).await;
        assert_eq!(ok.unwrap(), 1);

        let err: Result<u8> = pool
            .run("fail", async { Err(BackendError::BucketNotFound("b".into())) })
            .await;
        assert!(err.is_err());
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_unavailable_and_releases() {
        let pool = ConnectionPool::new(1, Duration::from_millis(20));

        let result: Result<()> = pool
            .run("slow", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(BackendError::Unavailable(_))));
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_checkout_waits_then_gives_up() {
        let pool = ConnectionPool::new(1, Duration::from_millis(20));
        let held = pool.checkout().await.unwrap();
        assert_eq!(pool.available(), 0);

        assert!(pool.checkout().await.unwrap_err().is_retryable());

        drop(held);
        assert!(pool.checkout().await.is_ok());
    }
}

//! Time bounds for calls into external stores.

use std::future::Future;
use std::time::Duration;

use crate::services::ServiceError;

/// Per-collaborator call limits.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub store: Duration,
    pub cache: Duration,
}

impl Timeouts {
    pub fn from_millis(store_ms: u64, cache_ms: u64) -> Self {
        Self {
            store: Duration::from_millis(store_ms),
            cache: Duration::from_millis(cache_ms),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from_millis(2_000, 500)
    }
}

/// Await `fut` for at most `limit`.
///
/// On expiry the future is dropped and `ServiceError::Timeout` names the
/// operation. The remote side may still complete; callers must not follow a
/// timed-out write with an unguarded read-modify-write.
pub async fn bounded<T, F>(limit: Duration, operation: &'static str, fut: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                operation = operation,
                timeout_ms = limit.as_millis() as u64,
                "Store call timed out"
            );
            Err(ServiceError::Timeout(operation.to_string()))
        }
    }
}

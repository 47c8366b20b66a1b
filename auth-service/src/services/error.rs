use service_core::error::AppError;
use thiserror::Error;

use super::device::DeviceConflict;
use super::jwt::TokenError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Session revoked")]
    SessionRevoked,

    #[error("Version desynchronized: token has {token}, principal is at {current}")]
    VersionDesynchronized { token: i64, current: i64 },

    #[error("Insufficient permission")]
    InsufficientPermission,

    #[error("Denied by override rule")]
    DeniedByOverride,

    #[error("Device conflict: {0}")]
    DeviceConflict(DeviceConflict),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    /// Only timeouts are safe for the caller to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Timeout(_))
    }

    /// The client should exchange its refresh token and replay the request.
    pub fn requires_refresh(&self) -> bool {
        matches!(
            self,
            ServiceError::TokenExpired | ServiceError::VersionDesynchronized { .. }
        )
    }
}

impl From<TokenError> for ServiceError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Malformed(reason) => ServiceError::Unauthenticated(reason),
            TokenError::Expired => ServiceError::TokenExpired,
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unauthenticated(e) => AppError::Unauthorized(anyhow::anyhow!(e)),
            ServiceError::TokenExpired => AppError::TokenExpired,
            ServiceError::SessionRevoked => AppError::SessionRevoked,
            ServiceError::VersionDesynchronized { token, current } => AppError::Desynchronized(
                anyhow::anyhow!("token version {} does not match {}", token, current),
            ),
            ServiceError::InsufficientPermission => {
                AppError::Forbidden(anyhow::anyhow!("Insufficient permission"))
            }
            ServiceError::DeniedByOverride => {
                AppError::Forbidden(anyhow::anyhow!("Denied by override rule"))
            }
            ServiceError::DeviceConflict(c) => {
                AppError::Conflict(anyhow::anyhow!("Device conflict: {}", c))
            }
            ServiceError::NotFound(e) => AppError::NotFound(anyhow::anyhow!(e)),
            ServiceError::Conflict(e) => AppError::Conflict(anyhow::anyhow!(e)),
            ServiceError::Validation(e) => AppError::BadRequest(anyhow::anyhow!(e)),
            ServiceError::Timeout(op) => AppError::Timeout(op),
            ServiceError::Database(e) => AppError::from(e),
            ServiceError::Redis(e) => AppError::RedisError(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}

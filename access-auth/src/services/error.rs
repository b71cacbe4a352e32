use service_core::error::AppError;
use service_core::utils::SignatureError;
use thiserror::Error;

use super::store::StoreError;

/// Resource name carried by `NotFound` for an unknown refresh token.
pub(crate) const SESSION_RESOURCE: &str = "session";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid credentials")]
    Authentication,

    #[error("Session expired")]
    SessionExpired,

    #[error("Session revoked")]
    SessionRevoked,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Protected account cannot change {fields}")]
    ProtectedAccountViolation { fields: String },

    #[error("Access platform rejected the signature ({code}): {message}")]
    SignatureMismatch { code: String, message: String },

    #[error("Access platform error (status {status}, code {code}): {message}")]
    Platform {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    /// Whether the caller may retry the same operation with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::StoreUnavailable(_))
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout(_) | StoreError::Unavailable(_) => {
                ServiceError::StoreUnavailable(err.to_string())
            }
            StoreError::Conflict(msg) => ServiceError::Conflict(msg),
            StoreError::Backend(e) => ServiceError::Internal(e),
        }
    }
}

impl From<SignatureError> for ServiceError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::Configuration(msg) => ServiceError::Configuration(msg),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(e) => AppError::Unprocessable(anyhow::anyhow!(e)),
            ServiceError::Configuration(e) => AppError::ConfigError(anyhow::anyhow!(e)),
            ServiceError::Authentication => {
                AppError::AuthError(anyhow::anyhow!("Invalid credentials"))
            }
            ServiceError::SessionExpired => AppError::AuthError(anyhow::anyhow!("Session expired")),
            ServiceError::SessionRevoked => AppError::AuthError(anyhow::anyhow!("Session revoked")),
            // An unknown refresh token is an authentication failure, not a lookup miss.
            ServiceError::NotFound(what) if what == SESSION_RESOURCE => {
                AppError::AuthError(anyhow::anyhow!("Session not found"))
            }
            ServiceError::NotFound(e) => AppError::NotFound(anyhow::anyhow!("{} not found", e)),
            ServiceError::Conflict(e) => AppError::Conflict(anyhow::anyhow!(e)),
            e @ ServiceError::ProtectedAccountViolation { .. } => {
                AppError::Forbidden(anyhow::anyhow!(e.to_string()))
            }
            e @ ServiceError::SignatureMismatch { .. } => AppError::BadGateway(e.to_string()),
            e @ ServiceError::Platform { .. } => AppError::BadGateway(e.to_string()),
            ServiceError::StoreUnavailable(e) => AppError::ServiceUnavailable(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}

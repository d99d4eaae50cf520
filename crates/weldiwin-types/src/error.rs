use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome taxonomy shared by the REST surface and the realtime gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Missing, invalid or expired credential.
    #[error("{0}")]
    Unauthorized(String),

    /// Authenticated, but the access rules deny the operation.
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// Uniqueness violation (duplicate email, already invited, ...).
    #[error("{0}")]
    Conflict(String),

    /// Malformed id, missing field or bad enum value.
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "Unauthorized",
            Self::Forbidden(_) => "Forbidden",
            Self::NotFound(_) => "NotFound",
            Self::Conflict(_) => "Conflict",
            Self::InvalidInput(_) => "InvalidInput",
            Self::Timeout(_) => "Timeout",
            Self::Unavailable(_) => "Unavailable",
            Self::Internal(_) => "Internal",
        }
    }

    /// Client-safe body. Internal details are replaced with a generic message.
    pub fn body(&self) -> ErrorBody {
        let message = match self {
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        ErrorBody {
            error: self.kind().to_string(),
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_details_are_hidden() {
        let err = ServiceError::Internal("no such table: rooms".into());
        let body = err.body();
        assert_eq!(body.error, "Internal");
        assert_eq!(body.message, "Internal server error");
    }

    #[test]
    fn forbidden_keeps_its_reason() {
        let body = ServiceError::forbidden("only the main parent can invite").body();
        assert_eq!(body.error, "Forbidden");
        assert_eq!(body.message, "only the main parent can invite");
    }
}

//! Error types for the engine
//!
//! Every data service and controller returns [`Result`]. The variants mirror
//! the error taxonomy the broker and HTTP layers dispatch on: a returned error
//! is either recoverable (retry via the delay queue) or fatal (quarantine to
//! the dead-letter exchange).

use thiserror::Error;

/// Stable error codes carried across component boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Entity absent
    NotFound,
    /// Input fails validation
    BadRequest,
    /// Unique key violation
    Conflict,
    /// Rule violation (reserved edit, forbidden path, skill rename)
    Forbidden,
    /// External dependency unreachable or refused
    BackendUnavailable,
    /// Bounded wait exceeded
    Timeout,
    /// Transient; the broker should re-deliver via the delay queue
    Retryable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::BadRequest => "BAD_REQUEST",
            Self::Conflict => "CONFLICT",
            Self::Forbidden => "FORBIDDEN",
            Self::BackendUnavailable => "BACKEND_UNAVAILABLE",
            Self::Timeout => "TIMEOUT",
            Self::Retryable => "RETRYABLE",
        }
    }
}

/// Main error type for engine operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EngineError {
    /// Entity absent
    #[error("not found: {0}")]
    NotFound(String),

    /// Input fails validation
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Unique key violation
    #[error("conflict: {0}")]
    Conflict(String),

    /// Rule violation
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// External dependency (LLM, sandbox provider, blob store) failed
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Bounded wait exceeded
    #[error("timeout: {0}")]
    Timeout(String),

    /// Transient failure worth re-delivering
    #[error("retryable: {0}")]
    Retryable(String),
}

impl EngineError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    /// The stable code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::BadRequest(_) => ErrorCode::BadRequest,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::BackendUnavailable(_) => ErrorCode::BackendUnavailable,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::Retryable(_) => ErrorCode::Retryable,
        }
    }

    /// Whether the broker should re-deliver the triggering message.
    ///
    /// Timeouts and backend outages are transient by nature; everything else
    /// would fail the same way on redelivery and goes to the DLX instead.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Retryable(_) | Self::Timeout(_) | Self::BackendUnavailable(_)
        )
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(db.to_string())
            }
            _ => Self::Retryable(format!("database error: {err}")),
        }
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(err: redis::RedisError) -> Self {
        Self::Retryable(format!("redis error: {err}"))
    }
}

impl From<lapin::Error> for EngineError {
    fn from(err: lapin::Error) -> Self {
        Self::BackendUnavailable(format!("broker error: {err}"))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("json error: {err}"))
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(format!("http timeout: {err}"))
        } else {
            Self::BackendUnavailable(format!("http error: {err}"))
        }
    }
}

/// Type alias for engine Result
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::not_found("artifact disk=x path=/ filename=SKILL.md");
        let display = format!("{}", err);
        assert!(display.contains("not found"));
        assert!(display.contains("SKILL.md"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(EngineError::forbidden("x").code(), ErrorCode::Forbidden);
        assert_eq!(
            EngineError::backend("x").code(),
            ErrorCode::BackendUnavailable
        );
        assert_eq!(ErrorCode::BadRequest.as_str(), "BAD_REQUEST");
    }

    #[test]
    fn test_retryability_classification() {
        assert!(EngineError::retryable("x").is_retryable());
        assert!(EngineError::timeout("x").is_retryable());
        assert!(EngineError::backend("x").is_retryable());

        assert!(!EngineError::not_found("x").is_retryable());
        assert!(!EngineError::bad_request("x").is_retryable());
        assert!(!EngineError::conflict("x").is_retryable());
        assert!(!EngineError::forbidden("x").is_retryable());
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_not_found() {
        let err: EngineError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[test]
    fn test_json_error_maps_to_bad_request() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: EngineError = parse_err.into();
        assert_eq!(err.code(), ErrorCode::BadRequest);
    }
}

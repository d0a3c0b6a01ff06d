//! Error handling for Satchel Core.
//!
//! This module provides:
//! - A single crate-wide error type with context and machine-readable codes
//! - Retryability classification consumed by the retry manager
//! - User-facing messages separated from internal diagnostic detail
//! - Tracing integration for error logging

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Satchel operations.
pub type Result<T> = std::result::Result<T, CoreError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and drive programmatic handling: the retry manager
/// keys its admission decisions off them, and the dashboard maps them to
/// user-facing states ("service degraded" vs "request failed").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Upstream provider errors (1000-1099)
    UpstreamRateLimited,
    UpstreamUnavailable,
    UpstreamRejected,
    NetworkError,
    Timeout,
    AuthFailed,

    // Resilience errors (1100-1199)
    CircuitOpen,

    // Cache errors (2000-2099)
    CacheError,

    // Serialization errors (2100-2199)
    SerializationError,
    DeserializationError,

    // Job errors (3000-3099)
    JobNotFound,
    JobFailed,

    // Validation errors (4000-4099)
    ValidationError,
    InvalidInput,

    // Configuration errors (5000-5099)
    ConfigurationError,

    // Internal errors (9000-9099)
    Internal,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::UpstreamRateLimited => 1000,
            Self::UpstreamUnavailable => 1001,
            Self::UpstreamRejected => 1002,
            Self::NetworkError => 1003,
            Self::Timeout => 1004,
            Self::AuthFailed => 1005,

            Self::CircuitOpen => 1100,

            Self::CacheError => 2000,

            Self::SerializationError => 2100,
            Self::DeserializationError => 2101,

            Self::JobNotFound => 3000,
            Self::JobFailed => 3001,

            Self::ValidationError => 4000,
            Self::InvalidInput => 4001,

            Self::ConfigurationError => 5000,

            Self::Internal => 9000,
        }
    }

    /// Whether failures with this code are transient and worth retrying.
    ///
    /// `CircuitOpen` is deliberately *not* retryable: the breaker has already
    /// decided the dependency is down, so the retry budget must not be spent
    /// on it.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamRateLimited
                | Self::UpstreamUnavailable
                | Self::NetworkError
                | Self::Timeout
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Core Error
// ═══════════════════════════════════════════════════════════════════════════════

/// The crate-wide error type.
///
/// Carries a stable code, a user-safe message, and optional internal detail
/// that is logged but never shown to end users.
#[derive(Debug, Clone, Error)]
#[error("[{code}] {message}")]
pub struct CoreError {
    /// Machine-readable error code
    code: ErrorCode,
    /// User-facing message (no internals, no stack traces)
    message: String,
    /// Internal diagnostic detail
    internal: Option<String>,
}

impl CoreError {
    /// Create a new error with a code and user message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            internal: None,
        }
    }

    /// Create a new error with internal diagnostic detail.
    pub fn with_internal(
        code: ErrorCode,
        message: impl Into<String>,
        internal: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            internal: Some(internal.into()),
        }
    }

    /// Shorthand for an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-facing message.
    pub fn user_message(&self) -> &str {
        &self.message
    }

    /// Get the internal diagnostic detail, if any.
    pub fn internal_detail(&self) -> Option<&str> {
        self.internal.as_deref()
    }

    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Log this error at the appropriate level.
    pub fn log(&self) {
        if self.is_retryable() {
            warn!(
                code = %self.code,
                internal = self.internal.as_deref().unwrap_or(""),
                "{}", self.message
            );
        } else {
            error!(
                code = %self.code,
                internal = self.internal.as_deref().unwrap_or(""),
                "{}", self.message
            );
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::SerializationError,
            "Failed to serialize or deserialize data",
            err.to_string(),
        )
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        let code = if err.is_timeout() {
            ErrorCode::Timeout
        } else {
            ErrorCode::NetworkError
        };
        Self::with_internal(code, "Upstream request failed", err.to_string())
    }
}

impl From<redis::RedisError> for CoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::with_internal(
            ErrorCode::CacheError,
            "Remote cache operation failed",
            err.to_string(),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ErrorCode::UpstreamRateLimited.is_retryable());
        assert!(ErrorCode::UpstreamUnavailable.is_retryable());
        assert!(ErrorCode::NetworkError.is_retryable());
        assert!(ErrorCode::Timeout.is_retryable());

        assert!(!ErrorCode::CircuitOpen.is_retryable());
        assert!(!ErrorCode::UpstreamRejected.is_retryable());
        assert!(!ErrorCode::AuthFailed.is_retryable());
        assert!(!ErrorCode::Internal.is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = CoreError::with_internal(
            ErrorCode::UpstreamUnavailable,
            "Document service is unavailable",
            "HTTP 503 from /2.0/files/42",
        );

        assert_eq!(err.code(), ErrorCode::UpstreamUnavailable);
        assert_eq!(err.user_message(), "Document service is unavailable");
        assert_eq!(err.internal_detail(), Some("HTTP 503 from /2.0/files/42"));
        assert!(err.is_retryable());

        // User-facing rendering never includes internal detail
        let rendered = err.to_string();
        assert!(rendered.contains("Document service is unavailable"));
        assert!(!rendered.contains("503"));
    }

    #[test]
    fn test_numeric_codes_are_unique() {
        let codes = [
            ErrorCode::UpstreamRateLimited,
            ErrorCode::UpstreamUnavailable,
            ErrorCode::UpstreamRejected,
            ErrorCode::NetworkError,
            ErrorCode::Timeout,
            ErrorCode::AuthFailed,
            ErrorCode::CircuitOpen,
            ErrorCode::CacheError,
            ErrorCode::SerializationError,
            ErrorCode::DeserializationError,
            ErrorCode::JobNotFound,
            ErrorCode::JobFailed,
            ErrorCode::ValidationError,
            ErrorCode::InvalidInput,
            ErrorCode::ConfigurationError,
            ErrorCode::Internal,
        ];

        let mut numeric: Vec<u32> = codes.iter().map(|c| c.numeric_code()).collect();
        numeric.sort_unstable();
        numeric.dedup();
        assert_eq!(numeric.len(), codes.len());
    }
}

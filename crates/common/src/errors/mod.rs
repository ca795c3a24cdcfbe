//! Error types for RagForge
//!
//! Provides a small error taxonomy with:
//! - Distinct variants for each failure mode of the retrieval pipeline
//! - Machine-readable error codes
//! - Retry classification for upstream failures

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    EmptyInput,

    // State errors (4xxx)
    NotIndexed,

    // External service errors (8xxx)
    UpstreamError,
    UpstreamTimeout,
    Cancelled,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::EmptyInput => 1002,

            ErrorCode::NotIndexed => 4001,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::UpstreamTimeout => 8002,
            ErrorCode::Cancelled => 8003,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Empty input: {message}")]
    EmptyInput { message: String },

    #[error("{retriever} retriever has not been indexed")]
    NotIndexed { retriever: String },

    #[error("Upstream {service} error: {message}")]
    Upstream { service: String, message: String },

    #[error("Upstream {service} timed out after {timeout_ms}ms")]
    Timeout { service: String, timeout_ms: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a validation error on a named field
    pub fn validation(message: impl Into<String>, field: Option<&str>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: field.map(str::to_string),
        }
    }

    /// Shorthand for an upstream failure of the given collaborator
    pub fn upstream(service: &str, message: impl Into<String>) -> Self {
        AppError::Upstream {
            service: service.to_string(),
            message: message.into(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::EmptyInput { .. } => ErrorCode::EmptyInput,
            AppError::NotIndexed { .. } => ErrorCode::NotIndexed,
            AppError::Upstream { .. } => ErrorCode::UpstreamError,
            AppError::Timeout { .. } => ErrorCode::UpstreamTimeout,
            AppError::Cancelled => ErrorCode::Cancelled,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } | AppError::Config(_) => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Whether a caller may reasonably retry the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Upstream { .. } | AppError::Timeout { .. } | AppError::HttpClient(_)
        )
    }

    /// Check if this error was caused by the caller's input
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::Validation { .. } | AppError::EmptyInput { .. } | AppError::NotIndexed { .. }
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::NotIndexed {
            retriever: "keyword".into(),
        };
        assert_eq!(err.code(), ErrorCode::NotIndexed);
        assert_eq!(err.code().as_code(), 4001);
        assert!(err.is_client_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::validation("query must not be empty", Some("query"));
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert!(err.is_client_error());
        assert!(err.to_string().contains("query must not be empty"));
    }

    #[test]
    fn test_upstream_is_retryable() {
        let err = AppError::upstream("embedding", "503 Service Unavailable");
        assert!(err.is_retryable());
        assert!(!err.is_client_error());
        assert_eq!(err.to_string(), "Upstream embedding error: 503 Service Unavailable");

        let timeout = AppError::Timeout {
            service: "llm".into(),
            timeout_ms: 500,
        };
        assert!(timeout.is_retryable());
        assert!(!AppError::Cancelled.is_retryable());
    }
}

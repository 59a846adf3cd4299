//! Unified error handling for Stellar services
//!
//! Crate-level errors (`PacketError`, `BusError`, `RuleError`, `CmdTlmError`)
//! convert into `StellarError` at service boundaries, where they are
//! classified, logged and exported in status records as `ErrorInfo`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// ErrorInfo - status/export error record
// ============================================================================

/// Error information attached to status records and command responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code, e.g. `CONNECTION_FAILED`
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub retryable: bool,
}

impl ErrorInfo {
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

// ============================================================================
// StellarError - Main error type
// ============================================================================

#[derive(Debug, Error)]
pub enum StellarError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // ======================================
    // Decode Errors
    // ======================================
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Unknown value type: {0}")]
    UnknownType(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // ======================================
    // Connection Errors
    // ======================================
    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Connection lost: {endpoint}: {reason}")]
    ConnectionLost { endpoint: String, reason: String },

    #[error("Timeout waiting for {0}")]
    Timeout(String),

    // ======================================
    // Rule Errors
    // ======================================
    #[error("Rule evaluation error: {0}")]
    RuleEvaluation(String),

    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("Action execution failed: {0}")]
    ActionExecution(String),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // ======================================
    // File & Serialization Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ======================================
    // Runtime Errors
    // ======================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using StellarError
pub type StellarResult<T> = Result<T, StellarError>;

impl From<std::io::Error> for StellarError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StellarError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for StellarError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// Helper macros for creating errors
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::StellarError::Config($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::StellarError::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! decode_error {
    ($msg:expr) => {
        $crate::StellarError::Decode($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::StellarError::Decode(format!($fmt, $($arg)*))
    };
}

// ============================================================================
// Classification
// ============================================================================

/// Error category - used for classification and status export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Configuration,
    Decode,
    UnknownType,
    NotFound,
    Connection,
    Timeout,
    RuleEvaluation,
    ActionExecution,
    Io,
    Serialization,
    Internal,
    Unknown,
}

/// Common interface for every Stellar error type
pub trait StellarErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Get error code (for logs and status records)
    fn error_code(&self) -> &'static str;

    fn category(&self) -> ErrorCategory;

    /// Whether the error is retryable (default implementation is category-based)
    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Connection | ErrorCategory::Timeout | ErrorCategory::Io
        )
    }

    /// Recommended retry delay in milliseconds
    fn retry_delay_ms(&self) -> u64 {
        match self.category() {
            ErrorCategory::Timeout => 1000,
            ErrorCategory::Connection => 5000,
            _ => 0,
        }
    }

    fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.error_code().to_string(),
            category: self.category(),
            message: self.to_string(),
            details: None,
            retryable: self.is_retryable(),
        }
    }
}

impl StellarErrorTrait for StellarError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIGURATION_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::Decode(_) => "DECODE_ERROR",
            Self::UnknownType(_) => "UNKNOWN_TYPE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::ConnectionLost { .. } => "CONNECTION_LOST",
            Self::Timeout(_) => "TIMEOUT",
            Self::RuleEvaluation(_) => "RULE_EVALUATION_ERROR",
            Self::CircularDependency(_) => "CIRCULAR_DEPENDENCY",
            Self::ActionExecution(_) => "ACTION_EXECUTION_FAILED",
            Self::HttpClient(_) => "HTTP_CLIENT_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Other(_) => "OTHER_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) | Self::InvalidConfig { .. } => ErrorCategory::Configuration,
            Self::Decode(_) => ErrorCategory::Decode,
            Self::UnknownType(_) => ErrorCategory::UnknownType,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::ConnectionFailed { .. } | Self::ConnectionLost { .. } => {
                ErrorCategory::Connection
            },
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::RuleEvaluation(_) | Self::CircularDependency(_) => ErrorCategory::RuleEvaluation,
            Self::ActionExecution(_) | Self::HttpClient(_) => ErrorCategory::ActionExecution,
            Self::Io(_) => ErrorCategory::Io,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Internal(_) => ErrorCategory::Internal,
            Self::Other(_) => ErrorCategory::Unknown,
        }
    }
}

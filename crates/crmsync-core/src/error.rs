//! Error types module
//!
//! All failures of the sync pipeline are unified under [`AppError`]. Every error can be
//! classified into the retry taxonomy ([`SyncErrorKind`]) that the retry controller and
//! the status tracker rely on.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx` feature.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Transport error codes treated as network failures.
const NETWORK_ERROR_CODES: &[&str] = &[
    "ECONNREFUSED",
    "ECONNRESET",
    "ETIMEDOUT",
    "ENOTFOUND",
    "EAI_AGAIN",
    "EPIPE",
];

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Retry taxonomy of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncErrorKind {
    Auth,
    Network,
    Validation,
    Database,
    Unknown,
}

impl SyncErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncErrorKind::Auth => "AUTH_ERROR",
            SyncErrorKind::Network => "NETWORK_ERROR",
            SyncErrorKind::Validation => "VALIDATION_ERROR",
            SyncErrorKind::Database => "DATABASE_ERROR",
            SyncErrorKind::Unknown => "UNKNOWN_ERROR",
        }
    }

    /// Auth and validation failures will not change on retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SyncErrorKind::Auth | SyncErrorKind::Validation)
    }
}

impl Display for SyncErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Metadata describing how an error should be reported and handled
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "NETWORK_ERROR")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Message safe to hand back to the authentication flow
    fn client_message(&self) -> String;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Upstream responded with status {status}: {message}")]
    UpstreamStatus { status: u16, message: String },

    #[error("Upstream rejected request for {resource}: {message}")]
    UpstreamRejected { resource: String, message: String },

    #[error("Network error{}: {message}", format_code(.code))]
    Network {
        code: Option<String>,
        message: String,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Network {
            code: io_error_code(&err).map(str::to_string),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::Validation(format!("UUID parsing error: {}", err))
    }
}

fn format_code(code: &Option<String>) -> String {
    code.as_deref()
        .map(|c| format!(" ({})", c))
        .unwrap_or_default()
}

fn io_error_code(err: &io::Error) -> Option<&'static str> {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => Some("ECONNRESET"),
        io::ErrorKind::TimedOut => Some("ETIMEDOUT"),
        io::ErrorKind::BrokenPipe => Some("EPIPE"),
        _ => None,
    }
}

fn classify_status(status: u16) -> SyncErrorKind {
    match status {
        401 | 403 => SyncErrorKind::Auth,
        400 | 409 | 422 => SyncErrorKind::Validation,
        408 | 429 | 500..=599 => SyncErrorKind::Network,
        _ => SyncErrorKind::Unknown,
    }
}

fn classify_message(message: &str) -> SyncErrorKind {
    let message = message.to_lowercase();
    if message.contains("unauthorized") || message.contains("forbidden") {
        SyncErrorKind::Auth
    } else if NETWORK_ERROR_CODES
        .iter()
        .any(|code| message.contains(&code.to_lowercase()))
        || message.contains("timeout")
        || message.contains("timed out")
        || message.contains("connection")
    {
        SyncErrorKind::Network
    } else if message.contains("validation") || message.contains("invalid") {
        SyncErrorKind::Validation
    } else if message.contains("database") || message.contains("duplicate key") {
        SyncErrorKind::Database
    } else {
        SyncErrorKind::Unknown
    }
}

impl AppError {
    /// Classify this error into the retry taxonomy.
    ///
    /// HTTP status wins over transport code, which wins over the variant; free-form
    /// messages are only inspected for internal errors.
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            AppError::UpstreamStatus { status, .. } => classify_status(*status),
            AppError::Network { .. } => SyncErrorKind::Network,
            AppError::Unauthorized(_) => SyncErrorKind::Auth,
            AppError::Validation(_) | AppError::Conflict(_) => SyncErrorKind::Validation,
            AppError::Database(_) => SyncErrorKind::Database,
            AppError::UpstreamRejected { message, .. } => classify_message(message),
            AppError::NotFound(_) => SyncErrorKind::Unknown,
            AppError::Internal(message) => classify_message(message),
            AppError::InternalWithSource { source, .. } => {
                if let Some(app) = source.downcast_ref::<AppError>() {
                    return app.kind();
                }
                if let Some(io) = source.downcast_ref::<io::Error>() {
                    if io_error_code(io).is_some() {
                        return SyncErrorKind::Network;
                    }
                }
                classify_message(&format!("{:#}", source))
            }
        }
    }

    /// Get the error type name for logs and status records
    pub fn error_type(&self) -> &str {
        match self {
            AppError::Database(_) => "Database",
            AppError::UpstreamStatus { .. } => "UpstreamStatus",
            AppError::UpstreamRejected { .. } => "UpstreamRejected",
            AppError::Network { .. } => "Network",
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::Validation(_) => "Validation",
            AppError::NotFound(_) => "NotFound",
            AppError::Conflict(_) => "Conflict",
            AppError::Internal(_) => "Internal",
            AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn error_code(&self) -> &'static str {
        self.kind().as_str()
    }

    fn is_recoverable(&self) -> bool {
        self.kind().is_retryable()
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Database(_) => "Failed to access database".to_string(),
            AppError::UpstreamStatus { status, .. } => match classify_status(*status) {
                SyncErrorKind::Auth => "Upstream rejected the access token".to_string(),
                _ => format!("Upstream request failed with status {}", status),
            },
            AppError::UpstreamRejected { resource, .. } => {
                format!("Upstream could not provide {}", resource)
            }
            AppError::Network { .. } => "Upstream service unreachable".to_string(),
            AppError::Unauthorized(ref msg) => msg.clone(),
            AppError::Validation(ref msg) => msg.clone(),
            AppError::NotFound(ref msg) => msg.clone(),
            AppError::Conflict(ref msg) => msg.clone(),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal server error".to_string()
            }
        }
    }

    fn log_level(&self) -> LogLevel {
        match self.kind() {
            SyncErrorKind::Auth | SyncErrorKind::Validation => LogLevel::Debug,
            SyncErrorKind::Network => LogLevel::Warn,
            SyncErrorKind::Database | SyncErrorKind::Unknown => LogLevel::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_401_is_auth_and_not_retryable() {
        let err = AppError::UpstreamStatus {
            status: 401,
            message: "token expired".to_string(),
        };
        assert_eq!(err.kind(), SyncErrorKind::Auth);
        assert_eq!(err.error_code(), "AUTH_ERROR");
        assert!(!err.is_recoverable());
        assert_eq!(err.log_level(), LogLevel::Debug);
    }

    #[test]
    fn test_status_classification() {
        let kind = |status| {
            AppError::UpstreamStatus {
                status,
                message: String::new(),
            }
            .kind()
        };
        assert_eq!(kind(403), SyncErrorKind::Auth);
        assert_eq!(kind(422), SyncErrorKind::Validation);
        assert_eq!(kind(503), SyncErrorKind::Network);
        assert_eq!(kind(429), SyncErrorKind::Network);
        assert_eq!(kind(404), SyncErrorKind::Unknown);
    }

    #[test]
    fn test_connection_refused_is_network() {
        let err = AppError::Network {
            code: Some("ECONNREFUSED".to_string()),
            message: "connect failed".to_string(),
        };
        assert_eq!(err.kind(), SyncErrorKind::Network);
        assert!(err.is_recoverable());
        assert_eq!(err.to_string(), "Network error (ECONNREFUSED): connect failed");

        let io = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = AppError::from(io);
        assert_eq!(err.kind(), SyncErrorKind::Network);
    }

    #[test]
    fn test_database_error_is_retryable() {
        #[cfg(feature = "sqlx")]
        let err = AppError::from(sqlx::Error::PoolClosed);
        #[cfg(not(feature = "sqlx"))]
        let err = AppError::Database("pool closed".to_string());
        assert_eq!(err.kind(), SyncErrorKind::Database);
        assert!(err.is_recoverable());
        assert_eq!(err.client_message(), "Failed to access database");
    }

    #[test]
    fn test_internal_errors_classified_by_source() {
        let err = AppError::from(anyhow::Error::new(AppError::Unauthorized(
            "bad token".to_string(),
        )));
        assert_eq!(err.kind(), SyncErrorKind::Auth);

        let err = AppError::Internal("request timed out".to_string());
        assert_eq!(err.kind(), SyncErrorKind::Network);

        let err = AppError::Internal("something odd".to_string());
        assert_eq!(err.kind(), SyncErrorKind::Unknown);
        assert!(err.is_recoverable());
    }
}

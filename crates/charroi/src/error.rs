//! Error types for charroi.
//!
//! This module defines all error types used throughout the charroi crate,
//! providing detailed context for debugging and user-friendly error messages.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for charroi operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    /// No queue entry exists with the given id.
    #[error("no queued validation with id {id}")]
    EntryNotFound {
        /// The requested entry id.
        id: i64,
    },

    /// A legacy queue blob was not a JSON array.
    #[error("legacy queue must be a JSON array, found {found}")]
    LegacyFormat {
        /// JSON type that was found instead.
        found: &'static str,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Submission Errors ===
    /// The HTTP request could not be completed.
    #[error("validation request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("server rejected validation with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The configured endpoint is not a usable URL.
    #[error("invalid endpoint url '{url}': {message}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        message: String,
    },

    // === Sync Errors ===
    /// Another sync is already draining the queue.
    #[error("a sync is already in progress")]
    SyncInProgress,

    /// A sync stopped at a failing entry.
    #[error("sync halted at entry {entry_id} after {submitted} submitted: {source}")]
    SyncHalted {
        /// Id of the entry whose submission failed.
        entry_id: i64,
        /// Entries submitted successfully before the failure.
        submitted: usize,
        /// The submission failure.
        #[source]
        source: Box<Error>,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for charroi operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create an invalid URL error.
    #[must_use]
    pub fn invalid_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Check if this error means another sync holds the queue.
    #[must_use]
    pub fn is_sync_in_progress(&self) -> bool {
        matches!(self, Self::SyncInProgress)
    }

    /// Check if this error is a submission failure worth retrying later.
    ///
    /// Transport errors and 5xx/429 responses are retryable. This is only used
    /// for reporting; the sync loop halts on every failure alike.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Rejected { status, .. } => *status >= 500 || *status == 429,
            Self::SyncHalted { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::SyncInProgress;
        assert_eq!(err.to_string(), "a sync is already in progress");

        let err = Error::internal("test error");
        assert_eq!(err.to_string(), "internal error: test error");
    }

    #[test]
    fn test_error_is_sync_in_progress() {
        assert!(Error::SyncInProgress.is_sync_in_progress());
        assert!(!Error::internal("test").is_sync_in_progress());
    }

    #[test]
    fn test_rejected_display() {
        let err = Error::Rejected {
            status: 422,
            body: "bon deja valide".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("422"));
        assert!(msg.contains("bon deja valide"));
    }

    #[test]
    fn test_is_retryable() {
        let server = Error::Rejected {
            status: 503,
            body: String::new(),
        };
        let throttled = Error::Rejected {
            status: 429,
            body: String::new(),
        };
        let client = Error::Rejected {
            status: 400,
            body: String::new(),
        };
        assert!(server.is_retryable());
        assert!(throttled.is_retryable());
        assert!(!client.is_retryable());
        assert!(!Error::SyncInProgress.is_retryable());
    }

    #[test]
    fn test_sync_halted_wraps_source() {
        let err = Error::SyncHalted {
            entry_id: 7,
            submitted: 2,
            source: Box::new(Error::Rejected {
                status: 502,
                body: "bad gateway".to_string(),
            }),
        };
        let msg = err.to_string();
        assert!(msg.contains("entry 7"));
        assert!(msg.contains("2 submitted"));
        assert!(msg.contains("bad gateway"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_entry_not_found_display() {
        let err = Error::EntryNotFound { id: 42 };
        assert_eq!(err.to_string(), "no queued validation with id 42");
    }

    #[test]
    fn test_legacy_format_display() {
        let err = Error::LegacyFormat { found: "object" };
        assert!(err.to_string().contains("object"));
    }

    #[test]
    fn test_invalid_url_display() {
        let err = Error::invalid_url("ftp://x", "unsupported scheme");
        let msg = err.to_string();
        assert!(msg.contains("ftp://x"));
        assert!(msg.contains("unsupported scheme"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_rusqlite_error() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/db.sqlite",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err: Error = sqlite_err.into();
            assert!(matches!(err, Error::DatabaseQuery(_)));
        }
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }

    #[test]
    fn test_database_migration_error_display() {
        let err = Error::DatabaseMigration {
            message: "version mismatch".to_string(),
        };
        assert!(err.to_string().contains("version mismatch"));
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::ConfigValidation {
            message: "invalid interval".to_string(),
        };
        assert!(err.to_string().contains("invalid interval"));
    }

    #[test]
    fn test_directory_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
    }
}

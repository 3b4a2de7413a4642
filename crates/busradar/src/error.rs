//! Error types for busradar.
//!
//! Every failure a fetch, cache read or cache write can produce is converted
//! into [`Error`] at the boundary of the synchronization service, so callers
//! only ever see a `Result`.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for busradar operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Remote API Errors ===
    /// The request never produced a response (no connectivity, timeout, TLS).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// The requested URL.
        url: String,
    },

    /// The response body could not be deserialized.
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    // === Cache Errors ===
    /// Failed to open or create the cache database.
    #[error("failed to open cache at {path}: {source}")]
    CacheOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A cache query failed.
    #[error("cache query failed: {0}")]
    CacheQuery(#[from] rusqlite::Error),

    /// The cache schema could not be (re)created.
    #[error("cache schema error: {message}")]
    CacheSchema {
        /// Description of what went wrong.
        message: String,
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

    // === Input Errors ===
    /// Latitude or longitude out of range.
    #[error("invalid coordinates: ({latitude}, {longitude})")]
    InvalidCoordinates {
        /// The rejected latitude.
        latitude: f64,
        /// The rejected longitude.
        longitude: f64,
    },

    /// Any other rejected argument.
    #[error("invalid input: {0}")]
    InvalidInput(String),

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

    // === Generic Errors ===
    /// An internal error occurred (bug, poisoned lock, panicked task).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for busradar operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No response from the remote API.
    Transport,
    /// The remote API answered with a non-success status.
    Status,
    /// The remote API answered with something we could not parse.
    Payload,
    /// The local cache failed.
    Cache,
    /// Configuration could not be loaded or is invalid.
    Config,
    /// A caller passed an invalid argument.
    Input,
    /// Everything else.
    Internal,
}

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

    /// Create a new invalid-input error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Status { .. } => ErrorKind::Status,
            Self::Payload(_) => ErrorKind::Payload,
            Self::CacheOpen { .. } | Self::CacheQuery(_) | Self::CacheSchema { .. } => {
                ErrorKind::Cache
            }
            Self::ConfigLoad(_) | Self::ConfigValidation { .. } => ErrorKind::Config,
            Self::InvalidCoordinates { .. } | Self::InvalidInput(_) => ErrorKind::Input,
            Self::Io(_) | Self::DirectoryCreate { .. } | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if this error came from the remote API (as opposed to the cache
    /// or a local bug).
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transport | ErrorKind::Status | ErrorKind::Payload
        )
    }

    /// Check if this error is a 404 from the remote API.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_display() {
        let err = Error::Status {
            status: 503,
            url: "https://api.example/stops/nearby".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("503"));
        assert!(msg.contains("stops/nearby"));
        assert_eq!(err.kind(), ErrorKind::Status);
        assert!(err.is_remote());
    }

    #[test]
    fn test_is_not_found() {
        let err = Error::Status {
            status: 404,
            url: String::new(),
        };
        assert!(err.is_not_found());
        assert!(!Error::internal("x").is_not_found());
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Payload(_)));
            assert_eq!(err.kind(), ErrorKind::Payload);
        }
    }

    #[test]
    fn test_from_rusqlite_error() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/db.sqlite",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err: Error = sqlite_err.into();
            assert!(matches!(err, Error::CacheQuery(_)));
            assert_eq!(err.kind(), ErrorKind::Cache);
            assert!(!err.is_remote());
        }
    }

    #[test]
    fn test_cache_open_error_display() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/db.sqlite",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err = Error::CacheOpen {
                path: PathBuf::from("/nonexistent/path/db.sqlite"),
                source: sqlite_err,
            };
            assert!(err.to_string().contains("/nonexistent/path/db.sqlite"));
        }
    }

    #[test]
    fn test_invalid_coordinates_display() {
        let err = Error::InvalidCoordinates {
            latitude: 91.0,
            longitude: 0.0,
        };
        assert!(err.to_string().contains("91"));
        assert_eq!(err.kind(), ErrorKind::Input);
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::ConfigValidation {
            message: "fetch_cooldown_ms must be greater than 0".to_string(),
        };
        assert!(err.to_string().contains("fetch_cooldown_ms"));
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_internal_error() {
        let err = Error::internal("cache lock poisoned");
        assert_eq!(err.to_string(), "internal error: cache lock poisoned");
    }

    #[test]
    fn test_invalid_input_error() {
        let err = Error::invalid_input("min_lat greater than max_lat");
        assert_eq!(err.to_string(), "invalid input: min_lat greater than max_lat");
    }
}

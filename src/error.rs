//! Error types for manga-tracker
//!
//! This module provides the error taxonomy for the library:
//! - Transient fetch failures (network, HTTP status, anti-bot interstitials)
//! - Structural parse failures when a site layout no longer matches
//! - Integrity failures raised by strict adapters while validating page images
//! - Watermark inconsistencies found while planning or resuming a download
//! - Configuration and persistence errors

use thiserror::Error;

/// Result type alias for manga-tracker operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for manga-tracker
///
/// Each variant includes enough context to log the failure against the series
/// and operation that produced it.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "library_dir")
        key: Option<String>,
    },

    /// No adapter is registered for this site identifier
    #[error("unknown site: {0}")]
    UnknownSite(String),

    /// A series is missing a field its adapter requires
    #[error("series {series_id} is missing required field '{field}'")]
    MissingField {
        /// Series that is missing the field
        series_id: i64,
        /// Name of the missing field
        field: &'static str,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-success HTTP status from a source site
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// Status code returned by the server
        status: u16,
        /// URL that was requested
        url: String,
    },

    /// A challenge page was served instead of the requested content
    #[error("anti-bot interstitial served for {url}")]
    AntiBot {
        /// URL that returned the challenge page
        url: String,
    },

    /// Expected page structure or JSON shape was not found
    #[error("parse error: {0}")]
    Parse(String),

    /// Downloaded content failed validation (placeholder, undersized image, empty chapter)
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// Watermark or navigation state does not match the fresh listing
    #[error("watermark error: {0}")]
    Watermark(#[from] WatermarkError),

    /// Browser session failure
    #[error("browser error: {0}")]
    Browser(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Series or record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Constraint violation (e.g., duplicate key)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Inconsistencies between persisted watermarks and what a source currently lists
#[derive(Debug, Error)]
pub enum WatermarkError {
    /// The recorded source URL of the last download is not in the fresh listing
    #[error("last download url not found in listing: {url}")]
    ResumeUrlNotFound {
        /// URL recorded by the last successful chapter commit
        url: String,
    },

    /// Resume was requested but no chapter has ever been committed
    #[error("series {series_id} has no recorded download to resume from")]
    NothingToResume {
        /// Series without a download watermark
        series_id: i64,
    },

    /// The requested starting chapter does not exist at the source
    #[error("chapter {label} not found in listing")]
    StartChapterNotFound {
        /// Requested chapter label
        label: String,
    },

    /// A commit would move the download watermark backwards
    #[error("refusing to move download watermark from {current} back to {attempted}")]
    Regression {
        /// Label currently stored
        current: String,
        /// Label that was about to be written
        attempted: String,
    },
}

impl Error {
    /// Whether this error must abort a batch instead of being isolated to one series
    ///
    /// Only configuration and programming errors are fatal; everything a source
    /// site can cause is converted into a negative per-series result.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config { .. } | Error::UnknownSite(_) | Error::MissingField { .. }
        )
    }

    /// Machine-readable error code used in logs and reports
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::UnknownSite(_) => "unknown_site",
            Error::MissingField { .. } => "missing_field",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::HttpStatus { .. } => "http_status",
            Error::AntiBot { .. } => "anti_bot",
            Error::Parse(_) => "parse_error",
            Error::Integrity(_) => "integrity_error",
            Error::Watermark(e) => match e {
                WatermarkError::ResumeUrlNotFound { .. } => "resume_url_not_found",
                WatermarkError::NothingToResume { .. } => "nothing_to_resume",
                WatermarkError::StartChapterNotFound { .. } => "start_chapter_not_found",
                WatermarkError::Regression { .. } => "watermark_regression",
            },
            Error::Browser(_) => "browser_error",
            Error::Serialization(_) => "serialization_error",
            Error::NotFound(_) => "not_found",
            Error::Other(_) => "other",
        }
    }
}

// Error types for the bulk user import pipeline

use thiserror::Error;

/// Result type used across the library
pub type Result<T> = std::result::Result<T, ImportError>;

/// Errors surfaced by parsing, reconciliation, and persistence.
///
/// Malformed boolean cells and malformed metadata blobs are not listed here:
/// both are recovered where they are read and never reach the caller.
#[derive(Error, Debug)]
pub enum ImportError {
    /// The row has no usable value for the identity column
    #[error("missing or blank identity column `{0}`")]
    MissingIdentity(&'static str),

    /// Record store failure (wraps rusqlite::Error)
    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Spreadsheet could not be opened or a worksheet could not be read
    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("unsupported input format: {0}")]
    UnsupportedFormat(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    /// Configuration loading or validation error
    #[error("configuration error: {0}")]
    Config(String),
}

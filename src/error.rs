//! Centralized error types for mbox2couch.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mbox2couch library.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// I/O error with the associated file path.
    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The specified MBOX file does not exist.
    #[error("The file {} does not exist", .0.display())]
    FileNotFound(PathBuf),

    /// Another process holds the lock on the MBOX file.
    #[error("MBOX file is locked by another process: {}", .0.display())]
    MailboxLocked(PathBuf),

    /// The configuration file does not exist.
    #[error("Configuration file '{}' not found", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file is not valid TOML or has wrongly typed keys.
    #[error("Configuration file '{}' is not a valid TOML file: {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A required configuration key is missing, empty, or out of range.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The server URL cannot be used to address documents.
    #[error("Invalid server URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The named database does not exist on the server.
    #[error("Unable to find database '{0}' on the server")]
    DatabaseNotFound(String),

    /// The server rejected the configured credentials.
    #[error("Access to database '{0}' was denied")]
    Unauthorized(String),

    /// The server could not be reached at all.
    #[error("Cannot reach server at {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },

    /// The server answered a request with an unexpected status.
    #[error("Store rejected {operation} for '{id}' (HTTP {status}): {reason}")]
    Store {
        operation: &'static str,
        id: String,
        status: u16,
        reason: String,
    },

    /// A single message could not be parsed.
    #[error("Malformed message at offset {offset}: {reason}")]
    MalformedMessage { offset: u64, reason: String },

    /// An RFC 2047 encoded-word could not be decoded.
    #[error("Header decoding error: {0}")]
    HeaderDecode(String),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias for `Result<T, MigrateError>`.
pub type Result<T> = std::result::Result<T, MigrateError>;

impl MigrateError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short class name shown to the user next to fatal errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io { .. } => "Io",
            Self::FileNotFound(_) => "FileNotFound",
            Self::MailboxLocked(_) => "MailboxLocked",
            Self::ConfigNotFound(_) => "ConfigNotFound",
            Self::ConfigParse { .. } => "ConfigParse",
            Self::ConfigInvalid(_) => "ConfigInvalid",
            Self::InvalidUrl { .. } => "InvalidUrl",
            Self::DatabaseNotFound(_) => "DatabaseNotFound",
            Self::Unauthorized(_) => "Unauthorized",
            Self::Unreachable { .. } => "Unreachable",
            Self::Store { .. } => "Store",
            Self::MalformedMessage { .. } => "MalformedMessage",
            Self::HeaderDecode(_) => "HeaderDecode",
            Self::Json(_) => "Json",
        }
    }
}

/// Allow `?` on `std::io::Error` inside functions returning `MigrateError`
/// when no path context is available (rare, prefer `MigrateError::io`).
impl From<std::io::Error> for MigrateError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}

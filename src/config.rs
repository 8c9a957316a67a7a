//! Run configuration.
//!
//! Configuration is loaded from the TOML file named on the command line.
//! Only the `[couchdb]` section is required; `[ingest]` and `[general]`
//! fall back to built-in defaults.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{MigrateError, Result};

/// Smallest accepted digest length for content-hash IDs, in bytes.
pub const MIN_DIGEST_BYTES: usize = 4;

/// Largest accepted digest length for content-hash IDs, in bytes.
pub const MAX_DIGEST_BYTES: usize = 64;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings.
    pub general: GeneralConfig,
    /// Target database connection.
    pub couchdb: CouchDbConfig,
    /// Message-to-document mapping and failure policy.
    pub ingest: IngestConfig,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Override directory for the log file.
    pub log_dir: Option<PathBuf>,
}

/// Target database connection.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct CouchDbConfig {
    /// Scheme, host and port of the server, e.g. `http://localhost:5984`.
    pub server_url: String,
    /// Name of the target database. It must already exist.
    pub db_name: String,
    /// Basic-auth user. Empty means no `Authorization` header.
    pub username: String,
    /// Basic-auth password.
    pub password: String,
    /// Per-request timeout in seconds. Absent means wait forever.
    pub timeout_secs: Option<u64>,
}

/// How repeated header names land in the document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateHeaders {
    /// One string per name; the last occurrence wins.
    #[default]
    Last,
    /// Repeated names become an array of every value, in order.
    All,
}

/// What to do when a single message fails for a reason other than a conflict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageErrorPolicy {
    /// Stop the run; the outcome is a critical failure.
    #[default]
    Abort,
    /// Count the failure and continue with the next message.
    Skip,
}

/// Message-to-document mapping and failure policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Output length of the SHAKE128 fallback ID, in bytes (hex doubles it).
    pub digest_bytes: usize,
    /// Policy for repeated header names.
    pub duplicate_headers: DuplicateHeaders,
    /// Policy for unexpected per-message errors.
    pub on_message_error: MessageErrorPolicy,
    /// List headers whose encoded-words failed to decode in the document.
    pub flag_decode_errors: bool,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            log_dir: None,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            digest_bytes: 12,
            duplicate_headers: DuplicateHeaders::Last,
            on_message_error: MessageErrorPolicy::Abort,
            flag_decode_errors: true,
        }
    }
}

impl fmt::Debug for CouchDbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CouchDbConfig")
            .field("server_url", &self.server_url)
            .field("db_name", &self.db_name)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// ── Load / validate ─────────────────────────────────────────────

/// Load and validate the configuration file at `path`.
///
/// Unlike a viewer, a migration cannot guess where to write, so every
/// problem is an error: missing file, malformed TOML, unknown enum values,
/// and missing or empty required keys.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MigrateError::ConfigNotFound(path.to_path_buf())
        } else {
            MigrateError::io(path, e)
        }
    })?;

    let config = toml::from_str::<Config>(&contents).map_err(|source| MigrateError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;

    tracing::info!(path = %path.display(), "Loaded config");
    Ok(config)
}

impl Config {
    /// Check required keys and value ranges.
    pub fn validate(&self) -> Result<()> {
        let couch = &self.couchdb;
        if couch.server_url.trim().is_empty() {
            return Err(MigrateError::ConfigInvalid(
                "couchdb.server_url is missing or empty".to_string(),
            ));
        }
        if couch.db_name.trim().is_empty() {
            return Err(MigrateError::ConfigInvalid(
                "couchdb.db_name is missing or empty".to_string(),
            ));
        }

        let url = url::Url::parse(couch.server_url.trim()).map_err(|e| MigrateError::InvalidUrl {
            url: couch.server_url.clone(),
            reason: e.to_string(),
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(MigrateError::InvalidUrl {
                url: couch.server_url.clone(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        let digest = self.ingest.digest_bytes;
        if !(MIN_DIGEST_BYTES..=MAX_DIGEST_BYTES).contains(&digest) {
            return Err(MigrateError::ConfigInvalid(format!(
                "ingest.digest_bytes must be between {MIN_DIGEST_BYTES} and {MAX_DIGEST_BYTES}, got {digest}"
            )));
        }
        Ok(())
    }
}

/// Return the directory for the log file.
pub fn log_dir(config: &GeneralConfig) -> PathBuf {
    if let Some(ref dir) = config.log_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mbox2couch")
}

/// Return the log file path.
pub fn log_file_path(config: &GeneralConfig) -> PathBuf {
    log_dir(config).join("mbox2couch.log")
}

//! Comprehensive error types for the confmigrate core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Migration(#[from] MigrationError),
}

// ---------------------------------------------------------------------------
// Legacy store errors
// ---------------------------------------------------------------------------

/// Errors from reading the legacy object-graph snapshot.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The snapshot URI uses a scheme we don't know how to open.
    #[error("URI scheme not known: {0}")]
    UnknownScheme(String),

    /// The snapshot file does not exist.
    #[error("snapshot not found: {0}")]
    NotFound(String),

    /// HTTP-level transport error while fetching a remote snapshot.
    #[error("snapshot HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The remote server answered with a non-success status code.
    #[error("snapshot fetch failed (HTTP {status}): {uri}")]
    HttpStatus {
        status: u16,
        uri: String,
    },

    /// The snapshot contents could not be decoded.
    #[error("failed to decode snapshot: {0}")]
    DecodeError(String),

    /// Generic I/O wrapper.
    #[error("snapshot I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from migration-option validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config value is invalid.
    #[error("invalid value for '{field}': {detail}")]
    InvalidValue {
        field: String,
        detail: String,
    },

    /// Two options must be used together (or not at all).
    #[error("options '{a}' and '{b}' must be used together")]
    MutuallyRequired {
        a: String,
        b: String,
    },
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed {
        version: u32,
        detail: String,
    },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        entity: String,
        id: String,
    },

    /// The target database already contains data from a previous run.
    #[error("target database is not empty; drop and recreate it first")]
    NotEmpty,

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Archive storage errors
// ---------------------------------------------------------------------------

/// Errors from the archive file store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Checksumming a file failed mid-read.
    #[error("failed to checksum '{path}': {detail}")]
    ChecksumFailed {
        path: String,
        detail: String,
    },

    /// Creating a symlink for a non-UTF8 path failed.
    #[error("failed to create symlink '{link}': {detail}")]
    SymlinkFailed {
        link: String,
        detail: String,
    },

    /// Generic I/O wrapper.
    #[error("storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Identity errors
// ---------------------------------------------------------------------------

/// Errors from principal and login-identity conversion.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The configured system user does not exist (or is deleted).
    #[error("invalid system user id: {0}")]
    InvalidSystemUser(i64),

    /// Re-hashing a legacy plaintext password failed.
    #[error("password hashing failed for '{identifier}': {detail}")]
    HashingFailed {
        identifier: String,
        detail: String,
    },

    /// Database error while writing identity data.
    #[error("identity database error: {0}")]
    DatabaseError(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Checkpoint errors
// ---------------------------------------------------------------------------

/// Errors from saving / loading the restore-point file.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The restore file does not exist.
    #[error("restore file not found: {0}")]
    NotFound(String),

    /// The restore file could not be parsed.
    #[error("restore file parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Generic I/O wrapper.
    #[error("checkpoint I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Migration step errors
// ---------------------------------------------------------------------------

/// Errors raised while running a migration step.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A step hit a condition it cannot repair.
    #[error("step '{step}' failed: {detail}")]
    StepFailed {
        step: String,
        detail: String,
    },

    /// Underlying store error during a step.
    #[error("step store error: {0}")]
    StoreError(#[from] StoreError),

    /// Database error during a step.
    #[error("step database error: {0}")]
    DatabaseError(#[from] DatabaseError),

    /// Archive storage error during a step.
    #[error("step storage error: {0}")]
    StorageError(#[from] StorageError),

    /// Identity conversion error during a step.
    #[error("step identity error: {0}")]
    IdentityError(#[from] IdentityError),
}

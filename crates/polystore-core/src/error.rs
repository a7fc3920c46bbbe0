//! Error types for Polystore core operations.
//!
//! This module defines the error hierarchy shared by every storage engine.
//! Errors are descriptive at the core level; the CLI layer maps these
//! to user-friendly messages and exit codes.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for Polystore operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Boxed driver error carried by [`StoreError::Connection`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Core error type for Polystore operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Required configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Retry budget exhausted while connecting
    #[error("Could not connect to {engine} after {attempts} attempt(s): {source}")]
    Connection {
        engine: String,
        attempts: u32,
        #[source]
        source: BoxError,
    },

    /// Migration, seed or backup source file does not exist
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Source file exists but cannot be read
    #[error("File unreadable: {}: {source}", .path.display())]
    FileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Source file is blank after BOM stripping and trimming
    #[error("File is empty: {}", .0.display())]
    FileEmpty(PathBuf),

    /// Operation-list JSON could not be decoded
    #[error("Malformed operation file: {0}")]
    MalformedOperationFile(String),

    /// Command outside an allow-list, or an operation the configuration cannot support
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Migration or seed directory is missing
    #[error("Directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    /// Migration or seed directory holds no matching files
    #[error("No files found in {}", .0.display())]
    NoFilesFound(PathBuf),

    /// Dump/restore utility exited unsuccessfully
    #[error("{tool} failed (exit code {}): {stderr}", exit_code_label(.code))]
    ExternalToolFailure {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Transaction lifecycle misuse (commit without begin, nested begin)
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// The server answered a well-formed request with an error reply
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// SQLite driver error
    #[error("SQLite error: {source}")]
    Sqlite {
        #[from]
        source: rusqlite::Error,
    },

    /// MySQL driver error
    #[error("MySQL error: {source}")]
    Mysql {
        #[from]
        source: sqlx::Error,
    },

    /// MongoDB driver error
    #[error("MongoDB error: {source}")]
    Mongo {
        #[from]
        source: mongodb::error::Error,
    },

    /// Redis driver error
    #[error("Redis error: {source}")]
    Redis {
        #[from]
        source: redis::RedisError,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}

impl StoreError {
    /// Shorthand for an allow-list rejection.
    pub fn unsupported(message: impl Into<String>) -> Self {
        StoreError::UnsupportedOperation(message.into())
    }

    /// True for errors caused by a missing file or directory.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::FileNotFound(_)
                | StoreError::DirectoryNotFound(_)
                | StoreError::NoFilesFound(_)
        )
    }
}

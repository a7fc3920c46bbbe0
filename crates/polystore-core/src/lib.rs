//! # Polystore Core
//!
//! Uniform storage abstraction over SQLite, MySQL, MongoDB and Redis.
//!
//! Every backend implements [`StorageEngine`]: lazy connection with
//! retry, a native `query` surface, batch execution that records one
//! result per statement or operation, transactions, file-driven
//! migrations and seeds, and backup/restore.
//!
//! ## Architecture
//!
//! - **config**: engine configuration record and defaults
//! - **error**: error taxonomy shared by all engines
//! - **splitter**: SQL statement splitting
//! - **fs**: batch-file loading, discovery and atomic copies
//! - **storage**: engine trait and the four implementations

pub mod config;
pub mod error;
pub mod fs;
pub mod splitter;
pub mod storage;

pub use config::{BatchMode, EngineConfig, EngineKind};
pub use error::{Result, StoreError};
pub use storage::{open_engine, open_sql_engine, OperationResult, Outcome, SqlEngine, StorageEngine};

/// Core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}

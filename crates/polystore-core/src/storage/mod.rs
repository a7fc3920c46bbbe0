//! Storage abstraction for Polystore.
//!
//! This module defines the `StorageEngine` trait, the shared result types
//! and one engine per backend.
//!
//! ## Architecture
//!
//! - `sqlite`: embedded SQLite via `rusqlite`
//! - `mysql`: MySQL via `sqlx`, driven by an engine-owned runtime
//! - `mongo`: MongoDB via the synchronous `mongodb` driver
//! - `redis`: Redis via the synchronous `redis` client
//!
//! Relational engines additionally implement `SqlEngine`. Engines are
//! selected from an `EngineConfig` with [`open_engine`].

pub mod mongo;
pub mod mysql;
pub mod redis;
pub mod retry;
pub(crate) mod sql;
pub mod sqlite;
pub mod tools;
pub mod traits;
pub mod types;

// Re-export public types
pub use self::mongo::MongoEngine;
pub use self::mysql::MysqlEngine;
pub use self::redis::RedisEngine;
pub use self::sqlite::SqliteEngine;
pub use self::traits::{SqlEngine, StorageEngine};
pub use self::types::{
    BatchReport, DocumentCounters, FileParams, OperationResult, Outcome, Row, SKIPPED_MESSAGE,
};

use crate::config::{EngineConfig, EngineKind};
use crate::error::{Result, StoreError};

/// Build the engine selected by `config.engine`.
///
/// No connection is made; engines connect lazily on first use.
pub fn open_engine(config: EngineConfig) -> Box<dyn StorageEngine> {
    match config.engine {
        EngineKind::Sqlite => Box::new(SqliteEngine::new(config)),
        EngineKind::Mysql => Box::new(MysqlEngine::new(config)),
        EngineKind::Mongodb => Box::new(MongoEngine::new(config)),
        EngineKind::Redis => Box::new(RedisEngine::new(config)),
    }
}

/// Build a relational engine, for callers that need introspection.
///
/// # Errors
///
/// Returns `StoreError::UnsupportedOperation` for document and key-value engines.
pub fn open_sql_engine(config: EngineConfig) -> Result<Box<dyn SqlEngine>> {
    match config.engine {
        EngineKind::Sqlite => Ok(Box::new(SqliteEngine::new(config))),
        EngineKind::Mysql => Ok(Box::new(MysqlEngine::new(config))),
        kind => Err(StoreError::unsupported(format!(
            "{} connections have no tables",
            kind
        ))),
    }
}

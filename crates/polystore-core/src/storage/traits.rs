//! Storage engine trait definitions.
//!
//! The `StorageEngine` trait defines the interface that all storage backends
//! must implement. Each backend supplies connection handling, its native
//! query surface, batch execution, transactions and backups; the trait
//! provides file-driven migration and seed orchestration on top of
//! `execute_multiple`.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{info, warn};

use super::types::{failure_count, BatchReport, FileParams, OperationResult, Row};
use crate::config::{EngineConfig, EngineKind};
use crate::error::Result;
use crate::fs::{discover_files, read_batch_file, substitute_placeholders};

/// Storage engine interface shared by every backend.
///
/// All implementations must ensure:
/// - The native connection is owned by the engine and opened lazily
/// - `execute_multiple` returns one result per input unit, in order
/// - A failing unit never aborts its siblings unless the configuration
///   selects `BatchMode::StopOnError`
pub trait StorageEngine: Send {
    /// Which backend this is.
    fn kind(&self) -> EngineKind;

    /// Configuration supplied at construction.
    fn config(&self) -> &EngineConfig;

    /// Open the native connection, retrying per configuration.
    ///
    /// Connecting an already connected engine is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Configuration` if `host` or `database` is
    /// missing, before any driver call, and `StoreError::Connection` once
    /// the retry budget is exhausted.
    fn connect(&mut self) -> Result<()>;

    /// Release the native connection. Safe to call repeatedly.
    fn disconnect(&mut self);

    /// Probe the server (or file) and report whether the connection is alive.
    fn is_connected(&mut self) -> bool;

    /// Disconnect, then connect again.
    fn reconnect(&mut self) -> Result<()> {
        self.disconnect();
        self.connect()
    }

    /// Execute one native operation.
    ///
    /// - Relational: `statement` is SQL, `params` are positional bindings;
    ///   returns an array of row objects or `{"affected_rows": n}`.
    /// - Document: `statement` is `"<collection>.<method>"` or a bare
    ///   database command name.
    /// - Key-value: `statement` is a command name, `params` its arguments.
    fn query(&mut self, statement: &str, params: &[Value]) -> Result<Value>;

    /// Execute a batch in the engine's batch format.
    ///
    /// # Errors
    ///
    /// Only batch-level problems (connection, undecodable operation list)
    /// are returned as errors; per-unit failures are recorded in the
    /// returned results.
    fn execute_multiple(&mut self, batch: &str) -> Result<Vec<OperationResult>>;

    fn begin_transaction(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Identifier generated by the last insert, where the engine has one.
    fn last_insert_id(&mut self) -> Result<Option<i64>>;

    /// Write a point-in-time snapshot and return its path.
    ///
    /// Without a name, the artifact is named by UTC timestamp.
    fn backup(&mut self, name: Option<&str>) -> Result<PathBuf>;

    /// Replace the current data with a snapshot produced by `backup`.
    fn restore(&mut self, path: &Path) -> Result<bool>;

    // --- File-driven execution ---

    /// Read `path`, substitute placeholders and run it through `execute_multiple`.
    ///
    /// `{{prefix}}` expands to the configured table prefix and `{{key}}`
    /// to the matching entry of `params`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::FileNotFound`, `StoreError::FileUnreadable` or
    /// `StoreError::FileEmpty` for source-file problems.
    fn execute_file(&mut self, path: &Path, params: &FileParams) -> Result<Vec<OperationResult>> {
        let content = read_batch_file(path)?;
        let content = substitute_placeholders(&content, &self.config().prefix, params);
        info!(engine = %self.kind(), file = %path.display(), "executing file");

        let results = self.execute_multiple(&content)?;
        let failures = failure_count(&results);
        if failures > 0 {
            warn!(
                engine = %self.kind(),
                file = %path.display(),
                failures = failures,
                total = results.len(),
                "file executed with failures"
            );
        }
        Ok(results)
    }

    /// Run `<base>/<EngineType>/migrations/<name>`.
    fn execute_migration(&mut self, name: &str) -> Result<Vec<OperationResult>> {
        let path = self.migrations_dir().join(name);
        self.execute_file(&path, &FileParams::new())
    }

    /// Run `<base>/<EngineType>/seeds/<name>`.
    fn execute_seed(&mut self, name: &str) -> Result<Vec<OperationResult>> {
        let path = self.seeds_dir().join(name);
        self.execute_file(&path, &FileParams::new())
    }

    /// Run every migration in lexical filename order.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DirectoryNotFound` or `StoreError::NoFilesFound`
    /// before anything executes; stops at the first file-level error.
    fn migrate_all(&mut self) -> Result<BatchReport> {
        let files = discover_files(&self.migrations_dir(), self.kind().file_extension())?;
        let mut report = BatchReport::new();
        for file in files {
            let name = file_name(&file);
            let results = self.execute_migration(&name)?;
            report.insert(name, results);
        }
        info!(engine = %self.kind(), files = report.len(), "migrations complete");
        Ok(report)
    }

    /// Run every seed in lexical filename order.
    fn seed_all(&mut self) -> Result<BatchReport> {
        let files = discover_files(&self.seeds_dir(), self.kind().file_extension())?;
        let mut report = BatchReport::new();
        for file in files {
            let name = file_name(&file);
            let results = self.execute_seed(&name)?;
            report.insert(name, results);
        }
        info!(engine = %self.kind(), files = report.len(), "seeds complete");
        Ok(report)
    }

    fn migrations_dir(&self) -> PathBuf {
        self.config().migrations_dir()
    }

    fn seeds_dir(&self) -> PathBuf {
        self.config().seeds_dir()
    }

    fn backups_dir(&self) -> PathBuf {
        self.config().backups_dir()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Extra surface shared by the relational engines.
pub trait SqlEngine: StorageEngine {
    /// Run a row-returning statement and collect every row.
    fn fetch_all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// First row of a result set, if any.
    fn fetch_one(&mut self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.fetch_all(sql, params)?.into_iter().next())
    }

    /// First column of the first row, if any.
    fn fetch_column(&mut self, sql: &str, params: &[Value]) -> Result<Option<Value>> {
        Ok(self
            .fetch_one(sql, params)?
            .and_then(|row| row.into_iter().next().map(|(_, value)| value)))
    }

    /// Run a modifying statement and return the affected-row count.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    fn table_exists(&mut self, table: &str) -> Result<bool>;

    fn get_tables(&mut self) -> Result<Vec<String>>;

    /// Column descriptions as reported by the engine.
    fn get_table_structure(&mut self, table: &str) -> Result<Vec<Row>>;

    /// Apply the configured table prefix.
    fn table_name(&self, name: &str) -> String {
        format!("{}{}", self.config().prefix, name)
    }
}

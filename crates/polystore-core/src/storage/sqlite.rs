//! Embedded SQLite engine.
//!
//! `database` is either a file path or `:memory:`. File-backed databases
//! are backed up and restored by copying the database file directly;
//! in-memory databases cannot be backed up.

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::{json, Number, Value};
use tracing::{info, warn};

use super::sql::{
    check_option_keys, first_column_strings, option_literal, outcome_json, quote_identifier,
    run_statements, truthy,
};
use super::traits::{SqlEngine, StorageEngine};
use super::types::{OperationResult, Outcome, Row};
use crate::config::{EngineConfig, EngineKind};
use crate::error::{Result, StoreError};
use crate::fs::{artifact_name, backup_timestamp, copy_atomic};
use crate::splitter::returns_rows;
use crate::storage::retry::connect_with_retry;

const BACKUP_EXTENSION: &str = "sqlite";

/// SQLite storage engine.
pub struct SqliteEngine {
    config: EngineConfig,
    conn: Option<Connection>,
    connected: bool,
}

impl SqliteEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            conn: None,
            connected: false,
        }
    }

    /// Whether the configured database lives only in memory.
    pub fn is_in_memory(&self) -> bool {
        let database = self.config.database.trim();
        database == ":memory:" || database.contains("mode=memory")
    }

    /// Path of the database file.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(self.config.database.trim())
    }

    /// Native connection, opened on first use.
    pub fn connection(&mut self) -> Result<&mut Connection> {
        if self.conn.is_none() {
            self.connect()?;
        }
        self.conn
            .as_mut()
            .ok_or_else(|| StoreError::Transaction("SQLite connection unavailable".to_string()))
    }

    /// Whether an explicit transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.conn
            .as_ref()
            .map(|conn| !conn.is_autocommit())
            .unwrap_or(false)
    }

    fn open(config: &EngineConfig, in_memory: bool) -> rusqlite::Result<Connection> {
        let conn = if in_memory {
            Connection::open_in_memory()?
        } else {
            Connection::open(config.database.trim())?
        };
        conn.busy_timeout(config.timeout())?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        for (key, value) in &config.options {
            conn.execute_batch(&format!("PRAGMA {} = {};", key, option_literal(value)))?;
        }
        Ok(conn)
    }

    fn run_statement(conn: &Connection, statement: &str, params: &[Value]) -> Result<Outcome> {
        if returns_rows(statement) {
            Ok(Outcome::Rows(query_rows(conn, statement, params)?))
        } else {
            let affected = conn.execute(statement, params_from_iter(params.iter().map(to_sql)))?;
            Ok(Outcome::Affected(affected as u64))
        }
    }

    fn require_file_backed(&self, action: &str) -> Result<()> {
        if self.is_in_memory() {
            return Err(StoreError::unsupported(format!(
                "cannot {} an in-memory SQLite database",
                action
            )));
        }
        Ok(())
    }
}

impl StorageEngine for SqliteEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn connect(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        self.config.validate()?;
        check_option_keys(self.config.options.keys())?;

        let in_memory = self.is_in_memory();
        let conn = connect_with_retry(&self.config, || Self::open(&self.config, in_memory))?;
        self.conn = Some(conn);
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_, err)) = conn.close() {
                warn!(engine = "SQLite", error = %err, "error while closing connection");
            }
        }
        self.connected = false;
    }

    fn is_connected(&mut self) -> bool {
        self.connected = match self.conn.as_ref() {
            Some(conn) => conn
                .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .is_ok(),
            None => false,
        };
        self.connected
    }

    fn query(&mut self, statement: &str, params: &[Value]) -> Result<Value> {
        let conn = self.connection()?;
        Self::run_statement(conn, statement, params).map(outcome_json)
    }

    fn execute_multiple(&mut self, batch: &str) -> Result<Vec<OperationResult>> {
        let mode = self.config.batch_mode;
        let conn = self.connection()?;
        Ok(run_statements("SQLite", batch, mode, |statement| {
            Self::run_statement(conn, statement, &[])
        }))
    }

    fn begin_transaction(&mut self) -> Result<()> {
        let conn = self.connection()?;
        if !conn.is_autocommit() {
            return Err(StoreError::Transaction(
                "a transaction is already active".to_string(),
            ));
        }
        conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let conn = self.connection()?;
        if conn.is_autocommit() {
            return Err(StoreError::Transaction("no active transaction".to_string()));
        }
        conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let conn = self.connection()?;
        if conn.is_autocommit() {
            return Err(StoreError::Transaction("no active transaction".to_string()));
        }
        conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn last_insert_id(&mut self) -> Result<Option<i64>> {
        Ok(Some(self.connection()?.last_insert_rowid()))
    }

    fn backup(&mut self, name: Option<&str>) -> Result<PathBuf> {
        self.require_file_backed("back up")?;
        let source = self.database_path();
        if !source.is_file() {
            return Err(StoreError::FileNotFound(source));
        }

        let name = name.map(str::to_string).unwrap_or_else(backup_timestamp);
        let destination = self.backups_dir().join(artifact_name(&name, BACKUP_EXTENSION));
        let bytes = copy_atomic(&source, &destination)?;
        info!(engine = "SQLite", path = %destination.display(), bytes = bytes, "backup written");
        Ok(destination)
    }

    fn restore(&mut self, path: &Path) -> Result<bool> {
        self.require_file_backed("restore")?;
        if !path.is_file() {
            return Err(StoreError::FileNotFound(path.to_path_buf()));
        }

        self.disconnect();
        let target = self.database_path();
        for suffix in ["-wal", "-shm", "-journal"] {
            let mut sidecar = target.clone().into_os_string();
            sidecar.push(suffix);
            let sidecar = PathBuf::from(sidecar);
            if sidecar.exists() {
                fs::remove_file(&sidecar)?;
            }
        }
        copy_atomic(path, &target)?;
        info!(engine = "SQLite", path = %path.display(), "database restored");
        Ok(true)
    }
}

impl SqlEngine for SqliteEngine {
    fn fetch_all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let conn = self.connection()?;
        query_rows(conn, sql, params)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let conn = self.connection()?;
        let affected = conn.execute(sql, params_from_iter(params.iter().map(to_sql)))?;
        Ok(affected as u64)
    }

    fn table_exists(&mut self, table: &str) -> Result<bool> {
        let count = self.fetch_column(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            &[json!(table)],
        )?;
        Ok(truthy(count))
    }

    fn get_tables(&mut self) -> Result<Vec<String>> {
        let rows = self.fetch_all(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            &[],
        )?;
        Ok(first_column_strings(rows))
    }

    fn get_table_structure(&mut self, table: &str) -> Result<Vec<Row>> {
        let sql = format!("PRAGMA table_info({})", quote_identifier(table, '"'));
        self.fetch_all(&sql, &[])
    }
}

fn query_rows(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params_from_iter(params.iter().map(to_sql)))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Row::new();
        for (i, name) in names.iter().enumerate() {
            record.insert(name.clone(), from_sql(row.get_ref(i)?));
        }
        out.push(record);
    }
    Ok(out)
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(hex::encode(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_engine() -> SqliteEngine {
        SqliteEngine::new(EngineConfig::new(EngineKind::Sqlite, "localhost", ":memory:"))
    }

    #[test]
    fn test_lazy_connect_on_first_query() {
        let mut engine = memory_engine();
        assert!(!engine.is_connected());
        let value = engine.query("SELECT 1 AS one", &[]).unwrap();
        assert_eq!(value, json!([{ "one": 1 }]));
        assert!(engine.is_connected());
        engine.disconnect();
        engine.disconnect();
        assert!(!engine.is_connected());
    }

    #[test]
    fn test_query_binds_params_and_reports_affected() {
        let mut engine = memory_engine();
        engine
            .query("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, score REAL, raw BLOB)", &[])
            .unwrap();
        let value = engine
            .query(
                "INSERT INTO t (name, score, raw) VALUES (?1, ?2, X'0aff')",
                &[json!("ann"), json!(1.5)],
            )
            .unwrap();
        assert_eq!(value, json!({ "affected_rows": 1 }));
        assert_eq!(engine.last_insert_id().unwrap(), Some(1));

        let row = engine.fetch_one("SELECT * FROM t", &[]).unwrap().unwrap();
        assert_eq!(row["name"], json!("ann"));
        assert_eq!(row["score"], json!(1.5));
        assert_eq!(row["raw"], json!("0aff"));
    }

    #[test]
    fn test_fetch_column_and_missing_row() {
        let mut engine = memory_engine();
        engine.query("CREATE TABLE t (v INTEGER)", &[]).unwrap();
        assert_eq!(engine.fetch_column("SELECT v FROM t", &[]).unwrap(), None);
        engine.execute("INSERT INTO t VALUES (?1)", &[json!(7)]).unwrap();
        assert_eq!(
            engine.fetch_column("SELECT v FROM t", &[]).unwrap(),
            Some(json!(7))
        );
    }

    #[test]
    fn test_transaction_rollback_discards_changes() {
        let mut engine = memory_engine();
        engine.query("CREATE TABLE t (v INTEGER)", &[]).unwrap();
        engine.begin_transaction().unwrap();
        assert!(engine.in_transaction());
        assert!(matches!(
            engine.begin_transaction(),
            Err(StoreError::Transaction(_))
        ));
        engine.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        engine.rollback().unwrap();
        assert_eq!(
            engine.fetch_column("SELECT COUNT(*) FROM t", &[]).unwrap(),
            Some(json!(0))
        );

        engine.begin_transaction().unwrap();
        engine.execute("INSERT INTO t VALUES (2)", &[]).unwrap();
        engine.commit().unwrap();
        assert_eq!(
            engine.fetch_column("SELECT COUNT(*) FROM t", &[]).unwrap(),
            Some(json!(1))
        );
        assert!(matches!(engine.commit(), Err(StoreError::Transaction(_))));
    }

    #[test]
    fn test_introspection() {
        let config =
            EngineConfig::new(EngineKind::Sqlite, "localhost", ":memory:").prefix("app_");
        let mut engine = SqliteEngine::new(config);
        let table = engine.table_name("users");
        assert_eq!(table, "app_users");
        engine
            .query(&format!("CREATE TABLE {} (id INTEGER PRIMARY KEY, email TEXT NOT NULL)", table), &[])
            .unwrap();
        assert!(engine.table_exists("app_users").unwrap());
        assert!(!engine.table_exists("users").unwrap());
        assert_eq!(engine.get_tables().unwrap(), vec!["app_users"]);

        let columns = engine.get_table_structure("app_users").unwrap();
        let names: Vec<_> = columns.iter().map(|c| c["name"].clone()).collect();
        assert_eq!(names, vec![json!("id"), json!("email")]);
    }

    #[test]
    fn test_in_memory_backup_is_unsupported() {
        let mut engine = memory_engine();
        let err = engine.backup(None).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedOperation(_)));
        let err = engine.restore(Path::new("whatever.sqlite")).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_bad_option_name_is_configuration_error() {
        let config = EngineConfig::new(EngineKind::Sqlite, "localhost", ":memory:")
            .option("journal_mode; DROP", "x");
        let mut engine = SqliteEngine::new(config);
        assert!(matches!(engine.connect(), Err(StoreError::Configuration(_))));
    }
}

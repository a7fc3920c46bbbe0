//! MySQL engine.
//!
//! The driver is `sqlx`, driven by a current-thread tokio runtime owned by
//! the engine so the public surface stays blocking. Statements without
//! bindings go over the text protocol; parameterized statements are
//! prepared.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column as _, Connection as _, Row as _, TypeInfo as _, ValueRef as _};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info, warn};

use super::sql::{
    check_option_keys, first_column_strings, is_identifier, option_literal, outcome_json,
    quote_identifier, run_statements, truthy,
};
use super::tools::ToolCommand;
use super::traits::{SqlEngine, StorageEngine};
use super::types::{OperationResult, Outcome, Row};
use crate::config::{EngineConfig, EngineKind};
use crate::error::{BoxError, Result, StoreError};
use crate::fs::{artifact_name, backup_timestamp};
use crate::splitter::returns_rows;
use crate::storage::retry::connect_with_retry;

const BACKUP_EXTENSION: &str = "sql";
const DEFAULT_DUMP_TOOL: &str = "mysqldump";
const DEFAULT_RESTORE_TOOL: &str = "mysql";

/// Option keys consumed by the engine itself rather than sent as `SET SESSION`.
const TOOL_OPTIONS: [&str; 2] = ["dump_tool", "restore_tool"];

struct Session {
    runtime: Runtime,
    conn: MySqlConnection,
}

/// MySQL storage engine.
pub struct MysqlEngine {
    config: EngineConfig,
    session: Option<Session>,
    connected: bool,
    in_transaction: bool,
}

impl MysqlEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            session: None,
            connected: false,
            in_transaction: false,
        }
    }

    fn connect_options(&self) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(self.config.host.trim())
            .port(self.config.effective_port().unwrap_or(3306))
            .database(self.config.database.trim())
            .charset(&self.config.charset)
            .collation(&self.config.collation);
        if let Some(username) = &self.config.username {
            options = options.username(username);
        }
        if let Some(password) = self.config.password_str() {
            options = options.password(password);
        }
        options
    }

    fn session_statements(&self) -> Result<Vec<String>> {
        let charset = &self.config.charset;
        let collation = &self.config.collation;
        if !is_identifier(charset) || !is_identifier(collation) {
            return Err(StoreError::Configuration(format!(
                "Invalid charset/collation '{}'/'{}'",
                charset, collation
            )));
        }
        check_option_keys(self.config.options.keys())?;

        let mut statements = vec![format!("SET NAMES {} COLLATE {}", charset, collation)];
        for (key, value) in &self.config.options {
            if TOOL_OPTIONS.contains(&key.as_str()) {
                continue;
            }
            statements.push(format!("SET SESSION {} = {}", key, option_literal(value)));
        }
        Ok(statements)
    }

    fn session(&mut self) -> Result<&mut Session> {
        if self.session.is_none() {
            self.connect()?;
        }
        self.session
            .as_mut()
            .ok_or_else(|| StoreError::Transaction("MySQL connection unavailable".to_string()))
    }

    fn run_statement(session: &mut Session, statement: &str, params: &[Value]) -> Result<Outcome> {
        let Session { runtime, conn } = session;
        if returns_rows(statement) {
            let rows = runtime.block_on(fetch_rows(conn, statement, params))?;
            Ok(Outcome::Rows(rows))
        } else {
            let affected = runtime.block_on(execute_statement(conn, statement, params))?;
            Ok(Outcome::Affected(affected))
        }
    }

    fn control(&mut self, statement: &str) -> Result<()> {
        let Session { runtime, conn } = self.session()?;
        runtime.block_on(execute_statement(conn, statement, &[]))?;
        Ok(())
    }

    fn tool(&self, option: &str, default: &str) -> String {
        self.config
            .options
            .get(option)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    fn client_args(&self, command: ToolCommand) -> ToolCommand {
        let mut command = command
            .arg(format!("--host={}", self.config.host.trim()))
            .arg(format!("--port={}", self.config.effective_port().unwrap_or(3306)))
            .arg(format!("--default-character-set={}", self.config.charset));
        if let Some(username) = &self.config.username {
            command = command.arg(format!("--user={}", username));
        }
        if let Some(password) = self.config.password_str() {
            command = command.env("MYSQL_PWD", password);
        }
        command
    }

    /// `mysqldump` invocation writing to `destination`.
    pub fn dump_command(&self, destination: &Path) -> ToolCommand {
        self.client_args(ToolCommand::new(self.tool("dump_tool", DEFAULT_DUMP_TOOL)))
            .arg("--single-transaction")
            .arg("--routines")
            .arg("--triggers")
            .arg(format!("--result-file={}", destination.display()))
            .arg(self.config.database.trim())
    }

    /// `mysql` client invocation; the dump is fed on stdin.
    pub fn restore_command(&self) -> ToolCommand {
        self.client_args(ToolCommand::new(self.tool("restore_tool", DEFAULT_RESTORE_TOOL)))
            .arg(self.config.database.trim())
    }
}

impl StorageEngine for MysqlEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Mysql
    }

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        self.config.validate()?;
        let statements = self.session_statements()?;

        let runtime = Builder::new_current_thread().enable_all().build()?;
        let options = self.connect_options();
        let limit = self.config.timeout();

        let mut conn = connect_with_retry(&self.config, || -> std::result::Result<_, BoxError> {
            match runtime.block_on(tokio::time::timeout(
                limit,
                MySqlConnection::connect_with(&options),
            )) {
                Ok(result) => result.map_err(BoxError::from),
                Err(_) => Err(format!("timed out after {}s", limit.as_secs()).into()),
            }
        })?;

        for statement in &statements {
            debug!(engine = "MySQL", statement = %statement, "applying session setting");
            runtime.block_on(execute_statement(&mut conn, statement, &[]))?;
        }

        self.session = Some(Session { runtime, conn });
        self.connected = true;
        self.in_transaction = false;
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(Session { runtime, conn }) = self.session.take() {
            if let Err(err) = runtime.block_on(conn.close()) {
                warn!(engine = "MySQL", error = %err, "error while closing connection");
            }
        }
        self.connected = false;
        self.in_transaction = false;
    }

    fn is_connected(&mut self) -> bool {
        self.connected = match self.session.as_mut() {
            Some(Session { runtime, conn }) => runtime.block_on(conn.ping()).is_ok(),
            None => false,
        };
        self.connected
    }

    fn query(&mut self, statement: &str, params: &[Value]) -> Result<Value> {
        let session = self.session()?;
        Self::run_statement(session, statement, params).map(outcome_json)
    }

    fn execute_multiple(&mut self, batch: &str) -> Result<Vec<OperationResult>> {
        let mode = self.config.batch_mode;
        let session = self.session()?;
        Ok(run_statements("MySQL", batch, mode, |statement| {
            Self::run_statement(session, statement, &[])
        }))
    }

    fn begin_transaction(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(StoreError::Transaction(
                "a transaction is already active".to_string(),
            ));
        }
        self.control("START TRANSACTION")?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(StoreError::Transaction("no active transaction".to_string()));
        }
        // The flag stays set when COMMIT fails; `disconnect` clears it.
        self.control("COMMIT")?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(StoreError::Transaction("no active transaction".to_string()));
        }
        self.control("ROLLBACK")?;
        self.in_transaction = false;
        Ok(())
    }

    fn last_insert_id(&mut self) -> Result<Option<i64>> {
        let id = self.fetch_column("SELECT LAST_INSERT_ID()", &[])?;
        Ok(id.and_then(|value| value.as_i64()))
    }

    fn backup(&mut self, name: Option<&str>) -> Result<PathBuf> {
        self.config.validate()?;
        let name = name.map(str::to_string).unwrap_or_else(backup_timestamp);
        let dir = self.backups_dir();
        std::fs::create_dir_all(&dir)?;
        let destination = dir.join(artifact_name(&name, BACKUP_EXTENSION));

        self.dump_command(&destination).run(None)?;
        info!(engine = "MySQL", path = %destination.display(), "backup written");
        Ok(destination)
    }

    fn restore(&mut self, path: &Path) -> Result<bool> {
        self.config.validate()?;
        if !path.is_file() {
            return Err(StoreError::FileNotFound(path.to_path_buf()));
        }
        self.restore_command().run(Some(path))?;
        info!(engine = "MySQL", path = %path.display(), "database restored");
        Ok(true)
    }
}

impl SqlEngine for MysqlEngine {
    fn fetch_all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let Session { runtime, conn } = self.session()?;
        runtime.block_on(fetch_rows(conn, sql, params))
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let Session { runtime, conn } = self.session()?;
        runtime.block_on(execute_statement(conn, sql, params))
    }

    fn table_exists(&mut self, table: &str) -> Result<bool> {
        let count = self.fetch_column(
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_name = ?",
            &[json!(table)],
        )?;
        Ok(truthy(count))
    }

    fn get_tables(&mut self) -> Result<Vec<String>> {
        let rows = self.fetch_all("SHOW TABLES", &[])?;
        Ok(first_column_strings(rows))
    }

    fn get_table_structure(&mut self, table: &str) -> Result<Vec<Row>> {
        let sql = format!("DESCRIBE {}", quote_identifier(table, '`'));
        self.fetch_all(&sql, &[])
    }
}

async fn fetch_rows(conn: &mut MySqlConnection, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let rows = if params.is_empty() {
        sqlx::raw_sql(sql).fetch_all(&mut *conn).await?
    } else {
        bind_all(sqlx::query(sql), params)
            .fetch_all(&mut *conn)
            .await?
    };
    rows.iter().map(decode_row).collect()
}

async fn execute_statement(conn: &mut MySqlConnection, sql: &str, params: &[Value]) -> Result<u64> {
    let result = if params.is_empty() {
        sqlx::raw_sql(sql).execute(&mut *conn).await?
    } else {
        bind_all(sqlx::query(sql), params).execute(&mut *conn).await?
    };
    Ok(result.rows_affected())
}

fn bind_all<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &[Value],
) -> Query<'q, MySql, MySqlArguments> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match (n.as_i64(), n.as_u64()) {
                (Some(i), _) => query.bind(i),
                (None, Some(u)) => query.bind(u),
                _ => query.bind(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => query.bind(s.clone()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

fn decode_row(row: &MySqlRow) -> Result<Row> {
    let mut record = Row::new();
    for column in row.columns() {
        let index = column.ordinal();
        let value = if row.try_get_raw(index)?.is_null() {
            Value::Null
        } else {
            decode_value(row, index, column.type_info().name())?
        };
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

fn decode_value(row: &MySqlRow, index: usize, type_name: &str) -> Result<Value> {
    let value = match type_name {
        "BOOLEAN" => json!(row.try_get_unchecked::<bool, _>(index)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            json!(row.try_get_unchecked::<i64, _>(index)?)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => json!(row.try_get_unchecked::<u64, _>(index)?),
        "FLOAT" | "DOUBLE" => json!(row.try_get_unchecked::<f64, _>(index)?),
        "DATE" => json!(row
            .try_get_unchecked::<chrono::NaiveDate, _>(index)?
            .to_string()),
        "TIME" => json!(row
            .try_get_unchecked::<chrono::NaiveTime, _>(index)?
            .to_string()),
        "DATETIME" => json!(row
            .try_get_unchecked::<chrono::NaiveDateTime, _>(index)?
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()),
        "TIMESTAMP" => json!(row
            .try_get_unchecked::<chrono::DateTime<chrono::Utc>, _>(index)?
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()),
        "JSON" => row.try_get_unchecked::<sqlx::types::JsonValue, _>(index)?,
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT" => {
            json!(hex::encode(row.try_get_unchecked::<Vec<u8>, _>(index)?))
        }
        _ => match row.try_get_unchecked::<String, _>(index) {
            Ok(text) => json!(text),
            Err(_) => json!(hex::encode(row.try_get_unchecked::<Vec<u8>, _>(index)?)),
        },
    };
    Ok(value)
}

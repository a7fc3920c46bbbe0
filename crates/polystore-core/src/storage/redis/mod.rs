//! Redis engine.
//!
//! Batches are sent as one atomic pipeline. Explicit transactions use raw
//! `MULTI`/`EXEC`/`DISCARD`, so commands issued in between reply `QUEUED`.

pub mod commands;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use redis::{Client, Connection, Value as Reply};
use serde_json::Value;
use tracing::{debug, info, warn};

use self::commands::{
    arg_string, command_failed, command_label, parse_command_list, plan_command, reply_to_json, server_error,
    PlannedCommand, RedisCommand,
};
use super::traits::StorageEngine;
use super::types::{BatchGuard, OperationResult, Outcome};
use crate::config::{EngineConfig, EngineKind};
use crate::error::{Result, StoreError};
use crate::fs::{artifact_name, backup_timestamp, copy_atomic};
use crate::storage::retry::connect_with_retry;

const BACKUP_EXTENSION: &str = "rdb";

/// Connection-level settings read from `options`.
#[derive(Debug, Default, PartialEq)]
struct ConnectionOptions {
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    client_name: Option<String>,
}

/// Redis storage engine.
pub struct RedisEngine {
    config: EngineConfig,
    client: Option<Client>,
    conn: Option<Connection>,
    connected: bool,
    in_transaction: bool,
}

impl RedisEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            client: None,
            conn: None,
            connected: false,
            in_transaction: false,
        }
    }

    /// Logical database index parsed from `database`.
    fn db_index(&self) -> Result<i64> {
        self.config.database.trim().parse::<i64>().map_err(|_| {
            StoreError::Configuration(format!(
                "Redis database must be a numeric index, got '{}'",
                self.config.database
            ))
        })
    }

    /// `redis://` URL assembled from the configuration.
    pub fn connection_url(&self) -> Result<String> {
        let db = self.db_index()?;
        let mut url = String::from("redis://");
        if let Some(password) = self.config.password_str() {
            if let Some(username) = self.config.username.as_deref() {
                url.push_str(&encode(username));
            }
            url.push(':');
            url.push_str(&encode(password));
            url.push('@');
        }
        url.push_str(self.config.host.trim());
        if let Some(port) = self.config.effective_port() {
            url.push_str(&format!(":{}", port));
        }
        url.push_str(&format!("/{}", db));
        Ok(url)
    }

    fn connection_options(&self) -> Result<ConnectionOptions> {
        let mut options = ConnectionOptions::default();
        for (key, value) in &self.config.options {
            match key.as_str() {
                "read_timeout_ms" => options.read_timeout = Some(millis(key, value)?),
                "write_timeout_ms" => options.write_timeout = Some(millis(key, value)?),
                "client_name" => options.client_name = Some(value.clone()),
                other => debug!(engine = "Redis", option = other, "ignoring unknown option"),
            }
        }
        Ok(options)
    }

    /// Native connection, opened on first use.
    pub fn connection(&mut self) -> Result<&mut Connection> {
        if self.conn.is_none() {
            self.connect()?;
        }
        self.conn
            .as_mut()
            .ok_or_else(|| StoreError::Transaction("Redis connection unavailable".to_string()))
    }

    fn send(&mut self, command: RedisCommand, args: &[String]) -> Result<Reply> {
        let mut cmd = redis::cmd(command.name());
        for arg in args {
            cmd.arg(arg);
        }
        let reply: Reply = match cmd.query(self.connection()?) {
            Ok(reply) => reply,
            Err(err) if err.code().is_some() => return Err(command_failed(command, err.to_string())),
            Err(err) => return Err(err.into()),
        };
        if let Some(message) = server_error(&reply) {
            return Err(command_failed(command, message));
        }
        Ok(reply)
    }

    /// Send EXEC or DISCARD and leave transaction mode.
    ///
    /// The server leaves MULTI on any reply to either command. On an I/O
    /// failure the connection is dropped, so no half-open MULTI survives
    /// into the next command.
    fn end_transaction(&mut self, name: &str) -> Result<Reply> {
        let result = self.raw(name);
        self.in_transaction = false;
        if let Err(StoreError::Redis { source }) = &result {
            if source.is_io_error() {
                warn!(engine = "Redis", error = %source, "connection lost while ending transaction");
                self.conn = None;
                self.connected = false;
            }
        }
        result
    }

    fn raw(&mut self, name: &str) -> Result<Reply> {
        let reply: Reply = redis::cmd(name).query(self.connection()?)?;
        Ok(reply)
    }

    fn run_pipeline(&mut self, queued: &[(usize, PlannedCommand)]) -> Result<Vec<Reply>> {
        let mut pipe = redis::pipe();
        pipe.atomic().ignore_errors();
        for (_, planned) in queued {
            pipe.add_command(planned.to_cmd());
        }
        let replies: Vec<Reply> = pipe.query(self.connection()?)?;
        Ok(replies)
    }

    /// Inside MULTI every command replies QUEUED instead of a value.
    fn require_no_transaction(&self, action: &str) -> Result<()> {
        if self.in_transaction {
            return Err(StoreError::Transaction(format!(
                "cannot {} while a MULTI transaction is open",
                action
            )));
        }
        Ok(())
    }

    fn snapshot_path(&mut self) -> Result<PathBuf> {
        let conn = self.connection()?;
        let dir: HashMap<String, String> = redis::cmd("CONFIG").arg("GET").arg("dir").query(conn)?;
        let file: HashMap<String, String> =
            redis::cmd("CONFIG").arg("GET").arg("dbfilename").query(conn)?;
        match (dir.get("dir"), file.get("dbfilename")) {
            (Some(dir), Some(file)) => Ok(Path::new(dir).join(file)),
            _ => Err(StoreError::QueryFailed(
                "server did not report its snapshot location".to_string(),
            )),
        }
    }

    // --- Convenience operations ---

    /// `SET key value`, with `EX ttl` when `ttl` is positive.
    pub fn set(&mut self, key: &str, value: &str, ttl: Option<u64>) -> Result<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl.filter(|ttl| *ttl > 0) {
            cmd.arg("EX").arg(ttl);
        }
        let reply: Reply = cmd.query(self.connection()?)?;
        Ok(matches!(reply, Reply::Okay | Reply::SimpleString(_)))
    }

    pub fn get(&mut self, key: &str) -> Result<Option<String>> {
        Ok(redis::cmd("GET").arg(key).query(self.connection()?)?)
    }

    /// Delete keys; returns how many existed.
    pub fn delete(&mut self, keys: &[&str]) -> Result<u64> {
        Ok(redis::cmd("DEL").arg(keys).query(self.connection()?)?)
    }

    pub fn exists(&mut self, key: &str) -> Result<bool> {
        let count: u64 = redis::cmd("EXISTS").arg(key).query(self.connection()?)?;
        Ok(count > 0)
    }

    pub fn expire(&mut self, key: &str, seconds: u64) -> Result<bool> {
        let applied: u64 = redis::cmd("EXPIRE").arg(key).arg(seconds).query(self.connection()?)?;
        Ok(applied == 1)
    }

    /// Remaining time to live; `-1` without expiry, `-2` for a missing key.
    pub fn ttl(&mut self, key: &str) -> Result<i64> {
        Ok(redis::cmd("TTL").arg(key).query(self.connection()?)?)
    }

    pub fn increment(&mut self, key: &str, by: i64) -> Result<i64> {
        Ok(redis::cmd("INCRBY").arg(key).arg(by).query(self.connection()?)?)
    }

    pub fn decrement(&mut self, key: &str, by: i64) -> Result<i64> {
        Ok(redis::cmd("DECRBY").arg(key).arg(by).query(self.connection()?)?)
    }

    pub fn keys(&mut self, pattern: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = redis::cmd("KEYS").arg(pattern).query(self.connection()?)?;
        keys.sort();
        Ok(keys)
    }

    /// Remove every key in the selected logical database.
    pub fn flush(&mut self) -> Result<()> {
        redis::cmd("FLUSHDB").query::<()>(self.connection()?)?;
        Ok(())
    }
}

impl StorageEngine for RedisEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Redis
    }

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn connect(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        self.config.validate()?;
        let url = self.connection_url()?;
        let options = self.connection_options()?;
        let timeout = self.config.timeout();
        let existing = if self.config.persistent {
            self.client.clone()
        } else {
            None
        };

        let (client, conn) = connect_with_retry(&self.config, || -> redis::RedisResult<_> {
            let client = match &existing {
                Some(client) => client.clone(),
                None => Client::open(url.as_str())?,
            };
            let mut conn = client.get_connection_with_timeout(timeout)?;
            conn.set_read_timeout(options.read_timeout)?;
            conn.set_write_timeout(options.write_timeout)?;
            if let Some(name) = &options.client_name {
                redis::cmd("CLIENT")
                    .arg("SETNAME")
                    .arg(name)
                    .query::<()>(&mut conn)?;
            }
            Ok((client, conn))
        })?;

        self.client = Some(client);
        self.conn = Some(conn);
        self.connected = true;
        self.in_transaction = false;
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.in_transaction {
            if let Err(err) = self.raw("DISCARD") {
                warn!(engine = "Redis", error = %err, "failed to discard open transaction");
            }
            self.in_transaction = false;
        }
        self.conn = None;
        if !self.config.persistent {
            self.client = None;
        }
        self.connected = false;
    }

    fn is_connected(&mut self) -> bool {
        self.connected = match self.conn.as_mut() {
            Some(conn) => redis::cmd("PING").query::<String>(conn).is_ok(),
            None => false,
        };
        self.connected
    }

    fn query(&mut self, statement: &str, params: &[Value]) -> Result<Value> {
        let command: RedisCommand = statement.parse()?;
        let args: Vec<String> = params.iter().map(arg_string).collect();
        debug!(engine = "Redis", command = %command, "sending command");
        self.send(command, &args).map(reply_to_json)
    }

    fn execute_multiple(&mut self, batch: &str) -> Result<Vec<OperationResult>> {
        let entries = parse_command_list(batch)?;
        let mut guard = BatchGuard::new(self.config.batch_mode);
        let mut results = Vec::with_capacity(entries.len());
        let mut queued: Vec<(usize, PlannedCommand)> = Vec::new();

        for (index, entry) in entries.iter().enumerate() {
            let label = command_label(entry);
            if guard.halted() {
                results.push(OperationResult::skipped(index, label));
                continue;
            }
            match plan_command(entry) {
                Ok(planned) => {
                    results.push(OperationResult::ok(index, label, Outcome::Reply(Value::Null)));
                    queued.push((index, planned));
                }
                Err(err) => {
                    warn!(engine = "Redis", index = index, error = %err, "command rejected");
                    results.push(guard.record(OperationResult::failed(index, label, err.to_string())));
                }
            }
        }

        if queued.is_empty() {
            return Ok(results);
        }

        if self.in_transaction {
            // Already inside MULTI: each command is queued by the server.
            for (index, planned) in &queued {
                if let Err(err) = self.send(planned.command, &planned.args).map(|reply| {
                    results[*index].outcome = Some(Outcome::Reply(reply_to_json(reply)));
                }) {
                    results[*index] = OperationResult::failed(
                        *index,
                        results[*index].operation.clone(),
                        err.to_string(),
                    );
                }
            }
            return Ok(results);
        }

        match self.run_pipeline(&queued) {
            Ok(replies) => {
                for ((index, _), reply) in queued.iter().zip(replies) {
                    let result = &mut results[*index];
                    match server_error(&reply) {
                        Some(message) => {
                            result.success = false;
                            result.outcome = None;
                            result.error = Some(message);
                        }
                        None => result.outcome = Some(Outcome::Reply(reply_to_json(reply))),
                    }
                }
            }
            Err(err) => {
                warn!(engine = "Redis", error = %err, "pipeline failed");
                for (index, _) in &queued {
                    let result = &mut results[*index];
                    result.success = false;
                    result.outcome = None;
                    result.error = Some(err.to_string());
                }
            }
        }
        Ok(results)
    }

    fn begin_transaction(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(StoreError::Transaction(
                "a transaction is already active".to_string(),
            ));
        }
        self.raw("MULTI")?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(StoreError::Transaction("no active transaction".to_string()));
        }
        // Any EXEC reply, error replies included, ends MULTI on the server.
        let reply = self.end_transaction("EXEC")?;
        if matches!(reply, Reply::Nil) {
            return Err(StoreError::Transaction(
                "transaction aborted by the server".to_string(),
            ));
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(StoreError::Transaction("no active transaction".to_string()));
        }
        self.end_transaction("DISCARD")?;
        Ok(())
    }

    fn last_insert_id(&mut self) -> Result<Option<i64>> {
        Ok(None)
    }

    fn backup(&mut self, name: Option<&str>) -> Result<PathBuf> {
        self.require_no_transaction("back up")?;
        redis::cmd("SAVE").query::<()>(self.connection()?)?;
        let snapshot = self.snapshot_path()?;

        let name = name.map(str::to_string).unwrap_or_else(backup_timestamp);
        let destination = self.backups_dir().join(artifact_name(&name, BACKUP_EXTENSION));
        let bytes = copy_atomic(&snapshot, &destination)?;
        info!(engine = "Redis", path = %destination.display(), bytes = bytes, "backup written");
        Ok(destination)
    }

    fn restore(&mut self, path: &Path) -> Result<bool> {
        self.require_no_transaction("restore")?;
        if !path.is_file() {
            return Err(StoreError::FileNotFound(path.to_path_buf()));
        }
        let snapshot = self.snapshot_path()?;
        copy_atomic(path, &snapshot)?;
        info!(
            engine = "Redis",
            path = %snapshot.display(),
            "snapshot replaced; restart the server to load it"
        );
        Ok(true)
    }
}

fn millis(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| StoreError::Configuration(format!("option '{}' must be milliseconds", key)))
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig::new(EngineKind::Redis, "cache.local", "2")
    }

    #[test]
    fn test_url_without_password() {
        let engine = RedisEngine::new(config());
        assert_eq!(engine.connection_url().unwrap(), "redis://cache.local:6379/2");
    }

    #[test]
    fn test_url_escapes_password() {
        let engine = RedisEngine::new(config().port(6380).credentials("", "p@ss:word"));
        assert_eq!(
            engine.connection_url().unwrap(),
            "redis://:p%40ss%3Aword@cache.local:6380/2"
        );
    }

    #[test]
    fn test_non_numeric_database_is_configuration_error() {
        let mut engine = RedisEngine::new(EngineConfig::new(EngineKind::Redis, "localhost", "cache"));
        assert!(matches!(engine.connect(), Err(StoreError::Configuration(_))));
    }

    #[test]
    fn test_connection_options() {
        let engine = RedisEngine::new(
            config()
                .option("read_timeout_ms", "250")
                .option("client_name", "polystore")
                .option("something_else", "x"),
        );
        let options = engine.connection_options().unwrap();
        assert_eq!(options.read_timeout, Some(Duration::from_millis(250)));
        assert_eq!(options.write_timeout, None);
        assert_eq!(options.client_name.as_deref(), Some("polystore"));

        let engine = RedisEngine::new(config().option("write_timeout_ms", "soon"));
        assert!(matches!(
            engine.connection_options(),
            Err(StoreError::Configuration(_))
        ));
    }

    #[test]
    fn test_unsupported_command_rejected_before_connecting() {
        let mut engine = RedisEngine::new(config());
        let err = engine.query("FLUSHALL", &[]).unwrap_err();
        assert!(err.to_string().contains("unsupported command"));
        assert!(!engine.is_connected());
    }

    #[test]
    fn test_batch_of_only_invalid_commands_needs_no_server() {
        let mut engine = RedisEngine::new(config());
        let results = engine
            .execute_multiple(r#"[{"command": "bogus"}, {"args": ["x"]}]"#)
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.success));
        assert!(results[0].error.as_deref().unwrap().contains("unsupported command"));
    }

    #[test]
    fn test_malformed_batch() {
        let mut engine = RedisEngine::new(config());
        assert!(matches!(
            engine.execute_multiple("not json"),
            Err(StoreError::MalformedOperationFile(_))
        ));
    }

    #[test]
    fn test_transaction_misuse() {
        let mut engine = RedisEngine::new(config());
        assert!(matches!(engine.commit(), Err(StoreError::Transaction(_))));
        assert!(matches!(engine.rollback(), Err(StoreError::Transaction(_))));
        assert_eq!(engine.last_insert_id().unwrap(), None);
    }

    fn unreachable() -> EngineConfig {
        EngineConfig::new(EngineKind::Redis, "127.0.0.1", "0")
            .port(1)
            .timeout_secs(1)
            .retry(1, 0)
    }

    #[test]
    fn test_backup_and_restore_refused_inside_multi() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = RedisEngine::new(unreachable().backup_dir(dir.path()));
        engine.in_transaction = true;

        let err = engine.backup(Some("snap")).unwrap_err();
        assert!(matches!(err, StoreError::Transaction(_)));
        let err = engine.restore(Path::new("/nonexistent.rdb")).unwrap_err();
        assert!(matches!(err, StoreError::Transaction(_)));
        assert!(engine.conn.is_none());
    }

    #[test]
    fn test_failed_exec_leaves_transaction_mode() {
        let mut engine = RedisEngine::new(unreachable());
        engine.in_transaction = true;

        assert!(engine.commit().is_err());
        assert!(!engine.in_transaction);
        assert!(engine.conn.is_none());
        assert!(matches!(engine.rollback(), Err(StoreError::Transaction(_))));
    }
}

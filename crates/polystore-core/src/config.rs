//! Engine configuration record.
//!
//! A single `EngineConfig` is supplied at construction time. It is
//! deserialized from TOML by the CLI, or built programmatically with
//! [`EngineConfig::new`] and the chained setters.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};

use crate::error::{Result, StoreError};

pub const DEFAULT_BASE_PATH: &str = "database";
pub const DEFAULT_CHARSET: &str = "utf8mb4";
pub const DEFAULT_COLLATION: &str = "utf8mb4_unicode_ci";
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Which concrete engine a configuration selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Sqlite,
    Mysql,
    Mongodb,
    Redis,
}

impl EngineKind {
    /// Directory name used under the configured base path.
    pub fn dir_name(&self) -> &'static str {
        match self {
            EngineKind::Sqlite => "SQLite",
            EngineKind::Mysql => "MySQL",
            EngineKind::Mongodb => "MongoDB",
            EngineKind::Redis => "Redis",
        }
    }

    /// Extension of migration and seed files for this engine.
    pub fn file_extension(&self) -> &'static str {
        match self {
            EngineKind::Sqlite | EngineKind::Mysql => "sql",
            EngineKind::Mongodb | EngineKind::Redis => "json",
        }
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            EngineKind::Sqlite => None,
            EngineKind::Mysql => Some(3306),
            EngineKind::Mongodb => Some(27017),
            EngineKind::Redis => Some(6379),
        }
    }

    pub fn is_relational(&self) -> bool {
        matches!(self, EngineKind::Sqlite | EngineKind::Mysql)
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// How `execute_multiple` reacts to a failing unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// Record the failure and keep executing later units.
    #[default]
    ContinueOnError,
    /// Record the failure and mark every later unit as skipped.
    StopOnError,
}

/// Connection and behavior settings for one engine instance.
#[derive(Debug, Deserialize)]
pub struct EngineConfig {
    pub engine: EngineKind,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub password: Option<SecretString>,
    #[serde(default)]
    pub database: String,
    #[serde(default = "default_charset")]
    pub charset: String,
    #[serde(default = "default_collation")]
    pub collation: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default)]
    pub batch_mode: BatchMode,
}

fn default_charset() -> String {
    DEFAULT_CHARSET.to_string()
}

fn default_collation() -> String {
    DEFAULT_COLLATION.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

fn default_base_path() -> PathBuf {
    PathBuf::from(DEFAULT_BASE_PATH)
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.map(SecretString::from))
}

impl EngineConfig {
    /// Create a configuration with defaults for everything except the
    /// engine tag, host and database.
    pub fn new(engine: EngineKind, host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            engine,
            host: host.into(),
            port: None,
            username: None,
            password: None,
            database: database.into(),
            charset: default_charset(),
            collation: default_collation(),
            prefix: String::new(),
            options: BTreeMap::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            base_path: default_base_path(),
            backup_dir: None,
            persistent: false,
            batch_mode: BatchMode::default(),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecretString::from(password.into()));
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn retry(mut self, attempts: u32, delay_ms: u64) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay_ms = delay_ms;
        self
    }

    pub fn base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = path.into();
        self
    }

    pub fn backup_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(path.into());
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn batch_mode(mut self, mode: BatchMode) -> Self {
        self.batch_mode = mode;
        self
    }

    /// Check required fields. Called before any connection attempt.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Configuration` if `host` or `database` is blank,
    /// or if `retry_attempts` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(StoreError::Configuration(format!(
                "{} configuration is missing required field 'host'",
                self.engine
            )));
        }
        if self.database.trim().is_empty() {
            return Err(StoreError::Configuration(format!(
                "{} configuration is missing required field 'database'",
                self.engine
            )));
        }
        if self.retry_attempts == 0 {
            return Err(StoreError::Configuration(
                "retry_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Port to connect to, falling back to the engine default.
    pub fn effective_port(&self) -> Option<u16> {
        self.port.or_else(|| self.engine.default_port())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Password in clear text, for handing to a native driver.
    pub fn password_str(&self) -> Option<&str> {
        self.password.as_ref().map(|secret| secret.expose_secret())
    }

    /// Root of this engine's migration/seed/backup tree.
    pub fn engine_dir(&self) -> PathBuf {
        self.base_path.join(self.engine.dir_name())
    }

    pub fn migrations_dir(&self) -> PathBuf {
        self.engine_dir().join("migrations")
    }

    pub fn seeds_dir(&self) -> PathBuf {
        self.engine_dir().join("seeds")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| self.engine_dir().join("backups"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requires_host() {
        let config = EngineConfig::new(EngineKind::Mysql, "", "app");
        let err = config.validate().unwrap_err();
        assert!(matches!(err, StoreError::Configuration(ref m) if m.contains("host")));
    }

    #[test]
    fn test_validate_requires_database() {
        let config = EngineConfig::new(EngineKind::Redis, "localhost", "  ");
        let err = config.validate().unwrap_err();
        assert!(matches!(err, StoreError::Configuration(ref m) if m.contains("database")));
    }

    #[test]
    fn test_paths_follow_engine_convention() {
        let config = EngineConfig::new(EngineKind::Mongodb, "localhost", "app").base_path("/srv/db");
        assert_eq!(config.migrations_dir(), PathBuf::from("/srv/db/MongoDB/migrations"));
        assert_eq!(config.seeds_dir(), PathBuf::from("/srv/db/MongoDB/seeds"));
        assert_eq!(config.backups_dir(), PathBuf::from("/srv/db/MongoDB/backups"));

        let config = config.backup_dir("/var/backups");
        assert_eq!(config.backups_dir(), PathBuf::from("/var/backups"));
    }

    #[test]
    fn test_effective_port_defaults() {
        let config = EngineConfig::new(EngineKind::Redis, "localhost", "0");
        assert_eq!(config.effective_port(), Some(6379));
        assert_eq!(config.port(6380).effective_port(), Some(6380));
        let sqlite = EngineConfig::new(EngineKind::Sqlite, "localhost", ":memory:");
        assert_eq!(sqlite.effective_port(), None);
    }

    #[test]
    fn test_password_is_redacted_in_debug() {
        let config =
            EngineConfig::new(EngineKind::Mysql, "db", "app").credentials("root", "hunter2");
        assert_eq!(config.password_str(), Some("hunter2"));
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}

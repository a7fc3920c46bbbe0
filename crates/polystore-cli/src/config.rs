//! Connections file handling.
//!
//! The file is TOML:
//!
//! ```toml
//! default_connection = "local"
//!
//! [connections.local]
//! engine = "sqlite"
//! host = "localhost"
//! database = "app.db"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use polystore_core::EngineConfig;
use serde::Deserialize;

use crate::errors::CliError;

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub default_connection: Option<String>,
    #[serde(default)]
    pub connections: BTreeMap<String, EngineConfig>,
}

impl CliConfig {
    /// Take the named connection, or the default one.
    ///
    /// With no name and no `default_connection`, a file holding exactly one
    /// connection selects it.
    pub fn take_connection(mut self, name: Option<&str>) -> anyhow::Result<(String, EngineConfig)> {
        let name = match name.or(self.default_connection.as_deref()) {
            Some(name) => name.to_string(),
            None if self.connections.len() == 1 => self
                .connections
                .keys()
                .next()
                .cloned()
                .unwrap_or_default(),
            None => {
                return Err(CliError::invalid_input(
                    "No connection selected\nHint: Pass --connection <NAME> or set `default_connection`.",
                )
                .into())
            }
        };

        match self.connections.remove(&name) {
            Some(config) => Ok((name, config)),
            None => {
                let known: Vec<&str> = self.connections.keys().map(String::as_str).collect();
                Err(CliError::not_found(
                    format!("Connection '{}' not found", name),
                    format!("Hint: Known connections: {}", known.join(", ")),
                )
                .into())
            }
        }
    }
}

pub fn parse_config(contents: &str, path: &Path) -> anyhow::Result<CliConfig> {
    toml::from_str(contents).map_err(|e| {
        anyhow::Error::from(CliError::invalid_input(format!(
            "Failed to parse config {}: {}",
            path.display(),
            e
        )))
    })
}

pub fn read_config(path: &Path) -> anyhow::Result<CliConfig> {
    if !path.exists() {
        return Err(CliError::not_found(
            format!("Config not found at {}", path.display()),
            "Hint: Create it with a [connections.<name>] table, or pass --config <PATH>.",
        )
        .into());
    }
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
    parse_config(&contents, path)
}

/// `--config` / `POLYSTORE_CONFIG`, else the XDG default.
pub fn resolve_config_path(flag: Option<&str>) -> anyhow::Result<PathBuf> {
    match flag {
        Some(path) if !path.trim().is_empty() => Ok(PathBuf::from(path)),
        _ => default_config_path(),
    }
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(xdg_config_dir()?.join("config.toml"))
}

pub fn xdg_config_dir() -> anyhow::Result<PathBuf> {
    if let Ok(value) = std::env::var("XDG_CONFIG_HOME") {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value).join("polystore"));
        }
    }
    Ok(home_dir()?.join(".config").join("polystore"))
}

fn home_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| anyhow::anyhow!("HOME is not set; cannot resolve default paths"))?;
    Ok(PathBuf::from(home))
}

#[cfg(test)]
mod tests {
    use super::*;
    use polystore_core::{BatchMode, EngineKind};

    const SAMPLE: &str = r#"
default_connection = "local"

[connections.local]
engine = "sqlite"
host = "localhost"
database = "app.db"
prefix = "app_"

[connections.cache]
engine = "redis"
host = "127.0.0.1"
database = "0"
password = "hunter2"
persistent = true
batch_mode = "stop_on_error"

[connections.cache.options]
client_name = "polystore"
"#;

    fn sample() -> CliConfig {
        parse_config(SAMPLE, Path::new("config.toml")).unwrap()
    }

    #[test]
    fn test_default_connection_selected() {
        let (name, config) = sample().take_connection(None).unwrap();
        assert_eq!(name, "local");
        assert_eq!(config.engine, EngineKind::Sqlite);
        assert_eq!(config.prefix, "app_");
        assert_eq!(config.retry_attempts, 3);
    }

    #[test]
    fn test_named_connection_with_options() {
        let (_, config) = sample().take_connection(Some("cache")).unwrap();
        assert_eq!(config.engine, EngineKind::Redis);
        assert!(config.persistent);
        assert_eq!(config.batch_mode, BatchMode::StopOnError);
        assert_eq!(config.password_str(), Some("hunter2"));
        assert_eq!(config.options.get("client_name").map(String::as_str), Some("polystore"));
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_unknown_connection_is_not_found() {
        let err = sample().take_connection(Some("prod")).unwrap_err();
        let cli_err = err.downcast_ref::<CliError>().unwrap();
        assert!(matches!(cli_err, CliError::NotFound { .. }));
        assert!(err.to_string().contains("cache, local"));
    }

    #[test]
    fn test_single_connection_is_implicit_default() {
        let config = parse_config(
            "[connections.only]\nengine = \"redis\"\nhost = \"h\"\ndatabase = \"0\"\n",
            Path::new("c.toml"),
        )
        .unwrap();
        let (name, _) = config.take_connection(None).unwrap();
        assert_eq!(name, "only");
    }

    #[test]
    fn test_invalid_engine_tag_is_invalid_input() {
        let err = parse_config(
            "[connections.x]\nengine = \"oracle\"\nhost = \"h\"\ndatabase = \"d\"\n",
            Path::new("c.toml"),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::InvalidInput(_))
        ));
    }
}

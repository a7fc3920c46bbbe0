//! Application context for the Polystore CLI.
//!
//! Bundles the parsed global flags with connection resolution so command
//! handlers do not thread the config path and connection name around.

use std::io::IsTerminal;

use polystore_core::{open_engine, open_sql_engine, BatchMode, EngineConfig};
use polystore_core::{SqlEngine, StorageEngine};

use crate::cli::Cli;
use crate::config::{read_config, resolve_config_path};

pub struct AppContext<'a> {
    cli: &'a Cli,
}

impl<'a> AppContext<'a> {
    /// Create a new application context from CLI arguments.
    pub fn new(cli: &'a Cli) -> Self {
        Self { cli }
    }

    pub fn quiet(&self) -> bool {
        self.cli.quiet
    }

    pub fn json(&self) -> bool {
        self.cli.json
    }

    /// Prompts are only shown on a terminal and outside quiet mode.
    pub fn interactive(&self) -> bool {
        std::io::stdin().is_terminal() && !self.cli.quiet
    }

    /// Resolve the selected connection from the config file.
    ///
    /// `--strict` overrides the connection's configured batch mode.
    pub fn connection(&self) -> anyhow::Result<(String, EngineConfig)> {
        let path = resolve_config_path(self.cli.config.as_deref())?;
        let config = read_config(&path)?;
        let (name, mut engine_config) = config.take_connection(self.cli.connection.as_deref())?;
        if self.cli.strict {
            engine_config = engine_config.batch_mode(BatchMode::StopOnError);
        }
        tracing::debug!(
            connection = %name,
            engine = %engine_config.engine,
            config = %path.display(),
            "resolved connection"
        );
        Ok((name, engine_config))
    }

    /// Build the engine for the selected connection.
    pub fn open_engine(&self) -> anyhow::Result<(String, Box<dyn StorageEngine>)> {
        let (name, config) = self.connection()?;
        config.validate()?;
        Ok((name, open_engine(config)))
    }

    /// Build a relational engine for the selected connection.
    pub fn open_sql_engine(&self) -> anyhow::Result<(String, Box<dyn SqlEngine>)> {
        let (name, config) = self.connection()?;
        config.validate()?;
        Ok((name, open_sql_engine(config)?))
    }
}

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use polystore_core::VERSION;

use crate::constants::CONFIG_ENV;

/// Polystore - run queries, migrations, seeds and backups against SQLite, MySQL, MongoDB and Redis
#[derive(Parser)]
#[command(name = "polystore")]
#[command(author, version = VERSION, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the connections file
    #[arg(short, long, global = true, env = CONFIG_ENV, value_name = "PATH")]
    pub config: Option<String>,

    /// Named connection from the config file (defaults to `default_connection`)
    #[arg(short = 'n', long, global = true, value_name = "NAME")]
    pub connection: Option<String>,

    /// Stop a batch at its first failing statement or operation
    #[arg(long, global = true)]
    pub strict: bool,

    /// Emit JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the selected connection and check that it is reachable
    Status,

    /// Run a single native operation
    Query(QueryArgs),

    /// Execute a batch file (SQL or JSON operation list)
    Exec(ExecArgs),

    /// Run one migration, or all of them in filename order
    Migrate(RunFilesArgs),

    /// Run one seed, or all of them in filename order
    Seed(RunFilesArgs),

    /// Write a snapshot of the database
    Backup(BackupArgs),

    /// Replace the database with a snapshot
    Restore(RestoreArgs),

    /// List tables (relational connections only)
    Tables,

    /// Describe a table's columns (relational connections only)
    Describe(DescribeArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Arguments for the `query` command
#[derive(Args)]
pub struct QueryArgs {
    /// SQL statement, `<collection>.<method>`, database command or Redis command
    #[arg(value_name = "STATEMENT")]
    pub statement: String,

    /// Positional parameter as JSON (bare words are taken as strings)
    #[arg(short, long = "param", value_name = "JSON")]
    pub params: Vec<String>,
}

/// Arguments for the `exec` command
#[derive(Args)]
pub struct ExecArgs {
    /// File to execute
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Placeholder value, substituted for `{{KEY}}`
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,
}

/// Arguments for the `migrate` and `seed` commands
#[derive(Args)]
pub struct RunFilesArgs {
    /// File name inside the migrations/seeds directory; omit to run all
    #[arg(value_name = "NAME")]
    pub name: Option<String>,
}

/// Arguments for the `backup` command
#[derive(Args)]
pub struct BackupArgs {
    /// Artifact name (defaults to a UTC timestamp)
    #[arg(long)]
    pub name: Option<String>,
}

/// Arguments for the `restore` command
#[derive(Args)]
pub struct RestoreArgs {
    /// Backup artifact to restore
    #[arg(value_name = "PATH")]
    pub path: String,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for the `describe` command
#[derive(Args)]
pub struct DescribeArgs {
    /// Table name (the configured prefix is not applied)
    #[arg(value_name = "TABLE")]
    pub table: String,
}

/// Arguments for the `completions` command
#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "polystore",
            "query",
            "SELECT ?",
            "--param",
            "1",
            "--json",
            "--connection",
            "local",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.connection.as_deref(), Some("local"));
        match cli.command {
            Commands::Query(args) => assert_eq!(args.params, vec!["1"]),
            _ => panic!("expected query"),
        }
    }
}

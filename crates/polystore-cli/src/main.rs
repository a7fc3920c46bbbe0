//! Polystore CLI - run queries, batches, migrations, seeds and backups
//! against named SQLite, MySQL, MongoDB and Redis connections.
//!
//! This is the command-line interface for Polystore. Connections are read
//! from a TOML file; all storage behavior lives in `polystore-core`.

mod app;
mod cli;
mod commands;
mod config;
mod constants;
mod errors;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::app::AppContext;
use crate::cli::{Cli, Commands};
use crate::commands::{backup, batch, misc, query, schema, status};
use crate::constants::{DEFAULT_LOG_FILTER, LOG_ENV};
use crate::errors::exit_code_for;

fn main() {
    let cli = Cli::parse();
    init_logging();
    let ctx = AppContext::new(&cli);

    if let Err(e) = run(&ctx, &cli) {
        let error_msg = format!("{}", e);
        let hint = extract_error_hint(&error_msg);
        let message = match error_msg.find("\nHint:") {
            Some(idx) => &error_msg[..idx],
            None => error_msg.as_str(),
        };

        eprintln!("Error: {}", message);
        if let Some(hint) = hint {
            eprintln!("{}", hint);
        }
        std::process::exit(exit_code_for(&e));
    }
}

/// Logs go to stderr so `--json` output on stdout stays parseable.
fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Extract a hint from an error message if it contains "Hint:",
/// or provide contextual hints for common error types.
fn extract_error_hint(error: &str) -> Option<String> {
    if let Some(idx) = error.find("\nHint:") {
        return Some(error[idx + 1..].to_string());
    }

    let error_lower = error.to_lowercase();

    if error_lower.contains("directory not found") && error_lower.contains("migrations") {
        return Some(
            "Hint: Migrations live in <base_path>/<Engine>/migrations/.".to_string(),
        );
    }

    if error_lower.contains("directory not found") && error_lower.contains("seeds") {
        return Some("Hint: Seeds live in <base_path>/<Engine>/seeds/.".to_string());
    }

    if error_lower.contains("could not connect") {
        return Some(
            "Hint: Check host, port and credentials; run `polystore status` to test the connection."
                .to_string(),
        );
    }

    if error_lower.contains("have no tables") {
        return Some(
            "Hint: Use `polystore query` for document and key-value connections.".to_string(),
        );
    }

    if error_lower.contains("mysqldump")
        || error_lower.contains("mongodump")
        || error_lower.contains("mongorestore")
    {
        return Some(
            "Hint: Backup tools must be on PATH, or set `dump_tool`/`restore_tool` in the connection options."
                .to_string(),
        );
    }

    None
}

fn run(ctx: &AppContext, cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Status => {
            status::handle_status(ctx)?;
        }
        Commands::Query(args) => {
            query::handle_query(ctx, args)?;
        }
        Commands::Exec(args) => {
            batch::handle_exec(ctx, args)?;
        }
        Commands::Migrate(args) => {
            batch::handle_migrate(ctx, args)?;
        }
        Commands::Seed(args) => {
            batch::handle_seed(ctx, args)?;
        }
        Commands::Backup(args) => {
            backup::handle_backup(ctx, args)?;
        }
        Commands::Restore(args) => {
            backup::handle_restore(ctx, args)?;
        }
        Commands::Tables => {
            schema::handle_tables(ctx)?;
        }
        Commands::Describe(args) => {
            schema::handle_describe(ctx, args)?;
        }
        Commands::Completions(args) => {
            misc::handle_completions(args)?;
        }
    }
    Ok(())
}

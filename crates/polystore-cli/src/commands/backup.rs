use std::path::Path;

use dialoguer::Confirm;
use serde_json::json;

use crate::app::AppContext;
use crate::cli::{BackupArgs, RestoreArgs};
use crate::errors::CliError;
use crate::output::to_json;

pub fn handle_backup(ctx: &AppContext, args: &BackupArgs) -> anyhow::Result<()> {
    let (name, mut engine) = ctx.open_engine()?;
    let artifact = engine.backup(args.name.as_deref())?;

    if ctx.json() {
        let receipt = json!({ "connection": name, "backup": artifact.display().to_string() });
        println!("{}", to_json(&receipt)?);
    } else if ctx.quiet() {
        println!("{}", artifact.display());
    } else {
        println!("Backup written: {}", artifact.display());
    }
    Ok(())
}

pub fn handle_restore(ctx: &AppContext, args: &RestoreArgs) -> anyhow::Result<()> {
    let (name, mut engine) = ctx.open_engine()?;

    if !args.yes {
        if !ctx.interactive() {
            return Err(CliError::invalid_input(
                "Restore replaces the current data; pass --yes to confirm",
            )
            .into());
        }
        let proceed = Confirm::new()
            .with_prompt(format!(
                "Replace the data of '{}' with {}?",
                name, args.path
            ))
            .default(false)
            .interact()?;
        if !proceed {
            if !ctx.quiet() {
                println!("Restore cancelled.");
            }
            return Ok(());
        }
    }

    engine.restore(Path::new(&args.path))?;
    tracing::info!(connection = %name, artifact = %args.path, "restore complete");

    if ctx.json() {
        let receipt = json!({ "connection": name, "restored": args.path });
        println!("{}", to_json(&receipt)?);
    } else if !ctx.quiet() {
        println!("Restored {} from {}", name, args.path);
    }
    Ok(())
}

//! `exec`, `migrate` and `seed`: commands that run batches.

use std::path::Path;

use polystore_core::storage::types::failure_count;
use polystore_core::storage::{BatchReport, FileParams};
use polystore_core::OperationResult;

use crate::app::AppContext;
use crate::cli::{ExecArgs, RunFilesArgs};
use crate::errors::CliError;
use crate::output::{results_table, to_json};

/// Parse `--var KEY=VALUE` flags into placeholder parameters.
pub fn parse_vars(vars: &[String]) -> anyhow::Result<FileParams> {
    let mut params = FileParams::new();
    for var in vars {
        let (key, value) = var.split_once('=').ok_or_else(|| {
            CliError::invalid_input(format!("Invalid --var '{}': expected KEY=VALUE", var))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::invalid_input(format!("Invalid --var '{}': empty key", var)).into());
        }
        params.insert(key.to_string(), value.to_string());
    }
    Ok(params)
}

fn check_failures(failed: usize, total: usize) -> anyhow::Result<()> {
    if failed > 0 {
        return Err(CliError::BatchFailed { failed, total }.into());
    }
    Ok(())
}

fn print_results(ctx: &AppContext, results: &[OperationResult]) -> anyhow::Result<()> {
    if ctx.json() {
        println!("{}", to_json(results)?);
    } else if !ctx.quiet() {
        println!("{}", results_table(results));
    }
    Ok(())
}

fn print_report(ctx: &AppContext, label: &str, report: &BatchReport) -> anyhow::Result<()> {
    if ctx.json() {
        println!("{}", to_json(report)?);
        return Ok(());
    }
    if ctx.quiet() {
        return Ok(());
    }
    for (file, results) in report {
        let failed = failure_count(results);
        if failed == 0 {
            println!("{} {}: {} operation(s) ok", label, file, results.len());
        } else {
            println!("{} {}: {} of {} failed", label, file, failed, results.len());
            println!("{}", results_table(results));
        }
    }
    Ok(())
}

fn finish_results(ctx: &AppContext, results: &[OperationResult]) -> anyhow::Result<()> {
    print_results(ctx, results)?;
    check_failures(failure_count(results), results.len())
}

fn finish_report(ctx: &AppContext, label: &str, report: &BatchReport) -> anyhow::Result<()> {
    print_report(ctx, label, report)?;
    let failed = report.values().map(|results| failure_count(results)).sum();
    let total = report.values().map(Vec::len).sum();
    check_failures(failed, total)
}

pub fn handle_exec(ctx: &AppContext, args: &ExecArgs) -> anyhow::Result<()> {
    let params = parse_vars(&args.vars)?;
    let (_, mut engine) = ctx.open_engine()?;
    let results = engine.execute_file(Path::new(&args.file), &params)?;
    finish_results(ctx, &results)
}

pub fn handle_migrate(ctx: &AppContext, args: &RunFilesArgs) -> anyhow::Result<()> {
    let (_, mut engine) = ctx.open_engine()?;
    match &args.name {
        Some(name) => {
            let results = engine.execute_migration(name)?;
            finish_results(ctx, &results)
        }
        None => {
            let report = engine.migrate_all()?;
            finish_report(ctx, "migration", &report)
        }
    }
}

pub fn handle_seed(ctx: &AppContext, args: &RunFilesArgs) -> anyhow::Result<()> {
    let (_, mut engine) = ctx.open_engine()?;
    match &args.name {
        Some(name) => {
            let results = engine.execute_seed(name)?;
            finish_results(ctx, &results)
        }
        None => {
            let report = engine.seed_all()?;
            finish_report(ctx, "seed", &report)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vars() {
        let params = parse_vars(&["table=users".to_string(), "where=a=b".to_string()]).unwrap();
        assert_eq!(params.get("table").map(String::as_str), Some("users"));
        assert_eq!(params.get("where").map(String::as_str), Some("a=b"));
    }

    #[test]
    fn test_parse_vars_rejects_bad_input() {
        let err = parse_vars(&["novalue".to_string()]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::InvalidInput(_))
        ));
        assert!(parse_vars(&["=x".to_string()]).is_err());
    }

    #[test]
    fn test_check_failures() {
        assert!(check_failures(0, 3).is_ok());
        let err = check_failures(1, 3).unwrap_err();
        assert_eq!(err.to_string(), "1 of 3 operation(s) failed");
    }
}

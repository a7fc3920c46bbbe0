//! Relational introspection: `tables` and `describe`.

use crate::app::AppContext;
use crate::cli::DescribeArgs;
use crate::errors::CliError;
use crate::output::{rows_table, to_json};

pub fn handle_tables(ctx: &AppContext) -> anyhow::Result<()> {
    let (_, mut engine) = ctx.open_sql_engine()?;
    let tables = engine.get_tables()?;

    if ctx.json() {
        println!("{}", to_json(&tables)?);
    } else {
        for table in &tables {
            println!("{}", table);
        }
    }
    Ok(())
}

pub fn handle_describe(ctx: &AppContext, args: &DescribeArgs) -> anyhow::Result<()> {
    let (_, mut engine) = ctx.open_sql_engine()?;
    if !engine.table_exists(&args.table)? {
        return Err(CliError::not_found(
            format!("Table not found: {}", args.table),
            "Hint: Run `polystore tables` to list tables.",
        )
        .into());
    }
    let columns = engine.get_table_structure(&args.table)?;

    if ctx.json() {
        println!("{}", to_json(&columns)?);
    } else if !ctx.quiet() {
        println!("{}", rows_table(&columns));
    }
    Ok(())
}

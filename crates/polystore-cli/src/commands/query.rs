use serde_json::Value;

use crate::app::AppContext;
use crate::cli::QueryArgs;
use crate::output::{render_value, to_json};

/// Parse a `--param` value as JSON, falling back to a plain string.
pub fn parse_param(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub fn handle_query(ctx: &AppContext, args: &QueryArgs) -> anyhow::Result<()> {
    let params: Vec<Value> = args.params.iter().map(|raw| parse_param(raw)).collect();
    let (_, mut engine) = ctx.open_engine()?;
    let result = engine.query(&args.statement, &params)?;

    if ctx.json() {
        println!("{}", to_json(&result)?);
    } else if !ctx.quiet() {
        println!("{}", render_value(&result));
    }
    Ok(())
}

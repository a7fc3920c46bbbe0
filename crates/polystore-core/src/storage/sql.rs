//! Helpers shared by the relational engines.

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::types::{BatchGuard, OperationResult, Outcome, Row};
use crate::config::BatchMode;
use crate::error::{Result, StoreError};
use crate::splitter::split_statements;

/// Split `sql` and run each statement through `run`, recording one result per statement.
pub(crate) fn run_statements<F>(
    engine: &str,
    sql: &str,
    mode: BatchMode,
    mut run: F,
) -> Vec<OperationResult>
where
    F: FnMut(&str) -> Result<Outcome>,
{
    let mut guard = BatchGuard::new(mode);
    split_statements(sql)
        .into_iter()
        .enumerate()
        .map(|(index, statement)| {
            if guard.halted() {
                return OperationResult::skipped(index, statement);
            }
            debug!(engine = engine, index = index, "executing statement");
            let result = match run(&statement) {
                Ok(outcome) => OperationResult::ok(index, statement, outcome),
                Err(err) => {
                    warn!(engine = engine, index = index, error = %err, "statement failed");
                    OperationResult::failed(index, statement, err.to_string())
                }
            };
            guard.record(result)
        })
        .collect()
}

/// JSON shape returned by `query` for a statement outcome.
pub(crate) fn outcome_json(outcome: Outcome) -> Value {
    match outcome {
        Outcome::Rows(rows) => Value::Array(rows.into_iter().map(Value::Object).collect()),
        Outcome::Affected(count) => json!({ "affected_rows": count }),
        Outcome::Document(counters) => json!(counters),
        Outcome::Reply(value) => value,
    }
}

/// Whether `name` is safe to splice into a SQL/PRAGMA/SET statement.
pub(crate) fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

/// Reject option keys that are not plain identifiers.
pub(crate) fn check_option_keys<'a>(keys: impl IntoIterator<Item = &'a String>) -> Result<()> {
    for key in keys {
        if !is_identifier(key) {
            return Err(StoreError::Configuration(format!(
                "Invalid driver option name '{}'",
                key
            )));
        }
    }
    Ok(())
}

/// Wrap an option value for a `PRAGMA`/`SET` statement: numbers and bare words pass, anything else is quoted.
pub(crate) fn option_literal(value: &str) -> String {
    if value.parse::<f64>().is_ok() || is_identifier(value) {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "''"))
    }
}

/// Quote an identifier with `quote` (a double quote or backtick), doubling embedded quotes.
pub(crate) fn quote_identifier(name: &str, quote: char) -> String {
    let doubled: String = [quote, quote].iter().collect();
    format!("{q}{}{q}", name.replace(quote, &doubled), q = quote)
}

/// First column value of each row, as strings.
pub(crate) fn first_column_strings(rows: Vec<Row>) -> Vec<String> {
    rows.into_iter()
        .filter_map(|row| row.into_iter().next().map(|(_, value)| value))
        .map(|value| match value {
            Value::String(s) => s,
            other => other.to_string(),
        })
        .collect()
}

/// Interpret a count returned by a driver as a boolean.
pub(crate) fn truthy(value: Option<Value>) -> bool {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0) > 0,
        Some(Value::Bool(b)) => b,
        Some(Value::String(s)) => s.parse::<i64>().map(|n| n > 0).unwrap_or(false),
        _ => false,
    }
}

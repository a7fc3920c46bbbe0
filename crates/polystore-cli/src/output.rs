//! Table and JSON rendering for command output.

use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table as ComfyTable};
use polystore_core::storage::{Outcome, Row};
use polystore_core::OperationResult;
use serde::Serialize;
use serde_json::Value;

fn new_table() -> ComfyTable {
    let mut table = ComfyTable::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Pretty-printed JSON for `--json` output.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Text of one cell. Strings are shown without quotes.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render rows as a table; columns in first-seen order across all rows.
pub fn rows_table(rows: &[Row]) -> String {
    let mut columns: Vec<&str> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let mut table = new_table();
    table.set_header(columns.clone());
    for row in rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|column| row.get(*column).map(cell_text).unwrap_or_default())
            .collect();
        table.add_row(cells);
    }
    table.to_string()
}

/// Render a `query` result: arrays of objects become tables.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
            let rows: Vec<Row> = items
                .iter()
                .filter_map(|item| item.as_object().cloned())
                .collect();
            rows_table(&rows)
        }
        Value::Object(row) => rows_table(std::slice::from_ref(row)),
        Value::String(_) | Value::Null | Value::Bool(_) | Value::Number(_) => cell_text(value),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// One-line summary of what a unit produced.
pub fn outcome_summary(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Rows(rows) => format!("{} row(s)", rows.len()),
        Outcome::Affected(count) => format!("{} affected", count),
        Outcome::Document(counters) => {
            let mut parts = Vec::new();
            if counters.inserted > 0 {
                parts.push(format!("{} inserted", counters.inserted));
            }
            if counters.matched > 0 || counters.modified > 0 {
                parts.push(format!(
                    "{} matched, {} modified",
                    counters.matched, counters.modified
                ));
            }
            if counters.deleted > 0 {
                parts.push(format!("{} deleted", counters.deleted));
            }
            if let Some(name) = &counters.index_name {
                parts.push(format!("index {}", name));
            }
            if parts.is_empty() {
                "no changes".to_string()
            } else {
                parts.join(", ")
            }
        }
        Outcome::Reply(reply) => cell_text(reply),
    }
}

/// Shorten long statements for the operation column.
fn truncate(text: &str, max: usize) -> String {
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= max {
        return single_line;
    }
    let kept: String = single_line.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Render per-unit batch results.
pub fn results_table(results: &[OperationResult]) -> String {
    let mut table = new_table();
    table.set_header(vec!["#", "Operation", "Status", "Detail"]);
    for result in results {
        let (status, detail) = if result.success {
            (
                "ok",
                result.outcome.as_ref().map(outcome_summary).unwrap_or_default(),
            )
        } else {
            ("failed", result.error.clone().unwrap_or_default())
        };
        table.add_row(vec![
            (result.index + 1).to_string(),
            truncate(&result.operation, 60),
            status.to_string(),
            detail,
        ]);
    }
    table.to_string()
}

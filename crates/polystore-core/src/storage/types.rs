//! Core types shared by every storage engine.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::BatchMode;

/// One associative row: column name to value.
pub type Row = Map<String, Value>;

/// Result of `migrate_all` / `seed_all`, keyed by filename in execution order.
pub type BatchReport = BTreeMap<String, Vec<OperationResult>>;

/// Parameters substituted into a file before it is executed.
pub type FileParams = BTreeMap<String, String>;

/// Message recorded on units skipped after a failure in strict mode.
pub const SKIPPED_MESSAGE: &str = "skipped after an earlier failure";

/// Counters reported by document-store operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentCounters {
    pub inserted: u64,
    pub matched: u64,
    pub modified: u64,
    pub deleted: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upserted_id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
}

/// What a successful unit produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    /// Result set of a row-returning statement.
    Rows(Vec<Row>),
    /// Affected-row count of a modifying statement.
    Affected(u64),
    /// Document-store counters.
    Document(DocumentCounters),
    /// Native reply of a key-value command.
    Reply(Value),
}

/// Outcome of one statement or operation within a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationResult {
    /// Zero-based position in the batch.
    pub index: usize,
    /// Statement text or operation label.
    pub operation: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationResult {
    pub fn ok(index: usize, operation: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            index,
            operation: operation.into(),
            success: true,
            outcome: Some(outcome),
            error: None,
        }
    }

    pub fn failed(index: usize, operation: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            index,
            operation: operation.into(),
            success: false,
            outcome: None,
            error: Some(error.into()),
        }
    }

    pub fn skipped(index: usize, operation: impl Into<String>) -> Self {
        Self::failed(index, operation, SKIPPED_MESSAGE)
    }

    /// Affected-row count, if this unit reported one.
    pub fn affected(&self) -> Option<u64> {
        match self.outcome {
            Some(Outcome::Affected(count)) => Some(count),
            _ => None,
        }
    }

    /// Rows, if this unit returned a result set.
    pub fn rows(&self) -> Option<&[Row]> {
        match &self.outcome {
            Some(Outcome::Rows(rows)) => Some(rows),
            _ => None,
        }
    }
}

/// Tracks whether a batch should keep executing under its `BatchMode`.
#[derive(Debug, Clone, Copy)]
pub struct BatchGuard {
    mode: BatchMode,
    halted: bool,
}

impl BatchGuard {
    pub fn new(mode: BatchMode) -> Self {
        Self {
            mode,
            halted: false,
        }
    }

    /// True once a failure has been recorded in stop-on-error mode.
    pub fn halted(&self) -> bool {
        self.halted
    }

    /// Record a unit's result; returns it unchanged.
    pub fn record(&mut self, result: OperationResult) -> OperationResult {
        if !result.success && self.mode == BatchMode::StopOnError {
            self.halted = true;
        }
        result
    }
}

/// Count of failed units across a batch.
pub fn failure_count(results: &[OperationResult]) -> usize {
    results.iter().filter(|result| !result.success).count()
}

// Compile reporting for pipeline runs: per-pass timings and stream size
// changes, serializable for tooling that wants machine-readable output.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// One pass execution within a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassTiming {
    pub pass: String,
    pub micros: u64,
    pub changed: bool,
}

/// Summary of one pipeline run over a scope tree.
///
/// The id and timestamp are stored as strings so the report stays plain
/// JSON-friendly data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileReport {
    pub id: String,
    pub created_at: String,
    pub scope: String,
    pub passes: Vec<PassTiming>,
    pub instrs_before: usize,
    pub instrs_after: usize,
}

impl CompileReport {
    pub fn new(scope_name: &str, instrs_before: usize) -> CompileReport {
        CompileReport {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now().to_rfc3339(),
            scope: scope_name.to_string(),
            passes: Vec::new(),
            instrs_before,
            instrs_after: instrs_before,
        }
    }

    pub fn record_pass(&mut self, pass: &str, elapsed: Duration, changed: bool) {
        self.passes.push(PassTiming {
            pass: pass.to_string(),
            micros: elapsed.as_micros() as u64,
            changed,
        });
    }

    pub fn finish(&mut self, instrs_after: usize) {
        self.instrs_after = instrs_after;
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        let changed: Vec<&str> =
            self.passes.iter().filter(|p| p.changed).map(|p| p.pass.as_str()).collect();
        format!(
            "scope '{}': {} pass(es), {} -> {} instr(s), changed by [{}]",
            self.scope,
            self.passes.len(),
            self.instrs_before,
            self.instrs_after,
            changed.join(", ")
        )
    }
}

/// Renders a uniform severity line for any crate error.
pub fn error_report<E: crate::error::ReportableError>(error: &E) -> String {
    format!("TANAGER | {} | {} | {}", error.level(), error.issuer(), error.message())
}

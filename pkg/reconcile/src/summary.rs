use pkg_constants::exit::{EXIT_FATAL, EXIT_PARTIAL, EXIT_SUCCESS};
use serde::Serialize;

use crate::error::ReconcileError;
use crate::plan::{ExecutionResult, Outcome};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub applied: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Final disposition of a run: every processed resource plus the reason the
/// run was cut short, if it was.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub counts: Counts,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<ReconcileError>,
    pub results: Vec<ExecutionResult>,
}

pub fn summarize(results: Vec<ExecutionResult>, aborted: Option<ReconcileError>) -> Summary {
    let mut counts = Counts::default();
    for r in &results {
        match r.outcome {
            Outcome::Applied => counts.applied += 1,
            Outcome::Failed => counts.failed += 1,
            Outcome::Skipped => counts.skipped += 1,
        }
    }

    let degraded = results.iter().any(|r| match r.outcome {
        Outcome::Applied => false,
        Outcome::Failed => true,
        Outcome::Skipped => !r.error.as_ref().is_some_and(|e| e.is_benign_skip()),
    });
    let exit_code = if aborted.is_some() {
        EXIT_FATAL
    } else if degraded {
        EXIT_PARTIAL
    } else {
        EXIT_SUCCESS
    };

    Summary {
        counts,
        exit_code,
        aborted,
        results,
    }
}

impl Summary {
    pub fn failures(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results
            .iter()
            .filter(|r| r.outcome == Outcome::Failed)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results
            .iter()
            .filter(|r| r.outcome == Outcome::Skipped)
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == EXIT_SUCCESS
    }
}

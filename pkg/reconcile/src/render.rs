//! Text rendering of plans and summaries for stdout.

use std::fmt::Write;

use crate::plan::{ExecutionResult, Plan, PlanItem};
use crate::summary::Summary;

const UNSET: &str = "(unset)";

pub fn plan_text(plan: &Plan) -> String {
    let mut out = String::new();
    if plan.is_empty() {
        let _ = writeln!(
            out,
            "No quota changes needed. All resources match desired state."
        );
    } else {
        let _ = writeln!(out, "Execution plan: {} change(s)", plan.len());
        for item in plan.items() {
            let _ = writeln!(out);
            item_text(&mut out, item);
        }
    }

    if !plan.skipped.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Skipped during planning:");
        for r in &plan.skipped {
            result_line(&mut out, r);
        }
    }
    out
}

fn item_text(out: &mut String, item: &PlanItem) {
    let _ = writeln!(out, "{}", item.resource);
    let _ = writeln!(out, "  {:<20} {:<12} {}", "FIELD", "CURRENT", "DESIRED");
    for d in &item.deltas {
        let current = d
            .current
            .map(|v| v.format())
            .unwrap_or_else(|| UNSET.to_string());
        let _ = writeln!(
            out,
            "  {:<20} {:<12} {}",
            d.field.label(),
            current,
            d.desired.format()
        );
    }
}

fn result_line(out: &mut String, r: &ExecutionResult) {
    match &r.error {
        Some(err) => {
            let _ = writeln!(out, "  - {}: [{}] {}", r.target, err.kind(), err);
        }
        None => {
            let _ = writeln!(out, "  - {}", r.target);
        }
    }
}

pub fn summary_text(summary: &Summary) -> String {
    let mut out = String::new();
    let c = &summary.counts;
    let _ = writeln!(
        out,
        "Summary: {} applied, {} failed, {} skipped",
        c.applied, c.failed, c.skipped
    );

    let failures: Vec<&ExecutionResult> = summary.failures().collect();
    if !failures.is_empty() {
        let _ = writeln!(out, "Failures:");
        for r in failures {
            result_line(&mut out, r);
            let _ = writeln!(out, "    attempts: {}", r.attempts);
        }
    }

    let skipped: Vec<&ExecutionResult> = summary.skipped().collect();
    if !skipped.is_empty() {
        let _ = writeln!(out, "Skipped:");
        for r in skipped {
            result_line(&mut out, r);
        }
    }

    if let Some(err) = &summary.aborted {
        let _ = writeln!(out, "Aborted: [{}] {}", err.kind(), err);
    }
    out
}

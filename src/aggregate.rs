//! Merging per-run results into one batch verdict.

use crate::error::SpawnError;
use crate::protocol::{QuackersMarkers, TestResults};
use crate::runner::SpawnResult;
use std::time::Duration;
use thiserror::Error;

/// Everything one finished run contributes to the batch.
#[derive(Debug)]
pub struct RunRecord {
    /// Identity of the run in reports (e.g. the test project name).
    pub label: String,

    /// How the process ended.
    pub outcome: Result<SpawnResult, SpawnError>,

    /// What its Quackers stream said.
    pub tests: TestResults,

    /// Wall-clock duration of the run.
    pub duration: Duration,
}

/// Overall verdict of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    /// Every test passed.
    Passed,

    /// Nothing failed, but at least one test was skipped.
    Warning,

    /// At least one test failed.
    Failed,
}

/// The merged view over all runs of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub status: BatchStatus,

    /// `(label, duration)` per run, slowest first.
    pub slowest_first: Vec<(String, Duration)>,

    /// All failure details across runs, re-indexed and ready to print.
    pub failure_report: Vec<String>,

    /// All slow-test lines across runs, re-indexed and ready to print.
    pub slow_report: Vec<String>,
}

/// One failed run inside a [BatchError].
#[derive(Debug, Clone)]
pub struct FailedRun {
    pub label: String,
    pub exit_code: Option<i32>,
    pub stderr: Vec<String>,
}

/// The single aggregate error raised after a batch in which at least one
/// run failed. Enumerates every failing run so a batch never dies silently
/// or uninformatively.
#[derive(Debug, Error)]
#[error("{}", format_failed_runs(.runs))]
pub struct BatchError {
    pub runs: Vec<FailedRun>,
}

fn format_failed_runs(runs: &[FailedRun]) -> String {
    let mut out = format!("{} test run(s) failed:", runs.len());
    for run in runs {
        out.push_str("\n- ");
        out.push_str(&run.label);
        match run.exit_code {
            Some(code) => out.push_str(&format!(" (exit code {code})")),
            None => out.push_str(" (no exit code)"),
        }
        if run.stderr.is_empty() {
            out.push_str(": no stderr was captured for this run");
        } else {
            for line in &run.stderr {
                out.push_str("\n    ");
                out.push_str(line);
            }
        }
    }
    out
}

/// Merge all per-run records into one [BatchSummary].
///
/// Counters add up additively; durations are ordered slowest first; the
/// failure and slow sections are concatenated across runs in record order,
/// index placeholders substituted with 1-based sequence numbers, and runs
/// of more than one blank line collapsed to one.
pub fn aggregate(records: &[RunRecord], markers: &QuackersMarkers) -> BatchSummary {
    let mut totals = TestResults::new();
    for record in records {
        totals.absorb(&record.tests);
    }

    let mut slowest_first: Vec<(String, Duration)> = records
        .iter()
        .map(|record| (record.label.clone(), record.duration))
        .collect();
    slowest_first.sort_by(|a, b| b.1.cmp(&a.1));

    let status = if totals.failed > 0 {
        BatchStatus::Failed
    } else if totals.skipped > 0 {
        BatchStatus::Warning
    } else {
        BatchStatus::Passed
    };

    tracing::debug!(
        passed = totals.passed,
        failed = totals.failed,
        skipped = totals.skipped,
        runs = records.len(),
        ?status,
        "aggregated batch results"
    );

    BatchSummary {
        passed: totals.passed,
        failed: totals.failed,
        skipped: totals.skipped,
        status,
        slowest_first,
        failure_report: render_section(
            &totals.failure_summary,
            markers.failure_index_placeholder.as_ref(),
        ),
        slow_report: render_section(
            &totals.slow_summary,
            markers.slow_index_placeholder.as_ref(),
        ),
    }
}

/// Substitute the index placeholder with 1-based sequence numbers and
/// collapse runs of blank lines.
fn render_section(lines: &[String], placeholder: &str) -> Vec<String> {
    let mut rendered = Vec::with_capacity(lines.len());
    let mut index = 0usize;
    let mut previous_blank = false;
    for line in lines {
        let blank = line.trim().is_empty();
        if blank && previous_blank {
            continue;
        }
        previous_blank = blank;
        if line.contains(placeholder) {
            index += 1;
            rendered.push(line.replace(placeholder, &index.to_string()));
        } else {
            rendered.push(line.clone());
        }
    }
    rendered
}

/// The aggregate error for a finished batch, if any run failed.
///
/// Collection never aborts early: this is only meaningful once every run
/// in `records` has resolved.
pub fn batch_error(records: &[RunRecord]) -> Option<BatchError> {
    let runs: Vec<FailedRun> = records
        .iter()
        .filter_map(|record| match &record.outcome {
            Ok(_) => None,
            Err(err) => Some(FailedRun {
                label: record.label.clone(),
                exit_code: err.exit_code,
                stderr: err.stderr.clone().unwrap_or_default(),
            }),
        })
        .collect();
    if runs.is_empty() {
        None
    } else {
        Some(BatchError { runs })
    }
}

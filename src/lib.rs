//! Run external processes from an automation engine, reassemble their
//! output into lines regardless of chunk boundaries, execute many
//! invocations concurrently under a bounded worker limit, and decode the
//! Quackers line-oriented test-log protocol into structured results.
//!
//! The pieces compose leaf to root: a [LineBuffer] per stream feeds
//! collected lines to [ProcessRunner], [run_bounded] schedules many runner
//! invocations with at most K in flight, each run's stdout feeds its own
//! [QuackersParser], and [aggregate] merges every run's outcome into one
//! batch verdict with a single [BatchError] naming all failed runs.

mod aggregate;
mod command;
mod error;
mod line_buffer;
mod pool;
mod protocol;
mod resolve;
mod runner;
mod signal;
mod sink;

pub use aggregate::{
    BatchError, BatchStatus, BatchSummary, FailedRun, RunRecord, aggregate, batch_error,
};
pub use command::{Command, DEFAULT_SILENT_FAILURE_MARKER, StdioMode};
pub use error::{FailureKind, SPAWN_FAILURE_EXIT_CODE, SpawnError};
pub use line_buffer::LineBuffer;
pub use pool::run_bounded;
pub use protocol::{QuackersMarkers, QuackersParser, TestResults};
pub use resolve::{Resolver, WrappedScript, quote, unquote, wrap_in_script};
pub use runner::{KillHandle, ProcessRunner, RunningInvocation, SpawnResult};
pub use sink::{FnSink, LineSink, NullSink, StderrSink, StdoutSink, VecSink};

#[cfg(test)]
mod test {
    use crate::sink::NullSink;
    use crate::{
        BatchStatus, Command, ProcessRunner, QuackersMarkers, QuackersParser, RunRecord,
        aggregate, batch_error, run_bounded,
    };
    use assertr::prelude::*;
    use std::sync::Arc;
    use std::time::Instant;

    /// One thunk per (label, shell script) pair; each run owns its parser.
    async fn run_batch(cases: Vec<(&str, &str)>, concurrency: usize) -> Vec<RunRecord> {
        let runner = Arc::new(ProcessRunner::new());
        let markers = QuackersMarkers::default();
        let thunks: Vec<_> = cases
            .into_iter()
            .map(|(label, script)| {
                let runner = Arc::clone(&runner);
                let markers = markers.clone();
                let label = label.to_owned();
                let script = script.to_owned();
                move || async move {
                    let started = Instant::now();
                    let mut parser = QuackersParser::with_console(markers.clone(), NullSink);
                    let command = markers.apply_to(
                        Command::new("sh")
                            .args(["-c", &script])
                            .suppress_output(true),
                    );
                    let outcome = runner.execute(command).await;
                    let stdout = match &outcome {
                        Ok(result) => result.stdout.clone(),
                        Err(err) => err.stdout.clone().unwrap_or_default(),
                    };
                    for line in &stdout {
                        parser.feed(line);
                    }
                    RunRecord {
                        label,
                        outcome,
                        tests: parser.into_results(),
                        duration: started.elapsed(),
                    }
                }
            })
            .collect();
        run_bounded(concurrency, thunks).await
    }

    #[tokio::test]
    async fn batch_of_quackers_children_aggregates_into_one_verdict() {
        let passing = "printf '%s\\n' '::SS::' '::TS::' 'Passed: 3' '::TC::' '::SC::'";
        let failing = "printf '%s\\n' '::SS::' '::TS::' 'Passed: 1' 'Failed: 1' '::TC::' \
                       '::SF::' '::[#]::) Flaky.Test failed' '::SC::'; exit 1";

        let records = run_batch(
            vec![("Project.Good", passing), ("Project.Bad", failing)],
            2,
        )
        .await;

        let summary = aggregate(&records, &QuackersMarkers::default());
        assert_that(summary.passed).is_equal_to(4);
        assert_that(summary.failed).is_equal_to(1);
        assert_that(summary.status).is_equal_to(BatchStatus::Failed);
        assert_that(summary.failure_report).contains_exactly(&["1) Flaky.Test failed"]);

        let err = batch_error(&records).expect("the failed run must surface");
        let message = err.to_string();
        assert_that(message.as_str()).contains("Project.Bad");
        assert_that(!message.contains("Project.Good")).is_true();
    }

    #[tokio::test]
    async fn all_green_batch_raises_no_error() {
        let passing = "printf '%s\\n' '::SS::' '::TS::' 'Passed: 2' '::TC::' '::SC::'";

        let records = run_batch(
            vec![("Project.One", passing), ("Project.Two", passing)],
            1,
        )
        .await;

        let summary = aggregate(&records, &QuackersMarkers::default());
        assert_that(summary.passed).is_equal_to(4);
        assert_that(summary.status).is_equal_to(BatchStatus::Passed);
        assert_that(batch_error(&records).is_none()).is_true();
    }
}

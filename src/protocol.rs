//! Decoding of the Quackers line-oriented test-log protocol.
//!
//! Quackers-aware test children interleave structured marker lines with
//! their free-form console output. One [QuackersParser] per invocation
//! walks those lines and accumulates a [TestResults]; because every parser
//! owns its state outright, lines from logically concurrent runs can never
//! corrupt each other no matter how they interleave on the host console.

use crate::command::Command;
use crate::sink::{LineSink, StdoutSink};
use std::borrow::Cow;
use std::time::Instant;

/// The literal grammar of one Quackers conversation.
///
/// All protocol lines start with `log_prefix`; the marker fields are the
/// complete literal lines that open and close each region. The same
/// literals are exported to the child process as `QUACKERS_*` environment
/// variables (see [QuackersMarkers::env]), so both sides agree on the
/// exact grammar per invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuackersMarkers {
    pub log_prefix: Cow<'static, str>,
    pub summary_start: Cow<'static, str>,
    pub summary_complete: Cow<'static, str>,
    pub failure_start: Cow<'static, str>,
    pub slow_summary_start: Cow<'static, str>,
    pub slow_summary_complete: Cow<'static, str>,
    pub totals_start: Cow<'static, str>,
    pub totals_complete: Cow<'static, str>,

    /// Token the child embeds where a 1-based failure index belongs.
    /// Substituted at presentation time by the aggregator, not here.
    pub failure_index_placeholder: Cow<'static, str>,

    /// Token the child embeds where a 1-based slow-test index belongs.
    pub slow_index_placeholder: Cow<'static, str>,
}

impl Default for QuackersMarkers {
    fn default() -> Self {
        Self {
            log_prefix: Cow::Borrowed("::"),
            summary_start: Cow::Borrowed("::SS::"),
            summary_complete: Cow::Borrowed("::SC::"),
            failure_start: Cow::Borrowed("::SF::"),
            slow_summary_start: Cow::Borrowed("::SUS::"),
            slow_summary_complete: Cow::Borrowed("::SUC::"),
            totals_start: Cow::Borrowed("::TS::"),
            totals_complete: Cow::Borrowed("::TC::"),
            failure_index_placeholder: Cow::Borrowed("::[#]::"),
            slow_index_placeholder: Cow::Borrowed("::{#}::"),
        }
    }
}

impl QuackersMarkers {
    /// The environment variables a Quackers-aware child reads to learn the
    /// grammar for this invocation.
    pub fn env(&self) -> Vec<(String, String)> {
        [
            ("QUACKERS_LOG_PREFIX", &self.log_prefix),
            ("QUACKERS_SUMMARY_START_MARKER", &self.summary_start),
            ("QUACKERS_SUMMARY_COMPLETE_MARKER", &self.summary_complete),
            ("QUACKERS_FAILURE_START_MARKER", &self.failure_start),
            ("QUACKERS_SLOW_SUMMARY_START_MARKER", &self.slow_summary_start),
            (
                "QUACKERS_SLOW_SUMMARY_COMPLETE_MARKER",
                &self.slow_summary_complete,
            ),
            ("QUACKERS_TOTALS_START_MARKER", &self.totals_start),
            ("QUACKERS_TOTALS_COMPLETE_MARKER", &self.totals_complete),
            (
                "QUACKERS_FAILURE_INDEX_PLACEHOLDER",
                &self.failure_index_placeholder,
            ),
            ("QUACKERS_SLOW_INDEX_PLACEHOLDER", &self.slow_index_placeholder),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value.to_string()))
        .collect()
    }

    /// Attach the grammar to `command` so the spawned child emits exactly
    /// these literals.
    pub fn apply_to(&self, command: Command) -> Command {
        command.envs(self.env())
    }
}

/// Structured results of one test invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResults {
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,

    /// Failure detail lines, verbatim and in arrival order. Index
    /// placeholders are left untouched for the aggregator to substitute.
    pub failure_summary: Vec<String>,

    /// Slow-test report lines, verbatim and in arrival order.
    pub slow_summary: Vec<String>,

    /// When this run started.
    pub started: Instant,

    /// Whether any protocol marker was seen at all. A run against a child
    /// that does not speak Quackers keeps this `false`.
    pub protocol_observed: bool,
}

impl TestResults {
    pub fn new() -> Self {
        Self {
            passed: 0,
            failed: 0,
            skipped: 0,
            failure_summary: Vec::new(),
            slow_summary: Vec::new(),
            started: Instant::now(),
            protocol_observed: false,
        }
    }

    /// Merge `other` into `self` additively. Nothing is overwritten:
    /// counters add up, detail lines append in order, and the start
    /// timestamp keeps the earlier of the two.
    pub fn absorb(&mut self, other: &TestResults) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.failure_summary
            .extend(other.failure_summary.iter().cloned());
        self.slow_summary.extend(other.slow_summary.iter().cloned());
        self.started = self.started.min(other.started);
        self.protocol_observed |= other.protocol_observed;
    }
}

impl Default for TestResults {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Outside,
    Neutral,
    InFailureList,
    InSlowList,
    InTotals,
}

/// Per-invocation state machine over Quackers marker lines.
///
/// Owns all of its state; never share one instance between runs. Malformed
/// or out-of-order markers are absorbed by staying in the current region:
/// a log bug in one producer must not be able to kill a live parallel test
/// run, so this parser never panics and never returns an error.
pub struct QuackersParser {
    markers: QuackersMarkers,
    region: Region,
    results: TestResults,
    raw_log: Vec<String>,
    console: Box<dyn LineSink>,
}

impl QuackersParser {
    /// A parser echoing non-protocol output to the host's stdout.
    pub fn new(markers: QuackersMarkers) -> Self {
        Self::with_console(markers, StdoutSink)
    }

    /// A parser echoing non-protocol output to `console`.
    pub fn with_console(markers: QuackersMarkers, console: impl LineSink + 'static) -> Self {
        Self {
            markers,
            region: Region::Outside,
            results: TestResults::new(),
            raw_log: Vec::new(),
            console: Box::new(console),
        }
    }

    /// Feed a chunk of output. Multi-line text is split on embedded
    /// newlines and each physical line replays through the same transition,
    /// in order. An empty chunk replays as one blank line.
    pub fn feed(&mut self, text: &str) {
        if text.is_empty() {
            self.transition("");
            return;
        }
        for line in text.lines() {
            self.transition(line);
        }
    }

    pub fn results(&self) -> &TestResults {
        &self.results
    }

    pub fn into_results(self) -> TestResults {
        self.results
    }

    /// Every line this parser has seen, for post-mortem reporting.
    pub fn raw_log(&self) -> &[String] {
        &self.raw_log
    }

    fn transition(&mut self, line: &str) {
        self.raw_log.push(line.to_owned());

        if line == self.markers.summary_start {
            if self.region == Region::Outside {
                self.region = Region::Neutral;
            } else {
                tracing::warn!(line, "summary-start while already in a summary, absorbed");
            }
            self.results.protocol_observed = true;
            return;
        }
        // Any state + summary-complete closes the summary, including an
        // unterminated failure list.
        if line == self.markers.summary_complete {
            self.region = Region::Outside;
            return;
        }

        match self.region {
            Region::Outside => {
                // Pre-protocol boilerplate stays out of interleaved
                // parallel logs; echo only once the protocol showed up.
                if self.results.protocol_observed {
                    self.console.write(line);
                }
            }
            Region::Neutral => {
                if line == self.markers.totals_start {
                    self.region = Region::InTotals;
                } else if line == self.markers.failure_start {
                    self.region = Region::InFailureList;
                } else if line == self.markers.slow_summary_start {
                    self.region = Region::InSlowList;
                } else if line == self.markers.totals_complete
                    || line == self.markers.slow_summary_complete
                {
                    tracing::warn!(line, "region-complete marker outside its region, absorbed");
                }
            }
            Region::InTotals => {
                if line == self.markers.totals_complete {
                    self.region = Region::Neutral;
                } else {
                    self.record_total(line);
                }
            }
            // The failure list has no end marker of its own; it runs
            // until summary-complete. Lines are kept verbatim: the index
            // placeholders they carry are substituted at render time.
            Region::InFailureList => {
                self.results.failure_summary.push(line.to_owned());
            }
            Region::InSlowList => {
                if line == self.markers.slow_summary_complete {
                    self.region = Region::Neutral;
                } else {
                    self.results.slow_summary.push(line.to_owned());
                }
            }
        }
    }

    fn strip_prefix<'l>(&self, line: &'l str) -> &'l str {
        line.strip_prefix(self.markers.log_prefix.as_ref())
            .unwrap_or(line)
    }

    /// Totals lines look like `<label>: <count>`. Unrecognized labels and
    /// unparseable counts are ignored.
    fn record_total(&mut self, line: &str) {
        let content = self.strip_prefix(line);
        let Some((label, count)) = content.split_once(':') else {
            return;
        };
        let Ok(count) = count.trim().parse::<u64>() else {
            return;
        };
        match label.trim().to_lowercase().as_str() {
            "passed" => self.results.passed += count,
            "failed" => self.results.failed += count,
            "skipped" => self.results.skipped += count,
            other => {
                tracing::debug!(label = other, "ignoring unrecognized totals label");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::VecSink;
    use assertr::prelude::*;
    use tracing_test::traced_test;

    fn parser() -> QuackersParser {
        QuackersParser::with_console(QuackersMarkers::default(), VecSink::new())
    }

    fn feed_all(parser: &mut QuackersParser, lines: &[&str]) {
        for line in lines {
            parser.feed(line);
        }
    }

    #[test]
    fn full_summary_yields_structured_results() {
        let mut p = parser();
        feed_all(
            &mut p,
            &[
                "::SS::",
                "::TS::",
                "Passed: 3",
                "Failed: 1",
                "Skipped: 0",
                "::TC::",
                "::SF::",
                "Some.Test.Failed: expected 1 but got 2",
                "::SC::",
            ],
        );

        let results = p.into_results();
        assert_that(results.passed).is_equal_to(3);
        assert_that(results.failed).is_equal_to(1);
        assert_that(results.skipped).is_equal_to(0);
        assert_that(results.failure_summary)
            .contains_exactly(&["Some.Test.Failed: expected 1 but got 2"]);
        assert_that(results.protocol_observed).is_true();
    }

    #[test]
    fn slow_list_collects_until_its_complete_marker() {
        let mut p = parser();
        feed_all(
            &mut p,
            &[
                "::SS::",
                "::SUS::",
                "Slow.Test.One  2300ms",
                "Slow.Test.Two  1800ms",
                "::SUC::",
                "::SC::",
            ],
        );

        let results = p.into_results();
        assert_that(results.slow_summary)
            .contains_exactly(&["Slow.Test.One  2300ms", "Slow.Test.Two  1800ms"]);
    }

    #[test]
    fn failure_lines_are_kept_verbatim_including_index_placeholders() {
        let mut p = parser();
        feed_all(
            &mut p,
            &[
                "::SS::",
                "::SUS::",
                "::{#}:: Slow.Test  2300ms",
                "::SUC::",
                "::SF::",
                "::[#]::) Flaky.Test failed",
                "::SC::",
            ],
        );

        let results = p.into_results();
        assert_that(results.failure_summary).contains_exactly(&["::[#]::) Flaky.Test failed"]);
        assert_that(results.slow_summary).contains_exactly(&["::{#}:: Slow.Test  2300ms"]);
    }

    #[test]
    fn blank_lines_inside_a_failure_region_are_preserved() {
        let mut p = parser();
        feed_all(
            &mut p,
            &["::SS::", "::SF::", "detail one", "", "detail two", "::SC::"],
        );

        assert_that(p.results().failure_summary.clone())
            .contains_exactly(&["detail one", "", "detail two"]);
    }

    #[test]
    fn prefixed_content_lines_have_the_prefix_stripped() {
        let mut p = parser();
        feed_all(
            &mut p,
            &["::SS::", "::TS::", "::Passed: 7", "::TC::", "::SC::"],
        );
        assert_that(p.results().passed).is_equal_to(7);
    }

    #[test]
    fn unrecognized_totals_labels_and_garbage_counts_are_ignored() {
        let mut p = parser();
        feed_all(
            &mut p,
            &[
                "::SS::",
                "::TS::",
                "Passed: 2",
                "Elapsed: 12s",
                "Failed: not-a-number",
                "no separator here",
                "::TC::",
                "::SC::",
            ],
        );

        let results = p.into_results();
        assert_that(results.passed).is_equal_to(2);
        assert_that(results.failed).is_equal_to(0);
    }

    #[test]
    fn multi_line_chunks_replay_line_by_line() {
        let mut chunked = parser();
        chunked.feed("::SS::\n::TS::\nPassed: 4\n::TC::\n::SC::\n");

        let mut line_by_line = parser();
        feed_all(
            &mut line_by_line,
            &["::SS::", "::TS::", "Passed: 4", "::TC::", "::SC::"],
        );

        assert_that(chunked.into_results()).is_equal_to(line_by_line.into_results());
    }

    #[test]
    #[traced_test]
    fn malformed_marker_ordering_is_absorbed_without_panicking() {
        let mut p = parser();
        feed_all(
            &mut p,
            &[
                "::TC::",  // complete before any start
                "::SUC::", // ditto
                "::SS::",
                "::SS::", // duplicate start
                "::SUC::",
                "::TS::",
                "Passed: 1",
                "::TC::",
                "::SC::",
                "::SC::", // duplicate complete
            ],
        );

        let results = p.into_results();
        assert_that(results.passed).is_equal_to(1);
        assert_that(results.protocol_observed).is_true();
    }

    #[test]
    fn outside_lines_are_suppressed_until_the_protocol_appears() {
        let console = VecSink::new();
        let mut p = QuackersParser::with_console(QuackersMarkers::default(), console.clone());
        feed_all(
            &mut p,
            &[
                "Determining projects to restore...",
                "Restored MyProject.csproj",
                "::SS::",
                "::SC::",
                "plain output after the summary",
            ],
        );

        assert_that(console.lines()).contains_exactly(&["plain output after the summary"]);
    }

    #[test]
    fn two_interleaved_runs_parse_identically_to_sequential_runs() {
        let run_a = [
            "::SS::",
            "::TS::",
            "Passed: 2",
            "Failed: 1",
            "::TC::",
            "::SF::",
            "A.Test: boom",
            "::SC::",
        ];
        let run_b = [
            "::SS::",
            "::TS::",
            "Passed: 5",
            "Skipped: 2",
            "::TC::",
            "::SC::",
        ];

        let mut sequential_a = parser();
        feed_all(&mut sequential_a, &run_a);
        let mut sequential_b = parser();
        feed_all(&mut sequential_b, &run_b);

        // Interleave: each line still routed to its own parser by run
        // identity, mimicking two concurrent children on one console.
        let mut interleaved_a = parser();
        let mut interleaved_b = parser();
        let mut a = run_a.iter();
        let mut b = run_b.iter();
        loop {
            match (a.next(), b.next()) {
                (None, None) => break,
                (line_a, line_b) => {
                    if let Some(line) = line_a {
                        interleaved_a.feed(line);
                    }
                    if let Some(line) = line_b {
                        interleaved_b.feed(line);
                    }
                }
            }
        }

        assert_that(interleaved_a.into_results()).is_equal_to(sequential_a.into_results());
        assert_that(interleaved_b.into_results()).is_equal_to(sequential_b.into_results());
    }

    #[test]
    fn absorb_merges_additively() {
        let mut base = TestResults::new();
        base.passed = 1;
        base.failure_summary.push("first".to_owned());

        let mut other = TestResults::new();
        other.passed = 2;
        other.failed = 3;
        other.failure_summary.push("second".to_owned());
        other.protocol_observed = true;

        base.absorb(&other);
        assert_that(base.passed).is_equal_to(3);
        assert_that(base.failed).is_equal_to(3);
        assert_that(base.failure_summary).contains_exactly(&["first", "second"]);
        assert_that(base.protocol_observed).is_true();
    }

    #[test]
    fn env_exports_the_complete_grammar() {
        let env = QuackersMarkers::default().env();
        let keys: Vec<_> = env.iter().map(|(key, _)| key.as_str()).collect();
        for expected in [
            "QUACKERS_LOG_PREFIX",
            "QUACKERS_SUMMARY_START_MARKER",
            "QUACKERS_SUMMARY_COMPLETE_MARKER",
            "QUACKERS_FAILURE_START_MARKER",
            "QUACKERS_SLOW_SUMMARY_START_MARKER",
            "QUACKERS_SLOW_SUMMARY_COMPLETE_MARKER",
            "QUACKERS_TOTALS_START_MARKER",
            "QUACKERS_TOTALS_COMPLETE_MARKER",
            "QUACKERS_FAILURE_INDEX_PLACEHOLDER",
            "QUACKERS_SLOW_INDEX_PLACEHOLDER",
        ] {
            assert_that(keys.contains(&expected))
                .with_detail_message(format!("missing {expected}"))
                .is_true();
        }
    }
}

//! Error types for process execution.

use std::borrow::Cow;
use std::io;
use thiserror::Error;

/// Exit code reported when the process could never be created, so no real
/// exit code exists.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = -1;

/// Why a process invocation is considered failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The OS could not create the process (bad executable, permissions).
    SpawnFailure,

    /// The process ran and terminated unsuccessfully (non-zero exit code,
    /// killed by a signal, timed out or cancelled).
    ExitFailure,

    /// The process exited with code zero, but its stdout contained the
    /// configured silent-failure marker. Some runtimes under test swallow
    /// unhandled exceptions at the process boundary; this catches them.
    SilentException,
}

/// A failed process invocation.
///
/// Carries the same identity and captured output as [crate::SpawnResult],
/// plus a message and a [FailureKind] classification. Whether output was
/// captured depends on [crate::Command::suppress_stdio_on_error]: callers
/// that only want the failure signal get `None` for both streams.
#[derive(Debug, Error)]
#[error("process '{label}' failed: {message}")]
pub struct SpawnError {
    /// Display label of the invocation (program plus quoted arguments).
    pub label: Cow<'static, str>,

    /// The resolved program that was (or should have been) executed.
    pub program: String,

    /// The argument vector handed to the process.
    pub args: Vec<String>,

    /// Classification of the failure.
    pub kind: FailureKind,

    /// Exit code, if one was observed. [SPAWN_FAILURE_EXIT_CODE] when the
    /// process never existed; `None` when the process died to a signal.
    pub exit_code: Option<i32>,

    /// Captured stdout lines, unless stdio capture was suppressed for error
    /// reports or the process never spawned.
    pub stdout: Option<Vec<String>>,

    /// Captured stderr lines, with the same caveats as `stdout`.
    pub stderr: Option<Vec<String>>,

    /// Human-readable failure description.
    pub message: String,

    /// The underlying IO error, when the OS reported one.
    #[source]
    pub source: Option<io::Error>,
}

impl SpawnError {
    pub(crate) fn spawn_failed(
        label: impl Into<Cow<'static, str>>,
        program: impl Into<String>,
        args: Vec<String>,
        source: io::Error,
    ) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args,
            kind: FailureKind::SpawnFailure,
            exit_code: Some(SPAWN_FAILURE_EXIT_CODE),
            stdout: None,
            stderr: None,
            message: format!("could not spawn process: {source}"),
            source: Some(source),
        }
    }
}

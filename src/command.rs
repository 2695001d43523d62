//! The immutable description of one process invocation.

use crate::resolve::quote;
use crate::sink::LineSink;
use std::borrow::Cow;
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;
use std::time::Duration;

/// Marker matched (case-insensitively) against stdout lines of a process
/// that exited with code zero. A hit turns the "success" into a failure.
pub const DEFAULT_SILENT_FAILURE_MARKER: &str = "unhandled exception";

/// How the child's stdio is wired up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdioMode {
    /// Capture stdout/stderr through pipes; stdin is closed. The default.
    #[default]
    Piped,

    /// Hand the caller's terminal straight to the child. Nothing is
    /// captured; use this for commands that prompt the user.
    Interactive,
}

/// Everything needed to run one external process.
///
/// Built once, consumed by [crate::ProcessRunner::execute]; nothing mutates
/// it after construction. Builder methods follow the usual consuming style:
///
/// ```no_run
/// use quackrun::Command;
/// use std::time::Duration;
///
/// let cmd = Command::new("dotnet")
///     .arg("test")
///     .arg("MyProject.csproj")
///     .timeout(Duration::from_secs(600))
///     .suppress_output(true);
/// ```
pub struct Command {
    pub(crate) program: String,
    pub(crate) args: Vec<String>,
    pub(crate) current_dir: Option<PathBuf>,
    pub(crate) envs: Vec<(String, String)>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) stdio: StdioMode,
    pub(crate) suppress_output: bool,
    pub(crate) suppress_stdio_on_error: bool,
    pub(crate) silent_failure_marker: Option<Cow<'static, str>>,
    pub(crate) stdout_sink: Option<Box<dyn LineSink>>,
    pub(crate) stderr_sink: Option<Box<dyn LineSink>>,
}

impl Command {
    /// A new command for `program`, inheriting the parent environment,
    /// capturing stdio and using the default silent-failure marker.
    ///
    /// `program` may also be a full shell command line: if it resolves to
    /// nothing on PATH and no separate arguments were given, the runner
    /// wraps it into a temporary platform script instead of failing.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
            timeout: None,
            stdio: StdioMode::default(),
            suppress_output: false,
            suppress_stdio_on_error: false,
            silent_failure_marker: Some(Cow::Borrowed(DEFAULT_SILENT_FAILURE_MARKER)),
            stdout_sink: None,
            stderr_sink: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn envs<I, K, V>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.envs
            .extend(envs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Forcefully terminate the child when it runs longer than `timeout`.
    /// The result is reported like any other failure.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn stdio(mut self, mode: StdioMode) -> Self {
        self.stdio = mode;
        self
    }

    /// Capture output but do not echo it anywhere.
    pub fn suppress_output(mut self, suppress: bool) -> Self {
        self.suppress_output = suppress;
        self
    }

    /// Strip captured stdio from error reports. The error still names the
    /// invocation and carries the exit code.
    pub fn suppress_stdio_on_error(mut self, suppress: bool) -> Self {
        self.suppress_stdio_on_error = suppress;
        self
    }

    /// Override (or with `None`, disable) the silent-failure marker matched
    /// against stdout when the exit code is zero. The match is a
    /// case-insensitive substring check; which phrase means "an exception
    /// was swallowed" is runtime-specific, so it is configurable per
    /// invocation.
    pub fn silent_failure_marker(
        mut self,
        marker: Option<impl Into<Cow<'static, str>>>,
    ) -> Self {
        self.silent_failure_marker = marker.map(Into::into);
        self
    }

    /// Echo captured stdout lines to `sink` instead of the host's stdout.
    pub fn stdout_sink(mut self, sink: impl LineSink + 'static) -> Self {
        self.stdout_sink = Some(Box::new(sink));
        self
    }

    /// Echo captured stderr lines to `sink` instead of the host's stderr.
    pub fn stderr_sink(mut self, sink: impl LineSink + 'static) -> Self {
        self.stderr_sink = Some(Box::new(sink));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Display label: the program followed by its arguments, each quoted
    /// when it contains whitespace or shell-special characters.
    pub fn label(&self) -> String {
        let mut label = self.program.clone();
        for arg in &self.args {
            label.push(' ');
            label.push_str(quote(arg).as_ref());
        }
        label
    }
}

impl Debug for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("current_dir", &self.current_dir)
            .field("envs", &self.envs)
            .field("timeout", &self.timeout)
            .field("stdio", &self.stdio)
            .field("suppress_output", &self.suppress_output)
            .field("suppress_stdio_on_error", &self.suppress_stdio_on_error)
            .field("silent_failure_marker", &self.silent_failure_marker)
            .field("stdout_sink", &self.stdout_sink.as_ref().map(|_| "<sink>"))
            .field("stderr_sink", &self.stderr_sink.as_ref().map(|_| "<sink>"))
            .finish()
    }
}

//! Spawning a single process and turning its lifetime into a structured
//! success or failure value.

use crate::command::{Command, StdioMode};
use crate::error::{FailureKind, SPAWN_FAILURE_EXIT_CODE, SpawnError};
use crate::line_buffer::LineBuffer;
use crate::resolve::{Resolver, wrap_in_script};
use crate::signal;
use crate::sink::{LineSink, StderrSink, StdoutSink};
use bytes::BytesMut;
use std::borrow::Cow;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

const READ_BUFFER_SIZE: usize = 32 * 1024;
const CHUNK_SIZE: usize = 16 * 1024;

/// How long a cancelled or timed-out child gets to react to the interrupt
/// signal before it is forcefully killed.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// A successfully completed process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnResult {
    /// Display label of the invocation (program plus quoted arguments).
    pub label: String,

    /// The program that was executed.
    pub program: String,

    /// The argument vector handed to the process.
    pub args: Vec<String>,

    /// The observed exit code. `None` when the process died to a signal.
    pub exit_code: Option<i32>,

    /// All stdout lines, in arrival order.
    pub stdout: Vec<String>,

    /// All stderr lines, in arrival order.
    pub stderr: Vec<String>,
}

/// Cancels one specific invocation.
///
/// Cloneable so it can be handed to whatever decides to abort the run. It
/// signals only its own child and has no effect on sibling invocations.
#[derive(Debug, Clone)]
pub struct KillHandle {
    signal: Arc<Notify>,
}

impl KillHandle {
    fn new() -> Self {
        Self {
            signal: Arc::new(Notify::new()),
        }
    }

    /// Ask the invocation to stop. The child is interrupted first and
    /// killed if it does not exit within a short grace period; its pipes
    /// close with it. Calling this more than once is harmless.
    pub fn kill(&self) {
        self.signal.notify_one();
    }
}

/// Executes external processes and classifies how they ended.
#[derive(Debug, Default)]
pub struct ProcessRunner {
    resolver: Resolver,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `command` to completion.
    ///
    /// `Ok` carries the exit code and both stdio streams as ordered line
    /// vectors. `Err` is one of three failures: the process could not be
    /// created, it terminated unsuccessfully, or it exited zero while its
    /// stdout contained the configured silent-failure marker. The
    /// `Result` itself is the success/failure tag; no structural
    /// inspection needed.
    pub async fn execute(&self, command: Command) -> Result<SpawnResult, SpawnError> {
        self.spawn(command).await?.wait().await
    }

    /// Spawn `command` without waiting, for callers that need the
    /// [KillHandle] before awaiting completion.
    pub async fn spawn(&self, command: Command) -> Result<RunningInvocation, SpawnError> {
        let label = command.label();
        let Command {
            program,
            args,
            current_dir,
            envs,
            timeout,
            stdio,
            suppress_output,
            suppress_stdio_on_error,
            silent_failure_marker,
            stdout_sink,
            stderr_sink,
        } = command;

        let mut script: Option<TempPath> = None;
        let (exec_program, exec_args) = match self.resolver.resolve(&program).await {
            Some(path) => (path, args.clone()),
            // A bare shell command line: no argument vector, nothing on
            // PATH. Hand it to the platform shell via a temp script.
            None if args.is_empty() && program.contains(char::is_whitespace) => {
                let wrapped = wrap_in_script(&program).map_err(|source| {
                    SpawnError::spawn_failed(label.clone(), program.clone(), args.clone(), source)
                })?;
                tracing::debug!(process = %label, script = %wrapped.script.display(), "wrapped bare command line into script");
                script = Some(wrapped.script);
                (PathBuf::from(wrapped.program), wrapped.args)
            }
            None => (PathBuf::from(&program), args.clone()),
        };

        let mut cmd = tokio::process::Command::new(&exec_program);
        cmd.args(&exec_args);
        if let Some(dir) = current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &envs {
            cmd.env(key, value);
        }
        cmd.kill_on_drop(true);
        match stdio {
            StdioMode::Piped => {
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
            }
            StdioMode::Interactive => {
                cmd.stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit());
            }
        }

        let mut child = cmd.spawn().map_err(|source| {
            SpawnError::spawn_failed(label.clone(), program.clone(), args.clone(), source)
        })?;
        tracing::debug!(process = %label, id = child.id(), "spawned");

        let stdout_task = child.stdout.take().map(|out| {
            let echo = echo_sink(suppress_output, stdout_sink, || Box::new(StdoutSink));
            tokio::spawn(drain_lines(out, echo))
        });
        let stderr_task = child.stderr.take().map(|err| {
            let echo = echo_sink(suppress_output, stderr_sink, || Box::new(StderrSink));
            tokio::spawn(drain_lines(err, echo))
        });

        Ok(RunningInvocation {
            label,
            program,
            args,
            child,
            kill: KillHandle::new(),
            stdout_task,
            stderr_task,
            timeout,
            suppress_stdio_on_error,
            silent_failure_marker,
            _script: script,
        })
    }
}

fn echo_sink(
    suppress_output: bool,
    custom: Option<Box<dyn LineSink>>,
    default: impl FnOnce() -> Box<dyn LineSink>,
) -> Option<Box<dyn LineSink>> {
    if suppress_output {
        return None;
    }
    Some(custom.unwrap_or_else(default))
}

/// Read one child pipe chunk by chunk, reassemble lines through a private
/// [LineBuffer], collect every line and echo it to `echo` when present.
/// Ends at EOF with a forced flush, so no buffered partial line is lost.
async fn drain_lines<R>(stream: R, mut echo: Option<Box<dyn LineSink>>) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, stream);
    let mut chunk = BytesMut::with_capacity(CHUNK_SIZE);
    let mut lines: Vec<String> = Vec::new();
    {
        let mut buffer = LineBuffer::new(|line: &str| {
            if let Some(sink) = echo.as_mut() {
                sink.write(line);
            }
            lines.push(line.to_owned());
        });
        loop {
            match reader.read_buf(&mut chunk).await {
                Ok(0) => break,
                Ok(_) => {
                    let bytes = chunk.split();
                    buffer.append(&bytes);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "could not read from child pipe");
                    break;
                }
            }
        }
        buffer.flush();
    }
    if let Some(sink) = echo.as_mut() {
        sink.flush();
    }
    lines
}

enum ExitCause {
    Exited(ExitStatus),
    WaitFailed(io::Error),
    Cancelled,
    TimedOut(Duration),
}

/// One live child process plus its stream readers.
///
/// Obtained from [ProcessRunner::spawn]; consumed by
/// [RunningInvocation::wait], which resolves exactly once.
pub struct RunningInvocation {
    label: String,
    program: String,
    args: Vec<String>,
    child: Child,
    kill: KillHandle,
    stdout_task: Option<JoinHandle<Vec<String>>>,
    stderr_task: Option<JoinHandle<Vec<String>>>,
    timeout: Option<Duration>,
    suppress_stdio_on_error: bool,
    silent_failure_marker: Option<Cow<'static, str>>,
    // Keeps a wrapper script alive until the child is done with it.
    _script: Option<TempPath>,
}

impl RunningInvocation {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn kill_handle(&self) -> KillHandle {
        self.kill.clone()
    }

    /// Wait for the child to finish and classify the outcome.
    ///
    /// The exit is observed exactly once; afterwards both stream readers
    /// are awaited to their EOF flush, so the collected stdio is complete
    /// before any classification looks at it.
    pub async fn wait(mut self) -> Result<SpawnResult, SpawnError> {
        let kill_signal = Arc::clone(&self.kill.signal);
        let timeout = self.timeout;
        let deadline = async {
            match timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let cause = tokio::select! {
            status = self.child.wait() => match status {
                Ok(status) => ExitCause::Exited(status),
                Err(err) => ExitCause::WaitFailed(err),
            },
            _ = kill_signal.notified() => ExitCause::Cancelled,
            _ = &mut deadline => ExitCause::TimedOut(timeout.expect("deadline only fires with a timeout")),
        };

        let status = match &cause {
            ExitCause::Exited(status) => Some(*status),
            ExitCause::WaitFailed(_) => None,
            ExitCause::Cancelled | ExitCause::TimedOut(_) => self.stop_child().await,
        };

        // Readers run until the child's pipes hit EOF; awaiting them here
        // is the forced flush that freezes both collectors.
        let stdout = join_lines(self.stdout_task.take()).await;
        let stderr = join_lines(self.stderr_task.take()).await;

        let exit_code = status.and_then(|s| s.code());
        let label = self.label.clone();
        tracing::debug!(process = %label, exit_code, "process completed");

        let fail = |kind: FailureKind,
                    exit_code: Option<i32>,
                    message: String,
                    source: Option<io::Error>| {
            let (stdout, stderr) = if self.suppress_stdio_on_error {
                (None, None)
            } else {
                (Some(stdout.clone()), Some(stderr.clone()))
            };
            SpawnError {
                label: Cow::Owned(label.clone()),
                program: self.program.clone(),
                args: self.args.clone(),
                kind,
                exit_code,
                stdout,
                stderr,
                message,
                source,
            }
        };

        match cause {
            ExitCause::WaitFailed(err) => Err(fail(
                FailureKind::ExitFailure,
                Some(SPAWN_FAILURE_EXIT_CODE),
                format!("could not await process: {err}"),
                Some(err),
            )),
            ExitCause::Cancelled => Err(fail(
                FailureKind::ExitFailure,
                exit_code,
                "killed on request before completion".to_owned(),
                None,
            )),
            ExitCause::TimedOut(timeout) => Err(fail(
                FailureKind::ExitFailure,
                exit_code,
                format!("timed out after {timeout:?}"),
                None,
            )),
            ExitCause::Exited(status) if !status.success() => Err(fail(
                FailureKind::ExitFailure,
                exit_code,
                match exit_code {
                    Some(code) => format!("exited with code {code}"),
                    None => "terminated by signal".to_owned(),
                },
                None,
            )),
            ExitCause::Exited(_) => {
                if let Some(marker) = silent_failure_hit(&self.silent_failure_marker, &stdout) {
                    return Err(fail(
                        FailureKind::SilentException,
                        exit_code,
                        format!("exit code 0, but stdout contains '{marker}'"),
                        None,
                    ));
                }
                Ok(SpawnResult {
                    label,
                    program: self.program.clone(),
                    args: self.args.clone(),
                    exit_code,
                    stdout,
                    stderr,
                })
            }
        }
    }

    /// Interrupt the child, escalate to a kill after [KILL_GRACE] and
    /// report whatever exit status could still be observed.
    async fn stop_child(&mut self) -> Option<ExitStatus> {
        if let Err(err) = signal::send_interrupt(&self.child) {
            tracing::warn!(process = %self.label, error = %err, "could not interrupt process");
        }
        match tokio::time::timeout(KILL_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => return Some(status),
            Ok(Err(err)) => {
                tracing::warn!(process = %self.label, error = %err, "could not await interrupted process");
                return None;
            }
            Err(_elapsed) => {
                tracing::warn!(process = %self.label, "interrupt ignored, killing process");
            }
        }
        if let Err(err) = self.child.kill().await {
            tracing::warn!(process = %self.label, error = %err, "could not kill process");
            return None;
        }
        self.child.wait().await.ok()
    }
}

fn silent_failure_hit<'m>(
    marker: &'m Option<Cow<'static, str>>,
    stdout: &[String],
) -> Option<&'m str> {
    let marker = marker.as_deref()?;
    let needle = marker.to_lowercase();
    stdout
        .iter()
        .any(|line| line.to_lowercase().contains(&needle))
        .then_some(marker)
}

async fn join_lines(task: Option<JoinHandle<Vec<String>>>) -> Vec<String> {
    match task {
        None => Vec::new(),
        Some(task) => match task.await {
            Ok(lines) => lines,
            Err(err) => {
                tracing::warn!(error = %err, "output reader task failed");
                Vec::new()
            }
        },
    }
}

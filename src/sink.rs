//! Destinations for captured output lines.
//!
//! Every place the crate echoes a line goes through [LineSink], a small
//! explicit interface with a required `write` and a required `flush`.
//! Reader tasks hold sinks as `Box<dyn LineSink>`, so implementations must
//! be [Send].

use std::io::Write;

/// A destination for complete output lines.
pub trait LineSink: Send {
    /// Accept one complete line (without its terminator).
    fn write(&mut self, line: &str);

    /// Flush any state buffered by the sink. Must be idempotent.
    fn flush(&mut self);
}

/// Adapts any `FnMut(&str)` into a sink with a no-op flush.
pub struct FnSink<F>(pub F)
where
    F: FnMut(&str) + Send;

impl<F> LineSink for FnSink<F>
where
    F: FnMut(&str) + Send,
{
    fn write(&mut self, line: &str) {
        (self.0)(line)
    }

    fn flush(&mut self) {}
}

/// Echoes lines to the host's stdout.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl LineSink for StdoutSink {
    fn write(&mut self, line: &str) {
        let mut out = std::io::stdout().lock();
        if let Err(err) = writeln!(out, "{line}") {
            tracing::warn!(error = %err, "could not write line to stdout");
        }
    }

    fn flush(&mut self) {
        let _ = std::io::stdout().lock().flush();
    }
}

/// Echoes lines to the host's stderr.
#[derive(Debug, Default)]
pub struct StderrSink;

impl LineSink for StderrSink {
    fn write(&mut self, line: &str) {
        let mut out = std::io::stderr().lock();
        if let Err(err) = writeln!(out, "{line}") {
            tracing::warn!(error = %err, "could not write line to stderr");
        }
    }

    fn flush(&mut self) {
        let _ = std::io::stderr().lock().flush();
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl LineSink for NullSink {
    fn write(&mut self, _line: &str) {}

    fn flush(&mut self) {}
}

/// Collects lines into a shared vector. Useful in tests and wherever a
/// caller wants to look at echoed lines after the fact.
#[derive(Debug, Clone, Default)]
pub struct VecSink {
    lines: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of all lines written so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("sink lock poisoned").clone()
    }
}

impl LineSink for VecSink {
    fn write(&mut self, line: &str) {
        self.lines
            .lock()
            .expect("sink lock poisoned")
            .push(line.to_owned());
    }

    fn flush(&mut self) {}
}

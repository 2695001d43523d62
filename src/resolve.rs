//! Executable resolution, argument quoting and bare-command-line wrapping.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempPath;
use tokio::sync::{Mutex, OnceCell};

/// Characters that force a token to be quoted before it can appear on a
/// shell command line.
fn is_shell_special(c: char) -> bool {
    c.is_whitespace()
        || matches!(
            c,
            '"' | '\'' | '&' | '|' | '<' | '>' | '^' | ';' | '$' | '(' | ')' | '`' | '*' | '?'
        )
}

fn is_quoted(token: &str) -> bool {
    token.len() >= 2 && token.starts_with('"') && token.ends_with('"')
}

/// Quote `token` exactly once.
///
/// Tokens without whitespace or shell-special characters, and tokens that
/// already carry surrounding quotes, pass through unchanged. Everything
/// else is wrapped in double quotes with embedded `"` and `\` escaped.
pub fn quote(token: &str) -> Cow<'_, str> {
    if token.is_empty() {
        return Cow::Borrowed("\"\"");
    }
    if is_quoted(token) || !token.chars().any(is_shell_special) {
        return Cow::Borrowed(token);
    }
    let mut quoted = String::with_capacity(token.len() + 2);
    quoted.push('"');
    for c in token.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    Cow::Owned(quoted)
}

/// Invert [quote]: strip one layer of surrounding double quotes and undo
/// the embedded escapes. Unquoted tokens pass through unchanged.
pub fn unquote(token: &str) -> Cow<'_, str> {
    if !is_quoted(token) {
        return Cow::Borrowed(token);
    }
    let inner = &token[1..token.len() - 1];
    if !inner.contains('\\') {
        return Cow::Borrowed(inner);
    }
    let mut unquoted = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(escaped) => unquoted.push(escaped),
                None => unquoted.push('\\'),
            }
        } else {
            unquoted.push(c);
        }
    }
    Cow::Owned(unquoted)
}

/// Resolves program names to executable paths.
///
/// Results are cached per resolver instance. Concurrent lookups for the
/// same program share one in-flight cell instead of racing duplicate PATH
/// scans.
#[derive(Debug, Default)]
pub struct Resolver {
    cache: Mutex<HashMap<String, Arc<OnceCell<Option<PathBuf>>>>>,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `program` to an executable path.
    ///
    /// A path to an existing file is taken as-is; otherwise PATH is
    /// searched. `None` means the program could not be found anywhere.
    /// Both filesystem touches run on the blocking pool, keeping the
    /// orchestrating thread free of blocking syscalls.
    pub async fn resolve(&self, program: &str) -> Option<PathBuf> {
        let direct = PathBuf::from(program);
        let direct = tokio::task::spawn_blocking(move || direct.is_file().then_some(direct))
            .await
            .ok()
            .flatten();
        if let Some(path) = direct {
            return Some(path);
        }

        let cell = {
            let mut cache = self.cache.lock().await;
            Arc::clone(cache.entry(program.to_owned()).or_default())
        };
        cell.get_or_init(|| async {
            let lookup = program.to_owned();
            let found = tokio::task::spawn_blocking(move || which::which(lookup).ok())
                .await
                .unwrap_or_else(|err| {
                    tracing::warn!(error = %err, "PATH lookup task failed");
                    None
                });
            tracing::debug!(program, found = ?found, "PATH lookup");
            found
        })
        .await
        .clone()
    }
}

/// A bare command line wrapped into a temporary platform script.
///
/// The temp file must stay alive for as long as the child may read it; the
/// runner keeps it next to the running process.
#[derive(Debug)]
pub struct WrappedScript {
    pub program: String,
    pub args: Vec<String>,
    pub script: TempPath,
}

/// Wrap a full shell command line into a script invoked via the platform
/// shell (`cmd.exe /c` on windows, `/bin/sh` elsewhere).
///
/// Used when an invocation is a single command-line string that resolves to
/// no executable: rather than failing, hand the line to the shell the way a
/// user would.
pub fn wrap_in_script(command_line: &str) -> io::Result<WrappedScript> {
    #[cfg(windows)]
    {
        let mut file = tempfile::Builder::new()
            .prefix("quackrun-")
            .suffix(".cmd")
            .tempfile()?;
        write!(file, "@echo off\r\n{command_line}\r\n")?;
        let script = file.into_temp_path();
        Ok(WrappedScript {
            program: "cmd.exe".to_owned(),
            args: vec!["/c".to_owned(), script.to_string_lossy().into_owned()],
            script,
        })
    }

    #[cfg(not(windows))]
    {
        let mut file = tempfile::Builder::new()
            .prefix("quackrun-")
            .suffix(".sh")
            .tempfile()?;
        write!(file, "#!/bin/sh\n{command_line}\n")?;
        let script = file.into_temp_path();
        Ok(WrappedScript {
            program: "/bin/sh".to_owned(),
            args: vec![script.to_string_lossy().into_owned()],
            script,
        })
    }
}

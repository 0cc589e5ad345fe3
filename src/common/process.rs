use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::warn;

use crate::common::error::ProcessError;

/// Runs `program` with `args`, capturing stdout and stderr.
///
/// The child is killed if it does not finish within `limit`; a timeout is
/// reported as [`ProcessError::Timeout`]. A non-zero exit is reported as
/// [`ProcessError::NonZeroExit`] carrying the captured stderr.
pub async fn run_with_timeout<I, S>(
    program: &Path,
    args: I,
    limit: Duration,
) -> Result<Output, ProcessError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let name = program.display().to_string();

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => ProcessError::NotFound {
                program: name.clone(),
            },
            _ => ProcessError::Spawn {
                program: name.clone(),
                source: e,
            },
        })?;

    let mut stdout_pipe = child.stdout.take().ok_or_else(|| ProcessError::Io {
        program: name.clone(),
        source: std::io::Error::other("missing child stdout"),
    })?;
    let mut stderr_pipe = child.stderr.take().ok_or_else(|| ProcessError::Io {
        program: name.clone(),
        source: std::io::Error::other("missing child stderr"),
    })?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });

    let status = match timeout(limit, child.wait()).await {
        Ok(status) => status.map_err(|e| ProcessError::Io {
            program: name.clone(),
            source: e,
        })?,
        Err(_) => {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill {} after timeout: {}", name, e);
            }
            stdout_task.abort();
            stderr_task.abort();
            return Err(ProcessError::Timeout {
                program: name,
                timeout: limit,
            });
        }
    };

    let stdout = join_pipe(stdout_task, &name).await?;
    let stderr = join_pipe(stderr_task, &name).await?;

    if !status.success() {
        return Err(ProcessError::NonZeroExit {
            program: name,
            code: status.code(),
            stderr: truncate(&String::from_utf8_lossy(&stderr), STDERR_LOG_LIMIT),
        });
    }

    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

async fn join_pipe(
    task: tokio::task::JoinHandle<std::io::Result<Vec<u8>>>,
    program: &str,
) -> Result<Vec<u8>, ProcessError> {
    task.await
        .map_err(|e| ProcessError::Io {
            program: program.to_string(),
            source: std::io::Error::other(e),
        })?
        .map_err(|e| ProcessError::Io {
            program: program.to_string(),
            source: e,
        })
}

/// Longest stderr excerpt kept for logs.
pub const STDERR_LOG_LIMIT: usize = 2000;

/// Returns at most `max_chars` characters of `text`.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

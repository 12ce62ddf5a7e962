//! Subprocess execution with merged output capture.
//!
//! [`run_merged`] spawns a prepared [`tokio::process::Command`] with stdout
//! and stderr both writing into one pipe, so the captured text keeps the
//! exact order the process produced it in. Reading the output and waiting
//! for exit share a single timeout; on expiry the child is killed and
//! reaped before returning.

use crate::error::OcrError;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};

/// Maximum amount of output accepted per run (1 MiB).
///
/// A run that prints more fails with [`OcrError::OutputTooLarge`].
pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// What a finished process left behind
#[derive(Debug)]
pub struct ProcessOutput {
    /// Combined stdout and stderr, every line terminated by `\n`
    pub output: String,
    pub status: ExitStatus,
}

/// Spawn `cmd`, capture its merged output and wait for it to exit, all
/// within `timeout`.
///
/// Stdin is closed and both output streams go to the same pipe; the caller
/// sets the program, arguments and working directory.
pub async fn run_merged(mut cmd: Command, timeout: Duration) -> Result<ProcessOutput, OcrError> {
    let (writer, reader) = pipe::pipe()?;
    let stdout = writer.into_blocking_fd()?;
    let stderr = stdout.try_clone()?;

    cmd.stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .kill_on_drop(true);

    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    let spawned = cmd.spawn();
    // The command holds our copies of the write end; EOF only arrives once
    // they are closed.
    drop(cmd);
    let mut child = spawned.map_err(|source| OcrError::Launch {
        command: program.clone(),
        source,
    })?;
    tracing::debug!("Spawned `{}` (pid {:?})", program, child.id());

    // The reader lives inside this future, so it is closed whenever the
    // future is dropped, even if a grandchild still holds the write end.
    let run = async {
        let output = read_lines(reader).await?;
        let status = child.wait().await?;
        Ok::<_, OcrError>((output, status))
    };
    let result = tokio::time::timeout(timeout, run).await;

    match result {
        Ok(Ok((output, status))) => Ok(ProcessOutput { output, status }),
        Ok(Err(e)) => {
            kill(&mut child, &program).await;
            Err(e)
        }
        Err(_elapsed) => {
            tracing::warn!(
                "`{}` still running after {}s, killing it",
                program,
                timeout.as_secs()
            );
            kill(&mut child, &program).await;
            Err(OcrError::Timeout { timeout })
        }
    }
}

async fn kill(child: &mut Child, program: &str) {
    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill `{}`: {}", program, e);
    }
}

/// Read `stream` to EOF, terminating every line (including a trailing
/// partial one) with `\n`.
async fn read_lines<R>(stream: R) -> Result<String, OcrError>
where
    R: AsyncRead + Unpin,
{
    // One byte past the cap is enough to tell "exactly at" from "over".
    let mut reader = BufReader::new(stream.take(MAX_OUTPUT_BYTES as u64 + 1));
    let mut output = String::new();
    let mut total = 0;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Ok(output);
        }
        total += n;
        if total > MAX_OUTPUT_BYTES {
            return Err(OcrError::OutputTooLarge {
                max: MAX_OUTPUT_BYTES,
            });
        }

        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        output.push_str(&String::from_utf8_lossy(&buf));
        output.push('\n');
    }
}

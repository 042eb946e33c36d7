//! Blocking execution of external programs.
//!
//! Every program is spawned from a typed argument list, never through a shell,
//! so identifiers read from a device can't smuggle extra commands in.
//! An optional deadline turns a hung tool into [`ToolError::Timeout`];
//! the child is killed and reaped before returning.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

use log::{error, info, warn};

use crate::error::ToolError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Convert tool output bytes to a trimmed UTF-8 string.
/// Uses lossy conversion to prevent panics on non-UTF8 output from certain OEMs.
#[must_use]
pub fn to_trimmed_utf8(v: &[u8]) -> String {
    String::from_utf8_lossy(v).trim_end().to_string()
}

/// What happens to the child's standard streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Streams {
    /// Collect stdout and stderr; stdout is returned, stderr becomes the error.
    Capture,
    /// Let the child write straight to our terminal (progress bars).
    Inherit,
}

/// Space-joined rendering of a command, for logs only.
#[must_use]
pub fn describe(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|s| s.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = reader.read_to_end(&mut buf) {
            warn!("Lost part of a child's output: {e}");
        }
        buf
    })
}

fn join_drained(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|buf| to_trimmed_utf8(&buf))
        .unwrap_or_default()
}

fn wait(child: &mut Child, program: &str, timeout: Option<Duration>) -> Result<ExitStatus, ToolError> {
    let wait_err = |source| ToolError::Spawn {
        program: program.to_string(),
        source,
    };

    let Some(limit) = timeout else {
        return child.wait().map_err(wait_err);
    };

    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {
                if start.elapsed() >= limit {
                    if let Err(e) = child.kill() {
                        warn!("Cannot kill `{program}`: {e}");
                    }
                    // reap, so no zombie is left behind
                    child.wait().ok();
                    error!("`{program}` timed out after {}s", limit.as_secs());
                    return Err(ToolError::Timeout {
                        program: program.to_string(),
                        after: limit,
                    });
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return Err(wait_err(e)),
        }
    }
}

/// Run `cmd` to completion (or until `timeout`), returning its trimmed stdout.
///
/// With [`Streams::Inherit`] the returned string is always empty.
pub fn run(mut cmd: Command, streams: Streams, timeout: Option<Duration>) -> Result<String, ToolError> {
    #[cfg(target_os = "windows")]
    cmd.creation_flags(0x0800_0000); // do not open a cmd window

    let program = cmd.get_program().to_string_lossy().into_owned();
    info!("Ran command: {}", describe(&cmd));

    cmd.stdin(Stdio::null());
    match streams {
        Streams::Capture => cmd.stdout(Stdio::piped()).stderr(Stdio::piped()),
        Streams::Inherit => cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit()),
    };

    let mut child = cmd.spawn().map_err(|source| {
        error!("Cannot spawn `{program}`: {source}");
        ToolError::Spawn {
            program: program.clone(),
            source,
        }
    })?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = wait(&mut child, &program, timeout)?;
    let stdout = join_drained(stdout);
    let stderr = join_drained(stderr);

    if status.success() {
        return Ok(stdout);
    }

    let code = status
        .code()
        .map_or_else(|| "a signal".to_string(), |c| format!("code {c}"));
    error!("`{program}` exited with {code}");
    // Some tools (adb included) report errors on stdout instead of stderr
    Err(ToolError::Status {
        program,
        code,
        stderr: if stderr.is_empty() { stdout } else { stderr },
    })
}

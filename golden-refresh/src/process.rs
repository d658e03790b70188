//! Child processes with a deadline.

use std::io::Read;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{io_err, RefreshError};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long to wait for the pipe readers once the child is gone. A grandchild
/// that inherited the pipes can keep them open; its output is then dropped.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Last non-empty stderr line, falling back to the exit status.
    pub fn failure_message(&self) -> String {
        self.stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("exited with {}", self.status))
    }
}

/// Run `command` in `cwd`, killing it once `timeout` elapses.
///
/// `label` names the operation in the timeout error.
pub fn run_with_timeout(
    mut command: Command,
    cwd: &Path,
    timeout: Duration,
    label: &str,
) -> Result<CommandOutput, RefreshError> {
    command
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = command.spawn().map_err(|e| io_err(cwd, e))?;

    // Drain both pipes so a chatty child cannot block on a full buffer.
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait().map_err(|e| io_err(cwd, e))? {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                let drain_deadline = Instant::now() + DRAIN_GRACE;
                for reader in [stdout, stderr].into_iter().flatten() {
                    collect(reader, drain_deadline);
                }
                tracing::warn!(operation = label, cwd = %cwd.display(), "command killed after timeout");
                return Err(RefreshError::Timeout {
                    operation: label.to_string(),
                    after: timeout,
                });
            }
            None => thread::sleep(POLL_INTERVAL),
        }
    };

    let drain_deadline = Instant::now() + DRAIN_GRACE;
    Ok(CommandOutput {
        status,
        stdout: stdout.map(|h| collect(h, drain_deadline)).unwrap_or_default(),
        stderr: stderr.map(|h| collect(h, drain_deadline)).unwrap_or_default(),
    })
}

fn drain(mut pipe: impl Read + Send + 'static) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Join a pipe reader, giving up (and detaching it) at `deadline`.
fn collect(handle: thread::JoinHandle<String>, deadline: Instant) -> String {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::debug!("pipe still held open after exit; output discarded");
            return String::new();
        }
        thread::sleep(Duration::from_millis(10));
    }
    handle.join().unwrap_or_default()
}

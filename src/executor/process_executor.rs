use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::time::Instant;

use super::{CommandRunner, LineControl, OutputSink, RunOutcome};
use crate::error::{AppError, Result};
use crate::models::OutputLine;

const DEFAULT_INTERRUPT_GRACE: Duration = Duration::from_secs(10);

/// Runs commands through a local shell, one child process per command.
///
/// Each child gets its own process group so an interrupt reaches the whole
/// pipeline (e.g. `ssh` under `bash -c`) without touching this process.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    shell: String,
    interrupt_grace: Duration,
}

impl ProcessExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            interrupt_grace: DEFAULT_INTERRUPT_GRACE,
        }
    }

    /// How long an interrupted command may keep running before it is killed.
    pub fn with_interrupt_grace(mut self, grace: Duration) -> Self {
        self.interrupt_grace = grace;
        self
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new("bash")
    }
}

#[async_trait]
impl CommandRunner for ProcessExecutor {
    async fn run_with_input(
        &self,
        command: &str,
        input: Option<&str>,
        sink: &mut dyn OutputSink,
    ) -> Result<RunOutcome> {
        let mut cmd = tokio::process::Command::new(&self.shell);
        cmd.arg("-c").arg(command);
        cmd.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn()?;

        if let Some(input) = input {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| AppError::RemoteExecution("Failed to capture stdin".to_string()))?;
            let input = input.to_string();
            // Written concurrently with reading output; dropping stdin sends EOF.
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    tracing::debug!("Command stopped reading its input: {}", e);
                }
            });
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::RemoteExecution("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::RemoteExecution("Failed to capture stderr".to_string()))?;

        // Output is split on raw bytes; tools like `tar -v` print non-UTF-8 file names.
        let mut stdout_lines = BufReader::new(stdout).split(b'\n');
        let mut stderr_lines = BufReader::new(stderr).split(b'\n');
        let mut stdout_open = true;
        let mut stderr_open = true;

        let mut stderr_text = Vec::new();
        let mut interrupted = false;
        let mut kill_at: Option<Instant> = None;

        while stdout_open || stderr_open {
            let line = tokio::select! {
                line = stdout_lines.next_segment(), if stdout_open => match line? {
                    Some(bytes) => OutputLine::success(decode_line(bytes)),
                    None => {
                        stdout_open = false;
                        continue;
                    }
                },
                line = stderr_lines.next_segment(), if stderr_open => match line? {
                    Some(bytes) => {
                        let text = decode_line(bytes);
                        stderr_text.push(text.clone());
                        OutputLine::error(text)
                    }
                    None => {
                        stderr_open = false;
                        continue;
                    }
                },
                _ = tokio::time::sleep_until(kill_at.unwrap_or_else(Instant::now)),
                    if kill_at.is_some() =>
                {
                    tracing::warn!("Command ignored interrupt, killing it");
                    signal(&mut child, Signal::Kill);
                    kill_at = None;
                    continue;
                }
            };

            if sink.line(line).await == LineControl::Interrupt && !interrupted {
                interrupted = true;
                signal(&mut child, Signal::Interrupt);
                kill_at = Some(Instant::now() + self.interrupt_grace);
            }
        }

        let status = child.wait().await?;

        if interrupted {
            return Ok(RunOutcome::Interrupted);
        }

        if status.success() {
            Ok(RunOutcome::Succeeded)
        } else {
            Ok(RunOutcome::Failed {
                exit_code: status.code(),
                stderr: stderr_text.join("\n"),
            })
        }
    }
}

fn decode_line(mut bytes: Vec<u8>) -> String {
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Interrupt,
    Kill,
}

#[cfg(unix)]
fn signal(child: &mut Child, signal: Signal) {
    let Some(pid) = child.id() else {
        return;
    };
    let signo = match signal {
        Signal::Interrupt => libc::SIGINT,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: kill(2) takes plain integers; a stale group id only yields ESRCH.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), signo) };
    if rc != 0 {
        tracing::warn!(
            "Failed to signal process group {}: {}",
            pid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn signal(child: &mut Child, _signal: Signal) {
    if let Err(e) = child.start_kill() {
        tracing::warn!("Failed to stop process: {}", e);
    }
}

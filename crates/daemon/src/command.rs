//! External command execution.
//!
//! This module provides the two ways VirtShare talks to the outside world:
//! short-lived display-configuration commands that run to completion, and
//! the long-lived VNC server child whose output is streamed back as raw
//! chunks. Children inherit the daemon's environment and working
//! directory.

use std::process::Stdio;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;

/// Exit code reported when a child's status carries no code, e.g. when it
/// was killed by a signal.
pub const INDETERMINATE_EXIT: i32 = -1;

/// Buffer size for reading child output.
const READ_BUFFER_SIZE: usize = 4096;

/// Channel capacity for streamed process events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Errors that can occur while running external commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// An empty argument vector was given.
    #[error("empty command line")]
    Empty,

    /// The executable could not be started.
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        /// The full command line.
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O towards a running child failed.
    #[error("i/o error while running {command}: {source}")]
    Io {
        /// The full command line.
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A checked command exited with a non-zero code.
    #[error("command failed: {command} (exit {code})\n{output}")]
    Failed {
        /// The full command line.
        command: String,
        /// The child's exit code.
        code: i32,
        /// Captured stdout and stderr.
        output: String,
    },
}

/// Captured output of a completed command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Combined stdout and stderr text.
    pub text: String,
    /// Exit code, or [`INDETERMINATE_EXIT`].
    pub code: i32,
}

impl CommandOutput {
    fn from_output(output: std::process::Output) -> Self {
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Self {
            text,
            code: output.status.code().unwrap_or(INDETERMINATE_EXIT),
        }
    }
}

/// Events streamed from a long-lived child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// The child was spawned and its stdin closed; no further input follows.
    Started,
    /// A raw chunk of stdout bytes. Chunk boundaries are not line-aligned.
    Stdout(Vec<u8>),
    /// A raw chunk of stderr bytes.
    Stderr(Vec<u8>),
    /// The child terminated. Emitted exactly once, after the last chunk.
    Exited(i32),
}

/// Handle to a long-lived child, used to request termination.
#[derive(Debug)]
pub struct ChildHandle {
    command: String,
    pid: Option<u32>,
}

impl ChildHandle {
    /// Sends SIGINT to the child. Idempotent: signalling a process that
    /// has already exited is a no-op.
    pub fn interrupt(&self) {
        let Some(pid) = self.pid else {
            return;
        };
        match kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
            Ok(()) => tracing::debug!(command = %self.command, pid, "sent SIGINT"),
            Err(nix::errno::Errno::ESRCH) => {
                tracing::debug!(command = %self.command, pid, "process already gone");
            }
            Err(error) => {
                tracing::warn!(command = %self.command, pid, %error, "failed to signal process");
            }
        }
    }

    /// The child's process id, if it was available at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// Runs external commands.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner;

impl CommandRunner {
    /// Creates a new runner.
    pub fn new() -> Self {
        Self
    }

    /// Runs a command to completion, capturing stdout and stderr.
    ///
    /// A non-zero exit is not an error here; the caller inspects
    /// [`CommandOutput::code`]. Only a failure to start the executable is
    /// reported as an error.
    pub async fn run(&self, argv: &[&str]) -> Result<CommandOutput, CommandError> {
        let command = argv.join(" ");
        let (program, args) = split_argv(argv)?;
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| CommandError::Spawn {
                command: command.clone(),
                source,
            })?;
        let output = CommandOutput::from_output(output);
        tracing::trace!(command = %command, code = output.code, "command finished");
        Ok(output)
    }

    /// Runs a command to completion and requires a zero exit code.
    ///
    /// `stdin` text, when given, is piped to the child's input and the pipe
    /// is closed afterwards. A non-zero exit yields
    /// [`CommandError::Failed`] carrying the captured output.
    pub async fn run_checked(
        &self,
        argv: &[&str],
        stdin: Option<&str>,
    ) -> Result<String, CommandError> {
        let command = argv.join(" ");
        let (program, args) = split_argv(argv)?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
            command: command.clone(),
            source,
        })?;
        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input.as_bytes())
                    .await
                    .map_err(|source| CommandError::Io {
                        command: command.clone(),
                        source,
                    })?;
            }
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|source| CommandError::Io {
                command: command.clone(),
                source,
            })?;
        let output = CommandOutput::from_output(output);
        if output.code != 0 {
            return Err(CommandError::Failed {
                command,
                code: output.code,
                output: output.text,
            });
        }
        Ok(output.text)
    }

    /// Spawns a long-lived child and streams its lifecycle as events.
    ///
    /// The child's stdin is closed immediately after the spawn and
    /// [`ProcessEvent::Started`] is emitted. Raw output chunks follow as
    /// they arrive, and [`ProcessEvent::Exited`] is emitted exactly once
    /// after both streams reach EOF and the child has been reaped.
    ///
    /// Every output byte is also appended to `logfile` when one is given;
    /// the file is closed before the exit event is emitted.
    pub fn spawn_streaming(
        &self,
        argv: &[&str],
        logfile: Option<std::fs::File>,
    ) -> Result<(ChildHandle, mpsc::Receiver<ProcessEvent>), CommandError> {
        let command = argv.join(" ");
        let (program, args) = split_argv(argv)?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CommandError::Spawn {
                command: command.clone(),
                source,
            })?;

        // No further input: close stdin right away.
        drop(child.stdin.take());
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let pid = child.id();
        let mut logfile = logfile.map(tokio::fs::File::from_std);

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let pump_command = command.clone();
        tokio::spawn(async move {
            let _ = tx.send(ProcessEvent::Started).await;
            let mut stdout = stdout;
            let mut stderr = stderr;
            let mut out_buf = vec![0u8; READ_BUFFER_SIZE];
            let mut err_buf = vec![0u8; READ_BUFFER_SIZE];
            loop {
                tokio::select! {
                    chunk = read_chunk(&mut stdout, &mut out_buf), if stdout.is_some() => match chunk {
                        Some(data) => {
                            append_log(&mut logfile, &data).await;
                            let _ = tx.send(ProcessEvent::Stdout(data)).await;
                        }
                        None => stdout = None,
                    },
                    chunk = read_chunk(&mut stderr, &mut err_buf), if stderr.is_some() => match chunk {
                        Some(data) => {
                            append_log(&mut logfile, &data).await;
                            let _ = tx.send(ProcessEvent::Stderr(data)).await;
                        }
                        None => stderr = None,
                    },
                    else => break,
                }
            }
            let code = match child.wait().await {
                Ok(status) => status.code().unwrap_or(INDETERMINATE_EXIT),
                Err(error) => {
                    tracing::error!(command = %pump_command, %error, "failed to reap child");
                    INDETERMINATE_EXIT
                }
            };
            // The session log must be flushed and closed before the exit
            // is reported.
            if let Some(mut file) = logfile.take() {
                let _ = file.flush().await;
            }
            tracing::debug!(command = %pump_command, code, "child exited");
            let _ = tx.send(ProcessEvent::Exited(code)).await;
        });

        Ok((ChildHandle { command, pid }, rx))
    }
}

fn split_argv<'a>(argv: &'a [&'a str]) -> Result<(&'a str, &'a [&'a str]), CommandError> {
    match argv.split_first() {
        Some((program, args)) => Ok((*program, args)),
        None => Err(CommandError::Empty),
    }
}

async fn read_chunk<R>(reader: &mut Option<R>, buf: &mut [u8]) -> Option<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let reader = reader.as_mut()?;
    match reader.read(buf).await {
        Ok(0) => None,
        Ok(n) => Some(buf[..n].to_vec()),
        Err(_) => None,
    }
}

async fn append_log(logfile: &mut Option<tokio::fs::File>, data: &[u8]) {
    if let Some(file) = logfile {
        if let Err(error) = file.write_all(data).await {
            tracing::warn!(%error, "failed to write session log");
        }
    }
}

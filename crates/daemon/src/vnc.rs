//! VNC server session supervision.
//!
//! The supervisor owns the x11vnc child process, the session state and the
//! session log file. The server speaks no structured IPC; its state is
//! inferred by scanning the output stream for the connection markers it
//! prints, so the scanner must tolerate chunk boundaries that fall in the
//! middle of a line and ignore everything it does not recognize.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::command::{ChildHandle, CommandError, CommandRunner, ProcessEvent};
use crate::shutdown::{CleanupTask, ShutdownHooks};
use crate::xrandr::{CommandExec, ScreenError, XRandr};

/// The VNC server binary.
pub const DEFAULT_SERVER_PROGRAM: &str = "x11vnc";

/// Grace period granted to the server child during forced shutdown, so it
/// can flush and exit before the rest of the exit sequence continues.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Capacity of the session event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Upper bound on the partial-line scan buffer.
const SCAN_BUFFER_MAX: usize = 4096;

/// State of the VNC server session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VncState {
    /// No server child is running.
    Off,
    /// The server is up, waiting for a viewer to connect.
    Waiting,
    /// At least one viewer is connected.
    Connected,
    /// The server died unexpectedly. Transient: always followed by `Off`.
    Error,
}

impl std::fmt::Display for VncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Off => "off",
            Self::Waiting => "waiting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// Notifications emitted by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VncEvent {
    /// The session state changed.
    StateChanged(VncState),
    /// The server failed; carries a human-readable diagnostic.
    Error {
        /// What went wrong and what to check.
        message: String,
    },
}

/// Errors raised by supervisor operations.
#[derive(Debug, Error)]
pub enum VncError {
    /// The virtual screen is not bound; nothing to share yet.
    #[error("virtual screen is not ready; create it before starting the server")]
    VirtualScreenNotReady,

    /// A session is already in flight.
    #[error("the VNC server is already running")]
    AlreadyRunning,

    /// Stop was requested while no session was in flight.
    #[error("the VNC server is not running")]
    NotRunning,

    /// Refused to store an empty password.
    #[error("refusing to store an empty password")]
    EmptyPassword,

    /// There is no password file to remove.
    #[error("no password file to delete")]
    PasswordNotSet,

    /// The session log file could not be opened.
    #[error("failed to open session log {path}: {source}")]
    SessionLog {
        /// The log path.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The password file could not be removed.
    #[error("failed to remove password file {path}: {source}")]
    PasswordFile {
        /// The password file path.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading the virtual screen geometry failed.
    #[error(transparent)]
    Screen(#[from] ScreenError),

    /// An external command could not be run.
    #[error(transparent)]
    Command(#[from] CommandError),
}

fn client_connected_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"Got connection from client").expect("connection pattern is valid")
    })
}

fn client_gone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"client_count:\s*0\s*$").expect("client count pattern is valid"))
}

/// The session state machine, fed from the child's process events.
///
/// Pure state and text scanning; the supervisor pumps process events into
/// it and broadcasts whatever it emits.
#[derive(Debug)]
struct SessionMachine {
    state: VncState,
    buffer: String,
}

impl SessionMachine {
    fn new() -> Self {
        Self {
            state: VncState::Off,
            buffer: String::new(),
        }
    }

    fn transition(&mut self, next: VncState, events: &mut Vec<VncEvent>) {
        if self.state != next {
            self.state = next;
            events.push(VncEvent::StateChanged(next));
        }
    }

    fn on_started(&mut self) -> Vec<VncEvent> {
        let mut events = Vec::new();
        self.buffer.clear();
        self.transition(VncState::Waiting, &mut events);
        events
    }

    fn on_output(&mut self, data: &[u8]) -> Vec<VncEvent> {
        let mut events = Vec::new();
        self.buffer.push_str(&String::from_utf8_lossy(data));
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            self.scan_line(line.trim_end(), &mut events);
        }
        // A marker may sit in a partial line whose newline has not arrived
        // yet. Scanning the tail catches it; when the line completes it is
        // scanned again, which the state guards turn into a no-op.
        if !self.buffer.is_empty() {
            let tail = self.buffer.clone();
            self.scan_line(&tail, &mut events);
            self.truncate_buffer();
        }
        events
    }

    fn scan_line(&mut self, line: &str, events: &mut Vec<VncEvent>) {
        if self.state != VncState::Connected && client_connected_pattern().is_match(line) {
            self.transition(VncState::Connected, events);
        }
        if self.state == VncState::Connected && client_gone_pattern().is_match(line) {
            self.transition(VncState::Waiting, events);
        }
    }

    fn on_exit(&mut self, code: i32) -> Vec<VncEvent> {
        let mut events = Vec::new();
        if code != 0 {
            self.transition(VncState::Error, &mut events);
            events.push(VncEvent::Error {
                message: "the VNC server exited with an error; double-check whether the port is \
                          already in use"
                    .to_string(),
            });
        }
        self.transition(VncState::Off, &mut events);
        self.buffer.clear();
        events
    }

    fn truncate_buffer(&mut self) {
        if self.buffer.len() > SCAN_BUFFER_MAX {
            let mut cut = self.buffer.len() - SCAN_BUFFER_MAX;
            while !self.buffer.is_char_boundary(cut) {
                cut += 1;
            }
            self.buffer.drain(..cut);
        }
    }
}

fn build_server_args(
    program: &str,
    port: u16,
    clip: &str,
    extra_args: &[String],
    auth_file: Option<&str>,
) -> Vec<String> {
    let mut argv = vec![
        program.to_string(),
        "-rfbport".to_string(),
        port.to_string(),
        "-clip".to_string(),
        clip.to_string(),
    ];
    argv.extend(extra_args.iter().cloned());
    if let Some(auth) = auth_file {
        argv.push("-rfbauth".to_string());
        argv.push(auth.to_string());
    }
    argv
}

/// Supervisor for the VNC server child process.
pub struct VncSupervisor {
    runner: CommandRunner,
    hooks: ShutdownHooks,
    machine: Arc<Mutex<SessionMachine>>,
    event_tx: broadcast::Sender<VncEvent>,
    child: Option<ChildHandle>,
    password_path: PathBuf,
    log_path: PathBuf,
    server_program: String,
    grace_period: Duration,
}

impl VncSupervisor {
    /// Creates a supervisor with no session in flight.
    pub fn new(
        runner: CommandRunner,
        hooks: ShutdownHooks,
        password_path: PathBuf,
        log_path: PathBuf,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            runner,
            hooks,
            machine: Arc::new(Mutex::new(SessionMachine::new())),
            event_tx,
            child: None,
            password_path,
            log_path,
            server_program: DEFAULT_SERVER_PROGRAM.to_string(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Overrides the server binary.
    pub fn with_server_program(mut self, program: impl Into<String>) -> Self {
        self.server_program = program.into();
        self
    }

    /// Overrides the forced-stop grace period.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Returns a receiver for session notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<VncEvent> {
        self.event_tx.subscribe()
    }

    /// The current session state.
    pub fn state(&self) -> VncState {
        self.machine.lock().unwrap().state
    }

    /// Whether a password is set. The password file's existence is the
    /// source of truth, not a separate flag.
    pub fn password_enabled(&self) -> bool {
        self.password_path.is_file()
    }

    /// Stores the VNC password via the server's own password store tool.
    pub async fn store_password(&self, password: &str) -> Result<(), VncError> {
        if password.is_empty() {
            return Err(VncError::EmptyPassword);
        }
        let path = self.password_path.display().to_string();
        // The tool reads the password twice (verify + confirm).
        let input = format!("{password}\n{password}\n\n");
        self.runner
            .run_checked(&[&self.server_program, "-storepasswd", &path], Some(&input))
            .await?;
        tracing::info!(path = %path, "VNC password stored");
        Ok(())
    }

    /// Removes the stored VNC password.
    pub fn clear_password(&self) -> Result<(), VncError> {
        if !self.password_path.is_file() {
            return Err(VncError::PasswordNotSet);
        }
        std::fs::remove_file(&self.password_path).map_err(|source| VncError::PasswordFile {
            path: self.password_path.clone(),
            source,
        })?;
        tracing::info!("VNC password cleared");
        Ok(())
    }

    /// Starts the VNC server for the bound virtual screen.
    ///
    /// The clip rectangle is rebuilt from a fresh topology refresh so the
    /// served region matches the screen's final geometry. Extra arguments
    /// are passed to the server verbatim, and the auth file is appended
    /// when a password is stored.
    pub async fn start<E: CommandExec>(
        &mut self,
        screen: &mut XRandr<E>,
        port: u16,
        extra_args: &[String],
    ) -> Result<(), VncError> {
        if !screen.is_bound() {
            return Err(VncError::VirtualScreenNotReady);
        }
        if self.state() != VncState::Off {
            return Err(VncError::AlreadyRunning);
        }

        let virt = screen.virtual_screen().await?;
        let auth = self
            .password_enabled()
            .then(|| self.password_path.display().to_string());
        let argv = build_server_args(
            &self.server_program,
            port,
            &virt.clip(),
            extra_args,
            auth.as_deref(),
        );
        let argv: Vec<&str> = argv.iter().map(String::as_str).collect();

        let logfile = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|source| VncError::SessionLog {
                path: self.log_path.clone(),
                source,
            })?;

        let (handle, events) = self.runner.spawn_streaming(&argv, Some(logfile))?;
        tracing::info!(port, clip = %virt.clip(), "VNC server starting");
        self.child = Some(handle);
        self.hooks.register(CleanupTask::StopSession);

        let machine = Arc::clone(&self.machine);
        let event_tx = self.event_tx.clone();
        let hooks = self.hooks.clone();
        tokio::spawn(async move {
            let mut events = events;
            while let Some(event) = events.recv().await {
                let exited = matches!(event, ProcessEvent::Exited(_));
                let emitted = {
                    let mut machine = machine.lock().unwrap();
                    match event {
                        ProcessEvent::Started => machine.on_started(),
                        ProcessEvent::Stdout(data) | ProcessEvent::Stderr(data) => {
                            machine.on_output(&data)
                        }
                        ProcessEvent::Exited(code) => machine.on_exit(code),
                    }
                };
                for event in emitted {
                    match &event {
                        VncEvent::StateChanged(state) => {
                            tracing::info!(state = %state, "VNC session state changed");
                        }
                        VncEvent::Error { message } => {
                            tracing::error!(message = %message, "VNC server error");
                        }
                    }
                    let _ = event_tx.send(event);
                }
                if exited {
                    hooks.deregister(CleanupTask::StopSession);
                    break;
                }
            }
        });
        Ok(())
    }

    /// Stops the VNC server.
    ///
    /// With `force` (the process-exit path) the interrupt is sent no
    /// matter the current state and the call returns only after the grace
    /// period, so the child has flushed and exited before the caller's own
    /// shutdown sequence continues. Without `force`, stopping is only
    /// valid while a session is in flight; the exit itself is observed
    /// asynchronously through the session events.
    pub async fn stop(&mut self, force: bool) -> Result<(), VncError> {
        if force {
            if let Some(child) = &self.child {
                child.interrupt();
            }
            tokio::time::sleep(self.grace_period).await;
            return Ok(());
        }
        match self.state() {
            VncState::Waiting | VncState::Connected => {
                if let Some(child) = &self.child {
                    child.interrupt();
                }
                Ok(())
            }
            _ => Err(VncError::NotRunning),
        }
    }

    #[cfg(test)]
    fn force_state(&self, state: VncState) {
        self.machine.lock().unwrap().state = state;
    }
}

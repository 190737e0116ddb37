//! Virtual display lifecycle control via `xrandr`.
//!
//! The controller owns a small state machine over the virtual screen:
//! `Absent -> ModeRegistered -> Bound` on creation, back to `Absent` on
//! teardown. Every mutating command is followed by a fresh topology
//! refresh; geometry is never patched incrementally because binding and
//! placement change offsets as a side effect.

use std::time::Duration;

use thiserror::Error;
use vdisplay::{
    effective_geometry, mode_name, parse_modeline, Display, ModelineError, Position,
    TopologyError, TopologySnapshot,
};

use crate::command::{CommandError, CommandOutput, CommandRunner};
use crate::shutdown::{CleanupTask, ShutdownHooks};

/// Settling time after a mode bind. Placement calls issued directly after
/// binding are unreliable; xrandr exposes no completion event to wait on,
/// so this stays a fixed delay.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Seam for issuing external commands, so tests can script outcomes.
#[allow(async_fn_in_trait)]
pub trait CommandExec {
    /// Runs a command, capturing output; non-zero exit is not an error.
    async fn run(&self, argv: &[&str]) -> Result<CommandOutput, CommandError>;

    /// Runs a command and requires a zero exit code.
    async fn run_checked(&self, argv: &[&str]) -> Result<String, CommandError>;
}

impl CommandExec for CommandRunner {
    async fn run(&self, argv: &[&str]) -> Result<CommandOutput, CommandError> {
        CommandRunner::run(self, argv).await
    }

    async fn run_checked(&self, argv: &[&str]) -> Result<String, CommandError> {
        CommandRunner::run_checked(self, argv, None).await
    }
}

/// Lifecycle state of the virtual screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenState {
    /// No mode has been registered.
    Absent,
    /// The mode exists on the device but the output is not bound yet.
    ModeRegistered {
        /// The registered mode name.
        mode: String,
    },
    /// The output is driving the mode.
    Bound {
        /// The bound mode name.
        mode: String,
    },
}

/// Errors raised by virtual screen operations.
#[derive(Debug, Error)]
pub enum ScreenError {
    /// No virtual device is configured, or the configured one is missing.
    #[error("no virtual screen selected; configure an unused output device first")]
    NoVirtualScreenSelected,

    /// Registering the mode failed even after synthesizing a timing.
    #[error("failed to register mode {mode}: {command} (exit {code})\n{output}")]
    ModeCreationFailed {
        /// The mode that could not be registered.
        mode: String,
        /// The failing command line.
        command: String,
        /// Its exit code.
        code: i32,
        /// Its captured output.
        output: String,
    },

    /// Topology resolution failed.
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// The timing generator produced no usable modeline.
    #[error(transparent)]
    Modeline(#[from] ModelineError),

    /// An external command could not be run.
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Controller for the virtual display output.
pub struct XRandr<E = CommandRunner> {
    exec: E,
    hooks: ShutdownHooks,
    virt_name: Option<String>,
    state: ScreenState,
    settle_delay: Duration,
    snapshot: Option<TopologySnapshot>,
}

impl<E: CommandExec> XRandr<E> {
    /// Creates a controller for the given virtual device name.
    pub fn new(exec: E, hooks: ShutdownHooks, virt_name: Option<String>) -> Self {
        Self {
            exec,
            hooks,
            virt_name: virt_name.filter(|name| !name.is_empty()),
            state: ScreenState::Absent,
            settle_delay: DEFAULT_SETTLE_DELAY,
            snapshot: None,
        }
    }

    /// Overrides the post-bind settling delay.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// The configured virtual device name.
    pub fn virt_name(&self) -> Option<&str> {
        self.virt_name.as_deref()
    }

    /// Changes the configured virtual device name.
    pub fn set_virt_name(&mut self, name: Option<String>) {
        self.virt_name = name.filter(|n| !n.is_empty());
    }

    /// The current lifecycle state.
    pub fn state(&self) -> &ScreenState {
        &self.state
    }

    /// Whether the virtual output is currently driving a mode.
    pub fn is_bound(&self) -> bool {
        matches!(self.state, ScreenState::Bound { .. })
    }

    /// The most recent topology snapshot, if one was taken.
    pub fn snapshot(&self) -> Option<&TopologySnapshot> {
        self.snapshot.as_ref()
    }

    /// Re-reads the topology from the display server.
    pub async fn refresh(&mut self) -> Result<&TopologySnapshot, ScreenError> {
        let output = self.exec.run(&["xrandr"]).await?;
        let snapshot = TopologySnapshot::parse(&output.text, self.virt_name.as_deref())?;
        Ok(self.snapshot.insert(snapshot))
    }

    /// Refreshes and returns the primary display.
    pub async fn primary_screen(&mut self) -> Result<Display, ScreenError> {
        Ok(self.refresh().await?.primary().clone())
    }

    /// Refreshes and returns the virtual display.
    pub async fn virtual_screen(&mut self) -> Result<Display, ScreenError> {
        self.refresh()
            .await?
            .virt()
            .cloned()
            .ok_or(ScreenError::NoVirtualScreenSelected)
    }

    /// Creates the virtual screen: registers the mode (synthesizing a
    /// timing when the driver does not know it yet), binds the output,
    /// waits out the settling delay, then applies placement relative to
    /// the primary display, or the preferred placement when `position` is
    /// unset.
    pub async fn create_virtual_screen(
        &mut self,
        width: u32,
        height: u32,
        portrait: bool,
        hidpi: bool,
        position: Option<Position>,
    ) -> Result<(), ScreenError> {
        let snapshot = self.refresh().await?;
        let (device, primary) = {
            let virt = snapshot.virt().ok_or(ScreenError::NoVirtualScreenSelected)?;
            (virt.name.clone(), snapshot.primary().name.clone())
        };

        let (width, height) = effective_geometry(width, height, portrait, hidpi);
        let mode = mode_name(width, height);
        tracing::info!(device = %device, mode = %mode, "creating virtual screen");

        self.register_mode(&device, &mode, width, height).await?;
        self.state = ScreenState::ModeRegistered { mode: mode.clone() };
        // The mode now exists on the device; teardown must run at process
        // exit even if the bind below never completes.
        self.hooks.register(CleanupTask::DeleteVirtualScreen);

        self.exec
            .run_checked(&["xrandr", "--output", &device, "--mode", &mode])
            .await?;
        self.state = ScreenState::Bound { mode };

        tokio::time::sleep(self.settle_delay).await;

        match position {
            Some(position) => {
                self.exec
                    .run_checked(&[
                        "xrandr",
                        "--output",
                        &device,
                        position.xrandr_flag(),
                        &primary,
                    ])
                    .await?;
            }
            None => {
                self.exec
                    .run_checked(&["xrandr", "--output", &device, "--preferred"])
                    .await?;
            }
        }

        self.refresh().await?;
        tracing::info!(device = %device, "virtual screen created");
        Ok(())
    }

    /// Tears the virtual screen down. Calling this when no mode was ever
    /// registered is a no-op; otherwise each command is best-effort so
    /// cleanup also completes during abnormal shutdown.
    pub async fn delete_virtual_screen(&mut self) {
        if let Err(error) = self.refresh().await {
            tracing::warn!(%error, "topology refresh before teardown failed");
        }
        let mode = match &self.state {
            ScreenState::Absent => return,
            ScreenState::ModeRegistered { mode } | ScreenState::Bound { mode } => mode.clone(),
        };
        let Some(device) = self.virt_name.clone() else {
            self.state = ScreenState::Absent;
            return;
        };
        tracing::info!(device = %device, mode = %mode, "deleting virtual screen");

        match self.exec.run(&["xrandr", "--output", &device, "--off"]).await {
            Ok(output) if output.code != 0 => {
                tracing::warn!(device = %device, code = output.code, output = %output.text, "failed to turn off output");
            }
            Ok(_) => {}
            Err(error) => tracing::warn!(device = %device, %error, "failed to turn off output"),
        }
        match self
            .exec
            .run(&["xrandr", "--delmode", &device, &mode])
            .await
        {
            Ok(output) if output.code != 0 => {
                tracing::warn!(mode = %mode, code = output.code, output = %output.text, "failed to delete mode");
            }
            Ok(_) => {}
            Err(error) => tracing::warn!(mode = %mode, %error, "failed to delete mode"),
        }

        self.hooks.deregister(CleanupTask::DeleteVirtualScreen);
        self.state = ScreenState::Absent;
        if let Err(error) = self.refresh().await {
            tracing::warn!(%error, "topology refresh after teardown failed");
        }
    }

    async fn register_mode(
        &mut self,
        device: &str,
        mode: &str,
        width: u32,
        height: u32,
    ) -> Result<(), ScreenError> {
        let addmode = ["xrandr", "--addmode", device, mode];
        match self.exec.run_checked(&addmode).await {
            Ok(_) => return Ok(()),
            Err(error) => {
                tracing::debug!(mode = %mode, %error, "addmode failed, synthesizing a timing");
            }
        }

        // The driver does not know the mode yet: generate a standard
        // timing, register it as a new mode, then add it again.
        let width_arg = width.to_string();
        let height_arg = height.to_string();
        let cvt = self.exec.run(&["cvt", &width_arg, &height_arg]).await?;
        let timing = parse_modeline(&cvt.text)?;

        let mut newmode = vec!["xrandr", "--newmode", mode];
        newmode.extend(timing.split_whitespace());
        self.exec
            .run_checked(&newmode)
            .await
            .map_err(|error| mode_creation_failed(mode, error))?;
        self.exec
            .run_checked(&addmode)
            .await
            .map_err(|error| mode_creation_failed(mode, error))?;
        Ok(())
    }
}

fn mode_creation_failed(mode: &str, error: CommandError) -> ScreenError {
    match error {
        CommandError::Failed {
            command,
            code,
            output,
        } => ScreenError::ModeCreationFailed {
            mode: mode.to_string(),
            command,
            code,
            output,
        },
        other => ScreenError::Command(other),
    }
}

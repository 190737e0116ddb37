//! Service orchestrator wiring the daemon's components together.
//!
//! Owns the virtual display controller, the VNC supervisor and the
//! shutdown hook registry, and exposes the operations the CLI drives.
//! Everything runs on one cooperative runtime: at most one screen
//! creation/deletion and one VNC session are ever in flight, enforced by
//! the components' state checks rather than locks.

use thiserror::Error;
use tokio::sync::broadcast;
use vdisplay::{Display, GeometryError};

use crate::command::CommandRunner;
use crate::config::Config;
use crate::shutdown::{CleanupTask, ShutdownHooks};
use crate::vnc::{VncError, VncEvent, VncState, VncSupervisor};
use crate::xrandr::{ScreenError, XRandr};

/// Errors raised by orchestrated operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The virtual screen cannot be deleted while the server still uses it.
    #[error("turn off the VNC server before deleting the virtual screen")]
    VncStillRunning,

    /// A virtual screen operation failed.
    #[error(transparent)]
    Screen(#[from] ScreenError),

    /// A VNC session operation failed.
    #[error(transparent)]
    Vnc(#[from] VncError),

    /// The configured placement is invalid.
    #[error(transparent)]
    Position(#[from] GeometryError),
}

/// Coordinates the virtual display controller and the VNC supervisor.
pub struct Orchestrator {
    config: Config,
    hooks: ShutdownHooks,
    screen: XRandr<CommandRunner>,
    vnc: VncSupervisor,
}

impl Orchestrator {
    /// Wires up the components from a validated configuration.
    pub fn new(config: Config) -> Self {
        let hooks = ShutdownHooks::new();
        let runner = CommandRunner::new();
        let screen = XRandr::new(runner.clone(), hooks.clone(), config.device());
        let vnc = VncSupervisor::new(
            runner,
            hooks.clone(),
            config.password_path(),
            config.session_log_path(),
        );
        Self {
            config,
            hooks,
            screen,
            vnc,
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns a receiver for session notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<VncEvent> {
        self.vnc.subscribe()
    }

    /// The current VNC session state.
    pub fn vnc_state(&self) -> VncState {
        self.vnc.state()
    }

    /// Refreshes and returns the display topology.
    pub async fn screens(&mut self) -> Result<Vec<Display>, ServiceError> {
        let snapshot = self.screen.refresh().await?;
        Ok(snapshot.screens().to_vec())
    }

    /// Creates the virtual screen from the configured geometry.
    pub async fn create_screen(&mut self) -> Result<(), ServiceError> {
        let position = self.config.position()?;
        self.screen
            .create_virtual_screen(
                self.config.screen.width,
                self.config.screen.height,
                self.config.screen.portrait,
                self.config.screen.hidpi,
                position,
            )
            .await?;
        Ok(())
    }

    /// Tears the virtual screen down. Refused while the VNC server still
    /// serves it.
    pub async fn delete_screen(&mut self) -> Result<(), ServiceError> {
        if self.vnc.state() != VncState::Off {
            return Err(ServiceError::VncStillRunning);
        }
        self.screen.delete_virtual_screen().await;
        Ok(())
    }

    /// Starts the VNC server on the configured port.
    pub async fn start_vnc(&mut self) -> Result<(), ServiceError> {
        self.vnc
            .start(
                &mut self.screen,
                self.config.vnc.port,
                &self.config.vnc.extra_args,
            )
            .await?;
        Ok(())
    }

    /// Stops the VNC server.
    pub async fn stop_vnc(&mut self, force: bool) -> Result<(), ServiceError> {
        self.vnc.stop(force).await?;
        Ok(())
    }

    /// Stores the VNC password.
    pub async fn store_password(&self, password: &str) -> Result<(), ServiceError> {
        self.vnc.store_password(password).await?;
        Ok(())
    }

    /// Removes the stored VNC password.
    pub fn clear_password(&self) -> Result<(), ServiceError> {
        self.vnc.clear_password()?;
        Ok(())
    }

    /// Runs the armed cleanup tasks, most recently registered first.
    ///
    /// Both the signal path and the normal exit path end up here. The
    /// session hook is registered after the display hook, so LIFO order
    /// stops the server before the display it serves is torn down.
    pub async fn shutdown(&mut self) {
        let tasks = self.hooks.drain();
        if tasks.is_empty() {
            return;
        }
        tracing::info!(count = tasks.len(), "running shutdown hooks");
        for task in tasks {
            match task {
                CleanupTask::StopSession => {
                    if let Err(error) = self.vnc.stop(true).await {
                        tracing::warn!(%error, "forced session stop failed");
                    }
                }
                CleanupTask::DeleteVirtualScreen => {
                    self.screen.delete_virtual_screen().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.daemon.data_dir = dir.to_path_buf();
        config.screen.device = "VIRTUAL1".to_string();
        config
    }

    #[tokio::test]
    async fn test_new_starts_with_session_off() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(test_config(dir.path()));
        assert_eq!(orchestrator.vnc_state(), VncState::Off);
    }

    #[tokio::test]
    async fn test_shutdown_with_no_hooks_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = Orchestrator::new(test_config(dir.path()));
        orchestrator.shutdown().await;
        assert_eq!(orchestrator.vnc_state(), VncState::Off);
    }

    #[tokio::test]
    async fn test_delete_screen_without_create_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = Orchestrator::new(test_config(dir.path()));
        // Nothing was ever created; deletion is a no-op even when the
        // topology query itself cannot run.
        orchestrator.delete_screen().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_screen_rejects_invalid_position() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.screen.position = "diagonal".to_string();
        let mut orchestrator = Orchestrator::new(config);
        let err = orchestrator.create_screen().await.unwrap_err();
        assert!(matches!(err, ServiceError::Position(_)));
    }

    #[tokio::test]
    async fn test_subscribe_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(test_config(dir.path()));
        let events = orchestrator.subscribe();
        drop(events);
    }
}

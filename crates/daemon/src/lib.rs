//! # VirtShare Daemon Library
//!
//! This crate provides the service side of VirtShare: it turns an unused
//! output of an X11 desktop into a virtual monitor and shares it over VNC
//! so a tablet or secondary device can act as an extended display.
//!
//! ## Overview
//!
//! - **Command Execution**: captured one-shot commands and a streamed
//!   long-lived child for the VNC server
//! - **Virtual Display Control**: mode registration, binding and
//!   placement via `xrandr`, with idempotent teardown
//! - **Session Supervision**: the x11vnc child's lifecycle, with state
//!   inferred from its output stream
//! - **Shutdown Hooks**: deterministic LIFO cleanup on signals and exit
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      Orchestrator                       │
//! ├─────────────────────────────────────────────────────────┤
//! │                                                         │
//! │  ┌───────────────┐   ┌───────────────┐   ┌───────────┐  │
//! │  │    XRandr     │   │ VncSupervisor │   │ Shutdown  │  │
//! │  │  controller   │   │               │   │   hooks   │  │
//! │  └───────┬───────┘   └───────┬───────┘   └───────────┘  │
//! │          │                   │                          │
//! │  ┌───────┴───────────────────┴───────┐                  │
//! │  │           CommandRunner           │                  │
//! │  └───────────────────────────────────┘                  │
//! └─────────────────────────────────────────────────────────┘
//!         xrandr / cvt              x11vnc child
//! ```
//!
//! The daemon runs on a single-threaded cooperative runtime: topology and
//! mode commands are awaited to completion before anything else runs, so
//! a refresh always strictly follows the mutating command that made it
//! necessary, and the per-component state enums are enough to keep every
//! operation exclusive with itself.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Config, Orchestrator};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     config.validate()?;
//!
//!     let mut orchestrator = Orchestrator::new(config);
//!     orchestrator.create_screen().await?;
//!     orchestrator.start_vnc().await?;
//!
//!     // ... wait for the session to end or for a shutdown signal ...
//!
//!     orchestrator.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: configuration loading and defaults
//! - [`command`]: external command execution
//! - [`xrandr`]: virtual display lifecycle control
//! - [`vnc`]: VNC server supervision
//! - [`shutdown`]: process-wide cleanup hook registry
//! - [`orchestrator`]: component wiring and shutdown ordering

pub mod command;
pub mod config;
pub mod orchestrator;
pub mod shutdown;
pub mod vnc;
pub mod xrandr;

// Re-export the display library for convenience
pub use vdisplay;

// Re-export config types for convenience
pub use config::{default_config_path, Config, ConfigError};

// Re-export command types for convenience
pub use command::{
    ChildHandle, CommandError, CommandOutput, CommandRunner, ProcessEvent, INDETERMINATE_EXIT,
};

// Re-export controller types for convenience
pub use xrandr::{CommandExec, ScreenError, ScreenState, XRandr, DEFAULT_SETTLE_DELAY};

// Re-export supervisor types for convenience
pub use vnc::{VncError, VncEvent, VncState, VncSupervisor, DEFAULT_GRACE_PERIOD};

// Re-export shutdown types for convenience
pub use shutdown::{CleanupTask, ShutdownHooks};

// Re-export orchestrator types for convenience
pub use orchestrator::{Orchestrator, ServiceError};

//! VirtShare Daemon
//!
//! Turns an unused X11 output into a virtual monitor and shares it over
//! VNC so a tablet or secondary device can act as an extended display.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal::unix::{signal, SignalKind};

use daemon::config::Config;
use daemon::orchestrator::Orchestrator;
use daemon::vnc::{VncEvent, VncState};

/// VirtShare daemon - virtual display and VNC server supervision.
#[derive(Parser, Debug)]
#[command(name = "virtshare")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Append daemon logs to a file instead of stderr
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Create the virtual screen and share it over VNC
    Start {
        /// Place the virtual screen left of the primary monitor
        #[arg(long)]
        left: bool,

        /// Place the virtual screen right of the primary monitor
        #[arg(long)]
        right: bool,

        /// Place the virtual screen above the primary monitor
        #[arg(long)]
        above: bool,

        /// Place the virtual screen below the primary monitor
        #[arg(long)]
        below: bool,

        /// Portrait mode: width and height of the screen are swapped
        #[arg(long)]
        portrait: bool,

        /// HiDPI mode: width and height are doubled
        #[arg(long)]
        hidpi: bool,

        /// Override the configured VNC port
        #[arg(long)]
        port: Option<u16>,
    },

    /// List the displays reported by the display server
    Screens {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Manage the VNC password
    #[command(subcommand)]
    Password(PasswordCommands),
}

/// Subcommands for password management.
#[derive(Subcommand, Debug, Clone)]
pub enum PasswordCommands {
    /// Store a password required for VNC connections
    Set {
        /// The password to store
        password: String,
    },

    /// Delete the stored password
    Clear,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Initialize tracing
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.clone()
    };
    let _log_guard = init_tracing(&filter, cli.log_file.as_deref())?;

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Start {
            left,
            right,
            above,
            below,
            portrait,
            hidpi,
            port,
        } => {
            if let Some(position) = position_override(left, right, above, below)? {
                config.screen.position = position.to_string();
            }
            if portrait {
                config.screen.portrait = true;
            }
            if hidpi {
                config.screen.hidpi = true;
            }
            if let Some(port) = port {
                config.vnc.port = port;
            }
            config.validate()?;

            check_environment(&config)?;
            if config.device().is_none() {
                anyhow::bail!(
                    "no virtual screen device configured; set screen.device in the config file"
                );
            }

            let orchestrator = Orchestrator::new(config);
            run_start(orchestrator).await?;
        }
        Commands::Screens { json } => {
            which::which("xrandr").map_err(|_| anyhow::anyhow!("xrandr is not installed"))?;
            let mut orchestrator = Orchestrator::new(config);
            let screens = orchestrator.screens().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&screens)?);
            } else {
                for screen in screens {
                    println!("{screen}");
                }
            }
        }
        Commands::Password(command) => {
            std::fs::create_dir_all(&config.daemon.data_dir).with_context(|| {
                format!(
                    "Failed to create data directory: {}",
                    config.daemon.data_dir.display()
                )
            })?;
            let orchestrator = Orchestrator::new(config);
            match command {
                PasswordCommands::Set { password } => {
                    orchestrator.store_password(&password).await?;
                    println!("Password stored");
                }
                PasswordCommands::Clear => {
                    orchestrator.clear_password()?;
                    println!("Password cleared");
                }
            }
        }
    }

    Ok(())
}

/// Initializes the tracing subscriber, optionally writing to a log file.
///
/// Returns the appender guard that must stay alive for the program's
/// lifetime when a log file is used.
fn init_tracing(
    filter: &str,
    log_file: Option<&Path>,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    match log_file {
        Some(path) => {
            let directory = path.parent().unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("log file path has no file name"))?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            Ok(None)
        }
    }
}

/// Resolves the mutually exclusive position flags into a placement keyword.
fn position_override(
    left: bool,
    right: bool,
    above: bool,
    below: bool,
) -> anyhow::Result<Option<&'static str>> {
    let chosen: Vec<&'static str> = [
        (left, "left"),
        (right, "right"),
        (above, "above"),
        (below, "below"),
    ]
    .iter()
    .filter(|(flag, _)| *flag)
    .map(|(_, name)| *name)
    .collect();

    match chosen.as_slice() {
        [] => Ok(None),
        [position] => Ok(Some(position)),
        _ => anyhow::bail!("choose at most one of --left, --right, --above, --below"),
    }
}

/// Checks the environment before touching the display server.
fn check_environment(config: &Config) -> anyhow::Result<()> {
    if std::env::var("XDG_SESSION_TYPE")
        .map(|session| session.to_lowercase() == "wayland")
        .unwrap_or(false)
    {
        anyhow::bail!("Wayland is not supported; an X11 session is required");
    }
    for binary in ["xrandr", "cvt", "x11vnc"] {
        which::which(binary).map_err(|_| anyhow::anyhow!("{binary} is not installed"))?;
    }
    std::fs::create_dir_all(&config.daemon.data_dir).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            config.daemon.data_dir.display()
        )
    })?;
    Ok(())
}

/// Creates the virtual screen, starts the VNC server and runs until the
/// session ends or a shutdown signal arrives.
async fn run_start(mut orchestrator: Orchestrator) -> anyhow::Result<()> {
    let mut events = orchestrator.subscribe();

    if let Err(error) = orchestrator.create_screen().await {
        orchestrator.shutdown().await;
        return Err(error.into());
    }
    if let Err(error) = orchestrator.start_vnc().await {
        orchestrator.shutdown().await;
        return Err(error.into());
    }
    tracing::info!(
        port = orchestrator.config().vnc.port,
        "VNC server started; connect a viewer to share the virtual screen"
    );

    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to register SIGHUP handler")?;
    let mut sigquit = signal(SignalKind::quit()).context("Failed to register SIGQUIT handler")?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(VncEvent::StateChanged(state)) => {
                    tracing::info!(state = %state, "session state changed");
                    if state == VncState::Off {
                        break;
                    }
                }
                Ok(VncEvent::Error { message }) => {
                    tracing::error!(message = %message, "session error");
                }
                Err(_) => break,
            },
            _ = sigint.recv() => {
                tracing::info!("received SIGINT");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM");
                break;
            }
            _ = sighup.recv() => {
                tracing::info!("received SIGHUP");
                break;
            }
            _ = sigquit.recv() => {
                tracing::info!("received SIGQUIT");
                break;
            }
        }
    }

    // Session stop runs before display teardown; the display must outlive
    // the server using it.
    orchestrator.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_start_command_defaults() {
        let cli = Cli::try_parse_from(["virtshare", "start"]).unwrap();
        match cli.command {
            Commands::Start {
                left,
                right,
                above,
                below,
                portrait,
                hidpi,
                port,
            } => {
                assert!(!left && !right && !above && !below);
                assert!(!portrait && !hidpi);
                assert_eq!(port, None);
            }
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_start_with_position_flag() {
        let cli = Cli::try_parse_from(["virtshare", "start", "--below"]).unwrap();
        match cli.command {
            Commands::Start { below, .. } => assert!(below),
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_start_with_portrait_hidpi() {
        let cli =
            Cli::try_parse_from(["virtshare", "start", "--below", "--portrait", "--hidpi"])
                .unwrap();
        match cli.command {
            Commands::Start {
                below,
                portrait,
                hidpi,
                ..
            } => {
                assert!(below && portrait && hidpi);
            }
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_start_with_port() {
        let cli = Cli::try_parse_from(["virtshare", "start", "--port", "5901"]).unwrap();
        match cli.command {
            Commands::Start { port, .. } => assert_eq!(port, Some(5901)),
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_screens_command() {
        let cli = Cli::try_parse_from(["virtshare", "screens"]).unwrap();
        match cli.command {
            Commands::Screens { json } => assert!(!json),
            _ => panic!("Expected Screens command"),
        }
    }

    #[test]
    fn test_screens_json() {
        let cli = Cli::try_parse_from(["virtshare", "screens", "--json"]).unwrap();
        match cli.command {
            Commands::Screens { json } => assert!(json),
            _ => panic!("Expected Screens command"),
        }
    }

    #[test]
    fn test_password_set() {
        let cli = Cli::try_parse_from(["virtshare", "password", "set", "hunter2"]).unwrap();
        match cli.command {
            Commands::Password(PasswordCommands::Set { password }) => {
                assert_eq!(password, "hunter2");
            }
            _ => panic!("Expected Password Set command"),
        }
    }

    #[test]
    fn test_password_clear() {
        let cli = Cli::try_parse_from(["virtshare", "password", "clear"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Password(PasswordCommands::Clear)
        ));
    }

    #[test]
    fn test_password_set_requires_value() {
        assert!(Cli::try_parse_from(["virtshare", "password", "set"]).is_err());
    }

    #[test]
    fn test_global_verbose_flag() {
        let cli = Cli::try_parse_from(["virtshare", "--verbose", "screens"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn test_global_config_flag() {
        let cli =
            Cli::try_parse_from(["virtshare", "--config", "/tmp/virtshare.toml", "screens"])
                .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/virtshare.toml")));
    }

    #[test]
    fn test_global_log_file_flag() {
        let cli = Cli::try_parse_from([
            "virtshare",
            "start",
            "--log-file",
            "/tmp/virtshare-daemon.log",
        ])
        .unwrap();
        assert_eq!(cli.log_file, Some(PathBuf::from("/tmp/virtshare-daemon.log")));
    }

    #[test]
    fn test_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["virtshare", "screens", "--verbose"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn test_missing_subcommand_fails() {
        assert!(Cli::try_parse_from(["virtshare"]).is_err());
    }

    #[test]
    fn test_invalid_command_fails() {
        assert!(Cli::try_parse_from(["virtshare", "invalid"]).is_err());
    }

    #[test]
    fn test_position_override_none() {
        assert_eq!(position_override(false, false, false, false).unwrap(), None);
    }

    #[test]
    fn test_position_override_single() {
        assert_eq!(
            position_override(true, false, false, false).unwrap(),
            Some("left")
        );
        assert_eq!(
            position_override(false, false, false, true).unwrap(),
            Some("below")
        );
    }

    #[test]
    fn test_position_override_conflict() {
        assert!(position_override(true, true, false, false).is_err());
        assert!(position_override(false, true, false, true).is_err());
    }
}

//! WebShell Daemon
//!
//! Serves a local shell to browser terminals over WebSocket.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::config::{default_config_path, Config};
use daemon::orchestrator::{OrchestratorEvent, ServerOrchestrator};
use tracing_subscriber::EnvFilter;

/// WebShell Daemon - serves a local shell to browser terminals over WebSocket.
#[derive(Parser, Debug)]
#[command(name = "webshell-daemon")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the WebSocket server
    Start {
        /// Address to listen on (overrides config and WEBSHELL_BIND)
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,

        /// Shell to spawn per connection (overrides config and SHELL_COMMAND)
        #[arg(long, value_name = "PATH")]
        shell: Option<String>,

        /// Comma-separated list of allowed origins (overrides config and ALLOWED_ORIGINS)
        #[arg(long, value_name = "LIST")]
        allowed_origins: Option<String>,

        /// Accept connections from any origin
        #[arg(long, conflicts_with = "allowed_origins")]
        allow_all_origins: bool,
    },

    /// Inspect or create the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Subcommands for configuration management.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    // Runs before loading so a broken file can be replaced.
    if let Commands::Config(ConfigCommands::Init { force }) = cli.command {
        return init_config(&config_path, force);
    }

    let mut config = Config::load(&config_path)?;
    let env_overrides = config.apply_env_overrides();

    // RUST_LOG wins, then --verbose, then the configured level.
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::debug!("Using config file: {:?}", config_path);
    for applied in &env_overrides {
        tracing::info!(
            "Overriding {} from environment ({}): {}",
            applied.key,
            applied.var,
            applied.value
        );
    }

    match cli.command {
        Commands::Start {
            bind,
            shell,
            allowed_origins,
            allow_all_origins,
        } => {
            apply_start_overrides(
                &mut config,
                bind,
                shell,
                allowed_origins,
                allow_all_origins,
            );
            config.validate()?;

            tracing::info!("WebShell daemon starting...");
            let mut orchestrator = ServerOrchestrator::new(config);
            run_headless(&mut orchestrator).await?;
        }
        Commands::Config(ConfigCommands::Show) => {
            print!("{}", config.to_toml()?);
        }
        Commands::Config(ConfigCommands::Init { force }) => {
            init_config(&config_path, force)?;
        }
    }

    Ok(())
}

/// Writes the default configuration to `path`.
fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

/// Applies `start` flags on top of file and environment settings.
fn apply_start_overrides(
    config: &mut Config,
    bind: Option<String>,
    shell: Option<String>,
    allowed_origins: Option<String>,
    allow_all_origins: bool,
) {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(shell) = shell {
        config.session.default_shell = shell;
    }
    if let Some(origins) = allowed_origins {
        config.security.set_origins_from_list(&origins);
    }
    if allow_all_origins {
        config.security.allow_all_origins = true;
    }
}

/// Run the server until a shutdown signal arrives.
async fn run_headless(orchestrator: &mut ServerOrchestrator) -> anyhow::Result<()> {
    let mut events = orchestrator.subscribe();

    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                OrchestratorEvent::StateChanged(state) => {
                    tracing::debug!("Orchestrator state: {:?}", state);
                }
                OrchestratorEvent::SessionOpened { session_id, peer } => {
                    tracing::debug!(session_id = %session_id, peer = %peer, "Session opened");
                }
                OrchestratorEvent::SessionClosed { session_id, reason } => {
                    tracing::debug!(session_id = %session_id, reason = %reason, "Session closed");
                }
                OrchestratorEvent::ConnectionRejected { peer, reason } => {
                    tracing::debug!(peer = %peer, reason = %reason, "Connection rejected");
                }
                OrchestratorEvent::Error { message } => {
                    tracing::error!("Orchestrator error: {}", message);
                }
            }
        }
    });

    orchestrator.start().await?;

    wait_for_shutdown_signal().await?;
    tracing::info!("Received shutdown signal");

    orchestrator.stop().await?;

    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}

/// Wait for Ctrl-C.
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")
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
    fn test_start_command() {
        let cli = Cli::try_parse_from(["webshell-daemon", "start"]).unwrap();
        match cli.command {
            Commands::Start {
                bind,
                shell,
                allowed_origins,
                allow_all_origins,
            } => {
                assert!(bind.is_none());
                assert!(shell.is_none());
                assert!(allowed_origins.is_none());
                assert!(!allow_all_origins);
            }
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_start_with_overrides() {
        let cli = Cli::try_parse_from([
            "webshell-daemon",
            "start",
            "--bind",
            "0.0.0.0:9000",
            "--shell",
            "/bin/bash",
            "--allowed-origins",
            "http://a.test,http://b.test",
        ])
        .unwrap();
        match cli.command {
            Commands::Start {
                bind,
                shell,
                allowed_origins,
                allow_all_origins,
            } => {
                assert_eq!(bind.as_deref(), Some("0.0.0.0:9000"));
                assert_eq!(shell.as_deref(), Some("/bin/bash"));
                assert_eq!(allowed_origins.as_deref(), Some("http://a.test,http://b.test"));
                assert!(!allow_all_origins);
            }
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_allow_all_conflicts_with_list() {
        let result = Cli::try_parse_from([
            "webshell-daemon",
            "start",
            "--allow-all-origins",
            "--allowed-origins",
            "http://a.test",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_subcommands() {
        let cli = Cli::try_parse_from(["webshell-daemon", "config", "show"]).unwrap();
        assert!(matches!(cli.command, Commands::Config(ConfigCommands::Show)));

        let cli = Cli::try_parse_from(["webshell-daemon", "config", "init", "--force"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config(ConfigCommands::Init { force: true })
        ));
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "webshell-daemon",
            "start",
            "--verbose",
            "--config",
            "/tmp/webshell.toml",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/webshell.toml")));
    }

    #[test]
    fn test_apply_start_overrides() {
        let mut config = Config::default();
        apply_start_overrides(
            &mut config,
            Some("127.0.0.1:9999".to_string()),
            Some("/bin/sh".to_string()),
            Some("http://x.test, http://y.test".to_string()),
            false,
        );

        assert_eq!(config.server.bind, "127.0.0.1:9999");
        assert_eq!(config.session.default_shell, "/bin/sh");
        assert_eq!(
            config.security.allowed_origins,
            vec!["http://x.test", "http://y.test"]
        );

        apply_start_overrides(&mut config, None, None, None, true);
        assert!(config.security.allow_all_origins);
        assert_eq!(config.server.bind, "127.0.0.1:9999");
    }

    #[test]
    fn test_init_config_respects_force() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("webshell").join("config.toml");

        init_config(&path, false).unwrap();
        assert_eq!(Config::load(&path).unwrap(), Config::default());

        assert!(init_config(&path, false).is_err());

        std::fs::write(&path, "not [valid").unwrap();
        init_config(&path, true).unwrap();
        assert!(Config::load(&path).is_ok());
    }

    #[test]
    fn test_missing_subcommand_fails() {
        assert!(Cli::try_parse_from(["webshell-daemon"]).is_err());
    }
}

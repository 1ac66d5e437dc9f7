//! # WebShell Daemon Library
//!
//! This crate serves a local shell to browser terminals. Each WebSocket
//! connection gets its own shell on its own pseudoterminal, and the two are
//! joined by a [`bridge::SessionBridge`] until either side goes away.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Server Orchestrator                      │
//! │              (TcpListener, accept loop, shutdown)            │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌──────────────────────────────────────────────────────┐    │
//! │  │  Acceptor: path check, origin policy, WS handshake   │    │
//! │  └──────────────────────────────────────────────────────┘    │
//! │            │                               │                 │
//! │  ┌─────────▼─────────┐           ┌─────────▼─────────┐       │
//! │  │ WsSource / WsSink │◀─bridge──▶│ PtySpawner / PTY  │       │
//! │  └───────────────────┘           └───────────────────┘       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Config, ServerOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load_default()?;
//!     config.apply_env_overrides();
//!     config.validate()?;
//!
//!     let mut orchestrator = ServerOrchestrator::new(config);
//!     let addr = orchestrator.start().await?;
//!     println!("listening on {addr}");
//!
//!     // Wait for shutdown signal...
//!
//!     orchestrator.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading, environment overrides and validation
//! - [`origin`]: `Origin` header policy
//! - [`session`]: PTY-backed shell processes
//! - [`network`]: WebSocket channel and connection acceptor
//! - [`orchestrator`]: Listener lifecycle and events

pub mod config;
pub mod network;
pub mod orchestrator;
pub mod origin;
pub mod session;

// Re-export bridge for convenience
pub use bridge;

// Re-export config types for convenience
pub use config::{Config, ConfigError, EnvOverride};

// Re-export origin types for convenience
pub use origin::OriginPolicy;

// Re-export session types for convenience
pub use session::{PtyProcess, PtySpawner, ShellCommand};

// Re-export network types for convenience
pub use network::{ws_channel, AcceptOutcome, Acceptor, Rejection, WsSink, WsSource};

// Re-export orchestrator types for convenience
pub use orchestrator::{OrchestratorEvent, OrchestratorState, ServerOrchestrator};

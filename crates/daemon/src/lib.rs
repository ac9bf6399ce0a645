//! # Stashbot Daemon Library
//!
//! This crate provides the bot that saves chat attachments into a confined
//! directory tree on the host machine.
//!
//! ## Overview
//!
//! - **Path Confinement**: every user path is resolved against a fixed root
//! - **Downloads**: attachments are streamed to a temp file, then renamed
//! - **Statistics**: concurrency-safe succeeded/failed/pending counters
//! - **Listing**: directory contents rendered as size-bounded messages
//! - **Bot API**: long polling and replies over HTTPS
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Bot Orchestrator                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐    ┌────────────────────┐    ┌───────────┐  │
//! │  │  Bot API   │ ─► │   Command Router   │ ─► │ Directory │  │
//! │  │ (polling)  │    └────────────────────┘    │  Lister   │  │
//! │  └────────────┘       │            │         └───────────┘  │
//! │        ▲              ▼            ▼                        │
//! │        │      ┌──────────────┐ ┌──────────────┐             │
//! │        └───── │   Download   │ │  Path Guard  │             │
//! │      (bytes)  │   Manager    │ └──────────────┘             │
//! │               └──────────────┘                              │
//! │                      │                                      │
//! │                      ▼                                      │
//! │               ┌──────────────┐                              │
//! │               │ StatsTracker │                              │
//! │               └──────────────┘                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{BotOrchestrator, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load_default()?;
//!     config.apply_env_overrides()?;
//!
//!     let orchestrator = BotOrchestrator::new(config)?;
//!     orchestrator.start().await?;
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
//! - [`config`]: Configuration loading and defaults
//! - [`files`]: Path confinement, listing and downloads
//! - [`stats`]: Download statistics
//! - [`network`]: Bot API client
//! - [`router`]: Command routing to handlers
//! - [`orchestrator`]: Main bot coordinator

pub mod config;
pub mod files;
pub mod network;
pub mod orchestrator;
pub mod router;
pub mod stats;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export files types for convenience
pub use files::{
    format_size, DirectoryLister, DownloadError, DownloadManager, DownloadOutcome,
    DownloadRequest, FileSource, ListError, ListedEntry, PathError, PathGuard,
};

// Re-export network types for convenience
pub use network::{ApiError, BotApi};

// Re-export router types for convenience
pub use router::{CommandRouter, RouterError, RouterResult};

// Re-export stats types for convenience
pub use stats::{format_duration, StatsSnapshot, StatsTracker};

// Re-export orchestrator types for convenience
pub use orchestrator::{BotOrchestrator, OrchestratorEvent, OrchestratorState};

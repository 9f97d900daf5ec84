//! # rconbridge - level rewards and identity tracking for RCON game servers
//!
//! rconbridge sits between a chat-bot front end and a fleet of game servers
//! that expose a Source-style remote console. It keeps track of which player
//! owns which platform identity, grants level rewards by sending console
//! commands, and periodically scans every server's player roster.
//!
//! ## Features
//!
//! - **Server registry**: many servers from one `servers.json`, with a default
//!   server and per-server environment overrides for secrets.
//! - **Command gateway**: blocking remote-console calls isolated on bounded
//!   per-server worker lanes with an outer deadline.
//! - **Response classification**: vendor success markers, known error
//!   phrases and silent-success commands.
//! - **Rewards**: a level catalog of command templates and an idempotent
//!   claim ledger.
//! - **Scheduling**: roster scans, autosave snapshots and a heartbeat, each
//!   isolated so one failing task never stops the others.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rconbridge::bridge::Bridge;
//! use rconbridge::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let bridge = Bridge::open(config).await?;
//!     let report = bridge.execute_command(None, "ListPlayers").await?;
//!     println!("{}", report.outcome);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`bridge`] - owning context and every user-facing operation
//! - [`registry`] - server definitions and default selection
//! - [`gateway`] - async command gateway over the blocking transport
//! - [`rcon`] - transport trait and the Source RCON client
//! - [`classify`] - console response classification
//! - [`identity`] - player identities and account links
//! - [`rewards`] - level catalog, claim ledger and command templates
//! - [`scanner`] - roster parsing and reconciliation
//! - [`scheduler`] - periodic tasks
//! - [`storage`] - JSON documents and autosave snapshots
//! - [`config`] - process configuration
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │  CLI / front end│     │    Scheduler    │
//! └─────────────────┘     └─────────────────┘
//!          │                       │
//! ┌─────────────────────────────────────────┐
//! │                 Bridge                  │ ← registry, stores, persistence
//! └─────────────────────────────────────────┘
//!          │
//! ┌─────────────────┐
//! │ Command Gateway │ ← worker lanes, timeouts, metrics
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ RCON transport  │ ← blocking TCP client
//! └─────────────────┘
//! ```

pub mod bridge;
pub mod classify;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod logutil;
pub mod metrics;
pub mod rcon;
pub mod registry;
pub mod rewards;
pub mod scanner;
pub mod scheduler;
pub mod storage;
pub mod validation;

//! # Station Calyx
//!
//! A filesystem-mediated multi-agent orchestration coordinator. Other
//! processes exchange state with the Coordinator purely through files
//! under a shared root directory — there is no RPC surface. Each pulse
//! runs a fixed seven-step cycle:
//!
//! ```text
//! ingest telemetry → check guardrails → expire intents → prioritize
//!   → detect stalls → execute up to N intents → audit
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use station_calyx::collaborators::{FsEvidenceSink, FsIntentArtifactGate};
//! use station_calyx::coordinator::Coordinator;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let root = Path::new("./calyx-root");
//!     let gate = Arc::new(FsIntentArtifactGate::new(root));
//!     let evidence = Arc::new(FsEvidenceSink::new(root));
//!     let coordinator = Coordinator::load(root, gate, evidence).await?;
//!
//!     let report = coordinator.pulse().await;
//!     println!("executed {} intents", report.executions.len());
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod domains;
pub mod error;
pub mod escalation;
pub mod execution;
pub mod fsutil;
pub mod intents;
pub mod manifest;
pub mod state;
pub mod telemetry;
pub mod verification;

pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, CoordinatorStatus, PulseReport};
pub use error::{CoordinatorError, Result};
pub use intents::{AutonomyMode, Intent, Risk};

//! `coordinatorctl`: operator entry point for Station Calyx.

use anyhow::Context;
use clap::Parser;
use station_calyx::cli::{self, Cli};
use station_calyx::collaborators::{FsEvidenceSink, FsIntentArtifactGate};
use station_calyx::config::CoordinatorConfig;
use station_calyx::coordinator::Coordinator;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = CoordinatorConfig::load().context("loading coordinator configuration")?;
    init_tracing(&config);

    let artifact_gate = Arc::new(FsIntentArtifactGate::new(&config.root_dir));
    let evidence = Arc::new(FsEvidenceSink::new(&config.root_dir));
    let coordinator = Coordinator::load(&config.root_dir, artifact_gate, evidence)
        .await
        .context("loading coordinator state")?
        .with_config(config);

    cli::run(cli, &coordinator).await
}

fn init_tracing(config: &CoordinatorConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

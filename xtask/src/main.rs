use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use sitecraft_core::state::AppState;
use sitecraft_core::store::FileStore;
use sitecraft_core::{llm::LlmDriver, telemetry};
use sitecraft_core::{DeployRequest, DeployState, MockPublisher, SendOutcome};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "xtask", version, about = "Automation helpers for Sitecraft")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate and publish a site against the offline model and publisher.
    Smoke,
}

fn main() -> Result<()> {
    telemetry::init_tracing(EnvFilter::new("info"))?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Smoke => smoke_test(),
    }
}

fn smoke_test() -> Result<()> {
    let runtime = Runtime::new()?;
    let temp_dir = TempDir::new()?;
    let state = AppState::new(
        Arc::new(FileStore::new(temp_dir.path().to_path_buf())),
        Arc::new(LlmDriver::fake()),
        Arc::new(MockPublisher),
    );

    let outcome = runtime.block_on(state.send_message("a landing page for xtask"));
    if outcome != SendOutcome::Completed {
        bail!("generation did not complete: {outcome:?}");
    }
    let deployed = runtime.block_on(state.deploy(DeployRequest {
        credential: "smoke-token".into(),
        target_name: "xtask-smoke".into(),
    }));
    let DeployState::Success { url, .. } = deployed else {
        bail!("deploy did not succeed: {deployed:?}");
    };

    let reopened = AppState::new(
        Arc::new(FileStore::new(temp_dir.path().to_path_buf())),
        Arc::new(LlmDriver::fake()),
        Arc::new(MockPublisher),
    );
    if reopened.preview().is_none() {
        bail!("generated document was not persisted");
    }
    info!(
        "projects" = reopened.summaries().len(),
        %url,
        "smoke test site published"
    );

    Ok(())
}

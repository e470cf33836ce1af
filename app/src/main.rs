use clap::{Parser, Subcommand};
use sitecraft::{load_settings, settings_path, Shell};
use sitecraft_core::config::{AiConfigError, AiRuntimeSettings};
use sitecraft_core::llm::{LlmDriver, LlmProviderKind};
use sitecraft_core::publish::{GitHubPagesPublisher, MockPublisher};
use sitecraft_core::state::AppState;
use sitecraft_core::store::FileStore;
use sitecraft_core::{telemetry, Completion, Publisher};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "sitecraft", version, about = "Describe a website and publish it")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    /// Where projects are stored (defaults to the platform data directory).
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Override the model provider (openrouter, openai, mock).
    #[arg(long)]
    provider: Option<LlmProviderKind>,
    /// Use offline mock collaborators for generation and publishing.
    #[arg(long)]
    offline: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored websites.
    List,
    /// Write the active website's HTML to a file.
    Export {
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    telemetry::init_tracing(telemetry::filter_or("warn"))?;
    let cli = Cli::parse();

    let runtime = Runtime::new()?;
    let settings_path = settings_path();
    let settings = runtime.block_on(load_settings(&settings_path))?;
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| settings.resolved_data_dir());
    let kv = Arc::new(FileStore::new(data_dir));
    info!(data_dir = %kv.root().display(), "opening project store");

    let state = AppState::new(kv, completion_for(&cli), publisher_for(&cli));

    match cli.command {
        Some(Command::List) => {
            for summary in state.summaries() {
                println!(
                    "{}\t{}\t{} messages",
                    summary.id, summary.name, summary.message_count
                );
            }
            Ok(())
        }
        Some(Command::Export { out }) => {
            let project = state
                .active_project()
                .ok_or_else(|| anyhow::anyhow!("no active website"))?;
            let code = project
                .generated_code
                .ok_or_else(|| anyhow::anyhow!("`{}` has no generated HTML yet", project.name))?;
            std::fs::write(&out, code)?;
            println!("Wrote {}", out.display());
            Ok(())
        }
        None => runtime.block_on(Shell::new(state, settings, settings_path).run()),
    }
}

fn completion_for(cli: &Cli) -> Arc<dyn Completion> {
    if cli.offline || cli.provider == Some(LlmProviderKind::Mock) {
        return Arc::new(LlmDriver::fake());
    }
    let from_environment = || {
        cli.provider
            .map_or_else(LlmDriver::from_environment, LlmDriver::for_provider)
    };
    let driver = match AiRuntimeSettings::load() {
        Ok(mut settings) => {
            if let Some(provider) = cli.provider {
                settings.provider = provider;
            }
            LlmDriver::from_settings(&settings)
        }
        Err(AiConfigError::Missing) => from_environment(),
        Err(err) => {
            warn!("{}", err.user_message());
            eprintln!("{}", err.user_message());
            from_environment()
        }
    };
    info!(
        provider = ?driver.provider_kind(),
        model = driver.config().model(),
        "using language model"
    );
    Arc::new(driver)
}

fn publisher_for(cli: &Cli) -> Arc<dyn Publisher> {
    if cli.offline {
        Arc::new(MockPublisher)
    } else {
        Arc::new(GitHubPagesPublisher::new())
    }
}

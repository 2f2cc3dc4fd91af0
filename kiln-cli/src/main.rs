//! kiln
//!
//! Self-hosted CI runner: parses `.kiln` workflows, runs their jobs in
//! containers and records every run in a local database.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::{list, retry, run, show, validate, SettingsArgs};

const DEFAULT_LOG_FILTER: &str = "kiln_service=info,kiln=info";

#[derive(Parser, Debug)]
#[command(name = "kiln", version)]
#[command(about = "Run .kiln CI workflows in containers", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: SettingsArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check every workflow under a repository's .kiln directory
    Validate(validate::ValidateArgs),

    /// Fetch a commit and run its workflows
    Run(run::RunArgs),

    /// Run a recorded pipeline again as a new pipeline
    Retry(retry::RetryArgs),

    /// Show a pipeline and its jobs
    Show(show::ShowArgs),

    /// List recent pipelines
    List(list::ListArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = cli.settings.resolve();

    match cli.command {
        Command::Validate(args) => validate::execute(args),
        Command::Run(args) => run::execute(args, settings).await,
        Command::Retry(args) => retry::execute(args, settings).await,
        Command::Show(args) => show::execute(args, settings).await,
        Command::List(args) => list::execute(args, settings).await,
    }
}

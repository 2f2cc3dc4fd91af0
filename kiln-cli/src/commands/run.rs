use crate::commands::Engine;
use crate::output;

use clap::Args;
use color_eyre::Result;

use kiln_service::PushEvent;

/// Fetch a commit and run every workflow it defines
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Repository name (owner/name)
    #[arg(long)]
    pub repo: String,

    /// Clone URL of the repository
    #[arg(long, value_name = "URL")]
    pub url: String,

    /// Commit to check out
    #[arg(long, value_name = "SHA")]
    pub commit: String,

    /// Branch name or refs/heads/ ref the commit belongs to
    #[arg(long, value_name = "REF", default_value = "main")]
    pub branch: String,
}

pub async fn execute(args: RunArgs, settings: kiln_service::EngineSettings) -> Result<()> {
    let (engine, rx) = Engine::build(&settings).await?;
    let event = PushEvent::new(args.repo, args.url, args.commit, args.branch);

    output::status(
        "Fetching",
        &format!("{}@{} ({})", event.repo, event.commit, event.branch_name()),
    );

    let outcome = match engine.service.trigger(event).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Some(id) = e.failed_pipeline() {
                output::failure(&format!("Pipeline #{} failed during setup", id));
            }
            return Err(color_eyre::eyre::eyre!(e));
        }
    };

    output::info(&format!(
        "Scheduled {} pipeline(s): {}",
        outcome.pipelines.len(),
        outcome
            .pipelines
            .iter()
            .map(|id| format!("#{}", id))
            .collect::<Vec<_>>()
            .join(", ")
    ));

    if !engine.follow(rx, &outcome.pipelines).await? {
        std::process::exit(1);
    }
    Ok(())
}

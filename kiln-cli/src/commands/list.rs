use crate::commands::open_store;
use crate::output;

use clap::Args;
use color_eyre::Result;

use kiln_service::store::{PipelineStatus, Store};
use kiln_service::EngineSettings;

/// List recent pipelines
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Maximum number of pipelines to show
    #[arg(long, short = 'n', default_value_t = 20)]
    pub limit: u32,

    /// Print the records as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: ListArgs, settings: EngineSettings) -> Result<()> {
    let store = open_store(&settings).await?;
    let pipelines = store.recent_pipelines(args.limit).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&pipelines)?);
        return Ok(());
    }

    if pipelines.is_empty() {
        output::dim("  No pipelines recorded");
        return Ok(());
    }

    for pipeline in &pipelines {
        let line = format!(
            "  #{:<6} {:<8} {:<20} {:<24} {} {}",
            pipeline.id,
            pipeline.status,
            pipeline.workflow_name,
            pipeline.repo,
            short_sha(&pipeline.commit_sha),
            pipeline.branch
        );
        match pipeline.status {
            PipelineStatus::Success => output::dim_success(&line),
            PipelineStatus::Failure => output::dim_failure(&line),
            _ => output::dim(&line),
        }
    }
    Ok(())
}

fn short_sha(sha: &str) -> &str {
    sha.get(..8).unwrap_or(sha)
}

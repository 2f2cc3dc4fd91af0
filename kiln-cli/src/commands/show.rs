use crate::commands::{open_store, print_log};
use crate::output;

use clap::Args;
use color_eyre::Result;

use kiln_service::store::{JobStatus, PipelineStatus, Store};
use kiln_service::{EngineSettings, PipelineId};

/// Show a pipeline and its jobs
#[derive(Args, Debug)]
pub struct ShowArgs {
    #[arg(value_name = "PIPELINE_ID")]
    pub pipeline_id: PipelineId,

    /// Print the captured log of every job
    #[arg(long)]
    pub logs: bool,

    /// Print the records as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: ShowArgs, settings: EngineSettings) -> Result<()> {
    let store = open_store(&settings).await?;

    let Some(pipeline) = store.get_pipeline(args.pipeline_id).await? else {
        color_eyre::eyre::bail!("Pipeline #{} not found", args.pipeline_id);
    };
    let jobs = store.list_jobs(pipeline.id).await?;

    if args.json {
        let document = serde_json::json!({ "pipeline": pipeline, "jobs": jobs });
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    output::header(&format!(
        "Pipeline #{} '{}' {}",
        pipeline.id, pipeline.workflow_name, pipeline.status
    ));
    println!("  repo:     {}", pipeline.repo);
    println!("  commit:   {}", pipeline.commit_sha);
    println!("  branch:   {}", pipeline.branch);
    if let Some(path) = &pipeline.config_path {
        println!("  config:   {}", path);
    }
    println!("  started:  {}", pipeline.started_at.to_rfc3339());
    if let Some(finished) = pipeline.finished_at {
        println!("  finished: {}", finished.to_rfc3339());
    }
    println!();

    if jobs.is_empty() {
        output::dim("  No jobs recorded");
    }

    for job in &jobs {
        let line = format!("  {:<24} {}", job.job_name, job.status);
        match job.status {
            JobStatus::Success => output::dim_success(&line),
            JobStatus::Failure => output::dim_failure(&line),
            _ => output::dim(&line),
        }
        if args.logs && job.status != JobStatus::Skipped {
            print_log(job.log.as_deref().unwrap_or_default());
        }
    }

    if pipeline.status == PipelineStatus::Failure {
        std::process::exit(1);
    }
    Ok(())
}

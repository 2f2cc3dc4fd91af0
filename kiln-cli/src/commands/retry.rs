use crate::commands::Engine;
use crate::output;

use clap::Args;
use color_eyre::Result;

use kiln_service::PipelineId;

/// Run a recorded pipeline again
#[derive(Args, Debug)]
pub struct RetryArgs {
    /// Pipeline to retry
    #[arg(value_name = "PIPELINE_ID")]
    pub pipeline_id: PipelineId,
}

pub async fn execute(args: RetryArgs, settings: kiln_service::EngineSettings) -> Result<()> {
    let (engine, rx) = Engine::build(&settings).await?;

    output::status("Retrying", &format!("pipeline #{}", args.pipeline_id));
    output::warning("The source is fetched again; if the branch moved, the retry may run different code");

    let retry_id = match engine.service.retry(args.pipeline_id).await {
        Ok(id) => id,
        Err(e) => {
            if let Some(id) = e.failed_pipeline() {
                output::failure(&format!("Pipeline #{} failed during setup", id));
            }
            return Err(color_eyre::eyre::eyre!(e));
        }
    };

    output::info(&format!("Scheduled pipeline #{}", retry_id));

    if !engine.follow(rx, &[retry_id]).await? {
        std::process::exit(1);
    }
    Ok(())
}

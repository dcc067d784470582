use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use crate::error::CliError;

use super::{CommandResult, Context};

#[derive(Debug, Serialize)]
struct RunSummary {
    status: &'static str,
    jobs: Vec<String>,
}

/// Run the scheduler until Ctrl-C, then wait for running cycles to finish.
pub async fn run(context: &Context) -> Result<CommandResult, CliError> {
    let pipeline = Arc::new(context.pipeline()?);
    let scheduler = pipeline.scheduler(&context.config);
    let jobs = scheduler
        .jobs()
        .iter()
        .map(|job| format!("{}: {:?}", job.kind, job.trigger))
        .collect();

    let shutdown = pipeline.shutdown_token();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, shutting down"),
            Err(err) => error!(error = %err, "failed to listen for interrupt"),
        }
        signal_token.cancel();
    });

    info!(
        instruments = pipeline.universe().len(),
        strategies = pipeline.strategies().len(),
        "scheduler started"
    );
    scheduler.run(shutdown).await;

    let data = serde_json::to_value(RunSummary {
        status: "stopped",
        jobs,
    })?;
    Ok(CommandResult::ok(data))
}

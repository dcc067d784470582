use marketpulse_core::CycleStatus;

use crate::cli::CycleArgs;
use crate::error::CliError;

use super::{CommandResult, Context};

pub async fn run(args: &CycleArgs, context: &Context) -> Result<CommandResult, CliError> {
    let pipeline = context.pipeline()?;
    let summary = if args.force {
        pipeline.trigger_cycle_forced(args.kind).await
    } else {
        pipeline.trigger_cycle(args.kind).await
    };

    let incomplete = matches!(summary.status, CycleStatus::Failed | CycleStatus::Cancelled);
    Ok(CommandResult::ok(serde_json::to_value(&summary)?).incomplete(incomplete))
}

use marketpulse_core::domain::parse_trade_date;
use time::macros::time;
use time::OffsetDateTime;

use crate::cli::CalendarArgs;
use crate::error::CliError;

use super::{CommandResult, Context};

/// Calendar status now, or at local noon of `--date`.
pub fn run(args: &CalendarArgs, context: &Context) -> Result<CommandResult, CliError> {
    let at = match &args.date {
        Some(date) => parse_trade_date(date)?
            .with_time(time!(12:00))
            .assume_offset(context.calendar.market_offset()),
        None => OffsetDateTime::now_utc(),
    };
    let status = context.calendar.status(at);
    Ok(CommandResult::ok(serde_json::to_value(status)?))
}

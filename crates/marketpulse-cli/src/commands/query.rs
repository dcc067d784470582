use marketpulse_core::{Bar, Instrument, SignalRecord, StrategyRegistry};
use serde::Serialize;

use crate::cli::{CyclesArgs, SeriesArgs, SignalsArgs};
use crate::error::CliError;

use super::{CommandResult, Context};

#[derive(Debug, Serialize)]
struct SignalsResponse {
    count: usize,
    signals: Vec<SignalRecord>,
}

#[derive(Debug, Serialize)]
struct SeriesResponse<'a> {
    instrument_id: &'a str,
    total_bars: usize,
    bars: &'a [Bar],
}

#[derive(Debug, Serialize)]
struct StrategyInfo {
    id: String,
    min_bars: usize,
}

pub async fn signals(args: &SignalsArgs, context: &Context) -> Result<CommandResult, CliError> {
    let pipeline = context.pipeline()?;
    if let Some(strategy) = &args.strategy {
        if !pipeline.strategies().contains(strategy) {
            return Err(CliError::NotFound(format!("strategy '{strategy}'")));
        }
    }

    let signals = pipeline.list_signals(args.strategy.as_deref()).await?;
    let data = serde_json::to_value(SignalsResponse {
        count: signals.len(),
        signals,
    })?;
    Ok(CommandResult::ok(data))
}

pub async fn series(args: &SeriesArgs, context: &Context) -> Result<CommandResult, CliError> {
    let instrument = Instrument::parse_id(&args.instrument)?;
    let pipeline = context.pipeline()?;
    let series = pipeline
        .get_series(&instrument.id)
        .await?
        .ok_or_else(|| CliError::NotFound(format!("no cached series for {}", instrument.id)))?;

    let bars = series.bars();
    let start = args
        .limit
        .map_or(0, |limit| bars.len().saturating_sub(limit));
    let data = serde_json::to_value(SeriesResponse {
        instrument_id: &instrument.id,
        total_bars: bars.len(),
        bars: &bars[start..],
    })?;
    Ok(CommandResult::ok(data))
}

pub fn strategies() -> Result<CommandResult, CliError> {
    let registry = StrategyRegistry::builtin();
    let strategies: Vec<StrategyInfo> = registry
        .ids()
        .into_iter()
        .filter_map(|id| {
            registry.get(&id).map(|strategy| StrategyInfo {
                min_bars: strategy.min_bars(),
                id,
            })
        })
        .collect();
    Ok(CommandResult::ok(serde_json::to_value(strategies)?))
}

pub async fn cycles(args: &CyclesArgs, context: &Context) -> Result<CommandResult, CliError> {
    let pipeline = context.pipeline()?;
    let cycles = pipeline.recent_cycles(args.limit).await?;
    Ok(CommandResult::ok(serde_json::to_value(cycles)?))
}

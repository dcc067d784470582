//! CLI argument definitions for marketpulse.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Run the scheduler until Ctrl-C |
//! | `cycle` | Run one cycle now |
//! | `signals` | List stored signal records |
//! | `series` | Show the cached series of one instrument |
//! | `calendar` | Show trading-calendar status |
//! | `strategies` | List registered strategies |
//! | `cycles` | Show recent cycle summaries |
//!
//! # Examples
//!
//! ```bash
//! # Seed series from the offline provider, then list signals
//! marketpulse --offline cycle full-refresh --force
//! marketpulse signals --strategy rsi_rebound --pretty
//!
//! # Run the daemon with JSON logs
//! marketpulse --log-json run
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use marketpulse_core::CycleKind;

/// Bar ingestion, realtime merge, and buy-signal pipeline.
#[derive(Debug, Parser)]
#[command(name = "marketpulse", author, version, about)]
pub struct Cli {
    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Use the deterministic synthetic provider instead of the network.
    #[arg(long, global = true, default_value_t = false)]
    pub offline: bool,

    /// JSON instrument list; the built-in universe is used when absent.
    #[arg(long, global = true, env = "MARKETPULSE_UNIVERSE")]
    pub universe: Option<PathBuf>,

    /// JSON array of `YYYY-MM-DD` market holidays.
    #[arg(long, global = true, env = "MARKETPULSE_HOLIDAYS")]
    pub holidays: Option<PathBuf>,

    /// State directory; overrides `MARKETPULSE_HOME`.
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    /// Provider calls allowed per minute; overrides `MARKETPULSE_RATE_LIMIT`.
    #[arg(long, global = true)]
    pub rate_limit: Option<usize>,

    /// Log filter directive, for example `info` or `marketpulse_core=debug`.
    #[arg(long, global = true, env = "MARKETPULSE_LOG", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the scheduler until interrupted.
    Run,
    /// Run one cycle immediately.
    Cycle(CycleArgs),
    /// List stored signal records.
    Signals(SignalsArgs),
    /// Show the cached series of one instrument.
    Series(SeriesArgs),
    /// Show trading-calendar status for now or a given date.
    Calendar(CalendarArgs),
    /// List registered strategies.
    Strategies,
    /// Show recent cycle summaries.
    Cycles(CyclesArgs),
}

#[derive(Debug, Args)]
pub struct CycleArgs {
    /// full-refresh, realtime, or signals.
    #[arg(value_parser = parse_cycle_kind)]
    pub kind: CycleKind,

    /// Run even outside trading days or trading windows.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct SignalsArgs {
    #[arg(long)]
    pub strategy: Option<String>,
}

#[derive(Debug, Args)]
pub struct SeriesArgs {
    /// Instrument id such as `600000.SH`.
    pub instrument: String,

    /// Only the most recent bars.
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct CalendarArgs {
    /// `YYYY-MM-DD`; defaults to now.
    #[arg(long)]
    pub date: Option<String>,
}

#[derive(Debug, Args)]
pub struct CyclesArgs {
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

fn parse_cycle_kind(value: &str) -> Result<CycleKind, String> {
    value.parse()
}

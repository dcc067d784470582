mod calendar;
mod cycle;
mod query;
mod run;

use std::sync::Arc;

use marketpulse_core::universe::{default_universe, load_holidays, load_universe};
use marketpulse_core::{
    EastmoneyAdapter, Instrument, MarketDataProvider, Pipeline, PipelineConfig, PipelineParts,
    QuoteSource, StrategyRegistry, SyntheticAdapter, SystemClock, TradingCalendar, Warehouse,
    WarehouseConfig, WarehouseCycleLog, WarehouseSeriesStore, WarehouseSignalStore,
};
use serde_json::Value;
use tracing::debug;

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub struct CommandResult {
    pub data: Value,
    /// The command ran but its work did not complete.
    pub incomplete: bool,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            incomplete: false,
        }
    }

    pub fn incomplete(mut self, incomplete: bool) -> Self {
        self.incomplete = incomplete;
        self
    }
}

pub async fn run(cli: &Cli) -> Result<CommandResult, CliError> {
    let context = Context::load(cli)?;

    match &cli.command {
        Command::Run => run::run(&context).await,
        Command::Cycle(args) => cycle::run(args, &context).await,
        Command::Signals(args) => query::signals(args, &context).await,
        Command::Series(args) => query::series(args, &context).await,
        Command::Calendar(args) => calendar::run(args, &context),
        Command::Strategies => query::strategies(),
        Command::Cycles(args) => query::cycles(args, &context).await,
    }
}

/// Configuration and reference data resolved from flags and the environment.
pub struct Context {
    pub config: PipelineConfig,
    pub offline: bool,
    pub universe: Vec<Instrument>,
    pub calendar: TradingCalendar,
}

impl Context {
    fn load(cli: &Cli) -> Result<Self, CliError> {
        let mut config = PipelineConfig::from_env()?;
        if let Some(home) = &cli.home {
            config.home = home.clone();
        }
        if let Some(rate_limit) = cli.rate_limit {
            if rate_limit == 0 {
                return Err(CliError::Command(String::from(
                    "--rate-limit must be greater than zero",
                )));
            }
            config.rate_limit.max_per_window = rate_limit;
        }

        let universe = match &cli.universe {
            Some(path) => load_universe(path)?,
            None => default_universe(),
        };
        let holidays = match &cli.holidays {
            Some(path) => load_holidays(path)?,
            None => Default::default(),
        };
        let calendar = TradingCalendar::new(config.calendar.clone()).with_holidays(holidays);
        debug!(
            home = %config.home.display(),
            instruments = universe.len(),
            offline = cli.offline,
            "configuration loaded"
        );

        Ok(Self {
            config,
            offline: cli.offline,
            universe,
            calendar,
        })
    }

    /// Open the warehouse and assemble the pipeline around it.
    pub fn pipeline(&self) -> Result<Pipeline, CliError> {
        let warehouse = Warehouse::open(WarehouseConfig::at(self.config.warehouse_path()))?;
        let (provider, quotes): (Arc<dyn MarketDataProvider>, Arc<dyn QuoteSource>) =
            if self.offline {
                let synthetic = Arc::new(
                    SyntheticAdapter::default().with_market_offset(self.calendar.market_offset()),
                );
                (
                    synthetic.clone() as Arc<dyn MarketDataProvider>,
                    synthetic as Arc<dyn QuoteSource>,
                )
            } else {
                let eastmoney = Arc::new(EastmoneyAdapter::default());
                (
                    eastmoney.clone() as Arc<dyn MarketDataProvider>,
                    eastmoney as Arc<dyn QuoteSource>,
                )
            };

        let parts = PipelineParts {
            universe: self.universe.clone(),
            provider,
            quotes,
            series_store: Arc::new(WarehouseSeriesStore::new(
                warehouse.clone(),
                self.config.fetch.series_ttl,
            )),
            signal_store: Arc::new(WarehouseSignalStore::new(warehouse.clone())),
            cycle_log: Arc::new(WarehouseCycleLog::new(warehouse)),
            registry: StrategyRegistry::builtin(),
            calendar: self.calendar.clone(),
            clock: Arc::new(SystemClock),
        };
        Ok(Pipeline::new(parts, &self.config))
    }
}

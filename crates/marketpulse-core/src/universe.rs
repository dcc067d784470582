//! Reference data loaders: the instrument universe and the holiday list.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use time::Date;

use crate::domain::parse_trade_date;
use crate::{CoreError, ExchangeSuffix, Instrument, InstrumentKind};

#[derive(Debug, Deserialize)]
struct UniverseEntry {
    code: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    exchange: Option<String>,
}

impl UniverseEntry {
    fn into_instrument(self) -> Result<Instrument, CoreError> {
        let code = self.code.trim();
        let exchange = match self.exchange.as_deref() {
            Some(exchange) => exchange.parse()?,
            None => ExchangeSuffix::infer(code).ok_or_else(|| {
                crate::ValidationError::InvalidExchange {
                    value: code.to_owned(),
                }
            })?,
        };
        let kind = match self.kind.as_deref() {
            Some(kind) => kind.parse()?,
            None => InstrumentKind::Stock,
        };
        Ok(Instrument::new(code, kind, exchange)?)
    }
}

/// Parse a universe list such as `[{"code":"600000","kind":"stock","exchange":"SH"}]`.
///
/// `kind` defaults to stock and `exchange` is inferred from the code when
/// absent. Duplicate ids keep their first occurrence.
pub fn parse_universe(json: &str) -> Result<Vec<Instrument>, CoreError> {
    let entries: Vec<UniverseEntry> = serde_json::from_str(json)?;
    let mut seen = BTreeSet::new();
    let mut instruments = Vec::with_capacity(entries.len());
    for entry in entries {
        let instrument = entry.into_instrument()?;
        if seen.insert(instrument.id.clone()) {
            instruments.push(instrument);
        }
    }
    Ok(instruments)
}

pub fn load_universe(path: &Path) -> Result<Vec<Instrument>, CoreError> {
    parse_universe(&read(path)?)
}

/// Parse a JSON array of `YYYY-MM-DD` strings.
pub fn parse_holidays(json: &str) -> Result<BTreeSet<Date>, CoreError> {
    let raw: Vec<String> = serde_json::from_str(json)?;
    raw.iter()
        .map(|value| parse_trade_date(value).map_err(CoreError::from))
        .collect()
}

pub fn load_holidays(path: &Path) -> Result<BTreeSet<Date>, CoreError> {
    parse_holidays(&read(path)?)
}

/// Small built-in universe used when no list is configured.
pub fn default_universe() -> Vec<Instrument> {
    [
        ("600000", InstrumentKind::Stock, ExchangeSuffix::Sh),
        ("600519", InstrumentKind::Stock, ExchangeSuffix::Sh),
        ("601318", InstrumentKind::Stock, ExchangeSuffix::Sh),
        ("000001", InstrumentKind::Stock, ExchangeSuffix::Sz),
        ("000858", InstrumentKind::Stock, ExchangeSuffix::Sz),
        ("300750", InstrumentKind::Stock, ExchangeSuffix::Sz),
        ("510300", InstrumentKind::Fund, ExchangeSuffix::Sh),
        ("159915", InstrumentKind::Fund, ExchangeSuffix::Sz),
    ]
    .into_iter()
    .filter_map(|(code, kind, exchange)| Instrument::new(code, kind, exchange).ok())
    .collect()
}

fn read(path: &Path) -> Result<String, CoreError> {
    fs::read_to_string(path).map_err(|source| CoreError::Io {
        path: path.display().to_string(),
        source,
    })
}

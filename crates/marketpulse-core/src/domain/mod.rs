//! # Domain Models
//!
//! Canonical domain types for the bar ingestion and signal pipeline.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Instrument`] | Immutable instrument reference (`600000.SH`) |
//! | [`Bar`] | One trading-session OHLCV record |
//! | [`Series`] | Date-ordered, date-unique bar history |
//! | [`RealtimeSnapshot`] | Intraday quote merged into a series |
//! | [`SignalRecord`] | Latest signal per instrument and strategy |
//!
//! Construction validates invariants; trade dates serialize as `YYYY-MM-DD`.

mod bar;
mod instrument;
mod signal;
mod snapshot;

pub use bar::{Bar, Series};
pub use instrument::{ExchangeSuffix, Instrument, InstrumentKind};
pub use signal::SignalRecord;
pub use snapshot::RealtimeSnapshot;

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::Date;

use crate::ValidationError;

const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Parse a `YYYY-MM-DD` trade date.
pub fn parse_trade_date(input: &str) -> Result<Date, ValidationError> {
    Date::parse(input.trim(), DATE_FORMAT).map_err(|_| ValidationError::InvalidDate {
        value: input.to_owned(),
    })
}

/// Render a trade date as `YYYY-MM-DD`.
pub fn format_trade_date(date: Date) -> String {
    date.format(DATE_FORMAT)
        .unwrap_or_else(|_| date.to_string())
}

pub(crate) mod trade_date {
    use serde::de::Error as DeError;
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    pub fn serialize<S>(date: &Date, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_trade_date(*date))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Date, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        super::parse_trade_date(&value).map_err(D::Error::custom)
    }
}

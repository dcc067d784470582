//! Trading-day and trading-window predicates in market local time.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::Serialize;
use time::format_description::BorrowedFormatItem;
use time::macros::{format_description, time};
use time::{Date, Duration, OffsetDateTime, Time, UtcOffset, Weekday};

use crate::domain::format_trade_date;
use crate::ValidationError;

const TIME_OF_DAY: &[BorrowedFormatItem<'static>] = format_description!("[hour]:[minute]");

/// Parse `HH:MM`.
pub fn parse_time_of_day(input: &str) -> Result<Time, ValidationError> {
    Time::parse(input.trim(), TIME_OF_DAY).map_err(|_| ValidationError::InvalidTimeOfDay {
        value: input.to_owned(),
    })
}

fn format_time_of_day(time: Time) -> String {
    time.format(TIME_OF_DAY)
        .unwrap_or_else(|_| time.to_string())
}

/// Continuous trading session, inclusive at both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindow {
    start: Time,
    end: Time,
}

impl SessionWindow {
    pub fn new(start: Time, end: Time) -> Result<Self, ValidationError> {
        if start >= end {
            return Err(ValidationError::InvalidSessionWindow {
                start: format_time_of_day(start),
                end: format_time_of_day(end),
            });
        }
        Ok(Self { start, end })
    }

    /// Parse `HH:MM-HH:MM`.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let (start, end) = input
            .split_once('-')
            .ok_or_else(|| ValidationError::InvalidTimeOfDay {
                value: input.to_owned(),
            })?;
        Self::new(parse_time_of_day(start)?, parse_time_of_day(end)?)
    }

    pub fn contains(&self, time: Time) -> bool {
        self.start <= time && time <= self.end
    }

    pub fn start(&self) -> Time {
        self.start
    }

    pub fn end(&self) -> Time {
        self.end
    }
}

impl Display for SessionWindow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}",
            format_time_of_day(self.start),
            format_time_of_day(self.end)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarConfig {
    pub market_offset: UtcOffset,
    pub sessions: Vec<SessionWindow>,
    pub holidays: BTreeSet<Date>,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            market_offset: UtcOffset::from_hms(8, 0, 0).unwrap_or(UtcOffset::UTC),
            sessions: vec![
                SessionWindow {
                    start: time!(09:30),
                    end: time!(11:30),
                },
                SessionWindow {
                    start: time!(13:00),
                    end: time!(15:00),
                },
            ],
            holidays: BTreeSet::new(),
        }
    }
}

/// Calendar answers for one market.
///
/// Weekends and listed holidays are closed; everything else is a trading day.
#[derive(Debug, Clone)]
pub struct TradingCalendar {
    market_offset: UtcOffset,
    sessions: Vec<SessionWindow>,
    holidays: BTreeSet<Date>,
}

impl Default for TradingCalendar {
    fn default() -> Self {
        Self::new(CalendarConfig::default())
    }
}

impl TradingCalendar {
    pub fn new(config: CalendarConfig) -> Self {
        let mut sessions = config.sessions;
        sessions.sort_by_key(SessionWindow::start);
        Self {
            market_offset: config.market_offset,
            sessions,
            holidays: config.holidays,
        }
    }

    pub fn with_holidays(mut self, holidays: impl IntoIterator<Item = Date>) -> Self {
        self.holidays.extend(holidays);
        self
    }

    pub fn market_offset(&self) -> UtcOffset {
        self.market_offset
    }

    pub fn sessions(&self) -> &[SessionWindow] {
        &self.sessions
    }

    pub fn to_local(&self, at: OffsetDateTime) -> OffsetDateTime {
        at.to_offset(self.market_offset)
    }

    pub fn is_trading_day(&self, date: Date) -> bool {
        !matches!(date.weekday(), Weekday::Saturday | Weekday::Sunday)
            && !self.holidays.contains(&date)
    }

    /// True on a trading day while a session is open, in market local time.
    pub fn is_trading_window(&self, at: OffsetDateTime) -> bool {
        let local = self.to_local(at);
        self.is_trading_day(local.date())
            && self
                .sessions
                .iter()
                .any(|session| session.contains(local.time()))
    }

    /// First trading day strictly after `date`.
    pub fn next_trading_day(&self, date: Date) -> Option<Date> {
        let mut candidate = date.next_day()?;
        // A year of consecutive closures would mean a broken holiday list.
        for _ in 0..366 {
            if self.is_trading_day(candidate) {
                return Some(candidate);
            }
            candidate = candidate.next_day()?;
        }
        None
    }

    /// Last trading day strictly before `date`.
    pub fn previous_trading_day(&self, date: Date) -> Option<Date> {
        let mut candidate = date.previous_day()?;
        for _ in 0..366 {
            if self.is_trading_day(candidate) {
                return Some(candidate);
            }
            candidate = candidate.previous_day()?;
        }
        None
    }

    /// Most recent session date whose bar is complete or forming at `at`.
    pub fn session_date(&self, at: OffsetDateTime) -> Date {
        let local = self.to_local(at).date();
        if self.is_trading_day(local) {
            local
        } else {
            self.previous_trading_day(local)
                .unwrap_or(local - Duration::days(1))
        }
    }

    pub fn status(&self, at: OffsetDateTime) -> CalendarStatus {
        let local = self.to_local(at);
        let date = local.date();
        CalendarStatus {
            date: format_trade_date(date),
            local_time: format_time_of_day(local.time()),
            trading_day: self.is_trading_day(date),
            trading_window: self.is_trading_window(at),
            previous_trading_day: self.previous_trading_day(date).map(format_trade_date),
            next_trading_day: self.next_trading_day(date).map(format_trade_date),
            sessions: self.sessions.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Serializable snapshot of the calendar around one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarStatus {
    pub date: String,
    pub local_time: String,
    pub trading_day: bool,
    pub trading_window: bool,
    pub previous_trading_day: Option<String>,
    pub next_trading_day: Option<String>,
    pub sessions: Vec<String>,
}

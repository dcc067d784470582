//! Pipeline configuration with production defaults and `MARKETPULSE_*` overrides.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::calendar::{parse_time_of_day, CalendarConfig, SessionWindow};
use crate::fetch::FetchConfig;
use crate::merge::MergeConfig;
use crate::pipeline::CycleConfig;
use crate::rate_limiter::RateLimitConfig;
use crate::realtime::RealtimeConfig;
use crate::scheduler::ScheduleConfig;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {variable}: {reason}")]
    Invalid {
        variable: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(variable: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            variable,
            value: value.to_owned(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Root for persistent state; the warehouse lives under `<home>/cache`.
    pub home: PathBuf,
    pub rate_limit: RateLimitConfig,
    pub fetch: FetchConfig,
    pub merge: MergeConfig,
    pub realtime: RealtimeConfig,
    pub schedule: ScheduleConfig,
    pub calendar: CalendarConfig,
    pub cycles: CycleConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            home: PathBuf::from(".marketpulse"),
            rate_limit: RateLimitConfig::default(),
            fetch: FetchConfig::default(),
            merge: MergeConfig::default(),
            realtime: RealtimeConfig::default(),
            schedule: ScheduleConfig::default(),
            calendar: CalendarConfig::default(),
            cycles: CycleConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Defaults overlaid with values from `lookup`, keyed by variable name.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            home: resolve_home(&lookup),
            ..Self::default()
        };
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(value) = var("MARKETPULSE_RATE_LIMIT") {
            config.rate_limit.max_per_window = positive("MARKETPULSE_RATE_LIMIT", &value)?;
        }
        if let Some(value) = var("MARKETPULSE_MIN_INTERVAL_MS") {
            let millis: u64 = parse("MARKETPULSE_MIN_INTERVAL_MS", &value)?;
            config.rate_limit.min_interval = (millis > 0).then(|| Duration::from_millis(millis));
        }
        if let Some(value) = var("MARKETPULSE_CONCURRENCY") {
            let concurrency = positive("MARKETPULSE_CONCURRENCY", &value)?;
            config.fetch.concurrency = concurrency;
            config.realtime.concurrency = concurrency;
        }
        if let Some(value) = var("MARKETPULSE_BATCH_SIZE") {
            config.fetch.batch_size = positive("MARKETPULSE_BATCH_SIZE", &value)?;
        }
        if let Some(value) = var("MARKETPULSE_LOOKBACK_DAYS") {
            config.fetch.lookback_days = parse("MARKETPULSE_LOOKBACK_DAYS", &value)?;
        }
        if let Some(value) = var("MARKETPULSE_SERIES_LEN") {
            let max_len = positive("MARKETPULSE_SERIES_LEN", &value)?;
            config.fetch.max_series_len = max_len;
            config.merge.max_series_len = max_len;
        }
        if let Some(value) = var("MARKETPULSE_MIN_BARS") {
            config.fetch.min_bars = parse("MARKETPULSE_MIN_BARS", &value)?;
        }
        if let Some(value) = var("MARKETPULSE_COMPENSATION_COOLDOWN_SECS") {
            config.fetch.compensation_cooldown =
                seconds("MARKETPULSE_COMPENSATION_COOLDOWN_SECS", &value)?;
        }
        if let Some(value) = var("MARKETPULSE_FULL_REFRESH_AT") {
            config.schedule.full_refresh_at = parse_time_of_day(&value).map_err(|error| {
                ConfigError::invalid("MARKETPULSE_FULL_REFRESH_AT", &value, error.to_string())
            })?;
        }
        if let Some(value) = var("MARKETPULSE_REALTIME_EVERY_SECS") {
            config.schedule.realtime_every = period("MARKETPULSE_REALTIME_EVERY_SECS", &value)?;
        }
        if let Some(value) = var("MARKETPULSE_SIGNALS_EVERY_SECS") {
            config.schedule.signals_every = period("MARKETPULSE_SIGNALS_EVERY_SECS", &value)?;
        }
        if let Some(value) = var("MARKETPULSE_MISFIRE_GRACE_SECS") {
            config.schedule.misfire_grace = seconds("MARKETPULSE_MISFIRE_GRACE_SECS", &value)?;
        }
        if let Some(value) = var("MARKETPULSE_SESSIONS") {
            config.calendar.sessions = value
                .split(',')
                .map(SessionWindow::parse)
                .collect::<Result<_, _>>()
                .map_err(|error| {
                    ConfigError::invalid("MARKETPULSE_SESSIONS", &value, error.to_string())
                })?;
        }

        Ok(config)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.home.join("cache")
    }

    pub fn warehouse_path(&self) -> PathBuf {
        self.cache_dir().join("warehouse.duckdb")
    }
}

fn resolve_home<F>(lookup: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup("MARKETPULSE_HOME").filter(|path| !path.is_empty()) {
        return PathBuf::from(path);
    }
    if let Some(home) = lookup("HOME").filter(|home| !home.is_empty()) {
        return PathBuf::from(home).join(".marketpulse");
    }
    PathBuf::from(".marketpulse")
}

fn parse<T>(variable: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|error: T::Err| ConfigError::invalid(variable, value, error.to_string()))
}

fn positive(variable: &'static str, value: &str) -> Result<usize, ConfigError> {
    match parse::<usize>(variable, value)? {
        0 => Err(ConfigError::invalid(variable, value, "must be greater than zero")),
        parsed => Ok(parsed),
    }
}

fn seconds(variable: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse::<u64>(variable, value).map(Duration::from_secs)
}

fn period(variable: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match seconds(variable, value)? {
        Duration::ZERO => Err(ConfigError::invalid(variable, value, "must be greater than zero")),
        parsed => Ok(parsed),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use time::macros::time;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn home_falls_back_to_user_directory() {
        let config = PipelineConfig::from_lookup(lookup(&[("HOME", "/home/ops")])).expect("config");
        assert_eq!(config.home, PathBuf::from("/home/ops/.marketpulse"));
        assert_eq!(
            config.warehouse_path(),
            PathBuf::from("/home/ops/.marketpulse/cache/warehouse.duckdb")
        );

        let config = PipelineConfig::from_lookup(lookup(&[
            ("HOME", "/home/ops"),
            ("MARKETPULSE_HOME", "/srv/pulse"),
        ]))
        .expect("config");
        assert_eq!(config.home, PathBuf::from("/srv/pulse"));
    }

    #[test]
    fn overrides_apply_to_every_component_sharing_a_setting() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("MARKETPULSE_RATE_LIMIT", "120"),
            ("MARKETPULSE_CONCURRENCY", "4"),
            ("MARKETPULSE_SERIES_LEN", "300"),
            ("MARKETPULSE_FULL_REFRESH_AT", "16:05"),
            ("MARKETPULSE_SESSIONS", "09:30-11:30, 13:00-15:00"),
        ]))
        .expect("config");

        assert_eq!(config.rate_limit.max_per_window, 120);
        assert_eq!(config.fetch.concurrency, 4);
        assert_eq!(config.realtime.concurrency, 4);
        assert_eq!(config.fetch.max_series_len, 300);
        assert_eq!(config.merge.max_series_len, 300);
        assert_eq!(config.schedule.full_refresh_at, time!(16:05));
        assert_eq!(config.calendar.sessions.len(), 2);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let error = PipelineConfig::from_lookup(lookup(&[("MARKETPULSE_BATCH_SIZE", "0")]))
            .expect_err("zero batch size");
        assert!(error.to_string().contains("MARKETPULSE_BATCH_SIZE"));

        let error = PipelineConfig::from_lookup(lookup(&[("MARKETPULSE_REALTIME_EVERY_SECS", "soon")]))
            .expect_err("not a number");
        assert!(matches!(
            error,
            ConfigError::Invalid { variable: "MARKETPULSE_REALTIME_EVERY_SECS", .. }
        ));
    }
}

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing::{debug, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::domain::parse_trade_date;
use crate::http_client::{HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient};
use crate::source::{MarketDataProvider, QuoteSource, SourceError, SourceFuture};
use crate::{Bar, ExchangeSuffix, Instrument, RealtimeSnapshot};

const KLINE_URL: &str = "https://push2his.eastmoney.com/api/qt/stock/kline/get";
const SNAPSHOT_URL: &str = "https://push2.eastmoney.com/api/qt/stock/get";
const REFERER: &str = "https://quote.eastmoney.com/";
const KLINE_FIELDS: &str = "f51,f52,f53,f54,f55,f56,f57,f58,f59,f60,f61";
const SNAPSHOT_FIELDS: &str = "f43,f44,f45,f46,f47,f48,f59,f60,f170";
const COMPACT_DATE: &[BorrowedFormatItem<'static>] = format_description!("[year][month][day]");

const THROTTLE_PHRASES: &[&str] = &["too many requests", "访问频繁", "请求过于频繁", "rate limit"];

#[derive(Debug, Clone)]
pub struct EastmoneyConfig {
    pub request_timeout: Duration,
    /// Price adjustment: 0 none, 1 forward, 2 backward.
    pub adjust: u8,
    pub breaker: CircuitBreakerConfig,
}

impl Default for EastmoneyConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            adjust: 1,
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Daily kline and realtime snapshot adapter for the Eastmoney quote API.
///
/// Rate limiting is the caller's job; the adapter only classifies what comes back.
#[derive(Clone)]
pub struct EastmoneyAdapter {
    http_client: Arc<dyn HttpClient>,
    circuit_breaker: Arc<CircuitBreaker>,
    config: EastmoneyConfig,
}

impl Default for EastmoneyAdapter {
    fn default() -> Self {
        Self::new(Arc::new(ReqwestHttpClient::new()), EastmoneyConfig::default())
    }
}

impl EastmoneyAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>, config: EastmoneyConfig) -> Self {
        Self {
            http_client,
            circuit_breaker: Arc::new(CircuitBreaker::new("eastmoney", config.breaker)),
            config,
        }
    }

    async fn call(&self, request: HttpRequest) -> Result<String, SourceError> {
        self.circuit_breaker.admit()?;

        let request = request
            .with_header("referer", REFERER)
            .with_timeout(self.config.request_timeout);
        let outcome = match self.http_client.execute(request).await {
            Ok(response) => classify_response(&response).map(|()| response.body),
            Err(error) => Err(error.into()),
        };
        self.circuit_breaker.observe(&outcome);
        outcome
    }
}

impl MarketDataProvider for EastmoneyAdapter {
    fn id(&self) -> &'static str {
        "eastmoney"
    }

    fn get_bars<'a>(
        &'a self,
        instrument: &'a Instrument,
        start: Date,
        end: Date,
    ) -> SourceFuture<'a, Vec<Bar>> {
        Box::pin(async move {
            let request = HttpRequest::get(KLINE_URL)
                .with_query("secid", secid(instrument))
                .with_query("fields1", "f1,f2,f3,f4,f5,f6")
                .with_query("fields2", KLINE_FIELDS)
                .with_query("klt", "101")
                .with_query("fqt", self.config.adjust.to_string())
                .with_query("beg", compact_date(start))
                .with_query("end", compact_date(end));

            let body = self.call(request).await?;
            let bars = parse_klines(&body, instrument)?;
            debug!(instrument = %instrument.id, bars = bars.len(), "eastmoney klines parsed");
            Ok(bars)
        })
    }
}

impl QuoteSource for EastmoneyAdapter {
    fn get_snapshot<'a>(
        &'a self,
        instrument: &'a Instrument,
    ) -> SourceFuture<'a, Option<RealtimeSnapshot>> {
        Box::pin(async move {
            let request = HttpRequest::get(SNAPSHOT_URL)
                .with_query("secid", secid(instrument))
                .with_query("fields", SNAPSHOT_FIELDS);

            let body = self.call(request).await?;
            parse_snapshot(&body, instrument, OffsetDateTime::now_utc())
        })
    }
}

fn secid(instrument: &Instrument) -> String {
    let market = match instrument.exchange_suffix {
        ExchangeSuffix::Sh => 1,
        ExchangeSuffix::Sz | ExchangeSuffix::Bj => 0,
    };
    format!("{market}.{}", instrument.display_code)
}

fn compact_date(date: Date) -> String {
    date.format(COMPACT_DATE)
        .unwrap_or_else(|_| date.to_string().replace('-', ""))
}

/// Throttling shows up as HTML pages, phrases, or odd `rc` codes as often as 429.
fn classify_response(response: &HttpResponse) -> Result<(), SourceError> {
    if response.status == 429 {
        return Err(SourceError::throttled("eastmoney returned status 429"));
    }
    if !response.is_success() {
        return Err(SourceError::unavailable(format!(
            "eastmoney returned status {}",
            response.status
        )));
    }

    let body = response.body.trim_start();
    if body.is_empty() {
        return Err(SourceError::empty("eastmoney returned an empty body"));
    }
    let lowered = body.to_lowercase();
    if body.starts_with('<') || lowered.contains("<html") {
        return Err(SourceError::throttled("eastmoney returned an html page"));
    }
    if let Some(phrase) = THROTTLE_PHRASES.iter().find(|phrase| lowered.contains(*phrase)) {
        return Err(SourceError::throttled(format!(
            "eastmoney throttle marker '{phrase}' in body"
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    rc: i64,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    #[serde(default)]
    klines: Vec<String>,
}

fn decode_envelope<'de, T: Deserialize<'de>>(body: &'de str) -> Result<Envelope<T>, SourceError> {
    let envelope: Envelope<T> = serde_json::from_str(body)
        .map_err(|error| SourceError::malformed(format!("failed to decode eastmoney payload: {error}")))?;
    if envelope.rc != 0 {
        return Err(SourceError::throttled(format!(
            "eastmoney answered rc={}",
            envelope.rc
        )));
    }
    Ok(envelope)
}

pub(crate) fn parse_klines(body: &str, instrument: &Instrument) -> Result<Vec<Bar>, SourceError> {
    let envelope: Envelope<KlineData> = decode_envelope(body)?;
    let Some(data) = envelope.data else {
        return Err(SourceError::not_found(format!(
            "eastmoney has no kline data for {}",
            instrument.id
        )));
    };
    if data.klines.is_empty() {
        return Err(SourceError::empty(format!(
            "eastmoney returned no klines for {}",
            instrument.id
        )));
    }

    let mut bars = Vec::with_capacity(data.klines.len());
    let mut rejected = 0usize;
    for row in &data.klines {
        match parse_kline_row(row) {
            Some(bar) => bars.push(bar),
            None => rejected += 1,
        }
    }

    if bars.is_empty() {
        return Err(SourceError::invalid_data(format!(
            "all {rejected} kline rows for {} were invalid",
            instrument.id
        )));
    }
    if rejected > 0 {
        warn!(instrument = %instrument.id, rejected, "dropped invalid kline rows");
    }
    Ok(bars)
}

/// Row layout: date,open,close,high,low,volume,amount,amplitude,change_pct,change,turnover.
fn parse_kline_row(row: &str) -> Option<Bar> {
    let fields: Vec<&str> = row.split(',').collect();
    if fields.len() < 7 {
        return None;
    }
    let number = |index: usize| fields.get(index).and_then(|raw| raw.trim().parse::<f64>().ok());

    let trade_date = parse_trade_date(fields[0]).ok()?;
    let open = number(1)?;
    let close = number(2)?;
    let high = number(3)?;
    let low = number(4)?;
    let volume = number(5).filter(|value| *value >= 0.0)?.round() as u64;
    let amount = number(6)?;

    let mut bar = Bar::new(trade_date, open, high, low, close, volume, amount).ok()?;
    if let (Some(change_pct), Some(change)) = (number(8), number(9)) {
        bar.change_pct = change_pct;
        bar.change = change;
        bar.prev_close = close - change;
    }
    Some(bar)
}

pub(crate) fn parse_snapshot(
    body: &str,
    instrument: &Instrument,
    observed_at: OffsetDateTime,
) -> Result<Option<RealtimeSnapshot>, SourceError> {
    let envelope: Envelope<Value> = decode_envelope(body)?;
    let Some(data) = envelope.data.filter(|data| data.is_object()) else {
        return Err(SourceError::not_found(format!(
            "eastmoney has no quote for {}",
            instrument.id
        )));
    };

    // Suspended or pre-open instruments report "-" instead of numbers.
    let raw = |field: &str| data.get(field).and_then(Value::as_f64);
    let decimals = raw("f59").unwrap_or(2.0).clamp(0.0, 6.0) as i32;
    let scale = 10f64.powi(decimals);
    let price_field = |field: &str| raw(field).map(|value| value / scale);

    let Some(price) = price_field("f43").filter(|price| *price > 0.0) else {
        return Ok(None);
    };
    let prev_close = price_field("f60").unwrap_or(0.0);

    Ok(Some(RealtimeSnapshot {
        instrument_id: instrument.id.clone(),
        price,
        open: price_field("f46").filter(|open| *open > 0.0).unwrap_or(price),
        high: price_field("f44").unwrap_or(price),
        low: price_field("f45").unwrap_or(0.0),
        prev_close,
        volume: raw("f47").filter(|volume| *volume >= 0.0).unwrap_or(0.0).round() as u64,
        amount: raw("f48").unwrap_or(0.0),
        change_pct: raw("f170").map(|pct| pct / 100.0).unwrap_or(0.0),
        observed_at,
    }))
}

//! Rolling-window limiter shared by every component that calls the provider.
//!
//! The limit belongs to the provider credential, so one [`RateLimiter`] is
//! created at startup and handed to the fetch orchestrator and the realtime
//! cycle as an `Arc`.

use std::collections::VecDeque;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::Quota;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

type Pacer = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Limits for one provider credential.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Calls allowed inside any trailing window.
    pub max_per_window: usize,
    pub window: Duration,
    /// Added to computed sleeps so the oldest call has surely expired.
    pub safety_margin: Duration,
    /// Optional minimum spacing between calls, smoothing bursts inside the window.
    pub min_interval: Option<Duration>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_window: 200,
            window: Duration::from_secs(60),
            safety_margin: Duration::from_millis(500),
            min_interval: None,
        }
    }
}

impl RateLimitConfig {
    pub fn per_minute(max_per_window: usize) -> Self {
        Self {
            max_per_window,
            ..Self::default()
        }
    }
}

/// Sliding-log rate limiter.
///
/// The call log is guarded by one async mutex. A caller holds it for the whole
/// check-sleep-record sequence, so two callers can never both observe a free
/// slot and book it twice.
pub struct RateLimiter {
    max_per_window: usize,
    window: Duration,
    safety_margin: Duration,
    calls: Mutex<VecDeque<Instant>>,
    pacer: Option<Pacer>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let pacer = config
            .min_interval
            .filter(|interval| !interval.is_zero())
            .and_then(Quota::with_period)
            .map(Pacer::direct);

        Self {
            max_per_window: config.max_per_window.max(1),
            window: config.window,
            safety_margin: config.safety_margin,
            calls: Mutex::new(VecDeque::new()),
            pacer,
        }
    }

    pub fn per_minute(max_per_window: usize) -> Self {
        Self::new(RateLimitConfig::per_minute(max_per_window))
    }

    pub fn max_per_window(&self) -> usize {
        self.max_per_window
    }

    /// Record one call made at the current time.
    ///
    /// Use this for calls that bypassed [`wait_for_slot`](Self::wait_for_slot),
    /// such as an adapter's internal auth refresh.
    pub async fn record_call(&self) {
        let mut calls = self.calls.lock().await;
        let now = Instant::now();
        prune(&mut calls, now, self.window);
        calls.push_back(now);
    }

    /// Wait until fewer than `max_per_window` calls sit in the trailing window,
    /// then reserve the slot for the caller.
    ///
    /// The reservation is recorded before returning; callers must not call
    /// [`record_call`](Self::record_call) again for the same request.
    pub async fn wait_for_slot(&self) {
        if let Some(pacer) = &self.pacer {
            pacer.until_ready().await;
        }

        let mut calls = self.calls.lock().await;
        loop {
            let now = Instant::now();
            prune(&mut calls, now, self.window);

            if calls.len() < self.max_per_window {
                calls.push_back(now);
                return;
            }

            let Some(oldest) = calls.front().copied() else {
                continue;
            };
            let wait = self
                .window
                .saturating_sub(now.duration_since(oldest))
                .saturating_add(self.safety_margin);
            debug!(
                in_window = calls.len(),
                limit = self.max_per_window,
                wait_ms = wait.as_millis() as u64,
                "rate limit reached, waiting for the oldest call to expire"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Number of calls currently inside the trailing window.
    pub async fn calls_in_window(&self) -> usize {
        let mut calls = self.calls.lock().await;
        prune(&mut calls, Instant::now(), self.window);
        calls.len()
    }
}

fn prune(calls: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = calls.front() {
        if now.duration_since(*oldest) >= window {
            calls.pop_front();
        } else {
            break;
        }
    }
}

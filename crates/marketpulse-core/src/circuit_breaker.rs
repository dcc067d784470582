//! Upstream health gate for provider adapters.
//!
//! The breaker watches the outcome of every upstream call. Throttling,
//! non-success statuses, transport errors and timeouts mark the host as
//! unhealthy; once `failure_threshold` of them arrive back to back the circuit
//! opens and calls fail fast with [`SourceErrorKind::Unavailable`] until
//! `open_timeout` passes. Any answer the host actually served, including an
//! empty payload, counts as a sign of life and resets the streak.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::source::{SourceError, SourceErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    /// One trial call is let through; its outcome decides the next state.
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Back-to-back unhealthy outcomes before the circuit opens.
    pub failure_threshold: u32,
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
        }
    }
}

/// True for outcomes that say the host itself is struggling.
pub const fn signals_unhealthy_upstream(kind: SourceErrorKind) -> bool {
    matches!(
        kind,
        SourceErrorKind::Throttled
            | SourceErrorKind::Unavailable
            | SourceErrorKind::Transport
            | SourceErrorKind::Timeout
    )
}

#[derive(Debug)]
struct Health {
    state: CircuitState,
    streak: u32,
    opened_at: Option<Instant>,
}

/// Per-host breaker shared by every call an adapter makes.
#[derive(Debug)]
pub struct CircuitBreaker {
    host: &'static str,
    config: CircuitBreakerConfig,
    health: Mutex<Health>,
}

impl CircuitBreaker {
    pub fn new(host: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            host,
            config,
            health: Mutex::new(Health {
                state: CircuitState::Closed,
                streak: 0,
                opened_at: None,
            }),
        }
    }

    /// Admit a call, or fail fast while the circuit is open.
    pub fn admit(&self) -> Result<(), SourceError> {
        let mut health = self.health.lock().expect("breaker lock is not poisoned");
        if health.state != CircuitState::Open {
            return Ok(());
        }
        let cooled = health
            .opened_at
            .is_some_and(|opened_at| opened_at.elapsed() >= self.config.open_timeout);
        if cooled {
            health.state = CircuitState::HalfOpen;
            health.opened_at = None;
            return Ok(());
        }
        Err(SourceError::unavailable(format!(
            "{} circuit is open; skipping upstream call",
            self.host
        )))
    }

    /// Feed the outcome of an admitted call back into the breaker.
    pub fn observe<T>(&self, outcome: &Result<T, SourceError>) {
        match outcome {
            Err(error) if signals_unhealthy_upstream(error.kind()) => self.record_unhealthy(error),
            _ => self.record_alive(),
        }
    }

    fn record_alive(&self) {
        let mut health = self.health.lock().expect("breaker lock is not poisoned");
        if health.state != CircuitState::Closed {
            info!(host = self.host, "circuit closed");
        }
        health.state = CircuitState::Closed;
        health.streak = 0;
        health.opened_at = None;
    }

    fn record_unhealthy(&self, error: &SourceError) {
        let mut health = self.health.lock().expect("breaker lock is not poisoned");
        health.streak = health.streak.saturating_add(1);

        let trips = health.state == CircuitState::HalfOpen
            || health.streak >= self.config.failure_threshold;
        if !trips {
            return;
        }
        if health.state != CircuitState::Open {
            warn!(
                host = self.host,
                streak = health.streak,
                last_error = error.code(),
                "circuit opened"
            );
        }
        health.state = CircuitState::Open;
        health.opened_at = Some(Instant::now());
    }

    pub fn state(&self) -> CircuitState {
        self.health
            .lock()
            .expect("breaker lock is not poisoned")
            .state
    }
}

use time::OffsetDateTime;

/// Wall-clock source for calendar gating and schedule evaluation.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Wall clock that advances with the tokio timer, so paused-time runs see a
/// consistent date and time.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    anchor: OffsetDateTime,
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn starting_at(anchor: OffsetDateTime) -> Self {
        Self {
            anchor,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> OffsetDateTime {
        self.anchor + self.origin.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use time::macros::datetime;

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_follows_paused_time() {
        let clock = TokioClock::starting_at(datetime!(2024-03-04 01:00 UTC));
        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(clock.now(), datetime!(2024-03-04 01:01:30 UTC));
    }
}

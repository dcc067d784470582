//! Timer-driven job scheduler.
//!
//! Each job runs its own timer loop. When a fire time arrives the job is
//! handed to the [`JobRunner`] on a separate task, so a long execution never
//! delays the next fire time; overlapping executions are coalesced by the
//! runner's job slots. A fire time that is noticed later than the misfire grace
//! is skipped and the job waits for its next regular time.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use time::macros::time;
use time::{OffsetDateTime, Time, UtcOffset};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::cycle::CycleKind;

/// When a job fires, in market local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Once a day at a fixed local time.
    DailyAt(Time),
    /// On every multiple of the period since local midnight.
    Every(Duration),
}

impl Trigger {
    /// First fire time strictly after `after`, expressed in `offset`.
    pub fn next_after(&self, after: OffsetDateTime, offset: UtcOffset) -> OffsetDateTime {
        let local = after.to_offset(offset);
        match *self {
            Self::DailyAt(at) => {
                let today = local.replace_time(at);
                if today > local {
                    today
                } else {
                    today + time::Duration::days(1)
                }
            }
            Self::Every(period) => {
                let period_secs = period.as_secs().max(1) as i64;
                let midnight = local.replace_time(Time::MIDNIGHT);
                let elapsed = (local - midnight).whole_seconds();
                let slots = elapsed.div_euclid(period_secs) + 1;
                midnight + time::Duration::seconds(slots * period_secs)
            }
        }
    }
}

/// One registered job; lives for the life of the process, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    pub kind: CycleKind,
    pub trigger: Trigger,
    pub misfire_grace: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleConfig {
    pub full_refresh_at: Time,
    pub realtime_every: Duration,
    pub signals_every: Duration,
    pub misfire_grace: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            full_refresh_at: time!(15:30),
            realtime_every: Duration::from_secs(5 * 60),
            signals_every: Duration::from_secs(15 * 60),
            misfire_grace: Duration::from_secs(60),
        }
    }
}

impl ScheduleConfig {
    pub fn jobs(&self) -> Vec<ScheduledJob> {
        vec![
            ScheduledJob {
                kind: CycleKind::FullRefresh,
                trigger: Trigger::DailyAt(self.full_refresh_at),
                misfire_grace: self.misfire_grace,
            },
            ScheduledJob {
                kind: CycleKind::Realtime,
                trigger: Trigger::Every(self.realtime_every),
                misfire_grace: self.misfire_grace,
            },
            ScheduledJob {
                kind: CycleKind::Signals,
                trigger: Trigger::Every(self.signals_every),
                misfire_grace: self.misfire_grace,
            },
        ]
    }
}

/// Whether a fire time noticed at `now` is still within its grace period.
pub fn within_grace(scheduled: OffsetDateTime, now: OffsetDateTime, grace: Duration) -> bool {
    let lateness = now - scheduled;
    lateness <= time::Duration::try_from(grace).unwrap_or(time::Duration::MAX)
}

/// Executes one scheduled job body.
pub trait JobRunner: Send + Sync + 'static {
    fn run_scheduled(&self, kind: CycleKind) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
    runner: Arc<dyn JobRunner>,
    clock: Arc<dyn Clock>,
    market_offset: UtcOffset,
}

impl Scheduler {
    pub fn new(
        jobs: Vec<ScheduledJob>,
        runner: Arc<dyn JobRunner>,
        clock: Arc<dyn Clock>,
        market_offset: UtcOffset,
    ) -> Self {
        Self {
            jobs,
            runner,
            clock,
            market_offset,
        }
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }

    /// Drive every job until `shutdown` is cancelled, then wait for running bodies.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut timers = JoinSet::new();
        for job in self.jobs {
            info!(job = %job.kind, trigger = ?job.trigger, "job registered");
            timers.spawn(job_loop(
                job,
                Arc::clone(&self.runner),
                Arc::clone(&self.clock),
                self.market_offset,
                shutdown.clone(),
            ));
        }
        while timers.join_next().await.is_some() {}
        info!("scheduler stopped");
    }
}

async fn job_loop(
    job: ScheduledJob,
    runner: Arc<dyn JobRunner>,
    clock: Arc<dyn Clock>,
    offset: UtcOffset,
    shutdown: CancellationToken,
) {
    let mut executions = JoinSet::new();
    let mut next = job.trigger.next_after(clock.now(), offset);

    loop {
        let wait = Duration::try_from(next - clock.now()).unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
        // Reap finished executions so the set does not grow.
        while executions.try_join_next().is_some() {}

        let now = clock.now();
        if within_grace(next, now, job.misfire_grace) {
            debug!(job = %job.kind, scheduled = %next, "job fired");
            let runner = Arc::clone(&runner);
            let kind = job.kind;
            executions.spawn(async move { runner.run_scheduled(kind).await });
            next = job.trigger.next_after(next, offset);
        } else {
            warn!(
                job = %job.kind,
                scheduled = %next,
                late_ms = (now - next).whole_milliseconds() as i64,
                "misfire grace exceeded, skipping to the next fire time"
            );
            next = job.trigger.next_after(now, offset);
        }
    }

    while executions.join_next().await.is_some() {}
}

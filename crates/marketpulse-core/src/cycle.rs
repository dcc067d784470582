//! Cycle kinds, singleton job slots, and cycle summaries.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// The three units of scheduled work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CycleKind {
    FullRefresh,
    Realtime,
    Signals,
}

impl CycleKind {
    pub const ALL: [CycleKind; 3] = [Self::FullRefresh, Self::Realtime, Self::Signals];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FullRefresh => "full-refresh",
            Self::Realtime => "realtime",
            Self::Signals => "signals",
        }
    }
}

impl Display for CycleKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CycleKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "full-refresh" | "full" => Ok(Self::FullRefresh),
            "realtime" => Ok(Self::Realtime),
            "signals" => Ok(Self::Signals),
            other => Err(format!(
                "unknown cycle kind '{other}', expected full-refresh, realtime, or signals"
            )),
        }
    }
}

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Scheduled,
    Manual,
    /// Signals cycle started right after a successful data cycle.
    Chained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
    Idle = 0,
    Triggered = 1,
    Running = 2,
}

impl JobState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Triggered,
            2 => Self::Running,
            _ => Self::Idle,
        }
    }
}

/// At-most-one execution slot for one job.
///
/// A trigger is accepted only while the slot is idle; triggers that arrive
/// while it is triggered or running are coalesced, not queued.
#[derive(Debug, Default)]
pub struct JobSlot {
    state: AtomicU8,
}

impl JobSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move idle → triggered. `None` means another execution holds the slot.
    pub fn try_trigger(&self) -> Option<JobGuard<'_>> {
        self.state
            .compare_exchange(
                JobState::Idle as u8,
                JobState::Triggered as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| JobGuard { slot: self })
    }
}

/// Holds a [`JobSlot`]; the slot returns to idle when the guard drops.
#[derive(Debug)]
pub struct JobGuard<'a> {
    slot: &'a JobSlot,
}

impl JobGuard<'_> {
    pub fn start_running(&self) {
        self.slot
            .state
            .store(JobState::Running as u8, Ordering::Release);
    }
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        self.slot.state.store(JobState::Idle as u8, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Completed,
    /// Gated off by the trading calendar.
    Skipped,
    /// Another execution of the same kind was in progress.
    Coalesced,
    /// Exceeded the maximum duration or the process is shutting down.
    Cancelled,
    Failed,
}

/// The only operator-visible record of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub kind: CycleKind,
    pub trigger: TriggerSource,
    pub status: CycleStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub elapsed_ms: u64,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub recovered: usize,
    pub signals: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CycleSummary {
    pub fn new(kind: CycleKind, trigger: TriggerSource, started_at: OffsetDateTime) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            kind,
            trigger,
            status: CycleStatus::Completed,
            started_at,
            elapsed_ms: 0,
            total: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            recovered: 0,
            signals: 0,
            detail: None,
        }
    }

    pub fn with_status(mut self, status: CycleStatus, detail: impl Into<String>) -> Self {
        self.status = status;
        self.detail = Some(detail.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == CycleStatus::Completed
    }
}

//! Timer-driven run scheduling.
//!
//! [`transition`] is the whole state machine; [`Scheduler::run`] only applies
//! it, sleeping in `Waiting` and invoking the trigger in `Triggered`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, NaiveTime};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use jobpulse_shared::{JobPulseError, Result, RunRecord, ScheduleConfig};

use crate::pipeline::Coordinator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Waiting,
    Triggered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEvent {
    Start,
    TimerElapsed,
    RunCompleted,
}

/// Launch options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerFlags {
    /// Trigger exactly once, then stop.
    pub disabled: bool,
    /// Trigger immediately on start instead of waiting a full interval.
    pub run_now: bool,
}

/// Next scheduler state. Unlisted (state, event) pairs leave the state unchanged.
pub fn transition(state: SchedulerState, event: SchedulerEvent, flags: SchedulerFlags) -> SchedulerState {
    use SchedulerEvent::*;
    use SchedulerState::*;

    match (state, event) {
        (Idle, Start) if flags.disabled || flags.run_now => Triggered,
        (Idle, Start) => Waiting,
        (Waiting, TimerElapsed) => Triggered,
        (Triggered, RunCompleted) if flags.disabled => Idle,
        (Triggered, RunCompleted) => Waiting,
        (state, _) => state,
    }
}

/// When the next run is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleSpec {
    /// Fixed delay measured from the end of the previous run.
    Every(Duration),
    /// Once a day at a local wall-clock time.
    DailyAt(NaiveTime),
}

impl ScheduleSpec {
    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        match config.run_at_time()? {
            Some(time) => Ok(Self::DailyAt(time)),
            None if config.interval_secs == 0 => Err(JobPulseError::config(
                "schedule.interval_secs must be positive",
            )),
            None => Ok(Self::Every(Duration::from_secs(config.interval_secs))),
        }
    }

    /// Time to wait from `now` (local) until the next trigger.
    pub fn delay_from(&self, now: NaiveDateTime) -> Duration {
        match self {
            Self::Every(interval) => *interval,
            Self::DailyAt(time) => {
                let today = now.date().and_time(*time);
                let next = if today > now {
                    today
                } else {
                    today + chrono::Duration::days(1)
                };
                (next - now).to_std().unwrap_or_default()
            }
        }
    }
}

/// Something the scheduler can fire.
#[async_trait]
pub trait RunTrigger: Send + Sync {
    async fn trigger(&self, cancel: &CancellationToken) -> Result<RunRecord>;
}

#[async_trait]
impl RunTrigger for Coordinator {
    async fn trigger(&self, cancel: &CancellationToken) -> Result<RunRecord> {
        self.run_once(cancel).await
    }
}

pub struct Scheduler {
    spec: ScheduleSpec,
    flags: SchedulerFlags,
}

impl Scheduler {
    pub fn new(spec: ScheduleSpec, flags: SchedulerFlags) -> Self {
        Self { spec, flags }
    }

    /// Drive the schedule until `cancel` fires, or after the single run in
    /// disabled mode. Returns how many runs were triggered.
    pub async fn run<T: RunTrigger + ?Sized>(&self, trigger: &T, cancel: &CancellationToken) -> usize {
        let mut state = transition(SchedulerState::Idle, SchedulerEvent::Start, self.flags);
        let mut triggered = 0;

        loop {
            match state {
                SchedulerState::Waiting => {
                    let delay = self.spec.delay_from(Local::now().naive_local());
                    info!(delay_secs = delay.as_secs(), "waiting for next run");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    state = transition(state, SchedulerEvent::TimerElapsed, self.flags);
                }
                SchedulerState::Triggered => {
                    triggered += 1;
                    match trigger.trigger(cancel).await {
                        Ok(record) => info!(run_id = %record.id, status = %record.status, "scheduled run finished"),
                        Err(JobPulseError::RunInProgress) => warn!("run already in progress, trigger dropped"),
                        Err(e) => error!(error = %e, "scheduled run errored"),
                    }
                    if cancel.is_cancelled() {
                        break;
                    }
                    state = transition(state, SchedulerEvent::RunCompleted, self.flags);
                }
                SchedulerState::Idle => break,
            }
        }

        info!(triggered, "scheduler stopped");
        triggered
    }
}

//! Pipeline orchestration for JobPulse.
//!
//! This crate ties the fetcher, cleaner, analyzer, and store together:
//! - [`Coordinator`]: one run at a time through fetch → clean → analyze → persist
//! - [`Scheduler`]: recurring or one-shot triggering of the coordinator

pub mod pipeline;
pub mod scheduler;

pub use pipeline::{Coordinator, PipelineStore, ProgressReporter, SilentProgress};
pub use scheduler::{
    RunTrigger, ScheduleSpec, Scheduler, SchedulerEvent, SchedulerFlags, SchedulerState, transition,
};

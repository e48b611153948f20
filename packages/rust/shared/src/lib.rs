//! Shared types, error model, and configuration for JobPulse.
//!
//! This crate is the foundation depended on by all other JobPulse crates.
//! It provides:
//! - [`JobPulseError`]: the unified error type
//! - Domain types ([`RawListing`], [`CleanListing`], [`AnalysisSnapshot`], [`RunRecord`])
//! - Configuration ([`AppConfig`], [`FetchLimits`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AnalysisConfig, AppConfig, ExtractorConfig, FetchConfig, FetchLimits, PathsConfig,
    ScheduleConfig, SourceConfig, config_dir, config_file_path, expand_home, init_config,
    load_config, load_config_from,
};
pub use error::{JobPulseError, Result};
pub use types::{
    AggregateStats, AnalysisSnapshot, artifacts, CURRENT_SCHEMA_VERSION, CleanListing, ExperienceRange,
    FetchFailure, FetchFailureKind, KeywordCount, PipelineState, RawListing, RejectedListing,
    RunCounts, RunId, RunRecord, RunStatus, SalaryGroup, SalaryRange, SalarySummary, SnapshotInfo,
    ValidationFailure,
};

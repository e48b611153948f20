//! Job-listing fetcher: source plans, extraction, retries.
//!
//! This crate provides:
//! - [`extractors`]: HTML (CSS selector) and JSON (pointer) listing extractors
//! - [`retry`]: pure retry policy and User-Agent rotation
//! - [`engine`]: the concurrent [`Fetcher`]

pub mod engine;
pub mod extractors;
pub mod retry;

pub use engine::{
    FetchResult, Fetcher, PageOutcome, PageRequest, Source, build_sources, plan_requests,
};
pub use extractors::{FieldMap, HtmlExtractor, JsonExtractor, ListingExtractor, build_extractor};
pub use retry::{AttemptError, IdentityRotation, RetryDecision, RetryPolicy};

//! Listing extractors: turn one fetched page body into raw field maps.
//!
//! Each configured source names an extractor kind. HTML pages are walked with
//! CSS selectors, JSON APIs with JSON pointers.

mod html;
mod json;

use std::collections::BTreeMap;

use jobpulse_shared::{ExtractorConfig, Result};

pub use html::HtmlExtractor;
pub use json::JsonExtractor;

/// One listing's raw fields, keyed by the configured field name.
pub type FieldMap = BTreeMap<String, String>;

/// Trait for source-specific listing extraction.
pub trait ListingExtractor: Send + Sync {
    /// Extract every listing on the page.
    ///
    /// A body that cannot be interpreted at all is a `Parse` error, which the
    /// engine treats as a malformed response. An empty result is not an error.
    fn extract(&self, body: &str) -> Result<Vec<FieldMap>>;

    /// Extractor kind, for tracing.
    fn name(&self) -> &str;
}

/// Build the extractor described by a source's configuration.
pub fn build_extractor(config: &ExtractorConfig) -> Result<Box<dyn ListingExtractor>> {
    Ok(match config {
        ExtractorConfig::Html { item, fields } => Box::new(HtmlExtractor::new(item, fields)?),
        ExtractorConfig::Json { items, fields } => Box::new(JsonExtractor::new(items, fields)?),
    })
}

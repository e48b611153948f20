//! Listing analysis: keyword frequencies, aggregate statistics, word cloud.
//!
//! This crate provides:
//! - [`Analyzer`]: turns a batch of [`CleanListing`]s into an [`AnalysisSnapshot`]
//! - [`keywords`]: jieba segmentation, stop-words, ranking
//! - [`stats`]: distributions and salary summaries
//! - [`wordcloud`]: deterministic SVG rendering

pub mod keywords;
pub mod stats;
pub mod wordcloud;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use jobpulse_shared::{
    AnalysisConfig, AnalysisSnapshot, CURRENT_SCHEMA_VERSION, CleanListing, Result, RunId,
    artifacts, expand_home,
};

pub use keywords::{StopWords, Tokenizer, rank};

/// Tunables for one analyzer instance.
#[derive(Debug, Clone)]
pub struct AnalyzerOptions {
    pub top_keywords: usize,
    pub word_cloud_words: usize,
    /// Minimum salaried listings before a city gets a salary average.
    pub min_city_samples: usize,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            top_keywords: 100,
            word_cloud_words: 100,
            min_city_samples: 10,
        }
    }
}

/// Snapshot plus the rendered artifacts that go next to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub snapshot: AnalysisSnapshot,
    pub word_cloud_svg: Option<String>,
}

/// Stateless between calls; safe to share behind an `Arc`.
pub struct Analyzer {
    tokenizer: Tokenizer,
    options: AnalyzerOptions,
}

impl Analyzer {
    pub fn new(tokenizer: Tokenizer, options: AnalyzerOptions) -> Self {
        Self { tokenizer, options }
    }

    /// Build from the `[analysis]` config section, loading the stop-word list
    /// and user dictionary if configured.
    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        let stop_words = match &config.stop_words_path {
            Some(path) => StopWords::load(&expand_home(path))?,
            None => StopWords::builtin(),
        };
        let mut tokenizer = Tokenizer::new(stop_words);
        if let Some(path) = &config.user_dict_path {
            tokenizer.load_user_dict(&expand_home(path))?;
        }
        Ok(Self::new(
            tokenizer,
            AnalyzerOptions {
                top_keywords: config.top_keywords,
                word_cloud_words: config.word_cloud_words,
                ..AnalyzerOptions::default()
            },
        ))
    }

    /// Analyze a batch. The result depends only on the set of listings, not
    /// their order. An empty batch yields an empty snapshot.
    #[instrument(skip_all, fields(listings = listings.len(), run_id = %run_id))]
    pub fn analyze(&self, listings: &[CleanListing], run_id: RunId, created_at: DateTime<Utc>) -> Analysis {
        if listings.is_empty() {
            info!("no listings, empty snapshot");
            return Analysis {
                snapshot: AnalysisSnapshot::empty(run_id, created_at),
                word_cloud_svg: None,
            };
        }

        let mut counts: HashMap<String, u64> = HashMap::new();
        for listing in listings {
            let text = format!("{} {}", listing.title, listing.description);
            for token in self.tokenizer.tokens(&text) {
                *counts.entry(token).or_default() += 1;
            }
        }
        let vocabulary = counts.len();
        let keywords = rank(counts, self.options.top_keywords);
        let word_cloud_svg = wordcloud::render_svg(&keywords, self.options.word_cloud_words);

        let mut snapshot = AnalysisSnapshot {
            schema_version: CURRENT_SCHEMA_VERSION,
            run_id,
            created_at,
            listing_count: listings.len(),
            categories: stats::category_distribution(listings),
            stats: stats::aggregate(listings, self.options.min_city_samples),
            keywords,
            word_cloud: None,
        };
        if word_cloud_svg.is_some() {
            snapshot.word_cloud = Some(format!("{}/{}", snapshot.dir_name(), artifacts::WORD_CLOUD_FILE));
        }

        info!(
            vocabulary,
            ranked = snapshot.keywords.len(),
            categories = snapshot.categories.len(),
            "analysis completed"
        );
        Analysis {
            snapshot,
            word_cloud_svg,
        }
    }
}

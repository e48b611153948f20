//! Core domain types for the JobPulse pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current schema version for persisted snapshot documents.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// File names inside one snapshot's artifact directory.
pub mod artifacts {
    pub const SNAPSHOT_FILE: &str = "snapshot.json";
    pub const KEYWORDS_FILE: &str = "keywords.json";
    pub const STATS_FILE: &str = "stats.json";
    pub const WORD_CLOUD_FILE: &str = "wordcloud.svg";
    /// Lives in the analysis directory root, not a snapshot directory.
    pub const LATEST_FILE: &str = "latest.json";
}

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for pipeline run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

/// One listing as extracted from a source page, before any cleaning.
///
/// `payload` maps field names (`title`, `company`, `salary`, ...) to the raw
/// text found on the page. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawListing {
    /// Page the listing was extracted from.
    pub source_url: String,
    /// Configured source identifier (e.g. `zhilian`).
    pub source_id: String,
    /// Raw extracted field text keyed by field name.
    pub payload: BTreeMap<String, String>,
    /// When the page was fetched.
    pub fetched_at: DateTime<Utc>,
}

impl RawListing {
    /// Look up a raw field, treating blank text as absent.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.payload
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

/// Monthly salary range in yuan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalaryRange {
    pub min_monthly: u32,
    pub max_monthly: u32,
    /// The source quoted an annual figure that was divided by 12.
    #[serde(default)]
    pub annualized: bool,
}

impl SalaryRange {
    /// Midpoint of the range, used for aggregate statistics.
    pub fn midpoint(&self) -> f64 {
        (f64::from(self.min_monthly) + f64::from(self.max_monthly)) / 2.0
    }
}

/// Required years of experience. `max_years = None` means open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperienceRange {
    pub min_years: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_years: Option<u32>,
}

/// A normalized, validated listing in the canonical schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanListing {
    /// SHA-256 over normalized (company, title, posted date).
    pub identity_hash: String,
    pub title: String,
    pub company: String,
    /// City name without the `市` suffix, or `未知`.
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary: Option<SalaryRange>,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_date: Option<NaiveDate>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience: Option<ExperienceRange>,
    pub education: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_size: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub source_id: String,
    pub source_url: String,
    pub fetched_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Recoverable failures
// ---------------------------------------------------------------------------

/// Why a page fetch gave up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchFailureKind {
    /// Connection, DNS, TLS, or timeout error.
    Network,
    /// Non-success HTTP status.
    Status { code: u16 },
    /// The server signalled throttling (429/503).
    RateLimited { code: u16 },
    /// The body could not be parsed by the source's extractor.
    Malformed,
}

/// A page that could not be fetched after all retries. Counted, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFailure {
    pub source_id: String,
    pub url: String,
    pub attempts: u32,
    pub kind: FetchFailureKind,
    pub message: String,
}

/// Why a raw listing was rejected by the cleaner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationFailure {
    MissingTitle,
    MissingCompany,
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingTitle => write!(f, "missing required field: title"),
            Self::MissingCompany => write!(f, "missing required field: company"),
        }
    }
}

/// A raw listing routed away from the clean set, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedListing {
    pub listing: RawListing,
    pub reason: ValidationFailure,
}

// ---------------------------------------------------------------------------
// AnalysisSnapshot
// ---------------------------------------------------------------------------

/// A token and how often it occurred across the analyzed corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordCount {
    pub keyword: String,
    pub count: u64,
}

/// Summary of monthly salary midpoints, in yuan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SalarySummary {
    pub samples: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub p25: f64,
    pub p75: f64,
    pub p90: f64,
    /// Sample standard deviation; absent with a single sample.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std_dev: Option<f64>,
}

/// Salary midpoints of one group (a city, category, experience bucket, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SalaryGroup {
    pub samples: usize,
    pub mean: f64,
    pub median: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std_dev: Option<f64>,
}

/// Aggregate statistics beyond the keyword table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub unique_companies: usize,
    pub unique_cities: usize,
    pub city_distribution: BTreeMap<String, u64>,
    pub education_distribution: BTreeMap<String, u64>,
    pub experience_distribution: BTreeMap<String, u64>,
    #[serde(default)]
    pub company_size_distribution: BTreeMap<String, u64>,
    #[serde(default)]
    pub top_industries: Vec<KeywordCount>,
    pub top_companies: Vec<KeywordCount>,
    pub top_skills: Vec<KeywordCount>,
    /// Most requested skills within each of the largest categories.
    #[serde(default)]
    pub skills_by_category: BTreeMap<String, Vec<KeywordCount>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary: Option<SalarySummary>,
    #[serde(default)]
    pub salary_by_city: BTreeMap<String, SalaryGroup>,
    #[serde(default)]
    pub salary_by_category: BTreeMap<String, SalaryGroup>,
    #[serde(default)]
    pub salary_by_experience: BTreeMap<String, SalaryGroup>,
    #[serde(default)]
    pub salary_by_education: BTreeMap<String, SalaryGroup>,
}

/// One immutable analysis result, tied to the run that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    /// Schema version for forward compatibility.
    pub schema_version: u32,
    /// The run that produced this snapshot.
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub listing_count: usize,
    /// Ranked by count descending, then keyword ascending.
    pub keywords: Vec<KeywordCount>,
    pub categories: BTreeMap<String, u64>,
    pub stats: AggregateStats,
    /// Word-cloud artifact path, relative to the analysis directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_cloud: Option<String>,
}

impl AnalysisSnapshot {
    /// A snapshot over zero listings.
    pub fn empty(run_id: RunId, created_at: DateTime<Utc>) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            run_id,
            created_at,
            listing_count: 0,
            keywords: Vec::new(),
            categories: BTreeMap::new(),
            stats: AggregateStats::default(),
            word_cloud: None,
        }
    }

    /// Directory name for this snapshot's artifact set.
    pub fn dir_name(&self) -> String {
        self.created_at.format("%Y%m%dT%H%M%S%3fZ").to_string()
    }
}

/// Index entry for a stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub listing_count: usize,
    /// Artifact directory, relative to the analysis directory.
    pub dir: String,
}

// ---------------------------------------------------------------------------
// RunRecord
// ---------------------------------------------------------------------------

/// Terminal outcome of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Not finalized yet.
    Running,
    Success,
    /// Recoverable failures upstream, downstream stages completed.
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

/// Per-run item counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Raw listings extracted from all pages.
    pub fetched: usize,
    /// Pages that exhausted their retries.
    pub fetch_failures: usize,
    /// Raw listings rejected by validation.
    pub rejected: usize,
    /// Raw listings collapsed into another by identity hash.
    pub duplicates: usize,
    /// Clean listings after in-run deduplication.
    pub unique: usize,
    /// Clean listings committed to the store.
    pub upserted: usize,
}

impl RunCounts {
    /// Total recoverable failures reported by Fetcher and Cleaner.
    pub fn failed(&self) -> usize {
        self.fetch_failures + self.rejected
    }
}

/// Audit entry for one pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub counts: RunCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the run's snapshot was persisted.
    #[serde(default)]
    pub snapshot_written: bool,
}

impl RunRecord {
    /// Open a record at run start.
    pub fn start() -> Self {
        Self {
            id: RunId::new(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            counts: RunCounts::default(),
            error: None,
            snapshot_written: false,
        }
    }

    /// Close the record with its terminal status.
    pub fn finalize(&mut self, status: RunStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.finished_at = Some(Utc::now());
    }
}

// ---------------------------------------------------------------------------
// PipelineState
// ---------------------------------------------------------------------------

/// Coordinator state machine value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Fetching,
    Cleaning,
    Analyzing,
    Persisting,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Cleaning => "cleaning",
            Self::Analyzing => "analyzing",
            Self::Persisting => "persisting",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let s = id.to_string();
        let parsed: RunId = s.parse().expect("parse RunId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn run_ids_sort_by_creation() {
        let a = RunId::new();
        let b = RunId::new();
        assert!(a < b);
    }

    #[test]
    fn raw_field_treats_blank_as_missing() {
        let mut payload = BTreeMap::new();
        payload.insert("title".to_string(), "  ".to_string());
        payload.insert("company".to_string(), "字节跳动".to_string());
        let raw = RawListing {
            source_url: "https://example.com/jobs".into(),
            source_id: "example".into(),
            payload,
            fetched_at: Utc::now(),
        };
        assert_eq!(raw.field("title"), None);
        assert_eq!(raw.field("company"), Some("字节跳动"));
        assert_eq!(raw.field("salary"), None);
    }

    #[test]
    fn snapshot_serialization() {
        let mut snapshot = AnalysisSnapshot::empty(RunId::new(), Utc::now());
        snapshot.keywords.push(KeywordCount {
            keyword: "python".into(),
            count: 3,
        });
        snapshot.categories.insert("算法工程师".into(), 2);

        let json = serde_json::to_string_pretty(&snapshot).expect("serialize");
        let parsed: AnalysisSnapshot = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, snapshot);
        assert!(!json.contains("word_cloud"));
    }

    #[test]
    fn snapshot_dir_name_is_timestamp() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T02:00:00.123Z")
            .unwrap()
            .with_timezone(&Utc);
        let snapshot = AnalysisSnapshot::empty(RunId::new(), at);
        assert_eq!(snapshot.dir_name(), "20240501T020000123Z");
    }

    #[test]
    fn run_status_parse_and_display() {
        for status in [
            RunStatus::Running,
            RunStatus::Success,
            RunStatus::Partial,
            RunStatus::Failed,
        ] {
            let parsed: RunStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("done".parse::<RunStatus>().is_err());
    }

    #[test]
    fn run_record_finalize() {
        let mut record = RunRecord::start();
        assert_eq!(record.status, RunStatus::Running);
        assert!(record.finished_at.is_none());

        record.counts.fetch_failures = 2;
        record.counts.rejected = 1;
        record.finalize(RunStatus::Partial, None);
        assert_eq!(record.status, RunStatus::Partial);
        assert!(record.finished_at.is_some());
        assert_eq!(record.counts.failed(), 3);
    }
}

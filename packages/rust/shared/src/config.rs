//! Application configuration for JobPulse.
//!
//! User config lives at `~/.jobpulse/jobpulse.toml` unless a path is given
//! explicitly. CLI flags override config file values, which override defaults.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::{JobPulseError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "jobpulse.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".jobpulse";

// ---------------------------------------------------------------------------
// Config structs (matching jobpulse.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Search keywords used by sources that don't list their own.
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,

    /// Data and analysis directories.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Fetch limits and request identity pool.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Recurring run schedule.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Text analysis settings.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Listing sources.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            keywords: default_keywords(),
            paths: PathsConfig::default(),
            fetch: FetchConfig::default(),
            schedule: ScheduleConfig::default(),
            analysis: AnalysisConfig::default(),
            sources: Vec::new(),
        }
    }
}

fn default_keywords() -> Vec<String> {
    [
        "Java", "Python", "C++", "前端", "后端", "全栈", "算法", "人工智能", "机器学习",
        "深度学习", "数据分析", "大数据", "云计算", "运维", "测试", "开发", "架构师",
        "数据库", "网络安全", "软件工程师", "程序员", "开发工程师",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the listing database.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Directory holding one artifact set per snapshot.
    #[serde(default = "default_analysis_dir")]
    pub analysis_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            analysis_dir: default_analysis_dir(),
        }
    }
}

fn default_data_dir() -> String {
    "./data".into()
}
fn default_analysis_dir() -> String {
    "./analysis".into()
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum concurrent page requests.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Attempt ceiling per page, including the first attempt.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the first retry; doubles per attempt.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Upper bound for any single backoff delay.
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    /// Per-request timeout.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Politeness delay before each request.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_ms: u64,

    /// User-Agent strings rotated across requests.
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            timeout_secs: default_timeout(),
            rate_limit_ms: default_rate_limit(),
            user_agents: default_user_agents(),
        }
    }
}

fn default_concurrency() -> u32 {
    4
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base() -> u64 {
    500
}
fn default_backoff_max() -> u64 {
    8_000
}
fn default_timeout() -> u64 {
    15
}
fn default_rate_limit() -> u64 {
    200
}
fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36 Edg/124.0",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// `[schedule]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between the end of one run and the start of the next.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Daily wall-clock trigger time (`HH:MM`, local time). Overrides
    /// `interval_secs` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_at: Option<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            run_at: None,
        }
    }
}

fn default_interval() -> u64 {
    24 * 60 * 60
}

impl ScheduleConfig {
    /// Parse `run_at` into a time of day.
    pub fn run_at_time(&self) -> Result<Option<NaiveTime>> {
        self.run_at
            .as_deref()
            .map(|s| {
                NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|e| {
                    JobPulseError::config(format!("invalid schedule.run_at '{s}': {e}"))
                })
            })
            .transpose()
    }
}

/// `[analysis]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Stop-word file, one word per line, `#` starts a comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_words_path: Option<String>,

    /// Extra segmentation dictionary in jieba's `word [freq] [tag]` format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_dict_path: Option<String>,

    /// Number of ranked keywords kept in a snapshot.
    #[serde(default = "default_top_keywords")]
    pub top_keywords: usize,

    /// Number of keywords drawn into the word cloud.
    #[serde(default = "default_word_cloud_words")]
    pub word_cloud_words: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            stop_words_path: None,
            user_dict_path: None,
            top_keywords: default_top_keywords(),
            word_cloud_words: default_word_cloud_words(),
        }
    }
}

fn default_top_keywords() -> usize {
    100
}
fn default_word_cloud_words() -> usize {
    100
}

/// `[[sources]]` entry: one job-listing site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Stable identifier stored with every listing (e.g. `zhilian`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// URL with optional `{keyword}` and `{page}` placeholders.
    pub url_template: String,
    /// Keywords for this source; the global list is used when empty.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Pages requested per keyword.
    #[serde(default = "default_pages")]
    pub pages: u32,
    /// How listings are pulled out of a response body.
    pub extractor: ExtractorConfig,
}

fn default_pages() -> u32 {
    1
}

/// Response extraction rules for a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractorConfig {
    /// CSS selector for each listing element, plus per-field selectors
    /// evaluated inside it.
    Html {
        item: String,
        fields: BTreeMap<String, String>,
    },
    /// JSON pointer to the listing array, plus per-field pointers evaluated
    /// against each element.
    Json {
        items: String,
        fields: BTreeMap<String, String>,
    },
}

// ---------------------------------------------------------------------------
// Fetch limits (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime fetch configuration.
#[derive(Debug, Clone)]
pub struct FetchLimits {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub timeout: Duration,
    pub rate_limit: Duration,
    pub user_agents: Vec<String>,
}

impl From<&AppConfig> for FetchLimits {
    fn from(config: &AppConfig) -> Self {
        let fetch = &config.fetch;
        Self {
            concurrency: fetch.concurrency.max(1) as usize,
            max_attempts: fetch.max_attempts.max(1),
            backoff_base: Duration::from_millis(fetch.backoff_base_ms),
            backoff_max: Duration::from_millis(fetch.backoff_max_ms),
            timeout: Duration::from_secs(fetch.timeout_secs),
            rate_limit: Duration::from_millis(fetch.rate_limit_ms),
            user_agents: fetch.user_agents.clone(),
        }
    }
}

impl AppConfig {
    /// Check cross-field constraints that serde can't express.
    pub fn validate(&self) -> Result<()> {
        if self.fetch.concurrency == 0 {
            return Err(JobPulseError::config("fetch.concurrency must be at least 1"));
        }
        if self.fetch.max_attempts == 0 {
            return Err(JobPulseError::config("fetch.max_attempts must be at least 1"));
        }
        if self.schedule.run_at.is_none() && self.schedule.interval_secs == 0 {
            return Err(JobPulseError::config(
                "schedule.interval_secs must be positive when run_at is unset",
            ));
        }
        self.schedule.run_at_time()?;

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.id.trim().is_empty() {
                return Err(JobPulseError::config("source id must not be empty"));
            }
            if !seen.insert(source.id.as_str()) {
                return Err(JobPulseError::config(format!(
                    "duplicate source id '{}'",
                    source.id
                )));
            }
            if source.pages == 0 {
                return Err(JobPulseError::config(format!(
                    "source '{}' must request at least one page",
                    source.id
                )));
            }
        }
        Ok(())
    }

    /// Resolved data directory.
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.paths.data_dir)
    }

    /// Resolved analysis directory.
    pub fn analysis_dir(&self) -> PathBuf {
        expand_home(&self.paths.analysis_dir)
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.jobpulse/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| JobPulseError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.jobpulse/jobpulse.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load and validate the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| JobPulseError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        JobPulseError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Write a default config file to `path` (or the default location).
/// Returns the path to the created file.
pub fn init_config(path: Option<&Path>) -> Result<PathBuf> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };
    if path.exists() {
        return Err(JobPulseError::config(format!(
            "{} already exists",
            path.display()
        )));
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| JobPulseError::io(dir, e))?;
    }

    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| JobPulseError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| JobPulseError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("data_dir"));
        assert!(toml_str.contains("max_attempts"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.fetch.concurrency, 4);
        assert_eq!(parsed.schedule.interval_secs, 86_400);
        assert_eq!(parsed.keywords.len(), config.keywords.len());
        parsed.validate().expect("defaults are valid");
    }

    #[test]
    fn config_with_sources() {
        let toml_str = r#"
keywords = ["Rust"]

[paths]
data_dir = "/tmp/jobs"

[schedule]
run_at = "02:00"

[[sources]]
id = "zhilian"
name = "智联招聘"
url_template = "https://example.com/search?kw={keyword}&p={page}"
pages = 2

[sources.extractor]
kind = "html"
item = ".job-card"

[sources.extractor.fields]
title = ".job-title"
company = ".company-name"

[[sources]]
id = "lagou"
name = "拉勾网"
url_template = "https://example.com/api?kd={keyword}"

[sources.extractor]
kind = "json"
items = "/content/result"

[sources.extractor.fields]
title = "/positionName"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        config.validate().expect("valid");
        assert_eq!(config.keywords, vec!["Rust".to_string()]);
        assert_eq!(config.paths.data_dir, "/tmp/jobs");
        assert_eq!(config.paths.analysis_dir, "./analysis");
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].pages, 2);
        assert_eq!(config.sources[1].pages, 1);
        assert!(matches!(
            config.sources[0].extractor,
            ExtractorConfig::Html { ref item, .. } if item == ".job-card"
        ));
        assert!(matches!(
            config.sources[1].extractor,
            ExtractorConfig::Json { ref items, .. } if items == "/content/result"
        ));
        assert_eq!(
            config.schedule.run_at_time().unwrap(),
            NaiveTime::from_hms_opt(2, 0, 0)
        );
    }

    #[test]
    fn duplicate_source_ids_rejected() {
        let source = SourceConfig {
            id: "boss".into(),
            name: "BOSS直聘".into(),
            url_template: "https://example.com/{keyword}".into(),
            keywords: vec![],
            pages: 1,
            extractor: ExtractorConfig::Json {
                items: "/list".into(),
                fields: BTreeMap::new(),
            },
        };
        let config = AppConfig {
            sources: vec![source.clone(), source],
            ..AppConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate source id"));
    }

    #[test]
    fn invalid_run_at_rejected() {
        let mut config = AppConfig::default();
        config.schedule.run_at = Some("25:99".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn fetch_limits_from_app_config() {
        let app = AppConfig::default();
        let limits = FetchLimits::from(&app);
        assert_eq!(limits.concurrency, 4);
        assert_eq!(limits.max_attempts, 3);
        assert_eq!(limits.backoff_base, Duration::from_millis(500));
        assert_eq!(limits.user_agents.len(), 4);
    }

    #[test]
    fn expand_home_leaves_relative_paths() {
        assert_eq!(expand_home("./data"), PathBuf::from("./data"));
        assert_eq!(expand_home("/var/jobs"), PathBuf::from("/var/jobs"));
    }
}

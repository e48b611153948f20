//! Concurrent listing fetcher.
//!
//! Sources are expanded into a plan of page requests (keyword × page), which
//! are fetched through a bounded pool. Every page resolves to a
//! [`PageOutcome`]: either its raw listings or a [`FetchFailure`] after the
//! retry policy gives up. A failed page never stops the others.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use reqwest::Client;
use reqwest::header::{ACCEPT_LANGUAGE, RETRY_AFTER, USER_AGENT};
use tracing::{debug, info, instrument, warn};
use url::Url;

use jobpulse_shared::{FetchFailure, FetchLimits, JobPulseError, RawListing, Result, SourceConfig};

use crate::extractors::{ListingExtractor, build_extractor};
use crate::retry::{AttemptError, IdentityRotation, RetryDecision, RetryPolicy};

/// Fallback User-Agent when the configured pool is empty.
const DEFAULT_USER_AGENT: &str = concat!("JobPulse/", env!("CARGO_PKG_VERSION"));

const ACCEPT_LANGUAGE_VALUE: &str = "zh-CN,zh;q=0.9,en;q=0.8";

// ---------------------------------------------------------------------------
// Sources and plans
// ---------------------------------------------------------------------------

/// A configured source with its extractor built.
pub struct Source {
    config: SourceConfig,
    extractor: Box<dyn ListingExtractor>,
}

impl Source {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let extractor = build_extractor(&config.extractor)?;
        Ok(Self { config, extractor })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.config.id)
            .field("extractor", &self.extractor.name())
            .finish()
    }
}

/// Build every configured source, failing on the first bad extractor.
pub fn build_sources(configs: &[SourceConfig]) -> Result<Vec<Arc<Source>>> {
    configs
        .iter()
        .cloned()
        .map(|config| Source::new(config).map(Arc::new))
        .collect()
}

/// One page to fetch.
#[derive(Debug, Clone)]
pub struct PageRequest {
    /// Position in the plan; drives identity rotation.
    pub index: usize,
    pub source: Arc<Source>,
    pub keyword: Option<String>,
    pub page: u32,
    pub url: Url,
}

/// Expand sources into page requests.
///
/// A template without `{keyword}` is fetched once per page rather than once
/// per keyword, and one without `{page}` only for page 1.
pub fn plan_requests(sources: &[Arc<Source>], default_keywords: &[String]) -> Result<Vec<PageRequest>> {
    let mut requests = Vec::new();
    for source in sources {
        let template = &source.config.url_template;
        let keywords: Vec<Option<&str>> = if !template.contains("{keyword}") {
            vec![None]
        } else if source.config.keywords.is_empty() {
            default_keywords.iter().map(|k| Some(k.as_str())).collect()
        } else {
            source.config.keywords.iter().map(|k| Some(k.as_str())).collect()
        };
        let pages = if template.contains("{page}") {
            source.config.pages.max(1)
        } else {
            1
        };

        for keyword in keywords {
            for page in 1..=pages {
                let url = render_url(template, keyword, page)?;
                requests.push(PageRequest {
                    index: requests.len(),
                    source: Arc::clone(source),
                    keyword: keyword.map(str::to_string),
                    page,
                    url,
                });
            }
        }
    }
    Ok(requests)
}

fn render_url(template: &str, keyword: Option<&str>, page: u32) -> Result<Url> {
    let encoded: String = keyword
        .map(|k| url::form_urlencoded::byte_serialize(k.as_bytes()).collect())
        .unwrap_or_default();
    let rendered = template
        .replace("{keyword}", &encoded)
        .replace("{page}", &page.to_string());
    Url::parse(&rendered)
        .map_err(|e| JobPulseError::config(format!("invalid source URL {rendered:?}: {e}")))
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of fetching one page.
#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub source_id: String,
    pub url: String,
    pub result: std::result::Result<Vec<RawListing>, FetchFailure>,
}

/// Everything a finished fetch produced.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub listings: Vec<RawListing>,
    pub failures: Vec<FetchFailure>,
    pub pages_ok: usize,
}

impl FetchResult {
    pub fn push(&mut self, outcome: PageOutcome) {
        match outcome.result {
            Ok(mut listings) => {
                self.pages_ok += 1;
                self.listings.append(&mut listings);
            }
            Err(failure) => self.failures.push(failure),
        }
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Bounded-concurrency page fetcher with retries.
pub struct Fetcher {
    limits: FetchLimits,
    client: Client,
    policy: RetryPolicy,
    identities: IdentityRotation,
}

impl Fetcher {
    pub fn new(limits: FetchLimits) -> Result<Self> {
        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(limits.timeout)
            .build()
            .map_err(|e| JobPulseError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            policy: RetryPolicy::from(&limits),
            identities: IdentityRotation::new(limits.user_agents.clone()),
            limits,
            client,
        })
    }

    /// Lazily fetch every planned page, yielding outcomes as they complete.
    ///
    /// Nothing is sent until the stream is polled, and at most
    /// `concurrency` pages are in flight. Dropping the stream aborts them.
    /// Calling again with the same plan starts over.
    pub fn fetch(&self, requests: Vec<PageRequest>) -> impl Stream<Item = PageOutcome> + '_ {
        info!(
            pages = requests.len(),
            concurrency = self.limits.concurrency,
            "starting fetch"
        );
        stream::iter(requests)
            .map(move |request| self.fetch_page(request))
            .buffer_unordered(self.limits.concurrency.max(1))
    }

    /// Drive [`Fetcher::fetch`] to completion.
    pub async fn fetch_all(&self, requests: Vec<PageRequest>) -> FetchResult {
        let mut result = FetchResult::default();
        let mut outcomes = std::pin::pin!(self.fetch(requests));
        while let Some(outcome) = outcomes.next().await {
            result.push(outcome);
        }
        info!(
            listings = result.listings.len(),
            pages_ok = result.pages_ok,
            failures = result.failures.len(),
            "fetch completed"
        );
        result
    }

    #[instrument(skip_all, fields(source = %request.source.id(), url = %request.url))]
    async fn fetch_page(&self, request: PageRequest) -> PageOutcome {
        let mut attempts = 0u32;
        let result = loop {
            if !self.limits.rate_limit.is_zero() {
                tokio::time::sleep(self.limits.rate_limit).await;
            }
            let agent = self
                .identities
                .pick(request.index, attempts)
                .unwrap_or(DEFAULT_USER_AGENT);
            attempts += 1;

            match self.attempt(&request, agent).await {
                Ok(listings) => {
                    debug!(count = listings.len(), attempts, "page fetched");
                    break Ok(listings);
                }
                Err(err) => match self.policy.decide(attempts, &err) {
                    RetryDecision::Retry { delay } => {
                        debug!(attempts, ?delay, error = ?err, "retrying page");
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::GiveUp => {
                        let failure =
                            err.into_failure(request.source.id(), request.url.as_str(), attempts);
                        warn!(attempts, kind = ?failure.kind, message = %failure.message, "page failed");
                        break Err(failure);
                    }
                },
            }
        };

        PageOutcome {
            source_id: request.source.id().to_string(),
            url: request.url.to_string(),
            result,
        }
    }

    async fn attempt(
        &self,
        request: &PageRequest,
        agent: &str,
    ) -> std::result::Result<Vec<RawListing>, AttemptError> {
        let response = self
            .client
            .get(request.url.clone())
            .header(USER_AGENT, agent)
            .header(ACCEPT_LANGUAGE, ACCEPT_LANGUAGE_VALUE)
            .send()
            .await
            .map_err(|e| AttemptError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(AttemptError::Status {
                code: status.as_u16(),
                retry_after,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| AttemptError::Network(format!("body read failed: {e}")))?;

        let fetched_at = Utc::now();
        let items = request
            .source
            .extractor
            .extract(&body)
            .map_err(|e| AttemptError::Malformed(e.to_string()))?;

        Ok(items
            .into_iter()
            .map(|payload| {
                let source_url = payload
                    .get("url")
                    .and_then(|link| request.url.join(link).ok())
                    .unwrap_or_else(|| request.url.clone())
                    .to_string();
                RawListing {
                    source_url,
                    source_id: request.source.id().to_string(),
                    payload,
                    fetched_at,
                }
            })
            .collect())
    }
}

//! Pipeline coordinator: fetch → clean → analyze → persist, one run at a time.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use jobpulse_analyzer::Analyzer;
use jobpulse_cleaner::clean;
use jobpulse_fetcher::{FetchResult, Fetcher, Source, build_sources, plan_requests};
use jobpulse_shared::{
    AnalysisSnapshot, AppConfig, CleanListing, FetchLimits, JobPulseError, PipelineState, Result,
    RunRecord, RunStatus, SnapshotInfo,
};
use jobpulse_storage::Store;

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// The writes a run performs against the store.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn upsert(&self, listings: &[CleanListing]) -> Result<usize>;
    async fn append_snapshot(
        &self,
        snapshot: &AnalysisSnapshot,
        word_cloud_svg: Option<&str>,
    ) -> Result<SnapshotInfo>;
    async fn append_run(&self, record: &RunRecord) -> Result<()>;
}

#[async_trait]
impl PipelineStore for Store {
    async fn upsert(&self, listings: &[CleanListing]) -> Result<usize> {
        Store::upsert(self, listings).await
    }

    async fn append_snapshot(
        &self,
        snapshot: &AnalysisSnapshot,
        word_cloud_svg: Option<&str>,
    ) -> Result<SnapshotInfo> {
        Store::append_snapshot(self, snapshot, word_cloud_svg).await
    }

    async fn append_run(&self, record: &RunRecord) -> Result<()> {
        Store::append_run(self, record).await
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when the coordinator enters a new state.
    fn phase(&self, state: PipelineState);
    /// Called as each page finishes, successfully or not.
    fn page_fetched(&self, url: &str, current: usize, total: usize);
    /// Called once the run record is final.
    fn done(&self, record: &RunRecord);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _state: PipelineState) {}
    fn page_fetched(&self, _url: &str, _current: usize, _total: usize) {}
    fn done(&self, _record: &RunRecord) {}
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Owns the stage components and the single current-run state.
pub struct Coordinator {
    fetcher: Fetcher,
    sources: Vec<Arc<Source>>,
    keywords: Vec<String>,
    analyzer: Arc<Analyzer>,
    store: Arc<dyn PipelineStore>,
    progress: Arc<dyn ProgressReporter>,
    state: watch::Sender<PipelineState>,
}

impl Coordinator {
    pub fn new(
        fetcher: Fetcher,
        sources: Vec<Arc<Source>>,
        keywords: Vec<String>,
        analyzer: Analyzer,
        store: Arc<dyn PipelineStore>,
    ) -> Self {
        Self {
            fetcher,
            sources,
            keywords,
            analyzer: Arc::new(analyzer),
            store,
            progress: Arc::new(SilentProgress),
            state: watch::Sender::new(PipelineState::Idle),
        }
    }

    /// Build the fetcher, sources, and analyzer described by `config`.
    pub fn from_config(config: &AppConfig, store: Arc<dyn PipelineStore>) -> Result<Self> {
        let fetcher = Fetcher::new(FetchLimits::from(config))?;
        let sources = build_sources(&config.sources)?;
        let analyzer = Analyzer::from_config(&config.analysis)?;
        Ok(Self::new(fetcher, sources, config.keywords.clone(), analyzer, store))
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Execute one full run.
    ///
    /// Returns the finalized [`RunRecord`] whatever the outcome; the only
    /// error is [`JobPulseError::RunInProgress`], returned without touching
    /// the store when another run holds the coordinator.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<RunRecord> {
        let claimed = self.state.send_if_modified(|state| {
            if *state == PipelineState::Idle {
                *state = PipelineState::Fetching;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(JobPulseError::RunInProgress);
        }
        let _idle = IdleOnDrop(&self.state);
        self.progress.phase(PipelineState::Fetching);

        let mut record = RunRecord::start();
        let (status, error) = match self.execute(&mut record, cancel).await {
            Ok(()) if record.counts.failed() > 0 => (RunStatus::Partial, None),
            Ok(()) => (RunStatus::Success, None),
            Err(e) => {
                error!(run_id = %record.id, error = %e, "run failed");
                self.enter(PipelineState::Failed);
                (RunStatus::Failed, Some(e.to_string()))
            }
        };
        record.finalize(status, error);

        if let Err(e) = self.store.append_run(&record).await {
            error!(run_id = %record.id, error = %e, "failed to write run record");
            if record.status != RunStatus::Failed {
                record.status = RunStatus::Failed;
                record.error = Some(e.to_string());
            }
        }

        info!(
            run_id = %record.id,
            status = %record.status,
            fetched = record.counts.fetched,
            failed = record.counts.failed(),
            upserted = record.counts.upserted,
            "run finished"
        );
        self.progress.done(&record);
        Ok(record)
    }

    #[instrument(skip_all, fields(run_id = %record.id))]
    async fn execute(&self, record: &mut RunRecord, cancel: &CancellationToken) -> Result<()> {
        // --- Fetching ---
        let requests = plan_requests(&self.sources, &self.keywords)?;
        let total = requests.len();
        let mut fetched = FetchResult::default();
        {
            let mut outcomes = std::pin::pin!(self.fetcher.fetch(requests));
            let mut done = 0;
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(JobPulseError::cancelled("fetching")),
                    next = outcomes.next() => next,
                };
                let Some(outcome) = next else { break };
                done += 1;
                self.progress.page_fetched(&outcome.url, done, total);
                fetched.push(outcome);
                record.counts.fetched = fetched.listings.len();
                record.counts.fetch_failures = fetched.failures.len();
            }
        }
        if fetched.pages_ok == 0 && total > 0 {
            warn!(pages = total, "no page could be fetched");
        }

        // --- Cleaning ---
        self.checkpoint(PipelineState::Cleaning, cancel)?;
        let cleaned = clean(fetched.listings);
        record.counts.rejected = cleaned.rejected.len();
        record.counts.duplicates = cleaned.duplicates;
        record.counts.unique = cleaned.listings.len();
        let listings = Arc::new(cleaned.listings);

        // --- Analyzing ---
        self.checkpoint(PipelineState::Analyzing, cancel)?;
        let analyzer = Arc::clone(&self.analyzer);
        let batch = Arc::clone(&listings);
        let run_id = record.id.clone();
        let task = tokio::task::spawn_blocking(move || analyzer.analyze(&batch, run_id, Utc::now()));
        let analysis = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(JobPulseError::cancelled("analyzing")),
            joined = task => joined.map_err(|e| JobPulseError::TaskFailed {
                stage: "analyzer".into(),
                message: e.to_string(),
            })?,
        };

        // --- Persisting ---
        // Writes are not interrupted once started so no half-committed batch
        // or partial snapshot directory is left behind.
        self.checkpoint(PipelineState::Persisting, cancel)?;
        record.counts.upserted = self.store.upsert(&listings).await?;

        if listings.is_empty() {
            info!("no listings in this run, writing an empty snapshot");
        }
        let snapshot = self
            .store
            .append_snapshot(&analysis.snapshot, analysis.word_cloud_svg.as_deref())
            .await?;
        debug!(dir = %snapshot.dir, "snapshot stored");
        record.snapshot_written = true;
        Ok(())
    }

    /// Enter the next stage unless the run has been cancelled.
    fn checkpoint(&self, next: PipelineState, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(JobPulseError::cancelled(self.state().as_str()));
        }
        self.enter(next);
        Ok(())
    }

    fn enter(&self, state: PipelineState) {
        self.state.send_replace(state);
        debug!(%state, "pipeline state");
        self.progress.phase(state);
    }
}

/// Returns the coordinator to `Idle` however the run ends, panics included.
struct IdleOnDrop<'a>(&'a watch::Sender<PipelineState>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(PipelineState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chrono::TimeZone;
    use jobpulse_shared::{ExtractorConfig, RawListing, SourceConfig};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn temp_dirs() -> (PathBuf, PathBuf) {
        let root = std::env::temp_dir().join(format!("jp_core_{}", uuid::Uuid::now_v7()));
        (root.join("data"), root.join("analysis"))
    }

    fn config(base: &str) -> AppConfig {
        let mut config = AppConfig::default();
        config.keywords = vec!["rust".into()];
        config.fetch.concurrency = 2;
        config.fetch.max_attempts = 2;
        config.fetch.backoff_base_ms = 1;
        config.fetch.backoff_max_ms = 2;
        config.fetch.rate_limit_ms = 0;
        config.sources = vec![SourceConfig {
            id: "mock".into(),
            name: "Mock Jobs".into(),
            url_template: format!("{base}/search?kw={{keyword}}&p={{page}}"),
            keywords: vec![],
            pages: 2,
            extractor: ExtractorConfig::Html {
                item: ".job".into(),
                fields: [
                    ("title", ".title"),
                    ("company", ".company"),
                    ("salary", ".salary"),
                    ("posted", ".date"),
                    ("description", ".desc"),
                ]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            },
        }];
        config
    }

    /// Two pages, three cards, two of which share an identity.
    async fn mount_listings(server: &MockServer) {
        let card = |title: &str, company: &str, salary: &str| {
            format!(
                r#"<div class="job"><span class="title">{title}</span><span class="company">{company}</span><span class="salary">{salary}</span><span class="date">2024-05-01</span><span class="desc">熟悉 Rust 与 Tokio 异步编程</span></div>"#
            )
        };
        let page1 = format!(
            "<html><body>{}{}</body></html>",
            card("Rust 后端开发工程师", "星河科技", "20k-30k"),
            card("数据分析师", "蓝海数据", "15k-25k")
        );
        let page2 = format!(
            "<html><body>{}</body></html>",
            card("rust 后端开发工程师", "星河科技", "25k-35k")
        );
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(wiremock::matchers::query_param("p", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page1))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(wiremock::matchers::query_param("p", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page2))
            .mount(server)
            .await;
    }

    async fn coordinator(config: &AppConfig) -> (Arc<Coordinator>, Arc<Store>) {
        let (data, analysis) = temp_dirs();
        let store = Arc::new(Store::open(&data, &analysis).await.unwrap());
        let coordinator = Coordinator::from_config(config, store.clone()).unwrap();
        (Arc::new(coordinator), store)
    }

    #[tokio::test]
    async fn full_run_persists_listings_snapshot_and_record() {
        let server = MockServer::start().await;
        mount_listings(&server).await;
        let (coordinator, store) = coordinator(&config(&server.uri())).await;

        let record = coordinator.run_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(record.status, RunStatus::Success);
        assert_eq!(record.counts.fetched, 3);
        assert_eq!(record.counts.duplicates, 1);
        assert_eq!(record.counts.unique, 2);
        assert_eq!(record.counts.upserted, 2);
        assert!(record.snapshot_written);
        assert_eq!(coordinator.state(), PipelineState::Idle);

        let listings = store.read_all().await.unwrap();
        assert_eq!(listings.len(), 2);
        let latest = store.read_latest().await.unwrap().unwrap();
        assert_eq!(latest.run_id, record.id);
        assert_eq!(latest.listing_count, 2);
        assert_eq!(store.list_runs(10).await.unwrap(), vec![stored(&record)]);
    }

    /// Run records round-trip timestamps at microsecond precision.
    fn stored(record: &RunRecord) -> RunRecord {
        let trunc = |t: chrono::DateTime<Utc>| {
            chrono::DateTime::parse_from_rfc3339(&t.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
                .unwrap()
                .with_timezone(&Utc)
        };
        RunRecord {
            started_at: trunc(record.started_at),
            finished_at: record.finished_at.map(trunc),
            ..record.clone()
        }
    }

    fn raw(title: &str, salary: &str, fetched_hour: u32) -> RawListing {
        RawListing {
            source_url: "https://jobs.example.com/search?p=1".into(),
            source_id: "mock".into(),
            payload: [
                ("title", title),
                ("company", "星河科技"),
                ("salary", salary),
                ("posted", "2024-05-01"),
                ("description", "熟悉 Rust 与 Tokio 异步编程"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
            fetched_at: Utc.with_ymd_and_hms(2024, 5, 10, fetched_hour, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn reapplying_a_cleaned_batch_is_idempotent() {
        let (data, analysis) = temp_dirs();
        let store = Store::open(&data, &analysis).await.unwrap();
        let batch = vec![
            raw("Rust 后端开发工程师", "20k-30k", 2),
            raw("数据分析师", "15k-25k", 2),
            raw("rust 后端开发工程师", "25k-35k", 3),
        ];

        store.upsert(&clean(batch.clone()).listings).await.unwrap();
        let first = store.read_all().await.unwrap();
        store.upsert(&clean(batch).listings).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(store.read_all().await.unwrap(), first);
    }

    #[tokio::test]
    async fn later_fetch_wins_inside_the_store() {
        let (data, analysis) = temp_dirs();
        let store = Store::open(&data, &analysis).await.unwrap();

        store
            .upsert(&clean(vec![raw("Rust 后端开发工程师", "10k-15k", 1)]).listings)
            .await
            .unwrap();
        store
            .upsert(
                &clean(vec![
                    raw("rust 后端开发工程师", "30k-40k", 5),
                    raw("Rust 后端开发工程师", "20k-25k", 3),
                ])
                .listings,
            )
            .await
            .unwrap();

        let stored = store.read_all().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].salary.map(|s| s.min_monthly), Some(30_000));
        assert_eq!(stored[0].fetched_at, Utc.with_ymd_and_hms(2024, 5, 10, 5, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn rerunning_the_pipeline_keeps_listing_identities() {
        let server = MockServer::start().await;
        mount_listings(&server).await;
        let (coordinator, store) = coordinator(&config(&server.uri())).await;
        let cancel = CancellationToken::new();

        let identities = |listings: Vec<CleanListing>| -> Vec<String> {
            listings.into_iter().map(|l| l.identity_hash).collect()
        };

        coordinator.run_once(&cancel).await.unwrap();
        let first = identities(store.read_all().await.unwrap());
        let second_run = coordinator.run_once(&cancel).await.unwrap();

        assert_eq!(second_run.counts.upserted, 2);
        assert_eq!(identities(store.read_all().await.unwrap()), first);
        assert_eq!(store.list_runs(10).await.unwrap().len(), 2);
        assert_eq!(store.list_snapshots().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn second_trigger_while_running_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html></html>")
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;
        let (coordinator, store) = coordinator(&config(&server.uri())).await;
        let cancel = CancellationToken::new();

        let mut states = coordinator.subscribe();
        let running = {
            let coordinator = Arc::clone(&coordinator);
            let cancel = cancel.clone();
            tokio::spawn(async move { coordinator.run_once(&cancel).await })
        };
        states
            .wait_for(|s| *s == PipelineState::Fetching)
            .await
            .unwrap();

        let second = coordinator.run_once(&cancel).await;
        assert!(matches!(second, Err(JobPulseError::RunInProgress)));
        assert!(store.list_runs(10).await.unwrap().is_empty());
        assert!(store.read_all().await.unwrap().is_empty());

        let first = running.await.unwrap().unwrap();
        assert_eq!(first.status, RunStatus::Success);
        assert_eq!(store.list_runs(10).await.unwrap().len(), 1);
        assert_eq!(coordinator.state(), PipelineState::Idle);
    }

    #[tokio::test]
    async fn all_sources_failing_is_partial_and_returns_to_idle() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let (coordinator, store) = coordinator(&config(&server.uri())).await;

        let record = coordinator.run_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(record.status, RunStatus::Partial);
        assert_eq!(record.counts.fetch_failures, 2);
        assert_eq!(record.counts.fetched, 0);
        assert!(record.snapshot_written);
        assert!(record.finished_at.is_some());
        assert_eq!(coordinator.state(), PipelineState::Idle);

        let latest = store.read_latest().await.unwrap().unwrap();
        assert_eq!(latest.run_id, record.id);
        assert_eq!(latest.listing_count, 0);
        assert!(latest.keywords.is_empty());
        assert_eq!(store.list_runs(1).await.unwrap()[0].status, RunStatus::Partial);
    }

    struct UnavailableStore {
        runs: Mutex<Vec<RunRecord>>,
    }

    #[async_trait]
    impl PipelineStore for UnavailableStore {
        async fn upsert(&self, _listings: &[CleanListing]) -> Result<usize> {
            Err(JobPulseError::store("disk full"))
        }

        async fn append_snapshot(
            &self,
            _snapshot: &AnalysisSnapshot,
            _word_cloud_svg: Option<&str>,
        ) -> Result<SnapshotInfo> {
            Err(JobPulseError::store("disk full"))
        }

        async fn append_run(&self, record: &RunRecord) -> Result<()> {
            self.runs.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn store_failure_fails_the_run() {
        let server = MockServer::start().await;
        mount_listings(&server).await;
        let store = Arc::new(UnavailableStore {
            runs: Mutex::new(Vec::new()),
        });
        let coordinator = Coordinator::from_config(&config(&server.uri()), store.clone()).unwrap();

        let record = coordinator.run_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(record.status, RunStatus::Failed);
        assert!(record.error.as_deref().unwrap().contains("disk full"));
        assert_eq!(record.counts.unique, 2);
        assert_eq!(record.counts.upserted, 0);
        assert_eq!(coordinator.state(), PipelineState::Idle);
        assert_eq!(store.runs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_fails_the_run_with_partial_counts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;
        let (coordinator, store) = coordinator(&config(&server.uri())).await;
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            let mut states = coordinator.subscribe();
            tokio::spawn(async move {
                states.wait_for(|s| *s == PipelineState::Fetching).await.unwrap();
                cancel.cancel();
            })
        };
        let record = coordinator.run_once(&cancel).await.unwrap();
        canceller.await.unwrap();

        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("cancelled during fetching"));
        assert_eq!(coordinator.state(), PipelineState::Idle);
        assert_eq!(store.list_runs(1).await.unwrap()[0].status, RunStatus::Failed);
    }

    struct CountingProgress {
        pages: AtomicUsize,
        phases: Mutex<Vec<PipelineState>>,
    }

    impl ProgressReporter for CountingProgress {
        fn phase(&self, state: PipelineState) {
            self.phases.lock().unwrap().push(state);
        }
        fn page_fetched(&self, _url: &str, _current: usize, _total: usize) {
            self.pages.fetch_add(1, Ordering::SeqCst);
        }
        fn done(&self, _record: &RunRecord) {}
    }

    #[tokio::test]
    async fn progress_sees_every_stage() {
        let server = MockServer::start().await;
        mount_listings(&server).await;
        let (data, analysis) = temp_dirs();
        let store = Arc::new(Store::open(&data, &analysis).await.unwrap());
        let progress = Arc::new(CountingProgress {
            pages: AtomicUsize::new(0),
            phases: Mutex::new(Vec::new()),
        });
        let coordinator = Coordinator::from_config(&config(&server.uri()), store)
            .unwrap()
            .with_progress(progress.clone());

        coordinator.run_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(progress.pages.load(Ordering::SeqCst), 2);
        assert_eq!(
            *progress.phases.lock().unwrap(),
            vec![
                PipelineState::Fetching,
                PipelineState::Cleaning,
                PipelineState::Analyzing,
                PipelineState::Persisting,
            ]
        );
    }
}

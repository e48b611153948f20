//! libSQL-backed store for listings, run records, and analysis snapshots.
//!
//! The [`Store`] struct owns two locations:
//! - `<data_dir>/jobpulse.db`: the `listings`, `run_records`, and `snapshots` tables
//! - `<analysis_dir>/`: one immutable artifact directory per snapshot plus
//!   `latest.json`
//!
//! **Access rules:**
//! - the pipeline is the sole writer, via [`Store::open`]
//! - the CLI read commands use [`Store::open_readonly`]
//! - the database runs in WAL mode, so a reader holding a statement open
//!   keeps its snapshot and never blocks the writer's commit

mod migrations;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use libsql::{Connection, Database, Value, params};
use serde::Serialize;
use tracing::{debug, info, instrument};

use jobpulse_shared::{
    AnalysisSnapshot, CleanListing, ExperienceRange, JobPulseError, Result, RunCounts, RunId,
    RunRecord, RunStatus, SalaryRange, SnapshotInfo, artifacts,
};

/// Database file name inside the data directory.
pub const DB_FILE: &str = "jobpulse.db";

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const LISTING_COLUMNS: &str = "identity_hash, title, company, city, district, salary_min, salary_max,
    salary_annualized, category, posted_date, description, experience_min, experience_max,
    education, industry, company_size, skills_json, source_id, source_url, fetched_at";

const RUN_COLUMNS: &str = "id, started_at, finished_at, status, fetched, fetch_failures, rejected,
    duplicates, unique_listings, upserted, error, snapshot_written";

/// Storage handle over the database and the analysis directory.
pub struct Store {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
    analysis_dir: PathBuf,
}

impl Store {
    /// Open or create the store in read-write mode, creating both
    /// directories if absent and applying pending migrations.
    #[instrument(skip_all, fields(data_dir = %data_dir.display()))]
    pub async fn open(data_dir: &Path, analysis_dir: &Path) -> Result<Self> {
        for dir in [data_dir, analysis_dir] {
            std::fs::create_dir_all(dir).map_err(|e| JobPulseError::io(dir, e))?;
        }

        let store = Self::connect(&data_dir.join(DB_FILE), analysis_dir, false).await?;
        store.run_migrations().await?;
        Ok(store)
    }

    /// Open an existing store for reading only. Fails if the database has
    /// never been created.
    pub async fn open_readonly(data_dir: &Path, analysis_dir: &Path) -> Result<Self> {
        let path = data_dir.join(DB_FILE);
        if !path.exists() {
            return Err(JobPulseError::store(format!(
                "no database at {} (run `jobpulse run` first)",
                path.display()
            )));
        }
        Self::connect(&path, analysis_dir, true).await
    }

    async fn connect(path: &Path, analysis_dir: &Path, readonly: bool) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(JobPulseError::store)?;
        let conn = db.connect().map_err(JobPulseError::store)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(JobPulseError::store)?;
        if !readonly {
            // journal_mode is persistent and answers with a row.
            let mut rows = conn
                .query("PRAGMA journal_mode = WAL", params![])
                .await
                .map_err(JobPulseError::store)?;
            while rows.next().await.map_err(JobPulseError::store)?.is_some() {}
        }
        Ok(Self {
            db,
            conn,
            readonly,
            analysis_dir: analysis_dir.to_path_buf(),
        })
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        JobPulseError::store(format!("migration v{} failed: {e}", migration.version))
                    })?;
            }
        }
        Ok(())
    }

    /// Highest applied migration, or 0 on a fresh database.
    async fn schema_version(&self) -> u32 {
        let Ok(mut rows) = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await
        else {
            return 0;
        };
        match rows.next().await {
            Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
            _ => 0,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(JobPulseError::store("store is opened in read-only mode"));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Listings
    // -----------------------------------------------------------------------

    /// Insert or update listings by identity hash in one transaction.
    ///
    /// Either the whole batch is committed or none of it is. Re-applying
    /// the same batch leaves the table unchanged.
    #[instrument(skip_all, fields(batch = listings.len()))]
    pub async fn upsert(&self, listings: &[CleanListing]) -> Result<usize> {
        self.check_writable()?;
        let tx = self.conn.transaction().await.map_err(JobPulseError::store)?;

        for listing in listings {
            let skills = serde_json::to_string(&listing.skills).map_err(JobPulseError::store)?;
            tx.execute(
                "INSERT INTO listings (identity_hash, title, company, city, district, salary_min,
                    salary_max, salary_annualized, category, posted_date, description,
                    experience_min, experience_max, education, industry, company_size,
                    skills_json, source_id, source_url, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                    ?17, ?18, ?19, ?20)
                 ON CONFLICT(identity_hash) DO UPDATE SET
                   title = excluded.title,
                   company = excluded.company,
                   city = excluded.city,
                   district = excluded.district,
                   salary_min = excluded.salary_min,
                   salary_max = excluded.salary_max,
                   salary_annualized = excluded.salary_annualized,
                   category = excluded.category,
                   posted_date = excluded.posted_date,
                   description = excluded.description,
                   experience_min = excluded.experience_min,
                   experience_max = excluded.experience_max,
                   education = excluded.education,
                   industry = excluded.industry,
                   company_size = excluded.company_size,
                   skills_json = excluded.skills_json,
                   source_id = excluded.source_id,
                   source_url = excluded.source_url,
                   fetched_at = excluded.fetched_at",
                params![
                    listing.identity_hash.as_str(),
                    listing.title.as_str(),
                    listing.company.as_str(),
                    listing.city.as_str(),
                    listing.district.as_deref(),
                    listing.salary.map(|s| i64::from(s.min_monthly)),
                    listing.salary.map(|s| i64::from(s.max_monthly)),
                    i64::from(listing.salary.is_some_and(|s| s.annualized)),
                    listing.category.as_str(),
                    listing.posted_date.map(|d| d.format("%Y-%m-%d").to_string()),
                    listing.description.as_str(),
                    listing.experience.map(|e| i64::from(e.min_years)),
                    listing.experience.and_then(|e| e.max_years).map(i64::from),
                    listing.education.as_str(),
                    listing.industry.as_deref(),
                    listing.company_size.as_deref(),
                    skills,
                    listing.source_id.as_str(),
                    listing.source_url.as_str(),
                    timestamp(&listing.fetched_at),
                ],
            )
            .await
            .map_err(JobPulseError::store)?;
        }

        tx.commit().await.map_err(JobPulseError::store)?;
        info!(upserted = listings.len(), "listings committed");
        Ok(listings.len())
    }

    /// Every stored listing, ordered by identity hash.
    pub async fn read_all(&self) -> Result<Vec<CleanListing>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {LISTING_COLUMNS} FROM listings ORDER BY identity_hash"),
                params![],
            )
            .await
            .map_err(JobPulseError::store)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(JobPulseError::store)? {
            results.push(row_to_listing(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Persist a snapshot and its artifacts.
    ///
    /// Files are written to a hidden staging directory that is renamed into
    /// place, then the index row is inserted, and only then is `latest.json`
    /// swapped via temp file + rename. Readers never see a partial set, and
    /// `latest.json` never names a snapshot the index does not know.
    #[instrument(skip_all, fields(run_id = %snapshot.run_id))]
    pub async fn append_snapshot(
        &self,
        snapshot: &AnalysisSnapshot,
        word_cloud_svg: Option<&str>,
    ) -> Result<SnapshotInfo> {
        self.check_writable()?;

        let dir_name = snapshot.dir_name();
        let final_dir = self.analysis_dir.join(&dir_name);
        if final_dir.exists() {
            return Err(JobPulseError::validation(format!(
                "snapshot directory {dir_name} already exists"
            )));
        }

        let staging = self.analysis_dir.join(format!(".staging-{dir_name}"));
        if staging.exists() {
            tokio::fs::remove_dir_all(&staging)
                .await
                .map_err(|e| JobPulseError::io(&staging, e))?;
        }
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| JobPulseError::io(&staging, e))?;

        write_json(&staging.join(artifacts::SNAPSHOT_FILE), snapshot).await?;
        write_json(&staging.join(artifacts::KEYWORDS_FILE), &snapshot.keywords).await?;
        write_json(&staging.join(artifacts::STATS_FILE), &StatsDocument::from(snapshot)).await?;
        if let Some(svg) = word_cloud_svg {
            let path = staging.join(artifacts::WORD_CLOUD_FILE);
            tokio::fs::write(&path, svg)
                .await
                .map_err(|e| JobPulseError::io(&path, e))?;
        }

        tokio::fs::rename(&staging, &final_dir)
            .await
            .map_err(|e| JobPulseError::io(&final_dir, e))?;

        self.conn
            .execute(
                "INSERT INTO snapshots (run_id, created_at, listing_count, dir)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    snapshot.run_id.to_string(),
                    timestamp(&snapshot.created_at),
                    snapshot.listing_count as i64,
                    dir_name.as_str(),
                ],
            )
            .await
            .map_err(JobPulseError::store)?;

        let tmp = self.analysis_dir.join(format!(".{}.tmp", artifacts::LATEST_FILE));
        write_json(&tmp, snapshot).await?;
        let latest = self.analysis_dir.join(artifacts::LATEST_FILE);
        tokio::fs::rename(&tmp, &latest)
            .await
            .map_err(|e| JobPulseError::io(&latest, e))?;

        info!(dir = %dir_name, "snapshot written");
        Ok(SnapshotInfo {
            run_id: snapshot.run_id.clone(),
            created_at: snapshot.created_at,
            listing_count: snapshot.listing_count,
            dir: dir_name,
        })
    }

    /// The most recent snapshot, or `None` if none has been written.
    pub async fn read_latest(&self) -> Result<Option<AnalysisSnapshot>> {
        let mut rows = self
            .conn
            .query(
                "SELECT dir FROM snapshots ORDER BY created_at DESC, run_id DESC LIMIT 1",
                params![],
            )
            .await
            .map_err(JobPulseError::store)?;

        let Some(row) = rows.next().await.map_err(JobPulseError::store)? else {
            return Ok(None);
        };
        let dir = text(&row, 0)?;
        let path = self.analysis_dir.join(&dir).join(artifacts::SNAPSHOT_FILE);
        debug!(path = %path.display(), "reading latest snapshot");

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| JobPulseError::io(&path, e))?;
        let snapshot = serde_json::from_str(&content)
            .map_err(|e| JobPulseError::parse(format!("{}: {e}", path.display())))?;
        Ok(Some(snapshot))
    }

    /// Snapshot index, newest first.
    pub async fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>> {
        let mut rows = self
            .conn
            .query(
                "SELECT run_id, created_at, listing_count, dir FROM snapshots
                 ORDER BY created_at DESC, run_id DESC",
                params![],
            )
            .await
            .map_err(JobPulseError::store)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(JobPulseError::store)? {
            results.push(SnapshotInfo {
                run_id: parse_run_id(&text(&row, 0)?)?,
                created_at: parse_timestamp(&text(&row, 1)?)?,
                listing_count: int(&row, 2)? as usize,
                dir: text(&row, 3)?,
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Run records
    // -----------------------------------------------------------------------

    /// Append a finalized run record. Records are never updated.
    #[instrument(skip_all, fields(run_id = %record.id, status = %record.status))]
    pub async fn append_run(&self, record: &RunRecord) -> Result<()> {
        self.check_writable()?;
        let counts = &record.counts;
        self.conn
            .execute(
                &format!(
                    "INSERT INTO run_records ({RUN_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                params![
                    record.id.to_string(),
                    timestamp(&record.started_at),
                    record.finished_at.as_ref().map(timestamp),
                    record.status.as_str(),
                    counts.fetched as i64,
                    counts.fetch_failures as i64,
                    counts.rejected as i64,
                    counts.duplicates as i64,
                    counts.unique as i64,
                    counts.upserted as i64,
                    record.error.as_deref(),
                    i64::from(record.snapshot_written),
                ],
            )
            .await
            .map_err(JobPulseError::store)?;
        Ok(())
    }

    /// The most recent `limit` run records, newest first.
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {RUN_COLUMNS} FROM run_records ORDER BY started_at DESC, id DESC LIMIT ?1"),
                params![limit as i64],
            )
            .await
            .map_err(JobPulseError::store)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(JobPulseError::store)? {
            results.push(row_to_run(&row)?);
        }
        Ok(results)
    }
}

/// `stats.json`: everything in the snapshot except the keyword table.
#[derive(Serialize)]
struct StatsDocument<'a> {
    run_id: &'a RunId,
    created_at: DateTime<Utc>,
    listing_count: usize,
    categories: &'a std::collections::BTreeMap<String, u64>,
    #[serde(flatten)]
    stats: &'a jobpulse_shared::AggregateStats,
}

impl<'a> From<&'a AnalysisSnapshot> for StatsDocument<'a> {
    fn from(snapshot: &'a AnalysisSnapshot) -> Self {
        Self {
            run_id: &snapshot.run_id,
            created_at: snapshot.created_at,
            listing_count: snapshot.listing_count,
            categories: &snapshot.categories,
            stats: &snapshot.stats,
        }
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| JobPulseError::parse(format!("serialize {}: {e}", path.display())))?;
    tokio::fs::write(path, json)
        .await
        .map_err(|e| JobPulseError::io(path, e))
}

/// Fixed-width RFC 3339 so lexical order matches time order.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| JobPulseError::store(format!("invalid timestamp '{s}': {e}")))
}

fn parse_run_id(s: &str) -> Result<RunId> {
    s.parse()
        .map_err(|e| JobPulseError::store(format!("invalid run id '{s}': {e}")))
}

/// Nullable TEXT column. Only NULL reads as absent; any other type is an error.
fn opt_text(row: &libsql::Row, i: i32) -> Result<Option<String>> {
    match row.get_value(i).map_err(JobPulseError::store)? {
        Value::Null => Ok(None),
        Value::Text(s) => Ok(Some(s)),
        other => Err(JobPulseError::store(format!("column {i}: expected text, found {other:?}"))),
    }
}

/// Nullable INTEGER column.
fn opt_int(row: &libsql::Row, i: i32) -> Result<Option<i64>> {
    match row.get_value(i).map_err(JobPulseError::store)? {
        Value::Null => Ok(None),
        Value::Integer(v) => Ok(Some(v)),
        other => Err(JobPulseError::store(format!("column {i}: expected integer, found {other:?}"))),
    }
}

fn text(row: &libsql::Row, i: i32) -> Result<String> {
    opt_text(row, i)?.ok_or_else(|| JobPulseError::store(format!("column {i}: unexpected NULL")))
}

fn int(row: &libsql::Row, i: i32) -> Result<i64> {
    opt_int(row, i)?.ok_or_else(|| JobPulseError::store(format!("column {i}: unexpected NULL")))
}

fn row_to_listing(row: &libsql::Row) -> Result<CleanListing> {
    let small = |i: i32| -> Result<Option<u32>> { Ok(opt_int(row, i)?.map(|v| v as u32)) };

    let salary = match (small(5)?, small(6)?) {
        (Some(min_monthly), Some(max_monthly)) => Some(SalaryRange {
            min_monthly,
            max_monthly,
            annualized: int(row, 7)? != 0,
        }),
        _ => None,
    };
    let posted_date = opt_text(row, 9)?
        .map(|s| {
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map_err(|e| JobPulseError::store(format!("invalid date '{s}': {e}")))
        })
        .transpose()?;
    let experience = match small(11)? {
        Some(min_years) => Some(ExperienceRange {
            min_years,
            max_years: small(12)?,
        }),
        None => None,
    };
    let skills: Vec<String> = serde_json::from_str(&text(row, 16)?).map_err(JobPulseError::store)?;

    Ok(CleanListing {
        identity_hash: text(row, 0)?,
        title: text(row, 1)?,
        company: text(row, 2)?,
        city: text(row, 3)?,
        district: opt_text(row, 4)?,
        salary,
        category: text(row, 8)?,
        posted_date,
        description: text(row, 10)?,
        experience,
        education: text(row, 13)?,
        industry: opt_text(row, 14)?,
        company_size: opt_text(row, 15)?,
        skills,
        source_id: text(row, 17)?,
        source_url: text(row, 18)?,
        fetched_at: parse_timestamp(&text(row, 19)?)?,
    })
}

fn row_to_run(row: &libsql::Row) -> Result<RunRecord> {
    let count = |i: i32| -> Result<usize> { Ok(int(row, i)? as usize) };

    let status: RunStatus = text(row, 3)?.parse().map_err(JobPulseError::store)?;
    Ok(RunRecord {
        id: parse_run_id(&text(row, 0)?)?,
        started_at: parse_timestamp(&text(row, 1)?)?,
        finished_at: opt_text(row, 2)?.map(|s| parse_timestamp(&s)).transpose()?,
        status,
        counts: RunCounts {
            fetched: count(4)?,
            fetch_failures: count(5)?,
            rejected: count(6)?,
            duplicates: count(7)?,
            unique: count(8)?,
            upserted: count(9)?,
        },
        error: opt_text(row, 10)?,
        snapshot_written: int(row, 11)? != 0,
    })
}

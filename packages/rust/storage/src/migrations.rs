//! SQL migrations for the JobPulse database.
//!
//! Applied in ascending order on read-write open. A migration runs when its
//! version is above the highest row in `schema_migrations`.

pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: listings, run_records, snapshots",
        sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Canonical listings, one row per identity hash
CREATE TABLE IF NOT EXISTS listings (
    identity_hash     TEXT PRIMARY KEY,
    title             TEXT NOT NULL,
    company           TEXT NOT NULL,
    city              TEXT NOT NULL,
    district          TEXT,
    salary_min        INTEGER,
    salary_max        INTEGER,
    salary_annualized INTEGER NOT NULL DEFAULT 0,
    category          TEXT NOT NULL,
    posted_date       TEXT,
    description       TEXT NOT NULL,
    experience_min    INTEGER,
    experience_max    INTEGER,
    education         TEXT NOT NULL,
    industry          TEXT,
    company_size      TEXT,
    skills_json       TEXT NOT NULL DEFAULT '[]',
    source_id         TEXT NOT NULL,
    source_url        TEXT NOT NULL,
    fetched_at        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_listings_category ON listings(category);
CREATE INDEX IF NOT EXISTS idx_listings_city ON listings(city);

-- Append-only run audit log
CREATE TABLE IF NOT EXISTS run_records (
    id               TEXT PRIMARY KEY,
    started_at       TEXT NOT NULL,
    finished_at      TEXT,
    status           TEXT NOT NULL,
    fetched          INTEGER NOT NULL,
    fetch_failures   INTEGER NOT NULL,
    rejected         INTEGER NOT NULL,
    duplicates       INTEGER NOT NULL,
    unique_listings  INTEGER NOT NULL,
    upserted         INTEGER NOT NULL,
    error            TEXT,
    snapshot_written INTEGER NOT NULL DEFAULT 0
);

-- Index of snapshot artifact directories
CREATE TABLE IF NOT EXISTS snapshots (
    run_id        TEXT PRIMARY KEY,
    created_at    TEXT NOT NULL,
    listing_count INTEGER NOT NULL,
    dir           TEXT NOT NULL UNIQUE
);

CREATE INDEX IF NOT EXISTS idx_snapshots_created ON snapshots(created_at);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}

//! Database schema definitions and migrations
//!
//! This module contains all SQL schema definitions for the Highrise database.
//! Timestamps are stored as fixed-width RFC 3339 UTC text, so comparing
//! them as strings compares them as instants.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Registry of known jobs and their execution lock
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    namespace TEXT NOT NULL,
    name TEXT NOT NULL,
    recurrence_minutes INTEGER,
    enabled INTEGER NOT NULL DEFAULT 0,
    use_tor INTEGER NOT NULL DEFAULT 0,
    items_daily_threshold INTEGER NOT NULL DEFAULT 0,
    blocked_until TEXT,
    UNIQUE(namespace, name)
);

-- Requests that did not fit into a run's in-memory working set
CREATE TABLE IF NOT EXISTS requests (
    request_id TEXT PRIMARY KEY,
    job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    priority INTEGER NOT NULL DEFAULT 0,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    callback TEXT,
    errback TEXT,
    headers TEXT,
    body BLOB,
    cookies TEXT,
    meta TEXT,
    dont_filter INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_requests_job_order ON requests(job_id, priority DESC, created_at);

-- Per job, per day counters
CREATE TABLE IF NOT EXISTS job_stats_daily (
    job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    stats_date TEXT NOT NULL,
    items_scraped_count INTEGER NOT NULL DEFAULT 0,
    number_of_runs INTEGER NOT NULL DEFAULT 0,
    requests_retry_count INTEGER NOT NULL DEFAULT 0,
    requests_enqueued_memory INTEGER NOT NULL DEFAULT 0,
    requests_enqueued_disk INTEGER NOT NULL DEFAULT 0,
    requests_dequeued_memory INTEGER NOT NULL DEFAULT 0,
    requests_dequeued_disk INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY(job_id, stats_date)
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.
//! Several scheduler processes may open the same database file; the
//! read-then-delete of backlog rows and the conditional lock update run in
//! `BEGIN IMMEDIATE` transactions so they serialize across connections.

use crate::config::JobKey;
use crate::queue::{CallbackRef, FetchRequest};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{DailyStatsRecord, JobRecord, RunStats, ThresholdViolation};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// How long a connection waits for another process's write transaction
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = init_database(path)?;
        Ok(Self { conn })
    }

    /// Creates an in-memory database
    ///
    /// Used by tests and one-off tools; nothing is shared with other
    /// connections.
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

impl Storage for SqliteStorage {
    // ===== Job Registry =====

    fn upsert_job(&mut self, job: &JobRecord) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO jobs (namespace, name, recurrence_minutes, enabled, use_tor, items_daily_threshold)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(namespace, name) DO UPDATE SET
                recurrence_minutes = excluded.recurrence_minutes,
                enabled = excluded.enabled,
                use_tor = excluded.use_tor,
                items_daily_threshold = excluded.items_daily_threshold",
            params![
                job.namespace,
                job.name,
                job.recurrence_minutes,
                job.enabled,
                job.use_tor,
                job.items_daily_threshold,
            ],
        )?;

        let id = self.conn.query_row(
            "SELECT id FROM jobs WHERE namespace = ?1 AND name = ?2",
            params![job.namespace, job.name],
            |row| row.get(0),
        )?;

        Ok(id)
    }

    fn job_id(&self, namespace: &str, job: &str) -> StorageResult<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM jobs WHERE namespace = ?1 AND name = ?2",
                params![namespace, job],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn get_job(&self, namespace: &str, job: &str) -> StorageResult<Option<JobRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, namespace, name, recurrence_minutes, enabled, use_tor,
                        items_daily_threshold, blocked_until
                 FROM jobs WHERE namespace = ?1 AND name = ?2",
                params![namespace, job],
                job_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn disable_jobs_except(&mut self, keep: &[JobKey]) -> StorageResult<usize> {
        let keep: HashSet<(&str, &str)> = keep
            .iter()
            .map(|key| (key.namespace.as_str(), key.job.as_str()))
            .collect();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut stale = Vec::new();
        {
            let mut stmt = tx.prepare("SELECT id, namespace, name FROM jobs WHERE enabled = 1")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let id: i64 = row.get(0)?;
                let namespace: String = row.get(1)?;
                let name: String = row.get(2)?;
                if !keep.contains(&(namespace.as_str(), name.as_str())) {
                    stale.push(id);
                }
            }
        }

        for id in &stale {
            tx.execute("UPDATE jobs SET enabled = 0 WHERE id = ?1", params![id])?;
        }
        tx.commit()?;

        Ok(stale.len())
    }

    // ===== Request Backlog =====

    fn push_request(&mut self, job_id: i64, request: &FetchRequest) -> StorageResult<String> {
        let request_id = Uuid::new_v4().to_string();
        let created_at = request.created_at.unwrap_or_else(Utc::now);

        let headers = if request.headers.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&request.headers)?)
        };
        let cookies = if request.cookies.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&request.cookies)?)
        };
        let meta = if request.meta.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&request.meta)?)
        };
        let body = if request.body.is_empty() {
            None
        } else {
            Some(request.body.as_slice())
        };

        self.conn.execute(
            "INSERT INTO requests
             (request_id, job_id, priority, url, method, callback, errback,
              headers, body, cookies, meta, dont_filter, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                request_id,
                job_id,
                request.priority,
                request.url,
                request.method,
                request.callback.as_ref().map(CallbackRef::as_str),
                request.errback.as_ref().map(CallbackRef::as_str),
                headers,
                body,
                cookies,
                meta,
                request.dont_filter,
                to_db_time(&created_at),
            ],
        )?;

        Ok(request_id)
    }

    fn take_requests(&mut self, job_id: i64, limit: usize) -> StorageResult<Vec<FetchRequest>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let rows = {
            let mut stmt = tx.prepare(
                "SELECT request_id, priority, url, method, callback, errback,
                        headers, body, cookies, meta, dont_filter, created_at
                 FROM requests
                 WHERE job_id = ?1
                 ORDER BY priority DESC, created_at ASC, rowid ASC
                 LIMIT ?2",
            )?;
            let mapped = stmt.query_map(params![job_id, limit as i64], RequestRow::from_row)?;
            mapped.collect::<Result<Vec<_>, _>>()?
        };

        // Decode before deleting so a corrupt row rolls the whole batch back
        let requests = rows
            .into_iter()
            .map(RequestRow::into_request)
            .collect::<StorageResult<Vec<_>>>()?;

        {
            let mut delete = tx.prepare("DELETE FROM requests WHERE request_id = ?1")?;
            for request in &requests {
                delete.execute(params![request.id])?;
            }
        }

        tx.commit()?;

        Ok(requests)
    }

    fn count_requests(&self, job_id: i64) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM requests WHERE job_id = ?1",
            params![job_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn job_with_biggest_backlog(&self, now: DateTime<Utc>) -> StorageResult<Option<JobRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT j.id, j.namespace, j.name, j.recurrence_minutes, j.enabled, j.use_tor,
                        j.items_daily_threshold, j.blocked_until
                 FROM requests r
                 JOIN jobs j ON r.job_id = j.id
                 WHERE j.enabled = 1
                   AND (j.blocked_until IS NULL OR j.blocked_until < ?1)
                 GROUP BY j.id
                 ORDER BY COUNT(*) DESC, j.id ASC
                 LIMIT 1",
                params![to_db_time(&now)],
                job_from_row,
            )
            .optional()?;
        Ok(record)
    }

    // ===== Execution Locks =====

    fn try_block_job(
        &mut self,
        namespace: &str,
        job: &str,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let updated = tx.execute(
            "UPDATE jobs SET blocked_until = ?1
             WHERE namespace = ?2 AND name = ?3
               AND (blocked_until IS NULL OR blocked_until < ?4)",
            params![to_db_time(&until), namespace, job, to_db_time(&now)],
        )?;

        let exists = if updated == 0 {
            tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM jobs WHERE namespace = ?1 AND name = ?2)",
                params![namespace, job],
                |row| row.get::<_, bool>(0),
            )?
        } else {
            true
        };

        tx.commit()?;

        if !exists {
            return Err(StorageError::JobNotFound {
                namespace: namespace.to_string(),
                job: job.to_string(),
            });
        }

        Ok(updated == 1)
    }

    fn clear_block(&mut self, namespace: &str, job: &str) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE jobs SET blocked_until = NULL WHERE namespace = ?1 AND name = ?2",
            params![namespace, job],
        )?;
        Ok(())
    }

    fn blocked_until(&self, namespace: &str, job: &str) -> StorageResult<Option<DateTime<Utc>>> {
        let raw: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT blocked_until FROM jobs WHERE namespace = ?1 AND name = ?2",
                params![namespace, job],
                |row| row.get(0),
            )
            .optional()?;

        let Some(raw) = raw else {
            return Err(StorageError::JobNotFound {
                namespace: namespace.to_string(),
                job: job.to_string(),
            });
        };

        raw.map(|s| {
            parse_db_time(&s).map_err(|e| {
                StorageError::Serialization(format!("invalid blocked_until '{}': {}", s, e))
            })
        })
        .transpose()
    }

    // ===== Statistics =====

    fn record_run_stats(
        &mut self,
        job_id: i64,
        date: NaiveDate,
        stats: &RunStats,
    ) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO job_stats_daily
             (job_id, stats_date, number_of_runs, items_scraped_count, requests_retry_count,
              requests_enqueued_memory, requests_enqueued_disk,
              requests_dequeued_memory, requests_dequeued_disk)
             VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(job_id, stats_date) DO UPDATE SET
                number_of_runs = number_of_runs + 1,
                items_scraped_count = items_scraped_count + excluded.items_scraped_count,
                requests_retry_count = requests_retry_count + excluded.requests_retry_count,
                requests_enqueued_memory = requests_enqueued_memory + excluded.requests_enqueued_memory,
                requests_enqueued_disk = requests_enqueued_disk + excluded.requests_enqueued_disk,
                requests_dequeued_memory = requests_dequeued_memory + excluded.requests_dequeued_memory,
                requests_dequeued_disk = requests_dequeued_disk + excluded.requests_dequeued_disk",
            params![
                job_id,
                to_db_date(date),
                stats.items_scraped as i64,
                stats.retries as i64,
                stats.enqueued_memory as i64,
                stats.enqueued_disk as i64,
                stats.dequeued_memory as i64,
                stats.dequeued_disk as i64,
            ],
        )?;
        Ok(())
    }

    fn add_scraped_items(&mut self, job_id: i64, date: NaiveDate, count: u64) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO job_stats_daily (job_id, stats_date, items_scraped_count)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(job_id, stats_date) DO UPDATE SET
                items_scraped_count = items_scraped_count + excluded.items_scraped_count",
            params![job_id, to_db_date(date), count as i64],
        )?;
        Ok(())
    }

    fn get_daily_stats(
        &self,
        job_id: i64,
        date: NaiveDate,
    ) -> StorageResult<Option<DailyStatsRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT number_of_runs, items_scraped_count, requests_retry_count,
                        requests_enqueued_memory, requests_enqueued_disk,
                        requests_dequeued_memory, requests_dequeued_disk
                 FROM job_stats_daily
                 WHERE job_id = ?1 AND stats_date = ?2",
                params![job_id, to_db_date(date)],
                |row| {
                    Ok(DailyStatsRecord {
                        job_id,
                        date,
                        number_of_runs: row.get::<_, i64>(0)? as u64,
                        stats: RunStats {
                            items_scraped: row.get::<_, i64>(1)? as u64,
                            retries: row.get::<_, i64>(2)? as u64,
                            enqueued_memory: row.get::<_, i64>(3)? as u64,
                            enqueued_disk: row.get::<_, i64>(4)? as u64,
                            dequeued_memory: row.get::<_, i64>(5)? as u64,
                            dequeued_disk: row.get::<_, i64>(6)? as u64,
                        },
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn jobs_below_item_threshold(&self, date: NaiveDate) -> StorageResult<Vec<ThresholdViolation>> {
        // The date sits in the join condition so jobs without a stats row
        // still show up, with zero items
        let mut stmt = self.conn.prepare(
            "SELECT j.namespace, j.name,
                    COALESCE(sd.items_scraped_count, 0) AS items_scraped_count,
                    j.items_daily_threshold
             FROM jobs j
             LEFT OUTER JOIN job_stats_daily sd
                ON j.id = sd.job_id AND sd.stats_date = ?1
             WHERE j.enabled = 1
               AND COALESCE(sd.items_scraped_count, 0) < j.items_daily_threshold
             ORDER BY j.namespace, j.name",
        )?;

        let rows = stmt.query_map(params![to_db_date(date)], |row| {
            Ok(ThresholdViolation {
                namespace: row.get(0)?,
                job: row.get(1)?,
                items_scraped: row.get::<_, i64>(2)? as u64,
                threshold: row.get(3)?,
            })
        })?;

        let mut violations = Vec::new();
        for row in rows {
            violations.push(row?);
        }
        Ok(violations)
    }
}

/// Raw backlog row before JSON decoding
struct RequestRow {
    request_id: String,
    priority: i32,
    url: String,
    method: String,
    callback: Option<String>,
    errback: Option<String>,
    headers: Option<String>,
    body: Option<Vec<u8>>,
    cookies: Option<String>,
    meta: Option<String>,
    dont_filter: bool,
    created_at: String,
}

impl RequestRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            request_id: row.get(0)?,
            priority: row.get(1)?,
            url: row.get(2)?,
            method: row.get(3)?,
            callback: row.get(4)?,
            errback: row.get(5)?,
            headers: row.get(6)?,
            body: row.get(7)?,
            cookies: row.get(8)?,
            meta: row.get(9)?,
            dont_filter: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    fn into_request(self) -> StorageResult<FetchRequest> {
        let created_at = parse_db_time(&self.created_at).map_err(|e| {
            StorageError::Serialization(format!(
                "invalid created_at '{}' on request {}: {}",
                self.created_at, self.request_id, e
            ))
        })?;

        Ok(FetchRequest {
            id: Some(self.request_id),
            url: self.url,
            method: self.method,
            priority: self.priority,
            callback: self.callback.map(CallbackRef::new),
            errback: self.errback.map(CallbackRef::new),
            headers: decode_or_default(self.headers)?,
            body: self.body.unwrap_or_default(),
            cookies: decode_or_default(self.cookies)?,
            meta: decode_or_default(self.meta)?,
            dont_filter: self.dont_filter,
            created_at: Some(created_at),
        })
    }
}

fn decode_or_default<T: serde::de::DeserializeOwned + Default>(
    doc: Option<String>,
) -> StorageResult<T> {
    match doc {
        Some(doc) if !doc.is_empty() => Ok(serde_json::from_str(&doc)?),
        _ => Ok(T::default()),
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let blocked_until: Option<String> = row.get(7)?;
    let blocked_until = blocked_until
        .map(|s| parse_db_time(&s))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;

    Ok(JobRecord {
        id: row.get(0)?,
        namespace: row.get(1)?,
        name: row.get(2)?,
        recurrence_minutes: row.get(3)?,
        enabled: row.get(4)?,
        use_tor: row.get(5)?,
        items_daily_threshold: row.get(6)?,
        blocked_until,
    })
}

/// Fixed-width UTC form: string order equals chronological order
fn to_db_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_db_time(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}

fn to_db_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Opens a database file and makes sure the schema exists
pub fn init_database(path: &Path) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
    ",
    )?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    initialize_schema(&conn)?;

    Ok(conn)
}

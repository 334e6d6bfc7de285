// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Durable job queue backed by SQLite.
//
// Every captured job is appended to a single `queue` table with a sent flag.
// Each call opens its own short-lived connection, so the event callback and
// the delivery loop can interleave freely; SQLite's own locking serialises
// writers.  Nothing is held open between calls.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, params};
use tracing::{debug, info, instrument};

use printaudit_core::error::{AgentError, Result};
use printaudit_core::store::JobStore;
use printaudit_core::types::{JobStatus, PrintJobRecord, QueueId, QueuedJobRecord};

/// SQLite schema for the queue table.
const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        pc_name TEXT NOT NULL,
        pc_ip TEXT NOT NULL,
        username_windows TEXT NOT NULL,
        printer_name TEXT NOT NULL,
        printer_connection TEXT,
        job_id TEXT,
        document_name TEXT NOT NULL,
        pages_printed INTEGER NOT NULL,
        copies INTEGER NOT NULL,
        duplex INTEGER,
        color INTEGER,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        sent INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_queue_pending ON queue(sent, id);
"#;

const SELECT_COLUMNS: &str = "id, timestamp, pc_name, pc_ip, username_windows, printer_name,
     printer_connection, job_id, document_name, pages_printed, copies, duplex, color,
     status, created_at, sent";

/// How long a call waits for another writer before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Convert a `rusqlite::Error` into an `AgentError::Database`.
fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> AgentError + '_ {
    move |e| AgentError::Database(format!("{context}: {e}"))
}

/// File-backed job queue.
///
/// Cheap to clone; holds only the database path.
#[derive(Debug, Clone)]
pub struct SqliteJobQueue {
    path: PathBuf,
}

impl SqliteJobQueue {
    /// Open (or create) the queue database at the given path.
    ///
    /// Enables WAL journal mode, which lets the delivery loop read while the
    /// capture path writes and survives unclean shutdowns.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let queue = Self {
            path: path.as_ref().to_path_buf(),
        };
        let conn = queue.connect()?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err("WAL pragma"))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(db_err("create table"))?;

        info!("job queue database opened");
        Ok(queue)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path).map_err(db_err("open"))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(db_err("busy timeout"))?;
        Ok(conn)
    }

    fn insert(&self, job: &PrintJobRecord, created_at: DateTime<Utc>) -> Result<QueueId> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO queue (timestamp, pc_name, pc_ip, username_windows, printer_name,
             printer_connection, job_id, document_name, pages_printed, copies, duplex, color,
             status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                job.timestamp.to_rfc3339(),
                job.host_name,
                job.host_address,
                job.os_username,
                job.printer_name,
                job.printer_connection,
                job.job_id,
                job.document_name,
                job.pages_printed,
                job.copies,
                job.duplex,
                job.color,
                job.status.as_str(),
                created_at.timestamp_millis(),
            ],
        )
        .map_err(db_err("insert job"))?;

        let id = QueueId(conn.last_insert_rowid());
        debug!(queue_id = %id, printer = %job.printer_name, "job enqueued");
        Ok(id)
    }

    fn count_where(&self, sent: bool) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM queue WHERE sent = ?1",
                params![sent],
                |row| row.get(0),
            )
            .map_err(db_err("count"))?;
        Ok(count as u64)
    }
}

impl JobStore for SqliteJobQueue {
    #[instrument(skip(self, job), fields(printer = %job.printer_name))]
    fn enqueue(&self, job: &PrintJobRecord) -> Result<QueueId> {
        self.insert(job, Utc::now())
    }

    #[instrument(skip(self))]
    fn dequeue_pending(&self, limit: usize) -> Result<Vec<QueuedJobRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM queue WHERE sent = 0 ORDER BY id ASC LIMIT ?1"
            ))
            .map_err(db_err("prepare dequeue"))?;

        let jobs = stmt
            .query_map(params![limit as i64], row_to_queued_job)
            .map_err(db_err("query dequeue"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err("collect rows"))?;

        debug!(count = jobs.len(), "retrieved pending jobs");
        Ok(jobs)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    fn mark_sent(&self, ids: &[QueueId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connect()?;
        let tx = conn.transaction().map_err(db_err("begin"))?;
        let mut changed = 0;
        {
            let mut stmt = tx
                .prepare("UPDATE queue SET sent = 1 WHERE id = ?1 AND sent = 0")
                .map_err(db_err("prepare mark_sent"))?;
            for id in ids {
                changed += stmt.execute(params![id.0]).map_err(db_err("mark_sent"))?;
            }
        }
        tx.commit().map_err(db_err("commit"))?;

        debug!(changed, "jobs marked as sent");
        Ok(changed)
    }

    #[instrument(skip(self), fields(cutoff = %cutoff))]
    fn prune_sent_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.connect()?;
        let deleted = conn
            .execute(
                "DELETE FROM queue WHERE sent = 1 AND created_at < ?1",
                params![cutoff.timestamp_millis()],
            )
            .map_err(db_err("prune"))?;

        if deleted > 0 {
            info!(deleted, "pruned sent jobs");
        }
        Ok(deleted)
    }

    fn pending_count(&self) -> Result<u64> {
        self.count_where(false)
    }

    fn sent_count(&self) -> Result<u64> {
        self.count_where(true)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn conversion_err(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        msg.into(),
    )
}

/// Map a SQLite row to a `QueuedJobRecord`.
///
/// Column indices must match `SELECT_COLUMNS`.
fn row_to_queued_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueuedJobRecord> {
    let timestamp_str: String = row.get(1)?;
    let status_str: String = row.get(13)?;
    let created_ms: i64 = row.get(14)?;

    let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(1, e.to_string()))?;

    let status = JobStatus::parse(&status_str)
        .ok_or_else(|| conversion_err(13, format!("unknown status '{status_str}'")))?;

    let created_at = Utc
        .timestamp_millis_opt(created_ms)
        .single()
        .ok_or_else(|| conversion_err(14, format!("bad created_at {created_ms}")))?;

    Ok(QueuedJobRecord {
        id: QueueId(row.get(0)?),
        job: PrintJobRecord {
            timestamp,
            host_name: row.get(2)?,
            host_address: row.get(3)?,
            os_username: row.get(4)?,
            printer_name: row.get(5)?,
            printer_connection: row.get(6)?,
            job_id: row.get(7)?,
            document_name: row.get(8)?,
            pages_printed: row.get(9)?,
            copies: row.get(10)?,
            duplex: row.get(11)?,
            color: row.get(12)?,
            status,
        },
        sent: row.get(15)?,
        created_at,
    })
}

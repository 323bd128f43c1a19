//! Audit Store: append-only record of every delete/skip/error, backed by a
//! WAL-mode SQLite database with a single writer and many concurrent
//! readers (spec §4.6).
//!
//! The write connection is guarded by a mutex so only one write is ever
//! in flight; callers block on `append` until it commits. This is a
//! deliberate divergence from a fire-and-forget queue: the Executor must
//! prefer back-pressure (wait) over dropping rows, because audit
//! completeness matters more than cycle speed. Read methods each open their
//! own connection, so queries never block behind the writer during
//! steady-state operation (WAL readers don't block writers and vice versa).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, params};

use crate::core::errors::{Result, SsError};

/// Schema version this binary expects. A database created by a newer binary
/// refuses to open (spec §4.6).
pub const SCHEMA_VERSION: i64 = 1;

/// The action recorded for a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordAction {
    Delete,
    Skip,
    Error,
    DryRun,
}

impl RecordAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Skip => "SKIP",
            Self::Error => "ERROR",
            Self::DryRun => "DRY_RUN",
        }
    }

    fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "DELETE" => Some(Self::Delete),
            "SKIP" => Some(Self::Skip),
            "ERROR" => Some(Self::Error),
            "DRY_RUN" => Some(Self::DryRun),
            _ => None,
        }
    }
}

/// The durable trace of one Executor decision.
#[derive(Debug, Clone)]
pub struct DeletionRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub action: RecordAction,
    pub path: PathBuf,
    pub object_name: String,
    pub object_type: String,
    pub size: u64,
    pub primary_reason: String,
    pub secondary_reason: Option<String>,
    pub mode: String,
    pub error_message: Option<String>,
}

/// Aggregate counts/sums over a set of records, for the CLI `summary` view.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryStats {
    pub count: i64,
    pub total_size: i64,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

/// Single-writer, many-reader audit store.
pub struct AuditStore {
    db_path: PathBuf,
    writer: Mutex<Connection>,
}

impl AuditStore {
    /// Open (or create) the database at `path`, running schema setup.
    ///
    /// # Errors
    ///
    /// Returns [`SsError::InvalidConfig`] if the parent directory is missing
    /// or read-only, or [`SsError::AuditWriteError`] if the schema version
    /// stored in the database is newer than this binary supports.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|_| SsError::InvalidConfig {
                details: format!("audit database directory is not writable: {}", parent.display()),
            })?;
        }
        let conn = open_connection(path)?;
        check_schema_version(&conn)?;
        Ok(Self {
            db_path: path.to_path_buf(),
            writer: Mutex::new(conn),
        })
    }

    /// Path to the backing database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Append one record, blocking until it is durably committed.
    ///
    /// # Errors
    ///
    /// Returns [`SsError::AuditWriteError`] if the insert fails.
    pub fn append(&self, record: &DeletionRecord) -> Result<()> {
        let conn = self.writer.lock();
        insert(&conn, record)
    }

    fn read_conn(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(&self.db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(conn)
    }

    /// The N most recent records, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`SsError::AuditWriteError`] on query failure.
    pub fn recent(&self, limit: u32) -> Result<Vec<DeletionRecord>> {
        query_recent(&self.read_conn()?, limit)
    }

    /// Records matching a specific action, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`SsError::AuditWriteError`] on query failure.
    pub fn by_action(&self, action: RecordAction, limit: u32) -> Result<Vec<DeletionRecord>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, timestamp, action, path, object_name, object_type, size,
                    primary_reason, secondary_reason, mode, error_message
             FROM deletions WHERE action = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![action.as_str(), limit], row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Records matching a primary reason (`AGE`/`DISK`/`STACK`), newest first.
    ///
    /// # Errors
    ///
    /// Returns [`SsError::AuditWriteError`] on query failure.
    pub fn by_reason(&self, primary_reason: &str, limit: u32) -> Result<Vec<DeletionRecord>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, timestamp, action, path, object_name, object_type, size,
                    primary_reason, secondary_reason, mode, error_message
             FROM deletions WHERE primary_reason = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![primary_reason, limit], row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Records within an inclusive UTC date range, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`SsError::AuditWriteError`] on query failure.
    pub fn by_date_range(&self, from: DateTime<Utc>, to: DateTime<Utc>, limit: u32) -> Result<Vec<DeletionRecord>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, timestamp, action, path, object_name, object_type, size,
                    primary_reason, secondary_reason, mode, error_message
             FROM deletions WHERE timestamp BETWEEN ?1 AND ?2 ORDER BY id DESC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![from.to_rfc3339(), to.to_rfc3339(), limit], row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Remove rows older than `days`. Safe to run concurrently with reads.
    ///
    /// # Errors
    ///
    /// Returns [`SsError::AuditWriteError`] on failure.
    pub fn purge_older_than(&self, days: u32) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        let conn = self.writer.lock();
        let affected = conn.execute("DELETE FROM deletions WHERE timestamp < ?1", params![cutoff.to_rfc3339()])?;
        Ok(affected)
    }

    /// Compact the database file. Safe to run concurrently with reads.
    ///
    /// # Errors
    ///
    /// Returns [`SsError::AuditWriteError`] on failure.
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.writer.lock();
        conn.execute_batch("VACUUM;")?;
        Ok(())
    }

    /// Aggregate stats over the whole table.
    ///
    /// # Errors
    ///
    /// Returns [`SsError::AuditWriteError`] on query failure.
    pub fn summary(&self) -> Result<SummaryStats> {
        let conn = self.read_conn()?;
        conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size), 0), MIN(timestamp), MAX(timestamp) FROM deletions",
            [],
            |row| {
                let earliest: Option<String> = row.get(2)?;
                let latest: Option<String> = row.get(3)?;
                Ok(SummaryStats {
                    count: row.get(0)?,
                    total_size: row.get(1)?,
                    earliest: earliest.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
                    latest: latest.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
                })
            },
        )
        .map_err(SsError::from)
    }

    /// Whether the audit store is reachable (used by the health subsystem).
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.writer.lock().query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok()
    }
}

fn insert(conn: &Connection, record: &DeletionRecord) -> Result<()> {
    conn.prepare_cached(
        "INSERT INTO deletions (
            timestamp, action, path, object_name, object_type, size,
            primary_reason, secondary_reason, mode, error_message
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
    )?
    .execute(params![
        record.timestamp.to_rfc3339(),
        record.action.as_str(),
        record.path.to_string_lossy(),
        record.object_name,
        record.object_type,
        i64::try_from(record.size).unwrap_or(i64::MAX),
        record.primary_reason,
        record.secondary_reason,
        record.mode,
        record.error_message,
    ])?;
    Ok(())
}

fn query_recent(conn: &Connection, limit: u32) -> Result<Vec<DeletionRecord>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, timestamp, action, path, object_name, object_type, size,
                primary_reason, secondary_reason, mode, error_message
         FROM deletions ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit], row_to_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeletionRecord> {
    let ts: String = row.get(1)?;
    let action: String = row.get(2)?;
    let path: String = row.get(3)?;
    Ok(DeletionRecord {
        id: row.get(0)?,
        timestamp: DateTime::parse_from_rfc3339(&ts).map_or_else(|_| Utc::now(), |d| d.with_timezone(&Utc)),
        action: RecordAction::from_str(&action).unwrap_or(RecordAction::Error),
        path: PathBuf::from(path),
        object_name: row.get(4)?,
        object_type: row.get(5)?,
        size: u64::try_from(row.get::<_, i64>(6)?).unwrap_or(0),
        primary_reason: row.get(7)?,
        secondary_reason: row.get(8)?,
        mode: row.get(9)?,
        error_message: row.get(10)?,
    })
}

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    apply_pragmas(&conn)?;
    apply_schema(&conn)?;
    Ok(conn)
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[STORAGE-SAGE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);

        CREATE TABLE IF NOT EXISTS deletions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            action TEXT NOT NULL,
            path TEXT NOT NULL,
            object_name TEXT NOT NULL,
            object_type TEXT NOT NULL,
            size INTEGER NOT NULL DEFAULT 0,
            primary_reason TEXT NOT NULL,
            secondary_reason TEXT,
            mode TEXT NOT NULL,
            error_message TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_deletions_timestamp ON deletions(timestamp);
        CREATE INDEX IF NOT EXISTS idx_deletions_primary_reason ON deletions(primary_reason);
        CREATE INDEX IF NOT EXISTS idx_deletions_action ON deletions(action);
        CREATE INDEX IF NOT EXISTS idx_deletions_path ON deletions(path);",
    )?;

    let count: i64 = conn.query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))?;
    if count == 0 {
        conn.execute("INSERT INTO schema_version (version) VALUES (?1)", params![SCHEMA_VERSION])?;
    }
    Ok(())
}

fn check_schema_version(conn: &Connection) -> Result<()> {
    let version: i64 = conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(SsError::AuditWriteError {
            details: format!("database schema version {version} is newer than this binary supports ({SCHEMA_VERSION})"),
        });
    }
    Ok(())
}

//! SQLite-backed ledger handle.
//!
//! Handles connection, migrations, row decoding and timestamp helpers. Task
//! CRUD lives in `tasks`.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::broadcast::Broadcaster;
use crate::error::RdoResult;

use super::locks::RecordLocks;
use super::types::{DownloadTask, TaskStatus};

/// Columns selected for a full `DownloadTask`, in `task_from_row` order.
pub(crate) const TASK_COLUMNS: &str = "id, url, destination, status, bytes_total, bytes_done, \
     retry_count, attempt, last_error, fallback_requested, sha256, duplicate_of, next_attempt_at, \
     created_at, updated_at";

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

/// Durable store of one record per download task.
///
/// Cheap to clone; clones share the pool, the record locks and the event sink.
#[derive(Clone)]
pub struct Ledger {
    pub(crate) pool: Pool<Sqlite>,
    pub(crate) locks: Arc<RecordLocks>,
    pub(crate) events: Option<Broadcaster>,
    /// Serializes submissions so destination uniqueness holds across callers.
    pub(crate) submit_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Ledger {
    /// Open (or create) the ledger at `~/.local/state/rdo/ledger.db`.
    pub async fn open_default() -> anyhow::Result<Self> {
        let path = default_path()?;
        Ok(Self::open_at(&path).await?)
    }

    /// Open (or create) the ledger at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> RdoResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        // WAL lets progress readers run while a checkpoint write is in flight.
        let options = SqliteConnectOptions::from_str(&uri)?.journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        let ledger = Self::from_pool(pool);
        ledger.migrate().await?;
        Ok(ledger)
    }

    fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            locks: Arc::new(RecordLocks::default()),
            events: None,
            submit_lock: Arc::default(),
        }
    }

    /// Publish a `task` event after every committed status change.
    pub fn with_events(mut self, events: Broadcaster) -> Self {
        self.events = Some(events);
        self
    }

    async fn migrate(&self) -> RdoResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                destination TEXT NOT NULL,
                status TEXT NOT NULL,
                bytes_total INTEGER,
                bytes_done INTEGER NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0,
                attempt INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                fallback_requested INTEGER NOT NULL DEFAULT 0,
                sha256 TEXT,
                duplicate_of INTEGER,
                next_attempt_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Ledgers created before these columns existed.
        self.add_column_if_missing("attempt", "INTEGER NOT NULL DEFAULT 0").await?;
        self.add_column_if_missing("duplicate_of", "INTEGER").await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status, created_at, id);")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_sha256 ON tasks (sha256);")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn add_column_if_missing(&self, column: &str, decl: &str) -> RdoResult<()> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM pragma_table_info('tasks') WHERE name = ?1")
            .bind(column)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        if n == 0 {
            sqlx::query(&format!("ALTER TABLE tasks ADD COLUMN {column} {decl}"))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}

/// Default ledger location under the XDG state directory.
pub fn default_path() -> anyhow::Result<PathBuf> {
    Ok(crate::logging::state_dir()?.join("ledger.db"))
}

pub(crate) fn task_from_row(row: &SqliteRow) -> Result<DownloadTask, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let status = TaskStatus::parse(&status_str).ok_or_else(|| {
        sqlx::Error::Decode(format!("unknown task status {status_str:?}").into())
    })?;
    let destination: String = row.try_get("destination")?;
    let bytes_total: Option<i64> = row.try_get("bytes_total")?;
    let bytes_done: i64 = row.try_get("bytes_done")?;
    let retry_count: i64 = row.try_get("retry_count")?;
    let attempt: i64 = row.try_get("attempt")?;
    let fallback: i64 = row.try_get("fallback_requested")?;

    Ok(DownloadTask {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        destination: PathBuf::from(destination),
        status,
        bytes_total: bytes_total.map(|n| n.max(0) as u64),
        bytes_done: bytes_done.max(0) as u64,
        retry_count: retry_count.clamp(0, u32::MAX as i64) as u32,
        attempt: attempt.clamp(0, u32::MAX as i64) as u32,
        last_error: row.try_get("last_error")?,
        fallback_requested: fallback != 0,
        sha256: row.try_get("sha256")?,
        duplicate_of: row.try_get("duplicate_of")?,
        next_attempt_at: row.try_get("next_attempt_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Current time as Unix milliseconds (for ordering and backoff deadlines).
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
/// Open an in-memory ledger for tests (no disk I/O).
pub(crate) async fn open_memory() -> RdoResult<Ledger> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let ledger = Ledger::from_pool(pool);
    ledger.migrate().await?;
    Ok(ledger)
}

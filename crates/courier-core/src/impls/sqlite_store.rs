//! SQLite outbox store: durable across process restarts.
//!
//! One connection behind a mutex. rusqlite is synchronous (and `busy_timeout`
//! can wait up to 5s on a locked file), so every statement runs on the
//! blocking pool via `spawn_blocking` instead of on a runtime worker.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::domain::state::UnknownStatus;
use crate::domain::{
    CourierError, CourierResult, EventTypeId, OutboxCounts, OutboxId, OutboxRecord, OutboxStatus,
};
use crate::ports::OutboxStore;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS outbox_records (
    id                    TEXT PRIMARY KEY,
    event_type            TEXT NOT NULL,
    payload               TEXT NOT NULL,
    status                TEXT NOT NULL,
    retry_count           INTEGER NOT NULL DEFAULT 0,
    error_message         TEXT,
    created_at            TEXT NOT NULL,
    processed_at          TEXT,
    last_retry_at         TEXT,
    processing_started_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_outbox_status_created
    ON outbox_records (status, created_at);
";

const COLUMNS: &str = "id, event_type, payload, status, retry_count, error_message, \
                       created_at, processed_at, last_retry_at, processing_started_at";

pub struct SqliteOutboxStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteOutboxStore {
    /// Open a database at the given path, creating the schema if needed.
    pub fn open(path: &Path) -> CourierResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CourierError::Storage(format!("create {}: {e}", parent.display())))?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
        ",
        )?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %path.display(), "Opened outbox database");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database for testing.
    pub fn open_in_memory() -> CourierResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> CourierResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> CourierResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| CourierError::Storage("outbox connection mutex poisoned".to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| CourierError::Storage(format!("sqlite task failed: {e}")))?
    }
}

// Fixed-width timestamps keep lexical order equal to chronological order.
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn format_opt_ts(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(format_ts)
}

fn conversion_error(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_ts(idx: usize, s: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn parse_opt_ts(idx: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(idx, s)).transpose()
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<OutboxRecord> {
    let id: OutboxId = row
        .get::<_, String>(0)?
        .parse()
        .map_err(|e| conversion_error(0, e))?;
    let status: OutboxStatus = row
        .get::<_, String>(3)?
        .parse()
        .map_err(|e| conversion_error(3, e))?;

    Ok(OutboxRecord {
        id,
        event_type: EventTypeId::new(row.get::<_, String>(1)?),
        payload: row.get(2)?,
        status,
        retry_count: row.get(4)?,
        error_message: row.get(5)?,
        created_at: parse_ts(6, row.get(6)?)?,
        processed_at: parse_opt_ts(7, row.get(7)?)?,
        last_retry_at: parse_opt_ts(8, row.get(8)?)?,
        processing_started_at: parse_opt_ts(9, row.get(9)?)?,
    })
}

#[async_trait]
impl OutboxStore for SqliteOutboxStore {
    async fn insert(&self, record: OutboxRecord) -> CourierResult<()> {
        self.with_conn(move |conn| {
            conn.execute(
                &format!("INSERT INTO outbox_records ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
                params![
                    record.id.to_storage(),
                    record.event_type.as_str(),
                    record.payload,
                    record.status.as_str(),
                    record.retry_count,
                    record.error_message,
                    format_ts(record.created_at),
                    format_opt_ts(record.processed_at),
                    format_opt_ts(record.last_retry_at),
                    format_opt_ts(record.processing_started_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn update(&self, record: &OutboxRecord) -> CourierResult<()> {
        let record = record.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE outbox_records
                 SET status = ?1, retry_count = ?2, error_message = ?3, processed_at = ?4,
                     last_retry_at = ?5, processing_started_at = ?6
                 WHERE id = ?7",
                params![
                    record.status.as_str(),
                    record.retry_count,
                    record.error_message,
                    format_opt_ts(record.processed_at),
                    format_opt_ts(record.last_retry_at),
                    format_opt_ts(record.processing_started_at),
                    record.id.to_storage(),
                ],
            )?;
            if changed == 0 {
                return Err(CourierError::Storage(format!(
                    "outbox record {} not found",
                    record.id
                )));
            }
            Ok(())
        })
        .await
    }

    async fn get(&self, id: OutboxId) -> CourierResult<Option<OutboxRecord>> {
        self.with_conn(move |conn| {
            let record = conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM outbox_records WHERE id = ?1"),
                    params![id.to_storage()],
                    read_record,
                )
                .optional()?;
            Ok(record)
        })
        .await
    }

    async fn fetch_pending(
        &self,
        limit: usize,
        max_retries: u32,
    ) -> CourierResult<Vec<OutboxRecord>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {COLUMNS} FROM outbox_records
                 WHERE status = 'pending' AND retry_count < ?1
                 ORDER BY created_at ASC, rowid ASC
                 LIMIT ?2"
            ))?;
            let records = stmt
                .query_map(params![max_retries, limit as i64], read_record)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }

    async fn delete_completed(&self, limit: usize) -> CourierResult<usize> {
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM outbox_records WHERE id IN (
                     SELECT id FROM outbox_records
                     WHERE status = 'completed'
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT ?1
                 )",
                params![limit as i64],
            )?;
            Ok(deleted)
        })
        .await
    }

    async fn reclaim_stale(&self, started_before: DateTime<Utc>) -> CourierResult<usize> {
        self.with_conn(move |conn| {
            let reclaimed = conn.execute(
                "UPDATE outbox_records
                 SET status = 'pending', processing_started_at = NULL
                 WHERE status = 'processing'
                   AND (processing_started_at IS NULL OR processing_started_at < ?1)",
                params![format_ts(started_before)],
            )?;
            Ok(reclaimed)
        })
        .await
    }

    async fn counts(&self) -> CourierResult<OutboxCounts> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare_cached("SELECT status, COUNT(*) FROM outbox_records GROUP BY status")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut counts = OutboxCounts::default();
            for (status, n) in rows {
                let status: OutboxStatus = status
                    .parse()
                    .map_err(|e: UnknownStatus| CourierError::Storage(e.to_string()))?;
                counts.add(status, n as usize);
            }
            Ok(counts)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ulid::Ulid;

    fn record_at(created_at: DateTime<Utc>) -> OutboxRecord {
        OutboxRecord::pending(
            OutboxId::from_ulid(Ulid::new()),
            EventTypeId::new("test.event.v1"),
            r#"{"title":"hello"}"#.to_string(),
            created_at,
        )
    }

    #[tokio::test]
    async fn insert_then_get_preserves_fields() {
        let store = SqliteOutboxStore::open_in_memory().unwrap();
        let mut record = record_at(Utc::now());
        store.insert(record.clone()).await.unwrap();

        record.mark_processing(Utc::now());
        record.record_failure("boom", Utc::now(), 3);
        store.update(&record).await.unwrap();

        let loaded = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, OutboxStatus::Pending);
        assert_eq!(loaded.retry_count, 1);
        assert_eq!(loaded.error_message.as_deref(), Some("boom"));
        assert_eq!(loaded.payload, record.payload);
        assert_eq!(loaded.event_type, record.event_type);
        assert!(loaded.last_retry_at.is_some());
    }

    #[tokio::test]
    async fn fetch_pending_orders_by_created_at() {
        let store = SqliteOutboxStore::open_in_memory().unwrap();
        let base = Utc::now();
        let late = record_at(base + Duration::seconds(5));
        let early = record_at(base);
        store.insert(late.clone()).await.unwrap();
        store.insert(early.clone()).await.unwrap();

        let picked = store.fetch_pending(10, 3).await.unwrap();
        let ids: Vec<OutboxId> = picked.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);
    }

    #[tokio::test]
    async fn delete_completed_leaves_other_states() {
        let store = SqliteOutboxStore::open_in_memory().unwrap();
        let mut done = record_at(Utc::now());
        done.mark_completed(Utc::now());
        let mut failed = record_at(Utc::now());
        failed.record_failure("x", Utc::now(), 1);
        let pending = record_at(Utc::now());
        for r in [&done, &failed, &pending] {
            store.insert((*r).clone()).await.unwrap();
        }

        assert_eq!(store.delete_completed(100).await.unwrap(), 1);
        let counts = store.counts().await.unwrap();
        assert_eq!(counts.completed, 0);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.pending, 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn busy_connection_does_not_stall_the_runtime() {
        let store = SqliteOutboxStore::open_in_memory().unwrap();
        let conn = Arc::clone(&store.conn);
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _guard = conn.lock().unwrap();
            locked_tx.send(()).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(300));
        });
        locked_rx.recv().unwrap();

        let started = std::time::Instant::now();
        let (counts, timer_fired_after) = tokio::join!(store.counts(), async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            started.elapsed()
        });

        assert!(timer_fired_after < std::time::Duration::from_millis(200));
        assert_eq!(counts.unwrap().total(), 0);
        holder.join().unwrap();
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.db");
        let record = record_at(Utc::now());

        {
            let store = SqliteOutboxStore::open(&path).unwrap();
            store.insert(record.clone()).await.unwrap();
        }

        let reopened = SqliteOutboxStore::open(&path).unwrap();
        let pending = reopened.fetch_pending(10, 3).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, record.id);
    }
}

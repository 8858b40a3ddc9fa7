use crate::errors::{EngineError, EngineResult};
use crate::state::{AppState, DbCommand, WsMessage};
use portable_atomic::Ordering;
use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub type DbPool = Arc<Mutex<Connection>>;

/// Keys under this prefix are derived data and may be dropped to make room.
pub const CACHE_PREFIX: &str = "cache:";

pub const KEY_TRADES: &str = "trades";
pub const KEY_ACCOUNT: &str = "account";
pub const KEY_ORDERS: &str = "orders";

pub fn init_db(data_dir: &Path) -> EngineResult<DbPool> {
    std::fs::create_dir_all(data_dir).map_err(|e| EngineError::Database(format!("create dir: {e}")))?;
    let db_path = data_dir.join("ledtrade.db");
    let conn = Connection::open(&db_path)?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA cache_size=-16000;")?;
    apply_schema(&conn)?;

    tracing::info!("database initialized at {}", db_path.display());
    Ok(Arc::new(Mutex::new(conn)))
}

#[cfg(test)]
pub fn init_in_memory() -> EngineResult<DbPool> {
    let conn = Connection::open_in_memory()?;
    apply_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

fn apply_schema(conn: &Connection) -> EngineResult<()> {
    let schema = include_str!("../migrations/001_init.sql");
    conn.execute_batch(schema)?;
    Ok(())
}

/// Dedicated storage writer task. Reads commands from bounded channel, executes SQL.
/// This is the ONLY task that writes the store.
pub async fn run_db_writer(state: Arc<AppState>, mut rx: mpsc::Receiver<DbCommand>) {
    tracing::info!("storage writer task started");
    let quota = state.config.storage_quota_bytes;

    while let Some(cmd) = rx.recv().await {
        let entries = match cmd {
            DbCommand::Put { key, value } => vec![(key, value)],
            DbCommand::PutBatch { entries } => entries,
        };

        match put_batch_with_retry(&state.db, &entries, quota) {
            Ok(outcome) => {
                state.counters.storage_writes.fetch_add(1, Ordering::Relaxed);
                if let PutOutcome::AfterEviction { evicted } = outcome {
                    tracing::warn!(keys = %key_label(&entries), evicted, "storage quota hit, cache evicted before write");
                }
            }
            Err(e) => {
                // In-memory state stays as is; the next mutation writes again.
                let key = key_label(&entries);
                tracing::error!(keys = %key, error = %e, "storage write failed");
                state.counters.storage_errors.fetch_add(1, Ordering::Relaxed);
                state.broadcast(WsMessage::StorageError {
                    key,
                    error: e.to_string(),
                });
            }
        }
    }

    tracing::info!("storage writer task shutting down");
}

fn key_label(entries: &[(String, String)]) -> String {
    entries
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Written,
    AfterEviction { evicted: usize },
}

/// Write a value; on quota failure evict every cache key and retry once.
pub fn put_with_retry(db: &DbPool, key: &str, value: &str, quota: usize) -> EngineResult<PutOutcome> {
    put_batch_with_retry(db, &[(key.to_string(), value.to_string())], quota)
}

/// Write several keys atomically, with the same evict-and-retry-once policy.
pub fn put_batch_with_retry(
    db: &DbPool,
    entries: &[(String, String)],
    quota: usize,
) -> EngineResult<PutOutcome> {
    let mut conn = db.lock().map_err(|e| EngineError::Database(format!("lock poisoned: {e}")))?;

    match put_batch(&mut conn, entries, quota) {
        Ok(()) => Ok(PutOutcome::Written),
        Err(EngineError::QuotaExceeded { .. }) => {
            let evicted = evict_cache(&conn)?;
            put_batch(&mut conn, entries, quota)?;
            Ok(PutOutcome::AfterEviction { evicted })
        }
        Err(e) => Err(e),
    }
}

/// Quota counts every stored value except the ones being replaced.
fn put_batch(conn: &mut Connection, entries: &[(String, String)], quota: usize) -> EngineResult<()> {
    let tx = conn.transaction()?;

    let total: i64 = tx.query_row(
        "SELECT COALESCE(SUM(length(CAST(value AS BLOB))), 0) FROM kv_store",
        [],
        |row| row.get(0),
    )?;
    let mut replaced: i64 = 0;
    for (key, _) in entries {
        let existing: Option<i64> = tx
            .query_row(
                "SELECT length(CAST(value AS BLOB)) FROM kv_store WHERE key = ?1",
                rusqlite::params![key],
                |row| row.get(0),
            )
            .optional()?;
        replaced += existing.unwrap_or(0);
    }

    let incoming: usize = entries.iter().map(|(_, v)| v.len()).sum();
    let needed = (total - replaced).max(0) as usize + incoming;
    if needed > quota {
        // dropping `tx` rolls back
        return Err(EngineError::QuotaExceeded { needed, quota });
    }

    for (key, value) in entries {
        tx.execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![key, value],
        )?;
    }
    tx.commit()?;
    Ok(())
}

fn evict_cache(conn: &Connection) -> EngineResult<usize> {
    let n = conn.execute(
        "DELETE FROM kv_store WHERE key LIKE ?1",
        rusqlite::params![format!("{CACHE_PREFIX}%")],
    )?;
    Ok(n)
}

// ── Query helpers (startup restore and REST reads -- cold path) ──

/// Read and decode a stored value. `Ok(None)` when the key is absent.
pub fn load_json<T: DeserializeOwned>(db: &DbPool, key: &str) -> EngineResult<Option<T>> {
    let conn = db.lock().map_err(|e| EngineError::Database(format!("lock: {e}")))?;
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM kv_store WHERE key = ?1",
            rusqlite::params![key],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn keys_with_prefix(db: &DbPool, prefix: &str) -> EngineResult<Vec<String>> {
    let conn = db.lock().map_err(|e| EngineError::Database(format!("lock: {e}")))?;
    let mut stmt = conn.prepare("SELECT key FROM kv_store WHERE key LIKE ?1 ORDER BY key")?;
    let rows = stmt.query_map(rusqlite::params![format!("{prefix}%")], |row| row.get::<_, String>(0))?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn storage_usage(db: &DbPool) -> EngineResult<Vec<KeyUsage>> {
    let conn = db.lock().map_err(|e| EngineError::Database(format!("lock: {e}")))?;
    let mut stmt = conn.prepare(
        "SELECT key, length(CAST(value AS BLOB)), updated_at FROM kv_store ORDER BY key",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(KeyUsage {
            key: row.get(0)?,
            bytes: row.get(1)?,
            updated_at: row.get(2)?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

// ── Row types ──

#[derive(Debug, Clone, serde::Serialize)]
pub struct KeyUsage {
    pub key: String,
    pub bytes: i64,
    pub updated_at: String,
}

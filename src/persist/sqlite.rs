//! SQLite-backed local cache of editing-session snapshots.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    core::history::{AnnotationHistoryManager, SessionSnapshotV1},
    types::SessionId,
};

use super::{PersistError, PersistResult, SnapshotSink};

/// Version number written alongside every snapshot payload.
pub const SNAPSHOT_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u16,
    snapshot: SessionSnapshotV1,
}

/// Snapshot store keyed by session id.
///
/// Keeps unsynced markup on the device until the backend confirms it.
pub struct SqliteSessionStore {
    conn: Connection,
}

impl SqliteSessionStore {
    /// Opens or creates a store at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory store.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Binds this store to one session so the runtime can write to it.
    pub fn sink_for(self, session_id: impl Into<SessionId>) -> SqliteSessionSink {
        SqliteSessionSink {
            store: self,
            session_id: session_id.into(),
        }
    }

    /// Appends a snapshot for `session_id`; returns the write timestamp.
    pub fn write_snapshot(
        &mut self,
        session_id: &str,
        snapshot: &SessionSnapshotV1,
    ) -> PersistResult<u64> {
        let env = SnapshotEnvelope {
            format_version: SNAPSHOT_FORMAT_VERSION,
            snapshot: snapshot.clone(),
        };
        let payload = serde_json::to_vec(&env)?;
        let pending = snapshot.annotations.iter().filter(|a| a.is_pending).count();
        let ts_ms = now_ms();
        self.conn.execute(
            "INSERT INTO snapshots(session_id, ts_ms, annotation_count, pending_count, payload) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session_id,
                ts_ms as i64,
                snapshot.annotations.len() as i64,
                pending as i64,
                payload,
            ],
        )?;
        debug!(session_id, ts_ms, pending, "session snapshot written");
        Ok(ts_ms)
    }

    /// Most recent snapshot for `session_id`, if any.
    pub fn load_latest(&self, session_id: &str) -> PersistResult<Option<SessionSnapshotV1>> {
        let payload: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT payload FROM snapshots WHERE session_id = ?1 ORDER BY id DESC LIMIT 1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(payload) = payload else {
            return Ok(None);
        };
        decode_snapshot(&payload).map(Some)
    }

    /// Restores the cached session, or an empty manager when none is stored.
    pub fn load_session(&self, session_id: &str) -> PersistResult<AnnotationHistoryManager> {
        Ok(match self.load_latest(session_id)? {
            Some(snapshot) => AnnotationHistoryManager::from_snapshot(snapshot),
            None => AnnotationHistoryManager::new(),
        })
    }

    /// Deletes all but the newest `keep` snapshots of `session_id`.
    pub fn prune(&mut self, session_id: &str, keep: usize) -> PersistResult<usize> {
        let count = self.conn.execute(
            "DELETE FROM snapshots WHERE session_id = ?1 AND id NOT IN \
             (SELECT id FROM snapshots WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2)",
            params![session_id, keep as i64],
        )?;
        Ok(count)
    }

    /// Sessions with at least one stored snapshot, sorted.
    pub fn session_ids(&self) -> PersistResult<Vec<SessionId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT session_id FROM snapshots ORDER BY session_id ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

/// [`SqliteSessionStore`] bound to a single session.
pub struct SqliteSessionSink {
    store: SqliteSessionStore,
    session_id: SessionId,
}

impl SqliteSessionSink {
    /// Session this sink writes to.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Gives back the underlying store.
    pub fn into_store(self) -> SqliteSessionStore {
        self.store
    }
}

impl SnapshotSink for SqliteSessionSink {
    fn write_snapshot(&mut self, snapshot: &SessionSnapshotV1) -> PersistResult<u64> {
        self.store.write_snapshot(&self.session_id, snapshot)
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.store
            .conn
            .execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }
}

fn decode_snapshot(payload: &[u8]) -> PersistResult<SessionSnapshotV1> {
    let env: SnapshotEnvelope = serde_json::from_slice(payload)?;
    if env.format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(PersistError::UnsupportedFormat(env.format_version));
    }
    Ok(env.snapshot)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

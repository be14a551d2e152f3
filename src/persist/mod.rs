pub mod sqlite;

use crate::core::history::SessionSnapshotV1;

/// Failure while caching a session locally.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// SQLite call failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Snapshot could not be encoded or decoded.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Stored payload uses a format this build cannot read.
    #[error("unsupported snapshot format version {0}")]
    UnsupportedFormat(u16),
    /// Any other failure, e.g. a closed worker channel.
    #[error("{0}")]
    Message(String),
}

/// Convenience alias for persistence results.
pub type PersistResult<T> = Result<T, PersistError>;

/// Destination for session snapshots written by the runtime.
pub trait SnapshotSink: Send {
    /// Stores `snapshot`, returning the write timestamp in milliseconds.
    fn write_snapshot(&mut self, snapshot: &SessionSnapshotV1) -> PersistResult<u64>;
    /// Makes previous writes durable.
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
}

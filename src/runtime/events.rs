//! Change notifications emitted by a running session.

use crate::{core::history::HistoryState, types::AnnotationId};

/// Events emitted from the single-writer session loop.
///
/// Calls that turn out to be no-ops emit nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEvent {
    /// The collection was replaced and history reset.
    Initialized {
        /// Size of the new collection.
        count: usize,
    },
    /// One annotation was added.
    Added {
        /// Added annotation id.
        id: AnnotationId,
    },
    /// One annotation was replaced.
    Updated {
        /// Updated annotation id.
        id: AnnotationId,
    },
    /// One annotation was removed.
    Deleted {
        /// Removed annotation id.
        id: AnnotationId,
    },
    /// A batch was added.
    BatchAdded {
        /// Batch size.
        count: usize,
    },
    /// A batch was removed.
    BatchDeleted {
        /// Number of records removed.
        count: usize,
    },
    /// One undo step was applied.
    Undone {
        /// Description of the reverted action.
        description: String,
    },
    /// One redo step was applied.
    Redone {
        /// Description of the re-applied action.
        description: String,
    },
    /// Both stacks were emptied.
    HistoryCleared,
    /// A temporary id was swapped for its server id.
    Synced {
        /// Temporary id.
        old_id: AnnotationId,
        /// Server-assigned id.
        new_id: AnnotationId,
    },
    /// Undo/redo availability after the preceding change.
    StateChanged(HistoryState),
    /// A snapshot reached the sink.
    Saved {
        /// Write timestamp in milliseconds.
        ts_ms: u64,
    },
}

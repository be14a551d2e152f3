//! In-memory annotation collection and undo/redo engine.

/// Annotation history manager and session snapshots.
pub mod history;

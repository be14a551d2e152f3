use std::collections::VecDeque;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    action::HistoryAction,
    annotation::Annotation,
    config::HistoryConfig,
    types::AnnotationId,
};

/// Undo/redo availability, recomputed after every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HistoryState {
    /// True when the undo stack is non-empty.
    pub can_undo: bool,
    /// True when the redo stack is non-empty.
    pub can_redo: bool,
    /// Undo stack depth.
    pub undo_len: usize,
    /// Redo stack depth.
    pub redo_len: usize,
}

/// Serializable copy of a whole editing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshotV1 {
    /// Undo capacity in effect when the snapshot was taken.
    pub max_history_size: usize,
    /// Live collection, in order.
    pub annotations: Vec<Annotation>,
    /// Undo stack, oldest first.
    pub undo: Vec<HistoryAction>,
    /// Redo stack, oldest first.
    pub redo: Vec<HistoryAction>,
}

/// Owns the annotations of one drawing session and their linear edit history.
///
/// Every operation is caller-tolerant: missing ids, empty batches and empty
/// stacks degrade to no-ops or `None` rather than errors.
#[derive(Debug)]
pub struct AnnotationHistoryManager {
    annotations: Vec<Annotation>,
    undo: VecDeque<HistoryAction>,
    redo: Vec<HistoryAction>,
    can_undo: bool,
    can_redo: bool,
    max_history_size: usize,
}

impl Default for AnnotationHistoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AnnotationHistoryManager {
    /// Empty manager with the default undo capacity.
    pub fn new() -> Self {
        Self::with_config(HistoryConfig::default())
    }

    /// Empty manager using `config`.
    pub fn with_config(config: HistoryConfig) -> Self {
        Self {
            annotations: Vec::new(),
            undo: VecDeque::new(),
            redo: Vec::new(),
            can_undo: false,
            can_redo: false,
            max_history_size: config.max_history_size,
        }
    }

    /// Rebuilds a session from a snapshot, re-applying the capacity bound.
    pub fn from_snapshot(snapshot: SessionSnapshotV1) -> Self {
        let mut manager = Self {
            annotations: snapshot.annotations,
            undo: snapshot.undo.into(),
            redo: snapshot.redo,
            can_undo: false,
            can_redo: false,
            max_history_size: snapshot.max_history_size,
        };
        manager.enforce_bound();
        manager.refresh_flags();
        manager
    }

    /// Captures the collection and both stacks.
    pub fn export_snapshot(&self) -> SessionSnapshotV1 {
        SessionSnapshotV1 {
            max_history_size: self.max_history_size,
            annotations: self.annotations.clone(),
            undo: self.undo.iter().cloned().collect(),
            redo: self.redo.clone(),
        }
    }

    /// Replaces the collection wholesale and forgets all history.
    pub fn initialize(&mut self, annotations: Vec<Annotation>) {
        debug!(count = annotations.len(), "history session initialized");
        self.annotations = annotations;
        self.undo.clear();
        self.redo.clear();
        self.refresh_flags();
    }

    /// Appends `annotation` and records a `Create`.
    pub fn add_annotation(&mut self, annotation: Annotation) {
        debug!(id = %annotation.id, "annotation added");
        self.annotations.push(annotation.clone());
        self.record(HistoryAction::Create { annotation });
    }

    /// Replaces the record with `old`'s id by `new`.
    ///
    /// Returns false, recording nothing, when that id is no longer present.
    pub fn update_annotation(&mut self, old: Annotation, new: Annotation) -> bool {
        let Some(pos) = self.position(&old.id) else {
            trace!(id = %old.id, "update ignored, annotation missing");
            return false;
        };
        debug!(id = %old.id, "annotation updated");
        self.annotations[pos] = new.clone();
        self.record(HistoryAction::Update { old, new });
        true
    }

    /// Removes every record with `annotation`'s id.
    ///
    /// Returns false, recording nothing, when nothing was removed.
    pub fn delete_annotation(&mut self, annotation: Annotation) -> bool {
        let before = self.annotations.len();
        self.annotations.retain(|a| a.id != annotation.id);
        if self.annotations.len() == before {
            trace!(id = %annotation.id, "delete ignored, annotation missing");
            return false;
        }
        debug!(id = %annotation.id, "annotation deleted");
        self.record(HistoryAction::Delete { annotation });
        true
    }

    /// Appends all of `annotations` as one `BatchCreate`. Empty input is a no-op.
    pub fn add_annotations(&mut self, annotations: Vec<Annotation>) -> bool {
        if annotations.is_empty() {
            return false;
        }
        debug!(count = annotations.len(), "annotations added");
        self.annotations.extend(annotations.iter().cloned());
        self.record(HistoryAction::BatchCreate { annotations });
        true
    }

    /// Removes every record whose id appears in `annotations`, as one `BatchDelete`.
    ///
    /// Only the given items that were actually present are recorded, so undo
    /// never resurrects records that were not there. Returns false, recording
    /// nothing, for empty input or when no id matched.
    pub fn delete_annotations(&mut self, annotations: Vec<Annotation>) -> bool {
        if annotations.is_empty() {
            return false;
        }

        let present: HashSet<AnnotationId> = {
            let requested: HashSet<&str> = annotations.iter().map(|a| a.id.as_str()).collect();
            self.annotations
                .iter()
                .filter(|a| requested.contains(a.id.as_str()))
                .map(|a| a.id.clone())
                .collect()
        };
        if present.is_empty() {
            trace!(count = annotations.len(), "batch delete ignored, no ids matched");
            return false;
        }

        self.annotations.retain(|a| !present.contains(&a.id));

        let mut seen = HashSet::new();
        let removed: Vec<Annotation> = annotations
            .into_iter()
            .filter(|a| present.contains(&a.id) && seen.insert(a.id.clone()))
            .collect();

        debug!(count = removed.len(), "annotations deleted");
        self.record(HistoryAction::BatchDelete {
            annotations: removed,
        });
        true
    }

    /// Reverts the most recent action and moves it to the redo stack.
    ///
    /// Deleted records come back at the end of the collection; their original
    /// position is not restored.
    pub fn undo(&mut self) -> Option<HistoryAction> {
        let action = self.undo.pop_back()?;
        debug!(action = %action.description(), "undo");
        self.apply(&action.inverse());
        self.redo.push(action.clone());
        self.refresh_flags();
        Some(action)
    }

    /// Re-applies the most recently undone action and moves it back to the undo stack.
    pub fn redo(&mut self) -> Option<HistoryAction> {
        let action = self.redo.pop()?;
        debug!(action = %action.description(), "redo");
        self.apply(&action);
        self.undo.push_back(action.clone());
        self.enforce_bound();
        self.refresh_flags();
        Some(action)
    }

    /// Empties both stacks, leaving the collection untouched.
    pub fn clear_history(&mut self) {
        self.undo.clear();
        self.redo.clear();
        self.refresh_flags();
    }

    /// Live annotations not yet confirmed by the backend, in collection order.
    pub fn pending_annotations(&self) -> Vec<&Annotation> {
        self.annotations.iter().filter(|a| a.is_pending).collect()
    }

    /// Owned variant of [`Self::pending_annotations`].
    pub fn pending_annotations_cloned(&self) -> Vec<Annotation> {
        self.pending_annotations().into_iter().cloned().collect()
    }

    /// Swaps a temporary id for the server id and clears the pending flag.
    ///
    /// History is left as is: actions recorded before the swap still refer to
    /// `old_id`, so undoing them afterwards will not find the renamed record.
    /// Known limitation carried over from the mobile editor.
    pub fn mark_synced(&mut self, old_id: &str, new_id: impl Into<AnnotationId>) -> bool {
        let Some(pos) = self.position(old_id) else {
            trace!(id = old_id, "sync ignored, annotation missing");
            return false;
        };
        let synced = self.annotations[pos].synced_as(new_id);
        debug!(old_id, new_id = %synced.id, "annotation synced");
        self.annotations[pos] = synced;
        true
    }

    /// Looks up a record by id.
    pub fn get_annotation(&self, id: &str) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.id == id)
    }

    /// Owned variant of [`Self::get_annotation`].
    pub fn get_annotation_cloned(&self, id: &str) -> Option<Annotation> {
        self.get_annotation(id).cloned()
    }

    /// Live collection, in order.
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Number of live annotations.
    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    /// True when the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    /// True when [`Self::undo`] would return an action.
    pub fn can_undo(&self) -> bool {
        self.can_undo
    }

    /// True when [`Self::redo`] would return an action.
    pub fn can_redo(&self) -> bool {
        self.can_redo
    }

    /// Flags and stack depths in one value.
    pub fn state(&self) -> HistoryState {
        HistoryState {
            can_undo: self.can_undo,
            can_redo: self.can_redo,
            undo_len: self.undo.len(),
            redo_len: self.redo.len(),
        }
    }

    /// Action the next undo would revert.
    pub fn peek_undo(&self) -> Option<&HistoryAction> {
        self.undo.back()
    }

    /// Action the next redo would re-apply.
    pub fn peek_redo(&self) -> Option<&HistoryAction> {
        self.redo.last()
    }

    /// Undo stack depth.
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    /// Redo stack depth.
    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Undo capacity.
    pub fn max_history_size(&self) -> usize {
        self.max_history_size
    }

    fn record(&mut self, action: HistoryAction) {
        self.undo.push_back(action);
        self.redo.clear();
        self.enforce_bound();
        self.refresh_flags();
    }

    fn apply(&mut self, action: &HistoryAction) {
        match action {
            HistoryAction::Create { annotation } => {
                self.annotations.push(annotation.clone());
            }
            HistoryAction::Update { old, new } => {
                if let Some(pos) = self.position(&old.id) {
                    self.annotations[pos] = new.clone();
                }
            }
            HistoryAction::Delete { annotation } => {
                self.annotations.retain(|a| a.id != annotation.id);
            }
            HistoryAction::BatchCreate { annotations } => {
                self.annotations.extend(annotations.iter().cloned());
            }
            HistoryAction::BatchDelete { annotations } => {
                let ids: HashSet<&str> = annotations.iter().map(|a| a.id.as_str()).collect();
                self.annotations.retain(|a| !ids.contains(a.id.as_str()));
            }
        }
    }

    fn enforce_bound(&mut self) {
        while self.undo.len() > self.max_history_size {
            self.undo.pop_front();
        }
    }

    fn refresh_flags(&mut self) {
        self.can_undo = !self.undo.is_empty();
        self.can_redo = !self.redo.is_empty();
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.annotations.iter().position(|a| a.id == id)
    }
}

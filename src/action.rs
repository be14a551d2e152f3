//! Reversible history actions.

use serde::{Deserialize, Serialize};

use crate::annotation::Annotation;

/// One reversible edit, carrying full before/after snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HistoryAction {
    /// A single annotation was added.
    Create {
        /// Added record.
        annotation: Annotation,
    },
    /// An annotation was replaced in place.
    Update {
        /// Value before the edit.
        old: Annotation,
        /// Value after the edit.
        new: Annotation,
    },
    /// A single annotation was removed.
    Delete {
        /// Removed record.
        annotation: Annotation,
    },
    /// Several annotations were added as one unit.
    BatchCreate {
        /// Added records, in insertion order.
        annotations: Vec<Annotation>,
    },
    /// Several annotations were removed as one unit.
    BatchDelete {
        /// Removed records, in the order they were given.
        annotations: Vec<Annotation>,
    },
}

impl HistoryAction {
    /// Returns the action whose forward effect reverts `self`.
    pub fn inverse(&self) -> Self {
        match self {
            Self::Create { annotation } => Self::Delete {
                annotation: annotation.clone(),
            },
            Self::Update { old, new } => Self::Update {
                old: new.clone(),
                new: old.clone(),
            },
            Self::Delete { annotation } => Self::Create {
                annotation: annotation.clone(),
            },
            Self::BatchCreate { annotations } => Self::BatchDelete {
                annotations: annotations.clone(),
            },
            Self::BatchDelete { annotations } => Self::BatchCreate {
                annotations: annotations.clone(),
            },
        }
    }

    /// Human-readable label for undo/redo tooltips.
    pub fn description(&self) -> String {
        match self {
            Self::Create { annotation } => format!("Add {}", annotation.kind.label()),
            Self::Update { new, .. } => format!("Edit {}", new.kind.label()),
            Self::Delete { annotation } => format!("Delete {}", annotation.kind.label()),
            Self::BatchCreate { annotations } => {
                format!("Add {}", count_label(annotations.len()))
            }
            Self::BatchDelete { annotations } => {
                format!("Delete {}", count_label(annotations.len()))
            }
        }
    }
}

fn count_label(n: usize) -> String {
    if n == 1 {
        "1 annotation".to_string()
    } else {
        format!("{n} annotations")
    }
}

//! Annotation record and payload types.

use serde::{Deserialize, Serialize};

use crate::types::{AnnotationId, AnnotationKind};

/// Opaque geometric/visual payload (points, colour, stroke width, text...).
///
/// The history manager only clones and compares it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationPayload(pub serde_json::Value);

impl From<serde_json::Value> for AnnotationPayload {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// A drawing markup record placed on a document or image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Unique identifier; the sole lookup key.
    pub id: AnnotationId,
    /// Tool kind, used for descriptions only.
    pub kind: AnnotationKind,
    /// Geometry and style.
    pub payload: AnnotationPayload,
    /// True until the backend confirms persistence and assigns a server id.
    pub is_pending: bool,
}

impl Annotation {
    /// Builds a locally created annotation with a temporary id.
    pub fn local(
        id: impl Into<AnnotationId>,
        kind: AnnotationKind,
        payload: impl Into<AnnotationPayload>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            payload: payload.into(),
            is_pending: true,
        }
    }

    /// Builds an annotation already persisted by the backend.
    pub fn persisted(
        id: impl Into<AnnotationId>,
        kind: AnnotationKind,
        payload: impl Into<AnnotationPayload>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            payload: payload.into(),
            is_pending: false,
        }
    }

    /// Returns a copy carrying the server-assigned id, no longer pending.
    pub fn synced_as(&self, server_id: impl Into<AnnotationId>) -> Self {
        Self {
            id: server_id.into(),
            is_pending: false,
            ..self.clone()
        }
    }

    /// Returns a copy with `payload` replaced, keeping id and sync state.
    pub fn with_payload(&self, payload: impl Into<AnnotationPayload>) -> Self {
        Self {
            payload: payload.into(),
            ..self.clone()
        }
    }
}

//! Shared identifier aliases and annotation kinds.

use serde::{Deserialize, Serialize};

/// Annotation identifier.
///
/// Locally created annotations carry a client-assigned temporary id until the
/// backend confirms them and hands out a server id.
pub type AnnotationId = String;

/// Editing-session identifier used to key cached drafts.
pub type SessionId = String;

/// Markup tool that produced an annotation.
///
/// Only used for display; the history manager never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnnotationKind {
    /// Straight line segment.
    Line,
    /// Line with an arrowhead.
    Arrow,
    /// Rectangle outline.
    Rectangle,
    /// Circle or ellipse outline.
    Circle,
    /// Revision cloud around an area.
    Cloud,
    /// Freehand pen stroke.
    Freehand,
    /// Highlighter stroke.
    Highlight,
    /// Text note.
    Text,
    /// Distance or area measurement.
    Measurement,
    /// Placed stamp or symbol.
    Stamp,
}

impl AnnotationKind {
    /// Lowercase label used in history descriptions.
    pub fn label(self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Arrow => "arrow",
            Self::Rectangle => "rectangle",
            Self::Circle => "circle",
            Self::Cloud => "cloud",
            Self::Freehand => "drawing",
            Self::Highlight => "highlight",
            Self::Text => "text",
            Self::Measurement => "measurement",
            Self::Stamp => "stamp",
        }
    }
}

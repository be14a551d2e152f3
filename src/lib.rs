//! Undo/redo history for drawing markup, with an async single-writer session
//! and a SQLite draft cache for annotations not yet synced to the backend.
//!
//! # Examples
//!
//! In-memory usage with [`core::history::AnnotationHistoryManager`]:
//! ```
//! use markup_history::{
//!     annotation::Annotation,
//!     core::history::AnnotationHistoryManager,
//!     types::AnnotationKind,
//! };
//! use serde_json::json;
//!
//! let mut history = AnnotationHistoryManager::new();
//! history.initialize(vec![Annotation::persisted("1", AnnotationKind::Rectangle, json!({"x": 0}))]);
//! history.add_annotation(Annotation::local("local_1", AnnotationKind::Arrow, json!({"x": 4})));
//! assert!(history.can_undo());
//!
//! let undone = history.undo().expect("undo");
//! assert_eq!(undone.description(), "Add arrow");
//! assert_eq!(history.len(), 1);
//! assert!(history.can_redo());
//! ```
//!
//! Session usage with a SQLite draft cache:
//! ```no_run
//! use markup_history::{
//!     annotation::Annotation,
//!     config::SessionConfig,
//!     core::history::AnnotationHistoryManager,
//!     persist::sqlite::SqliteSessionStore,
//!     runtime::handle::spawn_session,
//!     types::AnnotationKind,
//! };
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = SqliteSessionStore::open("drafts.db").expect("open sqlite");
//! let manager = store.load_session("drawing-42").expect("load");
//! let sink = store.sink_for("drawing-42");
//! let handle = spawn_session(manager, Some(Box::new(sink)), SessionConfig::default());
//! handle
//!     .add_annotation(Annotation::local("local_1", AnnotationKind::Cloud, json!({})))
//!     .await
//!     .expect("add");
//! handle.mark_synced("local_1", "srv_77").await.expect("sync");
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// Reversible history actions.
pub mod action;
/// Annotation records and payloads.
pub mod annotation;
/// History and session configuration.
pub mod config;
/// Core in-memory history manager.
pub mod core;
/// Snapshot sink abstraction and SQLite draft cache.
pub mod persist;
/// Single-writer session handle and events.
pub mod runtime;
/// Shared identifier aliases and enums.
pub mod types;

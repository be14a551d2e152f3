use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use serde_json::json;

use markup_history::{
    annotation::Annotation,
    config::SessionConfig,
    core::history::{AnnotationHistoryManager, HistoryState, SessionSnapshotV1},
    persist::{PersistError, PersistResult, SnapshotSink},
    runtime::{
        events::HistoryEvent,
        handle::{RuntimeError, spawn_session},
    },
    types::AnnotationKind,
};

fn local(id: &str) -> Annotation {
    Annotation::local(id, AnnotationKind::Arrow, json!({ "from": [0, 0], "to": [5, 5] }))
}

struct RecordingSink {
    written: Arc<Mutex<Vec<SessionSnapshotV1>>>,
    delay: Duration,
}

impl SnapshotSink for RecordingSink {
    fn write_snapshot(&mut self, snapshot: &SessionSnapshotV1) -> PersistResult<u64> {
        std::thread::sleep(self.delay);
        let mut written = self.written.lock().expect("lock");
        written.push(snapshot.clone());
        Ok(written.len() as u64)
    }
}

/// Rejects the first `failures` writes, then records like [`RecordingSink`].
struct FlakySink {
    written: Arc<Mutex<Vec<SessionSnapshotV1>>>,
    failures: usize,
}

impl SnapshotSink for FlakySink {
    fn write_snapshot(&mut self, snapshot: &SessionSnapshotV1) -> PersistResult<u64> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(PersistError::Message("disk full".to_string()));
        }
        let mut written = self.written.lock().expect("lock");
        written.push(snapshot.clone());
        Ok(written.len() as u64)
    }
}

async fn next_non_saved(rx: &mut tokio::sync::broadcast::Receiver<HistoryEvent>) -> HistoryEvent {
    loop {
        let evt = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event")
            .expect("recv");
        if !matches!(evt, HistoryEvent::Saved { .. }) {
            return evt;
        }
    }
}

#[tokio::test]
async fn session_mutations_emit_ordered_events() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let handle = spawn_session(AnnotationHistoryManager::new(), None, SessionConfig::default());
    let mut sub = handle.subscribe();

    handle.add_annotation(local("local_1")).await.expect("add");
    let undone = handle.undo().await.expect("undo").expect("action");
    assert_eq!(undone.description(), "Add arrow");

    assert_eq!(
        next_non_saved(&mut sub).await,
        HistoryEvent::Added { id: "local_1".to_string() }
    );
    assert_eq!(
        next_non_saved(&mut sub).await,
        HistoryEvent::StateChanged(HistoryState {
            can_undo: true,
            can_redo: false,
            undo_len: 1,
            redo_len: 0,
        })
    );
    assert_eq!(
        next_non_saved(&mut sub).await,
        HistoryEvent::Undone { description: "Add arrow".to_string() }
    );
    assert_eq!(
        next_non_saved(&mut sub).await,
        HistoryEvent::StateChanged(HistoryState {
            can_undo: false,
            can_redo: true,
            undo_len: 0,
            redo_len: 1,
        })
    );

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn no_op_calls_return_false_and_stay_silent() {
    let handle = spawn_session(AnnotationHistoryManager::new(), None, SessionConfig::default());
    let mut sub = handle.subscribe();

    assert!(!handle.delete_annotation(local("missing")).await.expect("delete"));
    assert!(!handle.add_annotations(vec![]).await.expect("batch"));
    assert_eq!(handle.redo().await.expect("redo"), None);
    assert!(!handle.mark_synced("nope", "srv").await.expect("sync"));
    handle.clear_history().await.expect("clear");

    // The first event seen must come from the first real edit.
    handle.add_annotation(local("a")).await.expect("add");
    assert_eq!(
        next_non_saved(&mut sub).await,
        HistoryEvent::Added { id: "a".to_string() }
    );
    assert!(matches!(next_non_saved(&mut sub).await, HistoryEvent::StateChanged(_)));

    handle.clear_history().await.expect("clear");
    assert_eq!(next_non_saved(&mut sub).await, HistoryEvent::HistoryCleared);
    assert_eq!(
        next_non_saved(&mut sub).await,
        HistoryEvent::StateChanged(HistoryState::default())
    );

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn sync_flow_through_handle() {
    let handle = spawn_session(AnnotationHistoryManager::new(), None, SessionConfig::default());

    handle
        .initialize(vec![Annotation::persisted("srv_1", AnnotationKind::Text, json!({}))])
        .await
        .expect("init");
    handle.add_annotation(local("local_1")).await.expect("add");
    handle.add_annotation(local("local_2")).await.expect("add");
    assert!(handle.mark_synced("local_1", "srv_2").await.expect("sync"));

    let pending = handle.pending_annotations().await.expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "local_2");

    let synced = handle.get_annotation("srv_2").await.expect("get").expect("record");
    assert!(!synced.is_pending);
    assert!(handle.get_annotation("local_1").await.expect("get").is_none());

    let state = handle.state().await.expect("state");
    assert!(state.can_undo);
    assert_eq!(handle.annotations().await.expect("list").len(), 3);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn autosave_coalesces_and_flush_writes_latest() {
    let written = Arc::new(Mutex::new(Vec::new()));
    let sink = RecordingSink {
        written: Arc::clone(&written),
        delay: Duration::ZERO,
    };
    let cfg = SessionConfig {
        autosave_debounce_ms: 10_000,
        ..SessionConfig::default()
    };

    let handle = spawn_session(AnnotationHistoryManager::new(), Some(Box::new(sink)), cfg);
    for i in 0..5 {
        handle.add_annotation(local(&format!("local_{i}"))).await.expect("add");
    }
    handle.flush().await.expect("flush");

    {
        let written = written.lock().expect("lock");
        assert_eq!(written.len(), 1, "debounced writes should coalesce");
        assert_eq!(written[0].annotations.len(), 5);
        assert_eq!(written[0].undo.len(), 5);
    }

    handle.shutdown().await.expect("shutdown");
    assert_eq!(written.lock().expect("lock").len(), 1);
}

#[tokio::test]
async fn manual_save_mode_writes_on_shutdown() {
    let written = Arc::new(Mutex::new(Vec::new()));
    let sink = RecordingSink {
        written: Arc::clone(&written),
        delay: Duration::ZERO,
    };
    let cfg = SessionConfig {
        autosave: false,
        ..SessionConfig::default()
    };

    let handle = spawn_session(AnnotationHistoryManager::new(), Some(Box::new(sink)), cfg);
    handle.add_annotation(local("a")).await.expect("add");
    handle.add_annotation(local("b")).await.expect("add");
    assert!(written.lock().expect("lock").is_empty());

    handle.shutdown().await.expect("shutdown");
    let written = written.lock().expect("lock");
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].annotations.len(), 2);
}

#[tokio::test]
async fn slow_sink_surfaces_queue_pressure() {
    let written = Arc::new(Mutex::new(Vec::new()));
    let sink = RecordingSink {
        written: Arc::clone(&written),
        delay: Duration::from_millis(250),
    };
    let cfg = SessionConfig {
        autosave_debounce_ms: 0,
        persist_queue_bound: 1,
        ..SessionConfig::default()
    };

    let handle = spawn_session(AnnotationHistoryManager::new(), Some(Box::new(sink)), cfg);

    let mut rejected = None;
    for i in 0..32 {
        let id = format!("local_{i}");
        if let Err(RuntimeError::Persist(_)) = handle.add_annotation(local(&id)).await {
            rejected = Some((id, i + 1));
            break;
        }
    }
    let (rejected_id, total) = rejected.expect("expected persistence queue pressure to surface as error");

    // The edit behind the error was applied and is still saved on shutdown.
    assert!(handle.get_annotation(&rejected_id).await.expect("get").is_some());
    assert!(handle.state().await.expect("state").can_undo);

    handle.shutdown().await.expect("shutdown");
    let written = written.lock().expect("lock");
    let last = written.last().expect("at least one snapshot");
    assert_eq!(last.annotations.len(), total);
    assert!(last.annotations.iter().any(|a| a.id == rejected_id));
}

#[tokio::test]
async fn failed_autosave_is_retried_by_flush() {
    let written = Arc::new(Mutex::new(Vec::new()));
    let sink = FlakySink {
        written: Arc::clone(&written),
        failures: 1,
    };
    let cfg = SessionConfig {
        autosave_debounce_ms: 10,
        ..SessionConfig::default()
    };

    let handle = spawn_session(AnnotationHistoryManager::new(), Some(Box::new(sink)), cfg);
    handle.add_annotation(local("a")).await.expect("add");

    // Let the debounced write run and fail.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(written.lock().expect("lock").is_empty());

    handle.flush().await.expect("flush");
    {
        let written = written.lock().expect("lock");
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].annotations.len(), 1);
        assert_eq!(written[0].annotations[0].id, "a");
    }

    handle.shutdown().await.expect("shutdown");
    assert_eq!(written.lock().expect("lock").len(), 1);
}

#[tokio::test]
async fn failed_writes_surface_from_flush_and_shutdown() {
    let written = Arc::new(Mutex::new(Vec::new()));
    let sink = FlakySink {
        written: Arc::clone(&written),
        failures: usize::MAX,
    };
    let cfg = SessionConfig {
        autosave: false,
        ..SessionConfig::default()
    };

    let handle = spawn_session(AnnotationHistoryManager::new(), Some(Box::new(sink)), cfg);
    handle.add_annotation(local("a")).await.expect("add");

    assert!(matches!(handle.flush().await, Err(RuntimeError::Persist(_))));
    assert!(matches!(handle.shutdown().await, Err(RuntimeError::Persist(_))));
    assert!(written.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn calls_after_shutdown_report_closed_channel() {
    let handle = spawn_session(AnnotationHistoryManager::new(), None, SessionConfig::default());
    handle.shutdown().await.expect("shutdown");
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(matches!(
        handle.add_annotation(local("late")).await,
        Err(RuntimeError::ChannelClosed)
    ));
}

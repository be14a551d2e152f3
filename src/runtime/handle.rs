use std::sync::Arc;

use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot},
    time::{Duration, Instant},
};
use tracing::{debug, warn};

use crate::{
    action::HistoryAction,
    annotation::Annotation,
    config::SessionConfig,
    core::history::{AnnotationHistoryManager, HistoryState, SessionSnapshotV1},
    persist::{PersistError, SnapshotSink},
    types::AnnotationId,
};

use super::events::HistoryEvent;

/// Failure surfaced by [`SessionHandle`] calls.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The snapshot could not be queued or written.
    ///
    /// When returned from a mutating call the edit has still been applied;
    /// the unsaved state is written again by the next flush or shutdown.
    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),
    /// The session task has stopped.
    #[error("session channel closed")]
    ChannelClosed,
}

/// Cloneable handle to a session task that owns one [`AnnotationHistoryManager`].
///
/// Every call is serialized through the task, so a session can be shared
/// between UI callbacks and background sync without extra locking.
///
/// A mutating call that fails with [`RuntimeError::Persist`] has still changed
/// the session. Do not retry it; call [`SessionHandle::flush`] instead.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<HistoryEvent>,
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Initialize {
        annotations: Vec<Annotation>,
        resp: Reply<Result<(), RuntimeError>>,
    },
    Add {
        annotation: Annotation,
        resp: Reply<Result<(), RuntimeError>>,
    },
    Update {
        old: Annotation,
        new: Annotation,
        resp: Reply<Result<bool, RuntimeError>>,
    },
    Delete {
        annotation: Annotation,
        resp: Reply<Result<bool, RuntimeError>>,
    },
    AddBatch {
        annotations: Vec<Annotation>,
        resp: Reply<Result<bool, RuntimeError>>,
    },
    DeleteBatch {
        annotations: Vec<Annotation>,
        resp: Reply<Result<bool, RuntimeError>>,
    },
    Undo {
        resp: Reply<Result<Option<HistoryAction>, RuntimeError>>,
    },
    Redo {
        resp: Reply<Result<Option<HistoryAction>, RuntimeError>>,
    },
    ClearHistory {
        resp: Reply<Result<(), RuntimeError>>,
    },
    MarkSynced {
        old_id: AnnotationId,
        new_id: AnnotationId,
        resp: Reply<Result<bool, RuntimeError>>,
    },
    Get {
        id: AnnotationId,
        resp: Reply<Option<Annotation>>,
    },
    Annotations {
        resp: Reply<Vec<Annotation>>,
    },
    Pending {
        resp: Reply<Vec<Annotation>>,
    },
    State {
        resp: Reply<HistoryState>,
    },
    Flush {
        resp: Reply<Result<(), RuntimeError>>,
    },
    Shutdown {
        resp: Reply<Result<(), RuntimeError>>,
    },
}

enum PersistMsg {
    Snapshot(SessionSnapshotV1),
    Flush {
        snapshot: Option<SessionSnapshotV1>,
        resp: oneshot::Sender<Result<Option<u64>, PersistError>>,
    },
    Shutdown {
        snapshot: Option<SessionSnapshotV1>,
        resp: oneshot::Sender<Result<(), PersistError>>,
    },
}

/// Starts a session task owning `manager`.
///
/// With a sink and `config.autosave`, every mutation hands a snapshot to a
/// background writer that coalesces them over `autosave_debounce_ms`.
pub fn spawn_session(
    manager: AnnotationHistoryManager,
    sink: Option<Box<dyn SnapshotSink>>,
    config: SessionConfig,
) -> SessionHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(config.command_queue_bound.max(1));
    let (events_tx, _) = broadcast::channel::<HistoryEvent>(config.event_capacity.max(1));

    let (persist_tx, mut saved_rx) = if let Some(sink) = sink {
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound.max(1));
        let (saved_tx, saved_rx) = mpsc::unbounded_channel::<Result<u64, PersistError>>();
        spawn_persistence_worker(sink, persist_rx, saved_tx, config.clone());
        (Some(persist_tx), Some(saved_rx))
    } else {
        (None, None)
    };

    let mut session = Session {
        manager,
        events_tx: events_tx.clone(),
        persist_tx,
        config,
        dirty: false,
    };

    tokio::spawn(async move {
        loop {
            if let Some(rx) = saved_rx.as_mut() {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        let Some(cmd) = cmd else { break; };
                        if session.handle(cmd).await {
                            break;
                        }
                    }
                    saved = rx.recv() => {
                        if let Some(Ok(ts_ms)) = saved {
                            session.emit(HistoryEvent::Saved { ts_ms });
                        }
                    }
                }
            } else {
                let Some(cmd) = cmd_rx.recv().await else { break; };
                if session.handle(cmd).await {
                    break;
                }
            }
        }
        debug!("history session stopped");
    });

    SessionHandle { cmd_tx, events_tx }
}

impl SessionHandle {
    /// Subscribes to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.events_tx.subscribe()
    }

    /// See [`AnnotationHistoryManager::initialize`].
    pub async fn initialize(&self, annotations: Vec<Annotation>) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Initialize { annotations, resp }).await?
    }

    /// See [`AnnotationHistoryManager::add_annotation`].
    pub async fn add_annotation(&self, annotation: Annotation) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Add { annotation, resp }).await?
    }

    /// See [`AnnotationHistoryManager::update_annotation`].
    pub async fn update_annotation(
        &self,
        old: Annotation,
        new: Annotation,
    ) -> Result<bool, RuntimeError> {
        self.request(|resp| Command::Update { old, new, resp }).await?
    }

    /// See [`AnnotationHistoryManager::delete_annotation`].
    pub async fn delete_annotation(&self, annotation: Annotation) -> Result<bool, RuntimeError> {
        self.request(|resp| Command::Delete { annotation, resp }).await?
    }

    /// See [`AnnotationHistoryManager::add_annotations`].
    pub async fn add_annotations(&self, annotations: Vec<Annotation>) -> Result<bool, RuntimeError> {
        self.request(|resp| Command::AddBatch { annotations, resp }).await?
    }

    /// See [`AnnotationHistoryManager::delete_annotations`].
    pub async fn delete_annotations(
        &self,
        annotations: Vec<Annotation>,
    ) -> Result<bool, RuntimeError> {
        self.request(|resp| Command::DeleteBatch { annotations, resp }).await?
    }

    /// See [`AnnotationHistoryManager::undo`].
    pub async fn undo(&self) -> Result<Option<HistoryAction>, RuntimeError> {
        self.request(|resp| Command::Undo { resp }).await?
    }

    /// See [`AnnotationHistoryManager::redo`].
    pub async fn redo(&self) -> Result<Option<HistoryAction>, RuntimeError> {
        self.request(|resp| Command::Redo { resp }).await?
    }

    /// See [`AnnotationHistoryManager::clear_history`]. Emits nothing when
    /// both stacks were already empty.
    pub async fn clear_history(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::ClearHistory { resp }).await?
    }

    /// See [`AnnotationHistoryManager::mark_synced`].
    pub async fn mark_synced(
        &self,
        old_id: impl Into<AnnotationId>,
        new_id: impl Into<AnnotationId>,
    ) -> Result<bool, RuntimeError> {
        let old_id = old_id.into();
        let new_id = new_id.into();
        self.request(|resp| Command::MarkSynced {
            old_id,
            new_id,
            resp,
        })
        .await?
    }

    /// See [`AnnotationHistoryManager::get_annotation`].
    pub async fn get_annotation(
        &self,
        id: impl Into<AnnotationId>,
    ) -> Result<Option<Annotation>, RuntimeError> {
        let id = id.into();
        self.request(|resp| Command::Get { id, resp }).await
    }

    /// Current collection, in order.
    pub async fn annotations(&self) -> Result<Vec<Annotation>, RuntimeError> {
        self.request(|resp| Command::Annotations { resp }).await
    }

    /// See [`AnnotationHistoryManager::pending_annotations`].
    pub async fn pending_annotations(&self) -> Result<Vec<Annotation>, RuntimeError> {
        self.request(|resp| Command::Pending { resp }).await
    }

    /// See [`AnnotationHistoryManager::state`].
    pub async fn state(&self) -> Result<HistoryState, RuntimeError> {
        self.request(|resp| Command::State { resp }).await
    }

    /// Writes the current session to the sink, if any, and waits for it.
    pub async fn flush(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Flush { resp }).await?
    }

    /// Writes any unsaved state and stops the session task.
    ///
    /// The task stops even when the final write fails; the error is returned.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Shutdown { resp }).await?
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }
}

struct Session {
    manager: AnnotationHistoryManager,
    events_tx: broadcast::Sender<HistoryEvent>,
    persist_tx: Option<mpsc::Sender<PersistMsg>>,
    config: SessionConfig,
    dirty: bool,
}

impl Session {
    async fn handle(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Initialize { annotations, resp } => {
                let count = annotations.len();
                self.manager.initialize(annotations);
                self.emit(HistoryEvent::Initialized { count });
                let _ = resp.send(self.changed(true));
            }
            Command::Add { annotation, resp } => {
                let id = annotation.id.clone();
                self.manager.add_annotation(annotation);
                self.emit(HistoryEvent::Added { id });
                let _ = resp.send(self.changed(true));
            }
            Command::Update { old, new, resp } => {
                let id = old.id.clone();
                let out = if self.manager.update_annotation(old, new) {
                    self.emit(HistoryEvent::Updated { id });
                    self.changed(true).map(|_| true)
                } else {
                    Ok(false)
                };
                let _ = resp.send(out);
            }
            Command::Delete { annotation, resp } => {
                let id = annotation.id.clone();
                let out = if self.manager.delete_annotation(annotation) {
                    self.emit(HistoryEvent::Deleted { id });
                    self.changed(true).map(|_| true)
                } else {
                    Ok(false)
                };
                let _ = resp.send(out);
            }
            Command::AddBatch { annotations, resp } => {
                let count = annotations.len();
                let out = if self.manager.add_annotations(annotations) {
                    self.emit(HistoryEvent::BatchAdded { count });
                    self.changed(true).map(|_| true)
                } else {
                    Ok(false)
                };
                let _ = resp.send(out);
            }
            Command::DeleteBatch { annotations, resp } => {
                let before = self.manager.len();
                let out = if self.manager.delete_annotations(annotations) {
                    let count = before - self.manager.len();
                    self.emit(HistoryEvent::BatchDeleted { count });
                    self.changed(true).map(|_| true)
                } else {
                    Ok(false)
                };
                let _ = resp.send(out);
            }
            Command::Undo { resp } => {
                let out = match self.manager.undo() {
                    Some(action) => {
                        self.emit(HistoryEvent::Undone {
                            description: action.description(),
                        });
                        self.changed(true).map(|_| Some(action))
                    }
                    None => Ok(None),
                };
                let _ = resp.send(out);
            }
            Command::Redo { resp } => {
                let out = match self.manager.redo() {
                    Some(action) => {
                        self.emit(HistoryEvent::Redone {
                            description: action.description(),
                        });
                        self.changed(true).map(|_| Some(action))
                    }
                    None => Ok(None),
                };
                let _ = resp.send(out);
            }
            Command::ClearHistory { resp } => {
                let before = self.manager.state();
                self.manager.clear_history();
                let out = if before.undo_len + before.redo_len > 0 {
                    self.emit(HistoryEvent::HistoryCleared);
                    self.changed(true)
                } else {
                    Ok(())
                };
                let _ = resp.send(out);
            }
            Command::MarkSynced {
                old_id,
                new_id,
                resp,
            } => {
                let out = if self.manager.mark_synced(&old_id, new_id.clone()) {
                    self.emit(HistoryEvent::Synced { old_id, new_id });
                    self.changed(false).map(|_| true)
                } else {
                    Ok(false)
                };
                let _ = resp.send(out);
            }
            Command::Get { id, resp } => {
                let _ = resp.send(self.manager.get_annotation_cloned(&id));
            }
            Command::Annotations { resp } => {
                let _ = resp.send(self.manager.annotations().to_vec());
            }
            Command::Pending { resp } => {
                let _ = resp.send(self.manager.pending_annotations_cloned());
            }
            Command::State { resp } => {
                let _ = resp.send(self.manager.state());
            }
            Command::Flush { resp } => {
                let out = match self.persist_tx.clone() {
                    Some(tx) => {
                        let snapshot = self.take_dirty_snapshot();
                        let (flush_tx, flush_rx) = oneshot::channel();
                        if tx
                            .send(PersistMsg::Flush {
                                snapshot,
                                resp: flush_tx,
                            })
                            .await
                            .is_err()
                        {
                            Err(RuntimeError::ChannelClosed)
                        } else {
                            flush_rx
                                .await
                                .map_err(|_| RuntimeError::ChannelClosed)
                                .and_then(|r| r.map(|_| ()).map_err(RuntimeError::from))
                        }
                    }
                    None => Ok(()),
                };
                let _ = resp.send(out);
            }
            Command::Shutdown { resp } => {
                let out = match self.persist_tx.clone() {
                    Some(tx) => {
                        let snapshot = self.take_dirty_snapshot();
                        let (done_tx, done_rx) = oneshot::channel();
                        if tx
                            .send(PersistMsg::Shutdown {
                                snapshot,
                                resp: done_tx,
                            })
                            .await
                            .is_err()
                        {
                            Err(RuntimeError::ChannelClosed)
                        } else {
                            done_rx
                                .await
                                .map_err(|_| RuntimeError::ChannelClosed)
                                .and_then(|r| r.map_err(RuntimeError::from))
                        }
                    }
                    None => Ok(()),
                };
                let _ = resp.send(out);
                return true;
            }
        }

        false
    }

    fn emit(&self, event: HistoryEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Publishes the new flags and hands the session to the autosave worker.
    fn changed(&mut self, flags_may_change: bool) -> Result<(), RuntimeError> {
        if flags_may_change {
            self.emit(HistoryEvent::StateChanged(self.manager.state()));
        }
        self.dirty = true;

        let Some(tx) = self.persist_tx.as_ref() else {
            return Ok(());
        };
        if !self.config.autosave {
            return Ok(());
        }

        tx.try_send(PersistMsg::Snapshot(self.manager.export_snapshot()))
            .map_err(|err| {
                warn!(error = %err, "autosave queue rejected snapshot");
                RuntimeError::Persist(PersistError::Message(format!(
                    "persist queue error: {err}"
                )))
            })?;
        self.dirty = false;
        Ok(())
    }

    fn take_dirty_snapshot(&mut self) -> Option<SessionSnapshotV1> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(self.manager.export_snapshot())
    }
}

/// Minimum delay before an autosave that failed is attempted again.
const RETRY_BACKOFF_MS: u64 = 250;

fn spawn_persistence_worker(
    sink: Box<dyn SnapshotSink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    saved_tx: mpsc::UnboundedSender<Result<u64, PersistError>>,
    config: SessionConfig,
) {
    let sink = Arc::new(Mutex::new(sink));
    tokio::spawn(async move {
        let debounce = Duration::from_millis(config.autosave_debounce_ms);
        let mut pending: Option<SessionSnapshotV1> = None;
        let mut deadline = Instant::now() + debounce;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        let _ = write_pending(&sink, &mut pending, &saved_tx, true).await;
                        break;
                    };

                    match msg {
                        PersistMsg::Snapshot(snapshot) => {
                            if pending.is_none() {
                                deadline = Instant::now() + debounce;
                            }
                            pending = Some(snapshot);
                        }
                        PersistMsg::Flush { snapshot, resp } => {
                            if snapshot.is_some() {
                                pending = snapshot;
                            }
                            let result = write_pending(&sink, &mut pending, &saved_tx, true).await;
                            let _ = resp.send(result);
                        }
                        PersistMsg::Shutdown { snapshot, resp } => {
                            if snapshot.is_some() {
                                pending = snapshot;
                            }
                            let result = write_pending(&sink, &mut pending, &saved_tx, true).await;
                            let _ = resp.send(result.map(|_| ()));
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if pending.is_some() => {
                    if write_pending(&sink, &mut pending, &saved_tx, false).await.is_err() {
                        deadline = Instant::now() + debounce.max(Duration::from_millis(RETRY_BACKOFF_MS));
                    }
                }
            }
        }
    });
}

async fn write_pending(
    sink: &Arc<Mutex<Box<dyn SnapshotSink>>>,
    pending: &mut Option<SessionSnapshotV1>,
    saved_tx: &mpsc::UnboundedSender<Result<u64, PersistError>>,
    call_flush: bool,
) -> Result<Option<u64>, PersistError> {
    let Some(snapshot) = pending.take() else {
        if call_flush {
            let sink_ref = Arc::clone(sink);
            tokio::task::spawn_blocking(move || {
                let mut sink = sink_ref.blocking_lock();
                sink.flush()
            })
            .await
            .map_err(|e| PersistError::Message(format!("join error: {e}")))??;
        }
        return Ok(None);
    };

    // A failed write keeps the snapshot pending so the next attempt retries it.
    let attempt = snapshot.clone();
    let sink_ref = Arc::clone(sink);
    let write_res: Result<u64, PersistError> = tokio::task::spawn_blocking(move || {
        let mut sink = sink_ref.blocking_lock();
        let ts_ms = sink.write_snapshot(&attempt)?;
        if call_flush {
            sink.flush()?;
        }
        Ok(ts_ms)
    })
    .await
    .unwrap_or_else(|e| Err(PersistError::Message(format!("join error: {e}"))));

    match write_res {
        Ok(ts_ms) => {
            let _ = saved_tx.send(Ok(ts_ms));
            Ok(Some(ts_ms))
        }
        Err(err) => {
            warn!(error = %err, "session snapshot write failed");
            *pending = Some(snapshot);
            let _ = saved_tx.send(Err(PersistError::Message(format!("write failed: {err}"))));
            Err(err)
        }
    }
}

use crate::config::{EngineConfig, path_is_excluded};
use crate::index::manager::IndexManager;
use crate::paths::WorkspaceId;
use crate::state::CancelFlag;
use dashmap::DashMap;
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, DebouncedEvent, new_debouncer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ChangeKind {
    Upsert,
    Remove,
}

#[derive(Debug, Clone)]
struct ChangeEvent {
    relative_path: String,
    kind: ChangeKind,
}

struct WatcherHandle {
    _debouncer: notify_debouncer_full::Debouncer<
        notify::RecommendedWatcher,
        notify_debouncer_full::RecommendedCache,
    >,
    worker: tokio::task::JoinHandle<()>,
}

/// Per-workspace filesystem watcher driving incremental re-indexing.
///
/// Events are debounced by notify, collapsed per path (latest wins), then
/// applied through the index manager's writer path. When the event queue
/// overflows, the workspace is marked dirty and a bounded re-walk replaces
/// per-file updates. Commits happen when the queue drains or on the
/// autocommit interval, whichever comes first.
pub struct WatcherManager {
    config: EngineConfig,
    index_manager: Arc<IndexManager>,
    watchers: DashMap<String, WatcherHandle>,
}

impl WatcherManager {
    pub fn new(config: EngineConfig, index_manager: Arc<IndexManager>) -> Self {
        Self {
            config,
            index_manager,
            watchers: DashMap::new(),
        }
    }

    pub fn is_watching(&self, ws: &WorkspaceId) -> bool {
        self.watchers.contains_key(&ws.hash)
    }

    pub fn start_watching(&self, ws: &WorkspaceId) -> Result<(), notify::Error> {
        if self.watchers.contains_key(&ws.hash) {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel::<ChangeEvent>(self.config.watcher_queue_max);
        let dirty = Arc::new(AtomicBool::new(false));

        let root = ws.canonical.clone();
        let callback_dirty = dirty.clone();
        let mut debouncer = new_debouncer(
            Duration::from_millis(self.config.watcher_debounce_ms),
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for change in collapse_events(&events, &root) {
                        if tx.try_send(change).is_err() {
                            // Queue saturated: coalesce into a dirty re-walk.
                            callback_dirty.store(true, Ordering::Release);
                        }
                    }
                }
                Err(errors) => {
                    for e in errors {
                        warn!("file watcher error: {e:?}");
                    }
                }
            },
        )?;
        debouncer.watch(ws.canonical.as_path(), RecursiveMode::Recursive)?;

        let worker = tokio::spawn(drain_loop(
            ws.clone(),
            rx,
            dirty,
            self.index_manager.clone(),
            Duration::from_secs(self.config.autocommit_secs),
        ));

        self.watchers.insert(
            ws.hash.clone(),
            WatcherHandle {
                _debouncer: debouncer,
                worker,
            },
        );
        info!(
            workspace = %ws.hash,
            path = %ws.display_path(),
            debounce_ms = self.config.watcher_debounce_ms,
            "started watching workspace"
        );
        Ok(())
    }

    pub fn stop_watching(&self, ws: &WorkspaceId) {
        if let Some((_, handle)) = self.watchers.remove(&ws.hash) {
            handle.worker.abort();
            info!(workspace = %ws.hash, "stopped watching workspace");
        }
    }

    pub fn stop_all(&self) {
        let keys: Vec<String> = self.watchers.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, handle)) = self.watchers.remove(&key) {
                handle.worker.abort();
            }
        }
    }
}

/// Flatten a debounced batch into per-path changes, latest event winning.
/// Renames split into a remove of the old path and an upsert of the new.
fn collapse_events(events: &[DebouncedEvent], root: &Path) -> Vec<ChangeEvent> {
    let mut latest: HashMap<PathBuf, ChangeKind> = HashMap::new();
    for event in events {
        match event.kind {
            EventKind::Modify(notify::event::ModifyKind::Name(_)) if event.paths.len() == 2 => {
                latest.insert(event.paths[0].clone(), ChangeKind::Remove);
                latest.insert(event.paths[1].clone(), ChangeKind::Upsert);
            }
            EventKind::Create(_) | EventKind::Modify(_) => {
                for path in &event.paths {
                    latest.insert(path.clone(), ChangeKind::Upsert);
                }
            }
            EventKind::Remove(_) => {
                for path in &event.paths {
                    latest.insert(path.clone(), ChangeKind::Remove);
                }
            }
            _ => {}
        }
    }

    let mut out: Vec<ChangeEvent> = latest
        .into_iter()
        .filter(|(path, _)| !path_is_excluded(path))
        .map(|(path, kind)| ChangeEvent {
            relative_path: path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/"),
            kind,
        })
        .collect();
    out.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    out
}

/// Per-workspace worker: apply queued changes, commit on drain, and run the
/// autocommit/dirty sweep on a timer. Exits when the debouncer (the only
/// sender) is dropped.
async fn drain_loop(
    ws: WorkspaceId,
    mut rx: mpsc::Receiver<ChangeEvent>,
    dirty: Arc<AtomicBool>,
    index_manager: Arc<IndexManager>,
    autocommit: Duration,
) {
    let mut ticker = tokio::time::interval(autocommit);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut pending_since_commit = false;

    loop {
        tokio::select! {
            received = rx.recv() => {
                let Some(first) = received else { break };
                // Drain whatever else arrived in this debounce window and
                // collapse duplicates, latest kind winning.
                let mut batch: HashMap<String, ChangeKind> = HashMap::new();
                batch.insert(first.relative_path, first.kind);
                while let Ok(next) = rx.try_recv() {
                    batch.insert(next.relative_path, next.kind);
                }
                let mut ordered: Vec<(String, ChangeKind)> = batch.into_iter().collect();
                ordered.sort();

                for (rel, kind) in ordered {
                    let result = match kind {
                        ChangeKind::Upsert => index_manager.index_file(&ws, &rel).await,
                        ChangeKind::Remove => index_manager.remove_file(&ws, &rel).await,
                    };
                    match result {
                        Ok(()) => {
                            pending_since_commit = true;
                            debug!(workspace = %ws.hash, file = %rel, ?kind, "applied watcher change");
                        }
                        Err(e) => warn!(workspace = %ws.hash, file = %rel, error = %e, "watcher change failed"),
                    }
                }
                // Queue drained: make the writes visible.
                if pending_since_commit && rx.is_empty() {
                    if let Err(e) = index_manager.commit(&ws).await {
                        warn!(workspace = %ws.hash, error = %e, "watcher commit failed");
                    } else {
                        pending_since_commit = false;
                    }
                }
            }
            _ = ticker.tick() => {
                if dirty.swap(false, Ordering::AcqRel) {
                    info!(workspace = %ws.hash, "watcher queue overflowed, running bounded re-walk");
                    if let Err(e) = index_manager
                        .index_workspace(&ws, false, &CancelFlag::new())
                        .await
                    {
                        warn!(workspace = %ws.hash, error = %e, "dirty re-walk failed");
                    }
                    pending_since_commit = false;
                } else if pending_since_commit {
                    if let Err(e) = index_manager.commit(&ws).await {
                        warn!(workspace = %ws.hash, error = %e, "autocommit failed");
                    } else {
                        pending_since_commit = false;
                    }
                }
            }
        }
    }
    debug!(workspace = %ws.hash, "watcher worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upsert_event(paths: Vec<PathBuf>) -> DebouncedEvent {
        DebouncedEvent::new(
            notify::Event {
                kind: EventKind::Modify(notify::event::ModifyKind::Data(
                    notify::event::DataChange::Content,
                )),
                paths,
                attrs: Default::default(),
            },
            std::time::Instant::now(),
        )
    }

    fn remove_event(paths: Vec<PathBuf>) -> DebouncedEvent {
        DebouncedEvent::new(
            notify::Event {
                kind: EventKind::Remove(notify::event::RemoveKind::File),
                paths,
                attrs: Default::default(),
            },
            std::time::Instant::now(),
        )
    }

    #[test]
    fn duplicate_events_collapse_to_latest() {
        let root = PathBuf::from("/ws");
        let file = PathBuf::from("/ws/src/a.rs");
        let events = vec![
            upsert_event(vec![file.clone()]),
            upsert_event(vec![file.clone()]),
            remove_event(vec![file.clone()]),
        ];
        let collapsed = collapse_events(&events, &root);
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed[0].relative_path, "src/a.rs");
        assert_eq!(collapsed[0].kind, ChangeKind::Remove);
    }

    #[test]
    fn rename_splits_into_remove_and_upsert() {
        let root = PathBuf::from("/ws");
        let event = DebouncedEvent::new(
            notify::Event {
                kind: EventKind::Modify(notify::event::ModifyKind::Name(
                    notify::event::RenameMode::Both,
                )),
                paths: vec![PathBuf::from("/ws/old.rs"), PathBuf::from("/ws/new.rs")],
                attrs: Default::default(),
            },
            std::time::Instant::now(),
        );
        let collapsed = collapse_events(&[event], &root);
        assert_eq!(collapsed.len(), 2);
        let old = collapsed.iter().find(|c| c.relative_path == "old.rs").unwrap();
        let new = collapsed.iter().find(|c| c.relative_path == "new.rs").unwrap();
        assert_eq!(old.kind, ChangeKind::Remove);
        assert_eq!(new.kind, ChangeKind::Upsert);
    }

    #[test]
    fn excluded_paths_are_dropped() {
        let root = PathBuf::from("/ws");
        let events = vec![upsert_event(vec![PathBuf::from(
            "/ws/node_modules/pkg/x.js",
        )])];
        assert!(collapse_events(&events, &root).is_empty());
    }
}

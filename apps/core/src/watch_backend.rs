use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crossbeam_channel::{unbounded, Receiver, Sender};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::trace;

use crate::platform::clean_path;
use crate::watch_events::{FileOperation, RawEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    /// Only direct children (file bindings watch their parent this way).
    Flat,
    Recursive,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("already watching {0}")]
    AlreadyWatching(PathBuf),
    #[error("not watching {0}")]
    NotWatching(PathBuf),
    #[error("watcher is closed")]
    Closed,
    #[error("{0}")]
    Os(String),
}

/// OS-level subscription source used by the watch registry.
pub trait WatchBackend: Send {
    fn watch(&mut self, path: &Path, mode: WatchMode) -> Result<(), BackendError>;
    fn unwatch(&mut self, path: &Path) -> Result<(), BackendError>;
}

/// Receiving ends fed by a backend: change notifications and backend errors.
pub struct EventSource {
    pub events: Receiver<RawEvent>,
    pub errors: Receiver<String>,
}

impl EventSource {
    /// A source plus its sending halves, for backends and tests that push events.
    pub fn channel() -> (EventSender, EventSource) {
        let (events_tx, events) = unbounded();
        let (errors_tx, errors) = unbounded();
        (
            EventSender {
                events: events_tx,
                errors: errors_tx,
            },
            EventSource { events, errors },
        )
    }
}

#[derive(Clone)]
pub struct EventSender {
    pub events: Sender<RawEvent>,
    pub errors: Sender<String>,
}

pub struct NotifyBackend {
    watcher: RecommendedWatcher,
    watched: HashMap<PathBuf, WatchMode>,
}

impl NotifyBackend {
    pub fn new() -> Result<(Self, EventSource), BackendError> {
        let (sender, source) = EventSource::channel();
        let watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            match result {
                Ok(event) => {
                    let operation = FileOperation::from_notify(&event.kind);
                    for path in event.paths {
                        trace!(path = %path.display(), %operation, "fs event");
                        let _ = sender.events.send(RawEvent::new(clean_path(&path), operation));
                    }
                }
                Err(error) => {
                    let _ = sender.errors.send(error.to_string());
                }
            }
        })
        .map_err(|error| BackendError::Os(error.to_string()))?;

        Ok((
            Self {
                watcher,
                watched: HashMap::new(),
            },
            source,
        ))
    }
}

impl WatchBackend for NotifyBackend {
    fn watch(&mut self, path: &Path, mode: WatchMode) -> Result<(), BackendError> {
        let upgrading = match self.watched.get(path) {
            Some(WatchMode::Recursive) => return Err(BackendError::AlreadyWatching(path.to_path_buf())),
            Some(WatchMode::Flat) if mode == WatchMode::Flat => {
                return Err(BackendError::AlreadyWatching(path.to_path_buf()))
            }
            Some(WatchMode::Flat) => {
                let _ = self.watcher.unwatch(path);
                true
            }
            None => false,
        };

        if let Err(error) = self.watcher.watch(path, recursive_mode(mode)) {
            // The flat handle is gone. Keep the entry only if it can be restored.
            self.watched.remove(path);
            if upgrading && self.watcher.watch(path, RecursiveMode::NonRecursive).is_ok() {
                self.watched.insert(path.to_path_buf(), WatchMode::Flat);
            }
            return Err(BackendError::Os(error.to_string()));
        }
        self.watched.insert(path.to_path_buf(), mode);
        Ok(())
    }

    fn unwatch(&mut self, path: &Path) -> Result<(), BackendError> {
        if self.watched.remove(path).is_none() {
            return Err(BackendError::NotWatching(path.to_path_buf()));
        }
        self.watcher
            .unwatch(path)
            .map_err(|error| BackendError::Os(error.to_string()))
    }
}

fn recursive_mode(mode: WatchMode) -> RecursiveMode {
    match mode {
        WatchMode::Flat => RecursiveMode::NonRecursive,
        WatchMode::Recursive => RecursiveMode::Recursive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_watch_reports_already_watching() {
        let dir = tempfile::tempdir().unwrap();
        let (mut backend, _source) = NotifyBackend::new().unwrap();

        backend.watch(dir.path(), WatchMode::Flat).unwrap();
        assert!(matches!(
            backend.watch(dir.path(), WatchMode::Flat),
            Err(BackendError::AlreadyWatching(_))
        ));
        backend.watch(dir.path(), WatchMode::Recursive).unwrap();
        assert!(matches!(
            backend.watch(dir.path(), WatchMode::Flat),
            Err(BackendError::AlreadyWatching(_))
        ));
        backend.unwatch(dir.path()).unwrap();
        assert!(matches!(backend.unwatch(dir.path()), Err(BackendError::NotWatching(_))));
    }

    #[test]
    fn failed_upgrade_does_not_leave_a_stale_entry() {
        let root = tempfile::tempdir().unwrap();
        let project = root.path().join("proj");
        std::fs::create_dir(&project).unwrap();
        let (mut backend, _source) = NotifyBackend::new().unwrap();

        backend.watch(&project, WatchMode::Flat).unwrap();
        std::fs::remove_dir(&project).unwrap();
        assert!(matches!(
            backend.watch(&project, WatchMode::Recursive),
            Err(BackendError::Os(_))
        ));

        std::fs::create_dir(&project).unwrap();
        backend.watch(&project, WatchMode::Flat).unwrap();
        assert!(matches!(
            backend.watch(&project, WatchMode::Flat),
            Err(BackendError::AlreadyWatching(_))
        ));
    }
}

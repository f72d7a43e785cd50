use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use glob::Pattern;
use tracing::{debug, warn};

use crate::platform::{clean_path, looks_like_directory};
use crate::watch_backend::{BackendError, WatchBackend, WatchMode};

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("failed to watch {path}: {reason}")]
    WatchAddFailed { path: PathBuf, reason: String },
    #[error("watch backend unavailable: {0}")]
    Backend(String),
}

#[derive(Debug, Clone)]
struct PathSlot {
    tasks: Vec<String>,
    /// Directory actually subscribed for this key, fixed at first bind.
    watch_path: PathBuf,
    is_dir: bool,
}

#[derive(Debug, Default)]
struct Index {
    path_to_tasks: BTreeMap<PathBuf, PathSlot>,
    task_to_paths: HashMap<String, Vec<PathBuf>>,
}

impl Index {
    fn needs_watch_path(&self, watch_path: &Path) -> bool {
        self.path_to_tasks
            .values()
            .any(|slot| slot.watch_path == watch_path)
    }
}

/// Two-way `path <-> task` index over ref-counted backend subscriptions.
///
/// A watch path stays subscribed while at least one bound key maps to it.
/// Lock order is index first, backend second.
pub struct WatchRegistry {
    index: RwLock<Index>,
    backend: Mutex<Option<Box<dyn WatchBackend>>>,
    classify: fn(&Path) -> bool,
}

impl WatchRegistry {
    pub fn new(backend: Box<dyn WatchBackend>) -> Self {
        Self {
            index: RwLock::new(Index::default()),
            backend: Mutex::new(Some(backend)),
            classify: looks_like_directory,
        }
    }

    /// Replaces the file-vs-directory heuristic applied at bind time.
    pub fn with_classifier(mut self, classify: fn(&Path) -> bool) -> Self {
        self.classify = classify;
        self
    }

    pub fn bind(&self, task_id: &str, raw_path: &Path) -> Result<PathBuf, WatchError> {
        if task_id.trim().is_empty() {
            return Err(WatchError::InvalidArgument("task id is empty".into()));
        }
        if raw_path.as_os_str().is_empty() {
            return Err(WatchError::InvalidArgument("path is empty".into()));
        }

        let canonical = clean_path(raw_path);
        let mut index = self.write_index();

        let (watch_path, is_dir) = match index.path_to_tasks.get(&canonical) {
            Some(slot) => (slot.watch_path.clone(), slot.is_dir),
            None => {
                let is_dir = (self.classify)(&canonical);
                (watch_path_for(&canonical, is_dir), is_dir)
            }
        };
        let mode = if is_dir {
            WatchMode::Recursive
        } else {
            WatchMode::Flat
        };

        {
            let mut backend = self.lock_backend();
            let backend = backend.as_mut().ok_or_else(|| WatchError::WatchAddFailed {
                path: watch_path.clone(),
                reason: BackendError::Closed.to_string(),
            })?;
            match backend.watch(&watch_path, mode) {
                Ok(()) | Err(BackendError::AlreadyWatching(_)) => {}
                Err(error) => {
                    return Err(WatchError::WatchAddFailed {
                        path: watch_path,
                        reason: error.to_string(),
                    })
                }
            }
        }

        let slot = index
            .path_to_tasks
            .entry(canonical.clone())
            .or_insert_with(|| PathSlot {
                tasks: Vec::new(),
                watch_path: watch_path.clone(),
                is_dir,
            });
        if !slot.tasks.iter().any(|t| t == task_id) {
            slot.tasks.push(task_id.to_string());
        }
        let paths = index.task_to_paths.entry(task_id.to_string()).or_default();
        if !paths.contains(&canonical) {
            paths.push(canonical.clone());
        }

        debug!(task_id, path = %canonical.display(), watch_path = %watch_path.display(), "bound");
        Ok(canonical)
    }

    pub fn unbind(&self, task_id: &str, raw_path: &Path) -> Result<(), WatchError> {
        let canonical = clean_path(raw_path);
        let mut index = self.write_index();

        let emptied = match index.path_to_tasks.get_mut(&canonical) {
            Some(slot) => {
                slot.tasks.retain(|t| t != task_id);
                slot.tasks.is_empty()
            }
            None => false,
        };

        let mut released = None;
        if emptied {
            if let Some(slot) = index.path_to_tasks.remove(&canonical) {
                if !index.needs_watch_path(&slot.watch_path) {
                    released = Some(slot.watch_path);
                }
            }
        }

        if let Some(paths) = index.task_to_paths.get_mut(task_id) {
            paths.retain(|p| *p != canonical);
            if paths.is_empty() {
                index.task_to_paths.remove(task_id);
            }
        }

        if let Some(watch_path) = released {
            let mut backend = self.lock_backend();
            if let Some(backend) = backend.as_mut() {
                match backend.unwatch(&watch_path) {
                    Ok(()) | Err(BackendError::NotWatching(_)) => {}
                    Err(error) => {
                        warn!(path = %watch_path.display(), %error, "failed to release watch")
                    }
                }
            }
            debug!(path = %watch_path.display(), "watch released");
        }

        Ok(())
    }

    /// Unbinds every path captured for the task at call time.
    pub fn remove_task(&self, task_id: &str) -> Result<(), WatchError> {
        let snapshot = self.task_paths(task_id);
        let mut first_error = None;
        for path in snapshot {
            if let Err(error) = self.unbind(task_id, &path) {
                warn!(task_id, path = %path.display(), %error, "unbind failed");
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Tasks affected by a change at `event_path`, first occurrence kept.
    pub fn resolve(&self, event_path: &Path) -> Vec<String> {
        let index = self.read_index();
        let mut hits: Vec<String> = Vec::new();
        let mut add = |tasks: &[String]| {
            for task in tasks {
                if !hits.contains(task) {
                    hits.push(task.clone());
                }
            }
        };

        if let Some(slot) = index.path_to_tasks.get(event_path) {
            add(&slot.tasks);
        }

        for (key, slot) in &index.path_to_tasks {
            if slot.is_dir && key.as_path() != event_path && event_path.starts_with(key) {
                add(&slot.tasks);
            }
        }

        let event_parent = event_path.parent();
        if let Some(event_name) = event_path.file_name() {
            let event_name = event_name.to_string_lossy();
            for (key, slot) in &index.path_to_tasks {
                if slot.is_dir || key.parent() != event_parent {
                    continue;
                }
                let matched = key
                    .file_name()
                    .and_then(|name| Pattern::new(&name.to_string_lossy()).ok())
                    .map(|pattern| pattern.matches(&event_name))
                    .unwrap_or(false);
                if matched {
                    add(&slot.tasks);
                }
            }
        }

        hits
    }

    pub fn watched_paths(&self) -> BTreeMap<PathBuf, Vec<String>> {
        self.read_index()
            .path_to_tasks
            .iter()
            .map(|(path, slot)| (path.clone(), slot.tasks.clone()))
            .collect()
    }

    pub fn task_paths(&self, task_id: &str) -> Vec<PathBuf> {
        self.read_index()
            .task_to_paths
            .get(task_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn watched_paths_count(&self) -> usize {
        self.read_index().path_to_tasks.len()
    }

    pub fn watched_tasks_count(&self) -> usize {
        self.read_index().task_to_paths.len()
    }

    /// Drops the backend, releasing every OS subscription. Later binds fail.
    pub fn close(&self) {
        self.lock_backend().take();
    }

    pub fn is_closed(&self) -> bool {
        self.lock_backend().is_none()
    }

    fn read_index(&self) -> RwLockReadGuard<'_, Index> {
        self.index.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, Index> {
        self.index.write().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_backend(&self) -> MutexGuard<'_, Option<Box<dyn WatchBackend>>> {
        self.backend.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn watch_path_for(canonical: &Path, is_dir: bool) -> PathBuf {
    if is_dir {
        return canonical.to_path_buf();
    }
    match canonical.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::cancel::CancelToken;
use crate::config::WatcherConfig;
use crate::debounce::Debouncer;
use crate::ignore_policy::IgnorePolicy;
use crate::platform::clean_path;
use crate::task_reactor::TaskReactor;
use crate::task_store::TaskStore;
use crate::watch_backend::{EventSource, NotifyBackend, WatchBackend};
use crate::watch_events::{coalesce_batch, FileChangeEvent, FileOperation, RawEvent};
use crate::watch_registry::{WatchError, WatchRegistry};

/// Upper bound on how long the loop sleeps when nothing is pending.
const IDLE_WAIT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatcherStats {
    pub watched_paths_count: usize,
    pub watched_tasks_count: usize,
    pub config: WatcherConfig,
}

type Subscribers = Arc<Mutex<Vec<Sender<FileChangeEvent>>>>;

/// Binds task ids to paths and turns file changes into task updates.
///
/// Construction starts the single background loop. `stop` (or dropping the
/// watcher) cancels it and releases every OS subscription.
pub struct FileWatcher {
    registry: Arc<WatchRegistry>,
    config: WatcherConfig,
    cancel: CancelToken,
    stop_tx: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    subscribers: Subscribers,
}

impl FileWatcher {
    /// Watches through the platform's native notification API.
    pub fn new(store: Arc<dyn TaskStore>, config: WatcherConfig) -> Result<Self, WatchError> {
        let (backend, source) =
            NotifyBackend::new().map_err(|error| WatchError::Backend(error.to_string()))?;
        Self::with_backend(store, config, Box::new(backend), source)
    }

    pub fn with_backend(
        store: Arc<dyn TaskStore>,
        config: WatcherConfig,
        backend: Box<dyn WatchBackend>,
        source: EventSource,
    ) -> Result<Self, WatchError> {
        Self::with_registry(store, config, WatchRegistry::new(backend), source)
    }

    pub fn with_registry(
        store: Arc<dyn TaskStore>,
        config: WatcherConfig,
        registry: WatchRegistry,
        source: EventSource,
    ) -> Result<Self, WatchError> {
        let registry = Arc::new(registry);
        let cancel = CancelToken::new();
        let (stop_tx, stop_rx) = bounded(1);
        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));

        let event_loop = EventLoop {
            source,
            stop: stop_rx,
            cancel: cancel.clone(),
            policy: IgnorePolicy::from_config(&config),
            window: config.debounce(),
            registry: Arc::clone(&registry),
            reactor: TaskReactor::new(store, config.auto_update_status),
            subscribers: Arc::clone(&subscribers),
        };
        let worker = thread::Builder::new()
            .name("gorev-file-watcher".to_string())
            .spawn(move || event_loop.run())
            .map_err(|error| WatchError::Backend(format!("failed to start watcher loop: {error}")))?;

        Ok(Self {
            registry,
            config,
            cancel,
            stop_tx: Mutex::new(Some(stop_tx)),
            worker: Mutex::new(Some(worker)),
            subscribers,
        })
    }

    pub fn add_task_path(&self, task_id: &str, path: &Path) -> Result<PathBuf, WatchError> {
        let canonical = self.registry.bind(task_id, path)?;
        info!(task_id, path = %canonical.display(), "watching path for task");
        Ok(canonical)
    }

    pub fn remove_task_path(&self, task_id: &str, path: &Path) -> Result<(), WatchError> {
        self.registry.unbind(task_id, path)
    }

    pub fn remove_task(&self, task_id: &str) -> Result<(), WatchError> {
        self.registry.remove_task(task_id)
    }

    pub fn watched_paths(&self) -> std::collections::BTreeMap<PathBuf, Vec<String>> {
        self.registry.watched_paths()
    }

    pub fn task_paths(&self, task_id: &str) -> Vec<PathBuf> {
        self.registry.task_paths(task_id)
    }

    pub fn stats(&self) -> WatcherStats {
        WatcherStats {
            watched_paths_count: self.registry.watched_paths_count(),
            watched_tasks_count: self.registry.watched_tasks_count(),
            config: self.config.clone(),
        }
    }

    /// Receives every event dispatched after this call.
    pub fn subscribe(&self) -> Receiver<FileChangeEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        lock(&self.subscribers).push(tx);
        rx
    }

    pub fn is_running(&self) -> bool {
        lock(&self.worker)
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn stop(&self) {
        self.cancel.cancel();
        lock(&self.stop_tx).take();
        self.registry.close();

        if let Some(handle) = lock(&self.worker).take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("file watcher loop panicked");
            }
            info!("file watcher stopped");
        }
    }

    pub fn close(&self) {
        self.stop();
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

struct EventLoop {
    source: EventSource,
    stop: Receiver<()>,
    cancel: CancelToken,
    policy: IgnorePolicy,
    window: Duration,
    registry: Arc<WatchRegistry>,
    reactor: TaskReactor,
    subscribers: Subscribers,
}

impl EventLoop {
    fn run(self) {
        let mut debouncer = Debouncer::new(self.window);
        debug!(window_ms = self.window.as_millis() as u64, "file watcher loop started");

        loop {
            let timeout = debouncer
                .next_due_in(Instant::now())
                .unwrap_or(IDLE_WAIT)
                .min(IDLE_WAIT);
            let mut running = true;

            select! {
                recv(self.source.events) -> message => match message {
                    Ok(raw) => {
                        // Kinds queued together describe one burst of OS flags.
                        let batch = std::iter::once(raw).chain(self.source.events.try_iter());
                        for event in coalesce_batch(batch) {
                            self.accept(&mut debouncer, event);
                        }
                    }
                    Err(_) => running = false,
                },
                recv(self.source.errors) -> message => match message {
                    Ok(error) => warn!(%error, "watcher backend error"),
                    Err(_) => running = false,
                },
                recv(self.stop) -> _ => running = false,
                default(timeout) => {}
            }

            if !running || self.cancel.is_cancelled() {
                break;
            }

            for (path, operation) in debouncer.flush_ready(Instant::now()) {
                if self.cancel.is_cancelled() {
                    break;
                }
                self.dispatch(path, operation);
            }
        }

        if !debouncer.is_empty() {
            debug!(dropped = debouncer.pending_count(), "discarding pending changes on shutdown");
            debouncer.clear();
        }
        debug!("file watcher loop exited");
    }

    fn accept(&self, debouncer: &mut Debouncer, raw: RawEvent) {
        let path = clean_path(&raw.path);
        if self.policy.should_ignore(&path) {
            trace!(path = %path.display(), "ignored change");
            return;
        }
        if raw.operation.is_content_change() && self.policy.exceeds_size_limit(&path) {
            debug!(path = %path.display(), "ignored change to oversized file");
            return;
        }
        debouncer.register(path, raw.operation, Instant::now());
    }

    fn dispatch(&self, path: PathBuf, operation: FileOperation) {
        let task_ids = self.registry.resolve(&path);
        if task_ids.is_empty() {
            trace!(path = %path.display(), "change matched no task");
            return;
        }

        let event = FileChangeEvent {
            path,
            operation,
            timestamp: Utc::now(),
            task_ids,
        };
        info!(
            path = %event.path.display(),
            %operation,
            tasks = event.task_ids.len(),
            "file change dispatched"
        );

        self.reactor.apply(&event);
        lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

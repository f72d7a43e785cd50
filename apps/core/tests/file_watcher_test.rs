use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use gorev_core::config::WatcherConfig;
use gorev_core::file_watcher::FileWatcher;
use gorev_core::model::{NewTask, TaskStatus};
use gorev_core::task_reactor::INTERACTION_KIND;
use gorev_core::task_store::{Database, SqliteTaskStore, TaskStore};
use gorev_core::watch_backend::{BackendError, EventSender, EventSource, WatchBackend, WatchMode};
use gorev_core::watch_events::{FileOperation, RawEvent};

const DELIVERY: Duration = Duration::from_secs(3);
const QUIET: Duration = Duration::from_millis(400);

struct NullBackend;

impl WatchBackend for NullBackend {
    fn watch(&mut self, _path: &Path, _mode: WatchMode) -> Result<(), BackendError> {
        Ok(())
    }

    fn unwatch(&mut self, _path: &Path) -> Result<(), BackendError> {
        Ok(())
    }
}

struct Harness {
    store: Arc<SqliteTaskStore>,
    watcher: FileWatcher,
    sender: EventSender,
}

impl Harness {
    fn new(config: WatcherConfig) -> Self {
        let store = Arc::new(SqliteTaskStore::new(Arc::new(Database::open_memory().unwrap())));
        let (sender, source) = EventSource::channel();
        let task_store: Arc<dyn TaskStore> = store.clone();
        let watcher =
            FileWatcher::with_backend(task_store, config, Box::new(NullBackend), source).unwrap();
        Self {
            store,
            watcher,
            sender,
        }
    }

    fn push(&self, path: &str, operation: FileOperation) {
        self.sender
            .events
            .send(RawEvent::new(PathBuf::from(path), operation))
            .unwrap();
    }
}

fn config(debounce_ms: u64) -> WatcherConfig {
    WatcherConfig {
        debounce_ms,
        auto_update_status: true,
        ..WatcherConfig::default()
    }
}

#[test]
fn burst_of_writes_dispatches_once_and_starts_task() {
    let harness = Harness::new(config(50));
    harness.store.insert_task(&NewTask::new("t1", "Refactor parser")).unwrap();
    harness
        .watcher
        .add_task_path("t1", Path::new("/work/proj/main.go"))
        .unwrap();
    let events = harness.watcher.subscribe();

    for _ in 0..5 {
        harness.push("/work/proj/main.go", FileOperation::Write);
    }

    let event = events.recv_timeout(DELIVERY).unwrap();
    assert_eq!(event.path, PathBuf::from("/work/proj/main.go"));
    assert_eq!(event.operation, FileOperation::Write);
    assert_eq!(event.task_ids, ["t1"]);
    assert!(events.recv_timeout(QUIET).is_err());

    let task = harness.store.get_task("t1").unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert!(task.last_ai_interaction_at.is_some());

    let interactions = harness.store.list_interactions("t1").unwrap();
    assert_eq!(interactions.len(), 1);
    assert_eq!(interactions[0].kind, INTERACTION_KIND);
    let payload: serde_json::Value = serde_json::from_str(&interactions[0].payload).unwrap();
    assert_eq!(payload["auto_generated"], true);
    assert_eq!(payload["file_change"]["operation"], "write");
}

#[test]
fn directory_binding_sees_nested_files_but_not_ignored_ones() {
    let harness = Harness::new(config(30));
    harness.store.insert_task(&NewTask::new("t1", "Frontend")).unwrap();
    harness.watcher.add_task_path("t1", Path::new("/work/web")).unwrap();
    let events = harness.watcher.subscribe();

    harness.push("/work/web/node_modules/lib/index.js", FileOperation::Write);
    harness.push("/work/web/src/app/logo.png", FileOperation::Write);
    harness.push("/work/web/src/app/view.ts", FileOperation::Create);

    let event = events.recv_timeout(DELIVERY).unwrap();
    assert_eq!(event.path, PathBuf::from("/work/web/src/app/view.ts"));
    assert_eq!(event.operation, FileOperation::Create);
    assert!(events.recv_timeout(QUIET).is_err());
}

#[test]
fn removal_is_recorded_without_status_change() {
    let harness = Harness::new(config(30));
    harness.store.insert_task(&NewTask::new("t1", "Cleanup")).unwrap();
    harness
        .store
        .insert_task(&NewTask::new("t2", "Done already").with_status(TaskStatus::Completed))
        .unwrap();
    harness.watcher.add_task_path("t1", Path::new("/work/old.md")).unwrap();
    harness.watcher.add_task_path("t2", Path::new("/work/new.md")).unwrap();
    let events = harness.watcher.subscribe();

    harness.push("/work/old.md", FileOperation::Remove);
    harness.push("/work/new.md", FileOperation::Write);
    events.recv_timeout(DELIVERY).unwrap();
    events.recv_timeout(DELIVERY).unwrap();

    assert_eq!(harness.store.get_task("t1").unwrap().status, TaskStatus::Pending);
    assert_eq!(harness.store.get_task("t2").unwrap().status, TaskStatus::Completed);
    assert_eq!(harness.store.list_interactions("t1").unwrap().len(), 1);
    assert_eq!(harness.store.list_interactions("t2").unwrap().len(), 1);
}

#[test]
fn status_stays_put_when_auto_update_is_off() {
    let harness = Harness::new(WatcherConfig {
        auto_update_status: false,
        ..config(30)
    });
    harness.store.insert_task(&NewTask::new("t1", "Docs")).unwrap();
    harness.watcher.add_task_path("t1", Path::new("/work/guide.md")).unwrap();
    let events = harness.watcher.subscribe();

    harness.push("/work/guide.md", FileOperation::Write);
    events.recv_timeout(DELIVERY).unwrap();

    assert_eq!(harness.store.get_task("t1").unwrap().status, TaskStatus::Pending);
    assert_eq!(harness.store.list_interactions("t1").unwrap().len(), 1);
}

#[test]
fn missing_task_does_not_stop_other_tasks() {
    let harness = Harness::new(config(30));
    harness.store.insert_task(&NewTask::new("alive", "Still here")).unwrap();
    harness.watcher.add_task_path("ghost", Path::new("/work/shared.go")).unwrap();
    harness.watcher.add_task_path("alive", Path::new("/work/shared.go")).unwrap();
    let events = harness.watcher.subscribe();

    harness.push("/work/shared.go", FileOperation::Write);
    let event = events.recv_timeout(DELIVERY).unwrap();

    assert_eq!(event.task_ids, ["ghost", "alive"]);
    assert_eq!(harness.store.get_task("alive").unwrap().status, TaskStatus::InProgress);
}

#[test]
fn oversized_files_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let big = dir.path().join("big.json");
    let small = dir.path().join("small.json");
    fs::write(&big, vec![b'x'; 64]).unwrap();
    fs::write(&small, b"{}").unwrap();

    let harness = Harness::new(WatcherConfig {
        max_file_size: 16,
        ..config(30)
    });
    harness.store.insert_task(&NewTask::new("t1", "Data")).unwrap();
    harness.watcher.add_task_path("t1", dir.path()).unwrap();
    let events = harness.watcher.subscribe();

    harness.push(big.to_str().unwrap(), FileOperation::Write);
    harness.push(small.to_str().unwrap(), FileOperation::Write);

    let event = events.recv_timeout(DELIVERY).unwrap();
    assert_eq!(event.path, small);
    assert!(events.recv_timeout(QUIET).is_err());
}

#[test]
fn stop_discards_pending_changes() {
    let harness = Harness::new(config(2_000));
    harness.store.insert_task(&NewTask::new("t1", "Slow")).unwrap();
    harness.watcher.add_task_path("t1", Path::new("/work/slow.go")).unwrap();
    let events = harness.watcher.subscribe();
    assert!(harness.watcher.is_running());

    harness.push("/work/slow.go", FileOperation::Write);
    harness.watcher.stop();
    assert!(!harness.watcher.is_running());

    let Harness { store, watcher, .. } = harness;
    drop(watcher);
    assert!(events.recv().is_err());
    assert_eq!(store.get_task("t1").unwrap().status, TaskStatus::Pending);
    assert!(store.list_interactions("t1").unwrap().is_empty());
}

#[test]
fn stats_and_removal() {
    let harness = Harness::new(config(30));
    harness.watcher.add_task_path("t1", Path::new("/work/a.go")).unwrap();
    harness.watcher.add_task_path("t1", Path::new("/work/lib")).unwrap();
    harness.watcher.add_task_path("t2", Path::new("/work/a.go")).unwrap();

    let stats = harness.watcher.stats();
    assert_eq!(stats.watched_paths_count, 2);
    assert_eq!(stats.watched_tasks_count, 2);
    assert_eq!(stats.config.debounce_ms, 30);

    harness.watcher.remove_task_path("t2", Path::new("/work/a.go")).unwrap();
    harness.watcher.remove_task("t1").unwrap();
    assert!(harness.watcher.watched_paths().is_empty());
    assert!(harness.watcher.task_paths("t1").is_empty());
}

#[test]
#[ignore = "depends on OS file notifications"]
fn native_backend_reports_file_writes() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("notes.md");
    fs::write(&file, "draft").unwrap();

    let store = Arc::new(SqliteTaskStore::new(Arc::new(Database::open_memory().unwrap())));
    store.insert_task(&NewTask::new("t1", "Notes")).unwrap();
    let task_store: Arc<dyn TaskStore> = store.clone();
    let watcher = FileWatcher::new(task_store, config(100)).unwrap();
    watcher.add_task_path("t1", &file).unwrap();
    let events = watcher.subscribe();

    fs::write(&file, "final").unwrap();

    let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(event.task_ids, ["t1"]);
    assert_eq!(store.get_task("t1").unwrap().status, TaskStatus::InProgress);
}

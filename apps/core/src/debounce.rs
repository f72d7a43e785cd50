use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::watch_events::FileOperation;

#[derive(Debug, Clone, Copy)]
struct Pending {
    last_seen: Instant,
    operation: FileOperation,
}

/// Per-path coalescing of change notifications. Every new event for a path
/// restarts its window and replaces the pending operation, so a path fires
/// once with the last operation seen. Time is passed in by the caller.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, Pending>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    pub fn register(&mut self, path: PathBuf, operation: FileOperation, now: Instant) {
        self.pending.insert(
            path,
            Pending {
                last_seen: now,
                operation,
            },
        );
    }

    /// Removes and returns every path whose window has elapsed.
    pub fn flush_ready(&mut self, now: Instant) -> Vec<(PathBuf, FileOperation)> {
        let window = self.window;
        let mut ready = Vec::new();
        self.pending.retain(|path, pending| {
            if now.saturating_duration_since(pending.last_seen) >= window {
                ready.push((path.clone(), pending.operation));
                false
            } else {
                true
            }
        });
        ready
    }

    /// Time left until the earliest pending path is due, if any.
    pub fn next_due_in(&self, now: Instant) -> Option<Duration> {
        self.pending
            .values()
            .map(|pending| (pending.last_seen + self.window).saturating_duration_since(now))
            .min()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

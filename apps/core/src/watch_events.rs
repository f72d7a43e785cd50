use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOperation {
    Create,
    Write,
    Remove,
    Rename,
    Chmod,
    Unknown,
}

impl FileOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Write => "write",
            Self::Remove => "remove",
            Self::Rename => "rename",
            Self::Chmod => "chmod",
            Self::Unknown => "unknown",
        }
    }

    /// Higher wins when several operations are reported for one event.
    fn precedence(self) -> u8 {
        match self {
            Self::Create => 5,
            Self::Write => 4,
            Self::Remove => 3,
            Self::Rename => 2,
            Self::Chmod => 1,
            Self::Unknown => 0,
        }
    }

    pub fn strongest(ops: impl IntoIterator<Item = FileOperation>) -> FileOperation {
        ops.into_iter()
            .max_by_key(|op| op.precedence())
            .unwrap_or(FileOperation::Unknown)
    }

    /// Operations that count as work on a file for status transitions.
    pub fn is_content_change(self) -> bool {
        matches!(self, Self::Create | Self::Write)
    }

    pub fn from_notify(kind: &notify::EventKind) -> FileOperation {
        use notify::event::{EventKind, ModifyKind};

        match kind {
            EventKind::Create(_) => Self::Create,
            EventKind::Modify(ModifyKind::Name(_)) => Self::Rename,
            EventKind::Modify(ModifyKind::Metadata(_)) => Self::Chmod,
            EventKind::Modify(_) => Self::Write,
            EventKind::Remove(_) => Self::Remove,
            EventKind::Access(_) | EventKind::Any | EventKind::Other => Self::Unknown,
        }
    }
}

impl Display for FileOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One path-level notification as delivered by a watch backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub path: PathBuf,
    pub operation: FileOperation,
}

impl RawEvent {
    pub fn new(path: impl Into<PathBuf>, operation: FileOperation) -> Self {
        Self {
            path: path.into(),
            operation,
        }
    }
}

/// Merges notifications delivered in one batch so each path appears once,
/// in first-seen order, carrying the strongest operation reported for it.
pub fn coalesce_batch(events: impl IntoIterator<Item = RawEvent>) -> Vec<RawEvent> {
    let mut merged: Vec<RawEvent> = Vec::new();
    let mut slots: HashMap<PathBuf, usize> = HashMap::new();
    for event in events {
        match slots.get(&event.path) {
            Some(&slot) => {
                let seen = &mut merged[slot];
                seen.operation = FileOperation::strongest([seen.operation, event.operation]);
            }
            None => {
                slots.insert(event.path.clone(), merged.len());
                merged.push(event);
            }
        }
    }
    merged
}

/// A debounced change resolved to the tasks it affects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChangeEvent {
    pub path: PathBuf,
    pub operation: FileOperation,
    pub timestamp: DateTime<Utc>,
    pub task_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::{coalesce_batch, FileOperation, RawEvent};

    #[test]
    fn create_outranks_write() {
        assert_eq!(
            FileOperation::strongest([FileOperation::Write, FileOperation::Create]),
            FileOperation::Create
        );
        assert_eq!(
            FileOperation::strongest([FileOperation::Chmod, FileOperation::Rename]),
            FileOperation::Rename
        );
        assert_eq!(FileOperation::strongest(Vec::<FileOperation>::new()), FileOperation::Unknown);
    }

    #[test]
    fn notify_kinds_map_to_operations() {
        use notify::event::{CreateKind, DataChange, EventKind, MetadataKind, ModifyKind, RenameMode};

        assert_eq!(
            FileOperation::from_notify(&EventKind::Create(CreateKind::File)),
            FileOperation::Create
        );
        assert_eq!(
            FileOperation::from_notify(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            FileOperation::Write
        );
        assert_eq!(
            FileOperation::from_notify(&EventKind::Modify(ModifyKind::Name(RenameMode::Both))),
            FileOperation::Rename
        );
        assert_eq!(
            FileOperation::from_notify(&EventKind::Modify(ModifyKind::Metadata(
                MetadataKind::Permissions
            ))),
            FileOperation::Chmod
        );
    }

    #[test]
    fn batch_keeps_strongest_operation_per_path() {
        let merged = coalesce_batch([
            RawEvent::new("/w/a.go", FileOperation::Write),
            RawEvent::new("/w/b.go", FileOperation::Chmod),
            RawEvent::new("/w/a.go", FileOperation::Create),
            RawEvent::new("/w/b.go", FileOperation::Remove),
            RawEvent::new("/w/a.go", FileOperation::Chmod),
        ]);
        assert_eq!(
            merged,
            [
                RawEvent::new("/w/a.go", FileOperation::Create),
                RawEvent::new("/w/b.go", FileOperation::Remove),
            ]
        );
        assert!(coalesce_batch(Vec::new()).is_empty());
    }
}

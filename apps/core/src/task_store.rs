use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::config::Config;
use crate::model::{
    Interaction, NewTask, Priority, Tag, Task, TaskListFilter, TaskStatus, TaskUpdate,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS projeler (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS gorevler (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    priority TEXT NOT NULL,
    project_id TEXT REFERENCES projeler(id),
    parent_id TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    due_date INTEGER,
    last_ai_interaction_at INTEGER
);
CREATE TABLE IF NOT EXISTS etiketler (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS gorev_etiketleri (
    task_id TEXT NOT NULL,
    tag_id TEXT NOT NULL,
    PRIMARY KEY (task_id, tag_id)
);
CREATE VIRTUAL TABLE IF NOT EXISTS gorevler_fts USING fts5(
    id UNINDEXED, title, description, tags
);
CREATE TRIGGER IF NOT EXISTS gorevler_fts_insert AFTER INSERT ON gorevler BEGIN
    INSERT INTO gorevler_fts (id, title, description, tags)
    VALUES (new.id, new.title, new.description, '');
END;
CREATE TRIGGER IF NOT EXISTS gorevler_fts_update AFTER UPDATE OF title, description ON gorevler BEGIN
    UPDATE gorevler_fts SET title = new.title, description = new.description WHERE id = new.id;
END;
CREATE TRIGGER IF NOT EXISTS gorevler_fts_delete AFTER DELETE ON gorevler BEGIN
    DELETE FROM gorevler_fts WHERE id = old.id;
    DELETE FROM gorev_etiketleri WHERE task_id = old.id;
END;
CREATE TABLE IF NOT EXISTS ai_interactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    source TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ai_interactions_task ON ai_interactions(task_id);
CREATE TABLE IF NOT EXISTS filter_profiles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    filters TEXT NOT NULL,
    search_query TEXT NOT NULL DEFAULT '',
    is_default INTEGER NOT NULL DEFAULT 0,
    use_count INTEGER NOT NULL DEFAULT 0,
    last_used_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS search_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    query TEXT NOT NULL,
    filters TEXT NOT NULL,
    result_count INTEGER NOT NULL,
    execution_time_ms INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_search_history_created ON search_history(created_at);
";

/// Shared SQLite handle. Tasks, FTS, profiles and history all live in the
/// same file.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn open_file(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_from_config(cfg: &Config) -> Result<Self, StoreError> {
        Self::open_file(&cfg.db_path)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<T, E>(&self, f: impl FnOnce(&Connection) -> Result<T, E>) -> Result<T, E> {
        f(&self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Task persistence consumed by the watcher reactor and the search engine.
pub trait TaskStore: Send + Sync {
    fn get_task(&self, id: &str) -> Result<Task, StoreError>;

    fn record_ai_interaction(
        &self,
        task_id: &str,
        kind: &str,
        payload: &str,
        source: &str,
    ) -> Result<(), StoreError>;

    /// Applies the set fields and refreshes `updated_at`.
    fn update_task(&self, task_id: &str, update: &TaskUpdate) -> Result<(), StoreError>;

    fn touch_last_ai_interaction(&self, task_id: &str, at: DateTime<Utc>)
        -> Result<(), StoreError>;

    /// Tasks come back with their tags loaded.
    fn list_tasks(&self, filter: &TaskListFilter, limit: usize) -> Result<Vec<Task>, StoreError>;

    fn get_task_detail(&self, id: &str) -> Result<Task, StoreError>;
}

pub struct SqliteTaskStore {
    db: std::sync::Arc<Database>,
}

const TASK_COLUMNS: &str = "g.id, g.title, g.description, g.status, g.priority, g.project_id, \
     p.name, g.parent_id, g.created_at, g.updated_at, g.due_date, g.last_ai_interaction_at";

impl SqliteTaskStore {
    pub fn new(db: std::sync::Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &std::sync::Arc<Database> {
        &self.db
    }

    pub fn insert_project(&self, id: &str, name: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO projeler (id, name) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET name=excluded.name",
                params![id, name],
            )?;
            Ok(())
        })
    }

    pub fn insert_task(&self, task: &NewTask) -> Result<Task, StoreError> {
        let now = Utc::now().timestamp();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO gorevler (id, title, description, status, priority, project_id,
                     parent_id, created_at, updated_at, due_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?9)",
                params![
                    task.id,
                    task.title,
                    task.description,
                    task.status,
                    task.priority,
                    task.project_id,
                    task.parent_id,
                    now,
                    task.due_date.map(|d| d.timestamp()),
                ],
            )?;
            load_task(conn, &task.id, true)
        })
    }

    /// Replaces the task's tag set and refreshes its FTS row.
    pub fn set_task_tags(&self, task_id: &str, tags: &[&str]) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let exists: Option<String> = tx
                .query_row("SELECT id FROM gorevler WHERE id = ?1", params![task_id], |r| {
                    r.get(0)
                })
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::TaskNotFound(task_id.to_string()));
            }

            tx.execute(
                "DELETE FROM gorev_etiketleri WHERE task_id = ?1",
                params![task_id],
            )?;
            for tag in tags {
                let name = tag.trim();
                if name.is_empty() {
                    continue;
                }
                tx.execute(
                    "INSERT OR IGNORE INTO etiketler (id, name) VALUES (?1, ?1)",
                    params![name],
                )?;
                tx.execute(
                    "INSERT OR IGNORE INTO gorev_etiketleri (task_id, tag_id) VALUES (?1, ?2)",
                    params![task_id, name],
                )?;
            }

            let tag_text = tags
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            tx.execute(
                "UPDATE gorevler_fts SET tags = ?1 WHERE id = ?2",
                params![tag_text, task_id],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn delete_task(&self, task_id: &str) -> Result<(), StoreError> {
        let deleted = self.db.with_conn(|conn| {
            conn.execute("DELETE FROM gorevler WHERE id = ?1", params![task_id])
        })?;
        if deleted == 0 {
            return Err(StoreError::TaskNotFound(task_id.to_string()));
        }
        Ok(())
    }

    pub fn list_interactions(&self, task_id: &str) -> Result<Vec<Interaction>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, kind, payload, source, created_at
                 FROM ai_interactions WHERE task_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![task_id], |row| {
                Ok(Interaction {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    kind: row.get(2)?,
                    payload: row.get(3)?,
                    source: row.get(4)?,
                    created_at: from_epoch(row.get(5)?),
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

impl TaskStore for SqliteTaskStore {
    fn get_task(&self, id: &str) -> Result<Task, StoreError> {
        self.db.with_conn(|conn| load_task(conn, id, false))
    }

    fn record_ai_interaction(
        &self,
        task_id: &str,
        kind: &str,
        payload: &str,
        source: &str,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO ai_interactions (task_id, kind, payload, source, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![task_id, kind, payload, source, Utc::now().timestamp()],
            )?;
            Ok(())
        })
    }

    fn update_task(&self, task_id: &str, update: &TaskUpdate) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let current = load_task(conn, task_id, false)?;
            if update.is_empty() {
                return Ok(());
            }
            let title = update.title.as_ref().unwrap_or(&current.title);
            let description = update.description.as_ref().unwrap_or(&current.description);
            let status = update.status.unwrap_or(current.status);
            let priority = update.priority.unwrap_or(current.priority);
            let due_date = update.due_date.unwrap_or(current.due_date);

            conn.execute(
                "UPDATE gorevler SET title = ?1, description = ?2, status = ?3, priority = ?4,
                     due_date = ?5, updated_at = ?6
                 WHERE id = ?7",
                params![
                    title,
                    description,
                    status,
                    priority,
                    due_date.map(|d| d.timestamp()),
                    Utc::now().timestamp(),
                    task_id,
                ],
            )?;
            Ok(())
        })
    }

    fn touch_last_ai_interaction(
        &self,
        task_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE gorevler SET last_ai_interaction_at = ?1 WHERE id = ?2",
                params![at.timestamp(), task_id],
            )
        })?;
        if changed == 0 {
            return Err(StoreError::TaskNotFound(task_id.to_string()));
        }
        Ok(())
    }

    fn list_tasks(&self, filter: &TaskListFilter, limit: usize) -> Result<Vec<Task>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {TASK_COLUMNS} FROM gorevler g
                 LEFT JOIN projeler p ON p.id = g.project_id
                 WHERE (?1 IS NULL OR g.status = ?1) AND (?2 IS NULL OR g.project_id = ?2)
                 ORDER BY g.created_at DESC, g.id ASC
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let rows = stmt.query_map(params![filter.status, filter.project_id, limit], task_from_row)?;
            let mut tasks = rows.collect::<Result<Vec<_>, _>>()?;
            for task in &mut tasks {
                task.tags = load_tags(conn, &task.id)?;
            }
            Ok(tasks)
        })
    }

    fn get_task_detail(&self, id: &str) -> Result<Task, StoreError> {
        self.db.with_conn(|conn| load_task(conn, id, true))
    }
}

fn load_task(conn: &Connection, id: &str, with_tags: bool) -> Result<Task, StoreError> {
    let sql = format!(
        "SELECT {TASK_COLUMNS} FROM gorevler g
         LEFT JOIN projeler p ON p.id = g.project_id
         WHERE g.id = ?1"
    );
    let mut task = conn
        .query_row(&sql, params![id], task_from_row)
        .optional()?
        .ok_or_else(|| StoreError::TaskNotFound(id.to_string()))?;
    if with_tags {
        task.tags = load_tags(conn, id)?;
    }
    Ok(task)
}

fn load_tags(conn: &Connection, task_id: &str) -> Result<Vec<Tag>, rusqlite::Error> {
    let mut stmt = conn.prepare_cached(
        "SELECT e.id, e.name FROM etiketler e
         JOIN gorev_etiketleri ge ON ge.tag_id = e.id
         WHERE ge.task_id = ?1 ORDER BY e.name",
    )?;
    let rows = stmt.query_map(params![task_id], |row| {
        Ok(Tag {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    })?;
    rows.collect()
}

fn task_from_row(row: &Row<'_>) -> Result<Task, rusqlite::Error> {
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: row.get(3)?,
        priority: row.get(4)?,
        project_id: row.get(5)?,
        project_name: row.get(6)?,
        parent_id: row.get(7)?,
        created_at: from_epoch(row.get(8)?),
        updated_at: from_epoch(row.get(9)?),
        due_date: row.get::<_, Option<i64>>(10)?.map(from_epoch),
        last_ai_interaction_at: row.get::<_, Option<i64>>(11)?.map(from_epoch),
        tags: Vec::new(),
    })
}

pub(crate) fn from_epoch(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

impl ToSql for TaskStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TaskStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        TaskStatus::parse(text)
            .ok_or_else(|| FromSqlError::Other(format!("unknown task status: {text}").into()))
    }
}

impl ToSql for Priority {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Priority {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        Priority::parse(text)
            .ok_or_else(|| FromSqlError::Other(format!("unknown priority: {text}").into()))
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "beklemede")]
    Pending,
    #[serde(rename = "devam_ediyor")]
    InProgress,
    #[serde(rename = "tamamlandi")]
    Completed,
    #[serde(rename = "iptal")]
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "beklemede",
            Self::InProgress => "devam_ediyor",
            Self::Completed => "tamamlandi",
            Self::Cancelled => "iptal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "beklemede" => Some(Self::Pending),
            "devam_ediyor" => Some(Self::InProgress),
            "tamamlandi" => Some(Self::Completed),
            "iptal" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    #[serde(rename = "yuksek")]
    High,
    #[serde(rename = "orta")]
    Medium,
    #[serde(rename = "dusuk")]
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "yuksek",
            Self::Medium => "orta",
            Self::Low => "dusuk",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "yuksek" => Some(Self::High),
            "orta" => Some(Self::Medium),
            "dusuk" => Some(Self::Low),
            _ => None,
        }
    }

    /// Sort ordinal: high outranks medium outranks low.
    pub fn rank(self) -> u8 {
        match self {
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
    pub last_ai_interaction_at: Option<DateTime<Utc>>,
    pub tags: Vec<Tag>,
}

impl Task {
    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|tag| tag.name == name)
    }

    pub fn tag_text(&self) -> String {
        self.tags
            .iter()
            .map(|tag| tag.name.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Input for inserting a task. Ids are chosen by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub project_id: Option<String>,
    pub parent_id: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
}

impl NewTask {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            status: TaskStatus::Pending,
            priority: Priority::Medium,
            project_id: None,
            parent_id: None,
            due_date: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_project(mut self, project_id: &str) -> Self {
        self.project_id = Some(project_id.to_string());
        self
    }

    pub fn with_due_date(mut self, due: DateTime<Utc>) -> Self {
        self.due_date = Some(due);
        self
    }
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub due_date: Option<Option<DateTime<Utc>>>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.due_date.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: i64,
    pub task_id: String,
    pub kind: String,
    pub payload: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// Narrowing used by `TaskStore::list_tasks`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskListFilter {
    pub status: Option<TaskStatus>,
    pub project_id: Option<String>,
}

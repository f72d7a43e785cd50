use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info};

use crate::search_filters::FilterMap;
use crate::task_store::{from_epoch, Database};

pub const DEFAULT_MOST_USED_LIMIT: usize = 5;
pub const DEFAULT_HISTORY_LIMIT: usize = 20;
pub const DEFAULT_HISTORY_RETENTION_DAYS: u32 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profile name is required")]
    NameRequired,
    #[error("a profile named '{0}' already exists")]
    NameExists(String),
    #[error("filter profile not found: {0}")]
    NotFound(i64),
    #[error("default profile '{0}' cannot be deleted")]
    CannotDeleteDefault(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Saved search criteria, stored as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub priority: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub project_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_fuzzy: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuzzy_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_before: Option<String>,
}

impl FilterSpec {
    /// Equivalent search filters. Lists become any-of filters.
    pub fn to_filter_map(&self) -> FilterMap {
        let mut map = FilterMap::new();
        let mut put_list = |key: &str, values: &[String]| match values {
            [] => {}
            [single] => {
                map.insert(key.to_string(), single.clone().into());
            }
            many => {
                map.insert(key.to_string(), many.to_vec().into());
            }
        };
        put_list("durum", &self.status);
        put_list("oncelik", &self.priority);
        put_list("proje_id", &self.project_ids);
        put_list("etiket", &self.tags);

        let bounds = [
            ("created_after", &self.created_after),
            ("created_before", &self.created_before),
            ("due_after", &self.due_after),
            ("due_before", &self.due_before),
        ];
        for (key, value) in bounds {
            if let Some(value) = value {
                map.insert(key.to_string(), value.clone().into());
            }
        }
        map
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterProfile {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub filters: FilterSpec,
    pub search_query: String,
    pub is_default: bool,
    pub use_count: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewFilterProfile {
    pub name: String,
    pub description: String,
    pub filters: FilterSpec,
    pub search_query: String,
    pub is_default: bool,
}

impl NewFilterProfile {
    pub fn new(name: &str, filters: FilterSpec) -> Self {
        Self {
            name: name.to_string(),
            filters,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHistoryEntry {
    pub id: i64,
    pub query: String,
    pub filters: FilterMap,
    pub result_count: i64,
    pub execution_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

const PROFILE_COLUMNS: &str = "id, name, description, filters, search_query, is_default, \
     use_count, last_used_at, created_at, updated_at";

/// Saved filter profiles and the search history log.
#[derive(Clone)]
pub struct FilterProfileStore {
    db: Arc<Database>,
}

impl FilterProfileStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn create(&self, profile: &NewFilterProfile) -> Result<FilterProfile, ProfileError> {
        let name = required_name(&profile.name)?;
        let filters = serde_json::to_string(&profile.filters)?;
        let now = Utc::now().timestamp();

        let id = self.db.with_conn(|conn| {
            ensure_unique_name(conn, name, None)?;
            conn.execute(
                "INSERT INTO filter_profiles
                     (name, description, filters, search_query, is_default, use_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)",
                params![
                    name,
                    profile.description,
                    filters,
                    profile.search_query,
                    profile.is_default,
                    now
                ],
            )?;
            Ok::<_, ProfileError>(conn.last_insert_rowid())
        })?;

        info!(id, name, "filter profile created");
        self.get(id)
    }

    pub fn get(&self, id: i64) -> Result<FilterProfile, ProfileError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM filter_profiles WHERE id = ?1"),
                params![id],
                profile_from_row,
            )
            .optional()?
            .ok_or(ProfileError::NotFound(id))
        })
    }

    /// Defaults first, then by use count, then by name.
    pub fn list(&self, defaults_only: bool) -> Result<Vec<FilterProfile>, ProfileError> {
        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM filter_profiles
             WHERE (?1 = 0 OR is_default = 1)
             ORDER BY is_default DESC, use_count DESC, name ASC"
        );
        self.query_profiles(&sql, params![defaults_only])
    }

    pub fn defaults(&self) -> Result<Vec<FilterProfile>, ProfileError> {
        self.list(true)
    }

    pub fn update(&self, profile: &FilterProfile) -> Result<FilterProfile, ProfileError> {
        let name = required_name(&profile.name)?;
        let filters = serde_json::to_string(&profile.filters)?;

        let changed = self.db.with_conn(|conn| {
            ensure_unique_name(conn, name, Some(profile.id))?;
            Ok::<_, ProfileError>(conn.execute(
                "UPDATE filter_profiles
                 SET name = ?1, description = ?2, filters = ?3, search_query = ?4,
                     is_default = ?5, updated_at = ?6
                 WHERE id = ?7",
                params![
                    name,
                    profile.description,
                    filters,
                    profile.search_query,
                    profile.is_default,
                    Utc::now().timestamp(),
                    profile.id
                ],
            )?)
        })?;
        if changed == 0 {
            return Err(ProfileError::NotFound(profile.id));
        }

        debug!(id = profile.id, "filter profile updated");
        self.get(profile.id)
    }

    pub fn delete(&self, id: i64) -> Result<(), ProfileError> {
        let profile = self.get(id)?;
        if profile.is_default {
            return Err(ProfileError::CannotDeleteDefault(profile.name));
        }

        let deleted = self.db.with_conn(|conn| {
            conn.execute("DELETE FROM filter_profiles WHERE id = ?1", params![id])
        })?;
        if deleted == 0 {
            return Err(ProfileError::NotFound(id));
        }
        info!(id, name = %profile.name, "filter profile deleted");
        Ok(())
    }

    pub fn mark_used(&self, id: i64) -> Result<(), ProfileError> {
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE filter_profiles SET use_count = use_count + 1, last_used_at = ?1 WHERE id = ?2",
                params![Utc::now().timestamp(), id],
            )
        })?;
        if changed == 0 {
            return Err(ProfileError::NotFound(id));
        }
        Ok(())
    }

    pub fn most_used(&self, limit: Option<usize>) -> Result<Vec<FilterProfile>, ProfileError> {
        let limit = positive_or(limit, DEFAULT_MOST_USED_LIMIT);
        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM filter_profiles
             WHERE use_count > 0
             ORDER BY use_count DESC, last_used_at DESC
             LIMIT ?1"
        );
        self.query_profiles(&sql, params![limit])
    }

    /// Substring match on name or description.
    pub fn search(&self, term: &str) -> Result<Vec<FilterProfile>, ProfileError> {
        let pattern = format!("%{}%", term.trim());
        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM filter_profiles
             WHERE name LIKE ?1 OR description LIKE ?1
             ORDER BY use_count DESC, name ASC"
        );
        self.query_profiles(&sql, params![pattern])
    }

    pub fn record_history(
        &self,
        query: &str,
        filters: &FilterMap,
        result_count: usize,
        elapsed: Duration,
    ) -> Result<(), ProfileError> {
        let filters = serde_json::to_string(filters)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO search_history (query, filters, result_count, execution_time_ms, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    query,
                    filters,
                    i64::try_from(result_count).unwrap_or(i64::MAX),
                    i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
                    Utc::now().timestamp()
                ],
            )
        })?;
        Ok(())
    }

    /// Newest first.
    pub fn history(&self, limit: Option<usize>) -> Result<Vec<SearchHistoryEntry>, ProfileError> {
        let limit = positive_or(limit, DEFAULT_HISTORY_LIMIT);
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, query, filters, result_count, execution_time_ms, created_at
                 FROM search_history ORDER BY created_at DESC, id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], |row| {
                Ok(SearchHistoryEntry {
                    id: row.get(0)?,
                    query: row.get(1)?,
                    filters: json_column(row, 2)?,
                    result_count: row.get(3)?,
                    execution_time_ms: row.get(4)?,
                    created_at: from_epoch(row.get(5)?),
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Deletes history older than the retention window. Returns rows removed.
    pub fn clean_history(&self, older_than_days: Option<u32>) -> Result<usize, ProfileError> {
        let days = match older_than_days {
            Some(days) if days > 0 => days,
            _ => DEFAULT_HISTORY_RETENTION_DAYS,
        };
        let cutoff = Utc::now().timestamp() - i64::from(days) * 86_400;
        let removed = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM search_history WHERE created_at < ?1",
                params![cutoff],
            )
        })?;
        info!(removed, days, "search history cleaned");
        Ok(removed)
    }

    fn query_profiles(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<FilterProfile>, ProfileError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params, profile_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

fn required_name(name: &str) -> Result<&str, ProfileError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ProfileError::NameRequired);
    }
    Ok(name)
}

fn ensure_unique_name(conn: &Connection, name: &str, except: Option<i64>) -> Result<(), ProfileError> {
    let taken: i64 = conn.query_row(
        "SELECT COUNT(*) FROM filter_profiles WHERE name = ?1 AND (?2 IS NULL OR id != ?2)",
        params![name, except],
        |row| row.get(0),
    )?;
    if taken > 0 {
        return Err(ProfileError::NameExists(name.to_string()));
    }
    Ok(())
}

fn positive_or(limit: Option<usize>, default: usize) -> i64 {
    let limit = match limit {
        Some(limit) if limit > 0 => limit,
        _ => default,
    };
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<FilterProfile> {
    Ok(FilterProfile {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        filters: json_column(row, 3)?,
        search_query: row.get(4)?,
        is_default: row.get(5)?,
        use_count: row.get(6)?,
        last_used_at: row.get::<_, Option<i64>>(7)?.map(from_epoch),
        created_at: from_epoch(row.get(8)?),
        updated_at: from_epoch(row.get(9)?),
    })
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, index: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(index)?;
    serde_json::from_str(&raw)
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_spec_omits_empty_fields() {
        let saved = FilterSpec {
            tags: vec!["backend".into()],
            ..FilterSpec::default()
        };
        assert_eq!(serde_json::to_string(&saved).unwrap(), r#"{"tags":["backend"]}"#);
        let parsed: FilterSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, FilterSpec::default());
    }

    #[test]
    fn filter_spec_maps_to_search_filters() {
        let saved = FilterSpec {
            status: vec!["beklemede".into()],
            priority: vec!["yuksek".into(), "orta".into()],
            due_before: Some("2024-12-31".into()),
            ..FilterSpec::default()
        };
        let map = saved.to_filter_map();
        assert_eq!(map["durum"], serde_json::json!("beklemede"));
        assert_eq!(map["oncelik"], serde_json::json!(["yuksek", "orta"]));
        assert_eq!(map["due_before"], serde_json::json!("2024-12-31"));
        assert!(!map.contains_key("etiket"));
    }
}

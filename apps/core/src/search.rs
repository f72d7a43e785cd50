use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use rusqlite::params;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, warn};

use crate::filter_profiles::{FilterProfile, FilterProfileStore};
use crate::fuzzy::similarity;
use crate::model::{Priority, Task, TaskListFilter, TaskStatus};
use crate::nlp::{strip_filter_expressions, KeywordInterpreter, QueryIntent, QueryInterpreter};
use crate::search_filters::{self, FilterMap, SortDirection, SortKey};
use crate::suggestions::build_suggestions;
use crate::task_store::{Database, StoreError, TaskStore};

pub const DEFAULT_MAX_RESULTS: usize = 50;
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.6;
/// Tasks scanned by the fuzzy and filter-only passes.
const SCAN_LIMIT: usize = 1000;
const FTS_COLUMNS: [SearchField; 3] = [SearchField::Title, SearchField::Description, SearchField::Tags];

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchField {
    Title,
    Description,
    Tags,
    ProjectName,
}

impl SearchField {
    pub const ALL: [SearchField; 4] = [Self::Title, Self::Description, Self::Tags, Self::ProjectName];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Description => "description",
            Self::Tags => "tags",
            Self::ProjectName => "project_name",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "title" | "baslik" => Some(Self::Title),
            "description" | "aciklama" => Some(Self::Description),
            "tags" | "etiketler" => Some(Self::Tags),
            "project_name" | "proje_adi" => Some(Self::ProjectName),
            _ => None,
        }
    }

    fn text(self, task: &Task) -> String {
        match self {
            Self::Title => task.title.clone(),
            Self::Description => task.description.clone(),
            Self::Tags => task.tag_text(),
            Self::ProjectName => task.project_name.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub query: String,
    pub filters: FilterMap,
    pub enable_fuzzy: bool,
    pub fuzzy_threshold: f64,
    pub max_results: usize,
    pub sort_by: SortKey,
    pub sort_direction: SortDirection,
    pub include_completed: bool,
    /// Empty means every field.
    pub search_fields: Vec<SearchField>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            query: String::new(),
            filters: FilterMap::new(),
            enable_fuzzy: true,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            max_results: DEFAULT_MAX_RESULTS,
            sort_by: SortKey::Relevance,
            sort_direction: SortDirection::Desc,
            include_completed: true,
            search_fields: Vec::new(),
        }
    }
}

impl SearchOptions {
    pub fn query(query: &str) -> Self {
        Self {
            query: query.to_string(),
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.filters.insert(key.to_string(), value.into());
        self
    }

    /// Options seeded from a saved profile. Profile filters override `self`'s.
    pub fn with_profile(mut self, profile: &FilterProfile) -> Self {
        if self.query.trim().is_empty() {
            self.query = profile.search_query.clone();
        }
        self.filters.extend(profile.filters.to_filter_map());
        if let Some(enable_fuzzy) = profile.filters.enable_fuzzy {
            self.enable_fuzzy = enable_fuzzy;
        }
        if let Some(threshold) = profile.filters.fuzzy_threshold {
            self.fuzzy_threshold = threshold;
        }
        self
    }

    fn fields(&self) -> Vec<SearchField> {
        if self.search_fields.is_empty() {
            SearchField::ALL.to_vec()
        } else {
            self.search_fields.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Fts,
    Fuzzy,
    Filter,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub task: Task,
    pub relevance: f64,
    pub match_type: MatchType,
    pub matched_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total_count: usize,
    #[serde(rename = "query_time_ms", serialize_with = "as_millis")]
    pub query_time: Duration,
    pub used_fuzzy: bool,
    pub suggestions: Vec<String>,
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

/// Full-text, fuzzy and filter search over the task store.
pub struct SearchEngine {
    db: Arc<Database>,
    store: Arc<dyn TaskStore>,
    interpreter: Box<dyn QueryInterpreter>,
    history: FilterProfileStore,
}

impl SearchEngine {
    pub fn new(db: Arc<Database>, store: Arc<dyn TaskStore>) -> Self {
        Self::with_interpreter(db, store, Box::new(KeywordInterpreter))
    }

    pub fn with_interpreter(
        db: Arc<Database>,
        store: Arc<dyn TaskStore>,
        interpreter: Box<dyn QueryInterpreter>,
    ) -> Self {
        Self {
            history: FilterProfileStore::new(Arc::clone(&db)),
            db,
            store,
            interpreter,
        }
    }

    pub fn search(&self, options: &SearchOptions) -> Result<SearchResponse, SearchError> {
        let started = Instant::now();
        let query = options.query.trim();
        let max_results = if options.max_results == 0 {
            DEFAULT_MAX_RESULTS
        } else {
            options.max_results
        };
        let threshold = if options.fuzzy_threshold > 0.0 {
            options.fuzzy_threshold
        } else {
            DEFAULT_FUZZY_THRESHOLD
        };
        let fields = options.fields();

        let mut filters = options.filters.clone();
        let mut intent: Option<QueryIntent> = None;
        let mut cleaned = String::new();
        if !query.is_empty() {
            match self.interpreter.interpret(query) {
                Ok(parsed) => {
                    for (key, value) in &parsed.filters {
                        filters.entry(key.clone()).or_insert_with(|| value.clone());
                    }
                    intent = Some(parsed);
                }
                Err(error) => debug!(%error, "query not interpreted"),
            }
            cleaned = strip_filter_expressions(query);
        }

        let mut results = Vec::new();
        let mut used_fuzzy = false;
        if !cleaned.is_empty() {
            match self.full_text(&cleaned, max_results, &fields) {
                Ok(hits) => results.extend(hits),
                Err(error) => warn!(%error, query = %cleaned, "full-text search failed"),
            }
            if options.enable_fuzzy && results.len() < max_results / 2 {
                used_fuzzy = true;
                match self.fuzzy(&cleaned, threshold, &fields) {
                    Ok(hits) => results.extend(hits),
                    Err(error) => warn!(%error, query = %cleaned, "fuzzy search failed"),
                }
            }
        } else if !filters.is_empty() {
            let tasks = self.store.list_tasks(&TaskListFilter::default(), SCAN_LIMIT)?;
            results.extend(tasks.into_iter().map(|task| SearchResult {
                task,
                relevance: 1.0,
                match_type: MatchType::Filter,
                matched_fields: Vec::new(),
            }));
        }

        if !filters.is_empty() {
            let today = Local::now().date_naive();
            results.retain(|result| search_filters::matches(&result.task, &filters, today));
        }
        if !options.include_completed {
            results.retain(|result| !search_filters::is_completed(&result.task));
        }

        let mut seen = HashSet::new();
        results.retain(|result| seen.insert(result.task.id.clone()));
        search_filters::sort_results(&mut results, options.sort_by, options.sort_direction);
        results.truncate(max_results);

        let query_time = started.elapsed();
        if let Err(error) = self
            .history
            .record_history(query, &filters, results.len(), query_time)
        {
            warn!(%error, "failed to record search history");
        }

        let suggestions = build_suggestions(query, results.len(), intent.as_ref());
        debug!(
            query,
            results = results.len(),
            used_fuzzy,
            elapsed_ms = query_time.as_millis() as u64,
            "search finished"
        );

        Ok(SearchResponse {
            total_count: results.len(),
            results,
            query_time,
            used_fuzzy,
            suggestions,
        })
    }

    fn full_text(
        &self,
        cleaned: &str,
        limit: usize,
        fields: &[SearchField],
    ) -> Result<Vec<SearchResult>, SearchError> {
        let Some(expression) = fts_expression(cleaned, fields) else {
            return Ok(Vec::new());
        };

        let hits: Vec<(String, f64)> = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT gorevler_fts.id, gorevler_fts.rank
                 FROM gorevler_fts
                 JOIN gorevler g ON g.id = gorevler_fts.id
                 WHERE gorevler_fts MATCH ?1
                 ORDER BY gorevler_fts.rank
                 LIMIT ?2",
            )?;
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let rows = stmt.query_map(params![expression, limit], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })?;

        let needle = cleaned.to_lowercase();
        let mut results = Vec::with_capacity(hits.len());
        for (id, rank) in hits {
            let task = match self.store.get_task_detail(&id) {
                Ok(task) => task,
                Err(error) => {
                    warn!(task_id = %id, %error, "full-text hit could not be loaded");
                    continue;
                }
            };

            let title = task.title.to_lowercase();
            let mut relevance = 1.0 / (1.0 + (-rank));
            if title.contains(&needle) {
                relevance *= 1.5;
            }
            if task.priority == Priority::High {
                relevance *= 1.2;
            }
            if task.status == TaskStatus::InProgress {
                relevance *= 1.3;
            }

            let matched_fields = fields
                .iter()
                .filter(|field| field.text(&task).to_lowercase().contains(&needle))
                .map(|field| field.as_str().to_string())
                .collect();
            let match_type = if title == needle {
                MatchType::Exact
            } else {
                MatchType::Fts
            };

            results.push(SearchResult {
                task,
                relevance,
                match_type,
                matched_fields,
            });
        }
        Ok(results)
    }

    fn fuzzy(
        &self,
        cleaned: &str,
        threshold: f64,
        fields: &[SearchField],
    ) -> Result<Vec<SearchResult>, SearchError> {
        let tasks = self.store.list_tasks(&TaskListFilter::default(), SCAN_LIMIT)?;
        let needle = cleaned.to_lowercase();

        Ok(tasks
            .into_iter()
            .filter_map(|task| {
                let mut best: Option<(f64, SearchField)> = None;
                for field in FTS_COLUMNS.iter().filter(|field| fields.contains(*field)) {
                    let text = field.text(&task).to_lowercase();
                    if text.is_empty() {
                        continue;
                    }
                    let score = similarity(&needle, &text);
                    if best.map_or(true, |(top, _)| score > top) {
                        best = Some((score, *field));
                    }
                }

                let (score, field) = best?;
                (score >= threshold).then(|| SearchResult {
                    task,
                    relevance: score,
                    match_type: MatchType::Fuzzy,
                    matched_fields: vec![field.as_str().to_string()],
                })
            })
            .collect())
    }
}

/// Prefix-matching OR query with FTS syntax characters removed. `None` when
/// nothing searchable remains.
pub fn fts_expression(cleaned: &str, fields: &[SearchField]) -> Option<String> {
    let columns: Vec<&str> = FTS_COLUMNS
        .iter()
        .filter(|column| fields.contains(*column))
        .map(|column| column.as_str())
        .collect();
    if columns.is_empty() {
        return None;
    }

    let terms: Vec<String> = cleaned
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| !matches!(*c, '"' | '\'' | '*' | '(' | ')' | '[' | ']' | '{' | '}'))
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .map(|word| format!("\"{word}\"*"))
        .collect();
    if terms.is_empty() {
        return None;
    }

    let joined = terms.join(" OR ");
    if columns.len() == FTS_COLUMNS.len() {
        Some(joined)
    } else {
        Some(format!("{{{}}} : ({joined})", columns.join(" ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fts_expression_quotes_and_prefixes_terms() {
        let all = SearchField::ALL;
        assert_eq!(
            fts_expression("login (bug)", &all).as_deref(),
            Some(r#""login"* OR "bug"*"#)
        );
        assert_eq!(fts_expression("*** ()", &all), None);
    }

    #[test]
    fn fts_expression_restricts_columns() {
        assert_eq!(
            fts_expression("api", &[SearchField::Title, SearchField::ProjectName]).as_deref(),
            Some(r#"{title} : ("api"*)"#)
        );
        assert_eq!(fts_expression("api", &[SearchField::ProjectName]), None);
    }

    #[test]
    fn options_default_to_relevance_desc_with_completed() {
        let options = SearchOptions::query("x");
        assert!(options.include_completed);
        assert!(options.enable_fuzzy);
        assert_eq!(options.sort_by, SortKey::Relevance);
        assert_eq!(options.sort_direction, SortDirection::Desc);
        assert_eq!(options.fields().len(), 4);
    }
}

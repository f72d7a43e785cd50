use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Days, Local, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Task, TaskStatus};
use crate::search::SearchResult;

/// Filter key to value. Keys: `durum`, `oncelik`, `proje_id`, `etiket`, `son_tarih`
/// and the `created_*`/`due_*` bounds.
pub type FilterMap = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Relevance,
    Created,
    Updated,
    DueDate,
    Priority,
}

impl SortKey {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "relevance" => Some(Self::Relevance),
            "created" | "created_at" => Some(Self::Created),
            "updated" | "updated_at" => Some(Self::Updated),
            "due_date" | "son_tarih" => Some(Self::DueDate),
            "priority" | "oncelik" => Some(Self::Priority),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

/// Every filter must hold. A list value matches when any element does.
/// Unknown keys and values that are neither strings nor lists of strings are
/// ignored.
pub fn matches(task: &Task, filters: &FilterMap, today: NaiveDate) -> bool {
    filters.iter().all(|(key, value)| {
        let values: Vec<&str> = match value {
            serde_json::Value::String(single) => vec![single.as_str()],
            serde_json::Value::Array(items) => items.iter().filter_map(|v| v.as_str()).collect(),
            _ => return true,
        };
        if values.is_empty() {
            return true;
        }
        values
            .iter()
            .any(|value| matches_one(task, key, value, today))
    })
}

fn matches_one(task: &Task, key: &str, value: &str, today: NaiveDate) -> bool {
    match key {
        "durum" => task.status.as_str() == value,
        "oncelik" => task.priority.as_str() == value,
        "proje_id" if value.is_empty() => task.project_id.is_none(),
        "proje_id" => task.project_id.as_deref() == Some(value),
        "etiket" => task.has_tag(value),
        "son_tarih" => due_window_matches(task, value, today),
        "created_after" => bound(value).map_or(true, |at| task.created_at >= at),
        "created_before" => bound(value).map_or(true, |at| task.created_at < at),
        "due_after" => bound(value).map_or(true, |at| task.due_date.is_some_and(|due| due >= at)),
        "due_before" => bound(value).map_or(true, |at| task.due_date.is_some_and(|due| due < at)),
        _ => true,
    }
}

/// RFC 3339 instant, or a `YYYY-MM-DD` day taken at local midnight.
fn bound(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Some(at.with_timezone(&Utc));
    }
    let day = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    Local
        .from_local_datetime(&day.and_hms_opt(0, 0, 0)?)
        .earliest()
        .map(|at| at.with_timezone(&Utc))
}

pub fn is_completed(task: &Task) -> bool {
    task.status == TaskStatus::Completed
}

/// Windows are evaluated on local calendar days. Weeks start on Sunday.
pub fn due_window_matches(task: &Task, window: &str, today: NaiveDate) -> bool {
    let Some(due) = task.due_date else {
        return window == "no_date";
    };
    let due = due.with_timezone(&Local).date_naive();

    match window {
        "today" => due == today,
        "tomorrow" => today.succ_opt() == Some(due),
        "this_week" => {
            let offset = Days::new(u64::from(today.weekday().num_days_from_sunday()));
            let Some(start) = today.checked_sub_days(offset) else {
                return false;
            };
            let end = start.checked_add_days(Days::new(7));
            due >= start && end.map_or(true, |end| due < end)
        }
        "overdue" => due < today,
        "upcoming" => due > today,
        "no_date" => false,
        _ => true,
    }
}

/// Stable sort. Results without a due date always go last when sorting by it.
pub fn sort_results(results: &mut [SearchResult], key: SortKey, direction: SortDirection) {
    let directed = |ordering: Ordering| match direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    };

    results.sort_by(|a, b| match key {
        SortKey::Relevance => directed(
            a.relevance
                .partial_cmp(&b.relevance)
                .unwrap_or(Ordering::Equal),
        ),
        SortKey::Created => directed(a.task.created_at.cmp(&b.task.created_at)),
        SortKey::Updated => directed(a.task.updated_at.cmp(&b.task.updated_at)),
        SortKey::Priority => directed(a.task.priority.rank().cmp(&b.task.priority.rank())),
        SortKey::DueDate => match (a.task.due_date, b.task.due_date) {
            (Some(x), Some(y)) => directed(x.cmp(&y)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Priority, Tag};
    use crate::search::MatchType;

    fn task(id: &str) -> Task {
        let now = Utc::now();
        Task {
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            status: TaskStatus::Pending,
            priority: Priority::Medium,
            project_id: None,
            project_name: None,
            parent_id: None,
            created_at: now,
            updated_at: now,
            due_date: None,
            last_ai_interaction_at: None,
            tags: Vec::new(),
        }
    }

    fn due_on(mut task: Task, date: NaiveDate) -> Task {
        let local = Local
            .from_local_datetime(&date.and_hms_opt(12, 0, 0).unwrap())
            .earliest()
            .unwrap();
        task.due_date = Some(local.with_timezone(&Utc));
        task
    }

    fn filters(pairs: &[(&str, &str)]) -> FilterMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::from(*v)))
            .collect()
    }

    #[test]
    fn field_filters() {
        let mut t = task("a");
        t.priority = Priority::High;
        t.tags.push(Tag {
            id: "t1".into(),
            name: "backend".into(),
        });
        let today = Local::now().date_naive();

        assert!(matches(&t, &filters(&[("oncelik", "yuksek"), ("etiket", "backend")]), today));
        assert!(!matches(&t, &filters(&[("durum", "tamamlandi")]), today));
        assert!(matches(&t, &filters(&[("proje_id", "")]), today));
        assert!(!matches(&t, &filters(&[("proje_id", "p1")]), today));
        assert!(matches(&t, &filters(&[("unknown", "x")]), today));

        let mut any_of = FilterMap::new();
        any_of.insert("oncelik".into(), serde_json::json!(["orta", "yuksek"]));
        assert!(matches(&t, &any_of, today));
        any_of.insert("durum".into(), serde_json::json!(["iptal"]));
        assert!(!matches(&t, &any_of, today));
    }

    #[test]
    fn date_bounds() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 13).unwrap();
        let mut t = due_on(task("a"), today);
        t.created_at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();

        assert!(matches(&t, &filters(&[("created_after", "2024-02-01T00:00:00Z")]), today));
        assert!(!matches(&t, &filters(&[("created_before", "2024-02-01T00:00:00Z")]), today));
        assert!(matches(&t, &filters(&[("due_before", "2024-03-20")]), today));
        assert!(!matches(&t, &filters(&[("due_after", "2024-03-20")]), today));
        assert!(matches(&t, &filters(&[("due_after", "not a date")]), today));
        assert!(!matches(&task("b"), &filters(&[("due_before", "2024-03-20")]), today));
    }

    #[test]
    fn due_windows() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 13).unwrap(); // Wednesday
        let at = |y, m, d| due_on(task("t"), NaiveDate::from_ymd_opt(y, m, d).unwrap());

        assert!(due_window_matches(&at(2024, 3, 13), "today", today));
        assert!(due_window_matches(&at(2024, 3, 14), "tomorrow", today));
        assert!(due_window_matches(&at(2024, 3, 10), "this_week", today));
        assert!(due_window_matches(&at(2024, 3, 16), "this_week", today));
        assert!(!due_window_matches(&at(2024, 3, 17), "this_week", today));
        assert!(due_window_matches(&at(2024, 3, 12), "overdue", today));
        assert!(!due_window_matches(&at(2024, 3, 13), "overdue", today));
        assert!(due_window_matches(&at(2024, 4, 1), "upcoming", today));
        assert!(due_window_matches(&at(2024, 4, 1), "someday", today));

        let undated = task("u");
        assert!(due_window_matches(&undated, "no_date", today));
        assert!(!due_window_matches(&undated, "today", today));
        assert!(!due_window_matches(&undated, "someday", today));
        assert!(!due_window_matches(&at(2024, 3, 13), "no_date", today));
    }

    #[test]
    fn due_date_sort_keeps_undated_last() {
        let day = |d| NaiveDate::from_ymd_opt(2024, 3, d).unwrap();
        let result = |task: Task| SearchResult {
            task,
            relevance: 1.0,
            match_type: MatchType::Filter,
            matched_fields: Vec::new(),
        };
        let mut results = vec![
            result(task("none")),
            result(due_on(task("early"), day(1))),
            result(due_on(task("late"), day(20))),
        ];

        sort_results(&mut results, SortKey::DueDate, SortDirection::Desc);
        let order: Vec<_> = results.iter().map(|r| r.task.id.as_str()).collect();
        assert_eq!(order, ["late", "early", "none"]);

        sort_results(&mut results, SortKey::DueDate, SortDirection::Asc);
        let order: Vec<_> = results.iter().map(|r| r.task.id.as_str()).collect();
        assert_eq!(order, ["early", "late", "none"]);
    }
}

use std::sync::OnceLock;

use chrono::{Datelike, Days, Local, NaiveDate};
use regex::Regex;
use serde::Serialize;

use crate::search_filters::FilterMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryAction {
    List,
    Create,
    Update,
    Complete,
    Delete,
    Search,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelativeTime {
    Today,
    Tomorrow,
    Yesterday,
    ThisWeek,
    NextWeek,
    Date,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: NaiveDate,
    /// Exclusive.
    pub end: NaiveDate,
    pub relative: RelativeTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryIntent {
    pub action: QueryAction,
    pub filters: FilterMap,
    pub time_range: Option<TimeRange>,
    pub confidence: f64,
    pub raw: String,
}

#[derive(Debug, thiserror::Error)]
pub enum NlpError {
    #[error("query is empty")]
    EmptyQuery,
}

/// Turns a free-text query into an action, filters and an optional time range.
pub trait QueryInterpreter: Send + Sync {
    fn interpret(&self, query: &str) -> Result<QueryIntent, NlpError>;
}

/// Keyword and pattern interpreter for Turkish and English queries.
#[derive(Debug, Clone, Default)]
pub struct KeywordInterpreter;

const ACTION_KEYWORDS: &[(QueryAction, &[&str])] = &[
    (QueryAction::Create, &["oluştur", "olustur", "yeni", "ekle", "create", "new", "add"]),
    (QueryAction::Update, &["güncelle", "guncelle", "değiştir", "degistir", "update", "change", "edit"]),
    (QueryAction::Complete, &["tamamla", "bitir", "complete", "finish", "done"]),
    (QueryAction::Delete, &["sil", "kaldır", "kaldir", "delete", "remove"]),
    (QueryAction::Search, &["ara", "bul", "search", "find"]),
    (QueryAction::Status, &["durumu", "ilerleme", "özet", "summary"]),
    (QueryAction::List, &["listele", "göster", "goster", "list", "show"]),
];

const PRIORITY_PHRASES: &[(&str, &str)] = &[
    ("yüksek öncelik", "yuksek"),
    ("high priority", "yuksek"),
    ("acil", "yuksek"),
    ("urgent", "yuksek"),
    ("orta öncelik", "orta"),
    ("medium priority", "orta"),
    ("düşük öncelik", "dusuk"),
    ("low priority", "dusuk"),
];

const STATUS_PHRASES: &[(&str, &str)] = &[
    ("devam eden", "devam_ediyor"),
    ("in progress", "devam_ediyor"),
    ("bekleyen", "beklemede"),
    ("pending", "beklemede"),
    ("tamamlanan", "tamamlandi"),
    ("completed", "tamamlandi"),
];

impl QueryInterpreter for KeywordInterpreter {
    fn interpret(&self, query: &str) -> Result<QueryIntent, NlpError> {
        let raw = query.trim();
        if raw.is_empty() {
            return Err(NlpError::EmptyQuery);
        }
        let lower = raw.to_lowercase();
        let padded = format!(" {} ", lower.split_whitespace().collect::<Vec<_>>().join(" "));

        let mut confidence: f64 = 0.5;
        let action = ACTION_KEYWORDS
            .iter()
            .find(|(_, words)| words.iter().any(|w| padded.contains(&format!(" {w} "))))
            .map(|(action, _)| {
                confidence += 0.3;
                *action
            })
            .unwrap_or(QueryAction::List);

        let mut filters = FilterMap::new();
        extract_prefixed_filters(&lower, &mut filters);
        for (phrase, priority) in PRIORITY_PHRASES {
            if padded.contains(&format!(" {phrase} ")) {
                filters
                    .entry("oncelik".to_string())
                    .or_insert_with(|| (*priority).into());
                break;
            }
        }
        for (phrase, status) in STATUS_PHRASES {
            if padded.contains(&format!(" {phrase} ")) {
                filters
                    .entry("durum".to_string())
                    .or_insert_with(|| (*status).into());
                break;
            }
        }
        confidence += 0.1 * filters.len() as f64;

        let time_range = parse_time_range(&padded, Local::now().date_naive());
        if time_range.is_some() {
            confidence += 0.1;
        }

        Ok(QueryIntent {
            action,
            filters,
            time_range,
            confidence: confidence.min(1.0),
            raw: raw.to_string(),
        })
    }
}

fn prefixed_filter_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(etiket|tag|durum|status|öncelik|oncelik|priority|son_tarih|due):(\w+)\b")
            .expect("filter expression regex is valid")
    })
}

fn date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("date regex is valid"))
}

fn extract_prefixed_filters(lower: &str, filters: &mut FilterMap) {
    for caps in prefixed_filter_regex().captures_iter(lower) {
        let value = &caps[2];
        let (key, normalized) = match &caps[1] {
            "etiket" | "tag" => ("etiket", Some(value.to_string())),
            "durum" | "status" => ("durum", normalize_status(value)),
            "öncelik" | "oncelik" | "priority" => ("oncelik", normalize_priority(value)),
            _ => ("son_tarih", normalize_due_window(value)),
        };
        if let Some(normalized) = normalized {
            filters.entry(key.to_string()).or_insert_with(|| normalized.into());
        }
    }
}

fn normalize_status(value: &str) -> Option<String> {
    let status = match value {
        "beklemede" | "bekleyen" | "pending" | "todo" => "beklemede",
        "devam_ediyor" | "devam" | "in_progress" | "progress" => "devam_ediyor",
        "tamamlandi" | "tamamlandı" | "completed" | "done" => "tamamlandi",
        "iptal" | "cancelled" | "canceled" => "iptal",
        _ => return None,
    };
    Some(status.to_string())
}

fn normalize_priority(value: &str) -> Option<String> {
    let priority = match value {
        "yuksek" | "yüksek" | "high" | "urgent" | "acil" => "yuksek",
        "orta" | "medium" | "normal" => "orta",
        "dusuk" | "düşük" | "low" => "dusuk",
        _ => return None,
    };
    Some(priority.to_string())
}

fn normalize_due_window(value: &str) -> Option<String> {
    let window = match value {
        "bugün" | "bugun" | "today" => "today",
        "yarın" | "yarin" | "tomorrow" => "tomorrow",
        "bu_hafta" | "this_week" => "this_week",
        "gecikmis" | "gecikmiş" | "overdue" => "overdue",
        "yaklasan" | "yaklaşan" | "upcoming" => "upcoming",
        "yok" | "no_date" => "no_date",
        _ => return None,
    };
    Some(window.to_string())
}

fn parse_time_range(padded: &str, today: NaiveDate) -> Option<TimeRange> {
    let day = |offset: i64| {
        if offset >= 0 {
            today.checked_add_days(Days::new(offset as u64))
        } else {
            today.checked_sub_days(Days::new(offset.unsigned_abs()))
        }
    };
    let range = |start: Option<NaiveDate>, len: u64, relative| {
        let start = start?;
        Some(TimeRange {
            start,
            end: start.checked_add_days(Days::new(len))?,
            relative,
        })
    };
    let has = |phrases: &[&str]| phrases.iter().any(|p| padded.contains(&format!(" {p} ")));

    let week_start = day(-i64::from(today.weekday().num_days_from_sunday()));

    if has(&["bugün", "bugun", "today"]) {
        return range(Some(today), 1, RelativeTime::Today);
    }
    if has(&["yarın", "yarin", "tomorrow"]) {
        return range(day(1), 1, RelativeTime::Tomorrow);
    }
    if has(&["dün", "dun", "yesterday"]) {
        return range(day(-1), 1, RelativeTime::Yesterday);
    }
    if has(&["bu hafta", "this week"]) {
        return range(week_start, 7, RelativeTime::ThisWeek);
    }
    if has(&["gelecek hafta", "next week"]) {
        return range(week_start.and_then(|s| s.checked_add_days(Days::new(7))), 7, RelativeTime::NextWeek);
    }

    let caps = date_regex().captures(padded)?;
    let date = NaiveDate::from_ymd_opt(caps[1].parse().ok()?, caps[2].parse().ok()?, caps[3].parse().ok()?)?;
    range(Some(date), 1, RelativeTime::Date)
}

/// Removes `key:value` filter expressions and collapses whitespace.
pub fn strip_filter_expressions(query: &str) -> String {
    prefixed_filter_regex()
        .replace_all(query, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

use crate::nlp::{QueryAction, QueryIntent, RelativeTime};

pub const MAX_SUGGESTIONS: usize = 8;

const SYNONYMS: &[(&str, &[&str])] = &[
    ("bug", &["hata", "sorun", "problem"]),
    ("hata", &["bug", "sorun", "problem"]),
    ("feature", &["özellik", "yeni", "ekleme"]),
    ("özellik", &["feature", "yeni", "ekleme"]),
    ("test", &["test", "deneme", "kontrol"]),
    ("fix", &["düzelt", "tamir", "çözüm"]),
    ("düzelt", &["fix", "tamir", "çözüm"]),
    ("update", &["güncelle", "revize", "değiştir"]),
    ("güncelle", &["update", "revize", "değiştir"]),
];

const LIST_TEMPLATES: &[&str] = &[
    "durum:devam_ediyor",
    "öncelik:yuksek",
    "son_tarih:bugün",
    "son_tarih:yarın",
];

const COMMON_PATTERNS: &[&str] = &[
    "etiket:bug",
    "etiket:feature",
    "etiket:urgent",
    "durum:beklemede",
    "durum:tamamlandi",
    "öncelik:yuksek",
    "bugün tamamlanacak",
    "gecikmis görevler",
];

const TIME_TEMPLATES: &[&str] = &[
    "bugün",
    "yarın",
    "bu hafta",
    "geçen hafta",
    "bu ay",
    "geciken",
    "yaklaşan deadline",
];

/// Follow-up queries for a finished search, most specific first.
pub fn build_suggestions(query: &str, result_count: usize, intent: Option<&QueryIntent>) -> Vec<String> {
    let query = query.trim();
    let mut out = Suggestions::default();

    if result_count == 0 && !query.is_empty() {
        no_result_alternatives(query, &mut out);
    }

    if let Some(intent) = intent {
        if intent.action == QueryAction::List {
            out.extend(LIST_TEMPLATES.iter().copied());
        }
        match intent.time_range.as_ref().map(|range| range.relative) {
            Some(RelativeTime::Today) => out.extend(["son_tarih:bugün", "oluşturma:bugün"]),
            Some(RelativeTime::Tomorrow) => out.extend(["son_tarih:yarın"]),
            Some(RelativeTime::ThisWeek) => out.extend(["son_tarih:bu_hafta"]),
            _ => {}
        }
    }

    out.extend(COMMON_PATTERNS.iter().copied());
    out.extend(TIME_TEMPLATES.iter().copied());
    out.items
}

fn no_result_alternatives(query: &str, out: &mut Suggestions) {
    out.push(format!("Fuzzy search: {query}"));

    let words: Vec<&str> = query.split_whitespace().collect();
    if words.len() > 1 {
        out.extend(words.iter().copied().filter(|w| w.chars().count() >= 4));
    }

    for word in &words {
        let word = word.to_lowercase();
        if let Some((_, alternatives)) = SYNONYMS.iter().find(|(key, _)| *key == word) {
            out.extend(alternatives.iter().copied());
        }
    }
}

#[derive(Default)]
struct Suggestions {
    items: Vec<String>,
}

impl Suggestions {
    fn push(&mut self, candidate: String) {
        let candidate = candidate.trim();
        if self.items.len() >= MAX_SUGGESTIONS
            || candidate.is_empty()
            || self.items.iter().any(|s| s == candidate)
        {
            return;
        }
        self.items.push(candidate.to_string());
    }

    fn extend<'a>(&mut self, candidates: impl IntoIterator<Item = &'a str>) {
        for candidate in candidates {
            self.push(candidate.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlp::{KeywordInterpreter, QueryInterpreter};

    #[test]
    fn no_results_offers_fuzzy_words_and_synonyms() {
        let suggestions = build_suggestions("bug login", 0, None);
        assert_eq!(suggestions[0], "Fuzzy search: bug login");
        assert_eq!(suggestions[1], "login");
        assert_eq!(&suggestions[2..5], ["hata", "sorun", "problem"]);
        assert_eq!(suggestions.len(), MAX_SUGGESTIONS);
    }

    #[test]
    fn list_intent_leads_with_templates() {
        let intent = KeywordInterpreter.interpret("listele").unwrap();
        let suggestions = build_suggestions("listele", 3, Some(&intent));
        assert_eq!(&suggestions[..4], LIST_TEMPLATES);
    }

    #[test]
    fn capped_and_unique() {
        let intent = KeywordInterpreter.interpret("bugün listele").unwrap();
        let suggestions = build_suggestions("bugün listele", 1, Some(&intent));
        assert!(suggestions.len() <= MAX_SUGGESTIONS);
        let mut unique = suggestions.clone();
        unique.dedup();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), suggestions.len());
        assert_eq!(suggestions.iter().filter(|s| *s == "son_tarih:bugün").count(), 1);
    }

    #[test]
    fn short_single_word_gets_only_generic_help() {
        let suggestions = build_suggestions("zz", 0, None);
        assert_eq!(suggestions[0], "Fuzzy search: zz");
        assert_eq!(suggestions[1], "etiket:bug");
    }
}

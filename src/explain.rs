//! Human-readable rationale for ranked hits plus aggregate search
//! analytics over the bounded history and access counters.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Category;
use crate::query::{FileTypeHint, Intent};
use crate::rank::RankedResult;

/// One remembered search, kept in a bounded ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHistoryEntry {
    pub query: String,
    pub timestamp: DateTime<Utc>,
    pub detected_intents: Vec<String>,
    pub result_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessedPath {
    pub path: String,
    pub access_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchAnalytics {
    pub total_searches: usize,
    pub searches_last_7_days: usize,
    pub avg_results_per_search: f64,
    pub intent_frequencies: HashMap<String, u64>,
    pub top_accessed: Vec<AccessedPath>,
}

/// Fills in each result's explanation from its signal values.
pub fn annotate(results: &mut [RankedResult], query: &str, intent: &Intent) {
    for result in results {
        result.explanation = explain(result, query, intent);
    }
}

fn explain(result: &RankedResult, query: &str, intent: &Intent) -> String {
    let mut parts: Vec<String> = Vec::new();

    if result.signals.semantic > 0.7 {
        parts.push(format!(
            "This document closely matches your query about '{query}'"
        ));
    }

    if intent.needs_recent_files && result.signals.recency > 0.7 {
        parts.push(format!(
            "This is a recently modified file from {}",
            result.modified_at.format("%B %d, %Y")
        ));
    }

    if result.signals.filename > 0.5 {
        let filename_lower = result.filename.to_lowercase();
        let matched: Vec<String> = query_words(query)
            .into_iter()
            .filter(|w| filename_lower.contains(w.as_str()))
            .collect();
        if !matched.is_empty() {
            parts.push(format!(
                "The filename contains keywords from your search: {}",
                matched.join(", ")
            ));
        }
    }

    if let Some(hint) = matching_hint(result.category, &intent.file_type_hints) {
        parts.push(format!(
            "This {} file matches your search for {} content",
            result.category,
            hint_name(hint)
        ));
    }

    if parts.is_empty() {
        parts.push(format!("Contains relevant content related to '{query}'"));
    }

    let mut text = parts.join(". ");
    text.push('.');
    text
}

fn matching_hint(category: Category, hints: &[FileTypeHint]) -> Option<FileTypeHint> {
    hints.iter().copied().find(|hint| match hint {
        FileTypeHint::Document => matches!(category, Category::Document | Category::Text),
        FileTypeHint::Data => category == Category::Data,
        FileTypeHint::Code => category == Category::Code,
        FileTypeHint::Text => category == Category::Text,
    })
}

fn hint_name(hint: FileTypeHint) -> &'static str {
    match hint {
        FileTypeHint::Document => "document",
        FileTypeHint::Data => "data",
        FileTypeHint::Code => "code",
        FileTypeHint::Text => "text",
    }
}

fn query_words(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Aggregates the history buffer and access counters into a report.
pub fn analytics(
    history: &VecDeque<SearchHistoryEntry>,
    access: &HashMap<String, u64>,
    now: DateTime<Utc>,
) -> SearchAnalytics {
    let total_searches = history.len();
    let searches_last_7_days = history
        .iter()
        .filter(|e| (now - e.timestamp).num_days() <= 7)
        .count();
    let avg_results_per_search = if total_searches == 0 {
        0.0
    } else {
        history.iter().map(|e| e.result_count).sum::<usize>() as f64 / total_searches as f64
    };

    let mut intent_frequencies: HashMap<String, u64> = HashMap::new();
    for entry in history {
        for label in &entry.detected_intents {
            *intent_frequencies.entry(label.clone()).or_insert(0) += 1;
        }
    }

    let mut top_accessed: Vec<AccessedPath> = access
        .iter()
        .map(|(path, count)| AccessedPath {
            path: path.clone(),
            access_count: *count,
        })
        .collect();
    top_accessed.sort_by(|a, b| b.access_count.cmp(&a.access_count).then(a.path.cmp(&b.path)));
    top_accessed.truncate(5);

    SearchAnalytics {
        total_searches,
        searches_last_7_days,
        avg_results_per_search,
        intent_frequencies,
        top_accessed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::analyze_intent;
    use crate::rank::Signals;
    use chrono::Duration;

    fn result_with(signals: Signals, filename: &str, category: Category) -> RankedResult {
        RankedResult {
            path: format!("/{filename}"),
            filename: filename.to_string(),
            score: signals.final_score(),
            signals,
            explanation: String::new(),
            preview: String::new(),
            category,
            modified_at: Utc::now(),
            word_count: 0,
            size_bytes: 0,
        }
    }

    fn neutral_signals() -> Signals {
        Signals {
            semantic: 0.5,
            recency: 0.5,
            file_type: 0.5,
            filename: 0.0,
            access: 0.5,
        }
    }

    #[test]
    fn high_similarity_wording() {
        let intent = analyze_intent("revenue report");
        let mut signals = neutral_signals();
        signals.semantic = 0.9;
        let mut results = vec![result_with(signals, "q3.txt", Category::Text)];
        annotate(&mut results, "revenue report", &intent);
        assert!(results[0].explanation.contains("closely matches"));
    }

    #[test]
    fn default_wording_when_no_template_fires() {
        let intent = analyze_intent("revenue report");
        let mut results = vec![result_with(neutral_signals(), "q3.txt", Category::Other)];
        annotate(&mut results, "revenue report", &intent);
        assert!(results[0].explanation.contains("Contains relevant content"));
    }

    #[test]
    fn filename_and_recency_templates() {
        let intent = analyze_intent("recent budget");
        let mut signals = neutral_signals();
        signals.filename = 1.0;
        signals.recency = 1.0;
        let mut results = vec![result_with(signals, "budget.txt", Category::Text)];
        annotate(&mut results, "recent budget", &intent);
        let text = &results[0].explanation;
        assert!(text.contains("filename contains keywords"));
        assert!(text.contains("budget"));
        assert!(text.contains("recently modified"));
    }

    #[test]
    fn category_template_names_the_hint() {
        let intent = analyze_intent("authentication code");
        let mut results = vec![result_with(neutral_signals(), "auth.rs", Category::Code)];
        annotate(&mut results, "authentication code", &intent);
        assert!(results[0].explanation.contains("matches your search for code content"));
    }

    #[test]
    fn analytics_aggregates_history_and_access() {
        let now = Utc::now();
        let mut history = VecDeque::new();
        history.push_back(SearchHistoryEntry {
            query: "a".into(),
            timestamp: now - Duration::days(1),
            detected_intents: vec!["find".into(), "recent".into()],
            result_count: 4,
        });
        history.push_back(SearchHistoryEntry {
            query: "b".into(),
            timestamp: now - Duration::days(30),
            detected_intents: vec!["find".into()],
            result_count: 2,
        });

        let mut access = HashMap::new();
        for (path, count) in [("/a", 9u64), ("/b", 1), ("/c", 5), ("/d", 3), ("/e", 2), ("/f", 7)] {
            access.insert(path.to_string(), count);
        }

        let report = analytics(&history, &access, now);
        assert_eq!(report.total_searches, 2);
        assert_eq!(report.searches_last_7_days, 1);
        assert!((report.avg_results_per_search - 3.0).abs() < 1e-9);
        assert_eq!(report.intent_frequencies["find"], 2);
        assert_eq!(report.intent_frequencies["recent"], 1);
        assert_eq!(report.top_accessed.len(), 5);
        assert_eq!(report.top_accessed[0].path, "/a");
        assert_eq!(report.top_accessed[0].access_count, 9);
    }

    #[test]
    fn analytics_on_empty_history() {
        let report = analytics(&VecDeque::new(), &HashMap::new(), Utc::now());
        assert_eq!(report.total_searches, 0);
        assert_eq!(report.avg_results_per_search, 0.0);
        assert!(report.top_accessed.is_empty());
    }
}

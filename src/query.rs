//! Query understanding: intent extraction plus purely syntactic expansion.
//! No embedding model is consulted here; expansions are string edits that
//! the search fan-out resolves independently.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Maximum expansion fan-out, the original query included.
pub const MAX_EXPANSIONS: usize = 5;

/// Domain trigger terms and their associated vocabulary. A domain whose
/// name appears in the query contributes up to two terms.
const DOMAIN_EXPANSIONS: &[(&str, &[&str])] = &[
    ("financial", &["revenue", "profit", "earnings", "budget", "cost", "roi", "expenses", "income"]),
    ("customer", &["client", "user", "consumer", "satisfaction", "feedback", "support", "service"]),
    ("technical", &["development", "code", "programming", "software", "system", "implementation"]),
    ("business", &["strategy", "planning", "management", "operations", "performance", "metrics"]),
    ("marketing", &["campaign", "promotion", "advertising", "branding", "engagement", "conversion"]),
    ("project", &["task", "milestone", "deadline", "deliverable", "timeline", "resource", "scope"]),
    ("data", &["analysis", "statistics", "metrics", "insights", "trends", "patterns", "report"]),
    ("meeting", &["discussion", "agenda", "notes", "minutes", "action items", "decision"]),
];

/// Synonym classes; a query word in a class substitutes up to two synonyms.
const SYNONYMS: &[(&str, &[&str])] = &[
    ("error", &["bug", "issue", "problem", "failure", "exception"]),
    ("improve", &["enhance", "optimize", "better", "upgrade", "refine"]),
    ("urgent", &["critical", "important", "priority", "immediate", "asap"]),
    ("update", &["change", "modify", "revise", "edit", "refresh"]),
    ("plan", &["strategy", "roadmap", "schedule", "timeline", "blueprint"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Find,
    Show,
    Help,
    Organize,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Find => "find",
            QueryType::Show => "show",
            QueryType::Help => "help",
            QueryType::Organize => "organize",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    High,
    Medium,
    Low,
}

/// File-type preferences detected in the query, matched against record
/// categories by the ranker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileTypeHint {
    Document,
    Data,
    Code,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub query_type: QueryType,
    pub file_type_hints: Vec<FileTypeHint>,
    pub needs_recent_files: bool,
    pub urgency: Urgency,
    /// Capitalized tokens, a cheap stand-in for named entities.
    pub entities: Vec<String>,
}

impl Intent {
    /// Short labels stored in search history for intent-frequency analytics.
    pub fn labels(&self) -> Vec<String> {
        let mut labels = vec![self.query_type.as_str().to_string()];
        if self.needs_recent_files {
            labels.push("recent".to_string());
        }
        if self.urgency == Urgency::High {
            labels.push("urgent".to_string());
        }
        labels
    }
}

/// The planner's output: an intent and an ordered expansion list with the
/// original query first.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub intent: Intent,
    pub expansions: Vec<String>,
}

pub fn plan(query: &str) -> QueryPlan {
    QueryPlan {
        intent: analyze_intent(query),
        expansions: expand(query, MAX_EXPANSIONS),
    }
}

static RE_RECENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(recent|latest|today|yesterday|this\s+week|this\s+month|last\s+week|last\s+month|updated|modified|changed)\b",
    )
    .unwrap()
});
static RE_DOCUMENT_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(document|doc|docs|pdf)\b").unwrap());
static RE_DATA_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(spreadsheet|excel|csv|data)\b").unwrap());
static RE_CODE_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(code|script|program)\b").unwrap());
static RE_TEXT_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(text|txt)\b").unwrap());
static RE_URGENT_HIGH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(urgent|asap|immediately|now|emergency|critical)\b").unwrap());
static RE_URGENT_LOW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(whenever|eventually|no\s+rush|sometime)\b").unwrap());
static RE_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*\b").unwrap());
static RE_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").unwrap());

pub fn analyze_intent(query: &str) -> Intent {
    let lower = query.to_lowercase();

    let query_type = if contains_any(&lower, &["find", "search", "locate", "look for"]) {
        QueryType::Find
    } else if contains_any(&lower, &["show", "display", "list", "see"]) {
        QueryType::Show
    } else if contains_any(&lower, &["help", "how", "what is", "explain"]) {
        QueryType::Help
    } else if contains_any(&lower, &["organize", "sort", "clean", "manage"]) {
        QueryType::Organize
    } else {
        QueryType::Find
    };

    let mut file_type_hints = Vec::new();
    if RE_DOCUMENT_HINT.is_match(&lower) {
        file_type_hints.push(FileTypeHint::Document);
    }
    if RE_DATA_HINT.is_match(&lower) {
        file_type_hints.push(FileTypeHint::Data);
    }
    if RE_CODE_HINT.is_match(&lower) {
        file_type_hints.push(FileTypeHint::Code);
    }
    if RE_TEXT_HINT.is_match(&lower) {
        file_type_hints.push(FileTypeHint::Text);
    }

    let urgency = if RE_URGENT_HIGH.is_match(&lower) {
        Urgency::High
    } else if RE_URGENT_LOW.is_match(&lower) {
        Urgency::Low
    } else {
        Urgency::Medium
    };

    Intent {
        query_type,
        file_type_hints,
        needs_recent_files: RE_RECENT.is_match(&lower),
        urgency,
        entities: RE_ENTITY
            .find_iter(query)
            .map(|m| m.as_str().to_string())
            .collect(),
    }
}

/// Generates up to `max` query variants, the original always first:
/// domain-vocabulary appends, synonym substitutions, then prefix/suffix
/// drops for multi-word queries.
pub fn expand(query: &str, max: usize) -> Vec<String> {
    let query = query.trim();
    let lower = query.to_lowercase();
    let words: Vec<&str> = RE_WORD.find_iter(&lower).map(|m| m.as_str()).collect();

    let mut expansions: Vec<String> = vec![query.to_string()];
    let push = |expansions: &mut Vec<String>, candidate: String| {
        if expansions.len() < max && !expansions.contains(&candidate) {
            expansions.push(candidate);
        }
    };

    for (domain, terms) in DOMAIN_EXPANSIONS {
        if !lower.contains(domain) {
            continue;
        }
        for term in terms.iter().take(2) {
            if !lower.contains(term) {
                push(&mut expansions, format!("{query} {term}"));
            }
        }
    }

    for word in &words {
        let Some((_, synonyms)) = SYNONYMS.iter().find(|(w, _)| w == word) else {
            continue;
        };
        for synonym in synonyms.iter().take(2) {
            push(&mut expansions, lower.replace(word, synonym));
        }
    }

    if words.len() > 1 {
        push(&mut expansions, words[..words.len() - 1].join(" "));
        push(&mut expansions, words[1..].join(" "));
    }

    expansions
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

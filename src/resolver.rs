//! Table/Column Resolver
//!
//! Maps free question text to the most likely table and, within it, the most
//! likely column. Purely lexical: verbatim matches first, then term overlap,
//! then a curated keyword table per deployment.
//!
//! Tie-breaks are explicit so results never depend on map iteration order:
//! - tables: longer names are tried first for verbatim matches; keyword scores
//!   tie on alphabetical table name
//! - columns: highest score, then shortest name, then declaration order

use crate::error::{Result, SqlRagError};
use crate::schema_cache::SchemaMap;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::debug;

lazy_static! {
    /// Probes that pull a column phrase out of the question, tried in order.
    static ref PHRASE_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"where\s+(.+?)\s+is\s+empty").unwrap(),
        Regex::new(r"where\s+(.+?)\s+is\s+null").unwrap(),
        Regex::new(r"\bin\s+(?:the\s+)?(.+?)\s+column\b").unwrap(),
        Regex::new(r"\bvalues\s+in\s+(?:the\s+)?(.+?)(?:\s+column\b|\s+of\b|\s+from\b|\s+for\b|[?.!,]|$)").unwrap(),
        Regex::new(r"\bin\s+the\s+(.+?)(?:\s+column\b|\s+table\b|\s+of\b|\s+from\b|[?.!,]|$)").unwrap(),
        Regex::new(r#""([^"]+)""#).unwrap(),
        Regex::new(r"'([^']+)'").unwrap(),
    ];

    static ref STOP_WORDS: HashSet<&'static str> = [
        "where", "in", "for", "about", "with", "and", "or", "the",
        "column", "field", "value", "values",
    ]
    .into_iter()
    .collect();

    /// Related spellings of the same measurement. A column and a question that
    /// both hit one group earn a flat bonus.
    static ref COLUMN_KEYWORD_GROUPS: Vec<(&'static str, Vec<&'static str>)> = vec![
        ("current", vec!["ac", "curr", "amp", "amps", "ampere", "current"]),
        ("voltage", vec!["volt", "volts", "voltage", "vac"]),
        ("temperature", vec!["temp", "temperature", "celsius", "degrees"]),
        ("pressure", vec!["pressure", "psi", "bar", "kpa"]),
        ("speed", vec!["rpm", "speed", "velocity"]),
        ("power", vec!["power", "watt", "watts", "kw"]),
        ("status", vec!["status", "state", "stopped", "running"]),
        ("button", vec!["button", "btn", "pressed", "press"]),
        ("time", vec!["time", "timestamp", "date", "datetime"]),
    ];
}

const KEYWORD_BONUS: usize = 10;
const MIN_PHRASE_LEN: usize = 3;

/// Outcome of resolving one question. Scoped to a single request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionContext {
    pub question: String,
    pub table: Option<String>,
    pub column: Option<String>,
    /// Winning column score; only used to rank candidates.
    pub confidence: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMatch {
    pub column: String,
    pub score: usize,
}

/// Table name -> representative keywords, curated once per deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainKeywords {
    tables: BTreeMap<String, Vec<String>>,
}

impl Default for DomainKeywords {
    fn default() -> Self {
        let mut tables = BTreeMap::new();
        let mut add = |table: &str, words: &[&str]| {
            tables.insert(table.to_lowercase(), words.iter().map(|w| w.to_string()).collect());
        };
        add("kettlepump", &["kettle", "pump", "button", "stopped", "current", "amps", "voltage", "motor"]);
        add("compressor", &["compressor", "temperature", "pressure", "cooling", "refrigerant"]);
        add("users", &["user", "users", "person", "people", "age", "email"]);
        add("products", &["product", "products", "price", "stock", "inventory", "category"]);
        add("employees", &["employee", "employees", "salary", "department", "position", "hire"]);
        add("orders", &["order", "orders", "customer", "payment", "shipping", "amount"]);
        Self { tables }
    }
}

impl DomainKeywords {
    pub fn empty() -> Self {
        Self { tables: BTreeMap::new() }
    }

    pub fn from_map(tables: BTreeMap<String, Vec<String>>) -> Self {
        let tables = tables
            .into_iter()
            .map(|(t, words)| (t.to_lowercase(), words.into_iter().map(|w| w.to_lowercase()).collect()))
            .collect();
        Self { tables }
    }

    /// Load a `{"table": ["keyword", ...]}` JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let tables: BTreeMap<String, Vec<String>> = serde_json::from_str(&raw).map_err(|e| {
            SqlRagError::Config(format!("Invalid domain keyword file {}: {}", path.display(), e))
        })?;
        Ok(Self::from_map(tables))
    }

    pub fn keywords(&self, table: &str) -> &[String] {
        self.tables
            .get(&table.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default)]
pub struct Resolver {
    domain_keywords: DomainKeywords,
}

impl Resolver {
    pub fn new(domain_keywords: DomainKeywords) -> Self {
        Self { domain_keywords }
    }

    /// Resolve table, then the best column within it.
    pub fn resolve(&self, question: &str, schema: &SchemaMap) -> ResolutionContext {
        let table = self.resolve_table(question, schema);
        let best = table.as_deref().and_then(|t| {
            let columns = schema.column_names(t);
            self.best_column_match(&columns, question)
        });
        let (column, confidence) = match best {
            Some(m) => (Some(m.column), m.score),
            None => (None, 0),
        };
        debug!("Resolved {:?} -> table={:?} column={:?} score={}", question, table, column, confidence);
        ResolutionContext {
            question: question.to_string(),
            table,
            column,
            confidence,
        }
    }

    pub fn resolve_table(&self, question: &str, schema: &SchemaMap) -> Option<String> {
        let q = question.to_lowercase();

        // 1. table named verbatim; the most specific (longest) name wins
        let mut by_length: Vec<&str> = schema.table_names().collect();
        by_length.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        for table in &by_length {
            let lowered = table.to_lowercase();
            if q.contains(&lowered) {
                return Some(table.to_string());
            }
            if let Some(singular) = lowered.strip_suffix('s') {
                if singular.len() > MIN_PHRASE_LEN && q.contains(singular) {
                    return Some(table.to_string());
                }
            }
        }

        // 2. a column named verbatim, then a column's distinctive terms
        for (table, columns) in schema.iter() {
            if columns.iter().any(|c| q.contains(&c.name.to_lowercase())) {
                return Some(table.to_string());
            }
        }
        for (table, columns) in schema.iter() {
            for col in columns {
                let terms: Vec<String> = col
                    .name
                    .to_lowercase()
                    .split_whitespace()
                    .filter(|t| t.len() > 3)
                    .map(str::to_string)
                    .collect();
                if terms.is_empty() {
                    continue;
                }
                let hits = terms.iter().filter(|t| q.contains(t.as_str())).count();
                if hits >= terms.len().min(2) {
                    return Some(table.to_string());
                }
            }
        }

        // 3. curated domain keywords
        let words = words_of(&q);
        let mut best: Option<(&str, usize)> = None;
        for table in schema.table_names() {
            let score = self
                .domain_keywords
                .keywords(table)
                .iter()
                .filter(|k| words.contains(k.as_str()))
                .count();
            if score > 0 && best.map_or(true, |(_, s)| score > s) {
                best = Some((table, score));
            }
        }
        best.map(|(t, _)| t.to_string())
    }

    /// Best column of `columns` for `question`, or `None` when nothing scores.
    pub fn find_best_column_match(&self, columns: &[String], question: &str) -> Option<String> {
        self.best_column_match(columns, question).map(|m| m.column)
    }

    pub fn best_column_match(&self, columns: &[String], question: &str) -> Option<ColumnMatch> {
        let q = question.to_lowercase();
        let phrases = candidate_phrases(&q);
        let question_words = words_of(&q);

        let mut best: Option<ColumnMatch> = None;
        for column in columns {
            let score = score_column(column, &phrases, &question_words);
            if score == 0 {
                continue;
            }
            let better = match &best {
                None => true,
                Some(current) => {
                    score > current.score || (score == current.score && column.len() < current.column.len())
                }
            };
            if better {
                best = Some(ColumnMatch {
                    column: column.clone(),
                    score,
                });
            }
        }
        best
    }
}

/// Phrases from the fixed probes followed by stop-word delimited runs.
pub fn candidate_phrases(question: &str) -> Vec<String> {
    let q = question.to_lowercase();
    let mut phrases = Vec::new();

    for pattern in PHRASE_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(&q) {
            if let Some(m) = caps.get(1) {
                let phrase = m.as_str().trim();
                if phrase.len() > MIN_PHRASE_LEN {
                    phrases.push(phrase.to_string());
                }
            }
        }
    }

    let words: Vec<&str> = q
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty())
        .collect();
    for (idx, word) in words.iter().enumerate() {
        if !STOP_WORDS.contains(word) {
            continue;
        }
        let run: Vec<&str> = words[idx + 1..]
            .iter()
            .take_while(|w| !STOP_WORDS.contains(*w))
            .copied()
            .collect();
        let phrase = run.join(" ");
        if phrase.len() > MIN_PHRASE_LEN {
            phrases.push(phrase);
        }
    }
    phrases
}

fn score_column(column: &str, phrases: &[String], question_words: &HashSet<String>) -> usize {
    let col = column.to_lowercase();
    let col_words = words_of(&col);
    let mut score = 0;

    for phrase in phrases {
        if phrase.contains(col.as_str()) {
            score += col.len() * 2;
        } else if col.contains(phrase.as_str()) {
            score += phrase.len() * 2;
        }
        let overlap = words_of(phrase).intersection(&col_words).count();
        score += overlap * 3;
    }

    for (_, group) in COLUMN_KEYWORD_GROUPS.iter() {
        let in_column = group.iter().any(|k| col_words.contains(*k));
        let in_question = group.iter().any(|k| question_words.contains(*k));
        if in_column && in_question {
            score += KEYWORD_BONUS;
        }
    }
    score
}

/// Lower-cased alphanumeric words.
fn words_of(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

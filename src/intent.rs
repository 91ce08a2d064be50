//! Intent Classifier
//!
//! Keyword-set membership tests against the lower-cased question, checked in a
//! fixed precedence order. Single words match on word boundaries, multi-word
//! phrases as substrings. The first matching family wins, so a question such
//! as "average unique values" is a distinct count, not an average.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    Avg,
    Sum,
    Min,
    Max,
}

impl Aggregate {
    pub fn sql_function(&self) -> &'static str {
        match self {
            Aggregate::Avg => "AVG",
            Aggregate::Sum => "SUM",
            Aggregate::Min => "MIN",
            Aggregate::Max => "MAX",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextMeasure {
    Longest,
    Shortest,
    CharCount,
    WordCount,
    AverageLength,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum Intent {
    ColumnCount,
    ColumnListing,
    TableListing,
    RowCount,
    NullCount,
    NullRows,
    TextLength(TextMeasure),
    DistinctCount,
    Statistic(Aggregate),
    Superlative { descending: bool },
    ListAll,
    Fallback,
}

impl Intent {
    /// Whether rendering needs a resolved column; without one the template
    /// engine degrades to [`Intent::Fallback`].
    pub fn needs_column(&self) -> bool {
        matches!(
            self,
            Intent::NullCount
                | Intent::NullRows
                | Intent::TextLength(_)
                | Intent::DistinctCount
                | Intent::Statistic(_)
                | Intent::Superlative { .. }
        )
    }

    /// Answered from the schema alone, without running SQL.
    pub fn is_direct(&self) -> bool {
        matches!(self, Intent::ColumnListing | Intent::TableListing)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Intent::ColumnCount => "column_count",
            Intent::ColumnListing => "column_listing",
            Intent::TableListing => "table_listing",
            Intent::RowCount => "row_count",
            Intent::NullCount => "null_count",
            Intent::NullRows => "null_rows",
            Intent::TextLength(_) => "text_length",
            Intent::DistinctCount => "distinct_count",
            Intent::Statistic(_) => "statistic",
            Intent::Superlative { .. } => "superlative",
            Intent::ListAll => "list_all",
            Intent::Fallback => "fallback",
        };
        write!(f, "{}", label)
    }
}

const COLUMN_COUNT_PHRASES: &[&str] = &[
    "how many columns",
    "number of columns",
    "count columns",
    "count the columns",
    "column count",
];

const COLUMN_LISTING_PHRASES: &[&str] = &[
    "what are the columns",
    "what columns",
    "which columns",
    "list columns",
    "list the columns",
    "show columns",
    "show the columns",
    "show me the columns",
    "column names",
    "columns in",
    "describe table",
    "describe the",
];

const TABLE_LISTING_PHRASES: &[&str] = &[
    "what tables",
    "which tables",
    "list tables",
    "list the tables",
    "list all tables",
    "show tables",
    "show the tables",
    "show me the tables",
    "what are the tables",
    "tables in this database",
    "tables in the database",
    "table names",
];

const ROW_COUNT_PHRASES: &[&str] = &[
    "how many rows",
    "row count",
    "number of rows",
    "count rows",
    "count the rows",
    "how many records",
    "number of records",
    "total rows",
    "how many entries",
];

const NULL_WORDS: &[&str] = &["null", "nulls", "empty", "missing", "none"];
const COUNT_WORDS: &[&str] = &["how many", "count", "number of", "total"];

const DISTINCT_WORDS: &[&str] = &["unique", "distinct", "different"];

const SUPERLATIVE_DESC: &[&str] = &["highest", "max", "largest", "biggest"];
const SUPERLATIVE_ASC: &[&str] = &["lowest", "min", "smallest"];

lazy_static! {
    /// "how many <things> are there" counts rows unless <things> names
    /// something other than records.
    static ref HOW_MANY_THINGS: Regex =
        Regex::new(r"how many\s+(\w+)\s+(?:are there|exist|are in|do we have)").unwrap();

    static ref NOT_ROW_NOUNS: HashSet<&'static str> = [
        "null", "nulls", "empty", "missing", "values", "unique", "distinct",
        "different", "columns", "tables", "none", "words", "characters",
    ]
    .into_iter()
    .collect();

    static ref STATISTIC_KEYWORDS: Vec<(&'static str, Aggregate)> = vec![
        ("average", Aggregate::Avg),
        ("mean", Aggregate::Avg),
        ("avg", Aggregate::Avg),
        ("sum", Aggregate::Sum),
        ("total", Aggregate::Sum),
        ("minimum", Aggregate::Min),
        ("maximum", Aggregate::Max),
        // SQLite has no native support; approximated by the mean
        ("standard deviation", Aggregate::Avg),
        ("median", Aggregate::Avg),
        ("mode", Aggregate::Avg),
    ];
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IntentClassifier;

impl IntentClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, question: &str) -> Intent {
        let q = Question::new(question);

        if q.any(COLUMN_COUNT_PHRASES) {
            return Intent::ColumnCount;
        }
        if q.any(COLUMN_LISTING_PHRASES) || q.has("describe") {
            return Intent::ColumnListing;
        }
        if q.any(TABLE_LISTING_PHRASES) {
            return Intent::TableListing;
        }
        if q.any(ROW_COUNT_PHRASES) || q.asks_how_many_rows() {
            return Intent::RowCount;
        }
        if q.any(NULL_WORDS) {
            return if q.any(COUNT_WORDS) {
                Intent::NullCount
            } else {
                Intent::NullRows
            };
        }
        if let Some(measure) = q.text_measure() {
            return Intent::TextLength(measure);
        }
        if q.any(DISTINCT_WORDS) {
            return Intent::DistinctCount;
        }
        if let Some(agg) = STATISTIC_KEYWORDS
            .iter()
            .find(|(kw, _)| q.has(kw))
            .map(|(_, agg)| *agg)
        {
            return Intent::Statistic(agg);
        }
        if q.any(SUPERLATIVE_DESC) {
            return Intent::Superlative { descending: true };
        }
        if q.any(SUPERLATIVE_ASC) {
            return Intent::Superlative { descending: false };
        }
        if q.has("all") {
            return Intent::ListAll;
        }
        Intent::Fallback
    }
}

struct Question {
    text: String,
    words: HashSet<String>,
}

impl Question {
    fn new(question: &str) -> Self {
        let text = question.to_lowercase();
        let words = text
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();
        Self { text, words }
    }

    fn has(&self, keyword: &str) -> bool {
        if keyword.contains(' ') {
            self.text.contains(keyword)
        } else {
            self.words.contains(keyword)
        }
    }

    fn any(&self, keywords: &[&str]) -> bool {
        keywords.iter().any(|kw| self.has(kw))
    }

    fn asks_how_many_rows(&self) -> bool {
        if self.any(NULL_WORDS) {
            return false;
        }
        HOW_MANY_THINGS
            .captures(&self.text)
            .and_then(|caps| caps.get(1))
            .map_or(false, |noun| !NOT_ROW_NOUNS.contains(noun.as_str()))
    }

    fn text_measure(&self) -> Option<TextMeasure> {
        if self.has("longest") {
            Some(TextMeasure::Longest)
        } else if self.has("shortest") {
            Some(TextMeasure::Shortest)
        } else if self.any(&["word count", "number of words", "how many words"]) {
            Some(TextMeasure::WordCount)
        } else if self.any(&["character count", "number of characters", "how many characters"]) {
            Some(TextMeasure::CharCount)
        } else if self.has("length of") {
            Some(TextMeasure::AverageLength)
        } else {
            None
        }
    }
}

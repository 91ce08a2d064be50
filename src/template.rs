//! SQL Template Engine
//!
//! Renders one fixed SQL shape per [`Intent`]. Columns are always
//! double-quoted; tables are written bare unless they need quoting. Schema
//! questions that need no SQL come back as [`Translation::Direct`].

use crate::database::quote_identifier;
use crate::intent::{Intent, TextMeasure};
use crate::resolver::ResolutionContext;
use crate::schema_cache::SchemaMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Result column alias of each length measure, read back by the formatter.
pub const TEXT_LENGTH_ALIAS: &str = "text_length";
pub const CHAR_COUNT_ALIAS: &str = "char_count";
pub const WORD_COUNT_ALIAS: &str = "word_count";
pub const AVG_LENGTH_ALIAS: &str = "avg_length";

/// A rendered query and what produced it. Never mutated after rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedQuery {
    pub sql: String,
    pub intent: Intent,
    pub table: Option<String>,
    pub column: Option<String>,
}

impl GeneratedQuery {
    /// Wrap SQL that did not come from a template (LLM output, hand-written).
    pub fn foreign(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            intent: Intent::Fallback,
            table: None,
            column: None,
        }
    }

    pub fn is_templated(&self) -> bool {
        self.table.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Translation {
    Query(GeneratedQuery),
    Direct(String),
}

impl Translation {
    /// `(sql, direct_text)`: direct answers carry an empty SQL string.
    pub fn into_parts(self) -> (String, Option<String>) {
        match self {
            Translation::Query(q) => (q.sql, None),
            Translation::Direct(text) => (String::new(), Some(text)),
        }
    }

    pub fn query(&self) -> Option<&GeneratedQuery> {
        match self {
            Translation::Query(q) => Some(q),
            Translation::Direct(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TemplateEngine {
    default_table: String,
    result_limit: usize,
}

impl TemplateEngine {
    pub fn new(default_table: impl Into<String>, result_limit: usize) -> Self {
        Self {
            default_table: default_table.into(),
            result_limit,
        }
    }

    /// Render `intent` for the resolved names. Never fails: a missing table
    /// or column degrades to the fallback listing.
    pub fn render(&self, intent: Intent, ctx: &ResolutionContext, schema: &SchemaMap) -> Translation {
        if intent == Intent::TableListing {
            return Translation::Direct(table_listing(schema));
        }

        let table = match ctx.table.as_deref().and_then(|t| schema.canonical_name(t)) {
            Some(t) => t.to_string(),
            None => return Translation::Query(self.fallback(None, schema)),
        };
        let column = ctx.column.clone().filter(|c| schema.has_column(&table, c));
        if intent.needs_column() && column.is_none() {
            debug!("No column resolved for {} in {}, using fallback", intent, table);
            return Translation::Query(self.fallback(Some(&table), schema));
        }

        let t = table_reference(&table);
        let c = column.as_deref().map(quote_identifier).unwrap_or_default();
        let sql = match intent {
            Intent::ColumnListing => {
                let names = schema.columns(&table).iter().map(|c| c.name.as_str()).join(", ");
                return Translation::Direct(format!("Columns in {}: {}", table, names));
            }
            Intent::ColumnCount => format!(
                "SELECT COUNT(*) FROM pragma_table_info('{}')",
                table.replace('\'', "''")
            ),
            Intent::RowCount => format!("SELECT COUNT(*) FROM {}", t),
            Intent::NullCount => format!("SELECT COUNT(*) FROM {} WHERE {} IS NULL", t, c),
            Intent::NullRows => format!(
                "SELECT * FROM {} WHERE {} IS NULL LIMIT {}",
                t, c, self.result_limit
            ),
            Intent::TextLength(measure) => text_length_sql(measure, &t, &c),
            Intent::DistinctCount => format!("SELECT COUNT(DISTINCT {}) FROM {}", c, t),
            Intent::Statistic(agg) => format!("SELECT {}({}) FROM {}", agg.sql_function(), c, t),
            Intent::Superlative { descending } => format!(
                "SELECT * FROM {} ORDER BY {} {} LIMIT 1",
                t,
                c,
                if descending { "DESC" } else { "ASC" }
            ),
            Intent::ListAll => format!("SELECT * FROM {}", t),
            Intent::Fallback | Intent::TableListing => {
                return Translation::Query(self.fallback(Some(&table), schema))
            }
        };

        Translation::Query(GeneratedQuery {
            sql,
            intent,
            table: Some(table),
            column,
        })
    }

    fn fallback(&self, table: Option<&str>, schema: &SchemaMap) -> GeneratedQuery {
        let table = table
            .map(str::to_string)
            .unwrap_or_else(|| self.default_table_for(schema));
        GeneratedQuery {
            sql: format!("SELECT * FROM {} LIMIT {}", table_reference(&table), self.result_limit),
            intent: Intent::Fallback,
            table: Some(table),
            column: None,
        }
    }

    /// The configured default table, or the first cached table when the
    /// configured one is unknown.
    fn default_table_for(&self, schema: &SchemaMap) -> String {
        if let Some(name) = schema.canonical_name(&self.default_table) {
            return name.to_string();
        }
        schema
            .table_names()
            .next()
            .unwrap_or(self.default_table.as_str())
            .to_string()
    }
}

fn table_listing(schema: &SchemaMap) -> String {
    if schema.is_empty() {
        "There are no tables in the database.".to_string()
    } else {
        format!("Tables in the database: {}", schema.table_names().join(", "))
    }
}

fn text_length_sql(measure: TextMeasure, t: &str, c: &str) -> String {
    match measure {
        TextMeasure::Longest | TextMeasure::Shortest => format!(
            "SELECT {c}, LENGTH({c}) AS {alias} FROM {t} WHERE {c} IS NOT NULL ORDER BY {alias} {dir} LIMIT 1",
            c = c,
            t = t,
            alias = TEXT_LENGTH_ALIAS,
            dir = if measure == TextMeasure::Longest { "DESC" } else { "ASC" },
        ),
        TextMeasure::CharCount => format!("SELECT SUM(LENGTH({})) AS {} FROM {}", c, CHAR_COUNT_ALIAS, t),
        TextMeasure::WordCount => format!(
            "SELECT SUM(LENGTH(TRIM({c})) - LENGTH(REPLACE(TRIM({c}), ' ', '')) + 1) AS {alias} FROM {t} WHERE TRIM({c}) != ''",
            c = c,
            t = t,
            alias = WORD_COUNT_ALIAS,
        ),
        TextMeasure::AverageLength => format!("SELECT AVG(LENGTH({})) AS {} FROM {}", c, AVG_LENGTH_ALIAS, t),
    }
}

/// Bare name for plain identifiers, quoted otherwise.
pub fn table_reference(table: &str) -> String {
    let plain = table
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        table.to_string()
    } else {
        quote_identifier(table)
    }
}

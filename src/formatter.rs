//! Result Formatter
//!
//! Turns an executed result set into a sentence for scalar intents, or a row
//! count plus a plain-text table for listings.
//!
//! Templated queries carry their intent and resolved names, so nothing is
//! re-derived from SQL. Foreign SQL (LLM output, hand-written queries) goes
//! through [`ResultFormatter::format_sql`], which infers the same information
//! from the SQL text and falls back to a row dump whenever the result does not
//! have the expected scalar shape.

use crate::database::ResultSet;
use crate::intent::{Aggregate, Intent, TextMeasure};
use crate::template::{
    GeneratedQuery, AVG_LENGTH_ALIAS, CHAR_COUNT_ALIAS, TEXT_LENGTH_ALIAS, WORD_COUNT_ALIAS,
};
use itertools::Itertools;
use serde_json::Value;

pub const NO_RESULTS: &str = "No results found.";

#[derive(Debug, Default, Clone, Copy)]
pub struct ResultFormatter;

impl ResultFormatter {
    pub fn new() -> Self {
        Self
    }

    pub fn format(&self, query: &GeneratedQuery, rs: &ResultSet) -> String {
        if !query.is_templated() {
            return self.format_sql(&query.sql, rs);
        }
        let table = query.table.as_deref().unwrap_or_default();
        let column = query.column.as_deref().unwrap_or_default();
        describe(query.intent, table, column, rs).unwrap_or_else(|| format_rows(rs))
    }

    /// Format the result of SQL that did not come from a template.
    pub fn format_sql(&self, sql: &str, rs: &ResultSet) -> String {
        let (intent, table, column) = infer_intent(sql, rs);
        describe(intent, &table, &column, rs).unwrap_or_else(|| format_rows(rs))
    }
}

/// Sentence for scalar intents, `None` for listings or an unexpected shape.
fn describe(intent: Intent, table: &str, column: &str, rs: &ResultSet) -> Option<String> {
    if let Intent::TextLength(measure @ (TextMeasure::Longest | TextMeasure::Shortest)) = intent {
        let row = single_row(rs, 2)?;
        let length = rs.column_index(TEXT_LENGTH_ALIAS).unwrap_or(1);
        let value_idx = if length == 0 { 1 } else { 0 };
        let adjective = if measure == TextMeasure::Longest { "longest" } else { "shortest" };
        return Some(format!(
            "The {} {} in {} is \"{}\" with {} characters.",
            adjective,
            column,
            table,
            render_value(&row[value_idx]),
            render_value(&row[length])
        ));
    }

    let scalar_intent = matches!(
        intent,
        Intent::RowCount
            | Intent::ColumnCount
            | Intent::NullCount
            | Intent::DistinctCount
            | Intent::Statistic(_)
            | Intent::TextLength(_)
    );
    if !scalar_intent {
        return None;
    }
    let value = render_value(&single_row(rs, 1)?[0]);

    let sentence = match intent {
        Intent::NullCount => format!(
            "There are {} null values in the {} column of the {} table.",
            value, column, table
        ),
        Intent::ColumnCount => format!("{} table has {} columns.", table, value),
        Intent::RowCount => format!("There are {} rows in {}.", value, table),
        Intent::DistinctCount => format!("There are {} unique values in {} in {}.", value, column, table),
        Intent::Statistic(Aggregate::Max) => format!("The maximum value of {} in {} is {}.", column, table, value),
        Intent::Statistic(Aggregate::Min) => format!("The minimum value of {} in {} is {}.", column, table, value),
        Intent::Statistic(Aggregate::Avg) => format!("The average value of {} in {} is {}.", column, table, value),
        Intent::Statistic(Aggregate::Sum) => format!("The sum of {} in {} is {}.", column, table, value),
        Intent::TextLength(TextMeasure::CharCount) => format!(
            "The {} column in {} contains {} characters in total.",
            column, table, value
        ),
        Intent::TextLength(TextMeasure::WordCount) => format!(
            "The {} column in {} contains {} words in total.",
            column, table, value
        ),
        Intent::TextLength(_) => format!(
            "The average length of {} in {} is {} characters.",
            column, table, value
        ),
        _ => return None,
    };
    Some(sentence)
}

fn single_row(rs: &ResultSet, width: usize) -> Option<&[Value]> {
    if rs.rows.len() != 1 || rs.columns.len() != width {
        return None;
    }
    rs.rows.first().map(Vec::as_slice)
}

/// "No results found.", or a row count followed by a plain-text table.
pub fn format_rows(rs: &ResultSet) -> String {
    match rs.len() {
        0 => NO_RESULTS.to_string(),
        1 => format!("1 row found:\n{}", render_table(rs)),
        n => format!("{} rows found:\n{}", n, render_table(rs)),
    }
}

pub fn render_table(rs: &ResultSet) -> String {
    let cells: Vec<Vec<String>> = rs
        .rows
        .iter()
        .map(|row| row.iter().map(render_value).collect())
        .collect();
    let widths: Vec<usize> = rs
        .columns
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            cells
                .iter()
                .filter_map(|row| row.get(idx))
                .map(|cell| cell.chars().count())
                .chain(std::iter::once(name.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let pad = |text: &str, width: usize| format!("{:<width$}", text, width = width);
    let header = rs
        .columns
        .iter()
        .zip(&widths)
        .map(|(name, w)| pad(name.as_str(), *w))
        .join(" | ");
    let rule = widths.iter().map(|w| "-".repeat(*w)).join("-+-");
    let body = cells
        .iter()
        .map(|row| row.iter().zip(&widths).map(|(cell, w)| pad(cell.as_str(), *w)).join(" | "))
        .join("\n");
    format!("{}\n{}\n{}", header.trim_end(), rule, body)
        .lines()
        .map(str::trim_end)
        .join("\n")
}

/// Integers as-is, floats to two decimals (or two significant digits when
/// smaller than one), NULL spelled out.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            (None, Some(f)) => {
                let magnitude = f.abs().log10().floor() as i32;
                let decimals = (1 - magnitude).clamp(2, 15) as usize;
                let s = format!("{:.*}", decimals, f);
                s.trim_end_matches('0').trim_end_matches('.').to_string()
            }
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Best-effort intent and names for SQL without a template behind it.
fn infer_intent(sql: &str, rs: &ResultSet) -> (Intent, String, String) {
    let upper = sql.to_ascii_uppercase();
    let table = table_after_from(sql).unwrap_or_default();

    for (alias, measure) in [
        (TEXT_LENGTH_ALIAS, None),
        (CHAR_COUNT_ALIAS, Some(TextMeasure::CharCount)),
        (WORD_COUNT_ALIAS, Some(TextMeasure::WordCount)),
        (AVG_LENGTH_ALIAS, Some(TextMeasure::AverageLength)),
    ] {
        if rs.column_index(alias).is_none() {
            continue;
        }
        let measure = measure.unwrap_or(if upper.contains(" DESC") {
            TextMeasure::Longest
        } else {
            TextMeasure::Shortest
        });
        let column = args_of(sql, "LENGTH(").unwrap_or_default();
        return (Intent::TextLength(measure), table, column);
    }

    if upper.contains("COUNT(*)") && upper.contains("IS NULL") {
        return (Intent::NullCount, table, column_before_is_null(sql).unwrap_or_default());
    }
    if upper.contains("PRAGMA_TABLE_INFO(") {
        let target = args_of(sql, "pragma_table_info(").unwrap_or_default();
        return (Intent::ColumnCount, target, String::new());
    }
    if upper.contains("COUNT(DISTINCT") {
        let column = args_of(sql, "COUNT(")
            .map(|arg| strip_quotes(arg.trim_start_matches(|c: char| c.is_alphabetic()).trim()))
            .unwrap_or_default();
        return (Intent::DistinctCount, table, column);
    }
    if upper.contains("COUNT(*)") {
        return (Intent::RowCount, table, String::new());
    }
    for agg in [Aggregate::Max, Aggregate::Min, Aggregate::Avg, Aggregate::Sum] {
        let call = format!("{}(", agg.sql_function());
        if upper.contains(&call) {
            let column = args_of(sql, &call).unwrap_or_default();
            return (Intent::Statistic(agg), table, column);
        }
    }
    (Intent::Fallback, table, String::new())
}

fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    haystack.to_ascii_uppercase().find(&needle.to_ascii_uppercase())
}

fn table_after_from(sql: &str) -> Option<String> {
    let start = find_ci(sql, " FROM ")? + " FROM ".len();
    let rest = sql[start..].trim_start();
    let name = if let Some(quoted) = rest.strip_prefix('"') {
        quoted.split('"').next()?
    } else {
        rest.split(|c: char| c.is_whitespace() || c == ';' || c == '(' || c == ',')
            .next()?
    };
    Some(name.to_string()).filter(|n| !n.is_empty())
}

/// Text inside the first `call(...)`, quotes removed.
fn args_of(sql: &str, call: &str) -> Option<String> {
    let start = find_ci(sql, call)? + call.len();
    let mut depth = 1usize;
    for (offset, ch) in sql[start..].char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(strip_quotes(sql[start..start + offset].trim()));
                }
            }
            _ => {}
        }
    }
    None
}

fn column_before_is_null(sql: &str) -> Option<String> {
    let start = find_ci(sql, " WHERE ")? + " WHERE ".len();
    let end = find_ci(sql, " IS NULL")?;
    (end > start).then(|| strip_quotes(sql[start..end].trim()))
}

fn strip_quotes(text: &str) -> String {
    text.trim_matches(|c| c == '"' || c == '\'' || c == '`').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rs(columns: &[&str], rows: Vec<Vec<Value>>) -> ResultSet {
        ResultSet {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    fn templated(intent: Intent, column: Option<&str>) -> GeneratedQuery {
        GeneratedQuery {
            sql: String::new(),
            intent,
            table: Some("kettlepump".into()),
            column: column.map(str::to_string),
        }
    }

    #[test]
    fn test_scalar_sentences() {
        let f = ResultFormatter::new();
        let one = |v: Value| rs(&["x"], vec![vec![v]]);
        assert_eq!(
            f.format(&templated(Intent::NullCount, Some("Button Down")), &one(json!(3))),
            "There are 3 null values in the Button Down column of the kettlepump table."
        );
        assert_eq!(
            f.format(&templated(Intent::ColumnCount, None), &one(json!(5))),
            "kettlepump table has 5 columns."
        );
        assert_eq!(
            f.format(&templated(Intent::RowCount, None), &one(json!(120))),
            "There are 120 rows in kettlepump."
        );
        assert_eq!(
            f.format(&templated(Intent::Statistic(Aggregate::Max), Some("Voltage")), &one(json!(231.5))),
            "The maximum value of Voltage in kettlepump is 231.5."
        );
        assert_eq!(
            f.format(&templated(Intent::Statistic(Aggregate::Avg), Some("Voltage")), &one(json!(2.0 / 3.0))),
            "The average value of Voltage in kettlepump is 0.67."
        );
        assert_eq!(
            f.format(&templated(Intent::DistinctCount, Some("stopped")), &one(json!(2))),
            "There are 2 unique values in stopped in kettlepump."
        );
    }

    #[test]
    fn test_text_length_sentences() {
        let f = ResultFormatter::new();
        let longest = rs(&["name", "text_length"], vec![vec![json!("Charlie"), json!(7)]]);
        let q = GeneratedQuery {
            sql: String::new(),
            intent: Intent::TextLength(TextMeasure::Longest),
            table: Some("users".into()),
            column: Some("name".into()),
        };
        assert_eq!(f.format(&q, &longest), "The longest name in users is \"Charlie\" with 7 characters.");

        let words = rs(&["word_count"], vec![vec![json!(12)]]);
        let q = GeneratedQuery {
            intent: Intent::TextLength(TextMeasure::WordCount),
            ..q
        };
        assert_eq!(f.format(&q, &words), "The name column in users contains 12 words in total.");
    }

    #[test]
    fn test_row_listings() {
        let f = ResultFormatter::new();
        let q = templated(Intent::ListAll, None);
        assert_eq!(f.format(&q, &rs(&["a"], vec![])), NO_RESULTS);

        let single = f.format(&q, &rs(&["id", "name"], vec![vec![json!(1), json!("Alice")]]));
        assert_eq!(single, "1 row found:\nid | name\n---+------\n1  | Alice");

        let many = f.format(
            &q,
            &rs(&["id", "name"], vec![vec![json!(1), json!("Alice")], vec![json!(2), Value::Null]]),
        );
        assert!(many.starts_with("2 rows found:\n"));
        assert!(many.ends_with("2  | NULL"));
    }

    #[test]
    fn test_unexpected_shape_dumps_rows() {
        let f = ResultFormatter::new();
        let grouped = rs(&["name", "n"], vec![vec![json!("a"), json!(1)], vec![json!("b"), json!(2)]]);
        let out = f.format(&templated(Intent::RowCount, None), &grouped);
        assert!(out.starts_with("2 rows found:"));
    }

    #[test]
    fn test_foreign_sql_inference() {
        let f = ResultFormatter::new();
        let one = |v: Value| rs(&["x"], vec![vec![v]]);
        assert_eq!(
            f.format_sql("SELECT COUNT(*) FROM kettlepump WHERE \"Button Down\" IS NULL", &one(json!(4))),
            "There are 4 null values in the Button Down column of the kettlepump table."
        );
        assert_eq!(
            f.format_sql("SELECT COUNT(*) FROM pragma_table_info('users')", &one(json!(3))),
            "users table has 3 columns."
        );
        assert_eq!(
            f.format_sql("SELECT COUNT(DISTINCT \"name\") FROM users", &one(json!(3))),
            "There are 3 unique values in name in users."
        );
        assert_eq!(
            f.format_sql("SELECT COUNT(*) FROM users;", &one(json!(3))),
            "There are 3 rows in users."
        );
        assert_eq!(
            f.format_sql("select avg(age) from users", &one(json!(31.0))),
            "The average value of age in users is 31."
        );
        assert_eq!(
            f.format_sql("SELECT MIN(\"age\") FROM users", &one(json!(28))),
            "The minimum value of age in users is 28."
        );
        // foreign GeneratedQuery goes the same way
        assert_eq!(
            f.format(&GeneratedQuery::foreign("SELECT SUM(age) FROM users"), &one(json!(62))),
            "The sum of age in users is 62."
        );
    }

    #[test]
    fn test_render_value() {
        assert_eq!(render_value(&json!(31.0)), "31");
        assert_eq!(render_value(&json!(31.256)), "31.26");
        assert_eq!(render_value(&json!(0.5)), "0.5");
        assert_eq!(render_value(&json!(0.004)), "0.004");
        assert_eq!(render_value(&json!(-0.000123)), "-0.00012");
        assert_eq!(render_value(&json!(0.6666)), "0.67");
        assert_eq!(render_value(&json!(-4)), "-4");
        assert_eq!(render_value(&Value::Null), "NULL");
        assert_eq!(render_value(&json!("x")), "x");
    }
}

//! Query Validator
//!
//! Gate between a candidate SQL string and the engine. Rules run in order and
//! the first failure rejects:
//! 1. blunt substring denylist on the lower-cased text
//! 2. must start with `select`
//! 3. every FROM/JOIN target must be a cached table
//! 4. projected expressions naming an aggregate function are not column-checked
//! 5. every other projected identifier must be a column of a referenced table
//!
//! Rules 2-5 work on tokens from the sqlparser tokenizer, so quoted identifiers
//! stay atomic and commas inside quotes or parentheses never split the
//! projection list.

use crate::schema_cache::SchemaMap;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, Tokenizer, Word};
use std::fmt;
use tracing::debug;

pub const DENYLIST: [&str; 7] = ["drop", "delete", "alter", "update", "insert", "create", "truncate"];

pub const AGGREGATES: [&str; 5] = ["count", "sum", "avg", "min", "max"];

const PRAGMA_TABLE_INFO: &str = "pragma_table_info";
const PRAGMA_COLUMNS: [&str; 6] = ["cid", "name", "type", "notnull", "dflt_value", "pk"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Denylisted(String),
    NotSelect,
    MultipleStatements,
    UnknownTable(String),
    UnknownColumn(String),
    Unparseable(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Denylisted(kw) => write!(f, "contains forbidden keyword '{}'", kw),
            Rejection::NotSelect => write!(f, "only SELECT statements are allowed"),
            Rejection::MultipleStatements => write!(f, "only a single statement is allowed"),
            Rejection::UnknownTable(t) => write!(f, "unknown table '{}'", t),
            Rejection::UnknownColumn(c) => write!(f, "unknown column '{}'", c),
            Rejection::Unparseable(msg) => write!(f, "could not tokenize query: {}", msg),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct QueryValidator;

impl QueryValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, sql: &str, schema: &SchemaMap) -> bool {
        match self.check(sql, schema) {
            Ok(()) => true,
            Err(rejection) => {
                debug!("Rejected query {:?}: {}", sql, rejection);
                false
            }
        }
    }

    pub fn check(&self, sql: &str, schema: &SchemaMap) -> Result<(), Rejection> {
        let lowered = sql.to_lowercase();
        if let Some(kw) = DENYLIST.iter().find(|kw| lowered.contains(*kw)) {
            return Err(Rejection::Denylisted(kw.to_string()));
        }
        if !lowered.trim().starts_with("select") {
            return Err(Rejection::NotSelect);
        }

        let dialect = SQLiteDialect {};
        let tokens: Vec<Token> = Tokenizer::new(&dialect, sql)
            .tokenize()
            .map_err(|e| Rejection::Unparseable(e.to_string()))?
            .into_iter()
            .filter(|t| !matches!(t, Token::Whitespace(_) | Token::EOF))
            .collect();

        if !matches!(tokens.first(), Some(Token::Word(w)) if w.keyword == Keyword::SELECT) {
            return Err(Rejection::NotSelect);
        }
        if let Some(semi) = tokens.iter().position(|t| *t == Token::SemiColon) {
            if tokens[semi..].iter().any(|t| *t != Token::SemiColon) {
                return Err(Rejection::MultipleStatements);
            }
        }

        let sources = extract_sources(&tokens, schema)?;
        check_projection(&tokens, &sources, schema)
    }
}

/// Tables a query reads from, in their cached spelling.
#[derive(Debug, Default)]
struct Sources {
    tables: Vec<String>,
    has_pragma: bool,
}

fn is_keyword(token: Option<&Token>, keyword: Keyword) -> bool {
    matches!(token, Some(Token::Word(w)) if w.keyword == keyword && w.quote_style.is_none())
}

fn as_identifier(token: Option<&Token>) -> Option<&Word> {
    match token {
        Some(Token::Word(w)) if w.quote_style.is_some() || w.keyword == Keyword::NoKeyword => Some(w),
        _ => None,
    }
}

fn extract_sources(tokens: &[Token], schema: &SchemaMap) -> Result<Sources, Rejection> {
    let mut sources = Sources::default();
    let mut i = 0;
    while i < tokens.len() {
        let starts_source = is_keyword(tokens.get(i), Keyword::FROM) || is_keyword(tokens.get(i), Keyword::JOIN);
        if !starts_source {
            i += 1;
            continue;
        }
        i += 1;
        loop {
            let name = match tokens.get(i) {
                Some(Token::Word(w)) => w.value.clone(),
                // subquery or nothing: the inner FROM is checked on its own
                _ => break,
            };
            i += 1;

            if tokens.get(i) == Some(&Token::LParen) {
                // table-valued function; only the column pragma is allowed
                let arg = match tokens.get(i + 1) {
                    Some(Token::SingleQuotedString(s)) => Some(s.as_str()),
                    _ => None,
                };
                match arg {
                    Some(table) if name.eq_ignore_ascii_case(PRAGMA_TABLE_INFO) && schema.contains_table(table) => {
                        sources.has_pragma = true;
                    }
                    _ => return Err(Rejection::UnknownTable(name)),
                }
                while i < tokens.len() && tokens[i] != Token::RParen {
                    i += 1;
                }
                i += 1;
            } else {
                // schema-qualified name: keep the last part
                let mut table = name;
                while tokens.get(i) == Some(&Token::Period) {
                    match tokens.get(i + 1) {
                        Some(Token::Word(w)) => {
                            table = w.value.clone();
                            i += 2;
                        }
                        _ => break,
                    }
                }
                match schema.canonical_name(&table) {
                    Some(canonical) => sources.tables.push(canonical.to_string()),
                    None => return Err(Rejection::UnknownTable(table)),
                }
            }

            // optional alias
            if is_keyword(tokens.get(i), Keyword::AS) {
                i += 2;
            } else if as_identifier(tokens.get(i)).is_some() {
                i += 1;
            }

            if tokens.get(i) == Some(&Token::Comma) {
                i += 1;
                continue;
            }
            break;
        }
    }
    Ok(sources)
}

/// Tokens between SELECT and the first top-level FROM, split on top-level commas.
fn projection_items(tokens: &[Token]) -> Vec<&[Token]> {
    let mut start = 1;
    if is_keyword(tokens.get(start), Keyword::DISTINCT) || is_keyword(tokens.get(start), Keyword::ALL) {
        start += 1;
    }

    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut item_start = start;
    let mut end = tokens.len();
    for (idx, token) in tokens.iter().enumerate().skip(start) {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            Token::Comma if depth == 0 => {
                items.push(&tokens[item_start..idx]);
                item_start = idx + 1;
            }
            Token::SemiColon if depth == 0 => {
                end = idx;
                break;
            }
            Token::Word(w) if depth == 0 && w.keyword == Keyword::FROM && w.quote_style.is_none() => {
                end = idx;
                break;
            }
            _ => {}
        }
    }
    if item_start < end {
        items.push(&tokens[item_start..end]);
    }
    items
}

fn check_projection(tokens: &[Token], sources: &Sources, schema: &SchemaMap) -> Result<(), Rejection> {
    for item in projection_items(tokens) {
        let text = item.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(" ").to_lowercase();
        if AGGREGATES.iter().any(|agg| text.contains(agg)) {
            continue;
        }

        let item = strip_alias(item);
        match item {
            [] => continue,
            [Token::Mul] => continue,
            [Token::Word(w)] => require_column(&w.value, sources, schema)?,
            [Token::DoubleQuotedString(name)] => require_column(name, sources, schema)?,
            _ => {
                for (idx, token) in item.iter().enumerate() {
                    let word = match as_identifier(Some(token)) {
                        Some(w) => w,
                        None => continue,
                    };
                    let next = item.get(idx + 1);
                    // function names and table qualifiers are not columns
                    if next == Some(&Token::LParen) || next == Some(&Token::Period) {
                        continue;
                    }
                    require_column(&word.value, sources, schema)?;
                }
            }
        }
    }
    Ok(())
}

/// Drop a trailing `AS alias` or bare `alias`.
fn strip_alias(item: &[Token]) -> &[Token] {
    let len = item.len();
    if len >= 3 && is_keyword(item.get(len - 2), Keyword::AS) {
        return &item[..len - 2];
    }
    if len >= 2 && as_identifier(item.last()).is_some() && ends_expression(&item[len - 2]) {
        return &item[..len - 1];
    }
    item
}

fn ends_expression(token: &Token) -> bool {
    match token {
        Token::RParen | Token::Number(..) | Token::SingleQuotedString(_) | Token::DoubleQuotedString(_) => true,
        Token::Word(_) => as_identifier(Some(token)).is_some(),
        _ => false,
    }
}

fn require_column(column: &str, sources: &Sources, schema: &SchemaMap) -> Result<(), Rejection> {
    if column == "*" {
        return Ok(());
    }
    if sources.tables.iter().any(|t| schema.has_column(t, column)) {
        return Ok(());
    }
    if sources.has_pragma && PRAGMA_COLUMNS.iter().any(|c| c.eq_ignore_ascii_case(column)) {
        return Ok(());
    }
    Err(Rejection::UnknownColumn(column.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_cache::ColumnDescriptor;

    fn schema() -> SchemaMap {
        let mut schema = SchemaMap::new();
        schema.insert(
            "users",
            vec![
                ColumnDescriptor::new("id", "INTEGER"),
                ColumnDescriptor::new("name", "TEXT"),
                ColumnDescriptor::new("age", "INTEGER"),
            ],
        );
        schema.insert(
            "kettlepump",
            vec![
                ColumnDescriptor::new("Timestamp", "TEXT"),
                ColumnDescriptor::new("Button Down", "INTEGER"),
                ColumnDescriptor::new("AC Current (A) [SN-4471]", "REAL"),
            ],
        );
        schema.insert("t", vec![ColumnDescriptor::new("A, B", "TEXT")]);
        schema
    }

    #[test]
    fn test_valid_queries() {
        let v = QueryValidator::new();
        let s = schema();
        for sql in [
            "SELECT * FROM users",
            "SELECT name FROM users WHERE age > 30",
            "SELECT COUNT(*) FROM users",
            "SELECT AVG(age) FROM users",
            "SELECT name, age FROM users ORDER BY age",
            "select * from users;",
            "SELECT AVG(\"age\") FROM users",
            "SELECT * FROM kettlepump ORDER BY \"Button Down\" DESC LIMIT 1",
        ] {
            assert!(v.validate(sql, &s), "Query should be valid: {}", sql);
        }
    }

    #[test]
    fn test_invalid_queries() {
        let v = QueryValidator::new();
        let s = schema();
        for sql in [
            "DROP TABLE users",
            "DELETE FROM users",
            "UPDATE users SET age = 30",
            "SELECT * FROM non_existent_table",
            "SELECT invalid_column FROM users",
        ] {
            assert!(!v.validate(sql, &s), "Query should be invalid: {}", sql);
        }
    }

    #[test]
    fn test_denylist_is_substring_and_case_insensitive() {
        let v = QueryValidator::new();
        let s = schema();
        assert_eq!(
            v.check("SELECT * FROM users WHERE name = 'Drop Zone'", &s),
            Err(Rejection::Denylisted("drop".into()))
        );
        // false positive accepted as the safe default
        assert!(!v.validate("SELECT created_at FROM users", &s));
        for kw in DENYLIST {
            let sql = format!("SELECT * FROM users -- {}", kw.to_uppercase());
            assert!(!v.validate(&sql, &s));
        }
    }

    #[test]
    fn test_must_start_with_select() {
        let v = QueryValidator::new();
        let s = schema();
        assert_eq!(v.check("  WITH x AS (SELECT 1) SELECT * FROM x", &s), Err(Rejection::NotSelect));
        assert_eq!(v.check("PRAGMA table_info(users)", &s), Err(Rejection::NotSelect));
        assert!(v.validate("   SELECT * FROM users", &s));
    }

    #[test]
    fn test_single_statement_only() {
        let v = QueryValidator::new();
        let s = schema();
        assert_eq!(
            v.check("SELECT * FROM users; SELECT * FROM t", &s),
            Err(Rejection::MultipleStatements)
        );
    }

    #[test]
    fn test_unknown_table() {
        let v = QueryValidator::new();
        let s = schema();
        assert!(v.validate("SELECT * FROM users", &s));
        assert_eq!(
            v.check("SELECT * FROM ghost", &s),
            Err(Rejection::UnknownTable("ghost".into()))
        );
        assert!(!v.validate("SELECT * FROM users JOIN ghost ON users.id = ghost.id", &s));
        assert!(v.validate("SELECT * FROM Users", &s));
    }

    #[test]
    fn test_quoted_columns() {
        let v = QueryValidator::new();
        let s = schema();
        assert!(v.validate("SELECT \"Button Down\" FROM kettlepump", &s));
        assert!(!v.validate("SELECT \"Button Up\" FROM kettlepump", &s));
        assert!(v.validate("SELECT \"A, B\" FROM t", &s));
        assert!(!v.validate("SELECT \"A\" FROM t", &s));
        assert!(v.validate("SELECT \"AC Current (A) [SN-4471]\", \"Timestamp\" FROM kettlepump", &s));
    }

    #[test]
    fn test_expressions_are_checked_structurally() {
        let v = QueryValidator::new();
        let s = schema();
        assert!(v.validate(
            "SELECT \"name\", LENGTH(\"name\") AS text_length FROM users ORDER BY text_length DESC LIMIT 1",
            &s
        ));
        assert!(!v.validate("SELECT LENGTH(\"nickname\") AS text_length FROM users", &s));
        assert!(v.validate("SELECT users.name FROM users", &s));
    }

    #[test]
    fn test_alias_without_as() {
        let v = QueryValidator::new();
        let s = schema();
        assert!(v.validate("SELECT name nm FROM users", &s));
        assert!(v.validate("SELECT LENGTH(name) name_len, age FROM users", &s));
        assert!(v.validate("SELECT \"Button Down\" pressed FROM kettlepump", &s));
        assert_eq!(
            v.check("SELECT nickname nm FROM users", &s),
            Err(Rejection::UnknownColumn("nickname".into()))
        );
    }

    #[test]
    fn test_aggregates_skip_column_checks() {
        let v = QueryValidator::new();
        let s = schema();
        assert!(v.validate("SELECT COUNT(DISTINCT \"nickname\") FROM users", &s));
        assert!(v.validate("SELECT MAX(whatever) FROM users", &s));
    }

    #[test]
    fn test_column_pragma() {
        let v = QueryValidator::new();
        let s = schema();
        assert!(v.validate("SELECT COUNT(*) FROM pragma_table_info('kettlepump')", &s));
        assert!(v.validate("SELECT name FROM pragma_table_info('users')", &s));
        assert!(!v.validate("SELECT COUNT(*) FROM pragma_table_info('ghost')", &s));
        assert!(!v.validate("SELECT * FROM json_each('[1]')", &s));
    }
}

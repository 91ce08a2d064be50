//! SQLite engine wrapper
//!
//! The only place that talks to rusqlite. Exposes the table catalog, per-table
//! column metadata and single-statement execution into a [`ResultSet`].

use crate::error::{Result, SqlRagError};
use crate::schema_cache::ColumnDescriptor;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Rows returned by a query, cells already converted to JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// First cell of the first row, the shape of every aggregate template.
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }
}

pub struct Database {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)
            .map_err(|e| SqlRagError::Database(format!("Failed to open {}: {}", path.display(), e)))?;
        info!("Opened SQLite database at {}", path.display());
        Ok(Self {
            path: Some(path),
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SqlRagError::Database("connection lock poisoned".to_string()))
    }

    /// User tables, sorted by name. SQLite's internal tables are skipped.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tables)
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self
            .list_tables()?
            .iter()
            .any(|t| t.eq_ignore_ascii_case(table)))
    }

    /// Column metadata from `PRAGMA table_info`, in declaration order.
    pub fn table_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let conn = self.lock()?;
        let sql = format!("PRAGMA table_info({})", quote_identifier(table));
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut columns = Vec::new();
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            let data_type: String = row.get::<_, Option<String>>(2)?.unwrap_or_default();
            let not_null: i64 = row.get(3)?;
            let default = match row.get_ref(4)? {
                ValueRef::Null => None,
                other => Some(value_ref_to_string(other)),
            };
            let pk: i64 = row.get(5)?;
            columns.push(
                ColumnDescriptor::new(name, data_type)
                    .with_primary_key(pk > 0)
                    .with_not_null(not_null != 0)
                    .with_default(default),
            );
        }
        debug!("Introspected {} columns for table {}", columns.len(), table);
        Ok(columns)
    }

    /// Run one statement and collect every row.
    pub fn query(&self, sql: &str) -> Result<ResultSet> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(width);
            for idx in 0..width {
                cells.push(value_ref_to_json(row.get_ref(idx)?));
            }
            out.push(cells);
        }
        Ok(ResultSet { columns, rows: out })
    }

    /// Setup and maintenance only; the question path goes through [`Database::query`].
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    pub fn drop_table(&self, table: &str) -> Result<()> {
        if !self.table_exists(table)? {
            return Err(SqlRagError::Database(format!("Table '{}' does not exist", table)));
        }
        let conn = self.lock()?;
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_identifier(table)))?;
        info!("Dropped table {}", table);
        Ok(())
    }
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn value_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}

fn value_ref_to_string(value: ValueRef<'_>) -> String {
    match value_ref_to_json(value) {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.execute_batch(
            r#"
            CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER DEFAULT 18);
            INSERT INTO users (name, age) VALUES ('Alice', 28), ('Bob', 34), ('Charlie', NULL);
            "#,
        )
        .unwrap();
        db
    }

    #[test]
    fn test_list_tables_skips_internal() {
        let db = sample_db();
        db.execute_batch("CREATE TABLE log (id INTEGER PRIMARY KEY AUTOINCREMENT, msg TEXT)")
            .unwrap();
        // AUTOINCREMENT creates sqlite_sequence
        assert_eq!(db.list_tables().unwrap(), vec!["log", "users"]);
    }

    #[test]
    fn test_table_columns() {
        let db = sample_db();
        let cols = db.table_columns("users").unwrap();
        assert_eq!(cols.len(), 3);
        assert_eq!(cols[0].name, "id");
        assert!(cols[0].primary_key);
        assert!(cols[1].not_null);
        assert_eq!(cols[2].default.as_deref(), Some("18"));
        assert_eq!(cols[2].data_type, "INTEGER");
    }

    #[test]
    fn test_query_converts_cells() {
        let db = sample_db();
        let rs = db.query("SELECT name, age FROM users ORDER BY id").unwrap();
        assert_eq!(rs.columns, vec!["name", "age"]);
        assert_eq!(rs.len(), 3);
        assert_eq!(rs.rows[0][0], Value::from("Alice"));
        assert_eq!(rs.rows[2][1], Value::Null);

        let avg = db.query("SELECT AVG(age) FROM users").unwrap();
        assert_eq!(avg.scalar().and_then(|v| v.as_f64()), Some(31.0));
    }

    #[test]
    fn test_drop_table() {
        let db = sample_db();
        db.drop_table("users").unwrap();
        assert!(db.list_tables().unwrap().is_empty());
        assert!(db.drop_table("users").is_err());
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("Button Down"), "\"Button Down\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}

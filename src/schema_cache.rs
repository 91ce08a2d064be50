//! Schema Cache
//!
//! In-memory map of table name to column descriptors, persisted wholesale to a
//! JSON document. The live database is the source of truth: reconciliation
//! purges tables that no longer exist and picks up ones the cache has not
//! seen, and every mutation is written back.
//!
//! Three persisted shapes are accepted when reading:
//! - legacy: `{"users": {"age": "INTEGER"}}`
//! - structured: `{"users": {"age": {"type": "INTEGER", "primary_key": false, ...}}}`
//! - table document: `{"users": {"table_name": "users", "columns": [{"name": "age", "type": "INTEGER"}]}}`
//!
//! Writes always use the structured shape.

use crate::database::Database;
use crate::error::{Result, SqlRagError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// One column of a cached table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub primary_key: bool,
    pub not_null: bool,
    pub default: Option<String>,
    /// How the column should be written in example SQL.
    pub example_query: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        let name = name.into();
        let example_query = Self::example_reference(&name);
        Self {
            name,
            data_type: data_type.into(),
            primary_key: false,
            not_null: false,
            default: None,
            example_query,
            description: None,
        }
    }

    pub fn with_primary_key(mut self, primary_key: bool) -> Self {
        self.primary_key = primary_key;
        self
    }

    pub fn with_not_null(mut self, not_null: bool) -> Self {
        self.not_null = not_null;
        self
    }

    pub fn with_default(mut self, default: Option<String>) -> Self {
        self.default = default;
        self
    }

    /// Column name wrapped in double quotes when it contains whitespace or
    /// punctuation, bare otherwise.
    pub fn example_reference(name: &str) -> String {
        let needs_quotes = name
            .chars()
            .any(|c| c.is_whitespace() || (c.is_ascii_punctuation() && c != '_'));
        if needs_quotes {
            format!("\"{}\"", name)
        } else {
            name.to_string()
        }
    }
}

/// Table name -> columns. Lookups are case-insensitive, iteration is by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaMap {
    tables: BTreeMap<String, Vec<ColumnDescriptor>>,
}

impl SchemaMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: impl Into<String>, columns: Vec<ColumnDescriptor>) {
        let table = table.into();
        // Replace any entry that differs only by case.
        if let Some(existing) = self.canonical_name(&table).map(str::to_string) {
            self.tables.remove(&existing);
        }
        self.tables.insert(table, columns);
    }

    pub fn remove(&mut self, table: &str) -> bool {
        match self.canonical_name(table).map(str::to_string) {
            Some(name) => self.tables.remove(&name).is_some(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ColumnDescriptor])> {
        self.tables.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// The stored spelling of `table`, if known under any casing.
    pub fn canonical_name(&self, table: &str) -> Option<&str> {
        if let Some((name, _)) = self.tables.get_key_value(table) {
            return Some(name.as_str());
        }
        self.tables
            .keys()
            .find(|k| k.eq_ignore_ascii_case(table))
            .map(String::as_str)
    }

    pub fn contains_table(&self, table: &str) -> bool {
        self.canonical_name(table).is_some()
    }

    /// Columns of `table`; empty for an unknown table.
    pub fn columns(&self, table: &str) -> &[ColumnDescriptor] {
        self.canonical_name(table)
            .and_then(|name| self.tables.get(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn column_names(&self, table: &str) -> Vec<String> {
        self.columns(table).iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.columns(table)
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(column))
    }

    pub fn to_document(&self) -> Value {
        let mut doc = Map::new();
        for (table, columns) in &self.tables {
            let mut cols = Map::new();
            for col in columns {
                let record = ColumnRecord {
                    data_type: col.data_type.clone(),
                    primary_key: col.primary_key,
                    not_null: col.not_null,
                    default: col.default.clone().map(Value::String),
                    example_query: Some(col.example_query.clone()),
                    description: col.description.clone(),
                };
                // ColumnRecord only holds plain fields, serialization cannot fail
                cols.insert(col.name.clone(), serde_json::to_value(record).unwrap_or(Value::Null));
            }
            doc.insert(table.clone(), Value::Object(cols));
        }
        Value::Object(doc)
    }

    /// Parse a persisted document. Tables that match none of the known shapes
    /// are skipped with a warning.
    pub fn from_document(doc: &Value) -> Result<Self> {
        let tables = doc
            .as_object()
            .ok_or_else(|| SqlRagError::Schema("schema document is not a JSON object".to_string()))?;
        let mut schema = SchemaMap::new();
        for (table, value) in tables {
            match parse_table(value) {
                Some(columns) => schema.insert(table.clone(), columns),
                None => warn!("Skipping unreadable schema entry for table {}", table),
            }
        }
        Ok(schema)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ColumnRecord {
    #[serde(rename = "type", default)]
    data_type: String,
    #[serde(default)]
    primary_key: bool,
    #[serde(default)]
    not_null: bool,
    #[serde(default)]
    default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    example_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ColumnEntry {
    Legacy(String),
    Detailed(ColumnRecord),
}

#[derive(Debug, Deserialize)]
struct TableDocumentColumn {
    name: String,
    #[serde(rename = "type", default)]
    data_type: String,
    #[serde(default)]
    description: Option<String>,
}

fn parse_table(value: &Value) -> Option<Vec<ColumnDescriptor>> {
    let obj = value.as_object()?;

    if let Some(Value::Array(cols)) = obj.get("columns") {
        let mut columns = Vec::with_capacity(cols.len());
        for col in cols {
            let parsed: TableDocumentColumn = serde_json::from_value(col.clone()).ok()?;
            let mut descriptor = ColumnDescriptor::new(parsed.name, parsed.data_type);
            descriptor.description = parsed.description;
            columns.push(descriptor);
        }
        return Some(columns);
    }

    let mut columns = Vec::with_capacity(obj.len());
    for (name, entry) in obj {
        let entry: ColumnEntry = serde_json::from_value(entry.clone()).ok()?;
        let descriptor = match entry {
            ColumnEntry::Legacy(data_type) => ColumnDescriptor::new(name.clone(), data_type),
            ColumnEntry::Detailed(record) => {
                let mut descriptor = ColumnDescriptor::new(name.clone(), record.data_type)
                    .with_primary_key(record.primary_key)
                    .with_not_null(record.not_null)
                    .with_default(record.default.map(|v| match v {
                        Value::String(s) => s,
                        other => other.to_string(),
                    }));
                descriptor.description = record.description;
                descriptor
            }
        };
        columns.push(descriptor);
    }
    Some(columns)
}

struct CacheState {
    schema: SchemaMap,
    loaded_mtime: Option<SystemTime>,
}

/// Tables touched by [`SchemaCache::reconcile_with_database`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub purged: Vec<String>,
    pub added: Vec<String>,
}

impl Reconciliation {
    pub fn is_unchanged(&self) -> bool {
        self.purged.is_empty() && self.added.is_empty()
    }
}

/// Shared schema state. Reads take a read lock; every mutation and its disk
/// write happen under the write lock, so there is a single writer at a time.
pub struct SchemaCache {
    path: PathBuf,
    state: RwLock<CacheState>,
}

impl SchemaCache {
    /// Load the cache from `path`. A missing or malformed file yields an empty cache.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let schema = Self::load(&path);
        let loaded_mtime = file_mtime(&path);
        info!("Schema cache loaded {} tables from {}", schema.len(), path.display());
        Self {
            path,
            state: RwLock::new(CacheState { schema, loaded_mtime }),
        }
    }

    /// Read the persisted schema. Never fails: problems are logged and an empty map returned.
    pub fn load(path: &Path) -> SchemaMap {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("No schema file at {}: {}", path.display(), e);
                return SchemaMap::new();
            }
        };
        let parsed = serde_json::from_str::<Value>(&raw)
            .map_err(SqlRagError::from)
            .and_then(|doc| SchemaMap::from_document(&doc));
        match parsed {
            Ok(schema) => schema,
            Err(e) => {
                warn!("Ignoring malformed schema file {}: {}", path.display(), e);
                SchemaMap::new()
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> SchemaMap {
        self.read().schema.clone()
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.read().schema.table_names().map(str::to_string).collect()
    }

    /// Columns of `table`; an unknown table gives an empty list.
    pub fn get_columns(&self, table: &str) -> Vec<ColumnDescriptor> {
        self.read().schema.columns(table).to_vec()
    }

    /// Bring the cached table set in line with the live database: tables that
    /// were dropped are purged, tables the cache has never seen are
    /// introspected. Entries for tables on both sides are left alone. The file
    /// is written only when something changed.
    pub fn reconcile_with_database(&self, db: &Database) -> Result<Reconciliation> {
        let live = db.list_tables()?;
        let mut state = self.write();
        let mut report = Reconciliation::default();

        report.purged = state
            .schema
            .table_names()
            .filter(|t| !live.iter().any(|l| l.eq_ignore_ascii_case(t)))
            .map(str::to_string)
            .collect();
        for table in &report.purged {
            state.schema.remove(table);
        }

        for table in live {
            if state.schema.contains_table(&table) {
                continue;
            }
            let columns = db.table_columns(&table)?;
            state.schema.insert(table.clone(), columns);
            report.added.push(table);
        }

        if report.is_unchanged() {
            debug!("Schema cache already consistent with database");
            return Ok(report);
        }
        info!(
            "Reconciled schema cache: purged {:?}, added {:?}",
            report.purged, report.added
        );
        self.persist(&mut state)?;
        Ok(report)
    }

    /// Re-introspect one table and overwrite its entry. A table that no longer
    /// exists is purged instead.
    pub fn refresh_table(&self, db: &Database, table: &str) -> Result<()> {
        let live = db.list_tables()?;
        let table = match live.into_iter().find(|t| t.eq_ignore_ascii_case(table)) {
            Some(name) => name,
            None => {
                self.remove_table(table)?;
                return Err(SqlRagError::Schema(format!("Table '{}' does not exist", table)));
            }
        };
        let columns = db.table_columns(&table)?;
        let mut state = self.write();
        if state.schema.canonical_name(&table) == Some(table.as_str())
            && state.schema.columns(&table) == columns.as_slice()
        {
            return Ok(());
        }
        state.schema.insert(table.clone(), columns);
        info!("Refreshed schema for table {}", table);
        self.persist(&mut state)
    }

    /// Rebuild the whole cache from the live database.
    pub fn refresh_all(&self, db: &Database) -> Result<usize> {
        let mut fresh = SchemaMap::new();
        for table in db.list_tables()? {
            let columns = db.table_columns(&table)?;
            fresh.insert(table, columns);
        }
        let count = fresh.len();
        let mut state = self.write();
        if state.schema == fresh {
            return Ok(count);
        }
        state.schema = fresh;
        info!("Schema cache rebuilt with {} tables", count);
        self.persist(&mut state)?;
        Ok(count)
    }

    pub fn remove_table(&self, table: &str) -> Result<bool> {
        let mut state = self.write();
        if !state.schema.remove(table) {
            return Ok(false);
        }
        info!("Removed table {} from schema cache", table);
        self.persist(&mut state)?;
        Ok(true)
    }

    /// Pick up edits made to the schema file by another process.
    pub fn reload_if_changed(&self) -> bool {
        let current = file_mtime(&self.path);
        let mut state = self.write();
        let newer = match (current, state.loaded_mtime) {
            (Some(now), Some(seen)) => now > seen,
            (Some(_), None) => true,
            _ => false,
        };
        if newer {
            state.schema = Self::load(&self.path);
            state.loaded_mtime = current;
            info!("Reloaded schema file {} after external change", self.path.display());
        }
        newer
    }

    fn persist(&self, state: &mut CacheState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let body = serde_json::to_string_pretty(&state.schema.to_document())?;
        std::fs::write(&self.path, body)?;
        state.loaded_mtime = file_mtime(&self.path);
        debug!("Persisted schema cache to {}", self.path.display());
        Ok(())
    }
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_schema_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("sql_rag_schema_{}", uuid::Uuid::new_v4()))
            .join("schema.json")
    }

    #[test]
    fn test_example_reference() {
        assert_eq!(ColumnDescriptor::example_reference("age"), "age");
        assert_eq!(ColumnDescriptor::example_reference("first_name"), "first_name");
        assert_eq!(ColumnDescriptor::example_reference("Button Down"), "\"Button Down\"");
        assert_eq!(ColumnDescriptor::example_reference("AC Current (A)"), "\"AC Current (A)\"");
    }

    #[test]
    fn test_reads_all_shapes() {
        let doc = json!({
            "legacy": {"id": "INTEGER", "name": "TEXT"},
            "detailed": {
                "Button Down": {"type": "INTEGER", "primary_key": false, "not_null": true, "default": 0}
            },
            "documented": {
                "table_name": "documented",
                "columns": [{"name": "price", "type": "REAL", "description": "Price in USD"}],
                "sample_data": []
            }
        });
        let schema = SchemaMap::from_document(&doc).unwrap();
        assert_eq!(schema.len(), 3);
        assert_eq!(schema.column_names("legacy"), vec!["id", "name"]);

        let button = &schema.columns("detailed")[0];
        assert!(button.not_null);
        assert_eq!(button.default.as_deref(), Some("0"));
        assert_eq!(button.example_query, "\"Button Down\"");

        let price = &schema.columns("documented")[0];
        assert_eq!(price.data_type, "REAL");
        assert_eq!(price.description.as_deref(), Some("Price in USD"));
    }

    #[test]
    fn test_lookups_are_case_insensitive() {
        let mut schema = SchemaMap::new();
        schema.insert("Users", vec![ColumnDescriptor::new("Age", "INTEGER")]);
        assert!(schema.contains_table("users"));
        assert!(schema.has_column("USERS", "age"));
        assert!(schema.columns("ghost").is_empty());
        assert!(schema.remove("users"));
        assert!(schema.is_empty());
    }

    #[test]
    fn test_load_fails_soft() {
        let path = temp_schema_path();
        assert!(SchemaCache::load(&path).is_empty());

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();
        assert!(SchemaCache::load(&path).is_empty());

        std::fs::write(&path, "[1, 2, 3]").unwrap();
        assert!(SchemaCache::load(&path).is_empty());
    }

    #[test]
    fn test_document_round_trip_keeps_column_order() {
        let mut schema = SchemaMap::new();
        schema.insert(
            "kettlepump",
            vec![
                ColumnDescriptor::new("Timestamp", "TEXT"),
                ColumnDescriptor::new("Button Down", "INTEGER"),
                ColumnDescriptor::new("AC Current", "REAL").with_default(Some("0.0".into())),
            ],
        );
        let restored = SchemaMap::from_document(&schema.to_document()).unwrap();
        assert_eq!(restored, schema);
    }

    #[test]
    fn test_reconcile_purges_and_persists() {
        let db = Database::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)")
            .unwrap();
        let path = temp_schema_path();
        let cache = SchemaCache::open(&path);
        cache.refresh_all(&db).unwrap();

        // A table only the file knows about
        {
            let mut state = cache.write();
            state.schema.insert("ghost", vec![ColumnDescriptor::new("id", "INTEGER")]);
        }
        db.execute_batch("CREATE TABLE orders (id INTEGER PRIMARY KEY, total_amount REAL)")
            .unwrap();
        let report = cache.reconcile_with_database(&db).unwrap();
        assert_eq!(report.purged, vec!["ghost"]);
        assert_eq!(report.added, vec!["orders"]);
        assert_eq!(cache.list_tables(), vec!["orders", "users"]);

        let on_disk = SchemaCache::load(&path);
        assert!(!on_disk.contains_table("ghost"));
        assert!(on_disk.contains_table("users"));
        assert!(on_disk.contains_table("orders"));
    }

    #[test]
    fn test_refresh_table_and_remove() {
        let db = Database::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE products (id INTEGER PRIMARY KEY, price REAL)")
            .unwrap();
        let cache = SchemaCache::open(temp_schema_path());
        cache.refresh_table(&db, "products").unwrap();
        assert_eq!(cache.get_columns("products").len(), 2);

        db.execute_batch("ALTER TABLE products ADD COLUMN stock INTEGER").unwrap();
        cache.refresh_table(&db, "products").unwrap();
        assert_eq!(cache.get_columns("products").len(), 3);

        assert!(cache.remove_table("products").unwrap());
        assert!(!cache.remove_table("products").unwrap());
        assert!(cache.get_columns("products").is_empty());
    }

    #[test]
    fn test_refresh_missing_table_purges_entry() {
        let db = Database::open_in_memory().unwrap();
        let cache = SchemaCache::open(temp_schema_path());
        {
            let mut state = cache.write();
            state.schema.insert("gone", vec![ColumnDescriptor::new("id", "INTEGER")]);
        }
        assert!(cache.refresh_table(&db, "gone").is_err());
        assert!(cache.list_tables().is_empty());
    }

    #[test]
    fn test_reload_if_changed() {
        let path = temp_schema_path();
        let cache = SchemaCache::open(&path);
        assert!(!cache.reload_if_changed());

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"test_table": {"id": "INTEGER"}}"#).unwrap();
        assert!(cache.reload_if_changed());
        assert_eq!(cache.list_tables(), vec!["test_table"]);
    }
}

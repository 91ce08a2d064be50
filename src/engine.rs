//! Question-to-answer orchestration.
//!
//! question -> resolver -> classifier -> template -> validator -> SQLite -> formatter
//!
//! With an upstream translator configured, its answer is tried first and the
//! rule-based path is the fallback. Nothing here returns `Err` for a user
//! question: failures come back inside [`ExecutionOutcome`].

use crate::config::Config;
use crate::database::{Database, ResultSet};
use crate::error::{Result, SqlRagError};
use crate::formatter::ResultFormatter;
use crate::intent::IntentClassifier;
use crate::llm::{build_prompt, looks_like_sql_answer, strip_sql_fences, OllamaClient, PromptMemory, SqlTranslator};
use crate::resolver::{DomainKeywords, Resolver};
use crate::schema_cache::{ColumnDescriptor, SchemaCache, SchemaMap};
use crate::template::{GeneratedQuery, TemplateEngine, Translation};
use crate::validator::QueryValidator;
use serde::Serialize;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// What the caller gets back for one executed query.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    /// The attempted SQL; empty for answers that needed none.
    pub sql: String,
    pub text: String,
    pub error: Option<String>,
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<ResultSet>,
}

impl ExecutionOutcome {
    fn direct(text: String) -> Self {
        Self {
            sql: String::new(),
            text,
            error: None,
            code: None,
            rows: None,
        }
    }

    fn failed(sql: &str, err: &SqlRagError) -> Self {
        Self {
            sql: sql.to_string(),
            text: String::new(),
            error: Some(err.to_string()),
            code: Some(err.code()),
            rows: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// `(formatted_text, error_text)`.
    pub fn into_parts(self) -> (String, Option<String>) {
        (self.text, self.error)
    }
}

pub struct SqlRag {
    config: Config,
    db: Database,
    schema: SchemaCache,
    validator: QueryValidator,
    resolver: Resolver,
    classifier: IntentClassifier,
    templates: TemplateEngine,
    formatter: ResultFormatter,
    translator: Option<Box<dyn SqlTranslator>>,
    memory: Mutex<PromptMemory>,
}

impl SqlRag {
    /// Open the configured database and schema file.
    pub fn new(config: Config) -> Result<Self> {
        let db = Database::open(&config.db_path)?;
        let mut engine = Self::with_database(config, db)?;
        if engine.config.llm.enabled {
            let client = OllamaClient::new(&engine.config.llm)?;
            info!("LLM translator enabled ({})", client.name());
            engine.translator = Some(Box::new(client));
        }
        Ok(engine)
    }

    /// Build around an already-open database. The LLM stays disabled; use
    /// [`SqlRag::with_translator`] to plug one in.
    pub fn with_database(config: Config, db: Database) -> Result<Self> {
        let schema = SchemaCache::open(&config.schema_path);
        match schema.reconcile_with_database(&db) {
            Ok(report) if !report.is_unchanged() => info!(
                "Schema cache reconciled: {} purged, {} added",
                report.purged.len(),
                report.added.len()
            ),
            Ok(_) => {}
            Err(e) => warn!("Schema reconciliation failed, keeping cached schema: {}", e),
        }
        let domain_keywords = match &config.domain_keywords_path {
            Some(path) => DomainKeywords::load(path)?,
            None => DomainKeywords::default(),
        };

        Ok(Self {
            validator: QueryValidator::new(),
            resolver: Resolver::new(domain_keywords),
            classifier: IntentClassifier::new(),
            templates: TemplateEngine::new(config.default_table.clone(), config.result_limit),
            formatter: ResultFormatter::new(),
            translator: None,
            memory: Mutex::new(PromptMemory::new(config.memory_size)),
            config,
            db,
            schema,
        })
    }

    pub fn with_translator(mut self, translator: Box<dyn SqlTranslator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn schema(&self) -> &SchemaCache {
        &self.schema
    }

    fn current_schema(&self) -> SchemaMap {
        self.schema.reload_if_changed();
        self.schema.snapshot()
    }

    /// Translate a question into SQL, or into a direct answer for schema
    /// questions that need no query.
    pub async fn translate(&self, question: &str) -> Translation {
        let schema = self.current_schema();
        if let Some(translator) = &self.translator {
            if let Some(query) = self.translate_with_llm(translator.as_ref(), question, &schema).await {
                return Translation::Query(query);
            }
            debug!("Falling back to rule-based translation");
        }
        self.translate_rules(question, &schema)
    }

    /// The rule-based path on its own.
    pub fn translate_rules(&self, question: &str, schema: &SchemaMap) -> Translation {
        let ctx = self.resolver.resolve(question, schema);
        let intent = self.classifier.classify(question);
        let translation = self.templates.render(intent, &ctx, schema);
        match &translation {
            Translation::Query(q) => info!("Question {:?} -> [{}] {}", question, q.intent, q.sql),
            Translation::Direct(_) => info!("Question {:?} -> [{}] direct answer", question, intent),
        }
        translation
    }

    async fn translate_with_llm(
        &self,
        translator: &dyn SqlTranslator,
        question: &str,
        schema: &SchemaMap,
    ) -> Option<GeneratedQuery> {
        let prompt = match self.memory.lock() {
            Ok(memory) => build_prompt(question, schema, &memory),
            Err(_) => build_prompt(question, schema, &PromptMemory::new(0)),
        };

        let raw = match translator.translate(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("{} translator failed: {}", translator.name(), e);
                return None;
            }
        };
        if !looks_like_sql_answer(&raw) {
            warn!("{} returned a non-SQL answer", translator.name());
            return None;
        }
        let sql = strip_sql_fences(&raw);
        if let Err(rejection) = self.validator.check(&sql, schema) {
            warn!("{} produced a rejected query ({}): {}", translator.name(), rejection, sql);
            return None;
        }
        info!("Question {:?} -> [{}] {}", question, translator.name(), sql);
        Some(GeneratedQuery::foreign(sql))
    }

    /// Validate, run and format one query.
    pub fn execute(&self, query: &GeneratedQuery) -> ExecutionOutcome {
        let schema = self.current_schema();
        if let Err(rejection) = self.validator.check(&query.sql, &schema) {
            let err = SqlRagError::Validation(rejection.to_string());
            warn!("{}: {}", err, query.sql);
            return ExecutionOutcome::failed(&query.sql, &err);
        }

        match self.db.query(&query.sql) {
            Ok(rows) => ExecutionOutcome {
                sql: query.sql.clone(),
                text: self.formatter.format(query, &rows),
                error: None,
                code: None,
                rows: Some(rows),
            },
            Err(e) => {
                warn!("Query failed: {} ({})", query.sql, e);
                ExecutionOutcome::failed(&query.sql, &e)
            }
        }
    }

    pub fn execute_sql(&self, sql: &str) -> ExecutionOutcome {
        self.execute(&GeneratedQuery::foreign(sql.trim()))
    }

    /// Translate and execute in one call.
    pub async fn ask(&self, question: &str) -> ExecutionOutcome {
        match self.translate(question).await {
            Translation::Direct(text) => ExecutionOutcome::direct(text),
            Translation::Query(query) => {
                let outcome = self.execute(&query);
                if outcome.is_ok() {
                    if let Ok(mut memory) = self.memory.lock() {
                        memory.add(question, &query.sql);
                    }
                }
                outcome
            }
        }
    }

    pub fn tables(&self) -> Vec<String> {
        self.schema.reload_if_changed();
        self.schema.list_tables()
    }

    pub fn describe(&self, table: &str) -> Vec<ColumnDescriptor> {
        self.schema.reload_if_changed();
        self.schema.get_columns(table)
    }

    /// Rebuild the cache from the live database.
    pub fn refresh_schema(&self) -> Result<usize> {
        self.schema.refresh_all(&self.db)
    }

    /// Pick up a table created outside the question path.
    pub fn refresh_table(&self, table: &str) -> Result<()> {
        self.schema.refresh_table(&self.db, table)
    }

    pub fn drop_table(&self, table: &str) -> Result<()> {
        self.db.drop_table(table)?;
        self.schema.remove_table(table)?;
        Ok(())
    }
}

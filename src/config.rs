use std::{env, path::PathBuf, time::Duration};

use crate::error::{Result, SqlRagError};

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub schema_path: PathBuf,
    pub default_table: String,
    pub result_limit: usize,
    pub domain_keywords_path: Option<PathBuf>,
    pub llm: LlmConfig,
    pub memory_size: usize,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:11434/api/generate".to_string(),
            model: "mistral".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("rag.db"),
            schema_path: PathBuf::from("metadata/schema.json"),
            default_table: "users".to_string(),
            result_limit: 10,
            domain_keywords_path: None,
            llm: LlmConfig::default(),
            memory_size: 5,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let db_path = env::var("SQL_RAG_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let schema_path = env::var("SQL_RAG_SCHEMA_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.schema_path);

        let default_table = env::var("SQL_RAG_DEFAULT_TABLE")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.default_table);

        let result_limit = env::var("SQL_RAG_RESULT_LIMIT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.result_limit);

        let domain_keywords_path = env::var("SQL_RAG_DOMAIN_KEYWORDS").ok().map(PathBuf::from);
        if let Some(path) = &domain_keywords_path {
            if !path.exists() {
                return Err(SqlRagError::Config(format!(
                    "SQL_RAG_DOMAIN_KEYWORDS points to a missing file: {}",
                    path.display()
                )));
            }
        }

        let llm = LlmConfig {
            enabled: env::var("SQL_RAG_LLM_ENABLED")
                .ok()
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            endpoint: env::var("SQL_RAG_LLM_ENDPOINT").unwrap_or(defaults.llm.endpoint),
            model: env::var("SQL_RAG_LLM_MODEL").unwrap_or(defaults.llm.model),
            timeout: env::var("SQL_RAG_LLM_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.llm.timeout),
        };

        let memory_size = env::var("SQL_RAG_MEMORY_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.memory_size);

        Ok(Self {
            db_path,
            schema_path,
            default_table,
            result_limit,
            domain_keywords_path,
            llm,
            memory_size,
        })
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

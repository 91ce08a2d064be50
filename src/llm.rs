//! Optional upstream translator.
//!
//! A local model server (Ollama's `/api/generate`) can be asked for SQL before
//! the rule-based engine runs. Whatever comes back is untrusted text: fences
//! and labels are stripped, obvious non-answers are discarded, and the result
//! still has to pass the validator.

use crate::config::LlmConfig;
use crate::error::{Result, SqlRagError};
use crate::schema_cache::SchemaMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Anything that turns a prompt into raw model text.
#[async_trait]
pub trait SqlTranslator: Send + Sync {
    async fn translate(&self, prompt: &str) -> Result<String>;

    fn name(&self) -> &str;
}

pub struct OllamaClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SqlRagError::Llm(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl SqlTranslator for OllamaClient {
    async fn translate(&self, prompt: &str) -> Result<String> {
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| SqlRagError::Llm(format!("LLM API call failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(SqlRagError::Llm(format!(
                "LLM endpoint returned {}",
                response.status()
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| SqlRagError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        Ok(parsed.response.trim().to_string())
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub at: DateTime<Utc>,
    pub question: String,
    pub sql: String,
}

/// The last few answered questions, replayed into the prompt as examples.
#[derive(Debug, Clone)]
pub struct PromptMemory {
    capacity: usize,
    entries: VecDeque<MemoryEntry>,
}

impl PromptMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn add(&mut self, question: impl Into<String>, sql: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(MemoryEntry {
            at: Utc::now(),
            question: question.into(),
            sql: sql.into(),
        });
    }

    /// Up to `n` most recent entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<&MemoryEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// One line per table: `Table users with columns: [id, name, age]`.
pub fn describe_schema(schema: &SchemaMap) -> String {
    schema
        .iter()
        .map(|(table, columns)| {
            format!(
                "Table {} with columns: [{}]",
                table,
                columns.iter().map(|c| c.example_query.as_str()).join(", ")
            )
        })
        .join("\n")
}

pub fn build_prompt(question: &str, schema: &SchemaMap, memory: &PromptMemory) -> String {
    let mut prompt = String::from(
        "You are an AI that converts natural language into SQL queries for SQLite.\n\
         Return ONLY one SELECT statement, no explanation.\n\
         Quote column names that contain spaces or punctuation with double quotes.\n\n",
    );
    prompt.push_str("Schema:\n");
    prompt.push_str(&describe_schema(schema));
    prompt.push_str("\n\n");

    let recent = memory.recent(memory.len());
    if !recent.is_empty() {
        prompt.push_str("Previous questions:\n");
        for entry in recent {
            prompt.push_str(&format!("Q: {}\nSQL: {}\n", entry.question, entry.sql));
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!("Natural language: {}\nSQL:", question));
    prompt
}

/// Pull the statement out of a model answer: code fences, a leading `SQL:`
/// label and trailing semicolons are removed.
pub fn strip_sql_fences(raw: &str) -> String {
    let mut text = raw.trim();

    if let Some(open) = text.find("```") {
        let after = &text[open + 3..];
        let after = after
            .strip_prefix("sql")
            .or_else(|| after.strip_prefix("SQL"))
            .unwrap_or(after);
        text = match after.find("```") {
            Some(close) => &after[..close],
            None => after,
        };
        text = text.trim();
    }

    for label in ["SQLQuery:", "SQL:", "sql:"] {
        if let Some(rest) = text.strip_prefix(label) {
            text = rest.trim();
        }
    }

    text.trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .trim()
        .to_string()
}

const NON_ANSWER_MARKERS: [&str; 7] = [
    "i don't know",
    "i cannot",
    "not sure",
    "no information",
    "no data",
    "error",
    "undefined",
];

/// Cheap sanity check on model output before it is treated as SQL.
pub fn looks_like_sql_answer(raw: &str) -> bool {
    let lowered = raw.to_lowercase();
    if !lowered.contains("select") || !lowered.contains("from") {
        return false;
    }
    match NON_ANSWER_MARKERS.iter().find(|m| lowered.contains(*m)) {
        Some(marker) => {
            debug!("Discarding model answer containing {:?}", marker);
            false
        }
        None => true,
    }
}

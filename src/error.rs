use thiserror::Error;

#[derive(Error, Debug)]
pub enum SqlRagError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Generated query was rejected: {0}")]
    Validation(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("SQL tokenizer error: {0}")]
    Tokenize(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl SqlRagError {
    /// Stable machine-readable code, returned alongside user-facing messages.
    pub fn code(&self) -> &'static str {
        match self {
            SqlRagError::Schema(_) => "schema",
            SqlRagError::Database(_) => "database",
            SqlRagError::Validation(_) => "rejected",
            SqlRagError::Llm(_) => "llm",
            SqlRagError::Config(_) => "config",
            SqlRagError::Tokenize(_) => "tokenize",
            SqlRagError::Io(_) => "io",
            SqlRagError::Json(_) => "json",
            SqlRagError::Sqlite(_) => "sqlite",
        }
    }
}

impl From<sqlparser::tokenizer::TokenizerError> for SqlRagError {
    fn from(err: sqlparser::tokenizer::TokenizerError) -> Self {
        SqlRagError::Tokenize(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SqlRagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(SqlRagError::Validation("x".into()).code(), "rejected");
        assert_eq!(SqlRagError::Database("x".into()).code(), "database");
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(SqlRagError::from(io).code(), "io");
    }

    #[test]
    fn test_validation_message() {
        let err = SqlRagError::Validation("unknown table 'ghost'".into());
        assert_eq!(err.to_string(), "Generated query was rejected: unknown table 'ghost'");
    }
}

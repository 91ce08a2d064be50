pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod formatter;
pub mod intent;
pub mod llm;
pub mod resolver;
pub mod schema_cache;
pub mod template;
pub mod validator;

pub use config::Config;
pub use engine::{ExecutionOutcome, SqlRag};
pub use error::{Result, SqlRagError};
pub use template::{GeneratedQuery, Translation};

use sql_rag::{Config, ExecutionOutcome, SqlRag, Translation};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "sql-rag")]
#[command(about = "Ask questions about a SQLite database in plain English")]
#[command(version)]
struct Args {
    /// SQLite database file (overrides SQL_RAG_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Schema cache JSON file (overrides SQL_RAG_SCHEMA_PATH)
    #[arg(long, global = true)]
    schema: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a question, run it and print the answer
    Ask {
        question: String,
    },
    /// Show the SQL a question translates to without running it
    Translate {
        question: String,
    },
    /// Validate and run a SELECT statement
    Sql {
        query: String,
    },
    /// List cached tables
    Tables,
    /// Show the cached columns of a table
    Describe {
        table: String,
    },
    /// Rebuild the schema cache from the database
    RefreshSchema,
    /// Drop a table and remove it from the schema cache
    DropTable {
        table: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sql_rag=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(db) = args.db {
        config.db_path = db;
    }
    if let Some(schema) = args.schema {
        config.schema_path = schema;
    }
    info!("Using database {} and schema {}", config.db_path.display(), config.schema_path.display());

    let rag = SqlRag::new(config)?;

    match args.command {
        Commands::Ask { question } => {
            let outcome = rag.ask(&question).await;
            report(outcome, args.json)?;
        }
        Commands::Translate { question } => {
            let translation = rag.translate(&question).await;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&translation)?);
            } else {
                match translation {
                    Translation::Query(query) => println!("{}", query.sql),
                    Translation::Direct(text) => println!("{}", text),
                }
            }
        }
        Commands::Sql { query } => {
            let outcome = rag.execute_sql(&query);
            report(outcome, args.json)?;
        }
        Commands::Tables => {
            let tables = rag.tables();
            if args.json {
                println!("{}", serde_json::to_string_pretty(&tables)?);
            } else if tables.is_empty() {
                println!("No tables found.");
            } else {
                for table in tables {
                    println!("{}", table);
                }
            }
        }
        Commands::Describe { table } => {
            let columns = rag.describe(&table);
            if columns.is_empty() {
                bail!("Unknown table '{}'", table);
            }
            if args.json {
                println!("{}", serde_json::to_string_pretty(&columns)?);
            } else {
                for column in columns {
                    let mut flags = Vec::new();
                    if column.primary_key {
                        flags.push("PRIMARY KEY".to_string());
                    }
                    if column.not_null {
                        flags.push("NOT NULL".to_string());
                    }
                    if let Some(default) = &column.default {
                        flags.push(format!("DEFAULT {}", default));
                    }
                    println!("{}\t{}\t{}", column.example_query, column.data_type, flags.join(" "));
                }
            }
        }
        Commands::RefreshSchema => {
            let count = rag.refresh_schema()?;
            println!("Schema refreshed: {} tables", count);
        }
        Commands::DropTable { table } => {
            rag.drop_table(&table)?;
            println!("Dropped table {}", table);
        }
    }

    Ok(())
}

fn report(outcome: ExecutionOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }
    if !outcome.sql.is_empty() {
        println!("SQL: {}", outcome.sql);
    }
    match outcome.error {
        Some(message) => {
            error!("{}", message);
            bail!(message)
        }
        None => {
            println!("{}", outcome.text);
            Ok(())
        }
    }
}

use sql_rag::config::Config;
use sql_rag::database::Database;
use sql_rag::intent::Intent;
use sql_rag::validator::QueryValidator;
use sql_rag::{SqlRag, Translation};
use std::path::PathBuf;
use uuid::Uuid;

const AC_COLUMN: &str = "AC Current (A) [SN-4471]";

/// Fresh workspace with a SQLite file holding `users` and `kettlepump`.
fn setup() -> (PathBuf, Config) {
    let dir = std::env::temp_dir().join(format!("sql_rag_it_{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let config = Config {
        db_path: dir.join("rag.db"),
        schema_path: dir.join("metadata").join("schema.json"),
        ..Config::default()
    };

    let db = Database::open(&config.db_path).unwrap();
    db.execute_batch(
        r#"
        CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER);
        INSERT INTO users (name, age) VALUES ('Alice', 28), ('Bob', 34), ('Charlie', NULL);

        CREATE TABLE kettlepump (
            "Timestamp" TEXT,
            "Button Down" INTEGER,
            "AC Current (A) [SN-4471]" REAL,
            "stopped" INTEGER
        );
        INSERT INTO kettlepump VALUES
            ('2024-01-01 10:00', 1, 2.5, 0),
            ('2024-01-01 10:01', NULL, 3.75, 1),
            ('2024-01-01 10:02', 0, NULL, NULL),
            ('2024-01-01 10:03', NULL, 1.0, 0);
        "#,
    )
    .unwrap();

    (dir, config)
}

async fn ask(rag: &SqlRag, question: &str) -> (String, String) {
    let outcome = rag.ask(question).await;
    assert!(outcome.is_ok(), "{:?} failed: {:?}", question, outcome.error);
    (outcome.sql, outcome.text)
}

#[tokio::test]
async fn test_average_age_end_to_end() {
    let (_dir, config) = setup();
    let rag = SqlRag::new(config).unwrap();

    let translation = rag.translate("Calculate the average age from the users table").await;
    let query = translation.query().cloned().expect("expected SQL");
    assert_eq!(query.sql, "SELECT AVG(\"age\") FROM users");
    assert!(QueryValidator::new().validate(&query.sql, &rag.schema().snapshot()));

    let outcome = rag.execute(&query);
    assert!(outcome.text.contains("average"));
    assert!(outcome.text.contains("31"));
}

#[tokio::test]
async fn test_kettlepump_questions() {
    let (_dir, config) = setup();
    let rag = SqlRag::new(config).unwrap();

    let (sql, text) = ask(&rag, "How many rows in the kettlepump table?").await;
    assert_eq!(sql, "SELECT COUNT(*) FROM kettlepump");
    assert_eq!(text, "There are 4 rows in kettlepump.");

    let (sql, text) = ask(&rag, "What is the highest AC current in kettlepump?").await;
    assert_eq!(sql, format!("SELECT * FROM kettlepump ORDER BY \"{}\" DESC LIMIT 1", AC_COLUMN));
    assert!(text.starts_with("1 row found:"));
    assert!(text.contains("3.75"));

    let (_, text) = ask(&rag, "How many null values are in the Button Down column of kettlepump?").await;
    assert_eq!(
        text,
        "There are 2 null values in the Button Down column of the kettlepump table."
    );

    let (_, text) = ask(&rag, "How many unique values are in the stopped column of kettlepump?").await;
    assert_eq!(text, "There are 2 unique values in stopped in kettlepump.");

    let (sql, text) = ask(&rag, "How many columns does kettlepump have?").await;
    assert_eq!(sql, "SELECT COUNT(*) FROM pragma_table_info('kettlepump')");
    assert_eq!(text, "kettlepump table has 4 columns.");
}

#[tokio::test]
async fn test_text_length_question() {
    let (_dir, config) = setup();
    let rag = SqlRag::new(config).unwrap();

    let (_, text) = ask(&rag, "What is the longest name in users?").await;
    assert_eq!(text, "The longest name in users is \"Charlie\" with 7 characters.");
}

#[tokio::test]
async fn test_direct_answers() {
    let (_dir, config) = setup();
    let rag = SqlRag::new(config).unwrap();

    match rag.translate("What tables are in this database?").await {
        Translation::Direct(text) => assert_eq!(text, "Tables in the database: kettlepump, users"),
        other => panic!("expected a direct answer, got {:?}", other),
    }

    let (sql, direct) = rag.translate("What are the columns in users?").await.into_parts();
    assert!(sql.is_empty());
    assert_eq!(direct.as_deref(), Some("Columns in users: id, name, age"));
}

#[tokio::test]
async fn test_unresolvable_question_falls_back() {
    let (_dir, config) = setup();
    let rag = SqlRag::new(config).unwrap();

    let translation = rag.translate("tell me something interesting").await;
    let query = translation.query().expect("expected SQL");
    assert_eq!(query.intent, Intent::Fallback);
    assert_eq!(query.sql, "SELECT * FROM users LIMIT 10");

    let outcome = rag.execute(query);
    assert!(outcome.text.starts_with("3 rows found:"));
}

#[tokio::test]
async fn test_destructive_sql_never_runs() {
    let (_dir, config) = setup();
    let rag = SqlRag::new(config).unwrap();

    for sql in ["DROP TABLE users", "select * from users; delete from users", "UPDATE users SET age = 1"] {
        let outcome = rag.execute_sql(sql);
        assert_eq!(outcome.code, Some("rejected"), "{}", sql);
    }
    let (_, text) = ask(&rag, "How many rows in users?").await;
    assert_eq!(text, "There are 3 rows in users.");
}

#[tokio::test]
async fn test_schema_survives_restart() {
    let (_dir, config) = setup();
    {
        let rag = SqlRag::new(config.clone()).unwrap();
        rag.drop_table("kettlepump").unwrap();
    }
    assert!(config.schema_path.exists());

    let rag = SqlRag::new(config).unwrap();
    assert_eq!(rag.tables(), vec!["users"]);
    assert_eq!(rag.execute_sql("SELECT * FROM kettlepump").code, Some("rejected"));
}

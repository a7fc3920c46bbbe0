use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use polystore_core::storage::{FileParams, SqliteEngine, SKIPPED_MESSAGE};
use polystore_core::{
    BatchMode, EngineConfig, EngineKind, SqlEngine, StorageEngine, StoreError,
};
use serde_json::json;
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir should be created"),
        }
    }

    fn db_path(&self) -> PathBuf {
        self.dir.path().join("app.db")
    }

    fn config(&self) -> EngineConfig {
        EngineConfig::new(
            EngineKind::Sqlite,
            "localhost",
            self.db_path().to_string_lossy().to_string(),
        )
        .base_path(self.dir.path().join("database"))
    }

    fn engine(&self) -> SqliteEngine {
        SqliteEngine::new(self.config())
    }

    fn write_migration(&self, name: &str, content: &str) -> PathBuf {
        write_file(&self.dir.path().join("database/SQLite/migrations"), name, content)
    }

    fn write_seed(&self, name: &str, content: &str) -> PathBuf {
        write_file(&self.dir.path().join("database/SQLite/seeds"), name, content)
    }
}

fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    fs::create_dir_all(dir).expect("directory should be created");
    let path = dir.join(name);
    fs::write(&path, content).expect("file should be written");
    path
}

fn count(engine: &mut SqliteEngine, table: &str) -> i64 {
    engine
        .fetch_column(&format!("SELECT COUNT(*) FROM {}", table), &[])
        .expect("count should succeed")
        .and_then(|value| value.as_i64())
        .expect("count should be an integer")
}

#[test]
fn test_missing_host_fails_before_touching_disk() {
    let ws = Workspace::new();
    let mut config = ws.config();
    config.host = String::new();
    let mut engine = SqliteEngine::new(config);

    let err = engine.connect().expect_err("connect should fail");
    assert!(matches!(err, StoreError::Configuration(_)));
    assert!(!ws.db_path().exists());
}

#[test]
fn test_missing_database_is_configuration_error() {
    let mut engine =
        SqliteEngine::new(EngineConfig::new(EngineKind::Sqlite, "localhost", ""));
    let err = engine.query("SELECT 1", &[]).expect_err("query should fail");
    assert!(matches!(err, StoreError::Configuration(_)));
}

#[test]
fn test_connect_creates_file_and_applies_pragmas() {
    let ws = Workspace::new();
    let mut engine = SqliteEngine::new(ws.config().option("journal_mode", "WAL"));
    engine.connect().expect("connect should succeed");
    assert!(ws.db_path().exists());
    assert!(engine.is_connected());

    let foreign_keys = engine
        .fetch_column("PRAGMA foreign_keys", &[])
        .expect("pragma should succeed");
    assert_eq!(foreign_keys, Some(json!(1)));
    let journal = engine
        .fetch_column("PRAGMA journal_mode", &[])
        .expect("pragma should succeed");
    assert_eq!(journal, Some(json!("wal")));

    engine.reconnect().expect("reconnect should succeed");
    assert!(engine.is_connected());
}

#[test]
fn test_batch_with_invalid_middle_statement_continues() {
    let ws = Workspace::new();
    let mut engine = ws.engine();
    engine
        .query("CREATE TABLE t (name TEXT, n INTEGER)", &[])
        .expect("create should succeed");

    let results = engine
        .execute_multiple(
            "INSERT INTO t VALUES ('a;b', 1); INSERT INTO missing VALUES (1); INSERT INTO t VALUES ('c', 3);",
        )
        .expect("batch should run");

    assert_eq!(results.len(), 3);
    assert!(results[0].success);
    assert!(!results[1].success);
    assert!(results[1].error.as_deref().unwrap_or_default().contains("missing"));
    assert!(results[2].success);
    assert_eq!(results[2].affected(), Some(1));
    assert_eq!(count(&mut engine, "t"), 2);

    let names = engine
        .fetch_all("SELECT name FROM t ORDER BY n", &[])
        .expect("select should succeed");
    assert_eq!(names[0]["name"], json!("a;b"));
}

#[test]
fn test_strict_mode_skips_after_first_failure() {
    let ws = Workspace::new();
    let mut engine = SqliteEngine::new(ws.config().batch_mode(BatchMode::StopOnError));
    engine
        .query("CREATE TABLE t (n INTEGER)", &[])
        .expect("create should succeed");

    let results = engine
        .execute_multiple("INSERT INTO t VALUES (1); SELEC oops; INSERT INTO t VALUES (2)")
        .expect("batch should run");

    assert_eq!(results.len(), 3);
    assert!(results[0].success);
    assert!(!results[1].success);
    assert_eq!(results[2].error.as_deref(), Some(SKIPPED_MESSAGE));
    assert_eq!(count(&mut engine, "t"), 1);
}

#[test]
fn test_select_in_batch_captures_rows() {
    let ws = Workspace::new();
    let mut engine = ws.engine();
    let results = engine
        .execute_multiple(
            "CREATE TABLE t (n INTEGER); INSERT INTO t VALUES (7); SELECT n FROM t",
        )
        .expect("batch should run");
    let rows = results[2].rows().expect("select should return rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["n"], json!(7));
}

#[test]
fn test_migrate_all_runs_in_filename_order() {
    let ws = Workspace::new();
    ws.write_migration("010_seed.sql", "INSERT INTO users (name, email) VALUES ('ann', 'a@x');");
    ws.write_migration("001_init.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);");
    ws.write_migration("002_add_col.sql", "ALTER TABLE users ADD COLUMN email TEXT;");
    ws.write_migration("README.md", "not a migration");

    let mut engine = ws.engine();
    let report = engine.migrate_all().expect("migrations should run");

    let files: Vec<&String> = report.keys().collect();
    assert_eq!(files, vec!["001_init.sql", "002_add_col.sql", "010_seed.sql"]);
    assert!(report.values().flatten().all(|result| result.success));
    assert_eq!(count(&mut engine, "users"), 1);
}

#[test]
fn test_migrate_all_reports_missing_directory_and_files() {
    let ws = Workspace::new();
    let mut engine = ws.engine();
    let err = engine.migrate_all().expect_err("migrations dir is missing");
    assert!(matches!(err, StoreError::DirectoryNotFound(_)));

    fs::create_dir_all(engine.migrations_dir()).expect("directory should be created");
    let err = engine.migrate_all().expect_err("migrations dir is empty");
    assert!(matches!(err, StoreError::NoFilesFound(_)));
}

#[test]
fn test_execute_seed_and_file_errors() {
    let ws = Workspace::new();
    let mut engine = ws.engine();
    engine
        .query("CREATE TABLE t (n INTEGER)", &[])
        .expect("create should succeed");

    ws.write_seed("001_numbers.sql", "\u{feff}INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2);\n");
    let results = engine.execute_seed("001_numbers.sql").expect("seed should run");
    assert_eq!(results.len(), 2);
    assert_eq!(count(&mut engine, "t"), 2);

    let all = engine.seed_all().expect("seeds should run");
    assert_eq!(all.len(), 1);
    assert_eq!(count(&mut engine, "t"), 4);

    let err = engine.execute_seed("404.sql").expect_err("seed is missing");
    assert!(matches!(err, StoreError::FileNotFound(_)));

    ws.write_seed("002_blank.sql", "  \n -- \n");
    let results = engine.execute_seed("002_blank.sql").expect("comment-only seed runs");
    assert!(results.is_empty());

    ws.write_seed("003_empty.sql", "   \n\t");
    let err = engine.execute_seed("003_empty.sql").expect_err("seed is empty");
    assert!(matches!(err, StoreError::FileEmpty(_)));
}

#[test]
fn test_execute_file_substitutes_placeholders() {
    let ws = Workspace::new();
    let mut engine = SqliteEngine::new(ws.config().prefix("app_"));
    let path = write_file(
        ws.dir.path(),
        "batch.sql",
        "CREATE TABLE {{prefix}}owners (name TEXT); INSERT INTO {{prefix}}owners VALUES ('{{owner}}');",
    );

    let mut params = FileParams::new();
    params.insert("owner".to_string(), "alice".to_string());
    let results = engine.execute_file(&path, &params).expect("file should run");
    assert!(results.iter().all(|result| result.success));

    assert!(engine.table_exists("app_owners").expect("lookup should succeed"));
    let owner = engine
        .fetch_column("SELECT name FROM app_owners", &[])
        .expect("select should succeed");
    assert_eq!(owner, Some(json!("alice")));
}

#[test]
fn test_backup_is_byte_identical() {
    let ws = Workspace::new();
    let mut engine = ws.engine();
    engine
        .execute_multiple("CREATE TABLE t (n INTEGER); INSERT INTO t VALUES (1), (2), (3);")
        .expect("batch should run");

    let artifact = engine.backup(Some("snapshot")).expect("backup should succeed");
    assert_eq!(artifact.file_name().and_then(|n| n.to_str()), Some("snapshot.sqlite"));
    assert!(artifact.starts_with(ws.dir.path().join("database/SQLite/backups")));
    assert_eq!(
        fs::read(&artifact).expect("backup should be readable"),
        fs::read(ws.db_path()).expect("database should be readable")
    );

    let unnamed = engine.backup(None).expect("backup should succeed");
    let stem = unnamed
        .file_stem()
        .and_then(|s| s.to_str())
        .expect("backup should have a name");
    assert_eq!(stem.len(), "20260101_000000".len());
    assert_eq!(stem.as_bytes()[8], b'_');
}

#[test]
fn test_backup_then_restore_reproduces_rows() {
    let ws = Workspace::new();
    let mut engine = SqliteEngine::new(ws.config().backup_dir(ws.dir.path().join("snapshots")));
    engine
        .execute_multiple("CREATE TABLE t (n INTEGER); INSERT INTO t VALUES (1), (2), (3);")
        .expect("batch should run");
    let artifact = engine.backup(Some("before")).expect("backup should succeed");
    assert!(artifact.starts_with(ws.dir.path().join("snapshots")));

    engine
        .execute_multiple("DELETE FROM t; INSERT INTO t VALUES (9);")
        .expect("batch should run");
    assert_eq!(count(&mut engine, "t"), 1);

    assert!(engine.restore(&artifact).expect("restore should succeed"));
    assert!(!engine.is_connected());
    assert_eq!(count(&mut engine, "t"), 3);
}

#[test]
fn test_restore_missing_artifact() {
    let ws = Workspace::new();
    let mut engine = ws.engine();
    let err = engine
        .restore(&ws.dir.path().join("nope.sqlite"))
        .expect_err("artifact is missing");
    assert!(matches!(err, StoreError::FileNotFound(_)));
}

#[test]
fn test_in_memory_backup_is_unsupported() {
    let mut engine = SqliteEngine::new(EngineConfig::new(EngineKind::Sqlite, "localhost", ":memory:"));
    engine.query("SELECT 1", &[]).expect("query should succeed");
    let err = engine.backup(None).expect_err("backup should fail");
    assert!(matches!(err, StoreError::UnsupportedOperation(_)));
}

#[test]
fn test_transaction_rollback_and_commit() {
    let ws = Workspace::new();
    let mut engine = ws.engine();
    engine
        .query("CREATE TABLE t (n INTEGER)", &[])
        .expect("create should succeed");

    engine.begin_transaction().expect("begin should succeed");
    engine
        .execute_multiple("INSERT INTO t VALUES (1); INSERT INTO t VALUES (2);")
        .expect("batch should run");
    engine.rollback().expect("rollback should succeed");
    assert_eq!(count(&mut engine, "t"), 0);

    engine.begin_transaction().expect("begin should succeed");
    engine
        .execute("INSERT INTO t VALUES (?1)", &[json!(5)])
        .expect("insert should succeed");
    engine.commit().expect("commit should succeed");
    assert_eq!(count(&mut engine, "t"), 1);
    assert_eq!(engine.last_insert_id().expect("rowid should be readable"), Some(1));
}

#[test]
fn test_retry_exhaustion_reports_attempts() {
    let ws = Workspace::new();
    let unreachable = ws.dir.path().join("no/such/dir/app.db");
    let config = EngineConfig::new(
        EngineKind::Sqlite,
        "localhost",
        unreachable.to_string_lossy().to_string(),
    )
    .retry(3, 20);
    let mut engine = SqliteEngine::new(config);

    let started = Instant::now();
    let err = engine.connect().expect_err("connect should fail");
    match err {
        StoreError::Connection { engine, attempts, .. } => {
            assert_eq!(engine, "SQLite");
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(started.elapsed().as_millis() >= 40);
    assert!(!engine.is_connected());
}

#[test]
fn test_introspection_through_trait_object() {
    let ws = Workspace::new();
    let mut engine = ws.engine();
    engine
        .execute_multiple("CREATE TABLE b (id INTEGER); CREATE TABLE a (id INTEGER, label TEXT NOT NULL);")
        .expect("batch should run");

    let sql: &mut dyn SqlEngine = &mut engine;
    assert_eq!(sql.get_tables().expect("tables"), vec!["a", "b"]);
    let columns = sql.get_table_structure("a").expect("structure");
    assert_eq!(columns.len(), 2);
    assert_eq!(columns[1]["name"], json!("label"));
    assert_eq!(columns[1]["notnull"], json!(1));
}

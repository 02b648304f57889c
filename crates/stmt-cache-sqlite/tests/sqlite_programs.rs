// crates/stmt-cache-sqlite/tests/sqlite_programs.rs
// ============================================================================
// Module: SQLite Program Tests
// Description: Cached programs running against file-backed SQLite databases.
// Purpose: Ensure the cache protocol holds end to end on a real engine.
// Dependencies: stmt-cache-sqlite, stmt-cache-core, tempfile, toml
// ============================================================================

//! ## Overview
//! Opens [`SqliteEngine`] on temporary files and drives it through
//! [`Connection`] and [`Program`]: deferred binds, statement reuse,
//! uncached queries, persistence across engines and config parsing.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    missing_docs,
    reason = "Test-only panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::sync::Arc;

use stmt_cache_core::Connection;
use stmt_cache_core::Program;
use stmt_cache_core::SqlValue;
use stmt_cache_sqlite::SqliteEngine;
use stmt_cache_sqlite::SqliteEngineConfig;
use stmt_cache_sqlite::SqliteEngineError;
use stmt_cache_sqlite::SqliteJournalMode;
use stmt_cache_sqlite::SqliteSyncMode;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn open(path: &Path) -> (Arc<SqliteEngine>, Connection) {
    let engine = Arc::new(SqliteEngine::open(&SqliteEngineConfig::new(path)).unwrap());
    let connection = Connection::with_defaults(engine.clone());
    (engine, connection)
}

fn create_notes(connection: &Connection) {
    Program::new(connection, "CREATE TABLE IF NOT EXISTS notes (id INTEGER PRIMARY KEY, body TEXT, data BLOB, score REAL)")
        .unwrap()
        .execute()
        .unwrap();
}

fn count_notes(connection: &Connection) -> i64 {
    let program = Program::new(connection, "SELECT COUNT(*) FROM notes").unwrap();
    match program.execute().unwrap().rows.as_slice() {
        [row] => match row.as_slice() {
            [SqlValue::Integer(count)] => *count,
            other => panic!("unexpected row: {other:?}"),
        },
        other => panic!("unexpected rows: {other:?}"),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn deferred_binds_reach_sqlite() {
    let dir = TempDir::new().unwrap();
    let (_engine, connection) = open(&dir.path().join("notes.db"));
    create_notes(&connection);

    let insert = Program::deferred(
        &connection,
        "INSERT INTO notes (id, body, data, score) VALUES (?, ?, ?, ?)",
    )
    .unwrap();
    insert.bind_integer(1, 1).unwrap();
    insert.bind_text(2, "hello").unwrap();
    insert.bind_binary(3, &[0xde_u8, 0xad][..]).unwrap();
    insert.bind_real(4, 0.5).unwrap();
    assert_eq!(insert.execute().unwrap().changes, 1);

    let select = Program::new(&connection, "SELECT body, data, score FROM notes WHERE id = ?").unwrap();
    select.bind_integer(1, 1).unwrap();
    let output = select.execute().unwrap();
    assert_eq!(output.columns, vec!["body", "data", "score"]);
    assert_eq!(
        output.rows,
        vec![vec![
            SqlValue::Text("hello".to_string()),
            SqlValue::Binary(vec![0xde, 0xad]),
            SqlValue::Real(0.5),
        ]]
    );
}

#[test]
fn repeated_inserts_reuse_one_native_statement() {
    let dir = TempDir::new().unwrap();
    let (engine, connection) = open(&dir.path().join("notes.db"));
    create_notes(&connection);

    let sql = "INSERT INTO notes (body) VALUES (?)";
    let mut ids = Vec::new();
    for index in 0 .. 5 {
        let program = Program::new(&connection, sql).unwrap();
        program.bind_text(1, format!("note {index}").as_str()).unwrap();
        program.execute().unwrap();
        ids.push(program.statement_id());
        program.close().unwrap();
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(count_notes(&connection), 5);
    assert_eq!(connection.stats().hits, 4);
    // The CREATE and INSERT handles stay cached; the COUNT query was destroyed.
    assert_eq!(engine.live_statement_count(), 2);
}

#[test]
fn bind_out_of_range_surfaces_engine_error() {
    let dir = TempDir::new().unwrap();
    let (_engine, connection) = open(&dir.path().join("notes.db"));
    create_notes(&connection);
    let program = Program::deferred(&connection, "DELETE FROM notes WHERE id = ?").unwrap();
    program.bind_integer(2, 1).unwrap();
    let error = program.compile().unwrap_err();
    assert!(!error.is_usage());
    assert!(!program.is_compiled());
}

#[test]
fn data_persists_across_engines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("notes.db");
    {
        let (engine, connection) = open(&path);
        create_notes(&connection);
        let insert = Program::new(&connection, "INSERT INTO notes (body) VALUES ('kept')").unwrap();
        insert.execute().unwrap();
        drop(insert);
        connection.close().unwrap();
        assert_eq!(engine.live_statement_count(), 0);
    }
    let (_engine, connection) = open(&path);
    assert_eq!(count_notes(&connection), 1);
}

#[test]
fn open_rejects_directory_path() {
    let dir = TempDir::new().unwrap();
    let result = SqliteEngine::open(&SqliteEngineConfig::new(dir.path()));
    assert!(matches!(result, Err(SqliteEngineError::Invalid(_))));
}

#[test]
fn open_rejects_overlong_component() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a".repeat(300));
    let result = SqliteEngine::open(&SqliteEngineConfig::new(path));
    assert!(matches!(result, Err(SqliteEngineError::Invalid(_))));
}

#[test]
fn config_parses_from_toml() {
    let config: SqliteEngineConfig = toml::from_str(
        r#"
        path = "data/cache.db"
        busy_timeout_ms = 250
        journal_mode = "delete"
        sync_mode = "normal"
        "#,
    )
    .unwrap();
    assert_eq!(config.path, Path::new("data/cache.db"));
    assert_eq!(config.busy_timeout_ms, 250);
    assert_eq!(config.journal_mode, SqliteJournalMode::Delete);
    assert_eq!(config.sync_mode, SqliteSyncMode::Normal);
    assert_eq!(config.statement_cache_capacity, 16);
}

#[test]
fn delete_journal_mode_opens() {
    let dir = TempDir::new().unwrap();
    let mut config = SqliteEngineConfig::new(dir.path().join("delete.db"));
    config.journal_mode = SqliteJournalMode::Delete;
    config.sync_mode = SqliteSyncMode::Normal;
    let engine = Arc::new(SqliteEngine::open(&config).unwrap());
    let connection = Connection::with_defaults(engine);
    create_notes(&connection);
    assert_eq!(count_notes(&connection), 0);
}

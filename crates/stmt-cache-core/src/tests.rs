// crates/stmt-cache-core/src/tests.rs
// ============================================================================
// Module: stmt-cache Core Unit Tests
// Description: Crate-private checks for the cache, handles and config limits.
// Purpose: Cover internals not reachable through the public API.
// Dependencies: stmt-cache-core
// ============================================================================

//! ## Overview
//! Unit tests for the in-use token, LRU displacement, displaced-handle
//! disposal and config path limits.

// ============================================================================
// SECTION: Lint Configuration
// ============================================================================

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::StatementCache;
use crate::cache::dispose_displaced;
use crate::config::MAX_PATH_COMPONENT_LENGTH;
use crate::config::MAX_TOTAL_PATH_LENGTH;
use crate::config::StatementCacheConfig;
use crate::connection::Connection;
use crate::engine::RecordingEngine;
use crate::handle::CompiledHandle;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Opens a default connection over a recording engine.
fn connection() -> (Arc<RecordingEngine>, Connection) {
    let engine = Arc::new(RecordingEngine::new());
    let connection = Connection::with_defaults(engine.clone());
    (engine, connection)
}

/// Compiles a standalone handle on the connection.
fn compile(connection: &Connection, sql: &str) -> Arc<CompiledHandle> {
    CompiledHandle::compile(connection.shared(), sql).expect("compile")
}

// ============================================================================
// SECTION: Handle Tests
// ============================================================================

#[test]
fn handle_acquire_is_exclusive_until_release() {
    let (_engine, connection) = connection();
    let handle = compile(&connection, "INSERT INTO t VALUES (1)");
    assert!(handle.acquire());
    assert!(!handle.acquire(), "second acquire must observe the in-use token");
    handle.release();
    assert!(handle.acquire());
}

#[test]
fn handle_destroy_is_idempotent() {
    let (engine, connection) = connection();
    let handle = compile(&connection, "DELETE FROM t");
    handle.destroy().unwrap();
    handle.destroy().unwrap();
    assert!(handle.is_destroyed());
    assert_eq!(engine.destroy_count(handle.native()), 1);
}

#[test]
fn handle_drop_destroys_native_statement() {
    let (engine, connection) = connection();
    let native = compile(&connection, "DELETE FROM t").native();
    assert!(!engine.is_live(native));
    assert_eq!(engine.destroy_count(native), 1);
}

// ============================================================================
// SECTION: Cache Tests
// ============================================================================

#[test]
fn cache_with_zero_capacity_stores_nothing() {
    let (_engine, connection) = connection();
    let mut cache = StatementCache::new(0);
    let handle = compile(&connection, "INSERT INTO t VALUES (1)");
    let displaced = cache.insert(handle.sql().to_string(), Arc::clone(&handle));
    assert!(displaced.is_empty());
    assert!(cache.is_empty());
    assert!(!cache.contains_handle(&handle));
}

#[test]
fn cache_insert_displaces_least_recently_used() {
    let (_engine, connection) = connection();
    let mut cache = StatementCache::new(2);
    let first = compile(&connection, "INSERT INTO a VALUES (1)");
    let second = compile(&connection, "INSERT INTO b VALUES (1)");
    let third = compile(&connection, "INSERT INTO c VALUES (1)");
    assert!(cache.insert(first.sql().to_string(), Arc::clone(&first)).is_empty());
    assert!(cache.insert(second.sql().to_string(), Arc::clone(&second)).is_empty());
    assert!(cache.get(first.sql()).is_some());

    let displaced = cache.insert(third.sql().to_string(), Arc::clone(&third));
    assert_eq!(displaced.len(), 1);
    assert!(Arc::ptr_eq(&displaced[0], &second));
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.stats().evictions, 1);
}

#[test]
fn cache_membership_compares_identity() {
    let (_engine, connection) = connection();
    let mut cache = StatementCache::new(4);
    let stored = compile(&connection, "INSERT INTO t VALUES (1)");
    let twin = compile(&connection, "INSERT INTO t VALUES (1)");
    cache.insert(stored.sql().to_string(), Arc::clone(&stored));
    assert!(cache.contains_handle(&stored));
    assert!(!cache.contains_handle(&twin));
}

#[test]
fn cache_drain_empties_every_entry() {
    let (_engine, connection) = connection();
    let mut cache = StatementCache::new(4);
    for table in ["a", "b", "c"] {
        let handle = compile(&connection, &format!("DELETE FROM {table}"));
        cache.insert(handle.sql().to_string(), handle);
    }
    assert_eq!(cache.drain().len(), 3);
    assert!(cache.is_empty());
}

#[test]
fn dispose_displaced_skips_in_use_handles() {
    let (engine, connection) = connection();
    let idle = compile(&connection, "DELETE FROM a");
    let held = compile(&connection, "DELETE FROM b");
    assert!(held.acquire());

    dispose_displaced(vec![Arc::clone(&idle), Arc::clone(&held)]).unwrap();

    assert!(idle.is_destroyed());
    assert!(!engine.is_live(idle.native()));
    assert!(!held.is_destroyed());
    assert!(engine.is_live(held.native()));
}

// ============================================================================
// SECTION: Config Tests
// ============================================================================

#[test]
fn config_load_rejects_overlong_component() {
    let path = PathBuf::from("a".repeat(MAX_PATH_COMPONENT_LENGTH + 1));
    let error = StatementCacheConfig::load(&path).unwrap_err();
    assert!(error.to_string().contains("component too long"), "{error}");
}

#[test]
fn config_load_rejects_overlong_path() {
    let component = "a".repeat(100);
    let mut path = PathBuf::new();
    while path.to_string_lossy().len() <= MAX_TOTAL_PATH_LENGTH {
        path.push(&component);
    }
    let error = StatementCacheConfig::load(&path).unwrap_err();
    assert!(error.to_string().contains("exceeds max length"), "{error}");
}

// crates/stmt-cache-core/tests/concurrent_programs.rs
// ============================================================================
// Module: Concurrent Program Tests
// Description: Many threads compiling the same cacheable SQL at once.
// Purpose: Ensure contention never blocks and every handle is destroyed once.
// Dependencies: stmt-cache-core
// ============================================================================

//! ## Overview
//! Worker threads repeatedly open, bind, execute and close programs for a
//! handful of SQL strings. Afterwards the cache must hold at most one handle
//! per SQL, none in use, and closing the connection must leave no live
//! native statement behind.

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

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Barrier;
use std::thread;

use stmt_cache_core::EngineCall;
use stmt_cache_core::Program;

mod common;
use crate::common::recording_connection;

const THREADS: usize = 8;
const ITERATIONS: i64 = 50;
const STATEMENTS: [&str; 3] = [
    "INSERT INTO events (id) VALUES (?)",
    "DELETE FROM events WHERE id = ?",
    "SELECT id FROM events WHERE id = ?",
];

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn concurrent_programs_share_cache_without_leaks() {
    let (engine, connection) = recording_connection();
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0 .. THREADS)
        .map(|worker| {
            let connection = connection.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for iteration in 0 .. ITERATIONS {
                    let sql = STATEMENTS[(worker + usize::try_from(iteration).unwrap()) % 3];
                    let program = Program::deferred(&connection, sql).unwrap();
                    program.bind_integer(1, iteration).unwrap();
                    program.execute().unwrap();
                    program.close().unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let stats = connection.stats();
    assert!(stats.cached_statements <= 2);
    assert!(stats.hits + stats.misses + stats.contention_fallbacks > 0);
    for sql in STATEMENTS {
        if let Some(handle) = connection.lookup_cached(sql) {
            assert!(!handle.is_in_use());
        }
    }
    assert_eq!(connection.open_program_count(), 0);

    connection.close().unwrap();
    assert_eq!(engine.live_count(), 0);

    let mut destroyed = HashSet::new();
    for call in engine.calls() {
        if let EngineCall::Destroy { statement } = call {
            assert!(destroyed.insert(statement), "statement destroyed twice");
        }
    }
    assert_eq!(destroyed.len(), engine.compile_count());
}

#[test]
fn contending_holders_never_share_a_handle() {
    let (_engine, connection) = recording_connection();
    let barrier = Arc::new(Barrier::new(THREADS));
    let sql = STATEMENTS[0];

    let workers: Vec<_> = (0 .. THREADS)
        .map(|_| {
            let connection = connection.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let program = Program::new(&connection, sql).unwrap();
                let id = program.statement_id();
                barrier.wait();
                (program, id)
            })
        })
        .collect();
    let held: Vec<(Program, u64)> =
        workers.into_iter().map(|worker| worker.join().unwrap()).collect();

    let ids: HashSet<u64> = held.iter().map(|(_, id)| *id).collect();
    assert_eq!(ids.len(), THREADS, "each simultaneous holder owns a distinct handle");
    assert_eq!(connection.stats().contention_fallbacks, (THREADS - 1) as u64);
    drop(held);
    assert_eq!(connection.cached_statement_count(), 1);
}

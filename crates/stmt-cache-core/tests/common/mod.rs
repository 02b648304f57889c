// crates/stmt-cache-core/tests/common/mod.rs
// =============================================================================
// Module: Statement Cache Test Helpers
// Description: Shared fixtures for connection and program integration tests.
// Purpose: Reduce duplication across integration tests for stmt-cache-core.
// =============================================================================

#![allow(dead_code, reason = "Test helpers are selectively used across suites.")]

use std::sync::Arc;

use stmt_cache_core::Connection;
use stmt_cache_core::EngineCall;
use stmt_cache_core::NativeStatement;
use stmt_cache_core::RecordingEngine;
use stmt_cache_core::StatementCacheConfig;

/// Opens a default connection over a fresh recording engine.
pub fn recording_connection() -> (Arc<RecordingEngine>, Connection) {
    let engine = Arc::new(RecordingEngine::new());
    let connection = Connection::with_defaults(engine.clone());
    (engine, connection)
}

/// Opens a connection with a specific cache capacity.
pub fn connection_with_capacity(max_sql_cache_size: usize) -> (Arc<RecordingEngine>, Connection) {
    let engine = Arc::new(RecordingEngine::new());
    let config = StatementCacheConfig {
        max_sql_cache_size,
        ..StatementCacheConfig::default()
    };
    let connection = Connection::open(engine.clone(), &config).expect("open connection");
    (engine, connection)
}

/// Builds a native statement identifier from a raw program statement id.
pub fn native(statement_id: u64) -> NativeStatement {
    NativeStatement::from_raw(statement_id).expect("compiled statement id")
}

/// Returns the compile calls in the log.
pub fn compiles(calls: &[EngineCall]) -> Vec<EngineCall> {
    calls.iter().filter(|call| matches!(call, EngineCall::Compile { .. })).cloned().collect()
}

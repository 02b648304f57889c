// crates/stmt-cache-sqlite/src/lib.rs
// ============================================================================
// Module: stmt-cache SQLite Engine
// Description: SQLite ExecutionEngine for the statement handle cache.
// Purpose: Back cached programs with a real embedded database.
// Dependencies: stmt-cache-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides [`SqliteEngine`], an [`stmt_cache_core::ExecutionEngine`]
//! over a single rusqlite connection. Open it from a [`SqliteEngineConfig`]
//! (file-backed, with journal, sync and busy-timeout pragmas) or in memory,
//! then hand it to [`stmt_cache_core::Connection`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod engine;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use engine::SqliteEngine;
pub use engine::SqliteEngineConfig;
pub use engine::SqliteEngineError;
pub use engine::SqliteJournalMode;
pub use engine::SqliteSyncMode;

// crates/stmt-cache-core/src/lib.rs
// ============================================================================
// Module: stmt-cache Core Library
// Description: Shared cache of compiled statement handles with deferred binds.
// Purpose: Reuse expensive native statement handles safely across programs.
// Dependencies: lru, serde, thiserror, toml, tracing
// ============================================================================

//! ## Overview
//! `stmt-cache-core` manages the lifecycle of compiled ("prepared") statement
//! handles produced by an [`ExecutionEngine`]. A [`Connection`] owns a bounded
//! [`StatementCache`] keyed by SQL text; each [`Program`] attaches to the cached
//! handle when it is idle, falls back to a private handle under contention, and
//! queues parameter binds until a handle exists.
//! Invariants:
//! - A SQL string maps to at most one cached [`CompiledHandle`].
//! - A handle marked in use has exactly one [`Program`] responsible for it.
//! - Every native statement is destroyed exactly once.
//! - SELECT and UPDATE statements never enter the shared cache.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod cache;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod handle;
pub mod kind;
pub mod program;
pub mod value;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use cache::CacheStatsSnapshot;
pub use cache::StatementCache;
pub use config::ConfigError;
pub use config::DEFAULT_MAX_SQL_CACHE_SIZE;
pub use config::MAX_SQL_CACHE_SIZE;
pub use config::StatementCacheConfig;
pub use connection::Connection;
pub use engine::EngineCall;
pub use engine::EngineError;
pub use engine::ExecutionEngine;
pub use engine::NativeStatement;
pub use engine::RecordingEngine;
pub use engine::StatementOutput;
pub use error::ProgramError;
pub use handle::CompiledHandle;
pub use kind::StatementKind;
pub use program::Program;
pub use value::PendingBind;
pub use value::SqlValue;

#[cfg(test)]
mod tests;

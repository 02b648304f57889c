// crates/stmt-cache-core/src/engine/mod.rs
// ============================================================================
// Module: Execution Engine Interface
// Description: Native statement primitives consumed by the handle cache.
// Purpose: Keep the cache independent of any concrete SQL engine.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! An [`ExecutionEngine`] compiles SQL text into opaque [`NativeStatement`]
//! identifiers and exposes the bind, clear, execute and destroy primitives
//! that programs drive. All primitives are synchronous and non-cancelable.
//! Engine failures surface as [`EngineError`] and are propagated unchanged
//! by the cache layer.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::num::NonZeroU64;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::value::SqlValue;

// ============================================================================
// SECTION: Native Statement
// ============================================================================

/// Opaque identifier for one native compiled statement.
///
/// # Invariants
/// - Identifiers are never zero; zero is reserved for "uncompiled".
/// - The cache layer never interprets the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeStatement(NonZeroU64);

impl NativeStatement {
    /// Wraps a raw engine identifier.
    #[must_use]
    pub const fn new(raw: NonZeroU64) -> Self {
        Self(raw)
    }

    /// Wraps a raw engine identifier, returning `None` for zero.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    /// Returns the raw engine identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for NativeStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by native engine primitives.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// SQL text could not be compiled.
    #[error("sql compile failed: {0}")]
    Compile(String),
    /// Parameter bind was rejected.
    #[error("bind failed: {0}")]
    Bind(String),
    /// Statement execution failed.
    #[error("statement execution failed: {0}")]
    Execute(String),
    /// The statement identifier is unknown or already destroyed.
    #[error("unknown native statement: {0}")]
    UnknownStatement(u64),
    /// Any other engine failure.
    #[error("native engine error: {0}")]
    Native(String),
}

// ============================================================================
// SECTION: Output
// ============================================================================

/// Result of executing a compiled statement once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatementOutput {
    /// Result column names, empty for statements without a result set.
    pub columns: Vec<String>,
    /// Result rows in engine order.
    pub rows: Vec<Vec<SqlValue>>,
    /// Rows changed by a data-modifying statement.
    pub changes: u64,
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Native statement primitives supplied by a SQL engine.
///
/// Implementations must be safe to call from multiple threads; the cache
/// never calls two primitives on the same statement concurrently.
pub trait ExecutionEngine: Send + Sync {
    /// Compiles SQL text into a native statement.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the SQL cannot be compiled.
    fn compile(&self, sql: &str) -> Result<NativeStatement, EngineError>;

    /// Releases a native statement. The identifier is invalid afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the statement is unknown.
    fn destroy(&self, statement: NativeStatement) -> Result<(), EngineError>;

    /// Binds SQL `NULL` at a 1-based position.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the bind is rejected.
    fn bind_null(&self, statement: NativeStatement, position: u32) -> Result<(), EngineError>;

    /// Binds an integer at a 1-based position.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the bind is rejected.
    fn bind_integer(
        &self,
        statement: NativeStatement,
        position: u32,
        value: i64,
    ) -> Result<(), EngineError>;

    /// Binds a real at a 1-based position.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the bind is rejected.
    fn bind_real(
        &self,
        statement: NativeStatement,
        position: u32,
        value: f64,
    ) -> Result<(), EngineError>;

    /// Binds text at a 1-based position.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the bind is rejected.
    fn bind_text(
        &self,
        statement: NativeStatement,
        position: u32,
        value: &str,
    ) -> Result<(), EngineError>;

    /// Binds bytes at a 1-based position.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the bind is rejected.
    fn bind_binary(
        &self,
        statement: NativeStatement,
        position: u32,
        value: &[u8],
    ) -> Result<(), EngineError>;

    /// Resets every binding of the statement to unbound (`NULL`).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the statement is unknown.
    fn clear_bindings(&self, statement: NativeStatement) -> Result<(), EngineError>;

    /// Executes the statement with its current bindings.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when execution fails.
    fn execute(&self, statement: NativeStatement) -> Result<StatementOutput, EngineError>;
}

// ============================================================================
// SECTION: Implementations
// ============================================================================

pub mod recording;

pub use recording::EngineCall;
pub use recording::RecordingEngine;

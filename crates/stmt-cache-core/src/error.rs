// crates/stmt-cache-core/src/error.rs
// ============================================================================
// Module: Program Errors
// Description: Error taxonomy for connections and programs.
// Purpose: Separate caller misuse from propagated engine failures.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Usage errors are raised synchronously at the call that breaks the contract
//! and leave no partial state behind. Engine errors pass through unchanged;
//! this layer never retries. Contention is not an error: it silently yields a
//! private handle.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::engine::EngineError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors returned by [`crate::Connection`] and [`crate::Program`] operations.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgramError {
    /// Caller misuse, such as an absent bind value or a closed connection.
    #[error("usage error: {0}")]
    Usage(String),
    /// Failure reported by the execution engine.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ProgramError {
    /// Builds a usage error from a message.
    pub(crate) fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// Returns true for caller misuse errors.
    #[must_use]
    pub const fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }
}

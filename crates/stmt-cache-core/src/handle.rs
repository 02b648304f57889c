// crates/stmt-cache-core/src/handle.rs
// ============================================================================
// Module: Compiled Handle
// Description: One native compiled statement plus its in-use token.
// Purpose: Guarantee single ownership while in use and a single destroy.
// Dependencies: tracing
// ============================================================================

//! ## Overview
//! A [`CompiledHandle`] wraps one [`NativeStatement`] produced by the
//! connection's engine. The in-use flag is a lightweight ownership token: it
//! is only flipped while the connection's cache lock is held, so the flag's
//! check-and-set is indivisible with the surrounding cache lookup.
//! Destruction is idempotent; a handle that is dropped without an explicit
//! destroy releases its native statement on drop.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use crate::connection::ConnectionShared;
use crate::engine::EngineError;
use crate::engine::ExecutionEngine;
use crate::engine::NativeStatement;

// ============================================================================
// SECTION: Handle
// ============================================================================

/// Native compiled statement shared through the connection cache.
///
/// # Invariants
/// - `in_use` is true only while exactly one program is responsible for it.
/// - The native statement is destroyed at most once.
/// - The connection back-reference never extends the connection's lifetime.
pub struct CompiledHandle {
    /// Engine-issued statement identifier.
    native: NativeStatement,
    /// SQL text the statement was compiled from.
    sql: String,
    /// Ownership token for cache-resident handles.
    in_use: AtomicBool,
    /// Set once the native statement has been released.
    destroyed: AtomicBool,
    /// Engine that owns the native statement.
    engine: Arc<dyn ExecutionEngine>,
    /// Non-owning back-reference used for cache membership checks.
    connection: Weak<ConnectionShared>,
}

impl CompiledHandle {
    /// Compiles `sql` on the connection's engine.
    pub(crate) fn compile(
        connection: &Arc<ConnectionShared>,
        sql: &str,
    ) -> Result<Arc<Self>, EngineError> {
        let engine = Arc::clone(connection.engine());
        let native = engine.compile(sql)?;
        Ok(Arc::new(Self {
            native,
            sql: sql.to_string(),
            in_use: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            engine,
            connection: Arc::downgrade(connection),
        }))
    }

    /// Returns the native statement identifier.
    #[must_use]
    pub const fn native(&self) -> NativeStatement {
        self.native
    }

    /// Returns the raw statement identifier.
    #[must_use]
    pub const fn statement_id(&self) -> u64 {
        self.native.get()
    }

    /// Returns the SQL text the handle was compiled from.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Returns true while a program holds the handle.
    #[must_use]
    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    /// Returns true once the native statement has been released.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Returns true when the owning connection's cache stores this handle.
    ///
    /// Takes the cache lock; callers already holding it must query the
    /// [`crate::StatementCache`] directly.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.connection
            .upgrade()
            .is_some_and(|connection| connection.lock_cache().contains_handle(self))
    }

    /// Returns the engine that owns the native statement.
    pub(crate) fn engine(&self) -> &dyn ExecutionEngine {
        self.engine.as_ref()
    }

    /// Marks the handle in use, returning false when another program holds it.
    pub(crate) fn acquire(&self) -> bool {
        self.in_use.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// Clears the in-use flag.
    pub(crate) fn release(&self) {
        self.in_use.store(false, Ordering::Release);
    }

    /// Releases the native statement; later calls are no-ops.
    pub(crate) fn destroy(&self) -> Result<(), EngineError> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.engine.destroy(self.native)
    }
}

impl fmt::Debug for CompiledHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledHandle")
            .field("native", &self.native)
            .field("sql", &self.sql)
            .field("in_use", &self.is_in_use())
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

impl Drop for CompiledHandle {
    fn drop(&mut self) {
        if let Err(error) = self.destroy() {
            tracing::warn!(
                statement_id = self.native.get(),
                error = %error,
                "stmt_cache.handle.drop_destroy_failed"
            );
        }
    }
}

// crates/stmt-cache-core/src/program.rs
// ============================================================================
// Module: Program
// Description: Prepared statement use-site with deferred binds.
// Purpose: Drive the compile-or-attach, bind replay and release protocol.
// Dependencies: tracing
// ============================================================================

//! ## Overview
//! A [`Program`] binds SQL text to a [`Connection`]. It either compiles on
//! construction ([`Program::new`]) or on first use ([`Program::deferred`]).
//! Binds issued while no handle exists are queued and replayed in order when
//! the program compiles.
//!
//! Handle acquisition:
//! - SELECT and UPDATE compile a private handle that never touches the cache.
//! - Other kinds attach to the cached handle when it is idle, compile and
//!   insert on a miss, and compile a private handle when the cached one is in
//!   use by another program. Acquisition never blocks on another program.
//!
//! Release: under the cache lock, a handle that is still the cached value is
//! marked idle; any other handle is destroyed.
//!
//! Every mutating operation serializes on a per-program lock. Programs do not
//! coordinate with each other beyond the cache lock; callers sharing one
//! program across threads must coordinate at a higher level.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use crate::cache::dispose_displaced;
use crate::connection::Connection;
use crate::connection::ConnectionShared;
use crate::engine::EngineError;
use crate::engine::StatementOutput;
use crate::error::ProgramError;
use crate::handle::CompiledHandle;
use crate::kind::StatementKind;
use crate::value::PendingBind;
use crate::value::SqlValue;

// ============================================================================
// SECTION: State
// ============================================================================

/// Mutable program state guarded by the per-program lock.
#[derive(Debug, Default)]
struct ProgramState {
    /// Compiled handle, absent while uncompiled.
    handle: Option<Arc<CompiledHandle>>,
    /// Binds queued while uncompiled, in issue order.
    pending: Vec<PendingBind>,
    /// Set once teardown has run.
    torn_down: bool,
}

impl ProgramState {
    /// Fails with a usage error after teardown.
    fn ensure_live(&self) -> Result<(), ProgramError> {
        if self.torn_down {
            Err(ProgramError::usage("program is closed"))
        } else {
            Ok(())
        }
    }
}

/// Shared program internals, reachable from the connection's registry.
pub(crate) struct ProgramInner {
    /// Registry identifier.
    id: u64,
    /// Trimmed SQL text.
    sql: String,
    /// Statement classification of `sql`.
    kind: StatementKind,
    /// Owning connection, pinned for the program's lifetime.
    connection: Arc<ConnectionShared>,
    /// Per-program lock.
    state: Mutex<ProgramState>,
}

impl ProgramInner {
    /// Locks the program state, recovering from poisoning.
    fn lock_state(&self) -> MutexGuard<'_, ProgramState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Compiles and replays pending binds unless a handle is already held.
    ///
    /// On failure the program stays uncompiled with its pending binds intact.
    fn compile_locked(&self, state: &mut ProgramState) -> Result<(), ProgramError> {
        if state.handle.is_some() {
            return Ok(());
        }
        let handle = self.acquire_handle()?;
        if let Err(error) = replay_pending(&handle, &state.pending) {
            if let Err(release_error) = self.dispose_handle(&handle) {
                tracing::warn!(
                    statement_id = handle.statement_id(),
                    error = %release_error,
                    "stmt_cache.program.replay_release_failed"
                );
            }
            return Err(error.into());
        }
        state.pending.clear();
        state.handle = Some(handle);
        Ok(())
    }

    /// Obtains a handle following the compile-or-attach protocol.
    fn acquire_handle(&self) -> Result<Arc<CompiledHandle>, ProgramError> {
        let connection = &self.connection;
        if !self.kind.is_cacheable() {
            let handle = CompiledHandle::compile(connection, &self.sql)?;
            connection.lock_cache().record_uncached_compile();
            if connection.log_lifecycle() {
                tracing::debug!(
                    statement_id = handle.statement_id(),
                    kind = self.kind.as_str(),
                    sql = %self.sql,
                    "stmt_cache.handle.compiled_uncached"
                );
            }
            return Ok(handle);
        }

        let mut cache = connection.lock_cache();
        if let Some(cached) = cache.get(&self.sql) {
            if cached.acquire() {
                cache.record_hit();
                if connection.log_lifecycle() {
                    tracing::debug!(
                        statement_id = cached.statement_id(),
                        sql = %self.sql,
                        "stmt_cache.handle.reused"
                    );
                }
                return Ok(cached);
            }
            let private = CompiledHandle::compile(connection, &self.sql)?;
            cache.record_contention();
            tracing::warn!(
                statement_id = private.statement_id(),
                cached_statement_id = cached.statement_id(),
                sql = %self.sql,
                "stmt_cache.handle.contention_fallback"
            );
            return Ok(private);
        }

        let handle = CompiledHandle::compile(connection, &self.sql)?;
        handle.acquire();
        cache.record_miss();
        let displaced = cache.insert(self.sql.clone(), Arc::clone(&handle));
        if connection.log_lifecycle() {
            tracing::debug!(
                statement_id = handle.statement_id(),
                sql = %self.sql,
                "stmt_cache.handle.cached"
            );
        }
        if let Err(error) = dispose_displaced(displaced) {
            tracing::warn!(error = %error, "stmt_cache.cache.evict_destroy_failed");
        }
        Ok(handle)
    }

    /// Returns a handle to the cache or destroys it when not cache-resident.
    fn dispose_handle(&self, handle: &CompiledHandle) -> Result<(), EngineError> {
        let cache = self.connection.lock_cache();
        if cache.contains_handle(handle) {
            handle.release();
            if self.connection.log_lifecycle() {
                tracing::debug!(statement_id = handle.statement_id(), "stmt_cache.handle.released");
            }
            return Ok(());
        }
        if self.connection.log_lifecycle() {
            tracing::debug!(statement_id = handle.statement_id(), "stmt_cache.handle.destroyed");
        }
        handle.destroy()
    }

    /// Relinquishes the held handle, if any.
    fn release_compiled(&self, state: &mut ProgramState) -> Result<(), EngineError> {
        match state.handle.take() {
            Some(handle) => self.dispose_handle(&handle),
            None => Ok(()),
        }
    }

    /// Disposes the handle and unpins the connection; idempotent.
    fn teardown(&self, deregister: bool) -> Result<(), ProgramError> {
        let mut state = self.lock_state();
        state.pending.clear();
        if state.torn_down {
            return Ok(());
        }
        state.torn_down = true;
        let disposition = self.release_compiled(&mut state);
        if deregister {
            self.connection.deregister_program(self.id);
        }
        let reference = self.connection.release_reference();
        disposition?;
        Ok(reference?)
    }

    /// Forced teardown used by the connection sweep; keeps the registry as is.
    pub(crate) fn release_from_container(&self) -> Result<(), ProgramError> {
        self.teardown(false)
    }
}

// ============================================================================
// SECTION: Bind Replay
// ============================================================================

/// Applies one bind to a compiled handle, dispatching on the value tag.
fn apply_bind(handle: &CompiledHandle, position: u32, value: &SqlValue) -> Result<(), EngineError> {
    let engine = handle.engine();
    let statement = handle.native();
    match value {
        SqlValue::Null => engine.bind_null(statement, position),
        SqlValue::Integer(value) => engine.bind_integer(statement, position, *value),
        SqlValue::Real(value) => engine.bind_real(statement, position, *value),
        SqlValue::Text(value) => engine.bind_text(statement, position, value),
        SqlValue::Binary(value) => engine.bind_binary(statement, position, value),
    }
}

/// Replays queued binds in issue order.
fn replay_pending(handle: &CompiledHandle, pending: &[PendingBind]) -> Result<(), EngineError> {
    for bind in pending {
        apply_bind(handle, bind.position, &bind.value)?;
    }
    Ok(())
}

/// Rejects positions that are not 1-based.
fn validate_position(position: u32) -> Result<(), ProgramError> {
    if position == 0 {
        return Err(ProgramError::usage("bind position must be 1-based"));
    }
    Ok(())
}

/// Builds the usage error for an absent text or binary value.
fn absent_value_error(position: u32) -> ProgramError {
    ProgramError::usage(format!("the bind value at index {position} is null"))
}

// ============================================================================
// SECTION: Program
// ============================================================================

/// Prepared statement use-site bound to a connection.
///
/// Dropping the program closes it.
///
/// # Invariants
/// - Pending binds exist only while no handle is held.
/// - The connection stays pinned until the program is torn down.
pub struct Program {
    /// Shared internals.
    inner: Arc<ProgramInner>,
}

impl Program {
    /// Creates a program and compiles it immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ProgramError::Usage`] when the connection is closed and
    /// [`ProgramError::Engine`] when compilation fails.
    pub fn new(connection: &Connection, sql: &str) -> Result<Self, ProgramError> {
        let program = Self::deferred(connection, sql)?;
        program.compile()?;
        Ok(program)
    }

    /// Creates a program that compiles on first [`Program::compile`] or
    /// [`Program::execute`].
    ///
    /// # Errors
    ///
    /// Returns [`ProgramError::Usage`] when the connection is closed.
    pub fn deferred(connection: &Connection, sql: &str) -> Result<Self, ProgramError> {
        let shared = Arc::clone(connection.shared());
        shared.verify_open()?;
        let sql = sql.trim().to_string();
        let kind = StatementKind::classify(&sql);
        shared.acquire_reference()?;
        let id = shared.next_program_id();
        let inner = Arc::new(ProgramInner {
            id,
            sql,
            kind,
            connection: shared,
            state: Mutex::new(ProgramState::default()),
        });
        inner.connection.register_program(id, Arc::downgrade(&inner));
        Ok(Self {
            inner,
        })
    }

    /// Returns the trimmed SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.inner.sql
    }

    /// Returns the statement classification.
    #[must_use]
    pub fn kind(&self) -> StatementKind {
        self.inner.kind
    }

    /// Returns the native statement identifier, or 0 while uncompiled.
    ///
    /// Intended for diagnostics and tests.
    #[must_use]
    pub fn statement_id(&self) -> u64 {
        self.inner.lock_state().handle.as_ref().map_or(0, |handle| handle.statement_id())
    }

    /// Returns true while a compiled handle is held.
    #[must_use]
    pub fn is_compiled(&self) -> bool {
        self.inner.lock_state().handle.is_some()
    }

    /// Returns true once the program has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock_state().torn_down
    }

    /// Returns the binds queued while uncompiled.
    #[must_use]
    pub fn pending_binds(&self) -> Vec<PendingBind> {
        self.inner.lock_state().pending.clone()
    }

    /// Binds SQL `NULL` at a 1-based position.
    ///
    /// # Errors
    ///
    /// See [`Program::bind_value`].
    pub fn bind_null(&self, position: u32) -> Result<(), ProgramError> {
        self.bind_value(position, SqlValue::Null)
    }

    /// Binds an integer at a 1-based position.
    ///
    /// # Errors
    ///
    /// See [`Program::bind_value`].
    pub fn bind_integer(&self, position: u32, value: i64) -> Result<(), ProgramError> {
        self.bind_value(position, SqlValue::Integer(value))
    }

    /// Binds a real at a 1-based position.
    ///
    /// # Errors
    ///
    /// See [`Program::bind_value`].
    pub fn bind_real(&self, position: u32, value: f64) -> Result<(), ProgramError> {
        self.bind_value(position, SqlValue::Real(value))
    }

    /// Binds text at a 1-based position. `None` is rejected; bind SQL `NULL`
    /// with [`Program::bind_null`].
    ///
    /// # Errors
    ///
    /// Returns [`ProgramError::Usage`] for `None`; otherwise see
    /// [`Program::bind_value`].
    pub fn bind_text<'a>(
        &self,
        position: u32,
        value: impl Into<Option<&'a str>>,
    ) -> Result<(), ProgramError> {
        let Some(value) = value.into() else {
            return Err(absent_value_error(position));
        };
        self.bind_value(position, SqlValue::Text(value.to_string()))
    }

    /// Binds bytes at a 1-based position. `None` is rejected; bind SQL `NULL`
    /// with [`Program::bind_null`].
    ///
    /// # Errors
    ///
    /// Returns [`ProgramError::Usage`] for `None`; otherwise see
    /// [`Program::bind_value`].
    pub fn bind_binary<'a>(
        &self,
        position: u32,
        value: impl Into<Option<&'a [u8]>>,
    ) -> Result<(), ProgramError> {
        let Some(value) = value.into() else {
            return Err(absent_value_error(position));
        };
        self.bind_value(position, SqlValue::Binary(value.to_vec()))
    }

    /// Binds a tagged value at a 1-based position.
    ///
    /// Applied to the native statement when compiled, queued otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ProgramError::Usage`] for position 0, a closed connection or
    /// a closed program, and [`ProgramError::Engine`] when the native bind
    /// fails.
    pub fn bind_value(&self, position: u32, value: SqlValue) -> Result<(), ProgramError> {
        validate_position(position)?;
        self.inner.connection.verify_open()?;
        let mut state = self.inner.lock_state();
        state.ensure_live()?;
        match &state.handle {
            Some(handle) => Ok(apply_bind(handle, position, &value)?),
            None => {
                state.pending.push(PendingBind {
                    position,
                    value,
                });
                Ok(())
            }
        }
    }

    /// Discards queued binds and resets native bindings to `NULL`.
    ///
    /// # Errors
    ///
    /// Returns [`ProgramError::Usage`] for a closed connection or program and
    /// [`ProgramError::Engine`] when the native reset fails.
    pub fn clear_bindings(&self) -> Result<(), ProgramError> {
        self.inner.connection.verify_open()?;
        let mut state = self.inner.lock_state();
        state.ensure_live()?;
        state.pending.clear();
        let Some(handle) = &state.handle else {
            return Ok(());
        };
        Ok(handle.engine().clear_bindings(handle.native())?)
    }

    /// Compiles now and replays queued binds; a no-op when already compiled.
    ///
    /// # Errors
    ///
    /// Returns [`ProgramError::Usage`] for a closed connection or program and
    /// [`ProgramError::Engine`] when compiling or replaying fails. On failure
    /// the program stays uncompiled with its queued binds intact.
    pub fn compile(&self) -> Result<(), ProgramError> {
        self.inner.connection.verify_open()?;
        let mut state = self.inner.lock_state();
        state.ensure_live()?;
        self.inner.compile_locked(&mut state)
    }

    /// Compiles if needed, then executes with the current bindings.
    ///
    /// # Errors
    ///
    /// Returns [`ProgramError::Usage`] for a closed connection or program and
    /// [`ProgramError::Engine`] when compiling or executing fails.
    pub fn execute(&self) -> Result<StatementOutput, ProgramError> {
        self.inner.connection.verify_open()?;
        let mut state = self.inner.lock_state();
        state.ensure_live()?;
        self.inner.compile_locked(&mut state)?;
        let handle = state
            .handle
            .as_ref()
            .ok_or_else(|| ProgramError::usage("program has no compiled statement"))?;
        Ok(handle.engine().execute(handle.native())?)
    }

    /// Closes the program: relinquishes the handle, unpins the connection and
    /// leaves the open-program registry. Later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`ProgramError::Engine`] when destroying the handle fails; the
    /// program is torn down regardless.
    pub fn close(&self) -> Result<(), ProgramError> {
        self.inner.teardown(true)
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("sql", &self.inner.sql)
            .field("kind", &self.inner.kind)
            .field("statement_id", &self.statement_id())
            .finish_non_exhaustive()
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        if let Err(error) = self.inner.teardown(true) {
            tracing::warn!(sql = %self.inner.sql, error = %error, "stmt_cache.program.drop_failed");
        }
    }
}

// crates/stmt-cache-core/src/connection.rs
// ============================================================================
// Module: Connection
// Description: Owner of the statement cache, program registry and pinning.
// Purpose: Provide the cache and lifecycle hooks that programs call into.
// Dependencies: tracing
// ============================================================================

//! ## Overview
//! A [`Connection`] wraps an [`ExecutionEngine`] with a bounded
//! [`StatementCache`], a registry of open programs, and a reference count that
//! pins the connection while programs are alive. Closing the connection sweeps
//! every registered program through forced teardown and releases the owner
//! reference; once the count reaches zero every cached handle is destroyed.
//!
//! Locks are never nested in the order cache → program. The reference lock may
//! take the cache lock during the final release.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::cache::CacheStatsSnapshot;
use crate::cache::StatementCache;
use crate::cache::dispose_displaced;
use crate::config::ConfigError;
use crate::config::MAX_SQL_CACHE_SIZE;
use crate::config::StatementCacheConfig;
use crate::engine::EngineError;
use crate::engine::ExecutionEngine;
use crate::error::ProgramError;
use crate::handle::CompiledHandle;
use crate::program::ProgramInner;

// ============================================================================
// SECTION: Shared State
// ============================================================================

/// State shared by a connection, its programs and its handles.
///
/// # Invariants
/// - `references` counts the owner plus every live program.
/// - Once `references` reaches zero the cache is empty and stays empty.
pub(crate) struct ConnectionShared {
    /// Engine supplying native primitives.
    engine: Arc<dyn ExecutionEngine>,
    /// Emits debug-level lifecycle events when set.
    log_lifecycle: bool,
    /// Cleared by [`Connection::close`].
    open: AtomicBool,
    /// Pinning reference count.
    references: Mutex<u32>,
    /// Compiled handle cache.
    cache: Mutex<StatementCache>,
    /// Open programs keyed by program identifier.
    programs: Mutex<HashMap<u64, Weak<ProgramInner>>>,
    /// Source of program identifiers.
    next_program_id: AtomicU64,
}

impl ConnectionShared {
    /// Returns the engine.
    pub(crate) const fn engine(&self) -> &Arc<dyn ExecutionEngine> {
        &self.engine
    }

    /// Returns true when lifecycle debug events are enabled.
    pub(crate) const fn log_lifecycle(&self) -> bool {
        self.log_lifecycle
    }

    /// Returns true until the connection is closed.
    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Fails with a usage error when the connection is closed.
    pub(crate) fn verify_open(&self) -> Result<(), ProgramError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ProgramError::usage("connection is closed"))
        }
    }

    /// Locks the statement cache, recovering from poisoning.
    pub(crate) fn lock_cache(&self) -> MutexGuard<'_, StatementCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the program registry, recovering from poisoning.
    fn lock_programs(&self) -> MutexGuard<'_, HashMap<u64, Weak<ProgramInner>>> {
        self.programs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pins the connection.
    pub(crate) fn acquire_reference(&self) -> Result<(), ProgramError> {
        let mut references = self.references.lock().unwrap_or_else(PoisonError::into_inner);
        if *references == 0 {
            return Err(ProgramError::usage("attempt to re-open an already-closed connection"));
        }
        *references = references
            .checked_add(1)
            .ok_or_else(|| ProgramError::usage("connection reference count overflow"))?;
        Ok(())
    }

    /// Unpins the connection, destroying every cached handle on the last release.
    pub(crate) fn release_reference(&self) -> Result<(), EngineError> {
        let mut references = self.references.lock().unwrap_or_else(PoisonError::into_inner);
        if *references == 0 {
            return Ok(());
        }
        *references -= 1;
        if *references > 0 {
            return Ok(());
        }
        self.open.store(false, Ordering::Release);
        let handles = self.lock_cache().drain();
        if self.log_lifecycle {
            tracing::debug!(cached = handles.len(), "stmt_cache.connection.released");
        }
        let mut first_error = None;
        for handle in handles {
            if let Err(error) = handle.destroy() {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Returns a fresh program identifier.
    pub(crate) fn next_program_id(&self) -> u64 {
        self.next_program_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Adds a program to the open-program registry.
    pub(crate) fn register_program(&self, id: u64, program: Weak<ProgramInner>) {
        self.lock_programs().insert(id, program);
    }

    /// Removes a program from the open-program registry.
    pub(crate) fn deregister_program(&self, id: u64) {
        self.lock_programs().remove(&id);
    }
}

// ============================================================================
// SECTION: Connection
// ============================================================================

/// Connection handle owning a statement cache.
///
/// Clones share the same connection state.
///
/// # Invariants
/// - A closed connection never reopens.
/// - Every program opened on the connection pins it until torn down.
#[derive(Clone)]
pub struct Connection {
    /// Shared connection state.
    shared: Arc<ConnectionShared>,
}

impl Connection {
    /// Opens a connection over `engine` with a validated cache configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration is invalid.
    pub fn open(
        engine: Arc<dyn ExecutionEngine>,
        config: &StatementCacheConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(engine, config))
    }

    /// Opens a connection with the default cache configuration.
    #[must_use]
    pub fn with_defaults(engine: Arc<dyn ExecutionEngine>) -> Self {
        Self::build(engine, &StatementCacheConfig::default())
    }

    /// Builds connection state holding the owner reference.
    fn build(engine: Arc<dyn ExecutionEngine>, config: &StatementCacheConfig) -> Self {
        Self {
            shared: Arc::new(ConnectionShared {
                engine,
                log_lifecycle: config.log_statement_lifecycle,
                open: AtomicBool::new(true),
                references: Mutex::new(1),
                cache: Mutex::new(StatementCache::new(config.max_sql_cache_size)),
                programs: Mutex::new(HashMap::new()),
                next_program_id: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the shared state for program construction.
    pub(crate) const fn shared(&self) -> &Arc<ConnectionShared> {
        &self.shared
    }

    /// Returns true until the connection is closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Fails when the connection is closed.
    ///
    /// # Errors
    ///
    /// Returns [`ProgramError::Usage`] when the connection is closed.
    pub fn verify_open(&self) -> Result<(), ProgramError> {
        self.shared.verify_open()
    }

    /// Pins the connection on behalf of an external holder.
    ///
    /// # Errors
    ///
    /// Returns [`ProgramError::Usage`] once every reference has been released.
    pub fn acquire_reference(&self) -> Result<(), ProgramError> {
        self.shared.acquire_reference()
    }

    /// Releases a reference taken with [`Connection::acquire_reference`].
    ///
    /// # Errors
    ///
    /// Returns [`ProgramError::Engine`] when destroying cached handles fails on
    /// the final release.
    pub fn release_reference(&self) -> Result<(), ProgramError> {
        Ok(self.shared.release_reference()?)
    }

    /// Returns the cached handle for `sql` without acquiring it.
    #[must_use]
    pub fn lookup_cached(&self, sql: &str) -> Option<Arc<CompiledHandle>> {
        self.shared.lock_cache().peek(sql.trim()).cloned()
    }

    /// Returns true when `handle` is the value currently cached for its SQL.
    #[must_use]
    pub fn is_cached(&self, handle: &CompiledHandle) -> bool {
        self.shared.lock_cache().contains_handle(handle)
    }

    /// Returns the number of cached handles.
    #[must_use]
    pub fn cached_statement_count(&self) -> usize {
        self.shared.lock_cache().len()
    }

    /// Returns the number of open programs.
    #[must_use]
    pub fn open_program_count(&self) -> usize {
        self.shared.lock_programs().len()
    }

    /// Returns the cache capacity.
    #[must_use]
    pub fn max_sql_cache_size(&self) -> usize {
        self.shared.lock_cache().max_size()
    }

    /// Grows the cache capacity.
    ///
    /// # Errors
    ///
    /// Returns [`ProgramError::Usage`] when `size` exceeds
    /// [`MAX_SQL_CACHE_SIZE`] or is smaller than the current capacity.
    pub fn set_max_sql_cache_size(&self, size: usize) -> Result<(), ProgramError> {
        if size > MAX_SQL_CACHE_SIZE {
            return Err(ProgramError::usage(format!(
                "max_sql_cache_size out of range: {size} (max {MAX_SQL_CACHE_SIZE})"
            )));
        }
        let mut cache = self.shared.lock_cache();
        if size < cache.max_size() {
            return Err(ProgramError::usage(format!(
                "cannot shrink max_sql_cache_size from {} to {size}",
                cache.max_size()
            )));
        }
        let displaced = cache.set_max_size(size);
        Ok(dispose_displaced(displaced)?)
    }

    /// Evicts the cached handle for `sql`, returning whether one was stored.
    ///
    /// An idle handle is destroyed immediately; a handle in use is destroyed
    /// by its holder on release.
    ///
    /// # Errors
    ///
    /// Returns [`ProgramError::Engine`] when destroying the handle fails.
    pub fn evict_cached(&self, sql: &str) -> Result<bool, ProgramError> {
        let mut cache = self.shared.lock_cache();
        let Some(handle) = cache.remove(sql.trim()) else {
            return Ok(false);
        };
        dispose_displaced(vec![handle])?;
        Ok(true)
    }

    /// Returns cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.shared.lock_cache().stats()
    }

    /// Closes the connection.
    ///
    /// Every open program is torn down without de-registration, then the owner
    /// reference is released. Calling `close` again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first [`ProgramError`] raised while tearing down programs or
    /// destroying cached handles; teardown continues past failures.
    pub fn close(&self) -> Result<(), ProgramError> {
        if !self.shared.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let programs: Vec<Arc<ProgramInner>> = self
            .shared
            .lock_programs()
            .drain()
            .filter_map(|(_, program)| program.upgrade())
            .collect();
        if self.shared.log_lifecycle {
            tracing::debug!(programs = programs.len(), "stmt_cache.connection.close");
        }
        let mut first_error = None;
        for program in programs {
            if let Err(error) = program.release_from_container() {
                first_error.get_or_insert(error);
            }
        }
        if let Err(error) = self.shared.release_reference() {
            first_error.get_or_insert(error.into());
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("open", &self.is_open())
            .field("cached_statements", &self.cached_statement_count())
            .field("open_programs", &self.open_program_count())
            .finish_non_exhaustive()
    }
}

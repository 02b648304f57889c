// crates/stmt-cache-core/src/cache.rs
// ============================================================================
// Module: Statement Cache
// Description: Per-connection LRU map from SQL text to compiled handles.
// Purpose: Avoid recompiling identical cacheable statements.
// Dependencies: lru, serde, tracing
// ============================================================================

//! ## Overview
//! [`StatementCache`] stores at most one [`CompiledHandle`] per SQL string and
//! lives behind the connection's cache lock. Every method assumes that lock is
//! held, which makes lookup, in-use check-and-set, insert and membership
//! checks atomic with respect to each other.
//!
//! Displaced entries (LRU overflow, replacement or explicit eviction) are
//! destroyed right away when idle. Displaced handles still in use are left to
//! their holder, who destroys them at release because they are no longer
//! cache-resident.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use lru::LruCache;
use serde::Deserialize;
use serde::Serialize;

use crate::engine::EngineError;
use crate::handle::CompiledHandle;

// ============================================================================
// SECTION: Stats
// ============================================================================

/// Cache outcome counters.
#[derive(Debug, Clone, Copy, Default)]
struct CacheCounters {
    /// Lookups that attached to an idle cached handle.
    hits: u64,
    /// Lookups that compiled and inserted a new handle.
    misses: u64,
    /// Lookups that found the cached handle in use.
    contention_fallbacks: u64,
    /// Compiles for kinds that bypass the cache.
    uncached_compiles: u64,
    /// Entries removed by overflow, replacement or explicit eviction.
    evictions: u64,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    /// Lookups that attached to an idle cached handle.
    pub hits: u64,
    /// Lookups that compiled and inserted a new handle.
    pub misses: u64,
    /// Lookups that found the cached handle in use and compiled a private copy.
    pub contention_fallbacks: u64,
    /// Compiles for kinds that bypass the cache.
    pub uncached_compiles: u64,
    /// Entries removed by overflow, replacement or explicit eviction.
    pub evictions: u64,
    /// Handles currently stored.
    pub cached_statements: usize,
    /// Configured capacity.
    pub max_sql_cache_size: usize,
}

// ============================================================================
// SECTION: Cache
// ============================================================================

/// LRU map from SQL text to the canonical compiled handle for that text.
///
/// # Invariants
/// - A SQL string maps to at most one handle.
/// - A handle is only stored under the SQL it was compiled from.
/// - `len() <= max_size()` after every mutation.
#[derive(Debug)]
pub struct StatementCache {
    /// Stored handles keyed by trimmed SQL text.
    entries: LruCache<String, Arc<CompiledHandle>>,
    /// Maximum number of stored handles.
    max_size: usize,
    /// Outcome counters.
    counters: CacheCounters,
}

impl StatementCache {
    /// Creates an empty cache bounded to `max_size` entries.
    pub(crate) fn new(max_size: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            max_size,
            counters: CacheCounters::default(),
        }
    }

    /// Returns the number of stored handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no handle is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the configured capacity.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// Returns the handle stored for `sql` without touching recency.
    #[must_use]
    pub fn peek(&self, sql: &str) -> Option<&Arc<CompiledHandle>> {
        self.entries.peek(sql)
    }

    /// Returns true when `handle` itself is stored, compared by identity.
    #[must_use]
    pub fn contains_handle(&self, handle: &CompiledHandle) -> bool {
        self.entries.peek(handle.sql()).is_some_and(|stored| std::ptr::eq(Arc::as_ptr(stored), handle))
    }

    /// Returns the handle stored for `sql`, marking it most recently used.
    pub(crate) fn get(&mut self, sql: &str) -> Option<Arc<CompiledHandle>> {
        self.entries.get(sql).cloned()
    }

    /// Stores `handle` under `sql` and returns every displaced handle.
    ///
    /// Nothing is stored when the capacity is zero.
    pub(crate) fn insert(
        &mut self,
        sql: String,
        handle: Arc<CompiledHandle>,
    ) -> Vec<Arc<CompiledHandle>> {
        let mut displaced = Vec::new();
        if self.max_size == 0 {
            return displaced;
        }
        if let Some((_, replaced)) = self.entries.push(sql, handle) {
            displaced.push(replaced);
        }
        displaced.extend(self.trim());
        self.counters.evictions += displaced.len() as u64;
        displaced
    }

    /// Removes the handle stored for `sql`.
    pub(crate) fn remove(&mut self, sql: &str) -> Option<Arc<CompiledHandle>> {
        let removed = self.entries.pop(sql);
        if removed.is_some() {
            self.counters.evictions += 1;
        }
        removed
    }

    /// Changes the capacity and returns handles displaced by the change.
    pub(crate) fn set_max_size(&mut self, max_size: usize) -> Vec<Arc<CompiledHandle>> {
        self.max_size = max_size;
        let displaced = self.trim();
        self.counters.evictions += displaced.len() as u64;
        displaced
    }

    /// Removes and returns every stored handle.
    pub(crate) fn drain(&mut self) -> Vec<Arc<CompiledHandle>> {
        let mut drained = Vec::with_capacity(self.entries.len());
        while let Some((_, handle)) = self.entries.pop_lru() {
            drained.push(handle);
        }
        drained
    }

    /// Pops least recently used entries until the capacity holds.
    fn trim(&mut self) -> Vec<Arc<CompiledHandle>> {
        let mut displaced = Vec::new();
        while self.entries.len() > self.max_size {
            match self.entries.pop_lru() {
                Some((_, handle)) => displaced.push(handle),
                None => break,
            }
        }
        displaced
    }

    /// Records an attach to an idle cached handle.
    pub(crate) const fn record_hit(&mut self) {
        self.counters.hits += 1;
    }

    /// Records a compile-and-insert.
    pub(crate) const fn record_miss(&mut self) {
        self.counters.misses += 1;
    }

    /// Records a private compile caused by contention.
    pub(crate) const fn record_contention(&mut self) {
        self.counters.contention_fallbacks += 1;
    }

    /// Records a compile for a kind that bypasses the cache.
    pub(crate) const fn record_uncached_compile(&mut self) {
        self.counters.uncached_compiles += 1;
    }

    /// Returns a snapshot of the counters and occupancy.
    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.counters.hits,
            misses: self.counters.misses,
            contention_fallbacks: self.counters.contention_fallbacks,
            uncached_compiles: self.counters.uncached_compiles,
            evictions: self.counters.evictions,
            cached_statements: self.entries.len(),
            max_sql_cache_size: self.max_size,
        }
    }
}

// ============================================================================
// SECTION: Disposal
// ============================================================================

/// Destroys displaced handles that no program holds.
///
/// Must run while the cache lock is still held so a concurrent release cannot
/// observe a half-disposed handle. Every handle is visited; the first engine
/// error is returned.
pub(crate) fn dispose_displaced(handles: Vec<Arc<CompiledHandle>>) -> Result<(), EngineError> {
    let mut first_error = None;
    for handle in handles {
        if handle.is_in_use() {
            tracing::debug!(
                statement_id = handle.statement_id(),
                "stmt_cache.handle.evicted_in_use"
            );
            continue;
        }
        tracing::debug!(statement_id = handle.statement_id(), "stmt_cache.handle.evicted");
        if let Err(error) = handle.destroy() {
            first_error.get_or_insert(error);
        }
    }
    first_error.map_or(Ok(()), Err)
}

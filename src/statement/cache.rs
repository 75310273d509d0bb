use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::error::SqlSessionError;

use super::kind::StatementKind;

/// Default number of compiled statements kept per connection.
pub const DEFAULT_STATEMENT_CACHE_SIZE: usize = 25;

/// The engine side of the cache: turns SQL text into compiled handles and releases them.
pub trait StatementCompiler {
    type Handle: Clone;

    /// Compile `sql` into a reusable handle.
    ///
    /// # Errors
    /// Returns the engine error if the statement cannot be compiled.
    fn compile(&mut self, sql: &str) -> Result<Self::Handle, SqlSessionError>;

    /// Release the cache's reference to `handle`.
    fn finalize(&mut self, handle: Self::Handle);

    /// Called once after every entry has been finalized by an invalidation.
    fn finalized_all(&mut self) {}
}

/// A handle handed out by the cache. Uncached handles must go back through
/// [`StatementCache::release`] so they can be finalized.
#[derive(Debug, Clone)]
pub struct Acquired<H> {
    pub handle: H,
    pub cached: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

#[derive(Debug)]
struct CacheEntry<H> {
    handle: H,
    last_use: u64,
}

/// Bounded LRU map from exact SQL text to compiled statement handles.
#[derive(Debug)]
pub struct StatementCache<H> {
    capacity: usize,
    entries: HashMap<String, CacheEntry<H>>,
    clock: u64,
    stats: CacheStats,
}

impl<H: Clone> StatementCache<H> {
    /// A capacity of zero disables caching: every lookup compiles a fresh handle.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity.min(DEFAULT_STATEMENT_CACHE_SIZE)),
            clock: 0,
            stats: CacheStats::default(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, sql: &str) -> bool {
        self.entries.contains_key(sql)
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Return the cached handle for `sql`, or compile and cache a new one.
    ///
    /// Schema-altering statements flush every cached entry before they are compiled.
    ///
    /// # Errors
    /// Returns the compiler's error on a miss that fails to compile; the cache is left as it was
    /// apart from a schema-change flush.
    pub fn compile_or_reuse<C>(
        &mut self,
        compiler: &mut C,
        sql: &str,
    ) -> Result<Acquired<H>, SqlSessionError>
    where
        C: StatementCompiler<Handle = H>,
    {
        self.clock += 1;
        if StatementKind::classify(sql).alters_schema() {
            self.invalidate_all(compiler);
        } else if let Some(entry) = self.entries.get_mut(sql) {
            entry.last_use = self.clock;
            self.stats.hits += 1;
            return Ok(Acquired {
                handle: entry.handle.clone(),
                cached: true,
            });
        }

        self.stats.misses += 1;
        let handle = compiler.compile(sql)?;
        if self.capacity == 0 {
            return Ok(Acquired {
                handle,
                cached: false,
            });
        }

        while self.entries.len() >= self.capacity {
            self.evict_lru(compiler);
        }
        self.entries.insert(
            sql.to_owned(),
            CacheEntry {
                handle: handle.clone(),
                last_use: self.clock,
            },
        );
        Ok(Acquired {
            handle,
            cached: true,
        })
    }

    /// Give back a handle obtained from [`compile_or_reuse`](Self::compile_or_reuse).
    pub fn release<C>(&mut self, compiler: &mut C, acquired: Acquired<H>)
    where
        C: StatementCompiler<Handle = H>,
    {
        if !acquired.cached {
            compiler.finalize(acquired.handle);
        }
    }

    /// Swap the cached handle for `sql` with `handle`, finalizing the old one. Does nothing
    /// when `sql` is not cached.
    pub fn replace<C>(&mut self, compiler: &mut C, sql: &str, handle: H)
    where
        C: StatementCompiler<Handle = H>,
    {
        if let Some(entry) = self.entries.get_mut(sql) {
            let stale = std::mem::replace(&mut entry.handle, handle);
            debug!(sql, "replacing re-prepared statement");
            compiler.finalize(stale);
        }
    }

    /// Finalize and drop every cached entry.
    pub fn invalidate_all<C>(&mut self, compiler: &mut C)
    where
        C: StatementCompiler<Handle = H>,
    {
        if self.entries.is_empty() {
            return;
        }
        debug!(entries = self.entries.len(), "invalidating statement cache");
        for (_, entry) in self.entries.drain() {
            compiler.finalize(entry.handle);
        }
        self.stats.invalidations += 1;
        compiler.finalized_all();
    }

    /// Evict least-recently-used entries until the cache fits its capacity.
    pub fn evict_on_capacity<C>(&mut self, compiler: &mut C)
    where
        C: StatementCompiler<Handle = H>,
    {
        while self.entries.len() > self.capacity {
            self.evict_lru(compiler);
        }
    }

    fn evict_lru<C>(&mut self, compiler: &mut C)
    where
        C: StatementCompiler<Handle = H>,
    {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_use)
            .map(|(sql, _)| sql.clone());
        if let Some(sql) = oldest
            && let Some(entry) = self.entries.remove(&sql)
        {
            self.stats.evictions += 1;
            compiler.finalize(entry.handle);
        }
    }
}

//! Leasing connections to one database.
//!
//! Outside WAL mode the pool holds a single connection and every lease is exclusive.
//! In WAL mode the primary connection takes write leases while up to
//! `max_reader_connections` read-only connections serve read leases concurrently.

mod lease;
mod reaper;

pub use lease::PooledConnection;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::connection::{AttachedDatabase, Connection, ConnectionRole};
use crate::error::SqlSessionError;
use crate::statement::CacheStats;
use crate::types::{ConnectionId, LeaseIntent};

use reaper::IdleReaper;

/// Upper bound on a single condition-variable wait when no deadline applies.
const MAX_WAIT_SLICE: Duration = Duration::from_secs(3600);

/// Pool of connections to one database.
///
/// Cloning is cheap; clones share the same connections.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
    config: Configuration,
    label: String,
    state: Mutex<PoolState>,
    released: Condvar,
    next_id: AtomicU64,
    reaper: Mutex<Option<IdleReaper>>,
}

struct LeaseRecord {
    role: ConnectionRole,
    depth: Arc<AtomicUsize>,
}

struct PoolState {
    closed: bool,
    wal_enabled: bool,
    foreign_keys_enabled: bool,
    /// Bumped whenever a pool-level setting changes.
    settings_generation: u64,
    idle_primary: Option<Connection>,
    idle_readers: Vec<Connection>,
    primary_open: bool,
    open_readers: usize,
    leased: HashMap<ConnectionId, LeaseRecord>,
}

impl PoolState {
    fn forget(&mut self, role: ConnectionRole) {
        match role {
            ConnectionRole::Primary => self.primary_open = false,
            ConnectionRole::Reader => self.open_readers = self.open_readers.saturating_sub(1),
        }
    }

    fn open_transactions(&self) -> usize {
        self.leased
            .values()
            .filter(|record| record.depth.load(Ordering::SeqCst) > 0)
            .count()
    }

    fn idle_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.idle_primary
            .iter_mut()
            .chain(self.idle_readers.iter_mut())
    }
}

/// Diagnostic snapshot of one connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub id: ConnectionId,
    pub role: ConnectionRole,
    pub leased: bool,
    pub transaction_depth: usize,
    /// Only available for idle connections.
    pub cached_statements: Option<usize>,
    pub cache: Option<CacheStats>,
    pub attached_databases: Option<Vec<AttachedDatabase>>,
}

/// Diagnostic snapshot of the pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub database: String,
    pub closed: bool,
    pub wal_enabled: bool,
    pub foreign_keys_enabled: bool,
    pub open_connections: usize,
    /// Upper bound on `open_connections` in the current journal mode.
    pub max_connections: usize,
    pub leased_connections: usize,
    pub connections: Vec<ConnectionStats>,
}

impl ConnectionPool {
    /// Validate `config`, open the primary connection and start the idle reaper.
    ///
    /// # Errors
    /// Returns `SqlSessionError::ConfigError` for an invalid configuration, or the engine
    /// error if the primary connection cannot be opened or put into the requested journal
    /// mode.
    pub fn open(config: Configuration) -> Result<Self, SqlSessionError> {
        config.validate()?;
        let label = config.label();
        let inner = Arc::new(PoolInner {
            state: Mutex::new(PoolState {
                closed: false,
                wal_enabled: false,
                foreign_keys_enabled: config.foreign_keys_enabled,
                settings_generation: 0,
                idle_primary: None,
                idle_readers: Vec::new(),
                primary_open: false,
                open_readers: 0,
                leased: HashMap::new(),
            }),
            label,
            config,
            released: Condvar::new(),
            next_id: AtomicU64::new(1),
            reaper: Mutex::new(None),
        });
        inner.open_primary()?;

        if let Some(timeout) = inner.config.idle_timeout
            && !inner.config.is_in_memory()
        {
            let reaper = IdleReaper::spawn(Arc::downgrade(&inner), timeout)?;
            *inner.reaper.lock().unwrap_or_else(PoisonError::into_inner) = Some(reaper);
        }

        info!(
            db = %inner.label,
            wal = inner.lock_state().wal_enabled,
            "opened connection pool"
        );
        Ok(Self { inner })
    }

    #[must_use]
    pub fn config(&self) -> &Configuration {
        &self.inner.config
    }

    /// The database path with personal data masked.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock_state().closed
    }

    #[must_use]
    pub fn is_wal_enabled(&self) -> bool {
        self.inner.lock_state().wal_enabled
    }

    #[must_use]
    pub fn foreign_keys_enabled(&self) -> bool {
        self.inner.lock_state().foreign_keys_enabled
    }

    /// Lease a connection, waiting at most `timeout`.
    ///
    /// # Errors
    /// Returns `SqlSessionError::LeaseTimeout` when no suitable connection frees up in
    /// time, `SqlSessionError::PoolClosed` after [`ConnectionPool::close_all`], or the
    /// engine error if a new connection cannot be opened.
    pub fn acquire(
        &self,
        intent: LeaseIntent,
        timeout: Duration,
    ) -> Result<PooledConnection, SqlSessionError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.inner.lock_state();
        loop {
            if state.closed {
                return Err(SqlSessionError::PoolClosed);
            }
            if let Some(mut conn) = self.inner.take_connection(&mut state, intent)? {
                state.leased.insert(
                    conn.id(),
                    LeaseRecord {
                        role: conn.role(),
                        depth: conn.depth_handle(),
                    },
                );
                drop(state);
                conn.prepare_for_lease(intent);
                debug!(connection = %conn.id(), ?intent, "leased connection");
                return Ok(PooledConnection::new(conn, Arc::clone(&self.inner), intent));
            }

            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => MAX_WAIT_SLICE,
            };
            if remaining.is_zero() {
                warn!(db = %self.inner.label, ?intent, ?timeout, "timed out waiting for a connection lease");
                return Err(SqlSessionError::LeaseTimeout(timeout));
            }
            let (guard, _) = self
                .inner
                .released
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// Lease for reading with the configured lease timeout.
    ///
    /// # Errors
    /// See [`ConnectionPool::acquire`].
    pub fn acquire_read(&self) -> Result<PooledConnection, SqlSessionError> {
        self.acquire(LeaseIntent::Read, self.inner.config.lease_timeout)
    }

    /// Lease for writing with the configured lease timeout.
    ///
    /// # Errors
    /// See [`ConnectionPool::acquire`].
    pub fn acquire_write(&self) -> Result<PooledConnection, SqlSessionError> {
        self.acquire(LeaseIntent::Write, self.inner.config.lease_timeout)
    }

    /// Switch between WAL and rollback-journal mode.
    ///
    /// Returns `Ok(false)` when WAL cannot apply to this database (in-memory, read-only,
    /// or the primary connection has attached databases) and `Ok(true)` once the pool is
    /// in the requested mode, including when it already was.
    ///
    /// # Errors
    /// Returns `SqlSessionError::ConcurrencyConflict` while any connection is leased or in
    /// a transaction, `SqlSessionError::PoolClosed` after close, or the engine error. The
    /// journal mode is unchanged on error.
    pub fn set_wal_enabled(&self, enabled: bool) -> Result<bool, SqlSessionError> {
        let config = &self.inner.config;
        if config.is_in_memory() || config.is_read_only() {
            debug!(db = %self.inner.label, "write-ahead logging not available for this database");
            return Ok(false);
        }

        let mut state = self.inner.lock_state();
        if state.closed {
            return Err(SqlSessionError::PoolClosed);
        }
        if state.wal_enabled == enabled {
            return Ok(true);
        }
        ensure_quiescent(&state, "change the journal mode")?;

        let mut primary = match state.idle_primary.take() {
            Some(conn) => conn,
            None => {
                let conn = self.inner.new_connection(&state, ConnectionRole::Primary)?;
                state.primary_open = true;
                conn
            }
        };
        if enabled {
            match primary.has_attached_databases() {
                Ok(false) => {}
                Ok(true) => {
                    state.idle_primary = Some(primary);
                    info!(db = %self.inner.label, "not enabling write-ahead logging: databases are attached");
                    return Ok(false);
                }
                Err(err) => {
                    state.idle_primary = Some(primary);
                    return Err(err);
                }
            }
        } else {
            let readers = std::mem::take(&mut state.idle_readers);
            state.open_readers = state.open_readers.saturating_sub(readers.len());
            close_connections(readers);
        }

        let switched = primary.set_write_ahead_logging(enabled);
        state.idle_primary = Some(primary);
        switched?;
        state.wal_enabled = enabled;
        self.inner.released.notify_all();
        info!(db = %self.inner.label, wal = enabled, "changed journal mode");
        Ok(true)
    }

    /// Toggle foreign-key enforcement on every connection. Idle connections change now;
    /// leased connections change when they are released.
    ///
    /// # Errors
    /// Returns `SqlSessionError::ConcurrencyConflict` while any connection is in a
    /// transaction, or the engine error. On error no connection is changed.
    pub fn set_foreign_keys_enabled(&self, enabled: bool) -> Result<(), SqlSessionError> {
        let mut state = self.inner.lock_state();
        if state.closed {
            return Err(SqlSessionError::PoolClosed);
        }
        if state.foreign_keys_enabled == enabled {
            return Ok(());
        }
        let open = state.open_transactions();
        if open > 0 {
            return Err(SqlSessionError::conflict(format!(
                "cannot change foreign key enforcement: {open} connection(s) in a transaction"
            )));
        }

        let previous = state.settings_generation;
        let generation = previous + 1;
        let mut applied: Vec<ConnectionId> = Vec::new();
        let mut failure = None;
        for conn in state.idle_mut() {
            match conn.apply_settings(enabled, generation) {
                Ok(()) => applied.push(conn.id()),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = failure {
            for conn in state.idle_mut().filter(|conn| applied.contains(&conn.id())) {
                if let Err(revert) = conn.apply_settings(!enabled, previous) {
                    warn!(connection = %conn.id(), "reverting foreign key setting failed: {revert}");
                }
            }
            return Err(err);
        }

        state.foreign_keys_enabled = enabled;
        state.settings_generation = generation;
        info!(db = %self.inner.label, enabled, "changed foreign key enforcement");
        Ok(())
    }

    /// Close idle connections unused for longer than the idle timeout. Connections with
    /// attached databases are kept. Returns the number of connections closed.
    pub fn reclaim_idle(&self) -> usize {
        self.inner.reclaim_idle()
    }

    /// Stop leasing, wait up to the shutdown grace period for outstanding leases, and close
    /// every idle connection. Leases returned later are closed on release. Idempotent.
    ///
    /// # Errors
    /// Returns the first engine error reported while closing a connection; every connection
    /// is closed regardless.
    pub fn close_all(&self) -> Result<(), SqlSessionError> {
        let mut state = self.inner.lock_state();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        self.inner.released.notify_all();

        let deadline = Instant::now().checked_add(self.inner.config.shutdown_grace);
        while !state.leased.is_empty() {
            let remaining = deadline.map_or(MAX_WAIT_SLICE, |deadline| {
                deadline.saturating_duration_since(Instant::now())
            });
            if remaining.is_zero() {
                warn!(
                    db = %self.inner.label,
                    outstanding = state.leased.len(),
                    "shutdown grace period elapsed; outstanding leases close on release"
                );
                break;
            }
            let (guard, _) = self
                .inner
                .released
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }

        let mut idle: Vec<Connection> = state.idle_primary.take().into_iter().collect();
        idle.append(&mut state.idle_readers);
        for conn in &idle {
            state.forget(conn.role());
        }
        drop(state);

        let mut first_error = None;
        for conn in idle {
            let id = conn.id();
            if let Err(err) = conn.close() {
                warn!(connection = %id, "error closing connection: {err}");
                first_error.get_or_insert(err);
            }
        }
        if let Some(reaper) = self
            .inner
            .reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reaper.stop();
        }
        info!(db = %self.inner.label, "closed connection pool");
        first_error.map_or(Ok(()), Err)
    }

    /// Snapshot of every open connection.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock_state();
        let mut connections: Vec<ConnectionStats> = state
            .idle_primary
            .iter()
            .chain(state.idle_readers.iter())
            .map(|conn| ConnectionStats {
                id: conn.id(),
                role: conn.role(),
                leased: false,
                transaction_depth: conn.transaction_depth(),
                cached_statements: Some(conn.statement_cache().len()),
                cache: Some(conn.statement_cache().stats()),
                attached_databases: conn.attached_databases().ok(),
            })
            .collect();
        connections.extend(state.leased.iter().map(|(id, record)| ConnectionStats {
            id: *id,
            role: record.role,
            leased: true,
            transaction_depth: record.depth.load(Ordering::SeqCst),
            cached_statements: None,
            cache: None,
            attached_databases: None,
        }));
        connections.sort_by_key(|conn| conn.id);
        PoolStats {
            database: self.inner.label.clone(),
            closed: state.closed,
            wal_enabled: state.wal_enabled,
            foreign_keys_enabled: state.foreign_keys_enabled,
            open_connections: usize::from(state.primary_open) + state.open_readers,
            max_connections: self.inner.config.max_connections(state.wal_enabled),
            leased_connections: state.leased.len(),
            connections,
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("database", &self.inner.label)
            .finish_non_exhaustive()
    }
}

fn ensure_quiescent(state: &PoolState, action: &str) -> Result<(), SqlSessionError> {
    let open = state.open_transactions();
    if open > 0 {
        return Err(SqlSessionError::conflict(format!(
            "cannot {action}: {open} connection(s) in a transaction"
        )));
    }
    if !state.leased.is_empty() {
        return Err(SqlSessionError::conflict(format!(
            "cannot {action}: {} connection(s) leased",
            state.leased.len()
        )));
    }
    Ok(())
}

fn close_connections(connections: Vec<Connection>) {
    for conn in connections {
        let id = conn.id();
        if let Err(err) = conn.close() {
            warn!(connection = %id, "error closing connection: {err}");
        }
    }
}

impl PoolInner {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_connection(
        &self,
        state: &PoolState,
        role: ConnectionRole,
    ) -> Result<Connection, SqlSessionError> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        Connection::open(
            id,
            role,
            &self.config,
            state.foreign_keys_enabled,
            state.settings_generation,
        )
    }

    /// Open the primary connection at pool start and put it in the configured journal mode.
    fn open_primary(&self) -> Result<(), SqlSessionError> {
        let mut state = self.lock_state();
        let mut primary = self.new_connection(&state, ConnectionRole::Primary)?;
        if !self.config.is_in_memory() && !self.config.is_read_only() {
            let want_wal = self.config.open_flags.enable_write_ahead_logging;
            let is_wal = primary.journal_mode()? == "wal";
            if want_wal != is_wal {
                primary.set_write_ahead_logging(want_wal)?;
            }
            state.wal_enabled = want_wal;
        }
        state.primary_open = true;
        state.idle_primary = Some(primary);
        Ok(())
    }

    fn take_connection(
        &self,
        state: &mut PoolState,
        intent: LeaseIntent,
    ) -> Result<Option<Connection>, SqlSessionError> {
        let max_readers = self.config.max_reader_connections;
        if !intent.is_write() && state.wal_enabled && max_readers > 0 {
            if let Some(conn) = state.idle_readers.pop() {
                return Ok(Some(conn));
            }
            if state.open_readers < max_readers && state.primary_open {
                let conn = self.new_connection(state, ConnectionRole::Reader)?;
                state.open_readers += 1;
                return Ok(Some(conn));
            }
        }
        if let Some(conn) = state.idle_primary.take() {
            return Ok(Some(conn));
        }
        if !state.primary_open {
            let conn = self.new_connection(state, ConnectionRole::Primary)?;
            state.primary_open = true;
            return Ok(Some(conn));
        }
        Ok(None)
    }

    /// Take a connection back from a lease.
    pub(crate) fn release(&self, mut conn: Connection) {
        conn.reset_after_lease();
        conn.touch();

        let mut state = self.lock_state();
        state.leased.remove(&conn.id());
        let role = conn.role();
        let keep = !state.closed && (role == ConnectionRole::Primary || state.wal_enabled);
        let retired = if keep {
            if conn.settings_generation() != state.settings_generation
                && let Err(err) =
                    conn.apply_settings(state.foreign_keys_enabled, state.settings_generation)
            {
                warn!(connection = %conn.id(), "applying pool settings on release failed: {err}");
            }
            match role {
                ConnectionRole::Primary => state.idle_primary = Some(conn),
                ConnectionRole::Reader => state.idle_readers.push(conn),
            }
            None
        } else {
            state.forget(role);
            Some(conn)
        };
        self.released.notify_all();
        drop(state);

        if let Some(conn) = retired {
            debug!(connection = %conn.id(), "closing connection returned after close");
            close_connections(vec![conn]);
        }
    }

    pub(crate) fn reclaim_idle(&self) -> usize {
        let Some(timeout) = self.config.idle_timeout else {
            return 0;
        };
        if self.config.is_in_memory() {
            return 0;
        }
        let now = Instant::now();
        let mut state = self.lock_state();
        if state.closed {
            return 0;
        }

        let mut expired = Vec::new();
        if state
            .idle_primary
            .as_ref()
            .is_some_and(|conn| reclaimable(conn, now, timeout))
            && let Some(conn) = state.idle_primary.take()
        {
            state.forget(ConnectionRole::Primary);
            expired.push(conn);
        }
        let (stale, fresh): (Vec<Connection>, Vec<Connection>) =
            std::mem::take(&mut state.idle_readers)
                .into_iter()
                .partition(|conn| reclaimable(conn, now, timeout));
        state.idle_readers = fresh;
        for _ in &stale {
            state.forget(ConnectionRole::Reader);
        }
        expired.extend(stale);
        drop(state);

        let count = expired.len();
        close_connections(expired);
        if count > 0 {
            debug!(db = %self.label, closed = count, "reclaimed idle connections");
        }
        count
    }
}

fn reclaimable(conn: &Connection, now: Instant, timeout: Duration) -> bool {
    if !conn.idle_longer_than(now, timeout) {
        return false;
    }
    match conn.has_attached_databases() {
        Ok(attached) => !attached,
        Err(err) => {
            warn!(connection = %conn.id(), "could not list attached databases: {err}");
            false
        }
    }
}

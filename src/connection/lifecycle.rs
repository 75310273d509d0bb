use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::Configuration;
use crate::engine::{Params, SqliteCompiler, configure_lookaside, describe};
use crate::error::SqlSessionError;
use crate::statement::{Acquired, PreparedStatement, StatementCache};
use crate::transaction::TransactionStack;
use crate::types::{ConnectionId, LeaseIntent, RowValues, TransactionMode};

use super::{Connection, ConnectionRole};

impl Connection {
    /// Open a connection and apply the per-connection settings from `config`.
    pub(crate) fn open(
        id: ConnectionId,
        role: ConnectionRole,
        config: &Configuration,
        foreign_keys_enabled: bool,
        settings_generation: u64,
    ) -> Result<Self, SqlSessionError> {
        let read_only = config.is_read_only() || role == ConnectionRole::Reader;
        let flags = config.open_flags.to_engine(read_only);
        let conn = rusqlite::Connection::open_with_flags(&config.path, flags)?;
        if let Some(lookaside) = config.lookaside {
            configure_lookaside(&conn, lookaside.slot_size, lookaside.slot_count)?;
        }
        conn.set_prepared_statement_cache_capacity(config.max_statement_cache_size);
        conn.busy_timeout(config.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", foreign_keys_enabled)?;

        debug!(connection = %id, ?role, db = %config.label(), "opened connection");
        Ok(Self {
            id,
            role,
            read_only,
            conn,
            cache: StatementCache::new(config.max_statement_cache_size),
            transactions: TransactionStack::new(Arc::new(AtomicUsize::new(0))),
            default_mode: TransactionMode::Deferred,
            label: config.label(),
            last_used_at: Instant::now(),
            settings_generation,
            liveness: Arc::new(()),
        })
    }

    /// Roll back anything still open and close the engine handle.
    ///
    /// Outstanding cursors observe the close through their liveness token.
    pub(crate) fn close(mut self) -> Result<(), SqlSessionError> {
        if self.in_transaction() {
            self.rollback_all();
        }
        let mut compiler = SqliteCompiler::new(&self.conn);
        self.cache.invalidate_all(&mut compiler);
        drop(self.liveness);
        debug!(connection = %self.id, db = %self.label, "closing connection");
        self.conn.close().map_err(|(_, err)| SqlSessionError::SqliteError(err))
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.role == ConnectionRole::Primary
    }

    /// The statement cache of this connection.
    #[must_use]
    pub fn statement_cache(&self) -> &StatementCache<Arc<PreparedStatement>> {
        &self.cache
    }

    #[must_use]
    pub fn last_used_at(&self) -> Instant {
        self.last_used_at
    }

    pub(crate) fn idle_longer_than(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_used_at) > timeout
    }

    pub(crate) fn touch(&mut self) {
        self.last_used_at = Instant::now();
    }

    pub(crate) fn liveness_token(&self) -> Weak<()> {
        Arc::downgrade(&self.liveness)
    }

    /// Transaction depth, readable by the pool while the connection is leased.
    pub(crate) fn depth_handle(&self) -> Arc<AtomicUsize> {
        self.transactions.depth_handle()
    }

    pub(crate) fn settings_generation(&self) -> u64 {
        self.settings_generation
    }

    /// Reset per-lease state before handing the connection out.
    pub(crate) fn prepare_for_lease(&mut self, intent: LeaseIntent) {
        self.default_mode = if intent.is_write() && !self.is_read_only() {
            TransactionMode::Immediate
        } else {
            TransactionMode::Deferred
        };
        self.touch();
    }

    /// Apply pool-level settings that changed while this connection was leased.
    pub(crate) fn apply_settings(
        &mut self,
        foreign_keys_enabled: bool,
        generation: u64,
    ) -> Result<(), SqlSessionError> {
        self.conn
            .pragma_update(None, "foreign_keys", foreign_keys_enabled)
            .map_err(|source| self.engine_error("PRAGMA foreign_keys", source))?;
        self.settings_generation = generation;
        Ok(())
    }

    /// Annotate an engine failure with this connection's id, depth and the failing SQL.
    pub(crate) fn engine_error(&self, sql: &str, source: rusqlite::Error) -> SqlSessionError {
        SqlSessionError::Engine {
            connection_id: self.id,
            depth: self.transactions.depth(),
            sql: sql.to_owned(),
            source,
        }
    }

    fn annotate(&self, sql: &str, err: SqlSessionError) -> SqlSessionError {
        match err {
            SqlSessionError::SqliteError(source) => self.engine_error(sql, source),
            other => other,
        }
    }

    /// Look `sql` up in the statement cache, compiling it on a miss.
    pub(crate) fn acquire_statement(
        &mut self,
        sql: &str,
    ) -> Result<Acquired<Arc<PreparedStatement>>, SqlSessionError> {
        let mut compiler = SqliteCompiler::new(&self.conn);
        let acquired = self.cache.compile_or_reuse(&mut compiler, sql);
        acquired.map_err(|err| self.annotate(sql, err))
    }

    pub(crate) fn release_statement(&mut self, acquired: Acquired<Arc<PreparedStatement>>) {
        let mut compiler = SqliteCompiler::new(&self.conn);
        self.cache.release(&mut compiler, acquired);
    }

    /// Drop every cached statement on this connection.
    pub fn invalidate_statement_cache(&mut self) {
        let mut compiler = SqliteCompiler::new(&self.conn);
        self.cache.invalidate_all(&mut compiler);
    }

    /// Compile (or reuse) `sql`, check the argument count, and run `run` against the bound
    /// engine statement. Returns the compiled handle alongside the result.
    ///
    /// When the engine re-prepared the statement during `run` because another connection
    /// changed the schema, the cached handle is replaced with the refreshed metadata.
    pub(crate) fn run_prepared<R>(
        &mut self,
        sql: &str,
        args: &[RowValues],
        run: impl FnOnce(&mut rusqlite::Statement<'_>, &Params) -> Result<R, rusqlite::Error>,
    ) -> Result<(R, Arc<PreparedStatement>), SqlSessionError> {
        let acquired = self.acquire_statement(sql)?;
        let handle = Arc::clone(&acquired.handle);
        let outcome = if handle.parameter_count() == args.len() {
            let params = Params::convert(args);
            self.conn
                .prepare_cached(sql)
                .and_then(|mut stmt| {
                    let value = run(&mut *stmt, &params)?;
                    let unchanged = stmt
                        .column_names()
                        .into_iter()
                        .eq(handle.column_names().iter().map(String::as_str));
                    let refreshed = (!unchanged).then(|| Arc::new(describe(sql, &stmt)));
                    Ok((value, refreshed))
                })
                .map_err(|source| self.engine_error(sql, source))
        } else {
            Err(SqlSessionError::usage(format!(
                "statement expects {} bind arguments but {} were supplied: {sql}",
                handle.parameter_count(),
                args.len()
            )))
        };
        self.release_statement(acquired);
        self.touch();
        let (value, refreshed) = outcome?;
        let handle = match refreshed {
            Some(fresh) => {
                let mut compiler = SqliteCompiler::new(&self.conn);
                self.cache.replace(&mut compiler, sql, Arc::clone(&fresh));
                fresh
            }
            None => handle,
        };
        Ok((value, handle))
    }

    /// Run a statement batch directly on the engine, outside the statement cache.
    pub(crate) fn run_batch(&mut self, sql: &str) -> Result<(), SqlSessionError> {
        self.touch();
        self.conn
            .execute_batch(sql)
            .map_err(|source| self.engine_error(sql, source))
    }

    /// Rows changed by the most recent write statement on this connection.
    pub(crate) fn last_changes(&self) -> usize {
        usize::try_from(self.conn.changes()).unwrap_or(usize::MAX)
    }

    /// True while the engine itself reports an open transaction.
    pub(crate) fn engine_in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }
}

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::SqlSessionError;
use crate::transaction::{FrameEnd, TransactionListener};
use crate::types::TransactionMode;

use super::Connection;

const ROLLBACK_BUSY_RETRIES: &[Duration] = &[
    Duration::from_millis(10),
    Duration::from_millis(25),
    Duration::from_millis(50),
];

impl Connection {
    /// Begin a transaction using the lease's default mode: `BEGIN IMMEDIATE` for write
    /// leases, `BEGIN DEFERRED` for read leases. Nested calls open a savepoint.
    ///
    /// # Errors
    /// Returns `SqlSessionError::Usage` if the current frame is already marked successful,
    /// or the engine error if BEGIN/SAVEPOINT fails. The stack is unchanged on failure.
    pub fn begin_transaction(
        &mut self,
        listener: Option<Arc<dyn TransactionListener>>,
    ) -> Result<(), SqlSessionError> {
        self.begin_transaction_with_mode(self.default_mode, listener)
    }

    /// Begin a transaction with an explicit mode. The mode only applies to the outermost
    /// frame; nested frames are savepoints.
    ///
    /// # Errors
    /// See [`Connection::begin_transaction`].
    pub fn begin_transaction_with_mode(
        &mut self,
        mode: TransactionMode,
        listener: Option<Arc<dyn TransactionListener>>,
    ) -> Result<(), SqlSessionError> {
        let sql = self.transactions.begin_sql(mode)?;
        self.run_batch(&sql)?;
        self.transactions.push(mode, listener.clone());
        debug!(connection = %self.id, depth = self.transactions.depth(), "{sql}");
        if let Some(listener) = listener {
            listener.on_begin();
        }
        Ok(())
    }

    /// Mark the innermost transaction as successful. No further statements should run in it
    /// before [`Connection::end_transaction`].
    ///
    /// # Errors
    /// Returns `SqlSessionError::Usage` if no transaction is open or it is already marked.
    pub fn set_transaction_successful(&mut self) -> Result<(), SqlSessionError> {
        self.transactions.mark_successful()
    }

    /// True when the innermost transaction is open and already marked successful.
    #[must_use]
    pub fn is_transaction_marked_successful(&self) -> bool {
        self.transactions.top_marked()
    }

    /// End the innermost transaction.
    ///
    /// An unmarked frame rolls back and forces every enclosing frame to roll back too.
    /// The frame is popped even when the engine reports an error.
    ///
    /// # Errors
    /// Returns `SqlSessionError::Usage` if no transaction is open, or the engine error if
    /// COMMIT, RELEASE or ROLLBACK fails.
    pub fn end_transaction(&mut self) -> Result<(), SqlSessionError> {
        let popped = self.transactions.pop()?;
        let sql = popped.end.sql();
        let result = self.run_batch(&sql);
        debug!(connection = %self.id, depth = self.transactions.depth(), ok = result.is_ok(), "{sql}");

        let committed = match (&popped.end, &result) {
            (FrameEnd::Commit, Err(_)) => {
                if self.engine_in_transaction()
                    && let Err(err) = self.rollback_with_busy_retries()
                {
                    warn!(connection = %self.id, db = %self.label, "rollback after failed commit: {err}");
                }
                false
            }
            (FrameEnd::ReleaseSavepoint(name), Err(_)) => {
                self.transactions.poison_top();
                let undo = FrameEnd::RollbackToSavepoint(name.clone()).sql();
                if let Err(err) = self.run_batch(&undo) {
                    warn!(connection = %self.id, db = %self.label, "{undo} failed: {err}");
                }
                false
            }
            (end, _) => result.is_ok() && end.is_success(),
        };

        if let Some(listener) = popped.listener {
            if committed {
                listener.on_commit();
            } else {
                listener.on_rollback();
            }
        }
        result
    }

    /// True while at least one transaction frame is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        !self.transactions.is_empty()
    }

    /// How the open transaction was begun; `None` outside a transaction.
    #[must_use]
    pub fn transaction_mode(&self) -> Option<TransactionMode> {
        self.transactions.mode()
    }

    #[must_use]
    pub fn transaction_depth(&self) -> usize {
        self.transactions.depth()
    }

    /// Abandon every open frame and roll the engine transaction back.
    pub(crate) fn rollback_all(&mut self) {
        let listeners = self.transactions.drain();
        if self.engine_in_transaction()
            && let Err(err) = self.rollback_with_busy_retries()
        {
            warn!(connection = %self.id, db = %self.label, "forced rollback failed: {err}");
        }
        for listener in listeners {
            listener.on_rollback();
        }
    }

    fn rollback_with_busy_retries(&mut self) -> Result<(), SqlSessionError> {
        for (idx, delay) in ROLLBACK_BUSY_RETRIES.iter().copied().enumerate() {
            let result = self.run_batch("ROLLBACK");
            match &result {
                Err(SqlSessionError::Engine {
                    source: rusqlite::Error::SqliteFailure(err, _),
                    ..
                }) if err.code == rusqlite::ErrorCode::DatabaseBusy
                    && idx + 1 < ROLLBACK_BUSY_RETRIES.len() =>
                {
                    thread::sleep(delay);
                }
                _ => return result,
            }
        }
        Err(SqlSessionError::ExecutionError(
            "rollback retries exhausted".into(),
        ))
    }

    /// Make the connection reusable after a lease ends: abandon open frames and any engine
    /// transaction started outside the frame stack.
    pub(crate) fn reset_after_lease(&mut self) {
        if self.in_transaction() {
            warn!(
                connection = %self.id,
                db = %self.label,
                depth = self.transactions.depth(),
                "lease released with an open transaction; rolling back"
            );
            self.rollback_all();
        } else if self.engine_in_transaction() {
            warn!(connection = %self.id, db = %self.label, "engine transaction left open; rolling back");
            if let Err(err) = self.rollback_with_busy_retries() {
                warn!(connection = %self.id, db = %self.label, "forced rollback failed: {err}");
            }
        }
    }
}

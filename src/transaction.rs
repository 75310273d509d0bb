//! Nested transaction bookkeeping for a single connection.
//!
//! The outermost frame maps to an engine `BEGIN`, every nested frame to a `SAVEPOINT`.
//! Nesting gives no partial commit: once any frame ends without being marked successful,
//! every enclosing frame is poisoned and the outermost end rolls back.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::SqlSessionError;
use crate::types::TransactionMode;

/// Callbacks for the lifecycle of one transaction frame.
///
/// ```rust
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use sql_session::TransactionListener;
///
/// #[derive(Default)]
/// struct Commits(AtomicUsize);
///
/// impl TransactionListener for Commits {
///     fn on_commit(&self) {
///         self.0.fetch_add(1, Ordering::SeqCst);
///     }
/// }
/// ```
pub trait TransactionListener: Send + Sync {
    /// The frame was pushed and its BEGIN or SAVEPOINT succeeded.
    fn on_begin(&self) {}

    /// The frame's changes were committed (or its savepoint released).
    fn on_commit(&self) {}

    /// The frame's changes were rolled back.
    fn on_rollback(&self) {}
}

struct Frame {
    mode: TransactionMode,
    marked_successful: bool,
    child_failed: bool,
    listener: Option<Arc<dyn TransactionListener>>,
}

impl Frame {
    fn succeeded(&self) -> bool {
        self.marked_successful && !self.child_failed
    }
}

/// What the connection must do on the engine for a popped frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FrameEnd {
    Commit,
    Rollback,
    ReleaseSavepoint(String),
    RollbackToSavepoint(String),
}

impl FrameEnd {
    pub(crate) fn sql(&self) -> String {
        match self {
            FrameEnd::Commit => "COMMIT".to_owned(),
            FrameEnd::Rollback => "ROLLBACK".to_owned(),
            FrameEnd::ReleaseSavepoint(name) => format!("RELEASE {name}"),
            FrameEnd::RollbackToSavepoint(name) => format!("ROLLBACK TO {name}; RELEASE {name}"),
        }
    }

    pub(crate) fn is_success(&self) -> bool {
        matches!(self, FrameEnd::Commit | FrameEnd::ReleaseSavepoint(_))
    }
}

pub(crate) struct PoppedFrame {
    pub(crate) end: FrameEnd,
    pub(crate) listener: Option<Arc<dyn TransactionListener>>,
}

impl fmt::Debug for PoppedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoppedFrame")
            .field("end", &self.end)
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}

/// Per-connection stack of open transaction frames.
///
/// The stack only decides which SQL to run; the owning connection issues it and reports
/// engine failures through [`TransactionStack::poison_top`].
pub(crate) struct TransactionStack {
    frames: Vec<Frame>,
    depth: Arc<AtomicUsize>,
}

impl fmt::Debug for TransactionStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionStack")
            .field("depth", &self.frames.len())
            .finish_non_exhaustive()
    }
}

impl TransactionStack {
    pub(crate) fn new(depth: Arc<AtomicUsize>) -> Self {
        depth.store(0, Ordering::SeqCst);
        Self {
            frames: Vec::new(),
            depth,
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Mode of the outermost frame.
    pub(crate) fn mode(&self) -> Option<TransactionMode> {
        self.frames.first().map(|outer| outer.mode)
    }

    /// True when the innermost frame has been marked successful.
    pub(crate) fn top_marked(&self) -> bool {
        self.frames.last().is_some_and(|top| top.marked_successful)
    }

    pub(crate) fn depth_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.depth)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn savepoint_name(depth: usize) -> String {
        format!("sp_{depth}")
    }

    /// SQL that opens the next frame, or a usage error if no frame may be opened now.
    pub(crate) fn begin_sql(&self, mode: TransactionMode) -> Result<String, SqlSessionError> {
        match self.frames.last() {
            None => Ok(mode.begin_sql().to_owned()),
            Some(top) if top.marked_successful => Err(SqlSessionError::usage(
                "cannot begin a transaction after the current one was marked successful",
            )),
            Some(_) => Ok(format!("SAVEPOINT {}", Self::savepoint_name(self.depth()))),
        }
    }

    /// Record a frame whose BEGIN or SAVEPOINT has already succeeded.
    pub(crate) fn push(
        &mut self,
        mode: TransactionMode,
        listener: Option<Arc<dyn TransactionListener>>,
    ) {
        let mode = self.frames.first().map_or(mode, |outer| outer.mode);
        self.frames.push(Frame {
            mode,
            marked_successful: false,
            child_failed: false,
            listener,
        });
        self.depth.store(self.frames.len(), Ordering::SeqCst);
    }

    pub(crate) fn mark_successful(&mut self) -> Result<(), SqlSessionError> {
        let Some(top) = self.frames.last_mut() else {
            return Err(SqlSessionError::usage(
                "cannot mark a transaction successful: no transaction is open",
            ));
        };
        if top.marked_successful {
            return Err(SqlSessionError::usage(
                "the current transaction is already marked successful",
            ));
        }
        top.marked_successful = true;
        Ok(())
    }

    /// Pop the top frame and decide how it ends. A failed frame poisons its parent.
    pub(crate) fn pop(&mut self) -> Result<PoppedFrame, SqlSessionError> {
        let Some(frame) = self.frames.pop() else {
            return Err(SqlSessionError::usage(
                "cannot end a transaction: no transaction is open",
            ));
        };
        self.depth.store(self.frames.len(), Ordering::SeqCst);
        let succeeded = frame.succeeded();
        let end = if self.frames.is_empty() {
            if succeeded {
                FrameEnd::Commit
            } else {
                FrameEnd::Rollback
            }
        } else {
            let name = Self::savepoint_name(self.frames.len());
            if succeeded {
                FrameEnd::ReleaseSavepoint(name)
            } else {
                self.poison_top();
                FrameEnd::RollbackToSavepoint(name)
            }
        };
        Ok(PoppedFrame {
            end,
            listener: frame.listener,
        })
    }

    /// Mark the current top frame as having a failed child.
    pub(crate) fn poison_top(&mut self) {
        if let Some(parent) = self.frames.last_mut() {
            parent.child_failed = true;
        }
    }

    /// Pop every frame, innermost first, returning their listeners.
    pub(crate) fn drain(&mut self) -> Vec<Arc<dyn TransactionListener>> {
        let listeners = self
            .frames
            .drain(..)
            .rev()
            .filter_map(|frame| frame.listener)
            .collect();
        self.depth.store(0, Ordering::SeqCst);
        listeners
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack() -> TransactionStack {
        TransactionStack::new(Arc::new(AtomicUsize::new(0)))
    }

    #[test]
    fn outer_frame_begins_and_inner_frames_use_savepoints() {
        let mut tx = stack();
        assert_eq!(
            tx.begin_sql(TransactionMode::Immediate).unwrap(),
            "BEGIN IMMEDIATE"
        );
        tx.push(TransactionMode::Immediate, None);
        assert_eq!(tx.begin_sql(TransactionMode::Deferred).unwrap(), "SAVEPOINT sp_1");
        tx.push(TransactionMode::Deferred, None);
        assert_eq!(tx.begin_sql(TransactionMode::Deferred).unwrap(), "SAVEPOINT sp_2");
        assert_eq!(tx.depth(), 2);
    }

    #[test]
    fn empty_stack_is_a_usage_error() {
        let mut tx = stack();
        assert!(tx.pop().unwrap_err().is_usage());
        assert!(tx.mark_successful().unwrap_err().is_usage());
        assert!(tx.is_empty());
    }

    #[test]
    fn double_mark_is_a_usage_error() {
        let mut tx = stack();
        tx.push(TransactionMode::Deferred, None);
        tx.mark_successful().unwrap();
        assert!(tx.mark_successful().unwrap_err().is_usage());
    }

    #[test]
    fn begin_after_mark_is_a_usage_error() {
        let mut tx = stack();
        tx.push(TransactionMode::Deferred, None);
        tx.mark_successful().unwrap();
        assert!(tx.begin_sql(TransactionMode::Deferred).unwrap_err().is_usage());
    }

    #[test]
    fn failed_inner_frame_forces_outer_rollback() {
        let mut tx = stack();
        tx.push(TransactionMode::Deferred, None);
        tx.push(TransactionMode::Deferred, None);
        assert_eq!(
            tx.pop().unwrap().end,
            FrameEnd::RollbackToSavepoint("sp_1".into())
        );
        tx.mark_successful().unwrap();
        assert_eq!(tx.pop().unwrap().end, FrameEnd::Rollback);
    }

    #[test]
    fn successful_frames_release_then_commit() {
        let mut tx = stack();
        tx.push(TransactionMode::Deferred, None);
        tx.push(TransactionMode::Deferred, None);
        tx.mark_successful().unwrap();
        assert_eq!(
            tx.pop().unwrap().end,
            FrameEnd::ReleaseSavepoint("sp_1".into())
        );
        tx.mark_successful().unwrap();
        assert_eq!(tx.pop().unwrap().end, FrameEnd::Commit);
    }

    #[test]
    fn poison_travels_through_every_level() {
        let mut tx = stack();
        for _ in 0..3 {
            tx.push(TransactionMode::Deferred, None);
        }
        tx.pop().unwrap();
        tx.mark_successful().unwrap();
        assert_eq!(
            tx.pop().unwrap().end,
            FrameEnd::RollbackToSavepoint("sp_1".into())
        );
        tx.mark_successful().unwrap();
        assert_eq!(tx.pop().unwrap().end, FrameEnd::Rollback);
    }

    #[test]
    fn depth_is_shared() {
        let depth = Arc::new(AtomicUsize::new(7));
        let mut tx = TransactionStack::new(Arc::clone(&depth));
        assert_eq!(depth.load(Ordering::SeqCst), 0);
        tx.push(TransactionMode::Deferred, None);
        tx.push(TransactionMode::Deferred, None);
        assert_eq!(depth.load(Ordering::SeqCst), 2);
        tx.drain();
        assert_eq!(depth.load(Ordering::SeqCst), 0);
    }
}

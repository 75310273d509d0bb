//! Running database work off the calling thread.
//!
//! A whole lease-acquire-use-release sequence is submitted as one task; only its result
//! crosses back through a [`TaskHandle`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc::{self, Sender};
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tracing::debug;

use crate::error::SqlSessionError;

/// A unit of work handed to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs tasks, possibly on another thread.
pub trait TaskExecutor: Send + Sync {
    /// Schedule `task`.
    ///
    /// # Errors
    /// Returns `SqlSessionError::ExecutionError` if the executor no longer accepts work.
    fn execute(&self, task: Task) -> Result<(), SqlSessionError>;
}

impl dyn TaskExecutor {
    /// Run `work` on this executor and return a handle to its result.
    pub fn submit<T, F>(&self, work: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, SqlSessionError> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task: Task = Box::new(move || {
            let _ = tx.send(work());
        });
        match self.execute(task) {
            Ok(()) => TaskHandle { rx },
            Err(err) => TaskHandle::failed(err),
        }
    }
}

/// The pending result of a submitted task. Await it, block on it, or poll it.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T, SqlSessionError>>,
}

fn task_dropped() -> SqlSessionError {
    SqlSessionError::ExecutionError("task was dropped before it completed".into())
}

impl<T> TaskHandle<T> {
    fn failed(err: SqlSessionError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(err));
        Self { rx }
    }

    /// Block the current thread until the task finishes. Must not be called from inside an
    /// async runtime; `.await` the handle there instead.
    ///
    /// # Errors
    /// Returns the task's own error, or `SqlSessionError::ExecutionError` if the task was
    /// dropped or panicked.
    pub fn wait(self) -> Result<T, SqlSessionError> {
        self.rx.blocking_recv().map_err(|_| task_dropped())?
    }

    /// The result if the task has finished, without blocking.
    pub fn try_take(&mut self) -> Option<Result<T, SqlSessionError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(task_dropped())),
        }
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, SqlSessionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.map_err(|_| task_dropped()).and_then(|result| result))
    }
}

/// Runs every task immediately on the submitting thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn execute(&self, task: Task) -> Result<(), SqlSessionError> {
        task();
        Ok(())
    }
}

/// Runs tasks in order on one dedicated, named worker thread.
pub struct ThreadExecutor {
    name: String,
    sender: Mutex<Option<Sender<Task>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadExecutor {
    /// Spawn the worker thread. When called inside a tokio runtime, the worker enters it so
    /// tasks can use runtime facilities.
    ///
    /// # Errors
    /// Returns `SqlSessionError::Io` if the thread cannot be spawned.
    pub fn new(name: impl Into<String>) -> Result<Self, SqlSessionError> {
        let name = name.into();
        let (sender, receiver) = mpsc::channel::<Task>();
        let runtime = Handle::try_current().ok();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let runtime_guard = runtime.as_ref().map(Handle::enter);
            while let Ok(task) = receiver.recv() {
                task();
            }
            drop(runtime_guard);
        })?;
        debug!(worker = %name, "started executor thread");
        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop accepting tasks, let queued tasks finish, and join the worker.
    pub fn shutdown(&self) {
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.thread().id() != thread::current().id()
        {
            let _ = handle.join();
        }
    }
}

impl TaskExecutor for ThreadExecutor {
    fn execute(&self, task: Task) -> Result<(), SqlSessionError> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = sender.as_ref() else {
            return Err(SqlSessionError::ExecutionError(format!(
                "executor thread {} has shut down",
                self.name
            )));
        };
        sender.send(task).map_err(|_| {
            SqlSessionError::ExecutionError(format!("executor thread {} has exited", self.name))
        })
    }
}

impl Drop for ThreadExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ThreadExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadExecutor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Runs tasks on a tokio runtime's blocking thread pool.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the caller is running in.
    ///
    /// # Errors
    /// Returns `SqlSessionError::ExecutionError` outside a tokio runtime.
    pub fn current() -> Result<Self, SqlSessionError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|err| SqlSessionError::ExecutionError(format!("no tokio runtime: {err}")))
    }
}

impl TaskExecutor for TokioExecutor {
    fn execute(&self, task: Task) -> Result<(), SqlSessionError> {
        self.handle.spawn_blocking(task);
        Ok(())
    }
}

use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use crate::error::SqlSessionError;

use super::PoolInner;

const MIN_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn stop(&self) {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.wake.notify_all();
    }
}

/// Background thread that periodically closes idle connections.
///
/// It only holds a `Weak` to the pool, so an abandoned pool is not kept alive.
pub(super) struct IdleReaper {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl IdleReaper {
    pub(super) fn spawn(pool: Weak<PoolInner>, idle_timeout: Duration) -> Result<Self, SqlSessionError> {
        let signal = Arc::new(StopSignal::default());
        let interval = (idle_timeout / 2).max(MIN_INTERVAL);
        let thread_signal = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name("sql-session-idle-reaper".into())
            .spawn(move || run_reaper(&pool, &thread_signal, interval))?;
        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it to exit.
    pub(super) fn stop(mut self) {
        self.signal.stop();
        if let Some(handle) = self.handle.take()
            && handle.thread().id() != thread::current().id()
        {
            let _ = handle.join();
        }
    }
}

impl Drop for IdleReaper {
    fn drop(&mut self) {
        self.signal.stop();
    }
}

fn run_reaper(pool: &Weak<PoolInner>, signal: &StopSignal, interval: Duration) {
    loop {
        let stopped = signal.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        if *stopped {
            break;
        }
        let (stopped, _) = signal
            .wake
            .wait_timeout(stopped, interval)
            .unwrap_or_else(PoisonError::into_inner);
        if *stopped {
            break;
        }
        drop(stopped);

        let Some(pool) = pool.upgrade() else {
            break;
        };
        pool.reclaim_idle();
    }
    debug!("idle reaper stopped");
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::error::DeviceError;

/// Longest single sleep between stop checks.
const STOP_POLL: Duration = Duration::from_millis(5);

/// Bound on the join when a worker is dropped without an explicit stop.
const DROP_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Cooperative stop signal handed to a worker body.
#[derive(Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self) {
        self.0.store(true, Ordering::Release)
    }

    /// Sleep for `duration` unless stopped first.
    /// Returns `false` if the flag was raised.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_set() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(STOP_POLL));
        }
    }
}

struct DoneGuard(Sender<()>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        // Runs on normal exit and on unwind
        let _ = self.0.try_send(());
    }
}

/// A named background thread for blocking collaborator I/O.
pub struct Worker {
    name: String,
    stop: StopFlag,
    done: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn<F>(name: impl Into<String>, body: F) -> Result<Self, DeviceError>
    where
        F: FnOnce(StopFlag) + Send + 'static,
    {
        let name = name.into();
        let stop = StopFlag::default();
        let (done_tx, done) = channel::bounded(1);

        let flag = stop.clone();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let _done = DoneGuard(done_tx);
            body(flag);
        })?;

        tracing::debug!(worker = %name, "spawned");
        Ok(Self {
            name,
            stop,
            done,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Raise the stop flag and wait up to `timeout` for the thread to exit.
    ///
    /// Returns `false` if the thread had to be detached.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return true,
        };
        self.stop.set();

        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    tracing::warn!(worker = %self.name, "panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(worker = %self.name, ?timeout, "did not stop in time, detaching");
                false
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop(DROP_JOIN_TIMEOUT);
    }
}

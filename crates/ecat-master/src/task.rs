//! Background loop threads with cooperative cancellation.

use ecat_common::{MasterError, MasterResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Longest uninterrupted sleep while waiting on a stop flag.
const SLEEP_SLICE: Duration = Duration::from_millis(5);

/// Shared cancellation flag polled by a background loop.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// Create a flag that is not raised.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to stop.
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once a stop was requested.
    #[inline]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Sleep for `duration`, waking early if the flag is raised.
    ///
    /// Returns true if the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        self.sleep_until(Instant::now() + duration)
    }

    /// Sleep until `deadline`, waking early if the flag is raised.
    ///
    /// Returns true if the deadline was reached.
    pub fn sleep_until(&self, deadline: Instant) -> bool {
        loop {
            if self.is_raised() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

/// A named loop thread that is stopped and joined on drop.
#[derive(Debug)]
pub struct LoopHandle {
    name: String,
    stop: StopFlag,
    handle: Option<JoinHandle<()>>,
}

impl LoopHandle {
    /// Spawn `body` on a new OS thread named `name`.
    ///
    /// The body receives the stop flag and is expected to return soon after
    /// the flag is raised.
    ///
    /// # Errors
    ///
    /// Returns [`MasterError::Spawn`] if the thread cannot be created.
    pub fn spawn<F>(name: &str, body: F) -> MasterResult<Self>
    where
        F: FnOnce(StopFlag) + Send + 'static,
    {
        let stop = StopFlag::new();
        let thread_stop = stop.clone();
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(thread = %thread_name, "Loop thread started");
                body(thread_stop);
                debug!(thread = %thread_name, "Loop thread stopped");
            })
            .map_err(|e| MasterError::Spawn {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            name: name.to_string(),
            stop,
            handle: Some(handle),
        })
    }

    /// Thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true while the thread has not been joined.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Raise the stop flag and join the thread.
    pub fn stop(&mut self) {
        self.stop.raise();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.join() {
                warn!(thread = %self.name, "Loop thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

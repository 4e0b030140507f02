//! Unix signal handling for the daemon.
//!
//! SIGTERM and SIGINT request shutdown, SIGHUP requests an immediate health
//! report. The handlers only store into static atomics; the main loop polls
//! them through [`SignalHandler`].

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);
static REPORT: AtomicBool = AtomicBool::new(false);
static RECEIVED: AtomicU32 = AtomicU32::new(0);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Signals the daemon reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM
    Terminate,
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGHUP
    Hangup,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
            SignalKind::Hangup => write!(f, "SIGHUP"),
        }
    }
}

/// What [`SignalHandler::wait`] returned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// Shutdown was requested.
    Shutdown,
    /// A report was requested.
    Report,
    /// The wait elapsed.
    Timeout,
}

/// Process-wide handle on the signal flags.
#[derive(Debug, Clone, Copy)]
pub struct SignalHandler {
    _private: (),
}

impl SignalHandler {
    /// Register handlers for SIGTERM, SIGINT and SIGHUP.
    pub fn install() -> std::io::Result<Self> {
        #[cfg(unix)]
        register_unix_handlers()?;
        Ok(Self { _private: () })
    }

    /// Returns true once SIGTERM or SIGINT arrived (or shutdown was requested).
    pub fn shutdown_requested(&self) -> bool {
        SHUTDOWN.load(Ordering::Relaxed)
    }

    /// Returns true if SIGHUP arrived since the last call.
    pub fn take_report_request(&self) -> bool {
        REPORT.swap(false, Ordering::Relaxed)
    }

    /// Request shutdown from inside the process.
    pub fn request_shutdown(&self) {
        info!("Shutdown requested");
        SHUTDOWN.store(true, Ordering::Relaxed);
    }

    /// Number of signals delivered so far.
    pub fn signal_count(&self) -> u32 {
        RECEIVED.load(Ordering::Relaxed)
    }

    /// Block for at most `timeout`, returning early on shutdown or a report request.
    pub fn wait(&self, timeout: Duration) -> Wakeup {
        let deadline = Instant::now() + timeout;
        loop {
            if self.shutdown_requested() {
                return Wakeup::Shutdown;
            }
            if self.take_report_request() {
                return Wakeup::Report;
            }
            let now = Instant::now();
            if now >= deadline {
                return Wakeup::Timeout;
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn register_unix_handlers() -> std::io::Result<()> {
    use std::os::raw::c_int;

    extern "C" fn on_shutdown(_: c_int) {
        SHUTDOWN.store(true, Ordering::Relaxed);
        RECEIVED.fetch_add(1, Ordering::Relaxed);
    }

    extern "C" fn on_hangup(_: c_int) {
        REPORT.store(true, Ordering::Relaxed);
        RECEIVED.fetch_add(1, Ordering::Relaxed);
    }

    for (signal, handler, kind) in [
        (libc::SIGTERM, on_shutdown as extern "C" fn(c_int), SignalKind::Terminate),
        (libc::SIGINT, on_shutdown as extern "C" fn(c_int), SignalKind::Interrupt),
        (libc::SIGHUP, on_hangup as extern "C" fn(c_int), SignalKind::Hangup),
    ] {
        // SAFETY: the handlers only touch static atomics, which is async-signal-safe.
        let previous = unsafe { libc::signal(signal, handler as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error());
        }
        debug!(signal = %kind, "Signal handler registered");
    }
    Ok(())
}

//! Signal handling for the lightpen daemon.
//!
//! SIGTERM and SIGINT start a graceful shutdown; SIGHUP asks for a
//! diagnostics dump. The raw handlers only set atomics. A watcher thread
//! turns those flags into calls to the daemon's callback, which is where the
//! device's shutdown flag is raised and its blocked readers are woken.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// How often the watcher thread checks the raw signal flags.
const WATCH_INTERVAL: Duration = Duration::from_millis(10);

/// Signals the daemon reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM: graceful termination.
    Terminate,
    /// SIGINT: interrupt (Ctrl+C).
    Interrupt,
    /// SIGHUP: dump diagnostics.
    Hangup,
}

impl SignalKind {
    /// True for signals that end the daemon.
    pub fn is_shutdown(self) -> bool {
        matches!(self, Self::Terminate | Self::Interrupt)
    }
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

/// Counters shared between the watcher thread and the main loop.
#[derive(Debug, Default)]
pub struct SignalState {
    signal_count: AtomicU32,
}

impl SignalState {
    /// Signals received so far.
    pub fn signal_count(&self) -> u32 {
        self.signal_count.load(Ordering::Relaxed)
    }

    fn record(&self) {
        self.signal_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Callback invoked from the watcher thread for every signal.
pub type SignalCallback = Box<dyn Fn(SignalKind) + Send + 'static>;

/// Installed signal handlers plus the watcher thread.
#[derive(Clone)]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    /// Register handlers for SIGTERM, SIGINT and SIGHUP and start the watcher.
    ///
    /// `on_signal` runs on the watcher thread, never inside a raw handler.
    pub fn install(on_signal: SignalCallback) -> std::io::Result<Self> {
        let handler = Self {
            state: Arc::new(SignalState::default()),
        };

        #[cfg(unix)]
        handler.register_unix_handlers(on_signal)?;
        #[cfg(not(unix))]
        drop(on_signal);

        Ok(handler)
    }

    #[cfg(unix)]
    fn register_unix_handlers(&self, on_signal: SignalCallback) -> std::io::Result<()> {
        use std::os::raw::c_int;

        static TERM_FLAG: AtomicBool = AtomicBool::new(false);
        static INT_FLAG: AtomicBool = AtomicBool::new(false);
        static HUP_FLAG: AtomicBool = AtomicBool::new(false);

        extern "C" fn on_sigterm(_: c_int) {
            TERM_FLAG.store(true, Ordering::Relaxed);
        }
        extern "C" fn on_sigint(_: c_int) {
            INT_FLAG.store(true, Ordering::Relaxed);
        }
        extern "C" fn on_sighup(_: c_int) {
            HUP_FLAG.store(true, Ordering::Relaxed);
        }

        let state = Arc::clone(&self.state);
        std::thread::Builder::new()
            .name("lightpen-signals".into())
            .spawn(move || loop {
                for (flag, kind) in [
                    (&TERM_FLAG, SignalKind::Terminate),
                    (&INT_FLAG, SignalKind::Interrupt),
                    (&HUP_FLAG, SignalKind::Hangup),
                ] {
                    if flag.swap(false, Ordering::Relaxed) {
                        info!(signal = %kind, "signal received");
                        state.record();
                        on_signal(kind);
                    }
                }
                std::thread::sleep(WATCH_INTERVAL);
            })?;

        // SAFETY: the handlers only store to static atomics, which is
        // async-signal-safe.
        #[allow(unsafe_code)]
        unsafe {
            libc::signal(libc::SIGTERM, on_sigterm as libc::sighandler_t);
            libc::signal(libc::SIGINT, on_sigint as libc::sighandler_t);
            libc::signal(libc::SIGHUP, on_sighup as libc::sighandler_t);
        }

        debug!("unix signal handlers registered");
        Ok(())
    }

    /// Shared counters.
    pub fn state(&self) -> &SignalState {
        &self.state
    }
}

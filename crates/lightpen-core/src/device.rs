//! Lifecycle shared by every device kind.
//!
//! A device is bound (configuration validated, channels created), started
//! (handlers attached to an edge source) and finally shut down:
//!
//! 1. Set the shutdown flag, so producers stop mutating state
//! 2. Wake every waiter on every channel; blocked readers see end of stream
//! 3. Detach handlers from the edge source, best effort
//!
//! Only then may the caller drop the device and its channels.

use crate::lines::{EdgeHandler, EdgeSource, LineId};
use lightpen_common::{DriverState, EdgeCounters, LightpenError, LightpenResult, StateMachine};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Lifecycle bookkeeping embedded in each device.
#[derive(Debug)]
pub struct DeviceCore {
    name: &'static str,
    state: Mutex<StateMachine>,
    shutdown: Arc<AtomicBool>,
    attached: Mutex<Vec<LineId>>,
    counters: Arc<EdgeCounters>,
}

impl DeviceCore {
    /// Create the core of a freshly bound device.
    ///
    /// # Errors
    ///
    /// Returns an error if the state machine refuses `Unbound -> Bound`.
    pub fn bind(name: &'static str) -> LightpenResult<Self> {
        let mut state = StateMachine::new();
        state.transition(DriverState::Bound)?;
        Ok(Self {
            name,
            state: Mutex::new(state),
            shutdown: Arc::new(AtomicBool::new(false)),
            attached: Mutex::new(Vec::new()),
            counters: Arc::new(EdgeCounters::new()),
        })
    }

    /// Device name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> DriverState {
        self.state.lock().state()
    }

    /// Shutdown flag shared with channels and handlers.
    #[must_use]
    pub fn shutdown_flag(&self) -> &Arc<AtomicBool> {
        &self.shutdown
    }

    /// Diagnostics counters shared with channels and handlers.
    #[must_use]
    pub fn counters(&self) -> &Arc<EdgeCounters> {
        &self.counters
    }

    /// True once shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Lines currently attached.
    #[must_use]
    pub fn attached_lines(&self) -> Vec<LineId> {
        self.attached.lock().clone()
    }

    /// Attach every binding and move to `Running`.
    ///
    /// On failure, lines attached so far are detached again and the device
    /// moves to `Failed`.
    ///
    /// # Errors
    ///
    /// Returns the first attach error, or an invalid transition if the device
    /// is not `Bound`.
    pub fn start(
        &self,
        source: &dyn EdgeSource,
        bindings: Vec<(LineId, Arc<dyn EdgeHandler>)>,
    ) -> LightpenResult<()> {
        let mut state = self.state.lock();
        if state.state() != DriverState::Bound {
            return Err(LightpenError::InvalidStateTransition {
                from: state.state().to_string(),
                to: DriverState::Running.to_string(),
            });
        }

        let mut attached = self.attached.lock();
        for (line, handler) in bindings {
            if let Err(e) = source.attach(line, handler) {
                error!(device = self.name, line, error = %e, "attach failed");
                for &done in attached.iter() {
                    if let Err(e) = source.detach(done) {
                        warn!(device = self.name, line = done, error = %e, "rollback detach failed");
                    }
                }
                attached.clear();
                state.transition(DriverState::Failed)?;
                return Err(e);
            }
            debug!(device = self.name, line, "line attached");
            attached.push(line);
        }

        state.transition(DriverState::Running)?;
        info!(device = self.name, lines = ?*attached, "device running");
        Ok(())
    }

    /// Set the shutdown flag and move to `ShuttingDown`.
    ///
    /// Returns `true` the first time. The caller must wake its channels afterwards.
    pub fn begin_shutdown(&self) -> bool {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return false;
        }
        let mut state = self.state.lock();
        if matches!(state.state(), DriverState::Running | DriverState::Bound) {
            // Cannot fail from these states
            let _ = state.transition(DriverState::ShuttingDown);
        }
        info!(device = self.name, "shutdown requested");
        true
    }

    /// Detach every attached line and move to `Stopped`.
    ///
    /// Every line is attempted even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// [`LightpenError::Teardown`] summarizing the lines that failed to detach.
    pub fn detach_all(&self, source: &dyn EdgeSource) -> LightpenResult<()> {
        let lines = std::mem::take(&mut *self.attached.lock());
        let mut failures = Vec::new();
        for line in lines {
            match source.detach(line) {
                Ok(()) => debug!(device = self.name, line, "line detached"),
                Err(e) => {
                    warn!(device = self.name, line, error = %e, "detach failed");
                    failures.push(format!("line {line}: {e}"));
                }
            }
        }

        let mut state = self.state.lock();
        if state.state() == DriverState::ShuttingDown {
            state.transition(DriverState::Stopped)?;
        }
        drop(state);

        if failures.is_empty() {
            info!(device = self.name, "device stopped");
            Ok(())
        } else {
            Err(LightpenError::Teardown(failures.join("; ")))
        }
    }
}

//! Driver lifecycle state machine.
//!
//! State transitions follow the load/unload cycle of the driver:
//! UNBOUND → BOUND → RUNNING → SHUTTING_DOWN → STOPPED
//!
//! A failed bind parks the driver in FAILED; both FAILED and STOPPED
//! may return to UNBOUND for a fresh bind, with all state reinitialized.

use crate::error::{LightpenError, LightpenResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of a driver instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverState {
    /// No lines bound yet.
    #[default]
    Unbound,
    /// Lines validated and channels created; edges not yet delivered.
    Bound,
    /// Edge handlers attached and consumers may open channels.
    Running,
    /// Shutdown flag raised; waiters are being released.
    ShuttingDown,
    /// All resources released.
    Stopped,
    /// Binding failed; the driver never started.
    Failed,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbound => write!(f, "UNBOUND"),
            Self::Bound => write!(f, "BOUND"),
            Self::Running => write!(f, "RUNNING"),
            Self::ShuttingDown => write!(f, "SHUTTING_DOWN"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

impl DriverState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: DriverState) -> bool {
        use DriverState::{Bound, Failed, Running, ShuttingDown, Stopped, Unbound};

        matches!(
            (self, target),
            (Unbound, Bound)
                | (Bound, Running)
                | (Running, ShuttingDown)
                // Shutdown before any edge source was attached
                | (Bound, ShuttingDown)
                | (ShuttingDown, Stopped)
                | (Unbound, Failed)
                | (Bound, Failed)
                // Reload cycle
                | (Stopped, Unbound)
                | (Failed, Unbound)
        )
    }

    /// Returns true while edges are accepted and channels may be opened.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns true once shutdown has begun or binding failed.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ShuttingDown | Self::Stopped | Self::Failed)
    }
}

/// State machine wrapper with transition history tracking.
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    current: DriverState,
    previous: Option<DriverState>,
    transition_count: u64,
}

impl StateMachine {
    /// Create a new state machine starting in UNBOUND.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> DriverState {
        self.current
    }

    /// Get the previous state (if any transition occurred).
    #[must_use]
    pub fn previous_state(&self) -> Option<DriverState> {
        self.previous
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a state transition.
    ///
    /// # Errors
    ///
    /// Returns [`LightpenError::InvalidStateTransition`] if `target` is not reachable.
    pub fn transition(&mut self, target: DriverState) -> LightpenResult<()> {
        if self.current.can_transition_to(target) {
            self.previous = Some(self.current);
            self.current = target;
            self.transition_count += 1;
            Ok(())
        } else {
            Err(LightpenError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_unload_cycle() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.state(), DriverState::Unbound);

        sm.transition(DriverState::Bound).unwrap();
        sm.transition(DriverState::Running).unwrap();
        assert!(sm.state().is_running());

        sm.transition(DriverState::ShuttingDown).unwrap();
        assert!(sm.state().is_terminal());
        sm.transition(DriverState::Stopped).unwrap();

        // Reload
        sm.transition(DriverState::Unbound).unwrap();
        assert_eq!(sm.transition_count(), 5);
        assert_eq!(sm.previous_state(), Some(DriverState::Stopped));
    }

    #[test]
    fn test_invalid_transition() {
        let mut sm = StateMachine::new();
        let result = sm.transition(DriverState::Running);
        assert_eq!(
            result,
            Err(LightpenError::InvalidStateTransition {
                from: "UNBOUND".into(),
                to: "RUNNING".into(),
            })
        );
        assert_eq!(sm.state(), DriverState::Unbound);
    }

    #[test]
    fn test_bind_failure() {
        let mut sm = StateMachine::new();
        sm.transition(DriverState::Failed).unwrap();
        assert!(sm.state().is_terminal());
        assert!(sm.transition(DriverState::Running).is_err());
        sm.transition(DriverState::Unbound).unwrap();
    }

    #[test]
    fn test_shutdown_before_running() {
        let mut sm = StateMachine::new();
        sm.transition(DriverState::Bound).unwrap();
        assert!(sm.transition(DriverState::ShuttingDown).is_ok());
    }

    #[test]
    fn test_no_restart_without_rebind() {
        assert!(!DriverState::Stopped.can_transition_to(DriverState::Running));
        assert!(!DriverState::ShuttingDown.can_transition_to(DriverState::Running));
    }
}

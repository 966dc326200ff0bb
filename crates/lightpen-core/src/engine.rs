//! Edge classification and the timing engine.
//!
//! Every edge on a bound line runs through [`TimingEngine`]:
//!
//! - **Reference edge**: record the time as the new reference and restart
//!   the debounce window from it.
//! - **Pulse edge**: accept only if more than the debounce threshold has
//!   passed since the last accepted pulse (or reference) and the odd/even
//!   input is high. An accepted pulse is decoded relative to the last
//!   reference and published to the pulse channel.
//!
//! Rejections are silent apart from diagnostics counters. Nothing on this
//! path blocks or allocates.

use crate::channel::Channel;
use crate::lines::{EdgeHandler, InputLine};
use crate::sample::Sample;
use lightpen_common::{Clock, EdgeCounter, EdgeCounters, Timestamp, TimingConfig};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Which input an edge arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Light sensor pulse.
    Pulse,
    /// Frame reference (vertical sync).
    Reference,
}

/// What the engine did with one edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOutcome {
    /// Reference time recorded.
    ReferenceRecorded,
    /// Pulse accepted and sample published.
    Accepted(Sample),
    /// Pulse arrived within the debounce window.
    Debounced,
    /// Pulse arrived while the odd/even input was low.
    WrongPhase,
    /// Pulse passed the gate but preceded the reference.
    OutOfOrder {
        /// The negative offset that was computed.
        offset_us: i64,
    },
    /// Pulse passed the gate before any reference edge was seen.
    NoReference,
    /// Edge ignored because shutdown has started.
    Ignored,
    /// Raw timestamp recorded on a timestamp channel.
    Timestamped(Timestamp),
}

impl EdgeOutcome {
    /// True if a value was published to a consumer.
    #[must_use]
    pub fn is_published(&self) -> bool {
        matches!(self, Self::Accepted(_) | Self::Timestamped(_))
    }
}

/// Edge times shared between producer contexts.
#[derive(Debug, Default)]
pub struct PendingEdgeState {
    last_reference_us: AtomicI64,
    last_pulse_us: AtomicI64,
    phase_parity: AtomicBool,
    reference_seen: AtomicBool,
}

impl PendingEdgeState {
    /// Time of the latest reference edge, if any was seen.
    #[must_use]
    pub fn last_reference(&self) -> Option<Timestamp> {
        self.reference_seen
            .load(Ordering::Acquire)
            .then(|| Timestamp(self.last_reference_us.load(Ordering::Acquire)))
    }

    /// Start of the current debounce window.
    #[must_use]
    pub fn last_pulse(&self) -> Timestamp {
        Timestamp(self.last_pulse_us.load(Ordering::Acquire))
    }

    /// Odd/even level sampled at the latest pulse edge.
    #[must_use]
    pub fn phase_parity(&self) -> bool {
        self.phase_parity.load(Ordering::Relaxed)
    }
}

/// Classifies edges and publishes decoded samples.
pub struct TimingEngine {
    line_length: u32,
    debounce_us: i64,
    state: PendingEdgeState,
    pulse: Arc<Channel<Sample>>,
    button: Arc<dyn InputLine>,
    odd_even: Arc<dyn InputLine>,
    shutdown: Arc<AtomicBool>,
    counters: Arc<EdgeCounters>,
}

impl std::fmt::Debug for TimingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimingEngine")
            .field("line_length", &self.line_length)
            .field("debounce_us", &self.debounce_us)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl TimingEngine {
    /// Create an engine publishing to `pulse`.
    #[must_use]
    pub fn new(
        timing: &TimingConfig,
        pulse: Arc<Channel<Sample>>,
        button: Arc<dyn InputLine>,
        odd_even: Arc<dyn InputLine>,
        shutdown: Arc<AtomicBool>,
        counters: Arc<EdgeCounters>,
    ) -> Self {
        Self {
            line_length: timing.line_length,
            debounce_us: timing.debounce_us(),
            state: PendingEdgeState::default(),
            pulse,
            button,
            odd_even,
            shutdown,
            counters,
        }
    }

    /// Shared edge times.
    #[must_use]
    pub fn pending(&self) -> &PendingEdgeState {
        &self.state
    }

    /// Classify one edge.
    pub fn handle_edge(&self, kind: EdgeKind, now: Timestamp) -> EdgeOutcome {
        if self.shutdown.load(Ordering::Acquire) {
            self.counters.record(EdgeCounter::Ignored);
            return EdgeOutcome::Ignored;
        }
        match kind {
            EdgeKind::Reference => self.on_reference(now),
            EdgeKind::Pulse => self.on_pulse(now),
        }
    }

    fn on_reference(&self, now: Timestamp) -> EdgeOutcome {
        self.counters.record(EdgeCounter::ReferenceEdge);
        self.state.last_reference_us.store(now.0, Ordering::Release);
        // A reference edge also restarts the debounce window
        self.state.last_pulse_us.store(now.0, Ordering::Release);
        self.state.reference_seen.store(true, Ordering::Release);
        trace!(at = %now, "reference edge");
        EdgeOutcome::ReferenceRecorded
    }

    fn on_pulse(&self, now: Timestamp) -> EdgeOutcome {
        self.counters.record(EdgeCounter::PulseEdge);

        let parity = self.odd_even.is_high();
        self.state.phase_parity.store(parity, Ordering::Relaxed);

        let last = self.state.last_pulse_us.load(Ordering::Acquire);
        if now.micros_since(Timestamp(last)) <= self.debounce_us {
            self.counters.record(EdgeCounter::Debounced);
            return EdgeOutcome::Debounced;
        }
        if !parity {
            self.counters.record(EdgeCounter::WrongPhase);
            return EdgeOutcome::WrongPhase;
        }
        // Another edge moved the window first
        if self
            .state
            .last_pulse_us
            .compare_exchange(last, now.0, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.counters.record(EdgeCounter::Debounced);
            return EdgeOutcome::Debounced;
        }

        let aux = self.button.is_high();
        let Some(reference) = self.state.last_reference() else {
            self.counters.record(EdgeCounter::NoReference);
            trace!(at = %now, "pulse before any reference edge");
            return EdgeOutcome::NoReference;
        };

        let offset_us = now.micros_since(reference);
        let Some(sample) = Sample::decode(now, offset_us, self.line_length, aux) else {
            self.counters.record(EdgeCounter::OutOfOrder);
            trace!(at = %now, offset_us, "pulse preceded reference");
            return EdgeOutcome::OutOfOrder { offset_us };
        };

        if let Some(published) = self.pulse.publish(sample) {
            if published.overwrote_unread {
                self.counters.record(EdgeCounter::Overwritten);
            }
        }
        self.counters.record(EdgeCounter::Accepted);
        trace!(
            at = %now,
            major = sample.major,
            minor = sample.minor,
            aux,
            "pulse accepted"
        );
        EdgeOutcome::Accepted(sample)
    }
}

/// Handler bound to one lightpen input line.
pub struct LineHandler {
    kind: EdgeKind,
    engine: Arc<TimingEngine>,
    clock: Arc<dyn Clock>,
}

impl LineHandler {
    /// Bind `engine` to edges of `kind`.
    #[must_use]
    pub fn new(kind: EdgeKind, engine: Arc<TimingEngine>, clock: Arc<dyn Clock>) -> Self {
        Self {
            kind,
            engine,
            clock,
        }
    }

    /// Which input this handler serves.
    #[must_use]
    pub fn kind(&self) -> EdgeKind {
        self.kind
    }
}

impl EdgeHandler for LineHandler {
    fn on_edge_at(&self, now: Timestamp) -> EdgeOutcome {
        self.engine.handle_edge(self.kind, now)
    }

    fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }
}

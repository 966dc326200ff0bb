//! Simulated edge sources for development and testing.
//!
//! [`SimulatedEdgeSource`] routes edges fired by test code or a simulator to
//! attached handlers. [`FrameSimulator`] emulates a video display with a pen
//! held at a fixed position; [`WheelSimulator`] emulates pairs of sensors
//! passed by a moving object.

use crate::engine::EdgeOutcome;
use crate::lines::{EdgeHandler, EdgeSource, InputLine, LineId};
use lightpen_common::{
    Clock, LightpenError, LightpenResult, LineConfig, ManualClock, SimulationConfig, Timestamp,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Level input driven by a simulator.
#[derive(Debug)]
pub struct SimulatedLine {
    id: LineId,
    level: AtomicBool,
}

impl SimulatedLine {
    /// Create a line at the given level.
    #[must_use]
    pub fn new(id: LineId, level: bool) -> Arc<Self> {
        Arc::new(Self {
            id,
            level: AtomicBool::new(level),
        })
    }

    /// Drive the line.
    pub fn set(&self, level: bool) {
        self.level.store(level, Ordering::Relaxed);
    }
}

impl InputLine for SimulatedLine {
    fn id(&self) -> LineId {
        self.id
    }

    fn is_high(&self) -> bool {
        self.level.load(Ordering::Relaxed)
    }
}

/// Edge source whose edges are fired programmatically.
#[derive(Default)]
pub struct SimulatedEdgeSource {
    handlers: Mutex<HashMap<LineId, Arc<dyn EdgeHandler>>>,
    fail_attach: Mutex<HashSet<LineId>>,
    fail_detach: Mutex<HashSet<LineId>>,
}

impl std::fmt::Debug for SimulatedEdgeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut lines: Vec<_> = self.handlers.lock().keys().copied().collect();
        lines.sort_unstable();
        f.debug_struct("SimulatedEdgeSource")
            .field("attached", &lines)
            .finish_non_exhaustive()
    }
}

impl SimulatedEdgeSource {
    /// Create a source with nothing attached.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next attach of `line` fail.
    pub fn fail_attach_on(&self, line: LineId) {
        self.fail_attach.lock().insert(line);
    }

    /// Make every detach of `line` fail.
    pub fn fail_detach_on(&self, line: LineId) {
        self.fail_detach.lock().insert(line);
    }

    /// True if a handler is attached to `line`.
    #[must_use]
    pub fn is_attached(&self, line: LineId) -> bool {
        self.handlers.lock().contains_key(&line)
    }

    fn handler(&self, line: LineId) -> Option<Arc<dyn EdgeHandler>> {
        self.handlers.lock().get(&line).cloned()
    }

    /// Fire an edge on `line`, stamped by the handler's clock.
    ///
    /// Returns `None` if nothing is attached.
    pub fn fire(&self, line: LineId) -> Option<EdgeOutcome> {
        // Handler runs outside the registry lock
        let handler = self.handler(line)?;
        Some(handler.on_edge())
    }

    /// Fire an edge on `line` at an explicit time.
    pub fn fire_at(&self, line: LineId, now: Timestamp) -> Option<EdgeOutcome> {
        let handler = self.handler(line)?;
        Some(handler.on_edge_at(now))
    }
}

impl EdgeSource for SimulatedEdgeSource {
    fn attach(&self, line: LineId, handler: Arc<dyn EdgeHandler>) -> LightpenResult<()> {
        if self.fail_attach.lock().remove(&line) {
            return Err(LightpenError::InvalidLine {
                line,
                purpose: "simulated attach failure".into(),
            });
        }
        let mut handlers = self.handlers.lock();
        if handlers.contains_key(&line) {
            return Err(LightpenError::InvalidLine {
                line,
                purpose: "already attached".into(),
            });
        }
        handlers.insert(line, handler);
        Ok(())
    }

    fn detach(&self, line: LineId) -> LightpenResult<()> {
        if self.fail_detach.lock().contains(&line) {
            return Err(LightpenError::Teardown(format!(
                "simulated detach failure on line {line}"
            )));
        }
        self.handlers
            .lock()
            .remove(&line)
            .map(|_| ())
            .ok_or_else(|| LightpenError::Teardown(format!("line {line} not attached")))
    }
}

fn micros(d: Duration) -> i64 {
    i64::try_from(d.as_micros()).unwrap_or(i64::MAX)
}

/// Emulates a display scanned frame by frame with a pen held at one spot.
///
/// Each frame fires the reference edge at frame start, then a pen pulse when
/// the beam reaches `(pen_line, pen_column)`, followed by optional bounce
/// edges. The odd/even input alternates every frame.
#[derive(Debug)]
pub struct FrameSimulator {
    source: Arc<SimulatedEdgeSource>,
    clock: Arc<ManualClock>,
    lines: LineConfig,
    line_length: u32,
    sim: SimulationConfig,
    button: Arc<SimulatedLine>,
    odd_even: Arc<SimulatedLine>,
    frame: u64,
}

impl FrameSimulator {
    /// Create a simulator driving `source` and advancing `clock`.
    #[must_use]
    pub fn new(
        source: Arc<SimulatedEdgeSource>,
        clock: Arc<ManualClock>,
        lines: LineConfig,
        line_length: u32,
        sim: SimulationConfig,
    ) -> Self {
        let button = SimulatedLine::new(lines.button, sim.button);
        let odd_even = SimulatedLine::new(lines.odd_even, true);
        Self {
            source,
            clock,
            lines,
            line_length,
            sim,
            button,
            odd_even,
            frame: 0,
        }
    }

    /// Pen button input, for binding the device.
    #[must_use]
    pub fn button(&self) -> Arc<SimulatedLine> {
        Arc::clone(&self.button)
    }

    /// Odd/even field input, for binding the device.
    #[must_use]
    pub fn odd_even(&self) -> Arc<SimulatedLine> {
        Arc::clone(&self.odd_even)
    }

    /// Frames emitted so far.
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frame
    }

    /// Offset of the pen pulse from the frame start, in microseconds.
    #[must_use]
    pub fn pen_offset_us(&self) -> i64 {
        i64::from(self.sim.pen_line) * i64::from(self.line_length)
            + i64::from(self.sim.pen_column)
    }

    /// Emit one frame and return the outcome of every edge.
    pub fn step_frame(&mut self) -> Vec<EdgeOutcome> {
        let start = self.clock.now();
        self.odd_even.set(self.frame % 2 == 0);
        self.button.set(self.sim.button);

        let mut outcomes = Vec::with_capacity(2 + self.sim.bounce_edges as usize);
        outcomes.extend(self.source.fire(self.lines.reference));

        self.clock.set(Timestamp(start.0 + self.pen_offset_us()));
        outcomes.extend(self.source.fire(self.lines.pulse));
        for _ in 0..self.sim.bounce_edges {
            self.clock.advance_micros(1);
            outcomes.extend(self.source.fire(self.lines.pulse));
        }

        self.clock.set(start.saturating_add(self.sim.frame_period));
        trace!(frame = self.frame, edges = outcomes.len(), "frame emitted");
        self.frame += 1;
        outcomes
    }

    /// Emit frames until `stop` is set, sleeping one frame period between
    /// frames when `paced`.
    pub fn run(&mut self, stop: &AtomicBool, paced: bool) {
        debug!(
            pen_line = self.sim.pen_line,
            pen_column = self.sim.pen_column,
            "frame simulator started"
        );
        while !stop.load(Ordering::Acquire) {
            self.step_frame();
            if paced {
                std::thread::sleep(self.sim.frame_period);
            }
        }
        debug!(frames = self.frame, "frame simulator stopped");
    }
}

/// Emulates sensor pairs passed by a wheel at a steady speed.
///
/// Each revolution fires channel `2p` then, `wheel_interval` later, channel
/// `2p + 1` for every pair `p`. With `swapped` set the order within each pair
/// is reversed.
#[derive(Debug)]
pub struct WheelSimulator {
    source: Arc<SimulatedEdgeSource>,
    clock: Arc<ManualClock>,
    lines: Vec<LineId>,
    interval: Duration,
    period: Duration,
    swapped: bool,
    revolutions: u64,
}

impl WheelSimulator {
    /// Create a simulator firing the timestamp `lines`.
    #[must_use]
    pub fn new(
        source: Arc<SimulatedEdgeSource>,
        clock: Arc<ManualClock>,
        lines: Vec<LineId>,
        sim: &SimulationConfig,
    ) -> Self {
        Self {
            source,
            clock,
            lines,
            interval: sim.wheel_interval,
            period: sim.wheel_period,
            swapped: false,
            revolutions: 0,
        }
    }

    /// Reverse the firing order within each pair.
    #[must_use]
    pub fn swapped(mut self, swapped: bool) -> Self {
        self.swapped = swapped;
        self
    }

    /// Emit one revolution.
    pub fn step(&mut self) -> Vec<EdgeOutcome> {
        let start = self.clock.now();
        let mut outcomes = Vec::with_capacity(self.lines.len());
        for pair in self.lines.chunks_exact(2) {
            let (first, second) = if self.swapped {
                (pair[1], pair[0])
            } else {
                (pair[0], pair[1])
            };
            outcomes.extend(self.source.fire(first));
            self.clock.advance_micros(micros(self.interval));
            outcomes.extend(self.source.fire(second));
        }
        self.clock.set(start.saturating_add(self.period));
        self.revolutions += 1;
        outcomes
    }

    /// Emit revolutions until `stop` is set.
    pub fn run(&mut self, stop: &AtomicBool, paced: bool) {
        while !stop.load(Ordering::Acquire) {
            self.step();
            if paced {
                std::thread::sleep(self.period);
            }
        }
        debug!(revolutions = self.revolutions, "wheel simulator stopped");
    }
}

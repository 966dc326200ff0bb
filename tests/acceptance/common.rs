//! Common utilities for acceptance tests.
//!
//! Provides helpers for:
//! - Building devices wired to a simulated edge source
//! - Sampling process memory during soak runs

#![allow(dead_code)] // Not every test file uses every helper

use lightpen_common::{DriverConfig, ManualClock, Timestamp};
use lightpen_core::{
    FrameSimulator, LightpenDevice, SimulatedEdgeSource, TimestampDevice, WheelSimulator,
};
use std::fs;
use std::sync::Arc;
use std::time::Duration;

/// Clock origin used by every rig, in microseconds.
pub const CLOCK_ORIGIN_US: i64 = 5_000_000;

/// A lightpen device bound to a frame simulator.
pub struct LightpenRig {
    pub device: LightpenDevice,
    pub source: Arc<SimulatedEdgeSource>,
    pub clock: Arc<ManualClock>,
    pub sim: FrameSimulator,
}

impl LightpenRig {
    /// Bind and start a device for `config`.
    pub fn start(config: &DriverConfig) -> Self {
        let clock = Arc::new(ManualClock::new(Timestamp(CLOCK_ORIGIN_US)));
        let source = SimulatedEdgeSource::new();
        let sim = FrameSimulator::new(
            Arc::clone(&source),
            Arc::clone(&clock),
            config.lines.clone(),
            config.timing.line_length,
            config.simulation.clone(),
        );
        let device = LightpenDevice::bind(config, sim.button(), sim.odd_even(), clock.clone())
            .expect("bind lightpen");
        device.start(source.as_ref()).expect("start lightpen");
        Self {
            device,
            source,
            clock,
            sim,
        }
    }
}

/// A timestamp device bound to a wheel simulator.
pub struct WheelRig {
    pub device: TimestampDevice,
    pub source: Arc<SimulatedEdgeSource>,
    pub clock: Arc<ManualClock>,
    pub wheel: WheelSimulator,
}

impl WheelRig {
    /// Bind and start a timestamp device for `config`.
    pub fn start(config: &DriverConfig, swapped: bool) -> Self {
        let clock = Arc::new(ManualClock::new(Timestamp(CLOCK_ORIGIN_US)));
        let source = SimulatedEdgeSource::new();
        let device = TimestampDevice::bind(config, clock.clone()).expect("bind timestamp");
        device.start(source.as_ref()).expect("start timestamp");
        let wheel = WheelSimulator::new(
            Arc::clone(&source),
            Arc::clone(&clock),
            config.timestamp.lines.clone(),
            &config.simulation,
        )
        .swapped(swapped);
        Self {
            device,
            source,
            clock,
            wheel,
        }
    }
}

/// Result of a soak session.
#[derive(Debug, Clone)]
pub struct SoakResult {
    /// Wall time spent.
    pub duration: Duration,
    /// Frames emitted by the producer.
    pub frames: u64,
    /// Samples the consumer read.
    pub samples: u64,
    /// Samples that did not decode to the pen position.
    pub corrupt: u64,
    /// Peak resident memory in bytes.
    pub peak_memory_bytes: u64,
    /// Whether the session met its criteria.
    pub passed: bool,
}

/// Get current process memory usage in bytes.
pub fn get_memory_usage() -> u64 {
    if let Ok(status) = fs::read_to_string("/proc/self/status") {
        for line in status.lines() {
            if let Some(rest) = line.strip_prefix("VmRSS:") {
                if let Some(Ok(kb)) = rest.split_whitespace().next().map(str::parse::<u64>) {
                    return kb * 1024;
                }
            }
        }
    }
    0
}

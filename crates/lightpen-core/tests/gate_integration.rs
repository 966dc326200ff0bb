//! End-to-end tests of the lightpen device driven through a simulated edge source.
//!
//! # Test Categories
//!
//! - **Decode path**: reference and pulse edges produce the expected samples
//! - **Gate semantics**: exclusivity, non-blocking and blocking reads
//! - **Shutdown**: blocked consumers are released and teardown is best effort

use lightpen_common::{
    DriverConfig, DriverState, EdgeCounter, LightpenError, ManualClock, Timestamp,
};
use lightpen_core::{
    poll_many, EdgeKind, EdgeOutcome, EncodedSample, LightpenDevice, Pollable, ReadMode,
    Readiness, SimulatedEdgeSource, SimulatedLine,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// ============================================================================
// Test Helpers
// ============================================================================

struct Rig {
    device: LightpenDevice,
    source: Arc<SimulatedEdgeSource>,
    clock: Arc<ManualClock>,
    button: Arc<SimulatedLine>,
    odd_even: Arc<SimulatedLine>,
    config: DriverConfig,
}

impl Rig {
    fn new() -> Self {
        let config = DriverConfig::default();
        let clock = Arc::new(ManualClock::new(Timestamp(0)));
        let button = SimulatedLine::new(config.lines.button, false);
        let odd_even = SimulatedLine::new(config.lines.odd_even, true);
        let source = SimulatedEdgeSource::new();
        let device =
            LightpenDevice::bind(&config, button.clone(), odd_even.clone(), clock.clone())
                .unwrap();
        device.start(source.as_ref()).unwrap();
        Self {
            device,
            source,
            clock,
            button,
            odd_even,
            config,
        }
    }

    fn reference_at(&self, us: i64) -> EdgeOutcome {
        self.clock.set(Timestamp(us));
        self.source.fire(self.config.lines.reference).unwrap()
    }

    fn pulse_at(&self, us: i64) -> EdgeOutcome {
        self.clock.set(Timestamp(us));
        self.source.fire(self.config.lines.pulse).unwrap()
    }
}

// ============================================================================
// Decode Path Tests
// ============================================================================

#[test]
fn test_reference_example_end_to_end() {
    let rig = Rig::new();
    rig.button.set(true);
    let handle = rig.device.open(EdgeKind::Pulse).unwrap();

    rig.reference_at(1_000_000);
    rig.pulse_at(1_000_200);

    let text = handle.read_text(ReadMode::NonBlocking).unwrap();
    assert_eq!(text, "3,8,1\n");
    let parsed: EncodedSample = text.parse().unwrap();
    assert_eq!((parsed.major, parsed.minor, parsed.aux), (3, 8, true));
}

#[test]
fn test_pulse_before_reference_never_publishes() {
    let rig = Rig::new();
    let handle = rig.device.open(EdgeKind::Pulse).unwrap();

    rig.reference_at(2_000_000);
    // Stamped before the reference, so inside the restarted window
    let outcome = rig.pulse_at(1_000_000);
    assert!(!outcome.is_published());
    assert_eq!(
        handle.read(ReadMode::NonBlocking),
        Err(LightpenError::WouldBlock)
    );
}

#[test]
fn test_debounce_window_restarts_on_reference() {
    let rig = Rig::new();
    let handle = rig.device.open(EdgeKind::Pulse).unwrap();

    rig.reference_at(0);
    assert!(rig.pulse_at(1_000).is_published());
    handle.read(ReadMode::NonBlocking).unwrap();

    // Reference edge 10us before the next pulse closes the window again
    rig.reference_at(5_000);
    assert_eq!(rig.pulse_at(5_010), EdgeOutcome::Debounced);
    assert!(rig.pulse_at(5_200).is_published());
    let sample = handle.read(ReadMode::NonBlocking).unwrap();
    assert_eq!(sample.offset_us, 200);
}

#[test]
fn test_two_pulses_in_window_yield_one_sample() {
    let rig = Rig::new();
    let handle = rig.device.open(EdgeKind::Pulse).unwrap();

    rig.reference_at(0);
    rig.pulse_at(640);
    rig.pulse_at(700);

    let sample = handle.read(ReadMode::NonBlocking).unwrap();
    assert_eq!((sample.major, sample.minor), (10, 0));
    assert_eq!(
        handle.read(ReadMode::NonBlocking),
        Err(LightpenError::WouldBlock)
    );
}

#[test]
fn test_wrong_phase_discarded() {
    let rig = Rig::new();
    let handle = rig.device.open(EdgeKind::Pulse).unwrap();
    rig.odd_even.set(false);

    rig.reference_at(0);
    assert_eq!(rig.pulse_at(1_000), EdgeOutcome::WrongPhase);
    assert_eq!(handle.poll(None), Readiness::NotReady);
    assert_eq!(rig.device.counters().get(EdgeCounter::WrongPhase), 1);
}

#[test]
fn test_latest_sample_replaces_unread() {
    let rig = Rig::new();
    let handle = rig.device.open(EdgeKind::Pulse).unwrap();

    rig.reference_at(0);
    rig.pulse_at(1_000);
    rig.pulse_at(2_000);

    let sample = handle.read(ReadMode::NonBlocking).unwrap();
    assert_eq!(sample.offset_us, 2_000);
    assert_eq!(rig.device.counters().get(EdgeCounter::Overwritten), 1);
}

// ============================================================================
// Gate Semantics Tests
// ============================================================================

#[test]
fn test_busy_then_reopen_after_close() {
    let rig = Rig::new();
    let first = rig.device.open(EdgeKind::Pulse).unwrap();
    assert_eq!(
        rig.device.open(EdgeKind::Pulse).unwrap_err(),
        LightpenError::Busy("lightpen0".into())
    );

    first.close();
    let second = rig.device.open(EdgeKind::Pulse).unwrap();
    assert!(!second.is_closed());
}

#[test]
fn test_channels_are_independent() {
    let rig = Rig::new();
    let _pulse = rig.device.open(EdgeKind::Pulse).unwrap();
    assert!(rig.device.open(EdgeKind::Reference).is_ok());
}

#[test]
fn test_blocking_read_returns_edge_fields() {
    let rig = Rig::new();
    rig.button.set(true);
    let handle = rig.device.open(EdgeKind::Pulse).unwrap();
    rig.reference_at(1_000_000);

    thread::scope(|s| {
        let reader = s.spawn(|| handle.read(ReadMode::Blocking));
        thread::sleep(Duration::from_millis(20));
        rig.pulse_at(1_000_200);

        let sample = reader.join().unwrap().unwrap();
        assert_eq!(sample.timestamp, Timestamp(1_000_200));
        assert_eq!((sample.major, sample.minor, sample.aux), (3, 8, true));
    });
}

#[test]
fn test_poll_many_over_lightpen_channels() {
    let rig = Rig::new();
    let pulse = rig.device.open(EdgeKind::Pulse).unwrap();
    let reference = rig.device.open(EdgeKind::Reference).unwrap();
    let handles: [&dyn Pollable; 2] = [&reference, &pulse];

    assert!(poll_many(&handles, Some(Duration::from_millis(10))).is_empty());

    rig.reference_at(0);
    rig.pulse_at(1_000);
    assert_eq!(
        poll_many(&handles, Some(Duration::from_millis(10))),
        vec![(1, Readiness::Ready)]
    );
}

// ============================================================================
// Shutdown Tests
// ============================================================================

#[test]
fn test_shutdown_releases_blocked_reader() {
    let rig = Rig::new();
    let handle = rig.device.open(EdgeKind::Pulse).unwrap();

    thread::scope(|s| {
        let reader = s.spawn(|| handle.read(ReadMode::Blocking));
        thread::sleep(Duration::from_millis(20));
        rig.device.shutdown(rig.source.as_ref()).unwrap();
        assert_eq!(reader.join().unwrap(), Err(LightpenError::ShuttingDown));
    });

    assert_eq!(rig.device.state(), DriverState::Stopped);
    assert!(!rig.source.is_attached(rig.config.lines.pulse));
}

#[test]
fn test_shutdown_releases_poller() {
    let rig = Rig::new();
    let handle = rig.device.open(EdgeKind::Pulse).unwrap();

    thread::scope(|s| {
        let poller = s.spawn(|| {
            let handles: [&dyn Pollable; 1] = [&handle];
            poll_many(&handles, None)
        });
        thread::sleep(Duration::from_millis(20));
        rig.device.request_shutdown();
        assert_eq!(poller.join().unwrap(), vec![(0, Readiness::Hangup)]);
    });
}

#[test]
fn test_edges_after_shutdown_ignored() {
    let rig = Rig::new();
    rig.device.request_shutdown();
    assert_eq!(rig.reference_at(10), EdgeOutcome::Ignored);
    assert!(rig.device.engine().pending().last_reference().is_none());
}

#[test]
fn test_teardown_failure_is_best_effort() {
    let rig = Rig::new();
    rig.source.fail_detach_on(rig.config.lines.pulse);

    let err = rig.device.shutdown(rig.source.as_ref()).unwrap_err();
    assert!(matches!(err, LightpenError::Teardown(_)));
    // The other line was still detached
    assert!(!rig.source.is_attached(rig.config.lines.reference));
    assert_eq!(rig.device.state(), DriverState::Stopped);
}

#[test]
fn test_attach_failure_marks_failed() {
    let config = DriverConfig::default();
    let source = SimulatedEdgeSource::new();
    source.fail_attach_on(config.lines.reference);
    let device = LightpenDevice::bind(
        &config,
        SimulatedLine::new(config.lines.button, false),
        SimulatedLine::new(config.lines.odd_even, true),
        Arc::new(ManualClock::default()),
    )
    .unwrap();

    assert!(device.start(source.as_ref()).is_err());
    assert_eq!(device.state(), DriverState::Failed);
    // Pulse line was attached first and rolled back
    assert!(!source.is_attached(config.lines.pulse));
}

//! Lightpen decoding as a consumer of `lightpen0` sees it.

use super::common::LightpenRig;
use lightpen_common::{DriverConfig, DriverState, EdgeCounter, LightpenError};
use lightpen_core::{EdgeKind, EdgeOutcome, EncodedSample, ReadMode};
use std::thread;
use std::time::Duration;

fn pen_at(line: u32, column: u32, button: bool) -> DriverConfig {
    let mut config = DriverConfig::default();
    config.simulation.pen_line = line;
    config.simulation.pen_column = column;
    config.simulation.button = button;
    config
}

#[test]
fn test_frame_decodes_pen_position() {
    let mut rig = LightpenRig::start(&DriverConfig::default());
    let handle = rig.device.open(EdgeKind::Pulse).unwrap();

    rig.sim.step_frame();
    assert_eq!(handle.read_text(ReadMode::NonBlocking).unwrap(), "100,20,0\n");
}

#[test]
fn test_button_captured_with_pulse() {
    let mut rig = LightpenRig::start(&pen_at(3, 8, true));
    let handle = rig.device.open(EdgeKind::Pulse).unwrap();

    rig.sim.step_frame();
    let text = handle.read_text(ReadMode::NonBlocking).unwrap();
    assert_eq!(text, "3,8,1\n");

    let parsed: EncodedSample = text.parse().unwrap();
    assert_eq!((parsed.major, parsed.minor, parsed.aux), (3, 8, true));
}

#[test]
fn test_only_one_field_parity_publishes() {
    let mut rig = LightpenRig::start(&DriverConfig::default());
    let handle = rig.device.open(EdgeKind::Pulse).unwrap();

    rig.sim.step_frame();
    assert!(handle.read(ReadMode::NonBlocking).is_ok());

    let outcomes = rig.sim.step_frame();
    assert!(outcomes.contains(&EdgeOutcome::WrongPhase));
    assert_eq!(
        handle.read(ReadMode::NonBlocking),
        Err(LightpenError::WouldBlock)
    );
    assert_eq!(rig.device.counters().get(EdgeCounter::WrongPhase), 1);
}

#[test]
fn test_bounce_edges_debounced() {
    let mut config = DriverConfig::default();
    config.simulation.bounce_edges = 3;
    let mut rig = LightpenRig::start(&config);
    let handle = rig.device.open(EdgeKind::Pulse).unwrap();

    rig.sim.step_frame();
    assert_eq!(handle.read_text(ReadMode::NonBlocking).unwrap(), "100,20,0\n");
    assert_eq!(
        handle.read(ReadMode::NonBlocking),
        Err(LightpenError::WouldBlock)
    );
    assert_eq!(rig.device.counters().get(EdgeCounter::Debounced), 3);
    assert_eq!(rig.device.counters().get(EdgeCounter::Accepted), 1);
}

#[test]
fn test_unread_samples_are_overwritten() {
    let mut rig = LightpenRig::start(&DriverConfig::default());
    let handle = rig.device.open(EdgeKind::Pulse).unwrap();

    // Frames 0 and 2 publish; frame 1 has the wrong parity
    for _ in 0..3 {
        rig.sim.step_frame();
    }
    assert!(handle.read(ReadMode::NonBlocking).is_ok());
    assert_eq!(
        handle.read(ReadMode::NonBlocking),
        Err(LightpenError::WouldBlock)
    );
    assert_eq!(rig.device.counters().get(EdgeCounter::Overwritten), 1);
}

#[test]
fn test_channel_is_exclusive() {
    let rig = LightpenRig::start(&DriverConfig::default());
    let handle = rig.device.open(EdgeKind::Pulse).unwrap();
    assert!(matches!(
        rig.device.open(EdgeKind::Pulse),
        Err(LightpenError::Busy(_))
    ));
    drop(handle);
    assert!(rig.device.open(EdgeKind::Pulse).is_ok());
}

#[test]
fn test_short_buffer_keeps_whole_record() {
    let mut rig = LightpenRig::start(&DriverConfig::default());
    let handle = rig.device.open(EdgeKind::Pulse).unwrap();

    rig.sim.step_frame();
    let mut short = [0u8; 4];
    assert_eq!(
        handle.read_into(&mut short, ReadMode::NonBlocking),
        Err(LightpenError::BufferTooSmall {
            needed: 9,
            available: 4
        })
    );

    let mut buf = [0u8; 32];
    let n = handle.read_into(&mut buf, ReadMode::NonBlocking).unwrap();
    assert_eq!(&buf[..n], b"100,20,0\n");
    assert_eq!(rig.device.counters().get(EdgeCounter::Read), 1);
}

#[test]
fn test_shutdown_releases_reader_and_detaches() {
    let rig = LightpenRig::start(&DriverConfig::default());
    let lines = rig.device.lines().clone();
    let handle = rig.device.open(EdgeKind::Pulse).unwrap();

    thread::scope(|s| {
        let reader = s.spawn(|| handle.read(ReadMode::Blocking));
        thread::sleep(Duration::from_millis(20));
        rig.device.shutdown(rig.source.as_ref()).unwrap();
        assert_eq!(reader.join().unwrap(), Err(LightpenError::ShuttingDown));
    });

    assert_eq!(rig.device.state(), DriverState::Stopped);
    assert!(!rig.source.is_attached(lines.pulse));
    assert!(!rig.source.is_attached(lines.reference));
    assert_eq!(rig.source.fire(lines.pulse), None);
}

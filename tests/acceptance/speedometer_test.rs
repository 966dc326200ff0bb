//! Speed measurement over the timestamp device.

use super::common::{WheelRig, CLOCK_ORIGIN_US};
use lightpen_common::{DriverConfig, LightpenError, Timestamp};
use lightpen_core::{poll_many, Pollable, ReadMode, Readiness, SpeedMeter};
use std::time::Duration;

const DISTANCE_KM: f64 = 0.000_25;

fn single_pair() -> DriverConfig {
    let mut config = DriverConfig::default();
    config.timestamp.lines = vec![5, 6];
    config
}

#[test]
fn test_pair_interval_gives_speed() {
    let rig = WheelRig::start(&single_pair(), false);
    let handles = rig.device.open_all().unwrap();

    rig.source.fire_at(5, Timestamp(CLOCK_ORIGIN_US));
    rig.source.fire_at(6, Timestamp(CLOCK_ORIGIN_US + 300));

    let mut meter = SpeedMeter::new(2, DISTANCE_KM, 16);
    let first = handles[0].read(ReadMode::NonBlocking).unwrap();
    assert!(meter.record(0, first).is_none());
    let second = handles[1].read(ReadMode::NonBlocking).unwrap();
    let readings = meter.record(1, second).unwrap();

    let reading = readings[0].as_ref().unwrap();
    assert_eq!(reading.interval_us, 300);
    assert!((reading.speed_kmh - 3000.0).abs() < 1e-6);
}

#[test]
fn test_swapped_pair_is_out_of_order() {
    let mut rig = WheelRig::start(&single_pair(), true);
    let handles = rig.device.open_all().unwrap();
    rig.wheel.step();

    let mut meter = SpeedMeter::new(2, DISTANCE_KM, 16);
    meter.record(0, handles[0].read(ReadMode::NonBlocking).unwrap());
    let readings = meter
        .record(1, handles[1].read(ReadMode::NonBlocking).unwrap())
        .unwrap();

    assert_eq!(
        readings[0],
        Err(LightpenError::OutOfOrder {
            start_us: CLOCK_ORIGIN_US + 300,
            end_us: CLOCK_ORIGIN_US,
        })
    );
    assert_eq!(meter.metrics().out_of_order(), 1);
}

#[test]
fn test_poll_multiplexes_all_pairs() {
    let config = DriverConfig::default();
    let mut rig = WheelRig::start(&config, false);
    let handles = rig.device.open_all().unwrap();
    let pollables: Vec<&dyn Pollable> = handles.iter().map(|h| h as &dyn Pollable).collect();

    assert!(poll_many(&pollables, Some(Duration::from_millis(5))).is_empty());

    rig.wheel.step();
    let ready = poll_many(&pollables, Some(Duration::from_millis(100)));
    assert_eq!(ready.len(), 4);
    assert!(ready.iter().all(|(_, r)| *r == Readiness::Ready));

    let mut meter = SpeedMeter::new(handles.len(), config.speedometer.distance_km, 16);
    let mut readings = None;
    for (index, _) in ready {
        let at = handles[index].read(ReadMode::NonBlocking).unwrap();
        readings = meter.record(index, at).or(readings);
    }

    let readings = readings.unwrap();
    assert_eq!(readings.len(), 2);
    for reading in readings {
        assert_eq!(reading.unwrap().interval_us, 300);
    }
}

#[test]
fn test_channels_drain_independently() {
    let rig = WheelRig::start(&single_pair(), false);
    let handles = rig.device.open_all().unwrap();

    rig.source.fire_at(5, Timestamp(10));
    rig.source.fire_at(6, Timestamp(20));

    assert_eq!(handles[1].read(ReadMode::NonBlocking), Ok(Timestamp(20)));
    assert_eq!(handles[0].read(ReadMode::NonBlocking), Ok(Timestamp(10)));
    assert_eq!(
        handles[0].read(ReadMode::NonBlocking),
        Err(LightpenError::WouldBlock)
    );
}

#[test]
fn test_shutdown_hangs_up_pollers() {
    let rig = WheelRig::start(&single_pair(), false);
    let handles = rig.device.open_all().unwrap();
    let pollables: Vec<&dyn Pollable> = handles.iter().map(|h| h as &dyn Pollable).collect();

    rig.device.shutdown(rig.source.as_ref()).unwrap();

    let ready = poll_many(&pollables, Some(Duration::from_millis(100)));
    assert_eq!(ready, vec![(0, Readiness::Hangup), (1, Readiness::Hangup)]);
    assert_eq!(
        handles[0].read(ReadMode::NonBlocking),
        Err(LightpenError::ShuttingDown)
    );
}

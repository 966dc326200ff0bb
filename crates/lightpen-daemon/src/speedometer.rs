//! Speed measurement loop over the timestamp device.
//!
//! Opens every timestamp channel, multiplexes them with a bounded poll and
//! feeds each timestamp to a [`SpeedMeter`]. A poll timeout only means no
//! event yet. Out-of-order pairs are logged and skipped.

use anyhow::{Context, Result};
use lightpen_common::{LightpenError, SpeedometerConfig};
use lightpen_core::{poll_many, Pollable, ReadMode, Readiness, SpeedMeter, TimestampDevice};
use std::io::Write;
use tracing::{debug, info, trace, warn};

/// Intervals retained for percentile reporting.
const INTERVAL_HISTORY: usize = 1024;

/// Run until the device hangs up or `max_readings` readings were printed
/// (`0` = unlimited). Returns the meter for final statistics.
pub fn run_speedometer(
    device: &TimestampDevice,
    config: &SpeedometerConfig,
    max_readings: u64,
    out: &mut dyn Write,
) -> Result<SpeedMeter> {
    let handles = device
        .open_all()
        .context("failed to open timestamp channels")?;
    let pollables: Vec<&dyn Pollable> = handles.iter().map(|h| h as &dyn Pollable).collect();
    let mut meter = SpeedMeter::new(handles.len(), config.distance_km, INTERVAL_HISTORY);
    let mut printed = 0u64;

    info!(
        channels = handles.len(),
        distance_km = config.distance_km,
        "speed measurement started"
    );

    'measure: loop {
        let events = poll_many(&pollables, Some(config.poll_timeout));
        if events.is_empty() {
            trace!("poll timeout");
            continue;
        }

        for (index, readiness) in events {
            if readiness == Readiness::Hangup {
                debug!(channel = index, "timestamp channel hung up");
                break 'measure;
            }
            let at = match handles[index].read(ReadMode::NonBlocking) {
                Ok(at) => at,
                Err(LightpenError::WouldBlock) => continue,
                Err(e) if e.is_end_of_stream() => break 'measure,
                Err(e) => return Err(e).context("timestamp read failed"),
            };

            let Some(results) = meter.record(index, at) else {
                continue;
            };
            for result in results {
                match result {
                    Ok(reading) => {
                        writeln!(
                            out,
                            "pair {}: {} us, {:.1} km/h",
                            reading.pair, reading.interval_us, reading.speed_kmh
                        )
                        .context("failed to write reading")?;
                        printed += 1;
                    }
                    // Already logged by the meter
                    Err(LightpenError::OutOfOrder { .. }) => {}
                    Err(e) => warn!(error = %e, "pair reading failed"),
                }
            }
            if max_readings > 0 && printed >= max_readings {
                info!(readings = printed, "reading limit reached");
                break 'measure;
            }
        }
    }

    Ok(meter)
}

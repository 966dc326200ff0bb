//! Speed measurement over pairs of timestamp channels.
//!
//! Channels are paired `(0, 1)`, `(2, 3)`, … Each pair is two sensors a known
//! distance apart; the interval between their timestamps gives a speed.
//! Readings are computed when the last channel fires, using the latest
//! timestamp of every channel.

use lightpen_common::{IntervalMetrics, LightpenError, LightpenResult, Timestamp};
use serde::Serialize;
use tracing::warn;

/// Microseconds per hour.
const MICROS_PER_HOUR: f64 = 3_600_000_000.0;

/// Interval `end - start` in microseconds.
///
/// # Errors
///
/// [`LightpenError::OutOfOrder`] if `end` precedes `start`.
pub fn interval(start: Timestamp, end: Timestamp) -> LightpenResult<i64> {
    let us = end.micros_since(start);
    if us < 0 {
        return Err(LightpenError::OutOfOrder {
            start_us: start.as_micros(),
            end_us: end.as_micros(),
        });
    }
    Ok(us)
}

/// Speed in km/h for `distance_km` covered in `interval_us`.
///
/// A zero interval yields infinity.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn speed_kmh(distance_km: f64, interval_us: i64) -> f64 {
    distance_km * MICROS_PER_HOUR / interval_us as f64
}

/// One pair measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PairReading {
    /// Pair index: channels `2 * pair` and `2 * pair + 1`.
    pub pair: usize,
    /// Interval between the two sensors.
    pub interval_us: i64,
    /// Derived speed.
    pub speed_kmh: f64,
}

/// Accumulates timestamps and derives pair readings.
#[derive(Debug)]
pub struct SpeedMeter {
    distance_km: f64,
    latest: Vec<Option<Timestamp>>,
    metrics: IntervalMetrics,
}

impl SpeedMeter {
    /// Create a meter for `channels` channels (an even count).
    #[must_use]
    pub fn new(channels: usize, distance_km: f64, history: usize) -> Self {
        Self {
            distance_km,
            latest: vec![None; channels],
            metrics: IntervalMetrics::new(history),
        }
    }

    /// Interval statistics so far.
    #[must_use]
    pub fn metrics(&self) -> &IntervalMetrics {
        &self.metrics
    }

    /// Record a timestamp from `channel`.
    ///
    /// Returns the per-pair results when `channel` is the last one, `None`
    /// otherwise. Pairs with a channel that never fired are skipped.
    pub fn record(
        &mut self,
        channel: usize,
        at: Timestamp,
    ) -> Option<Vec<LightpenResult<PairReading>>> {
        *self.latest.get_mut(channel)? = Some(at);
        if channel + 1 != self.latest.len() {
            return None;
        }
        Some(self.readings())
    }

    fn readings(&mut self) -> Vec<LightpenResult<PairReading>> {
        let mut out = Vec::with_capacity(self.latest.len() / 2);
        for (pair, chunk) in self.latest.chunks_exact(2).enumerate() {
            let (Some(start), Some(end)) = (chunk[0], chunk[1]) else {
                continue;
            };
            match interval(start, end) {
                Ok(interval_us) => {
                    self.metrics.record(interval_us);
                    out.push(Ok(PairReading {
                        pair,
                        interval_us,
                        speed_kmh: speed_kmh(self.distance_km, interval_us),
                    }));
                }
                Err(e) => {
                    self.metrics.record_out_of_order();
                    warn!(pair, error = %e, "pair interval rejected");
                    out.push(Err(e));
                }
            }
        }
        out
    }
}

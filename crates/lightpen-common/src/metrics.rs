//! Edge diagnostics counters and interval statistics.
//!
//! [`EdgeCounters`] is updated from producer context and must never block,
//! so every counter is a relaxed atomic. [`IntervalMetrics`] is owned by a
//! single consumer loop and keeps a fixed ring of recent intervals without
//! allocating after construction.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Kinds of events counted by [`EdgeCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeCounter {
    /// Edge seen on a reference line.
    ReferenceEdge,
    /// Edge seen on a pulse line.
    PulseEdge,
    /// Pulse accepted and a sample published.
    Accepted,
    /// Pulse rejected by the debounce window.
    Debounced,
    /// Pulse rejected because the phase parity input was low.
    WrongPhase,
    /// Pulse accepted but its offset was negative.
    OutOfOrder,
    /// Pulse accepted before any reference edge was seen.
    NoReference,
    /// A published sample replaced one that was never read.
    Overwritten,
    /// Edge ignored because shutdown was in progress.
    Ignored,
    /// Sample consumed by a reader.
    Read,
}

impl EdgeCounter {
    /// All counter kinds, in reporting order.
    pub const ALL: [EdgeCounter; 10] = [
        Self::ReferenceEdge,
        Self::PulseEdge,
        Self::Accepted,
        Self::Debounced,
        Self::WrongPhase,
        Self::OutOfOrder,
        Self::NoReference,
        Self::Overwritten,
        Self::Ignored,
        Self::Read,
    ];

    /// Stable label used in reports.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::ReferenceEdge => "reference_edge",
            Self::PulseEdge => "pulse_edge",
            Self::Accepted => "accepted",
            Self::Debounced => "debounced",
            Self::WrongPhase => "wrong_phase",
            Self::OutOfOrder => "out_of_order",
            Self::NoReference => "no_reference",
            Self::Overwritten => "overwritten",
            Self::Ignored => "ignored",
            Self::Read => "read",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Lock-free event counters shared between producers and diagnostics.
#[derive(Debug, Default)]
pub struct EdgeCounters {
    counts: [AtomicU64; 10],
}

impl EdgeCounters {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one event. Safe to call from producer context.
    #[inline]
    pub fn record(&self, kind: EdgeCounter) {
        self.counts[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Current value of one counter.
    #[must_use]
    pub fn get(&self, kind: EdgeCounter) -> u64 {
        self.counts[kind.index()].load(Ordering::Relaxed)
    }

    /// Copy all counters.
    #[must_use]
    pub fn snapshot(&self) -> EdgeCountersSnapshot {
        EdgeCountersSnapshot {
            reference_edges: self.get(EdgeCounter::ReferenceEdge),
            pulse_edges: self.get(EdgeCounter::PulseEdge),
            accepted: self.get(EdgeCounter::Accepted),
            debounced: self.get(EdgeCounter::Debounced),
            wrong_phase: self.get(EdgeCounter::WrongPhase),
            out_of_order: self.get(EdgeCounter::OutOfOrder),
            no_reference: self.get(EdgeCounter::NoReference),
            overwritten: self.get(EdgeCounter::Overwritten),
            ignored: self.get(EdgeCounter::Ignored),
            reads: self.get(EdgeCounter::Read),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        for c in &self.counts {
            c.store(0, Ordering::Relaxed);
        }
    }
}

/// Immutable copy of [`EdgeCounters`] for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EdgeCountersSnapshot {
    /// Reference edges seen.
    pub reference_edges: u64,
    /// Pulse edges seen.
    pub pulse_edges: u64,
    /// Samples published.
    pub accepted: u64,
    /// Pulses rejected by debounce.
    pub debounced: u64,
    /// Pulses rejected by phase parity.
    pub wrong_phase: u64,
    /// Pulses dropped for a negative offset.
    pub out_of_order: u64,
    /// Pulses dropped before any reference edge.
    pub no_reference: u64,
    /// Unread samples replaced by newer ones.
    pub overwritten: u64,
    /// Edges ignored during shutdown.
    pub ignored: u64,
    /// Samples consumed by readers.
    pub reads: u64,
}

impl EdgeCountersSnapshot {
    /// Value for a counter kind.
    #[must_use]
    pub fn get(&self, kind: EdgeCounter) -> u64 {
        match kind {
            EdgeCounter::ReferenceEdge => self.reference_edges,
            EdgeCounter::PulseEdge => self.pulse_edges,
            EdgeCounter::Accepted => self.accepted,
            EdgeCounter::Debounced => self.debounced,
            EdgeCounter::WrongPhase => self.wrong_phase,
            EdgeCounter::OutOfOrder => self.out_of_order,
            EdgeCounter::NoReference => self.no_reference,
            EdgeCounter::Overwritten => self.overwritten,
            EdgeCounter::Ignored => self.ignored,
            EdgeCounter::Read => self.reads,
        }
    }

    /// Pulses that never produced a sample, for any reason.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.debounced + self.wrong_phase + self.out_of_order + self.no_reference
    }
}

/// Interval statistics with a ring buffer of recent values.
#[derive(Debug)]
pub struct IntervalMetrics {
    /// Ring buffer of intervals in microseconds.
    samples: Box<[i64]>,
    /// Current write position in the ring buffer.
    write_pos: usize,
    /// Number of samples collected (saturates at buffer size).
    sample_count: usize,
    /// Total intervals recorded.
    total: u64,
    min_us: i64,
    max_us: i64,
    sum_us: i64,
    /// Intervals rejected as out of order.
    out_of_order: u64,
}

impl IntervalMetrics {
    /// Create a collector retaining `histogram_size` recent intervals.
    #[must_use]
    pub fn new(histogram_size: usize) -> Self {
        let size = histogram_size.max(1);
        Self {
            samples: vec![0i64; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            total: 0,
            min_us: i64::MAX,
            max_us: i64::MIN,
            sum_us: 0,
            out_of_order: 0,
        }
    }

    /// Record a valid (non-negative) interval.
    pub fn record(&mut self, interval_us: i64) {
        self.samples[self.write_pos] = interval_us;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = self.sample_count.saturating_add(1).min(self.samples.len());

        self.total += 1;
        self.min_us = self.min_us.min(interval_us);
        self.max_us = self.max_us.max(interval_us);
        self.sum_us = self.sum_us.wrapping_add(interval_us);
    }

    /// Count an interval that was rejected as out of order.
    pub fn record_out_of_order(&mut self) {
        self.out_of_order += 1;
    }

    /// Total valid intervals recorded.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Intervals rejected as out of order.
    #[must_use]
    pub fn out_of_order(&self) -> u64 {
        self.out_of_order
    }

    /// Smallest interval seen.
    #[must_use]
    pub fn min(&self) -> Option<i64> {
        (self.total > 0).then_some(self.min_us)
    }

    /// Largest interval seen.
    #[must_use]
    pub fn max(&self) -> Option<i64> {
        (self.total > 0).then_some(self.max_us)
    }

    /// Mean interval.
    #[must_use]
    pub fn mean(&self) -> Option<i64> {
        let total = i64::try_from(self.total).ok()?;
        (total > 0).then(|| self.sum_us / total)
    }

    /// Compute a percentile (0.0 to 100.0) over the retained intervals.
    ///
    /// Returns `None` if no samples have been collected or if percentile is out of range.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn percentile(&self, percentile: f64) -> Option<i64> {
        if self.sample_count == 0 || !(0.0..=100.0).contains(&percentile) {
            return None;
        }

        let mut sorted: Vec<i64> = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();

        let idx = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_counters() {
        let counters = EdgeCounters::new();
        counters.record(EdgeCounter::PulseEdge);
        counters.record(EdgeCounter::PulseEdge);
        counters.record(EdgeCounter::Debounced);
        counters.record(EdgeCounter::Accepted);

        let snap = counters.snapshot();
        assert_eq!(snap.pulse_edges, 2);
        assert_eq!(snap.accepted, 1);
        assert_eq!(snap.rejected(), 1);
        assert_eq!(snap.get(EdgeCounter::Debounced), 1);

        counters.reset();
        assert_eq!(counters.snapshot(), EdgeCountersSnapshot::default());
    }

    #[test]
    fn test_counter_labels_are_unique() {
        let mut labels: Vec<_> = EdgeCounter::ALL.iter().map(|k| k.label()).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), EdgeCounter::ALL.len());
    }

    #[test]
    fn test_interval_recording() {
        let mut metrics = IntervalMetrics::new(100);
        assert!(metrics.mean().is_none());

        metrics.record(300);
        metrics.record(500);
        metrics.record(400);
        metrics.record_out_of_order();

        assert_eq!(metrics.total(), 3);
        assert_eq!(metrics.min(), Some(300));
        assert_eq!(metrics.max(), Some(500));
        assert_eq!(metrics.mean(), Some(400));
        assert_eq!(metrics.out_of_order(), 1);
    }

    #[test]
    fn test_percentile_calculation() {
        let mut metrics = IntervalMetrics::new(100);
        for i in 1..=100 {
            metrics.record(i);
        }

        let p50 = metrics.percentile(50.0).unwrap();
        assert!((49..=51).contains(&p50));
        assert!(metrics.percentile(101.0).is_none());
        assert!(metrics.percentile(f64::NAN).is_none());
    }

    #[test]
    fn test_ring_buffer_wrapping() {
        let mut metrics = IntervalMetrics::new(10);
        for i in 0..25 {
            metrics.record(i * 10);
        }
        assert_eq!(metrics.total(), 25);
        // Only the last ten intervals are retained
        assert_eq!(metrics.percentile(0.0), Some(150));
    }
}

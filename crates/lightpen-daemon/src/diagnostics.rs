//! Diagnostics and health reporting for the lightpen daemon.
//!
//! Aggregates the device's edge counters, lifecycle state and channel states
//! into a snapshot that can be logged, dumped as JSON, or rendered in the
//! Prometheus text exposition format.

use lightpen_common::{DriverState, EdgeCounter, EdgeCountersSnapshot, IntervalMetrics};
use lightpen_core::ChannelState;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Share of gated pulses lost to ordering problems above which the driver
/// reports itself degraded.
const DEGRADED_DROP_RATE: f64 = 0.01;

/// Health status of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Running and decoding normally.
    Healthy,
    /// Running, but too many pulses are dropped as out of order.
    Degraded,
    /// Binding failed.
    Unhealthy,
    /// Bound but not yet running.
    Starting,
    /// Shutdown in progress or complete.
    ShuttingDown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Starting => write!(f, "starting"),
            HealthStatus::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

/// Summary of measured intervals, for the speed measurement loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntervalSummary {
    /// Valid intervals measured.
    pub total: u64,
    /// Intervals rejected as out of order.
    pub out_of_order: u64,
    /// Smallest interval, in microseconds.
    pub min_us: Option<i64>,
    /// Largest interval, in microseconds.
    pub max_us: Option<i64>,
    /// Median of the retained intervals, in microseconds.
    pub p50_us: Option<i64>,
}

impl From<&IntervalMetrics> for IntervalSummary {
    fn from(m: &IntervalMetrics) -> Self {
        Self {
            total: m.total(),
            out_of_order: m.out_of_order(),
            min_us: m.min(),
            max_us: m.max(),
            p50_us: m.percentile(50.0),
        }
    }
}

/// Point-in-time view of the driver.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsSnapshot {
    /// Derived health.
    pub health: HealthStatus,
    /// Lifecycle state.
    pub state: DriverState,
    /// Time since the daemon started.
    #[serde(serialize_with = "serialize_secs")]
    pub uptime: Duration,
    /// Edge counters.
    pub counters: EdgeCountersSnapshot,
    /// `(name, state)` of every channel.
    pub channels: Vec<(String, ChannelState)>,
    /// Interval statistics, when measuring speed.
    pub intervals: Option<IntervalSummary>,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Builds snapshots relative to the daemon start time.
#[derive(Debug)]
pub struct DiagnosticsCollector {
    start_time: Instant,
}

impl Default for DiagnosticsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticsCollector {
    /// Start the uptime clock.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    /// Time since the collector was created.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Derive health from the lifecycle state and counters.
    #[allow(clippy::cast_precision_loss)]
    pub fn health(state: DriverState, counters: &EdgeCountersSnapshot) -> HealthStatus {
        match state {
            DriverState::Unbound | DriverState::Bound => HealthStatus::Starting,
            DriverState::Running => {
                let gated = counters.accepted + counters.out_of_order + counters.no_reference;
                let dropped = counters.out_of_order + counters.no_reference;
                let drop_rate = if gated > 0 {
                    dropped as f64 / gated as f64
                } else {
                    0.0
                };
                if drop_rate > DEGRADED_DROP_RATE {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                }
            }
            DriverState::ShuttingDown | DriverState::Stopped => HealthStatus::ShuttingDown,
            DriverState::Failed => HealthStatus::Unhealthy,
        }
    }

    /// Create a snapshot.
    pub fn snapshot(
        &self,
        state: DriverState,
        counters: EdgeCountersSnapshot,
        channels: Vec<(String, ChannelState)>,
        intervals: Option<&IntervalMetrics>,
    ) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            health: Self::health(state, &counters),
            state,
            uptime: self.uptime(),
            counters,
            channels,
            intervals: intervals.map(IntervalSummary::from),
        }
    }
}

/// Format a snapshot in the Prometheus text exposition format.
pub fn format_prometheus_metrics(snapshot: &DiagnosticsSnapshot) -> String {
    let mut output = String::new();

    output.push_str("# HELP lightpen_health Driver health (1=healthy, 0=not healthy)\n");
    output.push_str("# TYPE lightpen_health gauge\n");
    output.push_str(&format!(
        "lightpen_health{{status=\"{}\"}} {}\n",
        snapshot.health,
        u8::from(snapshot.health == HealthStatus::Healthy)
    ));

    output.push_str("# HELP lightpen_state Current lifecycle state\n");
    output.push_str("# TYPE lightpen_state gauge\n");
    output.push_str(&format!("lightpen_state{{state=\"{}\"}} 1\n", snapshot.state));

    output.push_str("# HELP lightpen_uptime_seconds Daemon uptime in seconds\n");
    output.push_str("# TYPE lightpen_uptime_seconds gauge\n");
    output.push_str(&format!(
        "lightpen_uptime_seconds {:.3}\n",
        snapshot.uptime.as_secs_f64()
    ));

    output.push_str("# HELP lightpen_edges_total Edge events by outcome\n");
    output.push_str("# TYPE lightpen_edges_total counter\n");
    for kind in EdgeCounter::ALL {
        output.push_str(&format!(
            "lightpen_edges_total{{kind=\"{}\"}} {}\n",
            kind.label(),
            snapshot.counters.get(kind)
        ));
    }

    output.push_str("# HELP lightpen_channel_open Channel held by a consumer\n");
    output.push_str("# TYPE lightpen_channel_open gauge\n");
    for (name, state) in &snapshot.channels {
        output.push_str(&format!(
            "lightpen_channel_open{{channel=\"{name}\"}} {}\n",
            u8::from(*state != ChannelState::Closed)
        ));
    }

    // Timestamp device only
    if let Some(intervals) = &snapshot.intervals {
        output.push_str("# HELP lightpen_intervals_total Sensor pair intervals measured\n");
        output.push_str("# TYPE lightpen_intervals_total counter\n");
        output.push_str(&format!("lightpen_intervals_total {}\n", intervals.total));
        output.push_str(&format!(
            "lightpen_intervals_out_of_order_total {}\n",
            intervals.out_of_order
        ));
        if let Some(p50) = intervals.p50_us {
            output.push_str("# HELP lightpen_interval_p50_seconds Median pair interval\n");
            output.push_str("# TYPE lightpen_interval_p50_seconds gauge\n");
            #[allow(clippy::cast_precision_loss)]
            let secs = p50 as f64 / 1e6;
            output.push_str(&format!("lightpen_interval_p50_seconds {secs:.6}\n"));
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(accepted: u64, out_of_order: u64) -> EdgeCountersSnapshot {
        EdgeCountersSnapshot {
            accepted,
            out_of_order,
            ..EdgeCountersSnapshot::default()
        }
    }

    #[test]
    fn test_health_status_display() {
        assert_eq!(format!("{}", HealthStatus::Healthy), "healthy");
        assert_eq!(format!("{}", HealthStatus::Degraded), "degraded");
        assert_eq!(format!("{}", HealthStatus::ShuttingDown), "shutting_down");
    }

    #[test]
    fn test_health_from_state() {
        let c = counters(0, 0);
        assert_eq!(
            DiagnosticsCollector::health(DriverState::Bound, &c),
            HealthStatus::Starting
        );
        assert_eq!(
            DiagnosticsCollector::health(DriverState::Running, &c),
            HealthStatus::Healthy
        );
        assert_eq!(
            DiagnosticsCollector::health(DriverState::Failed, &c),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            DiagnosticsCollector::health(DriverState::Stopped, &c),
            HealthStatus::ShuttingDown
        );
    }

    #[test]
    fn test_degraded_on_out_of_order_pulses() {
        assert_eq!(
            DiagnosticsCollector::health(DriverState::Running, &counters(98, 2)),
            HealthStatus::Degraded
        );
        assert_eq!(
            DiagnosticsCollector::health(DriverState::Running, &counters(1000, 1)),
            HealthStatus::Healthy
        );
    }

    #[test]
    fn test_prometheus_metrics_format() {
        let collector = DiagnosticsCollector::new();
        let mut intervals = IntervalMetrics::new(16);
        intervals.record(300);

        let snapshot = collector.snapshot(
            DriverState::Running,
            counters(1000, 0),
            vec![
                ("lightpen0".into(), ChannelState::NoSample),
                ("lightpen1".into(), ChannelState::Closed),
            ],
            Some(&intervals),
        );
        let output = format_prometheus_metrics(&snapshot);

        assert!(output.contains("lightpen_health{status=\"healthy\"} 1"));
        assert!(output.contains("lightpen_state{state=\"RUNNING\"} 1"));
        assert!(output.contains("lightpen_edges_total{kind=\"accepted\"} 1000"));
        assert!(output.contains("lightpen_channel_open{channel=\"lightpen0\"} 1"));
        assert!(output.contains("lightpen_channel_open{channel=\"lightpen1\"} 0"));
        assert!(output.contains("lightpen_intervals_total 1"));
        assert!(output.contains("lightpen_interval_p50_seconds 0.000300"));
    }

    #[test]
    fn test_snapshot_serializes_to_json() {
        let snapshot = DiagnosticsCollector::new().snapshot(
            DriverState::Stopped,
            counters(3, 1),
            Vec::new(),
            None,
        );
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["state"], "STOPPED");
        assert_eq!(json["health"], "shutting_down");
        assert_eq!(json["counters"]["accepted"], 3);
    }
}

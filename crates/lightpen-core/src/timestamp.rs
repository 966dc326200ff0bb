//! Raw edge timestamp device.
//!
//! N independent channels (`gpiots0`..`gpiotsN`). An edge on channel `i`
//! stores its time in channel `i`'s slot; a read returns the latest one.
//! Consumers pair channels to measure intervals between sensors.

use crate::channel::{Channel, ChannelHandle, ChannelRole, ChannelState};
use crate::device::DeviceCore;
use crate::engine::EdgeOutcome;
use crate::lines::{EdgeHandler, EdgeSource, LineId};
use crate::slot::SampleSlot;
use lightpen_common::{
    Clock, DriverConfig, DriverState, EdgeCounter, EdgeCounters, LightpenError, LightpenResult,
    Timestamp,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, trace};

/// Handler storing the edge time into one timestamp channel.
pub struct TimestampHandler {
    channel: Arc<Channel<Timestamp>>,
    shutdown: Arc<AtomicBool>,
    counters: Arc<EdgeCounters>,
    clock: Arc<dyn Clock>,
}

impl EdgeHandler for TimestampHandler {
    fn on_edge_at(&self, now: Timestamp) -> EdgeOutcome {
        if self.shutdown.load(Ordering::Acquire) {
            self.counters.record(EdgeCounter::Ignored);
            return EdgeOutcome::Ignored;
        }
        self.counters.record(EdgeCounter::PulseEdge);
        if let Some(published) = self.channel.publish(now) {
            if published.overwrote_unread {
                self.counters.record(EdgeCounter::Overwritten);
            }
        }
        self.counters.record(EdgeCounter::Accepted);
        trace!(channel = self.channel.name(), at = %now, "timestamp");
        EdgeOutcome::Timestamped(now)
    }

    fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }
}

/// A bound timestamp device instance.
pub struct TimestampDevice {
    core: DeviceCore,
    lines: Vec<LineId>,
    channels: Vec<Arc<Channel<Timestamp>>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TimestampDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimestampDevice")
            .field("core", &self.core)
            .field("lines", &self.lines)
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

impl TimestampDevice {
    /// Validate `config` and create one channel per configured line.
    ///
    /// # Errors
    ///
    /// Returns a configuration or line error if `config` fails validation.
    pub fn bind(config: &DriverConfig, clock: Arc<dyn Clock>) -> LightpenResult<Self> {
        if let Err(e) = config.validate_timestamp() {
            error!(error = %e, "timestamp device bind failed");
            return Err(e);
        }

        let core = DeviceCore::bind("gpiots")?;
        let channels = (0..config.timestamp.lines.len())
            .map(|i| {
                Channel::new(
                    format!("gpiots{i}"),
                    ChannelRole::Timestamp(i),
                    Some(Arc::new(SampleSlot::new())),
                    Arc::clone(core.shutdown_flag()),
                    Arc::clone(core.counters()),
                )
            })
            .collect();

        info!(lines = ?config.timestamp.lines, "timestamp device bound");
        Ok(Self {
            core,
            lines: config.timestamp.lines.clone(),
            channels,
            clock,
        })
    }

    /// Number of channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Line bound to channel `index`.
    #[must_use]
    pub fn line(&self, index: usize) -> Option<LineId> {
        self.lines.get(index).copied()
    }

    /// Channel `index`, if it exists.
    #[must_use]
    pub fn channel(&self, index: usize) -> Option<&Arc<Channel<Timestamp>>> {
        self.channels.get(index)
    }

    /// Edge handler for channel `index`.
    #[must_use]
    pub fn handler(&self, index: usize) -> Option<Arc<dyn EdgeHandler>> {
        let channel = self.channels.get(index)?;
        Some(Arc::new(TimestampHandler {
            channel: Arc::clone(channel),
            shutdown: Arc::clone(self.core.shutdown_flag()),
            counters: Arc::clone(self.core.counters()),
            clock: Arc::clone(&self.clock),
        }))
    }

    /// Attach one handler per channel to `source`.
    ///
    /// # Errors
    ///
    /// Returns the attach error; the device is then `Failed`.
    pub fn start(&self, source: &dyn EdgeSource) -> LightpenResult<()> {
        let bindings = self
            .lines
            .iter()
            .enumerate()
            .filter_map(|(i, &line)| Some((line, self.handler(i)?)))
            .collect();
        self.core.start(source, bindings)
    }

    /// Open channel `index` exclusively.
    ///
    /// # Errors
    ///
    /// `Config` for an unknown index, otherwise as [`Channel::open`].
    pub fn open(&self, index: usize) -> LightpenResult<ChannelHandle<Timestamp>> {
        self.channels
            .get(index)
            .ok_or_else(|| LightpenError::Config(format!("no timestamp channel {index}")))?
            .open()
    }

    /// Open every channel, in order.
    ///
    /// # Errors
    ///
    /// Fails on the first channel that cannot be opened; handles opened so far
    /// are closed again.
    pub fn open_all(&self) -> LightpenResult<Vec<ChannelHandle<Timestamp>>> {
        (0..self.channels.len()).map(|i| self.open(i)).collect()
    }

    /// Raise the shutdown flag, then wake every waiter on every channel.
    pub fn request_shutdown(&self) {
        if self.core.begin_shutdown() {
            let woken: usize = self.channels.iter().map(|c| c.notify()).sum();
            info!(woken, "timestamp waiters released");
        }
    }

    /// Full teardown: request shutdown, then detach from `source`.
    ///
    /// # Errors
    ///
    /// [`LightpenError::Teardown`] if any line failed to detach.
    pub fn shutdown(&self, source: &dyn EdgeSource) -> LightpenResult<()> {
        self.request_shutdown();
        self.core.detach_all(source)
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> DriverState {
        self.core.state()
    }

    /// Diagnostics counters.
    #[must_use]
    pub fn counters(&self) -> &Arc<EdgeCounters> {
        self.core.counters()
    }

    /// `(name, state)` of every channel.
    #[must_use]
    pub fn channel_states(&self) -> Vec<(String, ChannelState)> {
        self.channels
            .iter()
            .map(|c| (c.name().to_string(), c.state()))
            .collect()
    }
}

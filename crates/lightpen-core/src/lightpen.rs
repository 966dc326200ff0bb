//! The lightpen device: one pulse channel, one reference channel.
//!
//! The device owns all shared state explicitly; a process may bind several
//! independent instances. Consumers open `lightpen0` (pulse) to read decoded
//! positions. `lightpen1` (reference) can be opened but never yields samples.

use crate::channel::{Channel, ChannelHandle, ChannelRole, ChannelState, ReadMode};
use crate::device::DeviceCore;
use crate::engine::{EdgeKind, LineHandler, TimingEngine};
use crate::lines::{EdgeHandler, EdgeSource, InputLine};
use crate::sample::Sample;
use crate::slot::SampleSlot;
use lightpen_common::{
    Clock, DriverConfig, DriverState, EdgeCounters, LightpenError, LightpenResult, LineConfig,
};
use std::sync::Arc;
use tracing::{error, info};

/// Node name of the pulse channel.
pub const PULSE_CHANNEL: &str = "lightpen0";
/// Node name of the reference channel.
pub const REFERENCE_CHANNEL: &str = "lightpen1";

/// A bound lightpen device instance.
pub struct LightpenDevice {
    core: DeviceCore,
    lines: LineConfig,
    engine: Arc<TimingEngine>,
    pulse: Arc<Channel<Sample>>,
    reference: Arc<Channel<Sample>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LightpenDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightpenDevice")
            .field("core", &self.core)
            .field("lines", &self.lines)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl LightpenDevice {
    /// Validate `config` and create the device with fresh state.
    ///
    /// `button` and `odd_even` are the level inputs sampled at pulse time.
    ///
    /// # Errors
    ///
    /// Returns a configuration or line error if `config` fails validation.
    pub fn bind(
        config: &DriverConfig,
        button: Arc<dyn InputLine>,
        odd_even: Arc<dyn InputLine>,
        clock: Arc<dyn Clock>,
    ) -> LightpenResult<Self> {
        if let Err(e) = config.validate_lightpen() {
            error!(error = %e, "lightpen bind failed");
            return Err(e);
        }

        let core = DeviceCore::bind("lightpen")?;
        let shutdown = core.shutdown_flag();
        let counters = core.counters();

        let pulse = Channel::new(
            PULSE_CHANNEL,
            ChannelRole::Pulse,
            Some(Arc::new(SampleSlot::new())),
            Arc::clone(shutdown),
            Arc::clone(counters),
        );
        let reference = Channel::new(
            REFERENCE_CHANNEL,
            ChannelRole::Reference,
            None,
            Arc::clone(shutdown),
            Arc::clone(counters),
        );
        let engine = Arc::new(TimingEngine::new(
            &config.timing,
            Arc::clone(&pulse),
            button,
            odd_even,
            Arc::clone(shutdown),
            Arc::clone(counters),
        ));

        info!(
            pulse = config.lines.pulse,
            reference = config.lines.reference,
            button = config.lines.button,
            odd_even = config.lines.odd_even,
            line_length = config.timing.line_length,
            debounce_us = config.timing.debounce_us(),
            "lightpen bound"
        );

        Ok(Self {
            core,
            lines: config.lines.clone(),
            engine,
            pulse,
            reference,
            clock,
        })
    }

    /// Edge handler for one input, bound to this device's state.
    #[must_use]
    pub fn handler(&self, kind: EdgeKind) -> Arc<dyn EdgeHandler> {
        Arc::new(LineHandler::new(
            kind,
            Arc::clone(&self.engine),
            Arc::clone(&self.clock),
        ))
    }

    /// Attach the pulse and reference handlers to `source`.
    ///
    /// # Errors
    ///
    /// Returns the attach error; the device is then `Failed`.
    pub fn start(&self, source: &dyn EdgeSource) -> LightpenResult<()> {
        self.core.start(
            source,
            vec![
                (self.lines.pulse, self.handler(EdgeKind::Pulse)),
                (self.lines.reference, self.handler(EdgeKind::Reference)),
            ],
        )
    }

    /// Channel serving edges of `kind`.
    #[must_use]
    pub fn channel(&self, kind: EdgeKind) -> &Arc<Channel<Sample>> {
        match kind {
            EdgeKind::Pulse => &self.pulse,
            EdgeKind::Reference => &self.reference,
        }
    }

    /// Open a channel exclusively.
    ///
    /// # Errors
    ///
    /// `Busy` if already open, `ShuttingDown` after shutdown.
    pub fn open(&self, kind: EdgeKind) -> LightpenResult<ChannelHandle<Sample>> {
        self.channel(kind).open()
    }

    /// Raise the shutdown flag, then wake every waiter on every channel.
    pub fn request_shutdown(&self) {
        if self.core.begin_shutdown() {
            let woken = self.pulse.notify() + self.reference.notify();
            info!(woken, "lightpen waiters released");
        }
    }

    /// Full teardown: request shutdown, then detach from `source`.
    ///
    /// # Errors
    ///
    /// [`Teardown`](LightpenError::Teardown) if any line failed to
    /// detach; every line is still attempted.
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

    /// The timing engine behind the handlers.
    #[must_use]
    pub fn engine(&self) -> &Arc<TimingEngine> {
        &self.engine
    }

    /// Bound line configuration.
    #[must_use]
    pub fn lines(&self) -> &LineConfig {
        &self.lines
    }

    /// `(name, state)` of every channel.
    #[must_use]
    pub fn channel_states(&self) -> Vec<(String, ChannelState)> {
        [&self.pulse, &self.reference]
            .iter()
            .map(|c| (c.name().to_string(), c.state()))
            .collect()
    }
}

impl ChannelHandle<Sample> {
    /// Read a sample as its textual encoding, `major,minor,aux\n`.
    ///
    /// # Errors
    ///
    /// Same as [`read`](Self::read).
    pub fn read_text(&self, mode: ReadMode) -> LightpenResult<String> {
        self.read(mode).map(|s| s.encode())
    }

    /// Copy the textual encoding into `buf`.
    ///
    /// Returns the number of bytes written. A sample is only consumed when its
    /// whole record fits.
    ///
    /// # Errors
    ///
    /// [`LightpenError::BufferTooSmall`] if `buf` cannot hold the record; the
    /// sample stays pending. Otherwise same as [`read`](Self::read).
    pub fn read_into(&self, buf: &mut [u8], mode: ReadMode) -> LightpenResult<usize> {
        let available = buf.len();
        let sample = self.read_checked(mode, &|s: &Sample| {
            let needed = s.encode().len();
            if needed > available {
                return Err(LightpenError::BufferTooSmall { needed, available });
            }
            Ok(())
        })?;
        let text = sample.encode();
        buf[..text.len()].copy_from_slice(text.as_bytes());
        Ok(text.len())
    }
}

//! Channels and the consumer synchronization gate.
//!
//! A [`Channel`] is the bookkeeping for one consumer endpoint: its identity,
//! an exclusivity flag and the waitset of consumers interested in readiness.
//! Opening a channel yields a [`ChannelHandle`], through which a consumer
//! reads, polls and finally closes.
//!
//! ```text
//!            open                 publish
//!   Closed ────────► Open(NoSample) ─────► Open(SampleReady)
//!     ▲                    ▲                      │
//!     │ close/drop         └──────── read ────────┘
//!     └──────────────────── Open(*)
//! ```

use crate::slot::{Published, SampleSlot};
use crate::waitset::{WaitSet, Waiter};
use lightpen_common::{EdgeCounter, EdgeCounters, LightpenError, LightpenResult};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// What a channel delivers to its consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChannelRole {
    /// Decoded lightpen samples.
    Pulse,
    /// Reference edges; never yields samples.
    Reference,
    /// Raw timestamps from timestamp channel `n`.
    Timestamp(usize),
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pulse => write!(f, "pulse"),
            Self::Reference => write!(f, "reference"),
            Self::Timestamp(n) => write!(f, "timestamp{n}"),
        }
    }
}

/// Observable channel state, reported for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelState {
    /// No consumer holds the channel.
    Closed,
    /// Open, nothing pending.
    NoSample,
    /// Open, a sample is waiting to be read.
    SampleReady,
}

/// Read behaviour when no sample is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Suspend until a sample arrives, the handle closes or the device shuts down.
    #[default]
    Blocking,
    /// Fail immediately with [`LightpenError::WouldBlock`].
    NonBlocking,
}

/// Result of a readiness query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Readiness {
    /// A read would return a sample without blocking.
    Ready,
    /// Nothing pending; the caller's waiter has been registered.
    NotReady,
    /// No more data will arrive (shut down or closed).
    Hangup,
}

/// One consumer endpoint of a device.
pub struct Channel<T: Copy + Default> {
    name: String,
    role: ChannelRole,
    /// `None` for channels that never yield data.
    slot: Option<Arc<SampleSlot<T>>>,
    open: AtomicBool,
    waitset: WaitSet,
    shutdown: Arc<AtomicBool>,
    counters: Arc<EdgeCounters>,
}

impl<T: Copy + Default> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<T: Copy + Default> Channel<T> {
    /// Create a channel. Pass `slot: None` for a channel that never becomes ready.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        role: ChannelRole,
        slot: Option<Arc<SampleSlot<T>>>,
        shutdown: Arc<AtomicBool>,
        counters: Arc<EdgeCounters>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            role,
            slot,
            open: AtomicBool::new(false),
            waitset: WaitSet::new(),
            shutdown,
            counters,
        })
    }

    /// Device node name, e.g. `lightpen0`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// What this channel delivers.
    #[must_use]
    pub fn role(&self) -> ChannelRole {
        self.role
    }

    /// True while a consumer holds the channel.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// True once the owning device has started shutting down.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Current state for diagnostics.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        if !self.is_open() {
            ChannelState::Closed
        } else if self.has_pending() {
            ChannelState::SampleReady
        } else {
            ChannelState::NoSample
        }
    }

    /// Number of consumers waiting for readiness.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.waitset.len()
    }

    /// Acquire exclusive access.
    ///
    /// # Errors
    ///
    /// [`LightpenError::ShuttingDown`] after shutdown, [`LightpenError::Busy`] if
    /// another handle is open.
    pub fn open(self: &Arc<Self>) -> LightpenResult<ChannelHandle<T>> {
        if self.is_shutting_down() {
            return Err(LightpenError::ShuttingDown);
        }
        if self
            .open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(channel = %self.name, "open refused, channel busy");
            return Err(LightpenError::Busy(self.name.clone()));
        }
        debug!(channel = %self.name, role = %self.role, "channel opened");
        Ok(ChannelHandle {
            channel: Arc::clone(self),
            closed: AtomicBool::new(false),
            waiter: Waiter::new(),
        })
    }

    /// Store a value in the slot and wake every waiter.
    ///
    /// Returns `None` for a channel without a slot.
    pub fn publish(&self, value: T) -> Option<Published> {
        let published = self.slot.as_ref()?.publish(value);
        self.notify();
        Some(published)
    }

    /// Wake every registered waiter.
    pub fn notify(&self) -> usize {
        self.waitset.wake_all()
    }

    /// True while a published value has not been read.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.slot.as_ref().is_some_and(|s| s.is_ready())
    }

    fn take_if(&self, check: &dyn Fn(&T) -> LightpenResult<()>) -> LightpenResult<Option<T>> {
        let Some(slot) = self.slot.as_ref() else {
            return Ok(None);
        };
        let value = slot.take_if(check)?;
        if value.is_some() {
            self.counters.record(EdgeCounter::Read);
        }
        Ok(value)
    }
}

/// Exclusive consumer handle returned by [`Channel::open`].
///
/// Dropping the handle closes it.
pub struct ChannelHandle<T: Copy + Default> {
    channel: Arc<Channel<T>>,
    closed: AtomicBool,
    waiter: Arc<Waiter>,
}

impl<T: Copy + Default> fmt::Debug for ChannelHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("channel", &self.channel.name)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<T: Copy + Default> ChannelHandle<T> {
    /// The channel this handle holds.
    #[must_use]
    pub fn channel(&self) -> &Arc<Channel<T>> {
        &self.channel
    }

    /// True once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn try_take(&self, check: &dyn Fn(&T) -> LightpenResult<()>) -> LightpenResult<Option<T>> {
        if self.is_closed() {
            return Err(LightpenError::Closed);
        }
        if self.channel.is_shutting_down() {
            return Err(LightpenError::ShuttingDown);
        }
        self.channel.take_if(check)
    }

    /// Read the pending sample, clearing it.
    ///
    /// # Errors
    ///
    /// - [`LightpenError::WouldBlock`] in non-blocking mode with nothing pending
    /// - [`LightpenError::ShuttingDown`] once the device shuts down (end of stream)
    /// - [`LightpenError::Closed`] if the handle is closed, including while blocked
    pub fn read(&self, mode: ReadMode) -> LightpenResult<T> {
        self.read_checked(mode, &|_| Ok(()))
    }

    /// Like [`read`](Self::read), but the pending sample is only consumed if
    /// `check` accepts it. A rejected sample stays pending and the check's
    /// error is returned.
    ///
    /// # Errors
    ///
    /// Same as [`read`](Self::read), plus whatever `check` returns.
    pub fn read_checked(
        &self,
        mode: ReadMode,
        check: &dyn Fn(&T) -> LightpenResult<()>,
    ) -> LightpenResult<T> {
        loop {
            if let Some(value) = self.try_take(check)? {
                return Ok(value);
            }
            if mode == ReadMode::NonBlocking {
                return Err(LightpenError::WouldBlock);
            }

            // Register before re-checking so a publish in between still wakes us
            self.channel.waitset.register(&self.waiter);
            match self.try_take(check) {
                Ok(None) => self.waiter.wait(),
                other => {
                    self.channel.waitset.unregister(&self.waiter);
                    if let Some(value) = other? {
                        return Ok(value);
                    }
                }
            }
        }
    }

    /// Readiness query; registers `waiter` with the channel when not ready.
    pub fn poll(&self, waiter: Option<&Arc<Waiter>>) -> Readiness {
        if self.is_closed() || self.channel.is_shutting_down() {
            return Readiness::Hangup;
        }
        if self.channel.has_pending() {
            return Readiness::Ready;
        }
        if let Some(waiter) = waiter {
            self.channel.waitset.register(waiter);
            // A publish may have landed before registration
            if self.channel.has_pending() {
                return Readiness::Ready;
            }
            if self.channel.is_shutting_down() {
                return Readiness::Hangup;
            }
        }
        Readiness::NotReady
    }

    /// Release exclusivity and wake a reader blocked on this handle.
    ///
    /// Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.channel.open.store(false, Ordering::Release);
        self.channel.waitset.unregister(&self.waiter);
        self.waiter.wake();
        // Pollers multiplexing this handle see the hangup
        self.channel.notify();
        debug!(channel = %self.channel.name, "channel closed");
    }
}

impl<T: Copy + Default> Drop for ChannelHandle<T> {
    fn drop(&mut self) {
        self.close();
    }
}

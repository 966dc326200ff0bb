//! Block-and-signal primitives bridging producers and consumers.
//!
//! A [`Waiter`] is one consumer wait context (a blocked reader or a
//! multiplexing poller). A [`WaitSet`] is the per-channel list of waiters
//! that want to hear about the next sample. Producers call
//! [`WaitSet::wake_all`], which signals and drains every registered waiter.
//!
//! Wakeups are sticky: a waiter signaled before it starts waiting returns
//! immediately, so "register, re-check, wait" never loses a wakeup.

use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// A single consumer wait context.
#[derive(Debug, Default)]
pub struct Waiter {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl Waiter {
    /// Create a new, unsignaled waiter.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Signal the waiter. Never blocks for longer than the internal flag update.
    pub fn wake(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cond.notify_all();
    }

    /// Block until signaled, then clear the signal.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.cond.wait(&mut signaled);
        }
        *signaled = false;
    }

    /// Block until signaled or `timeout` elapses.
    ///
    /// Returns `true` if the waiter was signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.cond.wait_until(&mut signaled, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *signaled, false)
    }

    /// True if a signal is pending.
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        *self.signaled.lock()
    }
}

/// Waiters registered for readiness on one channel.
#[derive(Debug, Default)]
pub struct WaitSet {
    waiters: Mutex<Vec<Weak<Waiter>>>,
}

impl WaitSet {
    /// Create an empty wait set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for the next wakeup. Registering twice is a no-op.
    pub fn register(&self, waiter: &Arc<Waiter>) {
        let mut waiters = self.waiters.lock();
        // Drop entries whose poller has gone away
        waiters.retain(|w| w.strong_count() > 0);
        if !waiters
            .iter()
            .any(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(waiter)))
        {
            waiters.push(Arc::downgrade(waiter));
        }
    }

    /// Remove a waiter without waking it.
    pub fn unregister(&self, waiter: &Arc<Waiter>) {
        self.waiters
            .lock()
            .retain(|w| w.strong_count() > 0 && !std::ptr::eq(w.as_ptr(), Arc::as_ptr(waiter)));
    }

    /// Wake and drain every registered waiter. Returns how many were woken.
    pub fn wake_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.waiters.lock());
        let mut woken = 0;
        for waiter in drained.iter().filter_map(Weak::upgrade) {
            waiter.wake();
            woken += 1;
        }
        woken
    }

    /// Number of live registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters
            .lock()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// True if no live waiter is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

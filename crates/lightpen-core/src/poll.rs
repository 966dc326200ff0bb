//! Readiness multiplexing over several channel handles.

use crate::channel::{ChannelHandle, Readiness};
use crate::waitset::Waiter;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Anything that can report readiness and register a waiter.
pub trait Pollable {
    /// See [`ChannelHandle::poll`].
    fn poll(&self, waiter: Option<&Arc<Waiter>>) -> Readiness;
}

impl<T: Copy + Default> Pollable for ChannelHandle<T> {
    fn poll(&self, waiter: Option<&Arc<Waiter>>) -> Readiness {
        ChannelHandle::poll(self, waiter)
    }
}

/// Wait until at least one handle is ready or hung up.
///
/// Returns `(index, readiness)` for every handle that is not
/// [`Readiness::NotReady`]. An empty result means the timeout elapsed with no
/// event. `timeout: None` waits indefinitely.
pub fn poll_many(handles: &[&dyn Pollable], timeout: Option<Duration>) -> Vec<(usize, Readiness)> {
    let waiter = Waiter::new();
    let deadline = timeout.map(|t| Instant::now() + t);

    loop {
        let events: Vec<_> = handles
            .iter()
            .enumerate()
            .filter_map(|(i, h)| match h.poll(Some(&waiter)) {
                Readiness::NotReady => None,
                r => Some((i, r)),
            })
            .collect();
        if !events.is_empty() || handles.is_empty() {
            return events;
        }

        match deadline {
            None => waiter.wait(),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Vec::new();
                }
                waiter.wait_timeout(deadline - now);
            }
        }
    }
}

//! Single-slot store for the latest derived value.
//!
//! The slot is the only data path between producers (edge handlers) and the
//! consumer (the reader of a channel). It holds exactly one value; a new
//! publication unconditionally replaces any unread value.
//!
//! - Seqlock semantics give consistent snapshots without the producer ever
//!   waiting on the consumer
//! - Every publication carries a generation number; the slot is *valid* while
//!   the published generation is ahead of the consumed generation
//! - Consuming is a compare-and-set on the consumed generation, so
//!   "read value + clear valid" is atomic with respect to "write value + set valid"
//!
//! # Threading Model
//!
//! - **Producer context**: `publish()`. Concurrent producers serialize on the
//!   seqlock's odd/even sequence; the critical section is a single copy.
//! - **Consumer context**: `take()`, `peek()`, `is_ready()`.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │ sequence (odd = write in progress)                    │
//! ├───────────────────────────────────────────────────────┤
//! │ entry { generation, value }      (seqlock protected)  │
//! ├───────────────────────────────────────────────────────┤
//! │ published generation │ consumed generation            │
//! └───────────────────────────────────────────────────────┘
//! ```

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{fence, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, Default)]
struct Entry<T> {
    generation: u64,
    value: T,
}

/// Seqlock-protected single-slot holder with destructive reads.
pub struct SampleSlot<T: Copy + Default> {
    /// Sequence number (odd = write in progress).
    sequence: CachePadded<AtomicU64>,
    /// The stored value and its generation.
    entry: CachePadded<UnsafeCell<Entry<T>>>,
    /// Generation of the newest committed value (0 = never published).
    published: CachePadded<AtomicU64>,
    /// Generation of the newest value handed to a reader.
    consumed: CachePadded<AtomicU64>,
}

impl<T: Copy + Default> std::fmt::Debug for SampleSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleSlot")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .field("published", &self.published.load(Ordering::Relaxed))
            .field("consumed", &self.consumed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<T: Copy + Default> Default for SampleSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// What a publication replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Published {
    /// Generation assigned to the new value.
    pub generation: u64,
    /// True if the previous value was never read.
    pub overwrote_unread: bool,
}

impl<T: Copy + Default> SampleSlot<T> {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sequence: CachePadded::new(AtomicU64::new(0)),
            entry: CachePadded::new(UnsafeCell::new(Entry::default())),
            published: CachePadded::new(AtomicU64::new(0)),
            consumed: CachePadded::new(AtomicU64::new(0)),
        }
    }

    /// Read a consistent `(generation, value)` snapshot.
    /// Spins while a write is in progress.
    fn snapshot(&self) -> Entry<T> {
        loop {
            let seq1 = self.sequence.load(Ordering::Acquire);

            // Odd sequence: a producer is mid-write
            if seq1 & 1 != 0 {
                std::hint::spin_loop();
                continue;
            }

            // SAFETY: the sequence is checked before and after the copy; a torn
            // copy is discarded. Writers only touch the entry while the sequence is odd.
            let entry = unsafe { std::ptr::read_volatile(self.entry.get()) };

            fence(Ordering::Acquire);
            let seq2 = self.sequence.load(Ordering::Relaxed);
            if seq1 == seq2 {
                return entry;
            }

            std::hint::spin_loop();
        }
    }

    /// Acquire the write side by moving the sequence from even to odd.
    fn begin_write(&self) -> u64 {
        loop {
            let seq = self.sequence.load(Ordering::Relaxed);
            if seq & 1 == 0
                && self
                    .sequence
                    .compare_exchange_weak(seq, seq + 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                fence(Ordering::Release);
                return seq + 1;
            }
            std::hint::spin_loop();
        }
    }

    /// Replace the stored value and mark the slot valid.
    ///
    /// Never waits on a reader. Safe to call from several producers at once.
    pub fn publish(&self, value: T) -> Published {
        let seq = self.begin_write();

        // SAFETY: the odd sequence acquired above excludes other writers, and
        // readers discard any copy taken while the sequence is odd.
        let generation = unsafe {
            let entry = &mut *self.entry.get();
            entry.generation += 1;
            entry.value = value;
            entry.generation
        };

        // Published inside the write side so generations never go backwards
        self.published.store(generation, Ordering::Release);
        // Back to even: write complete
        self.sequence.store(seq + 1, Ordering::Release);

        let overwrote_unread =
            generation > 1 && self.consumed.load(Ordering::Acquire) < generation - 1;
        Published {
            generation,
            overwrote_unread,
        }
    }

    /// Take the pending value, clearing validity.
    ///
    /// Returns `None` if nothing was published since the last take.
    pub fn take(&self) -> Option<T> {
        match self.take_if(|_| Ok::<(), std::convert::Infallible>(())) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Take the pending value only if `check` accepts it.
    ///
    /// The value handed to `check` is exactly the one taken. On rejection the
    /// value stays pending and the error is returned.
    pub fn take_if<E>(&self, check: impl Fn(&T) -> Result<(), E>) -> Result<Option<T>, E> {
        loop {
            let entry = self.snapshot();
            let consumed = self.consumed.load(Ordering::Acquire);
            if entry.generation <= consumed {
                return Ok(None);
            }
            check(&entry.value)?;
            if self
                .consumed
                .compare_exchange(consumed, entry.generation, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(Some(entry.value));
            }
        }
    }

    /// Look at the pending value without consuming it.
    #[must_use]
    pub fn peek(&self) -> Option<T> {
        let entry = self.snapshot();
        (entry.generation > self.consumed.load(Ordering::Acquire)).then_some(entry.value)
    }

    /// True while a published value has not been taken.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.published.load(Ordering::Acquire) > self.consumed.load(Ordering::Acquire)
    }

    /// Generation of the newest committed value.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }
}

// SAFETY: all access to the UnsafeCell goes through the seqlock protocol above.
// Values are `Copy`, so a snapshot never aliases the stored value.
unsafe impl<T: Copy + Default + Send> Send for SampleSlot<T> {}
unsafe impl<T: Copy + Default + Send> Sync for SampleSlot<T> {}

use thiserror::Error;

/// Driver error types covering channel access, configuration, and lifecycle failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LightpenError {
    /// Channel is already held open by another consumer.
    #[error("channel {0} is busy")]
    Busy(String),

    /// Non-blocking read issued while no sample is pending.
    #[error("no sample pending, operation would block")]
    WouldBlock,

    /// The driver is shutting down; no more data will be produced.
    #[error("driver is shutting down")]
    ShuttingDown,

    /// The handle was closed while an operation was in progress.
    #[error("channel handle closed")]
    Closed,

    /// Caller buffer cannot hold the encoded sample; the sample stays pending.
    #[error("buffer too small: need {needed} bytes, got {available}")]
    BufferTooSmall {
        /// Length of the encoded sample.
        needed: usize,
        /// Length of the caller's buffer.
        available: usize,
    },

    /// Two timestamps yielded a negative interval.
    #[error("interrupts arrived out of order: start {start_us}us, end {end_us}us")]
    OutOfOrder {
        /// Timestamp expected to come first, in microseconds.
        start_us: i64,
        /// Timestamp expected to come second, in microseconds.
        end_us: i64,
    },

    /// Configuration or binding error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Line identifier rejected during binding.
    #[error("invalid line {line} for {purpose}")]
    InvalidLine {
        /// Offending line identifier.
        line: u32,
        /// What the line was meant to be bound to.
        purpose: String,
    },

    /// Failure while detaching an edge source or releasing a channel.
    #[error("teardown failed: {0}")]
    Teardown(String),

    /// Invalid lifecycle transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Malformed textual sample or timestamp.
    #[error("parse error: {0}")]
    Parse(String),
}

impl LightpenError {
    /// Returns true for conditions that are expected in normal polling use.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::WouldBlock)
    }

    /// Returns true if the error means no further data will ever arrive on the handle.
    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::ShuttingDown | Self::Closed)
    }
}

/// Convenience type alias for driver operations.
pub type LightpenResult<T> = Result<T, LightpenError>;

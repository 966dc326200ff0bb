//! Abstractions over input lines and the edge sources that drive handlers.
//!
//! An [`EdgeSource`] delivers edge events on lines to attached
//! [`EdgeHandler`]s. Level inputs sampled at edge time (pen button, odd/even
//! field) are read through [`InputLine`].

use crate::engine::EdgeOutcome;
use lightpen_common::{Clock, LightpenResult, Timestamp};
use std::sync::Arc;

/// Identifier of a physical input line.
pub type LineId = u32;

/// A level input sampled from producer context.
pub trait InputLine: Send + Sync {
    /// Line identifier.
    fn id(&self) -> LineId;

    /// Current level. Must not block.
    fn is_high(&self) -> bool;
}

/// Callback bound to one line, invoked once per edge.
///
/// May run concurrently with other handlers and with consumers.
pub trait EdgeHandler: Send + Sync {
    /// Handle an edge observed at `now`.
    fn on_edge_at(&self, now: Timestamp) -> EdgeOutcome;

    /// Clock used to stamp edges.
    fn clock(&self) -> &dyn Clock;

    /// Handle an edge stamped with the handler's clock.
    fn on_edge(&self) -> EdgeOutcome {
        let now = self.clock().now();
        self.on_edge_at(now)
    }
}

/// Delivers edges on lines to attached handlers.
pub trait EdgeSource: Send + Sync {
    /// Start delivering edges on `line` to `handler`.
    ///
    /// # Errors
    ///
    /// Fails if the line cannot be requested or is already attached.
    fn attach(&self, line: LineId, handler: Arc<dyn EdgeHandler>) -> LightpenResult<()>;

    /// Stop delivering edges on `line`.
    ///
    /// # Errors
    ///
    /// Fails if the line was never attached or cannot be released.
    fn detach(&self, line: LineId) -> LightpenResult<()>;
}

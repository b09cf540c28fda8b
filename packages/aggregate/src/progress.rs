//! Progress reporting for long-running aggregation passes.
//!
//! Decouples the binner from any rendering backend. The CLI plugs in an
//! `indicatif` bar; the server and tests use [`NullProgress`].

use std::sync::Arc;

/// Receives progress updates from a binning or loading pass.
///
/// Implementations must be `Send + Sync` so a single reporter can be shared
/// through an `Arc` across threads.
pub trait ProgressCallback: Send + Sync {
    /// Advance progress by `delta` units.
    fn inc(&self, delta: u64);

    /// Update the message displayed alongside the progress indicator.
    fn set_message(&self, msg: String);

    /// Mark progress as complete with a final message.
    fn finish(&self, msg: String);
}

/// Ignores all progress updates.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`] instance.
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}

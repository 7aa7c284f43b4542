//! Cooperative cancellation for background runs
//!
//! Workers poll a shared flag between file-level units of work, never inside
//! a single blob write or catalog transaction. This keeps the catalog and
//! content store consistent at every observable point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancellation token passed into scanner and cleaner runs.
///
/// Cloning yields a handle to the same flag; cancelling any clone cancels
/// them all.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the run holding this token
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Check whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

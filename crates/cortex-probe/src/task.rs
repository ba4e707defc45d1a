//! Run a long operation on a worker thread.
//!
//! Every long-running entry point in this crate is synchronous and takes a
//! [`ProgressSink`]. [`BackgroundTask`] moves such a call onto its own
//! thread with a shared [`ProgressTracker`](cortex_mesh::ProgressTracker),
//! so the caller can poll progress, cancel, and finally block on the result.
//!
//! ```
//! use cortex_probe::BackgroundTask;
//! use cortex_mesh::ProgressSink;
//!
//! let task = BackgroundTask::spawn(10, |progress: &dyn ProgressSink| {
//!     for i in 0..10 {
//!         if progress.is_cancelled() {
//!             return None;
//!         }
//!         progress.set_value(i + 1);
//!     }
//!     Some(42)
//! });
//! assert_eq!(task.join(), Some(42));
//! ```

use std::thread::JoinHandle;

use cortex_mesh::{Progress, ProgressSink, SharedProgressTracker, shared_tracker};
use tracing::debug;

/// A computation running on its own thread.
#[derive(Debug)]
pub struct BackgroundTask<T> {
    handle: JoinHandle<T>,
    tracker: SharedProgressTracker,
}

impl<T: Send + 'static> BackgroundTask<T> {
    /// Start `f` on a new thread with a tracker over `0..total`.
    pub fn spawn<F>(total: u64, f: F) -> Self
    where
        F: FnOnce(&dyn ProgressSink) -> T + Send + 'static,
    {
        Self::spawn_with_tracker(shared_tracker(total), f)
    }

    /// Start `f` reporting to an existing tracker.
    pub fn spawn_with_tracker<F>(tracker: SharedProgressTracker, f: F) -> Self
    where
        F: FnOnce(&dyn ProgressSink) -> T + Send + 'static,
    {
        let worker = SharedProgressTracker::clone(&tracker);
        let handle = std::thread::spawn(move || f(worker.as_ref()));
        debug!("Spawned background task");
        Self { handle, tracker }
    }

    /// The tracker the task reports to.
    pub fn tracker(&self) -> &SharedProgressTracker {
        &self.tracker
    }

    /// Current progress.
    pub fn progress(&self) -> Progress {
        self.tracker.snapshot()
    }

    /// Ask the task to stop at its next cancellation check.
    pub fn cancel(&self) {
        debug!("Cancelling background task");
        self.tracker.cancel();
    }

    /// True once the worker has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the task completes.
    ///
    /// A panic on the worker is resumed on the calling thread.
    pub fn join(self) -> T {
        match self.handle.join() {
            Ok(value) => value,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }
}

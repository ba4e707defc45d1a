//! Progress reporting and cooperative cancellation for long-running
//! operations.
//!
//! Long operations take a `&dyn ProgressSink`. They set a range, advance the
//! value once per outer-loop item, and poll [`ProgressSink::is_cancelled`]
//! between items. A cancelled operation stops and returns no result.
//!
//! # Example
//!
//! ```
//! use cortex_mesh::progress::{ProgressCallback, ProgressSink, ProgressTracker};
//!
//! let callback: ProgressCallback = Box::new(|progress| {
//!     println!("{}% complete: {}", progress.percent(), progress.message);
//!     true // return false to cancel
//! });
//!
//! let tracker = ProgressTracker::new(0).with_callback(callback);
//! tracker.set_range(0, 10);
//! tracker.set_value(5);
//! assert!(!tracker.is_cancelled());
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Progress information passed to callbacks.
#[derive(Debug, Clone)]
pub struct Progress {
    /// Current step, relative to the range minimum.
    pub current: u64,

    /// Total number of steps.
    pub total: u64,

    /// Human-readable message describing current operation.
    pub message: String,

    /// Elapsed time since operation started.
    pub elapsed: Duration,

    /// Estimated time remaining (if available).
    pub estimated_remaining: Option<Duration>,
}

impl Progress {
    /// Create a new progress report.
    pub fn new(current: u64, total: u64, message: impl Into<String>) -> Self {
        Self {
            current,
            total,
            message: message.into(),
            elapsed: Duration::ZERO,
            estimated_remaining: None,
        }
    }

    /// Get progress as a fraction (0.0 to 1.0).
    #[inline]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.current as f64 / self.total as f64).min(1.0)
        }
    }

    /// Get progress as a percentage (0 to 100).
    #[inline]
    pub fn percent(&self) -> u32 {
        (self.fraction() * 100.0).round() as u32
    }

    /// Check if the operation is complete.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.current >= self.total
    }
}

/// Callback function for progress reporting.
///
/// Returns `true` to continue, `false` to request cancellation.
pub type ProgressCallback = Box<dyn Fn(&Progress) -> bool + Send + Sync>;

/// Receiver of progress updates from a running operation.
///
/// Implementations must be shareable across the worker threads of a
/// parallel pass.
pub trait ProgressSink: Sync {
    /// Set the value range of the next phase.
    fn set_range(&self, min: u64, max: u64);

    /// Set the current value within the range.
    fn set_value(&self, value: u64);

    /// Describe the current phase.
    fn set_message(&self, message: &str);

    /// True once cancellation has been requested.
    fn is_cancelled(&self) -> bool;

    /// Advance the current value by one.
    fn increment(&self);
}

/// A sink that ignores updates and is never cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    #[inline]
    fn set_range(&self, _min: u64, _max: u64) {}

    #[inline]
    fn set_value(&self, _value: u64) {}

    #[inline]
    fn set_message(&self, _message: &str) {}

    #[inline]
    fn is_cancelled(&self) -> bool {
        false
    }

    #[inline]
    fn increment(&self) {}
}

/// A thread-safe progress tracker.
///
/// Counters are atomics so rayon workers can advance them without locks.
/// An optional callback is invoked at most once per callback interval; a
/// callback returning `false` cancels the tracker.
pub struct ProgressTracker {
    current: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
    cancelled: AtomicBool,
    message: Mutex<String>,
    start_time: Instant,
    last_callback_time: Mutex<Instant>,
    callback_interval: Duration,
    callback: Option<ProgressCallback>,
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("current", &self.current())
            .field("total", &self.total())
            .field("cancelled", &self.is_cancelled())
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

impl ProgressTracker {
    /// Create a new progress tracker over `0..total`.
    pub fn new(total: u64) -> Self {
        Self {
            current: AtomicU64::new(0),
            min: AtomicU64::new(0),
            max: AtomicU64::new(total),
            cancelled: AtomicBool::new(false),
            message: Mutex::new(String::new()),
            start_time: Instant::now(),
            last_callback_time: Mutex::new(Instant::now()),
            callback_interval: Duration::from_millis(100),
            callback: None,
        }
    }

    /// Attach a callback.
    pub fn with_callback(mut self, callback: ProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Set how often the callback may fire.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.callback_interval = interval;
        self
    }

    /// Get the current progress value.
    #[inline]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    /// Number of steps in the current range.
    #[inline]
    pub fn total(&self) -> u64 {
        self.max
            .load(Ordering::Relaxed)
            .saturating_sub(self.min.load(Ordering::Relaxed))
    }

    /// Current phase description.
    pub fn message(&self) -> String {
        self.message
            .lock()
            .map(|m| m.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Get progress as a fraction (0.0 to 1.0).
    #[inline]
    pub fn fraction(&self) -> f64 {
        self.snapshot().fraction()
    }

    /// Get elapsed time.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Estimate remaining time based on current progress.
    pub fn estimated_remaining(&self) -> Option<Duration> {
        let done = self
            .current()
            .saturating_sub(self.min.load(Ordering::Relaxed));
        if done == 0 {
            return None;
        }

        let rate = done as f64 / self.elapsed().as_secs_f64();
        if rate > 0.0 {
            let remaining = self.total().saturating_sub(done) as f64 / rate;
            Some(Duration::from_secs_f64(remaining))
        } else {
            None
        }
    }

    /// Create a Progress snapshot.
    pub fn snapshot(&self) -> Progress {
        Progress {
            current: self
                .current()
                .saturating_sub(self.min.load(Ordering::Relaxed)),
            total: self.total(),
            message: self.message(),
            elapsed: self.elapsed(),
            estimated_remaining: self.estimated_remaining(),
        }
    }

    /// Call the callback if enough time has passed since the last call.
    ///
    /// Returns `false` if the tracker is (now) cancelled.
    pub fn maybe_callback(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }

        let Some(callback) = &self.callback else {
            return true;
        };

        let now = Instant::now();
        {
            let mut last = self
                .last_callback_time
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if now.duration_since(*last) < self.callback_interval {
                return true;
            }
            *last = now;
        }

        let should_continue = callback(&self.snapshot());
        if !should_continue {
            self.cancel();
        }

        should_continue
    }
}

impl ProgressSink for ProgressTracker {
    fn set_range(&self, min: u64, max: u64) {
        self.min.store(min, Ordering::Relaxed);
        self.max.store(max.max(min), Ordering::Relaxed);
        self.current.store(min, Ordering::Relaxed);
    }

    fn set_value(&self, value: u64) {
        self.current.store(value, Ordering::Relaxed);
        self.maybe_callback();
    }

    fn set_message(&self, message: &str) {
        let mut guard = self
            .message
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.clear();
        guard.push_str(message);
    }

    #[inline]
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn increment(&self) {
        self.current.fetch_add(1, Ordering::Relaxed);
        self.maybe_callback();
    }
}

/// Arc-wrapped progress tracker for sharing across threads.
pub type SharedProgressTracker = Arc<ProgressTracker>;

/// Create a shared progress tracker.
pub fn shared_tracker(total: u64) -> SharedProgressTracker {
    Arc::new(ProgressTracker::new(total))
}

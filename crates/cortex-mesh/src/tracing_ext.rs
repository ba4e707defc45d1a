//! Tracing extensions for mesh and probing operations.
//!
//! Enable output by installing a subscriber in the application:
//!
//! ```rust,ignore
//! use tracing_subscriber::{EnvFilter, fmt, prelude::*};
//!
//! tracing_subscriber::registry()
//!     .with(fmt::layer())
//!     .with(EnvFilter::from_default_env())
//!     .init();
//!
//! // RUST_LOG=cortex_probe=debug for per-pass detail
//! ```
//!
//! # Log Levels
//!
//! - **WARN**: Recoverable issues (failed side outputs, rejected option lines)
//! - **INFO**: Operation summaries and timing
//! - **DEBUG**: Intermediate state (control points, failure counts)
//! - **TRACE**: Per-vertex and per-voxel detail

use std::time::Instant;
use tracing::{Span, debug, info, trace, warn};

/// A performance timer that logs duration on drop.
///
/// ```rust,ignore
/// use cortex_mesh::tracing_ext::OperationTimer;
///
/// fn expensive_operation() {
///     let _timer = OperationTimer::new("expensive_operation");
///     // ... do work ...
/// } // Timer logs duration when dropped
/// ```
pub struct OperationTimer {
    name: &'static str,
    start: Instant,
    span: Span,
}

impl OperationTimer {
    /// Create a new operation timer.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!("cortex_operation", operation = name);
        debug!(target: "cortex_mesh::timing", operation = name, "Starting operation");
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Create a timer carrying the mesh size as span fields.
    pub fn with_context(name: &'static str, vertex_count: usize, face_count: usize) -> Self {
        let span = tracing::info_span!(
            "cortex_operation",
            operation = name,
            vertices = vertex_count,
            faces = face_count
        );
        debug!(
            target: "cortex_mesh::timing",
            operation = name,
            vertices = vertex_count,
            faces = face_count,
            "Starting operation"
        );
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Get the elapsed time.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Get the span for this timer.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        let elapsed_ms = self.elapsed_ms();
        info!(
            target: "cortex_mesh::timing",
            operation = self.name,
            elapsed_ms = format!("{:.2}", elapsed_ms),
            "Operation completed"
        );
    }
}

/// Log mesh statistics at debug level.
pub fn log_mesh_stats(mesh: &crate::Mesh, context: &str) {
    let Some((min_bounds, max_bounds)) = mesh.bounds() else {
        debug!(target: "cortex_mesh::mesh_state", context, "Mesh is empty");
        return;
    };
    let dims = max_bounds - min_bounds;

    debug!(
        target: "cortex_mesh::mesh_state",
        context = context,
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        dimensions = format!("{:.2} x {:.2} x {:.2}", dims.x, dims.y, dims.z),
        "Mesh state"
    );
}

/// Log progress for a long-running operation.
pub fn log_progress(operation: &str, current: usize, total: usize, stage: Option<&str>) {
    let percent = if total > 0 {
        (current as f64 / total as f64 * 100.0) as u32
    } else {
        0
    };

    trace!(
        target: "cortex_mesh::progress",
        operation = operation,
        current = current,
        total = total,
        percent = percent,
        stage = stage.unwrap_or("processing"),
        "Progress update"
    );
}

/// Log the outcome of writing a side output such as a ray dump.
pub fn log_io_operation(operation: &str, path: &std::path::Path, success: bool) {
    if success {
        info!(
            target: "cortex_mesh::io",
            operation = operation,
            path = %path.display(),
            "I/O operation completed"
        );
    } else {
        warn!(
            target: "cortex_mesh::io",
            operation = operation,
            path = %path.display(),
            "I/O operation failed"
        );
    }
}

//! Fluent builder for Gaussian projection.
//!
//! # Example
//!
//! ```
//! use cortex_mesh::template_sphere;
//! use cortex_probe::{ProjectionBuilder, Volume};
//! use nalgebra::Point3;
//!
//! let mesh = template_sphere(Point3::origin(), 4.0, 42).unwrap();
//! let mut volume = Volume::isotropic([12, 12, 12], Point3::new(-6.0, -6.0, -6.0), 1.0).unwrap();
//! volume.add_channel("t1", vec![2.0; volume.voxel_count()]).unwrap();
//!
//! let projected = ProjectionBuilder::new(&mesh)
//!     .sigmas(1.0, 1.5)
//!     .thickness(2.0)
//!     .from_volume(&volume, "t1")
//!     .unwrap()
//!     .expect("not cancelled");
//! assert!(projected.values.iter().all(|v| (v - 2.0).abs() < 1e-9));
//! ```

use std::time::Duration;

use cortex_mesh::{Mesh, NoProgress, ProgressCallback, ProgressSink, ProgressTracker, SharedProgressTracker};

use crate::error::ProbeResult;
use crate::projection::{
    DenominatorWeight, GaussianKernel, ProjectionConfig, SurfaceProjection, Thickness,
    VolumeProjection, surface_to_volume, volume_to_surface,
};
use crate::volume::Volume;

/// Fluent configuration of a projection pass over one mesh.
pub struct ProjectionBuilder<'a> {
    mesh: &'a Mesh,
    config: ProjectionConfig,
    progress_callback: Option<ProgressCallback>,
    progress_interval: Duration,
    tracker: Option<SharedProgressTracker>,
}

impl<'a> ProjectionBuilder<'a> {
    /// Builder with unit sigmas, a 2-sigma cutoff and zero thickness.
    pub fn new(mesh: &'a Mesh) -> Self {
        Self {
            mesh,
            config: ProjectionConfig::default(),
            progress_callback: None,
            progress_interval: Duration::from_millis(100),
            tracker: None,
        }
    }

    // =========================================================================
    // Kernel
    // =========================================================================

    /// Set normal and tangential standard deviations.
    pub fn sigmas(mut self, normal: f64, tangent: f64) -> Self {
        self.config.kernel.sigma_normal = normal;
        self.config.kernel.sigma_tangent = tangent;
        self
    }

    /// Set cutoff multipliers.
    pub fn cutoff(mut self, normal: f64, tangent: f64) -> Self {
        self.config.kernel.max_sigma_normal = normal;
        self.config.kernel.max_sigma_tangent = tangent;
        self
    }

    /// Replace the whole kernel.
    pub fn kernel(mut self, kernel: GaussianKernel) -> Self {
        self.config.kernel = kernel;
        self
    }

    // =========================================================================
    // Layer
    // =========================================================================

    /// Uniform layer thickness.
    pub fn thickness(mut self, thickness: f64) -> Self {
        self.config.thickness = Thickness::Uniform(thickness);
        self
    }

    /// Per-vertex layer thickness, e.g. cortical thickness.
    pub fn thickness_per_vertex(mut self, thickness: Vec<f64>) -> Self {
        self.config.thickness = Thickness::PerVertex(thickness);
        self
    }

    /// Weights accumulated into the denominator.
    pub fn denominator(mut self, mode: DenominatorWeight) -> Self {
        self.config.denominator = mode;
        self
    }

    // =========================================================================
    // Side outputs
    // =========================================================================

    /// Record a transfer matrix.
    pub fn record_matrix(mut self, enable: bool) -> Self {
        self.config.record_matrix = enable;
        self
    }

    /// Log every contribution of one vertex.
    pub fn debug_vertex(mut self, vertex: usize) -> Self {
        self.config.debug_vertex = Some(vertex);
        self
    }

    // =========================================================================
    // Presets
    // =========================================================================

    /// Tight kernel for high-resolution volumes.
    pub fn narrow(mut self) -> Self {
        self.config.kernel = GaussianKernel::new(0.5, 0.5).with_cutoff(2.0, 2.0);
        self
    }

    /// Wide tangential smoothing for low-resolution functional data.
    pub fn smooth(mut self) -> Self {
        self.config.kernel = GaussianKernel::new(1.0, 3.0).with_cutoff(2.0, 3.0);
        self
    }

    // =========================================================================
    // Progress
    // =========================================================================

    /// Report progress to a callback; returning `false` cancels.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Minimum time between callback invocations.
    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Report to a shared tracker, e.g. one owned by a background task.
    pub fn with_tracker(mut self, tracker: SharedProgressTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// The configuration built so far.
    pub fn config(&self) -> &ProjectionConfig {
        &self.config
    }

    // =========================================================================
    // Build
    // =========================================================================

    fn run<T>(self, f: impl FnOnce(&Mesh, &ProjectionConfig, &dyn ProgressSink) -> T) -> T {
        match (self.tracker, self.progress_callback) {
            (Some(tracker), _) => f(self.mesh, &self.config, tracker.as_ref()),
            (None, Some(callback)) => {
                let tracker = ProgressTracker::new(self.mesh.vertex_count() as u64)
                    .with_callback(callback)
                    .with_interval(self.progress_interval);
                f(self.mesh, &self.config, &tracker)
            }
            (None, None) => f(self.mesh, &self.config, &NoProgress),
        }
    }

    /// Project per-vertex `values` into `channel` of `volume`.
    pub fn to_volume(
        self,
        values: &[f64],
        volume: &mut Volume,
        channel: &str,
    ) -> ProbeResult<Option<VolumeProjection>> {
        self.run(|mesh, config, progress| surface_to_volume(mesh, values, volume, channel, config, progress))
    }

    /// Gather `channel` of `volume` onto the vertices.
    pub fn from_volume(self, volume: &Volume, channel: &str) -> ProbeResult<Option<SurfaceProjection>> {
        self.run(|mesh, config, progress| volume_to_surface(mesh, volume, channel, config, progress))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_mesh::template_sphere;
    use nalgebra::Point3;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sphere() -> Mesh {
        template_sphere(Point3::origin(), 4.0, 42).unwrap()
    }

    #[test]
    fn test_builder_defaults() {
        let mesh = sphere();
        let builder = ProjectionBuilder::new(&mesh);
        assert_eq!(builder.config(), &ProjectionConfig::default());
        assert!(!builder.config().record_matrix);
    }

    #[test]
    fn test_builder_chaining() {
        let mesh = sphere();
        let builder = ProjectionBuilder::new(&mesh)
            .sigmas(2.0, 3.0)
            .cutoff(1.5, 2.5)
            .thickness(4.0)
            .denominator(DenominatorWeight::NormalOnly)
            .record_matrix(true)
            .debug_vertex(7);

        let config = builder.config();
        assert_eq!(config.kernel.sigma_normal, 2.0);
        assert_eq!(config.kernel.max_sigma_tangent, 2.5);
        assert_eq!(config.thickness, Thickness::Uniform(4.0));
        assert_eq!(config.denominator, DenominatorWeight::NormalOnly);
        assert_eq!(config.debug_vertex, Some(7));
        assert!(config.record_matrix);
    }

    #[test]
    fn test_presets() {
        let mesh = sphere();
        assert_eq!(ProjectionBuilder::new(&mesh).narrow().config().kernel.sigma_normal, 0.5);
        assert_eq!(ProjectionBuilder::new(&mesh).smooth().config().kernel.sigma_tangent, 3.0);
    }

    #[test]
    fn test_round_trip_through_volume() {
        let mesh = sphere();
        let mut volume = Volume::isotropic([12, 12, 12], Point3::new(-6.0, -6.0, -6.0), 1.0).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let callback: ProgressCallback = Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            true
        });

        ProjectionBuilder::new(&mesh)
            .thickness(1.0)
            .with_progress(callback)
            .progress_interval(Duration::ZERO)
            .to_volume(&vec![4.0; mesh.vertex_count()], &mut volume, "paint")
            .unwrap()
            .unwrap();
        assert!(calls.load(Ordering::SeqCst) > 0);

        let back = ProjectionBuilder::new(&mesh)
            .thickness(1.0)
            .from_volume(&volume, "paint")
            .unwrap()
            .unwrap();
        // Every voxel in a vertex footprint was painted by that vertex.
        assert!(back.values.iter().all(|&v| (v - 4.0).abs() < 1e-9));
    }

    #[test]
    fn test_callback_cancels() {
        let mesh = sphere();
        let mut volume = Volume::isotropic([4, 4, 4], Point3::origin(), 1.0).unwrap();
        volume.add_channel("t1", vec![1.0; 64]).unwrap();

        let out = ProjectionBuilder::new(&mesh)
            .with_progress(Box::new(|_| false))
            .progress_interval(Duration::ZERO)
            .from_volume(&volume, "t1")
            .unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn test_cancelled_tracker() {
        let mesh = sphere();
        let mut volume = Volume::isotropic([4, 4, 4], Point3::origin(), 1.0).unwrap();
        let tracker = cortex_mesh::shared_tracker(0);
        tracker.cancel();
        let out = ProjectionBuilder::new(&mesh)
            .with_tracker(tracker)
            .to_volume(&vec![1.0; mesh.vertex_count()], &mut volume, "paint")
            .unwrap();
        assert!(out.is_none());
    }
}

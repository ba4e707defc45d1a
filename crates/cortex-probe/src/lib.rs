//! Volumetric ray sampling and mesh-volume projection.
//!
//! Two independent engines built on [`cortex_mesh`]:
//!
//! - **Boundary reconstruction**: cast rays from a head centre through a
//!   brain hull, sample the image along each ray, find skull and scalp
//!   boundaries in the profiles and emit inner-skull, outer-skull and scalp
//!   meshes ([`reconstruct_boundaries`]).
//! - **Gaussian projection**: transfer scalars between mesh vertices and
//!   volume voxels with an anisotropic normal/tangent kernel, in either
//!   direction ([`surface_to_volume`], [`volume_to_surface`],
//!   [`ProjectionBuilder`]).
//!
//! Long operations take a [`ProgressSink`](cortex_mesh::ProgressSink) and
//! return `Ok(None)` when cancelled. [`BackgroundTask`] runs any of them on a
//! worker thread.
//!
//! # Quick Start
//!
//! ```
//! use cortex_mesh::{NoProgress, template_sphere};
//! use cortex_probe::{ModelOptions, ShapeSet, Volume, reconstruct_boundaries};
//! use nalgebra::Point3;
//!
//! // A synthetic head: brain, dark skull, bright scalp, air.
//! let mut volume = Volume::isotropic([48, 48, 48], Point3::new(-24.0, -24.0, -24.0), 1.0).unwrap();
//! volume
//!     .add_channel_fn("t1", |p| match p.coords.norm() {
//!         r if r < 12.0 => 0.6,
//!         r if r < 15.0 => 0.05,
//!         r if r < 19.0 => 1.0,
//!         _ => 0.0,
//!     })
//!     .unwrap();
//!
//! let hull = template_sphere(Point3::origin(), 10.0, 642).unwrap();
//! let options = ModelOptions::default()
//!     .with_template(100.0, 162)
//!     .with_skull_width(1.0, 8.0);
//!
//! let mut shapes = ShapeSet::new();
//! let report = reconstruct_boundaries(&mut volume, &hull, &options, &mut shapes, &NoProgress)
//!     .unwrap()
//!     .expect("not cancelled");
//!
//! assert_eq!(report.failed_rays, 0);
//! assert!(shapes.get("scalp").is_some());
//! ```

mod error;

pub mod builder;
pub mod curve;
pub mod dump;
pub mod features;
pub mod matrix;
pub mod options;
pub mod outliers;
pub mod projection;
pub mod reconstruct;
pub mod sampler;
pub mod shapes;
pub mod task;
pub mod volume;

pub use error::{ProbeError, ProbeErrorCode, ProbeRecoverySuggestion, ProbeResult};

// Data model
pub use curve::SampleRay;
pub use shapes::{NamedMesh, ShapeSet};
pub use volume::{ChannelView, ScopedMask, Volume, VoxelBox};

// Configuration
pub use options::{AssignmentReport, ModelOptions, OutputSurfaces, Plane, SamplingMode};

// Ray sampling and feature extraction
pub use features::{
    AverageControlPoints, Crossing, CrossingKind, PlateauParams, SubjectControlPoints,
    average_control_points, max_edge, min_edge, search_left, search_right, subject_control_points,
};
pub use sampler::{RayFailure, SampledRays, condition_profile, sample_rays};

// Outlier correction
pub use outliers::{OutlierCorrection, OutlierParams, correct_outliers};

// Boundary reconstruction
pub use reconstruct::{
    ReconstructionReport, SAMPLING_MASK, Surface, SurfaceReport, reconstruct_boundaries,
};

// Gaussian projection
pub use builder::ProjectionBuilder;
pub use matrix::TransferMatrix;
pub use projection::{
    DenominatorWeight, GaussianKernel, ProjectionConfig, SurfaceProjection, Thickness,
    VolumeProjection, surface_to_volume, volume_to_surface,
};

// Diagnostics and threading
pub use dump::{DumpFormat, write_ray_dump};
pub use task::BackgroundTask;

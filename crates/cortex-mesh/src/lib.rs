//! Triangle mesh model and geometry services for volumetric probing.
//!
//! This crate holds everything the probing engine needs from a surface:
//!
//! - **Data model**: [`Mesh`], [`Vertex`], [`Triangle`]
//! - **Topology**: [`MeshAdjacency`] (vertex neighbours, incident faces)
//! - **Normals**: area-weighted per-vertex normals
//! - **Templates**: geodesic [`template_sphere`] meshes
//! - **Ray casting**: BVH-accelerated nearest hits via [`RayCaster`]
//! - **Progress**: [`ProgressSink`] for progress and cooperative cancellation
//!
//! # Units and Coordinate System
//!
//! Coordinates are physical units of the imaged volume (typically mm) in a
//! right-handed system. Face winding is **counter-clockwise when viewed from
//! outside**, so face normals point outward by the right-hand rule.
//!
//! # Quick Start
//!
//! ```
//! use cortex_mesh::{MeshAdjacency, RayCaster, template_sphere};
//! use nalgebra::{Point3, Vector3};
//!
//! let sphere = template_sphere(Point3::origin(), 80.0, 642).unwrap();
//! assert_eq!(sphere.vertex_count(), 642);
//!
//! let adjacency = MeshAdjacency::build(&sphere);
//! assert!(adjacency.neighbors(0).len() >= 5);
//!
//! let caster = RayCaster::new(&sphere).unwrap();
//! let hit = caster.cast(&Point3::origin(), &Vector3::z()).unwrap();
//! assert!(hit.distance > 79.0 && hit.distance <= 80.0);
//! ```

mod error;
mod types;

pub mod adjacency;
pub mod progress;
pub mod raycast;
pub mod sphere;
pub mod tracing_ext;

pub use error::{ErrorCode, MeshError, MeshResult};
pub use types::{Mesh, Triangle, Vertex};

pub use adjacency::MeshAdjacency;
pub use raycast::{RayCaster, RayHit};
pub use sphere::{icosphere, template_sphere};

pub use progress::{
    NoProgress, Progress, ProgressCallback, ProgressSink, ProgressTracker, SharedProgressTracker,
    shared_tracker,
};

pub use tracing_ext::{OperationTimer, log_io_operation, log_mesh_stats, log_progress};

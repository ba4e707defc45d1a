//! Skull and scalp boundary reconstruction.
//!
//! The pipeline, per call:
//!
//! 1. Build a template sphere and sample one ray per vertex ([`sample_rays`]).
//! 2. Average all successful profiles and locate reference control points.
//! 3. Locate inner skull, outer skull and scalp on every subject ray.
//! 4. Smooth plateau vertices, bound skull width, relax failed vertices and
//!    clamp outliers.
//! 5. Displace the template along each ray and append the meshes to a
//!    [`ShapeSet`].

use cortex_mesh::{Mesh, MeshAdjacency, OperationTimer, ProgressSink, template_sphere};
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::curve::SampleRay;
use crate::dump::{DumpFormat, write_ray_dump};
use crate::error::{ProbeError, ProbeResult};
use crate::features::{
    AverageControlPoints, PlateauParams, SubjectControlPoints, average_control_points,
    subject_control_points,
};
use crate::options::{ModelOptions, SamplingMode};
use crate::outliers::{OutlierParams, correct_outliers};
use crate::sampler::{SampledRays, resolve_channel, sample_rays};
use crate::shapes::ShapeSet;
use crate::volume::Volume;

/// Name of the mask added around Gaussian sampling.
pub const SAMPLING_MASK: &str = "cortex-probe/sampling";

/// One reconstructed boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    InnerSkull,
    OuterSkull,
    Scalp,
}

impl Surface {
    pub const ALL: [Surface; 3] = [Surface::InnerSkull, Surface::OuterSkull, Surface::Scalp];

    /// Name used in the output shape set.
    pub fn name(&self) -> &'static str {
        match self {
            Surface::InnerSkull => "inner_skull",
            Surface::OuterSkull => "outer_skull",
            Surface::Scalp => "scalp",
        }
    }
}

impl std::fmt::Display for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome for one emitted surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceReport {
    pub surface: Surface,
    /// False when some vertex could not be recovered by relaxation.
    pub success: bool,
    /// Failed vertices filled in from their neighbours.
    pub relaxed: usize,
    /// Failed vertices left without a neighbour-derived position.
    pub unresolved: usize,
    /// Vertices moved by outlier correction.
    pub outliers: usize,
}

/// Summary of a reconstruction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionReport {
    pub vertices: usize,
    /// Rays that missed the hull or had an empty profile.
    pub failed_rays: usize,
    pub average: AverageControlPoints,
    /// Vertices whose outer boundary came from a plateau.
    pub plateau_vertices: usize,
    /// Vertices whose skull width was clamped.
    pub width_clamped: usize,
    pub surfaces: Vec<SurfaceReport>,
    /// Whether the ray dump was written; None when none was requested.
    pub ray_dump_written: Option<bool>,
}

impl ReconstructionReport {
    /// Every emitted surface was fully reconstructed.
    pub fn success(&self) -> bool {
        self.surfaces.iter().all(|s| s.success)
    }
}

/// Sample-wise mean of all successful rays.
pub fn average_profile(rays: &SampledRays) -> Option<Vec<f64>> {
    let mut sum: Option<Vec<f64>> = None;
    let mut count = 0usize;
    for (_, ray) in rays.successful() {
        let acc = sum.get_or_insert_with(|| vec![0.0; ray.len()]);
        if acc.len() != ray.len() {
            continue;
        }
        for (a, s) in acc.iter_mut().zip(&ray.samples) {
            *a += s;
        }
        count += 1;
    }
    let mut avg = sum?;
    if count == 0 {
        return None;
    }
    for a in &mut avg {
        *a /= count as f64;
    }
    Some(avg)
}

/// Blend plateau indices with the mean of their non-plateau neighbours.
///
/// Returns the number of vertices changed.
fn smooth_plateaus(
    index: &mut [Option<f64>],
    plateau: &[bool],
    adjacency: &MeshAdjacency,
    weight: f64,
) -> usize {
    let snapshot = index.to_vec();
    let mut changed = 0;
    for v in 0..index.len() {
        let Some(own) = snapshot[v] else { continue };
        if !plateau[v] {
            continue;
        }
        let others: Vec<f64> = adjacency
            .neighbors(v)
            .iter()
            .filter(|&&j| !plateau[j as usize])
            .filter_map(|&j| snapshot[j as usize])
            .collect();
        if others.is_empty() {
            continue;
        }
        let mean = others.iter().sum::<f64>() / others.len() as f64;
        index[v] = Some((1.0 - weight) * own + weight * mean);
        changed += 1;
    }
    changed
}

/// Fill failed distances from neighbour positions projected onto each ray.
///
/// Jacobi sweeps: each sweep only reads distances known before it. Returns
/// `(relaxed, unresolved)`.
fn relax_failed(
    distance: &mut [Option<f64>],
    directions: &[Vector3<f64>],
    center: &Point3<f64>,
    adjacency: &MeshAdjacency,
    max_iterations: usize,
) -> (usize, usize) {
    let mut relaxed = 0;
    for iteration in 0..max_iterations {
        let snapshot = distance.to_vec();
        let mut progress = 0;
        for v in 0..distance.len() {
            if snapshot[v].is_some() {
                continue;
            }
            let known: Vec<Point3<f64>> = adjacency
                .neighbors(v)
                .iter()
                .filter_map(|&j| snapshot[j as usize].map(|d| center + directions[j as usize] * d))
                .collect();
            if known.is_empty() {
                continue;
            }
            let mean = known.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / known.len() as f64;
            let projected = (Point3::from(mean) - center).dot(&directions[v]).max(0.0);
            distance[v] = Some(projected);
            progress += 1;
        }
        relaxed += progress;
        debug!(iteration, relaxed = progress, "Relaxation sweep");
        if progress == 0 {
            break;
        }
    }
    let unresolved = distance.iter().filter(|d| d.is_none()).count();
    (relaxed, unresolved)
}

/// Per-vertex boundary distances from `center`.
struct Boundaries {
    inner: Vec<Option<f64>>,
    outer: Vec<Option<f64>>,
    scalp: Vec<Option<f64>>,
}

impl Boundaries {
    fn get_mut(&mut self, surface: Surface) -> &mut Vec<Option<f64>> {
        match surface {
            Surface::InnerSkull => &mut self.inner,
            Surface::OuterSkull => &mut self.outer,
            Surface::Scalp => &mut self.scalp,
        }
    }

    /// Enforce `inner <= outer <= scalp` wherever all three are known.
    fn enforce_order(&mut self) {
        for v in 0..self.outer.len() {
            if let (Some(i), Some(o), Some(s)) = (self.inner[v], self.outer[v], self.scalp[v]) {
                self.inner[v] = Some(i.min(o));
                self.scalp[v] = Some(s.max(o));
            }
        }
    }
}

/// Subject control points of one ray. Rays ending above the ear–nasion
/// plane take the last outer-skull crossing, the rest the first.
fn locate_on_ray(
    ray: &SampleRay,
    average: &AverageControlPoints,
    plateau: &PlateauParams,
    options: &ModelOptions,
) -> SubjectControlPoints {
    let find_last = options.ear_nasion.is_above(&ray.end_point());
    subject_control_points(&ray.samples, average, plateau, options.min_intensity, find_last)
}

fn distance_along(ray: &SampleRay, center: &Point3<f64>, index: f64) -> f64 {
    (ray.origin - center).norm() + index * ray.scale
}

/// Reconstruct skull and scalp meshes and append them to `shapes`.
///
/// `hull` is the brain surface that rays start from. With Gaussian sampling a
/// mask of finite voxels named [`SAMPLING_MASK`] is added to `volume` for
/// the sampling pass and removed afterwards. A failed ray dump is logged and
/// flagged in the report but does not fail the run.
///
/// Returns `Ok(None)` when cancelled; `shapes` is untouched in that case.
///
/// # Errors
///
/// Invalid options, a volume without usable data, or
/// [`ProbeError::DegenerateProfile`] when no ray produced a usable profile.
pub fn reconstruct_boundaries(
    volume: &mut Volume,
    hull: &Mesh,
    options: &ModelOptions,
    shapes: &mut ShapeSet,
    progress: &dyn ProgressSink,
) -> ProbeResult<Option<ReconstructionReport>> {
    options.validate()?;
    let template = template_sphere(options.center, options.template_radius, options.node_count)?;
    let n = template.vertex_count();
    let _timer = OperationTimer::with_context("reconstruct_boundaries", n, template.face_count());
    info!(vertices = n, surfaces = options.surfaces.count(), "Reconstructing boundaries");

    let keep_raw = options.ray_dump.is_some() && options.dump_raw;
    let sampled = if options.sampling == SamplingMode::Gaussian {
        let channel = resolve_channel(volume, options)?;
        let mask = volume.finite_mask(&channel)?;
        let guard = volume.scoped_mask(SAMPLING_MASK, mask)?;
        sample_rays(&guard, hull, &template, options, Some(SAMPLING_MASK), keep_raw, progress)?
    } else {
        sample_rays(volume, hull, &template, options, None, keep_raw, progress)?
    };
    let Some(rays) = sampled else {
        return Ok(None);
    };

    if progress.is_cancelled() {
        return Ok(None);
    }

    progress.set_message("Extracting boundaries");

    let avg_curve = average_profile(&rays)
        .ok_or_else(|| ProbeError::degenerate_profile(format!("all {} rays failed", n)))?;
    let average = average_control_points(&avg_curve)?;
    debug!(?average, "Average control points");

    let plateau_params = PlateauParams::from_options(options);
    let points: Vec<Option<SubjectControlPoints>> = rays
        .rays
        .iter()
        .map(|ray| {
            ray.as_ref()
                .ok()
                .map(|ray| locate_on_ray(ray, &average, &plateau_params, options))
        })
        .collect();

    let adjacency = MeshAdjacency::build(&template);
    let plateau: Vec<bool> = points.iter().map(|p| p.is_some_and(|p| p.outer_plateau)).collect();
    let plateau_vertices = plateau.iter().filter(|&&p| p).count();

    let mut outer_index: Vec<Option<f64>> = points.iter().map(|p| p.map(|p| p.outer as f64)).collect();
    let smoothed = smooth_plateaus(&mut outer_index, &plateau, &adjacency, options.neighbor_weight);
    debug!(plateau_vertices, smoothed, "Smoothed plateau vertices");

    let center = options.center;
    let to_distance = |v: usize, index: Option<f64>| -> Option<f64> {
        let ray = rays.rays[v].as_ref().ok()?;
        Some(distance_along(ray, &center, index?))
    };
    let mut bounds = Boundaries {
        inner: (0..n).map(|v| to_distance(v, points[v].map(|p| p.inner as f64))).collect(),
        outer: (0..n).map(|v| to_distance(v, outer_index[v])).collect(),
        scalp: (0..n).map(|v| to_distance(v, points[v].map(|p| p.scalp as f64))).collect(),
    };

    let mut width_clamped = 0;
    for v in 0..n {
        if let (Some(inner), Some(outer)) = (bounds.inner[v], bounds.outer[v]) {
            let width = outer - inner;
            let clamped = width.clamp(options.min_skull_width, options.max_skull_width);
            if clamped != width {
                bounds.inner[v] = Some(outer - clamped);
                width_clamped += 1;
            }
        }
    }
    bounds.enforce_order();

    let directions: Vec<Vector3<f64>> = (0..n)
        .map(|v| match &rays.rays[v] {
            Ok(ray) => ray.direction,
            Err(_) => (template.position(v) - center)
                .try_normalize(1e-12)
                .unwrap_or_else(Vector3::z),
        })
        .collect();

    let outlier_params = OutlierParams {
        threshold_stdev: options.outlier_threshold_stdev,
        correction_stdev: options.outlier_correction_stdev,
    };

    let mut reports = Vec::new();
    for surface in Surface::ALL {
        let distances = bounds.get_mut(surface);
        let (relaxed, unresolved) =
            relax_failed(distances, &directions, &center, &adjacency, options.max_relax_iterations);
        if unresolved > 0 {
            warn!(%surface, unresolved, "Some vertices have no recovered neighbours");
        }

        // Unresolved vertices keep the mean distance so the mesh stays usable.
        let known: Vec<f64> = distances.iter().flatten().copied().collect();
        let fallback = if known.is_empty() {
            options.template_radius
        } else {
            known.iter().sum::<f64>() / known.len() as f64
        };
        let filled: Vec<f64> = distances.iter().map(|d| d.unwrap_or(fallback)).collect();

        let corrected = correct_outliers(&filled, &adjacency, &outlier_params)?;
        *distances = corrected.values.into_iter().map(Some).collect();

        reports.push(SurfaceReport {
            surface,
            success: unresolved == 0,
            relaxed,
            unresolved,
            outliers: corrected.modified.len(),
        });
    }
    bounds.enforce_order();

    if progress.is_cancelled() {
        return Ok(None);
    }

    let ray_dump_written = options.ray_dump.as_ref().map(|path| {
        let format = DumpFormat {
            with_scale: options.dump_with_scale,
            raw: options.dump_raw,
        };
        match write_ray_dump(path, &rays, format) {
            Ok(_) => true,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not write ray dump");
                false
            }
        }
    });

    let selected = [
        options.surfaces.inner_skull,
        options.surfaces.outer_skull,
        options.surfaces.scalp,
    ];
    let mut surfaces = Vec::new();
    for ((surface, report), keep) in Surface::ALL.into_iter().zip(reports).zip(selected) {
        if !keep {
            continue;
        }
        let positions: Vec<Point3<f64>> = bounds
            .get_mut(surface)
            .iter()
            .zip(&directions)
            .map(|(d, dir)| center + dir * d.unwrap_or(0.0))
            .collect();
        let mut mesh = template.with_positions(&positions)?;
        mesh.compute_vertex_normals();
        cortex_mesh::log_mesh_stats(&mesh, surface.name());
        shapes.push(surface.name(), mesh);
        surfaces.push(report);
    }

    let report = ReconstructionReport {
        vertices: n,
        failed_rays: rays.failure_count(),
        average,
        plateau_vertices,
        width_clamped,
        surfaces,
        ray_dump_written,
    };

    info!(
        failed_rays = report.failed_rays,
        plateau_vertices,
        width_clamped,
        success = report.success(),
        "Boundary reconstruction complete"
    );

    Ok(Some(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_mesh::NoProgress;

    fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    fn ray(samples: Vec<f64>) -> SampleRay {
        SampleRay::new(Point3::origin(), Vector3::x(), samples, 1.0)
    }

    #[test]
    fn test_average_profile() {
        let rays = SampledRays {
            rays: vec![
                Ok(ray(vec![0.0, 1.0])),
                Err(crate::sampler::RayFailure::EmptyProfile),
                Ok(ray(vec![1.0, 3.0])),
            ],
            raw: None,
        };
        assert_eq!(average_profile(&rays).unwrap(), vec![0.5, 2.0]);

        let none = SampledRays {
            rays: vec![Err(crate::sampler::RayFailure::NoIntersection)],
            raw: None,
        };
        assert!(average_profile(&none).is_none());
    }

    #[test]
    fn test_smooth_plateaus() {
        let mesh = template_sphere(Point3::origin(), 1.0, 12).unwrap();
        let adjacency = MeshAdjacency::build(&mesh);
        let mut index: Vec<Option<f64>> = vec![Some(10.0); 12];
        index[0] = Some(20.0);
        let mut plateau = vec![false; 12];
        plateau[0] = true;

        let changed = smooth_plateaus(&mut index, &plateau, &adjacency, 0.5);
        assert_eq!(changed, 1);
        assert_eq!(index[0], Some(15.0));
        assert_eq!(index[1], Some(10.0));
    }

    #[test]
    fn test_relax_failed_vertices() {
        let mesh = template_sphere(Point3::origin(), 1.0, 42).unwrap();
        let adjacency = MeshAdjacency::build(&mesh);
        let directions: Vec<Vector3<f64>> =
            mesh.positions().iter().map(|p| p.coords.normalize()).collect();
        let mut distance: Vec<Option<f64>> = vec![Some(50.0); 42];
        distance[0] = None;
        distance[5] = None;

        let (relaxed, unresolved) =
            relax_failed(&mut distance, &directions, &Point3::origin(), &adjacency, 10);
        assert_eq!(relaxed, 2);
        assert_eq!(unresolved, 0);
        // The mean of neighbours on a sphere lies slightly inside it.
        let d = distance[0].unwrap();
        assert!(d > 40.0 && d <= 50.0);
    }

    #[test]
    fn test_relax_reports_isolated() {
        let mut mesh = template_sphere(Point3::origin(), 1.0, 12).unwrap();
        mesh.vertices.push(cortex_mesh::Vertex::from_coords(0.0, 0.0, 2.0));
        let adjacency = MeshAdjacency::build(&mesh);
        let directions = vec![Vector3::z(); 13];
        let mut distance = vec![Some(1.0); 13];
        distance[12] = None;

        let (relaxed, unresolved) =
            relax_failed(&mut distance, &directions, &Point3::origin(), &adjacency, 3);
        assert_eq!(relaxed, 0);
        assert_eq!(unresolved, 1);
    }

    #[test]
    fn test_missing_hull_hits_is_degenerate() {
        let mut volume = Volume::isotropic([10, 10, 10], Point3::new(-5.0, -5.0, -5.0), 1.0).unwrap();
        volume.add_channel("t1", vec![1.0; 1000]).unwrap();
        let mut hull = template_sphere(Point3::origin(), 1.0, 12).unwrap();
        hull.translate(Vector3::new(100.0, 100.0, 100.0));

        let options = ModelOptions::default().with_template(50.0, 12);
        let mut shapes = ShapeSet::new();
        let err = reconstruct_boundaries(&mut volume, &hull, &options, &mut shapes, &NoProgress)
            .unwrap_err();
        assert!(matches!(err, ProbeError::DegenerateProfile { .. }));
        assert!(shapes.is_empty());
    }

    #[test]
    fn test_ear_nasion_plane_selects_crossing() {
        // Trough at 4, scalp peak at 8, a notch at 6 re-crosses the
        // outer-skull threshold (0.525) between them.
        let samples = vec![
            0.5, 0.5, 0.4, 0.2, 0.05, 0.6, 0.3, 0.7, 1.0, 0.8, 0.5, 0.3, 0.1, 0.0, 0.0, 0.0,
        ];
        let average = AverageControlPoints {
            a1: 8,
            a2: 4,
            a3: 5,
            a4: 9,
            a5: 2,
        };
        let flat = PlateauParams::disabled();
        let options = ModelOptions::default();

        let up = SampleRay::new(Point3::new(0.0, 0.0, 1.0), Vector3::z(), samples.clone(), 1.0);
        let down = SampleRay::new(Point3::new(0.0, 0.0, -1.0), -Vector3::z(), samples, 1.0);

        let above = locate_on_ray(&up, &average, &flat, &options);
        let below = locate_on_ray(&down, &average, &flat, &options);
        assert_eq!((above.n2, above.n1), (4, 8));
        assert_eq!(above.outer, 7);
        assert_eq!(below.outer, 5);
        assert!(!above.outer_plateau && !below.outer_plateau);

        // Flipping the plane flips the choice.
        let flipped = options.with_ear_nasion(crate::options::Plane {
            point: Point3::origin(),
            normal: -Vector3::z(),
        });
        assert_eq!(locate_on_ray(&up, &average, &flat, &flipped).outer, 5);
        assert_eq!(locate_on_ray(&down, &average, &flat, &flipped).outer, 7);
    }

    #[test]
    fn test_distance_along() {
        let r = SampleRay::new(Point3::new(3.0, 4.0, 0.0), Vector3::x(), vec![0.0; 4], 0.5);
        assert!(approx_eq(distance_along(&r, &Point3::origin(), 2.0), 6.0, 1e-12));
    }
}

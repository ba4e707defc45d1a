//! End-to-end tests for cortex-probe.
//!
//! A synthetic head (brain, dark skull, bright scalp, air) is sampled and
//! reconstructed, and the projection engine is driven through its public
//! entry points.

use cortex_mesh::{Mesh, NoProgress, ProgressSink, ProgressTracker, Vertex, template_sphere};
use cortex_probe::{
    BackgroundTask, DenominatorWeight, GaussianKernel, ModelOptions, OutputSurfaces,
    ProjectionBuilder, ProjectionConfig, SAMPLING_MASK, SamplingMode, ShapeSet, Thickness, Volume,
    reconstruct_boundaries, surface_to_volume, volume_to_surface,
};
use nalgebra::{Point3, Vector3};
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;

// =============================================================================
// Fixtures
// =============================================================================

const BRAIN: f64 = 20.0;
const SKULL: f64 = 25.0;
const SCALP: f64 = 30.0;

/// 64^3 head phantom centred on the origin.
fn head_phantom() -> Volume {
    let mut volume = Volume::isotropic([64, 64, 64], Point3::new(-32.0, -32.0, -32.0), 1.0).unwrap();
    volume
        .add_channel_fn("t1", |p| {
            let r = p.coords.norm();
            if r < BRAIN {
                0.5
            } else if r < SKULL {
                0.05
            } else if r < SCALP {
                1.0
            } else {
                0.0
            }
        })
        .unwrap();
    volume
}

fn brain_hull() -> Mesh {
    template_sphere(Point3::origin(), BRAIN - 2.0, 642).unwrap()
}

fn head_options() -> ModelOptions {
    ModelOptions {
        max_intensity_dist: 3.0,
        ..ModelOptions::default().with_template(100.0, 642)
    }
}

fn mean_radius(mesh: &Mesh) -> f64 {
    let total: f64 = mesh.vertices.iter().map(|v| v.position.coords.norm()).sum();
    total / mesh.vertex_count() as f64
}

/// Four vertices on the unit circle in z = 0 with outward normals.
fn circle_mesh() -> Mesh {
    let mut mesh = Mesh::new();
    for (x, y) in [(1.0, 0.0), (0.0, 1.0), (-1.0, 0.0), (0.0, -1.0)] {
        mesh.vertices
            .push(Vertex::with_normal(Point3::new(x, y, 0.0), Vector3::new(x, y, 0.0)));
    }
    mesh
}

/// Reports cancellation from the `after + 1`-th poll onwards.
struct CancelAfterPolls {
    polls: AtomicU64,
    after: u64,
}

impl CancelAfterPolls {
    fn new(after: u64) -> Self {
        Self {
            polls: AtomicU64::new(0),
            after,
        }
    }
}

impl ProgressSink for CancelAfterPolls {
    fn set_range(&self, _min: u64, _max: u64) {}
    fn set_value(&self, _value: u64) {}
    fn set_message(&self, _message: &str) {}
    fn increment(&self) {}

    fn is_cancelled(&self) -> bool {
        self.polls.fetch_add(1, Ordering::SeqCst) >= self.after
    }
}

// =============================================================================
// Boundary reconstruction
// =============================================================================

#[test]
fn test_phantom_reconstruction_finds_shells() {
    let mut volume = head_phantom();
    let mut shapes = ShapeSet::new();

    let report = reconstruct_boundaries(&mut volume, &brain_hull(), &head_options(), &mut shapes, &NoProgress)
        .unwrap()
        .expect("not cancelled");

    assert_eq!(report.vertices, 642);
    assert_eq!(report.failed_rays, 0);
    assert!(report.success());
    assert_eq!(report.surfaces.len(), 3);
    assert_eq!(report.ray_dump_written, None);
    assert_eq!(shapes.len(), 3);

    let inner = shapes.get("inner_skull").unwrap();
    let outer = shapes.get("outer_skull").unwrap();
    let scalp = shapes.get("scalp").unwrap();

    let (ri, ro, rs) = (mean_radius(inner), mean_radius(outer), mean_radius(scalp));
    assert!(ri > 19.0 && ri < 23.0, "inner skull radius {}", ri);
    assert!(ro > 22.0 && ro < 27.0, "outer skull radius {}", ro);
    assert!(rs > 28.0 && rs < 32.0, "scalp radius {}", rs);

    for v in 0..inner.vertex_count() {
        let (a, b, c) = (
            inner.position(v).coords.norm(),
            outer.position(v).coords.norm(),
            scalp.position(v).coords.norm(),
        );
        assert!(a <= b + 1e-9 && b <= c + 1e-9, "vertex {}: {} {} {}", v, a, b, c);
    }

    // Meshes share the template connectivity and carry normals.
    assert_eq!(inner.faces, scalp.faces);
    assert!(scalp.vertices.iter().all(|v| v.normal.is_some()));
}

#[test]
fn test_rays_through_hull_vertices_and_edges_all_hit() {
    // Every hull vertex lies on a template ray, and at 2562 nodes so does
    // every hull edge midpoint.
    for (hull_nodes, template_nodes) in [(162, 162), (642, 642), (642, 2562)] {
        let mut volume = head_phantom();
        let mut shapes = ShapeSet::new();
        let hull = template_sphere(Point3::origin(), BRAIN - 2.0, hull_nodes).unwrap();
        let options = head_options().with_template(100.0, template_nodes);

        let report = reconstruct_boundaries(&mut volume, &hull, &options, &mut shapes, &NoProgress)
            .unwrap()
            .unwrap();
        assert_eq!(report.vertices, template_nodes);
        assert_eq!(
            report.failed_rays, 0,
            "hull {} / template {}",
            hull_nodes, template_nodes
        );
        assert!(report.surfaces.iter().all(|s| s.relaxed == 0));
    }
}

#[test]
fn test_surface_selection() {
    let mut volume = head_phantom();
    let mut shapes = ShapeSet::new();
    let options = head_options().with_surfaces(OutputSurfaces {
        inner_skull: false,
        outer_skull: false,
        scalp: true,
    });

    let report = reconstruct_boundaries(&mut volume, &brain_hull(), &options, &mut shapes, &NoProgress)
        .unwrap()
        .unwrap();

    assert_eq!(report.surfaces.len(), 1);
    assert_eq!(shapes.names().collect::<Vec<_>>(), vec!["scalp"]);
}

#[test]
fn test_cancelled_reconstruction_leaves_shapes_untouched() {
    let mut volume = head_phantom();
    let mut shapes = ShapeSet::new();
    let tracker = ProgressTracker::new(0);
    tracker.cancel();

    let out = reconstruct_boundaries(&mut volume, &brain_hull(), &head_options(), &mut shapes, &tracker).unwrap();
    assert!(out.is_none());
    assert!(shapes.is_empty());
}

#[test]
fn test_cancel_after_sampling_writes_no_ray_dump() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rays.tsv");
    let mut volume = head_phantom();
    let mut shapes = ShapeSet::new();
    let options = head_options().with_template(100.0, 162).with_ray_dump(&path, true);

    // One poll per ray and one after the pass let sampling finish; the run
    // is cancelled at the next poll.
    let progress = CancelAfterPolls::new(162 + 1);
    let out = reconstruct_boundaries(&mut volume, &brain_hull(), &options, &mut shapes, &progress).unwrap();

    assert!(out.is_none());
    assert!(progress.polls.load(Ordering::SeqCst) > 162 + 1);
    assert!(!path.exists());
    assert!(shapes.is_empty());
}

#[test]
fn test_gaussian_sampling_removes_its_mask() {
    let mut volume = head_phantom();
    let mut shapes = ShapeSet::new();
    let options = head_options()
        .with_template(100.0, 162)
        .with_sampling(SamplingMode::Gaussian)
        .with_kernel(GaussianKernel::new(0.75, 0.75));

    let report = reconstruct_boundaries(&mut volume, &brain_hull(), &options, &mut shapes, &NoProgress)
        .unwrap()
        .unwrap();

    assert_eq!(report.failed_rays, 0);
    assert!(!volume.has_mask(SAMPLING_MASK));
    assert_eq!(shapes.len(), 3);
}

#[test]
fn test_ray_dump_one_line_per_vertex() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rays.tsv");
    let mut volume = head_phantom();
    let mut shapes = ShapeSet::new();
    let options = head_options().with_template(100.0, 162).with_ray_dump(&path, true);

    let report = reconstruct_boundaries(&mut volume, &brain_hull(), &options, &mut shapes, &NoProgress)
        .unwrap()
        .unwrap();
    assert_eq!(report.ray_dump_written, Some(true));

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 162);
    for line in lines {
        let fields: Vec<f64> = line.split('\t').map(|f| f.parse().unwrap()).collect();
        // Scale, then the resampled profile.
        assert_eq!(fields.len(), 1 + options.resample_count);
        assert!(fields[0] > 0.0);
    }
}

#[test]
fn test_unwritable_ray_dump_does_not_fail_run() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing").join("rays.tsv");
    let mut volume = head_phantom();
    let mut shapes = ShapeSet::new();
    let options = head_options().with_template(100.0, 162).with_ray_dump(&path, false);

    let report = reconstruct_boundaries(&mut volume, &brain_hull(), &options, &mut shapes, &NoProgress)
        .unwrap()
        .unwrap();
    assert_eq!(report.ray_dump_written, Some(false));
    assert_eq!(shapes.len(), 3);
}

#[test]
fn test_missing_channel_is_an_error() {
    let mut volume = head_phantom();
    let mut shapes = ShapeSet::new();
    let options = head_options().with_channel("flair");

    let err = reconstruct_boundaries(&mut volume, &brain_hull(), &options, &mut shapes, &NoProgress).unwrap_err();
    assert!(err.to_string().contains("flair"));
}

#[test]
fn test_reconstruction_in_background() {
    let task = BackgroundTask::spawn(0, |progress: &dyn ProgressSink| {
        let mut volume = head_phantom();
        let mut shapes = ShapeSet::new();
        let options = head_options().with_template(100.0, 162);
        reconstruct_boundaries(&mut volume, &brain_hull(), &options, &mut shapes, progress)
            .map(|report| report.map(|_| shapes.len()))
    });
    assert_eq!(task.join().unwrap(), Some(3));
}

// =============================================================================
// Projection
// =============================================================================

#[test]
fn test_constant_volume_projects_to_constant() {
    let mut volume = Volume::isotropic([8, 8, 8], Point3::new(-4.0, -4.0, -4.0), 1.0).unwrap();
    volume.add_channel("data", vec![5.0; volume.voxel_count()]).unwrap();

    let out = volume_to_surface(&circle_mesh(), &volume, "data", &ProjectionConfig::default(), &NoProgress)
        .unwrap()
        .unwrap();
    assert_eq!(out.values.len(), 4);
    assert!(out.values.iter().all(|v| (v - 5.0).abs() < 1e-9));
}

#[test]
fn test_single_voxel_round_trip() {
    let mut volume = Volume::isotropic([3, 3, 3], Point3::origin(), 1.0).unwrap();
    let mut mesh = Mesh::new();
    mesh.vertices
        .push(Vertex::with_normal(Point3::new(1.5, 1.5, 1.5), Vector3::z()));

    let config = ProjectionConfig {
        kernel: GaussianKernel::new(0.2, 0.2),
        ..Default::default()
    };

    let splat = surface_to_volume(&mesh, &[9.5], &mut volume, "paint", &config, &NoProgress)
        .unwrap()
        .unwrap();
    assert_eq!(splat.touched_voxels, 1);
    assert_eq!(volume.get("paint", 1, 1, 1).unwrap(), Some(9.5));
    assert_eq!(volume.get("paint", 0, 0, 0).unwrap(), Some(0.0));

    let back = volume_to_surface(&mesh, &volume, "paint", &config, &NoProgress)
        .unwrap()
        .unwrap();
    assert!((back.values[0] - 9.5).abs() < 1e-12);
}

#[test]
fn test_cancelled_splat_writes_no_channel() {
    let mut volume = Volume::isotropic([8, 8, 8], Point3::new(-4.0, -4.0, -4.0), 1.0).unwrap();
    let tracker = ProgressTracker::new(4);
    tracker.cancel();

    let out = surface_to_volume(
        &circle_mesh(),
        &[1.0; 4],
        &mut volume,
        "paint",
        &ProjectionConfig::default(),
        &tracker,
    )
    .unwrap();
    assert!(out.is_none());
    assert!(!volume.has_channel("paint"));
    assert!(!volume.has_channel("paint_weights"));
}

#[test]
fn test_transfer_matrix_matches_projection() {
    let mut volume = Volume::isotropic([8, 8, 8], Point3::new(-4.0, -4.0, -4.0), 1.0).unwrap();
    volume
        .add_channel_fn("ramp", |p| p.x + 2.0 * p.y)
        .unwrap();
    let mesh = circle_mesh();

    let out = ProjectionBuilder::new(&mesh)
        .thickness(1.0)
        .denominator(DenominatorWeight::Product)
        .record_matrix(true)
        .from_volume(&volume, "ramp")
        .unwrap()
        .unwrap();
    let matrix = out.matrix.unwrap();
    assert_eq!(matrix.shape(), Some((4, volume.voxel_count())));

    // With the product denominator every row of the matrix normalises to the
    // projected value.
    let data = volume.channel("ramp").unwrap();
    let csr = matrix.to_csr().unwrap();
    for (v, row) in csr.outer_iterator().enumerate() {
        let (num, den) = row
            .iter()
            .fold((0.0, 0.0), |(n, d), (c, w)| (n + w * data[c], d + w));
        assert!((num / den - out.values[v]).abs() < 1e-9);
    }

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("matrix.tsv");
    matrix.write_tsv(&path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    let mut lines = text.lines();
    assert_eq!(
        lines.next().unwrap(),
        format!("# 4 {} {}", volume.voxel_count(), matrix.nnz())
    );
    assert_eq!(lines.count(), matrix.nnz());
}

#[test]
fn test_per_vertex_thickness() {
    let mesh = circle_mesh();
    let mut volume = Volume::isotropic([8, 8, 8], Point3::new(-4.0, -4.0, -4.0), 1.0).unwrap();

    let thin = ProjectionBuilder::new(&mesh)
        .to_volume(&[1.0; 4], &mut volume, "thin")
        .unwrap()
        .unwrap();
    let thick = ProjectionBuilder::new(&mesh)
        .thickness_per_vertex(vec![2.0, 2.0, 2.0, 2.0])
        .to_volume(&[1.0; 4], &mut volume, "thick")
        .unwrap()
        .unwrap();
    assert!(thick.touched_voxels >= thin.touched_voxels);

    let err = ProjectionBuilder::new(&mesh)
        .thickness_per_vertex(vec![1.0; 3])
        .to_volume(&[1.0; 4], &mut volume, "bad");
    assert!(err.is_err());
    assert!(!volume.has_channel("bad"));

    let config = ProjectionConfig {
        thickness: Thickness::Uniform(-1.0),
        ..Default::default()
    };
    assert!(volume_to_surface(&mesh, &volume, "thin", &config, &NoProgress).is_err());
}

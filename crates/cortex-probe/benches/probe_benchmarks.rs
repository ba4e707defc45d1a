//! Benchmarks for cortex-probe operations.
//!
//! Run with: cargo bench -p cortex-probe
//!
//! To compare against baseline:
//! 1. First run: cargo bench -p cortex-probe -- --save-baseline main
//! 2. After changes: cargo bench -p cortex-probe -- --baseline main

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use cortex_mesh::{Mesh, NoProgress, template_sphere};
use cortex_probe::{
    ModelOptions, ProjectionConfig, SamplingMode, ShapeSet, Thickness, Volume, reconstruct_boundaries,
    sample_rays, surface_to_volume, volume_to_surface,
};
use nalgebra::Point3;

// =============================================================================
// Test Volume Generation
// =============================================================================

/// Concentric head phantom: brain, skull, scalp, air.
fn create_head(size: usize) -> Volume {
    let half = size as f64 / 2.0;
    let mut volume = Volume::isotropic([size; 3], Point3::new(-half, -half, -half), 1.0).unwrap();
    let brain = half * 0.6;
    volume
        .add_channel_fn("t1", move |p| {
            let r = p.coords.norm();
            if r < brain {
                0.5
            } else if r < brain + 5.0 {
                0.05
            } else if r < brain + 10.0 {
                1.0
            } else {
                0.0
            }
        })
        .unwrap();
    volume
}

fn create_hull(size: usize) -> Mesh {
    template_sphere(Point3::origin(), size as f64 * 0.3 - 2.0, 642).unwrap()
}

// =============================================================================
// Ray Sampling Benchmarks
// =============================================================================

fn bench_sample_rays(c: &mut Criterion) {
    let mut group = c.benchmark_group("SampleRays");
    group.sample_size(10);

    let volume = create_head(64);
    let hull = create_hull(64);

    for nodes in [162, 642, 2562] {
        let template = template_sphere(Point3::origin(), 100.0, nodes).unwrap();
        group.throughput(Throughput::Elements(nodes as u64));

        for mode in [SamplingMode::Nearest, SamplingMode::Trilinear, SamplingMode::Gaussian] {
            let options = ModelOptions::default().with_template(100.0, nodes).with_sampling(mode);
            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", mode), nodes),
                &(&template, &options),
                |b, (template, options)| {
                    b.iter(|| {
                        sample_rays(
                            black_box(&volume),
                            black_box(&hull),
                            template,
                            options,
                            None,
                            false,
                            &NoProgress,
                        )
                    })
                },
            );
        }
    }

    group.finish();
}

fn bench_reconstruction(c: &mut Criterion) {
    let mut group = c.benchmark_group("Reconstruction");
    group.sample_size(10);

    let hull = create_hull(64);
    let options = ModelOptions {
        max_intensity_dist: 3.0,
        ..ModelOptions::default().with_template(100.0, 642)
    };

    group.bench_function("head_64_642", |b| {
        b.iter_batched(
            || (create_head(64), ShapeSet::new()),
            |(mut volume, mut shapes)| {
                reconstruct_boundaries(&mut volume, black_box(&hull), &options, &mut shapes, &NoProgress)
            },
            criterion::BatchSize::LargeInput,
        )
    });

    group.finish();
}

// =============================================================================
// Projection Benchmarks
// =============================================================================

fn bench_projection(c: &mut Criterion) {
    let mut group = c.benchmark_group("Projection");
    group.sample_size(10);

    let volume = create_head(64);
    let mesh = create_hull(64);
    group.throughput(Throughput::Elements(mesh.vertex_count() as u64));

    for thickness in [0.0, 2.0] {
        let config = ProjectionConfig {
            thickness: Thickness::Uniform(thickness),
            ..Default::default()
        };

        group.bench_with_input(
            BenchmarkId::new("volume_to_surface", thickness),
            &config,
            |b, config| b.iter(|| volume_to_surface(black_box(&mesh), &volume, "t1", config, &NoProgress)),
        );

        let values = vec![1.0; mesh.vertex_count()];
        group.bench_with_input(
            BenchmarkId::new("surface_to_volume", thickness),
            &config,
            |b, config| {
                b.iter_batched(
                    || volume.clone(),
                    |mut target| surface_to_volume(black_box(&mesh), &values, &mut target, "paint", config, &NoProgress),
                    criterion::BatchSize::LargeInput,
                )
            },
        );
    }

    group.finish();
}

// =============================================================================
// Criterion Setup
// =============================================================================

criterion_group!(benches, bench_sample_rays, bench_reconstruction, bench_projection);

criterion_main!(benches);

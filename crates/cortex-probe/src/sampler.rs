//! Ray sampling of a volume from a template sphere through a hull surface.
//!
//! For every template vertex a ray leaves `center` towards the vertex, is
//! intersected with the hull, stepped past it by `min_clearance` and then
//! sampled every `1 / sample_rate` until it leaves the volume. Each raw
//! profile is smoothed, normalised, trimmed of trailing air and resampled to
//! a fixed length.

use cortex_mesh::{Mesh, OperationTimer, ProgressSink, RayCaster};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::curve::{self, SampleRay};
use crate::error::{ProbeError, ProbeResult};
use crate::options::{ModelOptions, SamplingMode};
use crate::projection::{GaussianKernel, decompose};
use crate::volume::{ChannelView, Volume};

/// Why a vertex produced no usable ray.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RayFailure {
    /// The ray never met the hull.
    #[error("ray does not intersect the hull")]
    NoIntersection,
    /// The ray left the volume before any sample, or trimming removed all.
    #[error("ray profile is empty")]
    EmptyProfile,
}

/// Per-vertex output of [`sample_rays`].
#[derive(Debug, Clone)]
pub struct SampledRays {
    /// Processed ray, or the reason there is none.
    pub rays: Vec<Result<SampleRay, RayFailure>>,
    /// Unprocessed samples, when requested.
    pub raw: Option<Vec<Vec<f64>>>,
}

impl SampledRays {
    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.rays.len()
    }

    /// True if there are no vertices.
    pub fn is_empty(&self) -> bool {
        self.rays.is_empty()
    }

    /// Number of failed vertices.
    pub fn failure_count(&self) -> usize {
        self.rays.iter().filter(|r| r.is_err()).count()
    }

    /// Successful rays with their vertex index.
    pub fn successful(&self) -> impl Iterator<Item = (usize, &SampleRay)> {
        self.rays
            .iter()
            .enumerate()
            .filter_map(|(v, r)| r.as_ref().ok().map(|ray| (v, ray)))
    }
}

/// Smoothing window for a sample rate: `round(2 * rate) + 1`.
pub fn smoothing_window(sample_rate: f64) -> usize {
    (2.0 * sample_rate).round().max(0.0) as usize + 1
}

/// Samples of tissue required after the trimmed air tail.
pub fn air_run_length(options: &ModelOptions) -> usize {
    ((options.max_intensity_dist * options.sample_rate).ceil() as usize).max(1)
}

/// Smooth, normalise, trim and resample one raw profile.
///
/// Returns the processed samples and the physical distance per resampled
/// index, or None when nothing survives trimming.
pub fn condition_profile(raw: &[f64], options: &ModelOptions) -> Option<(Vec<f64>, f64)> {
    if raw.is_empty() {
        return None;
    }

    let smoothed = curve::moving_average(raw, smoothing_window(options.sample_rate));
    let normalized: Vec<f64> = curve::normalize(&smoothed)
        .into_iter()
        .map(|v| v.min(options.max_intensity))
        .collect();

    let kept = curve::trailing_air_cut(&normalized, options.min_intensity, air_run_length(options));
    if kept == 0 {
        return None;
    }

    let samples = curve::resample(&normalized[..kept], options.resample_count);
    let scale = (kept as f64 / options.resample_count as f64) / options.sample_rate;
    Some((samples, scale))
}

/// Channel named in `options`, else the volume's first channel.
pub fn resolve_channel(volume: &Volume, options: &ModelOptions) -> ProbeResult<String> {
    match options.channel.as_deref() {
        Some(name) if volume.has_channel(name) => Ok(name.to_string()),
        Some(name) => Err(ProbeError::missing_channel(name)),
        None => volume
            .first_channel()
            .map(str::to_string)
            .ok_or_else(|| ProbeError::empty_volume("volume has no channels")),
    }
}

/// Reads values along rays from one channel.
struct Prober<'a> {
    view: ChannelView<'a>,
    mode: SamplingMode,
    kernel: GaussianKernel,
    mask: Option<&'a [bool]>,
    fill: f64,
}

impl Prober<'_> {
    fn value(&self, p: &Point3<f64>, direction: &Vector3<f64>) -> f64 {
        let v = match self.mode {
            SamplingMode::Nearest => self.view.nearest(p),
            SamplingMode::Trilinear => self.view.trilinear(p),
            SamplingMode::Gaussian => self.gaussian(p, direction).or_else(|| self.view.trilinear(p)),
        };
        match v {
            Some(v) if v.is_finite() => v,
            _ => self.fill,
        }
    }

    /// Kernel-weighted mean of finite, unmasked voxels around `p`.
    fn gaussian(&self, p: &Point3<f64>, normal: &Vector3<f64>) -> Option<f64> {
        let volume = self.view.volume();
        let reach = Vector3::repeat(self.kernel.extent(0.0));
        let range = volume.index_range(&(p - reach), &(p + reach))?;

        let mut num = 0.0;
        let mut den = 0.0;
        for [i, j, k] in range.iter() {
            let idx = volume.linearize(i, j, k);
            if self.mask.is_some_and(|m| !m[idx]) {
                continue;
            }
            let value = self.view.at(idx);
            if !value.is_finite() {
                continue;
            }
            let (nd, td) = decompose(&(volume.voxel_center(i, j, k) - p), normal);
            if let Some((wn, wt)) = self.kernel.weights(nd, td, 0.0) {
                num += value * wn * wt;
                den += wn * wt;
            }
        }

        (den > 0.0).then(|| num / den)
    }

    /// Raw samples from `start` until the ray leaves the volume.
    fn walk(&self, start: &Point3<f64>, direction: &Vector3<f64>, step: f64, max_steps: usize) -> Vec<f64> {
        let volume = self.view.volume();
        let mut samples = Vec::new();
        let mut p = *start;
        while samples.len() < max_steps && volume.contains(&p) {
            samples.push(self.value(&p, direction));
            p += direction * step;
        }
        samples
    }
}

/// Cast one ray per template vertex and sample `volume` along it.
///
/// `mask` names a volume mask restricting Gaussian sampling. Per-vertex
/// failures are recorded, never raised. Returns `Ok(None)` when cancelled.
pub fn sample_rays(
    volume: &Volume,
    hull: &Mesh,
    template: &Mesh,
    options: &ModelOptions,
    mask: Option<&str>,
    keep_raw: bool,
    progress: &dyn ProgressSink,
) -> ProbeResult<Option<SampledRays>> {
    options.validate()?;
    volume.validate()?;

    let channel = resolve_channel(volume, options)?;
    let channel = channel.as_str();
    let view = volume.view(channel)?;
    let (fill, _) = volume
        .data_range(channel)?
        .ok_or_else(|| ProbeError::empty_volume(format!("channel `{}` has no finite values", channel)))?;

    let mask = match mask {
        Some(name) => Some(
            volume
                .mask(name)
                .ok_or_else(|| ProbeError::invalid_param("mask", format!("volume has no mask `{}`", name)))?,
        ),
        None => None,
    };

    let caster = RayCaster::new(hull)?;
    let n = template.vertex_count();
    let _timer = OperationTimer::with_context("sample_rays", n, template.face_count());

    let prober = Prober {
        view,
        mode: options.sampling,
        kernel: options.kernel,
        mask,
        fill,
    };
    let step = 1.0 / options.sample_rate;
    let (lo, hi) = volume.bounds();
    let max_steps = ((hi - lo).norm() * options.sample_rate).ceil() as usize + 2;
    let center = options.center;

    info!(
        vertices = n,
        channel,
        sample_rate = options.sample_rate,
        mode = ?options.sampling,
        "Sampling rays"
    );
    progress.set_range(0, n as u64);
    progress.set_message("Sampling rays");

    let per_vertex: Vec<Option<(Result<SampleRay, RayFailure>, Vec<f64>)>> = (0..n)
        .into_par_iter()
        .map(|v| {
            if progress.is_cancelled() {
                return None;
            }
            let outcome = (|| -> Result<_, RayFailure> {
                let direction = (template.position(v) - center)
                    .try_normalize(1e-12)
                    .ok_or(RayFailure::NoIntersection)?;
                let hit = caster.cast(&center, &direction).ok_or(RayFailure::NoIntersection)?;
                let start = hit.point + direction * options.min_clearance;

                let raw = prober.walk(&start, &direction, step, max_steps);
                let ray = condition_profile(&raw, options)
                    .map(|(samples, scale)| SampleRay::new(start, direction, samples, scale))
                    .ok_or(RayFailure::EmptyProfile);
                Ok((ray, raw))
            })();
            progress.increment();

            Some(match outcome {
                Ok((ray, raw)) => (ray, raw),
                Err(failure) => (Err(failure), Vec::new()),
            })
        })
        .collect();

    if progress.is_cancelled() || per_vertex.iter().any(Option::is_none) {
        info!("Ray sampling cancelled");
        return Ok(None);
    }

    let mut rays = Vec::with_capacity(n);
    let mut raw = keep_raw.then(|| Vec::with_capacity(n));
    for (ray, samples) in per_vertex.into_iter().flatten() {
        if let Err(failure) = &ray {
            debug!(vertex = rays.len(), %failure, "Ray failed");
        }
        rays.push(ray);
        if let Some(raw) = raw.as_mut() {
            raw.push(samples);
        }
    }

    let result = SampledRays { rays, raw };
    let failed = result.failure_count();
    if failed > 0 {
        warn!(failed, total = n, "Some rays produced no profile");
    }
    info!(rays = n - failed, failed, "Ray sampling complete");

    Ok(Some(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_mesh::{NoProgress, ProgressTracker, template_sphere};

    fn radial_volume() -> Volume {
        let mut volume = Volume::isotropic([40, 40, 40], Point3::new(-20.0, -20.0, -20.0), 1.0).unwrap();
        volume
            .add_channel_fn("t1", |p| {
                let r = p.coords.norm();
                if r < 12.0 { 1.0 } else if r < 16.0 { 5.0 } else { 0.0 }
            })
            .unwrap();
        volume
    }

    #[test]
    fn test_smoothing_window_and_run_length() {
        assert_eq!(smoothing_window(2.0), 5);
        assert_eq!(smoothing_window(1.0), 3);
        let options = ModelOptions::default().with_sample_rate(2.0);
        assert_eq!(air_run_length(&options), 20);
    }

    #[test]
    fn test_condition_profile_trims_air() {
        let options = ModelOptions {
            sample_rate: 0.5,
            max_intensity_dist: 4.0,
            resample_count: 10,
            ..ModelOptions::default()
        };
        // window 2, run length 2
        let raw = [0.0, 0.0, 0.0, 10.0, 10.0, 10.0, 10.0, 0.0, 0.0, 0.0, 0.0];
        let (samples, scale) = condition_profile(&raw, &options).unwrap();
        assert_eq!(samples.len(), 10);
        assert!(samples.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(scale > 0.0 && scale < 11.0 / 10.0 / 0.5);
        assert!(condition_profile(&[], &options).is_none());
    }

    #[test]
    fn test_sample_rays_hits_every_vertex() {
        let volume = radial_volume();
        let hull = template_sphere(Point3::origin(), 8.0, 162).unwrap();
        let template = template_sphere(Point3::origin(), 100.0, 42).unwrap();
        let options = ModelOptions::default()
            .with_sample_rate(1.0)
            .with_template(100.0, 42);

        let rays = sample_rays(&volume, &hull, &template, &options, None, true, &NoProgress)
            .unwrap()
            .unwrap();

        assert_eq!(rays.len(), 42);
        assert_eq!(rays.failure_count(), 0);
        for (v, ray) in rays.successful() {
            assert_eq!(ray.len(), options.resample_count);
            let expected = (template.position(v) - Point3::origin()).normalize();
            assert!((ray.direction - expected).norm() < 1e-9);
            let start_r = ray.origin.coords.norm();
            assert!(start_r > 8.0 && start_r < 10.0);
        }
        let raw = rays.raw.unwrap();
        assert!(raw.iter().all(|r| !r.is_empty()));
    }

    #[test]
    fn test_missing_hull_marks_failures() {
        let volume = radial_volume();
        // Hull off to one side: most rays miss it.
        let mut hull = template_sphere(Point3::origin(), 2.0, 42).unwrap();
        hull.translate(Vector3::new(10.0, 0.0, 0.0));
        let template = template_sphere(Point3::origin(), 100.0, 42).unwrap();

        let rays = sample_rays(&volume, &hull, &template, &ModelOptions::default(), None, false, &NoProgress)
            .unwrap()
            .unwrap();
        assert!(rays.failure_count() > 0);
        assert!(rays.failure_count() < 42);
        assert!(rays.raw.is_none());
        assert!(rays.rays.iter().any(|r| r == &Err(RayFailure::NoIntersection)));
    }

    #[test]
    fn test_gaussian_sampling_with_mask() {
        let mut volume = radial_volume();
        let mask = volume.finite_mask("t1").unwrap();
        volume.add_mask("valid", mask).unwrap();
        let hull = template_sphere(Point3::origin(), 8.0, 12).unwrap();
        let template = template_sphere(Point3::origin(), 100.0, 12).unwrap();
        let options = ModelOptions::default().with_sampling(SamplingMode::Gaussian);

        let rays = sample_rays(&volume, &hull, &template, &options, Some("valid"), false, &NoProgress)
            .unwrap()
            .unwrap();
        assert_eq!(rays.failure_count(), 0);

        let err = sample_rays(&volume, &hull, &template, &options, Some("nope"), false, &NoProgress);
        assert!(err.is_err());
    }

    #[test]
    fn test_cancelled_sampling() {
        let volume = radial_volume();
        let hull = template_sphere(Point3::origin(), 8.0, 12).unwrap();
        let tracker = ProgressTracker::new(12);
        tracker.cancel();
        let out = sample_rays(&volume, &hull, &hull, &ModelOptions::default(), None, false, &tracker).unwrap();
        assert!(out.is_none());
    }
}

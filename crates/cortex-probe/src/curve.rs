//! One-dimensional curve utilities and sampled rays.

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Centred moving average. Windows are truncated at the ends, so every
/// output is the mean of the samples actually available.
pub fn moving_average(curve: &[f64], window: usize) -> Vec<f64> {
    let n = curve.len();
    if n == 0 || window <= 1 {
        return curve.to_vec();
    }

    let half = window / 2;
    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    for &v in curve {
        prefix.push(prefix[prefix.len() - 1] + v);
    }

    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            (prefix[hi] - prefix[lo]) / (hi - lo) as f64
        })
        .collect()
}

/// Min–max normalisation to `[0, 1]`. A constant curve maps to zeros.
pub fn normalize(curve: &[f64]) -> Vec<f64> {
    match crate::volume::finite_range(curve) {
        Some((lo, hi)) => normalize_to(curve, lo, hi),
        None => vec![0.0; curve.len()],
    }
}

/// Map `[lo, hi]` linearly onto `[0, 1]`. Values are not clamped.
/// Returns zeros when `hi <= lo`.
pub fn normalize_to(curve: &[f64], lo: f64, hi: f64) -> Vec<f64> {
    let span = hi - lo;
    if !(span > 0.0) {
        return vec![0.0; curve.len()];
    }
    curve.iter().map(|v| (v - lo) / span).collect()
}

/// Linear resampling to `count` samples spanning the whole curve.
///
/// Sample `i` is taken at source position `i * (len - 1) / (count - 1)`, so
/// resampling to the current length returns the curve unchanged.
pub fn resample(curve: &[f64], count: usize) -> Vec<f64> {
    match (curve.len(), count) {
        (_, 0) | (0, _) => Vec::new(),
        (1, _) => vec![curve[0]; count],
        (_, 1) => vec![curve[0]],
        (len, _) => {
            let last = (len - 1) as f64;
            let denom = (count - 1) as f64;
            (0..count)
                .map(|i| interpolate_at(curve, i as f64 * last / denom))
                .collect()
        }
    }
}

/// First differences, `d[i] = y[i + 1] - y[i]`.
pub fn derivative(curve: &[f64]) -> Vec<f64> {
    curve.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Number of leading samples to keep once trailing low-intensity samples
/// ("air" beyond the scalp) are cut.
///
/// Scanning back from the end, the first run of `run_len` consecutive samples
/// above `min_intensity` marks tissue; everything after that run is cut. When
/// no run qualifies the whole curve is kept.
pub fn trailing_air_cut(curve: &[f64], min_intensity: f64, run_len: usize) -> usize {
    let run_len = run_len.max(1);
    let mut run = 0usize;
    let mut run_end = 0usize;

    for i in (0..curve.len()).rev() {
        if curve[i] > min_intensity {
            if run == 0 {
                run_end = i;
            }
            run += 1;
            if run >= run_len {
                return run_end + 1;
            }
        } else {
            run = 0;
        }
    }

    curve.len()
}

fn interpolate_at(curve: &[f64], pos: f64) -> f64 {
    let last = curve.len() - 1;
    let pos = pos.clamp(0.0, last as f64);
    let i0 = (pos.floor() as usize).min(last);
    let i1 = (i0 + 1).min(last);
    let t = pos - i0 as f64;
    curve[i0] * (1.0 - t) + curve[i1] * t
}

/// A ray with samples taken at equal steps along its direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRay {
    /// Position of sample 0.
    pub origin: Point3<f64>,
    /// Unit direction.
    pub direction: Vector3<f64>,
    /// Sample values.
    pub samples: Vec<f64>,
    /// Physical distance between consecutive samples.
    pub scale: f64,
}

impl SampleRay {
    /// Create a ray.
    pub fn new(origin: Point3<f64>, direction: Vector3<f64>, samples: Vec<f64>, scale: f64) -> Self {
        Self {
            origin,
            direction,
            samples,
            scale,
        }
    }

    /// Number of samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True if the ray has no samples.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Physical position of sample `index` (fractional indices allowed).
    #[inline]
    pub fn point_at(&self, index: f64) -> Point3<f64> {
        self.origin + self.direction * (index * self.scale)
    }

    /// Physical position of the last sample.
    pub fn end_point(&self) -> Point3<f64> {
        self.point_at(self.len().saturating_sub(1) as f64)
    }

    /// Resample to `count` samples over the same physical extent.
    pub fn resample(&self, count: usize) -> SampleRay {
        let span = self.len().saturating_sub(1) as f64 * self.scale;
        let scale = if count > 1 {
            span / (count - 1) as f64
        } else {
            self.scale
        };
        SampleRay {
            origin: self.origin,
            direction: self.direction,
            samples: resample(&self.samples, count),
            scale,
        }
    }

    /// Nearest sample at normalised position `t` in `[0, 1]`.
    pub fn nearest(&self, t: f64) -> Option<f64> {
        if self.is_empty() || !(0.0..=1.0).contains(&t) {
            return None;
        }
        let idx = (t * (self.len() - 1) as f64).round() as usize;
        Some(self.samples[idx])
    }

    /// Linearly interpolated sample at normalised position `t` in `[0, 1]`.
    pub fn interpolate(&self, t: f64) -> Option<f64> {
        if self.is_empty() || !(0.0..=1.0).contains(&t) {
            return None;
        }
        Some(interpolate_at(&self.samples, t * (self.len() - 1) as f64))
    }
}

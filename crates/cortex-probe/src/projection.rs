//! Gaussian projection between mesh vertices and volume voxels.
//!
//! Each vertex owns an anisotropic footprint: along the vertex normal the
//! weight is 1 inside half the local thickness and falls off as a Gaussian
//! beyond it; within the tangent plane it is a Gaussian of the tangential
//! distance. Voxels beyond `sigma * cutoff` in either direction are ignored.
//!
//! - [`surface_to_volume`] splats per-vertex values into a volume channel and
//!   normalises each voxel by its accumulated weight.
//! - [`volume_to_surface`] gathers a weighted average of voxel values for each
//!   vertex.
//!
//! Both directions can record every non-zero weight in a [`TransferMatrix`]
//! and return `Ok(None)` when cancelled, leaving the volume untouched.

use cortex_mesh::{Mesh, OperationTimer, ProgressSink};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ProbeError, ProbeResult};
use crate::matrix::TransferMatrix;
use crate::volume::Volume;

/// Anisotropic Gaussian kernel parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaussianKernel {
    /// Standard deviation along the normal.
    pub sigma_normal: f64,
    /// Standard deviation in the tangent plane.
    pub sigma_tangent: f64,
    /// Normal cutoff, in multiples of `sigma_normal`.
    pub max_sigma_normal: f64,
    /// Tangential cutoff, in multiples of `sigma_tangent`.
    pub max_sigma_tangent: f64,
}

impl Default for GaussianKernel {
    fn default() -> Self {
        Self {
            sigma_normal: 1.0,
            sigma_tangent: 1.0,
            max_sigma_normal: 2.0,
            max_sigma_tangent: 2.0,
        }
    }
}

impl GaussianKernel {
    /// Kernel with the given sigmas and the default cutoff of 2 sigma.
    pub fn new(sigma_normal: f64, sigma_tangent: f64) -> Self {
        Self {
            sigma_normal,
            sigma_tangent,
            ..Self::default()
        }
    }

    /// Set the cutoff multipliers.
    pub fn with_cutoff(mut self, normal: f64, tangent: f64) -> Self {
        self.max_sigma_normal = normal;
        self.max_sigma_tangent = tangent;
        self
    }

    /// All four parameters must be positive and finite.
    pub fn validate(&self) -> ProbeResult<()> {
        for (name, value) in [
            ("sigma_normal", self.sigma_normal),
            ("sigma_tangent", self.sigma_tangent),
            ("max_sigma_normal", self.max_sigma_normal),
            ("max_sigma_tangent", self.max_sigma_tangent),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ProbeError::invalid_param(
                    name,
                    format!("{} must be positive, got {}", name, value),
                ));
            }
        }
        Ok(())
    }

    /// Normal distance beyond the half-thickness at which weights are cut.
    #[inline]
    pub fn normal_cutoff(&self) -> f64 {
        self.sigma_normal * self.max_sigma_normal
    }

    /// Tangential distance at which weights are cut.
    #[inline]
    pub fn tangent_cutoff(&self) -> f64 {
        self.sigma_tangent * self.max_sigma_tangent
    }

    /// Normal weight: 1 inside `half_thickness`, Gaussian falloff beyond.
    #[inline]
    pub fn normal_weight(&self, normal_dist: f64, half_thickness: f64) -> f64 {
        let d = normal_dist.abs();
        if d < half_thickness {
            1.0
        } else {
            gaussian(d - half_thickness, self.sigma_normal)
        }
    }

    /// Tangential weight.
    #[inline]
    pub fn tangent_weight(&self, tangent_dist: f64) -> f64 {
        gaussian(tangent_dist, self.sigma_tangent)
    }

    /// `(w_normal, w_tangent)`, or None when the offset lies outside the
    /// cutoff envelope.
    #[inline]
    pub fn weights(&self, normal_dist: f64, tangent_dist: f64, half_thickness: f64) -> Option<(f64, f64)> {
        let nd = normal_dist.abs();
        if nd > half_thickness + self.normal_cutoff() || tangent_dist > self.tangent_cutoff() {
            return None;
        }
        Some((
            self.normal_weight(nd, half_thickness),
            self.tangent_weight(tangent_dist),
        ))
    }

    /// Half-extent of the axis-aligned box covering the envelope.
    pub fn extent(&self, half_thickness: f64) -> f64 {
        (half_thickness + self.normal_cutoff()).max(self.tangent_cutoff())
    }
}

/// Unnormalised Gaussian `exp(-x^2 / 2 sigma^2)`.
#[inline]
fn gaussian(x: f64, sigma: f64) -> f64 {
    (-(x * x) / (2.0 * sigma * sigma)).exp()
}

/// Split `offset` into its distance along `normal` and its tangential
/// residual length. `normal` must be unit length or zero.
#[inline]
pub fn decompose(offset: &Vector3<f64>, normal: &Vector3<f64>) -> (f64, f64) {
    let nd = offset.dot(normal);
    let td = (offset - normal * nd).norm();
    (nd, td)
}

/// Layer thickness around the surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Thickness {
    /// Same thickness at every vertex.
    Uniform(f64),
    /// One thickness per vertex.
    PerVertex(Vec<f64>),
}

impl Default for Thickness {
    fn default() -> Self {
        Thickness::Uniform(0.0)
    }
}

impl Thickness {
    /// Thickness at vertex `v`.
    #[inline]
    pub fn at(&self, v: usize) -> f64 {
        match self {
            Thickness::Uniform(t) => *t,
            Thickness::PerVertex(values) => values[v],
        }
    }

    fn validate(&self, vertex_count: usize) -> ProbeResult<()> {
        let bad = |t: f64| !(t.is_finite() && t >= 0.0);
        match self {
            Thickness::Uniform(t) if bad(*t) => Err(ProbeError::invalid_param(
                "thickness",
                format!("thickness must be non-negative, got {}", t),
            )),
            Thickness::Uniform(_) => Ok(()),
            Thickness::PerVertex(values) => {
                if values.len() != vertex_count {
                    return Err(ProbeError::length_mismatch("thickness", vertex_count, values.len()));
                }
                match values.iter().position(|&t| bad(t)) {
                    Some(v) => Err(ProbeError::invalid_param(
                        "thickness",
                        format!("thickness at vertex {} is {}", v, values[v]),
                    )),
                    None => Ok(()),
                }
            }
        }
    }
}

/// Which weights go into the normalising denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenominatorWeight {
    /// `w_normal * w_tangent`.
    #[default]
    Product,
    /// `w_tangent` only.
    TangentOnly,
    /// `w_normal` only.
    NormalOnly,
}

impl DenominatorWeight {
    #[inline]
    fn apply(self, wn: f64, wt: f64) -> f64 {
        match self {
            DenominatorWeight::Product => wn * wt,
            DenominatorWeight::TangentOnly => wt,
            DenominatorWeight::NormalOnly => wn,
        }
    }
}

/// Settings for one projection pass.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    pub kernel: GaussianKernel,
    pub thickness: Thickness,
    pub denominator: DenominatorWeight,
    /// Log every contribution of this vertex at debug level.
    pub debug_vertex: Option<usize>,
    /// Collect a [`TransferMatrix`].
    pub record_matrix: bool,
}

impl ProjectionConfig {
    /// Check the kernel and thickness against a mesh.
    pub fn validate(&self, mesh: &Mesh) -> ProbeResult<()> {
        self.kernel.validate()?;
        self.thickness.validate(mesh.vertex_count())
    }
}

/// Result of [`surface_to_volume`].
#[derive(Debug, Clone)]
pub struct VolumeProjection {
    /// Name of the written value channel.
    pub channel: String,
    /// Name of the written denominator channel.
    pub weights_channel: String,
    /// Voxels with a non-zero denominator.
    pub touched_voxels: usize,
    /// Rows are voxels, columns are vertices.
    pub matrix: Option<TransferMatrix>,
}

/// Result of [`volume_to_surface`].
#[derive(Debug, Clone)]
pub struct SurfaceProjection {
    /// One value per vertex.
    pub values: Vec<f64>,
    /// Vertices whose footprint contained no weighted voxel.
    pub empty_vertices: usize,
    /// Rows are vertices, columns are voxels.
    pub matrix: Option<TransferMatrix>,
}

/// Visit every voxel in the footprint of one vertex.
fn for_each_weight(
    volume: &Volume,
    position: &Point3<f64>,
    normal: &Vector3<f64>,
    half_thickness: f64,
    kernel: &GaussianKernel,
    mut visit: impl FnMut(usize, f64, f64),
) {
    let r = kernel.extent(half_thickness);
    let reach = Vector3::repeat(r);
    let Some(range) = volume.index_range(&(position - reach), &(position + reach)) else {
        return;
    };

    for [i, j, k] in range.iter() {
        let offset = volume.voxel_center(i, j, k) - position;
        let (nd, td) = decompose(&offset, normal);
        if let Some((wn, wt)) = kernel.weights(nd, td, half_thickness) {
            visit(volume.linearize(i, j, k), wn, wt);
        }
    }
}

fn unit_normals(mesh: &Mesh) -> Vec<Vector3<f64>> {
    mesh.vertex_normals()
        .into_iter()
        .map(|n| n.try_normalize(1e-12).unwrap_or_else(Vector3::zeros))
        .collect()
}

/// Splat per-vertex values into `channel` of `volume`.
///
/// Also writes the accumulated denominators to `<channel>_weights`. Voxels no
/// vertex reaches get 0. Vertices are processed in order, so the result is
/// deterministic.
///
/// Returns `Ok(None)` when cancelled; nothing is written in that case.
pub fn surface_to_volume(
    mesh: &Mesh,
    values: &[f64],
    volume: &mut Volume,
    channel: &str,
    config: &ProjectionConfig,
    progress: &dyn ProgressSink,
) -> ProbeResult<Option<VolumeProjection>> {
    let n = mesh.vertex_count();
    if values.len() != n {
        return Err(ProbeError::length_mismatch("vertex values", n, values.len()));
    }
    config.validate(mesh)?;
    volume.validate()?;

    let _timer = OperationTimer::with_context("surface_to_volume", n, mesh.face_count());
    info!(vertices = n, voxels = volume.voxel_count(), channel, "Projecting surface to volume");

    let voxels = volume.voxel_count();
    let normals = unit_normals(mesh);
    let mut numerator = vec![0.0; voxels];
    let mut denominator = vec![0.0; voxels];
    let mut matrix = config.record_matrix.then(TransferMatrix::new);

    progress.set_range(0, n as u64);
    progress.set_message("Projecting surface to volume");

    for v in 0..n {
        if progress.is_cancelled() {
            info!(vertex = v, "Surface to volume projection cancelled");
            return Ok(None);
        }

        let value = values[v];
        let half = config.thickness.at(v) / 2.0;
        let debug_this = config.debug_vertex == Some(v);
        let position = mesh.position(v);

        for_each_weight(volume, &position, &normals[v], half, &config.kernel, |idx, wn, wt| {
            let w = wn * wt;
            numerator[idx] += value * w;
            denominator[idx] += config.denominator.apply(wn, wt);
            if let Some(m) = matrix.as_mut() {
                m.push(idx, v, w);
            }
            if debug_this {
                debug!(vertex = v, voxel = idx, w_normal = wn, w_tangent = wt, "Contribution");
            }
        });

        progress.set_value(v as u64 + 1);
    }

    let mut touched = 0usize;
    let result: Vec<f64> = numerator
        .iter()
        .zip(&denominator)
        .map(|(&num, &den)| {
            if den != 0.0 {
                touched += 1;
                num / den
            } else {
                0.0
            }
        })
        .collect();

    if let Some(m) = matrix.as_mut() {
        m.finalize(voxels, n)?;
    }

    let weights_channel = format!("{}_weights", channel);
    volume.add_channel(channel, result)?;
    volume.add_channel(weights_channel.clone(), denominator)?;

    info!(touched_voxels = touched, "Surface to volume projection complete");

    Ok(Some(VolumeProjection {
        channel: channel.to_string(),
        weights_channel,
        touched_voxels: touched,
        matrix,
    }))
}

/// Gather a Gaussian-weighted average of `channel` at every vertex.
///
/// A vertex whose denominator is zero, or whose average is not finite,
/// gets 0. Returns `Ok(None)` when cancelled.
pub fn volume_to_surface(
    mesh: &Mesh,
    volume: &Volume,
    channel: &str,
    config: &ProjectionConfig,
    progress: &dyn ProgressSink,
) -> ProbeResult<Option<SurfaceProjection>> {
    let n = mesh.vertex_count();
    config.validate(mesh)?;
    let data = volume.channel(channel)?;

    let _timer = OperationTimer::with_context("volume_to_surface", n, mesh.face_count());
    info!(vertices = n, voxels = volume.voxel_count(), channel, "Projecting volume to surface");

    let normals = unit_normals(mesh);
    progress.set_range(0, n as u64);
    progress.set_message("Projecting volume to surface");

    let per_vertex: Vec<Option<(f64, bool, Option<TransferMatrix>)>> = (0..n)
        .into_par_iter()
        .map(|v| {
            if progress.is_cancelled() {
                return None;
            }

            let half = config.thickness.at(v) / 2.0;
            let debug_this = config.debug_vertex == Some(v);
            let mut num = 0.0;
            let mut den = 0.0;
            let mut row = config.record_matrix.then(TransferMatrix::new);

            for_each_weight(volume, &mesh.position(v), &normals[v], half, &config.kernel, |idx, wn, wt| {
                let w = wn * wt;
                num += data[idx] * w;
                den += config.denominator.apply(wn, wt);
                if let Some(m) = row.as_mut() {
                    m.push(v, idx, w);
                }
                if debug_this {
                    debug!(vertex = v, voxel = idx, value = data[idx], w_normal = wn, w_tangent = wt, "Contribution");
                }
            });

            progress.increment();

            let value = if den != 0.0 { num / den } else { 0.0 };
            let empty = den == 0.0;
            Some((if value.is_finite() { value } else { 0.0 }, empty, row))
        })
        .collect();

    if progress.is_cancelled() || per_vertex.iter().any(Option::is_none) {
        info!("Volume to surface projection cancelled");
        return Ok(None);
    }

    let mut values = Vec::with_capacity(n);
    let mut empty_vertices = 0usize;
    let mut matrix = config.record_matrix.then(TransferMatrix::new);
    for (value, empty, row) in per_vertex.into_iter().flatten() {
        values.push(value);
        empty_vertices += usize::from(empty);
        if let (Some(m), Some(r)) = (matrix.as_mut(), row) {
            m.extend(r);
        }
    }
    if let Some(m) = matrix.as_mut() {
        m.finalize(n, volume.voxel_count())?;
    }

    info!(empty_vertices, "Volume to surface projection complete");

    Ok(Some(SurfaceProjection {
        values,
        empty_vertices,
        matrix,
    }))
}

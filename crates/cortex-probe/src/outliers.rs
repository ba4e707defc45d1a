//! Neighbourhood-based outlier correction of per-vertex scalars.

use cortex_mesh::MeshAdjacency;
use tracing::debug;

use crate::error::{ProbeError, ProbeResult};

/// Standard deviations below this are treated as zero.
const MIN_STDEV: f64 = 1e-12;

/// Outlier thresholds, in neighbourhood standard deviations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierParams {
    /// A vertex is an outlier above this z-score.
    pub threshold_stdev: f64,
    /// Outliers are moved to this many stdevs from the neighbour mean.
    pub correction_stdev: f64,
}

impl Default for OutlierParams {
    fn default() -> Self {
        Self {
            threshold_stdev: 2.0,
            correction_stdev: 1.0,
        }
    }
}

/// Corrected values and the vertices that changed.
#[derive(Debug, Clone, PartialEq)]
pub struct OutlierCorrection {
    pub values: Vec<f64>,
    pub modified: Vec<usize>,
}

/// Mean and population standard deviation of `values` over `neighbors`.
pub fn neighbor_stats(values: &[f64], neighbors: &[u32]) -> Option<(f64, f64)> {
    if neighbors.is_empty() {
        return None;
    }
    let n = neighbors.len() as f64;
    let mean = neighbors.iter().map(|&j| values[j as usize]).sum::<f64>() / n;
    let var = neighbors
        .iter()
        .map(|&j| {
            let d = values[j as usize] - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    Some((mean, var.sqrt()))
}

/// Z-score of vertex `v` against its neighbours; 0 when undefined.
fn z_score(values: &[f64], adjacency: &MeshAdjacency, v: usize) -> f64 {
    match neighbor_stats(values, adjacency.neighbors(v)) {
        Some((mean, sd)) if sd > MIN_STDEV => (values[v] - mean).abs() / sd,
        _ => 0.0,
    }
}

/// Clamp per-vertex outliers towards their neighbourhood mean.
///
/// One pass over a snapshot of `values`. A vertex is corrected only if it is
/// the most deviant member of its neighbourhood and its z-score exceeds
/// `threshold_stdev`; it is then set to `mean ± correction_stdev * stdev`,
/// keeping the side of the mean it was on. Vertices without neighbours or
/// with a zero neighbour spread are left alone.
pub fn correct_outliers(
    values: &[f64],
    adjacency: &MeshAdjacency,
    params: &OutlierParams,
) -> ProbeResult<OutlierCorrection> {
    if values.len() != adjacency.vertex_count() {
        return Err(ProbeError::length_mismatch(
            "outlier values",
            adjacency.vertex_count(),
            values.len(),
        ));
    }

    let z: Vec<f64> = (0..values.len()).map(|v| z_score(values, adjacency, v)).collect();
    let mut out = values.to_vec();
    let mut modified = Vec::new();

    for v in 0..values.len() {
        let neighbors = adjacency.neighbors(v);
        let Some((mean, sd)) = neighbor_stats(values, neighbors) else {
            continue;
        };
        if sd <= MIN_STDEV || z[v] <= params.threshold_stdev {
            continue;
        }
        if neighbors.iter().any(|&j| z[j as usize] > z[v]) {
            continue;
        }

        let sign = if values[v] >= mean { 1.0 } else { -1.0 };
        out[v] = mean + sign * params.correction_stdev * sd;
        modified.push(v);
    }

    debug!(
        vertices = values.len(),
        modified = modified.len(),
        threshold = params.threshold_stdev,
        "Corrected outliers"
    );

    Ok(OutlierCorrection {
        values: out,
        modified,
    })
}

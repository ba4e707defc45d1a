//! Sparse transfer matrices recorded during Gaussian projection.

use std::io::{BufWriter, Write};
use std::path::Path;

use sprs::{CsMat, TriMat};
use tracing::debug;

use crate::error::{ProbeError, ProbeResult};

/// Triplet collector for `(row, col, weight)` contributions.
///
/// Entries are appended while a projection runs; [`finalize`](Self::finalize)
/// fixes the dimensions once the pass has completed.
#[derive(Debug, Clone, Default)]
pub struct TransferMatrix {
    rows: Vec<usize>,
    cols: Vec<usize>,
    weights: Vec<f64>,
    shape: Option<(usize, usize)>,
}

impl TransferMatrix {
    /// Create an empty, unfinalised matrix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one non-zero entry. Zero weights are dropped.
    pub fn push(&mut self, row: usize, col: usize, weight: f64) {
        if weight != 0.0 {
            self.rows.push(row);
            self.cols.push(col);
            self.weights.push(weight);
        }
    }

    /// Append all entries of another collector.
    pub fn extend(&mut self, other: TransferMatrix) {
        self.rows.extend(other.rows);
        self.cols.extend(other.cols);
        self.weights.extend(other.weights);
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.weights.len()
    }

    /// Fix the matrix dimensions.
    ///
    /// # Errors
    ///
    /// Fails if a recorded entry lies outside `rows x cols`.
    pub fn finalize(&mut self, rows: usize, cols: usize) -> ProbeResult<()> {
        if let Some(r) = self.rows.iter().copied().find(|&r| r >= rows) {
            return Err(ProbeError::length_mismatch("transfer matrix rows", rows, r + 1));
        }
        if let Some(c) = self.cols.iter().copied().find(|&c| c >= cols) {
            return Err(ProbeError::length_mismatch("transfer matrix columns", cols, c + 1));
        }
        self.shape = Some((rows, cols));
        debug!(rows, cols, nnz = self.nnz(), "Finalized transfer matrix");
        Ok(())
    }

    /// Dimensions, once finalised.
    pub fn shape(&self) -> Option<(usize, usize)> {
        self.shape
    }

    /// Recorded entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.rows
            .iter()
            .zip(&self.cols)
            .zip(&self.weights)
            .map(|((&r, &c), &w)| (r, c, w))
    }

    /// Triplet form. None until finalised.
    pub fn to_trimat(&self) -> Option<TriMat<f64>> {
        let (rows, cols) = self.shape?;
        Some(TriMat::from_triplets(
            (rows, cols),
            self.rows.clone(),
            self.cols.clone(),
            self.weights.clone(),
        ))
    }

    /// Compressed sparse row form; duplicate entries are summed.
    pub fn to_csr(&self) -> Option<CsMat<f64>> {
        self.to_trimat().map(|t| t.to_csr())
    }

    /// Write as tab-separated text: a `# rows cols nnz` header, then one
    /// `row\tcol\tweight` line per entry.
    pub fn write_tsv(&self, path: impl AsRef<Path>) -> ProbeResult<()> {
        let path = path.as_ref();
        let (rows, cols) = self.shape.ok_or_else(|| {
            ProbeError::invalid_options("transfer matrix must be finalized before writing")
        })?;

        let file = std::fs::File::create(path).map_err(|e| ProbeError::io(path, e))?;
        let mut out = BufWriter::new(file);
        let write = |out: &mut BufWriter<std::fs::File>| -> std::io::Result<()> {
            writeln!(out, "# {} {} {}", rows, cols, self.nnz())?;
            for (r, c, w) in self.entries() {
                writeln!(out, "{}\t{}\t{}", r, c, w)?;
            }
            out.flush()
        };
        write(&mut out).map_err(|e| ProbeError::io(path, e))?;

        cortex_mesh::log_io_operation("write transfer matrix", path, true);
        Ok(())
    }
}

//! Plain-text ray dumps for inspecting sampled profiles.
//!
//! One line per template vertex, samples separated by tabs. Failed vertices
//! produce an empty line so line `n` always belongs to vertex `n`.

use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{ProbeError, ProbeResult};
use crate::sampler::SampledRays;

/// What to write for each ray.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DumpFormat {
    /// Prefix each line with the ray's scale (0 for failed rays).
    pub with_scale: bool,
    /// Write the unprocessed samples instead of the conditioned profile.
    pub raw: bool,
}

/// Format one dump line (without newline).
pub fn format_ray(samples: &[f64], scale: Option<f64>) -> String {
    let mut line = String::new();
    if let Some(scale) = scale {
        line.push_str(&scale.to_string());
    }
    for (i, v) in samples.iter().enumerate() {
        if i > 0 || scale.is_some() {
            line.push('\t');
        }
        line.push_str(&v.to_string());
    }
    line
}

/// Write all rays to `path`; returns the number of lines written.
///
/// # Errors
///
/// [`ProbeError::Io`] when the file cannot be created or written, and
/// [`ProbeError::InvalidOptions`] when a raw dump is requested but the rays
/// were sampled without keeping raw profiles.
pub fn write_ray_dump(path: impl AsRef<Path>, rays: &SampledRays, format: DumpFormat) -> ProbeResult<usize> {
    let path = path.as_ref();
    if format.raw && rays.raw.is_none() {
        return Err(ProbeError::invalid_param(
            "dump_raw",
            "raw samples were not kept during sampling",
        ));
    }

    let file = std::fs::File::create(path).map_err(|e| ProbeError::io(path, e))?;
    let mut out = BufWriter::new(file);

    let mut lines = 0usize;
    for (v, ray) in rays.rays.iter().enumerate() {
        let scale = format
            .with_scale
            .then(|| ray.as_ref().map_or(0.0, |r| r.scale));
        let samples: &[f64] = match (&rays.raw, ray) {
            (Some(raw), _) if format.raw => &raw[v],
            (_, Ok(r)) => &r.samples,
            (_, Err(_)) => &[],
        };
        writeln!(out, "{}", format_ray(samples, scale)).map_err(|e| ProbeError::io(path, e))?;
        lines += 1;
    }
    out.flush().map_err(|e| ProbeError::io(path, e))?;

    cortex_mesh::log_io_operation("write ray dump", path, true);
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::SampleRay;
    use crate::sampler::RayFailure;
    use nalgebra::{Point3, Vector3};

    fn rays() -> SampledRays {
        SampledRays {
            rays: vec![
                Ok(SampleRay::new(Point3::origin(), Vector3::x(), vec![0.5, 1.0], 0.25)),
                Err(RayFailure::NoIntersection),
            ],
            raw: None,
        }
    }

    #[test]
    fn test_format_ray() {
        assert_eq!(format_ray(&[1.0, 2.5], None), "1\t2.5");
        assert_eq!(format_ray(&[1.0], Some(0.5)), "0.5\t1");
        assert_eq!(format_ray(&[], None), "");
    }

    #[test]
    fn test_write_dump() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rays.txt");

        let written = write_ray_dump(
            &path,
            &rays(),
            DumpFormat {
                with_scale: true,
                raw: false,
            },
        )
        .unwrap();
        assert_eq!(written, 2);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines, vec!["0.25\t0.5\t1", "0"]);
    }

    #[test]
    fn test_raw_dump_requires_raw_samples() {
        let dir = tempfile::tempdir().unwrap();
        let format = DumpFormat {
            with_scale: false,
            raw: true,
        };
        assert!(write_ray_dump(dir.path().join("raw.txt"), &rays(), format).is_err());

        let mut with_raw = rays();
        with_raw.raw = Some(vec![vec![3.0, 4.0, 5.0], vec![]]);
        write_ray_dump(dir.path().join("raw.txt"), &with_raw, format).unwrap();
        let text = std::fs::read_to_string(dir.path().join("raw.txt")).unwrap();
        assert_eq!(text, "3\t4\t5\n\n");
    }

    #[test]
    fn test_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("rays.txt");
        let err = write_ray_dump(&path, &rays(), DumpFormat::default()).unwrap_err();
        assert!(matches!(err, ProbeError::Io { .. }));
    }
}

//! Parameters for boundary reconstruction.
//!
//! [`ModelOptions`] is a plain serde value: it can be built in code, loaded
//! from TOML or JSON, and patched from legacy `name value` option files with
//! [`ModelOptions::apply_assignments`].
//!
//! # Example TOML
//!
//! ```toml
//! center = [0.0, 10.0, 5.0]
//! sample_rate = 2.0
//! min_intensity = 0.2
//! sampling = "gaussian"
//!
//! [kernel]
//! sigma_normal = 1.0
//! sigma_tangent = 1.5
//!
//! [surfaces]
//! inner_skull = true
//! outer_skull = true
//! scalp = false
//! ```

use std::path::{Path, PathBuf};

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ProbeError, ProbeResult};
use crate::projection::GaussianKernel;

/// How the ray sampler reads the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    /// Enclosing voxel value.
    Nearest,
    /// Trilinear interpolation between voxel midpoints.
    #[default]
    Trilinear,
    /// Gaussian-weighted mean over a normal/tangent neighbourhood.
    Gaussian,
}

/// A cutting plane given by a point and a normal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub point: Point3<f64>,
    pub normal: Vector3<f64>,
}

impl Plane {
    /// Signed distance along the (unnormalised) normal.
    #[inline]
    pub fn signed_distance(&self, p: &Point3<f64>) -> f64 {
        (p - self.point).dot(&self.normal)
    }

    /// True when `p` lies strictly on the normal's side.
    #[inline]
    pub fn is_above(&self, p: &Point3<f64>) -> bool {
        self.signed_distance(p) > 0.0
    }
}

impl Default for Plane {
    /// The `z = 0` plane facing +z.
    fn default() -> Self {
        Self {
            point: Point3::origin(),
            normal: Vector3::z(),
        }
    }
}

/// Which boundary meshes to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSurfaces {
    pub inner_skull: bool,
    pub outer_skull: bool,
    pub scalp: bool,
}

impl Default for OutputSurfaces {
    fn default() -> Self {
        Self {
            inner_skull: true,
            outer_skull: true,
            scalp: true,
        }
    }
}

impl OutputSurfaces {
    /// Number of selected surfaces.
    pub fn count(&self) -> usize {
        [self.inner_skull, self.outer_skull, self.scalp]
            .iter()
            .filter(|&&b| b)
            .count()
    }
}

/// Parameter block for one reconstruction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    /// Ray origin, normally the brain's centre of mass.
    pub center: Point3<f64>,
    /// Radius of the template sphere.
    pub template_radius: f64,
    /// Minimum number of template vertices.
    pub node_count: usize,
    /// Rays ending above this plane search for the last outer-skull crossing.
    pub ear_nasion: Plane,

    /// Samples per physical unit along each ray.
    pub sample_rate: f64,
    /// Sampling strategy.
    pub sampling: SamplingMode,
    /// Kernel used when `sampling` is Gaussian.
    pub kernel: GaussianKernel,
    /// Volume channel to sample; the first channel when unset.
    pub channel: Option<String>,
    /// Distance to step past the hull before sampling starts.
    pub min_clearance: f64,

    /// Normalised intensity separating tissue from air.
    pub min_intensity: f64,
    /// Normalised intensities above this are clamped to it.
    pub max_intensity: f64,
    /// Physical length of tissue that must follow the trimmed air tail.
    pub max_intensity_dist: f64,
    /// Samples per ray after resampling.
    pub resample_count: usize,

    /// Lower bound on skull thickness.
    pub min_skull_width: f64,
    /// Upper bound on skull thickness.
    pub max_skull_width: f64,

    /// Slope unit for plateau detection; plateau detection is off when <= 0.
    pub slope_threshold: f64,
    /// Minimum plateau length in samples.
    pub min_plateau_len: usize,
    /// Plateau samples satisfy `|dy| / slope_threshold < max_plateau_slope`.
    pub max_plateau_slope: f64,
    /// Blend factor between a plateau vertex and its neighbours.
    pub neighbor_weight: f64,

    /// Z-score above which a vertex is an outlier.
    pub outlier_threshold_stdev: f64,
    /// Distance from the neighbour mean, in stdevs, that outliers are moved to.
    pub outlier_correction_stdev: f64,
    /// Sweeps of failed-vertex relaxation.
    pub max_relax_iterations: usize,

    /// Meshes to emit.
    pub surfaces: OutputSurfaces,
    /// Write one line per ray here.
    pub ray_dump: Option<PathBuf>,
    /// Prefix each dumped ray with its scale.
    pub dump_with_scale: bool,
    /// Dump raw samples instead of processed ones.
    pub dump_raw: bool,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            center: Point3::origin(),
            template_radius: 100.0,
            node_count: 2562,
            ear_nasion: Plane::default(),
            sample_rate: 2.0,
            sampling: SamplingMode::Trilinear,
            kernel: GaussianKernel::default(),
            channel: None,
            min_clearance: 1.0,
            min_intensity: 0.2,
            max_intensity: 1.0,
            max_intensity_dist: 10.0,
            resample_count: 100,
            min_skull_width: 2.0,
            max_skull_width: 12.0,
            slope_threshold: 0.01,
            min_plateau_len: 5,
            max_plateau_slope: 1.0,
            neighbor_weight: 0.5,
            outlier_threshold_stdev: 2.0,
            outlier_correction_stdev: 1.0,
            max_relax_iterations: 10,
            surfaces: OutputSurfaces::default(),
            ray_dump: None,
            dump_with_scale: false,
            dump_raw: false,
        }
    }
}

/// Outcome of [`ModelOptions::apply_assignments`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentReport {
    /// Names that were assigned.
    pub assigned: Vec<String>,
    /// Names with no matching primitive field.
    pub unknown: Vec<String>,
    /// `(line number, message)` for lines that could not be applied.
    pub rejected: Vec<(usize, String)>,
}

impl ModelOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for T1-weighted images, where skull is dark and scalp fat bright.
    pub fn for_t1() -> Self {
        Self {
            min_intensity: 0.25,
            max_skull_width: 10.0,
            neighbor_weight: 0.6,
            outlier_threshold_stdev: 1.5,
            ..Self::default()
        }
    }

    /// Set the ray origin.
    pub fn with_center(mut self, center: Point3<f64>) -> Self {
        self.center = center;
        self
    }

    /// Set template radius and vertex count.
    pub fn with_template(mut self, radius: f64, node_count: usize) -> Self {
        self.template_radius = radius;
        self.node_count = node_count;
        self
    }

    /// Set samples per unit length.
    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Set the sampling strategy.
    pub fn with_sampling(mut self, sampling: SamplingMode) -> Self {
        self.sampling = sampling;
        self
    }

    /// Set the Gaussian sampling kernel.
    pub fn with_kernel(mut self, kernel: GaussianKernel) -> Self {
        self.kernel = kernel;
        self
    }

    /// Sample a named channel.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Set skull-width bounds.
    pub fn with_skull_width(mut self, min: f64, max: f64) -> Self {
        self.min_skull_width = min;
        self.max_skull_width = max;
        self
    }

    /// Set the ear–nasion plane.
    pub fn with_ear_nasion(mut self, plane: Plane) -> Self {
        self.ear_nasion = plane;
        self
    }

    /// Select output meshes.
    pub fn with_surfaces(mut self, surfaces: OutputSurfaces) -> Self {
        self.surfaces = surfaces;
        self
    }

    /// Dump rays to a file.
    pub fn with_ray_dump(mut self, path: impl Into<PathBuf>, with_scale: bool) -> Self {
        self.ray_dump = Some(path.into());
        self.dump_with_scale = with_scale;
        self
    }

    /// Check parameter invariants.
    pub fn validate(&self) -> ProbeResult<()> {
        fn positive(name: &str, value: f64) -> ProbeResult<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ProbeError::invalid_param(
                    name,
                    format!("{} must be positive, got {}", name, value),
                ))
            }
        }
        fn non_negative(name: &str, value: f64) -> ProbeResult<()> {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(ProbeError::invalid_param(
                    name,
                    format!("{} must be non-negative, got {}", name, value),
                ))
            }
        }

        positive("sample_rate", self.sample_rate)?;
        positive("template_radius", self.template_radius)?;
        non_negative("min_clearance", self.min_clearance)?;
        non_negative("max_intensity_dist", self.max_intensity_dist)?;
        non_negative("min_skull_width", self.min_skull_width)?;
        positive("max_skull_width", self.max_skull_width)?;
        non_negative("outlier_threshold_stdev", self.outlier_threshold_stdev)?;
        non_negative("outlier_correction_stdev", self.outlier_correction_stdev)?;
        self.kernel.validate()?;

        if self.min_skull_width > self.max_skull_width {
            return Err(ProbeError::invalid_param(
                "min_skull_width",
                format!(
                    "min_skull_width ({}) exceeds max_skull_width ({})",
                    self.min_skull_width, self.max_skull_width
                ),
            ));
        }
        if !(self.min_intensity < self.max_intensity) {
            return Err(ProbeError::invalid_param(
                "min_intensity",
                format!(
                    "min_intensity ({}) must be below max_intensity ({})",
                    self.min_intensity, self.max_intensity
                ),
            ));
        }
        if !(0.0..=1.0).contains(&self.neighbor_weight) {
            return Err(ProbeError::invalid_param(
                "neighbor_weight",
                format!("neighbor_weight must lie in [0, 1], got {}", self.neighbor_weight),
            ));
        }
        if self.resample_count < 3 {
            return Err(ProbeError::invalid_param(
                "resample_count",
                format!("resample_count must be at least 3, got {}", self.resample_count),
            ));
        }
        if self.node_count == 0 {
            return Err(ProbeError::invalid_param("node_count", "node_count must be positive"));
        }
        if self.min_plateau_len == 0 {
            return Err(ProbeError::invalid_param(
                "min_plateau_len",
                "min_plateau_len must be at least 1",
            ));
        }
        if self.ear_nasion.normal.norm_squared() == 0.0 {
            return Err(ProbeError::invalid_param(
                "ear_nasion",
                "ear-nasion plane normal must be non-zero",
            ));
        }
        if self.surfaces.count() == 0 {
            return Err(ProbeError::invalid_param("surfaces", "no output surface selected"));
        }

        Ok(())
    }

    /// Load options from a TOML string.
    pub fn from_toml(toml_str: &str) -> ProbeResult<Self> {
        toml::from_str(toml_str).map_err(|e| ProbeError::config(None, e.to_string()))
    }

    /// Load options from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> ProbeResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ProbeError::io(path, e))?;
        toml::from_str(&contents)
            .map_err(|e| ProbeError::config(Some(path.to_path_buf()), e.to_string()))
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> ProbeResult<String> {
        toml::to_string_pretty(self).map_err(|e| ProbeError::config(None, e.to_string()))
    }

    /// Load options from a JSON string.
    pub fn from_json(json_str: &str) -> ProbeResult<Self> {
        serde_json::from_str(json_str).map_err(|e| ProbeError::config(None, e.to_string()))
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> ProbeResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| ProbeError::config(None, e.to_string()))
    }

    /// Apply a legacy options file.
    ///
    /// Each non-empty line is `name value` or `name = value`; `#` starts a
    /// comment. Only boolean and numeric fields can be assigned, nested ones by
    /// dotted name (`kernel.sigma_normal`, `surfaces.scalp`). Unknown names
    /// are skipped and lines whose value does not parse are logged and skipped,
    /// so one bad line never discards the rest of the file.
    pub fn apply_assignments(&mut self, text: &str) -> ProbeResult<AssignmentReport> {
        let mut report = AssignmentReport::default();
        let mut tree =
            serde_json::to_value(&*self).map_err(|e| ProbeError::config(None, e.to_string()))?;

        for (line_idx, raw) in text.lines().enumerate() {
            let line_no = line_idx + 1;
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let (name, value) = match line.split_once('=') {
                Some((n, v)) => (n.trim(), v.trim()),
                None => match line.split_once(char::is_whitespace) {
                    Some((n, v)) => (n.trim(), v.trim()),
                    None => (line, ""),
                },
            };

            let Some(slot) = field_mut(&mut tree, name) else {
                debug!(name, line = line_no, "Skipping unknown option");
                report.unknown.push(name.to_string());
                continue;
            };

            let parsed = match parse_like(slot, value) {
                Ok(v) => v,
                Err(msg) => {
                    warn!(name, value, line = line_no, "Ignoring option: {}", msg);
                    report.rejected.push((line_no, format!("{}: {}", name, msg)));
                    continue;
                }
            };

            let previous = std::mem::replace(slot, parsed);
            match serde_json::from_value::<ModelOptions>(tree.clone()) {
                Ok(_) => report.assigned.push(name.to_string()),
                Err(e) => {
                    if let Some(slot) = field_mut(&mut tree, name) {
                        *slot = previous;
                    }
                    warn!(name, value, line = line_no, "Ignoring option: {}", e);
                    report.rejected.push((line_no, format!("{}: {}", name, e)));
                }
            }
        }

        *self = serde_json::from_value(tree).map_err(|e| ProbeError::config(None, e.to_string()))?;

        debug!(
            assigned = report.assigned.len(),
            unknown = report.unknown.len(),
            rejected = report.rejected.len(),
            "Applied option assignments"
        );

        Ok(report)
    }
}

/// Primitive (bool or number) field at a dotted path.
fn field_mut<'a>(tree: &'a mut Value, name: &str) -> Option<&'a mut Value> {
    let mut node = tree;
    for part in name.split('.') {
        node = node.as_object_mut()?.get_mut(part)?;
    }
    matches!(node, Value::Bool(_) | Value::Number(_)).then_some(node)
}

fn parse_like(current: &Value, text: &str) -> Result<Value, String> {
    match current {
        Value::Bool(_) => match text.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
            _ => Err(format!("expected a boolean, got `{}`", text)),
        },
        Value::Number(n) if n.is_u64() || n.is_i64() => text
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("expected an integer, got `{}`", text)),
        Value::Number(_) => {
            let v = text
                .parse::<f64>()
                .map_err(|_| format!("expected a number, got `{}`", text))?;
            serde_json::Number::from_f64(v)
                .map(Value::Number)
                .ok_or_else(|| format!("`{}` is not a finite number", text))
        }
        _ => Err("not a primitive field".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        ModelOptions::default().validate().unwrap();
        ModelOptions::for_t1().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let err = ModelOptions::new().with_sample_rate(0.0).validate().unwrap_err();
        assert!(matches!(
            err,
            ProbeError::InvalidOptions { param: Some(ref p), .. } if p == "sample_rate"
        ));

        let err = ModelOptions::new()
            .with_skull_width(8.0, 4.0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("exceeds"));

        let none = OutputSurfaces {
            inner_skull: false,
            outer_skull: false,
            scalp: false,
        };
        assert!(ModelOptions::new().with_surfaces(none).validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_with_partial_input() {
        let opts = ModelOptions::from_toml(
            r#"
            sample_rate = 4.0
            sampling = "gaussian"
            center = [1.0, 2.0, 3.0]

            [surfaces]
            scalp = false
            "#,
        )
        .unwrap();

        assert_eq!(opts.sample_rate, 4.0);
        assert_eq!(opts.sampling, SamplingMode::Gaussian);
        assert_eq!(opts.center, Point3::new(1.0, 2.0, 3.0));
        assert!(!opts.surfaces.scalp);
        assert!(opts.surfaces.inner_skull);
        assert_eq!(opts.resample_count, 100);

        let back = ModelOptions::from_toml(&opts.to_toml().unwrap()).unwrap();
        assert_eq!(back, opts);
    }

    #[test]
    fn test_json_loading() {
        let opts = ModelOptions::from_json(r#"{"min_intensity": 0.3}"#).unwrap();
        assert_eq!(opts.min_intensity, 0.3);
        assert!(ModelOptions::from_json("{").is_err());
    }

    #[test]
    fn test_apply_assignments() {
        let mut opts = ModelOptions::default();
        let report = opts
            .apply_assignments(
                "# legacy options\n\
                 sample_rate 3.5\n\
                 min_plateau_len = 7\n\
                 dump_with_scale true\n\
                 kernel.sigma_normal 2.5   # wider\n\
                 surfaces.scalp = false\n\
                 no_such_option 12\n\
                 resample_count lots\n\
                 node_count -5\n\
                 \n",
            )
            .unwrap();

        assert_eq!(opts.sample_rate, 3.5);
        assert_eq!(opts.min_plateau_len, 7);
        assert!(opts.dump_with_scale);
        assert_eq!(opts.kernel.sigma_normal, 2.5);
        assert!(!opts.surfaces.scalp);
        assert_eq!(opts.resample_count, 100);
        assert_eq!(opts.node_count, 2562);

        assert_eq!(report.assigned.len(), 5);
        assert_eq!(report.unknown, vec!["no_such_option".to_string()]);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(report.rejected[0].0, 8);
    }

    #[test]
    fn test_assignments_skip_non_primitive_fields() {
        let mut opts = ModelOptions::default();
        let report = opts.apply_assignments("center 1 2 3\nchannel t1").unwrap();
        assert_eq!(report.unknown.len(), 2);
        assert_eq!(opts.center, Point3::origin());
    }

    #[test]
    fn test_plane_side() {
        let plane = Plane::default();
        assert!(plane.is_above(&Point3::new(0.0, 0.0, 0.1)));
        assert!(!plane.is_above(&Point3::new(5.0, 5.0, 0.0)));
    }
}

// Allow unused_assignments lint for error struct fields that are used in thiserror Display macros
// but appear as "never read" to the compiler. This is a false positive in newer Rust versions.
#![allow(unused_assignments)]

//! Error types for probing operations with rich diagnostics.
//!
//! Per-vertex geometric failures are not errors: they are recorded as
//! [`RayFailure`](crate::RayFailure) values and counted. Cancellation is not
//! an error either; cancelled operations return `Ok(None)`. What remains here
//! is invalid input, unreadable configuration and unwritable outputs.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias for probing operations.
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Machine-readable error codes for probing operations.
///
/// Codes follow the pattern `PROBE-XXXX` where:
/// - 1xxx = Input validation errors
/// - 2xxx = Computation errors
/// - 3xxx = Output errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeErrorCode {
    /// PROBE-1001: Invalid option value
    InvalidOptions = 1001,
    /// PROBE-1002: Per-vertex array has the wrong length
    LengthMismatch = 1002,
    /// PROBE-1003: Named channel does not exist
    MissingChannel = 1003,
    /// PROBE-1004: Volume has no voxels or no usable data
    EmptyVolume = 1004,
    /// PROBE-1005: Configuration could not be parsed
    Config = 1005,

    /// PROBE-2001: Averaged profile has no usable features
    DegenerateProfile = 2001,
    /// PROBE-2002: Underlying mesh operation failed
    Mesh = 2002,

    /// PROBE-3001: Output could not be written
    Io = 3001,
}

impl ProbeErrorCode {
    /// Returns the error code as a string in the format `PROBE-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeErrorCode::InvalidOptions => "PROBE-1001",
            ProbeErrorCode::LengthMismatch => "PROBE-1002",
            ProbeErrorCode::MissingChannel => "PROBE-1003",
            ProbeErrorCode::EmptyVolume => "PROBE-1004",
            ProbeErrorCode::Config => "PROBE-1005",
            ProbeErrorCode::DegenerateProfile => "PROBE-2001",
            ProbeErrorCode::Mesh => "PROBE-2002",
            ProbeErrorCode::Io => "PROBE-3001",
        }
    }
}

impl std::fmt::Display for ProbeErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recovery suggestions for probing errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeRecoverySuggestion {
    /// Change a named parameter.
    AdjustParameter { name: String, hint: String },
    /// Check the input data.
    CheckInput { what: String },
    /// Check that an output location is writable.
    CheckPath { path: PathBuf },
    /// No specific suggestion.
    None,
}

impl std::fmt::Display for ProbeRecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeRecoverySuggestion::AdjustParameter { name, hint } => {
                write!(f, "Adjust `{}`: {}", name, hint)
            }
            ProbeRecoverySuggestion::CheckInput { what } => write!(f, "Check the {}", what),
            ProbeRecoverySuggestion::CheckPath { path } => {
                write!(f, "Check that {} is writable", path.display())
            }
            ProbeRecoverySuggestion::None => write!(f, "No specific suggestion available"),
        }
    }
}

/// Errors that can occur during probing operations.
#[derive(Debug, Error, Diagnostic)]
pub enum ProbeError {
    /// An option value violates its constraints.
    #[error("invalid options: {details}")]
    #[diagnostic(
        code(probe::options::invalid),
        help("Check parameter values: sample_rate > 0, sigmas > 0, min_skull_width <= max_skull_width")
    )]
    InvalidOptions {
        details: String,
        param: Option<String>,
    },

    /// A per-vertex array does not match the mesh.
    #[error("{what} has {actual} entries, but {expected} were expected")]
    #[diagnostic(
        code(probe::input::length),
        help("Per-vertex arrays must have exactly one entry per mesh vertex.")
    )]
    LengthMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    /// A named volume channel is missing.
    #[error("volume has no channel named `{name}`")]
    #[diagnostic(code(probe::volume::channel))]
    MissingChannel { name: String },

    /// The volume cannot be sampled.
    #[error("volume is empty: {details}")]
    #[diagnostic(
        code(probe::volume::empty),
        help("The volume needs at least one voxel and one finite value.")
    )]
    EmptyVolume { details: String },

    /// The averaged intensity profile has no recognisable structure.
    #[error("degenerate intensity profile: {details}")]
    #[diagnostic(
        code(probe::features::degenerate),
        help(
            "No usable rays or no intensity peak was found. Check the hull placement, center and min_intensity."
        )
    )]
    DegenerateProfile { details: String },

    /// Configuration text could not be parsed.
    #[error("failed to parse configuration: {details}")]
    #[diagnostic(code(probe::config::parse))]
    Config {
        path: Option<PathBuf>,
        details: String,
    },

    /// An output file could not be written (or an input file read).
    #[error("I/O failed for {path}")]
    #[diagnostic(
        code(probe::io::failed),
        help("Check that the directory exists and is writable")
    )]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Underlying mesh error.
    #[error("mesh operation failed: {0}")]
    #[diagnostic(code(probe::mesh::error))]
    Mesh(#[from] cortex_mesh::MeshError),
}

impl ProbeError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ProbeErrorCode {
        match self {
            ProbeError::InvalidOptions { .. } => ProbeErrorCode::InvalidOptions,
            ProbeError::LengthMismatch { .. } => ProbeErrorCode::LengthMismatch,
            ProbeError::MissingChannel { .. } => ProbeErrorCode::MissingChannel,
            ProbeError::EmptyVolume { .. } => ProbeErrorCode::EmptyVolume,
            ProbeError::DegenerateProfile { .. } => ProbeErrorCode::DegenerateProfile,
            ProbeError::Config { .. } => ProbeErrorCode::Config,
            ProbeError::Io { .. } => ProbeErrorCode::Io,
            ProbeError::Mesh(_) => ProbeErrorCode::Mesh,
        }
    }

    /// Returns a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> ProbeRecoverySuggestion {
        match self {
            ProbeError::InvalidOptions {
                param: Some(name),
                details,
            } => ProbeRecoverySuggestion::AdjustParameter {
                name: name.clone(),
                hint: details.clone(),
            },
            ProbeError::InvalidOptions { param: None, .. } => ProbeRecoverySuggestion::None,
            ProbeError::LengthMismatch { what, .. } => ProbeRecoverySuggestion::CheckInput {
                what: what.clone(),
            },
            ProbeError::MissingChannel { .. } => ProbeRecoverySuggestion::CheckInput {
                what: "volume channel names".into(),
            },
            ProbeError::EmptyVolume { .. } => ProbeRecoverySuggestion::CheckInput {
                what: "volume dimensions and data".into(),
            },
            ProbeError::DegenerateProfile { .. } => ProbeRecoverySuggestion::AdjustParameter {
                name: "min_intensity".into(),
                hint: "lower it, or move the center inside the brain".into(),
            },
            ProbeError::Config { .. } => ProbeRecoverySuggestion::CheckInput {
                what: "configuration syntax".into(),
            },
            ProbeError::Io { path, .. } => ProbeRecoverySuggestion::CheckPath { path: path.clone() },
            ProbeError::Mesh(_) => ProbeRecoverySuggestion::CheckInput {
                what: "input mesh".into(),
            },
        }
    }

    /// Create an invalid options error.
    pub fn invalid_options(details: impl Into<String>) -> Self {
        ProbeError::InvalidOptions {
            details: details.into(),
            param: None,
        }
    }

    /// Create an invalid options error naming the offending parameter.
    pub fn invalid_param(param: impl Into<String>, details: impl Into<String>) -> Self {
        ProbeError::InvalidOptions {
            details: details.into(),
            param: Some(param.into()),
        }
    }

    /// Create a length mismatch error.
    pub fn length_mismatch(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        ProbeError::LengthMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }

    /// Create a missing channel error.
    pub fn missing_channel(name: impl Into<String>) -> Self {
        ProbeError::MissingChannel { name: name.into() }
    }

    /// Create an empty volume error.
    pub fn empty_volume(details: impl Into<String>) -> Self {
        ProbeError::EmptyVolume {
            details: details.into(),
        }
    }

    /// Create a degenerate profile error.
    pub fn degenerate_profile(details: impl Into<String>) -> Self {
        ProbeError::DegenerateProfile {
            details: details.into(),
        }
    }

    /// Create a configuration parse error.
    pub fn config(path: Option<PathBuf>, details: impl Into<String>) -> Self {
        ProbeError::Config {
            path,
            details: details.into(),
        }
    }

    /// Create an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProbeError::Io {
            path: path.into(),
            source,
        }
    }
}

//! Error types for mesh operations with rich diagnostics.
//!
//! Each error carries a machine-readable code in the format `MESH-XXXX`:
//! - `MESH-2xxx`: Validation errors (indices, coordinates, array lengths)
//! - `MESH-3xxx`: Construction errors (template generation, ray structures)
//!
//! # Example
//!
//! ```
//! use cortex_mesh::{ErrorCode, MeshError};
//!
//! let err = MeshError::invalid_vertex_index(5, 100, 50);
//! assert_eq!(err.code(), ErrorCode::InvalidVertexIndex);
//! assert_eq!(err.code().as_str(), "MESH-2001");
//! ```

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;

/// Machine-readable error codes for mesh operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// MESH-2001: Face references invalid vertex index
    InvalidVertexIndex = 2001,
    /// MESH-2002: Vertex has NaN or Infinity coordinate
    InvalidCoordinate = 2002,
    /// MESH-2003: Mesh has no vertices or faces
    EmptyMesh = 2003,
    /// MESH-2004: Per-vertex array does not match the vertex count
    LengthMismatch = 2004,

    /// MESH-3001: Template construction failed
    TemplateFailed = 3001,
}

impl ErrorCode {
    /// Returns the error code as a string in the format `MESH-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidVertexIndex => "MESH-2001",
            ErrorCode::InvalidCoordinate => "MESH-2002",
            ErrorCode::EmptyMesh => "MESH-2003",
            ErrorCode::LengthMismatch => "MESH-2004",
            ErrorCode::TemplateFailed => "MESH-3001",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur during mesh operations.
#[derive(Debug, Error, Diagnostic)]
pub enum MeshError {
    /// Empty mesh (no vertices or faces).
    #[error("mesh is empty: {details}")]
    #[diagnostic(
        code(mesh::validation::empty),
        help("The mesh must have at least one vertex and one face.")
    )]
    EmptyMesh { details: String },

    /// Invalid vertex index in face data.
    #[error(
        "invalid vertex index: face {face} references vertex {index}, but mesh only has {vertex_count} vertices"
    )]
    #[diagnostic(
        code(mesh::validation::vertex_index),
        help("Check that face indices are zero-based and within range.")
    )]
    InvalidVertexIndex {
        face: usize,
        index: u32,
        vertex_count: usize,
    },

    /// Invalid coordinate value (NaN or Infinity).
    #[error("invalid coordinate at vertex {vertex}: {coordinate} is {value}")]
    #[diagnostic(
        code(mesh::validation::coordinate),
        help("Check for numerical issues in the source data.")
    )]
    InvalidCoordinate {
        vertex: usize,
        coordinate: &'static str,
        value: f64,
    },

    /// A per-vertex array has the wrong length.
    #[error("{what} has {actual} entries, but the mesh has {expected} vertices")]
    #[diagnostic(
        code(mesh::validation::length),
        help("Per-vertex arrays must have exactly one entry per mesh vertex.")
    )]
    LengthMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    /// Template surface could not be built.
    #[error("template construction failed: {details}")]
    #[diagnostic(code(mesh::template::failed))]
    TemplateFailed { details: String },
}

impl MeshError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            MeshError::EmptyMesh { .. } => ErrorCode::EmptyMesh,
            MeshError::InvalidVertexIndex { .. } => ErrorCode::InvalidVertexIndex,
            MeshError::InvalidCoordinate { .. } => ErrorCode::InvalidCoordinate,
            MeshError::LengthMismatch { .. } => ErrorCode::LengthMismatch,
            MeshError::TemplateFailed { .. } => ErrorCode::TemplateFailed,
        }
    }

    /// Create an InvalidVertexIndex error.
    pub fn invalid_vertex_index(face: usize, index: u32, vertex_count: usize) -> Self {
        MeshError::InvalidVertexIndex {
            face,
            index,
            vertex_count,
        }
    }

    /// Create an InvalidCoordinate error.
    pub fn invalid_coordinate(vertex: usize, coordinate: &'static str, value: f64) -> Self {
        MeshError::InvalidCoordinate {
            vertex,
            coordinate,
            value,
        }
    }

    /// Create an EmptyMesh error.
    pub fn empty_mesh(details: impl Into<String>) -> Self {
        MeshError::EmptyMesh {
            details: details.into(),
        }
    }

    /// Create a LengthMismatch error.
    pub fn length_mismatch(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        MeshError::LengthMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }

    /// Create a TemplateFailed error.
    pub fn template_failed(details: impl Into<String>) -> Self {
        MeshError::TemplateFailed {
            details: details.into(),
        }
    }
}

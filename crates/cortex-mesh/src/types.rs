//! Core mesh data types.

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MeshError, MeshResult};

/// A mesh vertex.
///
/// Coordinates are physical units (millimetres for head images) but the
/// library itself is unit-agnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    /// 3D position.
    pub position: Point3<f64>,

    /// Unit outward normal, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normal: Option<Vector3<f64>>,
}

impl Vertex {
    /// Create a new vertex with only position set.
    #[inline]
    pub fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            normal: None,
        }
    }

    /// Create a vertex from raw coordinates.
    #[inline]
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Self::new(Point3::new(x, y, z))
    }

    /// Create a vertex with a precomputed normal.
    #[inline]
    pub fn with_normal(position: Point3<f64>, normal: Vector3<f64>) -> Self {
        Self {
            position,
            normal: Some(normal),
        }
    }
}

/// A triangle mesh with indexed vertices and faces.
///
/// The vertex count of a mesh is fixed for the duration of any probing
/// operation; every per-vertex array handed to the engine must match it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    /// Vertex data.
    pub vertices: Vec<Vertex>,

    /// Triangle faces as indices into the vertex array.
    /// Each face is [v0, v1, v2] with counter-clockwise winding seen from outside.
    pub faces: Vec<[u32; 3]>,
}

impl Mesh {
    /// Create a new empty mesh.
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
        }
    }

    /// Create a mesh with pre-allocated capacity.
    pub fn with_capacity(vertex_count: usize, face_count: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertex_count),
            faces: Vec::with_capacity(face_count),
        }
    }

    /// Number of vertices in the mesh.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of faces (triangles) in the mesh.
    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Check if mesh is empty (no vertices or faces).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.faces.is_empty()
    }

    /// Position of vertex `idx`.
    #[inline]
    pub fn position(&self, idx: usize) -> Point3<f64> {
        self.vertices[idx].position
    }

    /// Move vertex `idx`. Any stored normal is left untouched.
    #[inline]
    pub fn set_position(&mut self, idx: usize, position: Point3<f64>) {
        self.vertices[idx].position = position;
    }

    /// All vertex positions in order.
    pub fn positions(&self) -> Vec<Point3<f64>> {
        self.vertices.iter().map(|v| v.position).collect()
    }

    /// Build a mesh with this mesh's faces and new vertex positions.
    ///
    /// # Errors
    /// Returns [`MeshError::LengthMismatch`] when `positions` does not have
    /// one entry per vertex.
    pub fn with_positions(&self, positions: &[Point3<f64>]) -> MeshResult<Mesh> {
        if positions.len() != self.vertices.len() {
            return Err(MeshError::length_mismatch(
                "positions",
                self.vertices.len(),
                positions.len(),
            ));
        }

        Ok(Mesh {
            vertices: positions.iter().map(|&p| Vertex::new(p)).collect(),
            faces: self.faces.clone(),
        })
    }

    /// Compute the axis-aligned bounding box.
    /// Returns (min_corner, max_corner) or None if mesh is empty.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = self.vertices.first()?;
        let mut min = first.position;
        let mut max = first.position;

        for vertex in &self.vertices[1..] {
            let p = &vertex.position;
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            min.z = min.z.min(p.z);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            max.z = max.z.max(p.z);
        }

        Some((min, max))
    }

    /// Mean vertex position, or None for a mesh without vertices.
    pub fn centroid(&self) -> Option<Point3<f64>> {
        if self.vertices.is_empty() {
            return None;
        }
        let sum = self
            .vertices
            .iter()
            .fold(Vector3::zeros(), |acc, v| acc + v.position.coords);
        Some(Point3::from(sum / self.vertices.len() as f64))
    }

    /// Iterate over triangles, yielding Triangle structs with actual vertex data.
    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        self.faces.iter().map(|&[i0, i1, i2]| Triangle {
            v0: self.vertices[i0 as usize].position,
            v1: self.vertices[i1 as usize].position,
            v2: self.vertices[i2 as usize].position,
        })
    }

    /// Get a specific triangle by face index.
    pub fn triangle(&self, face_idx: usize) -> Option<Triangle> {
        self.faces.get(face_idx).map(|&[i0, i1, i2]| Triangle {
            v0: self.vertices[i0 as usize].position,
            v1: self.vertices[i1 as usize].position,
            v2: self.vertices[i2 as usize].position,
        })
    }

    /// Check that coordinates are finite and every face references an
    /// existing vertex.
    pub fn check(&self) -> MeshResult<()> {
        let n = self.vertices.len();
        for (i, vertex) in self.vertices.iter().enumerate() {
            let p = vertex.position;
            for (name, value) in [("x", p.x), ("y", p.y), ("z", p.z)] {
                if !value.is_finite() {
                    return Err(MeshError::invalid_coordinate(i, name, value));
                }
            }
        }
        for (face_idx, face) in self.faces.iter().enumerate() {
            for &index in face {
                if index as usize >= n {
                    return Err(MeshError::invalid_vertex_index(face_idx, index, n));
                }
            }
        }
        Ok(())
    }

    /// Translate every vertex by `offset`.
    pub fn translate(&mut self, offset: Vector3<f64>) {
        for vertex in &mut self.vertices {
            vertex.position += offset;
        }
    }

    /// Uniformly scale the mesh about the origin.
    pub fn scale(&mut self, factor: f64) {
        for vertex in &mut self.vertices {
            vertex.position.coords *= factor;
        }
    }

    /// Per-vertex unit normals.
    ///
    /// Stored normals are used where present; the rest are the area-weighted
    /// average of adjacent face normals. Vertices that belong to no
    /// non-degenerate face get a zero vector.
    pub fn vertex_normals(&self) -> Vec<Vector3<f64>> {
        let needs_compute = self.vertices.iter().any(|v| v.normal.is_none());
        let computed = if needs_compute {
            area_weighted_normals(self)
        } else {
            Vec::new()
        };

        self.vertices
            .iter()
            .enumerate()
            .map(|(idx, v)| match v.normal {
                Some(n) => n,
                None => computed[idx],
            })
            .collect()
    }

    /// Recompute and store area-weighted vertex normals.
    pub fn compute_vertex_normals(&mut self) {
        let normals = area_weighted_normals(self);
        for (vertex, normal) in self.vertices.iter_mut().zip(normals) {
            vertex.normal = if normal.norm_squared() > 0.0 {
                Some(normal)
            } else {
                None
            };
        }

        debug!(vertices = self.vertices.len(), "Computed vertex normals");
    }
}

impl Default for Mesh {
    fn default() -> Self {
        Self::new()
    }
}

fn area_weighted_normals(mesh: &Mesh) -> Vec<Vector3<f64>> {
    let mut accum: Vec<Vector3<f64>> = vec![Vector3::zeros(); mesh.vertices.len()];

    for (face, tri) in mesh.faces.iter().zip(mesh.triangles()) {
        // Unnormalized normal has length 2*area, which gives the area weighting.
        let weighted = tri.normal_unnormalized();
        for &idx in face {
            accum[idx as usize] += weighted;
        }
    }

    for n in &mut accum {
        let len_sq = n.norm_squared();
        if len_sq > f64::EPSILON {
            *n /= len_sq.sqrt();
        } else {
            *n = Vector3::zeros();
        }
    }

    accum
}

/// A triangle with concrete vertex positions.
///
/// Winding is counter-clockwise when viewed from the front (normal points
/// toward viewer).
#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    pub v0: Point3<f64>,
    pub v1: Point3<f64>,
    pub v2: Point3<f64>,
}

impl Triangle {
    /// Create a new triangle from three points.
    #[inline]
    pub fn new(v0: Point3<f64>, v1: Point3<f64>, v2: Point3<f64>) -> Self {
        Self { v0, v1, v2 }
    }

    /// Compute the (unnormalized) face normal via cross product.
    #[inline]
    pub fn normal_unnormalized(&self) -> Vector3<f64> {
        let e1 = self.v1 - self.v0;
        let e2 = self.v2 - self.v0;
        e1.cross(&e2)
    }

    /// Compute the unit face normal.
    /// Returns None for degenerate triangles (zero area).
    pub fn normal(&self) -> Option<Vector3<f64>> {
        let n = self.normal_unnormalized();
        let len_sq = n.norm_squared();
        if len_sq > f64::EPSILON {
            Some(n / len_sq.sqrt())
        } else {
            None
        }
    }

    /// Compute the area of the triangle.
    #[inline]
    pub fn area(&self) -> f64 {
        self.normal_unnormalized().norm() * 0.5
    }

    /// Compute the centroid.
    #[inline]
    pub fn centroid(&self) -> Point3<f64> {
        Point3::new(
            (self.v0.x + self.v1.x + self.v2.x) / 3.0,
            (self.v0.y + self.v1.y + self.v2.y) / 3.0,
            (self.v0.z + self.v1.z + self.v2.z) / 3.0,
        )
    }
}

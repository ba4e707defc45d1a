//! Geodesic template spheres.
//!
//! The probing pipeline deforms a closed spherical template. Subdividing an
//! icosahedron gives near-uniform vertex spacing, with `10 * 4^k + 2`
//! vertices at level `k`.

use hashbrown::HashMap;
use nalgebra::{Point3, Vector3};
use tracing::debug;

use crate::error::{MeshError, MeshResult};
use crate::{Mesh, Vertex};

/// Deepest subdivision level `template_sphere` will build (163842 vertices).
pub const MAX_SUBDIVISIONS: u32 = 7;

/// Vertex count of an icosphere at the given subdivision level.
#[inline]
pub fn icosphere_vertex_count(subdivisions: u32) -> usize {
    10 * 4usize.pow(subdivisions) + 2
}

/// Unit icosphere centred at the origin, faces wound counter-clockwise seen
/// from outside.
pub fn icosphere(subdivisions: u32) -> Mesh {
    let mut mesh = Mesh::with_capacity(
        icosphere_vertex_count(subdivisions),
        20 * 4usize.pow(subdivisions),
    );

    let phi = (1.0 + 5.0_f64.sqrt()) / 2.0;
    let a = 1.0;
    let b = 1.0 / phi;

    let ico_verts = [
        [0.0, b, -a],
        [b, a, 0.0],
        [-b, a, 0.0],
        [0.0, b, a],
        [0.0, -b, a],
        [-a, 0.0, b],
        [0.0, -b, -a],
        [a, 0.0, -b],
        [a, 0.0, b],
        [-a, 0.0, -b],
        [b, -a, 0.0],
        [-b, -a, 0.0],
    ];

    for v in &ico_verts {
        let p = Vector3::new(v[0], v[1], v[2]).normalize();
        mesh.vertices.push(Vertex::from_coords(p.x, p.y, p.z));
    }

    mesh.faces.extend_from_slice(&[
        [0, 2, 1],
        [3, 1, 2],
        [3, 5, 4],
        [3, 4, 8],
        [0, 7, 6],
        [0, 6, 9],
        [4, 11, 10],
        [6, 10, 11],
        [2, 9, 5],
        [11, 5, 9],
        [1, 8, 7],
        [10, 7, 8],
        [3, 2, 5],
        [3, 8, 1],
        [0, 9, 2],
        [0, 1, 7],
        [6, 11, 9],
        [6, 7, 10],
        [4, 5, 11],
        [4, 10, 8],
    ]);

    for _ in 0..subdivisions {
        mesh = subdivide_on_sphere(&mesh);
    }

    mesh
}

/// Split each face into four, pushing new midpoints onto the unit sphere.
fn subdivide_on_sphere(mesh: &Mesh) -> Mesh {
    let mut out = Mesh::with_capacity(
        mesh.vertex_count() + mesh.face_count() * 3 / 2,
        mesh.face_count() * 4,
    );
    out.vertices = mesh.vertices.clone();

    let mut midpoints: HashMap<(u32, u32), u32> = HashMap::new();
    let mut midpoint = |v1: u32, v2: u32, vertices: &mut Vec<Vertex>| -> u32 {
        let key = if v1 < v2 { (v1, v2) } else { (v2, v1) };
        if let Some(&idx) = midpoints.get(&key) {
            return idx;
        }

        let p1 = vertices[v1 as usize].position.coords;
        let p2 = vertices[v2 as usize].position.coords;
        let m = ((p1 + p2) * 0.5).normalize();

        let idx = vertices.len() as u32;
        vertices.push(Vertex::from_coords(m.x, m.y, m.z));
        midpoints.insert(key, idx);
        idx
    };

    for &[v0, v1, v2] in &mesh.faces {
        let m01 = midpoint(v0, v1, &mut out.vertices);
        let m12 = midpoint(v1, v2, &mut out.vertices);
        let m20 = midpoint(v2, v0, &mut out.vertices);

        out.faces.push([v0, m01, m20]);
        out.faces.push([v1, m12, m01]);
        out.faces.push([v2, m20, m12]);
        out.faces.push([m01, m12, m20]);
    }

    out
}

/// Smallest icosphere with at least `node_count` vertices, scaled to
/// `radius` and centred on `center`.
pub fn template_sphere(center: Point3<f64>, radius: f64, node_count: usize) -> MeshResult<Mesh> {
    if !(radius.is_finite() && radius > 0.0) {
        return Err(MeshError::template_failed(format!(
            "radius must be positive, got {}",
            radius
        )));
    }

    let level = (0..=MAX_SUBDIVISIONS)
        .find(|&k| icosphere_vertex_count(k) >= node_count)
        .ok_or_else(|| {
            MeshError::template_failed(format!(
                "{} nodes requested, at most {} supported",
                node_count,
                icosphere_vertex_count(MAX_SUBDIVISIONS)
            ))
        })?;

    let mut mesh = icosphere(level);
    mesh.scale(radius);
    mesh.translate(center.coords);

    debug!(
        level,
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        radius,
        "Built template sphere"
    );

    Ok(mesh)
}

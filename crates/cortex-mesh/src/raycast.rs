//! Ray–mesh intersection.
//!
//! [`RayCaster`] builds a bounding volume hierarchy over a mesh's faces once
//! and answers nearest-hit queries from many threads.

use nalgebra::{Point3, Vector3};
use tracing::debug;

use crate::error::{MeshError, MeshResult};
use crate::{Mesh, Triangle};

const EPSILON: f64 = 1e-10;

/// Barycentric slack so rays through shared edges and vertices still hit.
const BARYCENTRIC_EPSILON: f64 = 1e-9;

/// Nearest intersection of a ray with a mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// Distance along the (normalised) ray direction.
    pub distance: f64,
    /// World-space hit point.
    pub point: Point3<f64>,
    /// Index of the face that was hit.
    pub face: usize,
}

#[derive(Debug, Clone, Copy)]
struct Aabb {
    min: Point3<f64>,
    max: Point3<f64>,
}

impl Aabb {
    fn from_triangle(tri: &Triangle) -> Self {
        let min = Point3::new(
            tri.v0.x.min(tri.v1.x).min(tri.v2.x),
            tri.v0.y.min(tri.v1.y).min(tri.v2.y),
            tri.v0.z.min(tri.v1.z).min(tri.v2.z),
        );
        let max = Point3::new(
            tri.v0.x.max(tri.v1.x).max(tri.v2.x),
            tri.v0.y.max(tri.v1.y).max(tri.v2.y),
            tri.v0.z.max(tri.v1.z).max(tri.v2.z),
        );
        Self { min, max }
    }

    fn union(&self, other: &Aabb) -> Self {
        Self {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    fn expand(&self, epsilon: f64) -> Self {
        let e = Vector3::repeat(epsilon);
        Self {
            min: self.min - e,
            max: self.max + e,
        }
    }

    /// Slab test. Returns the entry distance, clamped to zero.
    ///
    /// An axis the ray runs parallel to only constrains the origin, so a ray
    /// lying in a slab plane is never rejected through `0 * inf`.
    fn ray_entry(&self, origin: &Point3<f64>, dir_inv: &Vector3<f64>) -> Option<f64> {
        let mut t_min = 0.0_f64;
        let mut t_max = f64::INFINITY;

        for axis in 0..3 {
            let (lo, hi, o, inv) = (self.min[axis], self.max[axis], origin[axis], dir_inv[axis]);
            if inv.is_infinite() {
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }
            let (t1, t2) = ((lo - o) * inv, (hi - o) * inv);
            t_min = t_min.max(t1.min(t2));
            t_max = t_max.min(t1.max(t2));
            if t_max < t_min {
                return None;
            }
        }

        Some(t_min)
    }
}

#[derive(Debug)]
enum BvhNode {
    Leaf {
        aabb: Aabb,
        face: usize,
    },
    Internal {
        aabb: Aabb,
        left: Box<BvhNode>,
        right: Box<BvhNode>,
    },
}

impl BvhNode {
    fn build(triangles: &[Triangle], indices: &mut [usize]) -> Option<Self> {
        match indices {
            [] => None,
            [idx] => Some(BvhNode::Leaf {
                aabb: Aabb::from_triangle(&triangles[*idx]).expand(EPSILON),
                face: *idx,
            }),
            _ => {
                let aabb = indices[1..]
                    .iter()
                    .fold(Aabb::from_triangle(&triangles[indices[0]]), |acc, &i| {
                        acc.union(&Aabb::from_triangle(&triangles[i]))
                    })
                    .expand(EPSILON);

                // Split on the longest axis at the median centroid.
                let extent = aabb.max - aabb.min;
                let axis = extent.imax();
                indices.sort_by(|&a, &b| {
                    let ca = triangles[a].centroid()[axis];
                    let cb = triangles[b].centroid()[axis];
                    ca.total_cmp(&cb)
                });

                let mid = indices.len() / 2;
                let (left_indices, right_indices) = indices.split_at_mut(mid);
                let left = BvhNode::build(triangles, left_indices);
                let right = BvhNode::build(triangles, right_indices);

                match (left, right) {
                    (Some(l), Some(r)) => Some(BvhNode::Internal {
                        aabb,
                        left: Box::new(l),
                        right: Box::new(r),
                    }),
                    (Some(n), None) | (None, Some(n)) => Some(n),
                    (None, None) => None,
                }
            }
        }
    }

    fn aabb(&self) -> &Aabb {
        match self {
            BvhNode::Leaf { aabb, .. } => aabb,
            BvhNode::Internal { aabb, .. } => aabb,
        }
    }
}

/// Möller–Trumbore ray-triangle intersection.
/// Returns the distance t along the ray if intersection occurs.
pub fn ray_triangle_intersect(
    origin: &Point3<f64>,
    direction: &Vector3<f64>,
    tri: &Triangle,
) -> Option<f64> {
    let edge1 = tri.v1 - tri.v0;
    let edge2 = tri.v2 - tri.v0;

    let h = direction.cross(&edge2);
    let a = edge1.dot(&h);

    // Ray is parallel to triangle
    if a.abs() < EPSILON {
        return None;
    }

    let f = 1.0 / a;
    let s = origin - tri.v0;
    let u = f * s.dot(&h);

    if !(-BARYCENTRIC_EPSILON..=1.0 + BARYCENTRIC_EPSILON).contains(&u) {
        return None;
    }

    let q = s.cross(&edge1);
    let v = f * direction.dot(&q);

    if v < -BARYCENTRIC_EPSILON || u + v > 1.0 + BARYCENTRIC_EPSILON {
        return None;
    }

    let t = f * edge2.dot(&q);

    if t > EPSILON { Some(t) } else { None }
}

/// Nearest-hit ray queries against a fixed mesh.
#[derive(Debug)]
pub struct RayCaster {
    triangles: Vec<Triangle>,
    root: BvhNode,
}

impl RayCaster {
    /// Build the acceleration structure for `mesh`.
    ///
    /// # Errors
    /// Returns [`MeshError::EmptyMesh`] for a mesh without faces and
    /// [`MeshError::InvalidVertexIndex`] for out-of-range face indices.
    pub fn new(mesh: &Mesh) -> MeshResult<Self> {
        if mesh.is_empty() {
            return Err(MeshError::empty_mesh("cannot cast rays against an empty surface"));
        }
        mesh.check()?;

        let triangles: Vec<Triangle> = mesh.triangles().collect();
        let mut indices: Vec<usize> = (0..triangles.len()).collect();
        let root = BvhNode::build(&triangles, &mut indices)
            .ok_or_else(|| MeshError::empty_mesh("no faces to index"))?;

        debug!(faces = triangles.len(), "Built ray-casting hierarchy");

        Ok(Self { triangles, root })
    }

    /// Number of indexed faces.
    pub fn face_count(&self) -> usize {
        self.triangles.len()
    }

    /// Nearest intersection of the ray `origin + t * direction`, `t > 0`.
    ///
    /// `direction` need not be normalised; the returned distance is measured
    /// along its normalised form. Returns None for a zero direction.
    pub fn cast(&self, origin: &Point3<f64>, direction: &Vector3<f64>) -> Option<RayHit> {
        let dir = direction.try_normalize(EPSILON)?;
        let dir_inv = Vector3::new(1.0 / dir.x, 1.0 / dir.y, 1.0 / dir.z);

        let mut best: Option<(f64, usize)> = None;
        self.trace(&self.root, origin, &dir, &dir_inv, &mut best);

        best.map(|(distance, face)| RayHit {
            distance,
            point: origin + dir * distance,
            face,
        })
    }

    fn trace(
        &self,
        node: &BvhNode,
        origin: &Point3<f64>,
        dir: &Vector3<f64>,
        dir_inv: &Vector3<f64>,
        best: &mut Option<(f64, usize)>,
    ) {
        let Some(t_near) = node.aabb().ray_entry(origin, dir_inv) else {
            return;
        };
        if let Some((best_t, _)) = *best
            && t_near > best_t
        {
            return;
        }

        match node {
            BvhNode::Leaf { face, .. } => {
                if let Some(t) = ray_triangle_intersect(origin, dir, &self.triangles[*face])
                    && best.is_none_or(|(best_t, _)| t < best_t)
                {
                    *best = Some((t, *face));
                }
            }
            BvhNode::Internal { left, right, .. } => {
                self.trace(left, origin, dir, dir_inv, best);
                self.trace(right, origin, dir, dir_inv, best);
            }
        }
    }
}

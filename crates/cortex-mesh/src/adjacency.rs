//! Vertex and edge adjacency for triangle meshes.

use hashbrown::HashMap;

use crate::Mesh;

/// Edge and vertex-neighbour tables for a mesh.
///
/// Edges are keyed by `(min, max)` vertex index. Neighbour lists are sorted
/// ascending and contain each adjacent vertex once.
#[derive(Debug, Clone)]
pub struct MeshAdjacency {
    /// Faces incident to each undirected edge.
    pub edge_to_faces: HashMap<(u32, u32), Vec<u32>>,

    /// Vertices that share an edge with each vertex.
    pub vertex_neighbors: Vec<Vec<u32>>,

    /// Faces incident to each vertex.
    pub vertex_faces: Vec<Vec<u32>>,
}

impl MeshAdjacency {
    /// Build adjacency tables for `mesh`.
    pub fn build(mesh: &Mesh) -> Self {
        let mut edge_to_faces: HashMap<(u32, u32), Vec<u32>> = HashMap::new();
        let mut vertex_neighbors: Vec<Vec<u32>> = vec![Vec::new(); mesh.vertex_count()];
        let mut vertex_faces: Vec<Vec<u32>> = vec![Vec::new(); mesh.vertex_count()];

        for (face_idx, &[a, b, c]) in mesh.faces.iter().enumerate() {
            for v in [a, b, c] {
                vertex_faces[v as usize].push(face_idx as u32);
            }
            for (v0, v1) in [(a, b), (b, c), (c, a)] {
                let key = if v0 < v1 { (v0, v1) } else { (v1, v0) };
                edge_to_faces.entry(key).or_default().push(face_idx as u32);
            }
        }

        for &(v0, v1) in edge_to_faces.keys() {
            vertex_neighbors[v0 as usize].push(v1);
            vertex_neighbors[v1 as usize].push(v0);
        }
        for list in &mut vertex_neighbors {
            list.sort_unstable();
        }

        Self {
            edge_to_faces,
            vertex_neighbors,
            vertex_faces,
        }
    }

    /// Neighbours of vertex `v`.
    #[inline]
    pub fn neighbors(&self, v: usize) -> &[u32] {
        &self.vertex_neighbors[v]
    }

    /// Faces that use vertex `v`.
    #[inline]
    pub fn faces_of(&self, v: usize) -> &[u32] {
        &self.vertex_faces[v]
    }

    /// Number of vertices covered by the table.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertex_neighbors.len()
    }

    /// Edges used by exactly one face.
    pub fn boundary_edge_count(&self) -> usize {
        self.edge_to_faces.values().filter(|f| f.len() == 1).count()
    }

    /// Edges used by more than two faces.
    pub fn non_manifold_edge_count(&self) -> usize {
        self.edge_to_faces.values().filter(|f| f.len() > 2).count()
    }

    /// True when every edge is shared by exactly two faces.
    pub fn is_watertight(&self) -> bool {
        self.edge_to_faces.values().all(|f| f.len() == 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vertex;

    fn tetrahedron() -> Mesh {
        let mut mesh = Mesh::new();
        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(0.0, 1.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 1.0));
        mesh.faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [0, 3, 2]];
        mesh
    }

    #[test]
    fn test_tetrahedron_is_closed() {
        let adj = MeshAdjacency::build(&tetrahedron());
        assert_eq!(adj.edge_to_faces.len(), 6);
        assert!(adj.is_watertight());
        assert_eq!(adj.boundary_edge_count(), 0);
        assert_eq!(adj.non_manifold_edge_count(), 0);
    }

    #[test]
    fn test_neighbors_sorted_and_unique() {
        let adj = MeshAdjacency::build(&tetrahedron());
        assert_eq!(adj.neighbors(0), &[1, 2, 3]);
        assert_eq!(adj.neighbors(3), &[0, 1, 2]);
        assert_eq!(adj.faces_of(0), &[0, 1, 3]);
    }

    #[test]
    fn test_open_mesh_has_boundary() {
        let mut mesh = tetrahedron();
        mesh.faces.pop();
        let adj = MeshAdjacency::build(&mesh);
        assert_eq!(adj.boundary_edge_count(), 3);
        assert!(!adj.is_watertight());
    }

    #[test]
    fn test_isolated_vertex_has_no_neighbors() {
        let mut mesh = tetrahedron();
        mesh.vertices.push(Vertex::from_coords(5.0, 5.0, 5.0));
        let adj = MeshAdjacency::build(&mesh);
        assert!(adj.neighbors(4).is_empty());
    }
}

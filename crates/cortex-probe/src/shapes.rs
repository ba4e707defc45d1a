//! Named collection of output meshes.

use cortex_mesh::Mesh;
use serde::{Deserialize, Serialize};

/// A mesh with a name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedMesh {
    pub name: String,
    pub mesh: Mesh,
}

/// Ordered set of output meshes. Reconstruction appends to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShapeSet {
    shapes: Vec<NamedMesh>,
}

impl ShapeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mesh. Names need not be unique.
    pub fn push(&mut self, name: impl Into<String>, mesh: Mesh) {
        self.shapes.push(NamedMesh {
            name: name.into(),
            mesh,
        });
    }

    /// Most recently added mesh with this name.
    pub fn get(&self, name: &str) -> Option<&Mesh> {
        self.shapes.iter().rev().find(|s| s.name == name).map(|s| &s.mesh)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.shapes.iter().map(|s| s.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedMesh> {
        self.shapes.iter()
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_get() {
        let mut set = ShapeSet::new();
        assert!(set.is_empty());
        set.push("scalp", Mesh::new());
        let mut second = Mesh::new();
        second.vertices.push(cortex_mesh::Vertex::from_coords(1.0, 0.0, 0.0));
        set.push("scalp", second);

        assert_eq!(set.len(), 2);
        assert_eq!(set.get("scalp").unwrap().vertex_count(), 1);
        assert!(set.get("inner_skull").is_none());
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["scalp", "scalp"]);
    }
}

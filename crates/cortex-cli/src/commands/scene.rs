//! JSON scene files: volumes, meshes, value arrays and shape sets.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use cortex_mesh::{Mesh, log_io_operation};
use cortex_probe::Volume;
use serde::Serialize;
use serde::de::DeserializeOwned;

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let file = File::open(path).with_context(|| format!("Failed to open {} {:?}", what, path))?;
    let value = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse {} from {:?}", what, path))?;
    log_io_operation(&format!("read {}", what), path, true);
    Ok(value)
}

/// Write any serialisable value as JSON.
pub fn write_json<T: Serialize>(value: &T, path: &Path, what: &str) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer(&mut out, value).with_context(|| format!("Failed to write {} to {:?}", what, path))?;
    out.flush().with_context(|| format!("Failed to write {} to {:?}", what, path))?;
    log_io_operation(&format!("write {}", what), path, true);
    Ok(())
}

/// Load and validate a volume.
pub fn load_volume(path: &Path) -> Result<Volume> {
    let volume: Volume = read_json(path, "volume")?;
    volume
        .validate()
        .with_context(|| format!("Invalid volume in {:?}", path))?;
    Ok(volume)
}

/// Load a mesh.
pub fn load_mesh(path: &Path) -> Result<Mesh> {
    let mesh: Mesh = read_json(path, "mesh")?;
    if mesh.vertex_count() == 0 {
        anyhow::bail!("Mesh in {:?} has no vertices", path);
    }
    mesh.check().with_context(|| format!("Invalid mesh in {:?}", path))?;
    Ok(mesh)
}

/// Load a per-vertex value array.
pub fn load_values(path: &Path) -> Result<Vec<f64>> {
    read_json(path, "values")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_mesh::template_sphere;
    use nalgebra::Point3;
    use tempfile::TempDir;

    #[test]
    fn test_scene_files_load_back() {
        let dir = TempDir::new().unwrap();

        let mut volume = Volume::isotropic([4, 4, 4], Point3::origin(), 2.0).unwrap();
        volume.add_channel_fn("t1", |p| p.x).unwrap();
        let volume_path = dir.path().join("volume.json");
        write_json(&volume, &volume_path, "volume").unwrap();
        let loaded = load_volume(&volume_path).unwrap();
        assert_eq!(loaded.dims, [4, 4, 4]);
        assert_eq!(loaded.channel("t1").unwrap(), volume.channel("t1").unwrap());

        let mesh = template_sphere(Point3::origin(), 1.0, 42).unwrap();
        let mesh_path = dir.path().join("mesh.json");
        write_json(&mesh, &mesh_path, "mesh").unwrap();
        assert_eq!(load_mesh(&mesh_path).unwrap().vertex_count(), 42);
    }

    #[test]
    fn test_bad_volume_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("volume.json");
        std::fs::write(
            &path,
            r#"{"dims":[2,2,2],"origin":[0,0,0],"spacing":[1,1,1],"channels":[{"name":"t1","data":[1,2,3]}]}"#,
        )
        .unwrap();
        assert!(load_volume(&path).is_err());
        assert!(load_mesh(&dir.path().join("missing.json")).is_err());
    }
}

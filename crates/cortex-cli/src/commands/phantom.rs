//! cortex phantom command - write a synthetic head.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use cortex_mesh::template_sphere;
use cortex_probe::Volume;
use nalgebra::Point3;
use serde::Serialize;

use super::scene;
use crate::{Cli, OutputFormat, output};

const BRAIN_INTENSITY: f64 = 0.5;
const SKULL_INTENSITY: f64 = 0.05;
const SCALP_INTENSITY: f64 = 1.0;

/// Shell geometry of the phantom.
pub struct PhantomShells {
    pub size: usize,
    pub voxel: f64,
    pub brain: f64,
    pub skull: f64,
    pub scalp: f64,
    pub hull_nodes: usize,
}

#[derive(Serialize)]
struct PhantomResult {
    output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hull: Option<String>,
    dims: [usize; 3],
    voxel_size: f64,
    inner_skull_radius: f64,
    outer_skull_radius: f64,
    scalp_radius: f64,
}

/// Volume centred on the origin with brain, skull and scalp shells.
fn build_volume(shells: &PhantomShells) -> Result<Volume> {
    let half = shells.size as f64 * shells.voxel / 2.0;
    let mut volume = Volume::isotropic([shells.size; 3], Point3::new(-half, -half, -half), shells.voxel)?;

    let skull = shells.brain + shells.skull;
    let scalp = skull + shells.scalp;
    let brain = shells.brain;
    volume.add_channel_fn("t1", move |p| {
        let r = p.coords.norm();
        if r < brain {
            BRAIN_INTENSITY
        } else if r < skull {
            SKULL_INTENSITY
        } else if r < scalp {
            SCALP_INTENSITY
        } else {
            0.0
        }
    })?;
    Ok(volume)
}

pub fn run(output_path: &Path, hull_path: Option<&Path>, shells: &PhantomShells, cli: &Cli) -> Result<()> {
    let scalp_radius = shells.brain + shells.skull + shells.scalp;
    if scalp_radius * 2.0 >= shells.size as f64 * shells.voxel {
        anyhow::bail!(
            "Scalp diameter {:.1}mm does not fit in a {}-voxel grid of {:.2}mm voxels",
            scalp_radius * 2.0,
            shells.size,
            shells.voxel
        );
    }

    output::info(
        &format!("Building {}^3 phantom...", shells.size),
        cli.format,
        cli.quiet,
    );
    let volume = build_volume(shells).context("Failed to build phantom volume")?;
    scene::write_json(&volume, output_path, "volume")?;

    if let Some(path) = hull_path {
        // Slightly inside the brain so rays start in tissue.
        let hull = template_sphere(Point3::origin(), (shells.brain - 2.0 * shells.voxel).max(shells.voxel), shells.hull_nodes)
            .context("Failed to build hull mesh")?;
        scene::write_json(&hull, path, "mesh")?;
    }

    let result = PhantomResult {
        output: output_path.display().to_string(),
        hull: hull_path.map(|p| p.display().to_string()),
        dims: volume.dims,
        voxel_size: shells.voxel,
        inner_skull_radius: shells.brain,
        outer_skull_radius: shells.brain + shells.skull,
        scalp_radius,
    };

    match cli.format {
        OutputFormat::Json => output::print(&result, cli.format, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                output::success(
                    &format!("Phantom saved to {}", output_path.display()),
                    cli.format,
                    cli.quiet,
                );
                if let Some(ref hull) = result.hull {
                    println!("  {}: {}", "Hull".cyan(), hull);
                }
                println!(
                    "  {}: {} x {} x {} @ {:.2}mm",
                    "Grid".cyan(),
                    result.dims[0],
                    result.dims[1],
                    result.dims[2],
                    result.voxel_size
                );
                println!(
                    "  {}: {:.1} / {:.1} / {:.1} mm",
                    "Shells".cyan(),
                    result.inner_skull_radius,
                    result.outer_skull_radius,
                    result.scalp_radius
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shells_fixture() -> PhantomShells {
        PhantomShells {
            size: 16,
            voxel: 1.0,
            brain: 3.0,
            skull: 2.0,
            scalp: 2.0,
            hull_nodes: 42,
        }
    }

    #[test]
    fn test_build_volume_shells() {
        let volume = build_volume(&shells_fixture()).unwrap();
        assert_eq!(volume.dims, [16, 16, 16]);
        // Voxel (8, 8, 8) has its centre at (0.5, 0.5, 0.5): brain.
        assert_eq!(volume.get("t1", 8, 8, 8).unwrap(), Some(BRAIN_INTENSITY));
        // Corner voxel is air.
        assert_eq!(volume.get("t1", 0, 0, 0).unwrap(), Some(0.0));
    }
}

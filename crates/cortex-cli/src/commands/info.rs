//! cortex info command - display volume statistics.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

use super::scene;
use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct VolumeInfo {
    path: String,
    dims: [usize; 3],
    voxels: usize,
    spacing: [f64; 3],
    bounds: BoundsInfo,
    channels: Vec<ChannelInfo>,
}

#[derive(Serialize)]
struct BoundsInfo {
    min: [f64; 3],
    max: [f64; 3],
    dimensions: [f64; 3],
}

#[derive(Serialize)]
struct ChannelInfo {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<f64>,
    finite_voxels: usize,
}

pub fn run(input: &Path, cli: &Cli) -> Result<()> {
    let volume = scene::load_volume(input)?;

    let (lo, hi) = volume.bounds();
    let dims = hi - lo;
    let bounds = BoundsInfo {
        min: [lo.x, lo.y, lo.z],
        max: [hi.x, hi.y, hi.z],
        dimensions: [dims.x, dims.y, dims.z],
    };

    let mut channels = Vec::new();
    for name in volume.channel_names() {
        let range = volume.data_range(name)?;
        let finite_voxels = volume.channel(name)?.iter().filter(|v| v.is_finite()).count();
        channels.push(ChannelInfo {
            name: name.to_string(),
            min: range.map(|r| r.0),
            max: range.map(|r| r.1),
            finite_voxels,
        });
    }

    let info = VolumeInfo {
        path: input.display().to_string(),
        dims: volume.dims,
        voxels: volume.voxel_count(),
        spacing: [volume.spacing.x, volume.spacing.y, volume.spacing.z],
        bounds,
        channels,
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&info, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Volume Information".bold().underline());
                println!("  {}: {}", "File".cyan(), input.display());
                println!(
                    "  {}: {} x {} x {} ({} voxels)",
                    "Grid".cyan(),
                    info.dims[0],
                    info.dims[1],
                    info.dims[2],
                    info.voxels
                );
                println!(
                    "  {}: {:.3} x {:.3} x {:.3} mm",
                    "Spacing".cyan(),
                    info.spacing[0],
                    info.spacing[1],
                    info.spacing[2]
                );
                println!(
                    "  {}: {:.2} x {:.2} x {:.2} mm",
                    "Dimensions".cyan(),
                    info.bounds.dimensions[0],
                    info.bounds.dimensions[1],
                    info.bounds.dimensions[2]
                );
                println!(
                    "  {}: ({:.2}, {:.2}, {:.2})",
                    "Min bounds".cyan(),
                    info.bounds.min[0],
                    info.bounds.min[1],
                    info.bounds.min[2]
                );
                println!(
                    "  {}: ({:.2}, {:.2}, {:.2})",
                    "Max bounds".cyan(),
                    info.bounds.max[0],
                    info.bounds.max[1],
                    info.bounds.max[2]
                );

                if info.channels.is_empty() {
                    println!("  {}: none", "Channels".cyan());
                }
                for ch in &info.channels {
                    match (ch.min, ch.max) {
                        (Some(min), Some(max)) => println!(
                            "  {} {}: [{:.4}, {:.4}], {} finite",
                            "Channel".cyan(),
                            ch.name,
                            min,
                            max,
                            ch.finite_voxels
                        ),
                        _ => println!("  {} {}: no finite values", "Channel".cyan(), ch.name),
                    }
                }
            }
        }
    }

    Ok(())
}

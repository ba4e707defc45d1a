//! cortex project command - Gaussian projection between mesh and volume.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;
use cortex_mesh::{Mesh, shared_tracker};
use cortex_probe::{DenominatorWeight, ProjectionBuilder, TransferMatrix};
use serde::Serialize;

use super::scene;
use crate::{Cli, Denominator, Direction, OutputFormat, output};

/// Kernel and layer settings for one projection.
pub struct ProjectArgs {
    pub channel: String,
    pub direction: Direction,
    pub values: Option<PathBuf>,
    pub sigmas: (f64, f64),
    pub cutoff: (f64, f64),
    pub thickness: f64,
    pub denominator: Denominator,
    pub matrix: Option<PathBuf>,
    pub debug_vertex: Option<usize>,
}

#[derive(Serialize)]
struct ProjectResult {
    mesh: String,
    volume: String,
    output: String,
    direction: &'static str,
    channel: String,
    vertices: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    touched_voxels: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    empty_vertices: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    matrix_entries: Option<usize>,
}

fn builder<'a>(mesh: &'a Mesh, args: &ProjectArgs) -> ProjectionBuilder<'a> {
    let mut builder = ProjectionBuilder::new(mesh)
        .sigmas(args.sigmas.0, args.sigmas.1)
        .cutoff(args.cutoff.0, args.cutoff.1)
        .thickness(args.thickness)
        .denominator(match args.denominator {
            Denominator::Product => DenominatorWeight::Product,
            Denominator::TangentOnly => DenominatorWeight::TangentOnly,
            Denominator::NormalOnly => DenominatorWeight::NormalOnly,
        })
        .record_matrix(args.matrix.is_some())
        .with_tracker(shared_tracker(mesh.vertex_count() as u64));
    if let Some(v) = args.debug_vertex {
        builder = builder.debug_vertex(v);
    }
    builder
}

fn write_matrix(matrix: Option<&TransferMatrix>, path: Option<&Path>) -> Result<Option<usize>> {
    match (matrix, path) {
        (Some(m), Some(path)) => {
            m.write_tsv(path)
                .with_context(|| format!("Failed to write transfer matrix to {:?}", path))?;
            Ok(Some(m.nnz()))
        }
        _ => Ok(None),
    }
}

pub fn run(mesh_path: &Path, volume_path: &Path, output_path: &Path, args: &ProjectArgs, cli: &Cli) -> Result<()> {
    let mesh = scene::load_mesh(mesh_path)?;
    let mut volume = scene::load_volume(volume_path)?;
    let n = mesh.vertex_count();

    let result = match args.direction {
        Direction::ToSurface => {
            output::info(
                &format!("Projecting `{}` onto {} vertices...", args.channel, n),
                cli.format,
                cli.quiet,
            );
            let projected = builder(&mesh, args)
                .from_volume(&volume, &args.channel)?
                .context("Projection was cancelled")?;
            scene::write_json(&projected.values, output_path, "values")?;
            let matrix_entries = write_matrix(projected.matrix.as_ref(), args.matrix.as_deref())?;

            ProjectResult {
                mesh: mesh_path.display().to_string(),
                volume: volume_path.display().to_string(),
                output: output_path.display().to_string(),
                direction: "to-surface",
                channel: args.channel.clone(),
                vertices: n,
                touched_voxels: None,
                empty_vertices: Some(projected.empty_vertices),
                matrix_entries,
            }
        }
        Direction::ToVolume => {
            let values_path = args
                .values
                .as_deref()
                .context("--values is required when projecting to a volume")?;
            let values = scene::load_values(values_path)?;

            output::info(
                &format!("Projecting {} vertex values into `{}`...", values.len(), args.channel),
                cli.format,
                cli.quiet,
            );
            let projected = builder(&mesh, args)
                .to_volume(&values, &mut volume, &args.channel)?
                .context("Projection was cancelled")?;
            scene::write_json(&volume, output_path, "volume")?;
            let matrix_entries = write_matrix(projected.matrix.as_ref(), args.matrix.as_deref())?;

            ProjectResult {
                mesh: mesh_path.display().to_string(),
                volume: volume_path.display().to_string(),
                output: output_path.display().to_string(),
                direction: "to-volume",
                channel: projected.channel,
                vertices: n,
                touched_voxels: Some(projected.touched_voxels),
                empty_vertices: None,
                matrix_entries,
            }
        }
    };

    match cli.format {
        OutputFormat::Json => output::print(&result, cli.format, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                output::success(
                    &format!("Projection saved to {}", output_path.display()),
                    cli.format,
                    cli.quiet,
                );
                println!("  {}: {}", "Direction".cyan(), result.direction);
                println!("  {}: {}", "Channel".cyan(), result.channel);
                if let Some(touched) = result.touched_voxels {
                    println!("  {}: {}", "Voxels written".cyan(), touched);
                }
                if let Some(empty) = result.empty_vertices {
                    println!("  {}: {} of {}", "Empty vertices".cyan(), empty, result.vertices);
                }
                if let Some(nnz) = result.matrix_entries {
                    println!("  {}: {} entries", "Transfer matrix".cyan(), nnz);
                }
            }
        }
    }

    Ok(())
}

//! cortex skull command - reconstruct skull and scalp boundaries.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use cortex_mesh::{ProgressTracker, log_progress};
use cortex_probe::{ModelOptions, ReconstructionReport, SamplingMode, ShapeSet, reconstruct_boundaries};
use serde::Serialize;
use tracing::debug;

use super::scene;
use crate::{Cli, OutputFormat, Sampling, output};

/// Option sources for a reconstruction run, in the order they apply.
pub struct SkullArgs {
    pub config: Option<PathBuf>,
    pub assign: Option<PathBuf>,
    pub t1: bool,
    pub channel: Option<String>,
    pub nodes: Option<usize>,
    pub sampling: Option<Sampling>,
    pub ray_dump: Option<PathBuf>,
    pub dump_scale: bool,
    pub dump_raw: bool,
}

#[derive(Serialize)]
struct SkullResult {
    volume: String,
    hull: String,
    output: String,
    success: bool,
    surfaces: Vec<String>,
    report: ReconstructionReport,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ignored_assignments: Vec<String>,
}

/// Resolve options: preset or TOML file, then legacy assignments, then flags.
fn build_options(args: &SkullArgs, cli: &Cli) -> Result<(ModelOptions, Vec<String>)> {
    let mut options = match &args.config {
        Some(path) => ModelOptions::from_toml_file(path)
            .with_context(|| format!("Failed to load options from {:?}", path))?,
        None if args.t1 => ModelOptions::for_t1(),
        None => ModelOptions::default(),
    };

    let mut ignored = Vec::new();
    if let Some(path) = &args.assign {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read assignments from {:?}", path))?;
        let report = options.apply_assignments(&text)?;
        for name in &report.unknown {
            ignored.push(format!("{}: unknown option", name));
        }
        for (line, message) in &report.rejected {
            ignored.push(format!("line {}: {}", line, message));
        }
        output::info(
            &format!("Applied {} assignments from {}", report.assigned.len(), path.display()),
            cli.format,
            cli.quiet,
        );
    }

    if let Some(channel) = &args.channel {
        options = options.with_channel(channel.clone());
    }
    if let Some(nodes) = args.nodes {
        options.node_count = nodes;
    }
    if let Some(sampling) = args.sampling {
        options = options.with_sampling(match sampling {
            Sampling::Nearest => SamplingMode::Nearest,
            Sampling::Trilinear => SamplingMode::Trilinear,
            Sampling::Gaussian => SamplingMode::Gaussian,
        });
    }
    if let Some(path) = &args.ray_dump {
        options = options.with_ray_dump(path.clone(), args.dump_scale);
        options.dump_raw = args.dump_raw;
    }

    options.validate()?;
    debug!(?options, "Resolved model options");
    Ok((options, ignored))
}

pub fn run(volume_path: &Path, hull_path: &Path, output_path: &Path, args: &SkullArgs, cli: &Cli) -> Result<()> {
    let (options, ignored) = build_options(args, cli)?;
    for line in &ignored {
        output::warning(&format!("Ignored assignment {}", line), cli.format, cli.quiet);
    }

    let mut volume = scene::load_volume(volume_path)?;
    let hull = scene::load_mesh(hull_path)?;

    output::info(
        &format!("Casting {} rays...", options.node_count),
        cli.format,
        cli.quiet,
    );

    let tracker = ProgressTracker::new(options.node_count as u64)
        .with_callback(Box::new(|p| {
            log_progress(&p.message, p.current as usize, p.total as usize, None);
            true
        }))
        .with_interval(Duration::from_millis(250));

    let mut shapes = ShapeSet::new();
    let report = reconstruct_boundaries(&mut volume, &hull, &options, &mut shapes, &tracker)?
        .context("Reconstruction was cancelled")?;

    scene::write_json(&shapes, output_path, "shape set")?;

    let result = SkullResult {
        volume: volume_path.display().to_string(),
        hull: hull_path.display().to_string(),
        output: output_path.display().to_string(),
        success: report.success(),
        surfaces: shapes.names().map(str::to_string).collect(),
        report,
        ignored_assignments: ignored,
    };

    match cli.format {
        OutputFormat::Json => output::print(&result, cli.format, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                if result.success {
                    output::success(
                        &format!("Shapes saved to {}", output_path.display()),
                        cli.format,
                        cli.quiet,
                    );
                } else {
                    output::warning(
                        &format!(
                            "Shapes saved to {} with unresolved vertices",
                            output_path.display()
                        ),
                        cli.format,
                        cli.quiet,
                    );
                }

                let report = &result.report;
                println!(
                    "  {}: {} ({} failed)",
                    "Rays".cyan(),
                    report.vertices,
                    report.failed_rays
                );
                println!(
                    "  {}: {} plateau, {} width-clamped",
                    "Vertices".cyan(),
                    report.plateau_vertices,
                    report.width_clamped
                );
                for surface in &report.surfaces {
                    println!(
                        "  {}: relaxed {}, unresolved {}, outliers {}, complete {}",
                        surface.surface.to_string().cyan(),
                        surface.relaxed,
                        surface.unresolved,
                        surface.outliers,
                        output::yes_no(surface.success)
                    );
                }
                if let Some(written) = report.ray_dump_written {
                    println!("  {}: {}", "Ray dump".cyan(), output::yes_no(written));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn quiet_cli() -> Cli {
        Cli::parse_from(["cortex", "--quiet", "info", "head.json"])
    }

    fn args() -> SkullArgs {
        SkullArgs {
            config: None,
            assign: None,
            t1: false,
            channel: None,
            nodes: None,
            sampling: None,
            ray_dump: None,
            dump_scale: false,
            dump_raw: false,
        }
    }

    #[test]
    fn test_flags_override_presets() {
        let args = SkullArgs {
            t1: true,
            nodes: Some(162),
            sampling: Some(Sampling::Gaussian),
            channel: Some("pd".to_string()),
            ..args()
        };
        let (options, ignored) = build_options(&args, &quiet_cli()).unwrap();
        assert_eq!(options.min_intensity, ModelOptions::for_t1().min_intensity);
        assert_eq!(options.node_count, 162);
        assert_eq!(options.sampling, SamplingMode::Gaussian);
        assert_eq!(options.channel.as_deref(), Some("pd"));
        assert!(ignored.is_empty());
    }

    #[test]
    fn test_assignment_file_applied_and_reported() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# legacy options").unwrap();
        writeln!(file, "sample_rate 4").unwrap();
        writeln!(file, "no_such_option 1").unwrap();
        writeln!(file, "min_plateau_len = abc").unwrap();

        let args = SkullArgs {
            assign: Some(file.path().to_path_buf()),
            ..args()
        };
        let (options, ignored) = build_options(&args, &quiet_cli()).unwrap();
        assert_eq!(options.sample_rate, 4.0);
        assert_eq!(options.min_plateau_len, ModelOptions::default().min_plateau_len);
        assert_eq!(ignored.len(), 2);
    }

    #[test]
    fn test_invalid_result_rejected() {
        let args = SkullArgs {
            nodes: Some(0),
            ..args()
        };
        assert!(build_options(&args, &quiet_cli()).is_err());
    }
}

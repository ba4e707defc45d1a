//! cortex: Command-line interface for skull reconstruction and Gaussian
//! surface/volume projection.
//!
//! Volumes, meshes and output shape sets are exchanged as JSON scene files,
//! the serde form of the `cortex-probe` and `cortex-mesh` types.
//!
//! # Logging
//!
//! Set the `RUST_LOG` environment variable to control log output:
//! - `RUST_LOG=cortex_probe=info` - Basic operation logging
//! - `RUST_LOG=cortex_probe=debug` - Control points, relaxation sweeps
//! - `RUST_LOG=cortex_mesh::timing=debug` - Performance timing
//! - `RUST_LOG=cortex_mesh::progress=trace` - Progress updates
//!
//! # Example
//!
//! ```bash
//! # Write a synthetic head and its brain hull
//! cortex phantom -o head.json --hull hull.json
//!
//! # Reconstruct skull and scalp
//! RUST_LOG=cortex_probe=info cortex skull head.json hull.json -o shapes.json
//!
//! # Sample the volume onto the hull
//! cortex project hull.json head.json --channel t1 -o values.json
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod output;

use commands::{info, phantom, project, skull};

/// cortex - Skull reconstruction and surface/volume projection.
///
/// Cast rays through head images to find skull and scalp boundaries, and
/// move scalar data between meshes and volumes with a Gaussian kernel.
#[derive(Parser)]
#[command(name = "cortex")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format for results
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Suppress all non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Display volume scene information
    Info {
        /// Input volume (JSON)
        input: PathBuf,
    },

    /// Write a synthetic concentric-shell head phantom
    Phantom {
        /// Output volume file (JSON)
        #[arg(short, long)]
        output: PathBuf,

        /// Also write a brain hull mesh (JSON)
        #[arg(long)]
        hull: Option<PathBuf>,

        /// Voxels along each axis
        #[arg(long, default_value = "64")]
        size: usize,

        /// Voxel edge length in mm
        #[arg(long, default_value = "1.0")]
        voxel: f64,

        /// Brain radius in mm
        #[arg(long, default_value = "20.0")]
        brain: f64,

        /// Skull thickness in mm
        #[arg(long, default_value = "5.0")]
        skull: f64,

        /// Scalp thickness in mm
        #[arg(long, default_value = "5.0")]
        scalp: f64,

        /// Vertices of the hull mesh
        #[arg(long, default_value = "642")]
        hull_nodes: usize,
    },

    /// Reconstruct inner skull, outer skull and scalp meshes
    Skull {
        /// Input volume (JSON)
        volume: PathBuf,

        /// Brain hull mesh (JSON) that rays start from
        hull: PathBuf,

        /// Output shape set (JSON)
        #[arg(short, long)]
        output: PathBuf,

        /// Model options (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Legacy `name value` assignment file applied after --config
        #[arg(long)]
        assign: Option<PathBuf>,

        /// Start from the T1-weighted preset
        #[arg(long, conflicts_with = "config")]
        t1: bool,

        /// Volume channel to sample
        #[arg(long)]
        channel: Option<String>,

        /// Template sphere vertex count
        #[arg(long)]
        nodes: Option<usize>,

        /// Interpolation along rays
        #[arg(long)]
        sampling: Option<Sampling>,

        /// Write sampled rays to this file
        #[arg(long)]
        ray_dump: Option<PathBuf>,

        /// Prefix each dumped ray with its scale
        #[arg(long, requires = "ray_dump")]
        dump_scale: bool,

        /// Dump unprocessed samples
        #[arg(long, requires = "ray_dump")]
        dump_raw: bool,
    },

    /// Gaussian projection between a mesh and a volume
    Project {
        /// Mesh (JSON)
        mesh: PathBuf,

        /// Volume (JSON)
        volume: PathBuf,

        /// Channel to read (to-surface) or write (to-volume)
        #[arg(long)]
        channel: String,

        /// Projection direction
        #[arg(long, default_value = "to-surface")]
        direction: Direction,

        /// Per-vertex values (JSON array), required for to-volume
        #[arg(long, required_if_eq("direction", "to-volume"))]
        values: Option<PathBuf>,

        /// Output: values (to-surface) or volume (to-volume), JSON
        #[arg(short, long)]
        output: PathBuf,

        /// Standard deviation along the normal (mm)
        #[arg(long, default_value = "1.0")]
        sigma_normal: f64,

        /// Standard deviation along the surface (mm)
        #[arg(long, default_value = "1.0")]
        sigma_tangent: f64,

        /// Cutoff along the normal in standard deviations
        #[arg(long, default_value = "2.0")]
        cutoff_normal: f64,

        /// Cutoff along the surface in standard deviations
        #[arg(long, default_value = "2.0")]
        cutoff_tangent: f64,

        /// Layer thickness (mm)
        #[arg(long, default_value = "0.0")]
        thickness: f64,

        /// Weights accumulated into the denominator
        #[arg(long, default_value = "product")]
        denominator: Denominator,

        /// Write the transfer matrix to this TSV file
        #[arg(long)]
        matrix: Option<PathBuf>,

        /// Log every contribution of this vertex
        #[arg(long)]
        debug_vertex: Option<usize>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Sampling {
    /// Nearest voxel
    Nearest,
    /// Trilinear interpolation
    Trilinear,
    /// Gaussian kernel over finite voxels
    Gaussian,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Direction {
    /// Volume values onto mesh vertices
    ToSurface,
    /// Vertex values into a volume channel
    ToVolume,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Denominator {
    /// Normal times tangential weight
    Product,
    /// Tangential weight only
    TangentOnly,
    /// Normal weight only
    NormalOnly,
}

/// Initialize the tracing subscriber based on verbosity level.
fn init_tracing(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    // RUST_LOG wins over -v flags
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "cortex_mesh=info,cortex_probe=info",
            2 => "cortex_mesh=debug,cortex_probe=debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    #[cfg(debug_assertions)]
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Info { input } => info::run(input, &cli),
        Commands::Phantom {
            output,
            hull,
            size,
            voxel,
            brain,
            skull,
            scalp,
            hull_nodes,
        } => phantom::run(
            output,
            hull.as_deref(),
            &phantom::PhantomShells {
                size: *size,
                voxel: *voxel,
                brain: *brain,
                skull: *skull,
                scalp: *scalp,
                hull_nodes: *hull_nodes,
            },
            &cli,
        ),
        Commands::Skull {
            volume,
            hull,
            output,
            config,
            assign,
            t1,
            channel,
            nodes,
            sampling,
            ray_dump,
            dump_scale,
            dump_raw,
        } => skull::run(
            volume,
            hull,
            output,
            &skull::SkullArgs {
                config: config.clone(),
                assign: assign.clone(),
                t1: *t1,
                channel: channel.clone(),
                nodes: *nodes,
                sampling: *sampling,
                ray_dump: ray_dump.clone(),
                dump_scale: *dump_scale,
                dump_raw: *dump_raw,
            },
            &cli,
        ),
        Commands::Project {
            mesh,
            volume,
            channel,
            direction,
            values,
            output,
            sigma_normal,
            sigma_tangent,
            cutoff_normal,
            cutoff_tangent,
            thickness,
            denominator,
            matrix,
            debug_vertex,
        } => project::run(
            mesh,
            volume,
            output,
            &project::ProjectArgs {
                channel: channel.clone(),
                direction: *direction,
                values: values.clone(),
                sigmas: (*sigma_normal, *sigma_tangent),
                cutoff: (*cutoff_normal, *cutoff_tangent),
                thickness: *thickness,
                denominator: *denominator,
                matrix: matrix.clone(),
                debug_vertex: *debug_vertex,
            },
            &cli,
        ),
    };

    if let Err(e) = &result {
        if !cli.quiet {
            if let Some(probe_err) = e.downcast_ref::<cortex_probe::ProbeError>() {
                eprintln!("{}: {}", "Error".red().bold(), probe_err);
                eprintln!("  {}: {}", "Code".cyan(), probe_err.code());
                eprintln!(
                    "  {}: {}",
                    "Suggestion".green(),
                    probe_err.recovery_suggestion()
                );
            } else if let Some(mesh_err) = e.downcast_ref::<cortex_mesh::MeshError>() {
                eprintln!("{}: {}", "Error".red().bold(), mesh_err);
                eprintln!("  {}: {}", "Code".cyan(), mesh_err.code());
            } else {
                eprintln!("{}: {}", "Error".red().bold(), e);
                for cause in e.chain().skip(1) {
                    eprintln!("  {}: {}", "Caused by".yellow(), cause);
                }
            }
        }
        std::process::exit(1);
    }

    Ok(())
}

use anyhow::Result;
use clap::Parser;
use env_logger::Builder;
use log::{info, LevelFilter};
use std::path::PathBuf;
use sweep_common::sweep::{RangeKind, SweepRange};
use sweep_common::SystemPaths;

// Define modules used by main
mod init_cells;
mod samos;

use samos::{run_sweep, RunParams, SweepSpec};

/// Command-line arguments for the sweep runner
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Group folder name under the output root (default: today's date)
    #[arg(long)]
    group_folder: Option<String>,

    /// Debug: collapse session/run labels to 'debug' and overwrite previous output
    #[arg(long)]
    debug: bool,

    /// Add tracker cells embedded within the spheroid
    #[arg(long)]
    track: bool,

    /// Number of tracker cells
    #[arg(long, default_value_t = 100)]
    track_count: usize,

    /// Number of time steps
    #[arg(short = 't', long, default_value_t = 10000)]
    num_time_steps: u64,

    /// Number of initial cells
    #[arg(short = 'N', long, default_value_t = 200)]
    cell_count: usize,

    /// Mean cell radius
    #[arg(short = 'r', long, default_value_t = 1.0)]
    cell_radius: f64,

    /// Polydispersity of the cell radius
    #[arg(long, default_value_t = 0.3)]
    cell_radius_poly: f64,

    /// Division rate of a cell
    #[arg(long, default_value_t = 0.1)]
    cell_division_rate: f64,

    /// Self-propulsion speed v0
    #[arg(long, default_value_t = 0.1)]
    v0: f64,

    /// Soft sphere potential factor
    #[arg(long, default_value_t = 1.15)]
    re_fact: f64,

    /// Rotational diffusion Dr
    #[arg(long, default_value_t = 0.1)]
    dr: f64,

    /// Periodic box dimension L (plane runs)
    #[arg(long, default_value_t = 40.0)]
    box_l: f64,

    /// Target packing fraction (plane runs)
    #[arg(long, default_value_t = 0.6)]
    phi: f64,

    /// Physics timestep dt
    #[arg(long, default_value_t = 0.01)]
    dt: f64,

    /// Timesteps between .dat output frames
    #[arg(long, default_value_t = 1000)]
    freq_dat: u64,

    /// Timesteps between .vtp output frames
    #[arg(long, default_value_t = 1000)]
    freq_vtp: u64,

    /// RNG seed handed to the executable and the initial placement
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Initialise a 2D plane instead of a spheroid
    #[arg(long)]
    plane: bool,

    /// Plane run with active brownian particles
    #[arg(long)]
    plane_abp: bool,

    /// ECM packing fraction (spheroid runs; 0 disables the ECM bath)
    #[arg(long, default_value_t = 0.0)]
    phi_ecm: f64,

    /// ECM particle radius
    #[arg(long, default_value_t = 1.0)]
    ecm_radius: f64,

    /// Polydispersity of the ECM radius
    #[arg(long, default_value_t = 0.3)]
    ecm_radius_poly: f64,

    /// Side of the cubic ECM bath
    #[arg(long, default_value_t = 10.0)]
    ecm_size: f64,

    /// Disable the executable: lay out folders, configs and particles only
    #[arg(long)]
    disable_samos: bool,

    /// Name of swept parameter 1 (e.g. cell_division_rate)
    #[arg(long)]
    var1: Option<String>,

    /// Folder tag of swept parameter 1 (e.g. div)
    #[arg(long)]
    var1_short: Option<String>,

    /// Range type of swept parameter 1
    #[arg(long, value_enum, default_value_t = RangeArg::Linear)]
    var1_type: RangeArg,

    #[arg(long, default_value_t = 0.01)]
    var1_start: f64,

    #[arg(long, default_value_t = 0.1)]
    var1_end: f64,

    #[arg(long, default_value_t = 5)]
    var1_num: usize,

    /// Explicit values for a custom range, comma separated
    #[arg(long, value_delimiter = ',')]
    var1_values: Vec<f64>,

    /// Name of swept parameter 2
    #[arg(long)]
    var2: Option<String>,

    /// Folder tag of swept parameter 2
    #[arg(long)]
    var2_short: Option<String>,

    /// Range type of swept parameter 2
    #[arg(long, value_enum, default_value_t = RangeArg::Linear)]
    var2_type: RangeArg,

    #[arg(long, default_value_t = 0.01)]
    var2_start: f64,

    #[arg(long, default_value_t = 0.1)]
    var2_end: f64,

    #[arg(long, default_value_t = 5)]
    var2_num: usize,

    #[arg(long, value_delimiter = ',')]
    var2_values: Vec<f64>,

    /// Optional TOML file with the filesystem layout (executable, roots, templates)
    #[arg(long)]
    paths_config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum RangeArg {
    Linear,
    Log,
    Custom,
}

impl From<RangeArg> for RangeKind {
    fn from(value: RangeArg) -> Self {
        match value {
            RangeArg::Linear => RangeKind::Linear,
            RangeArg::Log => RangeKind::Log,
            RangeArg::Custom => RangeKind::Custom,
        }
    }
}

fn sweep_range(
    name: &Option<String>,
    short: &Option<String>,
    kind: RangeArg,
    start: f64,
    end: f64,
    num: usize,
    values: &[f64],
) -> Result<Option<SweepRange>> {
    let Some(name) = name else {
        return Ok(None);
    };
    let short = short
        .clone()
        .ok_or_else(|| anyhow::anyhow!("swept parameter '{}' needs a folder tag (--varN-short)", name))?;
    Ok(Some(SweepRange {
        name: name.clone(),
        short,
        kind: kind.into(),
        start,
        end,
        num,
        values: values.to_vec(),
    }))
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize the logger
    Builder::from_default_env().filter(None, LevelFilter::Info).init();

    info!("=== Start ===");

    let paths = SystemPaths::load_or_default(args.paths_config.as_deref())?;

    let mut group_folder = args
        .group_folder
        .clone()
        .unwrap_or_else(|| chrono::Local::now().format("%Y%m%d").to_string());
    if args.track {
        group_folder.push_str("_tracked");
    }

    let params = RunParams {
        num_time_steps: args.num_time_steps,
        cell_count: args.cell_count,
        cell_radius: args.cell_radius,
        cell_radius_poly: args.cell_radius_poly,
        cell_division_rate: args.cell_division_rate,
        v0: args.v0,
        re_fact: args.re_fact,
        dr: args.dr,
        box_l: args.box_l,
        phi: args.phi,
        dt: args.dt,
        freq_dat: args.freq_dat,
        freq_vtp: args.freq_vtp,
        seed: args.seed,
        add_tracker_cells: args.track,
        tracker_cell_count: args.track_count,
        plane: args.plane,
        plane_abp: args.plane_abp,
        phi_ecm: args.phi_ecm,
        ecm_radius: args.ecm_radius,
        ecm_radius_poly: args.ecm_radius_poly,
        ecm_size: args.ecm_size,
    };

    let range_1 = sweep_range(
        &args.var1,
        &args.var1_short,
        args.var1_type,
        args.var1_start,
        args.var1_end,
        args.var1_num,
        &args.var1_values,
    )?;
    let range_2 = sweep_range(
        &args.var2,
        &args.var2_short,
        args.var2_type,
        args.var2_start,
        args.var2_end,
        args.var2_num,
        &args.var2_values,
    )?;

    let spec = match (range_1, range_2) {
        (None, None) => SweepSpec::Single,
        (Some(r1), None) => SweepSpec::OneD(r1),
        (Some(r1), Some(r2)) => SweepSpec::TwoD(r1, r2),
        (None, Some(_)) => {
            anyhow::bail!("a second swept parameter requires a first one (--var1)");
        }
    };

    run_sweep(&paths, &params, spec, &group_folder, !args.disable_samos, args.debug)?;

    info!("=== End ===");
    Ok(())
}

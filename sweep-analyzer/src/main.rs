use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Builder;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn, LevelFilter};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sweep_common::observables::LagSpacing;
use sweep_common::SystemPaths;

mod driver;
mod table;

use driver::{analyse_session, AnalysisKind, AnalysisSettings};

/// Command-line arguments for the batch analyzer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Result folder name(s) under the samos output root to analyse
    paths: Vec<String>,

    /// Physics timestep dt; frame indices are rescaled by this
    #[arg(long, default_value_t = 0.01)]
    dt: f64,

    /// Sampling frequency (timesteps per output frame)
    #[arg(long, default_value_t = 1000.0)]
    freq: f64,

    /// Analysis flavour applied to every session
    #[arg(long, value_enum, default_value_t = AnalysisKind::Tumoroid)]
    analysis_type: AnalysisKind,

    /// Number of worker threads in the folder pool
    #[arg(long, default_value_t = 8)]
    cores: usize,

    /// Use log-spaced lag times instead of linearly spaced ones
    #[arg(long)]
    log_lags: bool,

    /// Abandon a session folder after this many seconds (default: wait forever)
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Optional TOML file with the filesystem layout (output roots etc.)
    #[arg(long)]
    paths_config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logger
    Builder::from_default_env().filter(None, LevelFilter::Info).init();

    info!("=== Start ===");
    if args.paths.is_empty() {
        warn!("No root folder name was given!");
        return Ok(());
    }
    info!("Number of root folders = {}", args.paths.len());

    let paths = SystemPaths::load_or_default(args.paths_config.as_deref())?;
    let settings = AnalysisSettings {
        kind: args.analysis_type,
        dt: args.dt,
        freq: args.freq,
        lag_spacing: if args.log_lags { LagSpacing::Log } else { LagSpacing::Linear },
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.cores)
        .build()
        .context("Failed to build worker pool")?;
    info!("Using {} worker threads.", args.cores);

    let timeout = args.timeout_secs.map(Duration::from_secs);
    for result_folder in &args.paths {
        let root = paths.samos_output_dir.join(result_folder);
        info!("|- Searching {} -|", root.display());
        let sessions = match session_folders(&root) {
            Ok(s) => s,
            Err(e) => {
                // A missing root never aborts a multi-folder sweep.
                error!("Skipping result folder '{}': {:#}", result_folder, e);
                continue;
            }
        };
        if sessions.is_empty() {
            warn!("No session folders under '{}'.", root.display());
            continue;
        }

        let progress = ProgressBar::new(sessions.len() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} sessions ({percent}%) [{eta}]")
                .expect("Invalid progress bar template")
                .progress_chars("#>-"),
        );
        progress.set_message("Analysing sessions");

        // One task per session folder; workers share nothing and each
        // writes its own unique CSV paths.
        pool.install(|| {
            sessions.par_iter().for_each(|session| {
                info!("- {} -", session);
                let outcome = run_with_timeout(&paths, &settings, result_folder, session, &root, timeout);
                if let Err(e) = outcome {
                    error!("Session '{}' failed: {:#}", session, e);
                }
                progress.inc(1);
            });
        });
        progress.finish_with_message(format!("Analysed {} sessions", sessions.len()));
    }

    info!("=== End ===");
    Ok(())
}

/// Sorted sub-directories of one result root.
fn session_folders(root: &Path) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Err(sweep_common::AnalysisError::SweepFolderMissing(root.to_path_buf()).into());
    }
    let mut sessions: Vec<String> = std::fs::read_dir(root)
        .with_context(|| format!("Failed to list '{}'", root.display()))?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    sessions.sort();
    Ok(sessions)
}

/// Runs one session analysis, optionally bounded by a wall-clock timeout.
///
/// Without a timeout this blocks for as long as the analysis takes (the
/// historical behaviour). With one, the session runs on a helper thread
/// that is abandoned when the deadline passes; its partial output files
/// are left behind and the pool moves on.
fn run_with_timeout(
    paths: &SystemPaths,
    settings: &AnalysisSettings,
    result_folder: &str,
    session: &str,
    root: &Path,
    timeout: Option<Duration>,
) -> Result<()> {
    let Some(limit) = timeout else {
        return analyse_session(paths, settings, result_folder, session, root);
    };

    let (tx, rx) = std::sync::mpsc::channel();
    let paths = paths.clone();
    let settings = settings.clone();
    let result_folder = result_folder.to_string();
    let session_name = session.to_string();
    let root = root.to_path_buf();
    std::thread::spawn(move || {
        let result = analyse_session(&paths, &settings, &result_folder, &session_name, &root);
        // The receiver may have timed out and gone away.
        let _ = tx.send(result);
    });
    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(_) => anyhow::bail!("timed out after {:?}", limit),
    }
}

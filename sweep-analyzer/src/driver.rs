use crate::table::{render_list, ResultTable};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde_json::Value;
use std::path::{Path, PathBuf};
use sweep_common::error::AnalysisError;
use sweep_common::frame::{time_index_from_filename, FrameTable};
use sweep_common::observables::{
    density_profile, log_log_slope, msd, radial_distances, radius_of_gyration, LagSpacing,
    MsdOptions,
};
use sweep_common::sweep::{
    freq_override, has_token, parse_folder_vars, read_dr_box, split_tokens,
};
use sweep_common::SystemPaths;

/// Particle group holding the primary ("cell") particles.
const GROUP_CELLS: u32 = 1;
/// Particle group holding tracker/ECM particles; legitimately absent in
/// many runs.
const GROUP_ECM: u32 = 2;

/// Which observables a session's runs are reduced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AnalysisKind {
    /// 3D spheroid runs: radial profiles, gyration radius, MSD.
    Tumoroid,
    /// 2D plane runs: mean speed and MSD without CM removal.
    Plane,
}

/// Per-invocation analysis settings shared by all workers.
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub kind: AnalysisKind,
    /// Physics timestep; frame indices are rescaled by this.
    pub dt: f64,
    /// Frames per output file interval (sampling frequency).
    pub freq: f64,
    pub lag_spacing: LagSpacing,
}

/// One run folder reduced to rows for the session tables.
struct RunOutput {
    static_rows: ResultTable,
    msd_rows: ResultTable,
}

/// Analyses every run folder inside one session folder and writes the
/// session's CSV summaries. This is the unit of work handed to the pool.
pub fn analyse_session(
    paths: &SystemPaths,
    settings: &AnalysisSettings,
    result_folder: &str,
    session_folder: &str,
    root: &Path,
) -> Result<()> {
    let session_path = root.join(session_folder);
    if !session_path.is_dir() {
        return Err(AnalysisError::SweepFolderMissing(session_path).into());
    }

    // A session folder may pin the sampling frequency in its own name.
    let mut settings = settings.clone();
    if let Some(freq) = freq_override(session_folder) {
        info!("Session '{}' overrides sampling frequency to {}.", session_folder, freq);
        settings.freq = freq;
    }

    let mut run_folders: Vec<PathBuf> = std::fs::read_dir(&session_path)
        .with_context(|| format!("Failed to list session folder '{}'", session_path.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    run_folders.sort();
    info!("-- Found {} folders in '{}', starting analysis!", run_folders.len(), session_folder);

    let mut static_table = ResultTable::new();
    let mut msd_table = ResultTable::new();
    for run_folder in &run_folders {
        // One run's failure is logged with its folder context and skipped;
        // the rest of the session still gets analysed.
        match analyse_run_folder(run_folder, &settings) {
            Ok(Some(output)) => {
                merge_tables(&mut static_table, output.static_rows);
                merge_tables(&mut msd_table, output.msd_rows);
            }
            Ok(None) => {
                debug!("Skipping empty run folder '{}'.", run_folder.display());
            }
            Err(e) => {
                warn!("Skipping run folder '{}': {:#}", run_folder.display(), e);
            }
        }
    }

    let out_dir = paths.analysis_output_dir.join(result_folder).join(session_folder);
    match settings.kind {
        AnalysisKind::Plane => {
            msd_table.write_csv(&out_dir.join("measurements.csv"))?;
        }
        AnalysisKind::Tumoroid => {
            // Frame indices become elapsed time relative to the earliest
            // frame of the whole session.
            static_table.rescale_shifted("time", settings.dt);
            static_table.write_csv(&out_dir.join("measurements.csv"))?;
            msd_table.write_csv(&out_dir.join("tumoroid_msd.csv"))?;
        }
    }
    info!("Saved analysis results to '{}'!", out_dir.display());
    Ok(())
}

/// Appends all rows of `extra` to `target` (column-wise).
fn merge_tables(target: &mut ResultTable, extra: ResultTable) {
    extra.into_rows(|tag, value| target.add(tag, value));
}

fn sorted_dat_files(run_folder: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(run_folder)
        .with_context(|| format!("Failed to list run folder '{}'", run_folder.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("dat"))
        .collect();
    files.sort();
    Ok(files)
}

/// Parameters the runner recorded alongside a run, if any.
fn read_run_params(run_folder: &Path) -> Option<serde_json::Map<String, Value>> {
    let path = run_folder.join("params.json");
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) => Some(map),
        _ => {
            warn!("Ignoring unreadable params.json in '{}'.", run_folder.display());
            None
        }
    }
}

fn param_f64(params: &Option<serde_json::Map<String, Value>>, key: &str) -> Option<f64> {
    params.as_ref()?.get(key)?.as_f64()
}

fn analyse_run_folder(run_folder: &Path, settings: &AnalysisSettings) -> Result<Option<RunOutput>> {
    let dat_files = sorted_dat_files(run_folder)?;
    // An empty folder is an expected condition (crashed or pending run).
    if dat_files.is_empty() {
        return Ok(None);
    }

    let folder_name = run_folder
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let tokens = split_tokens(&folder_name);
    let run_params = read_run_params(run_folder);

    // Box size and rotational diffusion come from the folder tokens, with
    // the recorded run parameters as a fallback for unnamed sweeps.
    let (mut rot_diff, mut box_l) = read_dr_box(&tokens);
    if !has_token(&tokens, "Dr") {
        if let Some(v) = param_f64(&run_params, "dr") {
            rot_diff = v;
        }
    }
    if !has_token(&tokens, "L") {
        if let Some(v) = param_f64(&run_params, "box_l") {
            box_l = v;
        }
    }
    debug!("-- MSD analysis '{}' Dr: {} L: {}...", folder_name, rot_diff, box_l);

    // --- Ingest every frame once, ordered by time index ---
    let mut frames: Vec<(i64, String, FrameTable)> = Vec::with_capacity(dat_files.len());
    for dat_file in &dat_files {
        let table = FrameTable::read(dat_file)?;
        let index = time_index_from_filename(dat_file)?;
        let name = dat_file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        frames.push((index, name, table));
    }
    frames.sort_by_key(|(index, _, _)| *index);
    let min_index = frames.first().map(|(i, _, _)| *i).unwrap_or(0);

    let vars = parse_folder_vars(&folder_name);
    let freqdt = settings.freq * settings.dt;

    // ***********************************************************
    // *    Dynamic analysis (MSD)                               *
    // ***********************************************************
    let mut positions = Vec::with_capacity(frames.len());
    let mut times = Vec::with_capacity(frames.len());
    for (index, _, table) in &frames {
        positions.push(table.positions(GROUP_CELLS)?);
        times.push((index - min_index) as f64 * settings.dt);
    }

    // Displacements match particles by row, so the cell count must be
    // conserved over the run. Dividing runs keep their static analysis and
    // simply produce no MSD rows.
    let count_conserved = positions.iter().all(|f| f.len() == positions[0].len());
    let mut msd_rows = ResultTable::new();
    if positions.len() >= 2 && count_conserved {
        // A lone particle has no meaningful collective centre; plane runs
        // keep the laboratory frame as well.
        let subtract_cm = positions[0].len() > 1 && settings.kind != AnalysisKind::Plane;
        let opts = MsdOptions {
            box_length: box_l,
            tau: 1.0 / rot_diff,
            freqdt,
            subtract_cm,
            spacing: settings.lag_spacing,
        };
        let curve = msd(&positions, &times, &opts)?;
        if let Some((slope, _)) = log_log_slope(&curve.lag_times, &curve.msd) {
            debug!("'{}': log-log MSD slope {:.3}", folder_name, slope);
        }

        for i in 0..curve.lag_times.len() {
            msd_rows.add("lag time", format!("{}", curve.lag_times[i]));
            msd_rows.add("MSD", format!("{}", curve.msd[i]));
            msd_rows.add("MSD/t", format!("{}", curve.msd[i] / curve.lag_times[i]));
            msd_rows.add("MSD error", format!("{}", curve.msd_err[i]));
            msd_rows.add("freq", format!("{}", settings.freq));
            msd_rows.add("dt", format!("{}", settings.dt));
            if !has_token(&tokens, "Dr") {
                msd_rows.add("Dr", format!("{}", rot_diff));
            }
            add_vars(&mut msd_rows, &vars);
        }
    } else if !count_conserved {
        debug!(
            "'{}': cell count not conserved across frames, skipping displacement statistics.",
            folder_name
        );
    }

    // ***********************************************************
    // *    Static analysis (per-frame geometry)                 *
    // ***********************************************************
    let mut static_rows = ResultTable::new();
    for (index, dat_name, table) in &frames {
        static_rows.add("dir", folder_name.clone());
        static_rows.add(".data dir", dat_name.clone());
        static_rows.add("time", format!("{}", index));

        match settings.kind {
            AnalysisKind::Plane => {
                let velocities = table.velocities(GROUP_CELLS)?;
                let mean_speed: f64 = velocities
                    .iter()
                    .map(|v| (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt())
                    .sum::<f64>()
                    / velocities.len() as f64;
                static_rows.add("average velocity", format!("{}", mean_speed));
            }
            AnalysisKind::Tumoroid => {
                let cells = table.positions(GROUP_CELLS)?;
                let cell_radii = table.radii(GROUP_CELLS)?;
                let r_cells = radial_distances(&cells)?;
                let cell_profile = density_profile(&r_cells, &cell_radii);
                let gyration = radius_of_gyration(&cells)?;

                static_rows.add("cell count", format!("{}", cells.len()));
                static_rows.add("radius of gyration", format!("{}", gyration));
                static_rows.add("r cells", render_list(&cell_profile.r_bins));
                static_rows.add("phi cells", render_list(&cell_profile.phi));
                static_rows.add(
                    "radius of core",
                    cell_profile.core_radius.map(|v| format!("{}", v)).unwrap_or_default(),
                );
                static_rows.add(
                    "radius of invasion",
                    cell_profile.invasion_radius.map(|v| format!("{}", v)).unwrap_or_default(),
                );

                // Tracker/ECM particles are optional; their absence is a
                // normal condition, every other failure is a real error.
                match ecm_profile(table) {
                    Ok((count, profile)) => {
                        static_rows.add("ECM count", format!("{}", count));
                        static_rows.add("r ECM", render_list(&profile.r_bins));
                        static_rows.add("phi ECM", render_list(&profile.phi));
                    }
                    Err(AnalysisError::EmptyGroup { .. }) => {
                        static_rows.add("ECM count", "0");
                        static_rows.add("r ECM", "[]");
                        static_rows.add("phi ECM", "[]");
                    }
                    Err(e) => return Err(e.into()),
                }

                add_vars(&mut static_rows, &vars);
            }
        }
    }

    Ok(Some(RunOutput { static_rows, msd_rows }))
}

fn ecm_profile(
    table: &FrameTable,
) -> Result<(usize, sweep_common::DensityProfile), AnalysisError> {
    let ecm = table.positions(GROUP_ECM)?;
    let radii = table.radii(GROUP_ECM)?;
    let r = radial_distances(&ecm)?;
    Ok((ecm.len(), density_profile(&r, &radii)))
}

fn add_vars(table: &mut ResultTable, vars: &[(&'static str, f64, bool)]) {
    for (label, value, integer) in vars {
        if *integer {
            table.add(label, format!("{}", *value as i64));
        } else {
            table.add(label, format!("{}", value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sweep_common::SystemPaths;

    fn write_frame(dir: &Path, index: u64, rows: &[String]) {
        let header = "# id type radius x y z vx vy vz nx ny nz";
        let body: String = rows.join("\n");
        std::fs::write(
            dir.join(format!("cells_{:07}.dat", index)),
            format!("{}\n{}\n", header, body),
        )
        .unwrap();
    }

    fn drift_row(id: usize, kind: u32, x: f64) -> String {
        format!("{} {} 1.0 {} 0.0 0.0 0.3 0.4 0.0 1 0 0", id, kind, x)
    }

    fn settings(kind: AnalysisKind) -> AnalysisSettings {
        AnalysisSettings {
            kind,
            dt: 0.01,
            freq: 100.0,
            lag_spacing: LagSpacing::Linear,
        }
    }

    fn temp_session(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("sweep_analyzer_driver_tests").join(name);
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn empty_run_folder_is_skipped_without_error() {
        let session = temp_session("empty_run");
        std::fs::create_dir_all(session.join("t-100_N-2_v0-0.1")).unwrap();
        let out = analyse_run_folder(&session.join("t-100_N-2_v0-0.1"), &settings(AnalysisKind::Tumoroid))
            .unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn run_folder_produces_msd_and_static_rows() {
        let session = temp_session("full_run");
        let run = session.join("t-300_N-3_div-0.1_v0-0.2");
        std::fs::create_dir_all(&run).unwrap();
        // Three frames, 100 steps apart, three cells drifting in x.
        for (f, index) in [(0u64, 0u64), (1, 100), (2, 200)] {
            let x0 = f as f64 * 0.5;
            let rows: Vec<String> = (0..3)
                .map(|i| drift_row(i, 1, x0 + i as f64 * 3.0))
                .collect();
            write_frame(&run, index, &rows);
        }
        let output = analyse_run_folder(&run, &settings(AnalysisKind::Tumoroid))
            .unwrap()
            .expect("run folder has frames");
        // freq*dt = 1, times 0,1,2 -> single lag of 1.
        assert_eq!(output.msd_rows.rows(), 1);
        assert_eq!(output.static_rows.rows(), 3);
    }

    #[test]
    fn missing_ecm_group_yields_empty_columns() {
        let session = temp_session("no_ecm");
        let run = session.join("t-100_N-2_v0-0.1");
        std::fs::create_dir_all(&run).unwrap();
        for index in [0u64, 100] {
            let rows: Vec<String> = (0..2).map(|i| drift_row(i, 1, 1.0 + i as f64)).collect();
            write_frame(&run, index, &rows);
        }
        let output = analyse_run_folder(&run, &settings(AnalysisKind::Tumoroid))
            .unwrap()
            .unwrap();
        assert_eq!(output.static_rows.rows(), 2);
        // Rows merged into a session table still carry the ECM columns.
        let mut table = ResultTable::new();
        merge_tables(&mut table, output.static_rows);
        let dir = temp_session("no_ecm_out");
        let csv_path = dir.join("measurements.csv");
        table.write_csv(&csv_path).unwrap();
        let content = std::fs::read_to_string(&csv_path).unwrap();
        assert!(content.lines().next().unwrap().contains("ECM count"));
        assert!(content.contains(",0,[],[]"));
    }

    #[test]
    fn malformed_frame_fails_run_but_not_session() {
        let root = temp_session("broken_session_root");
        let session_name = "v0_linear_0.1-1_#2";
        let session = root.join(session_name);
        let good = session.join("t-100_N-2_v0-0.1");
        let bad = session.join("t-100_N-2_v0-1");
        std::fs::create_dir_all(&good).unwrap();
        std::fs::create_dir_all(&bad).unwrap();
        for index in [0u64, 100] {
            let rows: Vec<String> = (0..2).map(|i| drift_row(i, 1, 1.0 + i as f64)).collect();
            write_frame(&good, index, &rows);
        }
        std::fs::write(bad.join("cells_0000000.dat"), "garbage no header\n").unwrap();

        let mut paths = SystemPaths::default();
        paths.analysis_output_dir = root.join("analysis");
        analyse_session(&paths, &settings(AnalysisKind::Tumoroid), "res", session_name, &root)
            .unwrap();
        let csv = paths
            .analysis_output_dir
            .join("res")
            .join(session_name)
            .join("measurements.csv");
        let content = std::fs::read_to_string(csv).unwrap();
        // Only the good run contributed rows.
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn plane_sessions_report_average_velocity() {
        let session = temp_session("plane_run");
        let run = session.join("t-100_L-10_re-1_phi-0.5_v0-0.5_Dr-0.1");
        std::fs::create_dir_all(&run).unwrap();
        for index in [0u64, 100] {
            let rows: Vec<String> = (0..2).map(|i| drift_row(i, 1, i as f64)).collect();
            write_frame(&run, index, &rows);
        }
        let output = analyse_run_folder(&run, &settings(AnalysisKind::Plane))
            .unwrap()
            .unwrap();
        let mut table = ResultTable::new();
        merge_tables(&mut table, output.static_rows);
        let dir = temp_session("plane_out");
        let csv_path = dir.join("measurements.csv");
        table.write_csv(&csv_path).unwrap();
        let content = std::fs::read_to_string(&csv_path).unwrap();
        assert!(content.lines().next().unwrap().contains("average velocity"));
        // |v| = sqrt(0.09 + 0.16) = 0.5 for every particle.
        assert!(content.contains("0.5"));
    }
}

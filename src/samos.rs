use crate::init_cells;
use anyhow::{Context, Result};
use log::{error, info, warn};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use sweep_common::sweep::{format_value, SweepRange};
use sweep_common::SystemPaths;

/// Delay before the single retry of a failed executable invocation.
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Global parameters of one simulation run. Serialised as `params.json`
/// into every run folder so the analyzer can recover values that the
/// folder name does not encode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunParams {
    pub num_time_steps: u64,
    pub cell_count: usize,
    pub cell_radius: f64,
    pub cell_radius_poly: f64,
    pub cell_division_rate: f64,
    pub v0: f64,
    pub re_fact: f64,
    pub dr: f64,
    pub box_l: f64,
    /// Target packing fraction for plane runs.
    pub phi: f64,
    pub dt: f64,
    pub freq_dat: u64,
    pub freq_vtp: u64,
    pub seed: u64,
    pub add_tracker_cells: bool,
    pub tracker_cell_count: usize,
    pub plane: bool,
    pub plane_abp: bool,
    pub phi_ecm: f64,
    pub ecm_radius: f64,
    pub ecm_radius_poly: f64,
    pub ecm_size: f64,
}

impl RunParams {
    /// Sets a sweepable parameter by its runner-facing name.
    pub fn set(&mut self, name: &str, value: f64) -> Result<()> {
        match name {
            "num_time_steps" => self.num_time_steps = value as u64,
            "cell_count" => self.cell_count = value as usize,
            "cell_radius" => self.cell_radius = value,
            "cell_radius_poly" => self.cell_radius_poly = value,
            "cell_division_rate" => self.cell_division_rate = value,
            "v0" => self.v0 = value,
            "re_fact" => self.re_fact = value,
            "dr" => self.dr = value,
            "box_l" => self.box_l = value,
            "phi" => self.phi = value,
            "dt" => self.dt = value,
            "freq_dat" => self.freq_dat = value as u64,
            "freq_vtp" => self.freq_vtp = value as u64,
            "seed" => self.seed = value as u64,
            "tracker_cell_count" => self.tracker_cell_count = value as usize,
            "phi_ecm" => self.phi_ecm = value,
            "ecm_radius" => self.ecm_radius = value,
            "ecm_size" => self.ecm_size = value,
            other => anyhow::bail!("unknown sweep parameter '{}'", other),
        }
        Ok(())
    }

    /// Run-folder label for a single (non-swept) run.
    pub fn base_label(&self) -> String {
        if self.plane {
            format!(
                "t-{}_L-{}_re-{}_phi-{}_v0-{}_Dr-{}",
                self.num_time_steps,
                format_value(self.box_l),
                format_value(self.re_fact),
                format_value(self.phi),
                format_value(self.v0),
                format_value(self.dr)
            )
        } else {
            let mut label = format!(
                "t-{}_N-{}_div-{}_v0-{}_re-{}",
                self.num_time_steps,
                self.cell_count,
                format_value(self.cell_division_rate),
                format_value(self.v0),
                format_value(self.re_fact)
            );
            if self.add_tracker_cells {
                label.push_str(&format!("_track-{}", self.tracker_cell_count));
            }
            label
        }
    }

    /// Run-folder label for one point of a parameter sweep.
    pub fn sweep_label(&self, swept: &[(&str, f64)]) -> String {
        let mut label = if self.plane {
            format!(
                "t-{}_L-{}_re-{}_phi-{}",
                self.num_time_steps,
                format_value(self.box_l),
                format_value(self.re_fact),
                format_value(self.phi)
            )
        } else if swept.iter().any(|(short, _)| *short == "N") {
            format!("t-{}", self.num_time_steps)
        } else {
            format!("t-{}_N-{}", self.num_time_steps, self.cell_count)
        };
        for (short, value) in swept {
            label.push_str(&format!("_{}-{}", short, format_value(*value)));
        }
        label
    }
}

/// Replaces every `@TOKEN` placeholder of the configuration template with
/// the matching run parameter value.
pub fn substitute_tokens(template: &str, params: &RunParams) -> String {
    let pairs: [(&str, String); 11] = [
        ("@DIVRATE", format_value(params.cell_division_rate)),
        ("@V0", format_value(params.v0)),
        ("@NUMTIMESTEPS", format!("{}", params.num_time_steps)),
        ("@REFACT", format_value(params.re_fact)),
        ("@POLY", format_value(params.cell_radius_poly)),
        ("@SEED", format!("{}", params.seed)),
        ("@Dr", format_value(params.dr)),
        ("@L", format_value(params.box_l)),
        ("@FREQDAT", format!("{}", params.freq_dat)),
        ("@FREQVTP", format!("{}", params.freq_vtp)),
        ("@TIMESTEP", format_value(params.dt)),
    ];
    let mut out = template.to_string();
    for (token, value) in pairs {
        out = out.replace(token, &value);
    }
    out
}

/// Generates the initial configuration matching the run flavour.
fn generate_cells(params: &RunParams, rng: &mut StdRng) -> Vec<init_cells::Cell> {
    if params.plane {
        init_cells::plane(params.box_l, params.phi, params.cell_radius, params.cell_radius_poly, rng)
    } else if params.phi_ecm > 0.0 {
        init_cells::spheroid_with_ecm(
            params.cell_count,
            params.cell_radius,
            params.cell_radius_poly,
            params.phi_ecm,
            params.ecm_radius,
            params.ecm_radius_poly,
            params.ecm_size,
            rng,
        )
    } else {
        let trackers = if params.add_tracker_cells { params.tracker_cell_count } else { 0 };
        init_cells::spheroid(params.cell_count, params.cell_radius, params.cell_radius_poly, trackers, rng)
    }
}

/// Prepares one run folder (configuration, initial particles, parameter
/// record) and invokes the external executable in it.
///
/// A failed invocation is retried once after a short backoff, then logged;
/// it never aborts the surrounding sweep.
pub fn run_simulation(
    paths: &SystemPaths,
    params: &RunParams,
    group_folder: &str,
    session: &str,
    label: &str,
    execute: bool,
) -> Result<()> {
    let result_dir = paths.samos_output_dir.join(group_folder).join(session).join(label);
    if result_dir.exists() {
        info!("Result directory already exists, overwriting...");
    }
    std::fs::create_dir_all(&result_dir)
        .with_context(|| format!("Failed to create result directory '{}'", result_dir.display()))?;

    // --- Configuration file from template ---
    let template_path =
        paths.conf_template_for(params.plane, params.plane_abp, params.add_tracker_cells);
    let template = std::fs::read_to_string(template_path).with_context(|| {
        format!("Failed to read configuration template '{}'", template_path.display())
    })?;
    let configuration = substitute_tokens(&template, params);
    let conf_path = result_dir.join("configuration.conf");
    std::fs::write(&conf_path, configuration)
        .with_context(|| format!("Failed to write '{}'", conf_path.display()))?;

    // --- Initial particle configuration ---
    let mut rng = StdRng::seed_from_u64(params.seed);
    let cells = generate_cells(params, &mut rng);
    init_cells::write_particles(&cells, &result_dir.join("particles.txt"))?;

    // --- Parameter record for the analyzer ---
    let params_json = serde_json::to_string_pretty(params)?;
    std::fs::write(result_dir.join("params.json"), params_json)?;

    if execute {
        info!("Executing SAMoS...");
        invoke_samos(&paths.samos_executable, &conf_path, &result_dir);
    }
    info!("Finished! Location of results: {}", result_dir.display());
    Ok(())
}

/// Synchronous invocation of the external binary: blocks until it exits,
/// consuming nothing of its output (only the files it leaves behind are
/// read, later, by the analyzer).
fn invoke_samos(executable: &Path, conf_path: &Path, work_dir: &Path) {
    for attempt in 0..2 {
        if attempt > 0 {
            warn!("Retrying SAMoS invocation after {:?}...", RETRY_BACKOFF);
            std::thread::sleep(RETRY_BACKOFF);
        }
        match Command::new(executable).arg(conf_path).current_dir(work_dir).status() {
            Ok(status) if status.success() => return,
            Ok(status) => {
                warn!("SAMoS exited with {} in '{}'.", status, work_dir.display());
            }
            Err(e) => {
                warn!("Could not launch SAMoS executable '{}': {}", executable.display(), e);
            }
        }
    }
    error!("SAMoS failed twice in '{}'; continuing with the next run.", work_dir.display());
}

/// The dimensionality of a requested sweep.
pub enum SweepSpec {
    /// Single run from the global parameters.
    Single,
    OneD(SweepRange),
    TwoD(SweepRange, SweepRange),
}

/// Executes a full sweep: builds the session label, iterates the parameter
/// grid, and runs one simulation per point. A failing run is logged and the
/// sweep moves on.
pub fn run_sweep(
    paths: &SystemPaths,
    base_params: &RunParams,
    spec: SweepSpec,
    group_folder: &str,
    execute: bool,
    debug: bool,
) -> Result<()> {
    match spec {
        SweepSpec::Single => {
            info!("!! Running single simulation without sweep");
            let label = base_params.base_label();
            let session = format!("{}_{}", label, chrono::Local::now().format("dump%H%M%S"));
            let (session, label) = if debug {
                ("debug".to_string(), "debug".to_string())
            } else {
                (session, label)
            };
            run_one(paths, base_params, group_folder, &session, &label, execute);
        }
        SweepSpec::OneD(range) => {
            let session = range.session_label();
            let values = range.values();
            info!(
                "!! Starting 1D parameter sweep for a total of {} parameter values...",
                values.len()
            );
            for (i, &value) in values.iter().enumerate() {
                info!(
                    "[{} %] --- {} {} ---",
                    (100.0 * (i + 1) as f64 / values.len() as f64).round(),
                    range.name,
                    value
                );
                let mut params = base_params.clone();
                if let Err(e) = params.set(&range.name, value) {
                    error!("{:#}", e);
                    return Err(e);
                }
                let label = params.sweep_label(&[(range.short.as_str(), value)]);
                run_one(paths, &params, group_folder, &session, &label, execute);
            }
        }
        SweepSpec::TwoD(range_1, range_2) => {
            let session = format!("{}_vs_{}", range_1.session_label(), range_2.session_label());
            let values_1 = range_1.values();
            let values_2 = range_2.values();
            let total = values_1.len() * values_2.len();
            info!("!! Starting 2D parameter sweep for a total of {} parameter pairs...", total);
            let mut progress = 0usize;
            for &v1 in &values_1 {
                for &v2 in &values_2 {
                    progress += 1;
                    info!(
                        "[{} %] --- {} {} {} {} ---",
                        (100.0 * progress as f64 / total as f64).round(),
                        range_1.name,
                        v1,
                        range_2.name,
                        v2
                    );
                    let mut params = base_params.clone();
                    params.set(&range_1.name, v1)?;
                    params.set(&range_2.name, v2)?;
                    let label = params
                        .sweep_label(&[(range_1.short.as_str(), v1), (range_2.short.as_str(), v2)]);
                    run_one(paths, &params, group_folder, &session, &label, execute);
                }
            }
        }
    }
    Ok(())
}

/// Per-run error boundary of the sweep loop.
fn run_one(
    paths: &SystemPaths,
    params: &RunParams,
    group_folder: &str,
    session: &str,
    label: &str,
    execute: bool,
) {
    if let Err(e) = run_simulation(paths, params, group_folder, session, label, execute) {
        error!("Run '{}' failed: {:#}", label, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sweep_common::sweep::RangeKind;

    fn params() -> RunParams {
        RunParams {
            num_time_steps: 10000,
            cell_count: 200,
            cell_radius: 1.0,
            cell_radius_poly: 0.3,
            cell_division_rate: 0.1,
            v0: 0.2,
            re_fact: 1.15,
            dr: 0.1,
            box_l: 40.0,
            phi: 0.6,
            dt: 0.01,
            freq_dat: 1000,
            freq_vtp: 1000,
            seed: 7,
            add_tracker_cells: false,
            tracker_cell_count: 100,
            plane: false,
            plane_abp: false,
            phi_ecm: 0.0,
            ecm_radius: 1.0,
            ecm_radius_poly: 0.3,
            ecm_size: 10.0,
        }
    }

    #[test]
    fn tokens_are_substituted_textually() {
        let template = "pair_potential soft { k = @REFACT; }\n\
                        external self_propulsion { alpha = @V0; }\n\
                        run @NUMTIMESTEPS\n\
                        timestep @TIMESTEP\n\
                        seed @SEED dr @Dr box @L div @DIVRATE poly @POLY\n\
                        dump dat { freq = @FREQDAT; }\ndump vtp { freq = @FREQVTP; }\n";
        let out = substitute_tokens(template, &params());
        assert!(!out.contains('@'));
        assert!(out.contains("run 10000"));
        assert!(out.contains("alpha = 0.2;"));
        assert!(out.contains("timestep 0.01"));
        assert!(out.contains("seed 7 dr 0.1 box 40 div 0.1 poly 0.3"));
        assert!(out.contains("freq = 1000;"));
    }

    #[test]
    fn run_labels_follow_folder_convention() {
        let mut p = params();
        assert_eq!(p.base_label(), "t-10000_N-200_div-0.1_v0-0.2_re-1.15");
        p.add_tracker_cells = true;
        assert_eq!(p.base_label(), "t-10000_N-200_div-0.1_v0-0.2_re-1.15_track-100");
        p.add_tracker_cells = false;
        p.plane = true;
        assert_eq!(p.base_label(), "t-10000_L-40_re-1.15_phi-0.6_v0-0.2_Dr-0.1");
    }

    #[test]
    fn sweep_labels_drop_cell_count_when_sweeping_it() {
        let p = params();
        assert_eq!(p.sweep_label(&[("div", 0.05)]), "t-10000_N-200_div-0.05");
        assert_eq!(p.sweep_label(&[("N", 500.0)]), "t-10000_N-500");
        assert_eq!(
            p.sweep_label(&[("div", 0.05), ("v0", 0.3)]),
            "t-10000_N-200_div-0.05_v0-0.3"
        );
    }

    #[test]
    fn dry_run_lays_out_the_result_folder() {
        let out_root = std::env::temp_dir().join("sweep_runner_samos_test");
        std::fs::remove_dir_all(&out_root).ok();
        let template_dir = out_root.join("templates");
        std::fs::create_dir_all(&template_dir).unwrap();
        std::fs::write(template_dir.join("spheroid.conf"), "run @NUMTIMESTEPS\nseed @SEED\n")
            .unwrap();

        let mut paths = SystemPaths::default();
        paths.samos_output_dir = out_root.join("samos_output");
        paths.conf_template = template_dir.join("spheroid.conf");

        let p = params();
        run_simulation(&paths, &p, "20260101", "session", "t-10000_N-200", false).unwrap();

        let run_dir = paths.samos_output_dir.join("20260101").join("session").join("t-10000_N-200");
        let conf = std::fs::read_to_string(run_dir.join("configuration.conf")).unwrap();
        assert_eq!(conf, "run 10000\nseed 7\n");
        let particles = std::fs::read_to_string(run_dir.join("particles.txt")).unwrap();
        assert!(particles.starts_with("# Total of 200 cells"));
        let recorded: RunParams =
            serde_json::from_str(&std::fs::read_to_string(run_dir.join("params.json")).unwrap())
                .unwrap();
        assert_eq!(recorded.seed, 7);
        assert_eq!(recorded.dr, 0.1);
        std::fs::remove_dir_all(&out_root).ok();
    }

    #[test]
    fn sweep_runs_every_grid_point() {
        let out_root = std::env::temp_dir().join("sweep_runner_sweep_test");
        std::fs::remove_dir_all(&out_root).ok();
        let template_dir = out_root.join("templates");
        std::fs::create_dir_all(&template_dir).unwrap();
        std::fs::write(template_dir.join("spheroid.conf"), "div @DIVRATE v0 @V0\n").unwrap();

        let mut paths = SystemPaths::default();
        paths.samos_output_dir = out_root.join("samos_output");
        paths.conf_template = template_dir.join("spheroid.conf");

        let range_1 = SweepRange {
            name: "cell_division_rate".to_string(),
            short: "div".to_string(),
            kind: RangeKind::Linear,
            start: 0.1,
            end: 0.2,
            num: 2,
            values: Vec::new(),
        };
        let range_2 = SweepRange {
            name: "v0".to_string(),
            short: "v0".to_string(),
            kind: RangeKind::Linear,
            start: 0.3,
            end: 0.4,
            num: 2,
            values: Vec::new(),
        };
        run_sweep(
            &paths,
            &params(),
            SweepSpec::TwoD(range_1.clone(), range_2),
            "group",
            false,
            false,
        )
        .unwrap();

        let session_dir = paths
            .samos_output_dir
            .join("group")
            .join("div_linear_0.1-0.2_#2_vs_v0_linear_0.3-0.4_#2");
        let mut runs: Vec<String> = std::fs::read_dir(&session_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        runs.sort();
        assert_eq!(
            runs,
            vec![
                "t-10000_N-200_div-0.1_v0-0.3",
                "t-10000_N-200_div-0.1_v0-0.4",
                "t-10000_N-200_div-0.2_v0-0.3",
                "t-10000_N-200_div-0.2_v0-0.4",
            ]
        );
        assert_eq!(range_1.values(), vec![0.1, 0.2]);
        std::fs::remove_dir_all(&out_root).ok();
    }
}

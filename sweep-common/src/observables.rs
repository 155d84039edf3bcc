use crate::error::AnalysisError;

/// Positions of one frame: N particles, 3 components each.
pub type Frame = Vec<[f64; 3]>;
/// Positions over a trajectory: T frames of N particles each.
/// Row `i` of frame `k` is assumed to be the same particle as row `i` of
/// frame `k+1`; `msd` validates that the count is conserved.
pub type Trajectory = Vec<Frame>;

fn norm(v: &[f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Radius of gyration of a point set, relative to the origin (no recentring):
/// `sqrt(mean(||x_i||^2))`.
pub fn radius_of_gyration(xyz: &[[f64; 3]]) -> Result<f64, AnalysisError> {
    if xyz.is_empty() {
        return Err(AnalysisError::DegenerateInput(
            "radius of gyration of zero particles".to_string(),
        ));
    }
    let sum_sq: f64 = xyz.iter().map(|p| p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sum();
    Ok((sum_sq / xyz.len() as f64).sqrt())
}

/// Distance-weighted centroid of a point set: the average position with each
/// particle weighted by its distance from the origin. This is deliberately
/// NOT a mass-weighted centre of mass; the weighting keeps results
/// comparable across the historical sweep data and must not be "fixed".
fn weighted_centroid(xyz: &[[f64; 3]]) -> Result<[f64; 3], AnalysisError> {
    let weights: Vec<f64> = xyz.iter().map(norm).collect();
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Err(AnalysisError::DegenerateInput(
            "all particles at the origin, distance weights sum to zero".to_string(),
        ));
    }
    let mut cm = [0.0; 3];
    for (p, w) in xyz.iter().zip(&weights) {
        for k in 0..3 {
            cm[k] += p[k] * w;
        }
    }
    for c in &mut cm {
        *c /= total;
    }
    Ok(cm)
}

/// Per-particle distances from the distance-weighted centroid: compute the
/// centroid of the cloud, subtract it, return `||x_i - x_cm||` in row order.
pub fn radial_distances(xyz: &[[f64; 3]]) -> Result<Vec<f64>, AnalysisError> {
    let cm = weighted_centroid(xyz)?;
    Ok(xyz
        .iter()
        .map(|p| norm(&[p[0] - cm[0], p[1] - cm[1], p[2] - cm[2]]))
        .collect())
}

/// A binned radial volume-fraction profile.
#[derive(Debug, Clone, Default)]
pub struct DensityProfile {
    /// Shell centre radii, starting at `dr` with spacing `dr = 2*mean(radius)`.
    pub r_bins: Vec<f64>,
    /// Volume fraction per shell, normalised by its maximum.
    pub phi: Vec<f64>,
    /// Smallest bin radius where the normalised profile drops to <= 1/e.
    pub core_radius: Option<f64>,
    /// Largest observed radial distance.
    pub invasion_radius: Option<f64>,
}

/// Radial density profile from per-particle distances and radii.
///
/// Particles are assigned to every shell whose centre lies within `dr/2` of
/// their distance (inclusive). The windows of adjacent shells overlap, so a
/// particle near a shell boundary is counted in both shells; this inherited
/// binning convention is pinned by a test and kept as-is. Fewer than two
/// particles yield an empty profile.
pub fn density_profile(r: &[f64], radius: &[f64]) -> DensityProfile {
    if r.len() < 2 || r.len() != radius.len() {
        return DensityProfile::default();
    }
    let r_max = r.iter().cloned().fold(f64::MIN, f64::max);
    let dr = 2.0 * radius.iter().sum::<f64>() / radius.len() as f64;
    if dr <= 0.0 {
        return DensityProfile::default();
    }

    let mut r_bins = Vec::new();
    let mut k = 1usize;
    while (k as f64) * dr < r_max + dr {
        r_bins.push(k as f64 * dr);
        k += 1;
    }

    let particle_volume: Vec<f64> = radius
        .iter()
        .map(|rad| (4.0 / 3.0) * std::f64::consts::PI * rad.powi(3))
        .collect();

    let mut phi: Vec<f64> = r_bins
        .iter()
        .map(|&bin| {
            let shell_volume = dr * 4.0 * std::f64::consts::PI * bin * bin;
            let in_shell: f64 = r
                .iter()
                .zip(&particle_volume)
                .filter(|(&ri, _)| bin - dr / 2.0 <= ri && ri <= bin + dr / 2.0)
                .map(|(_, &v)| v)
                .sum();
            in_shell / shell_volume
        })
        .collect();

    let phi_max = phi.iter().cloned().fold(f64::MIN, f64::max);
    if phi_max > 0.0 {
        for p in &mut phi {
            *p /= phi_max;
        }
    }

    let core_radius = r_bins
        .iter()
        .zip(&phi)
        .filter(|(_, &p)| p <= 1.0 / std::f64::consts::E)
        .map(|(&b, _)| b)
        .fold(None, |acc: Option<f64>, b| Some(acc.map_or(b, |a| a.min(b))));

    DensityProfile {
        r_bins,
        phi,
        core_radius,
        invasion_radius: Some(r_max),
    }
}

/// Unwraps a periodic trajectory in place, per particle per axis.
///
/// A raw frame-to-frame jump of magnitude >= `box_length/2` is a boundary
/// crossing; the accumulated offset for that particle axis gains or loses
/// one box length and every later frame is shifted by the running offset.
/// Tracking offsets against the *raw* previous frame keeps repeated
/// crossings correct. A non-finite or non-positive `box_length` disables
/// unwrapping (open boundaries).
pub fn unwrap_periodic(traj: &mut Trajectory, box_length: f64) {
    if traj.len() < 2 || !box_length.is_finite() || box_length <= 0.0 {
        return;
    }
    let n = traj[0].len();
    let half = box_length / 2.0;
    let mut offsets = vec![[0.0f64; 3]; n];
    let mut prev_raw = traj[0].clone();
    for frame in traj.iter_mut().skip(1) {
        for (i, p) in frame.iter_mut().enumerate().take(n) {
            for k in 0..3 {
                let raw = p[k];
                let diff = raw - prev_raw[i][k];
                if diff >= half {
                    offsets[i][k] -= box_length;
                } else if diff <= -half {
                    offsets[i][k] += box_length;
                }
                prev_raw[i][k] = raw;
                p[k] = raw + offsets[i][k];
            }
        }
    }
}

/// Subtracts the distance-weighted centroid from every frame in place.
pub fn remove_weighted_cm(traj: &mut Trajectory) -> Result<(), AnalysisError> {
    for frame in traj.iter_mut() {
        let cm = weighted_centroid(frame)?;
        for p in frame.iter_mut() {
            for k in 0..3 {
                p[k] -= cm[k];
            }
        }
    }
    Ok(())
}

/// How lag times are spaced over the trajectory length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LagSpacing {
    /// Regular spacing derived from the correlation time and sampling interval.
    Linear,
    /// Log-spaced multiples of the sampling interval.
    Log,
}

/// Parameters for a mean-squared-displacement computation.
#[derive(Debug, Clone)]
pub struct MsdOptions {
    /// Periodic box edge; `f64::INFINITY` for open boundaries.
    pub box_length: f64,
    /// Correlation time (1/Dr), used to thin the linear lag set.
    pub tau: f64,
    /// Sampling interval between frames (`freq * dt`); the smallest lag.
    pub freqdt: f64,
    /// Remove the distance-weighted centroid per frame before unwrapping.
    pub subtract_cm: bool,
    pub spacing: LagSpacing,
}

/// Mean-squared displacement per lag time, with the standard error of the
/// per-reference-time mean.
#[derive(Debug, Clone)]
pub struct MsdCurve {
    pub lag_times: Vec<f64>,
    pub msd: Vec<f64>,
    pub msd_err: Vec<f64>,
}

const TIME_MATCH_TOL: f64 = 1e-6;

fn find_time_index(times: &[f64], target: f64) -> Option<usize> {
    // Times are sorted ascending; frames may be missing, so look the target
    // up by value instead of assuming a regular grid.
    let idx = times.partition_point(|&t| t < target - TIME_MATCH_TOL);
    if idx < times.len() && (times[idx] - target).abs() <= TIME_MATCH_TOL {
        Some(idx)
    } else {
        None
    }
}

fn lag_set(times: &[f64], tau: f64, freqdt: f64, spacing: LagSpacing) -> Vec<f64> {
    let t_max = times.iter().cloned().fold(f64::MIN, f64::max);
    match spacing {
        LagSpacing::Linear => {
            // Thin by tau only when it exceeds a sampling interval that is
            // itself coarser than unity; otherwise step by the interval.
            let step = if tau > freqdt && freqdt > 1.0 { tau } else { freqdt };
            let mut lags = Vec::new();
            let mut k = 0usize;
            loop {
                let lag = freqdt + k as f64 * step;
                if lag >= t_max {
                    break;
                }
                lags.push(lag);
                k += 1;
            }
            lags
        }
        LagSpacing::Log => {
            // Log-spaced frame separations: 10^u for u in [0, log10(Tmax/freqdt)),
            // rounded to whole sampling intervals, deduplicated.
            let max_sep = t_max / freqdt;
            if max_sep <= 1.0 {
                return Vec::new();
            }
            let exp_max = max_sep.log10();
            let points = 50usize;
            let mut seps: Vec<u64> = (0..points)
                .map(|i| {
                    let u = exp_max * i as f64 / points as f64;
                    10f64.powf(u).round() as u64
                })
                .collect();
            seps.sort_unstable();
            seps.dedup();
            seps.into_iter()
                .map(|s| s as f64 * freqdt)
                .filter(|&lag| lag < t_max)
                .collect()
        }
    }
}

/// Mean-squared displacement over a trajectory.
///
/// Optionally removes the distance-weighted centroid per frame, unwraps the
/// periodic boundary, then for every lag time averages the per-particle
/// squared displacement between every frame pair (`t0`, `t0 + lag`) that
/// exists in the data. Reference times whose partner frame is missing are
/// skipped. Returns the per-lag mean and the standard error of that mean
/// over reference times.
pub fn msd(
    positions: &Trajectory,
    times: &[f64],
    opts: &MsdOptions,
) -> Result<MsdCurve, AnalysisError> {
    if positions.len() != times.len() {
        return Err(AnalysisError::DegenerateInput(format!(
            "{} frames but {} time values",
            positions.len(),
            times.len()
        )));
    }
    if positions.len() < 2 {
        return Err(AnalysisError::DegenerateInput(
            "need at least two frames for displacement statistics".to_string(),
        ));
    }
    let n = positions[0].len();
    if n == 0 {
        return Err(AnalysisError::DegenerateInput("empty frames".to_string()));
    }
    // Displacements are positional: row i must be the same particle in every
    // frame, which requires a conserved particle count.
    if let Some(bad) = positions.iter().position(|f| f.len() != n) {
        return Err(AnalysisError::DegenerateInput(format!(
            "particle count changes at frame {} ({} -> {})",
            bad,
            n,
            positions[bad].len()
        )));
    }

    let mut traj = positions.clone();
    if opts.subtract_cm {
        remove_weighted_cm(&mut traj)?;
    }
    unwrap_periodic(&mut traj, opts.box_length);

    let t_max = times.iter().cloned().fold(f64::MIN, f64::max);
    let lags = lag_set(times, opts.tau, opts.freqdt, opts.spacing);

    let mut out = MsdCurve {
        lag_times: Vec::with_capacity(lags.len()),
        msd: Vec::with_capacity(lags.len()),
        msd_err: Vec::with_capacity(lags.len()),
    };

    for lag in lags {
        let mut samples = Vec::new();
        for (i0, &t0) in times.iter().enumerate() {
            if t0 + lag > t_max + TIME_MATCH_TOL {
                continue;
            }
            let Some(i1) = find_time_index(times, t0 + lag) else {
                continue;
            };
            let mean_sq: f64 = traj[i1]
                .iter()
                .zip(&traj[i0])
                .map(|(a, b)| {
                    let d = [a[0] - b[0], a[1] - b[1], a[2] - b[2]];
                    d[0] * d[0] + d[1] * d[1] + d[2] * d[2]
                })
                .sum::<f64>()
                / n as f64;
            samples.push(mean_sq);
        }
        if samples.is_empty() {
            continue;
        }
        let count = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / count;
        let var = samples.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / count;
        out.lag_times.push(lag);
        out.msd.push(mean);
        out.msd_err.push(var.sqrt() / count.sqrt());
    }
    Ok(out)
}

/// Least-squares slope of `log10(msd)` against `log10(lag)`, over strictly
/// positive pairs. Slope ~1 indicates diffusive motion, ~2 ballistic.
/// Returns `(slope, intercept)`, or None with fewer than two usable points.
pub fn log_log_slope(lag_times: &[f64], msd: &[f64]) -> Option<(f64, f64)> {
    let pts: Vec<(f64, f64)> = lag_times
        .iter()
        .zip(msd)
        .filter(|(&t, &m)| t > 0.0 && m > 0.0)
        .map(|(&t, &m)| (t.log10(), m.log10()))
        .collect();
    if pts.len() < 2 {
        return None;
    }
    let count = pts.len() as f64;
    let mean_x = pts.iter().map(|p| p.0).sum::<f64>() / count;
    let mean_y = pts.iter().map(|p| p.1).sum::<f64>() / count;
    let cov: f64 = pts.iter().map(|p| (p.0 - mean_x) * (p.1 - mean_y)).sum();
    let var: f64 = pts.iter().map(|p| (p.0 - mean_x) * (p.0 - mean_x)).sum();
    if var == 0.0 {
        return None;
    }
    let slope = cov / var;
    Some((slope, mean_y - slope * mean_x))
}

use anyhow::{Context, Result};
use rand::prelude::*;
use rand_distr::UnitSphere;
use std::io::Write;
use std::path::Path;

/// Close-packing fraction used to size a spheroid for N particles.
const SPHERE_PACKING: f64 = 0.74;

/// One particle of the initial configuration.
#[derive(Debug, Clone)]
pub struct Cell {
    pub id: usize,
    /// Particle group: 1 = cell, 2 = tracker/ECM.
    pub group: u32,
    pub radius: f64,
    pub position: [f64; 3],
    pub velocity: [f64; 3],
    pub director: [f64; 3],
}

impl Cell {
    fn new(id: usize, group: u32, radius: f64) -> Self {
        Cell {
            id,
            group,
            radius,
            position: [0.0; 3],
            velocity: [0.0; 3],
            director: [0.0; 3],
        }
    }
}

/// Uniform draw from the polydispersity window `radius * U(1 - poly/2, 1 + poly/2)`.
fn polydisperse_radius(rng: &mut StdRng, radius: f64, poly: f64) -> f64 {
    radius * rng.random_range((1.0 - 0.5 * poly)..=(1.0 + 0.5 * poly))
}

/// Rejection-free uniform sample inside a ball: `r = R * U^(1/3)` along a
/// uniformly random direction.
fn sample_in_ball(rng: &mut StdRng, ball_radius: f64) -> [f64; 3] {
    let dir: [f64; 3] = rng.sample(UnitSphere);
    let r = ball_radius * rng.random_range(0.0..1.0f64).cbrt();
    [dir[0] * r, dir[1] * r, dir[2] * r]
}

/// Spheroid of `cell_count` cells packed in a ball, with
/// `tracker_count` tracker particles (group 2) mixed in when requested.
/// Trackers take part in the packing-fraction sizing of the ball and keep
/// the exact mean radius (no polydispersity).
pub fn spheroid(
    cell_count: usize,
    cell_radius: f64,
    poly: f64,
    tracker_count: usize,
    rng: &mut StdRng,
) -> Vec<Cell> {
    let total = cell_count + tracker_count;
    let ball_radius = (total as f64 / SPHERE_PACKING).cbrt() * cell_radius;
    let mut cells: Vec<Cell> = (0..cell_count)
        .map(|i| Cell::new(i, 1, cell_radius))
        .chain((cell_count..total).map(|j| Cell::new(j, 2, cell_radius)))
        .collect();
    for cell in &mut cells {
        cell.position = sample_in_ball(rng, ball_radius);
        cell.director = rng.sample(UnitSphere);
        if cell.group == 1 {
            cell.radius = polydisperse_radius(rng, cell_radius, poly);
        }
    }
    cells
}

/// Plane of cells filling an `L x L` square centred at the origin to the
/// requested packing fraction, with in-plane directors.
pub fn plane(box_l: f64, packing: f64, cell_radius: f64, poly: f64, rng: &mut StdRng) -> Vec<Cell> {
    let area = box_l * box_l;
    let count = (packing * area / (std::f64::consts::PI * cell_radius * cell_radius)) as usize;
    (0..count)
        .map(|i| {
            let mut cell = Cell::new(i, 1, polydisperse_radius(rng, cell_radius, poly));
            cell.position = [
                box_l * rng.random_range(-0.5..0.5),
                box_l * rng.random_range(-0.5..0.5),
                0.0,
            ];
            let alpha = rng.random_range(0.0..std::f64::consts::TAU);
            cell.director = [alpha.cos(), alpha.sin(), 0.0];
            cell
        })
        .collect()
}

/// Spheroid of cells embedded in an ECM bath: ECM particles (group 2) fill
/// a cube of side `ecm_size` to packing fraction `ecm_phi`, and any ECM
/// particle landing inside the spheroid is discarded (ids recompacted).
pub fn spheroid_with_ecm(
    cell_count: usize,
    cell_radius: f64,
    cell_poly: f64,
    ecm_phi: f64,
    ecm_radius: f64,
    ecm_poly: f64,
    ecm_size: f64,
    rng: &mut StdRng,
) -> Vec<Cell> {
    let spheroid_radius = (cell_count as f64 / SPHERE_PACKING).cbrt() * cell_radius;
    let ecm_volume = ecm_size * ecm_size * ecm_size;
    let ecm_count =
        (ecm_phi * ecm_volume / ((4.0 / 3.0) * std::f64::consts::PI * ecm_radius.powi(3))) as usize;

    let mut cells = Vec::with_capacity(cell_count + ecm_count);
    for i in 0..cell_count {
        let mut cell = Cell::new(i, 1, polydisperse_radius(rng, cell_radius, cell_poly));
        cell.position = sample_in_ball(rng, spheroid_radius);
        cell.director = rng.sample(UnitSphere);
        cells.push(cell);
    }
    let mut discarded = 0usize;
    for _ in 0..ecm_count {
        let position = [
            ecm_size * rng.random_range(-0.5..0.5),
            ecm_size * rng.random_range(-0.5..0.5),
            ecm_size * rng.random_range(-0.5..0.5),
        ];
        let dist_sq: f64 = position.iter().map(|c| c * c).sum();
        if dist_sq <= spheroid_radius * spheroid_radius {
            discarded += 1;
            continue;
        }
        let mut cell = Cell::new(cells.len(), 2, polydisperse_radius(rng, ecm_radius, ecm_poly));
        cell.position = position;
        cell.director = rng.sample(UnitSphere);
        cells.push(cell);
    }
    if discarded > 0 {
        log::info!("- ECM: Deleted {}, {} left!", discarded, ecm_count - discarded);
    }
    cells
}

/// Writes the initial particle configuration as the fixed-width text table
/// the external executable expects: two comment lines (total count and
/// generation timestamp), a commented column header, one row per particle.
pub fn write_particles(cells: &[Cell], path: &Path) -> Result<()> {
    let mut out = std::fs::File::create(path)
        .with_context(|| format!("Failed to create particle file '{}'", path.display()))?;
    writeln!(out, "# Total of {} cells", cells.len())?;
    writeln!(out, "# Generated on : {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))?;
    writeln!(out, "# id  type radius  x   y   z   vx   vy   vz   nx   ny   nz")?;
    for cell in cells {
        let [x, y, z] = cell.position;
        let [vx, vy, vz] = cell.velocity;
        let [nx, ny, nz] = cell.director;
        writeln!(
            out,
            "{}  {}  {:.6} {:.6}  {:.6}  {:.6}  {:.6}  {:.6}  {:.6}  {:.6}  {:.6}  {:.6}",
            cell.id, cell.group, cell.radius, x, y, z, vx, vy, vz, nx, ny, nz
        )?;
    }
    log::info!("Saved {} particle(s) to '{}'!", cells.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn norm(v: &[f64; 3]) -> f64 {
        v.iter().map(|c| c * c).sum::<f64>().sqrt()
    }

    #[test]
    fn spheroid_packs_cells_inside_sized_ball() {
        let mut rng = rng();
        let cells = spheroid(200, 1.0, 0.3, 0, &mut rng);
        assert_eq!(cells.len(), 200);
        let ball_radius = (200.0f64 / SPHERE_PACKING).cbrt();
        for cell in &cells {
            assert_eq!(cell.group, 1);
            assert!(norm(&cell.position) <= ball_radius + 1e-9);
            assert!(cell.radius >= 0.85 && cell.radius <= 1.15);
            assert!((norm(&cell.director) - 1.0).abs() < 1e-9);
            assert_eq!(cell.velocity, [0.0; 3]);
        }
    }

    #[test]
    fn trackers_keep_exact_radius_and_grow_the_ball() {
        let mut rng = rng();
        let cells = spheroid(100, 1.0, 0.3, 50, &mut rng);
        assert_eq!(cells.len(), 150);
        let trackers: Vec<&Cell> = cells.iter().filter(|c| c.group == 2).collect();
        assert_eq!(trackers.len(), 50);
        for t in &trackers {
            assert_eq!(t.radius, 1.0);
        }
        // Ball is sized for all 150 particles.
        let ball_radius = (150.0f64 / SPHERE_PACKING).cbrt();
        assert!(cells.iter().any(|c| norm(&c.position) > (100.0f64 / SPHERE_PACKING).cbrt()));
        assert!(cells.iter().all(|c| norm(&c.position) <= ball_radius + 1e-9));
        // Ids are unique and contiguous.
        let mut ids: Vec<usize> = cells.iter().map(|c| c.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..150).collect::<Vec<_>>());
    }

    #[test]
    fn plane_fills_square_to_packing_fraction() {
        let mut rng = rng();
        let cells = plane(20.0, 0.5, 1.0, 0.0, &mut rng);
        let expected = (0.5 * 400.0 / std::f64::consts::PI) as usize;
        assert_eq!(cells.len(), expected);
        for cell in &cells {
            assert!(cell.position[0].abs() <= 10.0);
            assert!(cell.position[1].abs() <= 10.0);
            assert_eq!(cell.position[2], 0.0);
            assert_eq!(cell.director[2], 0.0);
            assert!((norm(&cell.director) - 1.0).abs() < 1e-9);
            assert_eq!(cell.radius, 1.0);
        }
    }

    #[test]
    fn ecm_bath_avoids_the_spheroid_interior() {
        let mut rng = rng();
        let cells = spheroid_with_ecm(50, 1.0, 0.3, 0.2, 1.0, 0.3, 20.0, &mut rng);
        let spheroid_radius = (50.0f64 / SPHERE_PACKING).cbrt();
        let ecm: Vec<&Cell> = cells.iter().filter(|c| c.group == 2).collect();
        assert!(!ecm.is_empty());
        for particle in &ecm {
            assert!(norm(&particle.position) > spheroid_radius);
            for c in particle.position {
                assert!(c.abs() <= 10.0);
            }
        }
        // Ids stay contiguous after the carve-out.
        let mut ids: Vec<usize> = cells.iter().map(|c| c.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..cells.len()).collect::<Vec<_>>());
    }

    #[test]
    fn particle_file_has_count_header_and_one_row_per_cell() {
        let mut rng = rng();
        let cells = spheroid(10, 1.0, 0.3, 0, &mut rng);
        let dir = std::env::temp_dir().join("sweep_runner_init_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("particles.txt");
        write_particles(&cells, &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "# Total of 10 cells");
        assert!(lines[1].starts_with("# Generated on :"));
        assert_eq!(lines.len(), 3 + 10);
        let first_row: Vec<&str> = lines[3].split_whitespace().collect();
        assert_eq!(first_row.len(), 12);
        assert_eq!(first_row[0], "0");
        assert_eq!(first_row[1], "1");
        std::fs::remove_file(&path).ok();
    }
}

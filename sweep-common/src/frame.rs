use crate::error::AnalysisError;
use std::path::Path;

/// Column names every frame table must expose after the header shift.
const REQUIRED_COLUMNS: [&str; 11] = [
    "type", "radius", "x", "y", "z", "vx", "vy", "vz", "nx", "ny", "nz",
];

/// One parsed per-timestep particle table (`.dat` file).
///
/// The raw header labels are shifted by one position relative to the data:
/// each label actually describes the *next* data column. `read` discards
/// the last label, renames it to the `none` placeholder and shifts every
/// other label left, so lookups by the canonical names (`type`, `radius`,
/// `x`..`nz`) land on the right data.
#[derive(Debug, Clone)]
pub struct FrameTable {
    columns: Vec<String>,
    /// Row-major values, `columns.len()` per row. A row that is one field
    /// short has its trailing `none` cell padded with NaN.
    data: Vec<f64>,
    nrows: usize,
}

impl FrameTable {
    /// Reads and parses one whitespace-delimited frame table.
    ///
    /// Fails with `FrameParse` if the file is empty, holds no data rows,
    /// a value does not parse as a float, a row's field count does not
    /// match the shifted header, or a required column is missing.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<FrameTable, AnalysisError> {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref)
            .map_err(|e| AnalysisError::frame_parse(path_ref, e.to_string()))?;
        Self::parse(&content).map_err(|reason| AnalysisError::frame_parse(path_ref, reason))
    }

    /// Parses frame table text. Split out of `read` so fixtures can pin the
    /// column-shift behaviour without touching the filesystem.
    pub fn parse(content: &str) -> Result<FrameTable, String> {
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());
        let header = lines.next().ok_or_else(|| "file is empty".to_string())?;

        let raw_labels: Vec<&str> = header.split_whitespace().collect();
        if raw_labels.len() < 2 {
            return Err(format!("header has only {} label(s)", raw_labels.len()));
        }

        // Shift: label u takes the name of label u+1, the last becomes 'none'.
        let ncols = raw_labels.len();
        let mut columns: Vec<String> = raw_labels[1..].iter().map(|s| s.to_string()).collect();
        columns.push("none".to_string());
        debug_assert_eq!(columns.len(), ncols);

        let mut data = Vec::new();
        let mut nrows = 0usize;
        for (line_no, line) in lines.enumerate() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            // The source format may omit the trailing placeholder field.
            if fields.len() != ncols && fields.len() != ncols - 1 {
                return Err(format!(
                    "row {} has {} field(s), expected {} (or {})",
                    line_no + 2,
                    fields.len(),
                    ncols,
                    ncols - 1
                ));
            }
            for field in &fields {
                let value: f64 = field
                    .parse()
                    .map_err(|_| format!("row {}: '{}' is not a number", line_no + 2, field))?;
                data.push(value);
            }
            if fields.len() == ncols - 1 {
                data.push(f64::NAN);
            }
            nrows += 1;
        }
        if nrows == 0 {
            return Err("no data rows".to_string());
        }

        let table = FrameTable { columns, data, nrows };
        for name in REQUIRED_COLUMNS {
            if table.column_index(name).is_none() {
                return Err(format!("required column '{}' missing after shift", name));
            }
        }
        Ok(table)
    }

    /// Number of particle rows.
    pub fn len(&self) -> usize {
        self.nrows
    }

    pub fn is_empty(&self) -> bool {
        self.nrows == 0
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    fn value(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.columns.len() + col]
    }

    /// All values of one named column, in row order.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.column_index(name)?;
        Some((0..self.nrows).map(|r| self.value(r, idx)).collect())
    }

    fn group_rows(&self, group: u32) -> Result<Vec<usize>, AnalysisError> {
        // Required-column check in `parse` guarantees 'type' exists.
        let type_idx = self.column_index("type").expect("'type' column present");
        let rows: Vec<usize> = (0..self.nrows)
            .filter(|&r| (self.value(r, type_idx) - f64::from(group)).abs() < 1e-9)
            .collect();
        if rows.is_empty() {
            return Err(AnalysisError::EmptyGroup { group });
        }
        Ok(rows)
    }

    fn project3(&self, group: u32, names: [&str; 3]) -> Result<Vec<[f64; 3]>, AnalysisError> {
        let rows = self.group_rows(group)?;
        let idx = names.map(|n| self.column_index(n).expect("required column present"));
        Ok(rows
            .into_iter()
            .map(|r| [self.value(r, idx[0]), self.value(r, idx[1]), self.value(r, idx[2])])
            .collect())
    }

    /// Positions of all particles of `group`, in row order.
    /// `EmptyGroup` when no row matches (expected for absent tracker/ECM groups).
    pub fn positions(&self, group: u32) -> Result<Vec<[f64; 3]>, AnalysisError> {
        self.project3(group, ["x", "y", "z"])
    }

    /// Velocities of all particles of `group`, in row order.
    pub fn velocities(&self, group: u32) -> Result<Vec<[f64; 3]>, AnalysisError> {
        self.project3(group, ["vx", "vy", "vz"])
    }

    /// Radii of all particles of `group`, in row order.
    pub fn radii(&self, group: u32) -> Result<Vec<f64>, AnalysisError> {
        let rows = self.group_rows(group)?;
        let idx = self.column_index("radius").expect("required column present");
        Ok(rows.into_iter().map(|r| self.value(r, idx)).collect())
    }
}

/// Extracts the integer time index from a frame file name: the last
/// `_`-separated token of the stem (e.g. `cells_0001000.dat` -> 1000).
pub fn time_index_from_filename(path: &Path) -> Result<i64, AnalysisError> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| AnalysisError::frame_parse(path, "file name is not valid UTF-8"))?;
    let token = stem.rsplit('_').next().unwrap_or(stem);
    token
        .parse::<i64>()
        .map_err(|_| AnalysisError::frame_parse(path, format!("no time index in stem '{}'", stem)))
}

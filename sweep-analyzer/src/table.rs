use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;

/// A long-format result table assembled column-wise: every metric appends
/// to its named column, columns keep first-insertion order, and columns
/// that are missing for some rows are padded with empty cells on write.
#[derive(Debug, Default)]
pub struct ResultTable {
    columns: Vec<String>,
    data: HashMap<String, Vec<String>>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one value to the named column, creating it on first use.
    pub fn add(&mut self, tag: &str, value: impl Into<String>) {
        if !self.data.contains_key(tag) {
            self.columns.push(tag.to_string());
            self.data.insert(tag.to_string(), Vec::new());
        }
        self.data.get_mut(tag).expect("column just ensured").push(value.into());
    }

    /// Number of rows (the longest column).
    pub fn rows(&self) -> usize {
        self.data.values().map(Vec::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }

    /// Rescales a numeric column in place: `v -> (v - min(v)) * scale`.
    /// Non-numeric cells are left untouched.
    pub fn rescale_shifted(&mut self, tag: &str, scale: f64) {
        let Some(values) = self.data.get_mut(tag) else {
            return;
        };
        let parsed: Vec<Option<f64>> = values.iter().map(|v| v.parse().ok()).collect();
        let Some(min) = parsed.iter().flatten().cloned().fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a: f64| a.min(v)))
        }) else {
            return;
        };
        for (cell, p) in values.iter_mut().zip(parsed) {
            if let Some(v) = p {
                *cell = format!("{}", (v - min) * scale);
            }
        }
    }

    /// Drains the table row-wise through a callback, padding rows shorter
    /// than the longest column with empty cells so consumers stay
    /// rectangular.
    pub fn into_rows(self, mut sink: impl FnMut(&str, String)) {
        let rows = self.rows();
        let ResultTable { columns, mut data } = self;
        for row in 0..rows {
            for column in &columns {
                let cell = data
                    .get_mut(column)
                    .and_then(|col| col.get_mut(row).map(std::mem::take))
                    .unwrap_or_default();
                sink(column, cell);
            }
        }
    }

    /// Writes the table as CSV, creating parent directories as needed.
    /// An empty table produces an empty file.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory '{}'", parent.display()))?;
        }
        if self.columns.is_empty() {
            std::fs::write(path, "")
                .with_context(|| format!("Failed to create CSV file '{}'", path.display()))?;
            return Ok(());
        }
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create CSV file '{}'", path.display()))?;
        writer.write_record(&self.columns)?;
        let n = self.rows();
        for row in 0..n {
            let record: Vec<&str> = self
                .columns
                .iter()
                .map(|c| {
                    self.data
                        .get(c)
                        .and_then(|col| col.get(row))
                        .map(String::as_str)
                        .unwrap_or("")
                })
                .collect();
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Renders a numeric sequence the way profile columns are stored in the
/// CSVs: bracketed, comma separated, floats keeping their decimal point.
pub fn render_list(values: &[f64]) -> String {
    let inner: Vec<String> = values.iter().map(|v| format!("{:?}", v)).collect();
    format!("[{}]", inner.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_keep_insertion_order_and_pad() {
        let mut table = ResultTable::new();
        table.add("time", "0");
        table.add("cell count", "10");
        table.add("time", "100");
        // "cell count" missing for the second row: padded on write.
        assert_eq!(table.rows(), 2);

        let dir = std::env::temp_dir().join("sweep_analyzer_table_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.csv");
        table.write_csv(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "time,cell count");
        assert_eq!(lines[1], "0,10");
        assert_eq!(lines[2], "100,");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn rescale_shifts_by_minimum() {
        let mut table = ResultTable::new();
        table.add("time", "1000");
        table.add("time", "2000");
        table.add("time", "4000");
        table.rescale_shifted("time", 0.01);
        let dir = std::env::temp_dir().join("sweep_analyzer_table_rescale");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.csv");
        table.write_csv(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\n0\n") || content.starts_with("time\n0\n"));
        assert!(content.contains("10"));
        assert!(content.contains("30"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn lists_render_with_decimal_points() {
        assert_eq!(render_list(&[2.0, 4.5]), "[2.0, 4.5]");
        assert_eq!(render_list(&[]), "[]");
    }
}

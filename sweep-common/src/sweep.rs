use serde::{Deserialize, Serialize};

/// One sweep parameter known to the folder-name convention: its short tag
/// (as embedded in folder names), the long label used as a CSV column, and
/// whether values are integral.
#[derive(Debug, Clone)]
pub struct VarSpec {
    pub short: &'static str,
    pub label: &'static str,
    pub integer: bool,
}

/// The catalogue of sweep parameters the batch driver knows how to lift out
/// of folder names into result columns.
pub fn var_catalog() -> Vec<VarSpec> {
    vec![
        VarSpec { short: "Nframes", label: "number of frames", integer: true },
        VarSpec { short: "Ncell", label: "initial cell count", integer: true },
        VarSpec { short: "N", label: "initial cell count", integer: true },
        VarSpec { short: "t", label: "# time steps", integer: true },
        VarSpec { short: "L", label: "box dimension L", integer: false },
        VarSpec { short: "phiecm", label: "ECM packing fraction phi", integer: false },
        VarSpec { short: "phi", label: "packing fraction phi", integer: false },
        VarSpec { short: "kce", label: "stiffness cell-ECM kce", integer: false },
        VarSpec { short: "divcell", label: "cell division rate", integer: false },
        VarSpec { short: "div", label: "cell division rate", integer: false },
        VarSpec { short: "v0", label: "propulsion v0", integer: false },
        VarSpec { short: "Ntrack", label: "track cell count", integer: true },
        VarSpec { short: "track", label: "track cell count", integer: true },
        VarSpec { short: "Dr", label: "rotational diffusion Dr", integer: false },
        VarSpec { short: "re", label: "potential re factor", integer: false },
        VarSpec { short: "alpha", label: "propulsion alpha", integer: false },
    ]
}

/// Splits a folder name into its `short-value` tokens.
pub fn split_tokens(folder_name: &str) -> Vec<&str> {
    folder_name.split('_').collect()
}

/// Value of the token whose short tag matches, if any. The tag is the text
/// before the first `-`, the value the text after the last `-`; a token
/// whose value does not parse is ignored (treated as absent).
pub fn token_value(tokens: &[&str], short: &str) -> Option<f64> {
    for token in tokens {
        let mut parts = token.split('-');
        if parts.next() != Some(short) {
            continue;
        }
        let value = token.rsplit('-').next()?;
        if let Ok(v) = value.parse::<f64>() {
            return Some(v);
        }
    }
    None
}

/// Whether a token with the given short tag is present at all (parsable or not).
pub fn has_token(tokens: &[&str], short: &str) -> bool {
    tokens.iter().any(|t| t.split('-').next() == Some(short))
}

/// All catalogued sweep parameters found in a folder name, as
/// `(label, value, integer)` triples in catalogue order. Each long label is
/// reported once (the first matching short tag wins); malformed tokens are
/// silently skipped.
pub fn parse_folder_vars(folder_name: &str) -> Vec<(&'static str, f64, bool)> {
    let tokens = split_tokens(folder_name);
    let mut found: Vec<(&'static str, f64, bool)> = Vec::new();
    for spec in var_catalog() {
        if found.iter().any(|(label, _, _)| *label == spec.label) {
            continue;
        }
        if let Some(value) = token_value(&tokens, spec.short) {
            found.push((spec.label, value, spec.integer));
        }
    }
    found
}

/// Rotational diffusion and box size from folder tokens, with the defaults
/// used when a run encodes neither: `Dr = 1.0` (correlation time 1) and an
/// infinite box (no periodic unwrapping).
pub fn read_dr_box(tokens: &[&str]) -> (f64, f64) {
    let dr = token_value(tokens, "Dr").unwrap_or(1.0);
    let box_l = token_value(tokens, "L").unwrap_or(f64::INFINITY);
    (dr, box_l)
}

/// Sampling-frequency override encoded in a session folder name: the value
/// of the last token when any token mentions `freq`.
pub fn freq_override(session_name: &str) -> Option<f64> {
    let tokens = split_tokens(session_name);
    if tokens.iter().any(|t| t.contains("freq")) {
        return tokens.last().and_then(|t| t.rsplit('-').next()).and_then(|v| v.parse().ok());
    }
    None
}

/// How a swept parameter's values are generated.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RangeKind {
    Linear,
    Log,
    Custom,
}

/// A one-parameter sweep specification.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SweepRange {
    /// Parameter name as understood by the runner (e.g. `cell_division_rate`).
    pub name: String,
    /// Short tag used in folder names (e.g. `div`).
    pub short: String,
    pub kind: RangeKind,
    pub start: f64,
    pub end: f64,
    pub num: usize,
    /// Explicit values for `RangeKind::Custom`.
    #[serde(default)]
    pub values: Vec<f64>,
}

/// Rounds to 5 decimals, the precision folder names are written with.
pub fn round5(x: f64) -> f64 {
    (x * 1e5).round() / 1e5
}

impl SweepRange {
    /// The swept values, rounded to folder-name precision.
    pub fn values(&self) -> Vec<f64> {
        let raw: Vec<f64> = match self.kind {
            RangeKind::Custom => self.values.clone(),
            RangeKind::Linear => {
                if self.num <= 1 {
                    vec![self.start]
                } else {
                    let step = (self.end - self.start) / (self.num - 1) as f64;
                    (0..self.num).map(|i| self.start + step * i as f64).collect()
                }
            }
            RangeKind::Log => {
                if self.num <= 1 {
                    vec![self.start]
                } else {
                    let lo = self.start.log10();
                    let hi = self.end.log10();
                    let step = (hi - lo) / (self.num - 1) as f64;
                    (0..self.num).map(|i| 10f64.powf(lo + step * i as f64)).collect()
                }
            }
        };
        raw.into_iter().map(round5).collect()
    }

    /// Session-folder label fragment: `short_kind_start-end_#num`.
    pub fn session_label(&self) -> String {
        let kind = match self.kind {
            RangeKind::Linear => "linear",
            RangeKind::Log => "log",
            RangeKind::Custom => "custom",
        };
        format!(
            "{}_{}_{}-{}_#{}",
            self.short,
            kind,
            format_value(self.start),
            format_value(self.end),
            self.values().len()
        )
    }
}

/// Formats a parameter value the way folder names expect: integral values
/// without a decimal point, everything else with the shortest round-trip
/// representation.
pub fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_values_parse_by_tag() {
        let tokens = split_tokens("t-10000_N-200_div-0.1_v0-0.2_re-1.15");
        assert_eq!(token_value(&tokens, "div"), Some(0.1));
        assert_eq!(token_value(&tokens, "t"), Some(10000.0));
        assert_eq!(token_value(&tokens, "v0"), Some(0.2));
        assert_eq!(token_value(&tokens, "Dr"), None);
        assert!(has_token(&tokens, "re"));
        assert!(!has_token(&tokens, "Dr"));
    }

    #[test]
    fn malformed_tokens_are_silently_skipped() {
        let tokens = split_tokens("div-abc_v0-0.3");
        assert_eq!(token_value(&tokens, "div"), None);
        assert_eq!(token_value(&tokens, "v0"), Some(0.3));
        // A bare token with no dash parses as absent, not as an error.
        let tokens = split_tokens("debug");
        assert_eq!(token_value(&tokens, "debug"), None);
    }

    #[test]
    fn folder_vars_map_to_long_labels() {
        let vars = parse_folder_vars("t-5000_N-100_div-0.05_v0-0.15");
        assert!(vars.contains(&("# time steps", 5000.0, true)));
        assert!(vars.contains(&("initial cell count", 100.0, true)));
        assert!(vars.contains(&("cell division rate", 0.05, false)));
        assert!(vars.contains(&("propulsion v0", 0.15, false)));
        // 'N' and 'Ncell' share a label; it appears only once.
        let labels: Vec<_> = vars.iter().map(|v| v.0).collect();
        let count = labels.iter().filter(|l| **l == "initial cell count").count();
        assert_eq!(count, 1);
    }

    #[test]
    fn dr_and_box_defaults_disable_unwrapping() {
        let tokens = split_tokens("t-1000_N-50");
        let (dr, box_l) = read_dr_box(&tokens);
        assert_eq!(dr, 1.0);
        assert!(box_l.is_infinite());

        let tokens = split_tokens("v0-0.2_Dr-0.1_L-40");
        let (dr, box_l) = read_dr_box(&tokens);
        assert_eq!(dr, 0.1);
        assert_eq!(box_l, 40.0);
    }

    #[test]
    fn freq_override_reads_last_token() {
        assert_eq!(freq_override("v0_linear_0.1-1_#5_freq-100"), Some(100.0));
        assert_eq!(freq_override("v0_linear_0.1-1_#5"), None);
    }

    #[test]
    fn linear_and_log_ranges_round_to_five_decimals() {
        let range = SweepRange {
            name: "cell_division_rate".to_string(),
            short: "div".to_string(),
            kind: RangeKind::Linear,
            start: 0.01,
            end: 0.1,
            num: 10,
            values: Vec::new(),
        };
        let values = range.values();
        assert_eq!(values.len(), 10);
        assert_eq!(values[0], 0.01);
        assert_eq!(values[9], 0.1);
        assert_eq!(values[1], 0.02);

        let range = SweepRange {
            name: "v0".to_string(),
            short: "v0".to_string(),
            kind: RangeKind::Log,
            start: 0.01,
            end: 1.0,
            num: 3,
            values: Vec::new(),
        };
        assert_eq!(range.values(), vec![0.01, 0.1, 1.0]);

        let range = SweepRange {
            name: "re_fact".to_string(),
            short: "re".to_string(),
            kind: RangeKind::Custom,
            start: 0.0,
            end: 0.0,
            num: 0,
            values: vec![1.0, 1.15, 1.3],
        };
        assert_eq!(range.values(), vec![1.0, 1.15, 1.3]);
    }

    #[test]
    fn session_label_encodes_range() {
        let range = SweepRange {
            name: "cell_division_rate".to_string(),
            short: "div".to_string(),
            kind: RangeKind::Linear,
            start: 0.01,
            end: 0.1,
            num: 5,
            values: Vec::new(),
        };
        assert_eq!(range.session_label(), "div_linear_0.01-0.1_#5");
    }

    #[test]
    fn value_formatting_matches_folder_convention() {
        assert_eq!(format_value(10000.0), "10000");
        assert_eq!(format_value(0.1), "0.1");
        assert_eq!(format_value(round5(0.300000004)), "0.3");
        assert_eq!(format_value(1.15), "1.15");
    }
}

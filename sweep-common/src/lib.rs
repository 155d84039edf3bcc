pub mod config;
pub mod error;
pub mod frame;
pub mod observables;
pub mod sweep;

// Re-export key types for easier use by dependent crates
pub use config::SystemPaths;
pub use error::AnalysisError;
pub use frame::{time_index_from_filename, FrameTable};
pub use observables::{
    density_profile, log_log_slope, msd, radial_distances, radius_of_gyration, remove_weighted_cm,
    unwrap_periodic, DensityProfile, LagSpacing, MsdCurve, MsdOptions,
};
pub use sweep::{
    format_value, freq_override, has_token, parse_folder_vars, read_dr_box, round5, split_tokens,
    token_value, var_catalog, RangeKind, SweepRange, VarSpec,
};

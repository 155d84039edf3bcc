use std::path::PathBuf;
use thiserror::Error;

/// Error kinds raised while ingesting or analysing simulation output.
///
/// The batch driver treats these as per-folder failures: a folder that
/// produces one of these is logged and skipped, never aborting the batch.
/// `EmptyGroup` is an expected condition (e.g. a run without tracker/ECM
/// particles) and callers must be able to tell it apart from a parse error.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// A `.dat` frame table could not be parsed into the expected columns.
    #[error("malformed frame table '{}': {reason}", .path.display())]
    FrameParse { path: PathBuf, reason: String },

    /// A particle group selection matched no rows.
    #[error("no particles of group {group} in frame")]
    EmptyGroup { group: u32 },

    /// A result root or session folder does not exist on disk.
    #[error("sweep folder missing: '{}'", .0.display())]
    SweepFolderMissing(PathBuf),

    /// Input that would make an observable undefined (e.g. zero particles
    /// for a radius of gyration, or an all-zero weight vector).
    #[error("degenerate input: {0}")]
    DegenerateInput(String),
}

impl AnalysisError {
    /// Helper for frame parse failures.
    pub fn frame_parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        AnalysisError::FrameParse {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

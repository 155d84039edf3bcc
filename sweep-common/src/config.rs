use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// Filesystem layout: where the external executable lives, where it writes
// its per-run output folders, and where analysis summaries go. Constructed
// explicitly and passed into the runner/driver at call time; there is no
// process-wide singleton.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SystemPaths {
    /// The external SAMoS executable, invoked as `samos <config file>`.
    pub samos_executable: PathBuf,
    /// Root under which run output folders are created (group/session/run).
    pub samos_output_dir: PathBuf,
    /// Root under which analysis CSV summaries are written.
    pub analysis_output_dir: PathBuf,
    /// Configuration template for spheroid runs (`@TOKEN` placeholders).
    pub conf_template: PathBuf,
    /// Template for spheroid runs with embedded tracker cells.
    #[serde(default)]
    pub conf_template_trackers: Option<PathBuf>,
    /// Template for plane (2D) runs.
    #[serde(default)]
    pub conf_template_plane: Option<PathBuf>,
    /// Template for plane runs with active brownian particles.
    #[serde(default)]
    pub conf_template_plane_abp: Option<PathBuf>,
}

impl Default for SystemPaths {
    fn default() -> Self {
        SystemPaths {
            samos_executable: PathBuf::from("samos"),
            samos_output_dir: PathBuf::from("samos_output"),
            analysis_output_dir: PathBuf::from("analysis_results"),
            conf_template: PathBuf::from("templates/spheroid.conf"),
            conf_template_trackers: None,
            conf_template_plane: None,
            conf_template_plane_abp: None,
        }
    }
}

impl SystemPaths {
    /// Loads the path configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config: SystemPaths = toml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML from '{}': {}", path_ref.display(), e))?;

        // --- Add Validation ---
        if config.samos_output_dir.as_os_str().is_empty() {
            anyhow::bail!("samos_output_dir must not be empty.");
        }
        if config.analysis_output_dir.as_os_str().is_empty() {
            anyhow::bail!("analysis_output_dir must not be empty.");
        }

        Ok(config)
    }

    /// Loads from a file when one is given, otherwise falls back to the
    /// relative-path defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Selects the configuration template matching the run flavour.
    /// Falls back to the base template when a specialised one is not set.
    pub fn conf_template_for(&self, plane: bool, plane_abp: bool, trackers: bool) -> &Path {
        if trackers {
            if let Some(p) = &self.conf_template_trackers {
                return p;
            }
        } else if plane {
            if plane_abp {
                if let Some(p) = &self.conf_template_plane_abp {
                    return p;
                }
            }
            if let Some(p) = &self.conf_template_plane {
                return p;
            }
        }
        &self.conf_template
    }
}

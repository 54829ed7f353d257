//! User-level settings: which backends to use and where their executables live.
//!
//! Read from `$XDG_CONFIG_HOME/condaspace/config.json` (falling back to
//! `~/.config/condaspace/config.json`), then overridden by `CONDASPACE_*`
//! environment variables.

use crate::CoreError;
use condaspace_runtime::SolverOptions;
use condaspace_schema::{current_platform, Platform};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// `process` or `mock`.
    pub solver: String,
    pub solver_exe: Option<String>,
    /// `conda` or `metadata`.
    pub installer: String,
    pub conda_exe: String,
    /// `conda-pypi` or `disabled`.
    pub pypi_converter: String,
    /// Overrides the detected platform.
    pub platform: Option<String>,
    /// Package index for the `mock` solver.
    pub mock_index: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            solver: "process".to_owned(),
            solver_exe: None,
            installer: "conda".to_owned(),
            conda_exe: "conda".to_owned(),
            pypi_converter: "conda-pypi".to_owned(),
            platform: None,
            mock_index: None,
        }
    }
}

impl Settings {
    /// Load the user config file if present, then apply environment overrides.
    pub fn load_default() -> Result<Self, CoreError> {
        let base = match default_config_path() {
            Some(path) if path.is_file() => Self::load(&path)?,
            _ => Self::default(),
        };
        Ok(base.apply_env(|key| std::env::var(key).ok()))
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| CoreError::Settings(format!("invalid config {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    #[must_use]
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = non_empty("CONDASPACE_SOLVER") {
            self.solver = v;
        }
        if let Some(v) = non_empty("CONDASPACE_SOLVER_EXE") {
            self.solver_exe = Some(v);
        }
        if let Some(v) = non_empty("CONDASPACE_INSTALLER") {
            self.installer = v;
        }
        if let Some(v) = non_empty("CONDASPACE_CONDA_EXE") {
            self.conda_exe = v;
        }
        if let Some(v) = non_empty("CONDASPACE_PYPI_CONVERTER") {
            self.pypi_converter = v;
        }
        if let Some(v) = non_empty("CONDASPACE_PLATFORM") {
            self.platform = Some(v);
        }
        if let Some(v) = non_empty("CONDASPACE_MOCK_INDEX") {
            self.mock_index = Some(PathBuf::from(v));
        }
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
            .as_deref()
            .map_or_else(current_platform, Platform::from)
    }

    pub fn solver_options(&self) -> SolverOptions {
        SolverOptions {
            executable: self.solver_exe.clone(),
            mock_index: self.mock_index.clone(),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(base.join("condaspace").join("config.json"))
}

//! PyPI dependencies are installed by the external conda-pypi plugin.

use crate::RuntimeError;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::info;

pub trait PypiConverter: Send + Sync {
    fn name(&self) -> &str;

    /// Install PEP 508 requirements into an existing conda prefix.
    ///
    /// Fails with [`RuntimeError::ToolUnavailable`] when the converter is not
    /// installed; callers treat that as a warning, not a failed install.
    fn install(&self, prefix: &Path, requirements: &[String]) -> Result<(), RuntimeError>;
}

pub fn select_pypi_converter(
    name: &str,
    conda_exe: &str,
) -> Result<Box<dyn PypiConverter>, RuntimeError> {
    match name {
        "conda-pypi" => Ok(Box::new(CondaPypiConverter::new(conda_exe))),
        "disabled" => Ok(Box::new(DisabledPypiConverter)),
        other => Err(RuntimeError::ToolUnavailable {
            tool: other.to_owned(),
            hint: "supported PyPI converters: conda-pypi, disabled".to_owned(),
        }),
    }
}

/// Runs `<conda> pypi install --yes --prefix P <requirements>`.
pub struct CondaPypiConverter {
    conda: String,
}

impl CondaPypiConverter {
    pub fn new(conda: impl Into<String>) -> Self {
        Self {
            conda: conda.into(),
        }
    }

    fn plugin_installed(&self) -> bool {
        which::which(&self.conda).is_ok()
            && Command::new(&self.conda)
                .args(["pypi", "--help"])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .is_ok_and(|s| s.success())
    }
}

impl PypiConverter for CondaPypiConverter {
    fn name(&self) -> &'static str {
        "conda-pypi"
    }

    fn install(&self, prefix: &Path, requirements: &[String]) -> Result<(), RuntimeError> {
        if requirements.is_empty() {
            return Ok(());
        }
        if !self.plugin_installed() {
            return Err(unavailable());
        }
        info!(
            "installing {} PyPI requirements into {}",
            requirements.len(),
            prefix.display()
        );
        let output = Command::new(&self.conda)
            .args(["pypi", "install", "--yes", "--prefix"])
            .arg(prefix)
            .args(requirements)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(RuntimeError::InstallFailed(format!(
                "conda pypi install exited with code {}: {}",
                output.status.code().unwrap_or(1),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

/// Converter used when PyPI installs are turned off in settings.
pub struct DisabledPypiConverter;

impl PypiConverter for DisabledPypiConverter {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn install(&self, _prefix: &Path, requirements: &[String]) -> Result<(), RuntimeError> {
        if requirements.is_empty() {
            Ok(())
        } else {
            Err(unavailable())
        }
    }
}

fn unavailable() -> RuntimeError {
    RuntimeError::ToolUnavailable {
        tool: "conda-pypi".to_owned(),
        hint: "install it with 'conda install -n base conda-pypi'".to_owned(),
    }
}

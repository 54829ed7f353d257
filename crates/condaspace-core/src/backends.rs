use crate::concurrency::PrefixLock;
use crate::settings::Settings;
use crate::CoreError;
use condaspace_runtime::prefix::force_remove;
use condaspace_runtime::{
    select_installer, select_pypi_converter, select_solver, Installer, PypiConverter,
    RuntimeError, Solver,
};
use condaspace_schema::LockedPackage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// The external collaborators an engine drives.
pub struct Backends {
    pub solver: Box<dyn Solver>,
    pub installer: Box<dyn Installer>,
    pub pypi: Box<dyn PypiConverter>,
}

impl Backends {
    pub fn from_settings(settings: &Settings) -> Result<Self, CoreError> {
        Ok(Self {
            solver: select_solver(&settings.solver, &settings.solver_options())?,
            installer: select_installer(&settings.installer, &settings.conda_exe)?,
            pypi: select_pypi_converter(&settings.pypi_converter, &settings.conda_exe)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvInstallReport {
    pub environment: String,
    pub prefix: PathBuf,
    pub packages: usize,
    /// PyPI requirements left uninstalled because the converter is missing.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_pypi: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EnvInstallReport {
    pub fn failed(environment: &str, prefix: &Path, error: &CoreError) -> Self {
        Self {
            environment: environment.to_owned(),
            prefix: prefix.to_path_buf(),
            packages: 0,
            skipped_pypi: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Everything one prefix install needs.
pub struct PrefixInstall<'a> {
    pub environment: &'a str,
    pub prefix: &'a Path,
    pub lock_path: &'a Path,
    pub packages: &'a [LockedPackage],
    pub pypi_requirements: &'a [String],
    pub force_reinstall: bool,
}

/// Install exact packages into a prefix under its advisory lock, then hand
/// PyPI requirements to the converter. A missing converter is a warning.
pub fn install_prefix(
    backends: &Backends,
    job: &PrefixInstall<'_>,
) -> Result<EnvInstallReport, CoreError> {
    let _guard = PrefixLock::acquire(job.lock_path)?;
    let failed = |source: RuntimeError| CoreError::InstallFailed {
        environment: job.environment.to_owned(),
        source,
    };

    if job.force_reinstall && job.prefix.exists() {
        info!("removing {} before reinstall", job.prefix.display());
        force_remove(job.prefix).map_err(failed)?;
    }

    let report = backends
        .installer
        .install(job.prefix, job.packages)
        .map_err(failed)?;
    info!(
        "installed {} packages into {}",
        report.installed,
        job.prefix.display()
    );

    let mut skipped_pypi = Vec::new();
    if !job.pypi_requirements.is_empty() {
        match backends.pypi.install(job.prefix, job.pypi_requirements) {
            Ok(()) => {}
            Err(RuntimeError::ToolUnavailable { tool, hint }) => {
                warn!(
                    "{tool} is not available ({hint}); skipped PyPI dependencies of '{}': {}",
                    job.environment,
                    job.pypi_requirements.join(", ")
                );
                skipped_pypi = job.pypi_requirements.to_vec();
            }
            Err(e) => return Err(failed(e)),
        }
    }

    Ok(EnvInstallReport {
        environment: job.environment.to_owned(),
        prefix: report.prefix,
        packages: report.installed,
        skipped_pypi,
        error: None,
    })
}

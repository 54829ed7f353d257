use crate::prefix::PrefixRecord;
use crate::RuntimeError;
use condaspace_schema::LockedPackage;
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub prefix: PathBuf,
    /// Number of conda packages now recorded in the prefix.
    pub installed: usize,
}

/// Materializes an exact package list into a prefix.
///
/// Only conda records are installed; PyPI entries are left to the
/// [`crate::pypi::PypiConverter`]. Installing the same list twice is a no-op
/// in effect, so callers may retry after a failure.
pub trait Installer: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    fn install(&self, prefix: &Path, packages: &[LockedPackage])
        -> Result<InstallReport, RuntimeError>;
}

pub fn select_installer(name: &str, conda_exe: &str) -> Result<Box<dyn Installer>, RuntimeError> {
    match name {
        "conda" => Ok(Box::new(crate::process::CondaInstaller::new(conda_exe))),
        "metadata" => Ok(Box::new(MetadataInstaller)),
        other => Err(RuntimeError::InstallerUnavailable(other.to_owned())),
    }
}

/// Writes `conda-meta` records without fetching package payloads.
///
/// Produces a prefix that `list`, `info`, and `export` understand, which is
/// enough for CI dry runs and tests.
pub struct MetadataInstaller;

impl Installer for MetadataInstaller {
    fn name(&self) -> &'static str {
        "metadata"
    }

    fn available(&self) -> bool {
        true
    }

    fn install(
        &self,
        prefix: &Path,
        packages: &[LockedPackage],
    ) -> Result<InstallReport, RuntimeError> {
        let meta = prefix.join("conda-meta");
        fs::create_dir_all(&meta)?;

        let records: Vec<PrefixRecord> = packages
            .iter()
            .filter_map(LockedPackage::as_conda)
            .map(PrefixRecord::from)
            .collect();
        let wanted: BTreeSet<String> = records.iter().map(PrefixRecord::file_name).collect();

        for entry in fs::read_dir(&meta)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".json") && !wanted.contains(&name) {
                debug!("removing stale record {name}");
                fs::remove_file(entry.path())?;
            }
        }
        for record in &records {
            fs::write(
                meta.join(record.file_name()),
                serde_json::to_string_pretty(record)?,
            )?;
        }

        let mut history = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(meta.join("history"))?;
        writeln!(
            history,
            "==> {} <==\n# cmd: condaspace install",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S")
        )?;
        for record in &records {
            writeln!(history, "+{}", record.url)?;
        }

        Ok(InstallReport {
            prefix: prefix.to_path_buf(),
            installed: records.len(),
        })
    }
}

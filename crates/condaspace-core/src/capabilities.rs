//! Statically registered environment specifiers and exporters.
//!
//! A host tool (or the `env-create` and `export` commands) picks an entry
//! from these tables instead of discovering plugins at runtime.

use crate::backends::{install_prefix, Backends, EnvInstallReport, PrefixInstall};
use crate::resolver::resolve;
use crate::CoreError;
use condaspace_runtime::{RuntimeError, SolveRequest};
use condaspace_schema::{
    parse_manifest_file, ChannelPriority, EnvName, LockFile, LockedPackage, ManifestFormat,
    MatchSpec, PinnedEnvironment, Platform, LOCKFILE_NAME,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// What a specifier file asks to be installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentSource {
    /// Specs that still need a solve.
    Requested {
        channels: Vec<String>,
        channel_priority: Option<ChannelPriority>,
        specs: Vec<MatchSpec>,
        pypi_requirements: Vec<String>,
    },
    /// Exact packages, installed without solving.
    Explicit { packages: Vec<LockedPackage> },
}

pub trait EnvironmentSpecifier: Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, path: &Path) -> bool;

    fn load(
        &self,
        path: &Path,
        environment: &str,
        platform: &Platform,
    ) -> Result<EnvironmentSource, CoreError>;
}

pub trait Exporter: Sync {
    fn name(&self) -> &'static str;

    fn aliases(&self) -> &'static [&'static str];

    fn default_filenames(&self) -> &'static [&'static str];

    fn export(
        &self,
        pinned: &[PinnedEnvironment],
        channels: &BTreeMap<EnvName, Vec<String>>,
    ) -> Result<String, CoreError>;
}

/// Any of the three workspace manifests; yields the resolved specs of one environment.
pub struct WorkspaceManifestSpecifier;

impl EnvironmentSpecifier for WorkspaceManifestSpecifier {
    fn name(&self) -> &'static str {
        "conda-workspaces"
    }

    fn detect(&self, path: &Path) -> bool {
        match ManifestFormat::from_path(path) {
            Some(ManifestFormat::Pyproject) => std::fs::read_to_string(path)
                .is_ok_and(|text| ManifestFormat::Pyproject.has_workspace(&text)),
            Some(_) => true,
            None => false,
        }
    }

    fn load(
        &self,
        path: &Path,
        environment: &str,
        platform: &Platform,
    ) -> Result<EnvironmentSource, CoreError> {
        let config = parse_manifest_file(path)?.build()?;
        let resolved = resolve(&config, environment, platform)?;
        Ok(EnvironmentSource::Requested {
            channels: resolved.channel_urls(),
            channel_priority: config.channel_priority,
            specs: resolved.dependencies.values().cloned().collect(),
            pypi_requirements: resolved
                .pypi_dependencies
                .values()
                .map(condaspace_schema::PypiDependency::requirement)
                .collect(),
        })
    }
}

/// A `conda.lock` file; yields the exact packages of one environment.
pub struct LockfileSpecifier;

impl EnvironmentSpecifier for LockfileSpecifier {
    fn name(&self) -> &'static str {
        "conda-workspaces-lock"
    }

    fn detect(&self, path: &Path) -> bool {
        path.file_name().is_some_and(|n| n == LOCKFILE_NAME)
    }

    fn load(
        &self,
        path: &Path,
        environment: &str,
        platform: &Platform,
    ) -> Result<EnvironmentSource, CoreError> {
        let lock = LockFile::read_from_file(path)?;
        Ok(EnvironmentSource::Explicit {
            packages: lock.extract_explicit(environment, platform)?,
        })
    }
}

/// Writes installed environments in the lockfile format.
pub struct LockfileExporter;

impl Exporter for LockfileExporter {
    fn name(&self) -> &'static str {
        "conda-workspaces-lock"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["workspace-lock"]
    }

    fn default_filenames(&self) -> &'static [&'static str] {
        &[LOCKFILE_NAME]
    }

    fn export(
        &self,
        pinned: &[PinnedEnvironment],
        channels: &BTreeMap<EnvName, Vec<String>>,
    ) -> Result<String, CoreError> {
        Ok(LockFile::encode(pinned, channels).to_yaml_string()?)
    }
}

/// Checked in order; the lockfile comes first since it is the more specific match.
pub static ENVIRONMENT_SPECIFIERS: &[&dyn EnvironmentSpecifier] =
    &[&LockfileSpecifier, &WorkspaceManifestSpecifier];

pub static EXPORTERS: &[&dyn Exporter] = &[&LockfileExporter];

pub fn find_specifier(path: &Path) -> Option<&'static dyn EnvironmentSpecifier> {
    ENVIRONMENT_SPECIFIERS.iter().copied().find(|s| s.detect(path))
}

pub fn find_exporter(format: &str) -> Option<&'static dyn Exporter> {
    EXPORTERS
        .iter()
        .copied()
        .find(|e| e.name() == format || e.aliases().contains(&format))
}

/// Create a standalone environment at `prefix` from a manifest or lockfile.
pub fn create_environment(
    file: &Path,
    environment: &str,
    prefix: &Path,
    platform: &Platform,
    backends: &Backends,
) -> Result<EnvInstallReport, CoreError> {
    let specifier =
        find_specifier(file).ok_or_else(|| CoreError::UnsupportedSpecFile(file.to_path_buf()))?;
    info!(
        "creating {} from {} via {}",
        prefix.display(),
        file.display(),
        specifier.name()
    );

    let (packages, pypi_requirements) = match specifier.load(file, environment, platform)? {
        EnvironmentSource::Explicit { packages } => (packages, Vec::new()),
        EnvironmentSource::Requested {
            channels,
            channel_priority,
            specs,
            pypi_requirements,
        } => {
            let group = format!("environment '{environment}'");
            let request = SolveRequest {
                group: group.clone(),
                platform: platform.clone(),
                channels,
                channel_priority,
                specs,
            };
            let records = backends.solver.solve(&request).map_err(|e| match e {
                RuntimeError::Unsatisfiable(diagnostic) => CoreError::UnsatisfiableSolveGroup {
                    group: group.clone(),
                    platform: platform.to_string(),
                    diagnostic,
                },
                other => CoreError::SolveFailed {
                    group: group.clone(),
                    platform: platform.to_string(),
                    source: other,
                },
            })?;
            (
                records.into_iter().map(LockedPackage::Conda).collect(),
                pypi_requirements,
            )
        }
    };

    install_prefix(
        backends,
        &PrefixInstall {
            environment,
            prefix,
            lock_path: &sibling_lock_path(prefix),
            packages: &packages,
            pypi_requirements: &pypi_requirements,
            force_reinstall: false,
        },
    )
}

fn sibling_lock_path(prefix: &Path) -> PathBuf {
    let name = prefix
        .file_name()
        .map_or_else(|| "prefix".to_owned(), |n| n.to_string_lossy().into_owned());
    prefix
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!(".{name}.lock"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use condaspace_runtime::installer::MetadataInstaller;
    use condaspace_runtime::mock::MockSolver;
    use condaspace_runtime::prefix::package_count;
    use condaspace_runtime::pypi::DisabledPypiConverter;
    use condaspace_schema::CondaPackageRecord;

    fn backends() -> Backends {
        let zlib = CondaPackageRecord::from_url(
            "https://conda.anaconda.org/conda-forge/linux-64/zlib-1.3.1-h4ab18f5_1.conda",
        )
        .unwrap();
        Backends {
            solver: Box::new(MockSolver::new(vec![zlib])),
            installer: Box::new(MetadataInstaller),
            pypi: Box::new(DisabledPypiConverter),
        }
    }

    #[test]
    fn exporter_lookup_by_name_and_alias() {
        assert_eq!(
            find_exporter("workspace-lock").unwrap().name(),
            "conda-workspaces-lock"
        );
        assert!(find_exporter("conda-workspaces-lock").is_some());
        assert!(find_exporter("explicit").is_none());
        assert_eq!(EXPORTERS[0].default_filenames(), &["conda.lock"]);
    }

    #[test]
    fn specifier_detection() {
        let dir = tempfile::tempdir().unwrap();
        let pyproject = dir.path().join("pyproject.toml");
        std::fs::write(&pyproject, "[project]\nname = \"x\"\n").unwrap();
        assert!(find_specifier(&pyproject).is_none());

        std::fs::write(
            &pyproject,
            "[project]\nname = \"x\"\n[tool.conda.workspace]\nchannels = [\"conda-forge\"]\n",
        )
        .unwrap();
        assert_eq!(find_specifier(&pyproject).unwrap().name(), "conda-workspaces");
        assert_eq!(
            find_specifier(Path::new("conda.lock")).unwrap().name(),
            "conda-workspaces-lock"
        );
        assert!(find_specifier(Path::new("environment.yml")).is_none());
    }

    #[test]
    fn create_from_manifest_then_from_lockfile() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("conda.toml");
        std::fs::write(
            &manifest,
            "[workspace]\nchannels = [\"conda-forge\"]\nplatforms = [\"linux-64\"]\n[dependencies]\nzlib = \"*\"\n",
        )
        .unwrap();
        let platform = Platform::from("linux-64");
        let prefix = dir.path().join("envs/solved");
        let report =
            create_environment(&manifest, "default", &prefix, &platform, &backends()).unwrap();
        assert_eq!(report.packages, 1);
        assert_eq!(package_count(&prefix).unwrap(), 1);

        let pinned = PinnedEnvironment::new(
            "default",
            "linux-64",
            vec![LockedPackage::Conda(
                CondaPackageRecord::from_url(
                    "https://conda.anaconda.org/conda-forge/linux-64/zlib-1.3.1-h4ab18f5_1.conda",
                )
                .unwrap(),
            )],
        );
        let lock_path = dir.path().join("conda.lock");
        LockFile::encode(&[pinned], &BTreeMap::new())
            .write_to_file(&lock_path)
            .unwrap();
        let explicit = dir.path().join("envs/explicit");
        create_environment(&lock_path, "default", &explicit, &platform, &backends()).unwrap();
        assert_eq!(package_count(&explicit).unwrap(), 1);

        let err = create_environment(
            &lock_path,
            "default",
            &dir.path().join("envs/mac"),
            &Platform::from("osx-arm64"),
            &backends(),
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("lock error:"));
    }
}

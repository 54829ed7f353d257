//! The `conda.lock` document.
//!
//! Layout (version 6):
//!
//! ```yaml
//! version: 6
//! environments:
//!   default:
//!     channels:
//!     - url: https://conda.anaconda.org/conda-forge/
//!     packages:
//!       linux-64:
//!       - conda: https://conda.anaconda.org/conda-forge/linux-64/python-3.12.1-h0_0.conda
//! packages:
//! - conda: https://conda.anaconda.org/conda-forge/linux-64/python-3.12.1-h0_0.conda
//!   sha256: ...
//!   depends:
//!   - libzlib >=1.2.13
//! ```
//!
//! Environments and platforms are sorted maps; package references and the
//! package table are sorted by package name, then URL. Re-encoding unchanged
//! data yields a byte-identical document.

use crate::spec::MatchSpec;
use crate::types::{EnvName, Platform};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const LOCK_VERSION: u32 = 6;
pub const LOCKFILE_NAME: &str = "conda.lock";

/// Keys this codec does not model, kept verbatim so documents written by
/// other tools survive a read-merge-write cycle.
pub type ExtraFields = BTreeMap<String, serde_yaml::Value>;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("lock file parse error: {0}")]
    Parse(#[source] serde_yaml::Error),
    #[error("lock file serialize error: {0}")]
    Serialize(#[source] serde_yaml::Error),
    #[error("lock file has no 'version' field")]
    MissingVersion,
    #[error("unsupported lockfile version {found} (supported: {})", LOCK_VERSION)]
    VersionMismatch { found: u32 },
    #[error(
        "lockfile has no packages for environment '{environment}' on {platform}; run 'condaspace lock' to update it"
    )]
    Stale {
        environment: String,
        platform: String,
    },
    #[error("invalid package url '{url}': {reason}")]
    InvalidPackageUrl { url: String, reason: String },
    #[error("environment '{environment}' references '{url}', which is missing from the package table")]
    MissingPackage { environment: String, url: String },
}

/// Identity of a conda package archive: channel URL, subdir, and file name.
///
/// Name, version, and build are derived from the file name so they can never
/// disagree with the URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageIdentity {
    channel: String,
    subdir: String,
    filename: String,
    name: String,
    version: String,
    build: String,
}

impl PackageIdentity {
    pub fn from_url(url: &str) -> Result<Self, LockError> {
        let invalid = |reason: &str| LockError::InvalidPackageUrl {
            url: url.to_owned(),
            reason: reason.to_owned(),
        };
        let (rest, filename) = url
            .rsplit_once('/')
            .ok_or_else(|| invalid("expected <channel>/<subdir>/<file>"))?;
        let (channel, subdir) = rest
            .rsplit_once('/')
            .ok_or_else(|| invalid("expected <channel>/<subdir>/<file>"))?;
        if channel.is_empty() || subdir.is_empty() {
            return Err(invalid("expected <channel>/<subdir>/<file>"));
        }
        let stem = filename
            .strip_suffix(".conda")
            .or_else(|| filename.strip_suffix(".tar.bz2"))
            .ok_or_else(|| invalid("expected a .conda or .tar.bz2 archive"))?;
        let mut parts = stem.rsplitn(3, '-');
        let (Some(build), Some(version), Some(name)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid("file name is not <name>-<version>-<build>"));
        };
        if name.is_empty() || version.is_empty() || build.is_empty() {
            return Err(invalid("file name is not <name>-<version>-<build>"));
        }
        Ok(Self {
            channel: format!("{channel}/"),
            subdir: subdir.to_owned(),
            filename: filename.to_owned(),
            name: name.to_owned(),
            version: version.to_owned(),
            build: build.to_owned(),
        })
    }

    pub fn url(&self) -> String {
        format!("{}{}/{}", self.channel, self.subdir, self.filename)
    }

    /// Channel URL with a trailing slash.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn subdir(&self) -> &str {
        &self.subdir
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn build(&self) -> &str {
        &self.build
    }
}

/// A pinned conda package with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondaPackageRecord {
    pub identity: PackageIdentity,
    pub sha256: Option<String>,
    pub md5: Option<String>,
    pub depends: Vec<String>,
    pub constrains: Vec<String>,
    pub arch: Option<String>,
    pub platform: Option<String>,
    pub noarch: Option<String>,
    pub license: Option<String>,
    pub license_family: Option<String>,
    pub purls: Option<Vec<String>>,
    pub size: Option<u64>,
    pub timestamp: Option<u64>,
    pub extra: ExtraFields,
}

impl CondaPackageRecord {
    pub fn from_url(url: &str) -> Result<Self, LockError> {
        Ok(Self {
            identity: PackageIdentity::from_url(url)?,
            sha256: None,
            md5: None,
            depends: Vec::new(),
            constrains: Vec::new(),
            arch: None,
            platform: None,
            noarch: None,
            license: None,
            license_family: None,
            purls: None,
            size: None,
            timestamp: None,
            extra: ExtraFields::new(),
        })
    }

    pub fn name(&self) -> &str {
        self.identity.name()
    }

    pub fn version(&self) -> &str {
        self.identity.version()
    }

    pub fn build(&self) -> &str {
        self.identity.build()
    }

    pub fn url(&self) -> String {
        self.identity.url()
    }

    /// Package names this record depends on. Entries are read as match-specs,
    /// so `python>=3.8` and `python >=3.8` both name `python`.
    pub fn dependency_names(&self) -> impl Iterator<Item = String> + '_ {
        self.depends
            .iter()
            .filter_map(|d| dependency_name(d))
    }
}

/// Serialized form of a conda record, shared by the lockfile and the solver protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CondaPackageEntry {
    pub conda: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constrains: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noarch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl TryFrom<CondaPackageEntry> for CondaPackageRecord {
    type Error = LockError;

    fn try_from(entry: CondaPackageEntry) -> Result<Self, LockError> {
        Ok(Self {
            identity: PackageIdentity::from_url(&entry.conda)?,
            sha256: entry.sha256,
            md5: entry.md5,
            depends: entry.depends,
            constrains: entry.constrains,
            arch: entry.arch,
            platform: entry.platform,
            noarch: entry.noarch,
            license: entry.license,
            license_family: entry.license_family,
            purls: entry.purls,
            size: entry.size,
            timestamp: entry.timestamp,
            extra: entry.extra,
        })
    }
}

fn dependency_name(depend: &str) -> Option<String> {
    if let Ok(spec) = MatchSpec::parse(depend) {
        return Some(spec.name);
    }
    // Constraints this crate cannot model still name a package.
    let depend = depend.rsplit("::").next().unwrap_or(depend).trim();
    let end = depend
        .find(|c: char| c.is_whitespace() || "<>=!~[".contains(c))
        .unwrap_or(depend.len());
    Some(&depend[..end]).filter(|name| !name.is_empty()).map(str::to_owned)
}

impl From<&CondaPackageRecord> for CondaPackageEntry {
    fn from(record: &CondaPackageRecord) -> Self {
        Self {
            conda: record.url(),
            sha256: record.sha256.clone(),
            md5: record.md5.clone(),
            depends: record.depends.clone(),
            constrains: record.constrains.clone(),
            arch: record.arch.clone(),
            platform: record.platform.clone(),
            noarch: record.noarch.clone(),
            license: record.license.clone(),
            license_family: record.license_family.clone(),
            purls: record.purls.clone(),
            size: record.size,
            timestamp: record.timestamp,
            extra: record.extra.clone(),
        }
    }
}

/// A pinned PyPI distribution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PypiPackageRecord {
    #[serde(rename = "pypi")]
    pub url: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires_dist: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_python: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editable: Option<bool>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockedPackage {
    Conda(CondaPackageRecord),
    Pypi(PypiPackageRecord),
}

impl LockedPackage {
    pub fn name(&self) -> &str {
        match self {
            Self::Conda(c) => c.name(),
            Self::Pypi(p) => &p.name,
        }
    }

    pub fn url(&self) -> String {
        match self {
            Self::Conda(c) => c.url(),
            Self::Pypi(p) => p.url.clone(),
        }
    }

    pub fn as_conda(&self) -> Option<&CondaPackageRecord> {
        match self {
            Self::Conda(c) => Some(c),
            Self::Pypi(_) => None,
        }
    }

    pub fn as_pypi(&self) -> Option<&PypiPackageRecord> {
        match self {
            Self::Conda(_) => None,
            Self::Pypi(p) => Some(p),
        }
    }

    fn sort_key(&self) -> (String, String) {
        (self.name().to_owned(), self.url())
    }

    fn reference(&self) -> PackageRef {
        match self {
            Self::Conda(c) => PackageRef::Conda { conda: c.url() },
            Self::Pypi(p) => PackageRef::Pypi { pypi: p.url.clone() },
        }
    }

    fn entry(&self) -> PackageEntry {
        match self {
            Self::Conda(c) => PackageEntry::Conda(c.into()),
            Self::Pypi(p) => PackageEntry::Pypi(p.clone()),
        }
    }
}

/// The pinned package set of one environment on one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedEnvironment {
    pub environment: EnvName,
    pub platform: Platform,
    pub packages: Vec<LockedPackage>,
}

impl PinnedEnvironment {
    /// Packages are sorted by name, then URL, and repeated URLs are dropped.
    pub fn new(
        environment: impl Into<EnvName>,
        platform: impl Into<Platform>,
        mut packages: Vec<LockedPackage>,
    ) -> Self {
        packages.sort_by_cached_key(LockedPackage::sort_key);
        packages.dedup_by(|a, b| a.url() == b.url());
        Self {
            environment: environment.into(),
            platform: platform.into(),
            packages,
        }
    }

    pub fn find(&self, name: &str) -> Option<&LockedPackage> {
        self.packages.iter().find(|p| p.name() == name)
    }

    pub fn conda_packages(&self) -> impl Iterator<Item = &CondaPackageRecord> {
        self.packages.iter().filter_map(LockedPackage::as_conda)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub url: String,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl ChannelEntry {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            extra: ExtraFields::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedEnvironment {
    #[serde(default)]
    pub channels: Vec<ChannelEntry>,
    /// PyPI index URLs, as written by pixi.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_yaml::Value>,
    #[serde(default)]
    pub packages: BTreeMap<String, Vec<PackageRef>>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl LockedEnvironment {
    /// Take everything except the package references from `previous`.
    fn carry_metadata(&mut self, previous: &Self, keep_channels: bool) {
        if keep_channels {
            self.channels.clone_from(&previous.channels);
        }
        self.indexes.clone_from(&previous.indexes);
        self.options.clone_from(&previous.options);
        self.extra.clone_from(&previous.extra);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PackageRef {
    Conda { conda: String },
    Pypi { pypi: String },
}

impl PackageRef {
    pub fn url(&self) -> &str {
        match self {
            Self::Conda { conda } => conda,
            Self::Pypi { pypi } => pypi,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PackageEntry {
    Conda(CondaPackageEntry),
    Pypi(PypiPackageRecord),
}

impl PackageEntry {
    pub fn url(&self) -> &str {
        match self {
            Self::Conda(c) => &c.conda,
            Self::Pypi(p) => &p.url,
        }
    }

    fn to_locked(&self) -> Result<LockedPackage, LockError> {
        Ok(match self {
            Self::Conda(c) => LockedPackage::Conda(c.clone().try_into()?),
            Self::Pypi(p) => LockedPackage::Pypi(p.clone()),
        })
    }
}

/// The persisted lock document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockFile {
    pub version: u32,
    #[serde(default)]
    pub environments: BTreeMap<String, LockedEnvironment>,
    #[serde(default)]
    pub packages: Vec<PackageEntry>,
}

impl Default for LockFile {
    fn default() -> Self {
        Self {
            version: LOCK_VERSION,
            environments: BTreeMap::new(),
            packages: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
struct VersionProbe {
    version: Option<u32>,
}

impl LockFile {
    /// Build a document from pinned environments and each environment's channel URLs.
    pub fn encode(pinned: &[PinnedEnvironment], channels: &BTreeMap<EnvName, Vec<String>>) -> Self {
        let mut environments: BTreeMap<String, LockedEnvironment> = BTreeMap::new();
        let mut table: BTreeMap<(String, String), PackageEntry> = BTreeMap::new();

        for pin in pinned {
            let env = environments
                .entry(pin.environment.to_string())
                .or_insert_with(|| LockedEnvironment {
                    channels: channels
                        .get(&pin.environment)
                        .map(|urls| urls.iter().map(ChannelEntry::new).collect())
                        .unwrap_or_default(),
                    ..LockedEnvironment::default()
                });

            let mut sorted: Vec<&LockedPackage> = pin.packages.iter().collect();
            sorted.sort_by_cached_key(|p| p.sort_key());
            sorted.dedup_by_key(|p| p.url());
            env.packages.insert(
                pin.platform.to_string(),
                sorted.iter().map(|p| p.reference()).collect(),
            );
            for package in sorted {
                table
                    .entry(package.sort_key())
                    .or_insert_with(|| package.entry());
            }
        }

        Self {
            version: LOCK_VERSION,
            environments,
            packages: table.into_values().collect(),
        }
    }

    /// Expand the document back into pinned environments, sorted by environment then platform.
    pub fn decode(&self) -> Result<Vec<PinnedEnvironment>, LockError> {
        self.check_version()?;
        let table = self.package_table();
        let mut out = Vec::new();
        for (name, env) in &self.environments {
            for (platform, refs) in &env.packages {
                let packages = Self::lookup(&table, name, refs)?;
                out.push(PinnedEnvironment {
                    environment: EnvName::new(name.as_str()),
                    platform: Platform::new(platform.as_str()),
                    packages,
                });
            }
        }
        Ok(out)
    }

    /// Exact packages for a locked install. Never falls back to solving.
    pub fn extract_explicit(
        &self,
        environment: &str,
        platform: &str,
    ) -> Result<Vec<LockedPackage>, LockError> {
        self.check_version()?;
        let refs = self
            .environments
            .get(environment)
            .and_then(|env| env.packages.get(platform))
            .ok_or_else(|| LockError::Stale {
                environment: environment.to_owned(),
                platform: platform.to_owned(),
            })?;
        Self::lookup(&self.package_table(), environment, refs)
    }

    /// Replace the entries for every `(environment, platform)` in `pinned`,
    /// keeping all other entries. Channel lists in `channels` replace the
    /// stored ones for those environments.
    pub fn merge(
        &self,
        pinned: &[PinnedEnvironment],
        channels: &BTreeMap<EnvName, Vec<String>>,
    ) -> Result<Self, LockError> {
        let replaced: BTreeSet<(&str, &str)> = pinned
            .iter()
            .map(|p| (p.environment.as_str(), p.platform.as_str()))
            .collect();
        let mut all: Vec<PinnedEnvironment> = self
            .decode()?
            .into_iter()
            .filter(|p| !replaced.contains(&(p.environment.as_str(), p.platform.as_str())))
            .collect();
        all.extend(pinned.iter().cloned());
        all.sort_by(|a, b| {
            (a.environment.as_str(), a.platform.as_str())
                .cmp(&(b.environment.as_str(), b.platform.as_str()))
        });

        let mut merged_channels: BTreeMap<EnvName, Vec<String>> = self
            .environments
            .iter()
            .map(|(name, env)| {
                (
                    EnvName::new(name.as_str()),
                    env.channels.iter().map(|c| c.url.clone()).collect(),
                )
            })
            .collect();
        for (name, urls) in channels {
            merged_channels.insert(name.clone(), urls.clone());
        }
        let mut merged = Self::encode(&all, &merged_channels);
        for (name, env) in &mut merged.environments {
            if let Some(previous) = self.environments.get(name) {
                let resolved_now = channels.contains_key(&EnvName::new(name.as_str()));
                env.carry_metadata(previous, !resolved_now);
            }
        }
        Ok(merged)
    }

    /// Drop `(environment, platform)` pairs for which `keep` is false, then prune
    /// environments left empty and packages no longer referenced.
    pub fn retain_platforms(&mut self, keep: impl Fn(&str, &str) -> bool) {
        for (name, env) in &mut self.environments {
            env.packages.retain(|platform, _| keep(name, platform));
        }
        self.environments.retain(|_, env| !env.packages.is_empty());
        self.prune_packages();
    }

    /// Drop environments for which `keep` is false, along with packages no longer referenced.
    pub fn retain_environments(&mut self, keep: impl Fn(&str) -> bool) {
        self.retain_platforms(|name, _| keep(name));
    }

    fn prune_packages(&mut self) {
        let referenced: BTreeSet<&str> = self
            .environments
            .values()
            .flat_map(|env| env.packages.values().flatten().map(PackageRef::url))
            .collect();
        let referenced: BTreeSet<String> = referenced.into_iter().map(str::to_owned).collect();
        self.packages.retain(|p| referenced.contains(p.url()));
    }

    pub fn platforms(&self, environment: &str) -> Vec<Platform> {
        self.environments
            .get(environment)
            .map(|env| env.packages.keys().map(|p| Platform::new(p.as_str())).collect())
            .unwrap_or_default()
    }

    pub fn channels(&self, environment: &str) -> Vec<String> {
        self.environments
            .get(environment)
            .map(|env| env.channels.iter().map(|c| c.url.clone()).collect())
            .unwrap_or_default()
    }

    fn check_version(&self) -> Result<(), LockError> {
        if self.version == LOCK_VERSION {
            Ok(())
        } else {
            Err(LockError::VersionMismatch {
                found: self.version,
            })
        }
    }

    fn package_table(&self) -> HashMap<&str, &PackageEntry> {
        self.packages.iter().map(|p| (p.url(), p)).collect()
    }

    fn lookup(
        table: &HashMap<&str, &PackageEntry>,
        environment: &str,
        refs: &[PackageRef],
    ) -> Result<Vec<LockedPackage>, LockError> {
        refs.iter()
            .map(|r| {
                table
                    .get(r.url())
                    .ok_or_else(|| LockError::MissingPackage {
                        environment: environment.to_owned(),
                        url: r.url().to_owned(),
                    })
                    .and_then(|entry| entry.to_locked())
            })
            .collect()
    }

    /// Parse YAML text. The version is checked before the rest of the
    /// document so future layouts are reported as a version mismatch.
    pub fn from_yaml_str(text: &str) -> Result<Self, LockError> {
        let probe: VersionProbe = serde_yaml::from_str(text).map_err(LockError::Parse)?;
        let found = probe.version.ok_or(LockError::MissingVersion)?;
        if found != LOCK_VERSION {
            return Err(LockError::VersionMismatch { found });
        }
        serde_yaml::from_str(text).map_err(LockError::Parse)
    }

    pub fn to_yaml_string(&self) -> Result<String, LockError> {
        serde_yaml::to_string(self).map_err(LockError::Serialize)
    }

    /// Replace `path` atomically: write a sibling temp file, fsync, rename.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), LockError> {
        let path = path.as_ref();
        let content = self.to_yaml_string()?;
        let dir = path.parent().unwrap_or(Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| LockError::Io(e.error))?;
        // Fsync parent directory to ensure rename durability on power loss.
        if let Ok(f) = fs::File::open(dir) {
            let _ = f.sync_all();
        }
        Ok(())
    }

    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CF: &str = "https://conda.anaconda.org/conda-forge/";

    fn conda(subdir: &str, file: &str, depends: &[&str]) -> LockedPackage {
        let mut record = CondaPackageRecord::from_url(&format!("{CF}{subdir}/{file}")).unwrap();
        record.sha256 = Some(format!("sha-{file}"));
        record.depends = depends.iter().map(|d| (*d).to_owned()).collect();
        LockedPackage::Conda(record)
    }

    fn sample() -> Vec<PinnedEnvironment> {
        let python = conda("linux-64", "python-3.12.1-h0_0.conda", &["libzlib >=1.2"]);
        let zlib = conda("linux-64", "libzlib-1.3-h1_0.conda", &[]);
        let pytest = conda("noarch", "pytest-8.0.0-pyhd_0.conda", &["python >=3.8"]);
        vec![
            PinnedEnvironment::new("default", "linux-64", vec![python.clone(), zlib.clone()]),
            PinnedEnvironment::new("test", "linux-64", vec![pytest, python, zlib]),
        ]
    }

    fn channels() -> BTreeMap<EnvName, Vec<String>> {
        BTreeMap::from([
            (EnvName::from("default"), vec![CF.to_owned()]),
            (EnvName::from("test"), vec![CF.to_owned()]),
        ])
    }

    #[test]
    fn identity_from_url() {
        let id = PackageIdentity::from_url(
            "https://conda.anaconda.org/conda-forge/linux-64/python-dateutil-2.9.0-pyhd8ed1ab_0.tar.bz2",
        )
        .unwrap();
        assert_eq!(id.channel(), CF);
        assert_eq!(id.subdir(), "linux-64");
        assert_eq!(id.name(), "python-dateutil");
        assert_eq!(id.version(), "2.9.0");
        assert_eq!(id.build(), "pyhd8ed1ab_0");
        assert!(id.url().ends_with("/linux-64/python-dateutil-2.9.0-pyhd8ed1ab_0.tar.bz2"));

        assert!(PackageIdentity::from_url("python-3.12.conda").is_err());
        assert!(PackageIdentity::from_url("https://x/linux-64/python.whl").is_err());
        assert!(PackageIdentity::from_url("https://x/linux-64/python-3.conda").is_err());
    }

    #[test]
    fn shared_packages_are_stored_once() {
        let lock = LockFile::encode(&sample(), &channels());
        assert_eq!(lock.version, LOCK_VERSION);
        assert_eq!(lock.packages.len(), 3);
        let names: Vec<&str> = lock.packages.iter().map(PackageEntry::url).collect();
        assert!(names[0].contains("libzlib"));
        assert!(names[1].contains("pytest"));
        assert!(names[2].contains("python"));
    }

    #[test]
    fn decode_inverts_encode() {
        let pins = sample();
        let lock = LockFile::encode(&pins, &channels());
        assert_eq!(lock.decode().unwrap(), pins);

        let text = lock.to_yaml_string().unwrap();
        let reread = LockFile::from_yaml_str(&text).unwrap();
        assert_eq!(reread, lock);
        assert_eq!(reread.decode().unwrap(), pins);
    }

    #[test]
    fn encoding_is_byte_stable() {
        let mut pins = sample();
        let a = LockFile::encode(&pins, &channels()).to_yaml_string().unwrap();
        pins.reverse();
        for pin in &mut pins {
            pin.packages.reverse();
        }
        let b = LockFile::encode(&pins, &channels()).to_yaml_string().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn yaml_layout_matches_lock_format() {
        let text = LockFile::encode(&sample(), &channels())
            .to_yaml_string()
            .unwrap();
        assert!(text.starts_with("version: 6\nenvironments:\n"));
        assert!(text.contains("  default:\n    channels:\n    - url: https://conda.anaconda.org/conda-forge/\n"));
        assert!(text.contains("      linux-64:\n      - conda: https://conda.anaconda.org/conda-forge/linux-64/libzlib-1.3-h1_0.conda\n"));
        assert!(text.contains("  depends:\n  - libzlib >=1.2\n"));
    }

    #[test]
    fn reads_pixi_style_document_with_pypi() {
        let text = r"
version: 6
environments:
  default:
    channels:
    - url: https://conda.anaconda.org/conda-forge/
    packages:
      linux-64:
      - conda: https://conda.anaconda.org/conda-forge/linux-64/python-3.12.1-h0_0.conda
      - pypi: https://files.pythonhosted.org/packages/requests-2.31.0-py3-none-any.whl
packages:
- conda: https://conda.anaconda.org/conda-forge/linux-64/python-3.12.1-h0_0.conda
  sha256: abc
  md5: def
  license: PSF-2.0
  size: 100
- pypi: https://files.pythonhosted.org/packages/requests-2.31.0-py3-none-any.whl
  name: requests
  version: 2.31.0
  requires_dist:
  - idna>=2.5
";
        let lock = LockFile::from_yaml_str(text).unwrap();
        let pkgs = lock.extract_explicit("default", "linux-64").unwrap();
        assert_eq!(pkgs.len(), 2);
        let LockedPackage::Conda(python) = &pkgs[0] else {
            panic!("expected conda record");
        };
        assert_eq!(python.md5.as_deref(), Some("def"));
        assert_eq!(python.size, Some(100));
        let LockedPackage::Pypi(requests) = &pkgs[1] else {
            panic!("expected pypi record");
        };
        assert_eq!(requests.version, "2.31.0");
        assert_eq!(requests.requires_dist, vec!["idna>=2.5"]);
    }

    #[test]
    fn rejects_other_versions() {
        let err = LockFile::from_yaml_str("version: 7\nenvironments: {}\n").unwrap_err();
        assert!(matches!(err, LockError::VersionMismatch { found: 7 }));
        let err = LockFile::from_yaml_str("version: 1\nsomething: [else]\n").unwrap_err();
        assert!(matches!(err, LockError::VersionMismatch { found: 1 }));
        let err = LockFile::from_yaml_str("environments: {}\n").unwrap_err();
        assert!(matches!(err, LockError::MissingVersion));

        let mut lock = LockFile::encode(&sample(), &channels());
        lock.version = 5;
        assert!(matches!(lock.decode(), Err(LockError::VersionMismatch { found: 5 })));
    }

    #[test]
    fn extract_missing_platform_is_stale() {
        let lock = LockFile::encode(&sample(), &channels());
        let err = lock.extract_explicit("default", "osx-arm64").unwrap_err();
        assert!(matches!(err, LockError::Stale { .. }));
        let err = lock.extract_explicit("docs", "linux-64").unwrap_err();
        assert!(err.to_string().contains("'docs'"));
    }

    #[test]
    fn extract_reports_dangling_reference() {
        let mut lock = LockFile::encode(&sample(), &channels());
        lock.packages.retain(|p| !p.url().contains("libzlib"));
        let err = lock.extract_explicit("default", "linux-64").unwrap_err();
        assert!(matches!(err, LockError::MissingPackage { .. }));
    }

    #[test]
    fn merge_replaces_only_given_entries() {
        let lock = LockFile::encode(&sample(), &channels());
        let newer = conda("linux-64", "python-3.12.2-h0_0.conda", &[]);
        let updated = lock
            .merge(
                &[PinnedEnvironment::new("default", "linux-64", vec![newer])],
                &BTreeMap::new(),
            )
            .unwrap();

        let default = updated.extract_explicit("default", "linux-64").unwrap();
        assert_eq!(default.len(), 1);
        assert_eq!(default[0].as_conda().unwrap().version(), "3.12.2");
        let test = updated.extract_explicit("test", "linux-64").unwrap();
        assert_eq!(test.len(), 3);
        assert_eq!(updated.channels("default"), vec![CF.to_owned()]);
    }

    #[test]
    fn retain_prunes_unreferenced_packages() {
        let mut lock = LockFile::encode(&sample(), &channels());
        lock.retain_environments(|name| name == "default");
        assert_eq!(lock.environments.len(), 1);
        assert_eq!(lock.packages.len(), 2);
        assert!(lock.packages.iter().all(|p| !p.url().contains("pytest")));
    }

    #[test]
    fn write_and_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCKFILE_NAME);
        let lock = LockFile::encode(&sample(), &channels());
        lock.write_to_file(&path).unwrap();
        let loaded = LockFile::read_from_file(&path).unwrap();
        assert_eq!(loaded, lock);
        assert_eq!(loaded.platforms("test"), vec![Platform::new("linux-64")]);
    }

    #[test]
    fn dependency_names_read_operator_specs() {
        let LockedPackage::Conda(record) = conda(
            "noarch",
            "pytest-8.0.0-pyhd_0.conda",
            &[
                "python>=3.8",
                "libzlib >=1.2,<2",
                "conda-forge::numpy",
                "__glibc >=2.17",
                "pluggy<2.0,>=1.3",
            ],
        ) else {
            unreachable!()
        };
        let names: Vec<String> = record.dependency_names().collect();
        assert_eq!(names, vec!["python", "libzlib", "numpy", "__glibc", "pluggy"]);
    }

    const PIXI_DOCUMENT: &str = r"
version: 6
environments:
  default:
    channels:
    - url: https://conda.anaconda.org/conda-forge/
    indexes:
    - https://pypi.org/simple
    options:
      pypi-prerelease-mode: if-necessary-or-explicit
    packages:
      linux-64:
      - conda: https://conda.anaconda.org/conda-forge/linux-64/python-3.12.1-h0_0.conda
      - conda: https://conda.anaconda.org/conda-forge/noarch/six-1.16.0-pyh6c4a22f_0.tar.bz2
      - pypi: https://files.pythonhosted.org/packages/requests-2.31.0-py3-none-any.whl
  test:
    channels:
    - url: https://conda.anaconda.org/conda-forge/
    packages:
      linux-64:
      - conda: https://conda.anaconda.org/conda-forge/linux-64/python-3.12.1-h0_0.conda
packages:
- conda: https://conda.anaconda.org/conda-forge/linux-64/python-3.12.1-h0_0.conda
  sha256: abc
  arch: x86_64
  platform: linux
  license: Python-2.0
  python_site_packages_path: lib/python3.12/site-packages
  size: 100
- conda: https://conda.anaconda.org/conda-forge/noarch/six-1.16.0-pyh6c4a22f_0.tar.bz2
  sha256: def
  depends:
  - python
  noarch: python
  license: MIT
  license_family: MIT
  purls:
  - pkg:pypi/six?source=hash-mapping
- pypi: https://files.pythonhosted.org/packages/requests-2.31.0-py3-none-any.whl
  name: requests
  version: 2.31.0
  requires_dist:
  - idna>=2.5
  requires_python: '>=3.7'
  editable: false
";

    #[test]
    fn pixi_metadata_survives_rewrite_and_merge() {
        let lock = LockFile::from_yaml_str(PIXI_DOCUMENT).unwrap();
        let reread = LockFile::from_yaml_str(&lock.to_yaml_string().unwrap()).unwrap();
        assert_eq!(reread, lock);

        let newer = conda("linux-64", "python-3.12.2-h0_0.conda", &[]);
        let merged = lock
            .merge(
                &[PinnedEnvironment::new("test", "linux-64", vec![newer])],
                &BTreeMap::from([(EnvName::from("test"), vec![CF.to_owned()])]),
            )
            .unwrap();
        let text = merged.to_yaml_string().unwrap();
        for needle in [
            "    indexes:\n    - https://pypi.org/simple\n",
            "      pypi-prerelease-mode: if-necessary-or-explicit\n",
            "  arch: x86_64\n  platform: linux\n",
            "  noarch: python\n",
            "  license_family: MIT\n",
            "  - pkg:pypi/six?source=hash-mapping\n",
            "  python_site_packages_path: lib/python3.12/site-packages\n",
            "  requires_python: '>=3.7'\n",
            "  editable: false\n",
        ] {
            assert!(text.contains(needle), "missing {needle:?} in:\n{text}");
        }

        let default = merged.extract_explicit("default", "linux-64").unwrap();
        let six = default[2].as_conda().unwrap();
        assert_eq!(six.license_family.as_deref(), Some("MIT"));
        assert_eq!(six.noarch.as_deref(), Some("python"));
        let requests = default[1].as_pypi().unwrap();
        assert_eq!(requests.requires_python.as_deref(), Some(">=3.7"));
        assert_eq!(requests.editable, Some(false));
        let test = merged.extract_explicit("test", "linux-64").unwrap();
        assert_eq!(test[0].as_conda().unwrap().version(), "3.12.2");
    }

    #[test]
    fn retain_platforms_prunes_pairs_and_packages() {
        let mut pins = sample();
        pins.push(PinnedEnvironment::new(
            "default",
            "osx-arm64",
            vec![conda("osx-arm64", "python-3.12.1-h9_0.conda", &[])],
        ));
        let mut lock = LockFile::encode(&pins, &channels());
        assert_eq!(lock.packages.len(), 4);

        lock.retain_platforms(|_, platform| platform != "osx-arm64");
        assert_eq!(lock.platforms("default"), vec![Platform::new("linux-64")]);
        assert_eq!(lock.packages.len(), 3);
        assert!(matches!(
            lock.extract_explicit("default", "osx-arm64"),
            Err(LockError::Stale { .. })
        ));

        lock.retain_platforms(|env, _| env != "test");
        assert!(!lock.environments.contains_key("test"));
        assert_eq!(lock.packages.len(), 2);
    }
}

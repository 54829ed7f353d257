//! Workspace prefix layout and `conda-meta` package records.
//!
//! ```text
//! <workspace>/.conda/
//!   envs/<env>/conda-meta/<name>-<version>-<build>.json
//!   locks/<env>.lock
//! ```

use crate::RuntimeError;
use condaspace_schema::{CondaPackageRecord, LockError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct PrefixLayout {
    root: PathBuf,
}

impl PrefixLayout {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            root: workspace_root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn conda_dir(&self) -> PathBuf {
        self.root.join(".conda")
    }

    pub fn envs_dir(&self) -> PathBuf {
        self.conda_dir().join("envs")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.conda_dir().join("locks")
    }

    pub fn prefix(&self, env: &str) -> PathBuf {
        self.envs_dir().join(env)
    }

    /// Advisory lock file guarding writes to one prefix. Lives outside the
    /// prefix so the prefix itself can be deleted while the lock is held.
    pub fn lock_path(&self, env: &str) -> PathBuf {
        self.locks_dir().join(format!("{env}.lock"))
    }

    pub fn is_installed(&self, env: &str) -> bool {
        is_environment(&self.prefix(env))
    }

    /// Names of environments that have an installed prefix, sorted.
    pub fn installed_environments(&self) -> Result<Vec<String>, RuntimeError> {
        let dir = self.envs_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if is_environment(&entry.path()) {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_owned());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete an environment prefix. Returns false when nothing was there.
    pub fn remove(&self, env: &str) -> Result<bool, RuntimeError> {
        let prefix = self.prefix(env);
        if !prefix.exists() {
            return Ok(false);
        }
        force_remove(&prefix)?;
        Ok(true)
    }
}

pub fn is_environment(prefix: &Path) -> bool {
    prefix.join("conda-meta").is_dir()
}

/// Number of package records in a prefix.
pub fn package_count(prefix: &Path) -> Result<usize, RuntimeError> {
    let meta = prefix.join("conda-meta");
    if !meta.is_dir() {
        return Ok(0);
    }
    let mut count = 0;
    for entry in fs::read_dir(meta)? {
        if entry?.path().extension().is_some_and(|e| e == "json") {
            count += 1;
        }
    }
    Ok(count)
}

/// All records in a prefix, sorted by package name.
pub fn read_records(prefix: &Path) -> Result<Vec<PrefixRecord>, RuntimeError> {
    let meta = prefix.join("conda-meta");
    let mut records = Vec::new();
    if !meta.is_dir() {
        return Ok(records);
    }
    for entry in fs::read_dir(meta)? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == "json") {
            let content = fs::read_to_string(&path)?;
            records.push(serde_json::from_str::<PrefixRecord>(&content)?);
        }
    }
    records.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(records)
}

pub fn force_remove(path: &Path) -> Result<(), RuntimeError> {
    if path.exists() {
        // Read-only files inside a prefix (some packages ship them) block removal on Windows.
        for entry in walk(path)? {
            if let Ok(meta) = fs::symlink_metadata(&entry) {
                let mut perms = meta.permissions();
                if perms.readonly() && !meta.file_type().is_symlink() {
                    #[allow(clippy::permissions_set_readonly_false)]
                    perms.set_readonly(false);
                    let _ = fs::set_permissions(&entry, perms);
                }
            }
        }
        fs::remove_dir_all(path)?;
    }
    Ok(())
}

fn walk(root: &Path) -> Result<Vec<PathBuf>, RuntimeError> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                stack.push(path.clone());
            }
            out.push(path);
        }
    }
    Ok(out)
}

/// A `conda-meta/*.json` record describing one installed package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixRecord {
    pub name: String,
    pub version: String,
    pub build: String,
    #[serde(default)]
    pub build_number: u64,
    pub url: String,
    pub channel: String,
    pub subdir: String,
    #[serde(rename = "fn")]
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub constrains: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl PrefixRecord {
    pub fn file_name(&self) -> String {
        format!("{}-{}-{}.json", self.name, self.version, self.build)
    }

    pub fn to_package_record(&self) -> Result<CondaPackageRecord, LockError> {
        let mut record = CondaPackageRecord::from_url(&self.url)?;
        record.md5.clone_from(&self.md5);
        record.sha256.clone_from(&self.sha256);
        record.depends.clone_from(&self.depends);
        record.constrains.clone_from(&self.constrains);
        record.license.clone_from(&self.license);
        record.size = self.size;
        record.timestamp = self.timestamp;
        Ok(record)
    }
}

impl From<&CondaPackageRecord> for PrefixRecord {
    fn from(record: &CondaPackageRecord) -> Self {
        let build_number = record
            .build()
            .rsplit('_')
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        Self {
            name: record.name().to_owned(),
            version: record.version().to_owned(),
            build: record.build().to_owned(),
            build_number,
            url: record.url(),
            channel: record.identity.channel().trim_end_matches('/').to_owned(),
            subdir: record.identity.subdir().to_owned(),
            filename: record.identity.filename().to_owned(),
            md5: record.md5.clone(),
            sha256: record.sha256.clone(),
            depends: record.depends.clone(),
            constrains: record.constrains.clone(),
            license: record.license.clone(),
            size: record.size,
            timestamp: record.timestamp,
        }
    }
}

//! Manifest discovery and the three surface syntaxes.
//!
//! Each [`ManifestFormat`] only locates the workspace tables inside its file
//! and maps key spellings (`solve-group` / `solve_group`) onto [`RawTables`].
//! Cross-field validation happens in [`crate::normalize`].

use crate::normalize::ValidationIssue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error(
        "no workspace manifest (conda.toml, pixi.toml, or pyproject.toml) found in {} or any parent directory",
        .search_dir.display()
    )]
    NotFound { search_dir: PathBuf },
    #[error("failed to read manifest file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}{}: {reason}", .path.display(), location_suffix(.line, .column))]
    Parse {
        path: PathBuf,
        line: Option<usize>,
        column: Option<usize>,
        reason: String,
    },
    #[error("no manifest parser recognizes '{}'", .0.display())]
    UnsupportedFile(PathBuf),
    #[error("{} has no workspace table (expected {expected})", .path.display())]
    NoWorkspace { path: PathBuf, expected: String },
    #[error("invalid workspace manifest {}:{}", .path.display(), render_issues(.issues))]
    Validation {
        path: PathBuf,
        issues: Vec<ValidationIssue>,
    },
}

fn location_suffix(line: &Option<usize>, column: &Option<usize>) -> String {
    match (line, column) {
        (Some(l), Some(c)) => format!(":{l}:{c}"),
        (Some(l), None) => format!(":{l}"),
        _ => String::new(),
    }
}

fn render_issues(issues: &[ValidationIssue]) -> String {
    issues.iter().fold(String::new(), |mut out, issue| {
        out.push_str("\n  - ");
        out.push_str(&issue.to_string());
        out
    })
}

/// Pyproject sub-tables tried in order: preferred, legacy alias, pixi-compatible.
pub const PYPROJECT_TABLES: [&str; 3] = ["conda", "conda-workspaces", "pixi"];

/// The supported manifest surface syntaxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManifestFormat {
    CondaToml,
    PixiToml,
    Pyproject,
}

impl ManifestFormat {
    /// Priority order used when searching a directory. First match wins.
    pub const SEARCH_ORDER: [Self; 3] = [Self::CondaToml, Self::PixiToml, Self::Pyproject];

    pub fn file_name(self) -> &'static str {
        match self {
            Self::CondaToml => "conda.toml",
            Self::PixiToml => "pixi.toml",
            Self::Pyproject => "pyproject.toml",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        Self::SEARCH_ORDER
            .into_iter()
            .find(|f| f.file_name() == name)
    }

    /// Whether an existing file of this format declares a workspace.
    ///
    /// `conda.toml` and `pixi.toml` exist only to hold a workspace. A
    /// `pyproject.toml` counts only when it carries one of the tool tables.
    /// Unparseable pyproject files are matched textually so their syntax error
    /// is reported instead of being skipped.
    pub fn has_workspace(self, text: &str) -> bool {
        match self {
            Self::CondaToml | Self::PixiToml => true,
            Self::Pyproject => match toml::from_str::<PyprojectProbe>(text) {
                Ok(probe) => probe.tool.is_some_and(|tool| {
                    PYPROJECT_TABLES.iter().any(|t| tool.contains_key(*t))
                }),
                Err(_) => PYPROJECT_TABLES
                    .iter()
                    .any(|t| text.contains(&format!("[tool.{t}"))),
            },
        }
    }

    /// Parse `text` (read from `origin`) into raw workspace tables.
    pub fn parse(self, text: &str, origin: &Path) -> Result<RawManifest, ManifestError> {
        let (table_path, tables) = match self {
            Self::CondaToml | Self::PixiToml => {
                let tables: RawTables = from_toml(text, origin)?;
                if tables.workspace.is_none() && tables.project.is_none() {
                    return Err(ManifestError::NoWorkspace {
                        path: origin.to_path_buf(),
                        expected: "[workspace]".to_owned(),
                    });
                }
                (String::new(), tables)
            }
            Self::Pyproject => {
                let doc: PyprojectDoc = from_toml(text, origin)?;
                let tool = doc.tool.unwrap_or_default();
                let candidates = [tool.conda, tool.conda_workspaces, tool.pixi];
                let Some((key, mut tables)) = PYPROJECT_TABLES
                    .into_iter()
                    .zip(candidates)
                    .find_map(|(key, t)| t.map(|t| (key, t)))
                else {
                    return Err(ManifestError::NoWorkspace {
                        path: origin.to_path_buf(),
                        expected: "[tool.conda.workspace] or [tool.pixi.workspace]".to_owned(),
                    });
                };
                tables.project_metadata = doc.project;
                (format!("tool.{key}"), tables)
            }
        };
        debug!(
            "parsed {} as {:?} (tables at '{table_path}')",
            origin.display(),
            self
        );
        Ok(RawManifest {
            format: self,
            path: origin.to_path_buf(),
            table_path,
            tables,
        })
    }
}

impl fmt::Display for ManifestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

fn from_toml<T: serde::de::DeserializeOwned>(text: &str, origin: &Path) -> Result<T, ManifestError> {
    toml::from_str(text).map_err(|e| {
        let (line, column) = e
            .span()
            .map_or((None, None), |span| {
                let (l, c) = line_column(text, span.start);
                (Some(l), Some(c))
            });
        ManifestError::Parse {
            path: origin.to_path_buf(),
            line,
            column,
            reason: e.message().trim().to_owned(),
        }
    })
}

/// 1-based line and column of a byte offset.
fn line_column(text: &str, offset: usize) -> (usize, usize) {
    let before = &text[..offset.min(text.len())];
    let line = before.matches('\n').count() + 1;
    let column = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
    (line, column)
}

/// A parsed manifest file: its syntax, location, and raw tables.
#[derive(Debug, Clone, PartialEq)]
pub struct RawManifest {
    pub format: ManifestFormat,
    pub path: PathBuf,
    /// Dotted prefix of the workspace tables inside the file, empty for top level.
    pub table_path: String,
    pub tables: RawTables,
}

/// Format-independent shape of the workspace tables.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawTables {
    pub workspace: Option<RawWorkspace>,
    /// Legacy spelling of `workspace`.
    pub project: Option<RawWorkspace>,
    /// PEP 621 `[project]` metadata, used as a fallback inside pyproject.toml.
    #[serde(skip)]
    pub project_metadata: Option<ProjectMetadata>,
    #[serde(default)]
    pub dependencies: toml::Table,
    #[serde(default, alias = "pypi_dependencies")]
    pub pypi_dependencies: toml::Table,
    #[serde(default, alias = "system_requirements")]
    pub system_requirements: toml::Table,
    #[serde(default)]
    pub activation: RawActivation,
    #[serde(default)]
    pub target: BTreeMap<String, RawTarget>,
    #[serde(default)]
    pub feature: BTreeMap<String, RawFeature>,
    #[serde(default)]
    pub environments: BTreeMap<String, RawEnvironment>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawWorkspace {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub channels: Vec<toml::Value>,
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(alias = "channel_priority")]
    pub channel_priority: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProjectMetadata {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawFeature {
    #[serde(default)]
    pub dependencies: toml::Table,
    #[serde(default, alias = "pypi_dependencies")]
    pub pypi_dependencies: toml::Table,
    #[serde(default)]
    pub channels: Vec<toml::Value>,
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default, alias = "system_requirements")]
    pub system_requirements: toml::Table,
    #[serde(default)]
    pub activation: RawActivation,
    #[serde(default)]
    pub target: BTreeMap<String, RawTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawActivation {
    #[serde(default)]
    pub scripts: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawTarget {
    #[serde(default)]
    pub dependencies: toml::Table,
    #[serde(default, alias = "pypi_dependencies")]
    pub pypi_dependencies: toml::Table,
    #[serde(default)]
    pub activation: RawActivation,
}

/// An `[environments]` entry: a bare feature list or a full table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawEnvironment {
    Features(Vec<String>),
    Table(RawEnvironmentTable),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawEnvironmentTable {
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(alias = "solve_group")]
    pub solve_group: Option<String>,
    #[serde(default, alias = "no_default_feature")]
    pub no_default_feature: bool,
}

#[derive(Deserialize)]
struct PyprojectDoc {
    tool: Option<PyprojectTools>,
    project: Option<ProjectMetadata>,
}

#[derive(Default, Deserialize)]
struct PyprojectTools {
    conda: Option<RawTables>,
    #[serde(rename = "conda-workspaces")]
    conda_workspaces: Option<RawTables>,
    pixi: Option<RawTables>,
}

#[derive(Deserialize)]
struct PyprojectProbe {
    tool: Option<toml::Table>,
}

/// Search `start` and its ancestors for the first workspace manifest.
pub fn find_manifest(start: &Path) -> Result<PathBuf, ManifestError> {
    for dir in start.ancestors() {
        for format in ManifestFormat::SEARCH_ORDER {
            let candidate = dir.join(format.file_name());
            if !candidate.is_file() {
                continue;
            }
            let text = fs::read_to_string(&candidate).map_err(|source| ManifestError::Io {
                path: candidate.clone(),
                source,
            })?;
            if format.has_workspace(&text) {
                debug!("found workspace manifest {}", candidate.display());
                return Ok(candidate);
            }
        }
    }
    Err(ManifestError::NotFound {
        search_dir: start.to_path_buf(),
    })
}

pub fn parse_manifest_file(path: impl AsRef<Path>) -> Result<RawManifest, ManifestError> {
    let path = path.as_ref();
    let format = ManifestFormat::from_path(path)
        .ok_or_else(|| ManifestError::UnsupportedFile(path.to_path_buf()))?;
    let text = fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    format.parse(&text, path)
}

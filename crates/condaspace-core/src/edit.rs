//! Format-preserving manifest edits for `init`, `add`, and `remove`.
//!
//! Edits go through `toml_edit` so comments and layout survive. The edited
//! text is parsed and validated before it replaces the file.

use crate::CoreError;
use condaspace_schema::platform::DEFAULT_INIT_PLATFORMS;
use condaspace_schema::{
    current_platform, parse_manifest_file, ManifestFormat, MatchSpec, DEFAULT_NAME,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use toml_edit::{value, Array, DocumentMut, InlineTable, Item, Table, TableLike};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub format: ManifestFormat,
    /// Defaults to the directory name.
    pub name: Option<String>,
    /// Defaults to `conda-forge`.
    pub channels: Vec<String>,
    /// Defaults to the common desktop platforms plus the current one.
    pub platforms: Vec<String>,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            format: ManifestFormat::CondaToml,
            name: None,
            channels: Vec::new(),
            platforms: Vec::new(),
        }
    }
}

/// Where `add`/`remove` operate: the default feature or a named one, conda or PyPI.
#[derive(Debug, Clone, Default)]
pub struct DependencyTarget {
    pub feature: Option<String>,
    pub pypi: bool,
}

impl DependencyTarget {
    fn key_path(&self, base: &str) -> Vec<String> {
        let mut path: Vec<String> = base
            .split('.')
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();
        if let Some(feature) = self.feature.as_deref().filter(|f| *f != DEFAULT_NAME) {
            path.push("feature".to_owned());
            path.push(feature.to_owned());
        }
        path.push(if self.pypi { "pypi-dependencies" } else { "dependencies" }.to_owned());
        path
    }
}

/// Scaffold a workspace manifest in `dir`. Returns the written path.
///
/// `conda.toml` and `pixi.toml` must not exist yet. An existing
/// `pyproject.toml` gains a `[tool.conda]` workspace unless it already has one.
pub fn init_workspace(dir: &Path, opts: &InitOptions) -> Result<PathBuf, CoreError> {
    let path = dir.join(opts.format.file_name());
    let name = opts.name.clone().unwrap_or_else(|| {
        dir.canonicalize()
            .ok()
            .and_then(|d| d.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "workspace".to_owned())
    });
    let channels = if opts.channels.is_empty() {
        vec!["conda-forge".to_owned()]
    } else {
        opts.channels.clone()
    };
    let mut platforms = if opts.platforms.is_empty() {
        DEFAULT_INIT_PLATFORMS.iter().map(|p| (*p).to_owned()).collect()
    } else {
        opts.platforms.clone()
    };
    let current = current_platform();
    if opts.platforms.is_empty() && !platforms.iter().any(|p| p == current.as_str()) {
        platforms.push(current.into_inner());
    }

    let mut workspace = Table::new();
    workspace["name"] = value(name.as_str());
    workspace["channels"] = value(channels.iter().map(String::as_str).collect::<Array>());
    workspace["platforms"] = value(platforms.iter().map(String::as_str).collect::<Array>());

    let text = match opts.format {
        ManifestFormat::CondaToml | ManifestFormat::PixiToml => {
            if path.exists() {
                return Err(CoreError::ManifestExists(path));
            }
            let mut doc = DocumentMut::new();
            doc["workspace"] = Item::Table(workspace);
            doc["dependencies"] = Item::Table(Table::new());
            doc.to_string()
        }
        ManifestFormat::Pyproject => {
            let mut doc = if path.exists() {
                let existing = std::fs::read_to_string(&path)?;
                if ManifestFormat::Pyproject.has_workspace(&existing) {
                    return Err(CoreError::ManifestExists(path));
                }
                existing.parse::<DocumentMut>().map_err(|e| edit_error(&path, &e))?
            } else {
                DocumentMut::new()
            };
            if doc.get("project").is_none() {
                let mut project = Table::new();
                project["name"] = value(name.as_str());
                project["version"] = value("0.1.0");
                doc["project"] = Item::Table(project);
            }
            let tool = table_at(doc.as_table_mut(), &["tool", "conda"])
                .map_err(|reason| CoreError::Edit {
                    path: path.clone(),
                    reason,
                })?;
            tool.insert("workspace", Item::Table(workspace));
            tool.insert("dependencies", Item::Table(Table::new()));
            doc.to_string()
        }
    };

    validate(opts.format, &text, &path)?;
    write_atomic(&path, &text)?;
    debug!("initialized {}", path.display());
    Ok(path)
}

/// Add or update dependencies. Returns each entry as `name constraint`.
pub fn add_dependencies(
    manifest: &Path,
    specs: &[String],
    target: &DependencyTarget,
) -> Result<Vec<String>, CoreError> {
    let raw = parse_manifest_file(manifest)?;
    let text = std::fs::read_to_string(manifest)?;
    let mut doc = text
        .parse::<DocumentMut>()
        .map_err(|e| edit_error(manifest, &e))?;

    let entries = specs
        .iter()
        .map(|s| {
            if target.pypi {
                pypi_entry(s)
            } else {
                conda_entry(s)
            }
            .map_err(|reason| CoreError::Edit {
                path: manifest.to_path_buf(),
                reason,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let path = target.key_path(&raw.table_path);
    let keys: Vec<&str> = path.iter().map(String::as_str).collect();
    let table = table_at(doc.as_table_mut(), &keys).map_err(|reason| CoreError::Edit {
        path: manifest.to_path_buf(),
        reason,
    })?;
    let mut added = Vec::with_capacity(entries.len());
    for (name, entry, shown) in entries {
        table.insert(&name, entry);
        added.push(format!("{name} {shown}"));
    }

    let updated = doc.to_string();
    validate(raw.format, &updated, manifest)?;
    write_atomic(manifest, &updated)?;
    Ok(added)
}

/// Remove dependencies by name. Names that are not listed are warned about;
/// removing nothing at all is an error.
pub fn remove_dependencies(
    manifest: &Path,
    names: &[String],
    target: &DependencyTarget,
) -> Result<Vec<String>, CoreError> {
    let raw = parse_manifest_file(manifest)?;
    let text = std::fs::read_to_string(manifest)?;
    let mut doc = text
        .parse::<DocumentMut>()
        .map_err(|e| edit_error(manifest, &e))?;

    let path = target.key_path(&raw.table_path);
    let mut table: Option<&mut dyn TableLike> = Some(doc.as_table_mut());
    for key in &path {
        table = table.and_then(|t| t.get_mut(key)).and_then(Item::as_table_like_mut);
    }

    let mut removed = Vec::new();
    if let Some(table) = table {
        for name in names {
            if table.remove(name).is_some() {
                removed.push(name.clone());
            } else {
                warn!("'{name}' is not listed in [{}]", path.join("."));
            }
        }
    }
    if removed.is_empty() {
        return Err(CoreError::Edit {
            path: manifest.to_path_buf(),
            reason: format!("none of {} are listed in [{}]", names.join(", "), path.join(".")),
        });
    }

    let updated = doc.to_string();
    validate(raw.format, &updated, manifest)?;
    write_atomic(manifest, &updated)?;
    Ok(removed)
}

/// Conda spec text to a manifest entry: a plain string, or an inline table
/// when a channel is pinned.
fn conda_entry(input: &str) -> Result<(String, Item, String), String> {
    let spec = MatchSpec::parse(input)?;
    let constraint = spec.constraint();
    let item = match &spec.channel {
        Some(channel) => {
            let mut t = InlineTable::new();
            if let Some(v) = &spec.version {
                t.insert("version", v.as_str().into());
            }
            if let Some(b) = &spec.build {
                t.insert("build", b.as_str().into());
            }
            t.insert("channel", channel.as_str().into());
            value(t)
        }
        None => value(constraint.as_str()),
    };
    Ok((spec.name, item, constraint))
}

/// PEP 508-ish requirement text to a manifest entry. Extras and direct
/// references (`name @ <url>`) force the table form.
fn pypi_entry(input: &str) -> Result<(String, Item, String), String> {
    let input = input.trim();
    let split = input
        .find(|c: char| "<>=!~[ @;".contains(c))
        .unwrap_or(input.len());
    let name = input[..split].trim();
    if name.is_empty() {
        return Err(format!("malformed PyPI requirement '{input}'"));
    }
    let mut rest = input[split..].trim();
    let mut extras = Vec::new();
    if let Some(stripped) = rest.strip_prefix('[') {
        let close = stripped
            .find(']')
            .ok_or_else(|| format!("unclosed extras in '{input}'"))?;
        extras = stripped[..close]
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_owned)
            .collect();
        rest = stripped[close + 1..].trim();
    }
    let extras_array = || extras.iter().map(String::as_str).collect::<Array>();
    if let Some(reference) = rest.strip_prefix('@') {
        let reference = reference.split(';').next().unwrap_or_default().trim();
        if reference.is_empty() {
            return Err(format!("missing direct reference in '{input}'"));
        }
        let (key, target) = match reference.strip_prefix("git+") {
            Some(repo) => ("git", repo),
            None if reference.contains("://") => ("url", reference),
            None => ("path", reference),
        };
        let mut t = InlineTable::new();
        t.insert(key, target.into());
        if !extras.is_empty() {
            t.insert("extras", extras_array().into());
        }
        return Ok((name.to_owned(), value(t), format!("@ {reference}")));
    }

    let version = if rest.is_empty() { "*" } else { rest };
    let item = if extras.is_empty() {
        value(version)
    } else {
        let mut t = InlineTable::new();
        t.insert("version", version.into());
        t.insert("extras", extras_array().into());
        value(t)
    };
    Ok((name.to_owned(), item, version.to_owned()))
}

/// Walk `path` from `root`, creating implicit tables as needed.
fn table_at<'a>(root: &'a mut dyn TableLike, path: &[&str]) -> Result<&'a mut dyn TableLike, String> {
    let mut current = root;
    for key in path {
        if current.get(key).is_none() {
            let mut t = Table::new();
            t.set_implicit(true);
            current.insert(key, Item::Table(t));
        }
        current = current
            .get_mut(key)
            .and_then(Item::as_table_like_mut)
            .ok_or_else(|| format!("'{key}' is not a table"))?;
    }
    Ok(current)
}

fn validate(format: ManifestFormat, text: &str, path: &Path) -> Result<(), CoreError> {
    format.parse(text, path)?.build()?;
    Ok(())
}

fn edit_error(path: &Path, err: &toml_edit::TomlError) -> CoreError {
    CoreError::Edit {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

fn write_atomic(dest: &Path, content: &str) -> Result<(), CoreError> {
    let dir = dest
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| CoreError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use condaspace_schema::parse_manifest_file;

    const MANIFEST: &str = r#"# demo workspace
[workspace]
name = "demo"
channels = ["conda-forge"]
platforms = ["linux-64"]

[dependencies]
python = ">=3.10" # keep me
"#;

    fn write(dir: &Path, file: &str, text: &str) -> PathBuf {
        let path = dir.join(file);
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn init_conda_toml_and_refuse_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let opts = InitOptions {
            name: Some("demo".to_owned()),
            platforms: vec!["linux-64".to_owned()],
            ..InitOptions::default()
        };
        let path = init_workspace(dir.path(), &opts).unwrap();
        let config = parse_manifest_file(&path).unwrap().build().unwrap();
        assert_eq!(config.name.as_deref(), Some("demo"));
        assert_eq!(config.channels[0].name, "conda-forge");

        let err = init_workspace(dir.path(), &opts).unwrap_err();
        assert!(matches!(err, CoreError::ManifestExists(_)));
    }

    #[test]
    fn init_default_platforms_include_current() {
        let dir = tempfile::tempdir().unwrap();
        let path = init_workspace(dir.path(), &InitOptions::default()).unwrap();
        let config = parse_manifest_file(&path).unwrap().build().unwrap();
        assert!(config.platforms.contains(&current_platform()));
        assert!(config.platforms.len() >= 4);
    }

    #[test]
    fn init_extends_existing_pyproject() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "pyproject.toml",
            "[project]\nname = \"pkg\"\nversion = \"1.0\"\n\n[tool.ruff]\nline-length = 100\n",
        );
        init_workspace(
            dir.path(),
            &InitOptions {
                format: ManifestFormat::Pyproject,
                platforms: vec!["linux-64".to_owned()],
                ..InitOptions::default()
            },
        )
        .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("[tool.ruff]"));
        assert!(text.contains("[tool.conda.workspace]"));
        let raw = parse_manifest_file(&path).unwrap();
        assert_eq!(raw.table_path, "tool.conda");

        let err = init_workspace(
            dir.path(),
            &InitOptions {
                format: ManifestFormat::Pyproject,
                ..InitOptions::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::ManifestExists(_)));
    }

    #[test]
    fn add_preserves_comments_and_targets_feature() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "conda.toml", MANIFEST);

        let added = add_dependencies(
            &path,
            &["numpy>=1.26".to_owned(), "conda-forge::scipy".to_owned()],
            &DependencyTarget::default(),
        )
        .unwrap();
        assert_eq!(added, vec!["numpy >=1.26", "scipy *"]);

        add_dependencies(
            &path,
            &["pytest >=8".to_owned()],
            &DependencyTarget {
                feature: Some("test".to_owned()),
                pypi: false,
            },
        )
        .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# demo workspace"));
        assert!(text.contains("# keep me"));

        let config = parse_manifest_file(&path).unwrap().build().unwrap();
        let default = config.default_feature().unwrap();
        assert_eq!(default.dependencies["numpy"].constraint(), ">=1.26");
        assert_eq!(
            default.dependencies["scipy"].channel.as_deref(),
            Some("conda-forge")
        );
        assert_eq!(
            config.feature("test").unwrap().dependencies["pytest"].constraint(),
            ">=8"
        );
    }

    #[test]
    fn add_pypi_with_extras() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "conda.toml", MANIFEST);
        add_dependencies(
            &path,
            &["requests[socks]>=2.31".to_owned(), "rich".to_owned()],
            &DependencyTarget {
                feature: None,
                pypi: true,
            },
        )
        .unwrap();
        let config = parse_manifest_file(&path).unwrap().build().unwrap();
        let pypi = &config.default_feature().unwrap().pypi_dependencies;
        assert_eq!(pypi["requests"].requirement(), "requests[socks]>=2.31");
        assert_eq!(pypi["rich"].requirement(), "rich");
    }

    #[test]
    fn add_pypi_direct_references() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "conda.toml", MANIFEST);
        let added = add_dependencies(
            &path,
            &[
                "pkg @ https://files.example/pkg-1.0-py3-none-any.whl".to_owned(),
                "tool[cli] @ git+https://github.com/example/tool.git".to_owned(),
                "local@./vendor/local".to_owned(),
            ],
            &DependencyTarget {
                feature: None,
                pypi: true,
            },
        )
        .unwrap();
        assert_eq!(
            added[0],
            "pkg @ https://files.example/pkg-1.0-py3-none-any.whl"
        );

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains(r#"pkg = { url = "https://files.example/pkg-1.0-py3-none-any.whl" }"#));
        assert!(!text.contains("version = \"@"));

        let config = parse_manifest_file(&path).unwrap().build().unwrap();
        let pypi = &config.default_feature().unwrap().pypi_dependencies;
        assert_eq!(
            pypi["pkg"].reference.as_deref(),
            Some("https://files.example/pkg-1.0-py3-none-any.whl")
        );
        assert_eq!(
            pypi["pkg"].requirement(),
            "pkg @ https://files.example/pkg-1.0-py3-none-any.whl"
        );
        assert_eq!(
            pypi["tool"].requirement(),
            "tool[cli] @ git+https://github.com/example/tool.git"
        );
        assert_eq!(pypi["local"].reference.as_deref(), Some("./vendor/local"));
        assert!(pypi["local"].version.is_none());
    }

    #[test]
    fn add_to_pyproject_uses_tool_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "pyproject.toml",
            "[project]\nname = \"pkg\"\n\n[tool.pixi.workspace]\nchannels = [\"conda-forge\"]\nplatforms = [\"linux-64\"]\n",
        );
        add_dependencies(&path, &["zlib".to_owned()], &DependencyTarget::default()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("[tool.pixi.dependencies]"));
    }

    #[test]
    fn invalid_edit_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "conda.toml", MANIFEST);
        let err = add_dependencies(
            &path,
            &["num$py".to_owned()],
            &DependencyTarget::default(),
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("manifest error:"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), MANIFEST);
    }

    #[test]
    fn remove_known_and_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "conda.toml", MANIFEST);
        let removed = remove_dependencies(
            &path,
            &["python".to_owned(), "numpy".to_owned()],
            &DependencyTarget::default(),
        )
        .unwrap();
        assert_eq!(removed, vec!["python"]);

        let err = remove_dependencies(&path, &["python".to_owned()], &DependencyTarget::default())
            .unwrap_err();
        assert!(err.to_string().contains("none of python"));
    }
}

use crate::settings::Settings;
use crate::CoreError;
use condaspace_runtime::PrefixLayout;
use condaspace_schema::{
    find_manifest, parse_manifest_file, EnvName, Environment, ManifestFormat, Platform,
    WorkspaceConfig, LOCKFILE_NAME,
};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A loaded workspace: its manifest, validated model, and local layout.
#[derive(Debug, Clone)]
pub struct WorkspaceContext {
    pub manifest_path: PathBuf,
    pub format: ManifestFormat,
    /// Manifest table the workspace was read from (`""` or `tool.<name>`).
    pub table_path: String,
    pub root: PathBuf,
    pub config: WorkspaceConfig,
    pub settings: Settings,
    pub platform: Platform,
    layout: PrefixLayout,
}

impl WorkspaceContext {
    /// Find the nearest manifest at or above `start` and load it.
    pub fn discover(start: &Path, settings: Settings) -> Result<Self, CoreError> {
        let manifest = find_manifest(start)?;
        Self::load(&manifest, settings)
    }

    pub fn load(manifest_path: &Path, settings: Settings) -> Result<Self, CoreError> {
        let raw = parse_manifest_file(manifest_path)?;
        let config = raw.build()?;
        for warning in config.warnings() {
            warn!("{warning}");
        }
        let root = manifest_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        debug!(
            "loaded {} workspace from {} ({} environments)",
            raw.format,
            manifest_path.display(),
            config.environments.len()
        );
        let platform = settings.platform();
        Ok(Self {
            manifest_path: manifest_path.to_path_buf(),
            format: raw.format,
            table_path: raw.table_path,
            layout: PrefixLayout::new(&root),
            root,
            config,
            settings,
            platform,
        })
    }

    /// Build a context around an already validated model.
    pub fn from_config(root: &Path, config: WorkspaceConfig, settings: Settings) -> Self {
        let platform = settings.platform();
        Self {
            manifest_path: root.join(ManifestFormat::CondaToml.file_name()),
            format: ManifestFormat::CondaToml,
            table_path: String::new(),
            root: root.to_path_buf(),
            layout: PrefixLayout::new(root),
            config,
            settings,
            platform,
        }
    }

    pub fn layout(&self) -> &PrefixLayout {
        &self.layout
    }

    pub fn lockfile_path(&self) -> PathBuf {
        self.root.join(LOCKFILE_NAME)
    }

    pub fn prefix(&self, environment: &str) -> PathBuf {
        self.layout.prefix(environment)
    }

    pub fn workspace_name(&self) -> String {
        self.config.name.clone().unwrap_or_else(|| {
            self.root
                .file_name()
                .map_or_else(|| "workspace".to_owned(), |n| n.to_string_lossy().into_owned())
        })
    }

    pub fn environment(&self, name: &str) -> Result<&Environment, CoreError> {
        self.config
            .environment(name)
            .ok_or_else(|| CoreError::EnvironmentNotFound {
                name: name.to_owned(),
                available: self
                    .config
                    .environments
                    .keys()
                    .map(|n| n.as_str().to_owned())
                    .collect(),
            })
    }

    /// Validate requested names; an empty request means every environment.
    pub fn select_environments(&self, requested: &[String]) -> Result<Vec<EnvName>, CoreError> {
        if requested.is_empty() {
            return Ok(self.config.environment_names());
        }
        let mut out: Vec<EnvName> = Vec::with_capacity(requested.len());
        for name in requested {
            let env = self.environment(name)?;
            if !out.contains(&env.name) {
                out.push(env.name.clone());
            }
        }
        Ok(out)
    }

    /// Platforms to lock: the declared ones, or the current platform when none are declared.
    pub fn lock_platforms(&self) -> Vec<Platform> {
        if self.config.platforms.is_empty() {
            vec![self.platform.clone()]
        } else {
            self.config.platforms.iter().cloned().collect()
        }
    }
}

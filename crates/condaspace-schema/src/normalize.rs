//! Model builder: validates [`RawTables`] into a [`WorkspaceConfig`].
//!
//! All problems found in one pass are collected and returned together.

use crate::manifest::{
    ManifestError, RawActivation, RawEnvironment, RawManifest, RawTables, RawTarget, RawWorkspace,
};
use crate::model::{
    dedupe_channels, Activation, Channel, ChannelPriority, Environment, Feature, TargetOverride,
    WorkspaceConfig, DEFAULT_NAME,
};
use crate::platform::is_known_platform;
use crate::spec::{MatchSpec, PypiDependency};
use crate::types::{EnvName, FeatureName, Platform};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One validation finding, located by dotted key path inside the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub location: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

impl RawManifest {
    /// Validate the parsed tables into a workspace model.
    pub fn build(&self) -> Result<WorkspaceConfig, ManifestError> {
        Builder::new(&self.table_path)
            .build(&self.tables)
            .map_err(|issues| ManifestError::Validation {
                path: self.path.clone(),
                issues,
            })
    }
}

/// Validate raw tables that did not come from a file.
pub fn build_tables(tables: &RawTables) -> Result<WorkspaceConfig, Vec<ValidationIssue>> {
    Builder::new("").build(tables)
}

struct Builder {
    prefix: String,
    issues: Vec<ValidationIssue>,
}

impl Builder {
    fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_owned(),
            issues: Vec::new(),
        }
    }

    fn issue(&mut self, location: &str, message: impl Into<String>) {
        let location = if self.prefix.is_empty() {
            location.to_owned()
        } else {
            format!("{}.{location}", self.prefix)
        };
        self.issues.push(ValidationIssue {
            location,
            message: message.into(),
        });
    }

    fn build(mut self, tables: &RawTables) -> Result<WorkspaceConfig, Vec<ValidationIssue>> {
        let empty = RawWorkspace::default();
        let (ws_key, ws) = match (&tables.workspace, &tables.project) {
            (Some(ws), Some(_)) => {
                self.issue(
                    "project",
                    "legacy [project] table conflicts with [workspace]; keep only [workspace]",
                );
                ("workspace", ws)
            }
            (Some(ws), None) => ("workspace", ws),
            (None, Some(legacy)) => ("project", legacy),
            (None, None) => ("workspace", &empty),
        };

        let meta = tables.project_metadata.clone().unwrap_or_default();
        let name = ws.name.clone().or(meta.name);
        let version = ws.version.clone().or(meta.version);
        let description = ws.description.clone().or(meta.description);

        let channels = self.channels(&ws.channels, &format!("{ws_key}.channels"));
        let platforms = self.platforms(&ws.platforms, &format!("{ws_key}.platforms"));
        let channel_priority = ws.channel_priority.as_deref().and_then(|p| {
            p.parse::<ChannelPriority>()
                .map_err(|e| self.issue(&format!("{ws_key}.channel-priority"), e))
                .ok()
        });

        let mut features = BTreeMap::new();
        let mut default = Feature::new(DEFAULT_NAME);
        default.dependencies = self.dependencies(&tables.dependencies, "dependencies");
        default.pypi_dependencies =
            self.pypi_dependencies(&tables.pypi_dependencies, "pypi-dependencies");
        default.system_requirements =
            self.system_requirements(&tables.system_requirements, "system-requirements");
        default.activation = activation(&tables.activation);
        default.targets = self.targets(&tables.target, "target");
        features.insert(FeatureName::from(DEFAULT_NAME), default);

        for (name, raw) in &tables.feature {
            let loc = format!("feature.{name}");
            if name == DEFAULT_NAME {
                self.issue(
                    &loc,
                    "the name 'default' is reserved for the top-level dependency tables",
                );
                continue;
            }
            if let Err(e) = validate_name("feature", name) {
                self.issue(&loc, e);
                continue;
            }
            let mut feature = Feature::new(name.as_str());
            feature.dependencies = self.dependencies(&raw.dependencies, &format!("{loc}.dependencies"));
            feature.pypi_dependencies =
                self.pypi_dependencies(&raw.pypi_dependencies, &format!("{loc}.pypi-dependencies"));
            feature.channels = self.channels(&raw.channels, &format!("{loc}.channels"));
            feature.platforms = self.platforms(&raw.platforms, &format!("{loc}.platforms"));
            feature.system_requirements = self.system_requirements(
                &raw.system_requirements,
                &format!("{loc}.system-requirements"),
            );
            feature.activation = activation(&raw.activation);
            feature.targets = self.targets(&raw.target, &format!("{loc}.target"));
            features.insert(FeatureName::new(name.as_str()), feature);
        }

        let environments = self.environments(tables, &features);

        if self.issues.is_empty() {
            Ok(WorkspaceConfig {
                name,
                version,
                description,
                channels,
                platforms,
                channel_priority,
                features,
                environments,
            })
        } else {
            Err(self.issues)
        }
    }

    fn environments(
        &mut self,
        tables: &RawTables,
        features: &BTreeMap<FeatureName, Feature>,
    ) -> BTreeMap<EnvName, Environment> {
        let mut environments = BTreeMap::new();
        // Prefix directories are named after environments, so names that
        // differ only in case would share a directory on some filesystems.
        let mut folded: BTreeMap<String, String> = BTreeMap::new();

        for (name, raw) in &tables.environments {
            let loc = format!("environments.{name}");
            if let Err(e) = validate_name("environment", name) {
                self.issue(&loc, e);
                continue;
            }
            if let Some(previous) = folded.insert(name.to_ascii_lowercase(), name.clone()) {
                self.issue(
                    &loc,
                    format!("duplicate environment name: '{name}' collides with '{previous}'"),
                );
                continue;
            }

            let mut env = Environment::new(name.as_str());
            let feature_names = match raw {
                RawEnvironment::Features(list) => list,
                RawEnvironment::Table(t) => {
                    env.solve_group = t
                        .solve_group
                        .as_deref()
                        .map(str::trim)
                        .filter(|g| !g.is_empty())
                        .map(str::to_owned);
                    env.no_default_feature = t.no_default_feature;
                    &t.features
                }
            };
            for feature in feature_names {
                if features.contains_key(feature.as_str()) {
                    env.features.push(FeatureName::new(feature.as_str()));
                } else {
                    self.issue(
                        &format!("{loc}.features"),
                        format!("environment '{name}' references unknown feature '{feature}'"),
                    );
                }
            }
            environments.insert(env.name.clone(), env);
        }

        environments
            .entry(EnvName::from(DEFAULT_NAME))
            .or_insert_with(|| Environment::new(DEFAULT_NAME));
        environments
    }

    fn channels(&mut self, raw: &[toml::Value], loc: &str) -> Vec<Channel> {
        let mut out = Vec::with_capacity(raw.len());
        for (i, value) in raw.iter().enumerate() {
            match Channel::from_manifest(value) {
                Ok(c) => out.push(c),
                Err(e) => self.issue(&format!("{loc}[{i}]"), e),
            }
        }
        dedupe_channels(out)
    }

    fn platforms(&mut self, raw: &[String], loc: &str) -> BTreeSet<Platform> {
        let mut out = BTreeSet::new();
        for p in raw {
            if is_known_platform(p) {
                out.insert(Platform::new(p.as_str()));
            } else {
                self.issue(loc, format!("unknown platform '{p}'"));
            }
        }
        out
    }

    fn dependencies(&mut self, table: &toml::Table, loc: &str) -> BTreeMap<String, MatchSpec> {
        let mut out = BTreeMap::new();
        for (name, value) in table {
            match MatchSpec::from_manifest(name, value) {
                Ok(spec) => {
                    out.insert(name.clone(), spec);
                }
                Err(e) => self.issue(&format!("{loc}.{name}"), format!("malformed dependency spec: {e}")),
            }
        }
        out
    }

    fn pypi_dependencies(
        &mut self,
        table: &toml::Table,
        loc: &str,
    ) -> BTreeMap<String, PypiDependency> {
        let mut out = BTreeMap::new();
        for (name, value) in table {
            match PypiDependency::from_manifest(name, value) {
                Ok(dep) => {
                    out.insert(name.clone(), dep);
                }
                Err(e) => self.issue(&format!("{loc}.{name}"), format!("malformed PyPI requirement: {e}")),
            }
        }
        out
    }

    fn system_requirements(&mut self, table: &toml::Table, loc: &str) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for (key, value) in table {
            let rendered = match value {
                toml::Value::String(s) => s.clone(),
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Table(t) => t
                    .iter()
                    .map(|(k, v)| match v {
                        toml::Value::String(s) => format!("{k}={s}"),
                        other => format!("{k}={other}"),
                    })
                    .collect::<Vec<_>>()
                    .join(","),
                other => {
                    self.issue(
                        &format!("{loc}.{key}"),
                        format!("expected a version string, found {}", other.type_str()),
                    );
                    continue;
                }
            };
            out.insert(key.clone(), rendered);
        }
        out
    }

    fn targets(
        &mut self,
        raw: &BTreeMap<String, RawTarget>,
        loc: &str,
    ) -> BTreeMap<Platform, TargetOverride> {
        let mut out = BTreeMap::new();
        for (platform, target) in raw {
            let tloc = format!("{loc}.{platform}");
            if !is_known_platform(platform) {
                self.issue(&tloc, format!("unknown platform '{platform}'"));
                continue;
            }
            let over = TargetOverride {
                dependencies: self.dependencies(&target.dependencies, &format!("{tloc}.dependencies")),
                pypi_dependencies: self
                    .pypi_dependencies(&target.pypi_dependencies, &format!("{tloc}.pypi-dependencies")),
                activation: activation(&target.activation),
            };
            out.insert(Platform::new(platform.as_str()), over);
        }
        out
    }
}

fn activation(raw: &RawActivation) -> Activation {
    Activation {
        scripts: raw.scripts.clone(),
        env: raw.env.clone(),
    }
}

/// Environment and feature names: ASCII letters, digits, `-` and `_`.
pub fn validate_name(kind: &str, name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{kind} name must not be empty"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(format!(
            "invalid {kind} name '{name}': only letters, digits, '-' and '_' are allowed"
        ));
    }
    Ok(())
}

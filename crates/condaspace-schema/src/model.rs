//! The validated workspace model.
//!
//! A [`WorkspaceConfig`] is produced once per invocation by
//! [`crate::normalize`] and is never mutated afterwards.

use crate::spec::{MatchSpec, PypiDependency};
use crate::types::{EnvName, FeatureName, Platform};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Name of the implicit feature built from the top-level tables, and of the
/// environment that always exists.
pub const DEFAULT_NAME: &str = "default";

/// Base URL used to expand bare channel names.
pub const CHANNEL_ALIAS: &str = "https://conda.anaconda.org";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelPriority {
    Strict,
    Flexible,
    Disabled,
}

impl FromStr for ChannelPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "strict" => Ok(Self::Strict),
            "flexible" => Ok(Self::Flexible),
            "disabled" => Ok(Self::Disabled),
            other => Err(format!(
                "invalid channel-priority '{other}' (expected strict, flexible, or disabled)"
            )),
        }
    }
}

impl fmt::Display for ChannelPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Strict => "strict",
            Self::Flexible => "flexible",
            Self::Disabled => "disabled",
        })
    }
}

/// A channel as written in the manifest together with its canonical URL.
///
/// Two channels are the same channel when their URLs match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
}

impl Channel {
    pub fn from_name(name: &str) -> Result<Self, String> {
        let name = name.trim();
        if name.is_empty() {
            return Err("channel must not be empty".to_owned());
        }
        Ok(Self {
            name: name.to_owned(),
            url: canonical_channel_url(name),
            priority: None,
        })
    }

    /// Accepts `"conda-forge"`, a URL, or `{ channel = "...", priority = N }`.
    pub fn from_manifest(value: &toml::Value) -> Result<Self, String> {
        match value {
            toml::Value::String(s) => Self::from_name(s),
            toml::Value::Table(t) => {
                let name = t
                    .get("channel")
                    .and_then(toml::Value::as_str)
                    .ok_or_else(|| "channel table needs a 'channel' string".to_owned())?;
                let mut channel = Self::from_name(name)?;
                if let Some(p) = t.get("priority") {
                    channel.priority = Some(
                        p.as_integer()
                            .ok_or_else(|| "channel 'priority' must be an integer".to_owned())?,
                    );
                }
                if let Some(key) = t.keys().find(|k| !matches!(k.as_str(), "channel" | "priority"))
                {
                    return Err(format!("unknown channel key '{key}'"));
                }
                Ok(channel)
            }
            other => Err(format!(
                "expected a channel name or table, found {}",
                other.type_str()
            )),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Expand a channel name into the URL recorded in lockfiles, always with a trailing slash.
pub fn canonical_channel_url(name: &str) -> String {
    let base = if name.contains("://") {
        name.to_owned()
    } else if name.starts_with('/') {
        format!("file://{name}")
    } else {
        format!("{CHANNEL_ALIAS}/{name}")
    };
    if base.ends_with('/') {
        base
    } else {
        format!("{base}/")
    }
}

/// Order-preserving removal of repeated channels.
pub fn dedupe_channels(channels: impl IntoIterator<Item = Channel>) -> Vec<Channel> {
    let mut seen = BTreeSet::new();
    channels
        .into_iter()
        .filter(|c| seen.insert(c.url.clone()))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Activation {
    pub scripts: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl Activation {
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty() && self.env.is_empty()
    }

    /// Append scripts in order and overwrite variables by key.
    pub fn merge(&mut self, other: &Activation) {
        self.scripts.extend(other.scripts.iter().cloned());
        for (k, v) in &other.env {
            self.env.insert(k.clone(), v.clone());
        }
    }
}

/// Contributions from a `target.<platform>` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TargetOverride {
    pub dependencies: BTreeMap<String, MatchSpec>,
    pub pypi_dependencies: BTreeMap<String, PypiDependency>,
    pub activation: Activation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feature {
    pub name: FeatureName,
    pub dependencies: BTreeMap<String, MatchSpec>,
    pub pypi_dependencies: BTreeMap<String, PypiDependency>,
    pub channels: Vec<Channel>,
    /// Platforms this feature is restricted to. Empty means unrestricted.
    pub platforms: BTreeSet<Platform>,
    pub system_requirements: BTreeMap<String, String>,
    pub activation: Activation,
    pub targets: BTreeMap<Platform, TargetOverride>,
}

impl Feature {
    pub fn new(name: impl Into<FeatureName>) -> Self {
        Self {
            name: name.into(),
            dependencies: BTreeMap::new(),
            pypi_dependencies: BTreeMap::new(),
            channels: Vec::new(),
            platforms: BTreeSet::new(),
            system_requirements: BTreeMap::new(),
            activation: Activation::default(),
            targets: BTreeMap::new(),
        }
    }

    pub fn supports(&self, platform: &Platform) -> bool {
        self.platforms.is_empty() || self.platforms.contains(platform)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Environment {
    pub name: EnvName,
    pub features: Vec<FeatureName>,
    pub solve_group: Option<String>,
    pub no_default_feature: bool,
}

impl Environment {
    pub fn new(name: impl Into<EnvName>) -> Self {
        Self {
            name: name.into(),
            features: Vec::new(),
            solve_group: None,
            no_default_feature: false,
        }
    }

    /// Features in application order: `default` first unless disabled, then
    /// the declared list with repeats dropped.
    pub fn feature_chain(&self) -> Vec<FeatureName> {
        let mut chain: Vec<FeatureName> = Vec::with_capacity(self.features.len() + 1);
        if !self.no_default_feature {
            chain.push(FeatureName::from(DEFAULT_NAME));
        }
        for f in &self.features {
            if !chain.contains(f) {
                chain.push(f.clone());
            }
        }
        chain
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceConfig {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub channels: Vec<Channel>,
    pub platforms: BTreeSet<Platform>,
    pub channel_priority: Option<ChannelPriority>,
    pub features: BTreeMap<FeatureName, Feature>,
    pub environments: BTreeMap<EnvName, Environment>,
}

impl WorkspaceConfig {
    /// The implicit feature built from the top-level tables.
    pub fn default_feature(&self) -> Option<&Feature> {
        self.features.get(DEFAULT_NAME)
    }

    pub fn feature(&self, name: &str) -> Option<&Feature> {
        self.features.get(name)
    }

    pub fn environment(&self, name: &str) -> Option<&Environment> {
        self.environments.get(name)
    }

    pub fn environment_names(&self) -> Vec<EnvName> {
        self.environments.keys().cloned().collect()
    }

    /// Members of a named solve group, sorted by environment name.
    pub fn solve_group_members(&self, group: &str) -> Vec<&Environment> {
        self.environments
            .values()
            .filter(|e| e.solve_group.as_deref() == Some(group))
            .collect()
    }

    /// Whether the workspace declares `platform`. An empty list accepts any platform.
    pub fn supports_platform(&self, platform: &Platform) -> bool {
        self.platforms.is_empty() || self.platforms.contains(platform)
    }

    /// Non-fatal findings, such as features that can never contribute.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        for feature in self.features.values() {
            if feature.platforms.is_empty() || self.platforms.is_empty() {
                continue;
            }
            if feature.platforms.is_disjoint(&self.platforms) {
                let used_by: Vec<&str> = self
                    .environments
                    .values()
                    .filter(|e| e.features.contains(&feature.name))
                    .map(|e| e.name.as_str())
                    .collect();
                out.push(format!(
                    "feature '{}' is restricted to platforms not declared by the workspace; it never contributes{}",
                    feature.name,
                    if used_by.is_empty() {
                        String::new()
                    } else {
                        format!(" (used by: {})", used_by.join(", "))
                    }
                ));
            }
        }
        out
    }
}

//! Flattening an environment's feature chain into one dependency set.

use crate::CoreError;
use condaspace_schema::{
    model::dedupe_channels, Activation, Channel, EnvName, Environment, Feature, FeatureName,
    MatchSpec, Platform, PypiDependency, WorkspaceConfig,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// What one environment asks for on one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedSpec {
    pub environment: EnvName,
    pub platform: Platform,
    /// Features that contributed, in application order.
    pub features: Vec<FeatureName>,
    pub dependencies: BTreeMap<String, MatchSpec>,
    pub pypi_dependencies: BTreeMap<String, PypiDependency>,
    pub channels: Vec<Channel>,
    pub activation: Activation,
    pub system_requirements: BTreeMap<String, String>,
    /// Every platform the environment can be locked for.
    pub platforms: Vec<Platform>,
    pub solve_group: Option<String>,
}

impl ResolvedSpec {
    pub fn channel_urls(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.url.clone()).collect()
    }
}

/// Resolve `environment` for `platform`.
///
/// The default feature applies first unless the environment opts out, then
/// each named feature in order. Dependencies, variables, and system
/// requirements overwrite by key; channels and scripts append. A feature
/// restricted to other platforms is skipped. `target.<platform>` overrides
/// of the contributing features are applied after all features.
pub fn resolve(
    config: &WorkspaceConfig,
    environment: &str,
    platform: &Platform,
) -> Result<ResolvedSpec, CoreError> {
    let env = config
        .environment(environment)
        .ok_or_else(|| CoreError::EnvironmentNotFound {
            name: environment.to_owned(),
            available: config
                .environments
                .keys()
                .map(|n| n.as_str().to_owned())
                .collect(),
        })?;
    if !config.supports_platform(platform) {
        return Err(CoreError::UnsupportedPlatform {
            platform: platform.to_string(),
            supported: config.platforms.iter().map(ToString::to_string).collect(),
        });
    }

    let chain = feature_chain(config, env)?;
    let mut resolved = ResolvedSpec {
        environment: env.name.clone(),
        platform: platform.clone(),
        features: Vec::new(),
        dependencies: BTreeMap::new(),
        pypi_dependencies: BTreeMap::new(),
        channels: Vec::new(),
        activation: Activation::default(),
        system_requirements: BTreeMap::new(),
        platforms: supported_platforms(config, &chain),
        solve_group: env.solve_group.clone(),
    };

    let mut channels: Vec<Channel> = config.channels.clone();
    let contributing: Vec<&Feature> = chain
        .iter()
        .copied()
        .filter(|f| {
            let applies = f.supports(platform);
            if !applies {
                debug!(
                    "feature '{}' skipped for {environment} on {platform}",
                    f.name
                );
            }
            applies
        })
        .collect();

    for feature in &contributing {
        resolved.features.push(feature.name.clone());
        for (name, spec) in &feature.dependencies {
            resolved.dependencies.insert(name.clone(), spec.clone());
        }
        for (name, dep) in &feature.pypi_dependencies {
            resolved.pypi_dependencies.insert(name.clone(), dep.clone());
        }
        channels.extend(feature.channels.iter().cloned());
        resolved.activation.merge(&feature.activation);
        for (k, v) in &feature.system_requirements {
            resolved.system_requirements.insert(k.clone(), v.clone());
        }
    }

    for feature in &contributing {
        let Some(target) = feature.targets.get(platform) else {
            continue;
        };
        for (name, spec) in &target.dependencies {
            resolved.dependencies.insert(name.clone(), spec.clone());
        }
        for (name, dep) in &target.pypi_dependencies {
            resolved.pypi_dependencies.insert(name.clone(), dep.clone());
        }
        resolved.activation.merge(&target.activation);
    }

    resolved.channels = dedupe_channels(channels);
    Ok(resolved)
}

fn feature_chain<'a>(
    config: &'a WorkspaceConfig,
    env: &Environment,
) -> Result<Vec<&'a Feature>, CoreError> {
    env.feature_chain()
        .iter()
        .filter_map(|name| match config.feature(name) {
            Some(f) => Some(Ok(f)),
            // The implicit default feature may be absent from a hand-built model.
            None if name.as_str() == condaspace_schema::DEFAULT_NAME => None,
            None => Some(Err(CoreError::FeatureNotFound {
                environment: env.name.to_string(),
                feature: name.to_string(),
            })),
        })
        .collect()
}

/// Intersection of the chain's platform restrictions with the workspace
/// platforms. Unrestricted chains get the workspace platforms.
fn supported_platforms(config: &WorkspaceConfig, chain: &[&Feature]) -> Vec<Platform> {
    let mut set: Option<BTreeSet<Platform>> = if config.platforms.is_empty() {
        None
    } else {
        Some(config.platforms.clone())
    };
    for feature in chain.iter().filter(|f| !f.platforms.is_empty()) {
        set = Some(match set {
            Some(current) => current.intersection(&feature.platforms).cloned().collect(),
            None => feature.platforms.clone(),
        });
    }
    set.map(|s| s.into_iter().collect()).unwrap_or_default()
}

/// Platforms an environment is locked for; an empty answer means "any".
pub fn environment_platforms(
    config: &WorkspaceConfig,
    environment: &str,
) -> Result<Vec<Platform>, CoreError> {
    let env = config
        .environment(environment)
        .ok_or_else(|| CoreError::EnvironmentNotFound {
            name: environment.to_owned(),
            available: config
                .environments
                .keys()
                .map(|n| n.as_str().to_owned())
                .collect(),
        })?;
    let chain = feature_chain(config, env)?;
    Ok(supported_platforms(config, &chain))
}

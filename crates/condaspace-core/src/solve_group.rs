//! Solve-group coordination: union the member specs, solve once per group
//! per platform, then project each member's closure out of the solution.

use crate::concurrency::shutdown_requested;
use crate::resolver::{environment_platforms, resolve, ResolvedSpec};
use crate::CoreError;
use condaspace_runtime::{RuntimeError, SolveRequest, Solver};
use condaspace_schema::model::dedupe_channels;
use condaspace_schema::{
    Channel, ChannelPriority, CondaPackageRecord, EnvName, LockedPackage, MatchSpec,
    PinnedEnvironment, Platform, WorkspaceConfig,
};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use tracing::{debug, info, warn};

/// Identity of a solve group. Ungrouped environments solve alone and never
/// share a key with each other.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum SolveGroupKey {
    Named(String),
    Solo(EnvName),
}

impl SolveGroupKey {
    pub fn for_environment(name: &EnvName, solve_group: Option<&str>) -> Self {
        match solve_group {
            Some(group) => Self::Named(group.to_owned()),
            None => Self::Solo(name.clone()),
        }
    }
}

impl fmt::Display for SolveGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(group) => write!(f, "solve-group '{group}'"),
            Self::Solo(env) => write!(f, "environment '{env}'"),
        }
    }
}

/// One solver call: every member's specs for one platform.
#[derive(Debug, Clone)]
pub struct SolveGroupPlan {
    pub key: SolveGroupKey,
    pub platform: Platform,
    pub members: Vec<ResolvedSpec>,
    pub channels: Vec<Channel>,
    pub channel_priority: Option<ChannelPriority>,
    /// Union of member specs. The same name may appear with different constraints.
    pub specs: Vec<MatchSpec>,
}

impl SolveGroupPlan {
    pub fn member_names(&self) -> Vec<EnvName> {
        self.members.iter().map(|m| m.environment.clone()).collect()
    }

    pub fn request(&self) -> SolveRequest {
        SolveRequest {
            group: self.key.to_string(),
            platform: self.platform.clone(),
            channels: self.channels.iter().map(|c| c.url.clone()).collect(),
            channel_priority: self.channel_priority,
            specs: self.specs.clone(),
        }
    }
}

/// Plan every group needed to lock `environments` on `platforms`.
///
/// Requesting one member of a named group pulls in the whole group, since
/// its members must be pinned from a single solution. Each member joins the
/// plans for the platforms it supports only.
pub fn plan_groups(
    config: &WorkspaceConfig,
    environments: &[EnvName],
    platforms: &[Platform],
) -> Result<Vec<SolveGroupPlan>, CoreError> {
    let mut groups: BTreeMap<SolveGroupKey, BTreeSet<EnvName>> = BTreeMap::new();
    for name in environments {
        let env = config
            .environment(name)
            .ok_or_else(|| CoreError::EnvironmentNotFound {
                name: name.to_string(),
                available: config
                    .environments
                    .keys()
                    .map(|n| n.as_str().to_owned())
                    .collect(),
            })?;
        let key = SolveGroupKey::for_environment(&env.name, env.solve_group.as_deref());
        let members = groups.entry(key).or_default();
        match &env.solve_group {
            Some(group) => {
                members.extend(config.solve_group_members(group).iter().map(|e| e.name.clone()));
            }
            None => {
                members.insert(env.name.clone());
            }
        }
    }

    let mut plans = Vec::new();
    for (key, members) in groups {
        let mut supported: BTreeMap<&EnvName, Vec<Platform>> = BTreeMap::new();
        for name in &members {
            supported.insert(name, environment_platforms(config, name)?);
        }
        for platform in platforms {
            let mut resolved = Vec::new();
            for name in &members {
                let env_platforms = &supported[name];
                if !env_platforms.is_empty() && !env_platforms.contains(platform) {
                    continue;
                }
                resolved.push(resolve(config, name, platform)?);
            }
            if resolved.is_empty() {
                continue;
            }
            let channels = dedupe_channels(resolved.iter().flat_map(|r| r.channels.iter().cloned()));
            let specs = union_specs(&resolved);
            debug!(
                "planned {key} on {platform}: {} members, {} specs",
                resolved.len(),
                specs.len()
            );
            plans.push(SolveGroupPlan {
                key: key.clone(),
                platform: platform.clone(),
                members: resolved,
                channels,
                channel_priority: config.channel_priority,
                specs,
            });
        }
    }
    Ok(plans)
}

/// Every member's dependency specs; exact repeats are sent once.
fn union_specs(members: &[ResolvedSpec]) -> Vec<MatchSpec> {
    let mut out: Vec<MatchSpec> = Vec::new();
    for member in members {
        for spec in member.dependencies.values() {
            if !out.contains(spec) {
                out.push(spec.clone());
            }
        }
    }
    out
}

/// Solve one plan and pin each member from the shared solution.
pub fn execute(
    plan: &SolveGroupPlan,
    solver: &dyn Solver,
) -> Result<Vec<PinnedEnvironment>, CoreError> {
    info!(
        "solving {} on {} with {}",
        plan.key,
        plan.platform,
        solver.name()
    );
    let records = solver.solve(&plan.request()).map_err(|e| match e {
        RuntimeError::Unsatisfiable(diagnostic) => CoreError::UnsatisfiableSolveGroup {
            group: plan.key.to_string(),
            platform: plan.platform.to_string(),
            diagnostic,
        },
        other => CoreError::SolveFailed {
            group: plan.key.to_string(),
            platform: plan.platform.to_string(),
            source: other,
        },
    })?;

    Ok(plan
        .members
        .iter()
        .map(|member| {
            let closure = project(&records, member.dependencies.keys().map(String::as_str));
            PinnedEnvironment::new(
                member.environment.clone(),
                plan.platform.clone(),
                closure.into_iter().cloned().map(LockedPackage::Conda).collect(),
            )
        })
        .collect())
}

/// Records reachable from `roots` through `depends`. Names the solution does
/// not contain (virtual packages, for instance) are skipped.
pub fn project<'a>(
    records: &'a [CondaPackageRecord],
    roots: impl IntoIterator<Item = &'a str>,
) -> Vec<&'a CondaPackageRecord> {
    let by_name: HashMap<&str, &CondaPackageRecord> =
        records.iter().map(|r| (r.name(), r)).collect();
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut queue: VecDeque<String> = roots.into_iter().map(str::to_owned).collect();
    let mut out = Vec::new();
    while let Some(name) = queue.pop_front() {
        let Some(&record) = by_name.get(name.as_str()) else {
            continue;
        };
        if !seen.insert(record.name()) {
            continue;
        }
        out.push(record);
        queue.extend(record.dependency_names());
    }
    out
}

/// Result of all solves for one group, across every planned platform.
#[derive(Debug)]
pub struct GroupOutcome {
    pub key: SolveGroupKey,
    pub environments: Vec<EnvName>,
    pub platforms: Vec<Platform>,
    pub result: Result<Vec<PinnedEnvironment>, CoreError>,
}

/// Run every plan. Groups solve in parallel; a group's platforms solve in
/// order and the first failure fails the whole group.
pub fn execute_all(plans: Vec<SolveGroupPlan>, solver: &dyn Solver) -> Vec<GroupOutcome> {
    let mut grouped: BTreeMap<SolveGroupKey, Vec<SolveGroupPlan>> = BTreeMap::new();
    for plan in plans {
        grouped.entry(plan.key.clone()).or_default().push(plan);
    }

    grouped
        .into_par_iter()
        .map(|(key, plans)| {
            let mut environments: BTreeSet<EnvName> = BTreeSet::new();
            for plan in &plans {
                environments.extend(plan.member_names());
            }
            let platforms: Vec<Platform> = plans.iter().map(|p| p.platform.clone()).collect();
            let result = solve_group(&plans, solver);
            if let Err(e) = &result {
                warn!("{key} failed: {e}");
            }
            GroupOutcome {
                key,
                environments: environments.into_iter().collect(),
                platforms,
                result,
            }
        })
        .collect()
}

fn solve_group(
    plans: &[SolveGroupPlan],
    solver: &dyn Solver,
) -> Result<Vec<PinnedEnvironment>, CoreError> {
    let mut pinned = Vec::new();
    for plan in plans {
        if shutdown_requested() {
            return Err(CoreError::Interrupted);
        }
        pinned.extend(execute(plan, solver)?);
    }
    Ok(pinned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use condaspace_runtime::mock::MockSolver;
    use condaspace_schema::ManifestFormat;
    use std::path::Path;

    fn config(text: &str) -> WorkspaceConfig {
        ManifestFormat::CondaToml
            .parse(text, Path::new("conda.toml"))
            .unwrap()
            .build()
            .unwrap()
    }

    fn record(subdir: &str, name: &str, version: &str, depends: &[&str]) -> CondaPackageRecord {
        let mut r = CondaPackageRecord::from_url(&format!(
            "https://conda.anaconda.org/conda-forge/{subdir}/{name}-{version}-0.conda"
        ))
        .unwrap();
        r.depends = depends.iter().map(|d| (*d).to_owned()).collect();
        r
    }

    fn names(env: &PinnedEnvironment) -> Vec<&str> {
        env.packages.iter().map(LockedPackage::name).collect()
    }

    const GROUPED: &str = r#"
[workspace]
channels = ["conda-forge"]
platforms = ["linux-64"]

[dependencies]
numpy = "*"

[feature.test.dependencies]
pytest = "*"

[feature.docs.dependencies]
sphinx = "*"

[environments]
default = { solve-group = "main" }
test = { features = ["test"], solve-group = "main" }
docs = ["docs"]
"#;

    #[test]
    fn grouping_and_singletons() {
        let cfg = config(GROUPED);
        let plans = plan_groups(
            &cfg,
            &cfg.environment_names(),
            &[Platform::from("linux-64")],
        )
        .unwrap();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].key, SolveGroupKey::Named("main".to_owned()));
        assert_eq!(
            plans[0].member_names(),
            vec![EnvName::from("default"), EnvName::from("test")]
        );
        assert_eq!(plans[1].key, SolveGroupKey::Solo(EnvName::from("docs")));
    }

    #[test]
    fn requesting_one_member_plans_whole_group() {
        let cfg = config(GROUPED);
        let plans =
            plan_groups(&cfg, &[EnvName::from("test")], &[Platform::from("linux-64")]).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].members.len(), 2);
    }

    #[test]
    fn conflicting_constraints_both_reach_solver() {
        let cfg = config(
            r#"
[workspace]
channels = ["conda-forge"]
platforms = ["linux-64"]

[dependencies]
python = ">=3.10"

[feature.old.dependencies]
python = "<3.12"

[environments]
default = { solve-group = "g" }
old = { features = ["old"], solve-group = "g" }
"#,
        );
        let plans =
            plan_groups(&cfg, &cfg.environment_names(), &[Platform::from("linux-64")]).unwrap();
        let specs: Vec<String> = plans[0].specs.iter().map(ToString::to_string).collect();
        assert_eq!(specs, vec!["python >=3.10", "python <3.12"]);
    }

    #[test]
    fn shared_group_pins_same_version_and_projects_closure() {
        let cfg = config(GROUPED);
        let solver = MockSolver::new(vec![
            record("linux-64", "numpy", "1.26.0", &["python"]),
            record("linux-64", "numpy", "2.0.0", &["python"]),
            record("linux-64", "python", "3.12.1", &[]),
            record("noarch", "pytest", "8.1.0", &["python", "pluggy"]),
            record("noarch", "pluggy", "1.4.0", &[]),
        ]);
        let plans =
            plan_groups(&cfg, &[EnvName::from("default")], &[Platform::from("linux-64")]).unwrap();
        let pinned = execute(&plans[0], &solver).unwrap();
        assert_eq!(pinned.len(), 2);
        let default = pinned.iter().find(|p| p.environment == "default").unwrap();
        let test = pinned.iter().find(|p| p.environment == "test").unwrap();

        assert_eq!(names(default), vec!["numpy", "python"]);
        assert_eq!(names(test), vec!["numpy", "pluggy", "pytest", "python"]);
        assert_eq!(default.find("numpy"), test.find("numpy"));
        assert!(default.find("pluggy").is_none());
    }

    #[test]
    fn unsatisfiable_group_reports_key() {
        let cfg = config(GROUPED);
        let solver = MockSolver::new(vec![record("linux-64", "numpy", "1.26.0", &[])]);
        let plans =
            plan_groups(&cfg, &[EnvName::from("test")], &[Platform::from("linux-64")]).unwrap();
        let err = execute(&plans[0], &solver).unwrap_err();
        match err {
            CoreError::UnsatisfiableSolveGroup {
                group, diagnostic, ..
            } => {
                assert_eq!(group, "solve-group 'main'");
                assert!(diagnostic.contains("pytest"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn failed_group_leaves_others_solved() {
        let cfg = config(GROUPED);
        let solver = MockSolver::new(vec![
            record("linux-64", "numpy", "1.26.0", &[]),
            record("noarch", "sphinx", "7.2.0", &[]),
        ]);
        let plans =
            plan_groups(&cfg, &cfg.environment_names(), &[Platform::from("linux-64")]).unwrap();
        let outcomes = execute_all(plans, &solver);
        assert_eq!(outcomes.len(), 2);

        let main = outcomes
            .iter()
            .find(|o| o.key == SolveGroupKey::Named("main".to_owned()))
            .unwrap();
        assert!(main.result.is_err());
        assert_eq!(main.environments.len(), 2);

        let docs = outcomes
            .iter()
            .find(|o| o.key == SolveGroupKey::Solo(EnvName::from("docs")))
            .unwrap();
        let pinned = docs.result.as_ref().unwrap();
        assert_eq!(names(&pinned[0]), vec!["numpy", "sphinx"]);
    }

    #[test]
    fn restricted_member_skips_unsupported_platform() {
        let cfg = config(
            r#"
[workspace]
channels = ["conda-forge"]
platforms = ["linux-64", "osx-arm64"]

[dependencies]
python = "*"

[feature.cuda]
platforms = ["linux-64"]

[environments]
default = { solve-group = "g" }
gpu = { features = ["cuda"], solve-group = "g" }
"#,
        );
        let plans = plan_groups(
            &cfg,
            &cfg.environment_names(),
            &[Platform::from("linux-64"), Platform::from("osx-arm64")],
        )
        .unwrap();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].members.len(), 2);
        assert_eq!(plans[1].platform, "osx-arm64");
        assert_eq!(plans[1].member_names(), vec![EnvName::from("default")]);
    }

    #[test]
    fn projection_skips_virtual_packages() {
        let records = vec![
            record("linux-64", "a", "1.0", &["b >=1", "__glibc >=2.17"]),
            record("linux-64", "b", "1.0", &[]),
            record("linux-64", "c", "1.0", &[]),
        ];
        let picked: Vec<&str> = project(&records, ["a"]).iter().map(|r| r.name()).collect();
        assert_eq!(picked, vec!["a", "b"]);
    }

    #[test]
    fn projection_follows_unspaced_operator_depends() {
        let cfg = config(GROUPED);
        let solver = MockSolver::new(vec![
            record("linux-64", "numpy", "1.26.0", &["python>=3.9"]),
            record("linux-64", "python", "3.12.1", &[]),
            record("noarch", "pytest", "8.1.0", &["python>=3.8", "pluggy<2,>=1.3"]),
            record("noarch", "pluggy", "1.4.0", &["python>=3.8"]),
        ]);
        let plans =
            plan_groups(&cfg, &[EnvName::from("test")], &[Platform::from("linux-64")]).unwrap();
        let pinned = execute(&plans[0], &solver).unwrap();
        let default = pinned.iter().find(|p| p.environment == "default").unwrap();
        let test = pinned.iter().find(|p| p.environment == "test").unwrap();
        assert_eq!(names(default), vec!["numpy", "python"]);
        assert_eq!(names(test), vec!["numpy", "pluggy", "pytest", "python"]);
    }
}

use crate::backends::{install_prefix, Backends, EnvInstallReport, PrefixInstall};
use crate::capabilities::find_exporter;
use crate::concurrency::{shutdown_requested, PrefixLock};
use crate::context::WorkspaceContext;
use crate::resolver::{environment_platforms, resolve, ResolvedSpec};
use crate::solve_group::{execute_all, plan_groups, GroupOutcome};
use crate::CoreError;
use condaspace_runtime::prefix::{package_count, read_records};
use condaspace_runtime::ActivationPlan;
use condaspace_schema::{
    Activation, EnvName, LockError, LockFile, LockedPackage, PinnedEnvironment, Platform,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Orchestrates locking, installing, and inspecting the environments of one workspace.
///
/// Every operation reads the model from the context it was built with; the
/// lockfile is the only state shared between invocations.
pub struct Engine {
    ctx: WorkspaceContext,
    backends: Backends,
}

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Install only this environment instead of every one.
    pub environment: Option<String>,
    /// Install exactly what `conda.lock` records, without solving.
    pub locked: bool,
    pub force_reinstall: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupReport {
    pub group: String,
    pub environments: Vec<String>,
    pub platforms: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LockReport {
    pub lockfile: PathBuf,
    pub written: bool,
    pub groups: Vec<GroupReport>,
}

impl LockReport {
    pub fn failures(&self) -> impl Iterator<Item = &GroupReport> {
        self.groups.iter().filter(|g| g.error.is_some())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    fn failure_for(&self, environment: &str) -> Option<&GroupReport> {
        self.failures()
            .find(|g| g.environments.iter().any(|e| e == environment))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock: Option<LockReport>,
    pub environments: Vec<EnvInstallReport>,
    pub dry_run: bool,
}

impl InstallSummary {
    pub fn has_solve_failures(&self) -> bool {
        self.lock.as_ref().is_some_and(LockReport::has_failures)
    }

    pub fn has_install_failures(&self) -> bool {
        self.environments.iter().any(|e| e.error.is_some())
    }

    pub fn skipped_pypi(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.environments
            .iter()
            .filter(|e| !e.skipped_pypi.is_empty())
            .map(|e| (e.environment.as_str(), e.skipped_pypi.as_slice()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentSummary {
    pub name: String,
    pub features: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solve_group: Option<String>,
    pub no_default_feature: bool,
    pub platforms: Vec<String>,
    pub installed: bool,
    pub prefix: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentInfo {
    pub name: String,
    pub prefix: PathBuf,
    pub installed: bool,
    pub packages: usize,
    pub platform: String,
    pub platforms: Vec<String>,
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solve_group: Option<String>,
    pub features: Vec<String>,
    pub channels: Vec<String>,
    pub dependencies: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub pypi_dependencies: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub system_requirements: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Activation::is_empty")]
    pub activation: Activation,
}

/// Pins from one round of solving, before anything is written.
struct SolveRound {
    groups: Vec<GroupReport>,
    pinned: Vec<PinnedEnvironment>,
    channels: BTreeMap<EnvName, Vec<String>>,
}

impl Engine {
    /// Build an engine with the backends named in the context's settings.
    pub fn new(ctx: WorkspaceContext) -> Result<Self, CoreError> {
        let backends = Backends::from_settings(&ctx.settings)?;
        Ok(Self { ctx, backends })
    }

    pub fn with_backends(ctx: WorkspaceContext, backends: Backends) -> Self {
        Self { ctx, backends }
    }

    pub fn context(&self) -> &WorkspaceContext {
        &self.ctx
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    fn solve(&self, targets: &[EnvName]) -> Result<SolveRound, CoreError> {
        let platforms = self.ctx.lock_platforms();
        let plans = plan_groups(&self.ctx.config, targets, &platforms)?;

        let mut channels: BTreeMap<EnvName, Vec<String>> = BTreeMap::new();
        for plan in &plans {
            for member in &plan.members {
                channels
                    .entry(member.environment.clone())
                    .or_insert_with(|| member.channel_urls());
            }
        }

        let outcomes = execute_all(plans, self.backends.solver.as_ref());
        if shutdown_requested()
            || outcomes
                .iter()
                .any(|o| matches!(o.result, Err(CoreError::Interrupted)))
        {
            return Err(CoreError::Interrupted);
        }

        let mut groups = Vec::with_capacity(outcomes.len());
        let mut pinned = Vec::new();
        for GroupOutcome {
            key,
            environments,
            platforms,
            result,
        } in outcomes
        {
            let error = match result {
                Ok(pins) => {
                    pinned.extend(pins);
                    None
                }
                Err(e) => {
                    for env in &environments {
                        channels.remove(env);
                    }
                    Some(e.to_string())
                }
            };
            groups.push(GroupReport {
                group: key.to_string(),
                environments: environments.iter().map(ToString::to_string).collect(),
                platforms: platforms.iter().map(ToString::to_string).collect(),
                error,
            });
        }
        Ok(SolveRound {
            groups,
            pinned,
            channels,
        })
    }

    /// Solve the requested environments (every one when empty) and write the
    /// lockfile. Failed groups keep their previous entries; the file is
    /// replaced atomically and only once, after all solves finish.
    pub fn lock(&self, environments: &[String]) -> Result<LockReport, CoreError> {
        let targets = self.ctx.select_environments(environments)?;
        let round = self.solve(&targets)?;
        let lockfile = self.ctx.lockfile_path();

        let mut written = false;
        if !round.pinned.is_empty() {
            let planned = self.planned_platforms()?;
            let failed: BTreeSet<&str> = round
                .groups
                .iter()
                .filter(|g| g.error.is_some())
                .flat_map(|g| g.environments.iter().map(String::as_str))
                .collect();
            let mut merged = self.existing_lock().merge(&round.pinned, &round.channels)?;
            // Failed groups keep whatever they had; everything else keeps only
            // the pairs the manifest still plans.
            merged.retain_platforms(|env, platform| match planned.get(env) {
                None => false,
                Some(_) if failed.contains(env) => true,
                Some(platforms) => platforms.iter().any(|p| p.as_str() == platform),
            });
            merged.write_to_file(&lockfile)?;
            written = true;
            info!(
                "wrote {} ({} environment/platform entries updated)",
                lockfile.display(),
                round.pinned.len()
            );
        }
        Ok(LockReport {
            lockfile,
            written,
            groups: round.groups,
        })
    }

    /// Platforms each manifest environment is locked for.
    fn planned_platforms(&self) -> Result<BTreeMap<String, Vec<Platform>>, CoreError> {
        let lock_platforms = self.ctx.lock_platforms();
        let mut planned = BTreeMap::new();
        for name in self.ctx.config.environment_names() {
            let supported = environment_platforms(&self.ctx.config, name.as_str())?;
            let platforms = lock_platforms
                .iter()
                .filter(|p| supported.is_empty() || supported.contains(*p))
                .cloned()
                .collect();
            planned.insert(name.as_str().to_owned(), platforms);
        }
        Ok(planned)
    }

    fn existing_lock(&self) -> LockFile {
        let path = self.ctx.lockfile_path();
        if !path.exists() {
            return LockFile::default();
        }
        match LockFile::read_from_file(&path) {
            Ok(lock) => lock,
            Err(e) => {
                warn!("replacing unreadable lockfile {}: {e}", path.display());
                LockFile::default()
            }
        }
    }

    fn read_lock(&self) -> Result<LockFile, CoreError> {
        let path = self.ctx.lockfile_path();
        if !path.exists() {
            return Err(CoreError::LockfileMissing(path));
        }
        Ok(LockFile::read_from_file(&path)?)
    }

    /// Lock, then install each environment for the current platform.
    ///
    /// With `locked`, the lockfile is used as-is and any missing entry fails.
    /// Otherwise solve failures and install failures are reported per
    /// environment and do not stop the others.
    pub fn install(&self, opts: &InstallOptions) -> Result<InstallSummary, CoreError> {
        let targets = self.ctx.select_environments(opts.environment.as_slice())?;
        if opts.locked {
            return self.install_locked(&targets, opts);
        }
        if opts.dry_run {
            return self.preview(&targets);
        }

        let report = self.lock(&targets.iter().map(ToString::to_string).collect::<Vec<_>>())?;
        let lock = if report.lockfile.exists() {
            Some(LockFile::read_from_file(&report.lockfile)?)
        } else {
            None
        };

        let mut environments = Vec::with_capacity(targets.len());
        for env in &targets {
            let prefix = self.ctx.prefix(env);
            if let Some(group) = report.failure_for(env) {
                environments.push(EnvInstallReport {
                    environment: env.to_string(),
                    prefix,
                    packages: 0,
                    skipped_pypi: Vec::new(),
                    error: Some(format!("not installed because {} failed to solve", group.group)),
                });
                continue;
            }
            let result = match &lock {
                Some(lock) => self.install_from_lock(lock, env, opts.force_reinstall),
                None => Err(CoreError::LockfileMissing(self.ctx.lockfile_path())),
            };
            environments.push(result.unwrap_or_else(|e| {
                warn!("{e}");
                EnvInstallReport::failed(env, &prefix, &e)
            }));
        }
        Ok(InstallSummary {
            lock: Some(report),
            environments,
            dry_run: false,
        })
    }

    fn install_locked(
        &self,
        targets: &[EnvName],
        opts: &InstallOptions,
    ) -> Result<InstallSummary, CoreError> {
        let lock = self.read_lock()?;
        let mut environments = Vec::with_capacity(targets.len());
        for env in targets {
            if opts.dry_run {
                let packages = lock.extract_explicit(env, &self.ctx.platform)?;
                environments.push(self.planned_report(env, packages.len()));
            } else {
                environments.push(self.install_from_lock(&lock, env, opts.force_reinstall)?);
            }
        }
        Ok(InstallSummary {
            lock: None,
            environments,
            dry_run: opts.dry_run,
        })
    }

    fn preview(&self, targets: &[EnvName]) -> Result<InstallSummary, CoreError> {
        let round = self.solve(targets)?;
        let mut environments = Vec::with_capacity(targets.len());
        for env in targets {
            let pinned = round
                .pinned
                .iter()
                .find(|p| p.environment == *env && p.platform == self.ctx.platform);
            match pinned {
                Some(p) => environments.push(self.planned_report(env, p.packages.len())),
                None => {
                    let err = CoreError::Lock(LockError::Stale {
                        environment: env.to_string(),
                        platform: self.ctx.platform.to_string(),
                    });
                    environments.push(EnvInstallReport::failed(env, &self.ctx.prefix(env), &err));
                }
            }
        }
        Ok(InstallSummary {
            lock: Some(LockReport {
                lockfile: self.ctx.lockfile_path(),
                written: false,
                groups: round.groups,
            }),
            environments,
            dry_run: true,
        })
    }

    fn planned_report(&self, env: &str, packages: usize) -> EnvInstallReport {
        EnvInstallReport {
            environment: env.to_owned(),
            prefix: self.ctx.prefix(env),
            packages,
            skipped_pypi: Vec::new(),
            error: None,
        }
    }

    fn install_from_lock(
        &self,
        lock: &LockFile,
        env: &str,
        force_reinstall: bool,
    ) -> Result<EnvInstallReport, CoreError> {
        let packages: Vec<LockedPackage> = lock.extract_explicit(env, &self.ctx.platform)?;
        let requirements = locked_pypi_requirements(&packages);
        let requirements = if requirements.is_empty() {
            pypi_requirements(&resolve(&self.ctx.config, env, &self.ctx.platform)?)
        } else {
            requirements
        };
        let prefix = self.ctx.prefix(env);
        let lock_path = self.ctx.layout().lock_path(env);
        debug!(
            "installing {} locked packages into {}",
            packages.len(),
            prefix.display()
        );
        install_prefix(
            &self.backends,
            &PrefixInstall {
                environment: env,
                prefix: &prefix,
                lock_path: &lock_path,
                packages: &packages,
                pypi_requirements: &requirements,
                force_reinstall,
            },
        )
    }

    pub fn list(&self) -> Result<Vec<EnvironmentSummary>, CoreError> {
        let layout = self.ctx.layout();
        let mut out = Vec::with_capacity(self.ctx.config.environments.len());
        for env in self.ctx.config.environments.values() {
            out.push(EnvironmentSummary {
                name: env.name.to_string(),
                features: env.features.iter().map(ToString::to_string).collect(),
                solve_group: env.solve_group.clone(),
                no_default_feature: env.no_default_feature,
                platforms: environment_platforms(&self.ctx.config, &env.name)?
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
                installed: layout.is_installed(&env.name),
                prefix: layout.prefix(&env.name),
            });
        }
        Ok(out)
    }

    /// Resolved view of one environment on the current platform, or on the
    /// first declared platform when the current one is not declared.
    pub fn info(&self, environment: &str) -> Result<EnvironmentInfo, CoreError> {
        let env = self.ctx.environment(environment)?;
        let platform = self.info_platform();
        let resolved = resolve(&self.ctx.config, &env.name, &platform)?;
        let prefix = self.ctx.prefix(&env.name);
        let installed = self.ctx.layout().is_installed(&env.name);
        let packages = if installed { package_count(&prefix)? } else { 0 };
        let lock_path = self.ctx.lockfile_path();
        let locked = lock_path.exists()
            && LockFile::read_from_file(&lock_path)
                .is_ok_and(|l| l.platforms(&env.name).contains(&platform));

        Ok(EnvironmentInfo {
            name: env.name.to_string(),
            prefix,
            installed,
            packages,
            platform: platform.to_string(),
            platforms: resolved.platforms.iter().map(ToString::to_string).collect(),
            locked,
            solve_group: resolved.solve_group.clone(),
            features: resolved.features.iter().map(ToString::to_string).collect(),
            channels: resolved.channel_urls(),
            dependencies: resolved
                .dependencies
                .iter()
                .map(|(k, v)| (k.clone(), v.constraint()))
                .collect(),
            pypi_dependencies: resolved
                .pypi_dependencies
                .iter()
                .map(|(k, v)| (k.clone(), v.requirement()))
                .collect(),
            system_requirements: resolved.system_requirements.clone(),
            activation: resolved.activation,
        })
    }

    fn info_platform(&self) -> Platform {
        if self.ctx.config.supports_platform(&self.ctx.platform) {
            self.ctx.platform.clone()
        } else {
            self.ctx
                .lock_platforms()
                .into_iter()
                .next()
                .unwrap_or_else(|| self.ctx.platform.clone())
        }
    }

    /// Remove one installed prefix, or every installed prefix. Returns the removed names.
    pub fn clean(&self, environment: Option<&str>) -> Result<Vec<String>, CoreError> {
        let layout = self.ctx.layout();
        let names = match environment {
            Some(name) => vec![name.to_owned()],
            None => layout.installed_environments()?,
        };
        let mut removed = Vec::new();
        for name in names {
            let _guard = PrefixLock::acquire(&layout.lock_path(&name))?;
            if layout.remove(&name)? {
                info!("removed environment '{name}'");
                removed.push(name);
            }
        }
        Ok(removed)
    }

    pub fn activation(&self, environment: &str) -> Result<ActivationPlan, CoreError> {
        let env = self.ctx.environment(environment)?;
        if !self.ctx.layout().is_installed(&env.name) {
            return Err(CoreError::NotInstalled(env.name.to_string()));
        }
        let resolved = resolve(&self.ctx.config, &env.name, &self.info_platform())?;
        let scripts = resolved
            .activation
            .scripts
            .iter()
            .map(|s| self.ctx.root.join(s))
            .collect();
        Ok(ActivationPlan::new(
            env.name.as_str(),
            self.ctx.prefix(&env.name),
            scripts,
            resolved.activation.env,
        ))
    }

    /// Run a command inside an installed environment and return its exit code.
    pub fn run(&self, environment: &str, argv: &[String]) -> Result<i32, CoreError> {
        let plan = self.activation(environment)?;
        Ok(plan.run(argv, &self.ctx.root)?)
    }

    pub fn shell(&self, environment: &str) -> Result<i32, CoreError> {
        let plan = self.activation(environment)?;
        Ok(plan.spawn_shell(&self.ctx.root)?)
    }

    /// Shell text that activates the environment when evaluated.
    pub fn activate_script(&self, environment: &str) -> Result<String, CoreError> {
        let plan = self.activation(environment)?;
        Ok(plan.render_exports(std::env::var_os("PATH"))?)
    }

    /// Snapshot installed prefixes in an exporter's format. With no names,
    /// every installed environment the manifest still defines is exported.
    pub fn export(&self, environments: &[String], format: &str) -> Result<String, CoreError> {
        let exporter =
            find_exporter(format).ok_or_else(|| CoreError::UnknownExportFormat(format.to_owned()))?;
        let layout = self.ctx.layout();
        let names: Vec<EnvName> = if environments.is_empty() {
            self.ctx
                .config
                .environment_names()
                .into_iter()
                .filter(|n| layout.is_installed(n))
                .collect()
        } else {
            self.ctx.select_environments(environments)?
        };

        let platform = self.info_platform();
        let mut pinned = Vec::with_capacity(names.len());
        let mut channels = BTreeMap::new();
        for name in &names {
            if !layout.is_installed(name) {
                return Err(CoreError::NotInstalled(name.to_string()));
            }
            let records = read_records(&layout.prefix(name))?;
            let packages = records
                .iter()
                .map(|r| r.to_package_record().map(LockedPackage::Conda))
                .collect::<Result<Vec<_>, _>>()?;
            pinned.push(PinnedEnvironment::new(name.clone(), platform.clone(), packages));
            let resolved = resolve(&self.ctx.config, name, &platform)?;
            channels.insert(name.clone(), resolved.channel_urls());
        }
        exporter.export(&pinned, &channels)
    }
}

/// PyPI pins recorded in the lock, as direct references.
fn locked_pypi_requirements(packages: &[LockedPackage]) -> Vec<String> {
    packages
        .iter()
        .filter_map(LockedPackage::as_pypi)
        .map(|p| format!("{} @ {}", p.name, p.url))
        .collect()
}

/// Manifest ranges, for locks written without PyPI pins.
fn pypi_requirements(resolved: &ResolvedSpec) -> Vec<String> {
    resolved
        .pypi_dependencies
        .values()
        .map(condaspace_schema::PypiDependency::requirement)
        .collect()
}

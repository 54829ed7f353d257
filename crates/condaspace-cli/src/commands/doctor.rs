use super::{json_pretty, load_context, EXIT_FAILURE, EXIT_SUCCESS};
use condaspace_core::{PrefixLock, Settings, WorkspaceContext};
use condaspace_runtime::solver::DEFAULT_SOLVER_EXE;
use condaspace_schema::{EnvName, LockFile};
use serde::Serialize;
use std::path::Path;

pub fn run(manifest: Option<&Path>, json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    match Settings::load_default() {
        Ok(settings) => {
            checks.push(Check::pass(
                "settings",
                &format!(
                    "Backends: solver={}, installer={}, pypi={}",
                    settings.solver, settings.installer, settings.pypi_converter
                ),
            ));
            check_prereqs(&settings, &mut checks, &mut all_pass);
        }
        Err(e) => {
            all_pass = false;
            checks.push(Check::fail("settings", &format!("Cannot load settings: {e}")));
        }
    }

    match load_context(manifest) {
        Ok(ctx) => {
            checks.push(Check::pass(
                "manifest",
                &format!(
                    "Workspace '{}' defined in {} ({} environments)",
                    ctx.workspace_name(),
                    ctx.manifest_path.display(),
                    ctx.config.environments.len()
                ),
            ));
            for warning in ctx.config.warnings() {
                checks.push(Check::warn("manifest_warning", &warning));
            }
            check_lockfile(&ctx, &mut checks, &mut all_pass);
            check_prefixes(&ctx, &mut checks, &mut all_pass);
        }
        Err(e) => {
            all_pass = false;
            checks.push(Check::fail("manifest", &e));
        }
    }

    print_results(&checks, all_pass, json_output)
}

fn check_prereqs(settings: &Settings, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let solver_exe = settings.solver_exe.as_deref().unwrap_or(DEFAULT_SOLVER_EXE);
    let missing = condaspace_runtime::check_prereqs(
        &settings.solver,
        solver_exe,
        &settings.installer,
        &settings.conda_exe,
    );
    if missing.is_empty() {
        checks.push(Check::pass("backend_prereqs", "Backend prerequisites satisfied"));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "backend_prereqs",
            &condaspace_runtime::format_missing(&missing),
        ));
    }
}

fn check_lockfile(ctx: &WorkspaceContext, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let path = ctx.lockfile_path();
    if !path.exists() {
        checks.push(Check::info(
            "lockfile",
            "No lockfile yet (run 'condaspace lock')",
        ));
        return;
    }
    let lock = match LockFile::read_from_file(&path) {
        Ok(lock) => lock,
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("lockfile", &format!("Cannot read {}: {e}", path.display())));
            return;
        }
    };
    let stale: Vec<String> = ctx
        .config
        .environment_names()
        .into_iter()
        .filter(|name| !lock.platforms(name).contains(&ctx.platform))
        .map(EnvName::into_inner)
        .collect();
    if stale.is_empty() {
        checks.push(Check::pass(
            "lockfile",
            &format!("Lockfile covers every environment on {}", ctx.platform),
        ));
    } else {
        checks.push(Check::warn(
            "lockfile",
            &format!(
                "Lockfile has no {} entry for: {} (run 'condaspace lock')",
                ctx.platform,
                stale.join(", ")
            ),
        ));
    }
}

fn check_prefixes(ctx: &WorkspaceContext, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let layout = ctx.layout();
    let installed = match layout.installed_environments() {
        Ok(names) => names,
        Err(e) => {
            checks.push(Check::warn("prefixes", &format!("Cannot list prefixes: {e}")));
            return;
        }
    };
    checks.push(Check::info(
        "prefixes",
        &format!("{} environment(s) installed", installed.len()),
    ));
    for name in installed {
        if ctx.config.environment(&name).is_none() {
            checks.push(Check::warn(
                "orphan_prefix",
                &format!("Prefix '{name}' is no longer defined (remove with 'condaspace clean -e {name}')"),
            ));
        }
        match PrefixLock::try_acquire(&layout.lock_path(&name)) {
            Ok(Some(_)) => {}
            Ok(None) => checks.push(Check::warn(
                "prefix_lock",
                &format!("Prefix '{name}' is locked by another process"),
            )),
            Err(e) => {
                *all_pass = false;
                checks.push(Check::fail(
                    "prefix_lock",
                    &format!("Cannot check lock for '{name}': {e}"),
                ));
            }
        }
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks,
        });
        println!("{}", json_pretty(&json)?);
    } else {
        println!("condaspace doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

#[derive(Debug, Serialize)]
struct Check {
    name: String,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &str, status: &'static str, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}

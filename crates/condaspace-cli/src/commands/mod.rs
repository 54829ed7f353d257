pub mod activate;
pub mod add;
pub mod clean;
pub mod doctor;
pub mod env_create;
pub mod export;
pub mod info;
pub mod init;
pub mod install;
pub mod list;
pub mod lock;
pub mod remove;
pub mod run;
pub mod shell;

use condaspace_core::{DependencyTarget, Engine, GroupReport, Settings, WorkspaceContext};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_MANIFEST_ERROR: u8 = 2;
pub const EXIT_SOLVE_ERROR: u8 = 3;
pub const EXIT_INSTALL_ERROR: u8 = 4;
pub const EXIT_LOCK_ERROR: u8 = 5;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_status(status: &str) -> String {
    use console::Style;
    match status {
        "installed" | "ok" => Style::new().green().apply_to(status).to_string(),
        "failed" => Style::new().red().bold().apply_to(status).to_string(),
        "not installed" | "skipped" => Style::new().yellow().apply_to(status).to_string(),
        "planned" => Style::new().cyan().apply_to(status).to_string(),
        other => other.to_owned(),
    }
}

pub fn load_context(manifest: Option<&Path>) -> Result<WorkspaceContext, String> {
    let settings = Settings::load_default().map_err(|e| e.to_string())?;
    let ctx = match manifest {
        Some(path) => WorkspaceContext::load(path, settings),
        None => {
            let cwd = std::env::current_dir()
                .map_err(|e| format!("cannot determine current directory: {e}"))?;
            WorkspaceContext::discover(&cwd, settings)
        }
    };
    ctx.map_err(|e| e.to_string())
}

pub fn load_engine(manifest: Option<&Path>) -> Result<Engine, String> {
    let ctx = load_context(manifest)?;
    Engine::new(ctx).map_err(|e| e.to_string())
}

/// Print failed solve groups to stderr. Returns true when any group failed.
pub fn report_group_failures(groups: &[GroupReport]) -> bool {
    let mut failed = false;
    for group in groups {
        if let Some(err) = &group.error {
            failed = true;
            eprintln!(
                "{} {} ({}): {err}",
                colorize_status("failed"),
                group.group,
                group.environments.join(", ")
            );
        }
    }
    failed
}

/// `add`/`remove` target: an explicit feature wins; `-e ENV` edits that
/// environment's last declared feature, or the default feature when it has none.
pub fn dependency_target(
    ctx: &WorkspaceContext,
    environment: Option<&str>,
    feature: Option<String>,
    pypi: bool,
) -> Result<DependencyTarget, String> {
    let feature = match (feature, environment) {
        (Some(f), _) => Some(f),
        (None, Some(env)) => ctx
            .environment(env)
            .map_err(|e| e.to_string())?
            .features
            .last()
            .map(ToString::to_string),
        (None, None) => None,
    };
    Ok(DependencyTarget { feature, pypi })
}

use super::{
    colorize_status, json_pretty, load_engine, report_group_failures, spin_fail, spin_ok, spinner,
    EXIT_INSTALL_ERROR, EXIT_SOLVE_ERROR, EXIT_SUCCESS,
};
use condaspace_core::{InstallOptions, InstallSummary};
use std::path::Path;

pub fn run(manifest: Option<&Path>, opts: &InstallOptions, json: bool) -> Result<u8, String> {
    let engine = load_engine(manifest)?;
    let pb = (!json).then(|| {
        spinner(if opts.dry_run {
            "solving environments (dry run)..."
        } else {
            "installing environments..."
        })
    });

    let summary = match engine.install(opts) {
        Ok(s) => s,
        Err(e) => {
            if let Some(pb) = &pb {
                spin_fail(pb, "install failed");
            }
            return Err(e.to_string());
        }
    };
    let code = exit_code(&summary);

    if let Some(pb) = &pb {
        if code == EXIT_SUCCESS {
            spin_ok(pb, if summary.dry_run { "dry run complete" } else { "install complete" });
        } else {
            spin_fail(pb, "some environments failed");
        }
    }

    if json {
        println!("{}", json_pretty(&summary)?);
        return Ok(code);
    }

    if let Some(lock) = &summary.lock {
        report_group_failures(&lock.groups);
        if lock.written {
            println!("lockfile: {}", lock.lockfile.display());
        }
    }
    let ok_status = if summary.dry_run { "planned" } else { "installed" };
    for env in &summary.environments {
        match &env.error {
            None => println!(
                "{:<16} {} ({} packages) {}",
                env.environment,
                colorize_status(ok_status),
                env.packages,
                env.prefix.display()
            ),
            Some(err) => println!("{:<16} {}: {err}", env.environment, colorize_status("failed")),
        }
    }
    for (env, skipped) in summary.skipped_pypi() {
        eprintln!(
            "warning: {env}: PyPI dependencies were not installed: {}",
            skipped.join(", ")
        );
    }
    Ok(code)
}

fn exit_code(summary: &InstallSummary) -> u8 {
    if summary.has_solve_failures() {
        EXIT_SOLVE_ERROR
    } else if summary.has_install_failures() {
        EXIT_INSTALL_ERROR
    } else {
        EXIT_SUCCESS
    }
}

use super::{colorize_status, json_pretty, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use condaspace_core::{create_environment, Backends, Settings};
use std::path::Path;

pub fn run(file: &Path, prefix: &Path, environment: &str, json: bool) -> Result<u8, String> {
    let settings = Settings::load_default().map_err(|e| e.to_string())?;
    let backends = Backends::from_settings(&settings).map_err(|e| e.to_string())?;
    let platform = settings.platform();

    let pb = (!json).then(|| spinner(&format!("creating {}...", prefix.display())));
    let report = match create_environment(file, environment, prefix, &platform, &backends) {
        Ok(r) => r,
        Err(e) => {
            if let Some(pb) = &pb {
                spin_fail(pb, "environment creation failed");
            }
            return Err(e.to_string());
        }
    };

    if json {
        println!("{}", json_pretty(&report)?);
        return Ok(EXIT_SUCCESS);
    }
    if let Some(pb) = &pb {
        spin_ok(pb, &format!("created {}", prefix.display()));
    }
    println!(
        "{} {} ({} packages)",
        environment,
        colorize_status("installed"),
        report.packages
    );
    if !report.skipped_pypi.is_empty() {
        eprintln!(
            "warning: PyPI dependencies were not installed: {}",
            report.skipped_pypi.join(", ")
        );
    }
    Ok(EXIT_SUCCESS)
}

use super::{colorize_status, json_pretty, load_engine, EXIT_SUCCESS};
use std::path::Path;

pub fn run(manifest: Option<&Path>, installed_only: bool, json: bool) -> Result<u8, String> {
    let engine = load_engine(manifest)?;
    let envs: Vec<_> = engine
        .list()
        .map_err(|e| e.to_string())?
        .into_iter()
        .filter(|e| !installed_only || e.installed)
        .collect();

    if json {
        println!("{}", json_pretty(&envs)?);
        return Ok(EXIT_SUCCESS);
    }

    if envs.is_empty() {
        println!("no environments found.");
        return Ok(EXIT_SUCCESS);
    }
    println!(
        "{:<16} {:<24} {:<14} STATUS",
        "NAME", "FEATURES", "SOLVE GROUP"
    );
    for env in &envs {
        let features = if env.features.is_empty() {
            "-".to_owned()
        } else {
            env.features.join(",")
        };
        let status = if env.installed { "installed" } else { "not installed" };
        println!(
            "{:<16} {:<24} {:<14} {}",
            env.name,
            features,
            env.solve_group.as_deref().unwrap_or("-"),
            colorize_status(status)
        );
    }
    Ok(EXIT_SUCCESS)
}

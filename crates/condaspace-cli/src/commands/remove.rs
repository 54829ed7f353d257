use super::{dependency_target, json_pretty, load_context, EXIT_SUCCESS};
use condaspace_core::remove_dependencies;
use std::path::Path;

pub fn run(
    manifest: Option<&Path>,
    names: &[String],
    environment: Option<&str>,
    feature: Option<String>,
    pypi: bool,
    json: bool,
) -> Result<u8, String> {
    let ctx = load_context(manifest)?;
    let target = dependency_target(&ctx, environment, feature, pypi)?;
    let removed =
        remove_dependencies(&ctx.manifest_path, names, &target).map_err(|e| e.to_string())?;

    if json {
        let payload = serde_json::json!({
            "manifest": ctx.manifest_path.display().to_string(),
            "feature": target.feature,
            "pypi": pypi,
            "removed": removed,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        for name in &removed {
            println!("removed {name}");
        }
    }
    Ok(EXIT_SUCCESS)
}

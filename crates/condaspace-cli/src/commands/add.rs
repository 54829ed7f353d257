use super::{dependency_target, json_pretty, load_context, EXIT_SUCCESS};
use condaspace_core::add_dependencies;
use std::path::Path;

pub fn run(
    manifest: Option<&Path>,
    specs: &[String],
    environment: Option<&str>,
    feature: Option<String>,
    pypi: bool,
    json: bool,
) -> Result<u8, String> {
    let ctx = load_context(manifest)?;
    let target = dependency_target(&ctx, environment, feature, pypi)?;
    let added =
        add_dependencies(&ctx.manifest_path, specs, &target).map_err(|e| e.to_string())?;

    if json {
        let payload = serde_json::json!({
            "manifest": ctx.manifest_path.display().to_string(),
            "feature": target.feature,
            "pypi": pypi,
            "added": added,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        for entry in &added {
            println!("added {entry}");
        }
        println!("run 'condaspace install' to update environments");
    }
    Ok(EXIT_SUCCESS)
}

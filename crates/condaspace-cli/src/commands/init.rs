use super::{json_pretty, EXIT_SUCCESS};
use condaspace_core::{init_workspace, InitOptions};
use condaspace_schema::ManifestFormat;

pub fn run(
    format: ManifestFormat,
    name: Option<String>,
    channels: Vec<String>,
    platforms: Vec<String>,
    json: bool,
) -> Result<u8, String> {
    let dir = std::env::current_dir().map_err(|e| format!("cannot determine current directory: {e}"))?;
    let opts = InitOptions {
        format,
        name,
        channels,
        platforms,
    };
    let path = init_workspace(&dir, &opts).map_err(|e| e.to_string())?;

    if json {
        let payload = serde_json::json!({
            "manifest": path.display().to_string(),
            "format": format,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("created {}", path.display());
        println!("next: condaspace add <spec>... && condaspace install");
    }
    Ok(EXIT_SUCCESS)
}

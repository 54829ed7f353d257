use super::{json_pretty, load_engine, EXIT_FAILURE, EXIT_SUCCESS};
use std::io::IsTerminal;
use std::path::Path;

pub fn run(
    manifest: Option<&Path>,
    environment: Option<&str>,
    yes: bool,
    json: bool,
) -> Result<u8, String> {
    let engine = load_engine(manifest)?;
    if let Some(name) = environment {
        engine
            .context()
            .environment(name)
            .map_err(|e| e.to_string())?;
    }

    if !yes && !json && std::io::stdin().is_terminal() {
        let what = environment.map_or_else(
            || "all installed environments".to_owned(),
            |name| format!("environment '{name}'"),
        );
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!("Remove {what}?"))
            .default(false)
            .interact()
            .map_err(|e| format!("prompt failed: {e}"))?;
        if !confirmed {
            eprintln!("aborted");
            return Ok(EXIT_FAILURE);
        }
    }

    let removed = engine.clean(environment).map_err(|e| e.to_string())?;
    if json {
        let payload = serde_json::json!({ "removed": removed });
        println!("{}", json_pretty(&payload)?);
    } else if removed.is_empty() {
        println!("nothing to remove");
    } else {
        for name in &removed {
            println!("removed {name}");
        }
    }
    Ok(EXIT_SUCCESS)
}

use super::{load_engine, EXIT_SUCCESS};
use std::path::Path;

pub fn run(
    manifest: Option<&Path>,
    environments: &[String],
    format: &str,
    output: Option<&Path>,
) -> Result<u8, String> {
    let engine = load_engine(manifest)?;
    let text = engine
        .export(environments, format)
        .map_err(|e| e.to_string())?;
    match output {
        Some(path) => {
            std::fs::write(path, &text)
                .map_err(|e| format!("failed to write {}: {e}", path.display()))?;
            eprintln!("wrote {}", path.display());
        }
        None => print!("{text}"),
    }
    Ok(EXIT_SUCCESS)
}

use super::{load_engine, EXIT_SUCCESS};
use std::path::Path;

/// Print exports for `eval "$(condaspace activate ENV)"`.
pub fn run(manifest: Option<&Path>, environment: &str) -> Result<u8, String> {
    let engine = load_engine(manifest)?;
    let script = engine
        .activate_script(environment)
        .map_err(|e| e.to_string())?;
    print!("{script}");
    Ok(EXIT_SUCCESS)
}

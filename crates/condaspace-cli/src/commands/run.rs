use super::load_engine;
use std::path::Path;

/// Exit with the child's status. Signals and out-of-range codes map to 1.
pub fn run(manifest: Option<&Path>, environment: &str, command: &[String]) -> Result<u8, String> {
    let engine = load_engine(manifest)?;
    let code = engine.run(environment, command).map_err(|e| e.to_string())?;
    Ok(u8::try_from(code).unwrap_or(1))
}

use super::load_engine;
use std::path::Path;

pub fn run(manifest: Option<&Path>, environment: &str) -> Result<u8, String> {
    let engine = load_engine(manifest)?;
    let code = engine.shell(environment).map_err(|e| e.to_string())?;
    Ok(u8::try_from(code).unwrap_or(1))
}

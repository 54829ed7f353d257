use super::{
    json_pretty, load_engine, report_group_failures, spin_fail, spin_ok, spinner,
    EXIT_SOLVE_ERROR, EXIT_SUCCESS,
};
use std::path::Path;

pub fn run(manifest: Option<&Path>, environments: &[String], json: bool) -> Result<u8, String> {
    let engine = load_engine(manifest)?;
    let pb = (!json).then(|| spinner("solving environments..."));

    let report = match engine.lock(environments) {
        Ok(r) => r,
        Err(e) => {
            if let Some(pb) = &pb {
                spin_fail(pb, "lock failed");
            }
            return Err(e.to_string());
        }
    };
    let code = if report.has_failures() {
        EXIT_SOLVE_ERROR
    } else {
        EXIT_SUCCESS
    };

    if json {
        println!("{}", json_pretty(&report)?);
        return Ok(code);
    }

    if let Some(pb) = &pb {
        if report.has_failures() {
            spin_fail(pb, "some solve groups failed");
        } else {
            spin_ok(pb, &format!("solved {} group(s)", report.groups.len()));
        }
    }
    report_group_failures(&report.groups);
    if report.written {
        println!("wrote {}", report.lockfile.display());
    } else {
        println!("lockfile unchanged: {}", report.lockfile.display());
    }
    Ok(code)
}

//! Backends that shell out: the JSON solver protocol and `conda create --file`.

use crate::installer::{InstallReport, Installer};
use crate::solver::{SolveRequest, Solver};
use crate::RuntimeError;
use condaspace_schema::{CondaPackageEntry, CondaPackageRecord, LockedPackage};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info};

#[derive(Serialize)]
struct WireRequest<'a> {
    group: &'a str,
    platform: &'a str,
    channels: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_priority: Option<String>,
    specs: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireResponse {
    Solved { packages: Vec<CondaPackageEntry> },
    Failed { error: String },
}

/// Solver speaking JSON over stdin/stdout.
///
/// Request: `{"group", "platform", "channels", "channel_priority"?, "specs": ["numpy >=1.26", ...]}`.
/// Response: `{"packages": [<lockfile package entry>, ...]}` on success or
/// `{"error": "<diagnostic>"}` when the request is infeasible.
pub struct ProcessSolver {
    executable: String,
}

impl ProcessSolver {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(20)..].join("\n")
}

impl Solver for ProcessSolver {
    fn name(&self) -> &'static str {
        "process"
    }

    fn available(&self) -> bool {
        which::which(&self.executable).is_ok()
    }

    fn solve(&self, request: &SolveRequest) -> Result<Vec<CondaPackageRecord>, RuntimeError> {
        let wire = WireRequest {
            group: &request.group,
            platform: request.platform.as_str(),
            channels: &request.channels,
            channel_priority: request.channel_priority.map(|p| p.to_string()),
            specs: request.specs.iter().map(ToString::to_string).collect(),
        };
        let payload = serde_json::to_vec(&wire)?;

        debug!(
            "invoking {} for group {} on {} ({} specs)",
            self.executable,
            request.group,
            request.platform,
            wire.specs.len()
        );
        let mut child = Command::new(&self.executable)
            .arg("solve")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                RuntimeError::SolverFailed(format!("cannot start '{}': {e}", self.executable))
            })?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload)?;
        }
        let output = child.wait_with_output()?;

        match serde_json::from_slice::<WireResponse>(&output.stdout) {
            Ok(WireResponse::Solved { packages }) if output.status.success() => packages
                .into_iter()
                .map(|p| CondaPackageRecord::try_from(p).map_err(RuntimeError::from))
                .collect(),
            Ok(WireResponse::Failed { error }) => Err(RuntimeError::Unsatisfiable(error)),
            _ => Err(RuntimeError::SolverFailed(format!(
                "'{}' exited with code {}: {}",
                self.executable,
                output.status.code().unwrap_or(1),
                stderr_tail(&output.stderr)
            ))),
        }
    }
}

/// Render an `@EXPLICIT` spec file. md5 fragments let conda verify downloads.
pub fn explicit_file(packages: &[LockedPackage]) -> String {
    let mut out = String::from("@EXPLICIT\n");
    for record in packages.iter().filter_map(LockedPackage::as_conda) {
        out.push_str(&record.url());
        if let Some(md5) = &record.md5 {
            out.push('#');
            out.push_str(md5);
        }
        out.push('\n');
    }
    out
}

/// Installs exact URLs with `<conda> create --yes --prefix P --file <explicit>`.
pub struct CondaInstaller {
    conda: String,
}

impl CondaInstaller {
    pub fn new(conda: impl Into<String>) -> Self {
        Self {
            conda: conda.into(),
        }
    }
}

impl Installer for CondaInstaller {
    fn name(&self) -> &'static str {
        "conda"
    }

    fn available(&self) -> bool {
        which::which(&self.conda).is_ok()
    }

    fn install(
        &self,
        prefix: &Path,
        packages: &[LockedPackage],
    ) -> Result<InstallReport, RuntimeError> {
        let mut spec = tempfile::Builder::new()
            .prefix("condaspace-explicit-")
            .suffix(".txt")
            .tempfile()?;
        spec.write_all(explicit_file(packages).as_bytes())?;
        spec.as_file().sync_all()?;

        info!("installing {} packages into {}", packages.len(), prefix.display());
        let output = Command::new(&self.conda)
            .args(["create", "--yes", "--quiet", "--prefix"])
            .arg(prefix)
            .arg("--file")
            .arg(spec.path())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| RuntimeError::InstallFailed(format!("cannot start '{}': {e}", self.conda)))?;

        if !output.status.success() {
            return Err(RuntimeError::InstallFailed(format!(
                "{} create exited with code {}: {}",
                self.conda,
                output.status.code().unwrap_or(1),
                stderr_tail(&output.stderr)
            )));
        }
        Ok(InstallReport {
            prefix: prefix.to_path_buf(),
            installed: packages.iter().filter(|p| p.as_conda().is_some()).count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use condaspace_schema::{MatchSpec, Platform, PypiPackageRecord};

    fn request() -> SolveRequest {
        SolveRequest {
            group: "default".into(),
            platform: Platform::new("linux-64"),
            channels: vec![],
            channel_priority: None,
            specs: vec![MatchSpec::new("python")],
        }
    }

    #[test]
    fn explicit_file_lists_conda_urls_with_md5() {
        let mut python = CondaPackageRecord::from_url(
            "https://conda.anaconda.org/conda-forge/linux-64/python-3.12.1-h0_0.conda",
        )
        .unwrap();
        python.md5 = Some("abc".into());
        let pkgs = vec![
            LockedPackage::Conda(python),
            LockedPackage::Pypi(PypiPackageRecord {
                url: "https://files.example/requests.whl".into(),
                name: "requests".into(),
                version: "2.31.0".into(),
                ..PypiPackageRecord::default()
            }),
        ];
        assert_eq!(
            explicit_file(&pkgs),
            "@EXPLICIT\nhttps://conda.anaconda.org/conda-forge/linux-64/python-3.12.1-h0_0.conda#abc\n"
        );
    }

    #[test]
    fn missing_solver_executable_is_a_solver_failure() {
        let solver = ProcessSolver::new("/nonexistent/condaspace-test-solver");
        assert!(!solver.available());
        let err = solver.solve(&request()).unwrap_err();
        assert!(matches!(err, RuntimeError::SolverFailed(_)));
    }

    #[cfg(unix)]
    fn script(dir: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\ncat > /dev/null\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[test]
    fn parses_solver_responses() {
        let dir = tempfile::tempdir().unwrap();
        let ok = script(
            dir.path(),
            "ok.sh",
            r#"echo '{"packages": [{"conda": "https://conda.anaconda.org/conda-forge/linux-64/python-3.12.1-h0_0.conda", "depends": ["libzlib"]}]}'"#,
        );
        let out = ProcessSolver::new(ok).solve(&request()).unwrap();
        assert_eq!(out[0].name(), "python");
        assert_eq!(out[0].depends, vec!["libzlib"]);

        let infeasible = script(
            dir.path(),
            "infeasible.sh",
            r#"echo '{"error": "python 4 does not exist"}'; exit 1"#,
        );
        let err = ProcessSolver::new(infeasible).solve(&request()).unwrap_err();
        assert!(matches!(err, RuntimeError::Unsatisfiable(ref d) if d.contains("python 4")));

        let broken = script(dir.path(), "broken.sh", "echo boom >&2; exit 3");
        let err = ProcessSolver::new(broken).solve(&request()).unwrap_err();
        assert!(matches!(err, RuntimeError::SolverFailed(ref d) if d.contains("boom")));
    }
}

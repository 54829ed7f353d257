use std::fmt;

/// A missing external tool with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    which::which(name).is_ok()
}

/// Check the tools needed by the selected solver and installer backends.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_prereqs(
    solver: &str,
    solver_exe: &str,
    installer: &str,
    conda_exe: &str,
) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if solver == "process" && !command_exists(solver_exe) {
        missing.push(MissingPrereq {
            name: solver_exe.to_owned(),
            purpose: "solving environments into exact package lists",
            install_hint: "conda install -n base conda-workspaces, or set CONDASPACE_SOLVER_EXE",
        });
    }

    if installer == "conda" && !command_exists(conda_exe) {
        missing.push(MissingPrereq {
            name: conda_exe.to_owned(),
            purpose: "installing locked packages into environment prefixes",
            install_hint: "https://docs.conda.io/en/latest/miniconda.html, or set CONDASPACE_CONDA_EXE",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\ncondaspace needs these tools to solve and install environments.");
    msg
}

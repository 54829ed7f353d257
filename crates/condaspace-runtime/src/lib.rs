//! External-tool boundaries for condaspace environments.
//!
//! This crate implements the execution layer: the pluggable `Solver` trait
//! (an external JSON solver process or an in-memory mock index), the
//! `Installer` trait (conda explicit installs or metadata-only prefixes),
//! the PyPI converter, prefix layout and `conda-meta` records, activation
//! for `run`/`shell`/`activate`, and prerequisite checking.

pub mod activation;
pub mod installer;
pub mod mock;
pub mod prefix;
pub mod prereq;
pub mod process;
pub mod pypi;
pub mod solver;
pub mod version;

pub use activation::ActivationPlan;
pub use installer::{select_installer, InstallReport, Installer};
pub use prefix::{PrefixLayout, PrefixRecord};
pub use prereq::{check_prereqs, format_missing, MissingPrereq};
pub use pypi::{select_pypi_converter, PypiConverter};
pub use solver::{select_solver, SolveRequest, Solver, SolverOptions};

use condaspace_schema::LockError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("solver '{0}' is not available on this system")]
    SolverUnavailable(String),
    #[error("installer '{0}' is not available on this system")]
    InstallerUnavailable(String),
    #[error("{tool} is not available: {hint}")]
    ToolUnavailable { tool: String, hint: String },
    #[error("no solution found: {0}")]
    Unsatisfiable(String),
    #[error("solver failed: {0}")]
    SolverFailed(String),
    #[error("install failed: {0}")]
    InstallFailed(String),
    #[error("invalid package record: {0}")]
    Record(#[from] LockError),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("execution failed: {0}")]
    ExecFailed(String),
}

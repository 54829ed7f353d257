use crate::RuntimeError;
use condaspace_schema::{ChannelPriority, CondaPackageRecord, MatchSpec, Platform};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One solver invocation: a single consistent solution for every spec.
///
/// Specs may name the same package more than once with different
/// constraints; all of them must hold in the solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveRequest {
    /// Human-readable key of the solve group, used in diagnostics.
    pub group: String,
    pub platform: Platform,
    /// Channel URLs in priority order.
    pub channels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_priority: Option<ChannelPriority>,
    pub specs: Vec<MatchSpec>,
}

pub trait Solver: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// Solve the request into pinned records for `request.platform` (plus noarch).
    ///
    /// Infeasible requests fail with [`RuntimeError::Unsatisfiable`] carrying the
    /// solver's diagnostic; every other failure is [`RuntimeError::SolverFailed`].
    fn solve(&self, request: &SolveRequest) -> Result<Vec<CondaPackageRecord>, RuntimeError>;
}

/// Backend-specific settings for [`select_solver`].
#[derive(Debug, Clone, Default)]
pub struct SolverOptions {
    /// Executable for the `process` solver. Defaults to `conda-workspace-solver`.
    pub executable: Option<String>,
    /// Package index JSON for the `mock` solver.
    pub mock_index: Option<PathBuf>,
}

pub const DEFAULT_SOLVER_EXE: &str = "conda-workspace-solver";

pub fn select_solver(
    name: &str,
    options: &SolverOptions,
) -> Result<Box<dyn Solver>, RuntimeError> {
    match name {
        "process" => Ok(Box::new(crate::process::ProcessSolver::new(
            options
                .executable
                .clone()
                .unwrap_or_else(|| DEFAULT_SOLVER_EXE.to_owned()),
        ))),
        "mock" => match &options.mock_index {
            Some(path) => Ok(Box::new(crate::mock::MockSolver::from_index_file(path)?)),
            None => Ok(Box::new(crate::mock::MockSolver::new(Vec::new()))),
        },
        other => Err(RuntimeError::SolverUnavailable(other.to_owned())),
    }
}

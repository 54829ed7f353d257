//! Core orchestration for condaspace workspaces.
//!
//! This crate ties together manifest parsing, feature resolution, and the
//! solver/installer backends into the `Engine`: locking environments through
//! solve groups (one solver call per group per platform), writing `conda.lock`
//! atomically, installing locked packages into per-environment prefixes, and
//! the manifest-editing and capability tables used by the CLI.

pub mod backends;
pub mod capabilities;
pub mod concurrency;
pub mod context;
pub mod edit;
pub mod engine;
pub mod resolver;
pub mod settings;
pub mod solve_group;

pub use backends::{Backends, EnvInstallReport};
pub use capabilities::{
    create_environment, find_exporter, find_specifier, EnvironmentSource, EnvironmentSpecifier,
    Exporter, ENVIRONMENT_SPECIFIERS, EXPORTERS,
};
pub use concurrency::{install_signal_handler, shutdown_requested, PrefixLock};
pub use context::WorkspaceContext;
pub use edit::{add_dependencies, init_workspace, remove_dependencies, DependencyTarget, InitOptions};
pub use engine::{
    Engine, EnvironmentInfo, EnvironmentSummary, GroupReport, InstallOptions, InstallSummary,
    LockReport,
};
pub use resolver::{resolve, ResolvedSpec};
pub use settings::Settings;
pub use solve_group::{execute, execute_all, plan_groups, GroupOutcome, SolveGroupKey, SolveGroupPlan};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest error: {0}")]
    Manifest(#[from] condaspace_schema::ManifestError),
    #[error("lock error: {0}")]
    Lock(#[from] condaspace_schema::LockError),
    #[error("runtime error: {0}")]
    Runtime(#[from] condaspace_runtime::RuntimeError),
    #[error("solve error: {group} is unsatisfiable on {platform}: {diagnostic}")]
    UnsatisfiableSolveGroup {
        group: String,
        platform: String,
        diagnostic: String,
    },
    #[error("solve error: {group} on {platform}: {source}")]
    SolveFailed {
        group: String,
        platform: String,
        #[source]
        source: condaspace_runtime::RuntimeError,
    },
    #[error("install error: environment '{environment}': {source}")]
    InstallFailed {
        environment: String,
        #[source]
        source: condaspace_runtime::RuntimeError,
    },
    #[error("manifest error: environment '{name}' is not defined (available: {})", .available.join(", "))]
    EnvironmentNotFound {
        name: String,
        available: Vec<String>,
    },
    #[error("manifest error: environment '{environment}' references unknown feature '{feature}'")]
    FeatureNotFound { environment: String, feature: String },
    #[error(
        "manifest error: workspace does not support platform {platform} (declared: {})",
        .supported.join(", ")
    )]
    UnsupportedPlatform {
        platform: String,
        supported: Vec<String>,
    },
    #[error("environment '{0}' is not installed; run 'condaspace install -e {0}' first")]
    NotInstalled(String),
    #[error("manifest error: {} already defines a workspace", .0.display())]
    ManifestExists(PathBuf),
    #[error("manifest error: cannot edit {}: {reason}", .path.display())]
    Edit { path: PathBuf, reason: String },
    #[error("lock error: no lockfile at {}; run 'condaspace lock' first", .0.display())]
    LockfileMissing(PathBuf),
    #[error("manifest error: no environment specifier handles {}", .0.display())]
    UnsupportedSpecFile(PathBuf),
    #[error("unknown export format '{0}'")]
    UnknownExportFormat(String),
    #[error("interrupted; lockfile and environments left unchanged")]
    Interrupted,
    #[error("config error: {0}")]
    Settings(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

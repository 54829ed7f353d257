//! Workspace manifests, the validated workspace model, and the lockfile codec for condaspace.
//!
//! This crate defines the schema layer: format-specific manifest parsers
//! (`ManifestFormat`) producing a common `RawTables` shape, the model builder
//! that validates raw tables into a `WorkspaceConfig`, and the `conda.lock`
//! document (`LockFile`) with its encode/decode/extract operations.

pub mod lock;
pub mod manifest;
pub mod model;
pub mod normalize;
pub mod platform;
pub mod spec;
pub mod types;

pub use lock::{
    CondaPackageEntry, CondaPackageRecord, ExtraFields, LockError, LockFile, LockedPackage,
    PackageIdentity, PinnedEnvironment, PypiPackageRecord, LOCKFILE_NAME, LOCK_VERSION,
};
pub use manifest::{
    find_manifest, parse_manifest_file, ManifestError, ManifestFormat, RawManifest, RawTables,
};
pub use model::{
    Activation, Channel, ChannelPriority, Environment, Feature, TargetOverride, WorkspaceConfig,
    DEFAULT_NAME,
};
pub use normalize::{build_tables, ValidationIssue};
pub use platform::{current_platform, is_known_platform, KNOWN_PLATFORMS};
pub use spec::{MatchSpec, PypiDependency};
pub use types::{EnvName, FeatureName, Platform};

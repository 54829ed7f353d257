//! End-to-end workspace flows against the mock solver and metadata installer.

use condaspace_core::{Engine, InstallOptions, Settings, WorkspaceContext};
use condaspace_schema::{LockError, LockFile};
use std::path::{Path, PathBuf};

const INDEX: &str = r#"{
  "packages": [
    {"conda": "https://conda.anaconda.org/conda-forge/linux-64/python-3.12.1-h1_0.conda", "sha256": "aa", "depends": ["zlib >=1.2"]},
    {"conda": "https://conda.anaconda.org/conda-forge/linux-64/python-3.11.8-h1_0.conda", "sha256": "ab", "depends": ["zlib >=1.2"]},
    {"conda": "https://conda.anaconda.org/conda-forge/linux-64/zlib-1.3.1-h0_0.conda", "sha256": "ac"},
    {"conda": "https://conda.anaconda.org/conda-forge/linux-64/numpy-1.26.0-py312_0.conda", "sha256": "ad", "depends": ["python >=3.10"]},
    {"conda": "https://conda.anaconda.org/conda-forge/linux-64/numpy-2.1.0-py312_0.conda", "sha256": "ae", "depends": ["python >=3.10"]},
    {"conda": "https://conda.anaconda.org/conda-forge/linux-64/linux-headers-5.10.0-h0_0.conda", "sha256": "af"},
    {"conda": "https://conda.anaconda.org/conda-forge/noarch/pytest-8.1.0-pyhd_0.conda", "sha256": "b0", "depends": ["python >=3.8", "pluggy"]},
    {"conda": "https://conda.anaconda.org/conda-forge/noarch/pluggy-1.4.0-pyhd_0.conda", "sha256": "b1", "depends": ["python >=3.8"]},
    {"conda": "https://conda.anaconda.org/conda-forge/osx-arm64/python-3.12.1-h1_0.conda", "sha256": "c0"},
    {"conda": "https://conda.anaconda.org/conda-forge/osx-arm64/numpy-1.26.0-py312_0.conda", "sha256": "c1", "depends": ["python >=3.10"]}
  ]
}"#;

const MANIFEST: &str = r#"
[workspace]
name = "science"
channels = ["conda-forge"]
platforms = ["linux-64", "osx-arm64"]

[dependencies]
python = ">=3.10"
numpy = "<2"

[target.linux-64.dependencies]
linux-headers = ">=5.10"

[feature.test.dependencies]
pytest = ">=8.0"

[environments]
default = { solve-group = "default" }
test = { features = ["test"], solve-group = "default", no-default-feature = true }
"#;

fn settings(dir: &Path) -> Settings {
    let index = dir.join("index.json");
    std::fs::write(&index, INDEX).unwrap();
    Settings {
        solver: "mock".to_owned(),
        installer: "metadata".to_owned(),
        pypi_converter: "disabled".to_owned(),
        platform: Some("linux-64".to_owned()),
        mock_index: Some(index),
        ..Settings::default()
    }
}

fn workspace(dir: &Path, file: &str, text: &str) -> (Engine, PathBuf) {
    let manifest = dir.join(file);
    std::fs::write(&manifest, text).unwrap();
    let ctx = WorkspaceContext::discover(dir, settings(dir)).unwrap();
    (Engine::new(ctx).unwrap(), manifest)
}

fn urls(lock: &LockFile, env: &str, platform: &str) -> Vec<String> {
    lock.extract_explicit(env, platform)
        .unwrap()
        .iter()
        .map(condaspace_schema::LockedPackage::url)
        .collect()
}

#[test]
fn shared_group_pins_one_numpy_for_every_member() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = workspace(dir.path(), "conda.toml", MANIFEST);

    let report = engine.lock(&[]).unwrap();
    assert!(!report.has_failures(), "{:?}", report.groups);
    assert!(report.written);

    let lock = LockFile::read_from_file(dir.path().join("conda.lock")).unwrap();
    let default = urls(&lock, "default", "linux-64");
    assert!(default.iter().any(|u| u.ends_with("numpy-1.26.0-py312_0.conda")));
    assert!(default.iter().any(|u| u.contains("linux-headers-5.10.0")));

    // `test` skips the default feature, so numpy is only in its sibling's request.
    let test = urls(&lock, "test", "linux-64");
    assert!(test.iter().any(|u| u.contains("pytest-8.1.0")));
    assert!(!test.iter().any(|u| u.contains("numpy")));
    assert!(!default.iter().any(|u| u.contains("pytest")));

    // Both members agree on every shared package.
    for url in &test {
        let name = url.rsplit('/').next().unwrap();
        if name.starts_with("python-") {
            assert!(default.contains(url));
        }
    }

    let mac = urls(&lock, "default", "osx-arm64");
    assert!(!mac.iter().any(|u| u.contains("linux-headers")));
}

#[test]
fn relock_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = workspace(dir.path(), "conda.toml", MANIFEST);
    engine.lock(&[]).unwrap();
    let first = std::fs::read_to_string(dir.path().join("conda.lock")).unwrap();
    engine.lock(&[]).unwrap();
    let second = std::fs::read_to_string(dir.path().join("conda.lock")).unwrap();
    assert_eq!(first, second);
}

#[test]
fn locked_install_is_exact_and_rejects_stale_platform() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, manifest) = workspace(dir.path(), "conda.toml", MANIFEST);
    engine.lock(&[]).unwrap();

    let summary = engine
        .install(&InstallOptions {
            locked: true,
            ..InstallOptions::default()
        })
        .unwrap();
    assert_eq!(summary.environments.len(), 2);
    assert!(summary.lock.is_none());

    let mut ctx_settings = settings(dir.path());
    ctx_settings.platform = Some("osx-64".to_owned());
    let mut text = std::fs::read_to_string(&manifest).unwrap();
    text = text.replace(
        r#"platforms = ["linux-64", "osx-arm64"]"#,
        r#"platforms = ["linux-64", "osx-arm64", "osx-64"]"#,
    );
    std::fs::write(&manifest, text).unwrap();
    let ctx = WorkspaceContext::discover(dir.path(), ctx_settings).unwrap();
    let engine = Engine::new(ctx).unwrap();
    let err = engine
        .install(&InstallOptions {
            locked: true,
            environment: Some("default".to_owned()),
            ..InstallOptions::default()
        })
        .unwrap_err();
    assert!(matches!(
        err,
        condaspace_core::CoreError::Lock(LockError::Stale { .. })
    ));
}

#[test]
fn unsatisfiable_group_keeps_previous_lock() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, manifest) = workspace(dir.path(), "conda.toml", MANIFEST);
    engine.lock(&[]).unwrap();
    let before = std::fs::read_to_string(dir.path().join("conda.lock")).unwrap();

    let broken = MANIFEST.replace(r#"pytest = ">=8.0""#, r#"pytest = ">=99""#);
    std::fs::write(&manifest, broken).unwrap();
    let ctx = WorkspaceContext::discover(dir.path(), settings(dir.path())).unwrap();
    let engine = Engine::new(ctx).unwrap();

    let report = engine.lock(&[]).unwrap();
    assert!(!report.written);
    let failure = report.failures().next().unwrap();
    assert_eq!(failure.group, "solve-group 'default'");
    assert!(failure.error.as_deref().unwrap().starts_with("solve error:"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("conda.lock")).unwrap(),
        before
    );
}

#[test]
fn independent_group_survives_sibling_failure() {
    let dir = tempfile::tempdir().unwrap();
    let text = r#"
[workspace]
channels = ["conda-forge"]
platforms = ["linux-64"]

[dependencies]
python = ">=3.10"

[feature.broken.dependencies]
missing-package = "*"

[environments]
broken = ["broken"]
"#;
    let (engine, _) = workspace(dir.path(), "conda.toml", text);
    let summary = engine.install(&InstallOptions::default()).unwrap();
    assert!(summary.has_solve_failures());

    let default = summary
        .environments
        .iter()
        .find(|e| e.environment == "default")
        .unwrap();
    assert!(default.error.is_none());
    assert!(engine.context().layout().is_installed("default"));

    let broken = summary
        .environments
        .iter()
        .find(|e| e.environment == "broken")
        .unwrap();
    assert!(broken.error.is_some());

    let lock = LockFile::read_from_file(dir.path().join("conda.lock")).unwrap();
    assert!(lock.extract_explicit("broken", "linux-64").is_err());
    assert_eq!(urls(&lock, "default", "linux-64").len(), 2);
}

#[test]
fn removed_environment_drops_out_of_lock() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, manifest) = workspace(dir.path(), "conda.toml", MANIFEST);
    engine.lock(&[]).unwrap();

    let trimmed = MANIFEST.replace(
        r#"test = { features = ["test"], solve-group = "default", no-default-feature = true }"#,
        "",
    );
    std::fs::write(&manifest, trimmed).unwrap();
    let ctx = WorkspaceContext::discover(dir.path(), settings(dir.path())).unwrap();
    Engine::new(ctx).unwrap().lock(&[]).unwrap();

    let lock = LockFile::read_from_file(dir.path().join("conda.lock")).unwrap();
    assert!(lock.platforms("test").is_empty());
    assert_eq!(lock.platforms("default").len(), 2);
}

#[test]
fn pyproject_workspace_locks_like_conda_toml() {
    let conda_dir = tempfile::tempdir().unwrap();
    let (conda_engine, _) = workspace(conda_dir.path(), "conda.toml", MANIFEST);
    conda_engine.lock(&[]).unwrap();

    let py_dir = tempfile::tempdir().unwrap();
    let pyproject = format!(
        "[project]\nname = \"science\"\n\n{}",
        MANIFEST
            .replace("[workspace]", "[tool.conda.workspace]")
            .replace("[dependencies]", "[tool.conda.dependencies]")
            .replace("[target.", "[tool.conda.target.")
            .replace("[feature.", "[tool.conda.feature.")
            .replace("[environments]", "[tool.conda.environments]")
    );
    let (py_engine, _) = workspace(py_dir.path(), "pyproject.toml", &pyproject);
    py_engine.lock(&[]).unwrap();

    assert_eq!(
        std::fs::read_to_string(conda_dir.path().join("conda.lock")).unwrap(),
        std::fs::read_to_string(py_dir.path().join("conda.lock")).unwrap()
    );
}

use condaspace_schema::{
    find_manifest, parse_manifest_file, ManifestError, ManifestFormat, WorkspaceConfig,
};
use std::fs;
use std::path::Path;

const BODY: &str = r#"
[WS]
name = "equivalence"
version = "0.3.0"
channels = ["conda-forge", "bioconda"]
platforms = ["linux-64", "osx-arm64", "win-64"]
channel-priority = "strict"

[PREFIXdependencies]
python = ">=3.10"
numpy = { version = "1.26.*", build = "py312*" }

[PREFIXpypi-dependencies]
requests = ">=2.31"

[PREFIXactivation]
scripts = ["scripts/env.sh"]
env = { APP_MODE = "dev" }

[PREFIXtarget.linux-64.dependencies]
linux-headers = ">=5.10"

[PREFIXfeature.test.dependencies]
pytest = ">=8.0"

[PREFIXfeature.docs]
channels = ["conda-forge"]
dependencies = { sphinx = "*" }
platforms = ["linux-64"]

[PREFIXenvironments]
test = { features = ["test"], solve-group = "default" }
docs = ["docs"]
"#;

fn render(ws_table: &str, prefix: &str) -> String {
    BODY.replace("[WS]", &format!("[{ws_table}]"))
        .replace("PREFIX", prefix)
}

fn build(dir: &Path, file: &str, text: &str) -> WorkspaceConfig {
    let path = dir.join(file);
    fs::write(&path, text).unwrap();
    parse_manifest_file(&path).unwrap().build().unwrap()
}

#[test]
fn three_syntaxes_build_identical_models() {
    let dir = tempfile::tempdir().unwrap();

    let conda = build(dir.path(), "conda.toml", &render("workspace", ""));
    let pixi = build(dir.path(), "pixi.toml", &render("workspace", ""));
    let pixi_legacy = build(dir.path(), "pixi.toml", &render("project", ""));
    let pyproject = build(
        dir.path(),
        "pyproject.toml",
        &render("tool.conda.workspace", "tool.conda."),
    );
    let pyproject_alias = build(
        dir.path(),
        "pyproject.toml",
        &render("tool.conda-workspaces.workspace", "tool.conda-workspaces."),
    );
    let pyproject_pixi = build(
        dir.path(),
        "pyproject.toml",
        &render("tool.pixi.workspace", "tool.pixi."),
    );

    assert_eq!(conda, pixi);
    assert_eq!(conda, pixi_legacy);
    assert_eq!(conda, pyproject);
    assert_eq!(conda, pyproject_alias);
    assert_eq!(conda, pyproject_pixi);

    let json_a = serde_json::to_string(&conda).unwrap();
    let json_b = serde_json::to_string(&pyproject_pixi).unwrap();
    assert_eq!(json_a, json_b);

    assert_eq!(conda.environments.len(), 3);
    assert_eq!(conda.features.len(), 3);
}

#[test]
fn discovery_walks_up_and_honours_priority() {
    let dir = tempfile::tempdir().unwrap();
    let deep = dir.path().join("src").join("pkg");
    fs::create_dir_all(&deep).unwrap();

    fs::write(
        dir.path().join("pyproject.toml"),
        render("tool.conda.workspace", "tool.conda."),
    )
    .unwrap();
    let found = find_manifest(&deep).unwrap();
    assert_eq!(
        ManifestFormat::from_path(&found),
        Some(ManifestFormat::Pyproject)
    );

    fs::write(dir.path().join("conda.toml"), render("workspace", "")).unwrap();
    let found = find_manifest(&deep).unwrap();
    assert_eq!(
        ManifestFormat::from_path(&found),
        Some(ManifestFormat::CondaToml)
    );
}

#[test]
fn missing_manifest_names_search_directory() {
    let dir = tempfile::tempdir().unwrap();
    let err = find_manifest(dir.path()).unwrap_err();
    assert!(matches!(err, ManifestError::NotFound { .. }));
    assert!(err
        .to_string()
        .contains(&dir.path().display().to_string()));
}

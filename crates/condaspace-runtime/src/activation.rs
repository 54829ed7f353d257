//! Environment activation for `run`, `shell`, and `activate`.

use crate::RuntimeError;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Everything needed to enter an installed environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationPlan {
    pub env_name: String,
    pub prefix: PathBuf,
    /// Scripts sourced in order before the command runs.
    pub scripts: Vec<PathBuf>,
    /// Variables from `activation.env`, applied after the conda variables.
    pub env: BTreeMap<String, String>,
}

impl ActivationPlan {
    pub fn new(
        env_name: impl Into<String>,
        prefix: impl Into<PathBuf>,
        scripts: Vec<PathBuf>,
        env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            env_name: env_name.into(),
            prefix: prefix.into(),
            scripts,
            env,
        }
    }

    pub fn bin_dirs(&self) -> Vec<PathBuf> {
        if cfg!(windows) {
            vec![
                self.prefix.clone(),
                self.prefix.join("Library").join("bin"),
                self.prefix.join("Scripts"),
            ]
        } else {
            vec![self.prefix.join("bin")]
        }
    }

    /// Variables to set, in order. `PATH` gets the prefix directories prepended
    /// to `current_path`.
    pub fn variables(
        &self,
        current_path: Option<OsString>,
    ) -> Result<Vec<(String, String)>, RuntimeError> {
        let mut dirs = self.bin_dirs();
        if let Some(existing) = current_path {
            dirs.extend(std::env::split_paths(&existing));
        }
        let path = std::env::join_paths(dirs)
            .map_err(|e| RuntimeError::ExecFailed(format!("cannot build PATH: {e}")))?;

        let mut vars = vec![
            (
                "CONDA_PREFIX".to_owned(),
                self.prefix.to_string_lossy().into_owned(),
            ),
            ("CONDA_DEFAULT_ENV".to_owned(), self.env_name.clone()),
            ("PATH".to_owned(), path.to_string_lossy().into_owned()),
        ];
        vars.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(vars)
    }

    /// POSIX shell text that activates the environment when evaluated.
    pub fn render_exports(&self, current_path: Option<OsString>) -> Result<String, RuntimeError> {
        let mut out = String::new();
        for (key, value) in self.variables(current_path)? {
            out.push_str(&format!("export {key}={}\n", quote(&value)?));
        }
        for script in &self.scripts {
            out.push_str(&format!(". {}\n", quote(&script.to_string_lossy())?));
        }
        Ok(out)
    }

    /// Build the process for `argv`, sourcing activation scripts through `sh` first.
    pub fn command(&self, argv: &[String]) -> Result<Command, RuntimeError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| RuntimeError::ExecFailed("no command given".to_owned()))?;
        let mut cmd = if self.scripts.is_empty() {
            let mut c = Command::new(program);
            c.args(args);
            c
        } else {
            let mut script = String::new();
            for s in &self.scripts {
                script.push_str(&format!(". {} && ", quote(&s.to_string_lossy())?));
            }
            script.push_str("exec \"$@\"");
            let mut c = Command::new("sh");
            c.arg("-c").arg(script).arg("condaspace").args(argv);
            c
        };
        cmd.envs(self.variables(std::env::var_os("PATH"))?);
        Ok(cmd)
    }

    /// Run `argv` inside the environment and return its exit code.
    pub fn run(&self, argv: &[String], cwd: &Path) -> Result<i32, RuntimeError> {
        let status = self
            .command(argv)?
            .current_dir(cwd)
            .status()
            .map_err(|e| RuntimeError::ExecFailed(format!("{}: {e}", argv[0])))?;
        Ok(status.code().unwrap_or(1))
    }

    /// Start an interactive shell (`$SHELL`, or `sh`) inside the environment.
    pub fn spawn_shell(&self, cwd: &Path) -> Result<i32, RuntimeError> {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| {
            if cfg!(windows) {
                "cmd.exe".to_owned()
            } else {
                "sh".to_owned()
            }
        });
        self.run(&[shell], cwd)
    }
}

fn quote(value: &str) -> Result<String, RuntimeError> {
    shlex::try_quote(value)
        .map(std::borrow::Cow::into_owned)
        .map_err(|e| RuntimeError::ExecFailed(format!("cannot quote '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(scripts: Vec<PathBuf>) -> ActivationPlan {
        ActivationPlan::new(
            "test",
            "/work/.conda/envs/test",
            scripts,
            BTreeMap::from([("APP_MODE".to_owned(), "dev mode".to_owned())]),
        )
    }

    #[test]
    fn variables_prepend_prefix_to_path() {
        let vars = plan(vec![]).variables(Some(OsString::from("/usr/bin"))).unwrap();
        let map: BTreeMap<_, _> = vars.into_iter().collect();
        assert_eq!(map["CONDA_PREFIX"], "/work/.conda/envs/test");
        assert_eq!(map["CONDA_DEFAULT_ENV"], "test");
        assert!(map["PATH"].ends_with("/usr/bin"));
        assert_eq!(map["APP_MODE"], "dev mode");
    }

    #[cfg(unix)]
    #[test]
    fn exports_are_shell_quoted() {
        let text = plan(vec![PathBuf::from("/work/my scripts/env.sh")])
            .render_exports(None)
            .unwrap();
        assert!(text.contains("export CONDA_PREFIX=/work/.conda/envs/test\n"));
        assert!(text.contains("export APP_MODE='dev mode'\n"));
        assert!(text.ends_with(". '/work/my scripts/env.sh'\n"));
    }

    #[cfg(unix)]
    #[test]
    fn run_sources_scripts_and_sets_variables() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("act.sh");
        std::fs::write(&script, "export FROM_SCRIPT=yes\n").unwrap();
        let out = dir.path().join("out.txt");
        let plan = plan(vec![script]);
        let code = plan
            .run(
                &[
                    "sh".to_owned(),
                    "-c".to_owned(),
                    format!(
                        "echo \"$FROM_SCRIPT $CONDA_DEFAULT_ENV $APP_MODE\" > '{}'; exit 3",
                        out.display()
                    ),
                ],
                dir.path(),
            )
            .unwrap();
        assert_eq!(code, 3);
        assert_eq!(std::fs::read_to_string(out).unwrap(), "yes test dev mode\n");
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(plan(vec![]).command(&[]).is_err());
    }
}

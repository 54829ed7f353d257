//! Dependency specifications: conda match-specs and PyPI requirements.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A conda match-spec: package name plus optional version, build, and channel constraints.
///
/// `version` is `None` for "any version" (`*` or an empty string in the manifest).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatchSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl MatchSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            build: None,
            channel: None,
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = normalize_version(&version.into());
        self
    }

    /// Parse a complete match-spec string such as `conda-forge::numpy >=1.26 py312*`
    /// or `numpy>=1.26`. Used for CLI arguments and record `depends` entries.
    pub fn parse(input: &str) -> Result<Self, String> {
        let input = input.trim();
        if input.is_empty() {
            return Err("empty match-spec".to_owned());
        }

        let (channel, rest) = match input.split_once("::") {
            Some((c, r)) if !c.trim().is_empty() => (Some(c.trim().to_owned()), r.trim()),
            Some(_) => return Err(format!("empty channel in '{input}'")),
            None => (None, input),
        };

        let split = rest
            .find(|c: char| c.is_whitespace() || "<>=!~".contains(c))
            .unwrap_or(rest.len());
        let (name, constraint) = rest.split_at(split);
        validate_name(name)?;

        let mut spec = Self::new(name);
        spec.channel = channel;

        let constraint = constraint.trim();
        if let Some(eq_form) = constraint
            .strip_prefix('=')
            .filter(|c| !c.starts_with('='))
        {
            // `name=1.2` is a fuzzy pin; `name=1.2=build` pins version and build.
            match eq_form.split_once('=') {
                Some((version, build)) => {
                    spec.version = normalize_version(version);
                    spec.build = Some(build.trim().to_owned());
                }
                None if eq_form.ends_with('*') => spec.version = normalize_version(eq_form),
                None => spec.version = normalize_version(&format!("{eq_form}.*")),
            }
        } else {
            apply_constraint_tokens(&mut spec, constraint)?;
        }
        spec.validate()?;
        Ok(spec)
    }

    /// Build a spec from a manifest dependency entry: either a constraint string
    /// (`">=1.26"`, `"1.26 py312*"`) or a table with `version`/`build`/`channel`.
    pub fn from_manifest(name: &str, value: &toml::Value) -> Result<Self, String> {
        validate_name(name)?;
        let mut spec = Self::new(name);
        match value {
            toml::Value::String(s) => apply_constraint_tokens(&mut spec, s)?,
            toml::Value::Table(table) => {
                for (key, v) in table {
                    let text = v
                        .as_str()
                        .ok_or_else(|| format!("'{key}' must be a string"))?;
                    match key.as_str() {
                        "version" => spec.version = normalize_version(text),
                        "build" => spec.build = Some(text.trim().to_owned()),
                        "channel" => spec.channel = Some(text.trim().to_owned()),
                        other => {
                            return Err(format!(
                                "unknown key '{other}' (expected version, build, or channel)"
                            ))
                        }
                    }
                }
            }
            other => {
                return Err(format!(
                    "expected a match-spec string or a table, found {}",
                    other.type_str()
                ))
            }
        }
        spec.validate()?;
        Ok(spec)
    }

    /// The constraint part as written in a manifest value (`*` when unconstrained).
    pub fn constraint(&self) -> String {
        match (&self.version, &self.build) {
            (Some(v), Some(b)) => format!("{v} {b}"),
            (Some(v), None) => v.clone(),
            (None, Some(b)) => format!("* {b}"),
            (None, None) => "*".to_owned(),
        }
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(version) = &self.version {
            if let Some(bad) = version
                .chars()
                .find(|c| !(c.is_ascii_alphanumeric() || ".*,<>=!~|_+-".contains(*c)))
            {
                return Err(format!("invalid character '{bad}' in version '{version}'"));
            }
        }
        if let Some(build) = &self.build {
            if build.is_empty() || build.chars().any(char::is_whitespace) {
                return Err(format!("invalid build string '{build}'"));
            }
        }
        if matches!(&self.channel, Some(c) if c.is_empty()) {
            return Err("channel must not be empty".to_owned());
        }
        Ok(())
    }
}

impl fmt::Display for MatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(channel) = &self.channel {
            write!(f, "{channel}::")?;
        }
        f.write_str(&self.name)?;
        match (&self.version, &self.build) {
            (Some(v), Some(b)) => write!(f, " {v} {b}"),
            (Some(v), None) => write!(f, " {v}"),
            (None, Some(b)) => write!(f, " * {b}"),
            (None, None) => Ok(()),
        }
    }
}

fn apply_constraint_tokens(spec: &mut MatchSpec, constraint: &str) -> Result<(), String> {
    let tokens: Vec<&str> = constraint.split_whitespace().collect();
    match tokens.as_slice() {
        [] => {}
        [version] => spec.version = normalize_version(version),
        [version, build] => {
            spec.version = normalize_version(version);
            spec.build = Some((*build).to_owned());
        }
        _ => {
            return Err(format!(
                "malformed constraint '{constraint}' (expected '<version> [<build>]')"
            ))
        }
    }
    Ok(())
}

fn normalize_version(version: &str) -> Option<String> {
    let v = version.trim();
    if v.is_empty() || v == "*" {
        None
    } else {
        Some(v.to_owned())
    }
}

fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("package name must not be empty".to_owned());
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || "-_.".contains(*c)))
    {
        return Err(format!("invalid character '{bad}' in package name '{name}'"));
    }
    Ok(())
}

/// A PyPI requirement, installed through the external conda-pypi converter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PypiDependency {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<String>,
    /// Direct reference (`url`, `path`, or `git+<url>`), rendered as `name @ <ref>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub editable: bool,
}

impl PypiDependency {
    pub fn from_manifest(name: &str, value: &toml::Value) -> Result<Self, String> {
        if name.trim().is_empty() {
            return Err("package name must not be empty".to_owned());
        }
        let mut dep = Self {
            name: name.to_owned(),
            version: None,
            extras: Vec::new(),
            reference: None,
            editable: false,
        };
        match value {
            toml::Value::String(s) => dep.version = normalize_version(s),
            toml::Value::Table(table) => {
                for (key, v) in table {
                    match key.as_str() {
                        "version" => dep.version = normalize_version(string_field(key, v)?),
                        "url" | "path" => dep.reference = Some(string_field(key, v)?.to_owned()),
                        "git" => dep.reference = Some(format!("git+{}", string_field(key, v)?)),
                        "editable" => {
                            dep.editable = v
                                .as_bool()
                                .ok_or_else(|| "'editable' must be a boolean".to_owned())?;
                        }
                        "extras" => {
                            let items = v
                                .as_array()
                                .ok_or_else(|| "'extras' must be a list of strings".to_owned())?;
                            dep.extras = items
                                .iter()
                                .map(|i| {
                                    i.as_str().map(str::to_owned).ok_or_else(|| {
                                        "'extras' must be a list of strings".to_owned()
                                    })
                                })
                                .collect::<Result<_, _>>()?;
                        }
                        other => {
                            return Err(format!(
                                "unknown key '{other}' (expected version, extras, url, path, git, or editable)"
                            ))
                        }
                    }
                }
            }
            other => {
                return Err(format!(
                    "expected a requirement string or a table, found {}",
                    other.type_str()
                ))
            }
        }
        Ok(dep)
    }

    /// PEP 508 requirement text passed to the converter.
    pub fn requirement(&self) -> String {
        let mut out = self.name.clone();
        if !self.extras.is_empty() {
            out.push('[');
            out.push_str(&self.extras.join(","));
            out.push(']');
        }
        if let Some(reference) = &self.reference {
            out.push_str(" @ ");
            out.push_str(reference);
        } else if let Some(version) = &self.version {
            out.push_str(version);
        }
        out
    }
}

fn string_field<'a>(key: &str, v: &'a toml::Value) -> Result<&'a str, String> {
    v.as_str().ok_or_else(|| format!("'{key}' must be a string"))
}

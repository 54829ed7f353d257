//! Known conda subdirs and detection of the host platform.

use crate::types::Platform;

/// Platforms accepted in `platforms` lists and `target.<platform>` tables.
pub const KNOWN_PLATFORMS: &[&str] = &[
    "noarch",
    "linux-32",
    "linux-64",
    "linux-aarch64",
    "linux-armv6l",
    "linux-armv7l",
    "linux-ppc64",
    "linux-ppc64le",
    "linux-riscv64",
    "linux-s390x",
    "osx-64",
    "osx-arm64",
    "win-32",
    "win-64",
    "win-arm64",
    "emscripten-wasm32",
    "wasi-wasm32",
    "zos-z",
];

/// Platforms written by `init` when the caller does not pass any.
pub const DEFAULT_INIT_PLATFORMS: &[&str] = &["linux-64", "osx-64", "osx-arm64", "win-64"];

pub fn is_known_platform(name: &str) -> bool {
    KNOWN_PLATFORMS.contains(&name)
}

/// The conda subdir of the running host, derived from the compile target.
pub fn current_platform() -> Platform {
    Platform::new(platform_for(std::env::consts::OS, std::env::consts::ARCH))
}

fn platform_for(os: &str, arch: &str) -> String {
    let os = match os {
        "macos" => "osx",
        "windows" => "win",
        other => other,
    };
    let arch = match (os, arch) {
        (_, "x86_64") => "64",
        (_, "x86") => "32",
        ("osx" | "win", "aarch64") => "arm64",
        (_, "powerpc64") => "ppc64le",
        (_, "riscv64") => "riscv64",
        (_, "s390x") => "s390x",
        (_, other) => other,
    };
    format!("{os}-{arch}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_rust_targets_to_conda_subdirs() {
        assert_eq!(platform_for("linux", "x86_64"), "linux-64");
        assert_eq!(platform_for("linux", "aarch64"), "linux-aarch64");
        assert_eq!(platform_for("macos", "aarch64"), "osx-arm64");
        assert_eq!(platform_for("macos", "x86_64"), "osx-64");
        assert_eq!(platform_for("windows", "x86_64"), "win-64");
        assert_eq!(platform_for("windows", "aarch64"), "win-arm64");
    }

    #[test]
    fn default_init_platforms_are_known() {
        for p in DEFAULT_INIT_PLATFORMS {
            assert!(is_known_platform(p), "{p}");
        }
        assert!(!is_known_platform("amiga-68k"));
    }
}

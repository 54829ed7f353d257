//! Conda version ordering and constraint matching.
//!
//! Covers the subset of the conda version-spec grammar that manifests and
//! package `depends` lists use in practice: `*`, exact and fuzzy versions
//! (`1.26`, `1.26.*`), comparison operators, `~=`, `,` (and), and `|` (or).

use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Component {
    Num(u64),
    Str(String),
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Num(a), Self::Num(b)) => a.cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            // Pre-release tags sort before any number: 1.0a1 < 1.0
            (Self::Str(_), Self::Num(_)) => Ordering::Less,
            (Self::Num(_), Self::Str(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn split_epoch(version: &str) -> (u64, &str) {
    match version.split_once('!') {
        Some((epoch, rest)) => (epoch.parse().unwrap_or(0), rest),
        None => (0, version),
    }
}

fn components(version: &str) -> Vec<Component> {
    let mut out = Vec::new();
    for segment in version
        .to_ascii_lowercase()
        .split(['.', '-', '_', '+'])
        .filter(|s| !s.is_empty())
    {
        let mut chars = segment.chars().peekable();
        while let Some(&c) = chars.peek() {
            let digits = c.is_ascii_digit();
            let mut run = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_digit() != digits {
                    break;
                }
                run.push(c);
                chars.next();
            }
            out.push(if digits {
                Component::Num(run.parse().unwrap_or(u64::MAX))
            } else {
                Component::Str(run)
            });
        }
    }
    out
}

/// Total order over conda version strings.
pub fn compare(a: &str, b: &str) -> Ordering {
    let (ea, ra) = split_epoch(a.trim());
    let (eb, rb) = split_epoch(b.trim());
    if ea != eb {
        return ea.cmp(&eb);
    }
    let ca = components(ra);
    let cb = components(rb);
    let zero = Component::Num(0);
    for i in 0..ca.len().max(cb.len()) {
        let x = ca.get(i).unwrap_or(&zero);
        let y = cb.get(i).unwrap_or(&zero);
        match x.cmp(y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn prefix_matches(prefix: &str, version: &str) -> bool {
    let p = components(prefix.trim_end_matches(['*', '.']));
    let v = components(version);
    v.len() >= p.len() && v[..p.len()] == p[..]
}

fn atom_matches(atom: &str, version: &str) -> bool {
    let atom = atom.trim();
    if atom.is_empty() || atom == "*" {
        return true;
    }
    let ops = [">=", "<=", "==", "!=", "~=", ">", "<", "="];
    let (op, operand) = ops
        .iter()
        .find_map(|op| atom.strip_prefix(op).map(|rest| (*op, rest.trim())))
        .unwrap_or(("", atom));
    let glob = operand.ends_with('*');
    match op {
        ">=" => compare(version, operand) != Ordering::Less,
        "<=" => compare(version, operand) != Ordering::Greater,
        ">" => compare(version, operand) == Ordering::Greater,
        "<" => compare(version, operand) == Ordering::Less,
        "==" if glob => prefix_matches(operand, version),
        "==" => compare(version, operand) == Ordering::Equal,
        "!=" if glob => !prefix_matches(operand, version),
        "!=" => compare(version, operand) != Ordering::Equal,
        "~=" => {
            let upper = operand.rsplit_once('.').map_or(operand, |(head, _)| head);
            compare(version, operand) != Ordering::Less && prefix_matches(upper, version)
        }
        // `=1.2` and a bare `1.2` are fuzzy: any version starting with 1.2
        _ => prefix_matches(operand, version),
    }
}

/// Whether `version` satisfies a conda version constraint.
pub fn matches(constraint: &str, version: &str) -> bool {
    constraint
        .split('|')
        .any(|alt| alt.split(',').all(|atom| atom_matches(atom, version)))
}

/// Glob match for build strings, where `*` matches any run of characters.
pub fn build_matches(pattern: &str, build: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == build;
    }
    let mut rest = build;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else if let Some(pos) = rest.find(part) {
            rest = &rest[pos + part.len()..];
        } else {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_numeric_segments() {
        assert_eq!(compare("1.10", "1.9"), Ordering::Greater);
        assert_eq!(compare("1.0", "1.0.0"), Ordering::Equal);
        assert_eq!(compare("1.0a1", "1.0"), Ordering::Less);
        assert_eq!(compare("1!0.1", "2.0"), Ordering::Greater);
        assert_eq!(compare("2024.1.1", "2023.12.31"), Ordering::Greater);
    }

    #[test]
    fn comparison_constraints() {
        assert!(matches(">=3.10", "3.12.1"));
        assert!(!matches(">=3.10", "3.9.18"));
        assert!(matches(">=1.2,<2", "1.9"));
        assert!(!matches(">=1.2,<2", "2.0"));
        assert!(matches("<1|>=3", "3.1"));
        assert!(matches("!=1.5", "1.6"));
    }

    #[test]
    fn fuzzy_and_exact_versions() {
        assert!(matches("1.26", "1.26.4"));
        assert!(matches("1.26.*", "1.26.0"));
        assert!(!matches("1.2", "1.20"));
        assert!(matches("==1.26.0", "1.26"));
        assert!(!matches("==1.26.0", "1.26.1"));
        assert!(matches("=1.26", "1.26.3"));
        assert!(matches("*", "0.0.1"));
        assert!(matches("~=1.4.2", "1.4.9"));
        assert!(!matches("~=1.4.2", "1.5.0"));
    }

    #[test]
    fn build_globs() {
        assert!(build_matches("py312*", "py312h1234_0"));
        assert!(build_matches("*_cpython", "h123_0_cpython"));
        assert!(build_matches("*", "anything"));
        assert!(build_matches("py*_0", "py312h_0"));
        assert!(!build_matches("py311*", "py312h1234_0"));
        assert!(build_matches("h0_0", "h0_0"));
    }
}

//! In-memory solver over a fixed package index, for tests and offline use.

use crate::solver::{SolveRequest, Solver};
use crate::version;
use crate::RuntimeError;
use condaspace_schema::{CondaPackageEntry, CondaPackageRecord, MatchSpec};
use serde::Deserialize;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use tracing::debug;

#[derive(Deserialize)]
struct IndexFile {
    packages: Vec<CondaPackageEntry>,
}

/// Greedy solver: for each requested name, picks the highest version that
/// satisfies every constraint seen so far, then follows its `depends`.
///
/// It never backtracks, so a constraint arriving after a package was chosen
/// and excluding it makes the request unsatisfiable.
pub struct MockSolver {
    index: Vec<CondaPackageRecord>,
}

impl MockSolver {
    pub fn new(index: Vec<CondaPackageRecord>) -> Self {
        Self { index }
    }

    /// Load `{"packages": [{"conda": "<url>", "depends": [...]}, ...]}`.
    pub fn from_index_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path)?;
        let file: IndexFile = serde_json::from_str(&content)?;
        let index = file
            .packages
            .into_iter()
            .map(CondaPackageRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(index))
    }

    fn candidates<'a: 'n, 'n>(
        &'a self,
        request: &'a SolveRequest,
        name: &'n str,
    ) -> impl Iterator<Item = &'a CondaPackageRecord> + 'n {
        self.index.iter().filter(move |r| {
            r.name() == name
                && (r.identity.subdir() == request.platform.as_str()
                    || r.identity.subdir() == "noarch")
                && (request.channels.is_empty()
                    || request.channels.iter().any(|c| c == r.identity.channel()))
        })
    }
}

fn satisfies(record: &CondaPackageRecord, spec: &MatchSpec) -> bool {
    spec.version
        .as_deref()
        .is_none_or(|v| version::matches(v, record.version()))
        && spec
            .build
            .as_deref()
            .is_none_or(|b| version::build_matches(b, record.build()))
}

fn describe(constraints: &[MatchSpec]) -> String {
    constraints
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl Solver for MockSolver {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn solve(&self, request: &SolveRequest) -> Result<Vec<CondaPackageRecord>, RuntimeError> {
        let mut constraints: BTreeMap<String, Vec<MatchSpec>> = BTreeMap::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        for spec in &request.specs {
            constraints
                .entry(spec.name.clone())
                .or_default()
                .push(spec.clone());
            queue.push_back(spec.name.clone());
        }

        let mut chosen: BTreeMap<String, &CondaPackageRecord> = BTreeMap::new();
        while let Some(name) = queue.pop_front() {
            let wanted = constraints.get(&name).cloned().unwrap_or_default();
            if let Some(existing) = chosen.get(&name) {
                if let Some(conflict) = wanted.iter().find(|s| !satisfies(existing, s)) {
                    return Err(RuntimeError::Unsatisfiable(format!(
                        "{name}-{} was selected but '{conflict}' is also required",
                        existing.version()
                    )));
                }
                continue;
            }

            let best = self
                .candidates(request, &name)
                .filter(|r| wanted.iter().all(|s| satisfies(r, s)))
                .max_by(|a, b| {
                    version::compare(a.version(), b.version())
                        .then_with(|| a.build().cmp(b.build()))
                })
                .ok_or_else(|| {
                    RuntimeError::Unsatisfiable(format!(
                        "nothing provides {name} matching [{}] for {}",
                        describe(&wanted),
                        request.platform
                    ))
                })?;
            debug!("mock solver picked {} {} for {name}", best.version(), best.build());
            chosen.insert(name.clone(), best);

            for dep in &best.depends {
                let spec = MatchSpec::parse(dep).map_err(|e| {
                    RuntimeError::SolverFailed(format!("bad dependency '{dep}' of {name}: {e}"))
                })?;
                // Virtual packages (__glibc, __osx) are provided by the host.
                if spec.name.starts_with("__") {
                    continue;
                }
                queue.push_back(spec.name.clone());
                constraints.entry(spec.name.clone()).or_default().push(spec);
            }
        }

        Ok(chosen.into_values().cloned().collect())
    }
}

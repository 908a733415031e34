use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::{TestResult, TestStatus, UnifiedTestResults};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlakyTest {
    pub passed_runs: usize,
    pub failed_runs: usize,
    /// Runs in which the test appeared at all.
    pub total_runs: usize,
    /// One status per run the test appeared in, in history order.
    pub status_history: Vec<TestStatus>,
}

/// Tests whose status changed between runs in `history`.
///
/// Tests are keyed by file and name, so same-named tests in different files
/// are tracked apart. Within a single run a key counts once: a failure wins
/// over any other outcome seen for it. Histories shorter than two runs carry
/// no signal and yield an empty map.
pub fn detect_flaky_tests(history: &[UnifiedTestResults]) -> BTreeMap<String, FlakyTest> {
    if history.len() < 2 {
        return BTreeMap::new();
    }

    let mut observed: BTreeMap<String, Vec<TestStatus>> = BTreeMap::new();
    for run in history {
        let mut in_run: BTreeMap<String, TestStatus> = BTreeMap::new();
        for test in &run.tests {
            in_run
                .entry(test_key(test))
                .and_modify(|status| {
                    if !status.is_failure() && test.status.is_failure() {
                        *status = test.status;
                    }
                })
                .or_insert(test.status);
        }
        for (key, status) in in_run {
            observed.entry(key).or_default().push(status);
        }
    }

    observed
        .into_iter()
        .filter(|(_, statuses)| statuses.iter().collect::<BTreeSet<_>>().len() >= 2)
        .map(|(key, status_history)| {
            let flaky = FlakyTest {
                passed_runs: status_history.iter().filter(|s| s.is_pass()).count(),
                failed_runs: status_history.iter().filter(|s| s.is_failure()).count(),
                total_runs: status_history.len(),
                status_history,
            };
            (key, flaky)
        })
        .collect()
}

/// `file > name`, or the bare name when there is no file or the name
/// already carries it (pytest node ids).
fn test_key(test: &TestResult) -> String {
    match test.file.as_deref() {
        Some(file) if !file.is_empty() && !test.name.starts_with(file) => {
            format!("{} > {}", file, test.name)
        }
        _ => test.name.clone(),
    }
}

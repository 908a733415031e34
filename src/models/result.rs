use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::{TestFramework, TestStatus};

/// One discovered test case as reported by a framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub status: TestStatus,
    /// Seconds. Negative means the framework did not time this test.
    pub duration: f64,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub error_message: Option<String>,
    pub error_traceback: Option<String>,
    #[serde(default)]
    pub markers: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl TestResult {
    pub const NOT_TIMED: f64 = -1.0;

    pub fn new(name: impl Into<String>, status: TestStatus) -> Self {
        Self {
            name: name.into(),
            status,
            duration: Self::NOT_TIMED,
            file: None,
            line: None,
            error_message: None,
            error_traceback: None,
            markers: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = seconds;
        self
    }

    pub fn with_location(mut self, file: Option<String>, line: Option<u32>) -> Self {
        self.file = file;
        self.line = line;
        self
    }

    pub fn with_error(mut self, message: Option<String>, traceback: Option<String>) -> Self {
        self.error_message = message;
        self.error_traceback = traceback;
        self
    }

    pub fn with_markers(mut self, markers: Vec<String>) -> Self {
        self.markers = markers;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_timed(&self) -> bool {
        self.duration >= 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(default)]
    pub errors: usize,
    #[serde(default)]
    pub xfail: usize,
    #[serde(default)]
    pub xpass: usize,
    /// 1 when the run was killed for exceeding its time budget.
    #[serde(default)]
    pub timeout: usize,
    /// Seconds.
    pub duration: f64,
    pub success_rate: f64,
}

impl Default for TestSummary {
    fn default() -> Self {
        Self::zero()
    }
}

impl TestSummary {
    pub fn zero() -> Self {
        Self {
            total: 0,
            passed: 0,
            failed: 0,
            skipped: 0,
            errors: 0,
            xfail: 0,
            xpass: 0,
            timeout: 0,
            duration: 0.0,
            success_rate: 100.0,
        }
    }

    /// Count outcomes in `tests`. Duration is the sum of timed tests.
    pub fn from_tests(tests: &[TestResult]) -> Self {
        let mut summary = Self::zero();
        for test in tests {
            summary.total += 1;
            match test.status {
                TestStatus::Passed => summary.passed += 1,
                TestStatus::Failed => summary.failed += 1,
                TestStatus::Skipped => summary.skipped += 1,
                TestStatus::Error => summary.errors += 1,
                TestStatus::Xfail => summary.xfail += 1,
                TestStatus::Xpass => summary.xpass += 1,
            }
            if test.is_timed() {
                summary.duration += test.duration;
            }
        }
        summary.refresh_success_rate();
        summary
    }

    /// Skipped tests are excluded from the denominator; an empty or
    /// all-skipped run counts as fully successful.
    pub fn compute_success_rate(total: usize, passed: usize, skipped: usize) -> f64 {
        if total == 0 || total <= skipped {
            return 100.0;
        }
        passed as f64 / (total - skipped) as f64 * 100.0
    }

    pub fn refresh_success_rate(&mut self) {
        self.success_rate = Self::compute_success_rate(self.total, self.passed, self.skipped);
    }

    /// Sum every count and the duration; the rate is recomputed from the sums.
    pub fn merge(&mut self, other: &TestSummary) {
        self.total += other.total;
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.xfail += other.xfail;
        self.xpass += other.xpass;
        self.timeout += other.timeout;
        self.duration += other.duration;
        self.refresh_success_rate();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageInfo {
    pub covered_lines: u64,
    pub total_lines: u64,
    pub coverage_percent: f64,
    /// `path:line` references, when the artifact lists them.
    pub missing_lines: Option<Vec<String>>,
}

impl CoverageInfo {
    pub fn from_counts(covered_lines: u64, total_lines: u64) -> Self {
        let coverage_percent = if total_lines == 0 {
            0.0
        } else {
            covered_lines as f64 / total_lines as f64 * 100.0
        };
        Self {
            covered_lines,
            total_lines,
            coverage_percent,
            missing_lines: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkInfo {
    pub framework: TestFramework,
    pub version: Option<String>,
    pub config_file: Option<PathBuf>,
    pub detected_at: DateTime<Utc>,
}

impl FrameworkInfo {
    pub fn new(framework: TestFramework) -> Self {
        Self {
            framework,
            version: None,
            config_file: None,
            detected_at: Utc::now(),
        }
    }

    pub fn with_config_file(mut self, config_file: Option<PathBuf>) -> Self {
        self.config_file = config_file;
        self
    }
}

/// The canonical value produced by one runner invocation or one aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedTestResults {
    pub project: String,
    pub framework: FrameworkInfo,
    pub summary: TestSummary,
    pub tests: Vec<TestResult>,
    pub coverage: Option<CoverageInfo>,
    pub error: Option<String>,
    pub environment: Option<BTreeMap<String, String>>,
    pub timestamp: DateTime<Utc>,
}

impl UnifiedTestResults {
    /// Build a result whose summary is derived from `tests`.
    pub fn from_tests(
        project: impl Into<String>,
        framework: FrameworkInfo,
        tests: Vec<TestResult>,
    ) -> Self {
        Self {
            project: project.into(),
            framework,
            summary: TestSummary::from_tests(&tests),
            tests,
            coverage: None,
            error: None,
            environment: None,
            timestamp: Utc::now(),
        }
    }

    /// A self-contained failure: zero summary, no tests, non-null error.
    pub fn failed_run(
        project: impl Into<String>,
        framework: FrameworkInfo,
        error: impl Into<String>,
    ) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::from_tests(project, framework, Vec::new())
        }
    }

    pub fn framework_kind(&self) -> TestFramework {
        self.framework.framework
    }

    pub fn find_test(&self, name: &str) -> Option<&TestResult> {
        self.tests.iter().find(|t| t.name == name)
    }
}

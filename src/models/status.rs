use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    Error,
    Xfail,
    Xpass,
}

impl TestStatus {
    pub const ALL: [TestStatus; 6] = [
        TestStatus::Passed,
        TestStatus::Failed,
        TestStatus::Skipped,
        TestStatus::Error,
        TestStatus::Xfail,
        TestStatus::Xpass,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Skipped => "skipped",
            TestStatus::Error => "error",
            TestStatus::Xfail => "xfail",
            TestStatus::Xpass => "xpass",
        }
    }

    /// Outcomes that count as a successful run of the test body.
    pub fn is_pass(&self) -> bool {
        matches!(self, TestStatus::Passed | TestStatus::Xpass)
    }

    /// Outcomes that count against the run.
    pub fn is_failure(&self) -> bool {
        matches!(self, TestStatus::Failed | TestStatus::Error)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies which external CLI produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestFramework {
    Pytest,
    Jest,
    Vitest,
    Cargo,
    Mocha,
    #[default]
    Unknown,
}

impl TestFramework {
    pub const SUPPORTED: [TestFramework; 5] = [
        TestFramework::Pytest,
        TestFramework::Jest,
        TestFramework::Vitest,
        TestFramework::Cargo,
        TestFramework::Mocha,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TestFramework::Pytest => "pytest",
            TestFramework::Jest => "jest",
            TestFramework::Vitest => "vitest",
            TestFramework::Cargo => "cargo",
            TestFramework::Mocha => "mocha",
            TestFramework::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TestFramework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestFramework {
    type Err = std::convert::Infallible;

    /// Unrecognized names map to `Unknown` rather than failing.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "pytest" => TestFramework::Pytest,
            "jest" => TestFramework::Jest,
            "vitest" => TestFramework::Vitest,
            "cargo" | "cargo-test" => TestFramework::Cargo,
            "mocha" => TestFramework::Mocha,
            _ => TestFramework::Unknown,
        })
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::UnifiedTestResults;

const FAILURE_PENALTY: f64 = 0.5;
const ERROR_PENALTY: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HealthGrade {
    A,
    B,
    C,
    D,
    F,
}

impl HealthGrade {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 90.0 => HealthGrade::A,
            s if s >= 85.0 => HealthGrade::B,
            s if s >= 70.0 => HealthGrade::C,
            s if s >= 60.0 => HealthGrade::D,
            _ => HealthGrade::F,
        }
    }
}

impl fmt::Display for HealthGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Healthy,
    Failing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub health_score: f64,
    pub health_grade: HealthGrade,
    pub status: HealthStatus,
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    pub error_tests: usize,
    pub pass_rate_percentage: f64,
    pub error_rate_percentage: f64,
    pub message: Option<String>,
}

/// Score a run from 0 to 100.
///
/// The pass rate is reduced by half the failure rate and the full error rate:
/// an errored test is a broken harness, a failed one is a broken assertion.
/// Rates are taken over the tests that actually executed, so skipped tests
/// neither help nor hurt. A run where nothing executed scores 0.
pub fn validate_test_health(result: &UnifiedTestResults) -> HealthReport {
    let summary = &result.summary;
    let executed = summary.total.saturating_sub(summary.skipped);

    if executed == 0 {
        let message = if summary.total == 0 {
            result
                .error
                .as_ref()
                .map(|e| format!("No tests found: {}", e))
                .unwrap_or_else(|| "No tests found".to_string())
        } else {
            format!("All {} test(s) were skipped", summary.total)
        };
        return HealthReport {
            health_score: 0.0,
            health_grade: HealthGrade::F,
            status: HealthStatus::Failing,
            total_tests: summary.total,
            passed_tests: 0,
            failed_tests: 0,
            error_tests: 0,
            pass_rate_percentage: 0.0,
            error_rate_percentage: 0.0,
            message: Some(message),
        };
    }

    let executed = executed as f64;
    let pass_rate = summary.passed as f64 / executed * 100.0;
    let failure_rate = summary.failed as f64 / executed * 100.0;
    let error_rate = summary.errors as f64 / executed * 100.0;
    let score = (pass_rate - FAILURE_PENALTY * failure_rate - ERROR_PENALTY * error_rate)
        .clamp(0.0, 100.0);

    let healthy = summary.failed == 0 && summary.errors == 0;
    let message = match (summary.failed, summary.errors) {
        (0, 0) => None,
        (failed, 0) => Some(format!("{} failing test(s)", failed)),
        (0, errors) => Some(format!("{} test(s) errored", errors)),
        (failed, errors) => Some(format!(
            "{} failing test(s), {} test(s) errored",
            failed, errors
        )),
    };

    HealthReport {
        health_score: score,
        health_grade: HealthGrade::from_score(score),
        status: if healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Failing
        },
        total_tests: summary.total,
        passed_tests: summary.passed,
        failed_tests: summary.failed,
        error_tests: summary.errors,
        pass_rate_percentage: pass_rate,
        error_rate_percentage: error_rate,
        message,
    }
}

//! Run test suites from several frameworks, normalize their reports into one
//! result model, keep a history of runs and compute statistics over it.

pub mod aggregator;
pub mod analyzer;
pub mod config;
pub mod error;
pub mod models;
pub mod runner;

pub use aggregator::{Archive, ArchiveEntry, ExportFormat, aggregate_results, export_results};
pub use config::Config;
pub use error::{Error, Result};
pub use models::{
    CoverageInfo, FrameworkInfo, TestFramework, TestResult, TestStatus, TestSummary,
    UnifiedTestResults,
};
pub use runner::{FrameworkAdapter, RunRequest, Runner};

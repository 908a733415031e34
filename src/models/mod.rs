pub mod result;
pub mod status;

pub use result::{CoverageInfo, FrameworkInfo, TestResult, TestSummary, UnifiedTestResults};
pub use status::{TestFramework, TestStatus};

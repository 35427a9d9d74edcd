//! Test report domain types

use serde::{Deserialize, Serialize};

/// Aggregated test report for one job execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobTestReport {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub suites: Vec<TestSuiteReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageReport>,
}

impl JobTestReport {
    pub fn is_empty(&self) -> bool {
        self.suites.is_empty() && self.coverage.is_none()
    }

    /// Adds a suite and folds its counts into the totals
    pub fn add_suite(&mut self, suite: TestSuiteReport) {
        self.total += suite.total;
        self.passed += suite.passed;
        self.failed += suite.failed;
        self.skipped += suite.skipped;
        self.suites.push(suite);
    }
}

/// Results parsed from a single report file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestSuiteReport {
    pub name: String,
    pub format: String,
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub cases: Vec<TestCase>,
}

impl TestSuiteReport {
    pub fn push_case(&mut self, case: TestCase) {
        self.total += 1;
        match case.status {
            TestCaseStatus::Pass => self.passed += 1,
            TestCaseStatus::Fail => self.failed += 1,
            TestCaseStatus::Skip => self.skipped += 1,
        }
        self.cases.push(case);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestCaseStatus {
    #[default]
    Pass,
    Fail,
    Skip,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestCase {
    pub package: String,
    pub name: String,
    pub status: TestCaseStatus,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output: String,
}

/// Coverage summary parsed from a coverage file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageReport {
    pub format: String,
    pub total_statements: u64,
    pub covered_statements: u64,
    pub percent: f64,
    pub files: Vec<CoverageFile>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageFile {
    pub path: String,
    pub total_statements: u64,
    pub covered_statements: u64,
}

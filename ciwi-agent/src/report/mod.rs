//! Test report and coverage parsing
//!
//! Test steps name a report file and its format; the parsed suites are
//! folded into the job's [`JobTestReport`] and uploaded once the steps end.

mod coverage;
mod go_test;
mod junit;

use std::path::Path;

use anyhow::{Context, Result};
use ciwi_core::domain::job::{CoverageFormat, TestReportFormat};
use ciwi_core::domain::test_report::{CoverageReport, JobTestReport, TestSuiteReport};

pub use coverage::{merge_coverage, parse_go_coverprofile, parse_lcov};
pub use go_test::parse_go_test_json;
pub use junit::parse_junit_xml;

/// Parses a test report body in `format`
pub fn parse_test_report(format: TestReportFormat, name: &str, text: &str) -> Result<TestSuiteReport> {
    let mut suite = match format {
        TestReportFormat::GoTestJson => parse_go_test_json(text)?,
        TestReportFormat::JunitXml => parse_junit_xml(text)?,
    };
    suite.name = name.to_string();
    suite.format = format.as_str().to_string();
    Ok(suite)
}

/// Parses a coverage body in `format`
pub fn parse_coverage(format: CoverageFormat, text: &str) -> Result<CoverageReport> {
    let mut report = match format {
        CoverageFormat::GoCoverprofile => parse_go_coverprofile(text)?,
        CoverageFormat::Lcov => parse_lcov(text)?,
    };
    report.format = format.as_str().to_string();
    Ok(report)
}

/// Reads and parses the report file of a test step into `report`
pub async fn collect_test_report(
    path: &Path,
    format: TestReportFormat,
    name: &str,
    report: &mut JobTestReport,
) -> Result<TestSuiteReport> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read test report {}", path.display()))?;
    let suite = parse_test_report(format, name, &text)
        .with_context(|| format!("failed to parse {} report {}", format.as_str(), path.display()))?;
    report.add_suite(suite.clone());
    Ok(suite)
}

/// Reads and parses the coverage file of a test step into `report`
pub async fn collect_coverage(
    path: &Path,
    format: CoverageFormat,
    report: &mut JobTestReport,
) -> Result<()> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read coverage file {}", path.display()))?;
    let coverage = parse_coverage(format, &text)
        .with_context(|| format!("failed to parse {} coverage {}", format.as_str(), path.display()))?;
    merge_coverage(&mut report.coverage, coverage);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_accumulates_suites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.xml");
        std::fs::write(
            &path,
            r#"<testsuite name="s"><testcase name="a"/><testcase name="b"><failure/></testcase></testsuite>"#,
        )
        .unwrap();

        let mut report = JobTestReport::default();
        collect_test_report(&path, TestReportFormat::JunitXml, "unit", &mut report)
            .await
            .unwrap();
        collect_test_report(&path, TestReportFormat::JunitXml, "again", &mut report)
            .await
            .unwrap();

        assert_eq!(report.suites.len(), 2);
        assert_eq!(report.suites[0].name, "unit");
        assert_eq!(report.suites[0].format, "junit-xml");
        assert_eq!(report.total, 4);
        assert_eq!(report.failed, 2);
    }

    #[tokio::test]
    async fn test_missing_report_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = JobTestReport::default();
        let err = collect_test_report(
            &dir.path().join("nope.json"),
            TestReportFormat::GoTestJson,
            "unit",
            &mut report,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("failed to read test report"));
        assert!(report.is_empty());
    }
}

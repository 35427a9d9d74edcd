//! JUnit XML reports

use anyhow::{Context, Result};
use ciwi_core::domain::test_report::{TestCase, TestCaseStatus, TestSuiteReport};

/// Parses every `<testcase>` in the document, whatever the nesting of suites
pub fn parse_junit_xml(text: &str) -> Result<TestSuiteReport> {
    let doc = roxmltree::Document::parse(text).context("invalid junit xml")?;
    let mut suite = TestSuiteReport::default();

    for node in doc.descendants().filter(|n| n.has_tag_name("testcase")) {
        let child = |tag: &str| node.children().find(|c| c.has_tag_name(tag));
        let failure = child("failure").or_else(|| child("error"));

        let (status, output) = if let Some(failure) = failure {
            let mut text = failure.attribute("message").unwrap_or_default().to_string();
            if let Some(body) = failure.text().map(str::trim).filter(|t| !t.is_empty()) {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(body);
            }
            (TestCaseStatus::Fail, text)
        } else if child("skipped").is_some() {
            (TestCaseStatus::Skip, String::new())
        } else {
            (TestCaseStatus::Pass, String::new())
        };

        let package = node
            .attribute("classname")
            .or_else(|| node.parent_element().and_then(|p| p.attribute("name")))
            .unwrap_or_default();

        suite.push_case(TestCase {
            package: package.to_string(),
            name: node.attribute("name").unwrap_or_default().to_string(),
            status,
            duration_seconds: node
                .attribute("time")
                .and_then(|t| t.trim().parse().ok())
                .unwrap_or_default(),
            output,
        });
    }

    Ok(suite)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_nested_suites() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<testsuites>
  <testsuite name="core" tests="3">
    <testcase classname="core.Parser" name="parses" time="0.5"/>
    <testcase classname="core.Parser" name="rejects" time="0.25">
      <failure message="expected error">stack trace here</failure>
    </testcase>
    <testcase name="later"><skipped/></testcase>
  </testsuite>
  <testsuite name="io">
    <testcase classname="io.Disk" name="writes"><error message="disk full"/></testcase>
  </testsuite>
</testsuites>"#;

        let suite = parse_junit_xml(xml).unwrap();
        assert_eq!(suite.total, 4);
        assert_eq!(suite.passed, 1);
        assert_eq!(suite.failed, 2);
        assert_eq!(suite.skipped, 1);

        assert_eq!(suite.cases[0].package, "core.Parser");
        assert!((suite.cases[0].duration_seconds - 0.5).abs() < f64::EPSILON);
        assert_eq!(suite.cases[1].output, "expected error\nstack trace here");
        assert_eq!(suite.cases[2].package, "core");
        assert_eq!(suite.cases[3].output, "disk full");
    }

    #[test]
    fn test_invalid_xml() {
        assert!(parse_junit_xml("<testsuite>").is_err());
    }
}

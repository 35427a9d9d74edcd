//! `go test -json` event streams

use std::collections::HashMap;

use anyhow::{Result, bail};
use ciwi_core::domain::test_report::{TestCase, TestCaseStatus, TestSuiteReport};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TestEvent {
    #[serde(default)]
    action: String,
    #[serde(default)]
    package: String,
    #[serde(default)]
    test: String,
    #[serde(default)]
    elapsed: Option<f64>,
    #[serde(default)]
    output: String,
}

/// Parses one JSON event per line; non-JSON lines (build output) are ignored
///
/// Only test-level pass/fail/skip events become cases. Output is kept for
/// failed tests only.
pub fn parse_go_test_json(text: &str) -> Result<TestSuiteReport> {
    let mut outputs: HashMap<(String, String), String> = HashMap::new();
    let mut cases = Vec::new();
    let mut parsed_any = false;

    for line in text.lines().map(str::trim).filter(|l| l.starts_with('{')) {
        let Ok(event) = serde_json::from_str::<TestEvent>(line) else {
            continue;
        };
        parsed_any = true;
        if event.test.is_empty() {
            continue;
        }
        let key = (event.package.clone(), event.test.clone());
        let status = match event.action.as_str() {
            "output" => {
                outputs.entry(key).or_default().push_str(&event.output);
                continue;
            }
            "pass" => TestCaseStatus::Pass,
            "fail" => TestCaseStatus::Fail,
            "skip" => TestCaseStatus::Skip,
            _ => continue,
        };
        let output = match status {
            TestCaseStatus::Fail => outputs.remove(&key).unwrap_or_default(),
            _ => {
                outputs.remove(&key);
                String::new()
            }
        };
        cases.push(TestCase {
            package: event.package,
            name: event.test,
            status,
            duration_seconds: event.elapsed.unwrap_or_default(),
            output,
        });
    }

    if !parsed_any && !text.trim().is_empty() {
        bail!("no go test events found");
    }

    let mut suite = TestSuiteReport::default();
    for case in cases {
        suite.push_case(case);
    }
    Ok(suite)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = r#"
# building
{"Time":"2025-01-01T00:00:00Z","Action":"run","Package":"example.com/m","Test":"TestOk"}
{"Time":"2025-01-01T00:00:00Z","Action":"output","Package":"example.com/m","Test":"TestOk","Output":"=== RUN   TestOk\n"}
{"Time":"2025-01-01T00:00:00Z","Action":"pass","Package":"example.com/m","Test":"TestOk","Elapsed":0.01}
{"Time":"2025-01-01T00:00:00Z","Action":"run","Package":"example.com/m","Test":"TestBad"}
{"Time":"2025-01-01T00:00:00Z","Action":"output","Package":"example.com/m","Test":"TestBad","Output":"    m_test.go:9: boom\n"}
{"Time":"2025-01-01T00:00:00Z","Action":"fail","Package":"example.com/m","Test":"TestBad","Elapsed":0.02}
{"Time":"2025-01-01T00:00:00Z","Action":"skip","Package":"example.com/m","Test":"TestLater","Elapsed":0}
{"Time":"2025-01-01T00:00:00Z","Action":"fail","Package":"example.com/m","Elapsed":0.05}
"#;

    #[test]
    fn test_counts_test_level_events() {
        let suite = parse_go_test_json(STREAM).unwrap();
        assert_eq!(suite.total, 3);
        assert_eq!(suite.passed, 1);
        assert_eq!(suite.failed, 1);
        assert_eq!(suite.skipped, 1);

        let bad = suite.cases.iter().find(|c| c.name == "TestBad").unwrap();
        assert_eq!(bad.package, "example.com/m");
        assert!(bad.output.contains("boom"));
        assert!((bad.duration_seconds - 0.02).abs() < f64::EPSILON);

        let ok = suite.cases.iter().find(|c| c.name == "TestOk").unwrap();
        assert!(ok.output.is_empty());
    }

    #[test]
    fn test_rejects_non_json_report() {
        assert!(parse_go_test_json("PASS\nok  example.com/m 0.1s\n").is_err());
        assert_eq!(parse_go_test_json("").unwrap().total, 0);
    }
}

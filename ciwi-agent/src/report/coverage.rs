//! Coverage summaries: Go coverprofiles and LCOV tracefiles

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use ciwi_core::domain::test_report::{CoverageFile, CoverageReport};

fn percent(covered: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = covered as f64 * 100.0 / total as f64;
    (raw * 100.0).round() / 100.0
}

fn summarize(files: BTreeMap<String, (u64, u64)>) -> CoverageReport {
    let mut report = CoverageReport::default();
    for (path, (total, covered)) in files {
        report.total_statements += total;
        report.covered_statements += covered;
        report.files.push(CoverageFile {
            path,
            total_statements: total,
            covered_statements: covered,
        });
    }
    report.percent = percent(report.covered_statements, report.total_statements);
    report
}

/// Parses a `go test -coverprofile` file
///
/// Lines are `file:start.col,end.col statements count`. Blocks repeated by
/// multi-package runs count once, covered if any run hit them.
pub fn parse_go_coverprofile(text: &str) -> Result<CoverageReport> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    match lines.next() {
        Some(header) if header.starts_with("mode:") => {}
        None => return Ok(CoverageReport::default()),
        Some(_) => bail!("coverprofile is missing its mode line"),
    }

    // block -> (statements, hit)
    let mut blocks: BTreeMap<&str, (u64, bool)> = BTreeMap::new();
    for line in lines {
        if line.starts_with("mode:") {
            continue;
        }
        let mut fields = line.rsplitn(3, ' ');
        let (Some(count), Some(stmts), Some(block)) = (fields.next(), fields.next(), fields.next())
        else {
            bail!("malformed coverprofile line: {line}");
        };
        let (Ok(count), Ok(stmts)) = (count.parse::<u64>(), stmts.parse::<u64>()) else {
            bail!("malformed coverprofile line: {line}");
        };
        let entry = blocks.entry(block).or_insert((stmts, false));
        entry.1 |= count > 0;
    }

    let mut files: BTreeMap<String, (u64, u64)> = BTreeMap::new();
    for (block, (stmts, hit)) in blocks {
        let file = block.rsplit_once(':').map(|(f, _)| f).unwrap_or(block);
        let entry = files.entry(file.to_string()).or_default();
        entry.0 += stmts;
        if hit {
            entry.1 += stmts;
        }
    }
    Ok(summarize(files))
}

/// Parses an LCOV tracefile using its `DA` line records
///
/// Falls back to the `LF`/`LH` summary of a record without `DA` lines.
pub fn parse_lcov(text: &str) -> Result<CoverageReport> {
    let mut files: BTreeMap<String, (u64, u64)> = BTreeMap::new();
    let mut current: Option<String> = None;
    let mut da: (u64, u64) = (0, 0);
    let mut summary: (u64, u64) = (0, 0);

    for line in text.lines().map(str::trim) {
        if let Some(path) = line.strip_prefix("SF:") {
            current = Some(path.to_string());
            da = (0, 0);
            summary = (0, 0);
        } else if let Some(rest) = line.strip_prefix("DA:") {
            let hits = rest.split(',').nth(1).and_then(|h| h.trim().parse::<u64>().ok());
            let Some(hits) = hits else {
                bail!("malformed lcov line: {line}");
            };
            da.0 += 1;
            if hits > 0 {
                da.1 += 1;
            }
        } else if let Some(found) = line.strip_prefix("LF:") {
            summary.0 = found.trim().parse().unwrap_or_default();
        } else if let Some(hit) = line.strip_prefix("LH:") {
            summary.1 = hit.trim().parse().unwrap_or_default();
        } else if line == "end_of_record" {
            let Some(path) = current.take() else {
                bail!("lcov record ends without a source file");
            };
            let counts = if da.0 > 0 { da } else { summary };
            let entry = files.entry(path).or_default();
            entry.0 += counts.0;
            entry.1 += counts.1;
        }
    }
    Ok(summarize(files))
}

/// Folds `next` into `into`, recomputing totals over the union of files
pub fn merge_coverage(into: &mut Option<CoverageReport>, next: CoverageReport) {
    let Some(existing) = into.take() else {
        *into = Some(next);
        return;
    };
    let format = if existing.format == next.format {
        existing.format.clone()
    } else {
        "mixed".to_string()
    };
    let mut files: BTreeMap<String, (u64, u64)> = BTreeMap::new();
    for file in existing.files.into_iter().chain(next.files) {
        let entry = files.entry(file.path).or_default();
        entry.0 += file.total_statements;
        entry.1 += file.covered_statements;
    }
    let mut merged = summarize(files);
    merged.format = format;
    *into = Some(merged);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_go_coverprofile_dedupes_blocks() {
        let profile = "mode: set\n\
            example.com/m/a.go:3.14,5.2 2 1\n\
            example.com/m/a.go:7.10,9.2 3 0\n\
            example.com/m/b.go:1.1,2.2 5 0\n\
            example.com/m/b.go:1.1,2.2 5 1\n";
        let report = parse_go_coverprofile(profile).unwrap();
        assert_eq!(report.total_statements, 10);
        assert_eq!(report.covered_statements, 7);
        assert!((report.percent - 70.0).abs() < f64::EPSILON);
        assert_eq!(report.files.len(), 2);
        assert_eq!(report.files[0].path, "example.com/m/a.go");
        assert_eq!(report.files[0].covered_statements, 2);
    }

    #[test]
    fn test_go_coverprofile_requires_mode() {
        assert!(parse_go_coverprofile("a.go:1.1,2.2 1 1\n").is_err());
    }

    #[test]
    fn test_lcov_records() {
        let lcov = "TN:\nSF:src/lib.rs\nDA:1,4\nDA:2,0\nDA:3,1\nLF:3\nLH:2\nend_of_record\n\
            SF:src/main.rs\nLF:4\nLH:1\nend_of_record\n";
        let report = parse_lcov(lcov).unwrap();
        assert_eq!(report.total_statements, 7);
        assert_eq!(report.covered_statements, 3);
        assert!((report.percent - 42.86).abs() < 1e-9);
        assert_eq!(report.files[1].path, "src/main.rs");
        assert_eq!(report.files[1].total_statements, 4);
    }

    #[test]
    fn test_merge_unions_files() {
        let mut into = None;
        merge_coverage(&mut into, parse_lcov("SF:a\nDA:1,1\nend_of_record\n").unwrap());
        merge_coverage(&mut into, parse_lcov("SF:a\nDA:2,0\nend_of_record\nSF:b\nDA:1,1\nend_of_record\n").unwrap());
        let merged = into.unwrap();
        assert_eq!(merged.files.len(), 2);
        assert_eq!(merged.total_statements, 3);
        assert_eq!(merged.covered_statements, 2);
    }
}

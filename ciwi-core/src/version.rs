//! Semantic version parsing and ordering
//!
//! Accepts `[v]MAJOR[.MINOR[.PATCH]][-PRERELEASE][+BUILD]`; missing minor or
//! patch components count as zero. Build metadata is ignored when comparing.

use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static TOOL_VERSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+){1,3}").expect("tool version regex is valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Vec<PreIdentifier>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreIdentifier {
    Numeric(u64),
    Alpha(String),
}

impl Version {
    /// Parses a version, returning `None` when it is not valid semver
    pub fn parse(input: &str) -> Option<Self> {
        let s = input.trim();
        let s = s.strip_prefix('v').unwrap_or(s);
        if s.is_empty() {
            return None;
        }

        let s = match s.split_once('+') {
            Some((head, build)) => {
                if build.is_empty() || !build.split('.').all(is_valid_identifier) {
                    return None;
                }
                head
            }
            None => s,
        };

        let (core, pre) = match s.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (s, None),
        };

        let mut parts = core.split('.');
        let major = parse_numeric(parts.next()?)?;
        let minor = match parts.next() {
            Some(p) => parse_numeric(p)?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(p) => parse_numeric(p)?,
            None => 0,
        };
        if parts.next().is_some() {
            return None;
        }

        let pre = match pre {
            Some(pre) => {
                if pre.is_empty() {
                    return None;
                }
                let mut ids = Vec::new();
                for id in pre.split('.') {
                    if !is_valid_identifier(id) {
                        return None;
                    }
                    if id.bytes().all(|b| b.is_ascii_digit()) {
                        ids.push(PreIdentifier::Numeric(parse_numeric(id)?));
                    } else {
                        ids.push(PreIdentifier::Alpha(id.to_string()));
                    }
                }
                ids
            }
            None => Vec::new(),
        };

        Some(Self {
            major,
            minor,
            patch,
            pre,
        })
    }
}

fn parse_numeric(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if s.len() > 1 && s.starts_with('0') {
        return None;
    }
    s.parse().ok()
}

fn is_valid_identifier(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| compare_pre(&self.pre, &other.pre))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn compare_pre(a: &[PreIdentifier], b: &[PreIdentifier]) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = match (x, y) {
            (PreIdentifier::Numeric(x), PreIdentifier::Numeric(y)) => x.cmp(y),
            (PreIdentifier::Numeric(_), PreIdentifier::Alpha(_)) => Ordering::Less,
            (PreIdentifier::Alpha(_), PreIdentifier::Numeric(_)) => Ordering::Greater,
            (PreIdentifier::Alpha(x), PreIdentifier::Alpha(y)) => x.cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)?;
        for (i, id) in self.pre.iter().enumerate() {
            f.write_str(if i == 0 { "-" } else { "." })?;
            match id {
                PreIdentifier::Numeric(n) => write!(f, "{n}")?,
                PreIdentifier::Alpha(s) => f.write_str(s)?,
            }
        }
        Ok(())
    }
}

/// True when `candidate` is a valid version strictly greater than `current`
///
/// An invalid `current` (for example a `dev` build) is treated as older
/// than any valid candidate.
pub fn is_version_newer(candidate: &str, current: &str) -> bool {
    let Some(candidate) = Version::parse(candidate) else {
        return false;
    };
    match Version::parse(current) {
        Some(current) => candidate > current,
        None => true,
    }
}

/// Extracts the first `major.minor[.patch[.build]]` run of digits from tool output
pub fn extract_version(output: &str) -> Option<String> {
    TOOL_VERSION_REGEX
        .find(output)
        .map(|m| m.as_str().to_string())
}

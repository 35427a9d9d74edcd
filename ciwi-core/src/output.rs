//! Job output helpers: tail trimming, redaction and control markers

/// Maximum bytes of job output kept by agent and server
pub const MAX_OUTPUT_BYTES: usize = 256 * 1024;

/// Replacement for redacted secret values
pub const REDACTED: &str = "***";

/// Keeps at most the last `max_bytes` bytes of `output`
///
/// The cut moves forward to the next character boundary so the result is
/// always valid UTF-8 and never longer than `max_bytes`.
pub fn trim_output_tail(output: &str, max_bytes: usize) -> &str {
    if output.len() <= max_bytes {
        return output;
    }
    let mut start = output.len() - max_bytes;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    &output[start..]
}

/// Replaces every occurrence of each sensitive value with `***`
///
/// Longer values are replaced first so a secret that contains another
/// secret is not left partially visible.
pub fn redact(output: &str, sensitive_values: &[String]) -> String {
    let mut values: Vec<&str> = sensitive_values
        .iter()
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .collect();
    if values.is_empty() {
        return output.to_string();
    }
    values.sort_by_key(|v| std::cmp::Reverse(v.len()));
    values.dedup();

    let mut redacted = output.to_string();
    for value in values {
        if redacted.contains(value) {
            redacted = redacted.replace(value, REDACTED);
        }
    }
    redacted
}

/// Redacts, then trims to the output budget
pub fn prepare_output(output: &str, sensitive_values: &[String]) -> String {
    let redacted = redact(output, sensitive_values);
    trim_output_tail(&redacted, MAX_OUTPUT_BYTES).to_string()
}

/// Appends a `[control] <reason>` line, preserving the existing tail
pub fn append_control_line(output: &str, reason: &str) -> String {
    let existing = output.trim_end_matches('\n');
    let combined = if existing.is_empty() {
        format!("[control] {reason}")
    } else {
        format!("{existing}\n[control] {reason}")
    };
    trim_output_tail(&combined, MAX_OUTPUT_BYTES).to_string()
}

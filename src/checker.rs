//! Output comparison for graded cases
//!
//! Checkers only compare text. Deciding between TLE/MLE/RTE and running the
//! comparison at all is the grader's job.

use serde::{Deserialize, Serialize};

/// Comparison strategy selected by the problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckerKind {
    /// Ignores trailing whitespace on each line and trailing blank lines
    #[default]
    Standard,
    /// Byte-for-byte
    Identical,
}

impl CheckerKind {
    pub fn check(self, actual: &str, expected: &str) -> bool {
        match self {
            CheckerKind::Standard => compare_output(actual, expected),
            CheckerKind::Identical => actual == expected,
        }
    }
}

/// Compare program output with expected output
pub fn compare_output(actual: &str, expected: &str) -> bool {
    fn significant_lines(s: &str) -> Vec<&str> {
        let mut lines: Vec<&str> = s.lines().map(str::trim_end).collect();
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        lines
    }

    significant_lines(actual) == significant_lines(expected)
}

/// Cut output down to `limit` bytes on a char boundary.
/// Returns the kept text and whether anything was dropped.
pub fn truncate_output(output: &str, limit: usize) -> (String, bool) {
    if output.len() <= limit {
        return (output.to_string(), false);
    }
    let mut end = limit;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    (output[..end].to_string(), true)
}

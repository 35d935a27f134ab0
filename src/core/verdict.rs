//! Case results and their status bitmask
//!
//! A `CaseResult` is produced once per graded case and never mutated. Its
//! status is a bitmask: several codes can be set at once, the first one in
//! display order is the primary verdict and the rest are auxiliary flags.

use serde::Serialize;
use std::fmt;

use super::problem::Case;

/// Status bitmask of a case result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct Verdict(u32);

impl Verdict {
    pub const ACCEPTED: Verdict = Verdict(0);
    pub const WRONG_ANSWER: Verdict = Verdict(1 << 0);
    pub const RUNTIME_ERROR: Verdict = Verdict(1 << 1);
    pub const TIME_LIMIT_EXCEEDED: Verdict = Verdict(1 << 2);
    pub const MEMORY_LIMIT_EXCEEDED: Verdict = Verdict(1 << 3);
    pub const INVALID_RETURN: Verdict = Verdict(1 << 4);
    pub const SHORT_CIRCUIT: Verdict = Verdict(1 << 5);
    pub const OUTPUT_LIMIT_EXCEEDED: Verdict = Verdict(1 << 6);
    pub const COMPILE_ERROR: Verdict = Verdict(1 << 7);
    pub const INTERNAL_ERROR: Verdict = Verdict(1 << 30);

    /// Codes in the order they are presented; earlier codes win the primary slot.
    const DISPLAY_ORDER: [(Verdict, &'static str); 9] = [
        (Verdict::INTERNAL_ERROR, "IE"),
        (Verdict::COMPILE_ERROR, "CE"),
        (Verdict::TIME_LIMIT_EXCEEDED, "TLE"),
        (Verdict::MEMORY_LIMIT_EXCEEDED, "MLE"),
        (Verdict::OUTPUT_LIMIT_EXCEEDED, "OLE"),
        (Verdict::RUNTIME_ERROR, "RTE"),
        (Verdict::INVALID_RETURN, "IR"),
        (Verdict::WRONG_ANSWER, "WA"),
        (Verdict::SHORT_CIRCUIT, "SC"),
    ];

    pub fn contains(self, other: Verdict) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Verdict) {
        self.0 |= other.0;
    }

    pub fn is_accepted(self) -> bool {
        self.0 == 0
    }

    /// Every set code in display order, or `["AC"]` when nothing is set
    pub fn readable_codes(self) -> Vec<&'static str> {
        let codes: Vec<&'static str> = Self::DISPLAY_ORDER
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, code)| *code)
            .collect();

        if codes.is_empty() {
            vec!["AC"]
        } else {
            codes
        }
    }

    /// The primary verdict code
    pub fn primary_code(self) -> &'static str {
        Self::DISPLAY_ORDER
            .iter()
            .find(|(flag, _)| self.contains(*flag))
            .map(|(_, code)| *code)
            .unwrap_or("AC")
    }
}

impl std::ops::BitOr for Verdict {
    type Output = Verdict;

    fn bitor(self, rhs: Verdict) -> Verdict {
        Verdict(self.0 | rhs.0)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary_code())
    }
}

/// Outcome of grading one case
#[derive(Debug, Clone)]
pub struct CaseResult {
    pub verdict: Verdict,
    /// CPU time in seconds
    pub execution_time: f64,
    /// Peak memory in KiB
    pub max_memory: u64,
    pub output: String,
    pub feedback: Option<String>,
    pub points: f64,
    /// Position of the originating case (1-based)
    pub position: u32,
    pub batch: Option<u32>,
}

impl CaseResult {
    /// Result for a case that was skipped because its batch already failed
    pub fn short_circuited(case: &Case) -> Self {
        Self {
            verdict: Verdict::SHORT_CIRCUIT,
            execution_time: 0.0,
            max_memory: 0,
            output: String::new(),
            feedback: None,
            points: 0.0,
            position: case.position,
            batch: case.batch,
        }
    }

    pub fn is_short_circuited(&self) -> bool {
        self.verdict.contains(Verdict::SHORT_CIRCUIT)
    }

    /// Time to present; `None` for short-circuited cases
    pub fn reported_time(&self) -> Option<f64> {
        (!self.is_short_circuited()).then_some(self.execution_time)
    }

    /// Memory to present; `None` for short-circuited cases
    pub fn reported_memory(&self) -> Option<u64> {
        (!self.is_short_circuited()).then_some(self.max_memory)
    }

    /// One console line for this result, indented inside batches
    pub fn render(&self) -> String {
        let codes = self.verdict.readable_codes();
        let primary = if codes[0] == "SC" { "--" } else { codes[0] };
        let padding = if self.batch.is_some() { "  " } else { "" };

        if self.is_short_circuited() {
            return format!("{}Test case {:>2} {:<3}", padding, self.position, primary);
        }

        let feedback = self
            .feedback
            .as_deref()
            .map(|f| format!("({}) ", f))
            .unwrap_or_default();
        let aux = if codes.len() > 1 {
            format!("{{{}}}", codes[1..].join(", "))
        } else {
            String::new()
        };

        format!(
            "{}Test case {:>2} {:<3} [{:.3}s | {}kb] {}{}",
            padding, self.position, primary, self.execution_time, self.max_memory, feedback, aux
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(verdict: Verdict) -> CaseResult {
        CaseResult {
            verdict,
            execution_time: 0.125,
            max_memory: 2048,
            output: "42\n".into(),
            feedback: None,
            points: 0.0,
            position: 3,
            batch: None,
        }
    }

    #[test]
    fn test_accepted_has_single_code() {
        assert_eq!(Verdict::ACCEPTED.readable_codes(), vec!["AC"]);
        assert_eq!(Verdict::ACCEPTED.primary_code(), "AC");
        assert!(Verdict::ACCEPTED.is_accepted());
    }

    #[test]
    fn test_codes_follow_display_order() {
        let verdict = Verdict::WRONG_ANSWER | Verdict::OUTPUT_LIMIT_EXCEEDED;
        assert_eq!(verdict.readable_codes(), vec!["OLE", "WA"]);
        assert_eq!(verdict.primary_code(), "OLE");

        let verdict = Verdict::SHORT_CIRCUIT | Verdict::TIME_LIMIT_EXCEEDED;
        assert_eq!(verdict.readable_codes(), vec!["TLE", "SC"]);
    }

    #[test]
    fn test_verdict_serializes_as_bits() {
        let verdict = Verdict::RUNTIME_ERROR | Verdict::SHORT_CIRCUIT;
        assert_eq!(serde_json::to_string(&verdict).unwrap(), "34");
    }

    #[test]
    fn test_short_circuit_hides_resources() {
        let mut r = result(Verdict::SHORT_CIRCUIT);
        r.batch = Some(1);
        assert_eq!(r.reported_time(), None);
        assert_eq!(r.reported_memory(), None);
        assert_eq!(r.render(), "  Test case  3 -- ");
    }

    #[test]
    fn test_render_with_aux_codes_and_feedback() {
        let mut r = result(Verdict::WRONG_ANSWER | Verdict::OUTPUT_LIMIT_EXCEEDED);
        r.feedback = Some("line 2 differs".into());
        assert_eq!(
            r.render(),
            "Test case  3 OLE [0.125s | 2048kb] (line 2 differs) {WA}"
        );
        assert_eq!(r.reported_time(), Some(0.125));
    }
}

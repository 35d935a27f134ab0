//! Outbound status packets
//!
//! The engine talks to a `Reporter` through a per-job `PacketManager`, which
//! stamps every packet with the job's identity and enforces the stream shape:
//! an open batch is closed before the terminal packet, and nothing follows
//! the terminal packet. Delivery itself is fire-and-forget.

pub mod redis;

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::core::ansi::strip_ansi;
use crate::core::verdict::{CaseResult, Verdict};

pub use self::redis::RedisReporter;

/// Payload of one packet, tagged by `name`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "name",
    rename_all = "kebab-case",
    rename_all_fields = "kebab-case"
)]
pub enum PacketKind {
    BeginGrading,
    BatchBegin,
    BatchEnd,
    TestCaseStatus(CaseStatus),
    GradingEnd,
    CompileError { log: String },
    InternalError { message: String },
    SubmissionTerminated,
    InvocationBegin,
    InvocationEnd { result: CaseStatus },
    SupportedProblems { problems: Vec<i64>, languages: Vec<String> },
}

impl PacketKind {
    /// Whether this packet closes a job's stream
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PacketKind::GradingEnd
                | PacketKind::CompileError { .. }
                | PacketKind::InternalError { .. }
                | PacketKind::SubmissionTerminated
                | PacketKind::InvocationEnd { .. }
        )
    }
}

/// Wire form of a case result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CaseStatus {
    pub position: u32,
    pub batch: Option<u32>,
    /// Raw status bitmask
    pub status: Verdict,
    /// Readable codes, primary first
    pub codes: Vec<&'static str>,
    /// Seconds; absent for short-circuited cases
    pub time: Option<f64>,
    /// KiB; absent for short-circuited cases
    pub memory: Option<u64>,
    pub points: f64,
    pub output: String,
    pub feedback: Option<String>,
}

impl From<&CaseResult> for CaseStatus {
    fn from(result: &CaseResult) -> Self {
        Self {
            position: result.position,
            batch: result.batch,
            status: result.verdict,
            codes: result.verdict.readable_codes(),
            time: result.reported_time(),
            memory: result.reported_memory(),
            points: result.points,
            output: result.output.clone(),
            feedback: result.feedback.clone(),
        }
    }
}

/// Packet envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Packet {
    #[serde(flatten)]
    pub kind: PacketKind,
    pub submission_id: Option<i64>,
    pub submission_type: Option<String>,
    pub worker: String,
}

impl Packet {
    /// Worker-level announcement of what it can grade
    pub fn supported_problems(
        worker: impl Into<String>,
        problems: Vec<i64>,
        languages: Vec<String>,
    ) -> Self {
        Self {
            kind: PacketKind::SupportedProblems {
                problems,
                languages,
            },
            submission_id: None,
            submission_type: None,
            worker: worker.into(),
        }
    }
}

/// Sink for packets. Must not block; delivery failures stay inside.
pub trait Reporter: Send + Sync {
    fn deliver(&self, packet: Packet);
}

/// Packet stream of one job
pub struct PacketManager {
    reporter: Arc<dyn Reporter>,
    submission_id: i64,
    submission_type: String,
    worker: String,
    batch_open: bool,
    finished: bool,
}

impl PacketManager {
    pub fn new(
        reporter: Arc<dyn Reporter>,
        submission_id: i64,
        submission_type: impl Into<String>,
        worker: impl Into<String>,
    ) -> Self {
        Self {
            reporter,
            submission_id,
            submission_type: submission_type.into(),
            worker: worker.into(),
            batch_open: false,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn send(&mut self, kind: PacketKind) {
        if self.finished {
            warn!(
                "Dropping {:?} for submission {}: stream already finished",
                kind, self.submission_id
            );
            return;
        }

        match &kind {
            PacketKind::BatchBegin if self.batch_open => self.emit(PacketKind::BatchEnd),
            PacketKind::BatchBegin => {}
            PacketKind::BatchEnd if !self.batch_open => return,
            kind if kind.is_terminal() && self.batch_open => self.emit(PacketKind::BatchEnd),
            _ => {}
        }

        match &kind {
            PacketKind::BatchBegin => self.batch_open = true,
            kind if kind.is_terminal() => self.finished = true,
            _ => {}
        }
        self.emit(kind);
    }

    fn emit(&mut self, kind: PacketKind) {
        if kind == PacketKind::BatchEnd {
            self.batch_open = false;
        }
        self.reporter.deliver(Packet {
            kind,
            submission_id: Some(self.submission_id),
            submission_type: Some(self.submission_type.clone()),
            worker: self.worker.clone(),
        });
    }

    pub fn begin_grading(&mut self) {
        self.send(PacketKind::BeginGrading);
    }

    pub fn batch_begin(&mut self) {
        self.send(PacketKind::BatchBegin);
    }

    pub fn batch_end(&mut self) {
        self.send(PacketKind::BatchEnd);
    }

    pub fn test_case_status(&mut self, result: &CaseResult) {
        self.send(PacketKind::TestCaseStatus(result.into()));
    }

    pub fn grading_end(&mut self) {
        self.send(PacketKind::GradingEnd);
    }

    pub fn compile_error(&mut self, log: &str) {
        self.send(PacketKind::CompileError {
            log: strip_ansi(log),
        });
    }

    pub fn internal_error(&mut self, message: &str) {
        self.send(PacketKind::InternalError {
            message: strip_ansi(message),
        });
    }

    pub fn submission_terminated(&mut self) {
        self.send(PacketKind::SubmissionTerminated);
    }

    pub fn invocation_begin(&mut self) {
        self.send(PacketKind::InvocationBegin);
    }

    pub fn invocation_end(&mut self, result: &CaseResult) {
        self.send(PacketKind::InvocationEnd {
            result: result.into(),
        });
    }
}

/// Keeps every packet in memory
#[cfg(test)]
#[derive(Default)]
pub struct RecordingReporter {
    packets: parking_lot::Mutex<Vec<Packet>>,
}

#[cfg(test)]
impl RecordingReporter {
    pub fn packets(&self) -> Vec<Packet> {
        self.packets.lock().clone()
    }

    pub fn kinds(&self) -> Vec<PacketKind> {
        self.packets().into_iter().map(|p| p.kind).collect()
    }

    /// Packet names in order, e.g. `["begin-grading", "grading-end"]`
    pub fn names(&self) -> Vec<String> {
        self.packets()
            .iter()
            .map(|p| {
                serde_json::to_value(p).unwrap()["name"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect()
    }
}

#[cfg(test)]
impl Reporter for RecordingReporter {
    fn deliver(&self, packet: Packet) {
        self.packets.lock().push(packet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> (Arc<RecordingReporter>, PacketManager) {
        let reporter = Arc::new(RecordingReporter::default());
        let manager = PacketManager::new(reporter.clone(), 5, "contest", "judge-1");
        (reporter, manager)
    }

    fn accepted(position: u32) -> CaseResult {
        CaseResult {
            verdict: Verdict::ACCEPTED,
            execution_time: 0.5,
            max_memory: 1024,
            output: "ok".into(),
            feedback: None,
            points: 1.0,
            position,
            batch: None,
        }
    }

    #[test]
    fn test_packet_envelope_shape() {
        let (reporter, mut manager) = manager();
        manager.test_case_status(&accepted(1));

        let value = serde_json::to_value(&reporter.packets()[0]).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "test-case-status",
                "submission-id": 5,
                "submission-type": "contest",
                "worker": "judge-1",
                "position": 1,
                "batch": null,
                "status": 0,
                "codes": ["AC"],
                "time": 0.5,
                "memory": 1024,
                "points": 1.0,
                "output": "ok",
                "feedback": null
            })
        );
    }

    #[test]
    fn test_short_circuit_status_has_empty_resources() {
        let (reporter, mut manager) = manager();
        let mut result = accepted(2);
        result.verdict = Verdict::SHORT_CIRCUIT;
        manager.test_case_status(&result);

        let value = serde_json::to_value(&reporter.packets()[0]).unwrap();
        assert!(value["time"].is_null());
        assert!(value["memory"].is_null());
        assert_eq!(value["codes"], json!(["SC"]));
    }

    #[test]
    fn test_terminal_closes_open_batch() {
        let (reporter, mut manager) = manager();
        manager.begin_grading();
        manager.batch_begin();
        manager.test_case_status(&accepted(1));
        manager.submission_terminated();

        assert_eq!(
            reporter.names(),
            vec![
                "begin-grading",
                "batch-begin",
                "test-case-status",
                "batch-end",
                "submission-terminated"
            ]
        );
    }

    #[test]
    fn test_nothing_after_terminal() {
        let (reporter, mut manager) = manager();
        manager.begin_grading();
        manager.grading_end();
        manager.test_case_status(&accepted(1));
        manager.internal_error("late");

        assert!(manager.is_finished());
        assert_eq!(reporter.names(), vec!["begin-grading", "grading-end"]);
    }

    #[test]
    fn test_compile_error_is_stripped() {
        let (reporter, mut manager) = manager();
        manager.compile_error("\x1b[31merror:\x1b[0m expected ';'");

        assert_eq!(
            reporter.kinds(),
            vec![PacketKind::CompileError {
                log: "error: expected ';'".into()
            }]
        );
    }

    #[test]
    fn test_unmatched_batch_end_is_ignored() {
        let (reporter, mut manager) = manager();
        manager.batch_end();
        manager.batch_begin();
        manager.batch_begin();

        assert_eq!(
            reporter.names(),
            vec!["batch-begin", "batch-end", "batch-begin"]
        );
    }

    #[test]
    fn test_supported_problems_packet() {
        let packet = Packet::supported_problems("judge-1", vec![1, 2], vec!["cpp".into()]);
        let value = serde_json::to_value(&packet).unwrap();
        assert_eq!(value["name"], "supported-problems");
        assert_eq!(value["problems"], json!([1, 2]));
        assert!(value["submission-id"].is_null());
    }
}

//! Lazy walk over a problem's cases
//!
//! Each call to `next` grades at most one case. Batch markers are synthesized
//! whenever batch membership changes between consecutive cases, and the
//! cancellation token is checked before every case. Once a case in a
//! short-circuiting scope fails, the rest of that scope is reported as
//! short-circuited without being run: a batch is its own scope, ungrouped
//! cases share one scope for the whole sequence.

use std::iter::Peekable;
use std::slice::Iter;

use tokio_util::sync::CancellationToken;

use crate::core::problem::Case;
use crate::core::verdict::CaseResult;
use crate::error::GradingError;
use crate::grader::Grader;

#[derive(Debug, Clone)]
pub enum GradingEvent {
    BatchBegin(u32),
    BatchEnd(u32),
    Case(CaseResult),
}

pub struct CaseStream<'a> {
    grader: &'a dyn Grader,
    cases: Peekable<Iter<'a, Case>>,
    cancel: &'a CancellationToken,
    open_batch: Option<u32>,
    batch_failed: bool,
    ungrouped_failed: bool,
    done: bool,
}

impl<'a> CaseStream<'a> {
    pub fn new(grader: &'a dyn Grader, cases: &'a [Case], cancel: &'a CancellationToken) -> Self {
        Self {
            grader,
            cases: cases.iter().peekable(),
            cancel,
            open_batch: None,
            batch_failed: false,
            ungrouped_failed: false,
            done: false,
        }
    }

    /// Next event, `Err` once on termination or failure, then `None`
    pub async fn next(&mut self) -> Option<Result<GradingEvent, GradingError>> {
        if self.done {
            return None;
        }

        let Some(case) = self.cases.peek().copied() else {
            self.done = true;
            return self.open_batch.take().map(|b| Ok(GradingEvent::BatchEnd(b)));
        };

        if case.batch != self.open_batch {
            if let Some(batch) = self.open_batch.take() {
                return Some(Ok(GradingEvent::BatchEnd(batch)));
            }
        }

        if self.cancel.is_cancelled() {
            return self.fail(GradingError::Terminated);
        }

        if case.batch != self.open_batch {
            if let Some(batch) = case.batch {
                self.open_batch = Some(batch);
                self.batch_failed = false;
                return Some(Ok(GradingEvent::BatchBegin(batch)));
            }
        }

        self.cases.next();

        let scope_failed = match case.batch {
            Some(_) => self.batch_failed,
            None => self.ungrouped_failed,
        };
        if scope_failed && case.short_circuit {
            return Some(Ok(GradingEvent::Case(CaseResult::short_circuited(case))));
        }

        let result = match self.grader.grade(case).await {
            Ok(result) => result,
            Err(e) => return self.fail(e),
        };

        // A run killed by termination says nothing about the submission
        if self.cancel.is_cancelled() {
            return self.fail(GradingError::Terminated);
        }

        if case.short_circuit && !result.verdict.is_accepted() {
            match case.batch {
                Some(_) => self.batch_failed = true,
                None => self.ungrouped_failed = true,
            }
        }

        Some(Ok(GradingEvent::Case(result)))
    }

    fn fail(&mut self, err: GradingError) -> Option<Result<GradingEvent, GradingError>> {
        self.done = true;
        Some(Err(err))
    }
}

//! Single unchecked case for custom invocations
//!
//! Runs the program once on the supplied input and keeps its output. Only the
//! way the program ended can turn the result into a failure.

use std::sync::Arc;

use async_trait::async_trait;

use super::{execution_verdict, ExecutionUnit, Grader};
use crate::checker::truncate_output;
use crate::core::problem::{Case, Problem};
use crate::core::verdict::{CaseResult, Verdict};
use crate::error::GradingError;
use crate::executor::{Executor, RunLimits};

pub struct InvocationGrader {
    unit: ExecutionUnit,
    problem: Arc<Problem>,
}

impl InvocationGrader {
    pub fn new(executor: Arc<dyn Executor>, problem: Arc<Problem>) -> Self {
        Self {
            unit: ExecutionUnit::new(executor),
            problem,
        }
    }
}

#[async_trait]
impl Grader for InvocationGrader {
    async fn compile(&self, source: &str) -> Result<(), GradingError> {
        self.unit.compile(source).await
    }

    async fn grade(&self, case: &Case) -> Result<CaseResult, GradingError> {
        let input = case.input.load(None).await?;
        let limits = RunLimits {
            time: self.problem.time_limit,
            memory_kb: self.problem.memory_limit,
        };
        let outcome = self.unit.run(&limits, &input).await?;

        let (mut verdict, mut feedback) = execution_verdict(outcome.status);
        let (output, truncated) = truncate_output(&outcome.stdout, self.problem.output_limit);
        if truncated {
            verdict.insert(Verdict::OUTPUT_LIMIT_EXCEEDED);
        }
        if !outcome.stderr.is_empty() && !verdict.is_accepted() {
            feedback = Some(match feedback {
                Some(reason) => format!("{}: {}", reason, outcome.stderr.trim_end()),
                None => outcome.stderr.trim_end().to_string(),
            });
        }

        Ok(CaseResult {
            verdict,
            execution_time: outcome.time,
            max_memory: outcome.memory_kb,
            output,
            feedback,
            points: 0.0,
            position: case.position,
            batch: case.batch,
        })
    }

    fn terminate(&self) {
        self.unit.abort();
    }
}

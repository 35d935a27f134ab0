//! Graders turn one case into one `CaseResult`
//!
//! A grader owns the compiled program of its job and the abort switch of the
//! executor running it. `terminate` may be called from any task; it kills the
//! in-flight execution unit and makes every later run fail fast.

mod invocation;
mod standard;

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use nix::sys::signal::Signal;
use tokio_util::sync::CancellationToken;

use crate::core::problem::Case;
use crate::core::verdict::{CaseResult, Verdict};
use crate::error::GradingError;
use crate::executor::{Executor, Program, RunLimits, RunOutcome, RunStatus};

pub use invocation::InvocationGrader;
pub use standard::StandardGrader;

#[async_trait]
pub trait Grader: Send + Sync {
    /// Build the runnable program; `GradingError::Compile` carries the diagnostic
    async fn compile(&self, source: &str) -> Result<(), GradingError>;

    /// Grade exactly one case
    async fn grade(&self, case: &Case) -> Result<CaseResult, GradingError>;

    /// Abort the in-flight execution unit, if any
    fn terminate(&self);
}

/// Program of one job plus the executor and abort switch that run it
pub(crate) struct ExecutionUnit {
    executor: Arc<dyn Executor>,
    program: OnceLock<Program>,
    abort: CancellationToken,
}

impl ExecutionUnit {
    pub(crate) fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            program: OnceLock::new(),
            abort: CancellationToken::new(),
        }
    }

    pub(crate) async fn compile(&self, source: &str) -> Result<(), GradingError> {
        if self.abort.is_cancelled() {
            return Err(GradingError::Terminated);
        }
        let program = self.executor.compile(source, &self.abort).await?;
        if self.program.set(program).is_err() {
            return Err(anyhow::anyhow!("program compiled twice").into());
        }
        Ok(())
    }

    pub(crate) async fn run(
        &self,
        limits: &RunLimits,
        input: &str,
    ) -> Result<RunOutcome, GradingError> {
        let program = self
            .program
            .get()
            .ok_or_else(|| anyhow::anyhow!("case graded before compilation"))?;
        Ok(self.executor.run(program, limits, input, &self.abort).await?)
    }

    pub(crate) fn abort(&self) {
        self.abort.cancel();
    }
}

/// Verdict flags and feedback implied by how the program ended
pub(crate) fn execution_verdict(status: RunStatus) -> (Verdict, Option<String>) {
    match status {
        RunStatus::Exited(0) => (Verdict::ACCEPTED, None),
        RunStatus::Exited(code) => (
            Verdict::INVALID_RETURN,
            Some(format!("exited with code {}", code)),
        ),
        RunStatus::TimeLimitExceeded => (Verdict::TIME_LIMIT_EXCEEDED, None),
        RunStatus::MemoryLimitExceeded => (Verdict::MEMORY_LIMIT_EXCEEDED, None),
        RunStatus::Signaled(sig) => {
            let name = Signal::try_from(sig)
                .map(|s| s.as_str().to_string())
                .unwrap_or_else(|_| format!("signal {}", sig));
            (Verdict::RUNTIME_ERROR, Some(name))
        }
        RunStatus::RuntimeError => (Verdict::RUNTIME_ERROR, None),
    }
}

//! Test doubles shared by unit tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ExecError;
use crate::executor::{Executor, Program, RunLimits, RunOutcome, RunStatus};

/// Executor whose behaviour is picked by the source and the input.
///
/// Source containing `syntax error` fails to compile and `hang` blocks the
/// compiler until aborted. Inputs: `crash`, `tle`, `hang` (until aborted),
/// `panic`, `sandbox` (executor failure), `sleep` (20ms, then echo);
/// anything else is echoed back.
#[derive(Default)]
pub struct ScriptedExecutor {
    pub runs: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

fn exited(stdout: &str) -> RunOutcome {
    RunOutcome {
        status: RunStatus::Exited(0),
        time: 0.012,
        memory_kb: 340,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    fn language(&self) -> &str {
        "scripted"
    }

    async fn compile(&self, source: &str, abort: &CancellationToken) -> Result<Program, ExecError> {
        if source.contains("syntax error") {
            return Err(ExecError::Compile(
                "\x1b[1mmain.c:1:1:\x1b[0m \x1b[31merror:\x1b[0m syntax error".to_string(),
            ));
        }
        if source.contains("hang") {
            abort.cancelled().await;
            return Err(ExecError::Aborted);
        }
        Ok(Program::new("scripted", vec!["./main".to_string()]))
    }

    async fn run(
        &self,
        _program: &Program,
        _limits: &RunLimits,
        input: &str,
        abort: &CancellationToken,
    ) -> Result<RunOutcome, ExecError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if abort.is_cancelled() {
            return Err(ExecError::Aborted);
        }

        match input {
            "crash" => Ok(RunOutcome {
                status: RunStatus::Signaled(11),
                stderr: "segmentation fault\n".to_string(),
                ..exited("")
            }),
            "tle" => Ok(RunOutcome {
                status: RunStatus::TimeLimitExceeded,
                time: 1.0,
                ..exited("")
            }),
            "hang" => {
                abort.cancelled().await;
                Err(ExecError::Aborted)
            }
            "panic" => panic!("executor blew up"),
            "sandbox" => Err(ExecError::Sandbox(anyhow::anyhow!("box 7 is busy"))),
            "sleep" => {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(exited(input))
            }
            _ => Ok(exited(input)),
        }
    }
}

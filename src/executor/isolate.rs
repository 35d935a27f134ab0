//! Isolate-backed executor
//!
//! Compiles inside one box, copies the artifacts into a temp workspace and
//! runs every case in a fresh box seeded from that workspace.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Executor, Program, RunLimits, RunOutcome, RunStatus};
use crate::error::ExecError;
use crate::languages::LanguageConfig;
use crate::sandbox::{
    is_cgroups_available, BoxAllocator, IoSpec, IsolateBox, IsolateMeta, IsolateStatus, Limits,
    SandboxConfig, SandboxOutcome,
};

pub struct IsolateExecutor {
    language: LanguageConfig,
    sandbox: Arc<SandboxConfig>,
    boxes: Arc<BoxAllocator>,
}

impl IsolateExecutor {
    pub fn new(
        language: LanguageConfig,
        sandbox: Arc<SandboxConfig>,
        boxes: Arc<BoxAllocator>,
    ) -> Self {
        Self {
            language,
            sandbox,
            boxes,
        }
    }

    async fn open_box(&self) -> Result<IsolateBox, ExecError> {
        let use_cgroups = is_cgroups_available().await;
        Ok(IsolateBox::new(self.boxes.next(), use_cgroups).await?)
    }

    /// Run the compile command in `isolate_box` and copy its artifacts out
    async fn compile_in(
        &self,
        isolate_box: &IsolateBox,
        compile_command: &[String],
        source: &str,
        abort: &CancellationToken,
    ) -> Result<tempfile::TempDir, ExecError> {
        isolate_box
            .write_file(&self.language.source_file, source.as_bytes())
            .await?;

        let limits = Limits {
            time_secs: self.sandbox.compile_time_limit_ms as f64 / 1000.0,
            memory_kb: self.sandbox.compile_memory_limit_mb as u64 * 1024,
            ..Limits::default()
        };

        let outcome = isolate_box
            .run(compile_command, &limits, &IoSpec::default(), abort)
            .await?
            .ok_or(ExecError::Aborted)?;

        if !(outcome.meta.status == IsolateStatus::Ok && outcome.meta.exit_code == 0) {
            return Err(ExecError::Compile(compile_diagnostic(&outcome)));
        }

        let workspace = tempfile::tempdir().context("Failed to create program workspace")?;
        isolate_box.copy_dir_out(workspace.path()).await?;
        Ok(workspace)
    }
}

#[async_trait]
impl Executor for IsolateExecutor {
    fn language(&self) -> &str {
        &self.language.name
    }

    async fn compile(&self, source: &str, abort: &CancellationToken) -> Result<Program, ExecError> {
        let program = Program::new(&self.language.name, self.language.run_command.clone());

        let Some(compile_command) = &self.language.compile_command else {
            // Interpreted: stage the source as the whole workspace
            let workspace = tempfile::tempdir().context("Failed to create program workspace")?;
            tokio::fs::write(workspace.path().join(&self.language.source_file), source)
                .await
                .context("Failed to stage source")?;
            return Ok(program.with_workspace(workspace));
        };

        debug!("Compiling {} with {:?}", self.language.name, compile_command);

        let isolate_box = self.open_box().await?;
        let result = self
            .compile_in(&isolate_box, compile_command, source, abort)
            .await;
        if let Err(e) = isolate_box.cleanup().await {
            warn!("Failed to clean up compile box: {:#}", e);
        }

        Ok(program.with_workspace(result?))
    }

    async fn run(
        &self,
        program: &Program,
        limits: &RunLimits,
        input: &str,
        abort: &CancellationToken,
    ) -> Result<RunOutcome, ExecError> {
        if abort.is_cancelled() {
            return Err(ExecError::Aborted);
        }

        let limits = Limits {
            time_secs: self.language.calculate_time_limit(limits.time),
            memory_kb: self.language.calculate_memory_limit(limits.memory_kb),
            ..Limits::default()
        };

        let isolate_box = self.open_box().await?;
        let result = async {
            if let Some(workspace) = program.workspace() {
                isolate_box.copy_dir_in(workspace).await?;
            }
            let io = IoSpec::default().with_stdin(input);
            isolate_box
                .run(&program.run_command, &limits, &io, abort)
                .await
        }
        .await;

        if let Err(e) = isolate_box.cleanup().await {
            warn!("Failed to clean up run box: {:#}", e);
        }

        let outcome = result?.ok_or(ExecError::Aborted)?;
        let status = run_status(&outcome.meta, limits.memory_kb)?;

        Ok(RunOutcome {
            status,
            time: outcome.meta.time,
            memory_kb: outcome.meta.memory_kb,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
        })
    }
}

fn compile_diagnostic(outcome: &SandboxOutcome) -> String {
    if !outcome.stderr.trim().is_empty() {
        return outcome.stderr.clone();
    }
    if !outcome.stdout.trim().is_empty() {
        return outcome.stdout.clone();
    }
    match outcome.meta.status {
        IsolateStatus::TimeOut => "Compilation timed out".to_string(),
        IsolateStatus::Signal(_) => "Compiler crashed".to_string(),
        _ => format!("Compilation failed with exit code {}", outcome.meta.exit_code),
    }
}

/// Map isolate's verdict-free meta onto a run status
fn run_status(meta: &IsolateMeta, memory_limit_kb: u64) -> Result<RunStatus, ExecError> {
    if meta.oom_killed || meta.memory_kb > memory_limit_kb {
        return Ok(RunStatus::MemoryLimitExceeded);
    }
    Ok(match meta.status {
        IsolateStatus::Ok => RunStatus::Exited(meta.exit_code),
        IsolateStatus::TimeOut => RunStatus::TimeLimitExceeded,
        IsolateStatus::Signal(sig) => RunStatus::Signaled(sig),
        IsolateStatus::RuntimeError if meta.exit_code != 0 => RunStatus::Exited(meta.exit_code),
        IsolateStatus::RuntimeError => RunStatus::RuntimeError,
        IsolateStatus::InternalError => {
            return Err(ExecError::Sandbox(anyhow::anyhow!(
                "isolate internal error: {}",
                meta.message.as_deref().unwrap_or("no message")
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::meta::parse_meta;

    #[test]
    fn test_run_status_mapping() {
        let status = |meta: &str| run_status(&parse_meta(meta), 65536).unwrap();

        assert_eq!(status("time:0.1\ncg-mem:1024\nexitcode:0\n"), RunStatus::Exited(0));
        assert_eq!(status("status:RE\nexitcode:3\n"), RunStatus::Exited(3));
        assert_eq!(status("status:TO\n"), RunStatus::TimeLimitExceeded);
        assert_eq!(status("status:SG\nexitsig:11\n"), RunStatus::Signaled(11));
        assert_eq!(status("status:RE\n"), RunStatus::RuntimeError);
    }

    #[test]
    fn test_memory_limit_wins_over_signal() {
        let meta = parse_meta("status:SG\nexitsig:9\ncg-oom-killed:1\n");
        assert_eq!(run_status(&meta, 65536).unwrap(), RunStatus::MemoryLimitExceeded);

        let meta = parse_meta("cg-mem:70000\nexitcode:0\n");
        assert_eq!(run_status(&meta, 65536).unwrap(), RunStatus::MemoryLimitExceeded);
    }

    #[test]
    fn test_internal_error_is_sandbox_failure() {
        let meta = parse_meta("status:XX\nmessage:box is busy\n");
        assert!(matches!(run_status(&meta, 1024), Err(ExecError::Sandbox(_))));
    }

    #[test]
    fn test_compile_diagnostic_prefers_stderr() {
        let outcome = SandboxOutcome {
            meta: parse_meta("status:RE\nexitcode:1\n"),
            stdout: "noise".into(),
            stderr: "main.c:1: error".into(),
        };
        assert_eq!(compile_diagnostic(&outcome), "main.c:1: error");

        let outcome = SandboxOutcome {
            meta: parse_meta("status:TO\n"),
            stdout: String::new(),
            stderr: "  ".into(),
        };
        assert_eq!(compile_diagnostic(&outcome), "Compilation timed out");
    }
}

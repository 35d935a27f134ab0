//! Executor module - per-language compile/run capability
//!
//! An executor turns source into a `Program` and runs it under limits against
//! one input. It reports raw execution data only; verdicts belong to graders.
//! Every call takes an abort token: when it fires, the in-flight unit is
//! killed and the call returns `ExecError::Aborted`.

pub mod isolate;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::error::ExecError;
use crate::languages::LanguageTable;
use crate::sandbox::{BoxAllocator, SandboxConfig};

pub use isolate::IsolateExecutor;

/// Compiled (or staged) program ready to run
#[derive(Debug)]
pub struct Program {
    pub language: String,
    pub run_command: Vec<String>,
    /// Files the program needs at run time
    workspace: Option<TempDir>,
}

impl Program {
    pub fn new(language: impl Into<String>, run_command: Vec<String>) -> Self {
        Self {
            language: language.into(),
            run_command,
            workspace: None,
        }
    }

    pub fn with_workspace(mut self, workspace: TempDir) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn workspace(&self) -> Option<&Path> {
        self.workspace.as_ref().map(|dir| dir.path())
    }
}

/// Limits for one run, before language adjustments
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunLimits {
    /// Seconds
    pub time: f64,
    /// KiB
    pub memory_kb: u64,
}

/// Execution status (raw, no verdict interpretation)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Program exited normally with given exit code
    Exited(i32),
    TimeLimitExceeded,
    MemoryLimitExceeded,
    /// Killed by signal
    Signaled(i32),
    /// Crashed without a usable exit code
    RuntimeError,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Exited(0))
    }
}

/// Outcome of running a program once
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// CPU seconds
    pub time: f64,
    /// Peak memory in KiB
    pub memory_kb: u64,
    pub stdout: String,
    pub stderr: String,
}

/// Compile/run capability for one language
#[async_trait]
pub trait Executor: Send + Sync {
    /// Canonical language tag
    fn language(&self) -> &str;

    async fn compile(&self, source: &str, abort: &CancellationToken) -> Result<Program, ExecError>;

    async fn run(
        &self,
        program: &Program,
        limits: &RunLimits,
        input: &str,
        abort: &CancellationToken,
    ) -> Result<RunOutcome, ExecError>;
}

/// Executors keyed by language tag, aliases included
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One isolate executor per language, shared by its aliases
    pub fn from_languages(table: &LanguageTable, sandbox: SandboxConfig) -> Self {
        let sandbox = Arc::new(sandbox);
        let boxes = Arc::new(BoxAllocator::new(sandbox.box_base));
        let mut canonical: HashMap<String, Arc<dyn Executor>> = HashMap::new();
        let mut registry = Self::new();

        for (tag, config) in table.iter() {
            let executor = canonical
                .entry(config.name.clone())
                .or_insert_with(|| {
                    Arc::new(IsolateExecutor::new(
                        config.clone(),
                        sandbox.clone(),
                        boxes.clone(),
                    ))
                })
                .clone();
            registry.register(tag.clone(), executor);
        }

        registry
    }

    pub fn register(&mut self, tag: impl Into<String>, executor: Arc<dyn Executor>) {
        self.executors.insert(tag.into().to_lowercase(), executor);
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(&tag.to_lowercase()).cloned()
    }

    /// Registered tags, sorted
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.executors.keys().cloned().collect();
        tags.sort();
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[cpp]
source_file = "main.cpp"
compile_command = "g++ -O2 -o main main.cpp"
run_command = "./main"
aliases = ["c++"]

[python]
source_file = "main.py"
run_command = "python3 main.py"
"#;

    #[test]
    fn test_registry_shares_executor_across_aliases() {
        let table = LanguageTable::from_toml_str(CONFIG).unwrap();
        let registry = ExecutorRegistry::from_languages(&table, SandboxConfig::default());

        assert_eq!(registry.tags(), vec!["c++", "cpp", "python"]);

        let cpp = registry.get("CPP").unwrap();
        let alias = registry.get("c++").unwrap();
        assert!(Arc::ptr_eq(&cpp, &alias));
        assert_eq!(alias.language(), "cpp");
        assert!(registry.get("brainfuck").is_none());
    }

    #[test]
    fn test_program_workspace() {
        let program = Program::new("python", vec!["python3".into(), "main.py".into()]);
        assert!(program.workspace().is_none());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        let program = program.with_workspace(dir);
        assert_eq!(program.workspace(), Some(path.as_path()));
    }

    #[test]
    fn test_run_status_success() {
        assert!(RunStatus::Exited(0).is_success());
        assert!(!RunStatus::Exited(1).is_success());
        assert!(!RunStatus::Signaled(11).is_success());
    }
}

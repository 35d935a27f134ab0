//! Grading against expected output

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{execution_verdict, ExecutionUnit, Grader};
use crate::checker::truncate_output;
use crate::core::problem::{Case, Problem};
use crate::core::verdict::{CaseResult, Verdict};
use crate::error::GradingError;
use crate::executor::{Executor, RunLimits};
use crate::storage::DataStore;

pub struct StandardGrader {
    unit: ExecutionUnit,
    problem: Arc<Problem>,
    store: Option<Arc<dyn DataStore>>,
}

impl StandardGrader {
    pub fn new(
        executor: Arc<dyn Executor>,
        problem: Arc<Problem>,
        store: Option<Arc<dyn DataStore>>,
    ) -> Self {
        Self {
            unit: ExecutionUnit::new(executor),
            problem,
            store,
        }
    }
}

#[async_trait]
impl Grader for StandardGrader {
    async fn compile(&self, source: &str) -> Result<(), GradingError> {
        self.unit.compile(source).await
    }

    async fn grade(&self, case: &Case) -> Result<CaseResult, GradingError> {
        let store = self.store.as_deref();
        let input = case.input.load(store).await?;
        let expected = case.expected.load(store).await?;

        let limits = RunLimits {
            time: self.problem.time_limit,
            memory_kb: self.problem.memory_limit,
        };
        let outcome = self.unit.run(&limits, &input).await?;

        let (mut verdict, feedback) = execution_verdict(outcome.status);
        let (output, truncated) = truncate_output(&outcome.stdout, self.problem.output_limit);

        if outcome.status.is_success() && !self.problem.checker.check(&output, &expected) {
            verdict.insert(Verdict::WRONG_ANSWER);
        }
        if truncated {
            verdict.insert(Verdict::OUTPUT_LIMIT_EXCEEDED);
        }

        debug!(
            "Case {} of problem {}: {:?}",
            case.position, self.problem.id, outcome.status
        );

        Ok(CaseResult {
            verdict,
            execution_time: outcome.time,
            max_memory: outcome.memory_kb,
            output,
            feedback,
            points: if verdict.is_accepted() { case.points } else { 0.0 },
            position: case.position,
            batch: case.batch,
        })
    }

    fn terminate(&self) {
        self.unit.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedExecutor;
    use serde_json::json;

    fn problem(payload: serde_json::Value) -> Arc<Problem> {
        Arc::new(Problem::from_payload("1", 1.0, 65536, &payload).unwrap())
    }

    #[tokio::test]
    async fn test_grades_accepted_and_wrong_answer() {
        let problem = problem(json!({
            "cases": [
                {"input": "1 2\n", "output": "1 2", "points": 4},
                {"input": "3\n", "output": "4\n", "points": 6}
            ]
        }));
        let grader = StandardGrader::new(Arc::new(ScriptedExecutor::new()), problem.clone(), None);
        grader.compile("echo").await.unwrap();

        let ac = grader.grade(&problem.cases[0]).await.unwrap();
        assert!(ac.verdict.is_accepted());
        assert_eq!(ac.points, 4.0);
        assert_eq!(ac.position, 1);

        let wa = grader.grade(&problem.cases[1]).await.unwrap();
        assert_eq!(wa.verdict, Verdict::WRONG_ANSWER);
        assert_eq!(wa.points, 0.0);
    }

    #[tokio::test]
    async fn test_execution_failures_skip_checker() {
        let problem = problem(json!({
            "cases": [
                {"input": "crash", "output": "crash"},
                {"input": "tle", "output": "tle"}
            ]
        }));
        let grader = StandardGrader::new(Arc::new(ScriptedExecutor::new()), problem.clone(), None);
        grader.compile("echo").await.unwrap();

        let rte = grader.grade(&problem.cases[0]).await.unwrap();
        assert_eq!(rte.verdict, Verdict::RUNTIME_ERROR);
        assert_eq!(rte.feedback.as_deref(), Some("SIGSEGV"));

        let tle = grader.grade(&problem.cases[1]).await.unwrap();
        assert_eq!(tle.verdict, Verdict::TIME_LIMIT_EXCEEDED);
    }

    #[tokio::test]
    async fn test_output_limit_flags_and_truncates() {
        let problem = problem(json!({
            "cases": [{"input": "abcdefgh", "output": "abcdefgh"}],
            "output_limit": 4
        }));
        let grader = StandardGrader::new(Arc::new(ScriptedExecutor::new()), problem.clone(), None);
        grader.compile("echo").await.unwrap();

        let result = grader.grade(&problem.cases[0]).await.unwrap();
        assert_eq!(result.output, "abcd");
        assert!(result.verdict.contains(Verdict::OUTPUT_LIMIT_EXCEEDED));
        assert!(result.verdict.contains(Verdict::WRONG_ANSWER));
        assert_eq!(result.verdict.primary_code(), "OLE");
    }

    #[tokio::test]
    async fn test_grading_before_compile_is_internal() {
        let problem = problem(json!({"cases": [{"input": "1", "output": "1"}]}));
        let grader = StandardGrader::new(Arc::new(ScriptedExecutor::new()), problem.clone(), None);

        let err = grader.grade(&problem.cases[0]).await.unwrap_err();
        assert!(matches!(err, GradingError::Internal(_)));
    }

    #[tokio::test]
    async fn test_terminate_aborts_hanging_run() {
        let problem = problem(json!({"cases": [{"input": "hang", "output": ""}]}));
        let grader = Arc::new(StandardGrader::new(
            Arc::new(ScriptedExecutor::new()),
            problem.clone(),
            None,
        ));
        grader.compile("echo").await.unwrap();

        let running = {
            let grader = grader.clone();
            let case = problem.cases[0].clone();
            tokio::spawn(async move { grader.grade(&case).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        grader.terminate();

        let err = running.await.unwrap().unwrap_err();
        assert!(matches!(err, GradingError::Terminated));
    }
}

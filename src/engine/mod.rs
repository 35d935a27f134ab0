//! Grading engine - the submission lifecycle
//!
//! `accept` and `custom_invocation` run one job at a time: each waits for the
//! previous lifecycle task to finish, marks the worker busy and spawns the
//! next one. A lifecycle resolves the problem, compiles through its grader,
//! walks the cases and ends with exactly one terminal packet.
//!
//! `request_termination` never waits on the accept path. It cancels the
//! active job through `WorkerState`, kills the in-flight run through the
//! grader and returns once that job has released the worker.

mod state;
mod stream;

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::core::problem::{Problem, ProblemResolver};
use crate::core::verdict::CaseResult;
use crate::error::GradingError;
use crate::executor::{Executor, ExecutorRegistry};
use crate::grader::{Grader, InvocationGrader, StandardGrader};
use crate::intake::{InvocationJob, JudgeJob};
use crate::reporter::{Packet, PacketManager, Reporter};
use crate::storage::DataStore;

pub use state::{JobGuard, JobHandle, JobKind, JobPhase, JobSnapshot, WorkerState};
pub use stream::{CaseStream, GradingEvent};

type Packets = Arc<Mutex<PacketManager>>;

/// Identity stamped on outbound packets
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default submission type when a job carries none
    pub submission_type: String,
    pub worker: String,
    /// Output cap for custom invocations
    pub output_limit: usize,
}

struct Shared {
    state: Arc<WorkerState>,
    executors: ExecutorRegistry,
    resolver: Arc<dyn ProblemResolver>,
    reporter: Arc<dyn Reporter>,
    store: Option<Arc<dyn DataStore>>,
    config: EngineConfig,
}

impl Shared {
    fn executor(&self, language: &str) -> Result<Arc<dyn Executor>, GradingError> {
        self.executors
            .get(language)
            .ok_or_else(|| anyhow!("Unsupported language: {}", language).into())
    }

    fn packets(&self, submission_id: i64, submission_type: Option<&str>) -> Packets {
        Arc::new(Mutex::new(PacketManager::new(
            self.reporter.clone(),
            submission_id,
            submission_type.unwrap_or(&self.config.submission_type),
            &self.config.worker,
        )))
    }
}

pub struct GradingEngine {
    shared: Arc<Shared>,
    lifecycle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl GradingEngine {
    pub fn new(
        executors: ExecutorRegistry,
        resolver: Arc<dyn ProblemResolver>,
        reporter: Arc<dyn Reporter>,
        store: Option<Arc<dyn DataStore>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Arc::new(WorkerState::new()),
                executors,
                resolver,
                reporter,
                store,
                config,
            }),
            lifecycle: tokio::sync::Mutex::new(None),
        }
    }

    /// Start grading `job` once the worker is free
    pub async fn accept(&self, job: JudgeJob) {
        let snapshot = JobSnapshot {
            submission_id: job.submission_id,
            kind: JobKind::Grading,
            phase: JobPhase::Resolving,
            problem_id: Some(job.problem_id),
            language: job.language.clone(),
        };
        let packets = self
            .shared
            .packets(job.submission_id, job.submission_type.as_deref());

        self.launch(snapshot, packets, move |shared, handle, packets| async move {
            let result = grade_submission(&shared, &job, &handle, &packets).await;
            finish(&packets, job.submission_id, result, |packets, ()| {
                info!("Done grading submission {}", job.submission_id);
                packets.grading_end();
            });
        })
        .await;
    }

    /// Run `job` once on its input and report the captured output
    pub async fn custom_invocation(&self, job: InvocationJob) {
        let snapshot = JobSnapshot {
            submission_id: job.submission_id,
            kind: JobKind::Invocation,
            phase: JobPhase::Compiling,
            problem_id: None,
            language: job.language.clone(),
        };
        let packets = self
            .shared
            .packets(job.submission_id, job.submission_type.as_deref());

        self.launch(snapshot, packets, move |shared, handle, packets| async move {
            let result = invoke(&shared, &job, &handle, &packets).await;
            finish(&packets, job.submission_id, result, |packets, result| {
                info!("Invocation {} finished: {}", job.submission_id, result.render());
                packets.invocation_end(&result);
            });
        })
        .await;
    }

    /// Cancel the active job and wait until the worker has released it.
    /// Returns `false` when nothing was running.
    pub async fn request_termination(&self) -> bool {
        self.shared.state.terminate().await
    }

    /// Wait until the active job, if any, has released the worker
    pub async fn wait_idle(&self) {
        self.shared.state.wait_idle().await;
    }

    pub fn state(&self) -> Option<JobSnapshot> {
        self.shared.state.current()
    }

    /// Announce the problems and languages this worker can serve
    pub async fn refresh_problems(&self) -> anyhow::Result<Vec<i64>> {
        let problems = self.shared.resolver.supported_problems().await?;
        info!("Announcing {} supported problems", problems.len());
        self.shared.reporter.deliver(Packet::supported_problems(
            &self.shared.config.worker,
            problems.clone(),
            self.shared.executors.tags(),
        ));
        Ok(problems)
    }

    async fn launch<F, Fut>(&self, snapshot: JobSnapshot, packets: Packets, lifecycle: F)
    where
        F: FnOnce(Arc<Shared>, JobHandle, Packets) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.lifecycle.lock().await;
        if let Some(previous) = slot.take() {
            if !previous.is_finished() {
                info!(
                    "Submission {} waits for the active job to finish",
                    snapshot.submission_id
                );
            }
            let _ = previous.await;
        }

        let submission_id = snapshot.submission_id;
        let guard = loop {
            match self.shared.state.begin(snapshot.clone()) {
                Ok(guard) => break guard,
                Err(e) => {
                    info!("Submission {} deferred: {:#}", submission_id, e);
                    self.shared.state.wait_idle().await;
                }
            }
        };

        let task = lifecycle(self.shared.clone(), guard.handle(), packets.clone());
        *slot = Some(tokio::spawn(supervise(guard, packets, submission_id, task)));
    }
}

/// Run a lifecycle in its own task so a panic becomes an internal error
async fn supervise<Fut>(guard: JobGuard, packets: Packets, submission_id: i64, lifecycle: Fut)
where
    Fut: Future<Output = ()> + Send + 'static,
{
    if let Err(e) = tokio::spawn(lifecycle).await {
        let message = if e.is_panic() {
            format!("worker panicked: {}", panic_message(e.into_panic()))
        } else {
            e.to_string()
        };
        error!("Submission {} crashed: {}", submission_id, message);
        packets.lock().internal_error(&message);
    }

    let mut packets = packets.lock();
    if !packets.is_finished() {
        warn!("Submission {} ended without a final packet", submission_id);
        packets.internal_error("grading ended without a final status");
    }
    drop(packets);
    drop(guard);
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Send the terminal packet for a lifecycle result
fn finish<T>(
    packets: &Packets,
    submission_id: i64,
    result: Result<T, GradingError>,
    on_success: impl FnOnce(&mut PacketManager, T),
) {
    let mut packets = packets.lock();
    match result {
        Ok(value) => on_success(&mut packets, value),
        Err(GradingError::Compile(log)) => {
            info!("Submission {} failed to compile", submission_id);
            packets.compile_error(&log);
        }
        Err(GradingError::Terminated) => {
            info!("Submission {} terminated", submission_id);
            packets.submission_terminated();
        }
        Err(GradingError::Internal(e)) => {
            error!("Internal error on submission {}: {:?}", submission_id, e);
            packets.internal_error(&format!("{:?}", e));
        }
    }
}

/// Compile through `grader`, bailing out if termination arrived meanwhile
async fn compile(
    grader: Arc<dyn Grader>,
    source: &str,
    handle: &JobHandle,
) -> Result<Arc<dyn Grader>, GradingError> {
    handle.set_phase(JobPhase::Compiling);
    handle.install_grader(grader.clone());
    grader.compile(source).await?;
    if handle.is_cancelled() {
        return Err(GradingError::Terminated);
    }
    handle.set_phase(JobPhase::Grading);
    Ok(grader)
}

async fn grade_submission(
    shared: &Shared,
    job: &JudgeJob,
    handle: &JobHandle,
    packets: &Packets,
) -> Result<(), GradingError> {
    info!(
        "Grading submission {} (problem {}, {})",
        job.submission_id, job.problem_id, job.language
    );

    let problem = tokio::select! {
        problem = shared.resolver.resolve(job) => problem?,
        _ = handle.cancel_token().cancelled() => return Err(GradingError::Terminated),
    };
    let problem = Arc::new(problem);
    let executor = shared.executor(&job.language)?;
    let grader = StandardGrader::new(executor, problem.clone(), shared.store.clone());
    let grader = compile(Arc::new(grader), &job.source, handle).await?;

    packets.lock().begin_grading();

    let mut stream = CaseStream::new(grader.as_ref(), &problem.cases, handle.cancel_token());
    while let Some(event) = stream.next().await {
        match event? {
            GradingEvent::BatchBegin(batch) => {
                info!("Batch #{}", batch);
                packets.lock().batch_begin();
            }
            GradingEvent::BatchEnd(_) => {
                packets.lock().batch_end();
            }
            GradingEvent::Case(result) => {
                info!("{}", result.render());
                packets.lock().test_case_status(&result);
            }
        }
    }

    Ok(())
}

async fn invoke(
    shared: &Shared,
    job: &InvocationJob,
    handle: &JobHandle,
    packets: &Packets,
) -> Result<CaseResult, GradingError> {
    info!("Invoking submission {} ({})", job.submission_id, job.language);

    let mut problem = Problem::invocation(job.time_limit, job.memory_limit, job.input_data.clone());
    problem.output_limit = shared.config.output_limit;
    let problem = Arc::new(problem);
    let executor = shared.executor(&job.language)?;
    let grader = InvocationGrader::new(executor, problem.clone());
    let grader = compile(Arc::new(grader), &job.source, handle).await?;

    packets.lock().invocation_begin();

    let mut result = None;
    let mut stream = CaseStream::new(grader.as_ref(), &problem.cases, handle.cancel_token());
    while let Some(event) = stream.next().await {
        if let GradingEvent::Case(case_result) = event? {
            result = Some(case_result);
        }
    }

    result.ok_or_else(|| anyhow!("invocation produced no result").into())
}

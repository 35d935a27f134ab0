//! Worker state shared between the job lifecycle and termination requests
//!
//! Exactly one job may be active. The lifecycle owns a `JobGuard` for as long
//! as the job runs; dropping it returns the worker to idle and wakes anyone
//! waiting in `terminate`. Every access goes through one short-held lock that
//! is never held across an await.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::grader::Grader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Grading,
    Invocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Resolving,
    Compiling,
    Grading,
}

/// Read-only view of the active job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub submission_id: i64,
    pub kind: JobKind,
    pub phase: JobPhase,
    pub problem_id: Option<i64>,
    pub language: String,
}

struct ActiveJob {
    seq: u64,
    snapshot: JobSnapshot,
    cancel: CancellationToken,
    grader: Option<Arc<dyn Grader>>,
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    current: Option<ActiveJob>,
}

pub struct WorkerState {
    inner: Mutex<Inner>,
    /// Sequence number of the last job that returned to idle
    finished: watch::Sender<u64>,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            finished: watch::Sender::new(0),
        }
    }

    /// Mark a job active. Fails if another job still holds the worker.
    pub fn begin(self: &Arc<Self>, snapshot: JobSnapshot) -> anyhow::Result<JobGuard> {
        let mut inner = self.inner.lock();
        if let Some(active) = &inner.current {
            anyhow::bail!(
                "worker busy with submission {}",
                active.snapshot.submission_id
            );
        }

        inner.next_seq += 1;
        let seq = inner.next_seq;
        let cancel = CancellationToken::new();
        debug!("Job {} begins: submission {}", seq, snapshot.submission_id);

        inner.current = Some(ActiveJob {
            seq,
            snapshot,
            cancel: cancel.clone(),
            grader: None,
        });

        Ok(JobGuard {
            handle: JobHandle {
                state: self.clone(),
                seq,
                cancel,
            },
        })
    }

    pub fn current(&self) -> Option<JobSnapshot> {
        self.inner.lock().current.as_ref().map(|job| job.snapshot.clone())
    }

    pub fn is_idle(&self) -> bool {
        self.inner.lock().current.is_none()
    }

    /// Cancel the active job, abort its grader and wait until it is idle.
    ///
    /// Returns `false` without touching anything when no job is active.
    pub async fn terminate(&self) -> bool {
        let mut finished = self.finished.subscribe();

        let (seq, submission_id, grader) = {
            let inner = self.inner.lock();
            let Some(job) = &inner.current else {
                return false;
            };
            job.cancel.cancel();
            (job.seq, job.snapshot.submission_id, job.grader.clone())
        };

        info!("Terminating submission {}", submission_id);
        if let Some(grader) = grader {
            grader.terminate();
        }

        // The sender lives in `self`, so this only ends once the job is done
        let _ = finished.wait_for(|done| *done >= seq).await;
        info!("Submission {} terminated, worker idle", submission_id);
        true
    }

    /// Wait until no job holds the worker
    pub async fn wait_idle(&self) {
        let mut finished = self.finished.subscribe();
        loop {
            let seq = match &self.inner.lock().current {
                Some(job) => job.seq,
                None => return,
            };
            if finished.wait_for(|done| *done >= seq).await.is_err() {
                return;
            }
        }
    }

    fn release(&self, seq: u64) {
        let mut inner = self.inner.lock();
        if inner.current.as_ref().is_some_and(|job| job.seq == seq) {
            inner.current = None;
        }
        drop(inner);

        self.finished.send_if_modified(|done| {
            if seq > *done {
                *done = seq;
                true
            } else {
                false
            }
        });
    }
}

/// Lifecycle-side access to the active job
#[derive(Clone)]
pub struct JobHandle {
    state: Arc<WorkerState>,
    seq: u64,
    cancel: CancellationToken,
}

impl JobHandle {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Make the grader reachable by termination requests
    pub fn install_grader(&self, grader: Arc<dyn Grader>) {
        let cancelled = {
            let mut inner = self.state.inner.lock();
            match inner.current.as_mut() {
                Some(job) if job.seq == self.seq => {
                    job.grader = Some(grader.clone());
                    job.cancel.is_cancelled()
                }
                _ => true,
            }
        };

        // Termination raced ahead of installation
        if cancelled {
            grader.terminate();
        }
    }

    pub fn set_phase(&self, phase: JobPhase) {
        let mut inner = self.state.inner.lock();
        if let Some(job) = inner.current.as_mut().filter(|job| job.seq == self.seq) {
            job.snapshot.phase = phase;
        }
    }
}

/// Owner of the active slot; dropping it returns the worker to idle
pub struct JobGuard {
    handle: JobHandle,
}

impl JobGuard {
    pub fn handle(&self) -> JobHandle {
        self.handle.clone()
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.handle.state.release(self.handle.seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::problem::Case;
    use crate::core::verdict::CaseResult;
    use crate::error::GradingError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn snapshot(id: i64) -> JobSnapshot {
        JobSnapshot {
            submission_id: id,
            kind: JobKind::Grading,
            phase: JobPhase::Resolving,
            problem_id: Some(1),
            language: "cpp".into(),
        }
    }

    #[derive(Default)]
    struct CountingGrader {
        terminated: AtomicUsize,
    }

    #[async_trait]
    impl Grader for CountingGrader {
        async fn compile(&self, _source: &str) -> Result<(), GradingError> {
            Ok(())
        }

        async fn grade(&self, case: &Case) -> Result<CaseResult, GradingError> {
            Ok(CaseResult::short_circuited(case))
        }

        fn terminate(&self) {
            self.terminated.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_terminate_while_idle_is_noop() {
        let state = Arc::new(WorkerState::new());
        assert!(!state.terminate().await);
        assert!(!state.terminate().await);
        assert!(state.is_idle());
        assert_eq!(*state.finished.borrow(), 0);
    }

    #[tokio::test]
    async fn test_single_active_job() {
        let state = Arc::new(WorkerState::new());
        let guard = state.begin(snapshot(1)).unwrap();
        assert!(state.begin(snapshot(2)).is_err());

        guard.handle().set_phase(JobPhase::Grading);
        let current = state.current().unwrap();
        assert_eq!(current.submission_id, 1);
        assert_eq!(current.phase, JobPhase::Grading);

        drop(guard);
        assert!(state.current().is_none());
        assert!(state.begin(snapshot(2)).is_ok());
    }

    #[tokio::test]
    async fn test_terminate_cancels_aborts_and_waits() {
        let state = Arc::new(WorkerState::new());
        let guard = state.begin(snapshot(1)).unwrap();
        let handle = guard.handle();
        let grader = Arc::new(CountingGrader::default());
        handle.install_grader(grader.clone());

        let lifecycle = tokio::spawn(async move {
            handle.cancel_token().cancelled().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(guard);
        });

        assert!(state.terminate().await);
        assert!(state.is_idle());
        assert_eq!(grader.terminated.load(Ordering::SeqCst), 1);
        lifecycle.await.unwrap();
    }

    #[tokio::test]
    async fn test_grader_installed_after_cancel_is_aborted() {
        let state = Arc::new(WorkerState::new());
        let guard = state.begin(snapshot(1)).unwrap();
        let handle = guard.handle();

        let terminating = {
            let state = state.clone();
            tokio::spawn(async move { state.terminate().await })
        };
        handle.cancel_token().cancelled().await;

        let grader = Arc::new(CountingGrader::default());
        handle.install_grader(grader.clone());
        assert_eq!(grader.terminated.load(Ordering::SeqCst), 1);

        drop(guard);
        assert!(terminating.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_idle_returns_after_release() {
        let state = Arc::new(WorkerState::new());
        state.wait_idle().await;

        let guard = state.begin(snapshot(1)).unwrap();
        let waiting = {
            let state = state.clone();
            tokio::spawn(async move { state.wait_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiting.is_finished());

        drop(guard);
        waiting.await.unwrap();
        assert!(state.is_idle());
    }
}

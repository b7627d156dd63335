//! Job id -> running process table
//!
//! One registry is constructed per service and shared by every job task and the
//! stop entry point. The entry, not the OS process, decides whether a job is killable:
//! `kill` removes the entry and signals the owning task, which terminates its child.

use crate::error::{OrchestratorError, Result};
use crate::job::{JobId, StageId};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info};

/// Why a registered process was terminated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillReason {
    /// Explicit stop request
    Requested(String),
    /// Degenerate-model watcher verdict
    Degenerate(String),
}

impl KillReason {
    pub fn stop_requested() -> Self {
        KillReason::Requested("The job was stopped on request.".to_string())
    }

    pub fn message(&self) -> &str {
        match self {
            KillReason::Requested(m) | KillReason::Degenerate(m) => m,
        }
    }

    pub fn into_error(self) -> OrchestratorError {
        match self {
            KillReason::Requested(m) => OrchestratorError::Killed(m),
            KillReason::Degenerate(m) => OrchestratorError::DegenerateModel(m),
        }
    }
}

#[derive(Debug)]
struct HandleInner {
    stage: StageId,
    pid: Option<u32>,
    cancel: CancellationToken,
    reason: Mutex<Option<KillReason>>,
}

/// Reference to the work a job is currently running.
///
/// Cloning is cheap; the registry and the owning task hold the same handle.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    inner: Arc<HandleInner>,
}

impl ProcessHandle {
    /// Handle for a spawned external process
    pub fn external(stage: StageId, pid: Option<u32>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                stage,
                pid,
                cancel: CancellationToken::new(),
                reason: Mutex::new(None),
            }),
        }
    }

    /// Handle for a stage that runs inside the job task
    pub fn in_process(stage: StageId) -> Self {
        Self::external(stage, None)
    }

    pub fn stage(&self) -> StageId {
        self.inner.stage
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.pid
    }

    /// Completes once the handle has been terminated
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.cancel.cancelled()
    }

    pub fn is_killed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn kill_reason(&self) -> Option<KillReason> {
        self.inner.reason.lock().clone()
    }

    /// Error the owning task reports after termination
    pub fn kill_error(&self) -> OrchestratorError {
        self.kill_reason()
            .unwrap_or_else(KillReason::stop_requested)
            .into_error()
    }

    /// First reason wins
    fn terminate(&self, reason: KillReason) {
        {
            let mut slot = self.inner.reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.inner.cancel.cancel();
    }
}

/// Concurrency-safe job id -> process handle map
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    entries: Arc<DashMap<JobId, ProcessHandle>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the job's current process, returning any handle it replaces
    pub fn register(&self, job_id: JobId, handle: ProcessHandle) -> Option<ProcessHandle> {
        debug!(
            "Job {}: registered {} (pid {:?})",
            job_id,
            handle.stage(),
            handle.pid()
        );
        self.entries.insert(job_id, handle)
    }

    /// Returns true iff an entry existed
    pub fn deregister(&self, job_id: JobId) -> bool {
        self.entries.remove(&job_id).is_some()
    }

    pub fn exists(&self, job_id: JobId) -> bool {
        self.entries.contains_key(&job_id)
    }

    pub fn get(&self, job_id: JobId) -> Option<ProcessHandle> {
        self.entries.get(&job_id).map(|e| e.value().clone())
    }

    /// Stop on request
    pub fn kill(&self, job_id: JobId) -> Result<()> {
        self.kill_with_reason(job_id, KillReason::stop_requested())
    }

    /// Remove the entry and terminate its process; fails if nothing is registered
    pub fn kill_with_reason(&self, job_id: JobId, reason: KillReason) -> Result<()> {
        match self.entries.remove(&job_id) {
            Some((_, handle)) => {
                info!(
                    "Job {}: killing {} (pid {:?}): {}",
                    job_id,
                    handle.stage(),
                    handle.pid(),
                    reason.message()
                );
                handle.terminate(reason);
                Ok(())
            }
            None => Err(OrchestratorError::JobNotFound(job_id.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Job API: submit, stop, validate and status

use crate::config::{JobConfig, Validatable};
use crate::error::{OrchestratorError, Result};
use crate::job::{Job, JobId, JobInput, JobState};
use crate::orchestrator::{PipelineOrchestrator, ValidationReport};
use crate::records::materialize;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// What a submitter sends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(default)]
    pub name: Option<String>,
    pub contact: String,
    #[serde(default)]
    pub config: JobConfig,
    pub input: JobInput,
}

/// Front door of the supervisor.
///
/// Synchronous checks return errors to the caller; once a job is spawned its
/// outcome is only observable through notifications, `status` and `join`.
/// A job task removes its own handle when it ends; the final `Job` waits in
/// `finished` until `join` takes it.
pub struct JobService {
    orchestrator: Arc<PipelineOrchestrator>,
    /// Latest state per job, written by the job's own task
    board: Arc<DashMap<JobId, JobState>>,
    /// Handles of jobs still running
    tasks: Arc<DashMap<JobId, JoinHandle<()>>>,
    finished: Arc<DashMap<JobId, Job>>,
}

impl JobService {
    pub fn new(orchestrator: Arc<PipelineOrchestrator>) -> Self {
        Self {
            orchestrator,
            board: Arc::new(DashMap::new()),
            tasks: Arc::new(DashMap::new()),
            finished: Arc::new(DashMap::new()),
        }
    }

    pub fn orchestrator(&self) -> &PipelineOrchestrator {
        &self.orchestrator
    }

    /// Cheap synchronous checks, then spawn the job; returns before any stage runs
    pub fn submit(&self, request: JobRequest) -> Result<JobId> {
        let job = self.admit(request)?;
        let job_id = job.id;
        self.board.insert(job_id, job.state.clone());

        let orchestrator = self.orchestrator.clone();
        let board = self.board.clone();
        let tasks = self.tasks.clone();
        let finished = self.finished.clone();
        let task = tokio::spawn(async move {
            let job = orchestrator
                .run_reporting(job, move |j| {
                    board.insert(j.id, j.state.clone());
                })
                .await;
            // result first, so a concurrent submit sees it before the handle goes
            finished.insert(job_id, job);
            tasks.remove(&job_id);
        });
        self.tasks.insert(job_id, task);
        if self.finished.contains_key(&job_id) {
            // the task ended before its handle was stored
            self.tasks.remove(&job_id);
        }

        info!("Job {}: submitted", job_id);
        Ok(job_id)
    }

    /// Kill the job's current process; "job does not exist" when nothing is running
    pub fn stop(&self, job_id: JobId) -> Result<()> {
        self.orchestrator.registry().kill(job_id)
    }

    /// Pre-flight run of alignment and location resolution
    pub async fn validate(&self, request: JobRequest) -> Result<ValidationReport> {
        let job = self.admit(request)?;
        self.orchestrator.validate(&job).await
    }

    pub fn status(&self, job_id: JobId) -> Option<JobState> {
        self.board.get(&job_id).map(|s| s.value().clone())
    }

    /// Wait for the job's task and return the final job; a job can be joined once
    pub async fn join(&self, job_id: JobId) -> Result<Job> {
        if let Some((_, task)) = self.tasks.remove(&job_id) {
            task.await.map_err(|e| {
                OrchestratorError::Other(anyhow::anyhow!("job task failed: {}", e))
            })?;
        }
        self.finished
            .remove(&job_id)
            .map(|(_, job)| job)
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))
    }

    /// Jobs whose task has not ended yet
    pub fn running(&self) -> usize {
        self.tasks.len()
    }

    fn admit(&self, request: JobRequest) -> Result<Job> {
        if request.contact.trim().is_empty() {
            return Err(OrchestratorError::validation("contact must not be empty"));
        }
        request.config.validate()?;
        materialize(&request.input, self.orchestrator.records())?;
        Ok(Job::new(
            request.name,
            request.contact,
            request.config,
            request.input,
        ))
    }
}

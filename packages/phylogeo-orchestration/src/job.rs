use crate::config::JobConfig;
use crate::error::{ErrorCategory, OrchestratorError, Result};
use chrono::{DateTime, Utc};
use phylogeo_geo::GeoLocation;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

pub type JobId = Uuid;

/// Pipeline stage identifier, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Aligning,
    Resolving,
    BuildingModel,
    Inferring,
    Annotating,
    Visualizing,
}

impl StageId {
    pub const ALL: [StageId; 6] = [
        StageId::Aligning,
        StageId::Resolving,
        StageId::BuildingModel,
        StageId::Inferring,
        StageId::Annotating,
        StageId::Visualizing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Aligning => "aligning",
            StageId::Resolving => "resolving",
            StageId::BuildingModel => "building_model",
            StageId::Inferring => "inferring",
            StageId::Annotating => "annotating",
            StageId::Visualizing => "visualizing",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "aligning" => Ok(StageId::Aligning),
            "resolving" => Ok(StageId::Resolving),
            "building_model" => Ok(StageId::BuildingModel),
            "inferring" => Ok(StageId::Inferring),
            "annotating" => Ok(StageId::Annotating),
            "visualizing" => Ok(StageId::Visualizing),
            _ => Err(OrchestratorError::config(format!("Invalid stage ID: {}", s))),
        }
    }

    /// Human wording used in submitter messages
    pub fn description(&self) -> &'static str {
        match self {
            StageId::Aligning => "sequence alignment",
            StageId::Resolving => "location resolution",
            StageId::BuildingModel => "model construction",
            StageId::Inferring => "phylogeographic inference",
            StageId::Annotating => "tree annotation",
            StageId::Visualizing => "visualization",
        }
    }

    pub fn next(&self) -> Option<StageId> {
        let idx = StageId::ALL.iter().position(|s| s == self)?;
        StageId::ALL.get(idx + 1).copied()
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A sequence with its sampling metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceRecord {
    pub id: String,
    pub sequence: String,
    #[serde(default)]
    pub location: Option<GeoLocation>,
    #[serde(default)]
    pub collection_date: Option<String>,
}

/// Records selected by the submitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobInput {
    /// Raw sequences with metadata
    Sequences(Vec<SequenceRecord>),
    /// Accessions resolved through a record repository
    Accessions(Vec<String>),
}

impl JobInput {
    pub fn len(&self) -> usize {
        match self {
            JobInput::Sequences(records) => records.len(),
            JobInput::Accessions(ids) => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Job lifecycle state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobState {
    Created {
        created_at: DateTime<Utc>,
    },
    Running {
        started_at: DateTime<Utc>,
        stage: StageId,
        stage_started_at: DateTime<Utc>,
    },
    Succeeded {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        duration_ms: u64,
        artifacts: Vec<PathBuf>,
    },
    Failed {
        failed_at: DateTime<Utc>,
        /// Submitter-safe reason
        reason: String,
        category: ErrorCategory,
        failed_stage: Option<StageId>,
    },
    Killed {
        killed_at: DateTime<Utc>,
        reason: String,
        stage: Option<StageId>,
    },
}

impl JobState {
    pub fn state_name(&self) -> &'static str {
        match self {
            JobState::Created { .. } => "created",
            JobState::Running { stage, .. } => stage.as_str(),
            JobState::Succeeded { .. } => "succeeded",
            JobState::Failed { .. } => "failed",
            JobState::Killed { .. } => "killed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded { .. } | JobState::Failed { .. } | JobState::Killed { .. }
        )
    }

    pub fn current_stage(&self) -> Option<StageId> {
        match self {
            JobState::Running { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Job model
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub name: Option<String>,
    /// Where notifications go
    pub contact: String,
    pub config: JobConfig,
    pub input: JobInput,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(name: Option<String>, contact: String, config: JobConfig, input: JobInput) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            contact,
            config,
            input,
            state: JobState::Created { created_at: now },
            created_at: now,
            updated_at: now,
        }
    }

    /// Name for messages: the submitted name, else the id
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Job state machine for transitions
pub struct JobStateMachine {
    job: Job,
}

impl JobStateMachine {
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn into_job(self) -> Job {
        self.job
    }

    fn invalid(&self, to: &str) -> OrchestratorError {
        OrchestratorError::InvalidStateTransition {
            from: self.job.state.state_name().to_string(),
            to: to.to_string(),
        }
    }

    /// Transition: CREATED → ALIGNING
    pub fn start(&mut self) -> Result<()> {
        match &self.job.state {
            JobState::Created { .. } => {
                let now = Utc::now();
                self.job.state = JobState::Running {
                    started_at: now,
                    stage: StageId::Aligning,
                    stage_started_at: now,
                };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid(StageId::Aligning.as_str())),
        }
    }

    /// Transition to the stage following the current one
    pub fn advance(&mut self, to: StageId) -> Result<()> {
        match &self.job.state {
            JobState::Running {
                started_at, stage, ..
            } if stage.next() == Some(to) => {
                let now = Utc::now();
                self.job.state = JobState::Running {
                    started_at: *started_at,
                    stage: to,
                    stage_started_at: now,
                };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid(to.as_str())),
        }
    }

    /// Transition: VISUALIZING → SUCCEEDED
    pub fn succeed(&mut self, artifacts: Vec<PathBuf>) -> Result<()> {
        match &self.job.state {
            JobState::Running {
                started_at,
                stage: StageId::Visualizing,
                ..
            } => {
                let now = Utc::now();
                let duration_ms = (now - *started_at).num_milliseconds().max(0) as u64;
                self.job.state = JobState::Succeeded {
                    started_at: *started_at,
                    completed_at: now,
                    duration_ms,
                    artifacts,
                };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid("succeeded")),
        }
    }

    /// Transition: * → FAILED
    pub fn fail(&mut self, reason: String, category: ErrorCategory) -> Result<()> {
        if self.job.state.is_terminal() {
            return Err(self.invalid("failed"));
        }
        let now = Utc::now();
        self.job.state = JobState::Failed {
            failed_at: now,
            reason,
            category,
            failed_stage: self.job.state.current_stage(),
        };
        self.job.updated_at = now;
        Ok(())
    }

    /// Transition: * → KILLED
    pub fn kill(&mut self, reason: String) -> Result<()> {
        if self.job.state.is_terminal() {
            return Err(self.invalid("killed"));
        }
        let now = Utc::now();
        self.job.state = JobState::Killed {
            killed_at: now,
            reason,
            stage: self.job.state.current_stage(),
        };
        self.job.updated_at = now;
        Ok(())
    }
}

/*
 * Phylogeo Orchestration - Phylogeographic Job Supervisor
 *
 * Submits and supervises long-running inference pipelines built from
 * external numerical tools.
 *
 * Architecture:
 * - Job State Machine (Created -> six stages -> Succeeded | Failed | Killed)
 * - Process Registry (job id -> killable process)
 * - Log Watchers (progress, fatal signature, degenerate model)
 * - Two-attempt inference retry
 * - Notifier (pluggable delivery)
 */

// Public modules
pub mod config;
pub mod error;
pub mod job;
pub mod model;
pub mod notifier;
pub mod orchestrator;
pub mod records;
pub mod registry;
pub mod retry;
pub mod service;
pub mod tool;
pub mod watcher;
pub mod workspace;

// Re-exports
pub use config::{
    ClockModel, JobConfig, ModelHyperparameters, PredictorTable, SubstitutionModel,
    SupervisorConfig, ToolCommand, ToolsConfig, TreePrior, Validatable, WatcherConfig,
};
pub use error::{ErrorCategory, OrchestratorError, Result};
pub use job::{Job, JobId, JobInput, JobState, JobStateMachine, SequenceRecord, StageId};
pub use model::{FragmentModelBuilder, ModelBuilder, ModelRequest, TaxonState};
pub use notifier::{LogNotifier, Notification, Notifier};
pub use orchestrator::{PipelineOrchestrator, ValidationReport};
pub use records::{InMemoryRecordRepository, RecordRepository};
pub use registry::{KillReason, ProcessHandle, ProcessRegistry};
pub use retry::{InferenceAttempt, InferenceRetry};
pub use service::{JobRequest, JobService};
pub use watcher::{LogEvent, ProgressReport, ProgressTracker};
pub use workspace::JobWorkspace;

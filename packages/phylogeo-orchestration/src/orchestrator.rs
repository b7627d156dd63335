use crate::config::{SupervisorConfig, Validatable};
use crate::error::{OrchestratorError, Result};
use crate::job::{Job, JobId, JobStateMachine, SequenceRecord, StageId};
use crate::model::{FragmentModelBuilder, LoggerFiles, ModelBuilder, ModelRequest, TaxonState};
use crate::notifier::{deliver, Notification, Notifier};
use crate::records::{materialize, write_fasta, InMemoryRecordRepository, RecordRepository};
use crate::registry::{ProcessHandle, ProcessRegistry};
use crate::retry::{InferenceAttempt, InferenceRetry};
use crate::tool::{require_artifact, run_stage_tool, Placeholders, ToolProcess};
use crate::watcher::{
    spawn_degenerate_watcher, spawn_log_watcher, DegenerateCheck, LogEvent, LogLineParser, LogTail,
    ProgressTracker,
};
use crate::workspace::JobWorkspace;
use futures::FutureExt;
use phylogeo_geo::{AncestorResolver, GeonameDisjointer, LocatedRecord, Resolution};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Outcome of a pre-flight validation run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub state_count: usize,
    pub locations: Vec<String>,
    /// Feature code the locations were resolved at
    pub common_type: String,
    pub records_used: usize,
    pub records_dropped: usize,
}

/// Drives one job through every stage, one task per job.
///
/// All per-job failures end inside `run`: the returned `Job` is always terminal and
/// the submitter has been notified.
pub struct PipelineOrchestrator {
    config: Arc<SupervisorConfig>,
    registry: ProcessRegistry,
    resolver: Arc<dyn AncestorResolver>,
    records: Arc<dyn RecordRepository>,
    model_builder: Arc<dyn ModelBuilder>,
    notifier: Arc<dyn Notifier>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: SupervisorConfig,
        registry: ProcessRegistry,
        resolver: Arc<dyn AncestorResolver>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            resolver,
            records: Arc::new(InMemoryRecordRepository::new()),
            model_builder: Arc::new(FragmentModelBuilder),
            notifier,
        }
    }

    pub fn with_records(mut self, records: Arc<dyn RecordRepository>) -> Self {
        self.records = records;
        self
    }

    pub fn with_model_builder(mut self, model_builder: Arc<dyn ModelBuilder>) -> Self {
        self.model_builder = model_builder;
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn records(&self) -> &dyn RecordRepository {
        self.records.as_ref()
    }

    /// Run a job to a terminal state
    pub async fn run(&self, job: Job) -> Job {
        self.run_reporting(job, |_| {}).await
    }

    /// Run a job to a terminal state, passing every state change to `report`
    pub async fn run_reporting<F>(&self, job: Job, report: F) -> Job
    where
        F: Fn(&Job) + Send + Sync,
    {
        let job_id = job.id;
        let mut sm = JobStateMachine::new(job);
        if let Err(e) = sm.start() {
            error!("Job {}: cannot start: {}", job_id, e);
            return sm.into_job();
        }
        info!(
            "Job {}: started '{}' with {} records",
            job_id,
            sm.job().display_name(),
            sm.job().input.len()
        );
        report(sm.job());
        deliver(&self.notifier, sm.job(), Notification::Started).await;

        let outcome = match AssertUnwindSafe(self.run_stages(&mut sm, &report))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => Err(OrchestratorError::Other(anyhow::anyhow!(
                "job task panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        self.registry.deregister(job_id);
        self.finish(&mut sm, outcome).await;
        report(sm.job());
        sm.into_job()
    }

    async fn run_stages<F>(&self, sm: &mut JobStateMachine, report: &F) -> Result<Vec<PathBuf>>
    where
        F: Fn(&Job) + Send + Sync,
    {
        let job = sm.job().clone();
        let ws = JobWorkspace::new(&self.config.work_root, job.id);
        ws.create().await?;

        let records = self.align(&job, &ws).await?;

        advance(sm, StageId::Resolving, report)?;
        let resolution = self
            .in_process(job.id, StageId::Resolving, async { self.resolve(&job, &records) })
            .await?;

        advance(sm, StageId::BuildingModel, report)?;
        self.in_process(
            job.id,
            StageId::BuildingModel,
            self.build_model(&job, &ws, &records, &resolution),
        )
        .await?;

        advance(sm, StageId::Inferring, report)?;
        self.infer(&job, &ws).await?;

        advance(sm, StageId::Annotating, report)?;
        let placeholders = Placeholders::new(job.id, ws.dir())
            .input(&ws.posterior_trees())
            .output(&ws.mcc_tree())
            .burnin(job.config.model.burnin_trees());
        let mcc = run_stage_tool(
            &self.registry,
            job.id,
            StageId::Annotating,
            &self.config.tools.annotator,
            &placeholders,
            ws.dir(),
            &ws.job_log(),
            &ws.mcc_tree(),
        )
        .await?;

        advance(sm, StageId::Visualizing, report)?;
        let placeholders = Placeholders::new(job.id, ws.dir())
            .input(&mcc)
            .output(&ws.visualization());
        let kml = run_stage_tool(
            &self.registry,
            job.id,
            StageId::Visualizing,
            &self.config.tools.visualizer,
            &placeholders,
            ws.dir(),
            &ws.job_log(),
            &ws.visualization(),
        )
        .await?;

        Ok(vec![mcc, kml, ws.posterior_log()])
    }

    /// Aligning, Resolving and a no-op model stage, without inference
    pub async fn validate(&self, job: &Job) -> Result<ValidationReport> {
        job.config.validate()?;
        let ws = JobWorkspace::new(&self.config.work_root, job.id);
        ws.create().await?;

        let records = self.align(job, &ws).await?;
        let resolution = self
            .in_process(job.id, StageId::Resolving, async { self.resolve(job, &records) })
            .await?;
        debug!("Job {}: model construction skipped during validation", job.id);

        info!(
            "Job {}: validation passed with {} locations",
            job.id,
            resolution.state_count()
        );
        Ok(ValidationReport {
            state_count: resolution.state_count(),
            locations: resolution.partition.names(),
            common_type: resolution.common_type.clone(),
            records_used: resolution.records.len(),
            records_dropped: records.len() - resolution.records.len(),
        })
    }

    async fn align(&self, job: &Job, ws: &JobWorkspace) -> Result<Vec<SequenceRecord>> {
        let records = materialize(&job.input, self.records.as_ref())?;
        write_fasta(&records, &ws.input_fasta()).await?;

        let placeholders = Placeholders::new(job.id, ws.dir())
            .input(&ws.input_fasta())
            .output(&ws.aligned_fasta());
        run_stage_tool(
            &self.registry,
            job.id,
            StageId::Aligning,
            &self.config.tools.aligner,
            &placeholders,
            ws.dir(),
            &ws.job_log(),
            &ws.aligned_fasta(),
        )
        .await?;
        Ok(records)
    }

    fn resolve(&self, job: &Job, records: &[SequenceRecord]) -> Result<Resolution> {
        let located: Vec<LocatedRecord> = records
            .iter()
            .map(|r| LocatedRecord::new(r.id.clone(), r.location.clone(), self.resolver.ancestors(&r.id)))
            .collect();
        let disjointer =
            GeonameDisjointer::new(job.config.disjoint_policy(self.config.max_states));
        Ok(disjointer.resolve(&located)?)
    }

    async fn build_model(
        &self,
        job: &Job,
        ws: &JobWorkspace,
        records: &[SequenceRecord],
        resolution: &Resolution,
    ) -> Result<PathBuf> {
        let dates: HashMap<&str, &Option<String>> = records
            .iter()
            .map(|r| (r.id.as_str(), &r.collection_date))
            .collect();
        let taxa: Vec<TaxonState> = resolution
            .records
            .iter()
            .map(|r| TaxonState {
                id: r.record_id.clone(),
                state: r.location.name.clone(),
                latitude: r.location.latitude,
                longitude: r.location.longitude,
                date: dates.get(r.record_id.as_str()).and_then(|d| (*d).clone()),
            })
            .collect();

        let alignment = ws.aligned_fasta();
        let loggers = LoggerFiles::default();
        let document = self.model_builder.build(&ModelRequest {
            alignment: &alignment,
            taxa: &taxa,
            partition: &resolution.partition,
            config: &job.config,
            loggers: &loggers,
        })?;

        let path = ws.model();
        tokio::fs::write(&path, document).await?;
        debug!("Job {}: wrote {}", job.id, path.display());
        Ok(path)
    }

    /// Stage that runs inside the job task, registered so it can be stopped
    async fn in_process<T, Fut>(&self, job_id: JobId, stage: StageId, work: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let handle = ProcessHandle::in_process(stage);
        self.registry.register(job_id, handle.clone());
        let result = tokio::select! {
            result = work => result,
            _ = handle.cancelled() => Err(handle.kill_error()),
        };
        self.registry.deregister(job_id);
        if handle.is_killed() {
            return Err(handle.kill_error());
        }
        result
    }

    async fn infer(&self, job: &Job, ws: &JobWorkspace) -> Result<()> {
        let mut retry = InferenceRetry::new();
        // shared across attempts: at most two progress reports per job
        let mut tracker = ProgressTracker::new(
            &self.config.watcher.progress_milestones,
            job.config.model.chain_length,
        );
        let mut attempt = InferenceAttempt::Default;

        loop {
            let err = match self.infer_attempt(job, ws, attempt, &mut tracker).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            match retry.on_failure(&err) {
                Some(next) => {
                    warn!(
                        "Job {}: inference attempt {} failed ({}), retrying with {:?}",
                        job.id,
                        attempt.number(),
                        err,
                        next.scaling_args(&self.config)
                    );
                    ws.set_aside(
                        &[ws.posterior_trees(), ws.rates_log(), ws.posterior_log()],
                        attempt.number(),
                    )
                    .await?;
                    attempt = next;
                }
                None => return Err(err),
            }
        }
    }

    async fn infer_attempt(
        &self,
        job: &Job,
        ws: &JobWorkspace,
        attempt: InferenceAttempt,
        tracker: &mut ProgressTracker,
    ) -> Result<()> {
        let watcher = &self.config.watcher;
        let placeholders = Placeholders::new(job.id, ws.dir())
            .input(&ws.model())
            .output(&ws.posterior_trees())
            .scaling(attempt.scaling_args(&self.config));

        let tail = LogTail::from_end(ws.job_log()).await;
        let process = ToolProcess::spawn(
            &self.registry,
            job.id,
            StageId::Inferring,
            &self.config.tools.inference,
            &placeholders,
            ws.dir(),
            &ws.job_log(),
        )?;
        info!("Job {}: inference attempt {}", job.id, attempt.number());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let log_watcher = spawn_log_watcher(
            tail,
            LogLineParser::new(watcher.fatal_signature.clone()),
            Duration::from_millis(watcher.poll_interval_ms),
            tx,
        );
        let degenerate_watcher = spawn_degenerate_watcher(
            job.id,
            &ws.rates_log(),
            DegenerateCheck::new(watcher, job.config.model.chain_length),
            watcher,
            self.registry.clone(),
        );

        let mut fatal = None;
        let wait = process.wait(&self.registry);
        tokio::pin!(wait);
        let exit = loop {
            tokio::select! {
                result = &mut wait => break result,
                Some(event) = rx.recv() => self.observe(job, event, tracker, &mut fatal).await,
            }
        };

        log_watcher.stop().await;
        degenerate_watcher.stop().await;
        while let Ok(event) = rx.try_recv() {
            self.observe(job, event, tracker, &mut fatal).await;
        }

        let status = exit?;
        if let Some(line) = fatal {
            return Err(OrchestratorError::FatalSignature {
                stage: StageId::Inferring,
                line,
            });
        }
        require_artifact(StageId::Inferring, &ws.posterior_trees()).await?;
        if !status.success() {
            return Err(OrchestratorError::ExternalTool {
                stage: StageId::Inferring,
                message: format!("{} exited with {}", self.config.tools.inference.program, status),
            });
        }
        Ok(())
    }

    async fn observe(
        &self,
        job: &Job,
        event: LogEvent,
        tracker: &mut ProgressTracker,
        fatal: &mut Option<String>,
    ) {
        match event {
            LogEvent::FatalSignature(line) => {
                warn!("Job {}: fatal signature in inference log: {}", job.id, line);
                fatal.get_or_insert(line);
            }
            other => {
                if let Some(report) = tracker.observe(&other) {
                    info!(
                        "Job {}: {:.0}% milestone at state {}, ~{}s remaining",
                        job.id,
                        report.milestone * 100.0,
                        report.position,
                        report.remaining_secs
                    );
                    deliver(&self.notifier, job, Notification::Progress(report)).await;
                }
            }
        }
    }

    async fn finish(&self, sm: &mut JobStateMachine, outcome: Result<Vec<PathBuf>>) {
        let job_id = sm.job().id;
        let notification = match outcome {
            Ok(artifacts) => match sm.succeed(artifacts.clone()) {
                Ok(()) => {
                    info!("Job {}: succeeded with {} artifacts", job_id, artifacts.len());
                    Notification::Succeeded { artifacts }
                }
                Err(e) => fail(sm, e),
            },
            Err(OrchestratorError::Killed(reason)) => {
                info!("Job {}: killed: {}", job_id, reason);
                if let Err(e) = sm.kill(reason.clone()) {
                    error!("Job {}: {}", job_id, e);
                }
                Notification::Killed { reason }
            }
            Err(e) => fail(sm, e),
        };
        deliver(&self.notifier, sm.job(), notification).await;
    }
}

fn advance<F>(sm: &mut JobStateMachine, to: StageId, report: &F) -> Result<()>
where
    F: Fn(&Job),
{
    sm.advance(to)?;
    info!("Job {}: entering {}", sm.job().id, to);
    report(sm.job());
    Ok(())
}

fn fail(sm: &mut JobStateMachine, e: OrchestratorError) -> Notification {
    let job_id = sm.job().id;
    let stage = sm.job().state.current_stage();
    error!(
        "Job {}: failed during {} [{}]: {}",
        job_id,
        stage.map(|s| s.as_str()).unwrap_or("startup"),
        e.category(),
        e
    );
    let reason = e.user_message();
    if let Err(t) = sm.fail(reason.clone(), e.category()) {
        error!("Job {}: {}", job_id, t);
    }
    Notification::Failed { reason }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

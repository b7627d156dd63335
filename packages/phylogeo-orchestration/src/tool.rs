//! External tool invocation
//!
//! Each stage runs one external program with output appended to the job log.
//! The child is registered for the whole of its life and deregistered when it
//! exits or is killed, before the next stage starts.

use crate::config::ToolCommand;
use crate::error::{OrchestratorError, Result};
use crate::job::{JobId, StageId};
use crate::registry::{ProcessHandle, ProcessRegistry};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Argument that expands to the numerical scaling arguments
pub const SCALING_PLACEHOLDER: &str = "{scaling}";

/// Values substituted into a tool's argument template
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    vars: Vec<(&'static str, String)>,
    scaling: Vec<String>,
}

impl Placeholders {
    pub fn new(job_id: JobId, workdir: &Path) -> Self {
        Self {
            vars: vec![
                ("{job_id}", job_id.to_string()),
                ("{workdir}", workdir.display().to_string()),
            ],
            scaling: Vec::new(),
        }
    }

    pub fn input(self, path: &Path) -> Self {
        self.set("{input}", path.display().to_string())
    }

    pub fn output(self, path: &Path) -> Self {
        self.set("{output}", path.display().to_string())
    }

    pub fn burnin(self, trees: u64) -> Self {
        self.set("{burnin}", trees.to_string())
    }

    pub fn scaling(mut self, args: &[String]) -> Self {
        self.scaling = args.to_vec();
        self
    }

    fn set(mut self, key: &'static str, value: String) -> Self {
        self.vars.retain(|(k, _)| *k != key);
        self.vars.push((key, value));
        self
    }

    /// Expand a command template into program and arguments
    pub fn render(&self, command: &ToolCommand) -> (String, Vec<String>) {
        let mut args = Vec::with_capacity(command.args.len());
        for arg in &command.args {
            if arg == SCALING_PLACEHOLDER {
                args.extend(self.scaling.iter().cloned());
            } else {
                args.push(self.substitute(arg));
            }
        }
        (self.substitute(&command.program), args)
    }

    fn substitute(&self, text: &str) -> String {
        self.vars
            .iter()
            .fold(text.to_string(), |acc, (key, value)| acc.replace(key, value))
    }
}

/// A spawned stage process, registered under its job id
pub struct ToolProcess {
    job_id: JobId,
    stage: StageId,
    child: Child,
    handle: ProcessHandle,
}

impl ToolProcess {
    /// Spawn `command` in `workdir`, appending stdout and stderr to `log_path`
    pub fn spawn(
        registry: &ProcessRegistry,
        job_id: JobId,
        stage: StageId,
        command: &ToolCommand,
        placeholders: &Placeholders,
        workdir: &Path,
        log_path: &Path,
    ) -> Result<Self> {
        let (program, args) = placeholders.render(command);
        let log = OpenOptions::new().create(true).append(true).open(log_path)?;
        let stderr = log.try_clone()?;

        debug!("Job {}: {} running {} {:?}", job_id, stage, program, args);
        let child = Command::new(&program)
            .args(&args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OrchestratorError::ExternalTool {
                stage,
                message: format!("failed to start {}: {}", program, e),
            })?;

        let handle = ProcessHandle::external(stage, child.id());
        registry.register(job_id, handle.clone());
        info!("Job {}: {} started (pid {:?})", job_id, stage, child.id());

        Ok(Self {
            job_id,
            stage,
            child,
            handle,
        })
    }

    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    /// Wait for exit or kill, then deregister.
    ///
    /// A killed process yields the kill reason as the error; an exit status is
    /// returned as-is so callers can classify it.
    pub async fn wait(mut self, registry: &ProcessRegistry) -> Result<ExitStatus> {
        let status = tokio::select! {
            status = self.child.wait() => Some(status),
            _ = self.handle.cancelled() => None,
        };
        registry.deregister(self.job_id);

        match status {
            Some(_) if self.handle.is_killed() => Err(self.handle.kill_error()),
            Some(status) => {
                let status = status?;
                info!("Job {}: {} exited with {}", self.job_id, self.stage, status);
                Ok(status)
            }
            None => {
                if let Err(e) = self.child.kill().await {
                    warn!(
                        "Job {}: failed to terminate {} process: {}",
                        self.job_id, self.stage, e
                    );
                }
                Err(self.handle.kill_error())
            }
        }
    }
}

/// Run a stage tool to completion; success means exit code 0 and `artifact` present
#[allow(clippy::too_many_arguments)]
pub async fn run_stage_tool(
    registry: &ProcessRegistry,
    job_id: JobId,
    stage: StageId,
    command: &ToolCommand,
    placeholders: &Placeholders,
    workdir: &Path,
    log_path: &Path,
    artifact: &Path,
) -> Result<PathBuf> {
    let process = ToolProcess::spawn(
        registry,
        job_id,
        stage,
        command,
        placeholders,
        workdir,
        log_path,
    )?;
    let status = process.wait(registry).await?;
    if !status.success() {
        return Err(OrchestratorError::ExternalTool {
            stage,
            message: format!("{} exited with {}", command.program, status),
        });
    }
    require_artifact(stage, artifact).await
}

pub async fn require_artifact(stage: StageId, artifact: &Path) -> Result<PathBuf> {
    if tokio::fs::try_exists(artifact).await? {
        Ok(artifact.to_path_buf())
    } else {
        Err(OrchestratorError::MissingArtifact {
            stage,
            path: artifact.to_path_buf(),
        })
    }
}

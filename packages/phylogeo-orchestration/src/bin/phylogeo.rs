//! Phylogeo CLI
//!
//! Runs or validates a single job file against a supervisor configuration.
//!
//! # Usage
//!
//! ```bash
//! # Full pipeline, waits for the terminal state
//! phylogeo run --config supervisor.yaml --job h3n2.yaml
//!
//! # Alignment and location resolution only
//! phylogeo validate --config supervisor.yaml --job h3n2.yaml
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use phylogeo_geo::{GeonameId, InMemoryAncestorResolver};
use phylogeo_orchestration::{
    JobConfig, JobInput, JobRequest, JobService, JobState, LogNotifier, PipelineOrchestrator,
    ProcessRegistry, SequenceRecord, SupervisorConfig,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "phylogeo")]
#[command(about = "Phylogeographic inference job supervisor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job to completion
    Run {
        /// Supervisor configuration (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// Job file (YAML)
        #[arg(short, long)]
        job: PathBuf,
    },

    /// Check configuration and locations without running inference
    Validate {
        /// Supervisor configuration (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// Job file (YAML)
        #[arg(short, long)]
        job: PathBuf,
    },
}

/// Job submission with the ancestor table its locations resolve against
#[derive(Debug, Deserialize)]
struct JobFile {
    #[serde(default)]
    name: Option<String>,
    contact: String,
    #[serde(default)]
    config: JobConfig,
    records: Vec<SequenceRecord>,
    /// record id -> ancestor geoname ids
    #[serde(default)]
    ancestors: HashMap<String, Vec<GeonameId>>,
}

fn load(config: &Path, job: &Path) -> anyhow::Result<(JobService, JobRequest)> {
    let supervisor = SupervisorConfig::from_yaml(config)
        .with_context(|| format!("loading {}", config.display()))?;
    let text = std::fs::read_to_string(job).with_context(|| format!("reading {}", job.display()))?;
    let file: JobFile =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", job.display()))?;

    let resolver: InMemoryAncestorResolver = file.ancestors.into_iter().collect();
    let orchestrator = PipelineOrchestrator::new(
        supervisor,
        ProcessRegistry::new(),
        Arc::new(resolver),
        Arc::new(LogNotifier),
    );
    let request = JobRequest {
        name: file.name,
        contact: file.contact,
        config: file.config,
        input: JobInput::Sequences(file.records),
    };
    Ok((JobService::new(Arc::new(orchestrator)), request))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, job } => {
            let (service, request) = load(&config, &job)?;
            let job_id = service
                .submit(request)
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            let job = service.join(job_id).await?;
            println!("{}", serde_json::to_string_pretty(&job.state)?);
            if !matches!(job.state, JobState::Succeeded { .. }) {
                std::process::exit(1);
            }
        }
        Commands::Validate { config, job } => {
            let (service, request) = load(&config, &job)?;
            match service.validate(request).await {
                Ok(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                Err(e) => {
                    eprintln!("{}", e.user_message());
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

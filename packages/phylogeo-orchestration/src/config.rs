//! Service and per-job configuration
//!
//! `SupervisorConfig` is read once from a versioned YAML file; `JobConfig` arrives
//! with each submission. Both are checked through `Validatable` before use.

use crate::error::{OrchestratorError, Result};
use phylogeo_geo::{DisjointPolicy, GeoHierarchy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Supported `version` values of the supervisor YAML schema
pub const SUPPORTED_VERSIONS: &[u64] = &[1];

/// Trait for validatable configuration objects
pub trait Validatable {
    /// Returns `Ok(())` if valid, `Err(OrchestratorError::Validation)` naming the field otherwise
    fn validate(&self) -> Result<()>;

    fn config_name(&self) -> &'static str {
        "Config"
    }
}

fn range_error(config: &str, field: &str, value: impl std::fmt::Display, expected: &str) -> OrchestratorError {
    OrchestratorError::validation(format!(
        "{}.{} = {} is out of range (expected {})",
        config, field, value, expected
    ))
}

// ═══════════════════════════════════════════════════════════════════════════
// Per-job configuration
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubstitutionModel {
    Hky,
    Gtr,
    Tn93,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockModel {
    Strict,
    UncorrelatedLognormal,
    RandomLocal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreePrior {
    Constant,
    Exponential,
    Skygrid,
}

/// Model hyperparameters chosen by the submitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelHyperparameters {
    /// Total MCMC states (the work-unit budget)
    pub chain_length: u64,
    /// Log every n states
    pub subsample_rate: u64,
    pub substitution_model: SubstitutionModel,
    pub clock_model: ClockModel,
    pub tree_prior: TreePrior,
    pub gamma: bool,
    pub invariant_sites: bool,
    /// Fraction of logged trees discarded before annotation
    pub burnin_fraction: f64,
}

impl Default for ModelHyperparameters {
    fn default() -> Self {
        Self {
            chain_length: 10_000_000,
            subsample_rate: 10_000,
            substitution_model: SubstitutionModel::Hky,
            clock_model: ClockModel::Strict,
            tree_prior: TreePrior::Constant,
            gamma: false,
            invariant_sites: false,
            burnin_fraction: 0.1,
        }
    }
}

impl ModelHyperparameters {
    /// Number of logged trees to discard before annotation
    pub fn burnin_trees(&self) -> u64 {
        let logged = self.chain_length / self.subsample_rate.max(1);
        (logged as f64 * self.burnin_fraction).floor() as u64
    }
}

impl Validatable for ModelHyperparameters {
    fn validate(&self) -> Result<()> {
        if self.chain_length == 0 {
            return Err(range_error(self.config_name(), "chain_length", 0, "> 0"));
        }
        if self.subsample_rate == 0 || self.subsample_rate > self.chain_length {
            return Err(range_error(
                self.config_name(),
                "subsample_rate",
                self.subsample_rate,
                "1..=chain_length",
            ));
        }
        if !(0.0..1.0).contains(&self.burnin_fraction) {
            return Err(range_error(
                self.config_name(),
                "burnin_fraction",
                self.burnin_fraction,
                "[0, 1)",
            ));
        }
        Ok(())
    }

    fn config_name(&self) -> &'static str {
        "model"
    }
}

/// GLM covariates supplied by the submitter: `values[predictor][location]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictorTable {
    pub names: Vec<String>,
    pub locations: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl PredictorTable {
    pub fn location_index(&self, name: &str) -> Option<usize> {
        self.locations
            .iter()
            .position(|l| l.eq_ignore_ascii_case(name))
    }
}

impl Validatable for PredictorTable {
    fn validate(&self) -> Result<()> {
        if self.names.is_empty() || self.locations.is_empty() {
            return Err(OrchestratorError::validation(
                "custom_predictors needs at least one predictor and one location",
            ));
        }
        if self.values.len() != self.names.len() {
            return Err(OrchestratorError::validation(format!(
                "custom_predictors has {} predictor names but {} value rows",
                self.names.len(),
                self.values.len()
            )));
        }
        for (name, row) in self.names.iter().zip(&self.values) {
            if row.len() != self.locations.len() {
                return Err(OrchestratorError::validation(format!(
                    "predictor '{}' has {} values for {} locations",
                    name,
                    row.len(),
                    self.locations.len()
                )));
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(OrchestratorError::validation(format!(
                    "predictor '{}' contains a non-finite value",
                    name
                )));
            }
        }
        Ok(())
    }

    fn config_name(&self) -> &'static str {
        "custom_predictors"
    }
}

/// Pipeline configuration of one job
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub use_glm: bool,
    pub custom_predictors: Option<PredictorTable>,
    /// Feature code forced as the working granularity of location resolution
    pub disjoiner_level: Option<String>,
    pub geo_uncertainty: bool,
    pub model: ModelHyperparameters,
}

impl JobConfig {
    /// Default covariates are used when GLM is on and no table was supplied
    pub fn uses_default_glm(&self) -> bool {
        self.use_glm && self.custom_predictors.is_none()
    }

    pub fn disjoint_policy(&self, max_states: usize) -> DisjointPolicy {
        DisjointPolicy {
            use_default_glm: self.uses_default_glm(),
            max_states,
            level_override: self.disjoiner_level.clone(),
        }
    }
}

impl Validatable for JobConfig {
    fn validate(&self) -> Result<()> {
        self.model.validate()?;
        if let Some(table) = &self.custom_predictors {
            if !self.use_glm {
                return Err(OrchestratorError::validation(
                    "custom_predictors requires use_glm",
                ));
            }
            table.validate()?;
        }
        if let Some(level) = &self.disjoiner_level {
            if !GeoHierarchy::standard().is_known(level) {
                return Err(OrchestratorError::validation(format!(
                    "disjoiner_level '{}' is not a known feature code",
                    level
                )));
            }
            if self.uses_default_glm() {
                return Err(OrchestratorError::validation(
                    "disjoiner_level cannot be combined with default GLM predictors",
                ));
            }
        }
        Ok(())
    }

    fn config_name(&self) -> &'static str {
        "job"
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Service configuration
// ═══════════════════════════════════════════════════════════════════════════

/// External program and its argument template.
///
/// Arguments may contain `{input}`, `{output}`, `{workdir}`, `{job_id}` and `{burnin}`;
/// an argument that is exactly `{scaling}` expands to the numerical scaling arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub aligner: ToolCommand,
    pub inference: ToolCommand,
    pub annotator: ToolCommand,
    pub visualizer: ToolCommand,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            aligner: ToolCommand::new("muscle", &["-in", "{input}", "-out", "{output}"]),
            inference: ToolCommand::new("beast", &["-overwrite", "{scaling}", "{input}"]),
            annotator: ToolCommand::new(
                "treeannotator",
                &["-burnin", "{burnin}", "{input}", "{output}"],
            ),
            visualizer: ToolCommand::new(
                "spread3",
                &["-parse", "-tree", "{input}", "-output", "{output}"],
            ),
        }
    }
}

/// Inference log watcher settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub poll_interval_ms: u64,
    /// Completion fractions at which progress is reported (at most two)
    pub progress_milestones: Vec<f64>,
    /// Text whose appearance in the log fails the stage regardless of exit code
    pub fatal_signature: String,
    /// Fraction of the chain after which the rate matrix is inspected
    pub degenerate_checkpoint: f64,
    /// Value every rate starts from
    pub initial_rate: f64,
    /// Substring identifying rate columns in the rate-matrix log header
    pub rate_column_marker: String,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            progress_milestones: vec![0.1, 0.5],
            fatal_signature: "java.lang.RuntimeException".to_string(),
            degenerate_checkpoint: 0.1,
            initial_rate: 1.0,
            rate_column_marker: ".rates".to_string(),
        }
    }
}

impl Validatable for WatcherConfig {
    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(range_error(self.config_name(), "poll_interval_ms", 0, "> 0"));
        }
        if self.progress_milestones.len() > 2 {
            return Err(OrchestratorError::validation(
                "watcher.progress_milestones allows at most two milestones",
            ));
        }
        let mut previous = 0.0;
        for m in &self.progress_milestones {
            if !(*m > previous && *m < 1.0) {
                return Err(range_error(
                    self.config_name(),
                    "progress_milestones",
                    m,
                    "increasing values in (0, 1)",
                ));
            }
            previous = *m;
        }
        if !(self.degenerate_checkpoint > 0.0 && self.degenerate_checkpoint <= 1.0) {
            return Err(range_error(
                self.config_name(),
                "degenerate_checkpoint",
                self.degenerate_checkpoint,
                "(0, 1]",
            ));
        }
        if self.fatal_signature.trim().is_empty() {
            return Err(OrchestratorError::validation(
                "watcher.fatal_signature must not be empty",
            ));
        }
        Ok(())
    }

    fn config_name(&self) -> &'static str {
        "watcher"
    }
}

/// Service-wide configuration (YAML schema v1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorConfig {
    pub version: u64,
    /// Per-job working directories are created below this
    pub work_root: PathBuf,
    pub max_states: usize,
    pub tools: ToolsConfig,
    /// Scaling arguments of the first inference attempt
    pub default_scaling: Vec<String>,
    /// Scaling arguments of the single fallback attempt
    pub fallback_scaling: Vec<String>,
    pub watcher: WatcherConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            version: 1,
            work_root: std::env::temp_dir().join("phylogeo"),
            max_states: phylogeo_geo::disjoint::DEFAULT_MAX_STATES,
            tools: ToolsConfig::default(),
            default_scaling: Vec::new(),
            fallback_scaling: vec!["-beagle_scaling".to_string(), "always".to_string()],
            watcher: WatcherConfig::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let raw: serde_yaml::Value = serde_yaml::from_str(content)?;
        match raw.get("version").and_then(|v| v.as_u64()) {
            None => {
                return Err(OrchestratorError::config(
                    "Missing 'version' field in configuration file. Add 'version: 1' to the top of your YAML file.",
                ))
            }
            Some(v) if !SUPPORTED_VERSIONS.contains(&v) => {
                return Err(OrchestratorError::config(format!(
                    "Unsupported configuration version {}. Supported versions: 1",
                    v
                )))
            }
            Some(_) => {}
        }

        let config: SupervisorConfig = serde_yaml::from_value(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

impl Validatable for SupervisorConfig {
    fn validate(&self) -> Result<()> {
        if self.max_states < phylogeo_geo::disjoint::MIN_STATES {
            return Err(range_error(self.config_name(), "max_states", self.max_states, ">= 2"));
        }
        for (name, tool) in [
            ("aligner", &self.tools.aligner),
            ("inference", &self.tools.inference),
            ("annotator", &self.tools.annotator),
            ("visualizer", &self.tools.visualizer),
        ] {
            if tool.program.trim().is_empty() {
                return Err(OrchestratorError::validation(format!(
                    "tools.{}.program must not be empty",
                    name
                )));
            }
        }
        self.watcher.validate()
    }

    fn config_name(&self) -> &'static str {
        "supervisor"
    }
}

use crate::job::StageId;
use phylogeo_geo::ResolutionError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Reason given to submitters for failures they cannot act on
pub const INTERNAL_ERROR_MESSAGE: &str =
    "An internal error occurred while processing your job. Please try again later.";

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("Location resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Stage {stage} failed: {message}")]
    ExternalTool { stage: StageId, message: String },

    #[error("Stage {stage} did not produce {}", path.display())]
    MissingArtifact { stage: StageId, path: PathBuf },

    #[error("Stage {stage} reported a fatal runtime error: {line}")]
    FatalSignature { stage: StageId, line: String },

    #[error("Model is numerically degenerate: {0}")]
    DegenerateModel(String),

    #[error("Job was stopped: {0}")]
    Killed(String),

    #[error("job does not exist: {0}")]
    JobNotFound(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Failure with a message that is safe to show the submitter
    #[error("{diagnostic}")]
    Pipeline {
        user_message: String,
        diagnostic: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn validation<E: std::fmt::Display>(e: E) -> Self {
        Self::Validation(e.to_string())
    }

    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    pub fn pipeline(user_message: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self::Pipeline {
            user_message: user_message.into(),
            diagnostic: diagnostic.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) | Self::Config(_) => ErrorCategory::Validation,
            Self::Resolution(_) => ErrorCategory::Resolution,
            Self::ExternalTool { .. } | Self::MissingArtifact { .. } | Self::FatalSignature { .. } => {
                ErrorCategory::ExternalTool
            }
            Self::DegenerateModel(_) => ErrorCategory::DegenerateModel,
            Self::Killed(_) => ErrorCategory::Killed,
            Self::Pipeline { .. } => ErrorCategory::Pipeline,
            Self::JobNotFound(_)
            | Self::InvalidStateTransition { .. }
            | Self::Io(_)
            | Self::Yaml(_)
            | Self::Other(_) => ErrorCategory::Infrastructure,
        }
    }

    /// Reason that may be shown to the submitter; never leaks internal diagnostics
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) => format!("Invalid job configuration: {}", msg),
            Self::Config(_) => INTERNAL_ERROR_MESSAGE.to_string(),
            Self::Resolution(e) => format!("Could not build discrete locations: {}", e),
            Self::ExternalTool { stage, .. }
            | Self::MissingArtifact { stage, .. }
            | Self::FatalSignature { stage, .. } => {
                format!("The {} step failed to complete.", stage.description())
            }
            Self::DegenerateModel(reason) => reason.clone(),
            Self::Killed(reason) => reason.clone(),
            Self::Pipeline { user_message, .. } => user_message.clone(),
            _ => INTERNAL_ERROR_MESSAGE.to_string(),
        }
    }
}

/// Error taxonomy used for job outcomes and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Bad submitted configuration, rejected before the job runs
    Validation,
    /// Too few or too many disjoint locations, canonicalization failure
    Resolution,
    /// Non-zero exit, missing artifact or fatal log signature
    ExternalTool,
    /// Proactive kill of a numerically degenerate model
    DegenerateModel,
    /// Explicit stop request
    Killed,
    /// Designated failure carrying its own user-facing message
    Pipeline,
    /// Anything unanticipated
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Resolution => "resolution",
            ErrorCategory::ExternalTool => "external_tool",
            ErrorCategory::DegenerateModel => "degenerate_model",
            ErrorCategory::Killed => "killed",
            ErrorCategory::Pipeline => "pipeline",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "validation" => Ok(ErrorCategory::Validation),
            "resolution" => Ok(ErrorCategory::Resolution),
            "external_tool" => Ok(ErrorCategory::ExternalTool),
            "degenerate_model" => Ok(ErrorCategory::DegenerateModel),
            "killed" => Ok(ErrorCategory::Killed),
            "pipeline" => Ok(ErrorCategory::Pipeline),
            "infrastructure" => Ok(ErrorCategory::Infrastructure),
            _ => Err(OrchestratorError::config(format!(
                "Invalid error category: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

use crate::config::SupervisorConfig;
use crate::error::OrchestratorError;

/// Numerical configuration of one inference attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceAttempt {
    Default,
    /// Conservative rescaling after a failed default attempt
    Fallback,
}

impl InferenceAttempt {
    pub fn number(&self) -> u32 {
        match self {
            InferenceAttempt::Default => 1,
            InferenceAttempt::Fallback => 2,
        }
    }

    pub fn scaling_args<'a>(&self, config: &'a SupervisorConfig) -> &'a [String] {
        match self {
            InferenceAttempt::Default => &config.default_scaling,
            InferenceAttempt::Fallback => &config.fallback_scaling,
        }
    }
}

/// Two-attempt retry policy of the inference stage.
///
/// `attempt(default)` -> on missing artifact or fatal signature -> `attempt(fallback)`
/// -> on any failure -> fatal. Every other failure of the default attempt is fatal.
#[derive(Debug, Clone)]
pub struct InferenceRetry {
    current: Option<InferenceAttempt>,
}

impl Default for InferenceRetry {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceRetry {
    pub fn new() -> Self {
        Self {
            current: Some(InferenceAttempt::Default),
        }
    }

    /// Attempt to run next, `None` once the policy is exhausted
    pub fn current(&self) -> Option<InferenceAttempt> {
        self.current
    }

    /// Record a failed attempt; returns the attempt to run next, if any
    pub fn on_failure(&mut self, error: &OrchestratorError) -> Option<InferenceAttempt> {
        self.current = match (self.current, error) {
            (
                Some(InferenceAttempt::Default),
                OrchestratorError::MissingArtifact { .. } | OrchestratorError::FatalSignature { .. },
            ) => Some(InferenceAttempt::Fallback),
            _ => None,
        };
        self.current
    }
}

use crate::job::Job;
use crate::watcher::ProgressReport;
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Message delivered to the submitter
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Started,
    Progress(ProgressReport),
    Succeeded { artifacts: Vec<PathBuf> },
    /// `reason` is always submitter-safe
    Failed { reason: String },
    Killed { reason: String },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Started => "started",
            Notification::Progress(_) => "progress",
            Notification::Succeeded { .. } => "succeeded",
            Notification::Failed { .. } => "failed",
            Notification::Killed { .. } => "killed",
        }
    }
}

/// Delivery channel to the submitter (email in production)
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, job: &Job, notification: &Notification) -> anyhow::Result<()>;
}

/// Deliver, logging failures instead of raising them into the job task
pub async fn deliver(notifier: &Arc<dyn Notifier>, job: &Job, notification: Notification) {
    if let Err(e) = notifier.notify(job, &notification).await {
        warn!(
            "Job {}: failed to deliver {} notification to {}: {:#}",
            job.id,
            notification.kind(),
            job.contact,
            e
        );
    }
}

/// Writes notifications to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, job: &Job, notification: &Notification) -> anyhow::Result<()> {
        match notification {
            Notification::Started => info!("Job {}: '{}' started", job.id, job.display_name()),
            Notification::Progress(report) => info!(
                "Job {}: {:.0}% of the chain done, about {} min remaining",
                job.id,
                report.milestone * 100.0,
                report.remaining_secs / 60
            ),
            Notification::Succeeded { artifacts } => info!(
                "Job {}: '{}' finished, {} result files",
                job.id,
                job.display_name(),
                artifacts.len()
            ),
            Notification::Failed { reason } => {
                info!("Job {}: '{}' failed: {}", job.id, job.display_name(), reason)
            }
            Notification::Killed { reason } => {
                info!("Job {}: '{}' stopped: {}", job.id, job.display_name(), reason)
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobConfig;
    use crate::job::JobInput;

    struct Unreachable;

    #[async_trait]
    impl Notifier for Unreachable {
        async fn notify(&self, _job: &Job, _n: &Notification) -> anyhow::Result<()> {
            anyhow::bail!("smtp connection refused")
        }
    }

    fn job() -> Job {
        Job::new(
            None,
            "someone@example.org".to_string(),
            JobConfig::default(),
            JobInput::Accessions(vec!["CY1".to_string()]),
        )
    }

    #[tokio::test]
    async fn test_delivery_failure_is_swallowed() {
        let notifier: Arc<dyn Notifier> = Arc::new(Unreachable);
        deliver(
            &notifier,
            &job(),
            Notification::Failed {
                reason: "too few distinct locations: 1".into(),
            },
        )
        .await;
    }

    #[tokio::test]
    async fn test_log_notifier_accepts_everything() {
        let notifier = LogNotifier;
        let job = job();
        for n in [
            Notification::Started,
            Notification::Succeeded { artifacts: vec![] },
            Notification::Killed {
                reason: "stopped".into(),
            },
        ] {
            assert!(notifier.notify(&job, &n).await.is_ok());
        }
    }

    #[test]
    fn test_notification_serializes_with_tag() {
        let json = serde_json::to_value(Notification::Failed {
            reason: "bad".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "failed");
        assert_eq!(json["reason"], "bad");
    }
}

use crate::job::JobId;
use std::path::{Path, PathBuf};

/// Per-job working directory: `<work_root>/<job_id>/`.
///
/// Artifacts are left in place after the job ends, whatever the outcome.
#[derive(Debug, Clone)]
pub struct JobWorkspace {
    dir: PathBuf,
}

impl JobWorkspace {
    pub fn new(work_root: &Path, job_id: JobId) -> Self {
        Self {
            dir: work_root.join(job_id.to_string()),
        }
    }

    pub async fn create(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn input_fasta(&self) -> PathBuf {
        self.dir.join("input.fasta")
    }

    pub fn aligned_fasta(&self) -> PathBuf {
        self.dir.join("aligned.fasta")
    }

    pub fn model(&self) -> PathBuf {
        self.dir.join("model.xml")
    }

    /// Combined stdout/stderr of every stage
    pub fn job_log(&self) -> PathBuf {
        self.dir.join("job.log")
    }

    pub fn posterior_log(&self) -> PathBuf {
        self.dir.join("posterior.log")
    }

    pub fn posterior_trees(&self) -> PathBuf {
        self.dir.join("posterior.trees")
    }

    pub fn rates_log(&self) -> PathBuf {
        self.dir.join("rates.log")
    }

    pub fn mcc_tree(&self) -> PathBuf {
        self.dir.join("mcc.tree")
    }

    pub fn visualization(&self) -> PathBuf {
        self.dir.join("visualization.kml")
    }

    /// Move a failed attempt's outputs aside so the next attempt is judged on its own
    pub async fn set_aside(&self, paths: &[PathBuf], attempt: u32) -> std::io::Result<()> {
        for path in paths {
            if tokio::fs::try_exists(path).await? {
                let mut aside = path.clone().into_os_string();
                aside.push(format!(".attempt{}", attempt));
                tokio::fs::rename(path, PathBuf::from(aside)).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_layout_and_set_aside() {
        let root = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        let ws = JobWorkspace::new(root.path(), id);
        ws.create().await.unwrap();

        assert_eq!(ws.dir(), root.path().join(id.to_string()));
        assert_eq!(ws.mcc_tree().file_name().unwrap(), "mcc.tree");

        tokio::fs::write(ws.rates_log(), "state\n").await.unwrap();
        ws.set_aside(&[ws.rates_log(), ws.posterior_trees()], 1)
            .await
            .unwrap();

        assert!(!ws.rates_log().exists());
        assert!(ws.dir().join("rates.log.attempt1").exists());
    }
}

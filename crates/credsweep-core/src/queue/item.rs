//! Self-contained queue item records. Each
//! variant carries every identifier its consumer needs to fetch the
//! payload and the report context — no pointers back into the
//! orchestrator survive a round trip through disk.

use serde::{Deserialize, Serialize};

use crate::providers::{RepoRef, RunRef};
use crate::report::FindingContext;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunHandle {
    pub repo_full_name: String,
    pub run_id: u64,
    pub run_web_url: String,
}

impl RunHandle {
    /// Reconstructs the `RunRef` a provider adapter's methods expect. Only
    /// the fields an adapter's download calls actually key off (owner,
    /// name, run id) need to be faithful; `title`/`status` are cosmetic
    /// and unused past enumeration.
    pub fn to_run_ref(&self) -> RunRef {
        RunRef {
            id: self.run_id,
            repo: RepoRef::minimal(&self.repo_full_name),
            web_url: self.run_web_url.clone(),
            title: String::new(),
            status: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactHandle {
    pub run: RunHandle,
    pub artifact_id: String,
    pub artifact_name: String,
    pub declared_size: Option<u64>,
    pub download_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DotenvHandle {
    pub run: RunHandle,
    pub job_id: u64,
    pub job_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum QueueItem {
    JobTrace(RunHandle),
    Artifact(ArtifactHandle),
    Dotenv(DotenvHandle),
}

impl QueueItem {
    pub fn report_context(&self) -> FindingContext {
        match self {
            QueueItem::JobTrace(run) => FindingContext {
                repo: run.repo_full_name.clone(),
                run_url: run.run_web_url.clone(),
                run_id: Some(run.run_id),
                ..Default::default()
            },
            QueueItem::Artifact(artifact) => FindingContext {
                repo: artifact.run.repo_full_name.clone(),
                run_url: artifact.run.run_web_url.clone(),
                run_id: Some(artifact.run.run_id),
                archive: Some(artifact.artifact_name.clone()),
                ..Default::default()
            },
            QueueItem::Dotenv(dotenv) => FindingContext {
                repo: dotenv.run.repo_full_name.clone(),
                run_url: dotenv.run.run_web_url.clone(),
                run_id: Some(dotenv.run.run_id),
                job_id: Some(dotenv.job_id),
                job_name: Some(dotenv.job_name.clone()),
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_item_round_trips_through_json() {
        let item = QueueItem::Artifact(ArtifactHandle {
            run: RunHandle {
                repo_full_name: "acme/widgets".into(),
                run_id: 42,
                run_web_url: "https://example.invalid/acme/widgets/-/pipelines/42".into(),
            },
            artifact_id: "99".into(),
            artifact_name: "build-output.zip".into(),
            declared_size: Some(1024),
            download_url: "https://example.invalid/acme/widgets/-/jobs/99/artifacts".into(),
        });

        let encoded = serde_json::to_vec(&item).unwrap();
        let decoded: QueueItem = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(item, decoded);
    }
}

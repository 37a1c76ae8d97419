//! C6 — Provider Adapter.
//!
//! One capability trait the rest of the core depends on; GitHub,
//! GitLab, Gitea, and Azure DevOps each implement it. The
//! four platforms share no types beyond this trait and the data model
//! in `model.rs` — provider-specific quirks (GitHub's public-repo id
//! walking, Gitea's HTML scraping, Azure's continuation tokens) stay
//! behind the `next_cursor` opacity.

pub mod azure;
pub mod cookie_fallback;
pub mod gitea;
pub mod github;
pub mod gitlab;
pub mod model;

use async_trait::async_trait;

use crate::config::EnumerationMode;
use crate::error::Result;

pub use model::{ArtifactRef, JobRef, Page, RepoRef, RunRef};

/// Which platform an adapter instance talks to — lets the orchestrator
/// apply the one genuinely provider-specific dispatch rule (GitLab-only
/// dotenv artifacts) without widening the shared trait for a single
/// platform's quirk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    GitHub,
    GitLab,
    Gitea,
    AzureDevOps,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn list_repositories(&self, mode: &EnumerationMode, cursor: Option<&str>) -> Result<Page<RepoRef>>;

    async fn list_runs(&self, repo: &RepoRef, cursor: Option<&str>) -> Result<Page<RunRef>>;

    async fn list_jobs(&self, run: &RunRef, cursor: Option<&str>) -> Result<Page<JobRef>>;

    async fn list_artifacts(&self, run: &RunRef, cursor: Option<&str>) -> Result<Page<ArtifactRef>>;

    /// Downloads a run's overall log, or one job's log when `job` is
    /// given. May redirect to a signed URL; the payload may be a single
    /// text file or a zip of per-step logs.
    async fn download_log(&self, run: &RunRef, job: Option<&JobRef>) -> Result<Vec<u8>>;

    async fn download_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>>;
}

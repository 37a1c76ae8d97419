//! Gitea Actions provider adapter.
//!
//! Gitea's REST API (`/api/v1`) mirrors GitHub's Actions endpoints
//! closely enough that the happy-path listing logic is grounded on
//! `github.rs`'s shape.
//! Gitea additionally exposes a GitHub-Actions-compatible public UI at
//! `/<owner>/<repo>/actions/runs/<id>`, which is what the cookie
//! fallback scrapes
//! when the token-authenticated listing comes back 403 and a session
//! cookie is configured.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::EnumerationMode;
use crate::error::Result;
use crate::http::HttpClient;

use super::cookie_fallback::{self, ConsecutiveFailureBreaker};
use super::model::{ArtifactRef, JobRef, Page, RepoRef, RunRef};
use super::{ProviderAdapter, ProviderKind};

const PAGE_SIZE: u32 = 50;
const COOKIE_BATCH: u64 = 10;

pub struct GiteaAdapter {
    http: HttpClient,
    api_base: String,
    web_base: String,
    cookie_configured: bool,
    breakers: Mutex<HashMap<String, std::sync::Arc<ConsecutiveFailureBreaker>>>,
}

impl GiteaAdapter {
    pub fn new(http: HttpClient, api_base: impl Into<String>, web_base: impl Into<String>, cookie_configured: bool) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            web_base: web_base.into(),
            cookie_configured,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    fn page_from_cursor(cursor: Option<&str>) -> u32 {
        cursor.and_then(|c| c.parse().ok()).unwrap_or(1)
    }

    fn breaker_for(&self, repo: &RepoRef) -> Option<std::sync::Arc<ConsecutiveFailureBreaker>> {
        self.breakers.lock().expect("breaker map poisoned").get(&repo.full_name()).cloned()
    }

    async fn start_cookie_fallback(&self, repo: &RepoRef) -> Result<Page<RunRef>> {
        let actions_url = format!("{}/{}/actions", self.web_base, repo.full_name());
        let html = self.http.get_text(&actions_url).await?;
        let Some(max_id) = cookie_fallback::extract_latest_run_id(&html, &repo.owner, &repo.name) else {
            return Ok(Page::empty());
        };
        let breaker = std::sync::Arc::new(ConsecutiveFailureBreaker::new(max_id));
        self.breakers.lock().expect("breaker map poisoned").insert(repo.full_name(), breaker);
        self.list_runs_cookie(repo, max_id).await
    }

    async fn list_runs_cookie(&self, repo: &RepoRef, start_id: u64) -> Result<Page<RunRef>> {
        let Some(breaker) = self.breaker_for(repo) else { return Ok(Page::empty()) };
        let web_base = self.web_base.clone();
        let owner = repo.owner.clone();
        let name = repo.name.clone();
        let walk = cookie_fallback::walk_run_ids(&self.http, &breaker, start_id, COOKIE_BATCH, |id| {
            format!("{web_base}/{owner}/{name}/actions/runs/{id}")
        })
        .await;

        let items = walk
            .ok_ids
            .into_iter()
            .map(|id| RunRef {
                id,
                repo: repo.clone(),
                web_url: format!("{}/{}/actions/runs/{id}", self.web_base, repo.full_name()),
                title: String::new(),
                status: String::new(),
            })
            .collect();
        let next_cursor = walk.next_cursor.map(|id| format!("cookie:{id}"));
        Ok(Page { items, next_cursor })
    }
}

#[derive(Debug, Deserialize)]
struct GtRepo {
    name: String,
    owner: GtOwner,
    default_branch: String,
    html_url: String,
    private: bool,
    permissions: Option<GtPermissions>,
}

#[derive(Debug, Deserialize)]
struct GtOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GtPermissions {
    pull: bool,
}

impl From<GtRepo> for RepoRef {
    fn from(r: GtRepo) -> Self {
        RepoRef {
            owner: r.owner.login,
            name: r.name,
            default_branch: r.default_branch,
            web_url: r.html_url,
            visibility: if r.private { "private".into() } else { "public".into() },
            can_read: r.permissions.map(|p| p.pull).unwrap_or(true),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GtSearchRepos {
    data: Vec<GtRepo>,
}

#[derive(Debug, Deserialize)]
struct GtRunsPage {
    workflow_runs: Vec<GtRun>,
}

#[derive(Debug, Deserialize)]
struct GtRun {
    id: u64,
    display_title: Option<String>,
    html_url: String,
    status: Option<String>,
    conclusion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GtJobsPage {
    jobs: Vec<GtJob>,
}

#[derive(Debug, Deserialize)]
struct GtJob {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct GtArtifactsPage {
    artifacts: Vec<GtArtifact>,
}

#[derive(Debug, Deserialize)]
struct GtArtifact {
    id: u64,
    name: String,
    size_in_bytes: u64,
    expired: bool,
    archive_download_url: String,
}

#[async_trait]
impl ProviderAdapter for GiteaAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gitea
    }

    async fn list_repositories(&self, mode: &EnumerationMode, cursor: Option<&str>) -> Result<Page<RepoRef>> {
        let page = Self::page_from_cursor(cursor);
        let url = match mode {
            EnumerationMode::Owned => {
                format!("{}/user/repos?limit={PAGE_SIZE}&page={page}", self.api_base)
            }
            EnumerationMode::Organization(org) => {
                format!("{}/orgs/{org}/repos?limit={PAGE_SIZE}&page={page}", self.api_base)
            }
            EnumerationMode::User(user) => {
                format!("{}/users/{user}/repos?limit={PAGE_SIZE}&page={page}", self.api_base)
            }
            EnumerationMode::Search(query) => {
                let resp = self
                    .http
                    .get_with_header(
                        &format!("{}/repos/search?q={query}&limit={PAGE_SIZE}&page={page}", self.api_base),
                        None,
                    )
                    .await?;
                let body: GtSearchRepos = resp.json().await?;
                let next = if body.data.len() as u32 == PAGE_SIZE { Some((page + 1).to_string()) } else { None };
                return Ok(Page { items: body.data.into_iter().map(RepoRef::from).collect(), next_cursor: next });
            }
            EnumerationMode::Everything => {
                format!("{}/repos/search?limit={PAGE_SIZE}&page={page}", self.api_base)
            }
            EnumerationMode::Single(full_name) => {
                let resp = self.http.get_with_header(&format!("{}/repos/{full_name}", self.api_base), None).await?;
                let repo: GtRepo = resp.json().await?;
                return Ok(Page { items: vec![repo.into()], next_cursor: None });
            }
        };
        let resp = self.http.get_with_header(&url, None).await?;
        let repos: Vec<GtRepo> = resp.json().await?;
        let next = if repos.len() as u32 == PAGE_SIZE { Some((page + 1).to_string()) } else { None };
        Ok(Page { items: repos.into_iter().map(RepoRef::from).collect(), next_cursor: next })
    }

    async fn list_runs(&self, repo: &RepoRef, cursor: Option<&str>) -> Result<Page<RunRef>> {
        if let Some(rest) = cursor.and_then(|c| c.strip_prefix("cookie:")) {
            let start_id: u64 = rest.parse().unwrap_or(0);
            return self.list_runs_cookie(repo, start_id).await;
        }

        let page = Self::page_from_cursor(cursor);
        let url = format!(
            "{}/repos/{}/{}/actions/tasks?limit={PAGE_SIZE}&page={page}",
            self.api_base, repo.owner, repo.name
        );
        let resp = self.http.get_with_header(&url, None).await?;

        if resp.status() == StatusCode::FORBIDDEN && self.cookie_configured {
            return self.start_cookie_fallback(repo).await;
        }

        let body: GtRunsPage = resp.json().await?;
        let next = if body.workflow_runs.len() as u32 == PAGE_SIZE { Some((page + 1).to_string()) } else { None };
        let items = body
            .workflow_runs
            .into_iter()
            .map(|r| RunRef {
                id: r.id,
                repo: repo.clone(),
                web_url: r.html_url,
                title: r.display_title.unwrap_or_default(),
                status: r.conclusion.or(r.status).unwrap_or_default(),
            })
            .collect();
        Ok(Page { items, next_cursor: next })
    }

    async fn list_jobs(&self, run: &RunRef, cursor: Option<&str>) -> Result<Page<JobRef>> {
        let page = Self::page_from_cursor(cursor);
        let url = format!(
            "{}/repos/{}/{}/actions/runs/{}/jobs?limit={PAGE_SIZE}&page={page}",
            self.api_base, run.repo.owner, run.repo.name, run.id
        );
        let resp = self.http.get_with_header(&url, None).await?;
        let body: GtJobsPage = resp.json().await?;
        let next = if body.jobs.len() as u32 == PAGE_SIZE { Some((page + 1).to_string()) } else { None };
        Ok(Page { items: body.jobs.into_iter().map(|j| JobRef { id: j.id, name: j.name }).collect(), next_cursor: next })
    }

    async fn list_artifacts(&self, run: &RunRef, cursor: Option<&str>) -> Result<Page<ArtifactRef>> {
        let page = Self::page_from_cursor(cursor);
        let url = format!(
            "{}/repos/{}/{}/actions/runs/{}/artifacts?limit={PAGE_SIZE}&page={page}",
            self.api_base, run.repo.owner, run.repo.name, run.id
        );
        let resp = self.http.get_with_header(&url, None).await?;
        let body: GtArtifactsPage = resp.json().await?;
        let next = if body.artifacts.len() as u32 == PAGE_SIZE { Some((page + 1).to_string()) } else { None };
        let items = body
            .artifacts
            .into_iter()
            .map(|a| ArtifactRef {
                id: a.id.to_string(),
                name: a.name,
                size_bytes: Some(a.size_in_bytes),
                expired: a.expired,
                download_url: a.archive_download_url,
            })
            .collect();
        Ok(Page { items, next_cursor: next })
    }

    async fn download_log(&self, run: &RunRef, job: Option<&JobRef>) -> Result<Vec<u8>> {
        let url = match job {
            Some(job) => format!(
                "{}/repos/{}/{}/actions/jobs/{}/logs",
                self.api_base, run.repo.owner, run.repo.name, job.id
            ),
            None => format!(
                "{}/{}/actions/runs/{}",
                self.web_base,
                run.repo.full_name(),
                run.id
            ),
        };
        self.http.get_bytes(&url).await
    }

    async fn download_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>> {
        self.http.get_bytes(&artifact.download_url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_reports_its_own_kind() {
        let http = HttpClient::new(None, true, true, None).unwrap();
        let adapter = GiteaAdapter::new(http, "https://gitea.example/api/v1", "https://gitea.example", false);
        assert_eq!(adapter.kind(), ProviderKind::Gitea);
    }
}

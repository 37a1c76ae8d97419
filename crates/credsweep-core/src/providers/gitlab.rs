//! GitLab Pipelines provider adapter.
//!
//! Uses GitLab's REST API (`/api/v4`) with `Link`-header-less
//! page-number pagination, falling back to cookie-authenticated UI
//! scraping (`cookie_fallback.rs`) when the API returns 403 and a
//! session cookie is configured.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::EnumerationMode;
use crate::error::Result;
use crate::http::HttpClient;

use super::cookie_fallback::{self, ConsecutiveFailureBreaker};
use super::model::{ArtifactRef, JobRef, Page, RepoRef, RunRef};
use super::{ProviderAdapter, ProviderKind};

const PAGE_SIZE: u32 = 100;
const COOKIE_BATCH: u64 = 10;

pub struct GitLabAdapter {
    http: HttpClient,
    api_base: String,
    web_base: String,
    cookie_configured: bool,
    breakers: Mutex<HashMap<String, Arc<ConsecutiveFailureBreaker>>>,
}

impl GitLabAdapter {
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

    fn breaker_for(&self, repo: &RepoRef) -> Option<Arc<ConsecutiveFailureBreaker>> {
        self.breakers.lock().expect("breaker map poisoned").get(&repo.full_name()).cloned()
    }

    async fn start_cookie_fallback(&self, repo: &RepoRef) -> Result<Page<RunRef>> {
        let pipelines_url = format!("{}/{}/-/pipelines", self.web_base, repo.full_name());
        let html = self.http.get_text(&pipelines_url).await?;
        let Some(max_id) = cookie_fallback::extract_latest_run_id(&html, &repo.owner, &repo.name) else {
            return Ok(Page::empty());
        };
        let breaker = Arc::new(ConsecutiveFailureBreaker::new(max_id));
        self.breakers.lock().expect("breaker map poisoned").insert(repo.full_name(), breaker);
        self.list_runs_cookie(repo, max_id).await
    }

    async fn list_runs_cookie(&self, repo: &RepoRef, start_id: u64) -> Result<Page<RunRef>> {
        let Some(breaker) = self.breaker_for(repo) else { return Ok(Page::empty()) };
        let web_base = self.web_base.clone();
        let full_name = repo.full_name();
        let walk = cookie_fallback::walk_run_ids(&self.http, &breaker, start_id, COOKIE_BATCH, |id| {
            format!("{web_base}/{full_name}/-/pipelines/{id}")
        })
        .await;

        let items = walk
            .ok_ids
            .into_iter()
            .map(|id| RunRef {
                id,
                repo: repo.clone(),
                web_url: format!("{}/{}/-/pipelines/{id}", self.web_base, repo.full_name()),
                title: String::new(),
                status: String::new(),
            })
            .collect();
        let next_cursor = walk.next_cursor.map(|id| format!("cookie:{id}"));
        Ok(Page { items, next_cursor })
    }

    /// Cookie-path artifact listing: scrape the CSRF token off a page that
    /// carries it, then POST the dummy `logCursors` body GitLab's job
    /// detail view issues to enumerate that job's artifacts — this is how
    /// dotenv artifacts surface even though they're absent from the REST
    /// API.
    async fn list_jobs_artifacts_cookie(&self, run: &RunRef, job: &JobRef) -> Result<Vec<ArtifactRef>> {
        let issues_url = format!("{}/{}/-/issues", self.web_base, run.repo.full_name());
        let Some(csrf) = cookie_fallback::fetch_csrf_token(&self.http, &issues_url).await? else {
            return Ok(Vec::new());
        };
        let jobs_endpoint = format!("{}/{}/-/jobs/{}/viewer", self.web_base, run.repo.full_name(), job.id);
        let entries = cookie_fallback::fetch_cookie_artifacts(&self.http, &jobs_endpoint, &csrf).await?;
        Ok(entries
            .into_iter()
            .map(|e| ArtifactRef {
                id: job.id.to_string(),
                name: e.name.clone(),
                size_bytes: e.size,
                expired: false,
                download_url: cookie_fallback::synthesize_artifact_url(
                    &self.web_base,
                    &run.repo.owner,
                    &run.repo.name,
                    run.id,
                    &e.name,
                ),
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct GlProject {
    id: u64,
    path: String,
    namespace: GlNamespace,
    default_branch: Option<String>,
    web_url: String,
    visibility: String,
}

#[derive(Debug, Deserialize)]
struct GlNamespace {
    full_path: String,
}

impl From<GlProject> for RepoRef {
    fn from(p: GlProject) -> Self {
        RepoRef {
            owner: p.namespace.full_path,
            name: p.path,
            default_branch: p.default_branch.unwrap_or_default(),
            web_url: p.web_url,
            visibility: p.visibility,
            can_read: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GlPipeline {
    id: u64,
    web_url: String,
    #[serde(rename = "ref")]
    git_ref: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct GlJob {
    id: u64,
    name: String,
}

fn project_path(repo: &RepoRef) -> String {
    urlencoding_path(&repo.full_name())
}

fn urlencoding_path(s: &str) -> String {
    s.replace('/', "%2F")
}

#[async_trait]
impl ProviderAdapter for GitLabAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitLab
    }

    async fn list_repositories(&self, mode: &EnumerationMode, cursor: Option<&str>) -> Result<Page<RepoRef>> {
        let page = Self::page_from_cursor(cursor);
        let url = match mode {
            EnumerationMode::Owned => {
                format!("{}/projects?membership=true&per_page={PAGE_SIZE}&page={page}", self.api_base)
            }
            EnumerationMode::Organization(group) => {
                format!(
                    "{}/groups/{}/projects?per_page={PAGE_SIZE}&page={page}",
                    self.api_base,
                    urlencoding_path(group)
                )
            }
            EnumerationMode::User(user) => {
                format!("{}/users/{user}/projects?per_page={PAGE_SIZE}&page={page}", self.api_base)
            }
            EnumerationMode::Search(query) => {
                format!("{}/projects?search={query}&per_page={PAGE_SIZE}&page={page}", self.api_base)
            }
            EnumerationMode::Everything => {
                format!("{}/projects?per_page={PAGE_SIZE}&page={page}&order_by=id", self.api_base)
            }
            EnumerationMode::Single(full_name) => {
                let resp = self
                    .http
                    .get_with_header(&format!("{}/projects/{}", self.api_base, urlencoding_path(full_name)), None)
                    .await?;
                let project: GlProject = resp.json().await?;
                return Ok(Page { items: vec![project.into()], next_cursor: None });
            }
        };
        let resp = self.http.get_with_header(&url, None).await?;
        let projects: Vec<GlProject> = resp.json().await?;
        let next = if projects.len() as u32 == PAGE_SIZE { Some((page + 1).to_string()) } else { None };
        Ok(Page { items: projects.into_iter().map(RepoRef::from).collect(), next_cursor: next })
    }

    async fn list_runs(&self, repo: &RepoRef, cursor: Option<&str>) -> Result<Page<RunRef>> {
        if let Some(rest) = cursor.and_then(|c| c.strip_prefix("cookie:")) {
            let start_id: u64 = rest.parse().unwrap_or(0);
            return self.list_runs_cookie(repo, start_id).await;
        }

        let page = Self::page_from_cursor(cursor);
        let url = format!(
            "{}/projects/{}/pipelines?per_page={PAGE_SIZE}&page={page}&order_by=id&sort=desc",
            self.api_base,
            project_path(repo)
        );
        let resp = self.http.get_with_header(&url, None).await?;

        if resp.status() == StatusCode::FORBIDDEN && self.cookie_configured {
            return self.start_cookie_fallback(repo).await;
        }

        let pipelines: Vec<GlPipeline> = resp.json().await?;
        let next = if pipelines.len() as u32 == PAGE_SIZE { Some((page + 1).to_string()) } else { None };
        let items = pipelines
            .into_iter()
            .map(|p| RunRef { id: p.id, repo: repo.clone(), web_url: p.web_url, title: p.git_ref, status: p.status })
            .collect();
        Ok(Page { items, next_cursor: next })
    }

    async fn list_jobs(&self, run: &RunRef, cursor: Option<&str>) -> Result<Page<JobRef>> {
        let page = Self::page_from_cursor(cursor);
        let url = format!(
            "{}/projects/{}/pipelines/{}/jobs?per_page={PAGE_SIZE}&page={page}",
            self.api_base,
            project_path(&run.repo),
            run.id
        );
        let resp = self.http.get_with_header(&url, None).await?;
        let jobs: Vec<GlJob> = resp.json().await?;
        let next = if jobs.len() as u32 == PAGE_SIZE { Some((page + 1).to_string()) } else { None };
        Ok(Page { items: jobs.into_iter().map(|j| JobRef { id: j.id, name: j.name }).collect(), next_cursor: next })
    }

    async fn list_artifacts(&self, run: &RunRef, cursor: Option<&str>) -> Result<Page<ArtifactRef>> {
        // GitLab exposes one artifact bundle per job rather than per
        // pipeline; list jobs and attach each job's artifact, if any.
        let jobs_page = self.list_jobs(run, cursor).await?;
        let mut items = Vec::with_capacity(jobs_page.items.len());
        for job in &jobs_page.items {
            if self.cookie_configured {
                // The REST artifacts endpoint 403s for jobs whose artifacts
                // were produced under a protected-ref pipeline the token
                // can't see directly; the cookie path sees whatever the
                // logged-in session sees.
                match self.list_jobs_artifacts_cookie(run, job).await {
                    Ok(cookie_items) if !cookie_items.is_empty() => {
                        items.extend(cookie_items);
                        continue;
                    }
                    _ => {}
                }
            }
            let url = format!(
                "{}/projects/{}/jobs/{}/artifacts",
                self.api_base,
                project_path(&run.repo),
                job.id
            );
            items.push(ArtifactRef {
                id: job.id.to_string(),
                name: format!("{}-artifacts.zip", job.name),
                size_bytes: None,
                expired: false,
                download_url: url,
            });
        }
        Ok(Page { items, next_cursor: jobs_page.next_cursor })
    }

    async fn download_log(&self, run: &RunRef, job: Option<&JobRef>) -> Result<Vec<u8>> {
        let url = match job {
            Some(job) => {
                format!("{}/projects/{}/jobs/{}/trace", self.api_base, project_path(&run.repo), job.id)
            }
            None => {
                // No single "run log" endpoint on GitLab; the caller is
                // expected to enumerate jobs and fetch per-job traces.
                format!("{}/projects/{}/pipelines/{}", self.api_base, project_path(&run.repo), run.id)
            }
        };
        self.http.get_bytes(&url).await
    }

    async fn download_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>> {
        self.http.get_bytes(&artifact.download_url).await
    }
}

/// Fetches a GitLab job's `.env` dotenv artifact — invisible to the
/// REST API, fetchable only through the cookie-authenticated UI path.
pub async fn fetch_dotenv_via_cookie(http: &HttpClient, base_url: &str, repo: &RepoRef, job_id: u64) -> Result<Vec<u8>> {
    let url = format!("{base_url}/{}/-/jobs/{job_id}/artifacts/download?file_type=dotenv", repo.full_name());
    http.get_bytes(&url).await
}

//! GitHub Actions provider adapter.
//!
//! Talks to the GitHub REST API through a `reqwest::Client` with
//! injected default headers, accumulating results page by page: list
//! runs/jobs/artifacts, download logs/artifacts.

use std::collections::VecDeque;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EnumerationMode;
use crate::error::Result;
use crate::http::HttpClient;

use super::model::{ArtifactRef, JobRef, Page, RepoRef, RunRef};
use super::ProviderAdapter;

const PAGE_SIZE: u32 = 100;

/// How many of the most recent pages the "everything" walk keeps ids
/// from, to recognize repeats surfaced by the next window.
const ID_CACHE_PAGES: usize = 5;

/// Conservative upper bound on currently-assigned GitHub repo ids. The
/// "everything" walk starts just below this and steps downward toward
/// zero; it lags behind repos created after this constant was chosen,
/// a known tradeoff for not needing a separate "discover the current
/// max id" round trip before the walk can begin.
const EVERYTHING_ANCHOR: u64 = 900_000_000;

/// Opaque paging state for `EnumerationMode::Everything`, threaded
/// through `next_cursor` as base64-encoded JSON.
///
/// GitHub's `/repositories?since=N` only walks forward in ascending id
/// order, so there is no native "list all public repos newest first"
/// primitive to page backwards against. This adapter instead steps a
/// `frontier` id backward by one page width on every call: each
/// individual request is still the ascending `since` call, but the
/// *next* `since` is always lower than the last, so the walk as a whole
/// proceeds from high ids toward zero. Because public repo ids are
/// sparse (deleted and private repos leave holes), a backward step can
/// land low enough that the following ascending fetch re-touches ids
/// already returned a page or two ago — the sliding cache of the last
/// `ID_CACHE_PAGES` pages' worth of ids (at `PAGE_SIZE` each, up to 500)
/// filters those out before the page reaches the caller.
#[derive(Debug, Default, Serialize, Deserialize)]
struct EverythingCursor {
    frontier: u64,
    seen_pages: VecDeque<Vec<u64>>,
}

impl EverythingCursor {
    fn decode(cursor: Option<&str>) -> Self {
        cursor
            .and_then(|c| URL_SAFE_NO_PAD.decode(c).ok())
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }

    fn encode(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(bytes)
    }

    fn already_seen(&self, id: u64) -> bool {
        self.seen_pages.iter().any(|page| page.contains(&id))
    }

    fn push_page(&mut self, ids: Vec<u64>) {
        self.seen_pages.push_back(ids);
        while self.seen_pages.len() > ID_CACHE_PAGES {
            self.seen_pages.pop_front();
        }
    }
}

pub struct GitHubAdapter {
    http: HttpClient,
    api_base: String,
}

impl GitHubAdapter {
    pub fn new(http: HttpClient, api_base: impl Into<String>) -> Self {
        Self { http, api_base: api_base.into() }
    }

    fn page_from_cursor(cursor: Option<&str>) -> u32 {
        cursor.and_then(|c| c.parse().ok()).unwrap_or(1)
    }

    /// Fetches one page of `EnumerationMode::Everything`, stepping the
    /// frontier id backward and filtering out ids the sliding cache has
    /// already handed back.
    async fn list_everything_page(&self, cursor: Option<&str>) -> Result<Page<RepoRef>> {
        let mut state = match cursor {
            Some(_) => EverythingCursor::decode(cursor),
            None => EverythingCursor { frontier: EVERYTHING_ANCHOR, seen_pages: VecDeque::new() },
        };
        let since = state.frontier.saturating_sub(u64::from(PAGE_SIZE));

        let url = format!("{}/repositories?since={since}", self.api_base);
        let resp = self.http.get_with_header(&url, None).await?;
        let repos: Vec<GhRepo> = resp.json().await?;

        let fetched_ids: Vec<u64> = repos.iter().map(|r| r.id).collect();
        let fresh: Vec<RepoRef> = repos
            .into_iter()
            .filter(|r| !state.already_seen(r.id))
            .map(RepoRef::from)
            .collect();
        let dropped = fetched_ids.len() - fresh.len();
        if dropped > 0 {
            debug!(dropped, "everything-mode page overlapped a previously seen window");
        }

        state.push_page(fetched_ids);
        state.frontier = since;
        let next_cursor = if since == 0 { None } else { Some(state.encode()) };

        Ok(Page { items: fresh, next_cursor })
    }
}

#[derive(Debug, Deserialize)]
struct GhRepo {
    #[serde(default)]
    id: u64,
    name: String,
    owner: GhOwner,
    default_branch: String,
    html_url: String,
    private: bool,
    permissions: Option<GhPermissions>,
}

#[derive(Debug, Deserialize)]
struct GhOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GhPermissions {
    pull: bool,
}

impl From<GhRepo> for RepoRef {
    fn from(r: GhRepo) -> Self {
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
struct GhSearchRepos {
    items: Vec<GhRepo>,
}

#[derive(Debug, Deserialize)]
struct GhRunsPage {
    workflow_runs: Vec<GhRun>,
}

#[derive(Debug, Deserialize)]
struct GhRun {
    id: u64,
    display_title: Option<String>,
    name: Option<String>,
    html_url: String,
    status: Option<String>,
    conclusion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GhJobsPage {
    jobs: Vec<GhJob>,
}

#[derive(Debug, Deserialize)]
struct GhJob {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhArtifactsPage {
    artifacts: Vec<GhArtifact>,
}

#[derive(Debug, Deserialize)]
struct GhArtifact {
    id: u64,
    name: String,
    size_in_bytes: u64,
    expired: bool,
    archive_download_url: String,
}

#[async_trait]
impl ProviderAdapter for GitHubAdapter {
    fn kind(&self) -> super::ProviderKind {
        super::ProviderKind::GitHub
    }

    async fn list_repositories(&self, mode: &EnumerationMode, cursor: Option<&str>) -> Result<Page<RepoRef>> {
        let page = Self::page_from_cursor(cursor);
        let url = match mode {
            EnumerationMode::Owned => {
                format!("{}/user/repos?per_page={PAGE_SIZE}&page={page}&affiliation=owner", self.api_base)
            }
            EnumerationMode::Organization(org) => {
                format!("{}/orgs/{org}/repos?per_page={PAGE_SIZE}&page={page}", self.api_base)
            }
            EnumerationMode::User(user) => {
                format!("{}/users/{user}/repos?per_page={PAGE_SIZE}&page={page}", self.api_base)
            }
            EnumerationMode::Search(query) => {
                let resp = self
                    .http
                    .get_with_header(
                        &format!("{}/search/repositories?q={query}&per_page={PAGE_SIZE}&page={page}", self.api_base),
                        None,
                    )
                    .await?;
                let body: GhSearchRepos = resp.json().await?;
                let next = if body.items.len() as u32 == PAGE_SIZE { Some((page + 1).to_string()) } else { None };
                return Ok(Page { items: body.items.into_iter().map(RepoRef::from).collect(), next_cursor: next });
            }
            EnumerationMode::Everything => return self.list_everything_page(cursor).await,
            EnumerationMode::Single(full_name) => {
                let resp = self.http.get_with_header(&format!("{}/repos/{full_name}", self.api_base), None).await?;
                let repo: GhRepo = resp.json().await?;
                return Ok(Page { items: vec![repo.into()], next_cursor: None });
            }
        };
        let resp = self.http.get_with_header(&url, None).await?;
        let repos: Vec<GhRepo> = resp.json().await?;
        let next = if repos.len() as u32 == PAGE_SIZE { Some((page + 1).to_string()) } else { None };
        Ok(Page { items: repos.into_iter().map(RepoRef::from).collect(), next_cursor: next })
    }

    async fn list_runs(&self, repo: &RepoRef, cursor: Option<&str>) -> Result<Page<RunRef>> {
        let page = Self::page_from_cursor(cursor);
        let url = format!(
            "{}/repos/{}/{}/actions/runs?per_page={PAGE_SIZE}&page={page}",
            self.api_base,
            repo.owner,
            repo.name
        );
        let resp = self.http.get_with_header(&url, None).await?;
        let body: GhRunsPage = resp.json().await?;
        let next = if body.workflow_runs.len() as u32 == PAGE_SIZE { Some((page + 1).to_string()) } else { None };
        let items = body
            .workflow_runs
            .into_iter()
            .map(|r| RunRef {
                id: r.id,
                repo: repo.clone(),
                web_url: r.html_url,
                title: r.display_title.or(r.name).unwrap_or_default(),
                status: r.conclusion.or(r.status).unwrap_or_default(),
            })
            .collect();
        Ok(Page { items, next_cursor: next })
    }

    async fn list_jobs(&self, run: &RunRef, cursor: Option<&str>) -> Result<Page<JobRef>> {
        let page = Self::page_from_cursor(cursor);
        let url = format!(
            "{}/repos/{}/{}/actions/runs/{}/jobs?per_page={PAGE_SIZE}&page={page}",
            self.api_base, run.repo.owner, run.repo.name, run.id
        );
        let resp = self.http.get_with_header(&url, None).await?;
        let body: GhJobsPage = resp.json().await?;
        let next = if body.jobs.len() as u32 == PAGE_SIZE { Some((page + 1).to_string()) } else { None };
        let items = body.jobs.into_iter().map(|j| JobRef { id: j.id, name: j.name }).collect();
        Ok(Page { items, next_cursor: next })
    }

    async fn list_artifacts(&self, run: &RunRef, cursor: Option<&str>) -> Result<Page<ArtifactRef>> {
        let page = Self::page_from_cursor(cursor);
        let url = format!(
            "{}/repos/{}/{}/actions/runs/{}/artifacts?per_page={PAGE_SIZE}&page={page}",
            self.api_base, run.repo.owner, run.repo.name, run.id
        );
        let resp = self.http.get_with_header(&url, None).await?;
        let body: GhArtifactsPage = resp.json().await?;
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
            None => format!("{}/repos/{}/{}/actions/runs/{}/logs", self.api_base, run.repo.owner, run.repo.name, run.id),
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
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn adapter_reports_its_own_kind() {
        let http = HttpClient::new(None, true, true, None).unwrap();
        let adapter = GitHubAdapter::new(http, "https://api.github.example");
        assert_eq!(adapter.kind(), ProviderKind::GitHub);
    }

    fn repo_json(id: u64) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "name": format!("repo-{id}"),
            "owner": {"login": "someone"},
            "default_branch": "main",
            "html_url": format!("https://github.example/someone/repo-{id}"),
            "private": false,
            "permissions": {"pull": true},
        })
    }

    #[test]
    fn everything_cursor_round_trips_through_its_cursor_encoding() {
        let mut state = EverythingCursor { frontier: 42, seen_pages: VecDeque::from([vec![1, 2, 3]]) };
        state.push_page(vec![4, 5]);
        let encoded = state.encode();
        let decoded = EverythingCursor::decode(Some(&encoded));
        assert_eq!(decoded.frontier, 42);
        assert!(decoded.already_seen(4));
        assert!(decoded.already_seen(1));
        assert!(!decoded.already_seen(99));
    }

    #[test]
    fn id_cache_evicts_pages_older_than_its_window() {
        let mut state = EverythingCursor::default();
        for page in 0..ID_CACHE_PAGES + 2 {
            state.push_page(vec![page as u64]);
        }
        assert_eq!(state.seen_pages.len(), ID_CACHE_PAGES);
        assert!(!state.already_seen(0));
        assert!(state.already_seen((ID_CACHE_PAGES + 1) as u64));
    }

    #[tokio::test]
    async fn everything_mode_drops_ids_an_overlapping_window_already_returned() {
        let server = MockServer::start().await;

        // First page (frontier defaults to EVERYTHING_ANCHOR) returns ids
        // 10 and 11. The next window, stepped back by one PAGE_SIZE, is
        // sparse enough (a "hole") that the server's ascending `since`
        // fetch surfaces id 11 again alongside the genuinely new id 9.
        Mock::given(method("GET"))
            .and(path_regex(r"^/repositories$"))
            .respond_with(move |req: &wiremock::Request| {
                let since = req.url.query_pairs().find(|(k, _)| k == "since").map(|(_, v)| v.to_string());
                let body = match since.as_deref() {
                    Some(s) if s == (EVERYTHING_ANCHOR - u64::from(PAGE_SIZE)).to_string() => {
                        serde_json::json!([repo_json(10), repo_json(11)])
                    }
                    _ => serde_json::json!([repo_json(9), repo_json(11)]),
                };
                ResponseTemplate::new(200).set_body_json(body)
            })
            .mount(&server)
            .await;

        let http = HttpClient::new(None, true, true, None).unwrap();
        let adapter = GitHubAdapter::new(http, server.uri());

        let first = adapter.list_repositories(&EnumerationMode::Everything, None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        let cursor = first.next_cursor.expect("more pages remain before frontier reaches zero");

        let second = adapter.list_repositories(&EnumerationMode::Everything, Some(&cursor)).await.unwrap();
        // id 11 was already returned in the first page; only 9 is new.
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].name, "repo-9");
    }
}

//! Azure DevOps Pipelines provider adapter.
//!
//! Azure DevOps paginates with an opaque `x-ms-continuationtoken`
//! response header rather than a page number, so the cursor this
//! adapter hands back is that token verbatim — the orchestrator never
//! has to know the difference.
//! Grounded on `github.rs`'s request/accumulate shape; Azure has no
//! public HTML run-id-walking surface, so there is no cookie fallback.

use async_trait::async_trait;
use reqwest::Response;
use serde::Deserialize;

use crate::config::EnumerationMode;
use crate::error::{CredsweepError, Result};
use crate::http::HttpClient;

use super::model::{ArtifactRef, JobRef, Page, RepoRef, RunRef};
use super::{ProviderAdapter, ProviderKind};

const API_VERSION: &str = "api-version=7.1";
const CONTINUATION_HEADER: &str = "x-ms-continuationtoken";

pub struct AzureAdapter {
    http: HttpClient,
    api_base: String,
    organization: String,
}

impl AzureAdapter {
    pub fn new(http: HttpClient, api_base: impl Into<String>, organization: impl Into<String>) -> Self {
        Self { http, api_base: api_base.into(), organization: organization.into() }
    }

    fn continuation_token(resp: &Response) -> Option<String> {
        resp.headers().get(CONTINUATION_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string)
    }
}

#[derive(Debug, Deserialize)]
struct AzProjectsPage {
    value: Vec<AzProject>,
}

#[derive(Debug, Deserialize)]
struct AzProject {
    name: String,
    url: String,
}

impl AzProject {
    fn into_repo_ref(self, organization: &str) -> RepoRef {
        RepoRef {
            owner: organization.to_string(),
            name: self.name,
            default_branch: String::new(),
            web_url: self.url,
            visibility: "unknown".into(),
            can_read: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AzRunsPage {
    value: Vec<AzRun>,
}

#[derive(Debug, Deserialize)]
struct AzRun {
    id: u64,
    name: Option<String>,
    result: Option<String>,
    status: Option<String>,
    #[serde(rename = "_links")]
    links: Option<AzLinks>,
}

#[derive(Debug, Deserialize)]
struct AzLinks {
    web: Option<AzHref>,
}

#[derive(Debug, Deserialize)]
struct AzHref {
    href: String,
}

#[derive(Debug, Deserialize)]
struct AzTimelinePage {
    records: Vec<AzTimelineRecord>,
}

#[derive(Debug, Deserialize)]
struct AzTimelineRecord {
    id: String,
    name: String,
    #[serde(rename = "type")]
    record_type: String,
}

#[derive(Debug, Deserialize)]
struct AzArtifactsPage {
    value: Vec<AzArtifact>,
}

#[derive(Debug, Deserialize)]
struct AzArtifact {
    id: u64,
    name: String,
    resource: AzArtifactResource,
}

#[derive(Debug, Deserialize)]
struct AzArtifactResource {
    #[serde(rename = "downloadUrl")]
    download_url: String,
}

#[async_trait]
impl ProviderAdapter for AzureAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AzureDevOps
    }

    async fn list_repositories(&self, mode: &EnumerationMode, cursor: Option<&str>) -> Result<Page<RepoRef>> {
        let single_project = match mode {
            EnumerationMode::Single(full_name) => Some(full_name.clone()),
            EnumerationMode::Organization(_) | EnumerationMode::Owned | EnumerationMode::Everything => None,
            EnumerationMode::User(_) | EnumerationMode::Search(_) => {
                return Err(CredsweepError::InvalidConfiguration(
                    "Azure DevOps has no per-user or free-text search enumeration mode".into(),
                ));
            }
        };

        if let Some(full_name) = single_project {
            let project = full_name.split('/').next_back().unwrap_or(&full_name);
            let url = format!("{}/{}/_apis/projects/{project}?{API_VERSION}", self.api_base, self.organization);
            let resp = self.http.get_with_header(&url, None).await?;
            let project: AzProject = resp.json().await?;
            return Ok(Page { items: vec![project.into_repo_ref(&self.organization)], next_cursor: None });
        }

        let mut url = format!("{}/{}/_apis/projects?{API_VERSION}", self.api_base, self.organization);
        if let Some(token) = cursor {
            url.push_str("&continuationToken=");
            url.push_str(token);
        }
        let resp = self.http.get_with_header(&url, None).await?;
        let next = Self::continuation_token(&resp);
        let body: AzProjectsPage = resp.json().await?;
        let items = body.value.into_iter().map(|p| p.into_repo_ref(&self.organization)).collect();
        Ok(Page { items, next_cursor: next })
    }

    async fn list_runs(&self, repo: &RepoRef, cursor: Option<&str>) -> Result<Page<RunRef>> {
        let mut url = format!(
            "{}/{}/{}/_apis/build/builds?{API_VERSION}&queryOrder=startTimeDescending",
            self.api_base, self.organization, repo.name
        );
        if let Some(token) = cursor {
            url.push_str("&continuationToken=");
            url.push_str(token);
        }
        let resp = self.http.get_with_header(&url, None).await?;
        let next = Self::continuation_token(&resp);
        let body: AzRunsPage = resp.json().await?;
        let items = body
            .value
            .into_iter()
            .map(|r| RunRef {
                id: r.id,
                repo: repo.clone(),
                web_url: r.links.and_then(|l| l.web).map(|w| w.href).unwrap_or_default(),
                title: r.name.unwrap_or_default(),
                status: r.result.or(r.status).unwrap_or_default(),
            })
            .collect();
        Ok(Page { items, next_cursor: next })
    }

    async fn list_jobs(&self, run: &RunRef, cursor: Option<&str>) -> Result<Page<JobRef>> {
        if cursor.is_some() {
            return Ok(Page::empty());
        }
        let url = format!(
            "{}/{}/{}/_apis/build/builds/{}/timeline?{API_VERSION}",
            self.api_base, self.organization, run.repo.name, run.id
        );
        let resp = self.http.get_with_header(&url, None).await?;
        let body: AzTimelinePage = resp.json().await?;
        let items = body
            .records
            .into_iter()
            .filter(|r| r.record_type == "Job")
            .filter_map(|r| r.id.parse::<u64>().ok().map(|id| JobRef { id, name: r.name }))
            .collect();
        Ok(Page { items, next_cursor: None })
    }

    async fn list_artifacts(&self, run: &RunRef, cursor: Option<&str>) -> Result<Page<ArtifactRef>> {
        if cursor.is_some() {
            return Ok(Page::empty());
        }
        let url = format!(
            "{}/{}/{}/_apis/build/builds/{}/artifacts?{API_VERSION}",
            self.api_base, self.organization, run.repo.name, run.id
        );
        let resp = self.http.get_with_header(&url, None).await?;
        let body: AzArtifactsPage = resp.json().await?;
        let items = body
            .value
            .into_iter()
            .map(|a| ArtifactRef {
                id: a.id.to_string(),
                name: a.name,
                size_bytes: None,
                expired: false,
                download_url: a.resource.download_url,
            })
            .collect();
        Ok(Page { items, next_cursor: None })
    }

    async fn download_log(&self, run: &RunRef, job: Option<&JobRef>) -> Result<Vec<u8>> {
        let url = match job {
            Some(job) => format!(
                "{}/{}/{}/_apis/build/builds/{}/logs/{}?{API_VERSION}",
                self.api_base, self.organization, run.repo.name, run.id, job.id
            ),
            None => format!(
                "{}/{}/{}/_apis/build/builds/{}/logs?{API_VERSION}",
                self.api_base, self.organization, run.repo.name, run.id
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
        let adapter = AzureAdapter::new(http, "https://dev.azure.com", "acme-org");
        assert_eq!(adapter.kind(), ProviderKind::AzureDevOps);
    }

    #[tokio::test]
    async fn search_and_user_modes_are_rejected() {
        // Azure DevOps' project model has no concept of "repos owned by a
        // user" or free-text search across organizations the way GitHub/
        // GitLab do; the adapter surfaces that as a configuration error
        // rather than silently returning nothing.
        let http = HttpClient::new(None, true, true, None).unwrap();
        let adapter = AzureAdapter::new(http, "https://dev.azure.com", "acme-org");
        let result = adapter.list_repositories(&EnumerationMode::Search("foo".into()), None).await;
        assert!(result.is_err());
    }
}

//! Shared data model for every provider adapter.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
    pub default_branch: String,
    pub web_url: String,
    pub visibility: String,
    pub can_read: bool,
}

impl RepoRef {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Reconstructs a `RepoRef` from just its `owner/name` identity — used
    /// when a queue item (which only carries `repo_full_name`) needs to
    /// call back into a provider adapter whose methods take a full
    /// `RepoRef`.
    pub fn minimal(full_name: &str) -> Self {
        let (owner, name) = full_name.split_once('/').unwrap_or((full_name, ""));
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
            default_branch: String::new(),
            web_url: String::new(),
            visibility: String::new(),
            can_read: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRef {
    pub id: u64,
    pub repo: RepoRef,
    pub web_url: String,
    pub title: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRef {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub id: String,
    pub name: String,
    pub size_bytes: Option<u64>,
    pub expired: bool,
    /// Resolved during listing — the adapter already knows the exact
    /// download endpoint (direct URL, signed URL, or synthesized cookie-
    /// fallback URL) by the time it hands back an `ArtifactRef`.
    pub download_url: String,
}

/// One page of results plus the adapter's opaque cursor for the next
/// page — `None` means there is no more data.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self { items: Vec::new(), next_cursor: None }
    }
}

//! C7 — Scan Orchestrator.
//!
//! The single producer of work: selects the enumeration mode, walks
//! repository/run/job/artifact pages from one `ProviderAdapter`, and
//! enqueues self-contained items onto the disk-backed queue. A
//! `WorkerPool` drains the queue concurrently through `DispatchHandler`,
//! which re-hydrates each item back into a full provider call plus the
//! decode/detect pipeline.
//!
//! Shutdown is cooperative: a `tokio::sync::watch` channel carries the
//! cancellation signal fed by `tokio::signal::ctrl_c()`, preferring bare
//! `tokio` primitives over a separate signal/cancellation crate.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::archive::extract_and_scan;
use crate::artifact::{self, ProcessOptions};
use crate::config::EnumerationMode;
use crate::detect;
use crate::error::Result;
use crate::providers::{ArtifactRef, ProviderAdapter, ProviderKind, RepoRef, RunRef};
use crate::queue::item::{ArtifactHandle, DotenvHandle, RunHandle};
use crate::queue::{DiskQueue, ItemHandler, QueueItem, QueueStatus, WorkerPool};
use crate::report::Reporter;
use crate::session::ScanSession;

/// Runs one end-to-end scan against a single provider and reports every
/// finding through `reporter`.
pub struct ScanOrchestrator {
    session: Arc<ScanSession>,
    provider: Arc<dyn ProviderAdapter>,
    reporter: Arc<Reporter>,
    status_notify: Arc<tokio::sync::Notify>,
}

impl ScanOrchestrator {
    pub fn new(session: Arc<ScanSession>, provider: Arc<dyn ProviderAdapter>, reporter: Arc<Reporter>) -> Self {
        Self { session, provider, reporter, status_notify: Arc::new(tokio::sync::Notify::new()) }
    }

    /// Handle the CLI's `s` keypress shortcut can hold onto and notify
    /// from outside `run()` to force an immediate queue status log line
    ///.
    pub fn status_notify(&self) -> Arc<tokio::sync::Notify> {
        self.status_notify.clone()
    }

    /// Runs the scan to completion (normal end-of-enumeration) or until a
    /// SIGINT arrives. Returns the final queue status, whichever comes
    /// first — findings themselves went out through the reporter as
    /// they were found, not through this return value.
    pub async fn run(&self) -> Result<QueueStatus> {
        self.session.config.validate()?;

        let queue = Arc::new(DiskQueue::new(&self.session.config.queue_dir)?);
        let flush_handle = queue.spawn_flush_task();

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let ctrl_c_handle = tokio::spawn({
            let shutdown_tx = shutdown_tx.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("received interrupt, winding down scan");
                    let _ = shutdown_tx.send(true);
                }
            }
        });

        let handler = Arc::new(DispatchHandler {
            session: self.session.clone(),
            provider: self.provider.clone(),
            reporter: self.reporter.clone(),
        });
        let pool = WorkerPool::new(queue.clone(), self.session.config.threads);
        let pool_handle = tokio::spawn(pool.run(handler));

        let status_handle = tokio::spawn({
            let queue = queue.clone();
            let status_notify = self.status_notify.clone();
            async move {
                loop {
                    status_notify.notified().await;
                    let status = queue.status();
                    info!(received = status.received, pending = status.pending, "queue status");
                }
            }
        });

        self.enumerate_and_enqueue(&queue, shutdown_rx).await?;

        queue.shutdown().await;
        flush_handle.abort();
        ctrl_c_handle.abort();
        status_handle.abort();
        let _ = pool_handle.await;

        Ok(queue.status())
    }

    async fn enumerate_and_enqueue(&self, queue: &Arc<DiskQueue>, mut shutdown: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        let mode = self.session.config.mode.clone();
        let mut cursor: Option<String> = None;
        let mut processed_runs = 0usize;

        loop {
            if *shutdown.borrow() {
                info!("shutdown requested, stopping repository enumeration");
                return Ok(());
            }

            let page = self.provider.list_repositories(&mode, cursor.as_deref()).await?;
            for repo in &page.items {
                if !repo.can_read {
                    debug!(repo = %repo.full_name(), "skipping repository without read access");
                    continue;
                }
                if *shutdown.borrow() {
                    return Ok(());
                }
                self.scan_repo(queue, repo, &mut processed_runs, &mut shutdown).await?;
                if let Some(limit) = self.session.config.runs_limit {
                    if processed_runs >= limit {
                        info!(processed_runs, limit, "reached runs-limit, stopping enumeration");
                        return Ok(());
                    }
                }
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(()),
            }
        }
    }

    async fn scan_repo(
        &self,
        queue: &Arc<DiskQueue>,
        repo: &RepoRef,
        processed_runs: &mut usize,
        shutdown: &mut tokio::sync::watch::Receiver<bool>,
    ) -> Result<()> {
        let start_run_id = self.session.config.start_run_id;
        let mut cursor: Option<String> = None;

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let page = self.provider.list_runs(repo, cursor.as_deref()).await?;
            for run in &page.items {
                // Open question resolved: "start here and go
                // backwards" — runs with a higher id than start_run_id are
                // skipped, not the other way around.
                if let Some(start) = start_run_id {
                    if run.id > start {
                        continue;
                    }
                }

                self.enqueue_run(queue, run).await?;
                *processed_runs += 1;

                if let Some(limit) = self.session.config.runs_limit {
                    if *processed_runs >= limit {
                        return Ok(());
                    }
                }
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(()),
            }
        }
    }

    async fn enqueue_run(&self, queue: &Arc<DiskQueue>, run: &RunRef) -> Result<()> {
        let run_handle = RunHandle {
            repo_full_name: run.repo.full_name(),
            run_id: run.id,
            run_web_url: run.web_url.clone(),
        };
        queue.enqueue(QueueItem::JobTrace(run_handle.clone()))?;

        if !self.session.config.scan_artifacts {
            return Ok(());
        }

        let mut cursor: Option<String> = None;
        loop {
            let page = self.provider.list_artifacts(run, cursor.as_deref()).await?;
            for artifact in &page.items {
                if artifact.expired {
                    continue;
                }
                if let Some(size) = artifact.size_bytes {
                    if size > self.session.config.max_artifact_size {
                        debug!(artifact = %artifact.name, size, "skipping oversized artifact before download");
                        continue;
                    }
                }
                queue.enqueue(QueueItem::Artifact(ArtifactHandle {
                    run: run_handle.clone(),
                    artifact_id: artifact.id.clone(),
                    artifact_name: artifact.name.clone(),
                    declared_size: artifact.size_bytes,
                    download_url: artifact.download_url.clone(),
                }))?;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        if self.provider.kind() == ProviderKind::GitLab {
            self.enqueue_dotenv_items(queue, run, &run_handle).await?;
        }
        Ok(())
    }

    async fn enqueue_dotenv_items(&self, queue: &Arc<DiskQueue>, run: &RunRef, run_handle: &RunHandle) -> Result<()> {
        let mut cursor: Option<String> = None;
        loop {
            let page = self.provider.list_jobs(run, cursor.as_deref()).await?;
            for job in &page.items {
                queue.enqueue(QueueItem::Dotenv(DotenvHandle {
                    run: run_handle.clone(),
                    job_id: job.id,
                    job_name: job.name.clone(),
                }))?;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(())
    }
}

/// Re-hydrates one dequeued item into a provider download plus the
/// decompress/detect pipeline. Workers never panic the process on a
/// single bad item — every branch logs and moves
/// on rather than returning an error to the pool.
struct DispatchHandler {
    session: Arc<ScanSession>,
    provider: Arc<dyn ProviderAdapter>,
    reporter: Arc<Reporter>,
}

impl DispatchHandler {
    async fn handle_job_trace(&self, run: &RunHandle) {
        let run_ref = run.to_run_ref();
        let ctx = QueueItem::JobTrace(run.clone()).report_context();
        match self.provider.download_log(&run_ref, None).await {
            Ok(bytes) => {
                if let Err(e) = extract_and_scan(&self.session, &self.reporter, &bytes, "job trace", &ctx, 1).await {
                    warn!(repo = %run.repo_full_name, run_id = run.run_id, error = %e, "failed to scan job trace");
                }
            }
            Err(e) => {
                debug!(repo = %run.repo_full_name, run_id = run.run_id, error = %e, "failed to download job trace");
            }
        }
    }

    async fn handle_artifact(&self, handle: &ArtifactHandle) {
        let ctx = QueueItem::Artifact(handle.clone()).report_context();
        let artifact_ref = ArtifactRef {
            id: handle.artifact_id.clone(),
            name: handle.artifact_name.clone(),
            size_bytes: handle.declared_size,
            expired: false,
            download_url: handle.download_url.clone(),
        };
        match self.provider.download_artifact(&artifact_ref).await {
            Ok(bytes) => {
                let opts = ProcessOptions {
                    max_workers: self.session.config.threads,
                    max_artifact_size: self.session.config.max_artifact_size,
                };
                if let Err(e) = artifact::process(&self.session, &self.reporter, &bytes, &handle.artifact_name, &ctx, &opts).await
                {
                    warn!(artifact = %handle.artifact_name, error = %e, "failed to scan artifact");
                }
            }
            Err(e) => {
                debug!(artifact = %handle.artifact_name, error = %e, "failed to download artifact");
            }
        }
    }

    async fn handle_dotenv(&self, handle: &DotenvHandle) {
        use crate::providers::gitlab;

        let ctx = QueueItem::Dotenv(handle.clone()).report_context();
        let repo = RepoRef::minimal(&handle.run.repo_full_name);
        match gitlab::fetch_dotenv_via_cookie(&self.session.http, &self.session.config.base_url, &repo, handle.job_id).await {
            Ok(bytes) => match detect::detect(&self.session, &bytes).await {
                Ok(findings) => {
                    for finding in &findings {
                        self.reporter.report(finding, &ctx);
                    }
                }
                Err(e) => warn!(job_id = handle.job_id, error = %e, "failed to scan dotenv artifact"),
            },
            Err(e) => {
                debug!(job_id = handle.job_id, error = %e, "failed to fetch dotenv artifact");
            }
        }
    }
}

#[async_trait]
impl ItemHandler for DispatchHandler {
    async fn handle(&self, item: QueueItem) {
        match item {
            QueueItem::JobTrace(run) => self.handle_job_trace(&run).await,
            QueueItem::Artifact(handle) => self.handle_artifact(&handle).await,
            QueueItem::Dotenv(handle) => self.handle_dotenv(&handle).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::http::HttpClient;
    use crate::providers::{JobRef, Page};
    use crate::rules::RuleStore;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StubProvider {
        runs_requested: AtomicUsize,
    }

    #[async_trait]
    impl ProviderAdapter for StubProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::GitHub
        }

        async fn list_repositories(&self, _mode: &EnumerationMode, cursor: Option<&str>) -> Result<Page<RepoRef>> {
            if cursor.is_some() {
                return Ok(Page::empty());
            }
            Ok(Page {
                items: vec![RepoRef {
                    owner: "acme".into(),
                    name: "widgets".into(),
                    default_branch: "main".into(),
                    web_url: "https://example.invalid/acme/widgets".into(),
                    visibility: "public".into(),
                    can_read: true,
                }],
                next_cursor: None,
            })
        }

        async fn list_runs(&self, repo: &RepoRef, cursor: Option<&str>) -> Result<Page<RunRef>> {
            self.runs_requested.fetch_add(1, Ordering::SeqCst);
            if cursor.is_some() {
                return Ok(Page::empty());
            }
            let items = (1..=3u64)
                .map(|id| RunRef {
                    id,
                    repo: repo.clone(),
                    web_url: format!("https://example.invalid/acme/widgets/-/pipelines/{id}"),
                    title: String::new(),
                    status: "success".into(),
                })
                .collect();
            Ok(Page { items, next_cursor: None })
        }

        async fn list_jobs(&self, _run: &RunRef, _cursor: Option<&str>) -> Result<Page<JobRef>> {
            Ok(Page::empty())
        }

        async fn list_artifacts(&self, _run: &RunRef, _cursor: Option<&str>) -> Result<Page<ArtifactRef>> {
            Ok(Page::empty())
        }

        async fn download_log(&self, _run: &RunRef, _job: Option<&JobRef>) -> Result<Vec<u8>> {
            Ok(b"nothing interesting here".to_vec())
        }

        async fn download_artifact(&self, _artifact: &ArtifactRef) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn test_config(queue_dir: std::path::PathBuf) -> ScanConfig {
        ScanConfig {
            token: None,
            base_url: "https://example.invalid".into(),
            mode: EnumerationMode::Owned,
            scan_artifacts: false,
            max_artifact_size: 500_000_000,
            threads: 2,
            confidence_filter: HashSet::new(),
            verify: false,
            runs_limit: Some(2),
            start_run_id: None,
            queue_dir,
            cookie: None,
            hit_timeout: Duration::from_secs(5),
            ignore_certs: true,
            proxy_ignore: true,
        }
    }

    #[tokio::test]
    async fn runs_limit_stops_enumeration_once_reached() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf());
        let http = HttpClient::new(None, true, true, None).unwrap();
        let rules = RuleStore::from_patterns(vec![], vec![]);
        let session = ScanSession::for_tests(config, rules, http);

        let provider: Arc<dyn ProviderAdapter> = Arc::new(StubProvider { runs_requested: AtomicUsize::new(0) });
        let reporter = Arc::new(Reporter::new());
        let orchestrator = ScanOrchestrator::new(session, provider, reporter);

        let status = orchestrator.run().await.unwrap();
        assert_eq!(status.received, 2, "only 2 of the 3 available runs should have been enqueued");
        assert_eq!(status.pending, 0, "queue should be fully drained after shutdown");
    }
}

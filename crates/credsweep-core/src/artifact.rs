//! C4 — Artifact Processor.
//!
//! Orchestrates download, decompress, and dispatch to the archive
//! extractor and detection engine for one downloaded artifact, applying
//! size caps before and after decompression so a single hostile
//! artifact can't exhaust memory.

use std::io::Cursor;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::archive::extract_and_scan;
use crate::error::Result;
use crate::report::{FindingContext, Reporter};
use crate::session::ScanSession;

/// Per-call options for `process`.
pub struct ProcessOptions {
    pub max_workers: usize,
    pub max_artifact_size: u64,
}

/// Processes one artifact's bytes: size-gates it, then either walks it
/// as a zip (bounded-concurrency per entry) or treats it as a single
/// file via the archive extractor. `session` and `reporter` are taken by
/// `Arc` so that one clone per spawned entry-processing task is enough
/// to satisfy the `'static` bound `tokio::spawn` requires.
pub async fn process(
    session: &Arc<ScanSession>,
    reporter: &Arc<Reporter>,
    bytes: &[u8],
    display_name: &str,
    ctx: &FindingContext,
    opts: &ProcessOptions,
) -> Result<()> {
    if bytes.len() as u64 > opts.max_artifact_size {
        debug!(display_name, size = bytes.len(), "skipping oversized artifact");
        return Ok(());
    }

    let Ok(mut zip) = zip::ZipArchive::new(Cursor::new(bytes)) else {
        // Not a zip at all (or a corrupt one) — hand the whole buffer to
        // the archive extractor, which will re-sniff it as tar/gzip/7z/
        // plain text.
        return extract_and_scan(session, reporter, bytes, display_name, ctx, 1).await;
    };

    let uncompressed_total: u64 = (0..zip.len())
        .filter_map(|i| zip.by_index_raw(i).ok().map(|f| f.size()))
        .sum();
    if uncompressed_total > opts.max_artifact_size {
        debug!(display_name, uncompressed_total, "Skipped large extracted Zip artifact");
        return Ok(());
    }

    let mut entries = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let mut entry = match zip.by_index(i) {
            Ok(e) => e,
            Err(e) => {
                debug!(display_name, index = i, error = %e, "skipping unreadable zip entry");
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry.enclosed_name().map(|p| p.to_string_lossy().into_owned()) else {
            continue;
        };
        let mut content = Vec::with_capacity(entry.size() as usize);
        if std::io::copy(&mut entry, &mut content).is_err() {
            continue;
        }
        entries.push((name, content));
    }

    let semaphore = Arc::new(Semaphore::new(opts.max_workers.max(1)));
    let mut set = JoinSet::new();
    for (name, content) in entries {
        let permit = semaphore.clone();
        let ctx = ctx.clone();
        let session = session.clone();
        let reporter = reporter.clone();
        set.spawn(async move {
            let _permit = permit.acquire_owned().await.ok();
            let _ = extract_and_scan(&session, &reporter, &content, &name, &ctx, 1).await;
        });
    }
    while set.join_next().await.is_some() {}

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnumerationMode, ScanConfig};
    use crate::http::HttpClient;
    use crate::rules::{Confidence, Pattern, RuleStore};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_session(patterns: Vec<Pattern>) -> Arc<ScanSession> {
        let config = ScanConfig {
            token: None,
            base_url: "https://example.invalid".into(),
            mode: EnumerationMode::Owned,
            scan_artifacts: true,
            max_artifact_size: 500_000_000,
            threads: 4,
            confidence_filter: HashSet::new(),
            verify: false,
            runs_limit: None,
            start_run_id: None,
            queue_dir: std::env::temp_dir(),
            cookie: None,
            hit_timeout: Duration::from_secs(5),
            ignore_certs: true,
            proxy_ignore: false,
        };
        let http = HttpClient::new(None, true, false, None).unwrap();
        let rules = RuleStore::from_patterns(patterns, Vec::new());
        ScanSession::for_tests(config, rules, http)
    }

    fn zip_with_entries(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options = zip::write::SimpleFileOptions::default();
            for (name, content) in entries {
                writer.start_file(*name, options).unwrap();
                std::io::Write::write_all(&mut writer, content).unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    #[tokio::test]
    async fn processes_each_zip_entry() {
        let session = test_session(vec![Pattern {
            name: "Predefined CI env variable".into(),
            regex: r"CI_REGISTRY_PASSWORD=.*".into(),
            confidence: Confidence::Medium,
        }]);
        let reporter = Arc::new(Reporter::new());
        let bytes = zip_with_entries(&[
            ("secret.env", b"CI_REGISTRY_PASSWORD=hunter2"),
            ("README.md", b"nothing to see here"),
        ]);
        let opts = ProcessOptions { max_workers: 2, max_artifact_size: 500_000_000 };
        let ctx = FindingContext { repo: "acme/widgets".into(), ..Default::default() };

        process(&session, &reporter, &bytes, "artifacts.zip", &ctx, &opts)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn oversized_artifact_is_skipped_before_any_extraction() {
        let session = test_session(vec![]);
        let reporter = Arc::new(Reporter::new());
        let opts = ProcessOptions { max_workers: 2, max_artifact_size: 4 };
        let ctx = FindingContext::default();

        let result = process(&session, &reporter, b"more than four bytes", "big.zip", &ctx, &opts).await;
        assert!(result.is_ok());
    }
}

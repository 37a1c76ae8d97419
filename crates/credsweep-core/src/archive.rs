//! C3 — Archive Extractor.
//!
//! Content-sniffs a byte stream, materializes archives to a scoped temp
//! directory, walks the extracted tree, and recurses into nested
//! archives up to a depth cap, handing text leaves to the detection
//! engine and skipping recognized binaries.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::detect::detect;
use crate::error::{CredsweepError, Result};
use crate::report::{FindingContext, Reporter};
use crate::session::ScanSession;

const MAX_DEPTH: u32 = 10;

const DEPENDENCY_DIR_MARKERS: &[&str] = &[
    "node_modules",
    ".yarn",
    ".yarn-cache",
    ".npm",
    "venv",
    "vendor",
    ".go/pkg/mod/",
];

fn is_dependency_path(display_name: &str) -> bool {
    DEPENDENCY_DIR_MARKERS.iter().any(|marker| display_name.contains(marker))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
    Gzip,
    Bzip2,
    SevenZ,
}

enum Sniff {
    Archive(ArchiveKind),
    Binary,
    Text,
}

fn looks_like_tar(bytes: &[u8]) -> bool {
    bytes.len() > 262 && &bytes[257..262] == b"ustar"
}

fn sniff(bytes: &[u8]) -> Sniff {
    if let Some(kind) = archive_kind(bytes) {
        return Sniff::Archive(kind);
    }
    if let Some(info) = infer::get(bytes) {
        use infer::MatcherType;
        if matches!(
            info.matcher_type(),
            MatcherType::Image | MatcherType::Audio | MatcherType::Video | MatcherType::Font
        ) {
            return Sniff::Binary;
        }
    }
    match content_inspector::inspect(bytes) {
        content_inspector::ContentType::BINARY => Sniff::Binary,
        _ => Sniff::Text,
    }
}

fn archive_kind(bytes: &[u8]) -> Option<ArchiveKind> {
    if looks_like_tar(bytes) {
        return Some(ArchiveKind::Tar);
    }
    let info = infer::get(bytes)?;
    match info.extension() {
        "zip" => Some(ArchiveKind::Zip),
        "tar" => Some(ArchiveKind::Tar),
        "gz" => {
            let mut decoder = flate2::read::GzDecoder::new(bytes);
            let mut probe = [0u8; 262];
            use std::io::Read;
            if decoder.read_exact(&mut probe).is_ok() && looks_like_tar(&probe) {
                Some(ArchiveKind::TarGz)
            } else {
                Some(ArchiveKind::Gzip)
            }
        }
        "bz2" => Some(ArchiveKind::Bzip2),
        "7z" => Some(ArchiveKind::SevenZ),
        _ => None,
    }
}

/// Writes every entry of `bytes` (interpreted as `kind`) under `dest`,
/// creating parent directories as needed.
fn materialize_archive(bytes: &[u8], kind: ArchiveKind, dest: &Path) -> Result<()> {
    match kind {
        ArchiveKind::Zip => {
            let mut zip = zip::ZipArchive::new(Cursor::new(bytes))
                .map_err(|e| CredsweepError::Archive(format!("bad zip: {e}")))?;
            for i in 0..zip.len() {
                let mut entry = zip
                    .by_index(i)
                    .map_err(|e| CredsweepError::Archive(format!("bad zip entry: {e}")))?;
                let Some(enclosed) = entry.enclosed_name() else { continue };
                let out_path = dest.join(enclosed);
                if entry.is_dir() {
                    std::fs::create_dir_all(&out_path)?;
                    continue;
                }
                if let Some(parent) = out_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut out = std::fs::File::create(&out_path)?;
                std::io::copy(&mut entry, &mut out)?;
            }
            Ok(())
        }
        ArchiveKind::Tar => {
            let mut archive = tar::Archive::new(Cursor::new(bytes));
            archive
                .unpack(dest)
                .map_err(|e| CredsweepError::Archive(format!("bad tar: {e}")))
        }
        ArchiveKind::TarGz => {
            let decoder = flate2::read::GzDecoder::new(Cursor::new(bytes));
            let mut archive = tar::Archive::new(decoder);
            archive
                .unpack(dest)
                .map_err(|e| CredsweepError::Archive(format!("bad tar.gz: {e}")))
        }
        ArchiveKind::Gzip => {
            std::fs::create_dir_all(dest)?;
            let mut decoder = flate2::read::GzDecoder::new(Cursor::new(bytes));
            let mut out = std::fs::File::create(dest.join("decompressed"))?;
            std::io::copy(&mut decoder, &mut out)?;
            Ok(())
        }
        ArchiveKind::Bzip2 => {
            std::fs::create_dir_all(dest)?;
            let mut decoder = bzip2::read::BzDecoder::new(Cursor::new(bytes));
            let mut out = std::fs::File::create(dest.join("decompressed"))?;
            std::io::copy(&mut decoder, &mut out)?;
            Ok(())
        }
        ArchiveKind::SevenZ => {
            std::fs::create_dir_all(dest)?;
            sevenz_rust::decompress(Cursor::new(bytes), dest)
                .map_err(|e| CredsweepError::Archive(format!("bad 7z: {e}")))
        }
    }
}

/// Content-sniffs and scans one buffer, recursing into archives. `depth`
/// is the caller's nesting level (the outer call starts at 1).
pub async fn extract_and_scan(
    session: &ScanSession,
    reporter: &Reporter,
    bytes: &[u8],
    display_name: &str,
    ctx: &FindingContext,
    depth: u32,
) -> Result<()> {
    if depth > MAX_DEPTH {
        debug!(display_name, depth, "extraction depth cap reached, stopping");
        return Ok(());
    }
    if is_dependency_path(display_name) {
        debug!(display_name, "skipping dependency directory");
        return Ok(());
    }

    match sniff(bytes) {
        Sniff::Archive(kind) => {
            let tmp_dir = tempfile::tempdir()?;
            if let Err(e) = materialize_archive(bytes, kind, tmp_dir.path()) {
                debug!(display_name, error = %e, "failed to extract archive, skipping");
                return Ok(());
            }
            walk_and_scan(session, reporter, tmp_dir.path(), ctx, depth).await?;
        }
        Sniff::Binary => {
            debug!(display_name, "skipping recognized binary");
        }
        Sniff::Text => {
            let mut leaf_ctx = ctx.clone();
            leaf_ctx.file = Some(display_name.to_string());
            let findings = detect(session, bytes).await?;
            for finding in &findings {
                reporter.report(finding, &leaf_ctx);
            }
        }
    }
    Ok(())
}

async fn walk_and_scan(
    session: &ScanSession,
    reporter: &Reporter,
    root: &Path,
    ctx: &FindingContext,
    depth: u32,
) -> Result<()> {
    let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];
    while let Some(current) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                stack.push(path);
                continue;
            }
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            let bytes = tokio::fs::read(&path).await?;
            Box::pin(extract_and_scan(session, reporter, &bytes, &name, ctx, depth + 1)).await?;
        }
    }
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

    fn zip_with_one_file(name: &str, contents: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file(name, options).unwrap();
            std::io::Write::write_all(&mut writer, contents).unwrap();
            writer.finish().unwrap();
        }
        buf
    }

    #[tokio::test]
    async fn finds_secret_inside_zip_entry() {
        let session = test_session(vec![Pattern {
            name: "Predefined CI env variable".into(),
            regex: r"CI_REGISTRY_PASSWORD=.*".into(),
            confidence: Confidence::Medium,
        }]);
        let reporter = Reporter::new();
        let zip_bytes = zip_with_one_file("secret.env", b"CI_REGISTRY_PASSWORD=hunter2");
        let ctx = FindingContext { repo: "acme/widgets".into(), ..Default::default() };

        extract_and_scan(&session, &reporter, &zip_bytes, "artifact.zip", &ctx, 1)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn depth_cap_stops_recursion_without_error() {
        let session = test_session(vec![]);
        let reporter = Reporter::new();
        let ctx = FindingContext::default();
        let result = extract_and_scan(&session, &reporter, b"whatever", "x.zip", &ctx, MAX_DEPTH + 1).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn dependency_directory_is_skipped() {
        let session = test_session(vec![Pattern {
            name: "literal".into(),
            regex: "should-not-match".into(),
            confidence: Confidence::Low,
        }]);
        let reporter = Reporter::new();
        let ctx = FindingContext::default();
        let result = extract_and_scan(
            &session,
            &reporter,
            b"should-not-match",
            "project/node_modules/pkg/index.js",
            &ctx,
            1,
        )
        .await;
        assert!(result.is_ok());
    }

    #[test]
    fn sniff_classifies_known_text_as_text() {
        match sniff(b"plain text content with no magic bytes") {
            Sniff::Text => {}
            _ => panic!("expected text classification"),
        }
    }
}

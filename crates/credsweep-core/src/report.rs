//! C8 — Finding Reporter.
//!
//! A pure sink: takes a `Finding` plus its call-site context and emits a
//! structured WARN-level log line, optionally
//! appending the same record as a JSON line to a hit file for CLI-side
//! aggregation. Never drops or swallows a finding.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;
use tracing::warn;

use crate::detect::Finding;
use crate::error::Result;

/// Call-site metadata attached to every finding.
#[derive(Debug, Clone, Default)]
pub struct FindingContext {
    pub repo: String,
    pub run_url: String,
    pub run_id: Option<u64>,
    pub job_id: Option<u64>,
    pub job_name: Option<String>,
    pub file: Option<String>,
    pub archive: Option<String>,
}

#[derive(Serialize)]
struct HitRecord<'a> {
    confidence: &'a str,
    rule_name: &'a str,
    value: &'a str,
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    archive: Option<&'a str>,
    repo: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<u64>,
}

/// Emits findings as structured log records and, optionally, as JSON
/// lines to a hit file on disk.
pub struct Reporter {
    hit_file: Option<Mutex<std::fs::File>>,
}

impl Reporter {
    pub fn new() -> Self {
        Self { hit_file: None }
    }

    pub fn with_hit_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self { hit_file: Some(Mutex::new(file)) })
    }

    /// Emits one finding. Logging never fails the scan; a write error to
    /// the optional hit file is logged but not propagated.
    pub fn report(&self, finding: &Finding, ctx: &FindingContext) {
        warn!(
            confidence = %finding.confidence,
            rule_name = %finding.pattern_name,
            value = %finding.context,
            url = %ctx.run_url,
            job_name = ctx.job_name.as_deref(),
            file = ctx.file.as_deref(),
            archive = ctx.archive.as_deref(),
            repo = %ctx.repo,
            run_id = ctx.run_id,
            job_id = ctx.job_id,
            "secret detected"
        );

        if let Some(file) = &self.hit_file {
            let record = HitRecord {
                confidence: finding.confidence.as_str(),
                rule_name: &finding.pattern_name,
                value: &finding.context,
                url: &ctx.run_url,
                job_name: ctx.job_name.as_deref(),
                file: ctx.file.as_deref(),
                archive: ctx.archive.as_deref(),
                repo: &ctx.repo,
                run_id: ctx.run_id,
                job_id: ctx.job_id,
            };
            match serde_json::to_string(&record) {
                Ok(mut line) => {
                    line.push('\n');
                    if let Ok(mut f) = file.lock() {
                        if let Err(e) = f.write_all(line.as_bytes()) {
                            tracing::error!(error = %e, "failed to write hit file record");
                        }
                    }
                }
                Err(e) => tracing::error!(error = %e, "failed to serialize hit file record"),
            }
        }
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Confidence;

    #[test]
    fn writes_one_json_line_per_finding_to_hit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hits.jsonl");
        let reporter = Reporter::with_hit_file(&path).unwrap();

        let finding = Finding {
            pattern_name: "Predefined CI env variable".into(),
            confidence: Confidence::Medium,
            matched_text: "CI_REGISTRY_PASSWORD=hunter2".into(),
            context: "CI_REGISTRY_PASSWORD=hunter2".into(),
        };
        let ctx = FindingContext {
            repo: "acme/widgets".into(),
            run_url: "https://example.invalid/acme/widgets/-/jobs/1".into(),
            run_id: Some(42),
            job_id: Some(1),
            job_name: Some("build".into()),
            file: Some("secret.env".into()),
            archive: Some("artifacts.zip".into()),
        };
        reporter.report(&finding, &ctx);
        reporter.report(&finding, &ctx);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("\"rule_name\":\"Predefined CI env variable\""));
        assert!(contents.contains("\"file\":\"secret.env\""));
    }

    #[test]
    fn reporter_without_hit_file_does_not_panic() {
        let reporter = Reporter::new();
        let finding = Finding {
            pattern_name: "x".into(),
            confidence: Confidence::Low,
            matched_text: "y".into(),
            context: "y".into(),
        };
        reporter.report(&finding, &FindingContext::default());
    }
}

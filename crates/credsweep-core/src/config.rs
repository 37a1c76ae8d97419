//! Scan configuration shared by the orchestrator and every downstream
//! component. Built once from CLI flags (or test fixtures) and handed
//! around as `Arc<ScanConfig>`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CredsweepError, Result};
use crate::rules::Confidence;

/// One enumeration mode, mutually exclusive with the others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumerationMode {
    Owned,
    Organization(String),
    User(String),
    Search(String),
    Everything,
    Single(String),
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub token: Option<String>,
    pub base_url: String,
    pub mode: EnumerationMode,
    pub scan_artifacts: bool,
    pub max_artifact_size: u64,
    pub threads: usize,
    pub confidence_filter: HashSet<Confidence>,
    pub verify: bool,
    pub runs_limit: Option<usize>,
    pub start_run_id: Option<u64>,
    pub queue_dir: PathBuf,
    pub cookie: Option<String>,
    pub hit_timeout: Duration,
    pub ignore_certs: bool,
    pub proxy_ignore: bool,
}

impl ScanConfig {
    /// Parse a human size string such as `"500Mb"` into bytes.
    ///
    /// Delegates to `bytesize`'s own parser and only wraps the error in
    /// our own type so callers never have to match on an external crate's
    /// error type.
    pub fn parse_size(input: &str) -> Result<u64> {
        input
            .parse::<bytesize::ByteSize>()
            .map(|b| b.as_u64())
            .map_err(|e| CredsweepError::InvalidConfiguration(format!("bad size {input:?}: {e}")))
    }

    /// Validate mode/flag combinations the orchestrator must reject before
    /// any network call.
    pub fn validate(&self) -> Result<()> {
        if self.start_run_id.is_some() && !matches!(self.mode, EnumerationMode::Single(_)) {
            return Err(CredsweepError::InvalidConfiguration(
                "--start-run-id is only valid with single-repo mode".into(),
            ));
        }
        if self.threads == 0 {
            return Err(CredsweepError::InvalidConfiguration(
                "--threads must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_accepts_human_units() {
        assert_eq!(ScanConfig::parse_size("500Mb").unwrap(), 500 * 1_000_000);
        assert_eq!(ScanConfig::parse_size("1GiB").unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn parse_size_rejects_garbage() {
        assert!(ScanConfig::parse_size("not-a-size").is_err());
    }

    fn base_config(mode: EnumerationMode) -> ScanConfig {
        ScanConfig {
            token: None,
            base_url: "https://example.invalid".into(),
            mode,
            scan_artifacts: false,
            max_artifact_size: 500_000_000,
            threads: 4,
            confidence_filter: HashSet::new(),
            verify: false,
            runs_limit: None,
            start_run_id: None,
            queue_dir: std::env::temp_dir(),
            cookie: None,
            hit_timeout: Duration::from_secs(30),
            ignore_certs: true,
            proxy_ignore: false,
        }
    }

    #[test]
    fn start_run_id_requires_single_mode() {
        let mut cfg = base_config(EnumerationMode::Owned);
        cfg.start_run_id = Some(42);
        assert!(cfg.validate().is_err());

        let mut cfg = base_config(EnumerationMode::Single("acme/widgets".into()));
        cfg.start_run_id = Some(42);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_threads_rejected() {
        let mut cfg = base_config(EnumerationMode::Owned);
        cfg.threads = 0;
        assert!(cfg.validate().is_err());
    }
}

//! The process-wide "scan session" object: the pattern set, the detector set, the deduplication window,
//! and the proxy-ignore flag. All four are set before workers start, or
//! guarded by a mutex thereafter, so bundling them in one `Arc` is safe to
//! share across the worker pool.

use std::sync::Arc;

use crate::config::ScanConfig;
use crate::detect::dedup::Dedup;
use crate::error::Result;
use crate::http::HttpClient;
use crate::rules::RuleStore;

pub struct ScanSession {
    pub config: ScanConfig,
    pub http: HttpClient,
    pub rules: RuleStore,
    pub dedup: Dedup,
}

impl ScanSession {
    pub async fn init(config: ScanConfig, rules_url: &str, rules_cache: &std::path::Path) -> Result<Arc<Self>> {
        let http = HttpClient::new(
            config.token.clone(),
            config.ignore_certs,
            config.proxy_ignore,
            config.cookie.as_deref(),
        )?;
        let rules = RuleStore::init(&http, rules_url, rules_cache).await?;
        Ok(Arc::new(Self {
            config,
            http,
            rules,
            dedup: Dedup::new(),
        }))
    }

    #[cfg(test)]
    pub fn for_tests(config: ScanConfig, rules: RuleStore, http: HttpClient) -> Arc<Self> {
        Arc::new(Self { config, http, rules, dedup: Dedup::new() })
    }
}

//! C1 — Rule Store.
//!
//! Fetches and caches the regex pattern database and owns the
//! verifier-detector set. Initialized exactly once per process;
//! `patterns()` is filtered by confidence, `detectors()` is returned
//! unfiltered — the confidence filter applies only to regex rules.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::detect::verify::{AwsAccessKeyVerifier, VerifierDetector, WebhookUrlVerifier};
use crate::error::{CredsweepError, Result};
use crate::http::HttpClient;

/// Coarse classification of how likely a pattern match is a true positive;
/// also used as a user-facing filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Confidence {
    Low,
    Medium,
    High,
    HighVerified,
    TrufflehogUnverified,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
            Confidence::HighVerified => "high-verified",
            Confidence::TrufflehogUnverified => "trufflehog-unverified",
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Confidence {
    type Err = CredsweepError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Confidence::Low),
            "medium" => Ok(Confidence::Medium),
            "high" => Ok(Confidence::High),
            "high-verified" => Ok(Confidence::HighVerified),
            "trufflehog-unverified" => Ok(Confidence::TrufflehogUnverified),
            other => Err(CredsweepError::InvalidConfiguration(format!(
                "unknown confidence level {other:?}"
            ))),
        }
    }
}

/// A single regex-based secret detection rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub name: String,
    pub regex: String,
    pub confidence: Confidence,
}

/// Wire format of `rules.yml`.
#[derive(Debug, Deserialize)]
struct RulesFile {
    patterns: Vec<RulesFileEntry>,
}

#[derive(Debug, Deserialize)]
struct RulesFileEntry {
    pattern: Pattern,
}

const BUILTIN_CI_ENV_RULE_NAME: &str = "Predefined CI env variable";
const BUILTIN_CI_ENV_RULE_REGEX: &str = r"(GITLAB_USER_ID|KUBECONFIG|CI_SERVER_TLS_KEY_FILE|CI_REPOSITORY_URL|CI_REGISTRY_PASSWORD|DOCKER_AUTH_CONFIG)=.*";

/// The process-wide pattern set plus verifier-detector set, loaded once.
pub struct RuleStore {
    patterns: Vec<Pattern>,
    detectors: Vec<Arc<dyn VerifierDetector>>,
}

impl RuleStore {
    /// Load the regex pattern database, downloading it to `cache_path` if
    /// absent, and initialize the built-in verifier detectors. A failure
    /// to download or parse the rules file is fatal.
    pub async fn init(
        http: &HttpClient,
        rules_url: &str,
        cache_path: &Path,
    ) -> Result<Self> {
        let raw = if cache_path.exists() {
            tokio::fs::read_to_string(cache_path)
                .await
                .map_err(CredsweepError::Io)?
        } else {
            let body = http
                .get_text(rules_url)
                .await
                .map_err(|e| CredsweepError::RulesUnavailable(e.to_string()))?;
            if let Some(parent) = cache_path.parent() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
            let _ = tokio::fs::write(cache_path, &body).await;
            body
        };

        let mut parsed: RulesFile = serde_yaml::from_str(&raw)
            .map_err(|e| CredsweepError::RulesUnavailable(format!("invalid rules.yml: {e}")))?;

        let mut patterns: Vec<Pattern> = parsed.patterns.drain(..).map(|e| e.pattern).collect();
        patterns.push(Pattern {
            name: BUILTIN_CI_ENV_RULE_NAME.to_string(),
            regex: BUILTIN_CI_ENV_RULE_REGEX.to_string(),
            confidence: Confidence::Medium,
        });

        let detectors: Vec<Arc<dyn VerifierDetector>> = vec![
            Arc::new(AwsAccessKeyVerifier::default()),
            Arc::new(WebhookUrlVerifier::default()),
        ];

        Ok(Self { patterns, detectors })
    }

    /// Build a `RuleStore` directly from an in-memory pattern set, for
    /// tests and for the `--rules` offline path. Bypasses the network.
    pub fn from_patterns(patterns: Vec<Pattern>, detectors: Vec<Arc<dyn VerifierDetector>>) -> Self {
        Self { patterns, detectors }
    }

    /// Patterns whose confidence is in `filter` — an empty filter keeps
    /// all patterns.
    pub fn patterns(&self, filter: &std::collections::HashSet<Confidence>) -> Vec<&Pattern> {
        if filter.is_empty() {
            self.patterns.iter().collect()
        } else {
            self.patterns
                .iter()
                .filter(|p| filter.contains(&p.confidence))
                .collect()
        }
    }

    /// Verifier detectors, unfiltered — the confidence filter never
    /// applies to them.
    pub fn detectors(&self) -> &[Arc<dyn VerifierDetector>] {
        &self.detectors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_round_trips_through_str() {
        for c in [
            Confidence::Low,
            Confidence::Medium,
            Confidence::High,
            Confidence::HighVerified,
            Confidence::TrufflehogUnverified,
        ] {
            let s = c.to_string();
            let parsed: Confidence = s.parse().unwrap();
            assert_eq!(parsed, c);
        }
    }

    #[test]
    fn builtin_rule_matches_ci_registry_password() {
        let store = RuleStore::from_patterns(
            vec![Pattern {
                name: BUILTIN_CI_ENV_RULE_NAME.to_string(),
                regex: BUILTIN_CI_ENV_RULE_REGEX.to_string(),
                confidence: Confidence::Medium,
            }],
            Vec::new(),
        );
        let filter = std::collections::HashSet::new();
        let patterns = store.patterns(&filter);
        let re = regex::Regex::new(&patterns[0].regex).unwrap();
        assert!(re.is_match("CI_REGISTRY_PASSWORD=hunter2"));
    }

    #[test]
    fn empty_filter_keeps_all_patterns() {
        let store = RuleStore::from_patterns(
            vec![
                Pattern { name: "a".into(), regex: "a".into(), confidence: Confidence::Low },
                Pattern { name: "b".into(), regex: "b".into(), confidence: Confidence::High },
            ],
            Vec::new(),
        );
        assert_eq!(store.patterns(&std::collections::HashSet::new()).len(), 2);
    }

    #[test]
    fn filter_restricts_to_requested_confidences() {
        let store = RuleStore::from_patterns(
            vec![
                Pattern { name: "a".into(), regex: "a".into(), confidence: Confidence::Low },
                Pattern { name: "b".into(), regex: "b".into(), confidence: Confidence::High },
            ],
            Vec::new(),
        );
        let mut filter = std::collections::HashSet::new();
        filter.insert(Confidence::High);
        let got = store.patterns(&filter);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].name, "b");
    }
}

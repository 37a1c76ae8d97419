//! Shared cookie-authenticated UI-scraping fallback for GitLab and
//! Gitea, used when a token-authenticated listing call returns 403 but
//! a session cookie is configured.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use tokio::task::JoinSet;

use crate::error::Result;
use crate::http::HttpClient;

fn csrf_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"csrfToken:\s*'([^']+)'"#).unwrap())
}

/// Extracts `csrfToken: '...'` from an inline script on the issues page.
pub fn extract_csrf_token(html: &str) -> Option<String> {
    csrf_regex().captures(html).map(|c| c[1].to_string())
}

/// Extracts the highest run id referenced by `/<owner>/<repo>/actions/runs/<id>`
/// links on the public actions page.
pub fn extract_latest_run_id(html: &str, owner: &str, repo: &str) -> Option<u64> {
    let pattern = format!(r"/{}/{}/actions/runs/(\d+)", regex::escape(owner), regex::escape(repo));
    let re = Regex::new(&pattern).ok()?;
    re.captures_iter(html).filter_map(|c| c[1].parse::<u64>().ok()).max()
}

pub fn synthesize_artifact_url(base_url: &str, owner: &str, repo: &str, run_id: u64, artifact_name: &str) -> String {
    format!("{base_url}/{owner}/{repo}/actions/runs/{run_id}/artifacts/{artifact_name}")
}

#[derive(Debug, Deserialize)]
pub struct CookieArtifactsResponse {
    pub artifacts: Vec<CookieArtifactEntry>,
}

#[derive(Debug, Deserialize)]
pub struct CookieArtifactEntry {
    pub name: String,
    pub size: Option<u64>,
    #[allow(dead_code)]
    pub status: Option<String>,
}

/// Fetches the issues page once and pulls the CSRF token out of it.
pub async fn fetch_csrf_token(http: &HttpClient, issues_url: &str) -> Result<Option<String>> {
    let html = http.get_text(issues_url).await?;
    Ok(extract_csrf_token(&html))
}

/// POSTs the dummy `{logCursors:[]}` body with the CSRF header set and
/// parses the artifact listing response.
pub async fn fetch_cookie_artifacts(
    http: &HttpClient,
    jobs_endpoint: &str,
    csrf_token: &str,
) -> Result<Vec<CookieArtifactEntry>> {
    let resp = http
        .inner()
        .post(jobs_endpoint)
        .header("X-CSRF-Token", csrf_token)
        .json(&serde_json::json!({ "logCursors": [] }))
        .send()
        .await?;
    let parsed: CookieArtifactsResponse = resp.json().await?;
    Ok(parsed.artifacts)
}

/// Consecutive-failure breaker for walking run ids downward under the
/// cookie fallback. Counts failures strictly in id order via a reorder
/// buffer keyed by the "expected" id, so concurrent workers completing
/// out of order never falsely trip it.
pub struct ConsecutiveFailureBreaker {
    state: Mutex<BreakerState>,
}

struct BreakerState {
    expected_id: u64,
    results: HashMap<u64, bool>,
    consecutive_failures: u32,
    tripped: bool,
}

const TRIP_THRESHOLD: u32 = 5;

impl ConsecutiveFailureBreaker {
    pub fn new(start_id: u64) -> Self {
        Self {
            state: Mutex::new(BreakerState {
                expected_id: start_id,
                results: HashMap::new(),
                consecutive_failures: 0,
                tripped: false,
            }),
        }
    }

    /// Records the outcome of fetching `id`. Returns `true` once the
    /// breaker has tripped (callers should stop issuing further
    /// requests below the expected id, though in-flight ones below it
    /// may still complete).
    pub fn record(&self, id: u64, success: bool) -> bool {
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        state.results.insert(id, success);

        loop {
            let Some(outcome) = state.results.remove(&state.expected_id) else { break };
            if outcome {
                state.consecutive_failures = 0;
            } else {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= TRIP_THRESHOLD {
                    state.tripped = true;
                }
            }
            if state.tripped || state.expected_id == 0 {
                break;
            }
            state.expected_id -= 1;
        }
        state.tripped
    }

    pub fn is_tripped(&self) -> bool {
        self.state.lock().expect("breaker mutex poisoned").tripped
    }
}

/// Outcome of one batch of the breaker-respecting downward id walk.
pub struct CookieRunWalk {
    /// Ids in this batch that probed as live runs, newest-first.
    pub ok_ids: Vec<u64>,
    /// Where the next batch should start, or `None` once the breaker
    /// tripped or the walk reached id 0.
    pub next_cursor: Option<u64>,
}

/// Probes a batch of run ids downward from `start_id` concurrently,
/// feeding each outcome through `breaker` in strict id order via its
/// reorder buffer. `url_for_id` builds the
/// per-id probe URL; a 2xx/3xx response counts as a live run.
pub async fn walk_run_ids<F>(
    http: &HttpClient,
    breaker: &ConsecutiveFailureBreaker,
    start_id: u64,
    batch_size: u64,
    url_for_id: F,
) -> CookieRunWalk
where
    F: Fn(u64) -> String,
{
    if start_id == 0 || breaker.is_tripped() {
        return CookieRunWalk { ok_ids: Vec::new(), next_cursor: None };
    }
    let n = batch_size.max(1).min(start_id + 1);

    let mut set = JoinSet::new();
    for i in 0..n {
        let id = start_id - i;
        let url = url_for_id(id);
        let http = http.clone();
        set.spawn(async move {
            let ok = http
                .get_with_header(&url, None)
                .await
                .map(|r| r.status().is_success() || r.status().is_redirection())
                .unwrap_or(false);
            (id, ok)
        });
    }
    let mut outcomes = HashMap::with_capacity(n as usize);
    while let Some(joined) = set.join_next().await {
        if let Ok((id, ok)) = joined {
            outcomes.insert(id, ok);
        }
    }

    let mut ok_ids = Vec::new();
    let mut tripped = false;
    for i in 0..n {
        let id = start_id - i;
        let ok = outcomes.get(&id).copied().unwrap_or(false);
        if ok {
            ok_ids.push(id);
        }
        if breaker.record(id, ok) {
            tripped = true;
        }
    }

    let next_cursor = if tripped || start_id < n { None } else { Some(start_id - n) };
    CookieRunWalk { ok_ids, next_cursor }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_csrf_token_from_inline_script() {
        let html = r#"<script>window.gon = {};gon.csrfToken: 'abc123';</script>"#;
        assert_eq!(extract_csrf_token(html), Some("abc123".to_string()));
    }

    #[test]
    fn extracts_highest_run_id_from_links() {
        let html = r#"
            <a href="/acme/widgets/actions/runs/100">run 100</a>
            <a href="/acme/widgets/actions/runs/87">run 87</a>
            <a href="/other/repo/actions/runs/999">unrelated</a>
        "#;
        assert_eq!(extract_latest_run_id(html, "acme", "widgets"), Some(100));
    }

    #[test]
    fn breaker_trips_after_five_consecutive_in_order_failures() {
        // Discovered max run id is 100; the walk starts at 98, and ids
        // 98..=93 all 404.
        let breaker = ConsecutiveFailureBreaker::new(98);
        for id in (94..=98).rev() {
            let tripped = breaker.record(id, false);
            if id > 94 {
                assert!(!tripped, "should not trip before the 5th consecutive failure");
            } else {
                assert!(tripped, "should trip on the 5th consecutive failure (id 94)");
            }
        }
    }

    #[test]
    fn breaker_ignores_completion_order_via_reorder_buffer() {
        let breaker = ConsecutiveFailureBreaker::new(10);
        // Completions arrive out of order, but the logical id sequence
        // 10,9,8,7,6 are all failures.
        assert!(!breaker.record(8, false));
        assert!(!breaker.record(10, false));
        assert!(!breaker.record(6, false));
        assert!(!breaker.record(9, false));
        assert!(breaker.record(7, false));
    }

    #[test]
    fn a_success_resets_the_consecutive_failure_count() {
        let breaker = ConsecutiveFailureBreaker::new(5);
        assert!(!breaker.record(5, false));
        assert!(!breaker.record(4, false));
        assert!(!breaker.record(3, true));
        assert!(!breaker.record(2, false));
        assert!(!breaker.record(1, false));
        assert!(!breaker.record(0, false));
    }

    #[tokio::test]
    async fn walk_run_ids_stops_exactly_at_the_breaker_trip() {
        use wiremock::matchers::{method, path_regex};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        // ids 100 and 99 exist; 98 down to 93 are all 404.
        Mock::given(method("GET"))
            .and(path_regex(r"^/runs/(100|99)$"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/runs/\d+$"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let http = HttpClient::new(None, true, true, None).unwrap();
        let breaker = ConsecutiveFailureBreaker::new(100);
        let base = server.uri();

        let first = walk_run_ids(&http, &breaker, 100, 10, |id| format!("{base}/runs/{id}")).await;

        assert!(first.ok_ids.contains(&100));
        assert!(first.ok_ids.contains(&99));
        assert!(breaker.is_tripped(), "5 consecutive failures (98..=94) should trip within one batch");
        assert!(first.next_cursor.is_none());
    }
}

//! C9 — HTTP Substrate.
//!
//! A retryable HTTP client shared by every provider adapter and artifact
//! downloader: TLS relaxation (the tool intentionally targets internal /
//! misconfigured hosts), cookie jar for UI-authenticated fallbacks,
//! default-header injection, retry policy, and optional proxying.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, warn};

use crate::error::{CredsweepError, Result};

const USER_AGENT_VALUE: &str = concat!("credsweep/", env!("CARGO_PKG_VERSION"));
const MAX_RETRIES: u32 = 5;
const RATE_LIMIT_SLACK: Duration = Duration::from_secs(30);

/// Returns whether a response with this status code should be retried.
///
/// 501 is treated as permanent; every
/// other 5xx and 429 are retried; everything else is not.
pub fn should_retry(status: StatusCode) -> bool {
    if status == StatusCode::NOT_IMPLEMENTED {
        return false;
    }
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    token: Option<String>,
}

impl HttpClient {
    pub fn new(token: Option<String>, ignore_certs: bool, proxy_ignore: bool, cookie: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        if let Some(ref t) = token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {t}"))
                    .map_err(|_| CredsweepError::InvalidConfiguration("invalid token".into()))?,
            );
        }

        let jar = Arc::new(reqwest::cookie::Jar::default());
        if let Some(value) = cookie {
            // Callers pass a raw `name=value` cookie; scope it to the base
            // URL the adapter will talk to. The adapter re-sets cookies
            // against its own base URL after construction if needed.
            if let Ok(url) = "https://localhost".parse::<reqwest::Url>() {
                jar.add_cookie_str(value, &url);
            }
        }

        let mut builder = Client::builder()
            .default_headers(headers)
            .cookie_provider(jar)
            .timeout(Duration::from_secs(60))
            .danger_accept_invalid_certs(ignore_certs);

        if !proxy_ignore {
            if let Ok(proxy_url) = std::env::var("HTTP_PROXY") {
                if let Ok(proxy) = reqwest::Proxy::all(proxy_url) {
                    builder = builder.proxy(proxy);
                }
            }
        } else {
            builder = builder.no_proxy();
        }

        let client = builder
            .build()
            .map_err(|e| CredsweepError::InvalidConfiguration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, token })
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// GET with the retry policy applied, injecting `header` only if the
    /// caller hasn't already set it.
    pub async fn get_with_header(
        &self,
        url: &str,
        header: Option<(&str, &str)>,
    ) -> Result<Response> {
        self.execute_retrying(|| {
            let mut req = self.client.get(url);
            if let Some((name, value)) = header {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::try_from(name),
                    HeaderValue::from_str(value),
                ) {
                    req = req.header(name, value);
                }
            }
            req
        })
        .await
    }

    pub async fn get_text(&self, url: &str) -> Result<String> {
        let resp = self.execute_retrying(|| self.client.get(url)).await?;
        Ok(resp.text().await?)
    }

    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.execute_retrying(|| self.client.get(url)).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    async fn execute_retrying<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = build().send().await;
            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() || status.is_redirection() {
                        return Ok(resp);
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        self.rate_limit_hook(&resp).await;
                        if attempt < MAX_RETRIES {
                            continue;
                        }
                    }
                    if should_retry(status) && attempt < MAX_RETRIES {
                        let backoff = Duration::from_millis(200 * 2u64.pow(attempt.min(5)));
                        debug!(%status, attempt, "retrying request after transient HTTP error");
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(e) if attempt < MAX_RETRIES => {
                    warn!(error = %e, attempt, "transport error, retrying");
                    tokio::time::sleep(Duration::from_millis(200 * 2u64.pow(attempt.min(5)))).await;
                }
                Err(e) => return Err(CredsweepError::Http(e)),
            }
        }
    }

    /// Called when a 429/primary/secondary rate limit is detected. Sleeps
    /// the calling worker until `reset + 30s`; other workers continue.
    async fn rate_limit_hook(&self, resp: &Response) {
        let reset_secs = resp
            .headers()
            .get("RateLimit-Reset")
            .or_else(|| resp.headers().get("Retry-After"))
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let sleep_for = match reset_secs {
            Some(secs) => Duration::from_secs(secs) + RATE_LIMIT_SLACK,
            None => RATE_LIMIT_SLACK,
        };
        warn!(?sleep_for, "rate limited, sleeping on this worker only");
        tokio::time::sleep(sleep_for).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_covers_the_known_cases() {
        assert!(!should_retry(StatusCode::NOT_IMPLEMENTED));
        assert!(should_retry(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(should_retry(StatusCode::BAD_GATEWAY));
        assert!(should_retry(StatusCode::SERVICE_UNAVAILABLE));
        assert!(should_retry(StatusCode::TOO_MANY_REQUESTS));
        assert!(!should_retry(StatusCode::OK));
    }

    proptest::proptest! {
        #[test]
        fn retry_policy_holds_over_every_status_code(raw in 100u16..600u16) {
            let Ok(status) = StatusCode::from_u16(raw) else { return Ok(()) };
            let expected = raw == 429 || (status.is_server_error() && raw != 501);
            proptest::prop_assert_eq!(should_retry(status), expected);
        }
    }
}

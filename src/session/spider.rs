use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use tracing::{debug, info, warn};

use super::document::{DocumentSession, Fetch};
use super::{BrowserEngine, BrowsingSession, SessionError, Timeouts};
use crate::pacer::Identity;

pub const API_KEY_VAR: &str = "SPIDER_API_KEY";

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;

/// Rendering engine backed by the spider.cloud scrape API: pages come back
/// after script execution, so client-rendered rates are present in the HTML.
pub struct SpiderEngine {
    spider: Arc<Spider>,
    sessions_opened: usize,
}

impl SpiderEngine {
    pub fn new(api_key: String) -> Result<Self, SessionError> {
        let spider = Spider::new(Some(api_key))
            .map_err(|e| SessionError::Unavailable(format!("Failed to create Spider client: {}", e)))?;
        Ok(Self {
            spider: Arc::new(spider),
            sessions_opened: 0,
        })
    }

    /// Engine from `SPIDER_API_KEY`, if set.
    pub fn from_env() -> Option<Result<Self, SessionError>> {
        std::env::var(API_KEY_VAR).ok().filter(|k| !k.is_empty()).map(Self::new)
    }
}

#[async_trait]
impl BrowserEngine for SpiderEngine {
    fn name(&self) -> &str {
        "spider"
    }

    async fn open_session(
        &mut self,
        identity: &Identity,
        timeouts: Timeouts,
    ) -> Result<Box<dyn BrowsingSession>, SessionError> {
        self.sessions_opened += 1;
        debug!(
            "Opened spider session #{} as {}",
            self.sessions_opened, identity.user_agent
        );
        let fetcher = SpiderFetcher {
            spider: Arc::clone(&self.spider),
            user_agent: identity.user_agent.to_string(),
        };
        Ok(Box::new(DocumentSession::new(fetcher, timeouts)))
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        info!("Closed spider engine ({} sessions)", self.sessions_opened);
        Ok(())
    }
}

/// Fetches through the service, presenting the session's user agent.
pub struct SpiderFetcher {
    spider: Arc<Spider>,
    user_agent: String,
}

impl SpiderFetcher {
    async fn fetch_once(&self, url: &str, timeout: Duration) -> Result<(u16, String), SessionError> {
        let params = request_params(&self.user_agent);

        let response = tokio::time::timeout(
            timeout,
            self.spider.scrape_url(url, Some(params), "application/json"),
        )
        .await
        .map_err(|_| SessionError::Timeout {
            url: url.to_string(),
            secs: timeout.as_secs(),
        })?
        .map_err(|e| SessionError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        parse_response(url, response)
    }
}

#[async_trait]
impl Fetch for SpiderFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<(u16, String), SessionError> {
        for attempt in 0..MAX_RETRIES {
            match self.fetch_once(url, timeout).await {
                Err(e) if is_rate_limited(&e) => {
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                    warn!(
                        "Rate limited on {} (attempt {}/{}), backing off {:.1}s",
                        url,
                        attempt + 1,
                        MAX_RETRIES,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                }
                other => return other,
            }
        }
        self.fetch_once(url, timeout).await
    }
}

fn request_params(user_agent: &str) -> RequestParams {
    RequestParams {
        return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
        user_agent: Some(user_agent.to_string()),
        ..Default::default()
    }
}

/// The service's own throttling, as opposed to the target site's.
fn is_rate_limited(e: &SessionError) -> bool {
    match e {
        SessionError::Navigation { reason, .. } => {
            reason.contains("429") || reason.contains("rate") || reason.contains("502") || reason.contains("503")
        }
        _ => false,
    }
}

fn parse_response(url: &str, value: serde_json::Value) -> Result<(u16, String), SessionError> {
    let parsed: serde_json::Value = match value.as_str() {
        Some(s) => serde_json::from_str(s).unwrap_or(value.clone()),
        None => value,
    };

    let first = parsed.as_array().and_then(|arr| arr.first()).unwrap_or(&parsed);

    let status = first
        .get("status")
        .and_then(|s| s.as_u64())
        .and_then(|s| u16::try_from(s).ok())
        .unwrap_or(200);

    match first.get("content").and_then(|c| c.as_str()) {
        Some(content) => Ok((status, content.to_string())),
        None => {
            let reason = first
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("no content in spider response");
            Err(SessionError::Navigation {
                url: url.to_string(),
                reason: reason.to_string(),
            })
        }
    }
}

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::Client;
use tracing::{debug, info};

use super::document::{DocumentSession, Fetch};
use super::{BrowserEngine, BrowsingSession, SessionError, Timeouts};
use crate::pacer::Identity;

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Plain HTTP engine: no script execution, one client per session identity.
#[derive(Default)]
pub struct HttpEngine {
    sessions_opened: usize,
}

impl HttpEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BrowserEngine for HttpEngine {
    fn name(&self) -> &str {
        "http"
    }

    async fn open_session(
        &mut self,
        identity: &Identity,
        timeouts: Timeouts,
    ) -> Result<Box<dyn BrowsingSession>, SessionError> {
        let fetcher = HttpFetcher::new(identity)?;
        self.sessions_opened += 1;
        debug!(
            "Opened http session #{} as {} ({}x{})",
            self.sessions_opened, identity.user_agent, identity.viewport.0, identity.viewport.1
        );
        Ok(Box::new(DocumentSession::new(fetcher, timeouts)))
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        info!("Closed http engine ({} sessions)", self.sessions_opened);
        Ok(())
    }
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(identity: &Identity) -> Result<Self, SessionError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header(identity.user_agent)?);
        headers.insert(ACCEPT_LANGUAGE, header(identity.accept_language)?);
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));

        let client = Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| SessionError::Unavailable(e.to_string()))?;
        Ok(Self { client })
    }
}

fn header(value: &str) -> Result<HeaderValue, SessionError> {
    HeaderValue::from_str(value).map_err(|e| SessionError::Unavailable(format!("bad header value: {}", e)))
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<(u16, String), SessionError> {
        let to_error = |e: reqwest::Error| {
            if e.is_timeout() {
                SessionError::Timeout {
                    url: url.to_string(),
                    secs: timeout.as_secs(),
                }
            } else {
                SessionError::Navigation {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(to_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(to_error)?;
        Ok((status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::scripted::test_timeouts;

    fn identity() -> Identity {
        Identity {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) Firefox/121.0",
            accept_language: "en-US,en;q=0.9",
            viewport: (1440, 900),
        }
    }

    #[tokio::test]
    async fn sessions_start_without_a_page() {
        let mut engine = HttpEngine::new();
        let session = engine.open_session(&identity(), test_timeouts()).await.unwrap();
        assert!(session.page().is_none());
        assert_eq!(engine.sessions_opened, 1);
        engine.close().await.unwrap();
    }

    #[test]
    fn rejects_unencodable_identity() {
        let bad = Identity {
            user_agent: "agent\nwith newline",
            ..identity()
        };
        assert!(matches!(HttpFetcher::new(&bad), Err(SessionError::Unavailable(_))));
    }
}

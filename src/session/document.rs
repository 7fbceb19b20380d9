use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{BrowsingSession, Locator, Page, SessionError, Timeouts};

/// Statuses whose bodies are kept so callers can inspect block/challenge pages.
const INSPECTABLE_STATUSES: &[u16] = &[403, 429, 503];

/// Raw document retrieval behind a [`DocumentSession`].
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Fetch `url`, returning the final status code and body.
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<(u16, String), SessionError>;
}

/// A session over fully-delivered documents: each navigation fetches one
/// document whole, so what is not in it will not appear later.
pub struct DocumentSession<F> {
    fetcher: F,
    timeouts: Timeouts,
    current: Option<Page>,
}

impl<F: Fetch> DocumentSession<F> {
    pub fn new(fetcher: F, timeouts: Timeouts) -> Self {
        Self {
            fetcher,
            timeouts,
            current: None,
        }
    }

    async fn load(&self, url: &str) -> Result<Page, SessionError> {
        let (status, body) = self.fetcher.fetch(url, self.timeouts.navigation).await?;
        if (200..300).contains(&status) || INSPECTABLE_STATUSES.contains(&status) {
            debug!("Loaded {} ({}, {} bytes)", url, status, body.len());
            Ok(Page::new(url, status, body))
        } else {
            Err(SessionError::Status {
                url: url.to_string(),
                status,
            })
        }
    }
}

#[async_trait]
impl<F: Fetch> BrowsingSession for DocumentSession<F> {
    async fn goto(&mut self, url: &str) -> Result<(), SessionError> {
        url::Url::parse(url).map_err(|_| SessionError::InvalidUrl(url.to_string()))?;
        self.current = None;
        self.current = Some(self.load(url).await?);
        Ok(())
    }

    fn page(&self) -> Option<&Page> {
        self.current.as_ref()
    }

    async fn wait_for_any(&mut self, selectors: &[&str], _timeout: Duration) -> Result<bool, SessionError> {
        let page = self.current.as_ref().ok_or(SessionError::NoPage)?;
        Ok(selectors.iter().any(|s| page.matches(s)))
    }

    async fn activate(&mut self, locator: &Locator) -> Result<bool, SessionError> {
        let page = self.current.as_ref().ok_or(SessionError::NoPage)?;
        let Some(href) = page.activation_target(locator) else {
            return Ok(false);
        };
        let target = page.resolve(&href)?;
        self.goto(&target).await?;
        Ok(true)
    }

    async fn nested_context(&mut self, selector: &str) -> Result<Option<Page>, SessionError> {
        let page = self.current.as_ref().ok_or(SessionError::NoPage)?;
        let Some(src) = page.frame_src(selector) else {
            return Ok(None);
        };
        let target = page.resolve(&src)?;
        self.load(&target).await.map(Some)
    }

    fn timeouts(&self) -> Timeouts {
        self.timeouts
    }
}

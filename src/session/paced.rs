use std::time::Duration;

use async_trait::async_trait;

use super::{BrowsingSession, Locator, Page, SessionError, Timeouts};
use crate::pacer::RequestPacer;

/// A session view for one cell that waits on the pacer before every request
/// after the first: the strategy's own navigations, reveal clicks and nested
/// frame loads alike. The first request is paced by the caller between cells.
pub struct PacedSession<'a> {
    inner: &'a mut dyn BrowsingSession,
    pacer: &'a mut RequestPacer,
    requests: usize,
}

impl<'a> PacedSession<'a> {
    pub fn new(inner: &'a mut dyn BrowsingSession, pacer: &'a mut RequestPacer) -> Self {
        Self {
            inner,
            pacer,
            requests: 0,
        }
    }

    /// Requests issued through this view so far.
    pub fn requests(&self) -> usize {
        self.requests
    }

    async fn pace(&mut self) {
        if self.requests > 0 {
            self.pacer.before_request().await;
        }
        self.requests += 1;
    }
}

#[async_trait]
impl<'a> BrowsingSession for PacedSession<'a> {
    async fn goto(&mut self, url: &str) -> Result<(), SessionError> {
        self.pace().await;
        self.inner.goto(url).await
    }

    fn page(&self) -> Option<&Page> {
        self.inner.page()
    }

    async fn wait_for_any(&mut self, selectors: &[&str], timeout: Duration) -> Result<bool, SessionError> {
        self.inner.wait_for_any(selectors, timeout).await
    }

    async fn activate(&mut self, locator: &Locator) -> Result<bool, SessionError> {
        // an element that leads nowhere costs no request
        let navigates = self
            .inner
            .page()
            .is_some_and(|p| p.activation_target(locator).is_some());
        if navigates {
            self.pace().await;
        }
        self.inner.activate(locator).await
    }

    async fn nested_context(&mut self, selector: &str) -> Result<Option<Page>, SessionError> {
        let framed = self.inner.page().is_some_and(|p| p.frame_src(selector).is_some());
        if framed {
            self.pace().await;
        }
        self.inner.nested_context(selector).await
    }

    fn timeouts(&self) -> Timeouts {
        self.inner.timeouts()
    }
}

use async_trait::async_trait;
use tracing::debug;

use super::{current_page, detect_challenge, scan_page, ExtractError, ExtractionResult, ExtractionStrategy, RateBounds};
use crate::config::{RateRange, SourceKind};
use crate::session::BrowsingSession;

const DEFAULT_PRICE_SELECTORS: &[&str] = &["[class*=\"rate\"]", "[class*=\"price\"]"];

/// Seasonal peaks can run past the configured high end.
const BOUNDS_SLACK: f64 = 0.4;

/// The property's own marketing or availability page.
pub struct DirectSite {
    price_selectors: Vec<String>,
}

impl DirectSite {
    pub fn new(price_selectors: Option<Vec<String>>) -> Self {
        Self {
            price_selectors: price_selectors
                .unwrap_or_else(|| DEFAULT_PRICE_SELECTORS.iter().map(|s| s.to_string()).collect()),
        }
    }
}

#[async_trait]
impl ExtractionStrategy for DirectSite {
    fn kind(&self) -> SourceKind {
        SourceKind::Direct
    }

    async fn extract(
        &self,
        session: &mut dyn BrowsingSession,
        url: &str,
        range: RateRange,
    ) -> ExtractionResult {
        session.goto(url).await?;

        let selectors: Vec<&str> = self.price_selectors.iter().map(String::as_str).collect();
        let content_timeout = session.timeouts().content;
        let rendered = session.wait_for_any(&selectors, content_timeout).await?;

        let page = current_page(&*session)?;
        if let Some(reason) = detect_challenge(page) {
            return Err(ExtractError::Challenge(reason));
        }

        let bounds = RateBounds::widened(range, BOUNDS_SLACK);
        let harvest = scan_page(page, &selectors, bounds);
        if harvest.is_empty() && !rendered {
            debug!("No pricing selector matched on {}", url);
            return Err(ExtractError::NoContent(url.to_string()));
        }
        harvest.into_result(url, bounds)
    }
}

use async_trait::async_trait;
use tracing::debug;

use super::{
    current_page, detect_challenge, scan_page, ExtractError, ExtractionResult, ExtractionStrategy, RateBounds,
};
use crate::config::{RateRange, SourceKind};
use crate::session::BrowsingSession;

const DEFAULT_FRAME_SELECTOR: &str = "iframe[src*=\"thinkreservations\"], iframe[src*=\"cloudbeds\"], \
     iframe[src*=\"staywanderful\"], iframe[src*=\"booking\"], iframe";
const DEFAULT_PRICE_SELECTORS: &[&str] = &["[class*=\"rate\"]", "[class*=\"price\"]", "[class*=\"amount\"]"];
const BOUNDS_SLACK: f64 = 0.4;

/// A property page whose booking engine lives in a nested frame.
pub struct EmbeddedWidget {
    frame_selector: String,
    price_selectors: Vec<String>,
}

impl EmbeddedWidget {
    pub fn new(frame_selector: Option<String>, price_selectors: Option<Vec<String>>) -> Self {
        Self {
            frame_selector: frame_selector.unwrap_or_else(|| DEFAULT_FRAME_SELECTOR.to_string()),
            price_selectors: price_selectors
                .unwrap_or_else(|| DEFAULT_PRICE_SELECTORS.iter().map(|s| s.to_string()).collect()),
        }
    }

    /// Rates from inside the frame, or `None` when the frame is missing,
    /// unreachable, blocked or priceless.
    async fn from_frame(
        &self,
        session: &mut dyn BrowsingSession,
        selectors: &[&str],
        bounds: RateBounds,
    ) -> Option<ExtractionResult> {
        let frame = match session.nested_context(&self.frame_selector).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("No booking frame matches '{}'", self.frame_selector);
                return None;
            }
            Err(e) => {
                debug!("Booking frame failed to load: {}", e);
                return None;
            }
        };
        if let Some(reason) = detect_challenge(&frame) {
            debug!("Booking frame {} is blocked ({})", frame.url, reason);
            return None;
        }
        let harvest = scan_page(&frame, selectors, bounds);
        if harvest.is_empty() {
            debug!("Booking frame {} has no usable rates", frame.url);
            return None;
        }
        Some(harvest.into_result(&frame.url, bounds))
    }
}

#[async_trait]
impl ExtractionStrategy for EmbeddedWidget {
    fn kind(&self) -> SourceKind {
        SourceKind::EmbeddedWidget
    }

    async fn extract(
        &self,
        session: &mut dyn BrowsingSession,
        url: &str,
        range: RateRange,
    ) -> ExtractionResult {
        session.goto(url).await?;
        if let Some(reason) = detect_challenge(current_page(&*session)?) {
            return Err(ExtractError::Challenge(reason));
        }

        let selectors: Vec<&str> = self.price_selectors.iter().map(String::as_str).collect();
        let bounds = RateBounds::widened(range, BOUNDS_SLACK);
        if let Some(result) = self.from_frame(session, &selectors, bounds).await {
            return result;
        }

        // top-level document
        let content_timeout = session.timeouts().content;
        let rendered = session.wait_for_any(&selectors, content_timeout).await?;
        let page = current_page(&*session)?;
        let harvest = scan_page(page, &selectors, bounds);
        if harvest.is_empty() && !rendered {
            return Err(ExtractError::NoContent(url.to_string()));
        }
        harvest.into_result(url, bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::scripted::ScriptedWeb;

    const HOST: &str = "https://house.test/booking?check-in=2025-01-04&check-out=2025-01-05";
    const FRAME: &str = "https://hotels.cloudbeds.test/reservation/mcclelland?checkin=2025-01-04&checkout=2025-01-05";

    fn range() -> RateRange {
        RateRange {
            low: 350.0,
            high: 650.0,
        }
    }

    #[tokio::test]
    async fn reads_rates_inside_frame() {
        let web = ScriptedWeb::new()
            .fixture(HOST, "widget_host")
            .fixture(FRAME, "widget_frame");
        let mut session = web.session();
        let got = EmbeddedWidget::new(None, None).extract(&mut session, HOST, range()).await.unwrap();
        assert_eq!(got.rates, vec![425.0, 515.0]);
        assert_eq!(web.visits(), vec![HOST.to_string(), FRAME.to_string()]);
    }

    #[tokio::test]
    async fn unreachable_frame_falls_back_to_host_page() {
        let web = ScriptedWeb::new().fixture(HOST, "widget_host");
        let mut session = web.session();
        let got = EmbeddedWidget::new(None, None).extract(&mut session, HOST, range()).await.unwrap();
        assert_eq!(got.rates, vec![395.0]);
    }

    #[tokio::test]
    async fn empty_frame_falls_back_to_host_page() {
        let web = ScriptedWeb::new()
            .fixture(HOST, "widget_host")
            .page(FRAME, "<html><body><div class=\"loading\">Loading...</div></body></html>");
        let mut session = web.session();
        let got = EmbeddedWidget::new(None, None).extract(&mut session, HOST, range()).await.unwrap();
        assert_eq!(got.rates, vec![395.0]);
    }

    #[tokio::test]
    async fn page_without_frame_is_scanned_directly() {
        let html = r#"<html><body><div class="rate-card"><span class="amount">$480</span></div></body></html>"#;
        let web = ScriptedWeb::new().page(HOST, html);
        let mut session = web.session();
        let got = EmbeddedWidget::new(Some("iframe.booking".into()), None)
            .extract(&mut session, HOST, range())
            .await
            .unwrap();
        assert_eq!(got.rates, vec![480.0]);
        assert_eq!(web.visits().len(), 1);
    }

    #[tokio::test]
    async fn challenged_host_fails() {
        let web = ScriptedWeb::new().fixture(HOST, "challenge");
        let mut session = web.session();
        let err = EmbeddedWidget::new(None, None).extract(&mut session, HOST, range()).await.unwrap_err();
        assert!(matches!(err, ExtractError::Challenge(_)), "{err}");
    }

    #[tokio::test]
    async fn nothing_anywhere_fails() {
        let web = ScriptedWeb::new().page(HOST, "<html><body><p>Book your stay.</p></body></html>");
        let mut session = web.session();
        let err = EmbeddedWidget::new(None, None).extract(&mut session, HOST, range()).await.unwrap_err();
        assert_eq!(err, ExtractError::NoContent(HOST.to_string()));
    }
}

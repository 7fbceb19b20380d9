use std::sync::LazyLock;

use async_trait::async_trait;
use tracing::debug;

use super::{
    current_page, detect_challenge, ExtractError, ExtractionResult, ExtractionStrategy, Harvest, RateBounds,
};
use crate::config::{RateRange, SourceKind};
use crate::session::{BrowsingSession, Locator, Page};

const ROW_SELECTOR: &str =
    "[data-testid=\"property-page-room-type-row\"], .hprt-table tbody tr, .room-row";
const UNAVAILABLE_SELECTOR: &str =
    "[class*=\"not-available\"], [class*=\"unavailable\"], [class*=\"sold-out\"]";
const UNAVAILABLE_TEXTS: &[&str] = &["not available", "sold out", "no availability"];

const DEFAULT_PRICE_SELECTORS: &[&str] = &[
    "[data-testid=\"price-and-discounted-price\"]",
    ".bui-price-display__value",
    ".prco-valign-middle-helper",
    "[class*=\"price\"]",
];

/// Elements that hide prices until clicked.
static REVEAL: LazyLock<Vec<Locator>> = LazyLock::new(|| {
    vec![
        Locator::css("[data-testid=\"availability-cta-btn\"]"),
        Locator::with_text("button", "show prices"),
        Locator::with_text("a", "show prices"),
        Locator::with_text("button", "see availability"),
        Locator::with_text("a", "see availability"),
    ]
});

/// A third-party booking aggregator's property page for the stay dates.
pub struct Aggregator {
    price_selectors: Vec<String>,
}

impl Aggregator {
    pub fn new(price_selectors: Option<Vec<String>>) -> Self {
        Self {
            price_selectors: price_selectors
                .unwrap_or_else(|| DEFAULT_PRICE_SELECTORS.iter().map(|s| s.to_string()).collect()),
        }
    }

    fn price_and_row_selectors(&self) -> Vec<&str> {
        let mut selectors: Vec<&str> = self.price_selectors.iter().map(String::as_str).collect();
        selectors.push(ROW_SELECTOR);
        selectors
    }

    /// Prices from available room rows only.
    fn structured(&self, page: &Page, bounds: RateBounds) -> Harvest {
        let price_selector = self.price_selectors.join(", ");
        let mut texts = Vec::new();
        for row in page.rows(ROW_SELECTOR, UNAVAILABLE_SELECTOR, &price_selector) {
            let lower = row.text.to_lowercase();
            if row.flagged || UNAVAILABLE_TEXTS.iter().any(|t| lower.contains(t)) {
                continue;
            }
            if row.prices.is_empty() {
                texts.push(row.text);
            } else {
                texts.extend(row.prices);
            }
        }
        Harvest::from_texts(texts, bounds)
    }

    /// Page-wide scan used when no room row carried a usable price.
    fn broad(&self, page: &Page, bounds: RateBounds) -> Harvest {
        let priced = self.price_selectors.iter().flat_map(|s| page.texts(s));
        Harvest::from_texts(priced.chain(page.short_texts(100)), bounds)
    }
}

#[async_trait]
impl ExtractionStrategy for Aggregator {
    fn kind(&self) -> SourceKind {
        SourceKind::Aggregator
    }

    async fn extract(
        &self,
        session: &mut dyn BrowsingSession,
        url: &str,
        range: RateRange,
    ) -> ExtractionResult {
        session.goto(url).await?;
        let content_timeout = session.timeouts().content;
        if let Some(reason) = detect_challenge(current_page(&*session)?) {
            return Err(ExtractError::Challenge(reason));
        }

        let selectors = self.price_and_row_selectors();
        let rendered = session.wait_for_any(&selectors, content_timeout).await?;
        let reveal = {
            let page = current_page(&*session)?;
            REVEAL.iter().find(|l| page.activation_target(l).is_some()).cloned()
        };
        if !rendered && reveal.is_none() {
            return Err(ExtractError::NoContent(url.to_string()));
        }

        if let Some(locator) = reveal {
            debug!("Revealing prices via '{}' on {}", locator.css, url);
            if session.activate(&locator).await? {
                if let Some(reason) = detect_challenge(current_page(&*session)?) {
                    return Err(ExtractError::Challenge(reason));
                }
                if !session.wait_for_any(&selectors, content_timeout).await? {
                    return Err(ExtractError::NoContent(url.to_string()));
                }
            }
        }

        let page = current_page(&*session)?;
        let bounds = RateBounds::plausible(range);
        let rows = self.structured(page, bounds);
        if !rows.is_empty() {
            return rows.into_result(url, bounds);
        }
        debug!("No structured room prices on {}, scanning page", url);
        let broad = self.broad(page, bounds);
        Harvest {
            rates: broad.rates,
            candidates: rows.candidates.max(broad.candidates),
        }
        .into_result(url, bounds)
    }
}

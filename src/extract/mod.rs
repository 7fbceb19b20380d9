pub mod aggregator;
pub mod direct;
pub mod widget;

use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

use crate::config::{RateRange, SourceKind, StrategyDescriptor};
use crate::session::{BrowsingSession, Page, SessionError};

/// Longest element text still considered a price label rather than copy.
const SHORT_TEXT_LEN: usize = 200;

static PRICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\s*(\d{1,3}(?:,\d{3})+|\d+)(?:\.(\d{1,2}))?").unwrap());

const CHALLENGE_TITLES: &[&str] = &[
    "just a moment",
    "attention required",
    "cloudflare",
    "access denied",
    "are you a robot",
    "security check",
    "captcha",
];
const CHALLENGE_TEXTS: &[&str] = &[
    "verify you are human",
    "checking your browser",
    "complete the security check",
    "enable javascript and cookies to continue",
    "press & hold",
];
const CHALLENGE_MARKUP: &[&str] = &["cf-chl-", "cf-challenge", "id=\"challenge-form\"", "px-captcha"];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExtractError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("anti-automation challenge ({0})")]
    Challenge(String),
    #[error("no pricing content rendered on {0}")]
    NoContent(String),
    #[error("{found} price candidates on {url}, none within {min:.0}..{max:.0}")]
    OutOfBounds {
        url: String,
        found: usize,
        min: f64,
        max: f64,
    },
    #[error("no prices found on {0}")]
    NoRates(String),
}

/// Live rates pulled from one source: non-empty, deduplicated, all in bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub rates: Vec<f64>,
}

impl Extraction {
    pub fn lowest(&self) -> f64 {
        self.rates.iter().copied().fold(f64::INFINITY, f64::min)
    }
}

pub type ExtractionResult = Result<Extraction, ExtractError>;

/// Closed interval a nightly rate must fall in to count as one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateBounds {
    pub min: f64,
    pub max: f64,
}

impl RateBounds {
    /// `[0.5 × low, 2 × high]`: rejects room counts, years and phone fragments.
    pub fn plausible(range: RateRange) -> Self {
        Self {
            min: range.low * 0.5,
            max: range.high * 2.0,
        }
    }

    /// Base range widened by `slack` on both ends, never beyond `plausible`.
    pub fn widened(range: RateRange, slack: f64) -> Self {
        let outer = Self::plausible(range);
        Self {
            min: (range.low * (1.0 - slack)).max(outer.min),
            max: (range.high * (1.0 + slack)).min(outer.max),
        }
    }

    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }
}

/// Every currency amount in `text`, in order of appearance.
pub fn price_candidates(text: &str) -> Vec<f64> {
    PRICE_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps[1].replace(',', "");
            let amount = match caps.get(2) {
                Some(cents) => format!("{}.{}", whole, cents.as_str()),
                None => whole,
            };
            amount.parse::<f64>().ok()
        })
        .collect()
}

/// Candidates found across a set of texts and the ones that survived filtering.
#[derive(Debug, Default)]
pub struct Harvest {
    pub rates: Vec<f64>,
    pub candidates: usize,
}

impl Harvest {
    pub fn from_texts<I, S>(texts: I, bounds: RateBounds) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut harvest = Harvest::default();
        let mut seen = HashSet::new();
        for text in texts {
            for v in price_candidates(text.as_ref()) {
                harvest.candidates += 1;
                if bounds.contains(v) && seen.insert((v * 100.0).round() as i64) {
                    harvest.rates.push(v);
                }
            }
        }
        harvest
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub fn into_result(self, url: &str, bounds: RateBounds) -> ExtractionResult {
        if !self.rates.is_empty() {
            Ok(Extraction { rates: self.rates })
        } else if self.candidates > 0 {
            Err(ExtractError::OutOfBounds {
                url: url.to_string(),
                found: self.candidates,
                min: bounds.min,
                max: bounds.max,
            })
        } else {
            Err(ExtractError::NoRates(url.to_string()))
        }
    }
}

/// Prices from elements matching `selectors`; if those yield nothing, from every
/// short text on the page.
pub fn scan_page(page: &Page, selectors: &[&str], bounds: RateBounds) -> Harvest {
    let targeted = Harvest::from_texts(selectors.iter().flat_map(|s| page.texts(s)), bounds);
    if !targeted.is_empty() {
        return targeted;
    }
    let broad = Harvest::from_texts(page.short_texts(SHORT_TEXT_LEN), bounds);
    Harvest {
        rates: broad.rates,
        candidates: targeted.candidates.max(broad.candidates),
    }
}

/// Why `page` looks like an anti-bot interstitial instead of content, if it does.
pub fn detect_challenge(page: &Page) -> Option<String> {
    if page.status >= 400 {
        return Some(format!("HTTP {}", page.status));
    }
    let (title, text) = page.title_and_body();
    let title = title.to_lowercase();
    if let Some(hit) = CHALLENGE_TITLES.iter().find(|m| title.contains(*m)) {
        return Some(format!("title matches '{}'", hit));
    }
    let text = text.to_lowercase();
    if let Some(hit) = CHALLENGE_TEXTS.iter().find(|m| text.contains(*m)) {
        return Some(format!("page says '{}'", hit));
    }
    CHALLENGE_MARKUP
        .iter()
        .find(|m| page.html.contains(*m))
        .map(|hit| format!("markup contains '{}'", hit))
}

/// One way of pulling live rates for a property from a navigable session.
///
/// Implementations report every failure as an [`ExtractError`]; nothing they do
/// may escape as a panic.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn extract(
        &self,
        session: &mut dyn BrowsingSession,
        url: &str,
        range: RateRange,
    ) -> ExtractionResult;
}

/// Strategy for a configured fallback-chain link.
pub fn build(descriptor: &StrategyDescriptor) -> Box<dyn ExtractionStrategy> {
    match descriptor.kind {
        SourceKind::Direct => Box::new(direct::DirectSite::new(descriptor.price_selectors.clone())),
        SourceKind::Aggregator => Box::new(aggregator::Aggregator::new(descriptor.price_selectors.clone())),
        SourceKind::EmbeddedWidget => Box::new(widget::EmbeddedWidget::new(
            descriptor.frame_selector.clone(),
            descriptor.price_selectors.clone(),
        )),
    }
}

/// The current page, or a typed error if the session lost it.
fn current_page(session: &dyn BrowsingSession) -> Result<&Page, ExtractError> {
    session.page().ok_or(ExtractError::Session(SessionError::NoPage))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(low: f64, high: f64) -> RateRange {
        RateRange { low, high }
    }

    #[test]
    fn parses_currency_tokens() {
        assert_eq!(
            price_candidates("from $425/night, was $ 1,050.50; call 707-555-1234 or $99"),
            vec![425.0, 1050.5, 99.0]
        );
        assert!(price_candidates("2025 rooms: 8").is_empty());
    }

    #[test]
    fn bounds() {
        let plausible = RateBounds::plausible(range(300.0, 600.0));
        assert_eq!(plausible, RateBounds { min: 150.0, max: 1200.0 });
        let widened = RateBounds::widened(range(300.0, 600.0), 0.4);
        assert_eq!(widened, RateBounds { min: 180.0, max: 840.0 });
        assert!(widened.contains(180.0) && widened.contains(840.0));
        assert!(!widened.contains(841.0));
    }

    #[test]
    fn harvest_filters_and_dedupes() {
        let bounds = RateBounds::plausible(range(300.0, 600.0));
        let h = Harvest::from_texts(["$425", "$425.00 tonight", "$17 parking", "$380", "$2,500"], bounds);
        assert_eq!(h.rates, vec![425.0, 380.0]);
        assert_eq!(h.candidates, 5);
        assert_eq!(h.into_result("u", bounds).unwrap().lowest(), 380.0);
    }

    #[test]
    fn empty_harvest_errors_are_typed() {
        let bounds = RateBounds::plausible(range(300.0, 600.0));
        let out = Harvest::from_texts(["$5 fee"], bounds).into_result("u", bounds);
        assert!(matches!(out, Err(ExtractError::OutOfBounds { found: 1, .. })));
        let none = Harvest::from_texts(["no prices"], bounds).into_result("u", bounds);
        assert_eq!(none, Err(ExtractError::NoRates("u".into())));
    }

    #[test]
    fn detects_challenges() {
        let cf = Page::new("u", 200, "<html><head><title>Just a moment...</title></head><body></body></html>");
        assert!(detect_challenge(&cf).is_some());
        let blocked = Page::new("u", 403, "<html><body>Forbidden</body></html>");
        assert_eq!(detect_challenge(&blocked).as_deref(), Some("HTTP 403"));
        let human = Page::new("u", 200, "<html><body><p>Please verify you are human</p></body></html>");
        assert!(detect_challenge(&human).is_some());
        let fine = Page::new("u", 200, "<html><head><title>Rooms</title></head><body>$400</body></html>");
        assert_eq!(detect_challenge(&fine), None);
    }
}

pub mod document;
pub mod http;
pub mod paced;
pub mod spider;

#[cfg(test)]
pub mod scripted;

use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

use crate::pacer::Identity;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("navigation to {url} timed out after {secs}s")]
    Timeout { url: String, secs: u64 },
    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("invalid url '{0}'")]
    InvalidUrl(String),
    #[error("no page loaded")]
    NoPage,
    #[error("browser engine unavailable: {0}")]
    Unavailable(String),
}

/// Timeouts applied by a session to its navigations.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub navigation: Duration,
    pub content: Duration,
}

/// An element to activate: CSS match, optionally narrowed by visible text.
#[derive(Debug, Clone)]
pub struct Locator {
    pub css: String,
    pub text: Option<String>,
}

impl Locator {
    pub fn css(css: &str) -> Self {
        Self {
            css: css.to_string(),
            text: None,
        }
    }

    pub fn with_text(css: &str, text: &str) -> Self {
        Self {
            css: css.to_string(),
            text: Some(text.to_lowercase()),
        }
    }
}

/// One listing row: its text, whether it carries the flag element, and the
/// texts of its price elements.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub text: String,
    pub flagged: bool,
    pub prices: Vec<String>,
}

/// A loaded document (top-level page or nested frame).
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub url: String,
    pub status: u16,
    pub html: String,
}

impl Page {
    pub fn new(url: &str, status: u16, html: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            status,
            html: html.into(),
        }
    }

    /// Title and body text from a single parse.
    pub fn title_and_body(&self) -> (String, String) {
        let doc = Html::parse_document(&self.html);
        (
            first_text(&doc, "title").unwrap_or_default(),
            first_text(&doc, "body").unwrap_or_default(),
        )
    }

    pub fn matches(&self, selector: &str) -> bool {
        let Ok(sel) = Selector::parse(selector) else {
            return false;
        };
        Html::parse_document(&self.html).select(&sel).next().is_some()
    }

    /// Collapsed text of every element matching `selector`.
    pub fn texts(&self, selector: &str) -> Vec<String> {
        let Ok(sel) = Selector::parse(selector) else {
            return Vec::new();
        };
        let doc = Html::parse_document(&self.html);
        doc.select(&sel).map(collapsed_text).collect()
    }

    /// Text of elements whose own content is short: leaf-ish nodes where a price
    /// is likely to sit alone rather than inside a paragraph of copy.
    pub fn short_texts(&self, max_len: usize) -> Vec<String> {
        let doc = Html::parse_document(&self.html);
        let Ok(sel) = Selector::parse("body *") else {
            return Vec::new();
        };
        doc.select(&sel)
            .filter(|el| !matches!(el.value().name(), "script" | "style" | "noscript"))
            .map(collapsed_text)
            .filter(|t| !t.is_empty() && t.chars().count() <= max_len)
            .collect()
    }

    /// Every element matching `row_selector`, read in one pass over the document.
    pub fn rows(&self, row_selector: &str, flag_selector: &str, price_selector: &str) -> Vec<Row> {
        let (Ok(row_sel), Ok(flag_sel), Ok(price_sel)) = (
            Selector::parse(row_selector),
            Selector::parse(flag_selector),
            Selector::parse(price_selector),
        ) else {
            return Vec::new();
        };
        let doc = Html::parse_document(&self.html);
        doc.select(&row_sel)
            .map(|row| Row {
                text: collapsed_text(row),
                flagged: row.select(&flag_sel).next().is_some(),
                prices: row.select(&price_sel).map(collapsed_text).collect(),
            })
            .collect()
    }

    /// `src` of the first nested browsing context matching `selector`.
    pub fn frame_src(&self, selector: &str) -> Option<String> {
        let sel = Selector::parse(selector).ok()?;
        let doc = Html::parse_document(&self.html);
        let src = doc
            .select(&sel)
            .filter_map(|el| el.value().attr("src"))
            .map(str::trim)
            .find(|s| !s.is_empty() && !s.starts_with("about:") && !s.starts_with("javascript:"))?;
        Some(src.to_string())
    }

    /// Where activating the located element would navigate: its own link target,
    /// an enclosing anchor, or the action of an enclosing form.
    pub fn activation_target(&self, locator: &Locator) -> Option<String> {
        let sel = Selector::parse(&locator.css).ok()?;
        let doc = Html::parse_document(&self.html);
        let el = doc.select(&sel).find(|el| match &locator.text {
            Some(needle) => collapsed_text(*el).to_lowercase().contains(needle.as_str()),
            None => true,
        })?;

        for attr in ["href", "data-href", "formaction"] {
            if let Some(v) = el.value().attr(attr).filter(|v| is_navigable(v)) {
                return Some(v.to_string());
            }
        }
        el.ancestors().filter_map(ElementRef::wrap).find_map(|a| {
            let attr = match a.value().name() {
                "a" => "href",
                "form" => "action",
                _ => return None,
            };
            a.value()
                .attr(attr)
                .filter(|v| is_navigable(v))
                .map(str::to_string)
        })
    }

    pub fn resolve(&self, href: &str) -> Result<String, SessionError> {
        let base = url::Url::parse(&self.url).map_err(|_| SessionError::InvalidUrl(self.url.clone()))?;
        base.join(href)
            .map(|u| u.to_string())
            .map_err(|_| SessionError::InvalidUrl(href.to_string()))
    }
}

fn is_navigable(v: &str) -> bool {
    let v = v.trim();
    !v.is_empty() && !v.starts_with('#') && !v.starts_with("javascript:")
}

fn collapsed_text(el: ElementRef) -> String {
    el.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

fn first_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel).next().map(collapsed_text)
}

/// A navigable browsing context owned by one property's pass through the run.
#[async_trait]
pub trait BrowsingSession: Send {
    /// Load `url` as the top-level page.
    async fn goto(&mut self, url: &str) -> Result<(), SessionError>;

    fn page(&self) -> Option<&Page>;

    /// Wait for any of `selectors` to appear in the current page.
    async fn wait_for_any(&mut self, selectors: &[&str], timeout: Duration) -> Result<bool, SessionError>;

    /// Activate the located element, following whatever navigation it triggers.
    /// Returns `false` when nothing matched or the element leads nowhere.
    async fn activate(&mut self, locator: &Locator) -> Result<bool, SessionError>;

    /// Load the nested browsing context matching `selector`, if the page has one.
    async fn nested_context(&mut self, selector: &str) -> Result<Option<Page>, SessionError>;

    fn timeouts(&self) -> Timeouts;
}

/// The automation engine behind the sessions. Opened once per run.
#[async_trait]
pub trait BrowserEngine: Send {
    fn name(&self) -> &str;

    async fn open_session(
        &mut self,
        identity: &Identity,
        timeouts: Timeouts,
    ) -> Result<Box<dyn BrowsingSession>, SessionError>;

    async fn close(&mut self) -> Result<(), SessionError>;
}

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dates::DatePair;
use crate::pacer::PacingConfig;

pub const CONFIG_PATH: &str = "config/properties.json";

const KNOWN_PLACEHOLDERS: &[&str] = &["check_in", "check_out", "adults"];

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{([^{}]*)\}").unwrap());

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("no properties configured")]
    Empty,
    #[error("duplicate property id '{0}'")]
    DuplicateId(String),
    #[error("property '{id}': invalid base rate range {low}..{high}")]
    InvalidRange { id: String, low: f64, high: f64 },
    #[error("property '{0}': no extraction strategies configured")]
    NoStrategies(String),
    #[error("property '{id}': unknown placeholder '{{{placeholder}}}' in {url}")]
    UnknownPlaceholder {
        id: String,
        url: String,
        placeholder: String,
    },
    #[error("property '{id}': invalid selector '{selector}'")]
    InvalidSelector { id: String, selector: String },
    #[error("party size must be at least 1")]
    NoAdults,
}

/// Nightly rate range used for bounds filtering and estimation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateRange {
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Direct,
    Aggregator,
    EmbeddedWidget,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Direct => "direct",
            SourceKind::Aggregator => "aggregator",
            SourceKind::EmbeddedWidget => "embedded-widget",
        }
    }
}

/// One link of a property's fallback chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDescriptor {
    pub kind: SourceKind,
    /// Endpoint template; `{check_in}`, `{check_out}` and `{adults}` are substituted.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_selectors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_selector: Option<String>,
}

impl StrategyDescriptor {
    pub fn render_url(&self, pair: &DatePair, adults: u32) -> String {
        self.url
            .replace("{check_in}", &pair.check_in().format("%Y-%m-%d").to_string())
            .replace("{check_out}", &pair.check_out().format("%Y-%m-%d").to_string())
            .replace("{adults}", &adults.to_string())
    }

    fn selectors(&self) -> impl Iterator<Item = &String> {
        self.price_selectors
            .iter()
            .flatten()
            .chain(self.frame_selector.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyProfile {
    pub id: String,
    pub name: String,
    pub rooms: u32,
    pub location: String,
    pub strategies: Vec<StrategyDescriptor>,
    pub base_rates: RateRange,
}

fn default_adults() -> u32 {
    2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_adults")]
    pub adults: u32,
    #[serde(default)]
    pub pacing: PacingConfig,
    pub properties: Vec<PropertyProfile>,
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(json).context("Malformed settings JSON")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.properties.is_empty() {
            return Err(ConfigError::Empty);
        }
        if self.adults == 0 {
            return Err(ConfigError::NoAdults);
        }

        let mut seen = HashSet::new();
        for p in &self.properties {
            if !seen.insert(p.id.as_str()) {
                return Err(ConfigError::DuplicateId(p.id.clone()));
            }
            validate_profile(p)?;
        }
        Ok(())
    }
}

fn validate_profile(p: &PropertyProfile) -> Result<(), ConfigError> {
    let RateRange { low, high } = p.base_rates;
    if !(low.is_finite() && high.is_finite() && low > 0.0 && low <= high) {
        return Err(ConfigError::InvalidRange {
            id: p.id.clone(),
            low,
            high,
        });
    }
    if p.strategies.is_empty() {
        return Err(ConfigError::NoStrategies(p.id.clone()));
    }

    for s in &p.strategies {
        for caps in PLACEHOLDER_RE.captures_iter(&s.url) {
            if !KNOWN_PLACEHOLDERS.contains(&&caps[1]) {
                return Err(ConfigError::UnknownPlaceholder {
                    id: p.id.clone(),
                    url: s.url.clone(),
                    placeholder: caps[1].to_string(),
                });
            }
        }
        if let Some(bad) = s
            .selectors()
            .find(|sel| scraper::Selector::parse(sel).is_err())
        {
            return Err(ConfigError::InvalidSelector {
                id: p.id.clone(),
                selector: bad.clone(),
            });
        }
    }
    Ok(())
}

/// Load and validate settings from a JSON file.
pub fn load(path: &Path) -> Result<Settings> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    Settings::from_json(&json).with_context(|| format!("Invalid config {}", path.display()))
}

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{PropertyProfile, SourceKind};
use crate::dates::{DatePair, DayType};
use crate::extract::Extraction;

/// Where an observation's rates came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RateSource {
    Direct,
    Aggregator,
    EmbeddedWidget,
    Estimated,
}

impl RateSource {
    pub const ALL: [RateSource; 4] = [
        RateSource::Direct,
        RateSource::Aggregator,
        RateSource::EmbeddedWidget,
        RateSource::Estimated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RateSource::Direct => "direct",
            RateSource::Aggregator => "aggregator",
            RateSource::EmbeddedWidget => "embedded-widget",
            RateSource::Estimated => "estimated",
        }
    }

    pub fn is_live(self) -> bool {
        self != RateSource::Estimated
    }
}

impl From<SourceKind> for RateSource {
    fn from(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Direct => RateSource::Direct,
            SourceKind::Aggregator => RateSource::Aggregator,
            SourceKind::EmbeddedWidget => RateSource::EmbeddedWidget,
        }
    }
}

/// Identity of a cell across runs.
pub type CellKey = (String, NaiveDate, NaiveDate);

/// The recorded outcome for one (property, date-pair) cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateObservation {
    pub property_id: String,
    pub property_name: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub day_type: DayType,
    pub success: bool,
    pub source: RateSource,
    pub lowest_rate: Option<f64>,
    pub all_rates: Vec<f64>,
    pub error: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

impl RateObservation {
    pub fn live(profile: &PropertyProfile, pair: &DatePair, kind: SourceKind, extraction: Extraction) -> Self {
        let lowest = extraction.lowest();
        Self::new(profile, pair, kind.into(), lowest, extraction.rates)
    }

    pub fn estimated(profile: &PropertyProfile, pair: &DatePair, rate: u32) -> Self {
        let rate = f64::from(rate);
        Self::new(profile, pair, RateSource::Estimated, rate, vec![rate])
    }

    fn new(profile: &PropertyProfile, pair: &DatePair, source: RateSource, lowest: f64, rates: Vec<f64>) -> Self {
        Self {
            property_id: profile.id.clone(),
            property_name: profile.name.clone(),
            check_in: pair.check_in(),
            check_out: pair.check_out(),
            day_type: pair.day_type(),
            success: true,
            source,
            lowest_rate: Some(lowest),
            all_rates: rates,
            error: None,
            scraped_at: Utc::now(),
        }
    }

    pub fn key(&self) -> CellKey {
        (self.property_id.clone(), self.check_in, self.check_out)
    }
}

/// Key of the cell `pair` for `property_id`.
pub fn cell_key(property_id: &str, pair: &DatePair) -> CellKey {
    (property_id.to_string(), pair.check_in(), pair.check_out())
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::PropertyProfile;
use crate::observation::{RateObservation, RateSource};

/// Per-property aggregate over a run's observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub property_id: String,
    pub property_name: String,
    /// Cells planned for the property; absent for merged files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_cells: Option<usize>,
    pub total_attempts: usize,
    pub by_source: BTreeMap<String, usize>,
    /// Percentage of cells ending in a successful observation.
    pub success_rate: f64,
    /// Percentage of cells answered by a live source rather than the estimator.
    pub live_rate: f64,
    pub average_lowest_rate: Option<f64>,
    pub min_rate: Option<f64>,
    pub max_rate: Option<f64>,
}

impl RunSummary {
    /// Aggregate the observations belonging to `property_id`.
    pub fn compute(
        property_id: &str,
        property_name: &str,
        expected_cells: Option<usize>,
        observations: &[RateObservation],
    ) -> Self {
        let mine: Vec<&RateObservation> = observations
            .iter()
            .filter(|o| o.property_id == property_id)
            .collect();

        let mut by_source: BTreeMap<String, usize> =
            RateSource::ALL.iter().map(|s| (s.as_str().to_string(), 0)).collect();
        for o in &mine {
            *by_source.entry(o.source.as_str().to_string()).or_default() += 1;
        }

        let total = mine.len();
        let successes = mine.iter().filter(|o| o.success).count();
        let live = mine.iter().filter(|o| o.success && o.source.is_live()).count();
        let lows: Vec<f64> = mine
            .iter()
            .filter(|o| o.success)
            .filter_map(|o| o.lowest_rate)
            .collect();

        Self {
            property_id: property_id.to_string(),
            property_name: property_name.to_string(),
            expected_cells,
            total_attempts: total,
            by_source,
            success_rate: percent(successes, total),
            live_rate: percent(live, total),
            average_lowest_rate: (!lows.is_empty())
                .then(|| round_to(lows.iter().sum::<f64>() / lows.len() as f64, 2)),
            min_rate: lows.iter().copied().reduce(f64::min),
            max_rate: lows.iter().copied().reduce(f64::max),
        }
    }

    pub fn for_profile(profile: &PropertyProfile, expected_cells: usize, observations: &[RateObservation]) -> Self {
        Self::compute(&profile.id, &profile.name, Some(expected_cells), observations)
    }

    /// Summaries for every property present in `observations`, in first-seen order.
    pub fn all_in(observations: &[RateObservation]) -> Vec<Self> {
        let mut seen: Vec<(&str, &str)> = Vec::new();
        for o in observations {
            if !seen.iter().any(|(id, _)| *id == o.property_id) {
                seen.push((&o.property_id, &o.property_name));
            }
        }
        seen.into_iter()
            .map(|(id, name)| Self::compute(id, name, None, observations))
            .collect()
    }

    pub fn count(&self, source: RateSource) -> usize {
        self.by_source.get(source.as_str()).copied().unwrap_or(0)
    }

    /// Cells planned but not recorded, e.g. after a skipped property.
    pub fn missing_cells(&self) -> usize {
        self.expected_cells
            .map(|e| e.saturating_sub(self.total_attempts))
            .unwrap_or(0)
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round_to(part as f64 * 100.0 / whole as f64, 1)
}

fn round_to(v: f64, places: i32) -> f64 {
    let f = 10f64.powi(places);
    (v * f).round() / f
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateRange, SourceKind, StrategyDescriptor};
    use crate::dates::DatePair;
    use crate::extract::Extraction;
    use chrono::NaiveDate;

    fn profile(id: &str) -> PropertyProfile {
        PropertyProfile {
            id: id.into(),
            name: id.to_uppercase(),
            rooms: 5,
            location: "Napa".into(),
            strategies: vec![StrategyDescriptor {
                kind: SourceKind::Direct,
                url: "https://x.test/".into(),
                price_selectors: None,
                frame_selector: None,
            }],
            base_rates: RateRange {
                low: 300.0,
                high: 600.0,
            },
        }
    }

    fn night(d: u32) -> DatePair {
        DatePair::night(NaiveDate::from_ymd_opt(2025, 1, d).unwrap())
    }

    fn observations() -> Vec<RateObservation> {
        let a = profile("a");
        let b = profile("b");
        vec![
            RateObservation::live(&a, &night(1), SourceKind::Direct, Extraction { rates: vec![420.0, 480.0] }),
            RateObservation::estimated(&b, &night(1), 400),
            RateObservation::live(&a, &night(4), SourceKind::Aggregator, Extraction { rates: vec![515.0] }),
            RateObservation::estimated(&a, &night(8), 400),
        ]
    }

    #[test]
    fn aggregates_one_property() {
        let s = RunSummary::for_profile(&profile("a"), 4, &observations());
        assert_eq!(s.total_attempts, 3);
        assert_eq!(s.count(RateSource::Direct), 1);
        assert_eq!(s.count(RateSource::Aggregator), 1);
        assert_eq!(s.count(RateSource::EmbeddedWidget), 0);
        assert_eq!(s.count(RateSource::Estimated), 1);
        assert_eq!(s.success_rate, 100.0);
        assert_eq!(s.live_rate, 66.7);
        assert_eq!(s.average_lowest_rate, Some(445.0));
        assert_eq!(s.min_rate, Some(400.0));
        assert_eq!(s.max_rate, Some(515.0));
        assert_eq!(s.missing_cells(), 1);
    }

    #[test]
    fn empty_property_has_no_rates() {
        let s = RunSummary::for_profile(&profile("c"), 2, &observations());
        assert_eq!(s.total_attempts, 0);
        assert_eq!(s.success_rate, 0.0);
        assert_eq!(s.average_lowest_rate, None);
        assert_eq!(s.missing_cells(), 2);
    }

    #[test]
    fn all_in_keeps_first_seen_order() {
        let all = RunSummary::all_in(&observations());
        let ids: Vec<&str> = all.iter().map(|s| s.property_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(all[1].property_name, "B");
        assert_eq!(all[1].expected_cells, None);
    }

    #[test]
    fn serialized_shape() {
        let s = RunSummary::for_profile(&profile("a"), 4, &observations());
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["propertyId"], "a");
        assert_eq!(v["bySource"]["embedded-widget"], 0);
        assert_eq!(v["averageLowestRate"], 445.0);
        assert_eq!(v["expectedCells"], 4);
    }
}

use tracing::debug;

use crate::config::{PropertyProfile, StrategyDescriptor};
use crate::dates::DatePair;
use crate::estimate::estimate;
use crate::extract::{self, ExtractionStrategy};
use crate::observation::RateObservation;
use crate::pacer::RequestPacer;
use crate::session::paced::PacedSession;
use crate::session::BrowsingSession;

/// Drives one property's strategy chain for a cell, ending in the estimator.
pub struct FallbackController<'a> {
    profile: &'a PropertyProfile,
    adults: u32,
    chain: Vec<(&'a StrategyDescriptor, Box<dyn ExtractionStrategy>)>,
}

impl<'a> FallbackController<'a> {
    pub fn new(profile: &'a PropertyProfile, adults: u32) -> Self {
        let chain = profile
            .strategies
            .iter()
            .map(|d| (d, extract::build(d)))
            .collect();
        Self {
            profile,
            adults,
            chain,
        }
    }

    /// Try each strategy in order; the first success wins. When all fail the
    /// cell is estimated, so the result is always a successful observation.
    ///
    /// Strategies only see the session through the pacer: every request after
    /// the cell's first waits on `before_request`.
    pub async fn observe(
        &self,
        session: &mut dyn BrowsingSession,
        pacer: &mut RequestPacer,
        pair: &DatePair,
    ) -> RateObservation {
        let mut session = PacedSession::new(session, pacer);
        for (descriptor, strategy) in &self.chain {
            let url = descriptor.render_url(pair, self.adults);
            match strategy.extract(&mut session, &url, self.profile.base_rates).await {
                Ok(extraction) => return RateObservation::live(self.profile, pair, strategy.kind(), extraction),
                Err(e) => debug!(
                    "{} {} via {} failed: {}",
                    self.profile.id,
                    pair.check_in(),
                    strategy.kind().as_str(),
                    e
                ),
            }
        }

        let rate = estimate(self.profile, pair.check_in(), pair.day_type());
        debug!(
            "{} {} estimated at ${} after {} requests",
            self.profile.id,
            pair.check_in(),
            rate,
            session.requests()
        );
        RateObservation::estimated(self.profile, pair, rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateRange, SourceKind};
    use crate::observation::RateSource;
    use crate::pacer::PacingConfig;
    use crate::session::scripted::ScriptedWeb;
    use chrono::NaiveDate;

    fn descriptor(kind: SourceKind, url: &str) -> StrategyDescriptor {
        StrategyDescriptor {
            kind,
            url: url.into(),
            price_selectors: None,
            frame_selector: None,
        }
    }

    fn profile(low: f64, high: f64) -> PropertyProfile {
        PropertyProfile {
            id: "the-george".into(),
            name: "The George".into(),
            rooms: 9,
            location: "Napa".into(),
            strategies: vec![
                descriptor(SourceKind::Direct, "https://george.test/rates?d={check_in}"),
                descriptor(SourceKind::EmbeddedWidget, "https://george.test/book?d={check_in}"),
                descriptor(
                    SourceKind::Aggregator,
                    "https://agg.test/hotel/us/the-george.html?checkin={check_in}&checkout={check_out}&group_adults={adults}",
                ),
            ],
            base_rates: RateRange { low, high },
        }
    }

    fn pacer() -> RequestPacer {
        RequestPacer::with_seed(PacingConfig::immediate(), 1)
    }

    fn spaced(ms: u64) -> RequestPacer {
        RequestPacer::with_seed(
            PacingConfig {
                cell_base_ms: ms,
                cell_jitter_ms: 0,
                ..PacingConfig::immediate()
            },
            1,
        )
    }

    fn night(y: i32, m: u32, d: u32) -> DatePair {
        DatePair::night(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    #[tokio::test]
    async fn all_sources_failing_yields_estimate() {
        let profile = profile(300.0, 600.0);
        let web = ScriptedWeb::new();
        let mut session = web.session();
        let pair = night(2025, 7, 5); // Saturday

        let obs = FallbackController::new(&profile, 2)
            .observe(&mut session, &mut pacer(), &pair)
            .await;

        assert!(obs.success);
        assert_eq!(obs.source, RateSource::Estimated);
        assert_eq!(obs.all_rates, vec![690.0]);
        assert_eq!(obs.lowest_rate, Some(690.0));
        assert_eq!(obs.error, None);
        // every strategy was attempted, in order
        assert_eq!(web.visits().len(), 3);
        assert!(web.visits()[0].starts_with("https://george.test/rates"));
        assert!(web.visits()[2].starts_with("https://agg.test/"));
    }

    #[tokio::test]
    async fn later_strategy_success_stops_the_chain() {
        let profile = profile(350.0, 700.0);
        let web = ScriptedWeb::new()
            .fixture("https://george.test/rates?d=2025-01-04", "challenge")
            .fixture(
                "https://agg.test/hotel/us/the-george.html?checkin=2025-01-04&checkout=2025-01-05&group_adults=2",
                "aggregator_rooms",
            );
        let mut session = web.session();

        let obs = FallbackController::new(&profile, 2)
            .observe(&mut session, &mut pacer(), &night(2025, 1, 4))
            .await;

        assert_eq!(obs.source, RateSource::Aggregator);
        assert_eq!(obs.lowest_rate, Some(465.0));
        assert_eq!(obs.all_rates, vec![465.0, 540.0]);
        assert_eq!(obs.error, None);
    }

    #[tokio::test]
    async fn first_success_skips_the_rest() {
        let profile = profile(350.0, 700.0);
        let web = ScriptedWeb::new().page(
            "https://george.test/rates?d=2025-01-08",
            "<html><body><span class=\"room-rate\">$410</span></body></html>",
        );
        let mut session = web.session();

        let obs = FallbackController::new(&profile, 2)
            .observe(&mut session, &mut pacer(), &night(2025, 1, 8))
            .await;

        assert_eq!(obs.source, RateSource::Direct);
        assert_eq!(obs.all_rates, vec![410.0]);
        assert_eq!(web.visits().len(), 1);
    }

    #[tokio::test]
    async fn reveal_click_waits_on_the_pacer() {
        let mut profile = profile(350.0, 700.0);
        profile.strategies = profile.strategies.split_off(2);
        let url = "https://agg.test/hotel/us/the-george.html?checkin=2025-01-04&checkout=2025-01-05&group_adults=2";
        let web = ScriptedWeb::new()
            .fixture(url, "aggregator_reveal")
            .fixture(&format!("{}&show_prices=1", url), "aggregator_rooms");
        let mut session = web.session();

        let t0 = std::time::Instant::now();
        let obs = FallbackController::new(&profile, 2)
            .observe(&mut session, &mut spaced(250), &night(2025, 1, 4))
            .await;

        assert_eq!(obs.source, RateSource::Aggregator);
        assert_eq!(web.visits().len(), 2);
        assert!(t0.elapsed() >= std::time::Duration::from_millis(250), "{:?}", t0.elapsed());
    }

    #[tokio::test]
    async fn each_fallback_attempt_is_paced() {
        let profile = profile(300.0, 600.0);
        let web = ScriptedWeb::new();
        let mut session = web.session();

        let t0 = std::time::Instant::now();
        FallbackController::new(&profile, 2)
            .observe(&mut session, &mut spaced(100), &night(2025, 7, 5))
            .await;

        // three attempts, two gaps
        assert_eq!(web.visits().len(), 3);
        assert!(t0.elapsed() >= std::time::Duration::from_millis(200), "{:?}", t0.elapsed());
    }
}

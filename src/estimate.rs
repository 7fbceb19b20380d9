use chrono::{Datelike, NaiveDate};

use crate::config::PropertyProfile;
use crate::dates::DayType;

const WEEKEND_MULTIPLIER: f64 = 1.15;

/// Seasonal multiplier by calendar month.
pub fn season_multiplier(month: u32) -> f64 {
    match month {
        5..=10 => 1.4, // peak
        3 | 4 => 1.2,  // shoulder
        11 | 12 => 1.1, // holidays
        _ => 1.0,
    }
}

pub fn day_multiplier(day_type: DayType) -> f64 {
    match day_type {
        DayType::Weekend => WEEKEND_MULTIPLIER,
        DayType::Midweek => 1.0,
    }
}

/// Estimated nightly rate, used when every live source fails.
///
/// The season multiplier is mapped linearly onto the profile's base range so that
/// 1.0 sits near `low` and 1.4 lands on `high`; weekends add 15% on top.
pub fn estimate(profile: &PropertyProfile, date: NaiveDate, day_type: DayType) -> u32 {
    let low = profile.base_rates.low;
    let high = profile.base_rates.high;
    let season = season_multiplier(date.month());

    let base = low + (high - low) * (season - 0.8) / 0.6;
    (base * day_multiplier(day_type)).round().max(1.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateRange, SourceKind, StrategyDescriptor};

    fn profile(low: f64, high: f64) -> PropertyProfile {
        PropertyProfile {
            id: "p".into(),
            name: "P".into(),
            rooms: 4,
            location: "Napa".into(),
            strategies: vec![StrategyDescriptor {
                kind: SourceKind::Direct,
                url: "https://p.test/".into(),
                price_selectors: None,
                frame_selector: None,
            }],
            base_rates: RateRange { low, high },
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn july_weekend() {
        let p = profile(300.0, 600.0);
        assert_eq!(estimate(&p, d(2025, 7, 12), DayType::Weekend), 690);
        assert_eq!(estimate(&p, d(2025, 7, 9), DayType::Midweek), 600);
    }

    #[test]
    fn season_breakpoints() {
        let months: Vec<f64> = (1..=12).map(season_multiplier).collect();
        assert_eq!(
            months,
            vec![1.0, 1.0, 1.2, 1.2, 1.4, 1.4, 1.4, 1.4, 1.4, 1.4, 1.1, 1.1]
        );
    }

    #[test]
    fn january_midweek_sits_near_low() {
        let p = profile(300.0, 600.0);
        // 300 + 300 * 0.2 / 0.6
        assert_eq!(estimate(&p, d(2025, 1, 8), DayType::Midweek), 400);
    }

    #[test]
    fn positive_bounded_and_pure() {
        let profiles = [
            profile(299.0, 486.0),
            profile(687.0, 1050.0),
            profile(350.0, 650.0),
            profile(100.0, 100.0),
        ];
        for p in &profiles {
            for month in 1..=12 {
                for day_type in [DayType::Midweek, DayType::Weekend] {
                    let date = d(2025, month, 15);
                    let a = estimate(p, date, day_type);
                    let b = estimate(p, date, day_type);
                    assert_eq!(a, b);
                    assert!(a > 0);
                    assert!(a as f64 >= p.base_rates.low.floor());
                    assert!(a as f64 <= (p.base_rates.high * 1.4).ceil());
                }
            }
        }
    }
}

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

/// Weeks covered when no horizon is given on the command line.
pub const DEFAULT_HORIZON_WEEKS: i64 = 26;

const MIDWEEK_OFFSET: i64 = 2; // Wednesday
const WEEKEND_OFFSET: i64 = 5; // Saturday

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayType {
    Midweek,
    Weekend,
}

impl DayType {
    pub fn of(date: NaiveDate) -> Self {
        match date.weekday() {
            Weekday::Sat | Weekday::Sun => DayType::Weekend,
            _ => DayType::Midweek,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DayType::Midweek => "midweek",
            DayType::Weekend => "weekend",
        }
    }
}

/// A one-night stay. Check-out and day type are derived from the check-in date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatePair {
    check_in: NaiveDate,
    check_out: NaiveDate,
    day_type: DayType,
}

impl DatePair {
    pub fn night(check_in: NaiveDate) -> Self {
        Self {
            check_in,
            check_out: check_in + Duration::days(1),
            day_type: DayType::of(check_in),
        }
    }

    pub fn check_in(&self) -> NaiveDate {
        self.check_in
    }

    pub fn check_out(&self) -> NaiveDate {
        self.check_out
    }

    pub fn day_type(&self) -> DayType {
        self.day_type
    }
}

/// One Wednesday and one Saturday night per ISO week overlapping `[start, end]`,
/// in chronological order. Anchors outside the horizon are dropped.
pub fn generate(start: NaiveDate, end: NaiveDate) -> Vec<DatePair> {
    let mut pairs = Vec::new();
    if end < start {
        return pairs;
    }

    let mut monday = start - Duration::days(start.weekday().num_days_from_monday() as i64);
    while monday <= end {
        for offset in [MIDWEEK_OFFSET, WEEKEND_OFFSET] {
            let anchor = monday + Duration::days(offset);
            if anchor >= start && anchor <= end {
                pairs.push(DatePair::night(anchor));
            }
        }
        monday += Duration::weeks(1);
    }
    pairs
}

/// Horizon starting at `today` and spanning `DEFAULT_HORIZON_WEEKS` weeks.
pub fn default_horizon(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    (today, today + Duration::weeks(DEFAULT_HORIZON_WEEKS) - Duration::days(1))
}

/// Resolve optional CLI bounds against the default horizon.
pub fn resolve_horizon(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    today: NaiveDate,
) -> (NaiveDate, NaiveDate) {
    let start = start.unwrap_or(today);
    let end = end.unwrap_or_else(|| default_horizon(start).1);
    (start, end)
}

use std::collections::BTreeMap;

use chrono::{DateTime, Days, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::kiosk::{SampleStatus, UptimeSample};

pub const WEEK_DAYS: u64 = 7;

pub type UptimeDays = BTreeMap<NaiveDate, BTreeMap<String, u8>>;

pub fn short_window_percent(history: &[UptimeSample]) -> f64 {
    if history.is_empty() {
        return 0.0;
    }
    let ok = history
        .iter()
        .filter(|s| s.status == SampleStatus::Ok)
        .count();
    let percent = (100.0 * ok as f64 / history.len() as f64).min(100.0);
    round2(percent)
}

pub fn timezone_for_country(country: Option<&str>) -> Tz {
    match country {
        Some(code) if code.eq_ignore_ascii_case("GBP") => chrono_tz::Europe::London,
        _ => chrono_tz::UTC,
    }
}

pub fn hour_key(hour: u32) -> String {
    format!("{hour:02}:00")
}

// Today only counts hours before the current local hour.
pub fn compute_weekly_uptime(days: &UptimeDays, tz: &Tz, now: DateTime<Utc>) -> f64 {
    let local_now = tz.from_utc_datetime(&now.naive_utc());
    let today = local_now.date_naive();
    let current_hour = local_now.hour();

    let mut counted = 0_u32;
    let mut up = 0_u32;

    for back in 0..WEEK_DAYS {
        let Some(date) = today.checked_sub_days(Days::new(back)) else {
            continue;
        };
        let hours = if date == today { current_hour } else { 24 };
        let marks = days.get(&date);

        for hour in 0..hours {
            counted += 1;
            let value = marks
                .and_then(|m| m.get(&hour_key(hour)))
                .copied()
                .unwrap_or(0);
            if value > 0 {
                up += 1;
            }
        }
    }

    if counted == 0 {
        return 0.0;
    }
    100.0 * up as f64 / counted as f64
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

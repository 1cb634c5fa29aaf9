use std::time::Duration;

use chrono::Weekday;

#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub heartbeat_timeout: Duration,
    pub sample_interval: Duration,
    pub sample_tolerance: Duration,
    pub history_retention: Duration,
    pub heartbeat_retention: Duration,
    pub identity_grace: Duration,
    pub offline_scan_interval: Duration,
    pub trim_interval: Duration,
    pub summary_refresh_interval: Duration,
    pub report_weekday: Weekday,
    pub report_hour: u32,
    pub report_timezone: chrono_tz::Tz,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(300),
            sample_interval: Duration::from_secs(120),
            sample_tolerance: Duration::from_secs(90),
            history_retention: Duration::from_secs(24 * 3600),
            heartbeat_retention: Duration::from_secs(24 * 3600),
            identity_grace: Duration::from_secs(600),
            offline_scan_interval: Duration::from_secs(120),
            trim_interval: Duration::from_secs(3600),
            summary_refresh_interval: Duration::from_secs(3600),
            report_weekday: Weekday::Mon,
            report_hour: 9,
            report_timezone: chrono_tz::Europe::London,
        }
    }
}

pub(crate) fn chrono_duration(value: Duration) -> chrono::Duration {
    chrono::Duration::from_std(value).unwrap_or(chrono::TimeDelta::MAX)
}

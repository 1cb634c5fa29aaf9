use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{chrono_duration, FleetConfig};
use crate::identity::RawIdentity;
use crate::uptime::short_window_percent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleStatus {
    Ok,
    Missed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UptimeSample {
    pub timestamp: DateTime<Utc>,
    pub status: SampleStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStat {
    pub filename: String,
    #[serde(default, alias = "play_count")]
    pub play_count: u64,
    #[serde(default, alias = "total_play_duration")]
    pub total_play_duration: f64,
    #[serde(default, alias = "first_play")]
    pub first_play: Option<String>,
    #[serde(default, alias = "last_play")]
    pub last_play: Option<String>,
}

impl VideoStat {
    pub fn reset(&mut self) {
        self.play_count = 0;
        self.total_play_duration = 0.0;
        self.first_play = None;
        self.last_play = None;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KioskRecord {
    pub id: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub software_version: String,
    #[serde(default)]
    pub uptime_history: Vec<UptimeSample>,
    #[serde(default)]
    pub actual_heartbeat_times: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub uptime_percent: f64,
    #[serde(default)]
    pub offline_alert_sent: bool,
    #[serde(default)]
    pub suppress_offline_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub identity_fingerprint: Option<String>,
    #[serde(default)]
    pub videos: Vec<VideoStat>,
}

impl KioskRecord {
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            first_seen: now,
            last_seen: now,
            software_version: "Unknown".to_string(),
            uptime_history: Vec::new(),
            actual_heartbeat_times: Vec::new(),
            uptime_percent: 0.0,
            offline_alert_sent: false,
            suppress_offline_until: None,
            identity_fingerprint: None,
            videos: Vec::new(),
        }
    }

    pub fn record_heartbeat(
        &mut self,
        now: DateTime<Utc>,
        software_version: Option<&str>,
        videos: Vec<VideoStat>,
        config: &FleetConfig,
    ) -> bool {
        // At-least-once delivery may hand us an older ping after a newer one.
        if now > self.last_seen {
            self.last_seen = now;
        }
        if let Some(version) = software_version {
            self.software_version = version.to_string();
        }
        self.videos = videos;
        self.offline_alert_sent = false;

        let pos = self.actual_heartbeat_times.partition_point(|t| *t <= now);
        self.actual_heartbeat_times.insert(pos, now);
        let cutoff = now - chrono_duration(config.heartbeat_retention);
        self.actual_heartbeat_times.retain(|t| *t >= cutoff);

        self.sample_uptime(now, config)
    }

    // The periodic scan calls this too, so silent kiosks accumulate misses.
    pub fn sample_uptime(&mut self, now: DateTime<Utc>, config: &FleetConfig) -> bool {
        let interval = chrono_duration(config.sample_interval);
        let last_sample = self
            .uptime_history
            .last()
            .map(|s| s.timestamp)
            .unwrap_or(now - interval);

        if now - last_sample < interval {
            return false;
        }

        let tolerance = chrono_duration(config.sample_tolerance);
        let covered = self
            .actual_heartbeat_times
            .iter()
            .any(|t| (*t - now).abs() <= tolerance);

        self.uptime_history.push(UptimeSample {
            timestamp: now,
            status: if covered {
                SampleStatus::Ok
            } else {
                SampleStatus::Missed
            },
        });

        self.trim_history(now, config);
        self.uptime_percent = short_window_percent(&self.uptime_history);
        true
    }

    pub fn trim_history(&mut self, now: DateTime<Utc>, config: &FleetConfig) -> bool {
        let before = self.uptime_history.len() + self.actual_heartbeat_times.len();

        let history_cutoff = now - chrono_duration(config.history_retention);
        self.uptime_history.retain(|s| s.timestamp >= history_cutoff);
        let beat_cutoff = now - chrono_duration(config.heartbeat_retention);
        self.actual_heartbeat_times.retain(|t| *t >= beat_cutoff);

        before != self.uptime_history.len() + self.actual_heartbeat_times.len()
    }

    pub fn is_online(&self, now: DateTime<Utc>, config: &FleetConfig) -> bool {
        now - self.last_seen <= chrono_duration(config.heartbeat_timeout)
    }

    pub fn video_mut(&mut self, filename: &str) -> Option<&mut VideoStat> {
        self.videos.iter_mut().find(|v| v.filename == filename)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    #[serde(default, alias = "device_id", alias = "pi_id", alias = "anydesk_id")]
    pub device_id: Option<String>,
    #[serde(default, alias = "software_version")]
    pub software_version: Option<String>,
    #[serde(default)]
    pub videos: Vec<VideoStat>,
    #[serde(default, alias = "kiosk_name")]
    pub kiosk_name: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default, alias = "kiosk_code")]
    pub kiosk_code: Option<String>,
    #[serde(default, alias = "kiosk_address")]
    pub kiosk_address: Option<String>,
}

impl Heartbeat {
    pub fn raw_identity(&self) -> RawIdentity {
        RawIdentity {
            name: self.kiosk_name.clone(),
            country: self.country.clone(),
            code: self.kiosk_code.clone(),
            address: self.kiosk_address.clone(),
        }
    }
}

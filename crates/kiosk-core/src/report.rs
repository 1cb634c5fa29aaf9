use std::collections::BTreeMap;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::Serialize;

use crate::error::FleetError;
use crate::identity::{identity_key, Identity};
use crate::kiosk::{KioskRecord, VideoStat};
use crate::store::{FleetStore, VideoSummaries};
use crate::transport::Attachment;
use crate::uptime::{compute_weekly_uptime, hour_key, timezone_for_country, WEEK_DAYS};

const UNKNOWN_COUNTRY: &str = "Unknown";

#[derive(Debug, Clone, Serialize)]
pub struct KioskView {
    pub id: String,
    pub display_name: String,
    pub identity: Option<Identity>,
    pub aliases: Vec<String>,
    pub online: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub seconds_since_seen: i64,
    pub software_version: String,
    pub uptime_percent: f64,
    pub weekly_uptime: f64,
    pub videos: Vec<VideoStat>,
    pub video_summary: VideoSummaries,
}

#[derive(Debug, Clone, Serialize)]
pub struct FleetOverview {
    pub generated_at: DateTime<Utc>,
    pub heartbeat_timeout_secs: u64,
    pub configured: BTreeMap<String, Vec<KioskView>>,
    pub unconfigured: Vec<KioskView>,
}

impl FleetOverview {
    pub fn kiosks(&self) -> impl Iterator<Item = &KioskView> {
        self.configured.values().flatten().chain(self.unconfigured.iter())
    }
}

pub fn fleet_overview(store: &FleetStore, now: DateTime<Utc>) -> FleetOverview {
    let state = store.snapshot();
    let config = store.config();
    let today = now.date_naive();

    let mut aliases: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for id in state.kiosks.keys() {
        aliases
            .entry(identity_key(state.mappings.get(id), id))
            .or_default()
            .push(id.clone());
    }

    let mut overview = FleetOverview {
        generated_at: now,
        heartbeat_timeout_secs: config.heartbeat_timeout.as_secs(),
        configured: BTreeMap::new(),
        unconfigured: Vec::new(),
    };

    for id in store.representative_ids() {
        let Some(record) = state.kiosks.get(&id) else {
            continue;
        };
        let identity = state.mappings.get(&id).cloned();
        let key = identity_key(identity.as_ref(), &id);
        let view = KioskView {
            id: id.clone(),
            display_name: identity
                .as_ref()
                .map(|i| i.display_name(&id))
                .unwrap_or_else(|| id.clone()),
            aliases: aliases
                .get(&key)
                .map(|ids| ids.iter().filter(|a| **a != id).cloned().collect())
                .unwrap_or_default(),
            online: record.is_online(now, config),
            first_seen: record.first_seen,
            last_seen: record.last_seen,
            seconds_since_seen: (now - record.last_seen).num_seconds(),
            software_version: record.software_version.clone(),
            uptime_percent: record.uptime_percent,
            weekly_uptime: store.weekly_uptime(&id, now),
            videos: record.videos.clone(),
            video_summary: store.video_summary(&id, today),
            identity: identity.clone(),
        };

        match identity.as_ref().filter(|i| i.name.is_some()) {
            Some(i) => overview
                .configured
                .entry(i.country.clone().unwrap_or_else(|| UNKNOWN_COUNTRY.to_string()))
                .or_default()
                .push(view),
            None => overview.unconfigured.push(view),
        }
    }

    for views in overview.configured.values_mut() {
        views.sort_by(|a, b| a.display_name.cmp(&b.display_name));
    }
    overview
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UptimeGridDay {
    pub date: NaiveDate,
    pub hours: [u8; 24],
    pub up_hours: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct UptimeGrid {
    pub id: String,
    pub identity: Option<Identity>,
    pub timezone: String,
    pub weekly_uptime: f64,
    pub days: Vec<UptimeGridDay>,
}

pub fn uptime_grid(store: &FleetStore, id: &str, now: DateTime<Utc>) -> Result<UptimeGrid, FleetError> {
    let record = store.kiosk(id);
    let identity = store.mapping(id);
    if record.is_none() && identity.is_none() {
        return Err(FleetError::UnknownKiosk(id.to_string()));
    }

    let tz = timezone_for_country(identity.as_ref().and_then(|i| i.country.as_deref()));
    let merged = store.all_uptime_days(id, now.date_naive());
    let days = merged
        .iter()
        .map(|(date, marks)| {
            let mut hours = [0_u8; 24];
            for (hour, slot) in hours.iter_mut().enumerate() {
                *slot = marks.get(&hour_key(hour as u32)).copied().unwrap_or(0).min(1);
            }
            UptimeGridDay {
                date: *date,
                up_hours: hours.iter().map(|h| u32::from(*h)).sum(),
                hours,
            }
        })
        .collect();

    Ok(UptimeGrid {
        id: id.to_string(),
        identity,
        timezone: tz.name().to_string(),
        weekly_uptime: compute_weekly_uptime(&merged, &tz, now),
        days,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    pub id: String,
    pub name: String,
    pub country: String,
    pub code: Option<String>,
    pub online: bool,
    pub uptime_percent: f64,
    pub weekly_uptime: f64,
    pub total_plays: u64,
    pub videos: VideoSummaries,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeeklyReport {
    pub generated_at: DateTime<Utc>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub rows: Vec<ReportRow>,
}

impl WeeklyReport {
    pub fn subject(&self) -> String {
        format!(
            "Weekly kiosk report {} to {}",
            self.period_start, self.period_end
        )
    }

    pub fn file_name(&self) -> String {
        format!("report-{}.json", self.generated_at.format("%Y-%m-%d"))
    }

    pub fn to_attachment(&self) -> Result<Attachment, FleetError> {
        Ok(Attachment {
            filename: self.file_name(),
            content_type: "application/json".to_string(),
            bytes: serde_json::to_vec_pretty(self)?,
        })
    }
}

pub fn weekly_report(store: &FleetStore, now: DateTime<Utc>) -> WeeklyReport {
    let overview = fleet_overview(store, now);
    let today = now.date_naive();

    let mut rows: Vec<ReportRow> = overview.kiosks().map(report_row).collect();
    rows.sort_by(|a, b| (&a.country, &a.name).cmp(&(&b.country, &b.name)));

    WeeklyReport {
        generated_at: now,
        period_start: today
            .checked_sub_days(Days::new(WEEK_DAYS - 1))
            .unwrap_or(today),
        period_end: today,
        rows,
    }
}

fn report_row(view: &KioskView) -> ReportRow {
    let identity = view.identity.clone().unwrap_or_default();
    ReportRow {
        id: view.id.clone(),
        name: view.display_name.clone(),
        country: identity
            .country
            .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string()),
        code: identity.code,
        online: view.online,
        uptime_percent: view.uptime_percent,
        weekly_uptime: view.weekly_uptime,
        total_plays: view.video_summary.values().map(|v| v.play_count).sum(),
        videos: view.video_summary.clone(),
    }
}

pub fn describe(record: &KioskRecord, identity: Option<&Identity>) -> String {
    format!(
        "{} [{}] last_seen={} uptime={:.2}%",
        identity
            .map(|i| i.display_name(&record.id))
            .unwrap_or_else(|| record.id.clone()),
        record.id,
        record.last_seen.to_rfc3339(),
        record.uptime_percent
    )
}

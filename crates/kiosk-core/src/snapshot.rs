use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::FleetError;
use crate::identity::{clean_field, Identity};
use crate::store::write_atomic;
use crate::uptime::UptimeDays;

const FILE_MARKER: &str = "master_data_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoSummary {
    #[serde(default, alias = "playCount")]
    pub play_count: u64,
    #[serde(default, alias = "totalDuration")]
    pub total_duration: f64,
    #[serde(default, alias = "firstPlay")]
    pub first_play: Option<String>,
    #[serde(default, alias = "lastPlay")]
    pub last_play: Option<String>,
}

impl VideoSummary {
    pub fn absorb(&mut self, other: &VideoSummary) {
        self.play_count += other.play_count;
        self.total_duration += other.total_duration;
        self.first_play = earliest(self.first_play.take(), other.first_play.clone());
        self.last_play = latest(self.last_play.take(), other.last_play.clone());
    }
}

fn earliest(a: Option<String>, b: Option<String>) -> Option<String> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn latest(a: Option<String>, b: Option<String>) -> Option<String> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DayBlock {
    #[serde(default, alias = "videoPlays")]
    pub video_plays: Vec<String>,
    #[serde(default, alias = "uptimeHours")]
    pub uptime_hours: BTreeMap<String, u8>,
    #[serde(default, alias = "videoSummary")]
    pub video_summary: BTreeMap<String, VideoSummary>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MasterSnapshot {
    pub device_id: Option<String>,
    pub software_version: Option<String>,
    pub kiosk_name: Option<String>,
    pub country: Option<String>,
    pub identity_key: Option<String>,
    pub days: BTreeMap<NaiveDate, DayBlock>,
}

impl MasterSnapshot {
    pub fn parse(bytes: &[u8]) -> Result<Self, FleetError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| FleetError::InvalidSnapshot(e.to_string()))?;
        let Value::Object(map) = value else {
            return Err(FleetError::InvalidSnapshot(
                "top level is not an object".to_string(),
            ));
        };

        let text = |snake: &str, camel: &str| {
            map.get(snake)
                .or_else(|| map.get(camel))
                .and_then(Value::as_str)
                .and_then(|s| clean_field(Some(s)))
        };

        let mut snapshot = MasterSnapshot {
            device_id: text("device_id", "deviceId"),
            software_version: text("software_version", "softwareVersion"),
            kiosk_name: text("kiosk_name", "kioskName"),
            country: text("country", "country"),
            identity_key: text("identity_key", "identityKey"),
            days: BTreeMap::new(),
        };

        for (key, block) in &map {
            let Ok(date) = NaiveDate::parse_from_str(key, "%Y-%m-%d") else {
                continue;
            };
            match serde_json::from_value::<DayBlock>(block.clone()) {
                Ok(day) => {
                    snapshot.days.insert(date, day);
                }
                Err(err) => debug!(date=%key, error=%err, "skipping malformed day block"),
            }
        }

        Ok(snapshot)
    }

    pub fn load(path: &Path) -> Result<Self, FleetError> {
        let bytes = fs::read(path)?;
        Self::parse(&bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotQuery {
    pub id: String,
    pub identity_key: String,
    pub kiosk_name: Option<String>,
}

impl SnapshotQuery {
    fn matches(&self, file_prefix: Option<&str>, snapshot: &MasterSnapshot) -> bool {
        if let Some(embedded) = &snapshot.identity_key {
            return embedded.eq_ignore_ascii_case(&self.identity_key);
        }

        // Legacy files carry no identity key; fall back to names.
        if snapshot.device_id.as_deref() == Some(self.id.as_str()) {
            return true;
        }
        match &self.kiosk_name {
            Some(name) => {
                file_prefix.is_some_and(|p| p.eq_ignore_ascii_case(&filename_token(name)))
                    || snapshot
                        .kiosk_name
                        .as_deref()
                        .is_some_and(|n| n.eq_ignore_ascii_case(name))
            }
            None => file_prefix == Some(filename_token(&self.id).as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotLibrary {
    dir: PathBuf,
    // Held across every write into `dir`; reads go without it.
    writes: Arc<Mutex<()>>,
}

impl SnapshotLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            writes: Arc::new(Mutex::new(())),
        }
    }

    fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn store_upload(
        &self,
        filename: &str,
        bytes: &[u8],
    ) -> Result<(PathBuf, MasterSnapshot), FleetError> {
        let name = sanitize_filename(filename)
            .ok_or_else(|| FleetError::InvalidSnapshot(format!("bad file name: {filename}")))?;
        let snapshot = MasterSnapshot::parse(bytes)?;

        let _writing = self.write_lock();
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        write_atomic(&path, bytes)?;
        Ok((path, snapshot))
    }

    pub fn matching_snapshots(&self, query: &SnapshotQuery, today: NaiveDate) -> Vec<MasterSnapshot> {
        let years = [today.year(), today.year() - 1];
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| file_year(p).is_some_and(|year| years.contains(&year)))
            .collect();
        paths.sort();

        let mut found = Vec::new();
        for path in paths {
            let snapshot = match MasterSnapshot::load(&path) {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    warn!(path=%path.display(), error=%err, "skipping unreadable snapshot");
                    continue;
                }
            };
            if query.matches(file_prefix(&path).as_deref(), &snapshot) {
                found.push(snapshot);
            }
        }
        found
    }

    pub fn summarize_videos(
        &self,
        query: &SnapshotQuery,
        today: NaiveDate,
    ) -> BTreeMap<String, VideoSummary> {
        aggregate_videos(&self.matching_snapshots(query, today))
    }

    pub fn all_uptime_days(&self, query: &SnapshotQuery, today: NaiveDate) -> UptimeDays {
        merge_uptime_days(&self.matching_snapshots(query, today))
    }

    // Only empty fields are filled; device-set values are never touched.
    pub fn backpatch_metadata(&self, path: &Path, identity: &Identity) -> Result<bool, FleetError> {
        let _writing = self.write_lock();
        let bytes = fs::read(path)?;
        let mut value: Value = serde_json::from_slice(&bytes)?;
        let Some(map) = value.as_object_mut() else {
            return Ok(false);
        };

        let mut changed = false;
        for (key, known) in [("kiosk_name", &identity.name), ("country", &identity.country)] {
            let empty = map
                .get(key)
                .map(|v| v.as_str().and_then(|s| clean_field(Some(s))).is_none())
                .unwrap_or(true);
            if let (true, Some(known)) = (empty, known) {
                map.insert(key.to_string(), Value::String(known.clone()));
                changed = true;
            }
        }

        if changed {
            write_atomic(path, &serde_json::to_vec_pretty(&value)?)?;
        }
        Ok(changed)
    }
}

pub fn aggregate_videos(snapshots: &[MasterSnapshot]) -> BTreeMap<String, VideoSummary> {
    let mut merged: BTreeMap<String, VideoSummary> = BTreeMap::new();
    for day in snapshots.iter().flat_map(|s| s.days.values()) {
        for (filename, summary) in &day.video_summary {
            merged.entry(filename.clone()).or_default().absorb(summary);
        }
    }
    merged
}

pub fn merge_uptime_days(snapshots: &[MasterSnapshot]) -> UptimeDays {
    let mut merged = UptimeDays::new();
    for snapshot in snapshots {
        for (date, day) in &snapshot.days {
            let hours = merged.entry(*date).or_default();
            for (hour, up) in &day.uptime_hours {
                let slot = hours.entry(hour.clone()).or_insert(0);
                *slot = (*slot).max((*up).min(1));
            }
        }
    }
    merged
}

fn file_stem(path: &Path) -> Option<&str> {
    path.file_name()?.to_str()?.strip_suffix(".json")
}

fn file_year(path: &Path) -> Option<i32> {
    let stem = file_stem(path)?;
    let idx = stem.rfind(FILE_MARKER)?;
    stem[idx + FILE_MARKER.len()..].parse().ok()
}

fn file_prefix(path: &Path) -> Option<String> {
    let stem = file_stem(path)?;
    let idx = stem.rfind(FILE_MARKER)?;
    let prefix = stem[..idx].strip_suffix('_')?;
    Some(prefix.to_string())
}

fn sanitize_filename(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next()?.trim();
    if !base.ends_with(".json") || base.starts_with('.') {
        return None;
    }
    Some(filename_token(base))
}

fn filename_token(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

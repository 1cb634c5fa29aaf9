use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::alerts::{evaluate_offline, recovery_notice, OfflineAlert};
use crate::config::{chrono_duration, FleetConfig};
use crate::error::FleetError;
use crate::identity::{
    canonicalize, identity_key, normalize_device_id, Identity, IdentityChange, RawIdentity,
};
use crate::kiosk::{Heartbeat, KioskRecord, VideoStat};
use crate::snapshot::{aggregate_videos, merge_uptime_days, SnapshotLibrary, SnapshotQuery, VideoSummary};
use crate::uptime::{compute_weekly_uptime, short_window_percent, timezone_for_country, UptimeDays};

const KIOSKS_FILE: &str = "kiosks.json";
const MAPPINGS_FILE: &str = "kiosk_mappings.json";
const UPLOADS_DIR: &str = "uploads";

pub type VideoSummaries = BTreeMap<String, VideoSummary>;

// Both aggregates come from one pass over a kiosk's snapshot files.
#[derive(Debug, Clone, Default)]
struct SnapshotAggregate {
    videos: VideoSummaries,
    uptime_days: UptimeDays,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FleetState {
    pub kiosks: BTreeMap<String, KioskRecord>,
    pub mappings: BTreeMap<String, Identity>,
}

#[derive(Debug, Clone)]
pub struct HeartbeatOutcome {
    pub id: String,
    pub sampled: bool,
    pub identity_change: Option<IdentityChange>,
    pub recovery: Option<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct SnapshotOutcome {
    pub path: PathBuf,
    pub id: Option<String>,
    pub identity_change: Option<IdentityChange>,
    pub backpatched: bool,
}

pub struct FleetStore {
    config: FleetConfig,
    kiosks_path: PathBuf,
    mappings_path: PathBuf,
    library: SnapshotLibrary,
    state: Mutex<FleetState>,
    aggregates: RwLock<HashMap<String, SnapshotAggregate>>,
}

impl FleetStore {
    pub fn open(data_dir: impl AsRef<Path>, config: FleetConfig) -> Result<Self, FleetError> {
        let data_dir = data_dir.as_ref();
        let uploads = data_dir.join(UPLOADS_DIR);
        fs::create_dir_all(&uploads)?;

        let kiosks_path = data_dir.join(KIOSKS_FILE);
        let mappings_path = data_dir.join(MAPPINGS_FILE);
        let state = FleetState {
            kiosks: load_json_or_default(&kiosks_path)?,
            mappings: load_json_or_default(&mappings_path)?,
        };
        info!(
            kiosks = state.kiosks.len(),
            mappings = state.mappings.len(),
            dir = %data_dir.display(),
            "fleet state loaded"
        );

        Ok(Self {
            config,
            kiosks_path,
            mappings_path,
            library: SnapshotLibrary::new(uploads),
            state: Mutex::new(state),
            aggregates: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn library(&self) -> &SnapshotLibrary {
        &self.library
    }

    fn lock(&self) -> MutexGuard<'_, FleetState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> FleetState {
        self.lock().clone()
    }

    pub fn kiosk(&self, id: &str) -> Option<KioskRecord> {
        self.lock().kiosks.get(id).cloned()
    }

    pub fn mapping(&self, id: &str) -> Option<Identity> {
        self.lock().mappings.get(id).cloned()
    }

    pub fn ingest_heartbeat(
        &self,
        heartbeat: &Heartbeat,
        now: DateTime<Utc>,
    ) -> Result<HeartbeatOutcome, FleetError> {
        let id = normalize_device_id(
            heartbeat.device_id.as_deref(),
            heartbeat.kiosk_code.as_deref(),
        )
        .ok_or(FleetError::MissingDeviceId)?;

        let mut state = self.lock();
        let record = state
            .kiosks
            .entry(id.clone())
            .or_insert_with(|| KioskRecord::new(id.clone(), now));
        let was_alerted = record.offline_alert_sent;
        let sampled = record.record_heartbeat(
            now,
            heartbeat.software_version.as_deref(),
            heartbeat.videos.clone(),
            &self.config,
        );
        let recovery = if was_alerted {
            info!(kiosk_id=%id, "kiosk back online");
            recovery_notice(record)
        } else {
            None
        };

        let raw = heartbeat.raw_identity();
        let identity_change = if raw.is_empty() {
            None
        } else {
            resolve_locked(&mut state, &id, &raw, now, &self.config)
        };

        self.save_kiosks(&state)?;
        if identity_change.is_some() {
            self.save_mappings(&state)?;
            self.forget_aggregate(&id);
        }
        debug!(kiosk_id=%id, sampled, "heartbeat recorded");

        Ok(HeartbeatOutcome {
            id,
            sampled,
            identity_change,
            recovery,
        })
    }

    pub fn record_heartbeat(
        &self,
        id: &str,
        now: DateTime<Utc>,
        software_version: Option<&str>,
        videos: Vec<VideoStat>,
    ) -> Result<bool, FleetError> {
        if id.trim().is_empty() {
            return Err(FleetError::MissingDeviceId);
        }
        let mut state = self.lock();
        let sampled = state
            .kiosks
            .entry(id.to_string())
            .or_insert_with(|| KioskRecord::new(id, now))
            .record_heartbeat(now, software_version, videos, &self.config);
        self.save_kiosks(&state)?;
        Ok(sampled)
    }

    pub fn resolve_identity(
        &self,
        id: &str,
        incoming: &RawIdentity,
        now: DateTime<Utc>,
    ) -> Result<Option<IdentityChange>, FleetError> {
        let mut state = self.lock();
        let change = resolve_locked(&mut state, id, incoming, now, &self.config);
        if change.is_some() {
            self.save_mappings(&state)?;
            self.save_kiosks(&state)?;
            self.forget_aggregate(id);
        }
        Ok(change)
    }

    pub fn configure(
        &self,
        id: &str,
        incoming: &RawIdentity,
        now: DateTime<Utc>,
    ) -> Result<Option<IdentityChange>, FleetError> {
        let mut state = self.lock();
        if !state.kiosks.contains_key(id) && !state.mappings.contains_key(id) {
            return Err(FleetError::UnknownKiosk(id.to_string()));
        }
        let change = resolve_locked(&mut state, id, incoming, now, &self.config);
        if change.is_some() {
            self.save_mappings(&state)?;
            self.save_kiosks(&state)?;
            self.forget_aggregate(id);
        }
        Ok(change)
    }

    pub fn ingest_snapshot(
        &self,
        filename: &str,
        bytes: &[u8],
        now: DateTime<Utc>,
    ) -> Result<SnapshotOutcome, FleetError> {
        let (path, snapshot) = self.library.store_upload(filename, bytes)?;

        let mut identity_change = None;
        let mut backpatched = false;
        let id = {
            let mut state = self.lock();
            let id = normalize_device_id(snapshot.device_id.as_deref(), None).or_else(|| {
                let name = snapshot.kiosk_name.as_deref()?;
                find_by_name(&state, name)
            });

            if let Some(id) = &id {
                let record = state
                    .kiosks
                    .entry(id.clone())
                    .or_insert_with(|| KioskRecord::new(id.clone(), now));
                if let Some(version) = &snapshot.software_version {
                    record.software_version = version.clone();
                }

                let raw = RawIdentity {
                    name: snapshot.kiosk_name.clone(),
                    country: snapshot.country.clone(),
                    ..RawIdentity::default()
                };
                if !raw.is_empty() {
                    identity_change = resolve_locked(&mut state, id, &raw, now, &self.config);
                }

                self.save_kiosks(&state)?;
                if identity_change.is_some() {
                    self.save_mappings(&state)?;
                }

                if snapshot.kiosk_name.is_none() || snapshot.country.is_none() {
                    if let Some(mapping) = state.mappings.get(id) {
                        match self.library.backpatch_metadata(&path, mapping) {
                            Ok(patched) => backpatched = patched,
                            Err(err) => {
                                warn!(path=%path.display(), error=%err, "snapshot metadata backpatch failed")
                            }
                        }
                    }
                }
            }
            id
        };

        if let Some(id) = &id {
            self.refresh_summary(id, now.date_naive());
        }
        info!(file=%path.display(), kiosk_id=?id, backpatched, "snapshot stored");

        Ok(SnapshotOutcome {
            path,
            id,
            identity_change,
            backpatched,
        })
    }

    pub fn representative_ids(&self) -> Vec<String> {
        representative_ids(&self.lock())
    }

    pub fn sample_all(&self, now: DateTime<Utc>) -> Result<usize, FleetError> {
        let mut state = self.lock();
        let mut sampled = 0;
        for record in state.kiosks.values_mut() {
            if record.sample_uptime(now, &self.config) {
                sampled += 1;
            }
        }
        if sampled > 0 {
            self.save_kiosks(&state)?;
        }
        Ok(sampled)
    }

    pub fn trim_all(&self, now: DateTime<Utc>) -> Result<usize, FleetError> {
        let mut state = self.lock();
        let mut trimmed = 0;
        for record in state.kiosks.values_mut() {
            if record.trim_history(now, &self.config) {
                record.uptime_percent = short_window_percent(&record.uptime_history);
                trimmed += 1;
            }
        }
        if trimmed > 0 {
            self.save_kiosks(&state)?;
        }
        Ok(trimmed)
    }

    pub fn check_offline_alerts(&self, now: DateTime<Utc>) -> Result<Vec<OfflineAlert>, FleetError> {
        let mut state = self.lock();
        let ids = representative_ids(&state);

        let mut alerts = Vec::new();
        for id in ids {
            let identity = state.mappings.get(&id).cloned();
            let Some(record) = state.kiosks.get_mut(&id) else {
                continue;
            };
            if let Some(alert) = evaluate_offline(record, identity.as_ref(), now, &self.config) {
                warn!(kiosk_id=%id, last_seen=%alert.last_seen, "kiosk offline");
                alerts.push(alert);
            }
        }

        if !alerts.is_empty() {
            self.save_kiosks(&state)?;
        }
        Ok(alerts)
    }

    pub fn pending_offline_alerts(&self, now: DateTime<Utc>) -> Vec<OfflineAlert> {
        let mut state = self.snapshot();
        representative_ids(&state)
            .into_iter()
            .filter_map(|id| {
                let identity = state.mappings.get(&id).cloned();
                let record = state.kiosks.get_mut(&id)?;
                evaluate_offline(record, identity.as_ref(), now, &self.config)
            })
            .collect()
    }

    pub fn snapshot_query(&self, id: &str) -> SnapshotQuery {
        let state = self.lock();
        let mapping = state.mappings.get(id);
        SnapshotQuery {
            id: id.to_string(),
            identity_key: identity_key(mapping, id),
            kiosk_name: mapping.and_then(|m| m.name.clone()),
        }
    }

    pub fn summarize_videos(&self, id: &str, today: NaiveDate) -> VideoSummaries {
        self.library.summarize_videos(&self.snapshot_query(id), today)
    }

    pub fn all_uptime_days(&self, id: &str, today: NaiveDate) -> UptimeDays {
        self.library.all_uptime_days(&self.snapshot_query(id), today)
    }

    pub fn weekly_uptime(&self, id: &str, now: DateTime<Utc>) -> f64 {
        let tz = timezone_for_country(self.mapping(id).and_then(|m| m.country).as_deref());
        let days = self.cached_aggregate(id, now.date_naive()).uptime_days;
        compute_weekly_uptime(&days, &tz, now)
    }

    pub fn video_summary(&self, id: &str, today: NaiveDate) -> VideoSummaries {
        self.cached_aggregate(id, today).videos
    }

    fn cached_aggregate(&self, id: &str, today: NaiveDate) -> SnapshotAggregate {
        let cached = self
            .aggregates
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned();
        match cached {
            Some(aggregate) => aggregate,
            None => self.refresh_aggregate(id, today),
        }
    }

    fn refresh_aggregate(&self, id: &str, today: NaiveDate) -> SnapshotAggregate {
        let snapshots = self
            .library
            .matching_snapshots(&self.snapshot_query(id), today);
        let aggregate = SnapshotAggregate {
            videos: aggregate_videos(&snapshots),
            uptime_days: merge_uptime_days(&snapshots),
        };
        self.aggregates
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string(), aggregate.clone());
        aggregate
    }

    pub fn refresh_summary(&self, id: &str, today: NaiveDate) -> VideoSummaries {
        self.refresh_aggregate(id, today).videos
    }

    pub fn refresh_summaries(&self, today: NaiveDate) -> usize {
        let ids: Vec<String> = self.lock().kiosks.keys().cloned().collect();
        for id in &ids {
            self.refresh_aggregate(id, today);
        }
        ids.len()
    }

    // A new identity can change which snapshot files belong to the kiosk.
    fn forget_aggregate(&self, id: &str) {
        self.aggregates
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    pub fn reset_video(&self, id: &str, filename: &str) -> Result<bool, FleetError> {
        let mut state = self.lock();
        let record = state
            .kiosks
            .get_mut(id)
            .ok_or_else(|| FleetError::UnknownKiosk(id.to_string()))?;
        let Some(video) = record.video_mut(filename) else {
            return Ok(false);
        };
        video.reset();
        self.save_kiosks(&state)?;
        Ok(true)
    }

    pub fn delete_video(&self, id: &str, filename: &str) -> Result<bool, FleetError> {
        let mut state = self.lock();
        let record = state
            .kiosks
            .get_mut(id)
            .ok_or_else(|| FleetError::UnknownKiosk(id.to_string()))?;
        let before = record.videos.len();
        record.videos.retain(|v| v.filename != filename);
        let removed = record.videos.len() != before;
        if removed {
            self.save_kiosks(&state)?;
        }
        Ok(removed)
    }

    pub fn delete_kiosk(&self, id: &str) -> Result<bool, FleetError> {
        let mut state = self.lock();
        let had_record = state.kiosks.remove(id).is_some();
        let had_mapping = state.mappings.remove(id).is_some();
        if had_record {
            self.save_kiosks(&state)?;
        }
        if had_mapping {
            self.save_mappings(&state)?;
        }
        self.forget_aggregate(id);
        if had_record || had_mapping {
            info!(kiosk_id=%id, "kiosk deleted");
        }
        Ok(had_record || had_mapping)
    }

    pub fn flush(&self) -> Result<(), FleetError> {
        let state = self.lock();
        self.save_kiosks(&state)?;
        self.save_mappings(&state)?;
        Ok(())
    }

    fn save_kiosks(&self, state: &FleetState) -> Result<(), FleetError> {
        save_json(&self.kiosks_path, &state.kiosks)
    }

    fn save_mappings(&self, state: &FleetState) -> Result<(), FleetError> {
        save_json(&self.mappings_path, &state.mappings)
    }
}

fn resolve_locked(
    state: &mut FleetState,
    id: &str,
    incoming: &RawIdentity,
    now: DateTime<Utc>,
    config: &FleetConfig,
) -> Option<IdentityChange> {
    let incoming = canonicalize(incoming);
    let previous = state.mappings.get(id).cloned();
    let merged = match &previous {
        Some(prev) => prev.merged_with(&incoming),
        None => incoming,
    };
    if previous.is_none() && merged == Identity::default() {
        return None;
    }

    let fingerprint = merged.fingerprint();
    if previous.as_ref().map(Identity::fingerprint).as_deref() == Some(fingerprint.as_str()) {
        return None;
    }
    state.mappings.insert(id.to_string(), merged.clone());

    let mut notify = false;
    if let Some(record) = state.kiosks.get_mut(id) {
        let already_seen = record.identity_fingerprint.as_deref() == Some(fingerprint.as_str());
        if previous.is_some() && !already_seen {
            record.suppress_offline_until = Some(now + chrono_duration(config.identity_grace));
            notify = true;
        }
        record.identity_fingerprint = Some(fingerprint);
    }

    info!(kiosk_id=%id, notify, "kiosk identity updated");
    Some(IdentityChange {
        id: id.to_string(),
        previous,
        current: merged,
        notify,
    })
}

fn representative_ids(state: &FleetState) -> Vec<String> {
    let mut best: BTreeMap<String, &KioskRecord> = BTreeMap::new();
    for (id, record) in &state.kiosks {
        let key = identity_key(state.mappings.get(id), id);
        match best.get(&key) {
            Some(current) if current.last_seen >= record.last_seen => {}
            _ => {
                best.insert(key, record);
            }
        }
    }
    let mut ids: Vec<String> = best.into_values().map(|r| r.id.clone()).collect();
    ids.sort();
    ids
}

fn find_by_name(state: &FleetState, name: &str) -> Option<String> {
    let wanted = canonicalize(&RawIdentity {
        name: Some(name.to_string()),
        ..RawIdentity::default()
    })
    .name?
    .to_lowercase();
    state
        .mappings
        .iter()
        .filter(|(_, m)| m.name.as_deref().map(str::to_lowercase).as_deref() == Some(wanted.as_str()))
        .max_by_key(|(id, _)| state.kiosks.get(*id).map(|r| r.last_seen))
        .map(|(id, _)| id.clone())
}

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

// One temp name per call; concurrent writers never share one.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), FleetError> {
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(format!(".{}-{seq}.tmp", process::id()));
    let tmp = PathBuf::from(tmp);
    if let Err(err) = fs::write(&tmp, bytes).and_then(|()| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), FleetError> {
    write_atomic(path, &serde_json::to_vec_pretty(value)?)
}

// A bad file that cannot be moved aside fails the load.
pub(crate) fn load_json_or_default<T: DeserializeOwned + Default>(
    path: &Path,
) -> Result<T, FleetError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(err) => {
            let aside = move_aside(path, "unreadable")?;
            warn!(path=%path.display(), moved_to=%aside.display(), error=%err, "unreadable state file preserved");
            return Ok(T::default());
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(value),
        Err(err) => {
            let aside = move_aside(path, "corrupt")?;
            warn!(path=%path.display(), moved_to=%aside.display(), error=%err, "corrupt state file preserved");
            Ok(T::default())
        }
    }
}

fn move_aside(path: &Path, label: &str) -> Result<PathBuf, FleetError> {
    let mut aside = path.as_os_str().to_os_string();
    aside.push(format!(".{label}-{}", Utc::now().format("%Y%m%dT%H%M%S")));
    let aside = PathBuf::from(aside);
    fs::rename(path, &aside)?;
    Ok(aside)
}

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{chrono_duration, FleetConfig};
use crate::identity::{Identity, IdentityChange};
use crate::kiosk::KioskRecord;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OfflineAlert {
    pub id: String,
    pub identity: Option<Identity>,
    pub last_seen: DateTime<Utc>,
    pub timeout_secs: u64,
}

impl OfflineAlert {
    pub fn subject(&self) -> String {
        format!("Kiosk offline: {}", self.display_name())
    }

    pub fn body(&self) -> String {
        let identity = self.identity.clone().unwrap_or_default();
        format!(
            "Kiosk {} has not sent a heartbeat for more than {} seconds.\n\
             Device id: {}\nCountry: {}\nCode: {}\nAddress: {}\nLast seen: {}",
            self.display_name(),
            self.timeout_secs,
            self.id,
            identity.country.as_deref().unwrap_or("-"),
            identity.code.as_deref().unwrap_or("-"),
            identity.address.as_deref().unwrap_or("-"),
            self.last_seen.to_rfc3339(),
        )
    }

    fn display_name(&self) -> String {
        self.identity
            .as_ref()
            .map(|i| i.display_name(&self.id))
            .unwrap_or_else(|| self.id.clone())
    }
}

// Alerts once per episode; the next heartbeat clears the latch. Suppression
// blocks the check without touching the latch.
pub fn evaluate_offline(
    record: &mut KioskRecord,
    identity: Option<&Identity>,
    now: DateTime<Utc>,
    config: &FleetConfig,
) -> Option<OfflineAlert> {
    if record.suppress_offline_until.is_some_and(|until| now < until) {
        return None;
    }
    if record.offline_alert_sent {
        return None;
    }
    if now - record.last_seen <= chrono_duration(config.heartbeat_timeout) {
        return None;
    }

    record.offline_alert_sent = true;
    Some(OfflineAlert {
        id: record.id.clone(),
        identity: identity.cloned(),
        last_seen: record.last_seen,
        timeout_secs: config.heartbeat_timeout.as_secs(),
    })
}

pub fn recovery_notice(_record: &KioskRecord) -> Option<(String, String)> {
    None
}

pub fn identity_change_message(change: &IdentityChange) -> (String, String) {
    let describe = |identity: Option<&Identity>| match identity {
        Some(i) => format!(
            "name={} country={} code={} address={}",
            i.name.as_deref().unwrap_or("-"),
            i.country.as_deref().unwrap_or("-"),
            i.code.as_deref().unwrap_or("-"),
            i.address.as_deref().unwrap_or("-"),
        ),
        None => "(unmapped)".to_string(),
    };

    let subject = format!(
        "Kiosk identity changed: {}",
        change.current.display_name(&change.id)
    );
    let body = format!(
        "Device {} reported a new identity.\nBefore: {}\nAfter:  {}",
        change.id,
        describe(change.previous.as_ref()),
        describe(Some(&change.current)),
    );
    (subject, body)
}

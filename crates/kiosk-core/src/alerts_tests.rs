use chrono::Duration;

use crate::alerts::{evaluate_offline, identity_change_message, recovery_notice};
use crate::config::FleetConfig;
use crate::identity::{Identity, IdentityChange};
use crate::kiosk::KioskRecord;
use crate::test_support::at;

fn kings_cross() -> Identity {
    Identity {
        name: Some("Kings Cross".to_string()),
        country: Some("GBP".to_string()),
        code: Some("KC01".to_string()),
        address: None,
    }
}

#[test]
fn offline_transition_sets_latch_and_builds_alert() {
    // Arrange
    let config = FleetConfig::default();
    let t0 = at(2026, 3, 4, 9, 0, 0);
    let mut record = KioskRecord::new("pi-1", t0);
    let identity = kings_cross();

    // Act
    let alert = evaluate_offline(&mut record, Some(&identity), t0 + Duration::seconds(301), &config)
        .expect("alert");

    // Assert
    assert!(record.offline_alert_sent);
    assert_eq!(alert.last_seen, t0);
    assert_eq!(alert.timeout_secs, 300);
    assert_eq!(alert.subject(), "Kiosk offline: Kings Cross");
    let body = alert.body();
    assert!(body.contains("pi-1"));
    assert!(body.contains("KC01"));
    assert!(body.contains("Address: -"));
}

#[test]
fn latched_or_suppressed_records_stay_quiet() {
    // Arrange
    let config = FleetConfig::default();
    let t0 = at(2026, 3, 4, 9, 0, 0);
    let late = t0 + Duration::seconds(900);
    let mut latched = KioskRecord::new("pi-1", t0);
    latched.offline_alert_sent = true;
    let mut suppressed = KioskRecord::new("pi-2", t0);
    suppressed.suppress_offline_until = Some(late + Duration::seconds(1));

    // Act / Assert
    assert!(evaluate_offline(&mut latched, None, late, &config).is_none());
    assert!(evaluate_offline(&mut suppressed, None, late, &config).is_none());
    assert!(!suppressed.offline_alert_sent, "suppression leaves the state alone");
}

#[test]
fn unnamed_kiosk_alert_falls_back_to_device_id() {
    let config = FleetConfig::default();
    let t0 = at(2026, 3, 4, 9, 0, 0);
    let mut record = KioskRecord::new("pi-7", t0);
    let alert = evaluate_offline(&mut record, None, t0 + Duration::hours(1), &config)
        .expect("alert");
    assert_eq!(alert.subject(), "Kiosk offline: pi-7");
}

#[test]
fn recovery_notices_are_disabled() {
    let mut record = KioskRecord::new("pi-1", at(2026, 3, 4, 9, 0, 0));
    record.offline_alert_sent = true;
    assert_eq!(recovery_notice(&record), None);
}

#[test]
fn identity_change_message_shows_before_and_after() {
    // Arrange
    let change = IdentityChange {
        id: "pi-1".to_string(),
        previous: Some(Identity {
            name: Some("Euston".to_string()),
            ..Identity::default()
        }),
        current: kings_cross(),
        notify: true,
    };

    // Act
    let (subject, body) = identity_change_message(&change);

    // Assert
    assert_eq!(subject, "Kiosk identity changed: Kings Cross");
    assert!(body.contains("Before: name=Euston country=-"));
    assert!(body.contains("After:  name=Kings Cross country=GBP code=KC01"));
}

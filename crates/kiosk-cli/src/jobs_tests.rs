use std::env;
use std::fs;
use std::net::{Ipv4Addr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use kiosk_core::{
    AlertTransport, Attachment, FleetConfig, FleetStore, ManualClock, SampleStatus, TransportError,
};
use tokio::sync::mpsc;

use crate::exporter::ReportExport;
use crate::jobs::{self, run_offline_scan, run_weekly_report};
use crate::notify::Notifier;

// Forwards every subject it is asked to send.
struct RecordingRelay {
    sent: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl AlertTransport for RecordingRelay {
    async fn send_alert(&self, subject: &str, _: &str, _: &[String]) -> Result<(), TransportError> {
        let _ = self.sent.send(subject.to_string());
        Ok(())
    }

    async fn send_report(
        &self,
        subject: &str,
        attachments: &[Attachment],
        _: &[String],
    ) -> Result<(), TransportError> {
        let names: Vec<&str> = attachments.iter().map(|a| a.filename.as_str()).collect();
        let _ = self.sent.send(format!("{subject} [{}]", names.join(",")));
        Ok(())
    }
}

fn make_temp_dir(name: &str) -> PathBuf {
    let mut path = env::temp_dir();
    let uniq = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("unix epoch")
        .as_nanos();
    path.push(format!("kioskd-jobs-{name}-{uniq}"));
    fs::create_dir_all(&path).expect("create temp dir");
    path
}

fn at(d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, d, h, mi, 0)
        .single()
        .expect("valid date")
}

fn fixture(name: &str) -> (PathBuf, Arc<FleetStore>, Notifier, mpsc::UnboundedReceiver<String>) {
    let dir = make_temp_dir(name);
    let store = Arc::new(FleetStore::open(&dir, FleetConfig::default()).expect("open store"));
    let (tx, rx) = mpsc::unbounded_channel();
    let notifier = Notifier::new(
        Arc::new(RecordingRelay { sent: tx }),
        vec!["ops@example.com".to_string()],
    );
    (dir, store, notifier, rx)
}

async fn next_sent(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("notification in time")
        .expect("channel open")
}

#[tokio::test]
async fn offline_scan_samples_silent_kiosks_then_alerts_once() {
    // Arrange
    let (_dir, store, notifier, mut rx) = fixture("scan");
    store
        .record_heartbeat("pi-1", at(4, 9, 0), None, Vec::new())
        .expect("heartbeat");

    // Act
    let first = run_offline_scan(&store, &notifier, at(4, 9, 10));
    let subject = next_sent(&mut rx).await;
    let second = run_offline_scan(&store, &notifier, at(4, 9, 12));

    // Assert
    assert_eq!(first, 1);
    assert_eq!(subject, "Kiosk offline: pi-1");
    assert_eq!(second, 0);
    let record = store.kiosk("pi-1").expect("record");
    assert_eq!(
        record.uptime_history.last().map(|s| s.status),
        Some(SampleStatus::Missed)
    );
    assert!(record.uptime_percent < 100.0);
    assert!(record.offline_alert_sent);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn weekly_report_is_written_and_sent() {
    // Arrange
    let (dir, store, notifier, mut rx) = fixture("report");
    store
        .record_heartbeat("pi-1", at(9, 8, 55), None, Vec::new())
        .expect("heartbeat");
    let export = ReportExport {
        dir: dir.join("reports"),
        retention_days: 90,
    };

    // Act
    let path = run_weekly_report(&store, &notifier, &export, at(9, 9, 0)).expect("report");
    let sent = next_sent(&mut rx).await;

    // Assert
    assert_eq!(path, dir.join("reports").join("report-2026-03-09.json"));
    assert!(path.exists());
    assert!(sent.starts_with("Weekly kiosk report"));
    assert!(sent.ends_with("[report-2026-03-09.json]"));
}

#[tokio::test]
async fn jobs_stay_off_while_another_process_leads() {
    // Arrange
    let (dir, store, notifier, _rx) = fixture("leader");
    let held = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind");
    let port = held.local_addr().expect("addr").port();
    let export = ReportExport {
        dir: dir.join("reports"),
        retention_days: 90,
    };

    // Act
    let jobs = jobs::start(
        store,
        Arc::new(ManualClock::new(at(4, 9, 0))),
        notifier,
        export,
        port,
    );

    // Assert
    assert!(jobs.is_none());
}

#[tokio::test]
async fn leader_runs_all_four_jobs_until_shutdown() {
    // Arrange
    let (dir, store, notifier, _rx) = fixture("leader-ok");
    let export = ReportExport {
        dir: dir.join("reports"),
        retention_days: 90,
    };

    // Act
    let jobs = jobs::start(
        store,
        Arc::new(ManualClock::new(at(4, 9, 0))),
        notifier,
        export,
        0,
    )
    .expect("leader on a free port");
    let names: Vec<String> = jobs.task_names().into_iter().map(str::to_string).collect();
    jobs.shutdown().await;

    // Assert
    assert_eq!(
        names,
        ["uptime-trim", "offline-scan", "weekly-report", "summary-refresh"]
    );
}

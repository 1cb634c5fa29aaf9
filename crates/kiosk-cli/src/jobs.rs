use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use kiosk_core::leader::{self, LeaderGuard};
use kiosk_core::report::weekly_report;
use kiosk_core::{Cadence, Clock, FleetStore, Scheduler, WeeklySchedule};
use tracing::{info, warn};

use crate::exporter::ReportExport;
use crate::notify::Notifier;

pub struct Jobs {
    scheduler: Scheduler,
    _leader: LeaderGuard,
}

impl Jobs {
    pub fn task_names(&self) -> Vec<&str> {
        self.scheduler.task_names()
    }

    pub async fn shutdown(self) {
        self.scheduler.shutdown().await;
        info!("periodic jobs stopped");
    }
}

pub fn start(
    store: Arc<FleetStore>,
    clock: Arc<dyn Clock>,
    notifier: Notifier,
    export: ReportExport,
    leader_port: u16,
) -> Option<Jobs> {
    let leader = leader::try_acquire(leader_port)?;
    let config = store.config().clone();
    let mut scheduler = Scheduler::new(clock);

    let trim_store = store.clone();
    scheduler.spawn("uptime-trim", Cadence::Every(config.trim_interval), move |now| {
        let store = trim_store.clone();
        async move {
            match store.trim_all(now) {
                Ok(trimmed) => info!(trimmed, "uptime history trimmed"),
                Err(err) => warn!(error=%err, "uptime trim failed"),
            }
        }
    });

    let scan_store = store.clone();
    let scan_notifier = notifier.clone();
    scheduler.spawn(
        "offline-scan",
        Cadence::Every(config.offline_scan_interval),
        move |now| {
            let store = scan_store.clone();
            let notifier = scan_notifier.clone();
            async move {
                run_offline_scan(&store, &notifier, now);
            }
        },
    );

    let report_store = store.clone();
    let report_notifier = notifier.clone();
    let schedule = WeeklySchedule {
        weekday: config.report_weekday,
        hour: config.report_hour,
        tz: config.report_timezone,
    };
    scheduler.spawn("weekly-report", Cadence::Weekly(schedule), move |now| {
        let store = report_store.clone();
        let notifier = report_notifier.clone();
        let export = export.clone();
        async move {
            if let Err(err) = run_weekly_report(&store, &notifier, &export, now) {
                warn!(error=%err, "weekly report failed");
            }
        }
    });

    let summary_store = store;
    scheduler.spawn(
        "summary-refresh",
        Cadence::Every(config.summary_refresh_interval),
        move |now: DateTime<Utc>| {
            let store = summary_store.clone();
            async move {
                let refreshed = store.refresh_summaries(now.date_naive());
                info!(refreshed, "video summaries refreshed");
            }
        },
    );

    Some(Jobs {
        scheduler,
        _leader: leader,
    })
}

pub fn run_offline_scan(store: &FleetStore, notifier: &Notifier, now: DateTime<Utc>) -> usize {
    if let Err(err) = store.sample_all(now) {
        warn!(error=%err, "uptime sampling failed");
    }

    let alerts = match store.check_offline_alerts(now) {
        Ok(alerts) => alerts,
        Err(err) => {
            warn!(error=%err, "offline scan failed");
            return 0;
        }
    };
    for alert in &alerts {
        notifier.alert(alert.subject(), alert.body());
    }
    alerts.len()
}

pub fn run_weekly_report(
    store: &FleetStore,
    notifier: &Notifier,
    export: &ReportExport,
    now: DateTime<Utc>,
) -> Result<PathBuf> {
    let report = weekly_report(store, now);
    let path = export.write(&report, now)?;
    notifier.report(report.subject(), vec![report.to_attachment()?]);
    Ok(path)
}

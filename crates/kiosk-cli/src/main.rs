use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use kiosk_core::report::{describe, uptime_grid, weekly_report, UptimeGrid};
use kiosk_core::store::VideoSummaries;
use kiosk_core::transport::SEND_TIMEOUT;
use kiosk_core::{
    AlertTransport, Clock, FleetConfig, FleetStore, LogTransport, OfflineAlert, SystemClock,
    WebhookTransport,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod auth;
mod exporter;
mod jobs;
mod notify;
mod server;
#[cfg(test)]
mod jobs_tests;

use crate::auth::Credentials;
use crate::exporter::ReportExport;
use crate::notify::Notifier;
use crate::server::AppState;

#[derive(Debug, Parser)]
#[command(name = "kioskd")]
#[command(about = "Kiosk fleet heartbeat, uptime and alerting service")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, env = "KIOSK_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    #[arg(long, env = "KIOSK_LISTEN", default_value = "0.0.0.0:5000")]
    listen: String,

    /// Loopback port used to pick the single process that runs periodic jobs.
    #[arg(long, default_value_t = 5999)]
    leader_port: u16,

    #[arg(long, default_value_t = 300)]
    heartbeat_timeout_secs: u64,

    #[arg(long, env = "KIOSK_ALERT_WEBHOOK")]
    alert_webhook: Option<String>,

    #[arg(long = "alert-recipient", env = "KIOSK_ALERT_RECIPIENTS", value_delimiter = ',')]
    alert_recipients: Vec<String>,

    #[arg(long, env = "KIOSK_ADMIN_USER", default_value = "admin")]
    admin_user: String,

    #[arg(long, env = "KIOSK_ADMIN_PASSWORD", hide_env_values = true)]
    admin_password: Option<String>,

    #[arg(long, env = "KIOSK_VIEWER_USER", default_value = "viewer")]
    viewer_user: String,

    #[arg(long, env = "KIOSK_VIEWER_PASSWORD", hide_env_values = true)]
    viewer_password: Option<String>,

    #[arg(long, env = "KIOSK_REPORT_DIR", default_value = "./data/reports")]
    report_dir: PathBuf,

    #[arg(long, default_value_t = 90)]
    report_retention_days: u64,
}

impl Cli {
    fn fleet_config(&self) -> FleetConfig {
        FleetConfig {
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
            ..FleetConfig::default()
        }
    }

    fn credentials(&self) -> Credentials {
        Credentials {
            admin: self
                .admin_password
                .clone()
                .map(|p| (self.admin_user.clone(), p)),
            viewer: self
                .viewer_password
                .clone()
                .map(|p| (self.viewer_user.clone(), p)),
        }
    }

    fn report_export(&self) -> ReportExport {
        ReportExport {
            dir: self.report_dir.clone(),
            retention_days: self.report_retention_days,
        }
    }

    fn notifier(&self) -> Result<Notifier> {
        let transport: Arc<dyn AlertTransport> = match &self.alert_webhook {
            Some(url) => Arc::new(WebhookTransport::new(url.clone(), SEND_TIMEOUT)?),
            None => {
                info!("no alert webhook configured, notifications go to the log");
                Arc::new(LogTransport)
            }
        };
        if self.alert_recipients.is_empty() {
            warn!("no alert recipients configured");
        }
        Ok(Notifier::new(transport, self.alert_recipients.clone()))
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP service and, if elected, the periodic jobs.
    Serve,
    /// Show which kiosks the next offline check would alert on.
    Scan {
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    /// Aggregated per-video play summary from uploaded snapshots.
    Summary {
        #[arg(long)]
        id: String,
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    /// Day/hour uptime grid and weekly percentage.
    Uptime {
        #[arg(long)]
        id: String,
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    /// Generate and store one weekly report now.
    Report,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let store = FleetStore::open(&cli.data_dir, cli.fleet_config())
        .with_context(|| format!("opening data dir {}", cli.data_dir.display()))?;
    let store = Arc::new(store);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let now = clock.now();

    match &cli.command {
        Command::Serve => serve(&cli, store, clock).await?,
        Command::Scan { format } => {
            let alerts = store.pending_offline_alerts(now);
            print_scan(&store, &alerts, now, *format)?;
        }
        Command::Summary { id, format } => {
            let summary = store.summarize_videos(id, now.date_naive());
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
                OutputFormat::Human => print_summary(id, &summary),
            }
        }
        Command::Uptime { id, format } => {
            let grid = uptime_grid(&store, id, now)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&grid)?),
                OutputFormat::Human => print_grid(&grid),
            }
        }
        Command::Report => {
            let report = weekly_report(&store, now);
            let path = cli.report_export().write(&report, now)?;
            println!("{}", path.display());
        }
    }

    Ok(())
}

async fn serve(cli: &Cli, store: Arc<FleetStore>, clock: Arc<dyn Clock>) -> Result<()> {
    let notifier = cli.notifier()?;
    let jobs = jobs::start(
        store.clone(),
        clock.clone(),
        notifier.clone(),
        cli.report_export(),
        cli.leader_port,
    );
    if let Some(jobs) = &jobs {
        info!(tasks = ?jobs.task_names(), "periodic jobs running");
    }

    let credentials = cli.credentials();
    if credentials.admin.is_none() {
        warn!("no admin password configured, operator actions are disabled");
    }
    let state = Arc::new(AppState {
        store: store.clone(),
        clock,
        notifier,
        credentials,
    });

    let listener = tokio::net::TcpListener::bind(&cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;
    info!(addr=%cli.listen, "listening");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(jobs) = jobs {
        jobs.shutdown().await;
    }
    store.flush()?;
    info!("fleet state flushed");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error=%err, "could not listen for ctrl-c");
        return;
    }
    warn!("received ctrl-c, stopping");
}

fn print_scan(
    store: &FleetStore,
    alerts: &[OfflineAlert],
    now: DateTime<Utc>,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(alerts)?);
        }
        OutputFormat::Human => {
            let state = store.snapshot();
            println!("=== Kiosk Fleet ===");
            for id in store.representative_ids() {
                let Some(record) = state.kiosks.get(&id) else {
                    continue;
                };
                let online = if record.is_online(now, store.config()) {
                    "online "
                } else {
                    "OFFLINE"
                };
                println!("{online} {}", describe(record, state.mappings.get(&id)));
            }
            println!("Pending alerts: {}", alerts.len());
            for alert in alerts {
                println!("  {}", alert.subject());
            }
        }
    }
    Ok(())
}

fn print_summary(id: &str, summary: &VideoSummaries) {
    println!("=== Video Summary: {id} ===");
    if summary.is_empty() {
        println!("(no snapshot data)");
        return;
    }
    for (filename, video) in summary {
        println!(
            "{filename:<40} plays={:<6} duration={:>10.1}s first={} last={}",
            video.play_count,
            video.total_duration,
            video.first_play.as_deref().unwrap_or("-"),
            video.last_play.as_deref().unwrap_or("-"),
        );
    }
}

fn print_grid(grid: &UptimeGrid) {
    println!("=== Uptime: {} ({}) ===", grid.id, grid.timezone);
    println!("Weekly:     {:.2}%", grid.weekly_uptime);
    for day in &grid.days {
        let hours: String = day
            .hours
            .iter()
            .map(|h| if *h > 0 { '#' } else { '.' })
            .collect();
        println!("{}  {hours}  {:>2}/24", day.date, day.up_hours);
    }
}

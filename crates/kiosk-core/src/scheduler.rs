use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklySchedule {
    pub weekday: Weekday,
    pub hour: u32,
    pub tz: Tz,
}

impl WeeklySchedule {
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local_today = self.tz.from_utc_datetime(&now.naive_utc()).date_naive();
        let ahead = (7 + self.weekday.num_days_from_monday()
            - local_today.weekday().num_days_from_monday())
            % 7;

        let mut date = local_today + Days::new(u64::from(ahead));
        loop {
            if let Some(at) = self.fire_time(date) {
                if at > now {
                    return at;
                }
            }
            date = date + Days::new(7);
        }
    }

    fn fire_time(&self, date: chrono::NaiveDate) -> Option<DateTime<Utc>> {
        let naive = date.and_time(NaiveTime::from_hms_opt(self.hour.min(23), 0, 0)?);
        // Spring-forward gaps skip the local hour; fire at the next valid one.
        let local = self
            .tz
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| {
                self.tz
                    .from_local_datetime(&(naive + chrono::Duration::hours(1)))
                    .earliest()
            })?;
        Some(local.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Cadence {
    Every(Duration),
    Weekly(WeeklySchedule),
}

pub struct Scheduler {
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|(name, _)| name.as_str()).collect()
    }

    // First run is one period after registration.
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, cadence: Cadence, job: F)
    where
        F: Fn(DateTime<Utc>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let cancel = self.cancel.clone();
        let clock = self.clock.clone();
        let task_name = name.clone();

        let handle = match cadence {
            Cadence::Every(period) => tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            debug!(task=%task_name, "running periodic task");
                            job(clock.now()).await;
                        }
                    }
                }
            }),
            Cadence::Weekly(schedule) => tokio::spawn(async move {
                loop {
                    let now = clock.now();
                    let wait = (schedule.next_after(now) - now)
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = sleep(wait) => {
                            debug!(task=%task_name, "running weekly task");
                            job(clock.now()).await;
                        }
                    }
                }
            }),
        };

        info!(task=%name, ?cadence, "scheduled task");
        self.tasks.push((name, handle));
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        for (name, handle) in self.tasks {
            if let Err(err) = handle.await {
                warn!(task=%name, error=%err, "task ended abnormally");
            }
        }
    }
}

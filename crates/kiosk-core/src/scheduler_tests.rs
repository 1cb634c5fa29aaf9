use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Weekday;

use crate::clock::ManualClock;
use crate::leader::try_acquire;
use crate::scheduler::{Cadence, Scheduler, WeeklySchedule};
use crate::test_support::at;

fn monday_nine_london() -> WeeklySchedule {
    WeeklySchedule {
        weekday: Weekday::Mon,
        hour: 9,
        tz: chrono_tz::Europe::London,
    }
}

#[test]
fn weekly_schedule_picks_next_local_monday() {
    // Arrange: Wednesday 4 March 2026, London is on GMT.
    let schedule = monday_nine_london();

    // Act
    let next = schedule.next_after(at(2026, 3, 4, 12, 0, 0));

    // Assert
    assert_eq!(next, at(2026, 3, 9, 9, 0, 0));
}

#[test]
fn weekly_schedule_tracks_summer_time() {
    let schedule = monday_nine_london();
    // Monday 6 July 2026 09:00 BST is 08:00 UTC.
    assert_eq!(
        schedule.next_after(at(2026, 7, 6, 7, 59, 0)),
        at(2026, 7, 6, 8, 0, 0)
    );
    assert_eq!(
        schedule.next_after(at(2026, 7, 6, 8, 0, 0)),
        at(2026, 7, 13, 8, 0, 0)
    );
}

#[tokio::test(start_paused = true)]
async fn periodic_task_runs_each_period_until_shutdown() {
    // Arrange
    let clock = Arc::new(ManualClock::new(at(2026, 3, 4, 9, 0, 0)));
    let mut scheduler = Scheduler::new(clock);
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    scheduler.spawn("tick", Cadence::Every(Duration::from_secs(60)), move |_now| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    // Act
    tokio::time::sleep(Duration::from_secs(59)).await;
    let before_first_period = runs.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(151)).await;
    let after_three_periods = runs.load(Ordering::SeqCst);
    assert_eq!(scheduler.task_names(), vec!["tick"]);
    scheduler.shutdown().await;
    tokio::time::sleep(Duration::from_secs(600)).await;

    // Assert
    assert_eq!(before_first_period, 0);
    assert_eq!(after_three_periods, 3);
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_weekly_task_before_it_fires() {
    let clock = Arc::new(ManualClock::new(at(2026, 3, 4, 9, 0, 0)));
    let mut scheduler = Scheduler::new(clock);
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    scheduler.spawn("report", Cadence::Weekly(monday_nine_london()), move |_now| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    scheduler.cancellation_token().cancel();
    scheduler.shutdown().await;

    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[test]
fn second_instance_does_not_become_leader() {
    // Arrange
    let first = try_acquire(0).expect("ephemeral port is free");

    // Act
    let second = try_acquire(first.port());

    // Assert
    assert!(first.port() > 0);
    assert!(second.is_none());
}

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::transport::{
    dispatch_alert, dispatch_report, AlertTransport, Attachment, TransportError,
};

const LIMIT: Duration = Duration::from_secs(15);

// Accepts every send and never answers.
#[derive(Default)]
struct StalledRelay {
    calls: AtomicUsize,
}

#[async_trait]
impl AlertTransport for StalledRelay {
    async fn send_alert(&self, _: &str, _: &str, _: &[String]) -> Result<(), TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn send_report(
        &self,
        _: &str,
        _: &[Attachment],
        _: &[String],
    ) -> Result<(), TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

#[derive(Default)]
struct RejectingRelay {
    calls: AtomicUsize,
}

#[async_trait]
impl AlertTransport for RejectingRelay {
    async fn send_alert(&self, _: &str, _: &str, _: &[String]) -> Result<(), TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Rejected(502))
    }

    async fn send_report(
        &self,
        _: &str,
        _: &[Attachment],
        _: &[String],
    ) -> Result<(), TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Rejected(502))
    }
}

fn recipients() -> Vec<String> {
    vec!["ops@example.com".to_string()]
}

#[tokio::test(start_paused = true)]
async fn stalled_alert_is_abandoned_at_the_limit() {
    // Arrange
    let relay = Arc::new(StalledRelay::default());
    let started = Instant::now();

    // Act
    let handle = dispatch_alert(
        relay.clone(),
        "Kiosk offline: Kings Cross".to_string(),
        "body".to_string(),
        recipients(),
        LIMIT,
    );
    let finished = tokio::time::timeout(LIMIT + Duration::from_secs(1), handle).await;

    // Assert
    assert!(matches!(finished, Ok(Ok(()))), "dispatch task should end quietly");
    assert!(started.elapsed() >= LIMIT && started.elapsed() < LIMIT + Duration::from_secs(1));
    assert_eq!(relay.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_report_is_abandoned_at_the_limit() {
    // Arrange
    let relay = Arc::new(StalledRelay::default());
    let attachment = Attachment {
        filename: "report-2026-03-09.json".to_string(),
        content_type: "application/json".to_string(),
        bytes: b"{}".to_vec(),
    };
    let started = Instant::now();

    // Act
    let handle = dispatch_report(
        relay.clone(),
        "Weekly kiosk report".to_string(),
        vec![attachment],
        recipients(),
        LIMIT,
    );
    let finished = tokio::time::timeout(LIMIT + Duration::from_secs(1), handle).await;

    // Assert
    assert!(matches!(finished, Ok(Ok(()))));
    assert!(started.elapsed() >= LIMIT && started.elapsed() < LIMIT + Duration::from_secs(1));
    assert_eq!(relay.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rejected_send_is_logged_and_dropped() {
    // Arrange
    let relay = Arc::new(RejectingRelay::default());

    // Act
    let alert = dispatch_alert(
        relay.clone(),
        "subject".to_string(),
        "body".to_string(),
        recipients(),
        LIMIT,
    )
    .await;
    let report = dispatch_report(relay.clone(), "subject".to_string(), Vec::new(), recipients(), LIMIT).await;

    // Assert
    assert!(alert.is_ok());
    assert!(report.is_ok());
    assert_eq!(relay.calls.load(Ordering::SeqCst), 2);
}

use std::sync::Arc;

use kiosk_core::transport::{dispatch_alert, dispatch_report, SEND_TIMEOUT};
use kiosk_core::{AlertTransport, Attachment};
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct Notifier {
    transport: Arc<dyn AlertTransport>,
    recipients: Vec<String>,
}

impl Notifier {
    pub fn new(transport: Arc<dyn AlertTransport>, recipients: Vec<String>) -> Self {
        Self {
            transport,
            recipients,
        }
    }

    pub fn alert(&self, subject: String, body: String) -> JoinHandle<()> {
        dispatch_alert(
            self.transport.clone(),
            subject,
            body,
            self.recipients.clone(),
            SEND_TIMEOUT,
        )
    }

    pub fn report(&self, subject: String, attachments: Vec<Attachment>) -> JoinHandle<()> {
        dispatch_report(
            self.transport.clone(),
            subject,
            attachments,
            self.recipients.clone(),
            SEND_TIMEOUT,
        )
    }
}

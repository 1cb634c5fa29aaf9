pub mod alerts;
pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod kiosk;
pub mod leader;
pub mod report;
pub mod scheduler;
pub mod snapshot;
pub mod store;
pub mod transport;
pub mod uptime;

pub use alerts::OfflineAlert;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::FleetConfig;
pub use error::FleetError;
pub use identity::{Identity, IdentityChange, RawIdentity};
pub use kiosk::{Heartbeat, KioskRecord, SampleStatus, UptimeSample, VideoStat};
pub use leader::LeaderGuard;
pub use scheduler::{Cadence, Scheduler, WeeklySchedule};
pub use snapshot::{MasterSnapshot, SnapshotLibrary, SnapshotQuery, VideoSummary};
pub use store::{FleetState, FleetStore, HeartbeatOutcome, SnapshotOutcome};
pub use transport::{AlertTransport, Attachment, LogTransport, TransportError, WebhookTransport};

#[cfg(test)]
mod alerts_tests;
#[cfg(test)]
mod identity_tests;
#[cfg(test)]
mod scheduler_tests;
#[cfg(test)]
mod test_support;
#[cfg(test)]
mod transport_tests;

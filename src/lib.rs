//! Home-exit monitor: one-shot "left home" alerting over a noisy position stream.
//!
//! The foreground [`tracker::ForegroundTracker`] and the
//! [`relay::BackgroundRelay`] share one persisted alert flag through a
//! [`store::KeyValueStore`], so a crossing is announced once no matter which
//! execution context observes it.

pub mod config;
pub mod engine;
pub mod error;
pub mod notify;
pub mod persisted;
pub mod position;
pub mod relay;
pub mod stabilizer;
pub mod status;
pub mod store;
pub mod tracker;

pub use config::{MonitorConfig, ReturnPolicy};
pub use engine::{Decision, HomeExitEngine};
pub use error::{MonitorError, MonitorResult};
pub use notify::{Alert, ChannelSink, LogSink, NotificationSink, RecordingSink};
pub use persisted::{AlertState, PersistedState};
pub use position::{HomeAnchor, Position};
pub use relay::{run_background_task, BackgroundRelay};
pub use stabilizer::{haversine_distance, DistanceStabilizer};
pub use status::{AppLifecycle, MonitorStatus, PermissionStatus};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
pub use tracker::{ForegroundTracker, TrackerEvent};

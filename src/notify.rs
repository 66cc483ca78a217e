use crate::config::MonitorConfig;
use chrono::{DateTime, Utc};
use crossbeam::channel::Sender;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// User-visible "left home" notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub title: String,
    pub body: String,
    pub urgent: bool,
    pub distance_meters: f64,
    pub issued_at: DateTime<Utc>,
}

impl Alert {
    /// Render the configured templates for a crossing at `distance_meters`
    pub fn left_home(config: &MonitorConfig, distance_meters: f64, issued_at: DateTime<Utc>) -> Self {
        let rounded = format!("{:.0}", distance_meters);
        Alert {
            title: config.notification_title.replace("{distance}", &rounded),
            body: config.notification_body.replace("{distance}", &rounded),
            urgent: config.urgent,
            distance_meters,
            issued_at,
        }
    }
}

/// Fire-and-forget delivery of alerts to the user.
///
/// Called exactly once per alert decision; implementations must not block
/// (the background relay runs inside a platform callback).
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, alert: &Alert);
}

/// Writes alerts to the log
pub struct LogSink;

impl NotificationSink for LogSink {
    fn deliver(&self, alert: &Alert) {
        log::info!(
            "[ALERT] {} - {} ({:.1} m, urgent={})",
            alert.title,
            alert.body,
            alert.distance_meters,
            alert.urgent
        );
    }
}

/// Forwards alerts over a channel to whoever posts the platform notification
pub struct ChannelSink {
    tx: Sender<Alert>,
}

impl ChannelSink {
    pub fn new(tx: Sender<Alert>) -> Self {
        ChannelSink { tx }
    }
}

impl NotificationSink for ChannelSink {
    fn deliver(&self, alert: &Alert) {
        if self.tx.try_send(alert.clone()).is_err() {
            log::warn!("Alert channel closed or full, dropping alert: {}", alert.title);
        }
    }
}

/// Keeps alerts in memory until the host drains them
#[derive(Default)]
pub struct RecordingSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .map(|mut alerts| std::mem::take(&mut *alerts))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().map(|alerts| alerts.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotificationSink for RecordingSink {
    fn deliver(&self, alert: &Alert) {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(alert.clone());
        }
    }
}

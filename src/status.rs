use crate::engine::HomeExitEngine;
use crate::persisted::AlertState;
use crate::position::HomeAnchor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Whether the host granted location access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    Undetermined,
    Granted,
    Denied,
}

/// Host application visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppLifecycle {
    Foreground,
    Background,
}

/// Snapshot for the UI layer, refreshed after every event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub timestamp: DateTime<Utc>,
    pub permission: PermissionStatus,
    pub lifecycle: AppLifecycle,
    /// Location access is missing; nothing is computed until it's granted
    pub permission_required: bool,
    pub home: Option<HomeAnchor>,
    pub threshold_meters: Option<f64>,
    pub distance_meters: Option<f64>,
    pub inside_home_zone: Option<bool>,
    pub alert_state: Option<AlertState>,
    pub last_alert_at: Option<DateTime<Utc>>,
    pub fixes_received: u64,
    pub fixes_evaluated: u64,
    pub fixes_dropped: u64,
    pub alerts_sent: u64,
}

impl MonitorStatus {
    pub fn new() -> Self {
        Self {
            timestamp: Utc::now(),
            permission: PermissionStatus::Undetermined,
            lifecycle: AppLifecycle::Foreground,
            permission_required: true,
            home: None,
            threshold_meters: None,
            distance_meters: None,
            inside_home_zone: None,
            alert_state: None,
            last_alert_at: None,
            fixes_received: 0,
            fixes_evaluated: 0,
            fixes_dropped: 0,
            alerts_sent: 0,
        }
    }

    /// Re-read persisted state through `engine`; unreadable values show as unknown
    pub fn refresh(&mut self, engine: &HomeExitEngine) {
        self.timestamp = Utc::now();
        self.permission_required = self.permission != PermissionStatus::Granted;
        self.home = engine.home_anchor().ok().flatten();
        self.threshold_meters = engine.threshold().ok();
        self.distance_meters = engine.current_distance();
        self.inside_home_zone = match (self.distance_meters, self.threshold_meters) {
            (Some(d), Some(t)) => Some(d <= t),
            _ => None,
        };
        self.alert_state = engine.alert_state().ok();
        self.last_alert_at = engine.persisted().last_notification_at().ok().flatten();
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl Default for MonitorStatus {
    fn default() -> Self {
        Self::new()
    }
}

use crate::config::is_valid_threshold;
use crate::error::{MonitorError, MonitorResult};
use crate::position::HomeAnchor;
use crate::store::KeyValueStore;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const KEY_HOME_ANCHOR: &str = "home_anchor";
pub const KEY_THRESHOLD: &str = "threshold_meters";
pub const KEY_ALERT_STATE: &str = "alert_state";
pub const KEY_LAST_NOTIFICATION: &str = "last_notification_at";

/// One-shot alert flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    /// No alert sent since the last re-arm
    Armed,
    /// Alert already sent; crossings are suppressed until re-armed
    Fired,
}

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Armed => "armed",
            AlertState::Fired => "fired",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "armed" => Some(AlertState::Armed),
            "fired" => Some(AlertState::Fired),
            _ => None,
        }
    }
}

/// Typed view over the persisted keys.
///
/// Cheap to clone; the foreground tracker and the background relay each hold
/// one over the same store.
#[derive(Clone)]
pub struct PersistedState {
    store: Arc<dyn KeyValueStore>,
}

impl PersistedState {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        PersistedState { store }
    }

    /// Stored home anchor. A malformed value reads as "not configured".
    pub fn home_anchor(&self) -> MonitorResult<Option<HomeAnchor>> {
        let raw = match self.store.get(KEY_HOME_ANCHOR)? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        match serde_json::from_str::<HomeAnchor>(&raw) {
            Ok(anchor) if anchor.as_position().validate().is_ok() => Ok(Some(anchor)),
            Ok(anchor) => {
                log::warn!(
                    "Ignoring out-of-range home anchor ({}, {})",
                    anchor.latitude,
                    anchor.longitude
                );
                Ok(None)
            }
            Err(e) => {
                log::warn!("Ignoring corrupt home anchor: {}", e);
                Ok(None)
            }
        }
    }

    pub fn set_home_anchor(&self, anchor: &HomeAnchor) -> MonitorResult<()> {
        let json = serde_json::to_string(anchor)
            .map_err(|e| MonitorError::Internal(format!("JSON serialization failed: {}", e)))?;
        self.store.set(KEY_HOME_ANCHOR, &json)
    }

    /// Stored threshold. Non-numeric or non-positive values read as absent.
    pub fn threshold(&self) -> MonitorResult<Option<f64>> {
        let raw = match self.store.get(KEY_THRESHOLD)? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        match raw.trim().parse::<f64>() {
            Ok(meters) if is_valid_threshold(meters) => Ok(Some(meters)),
            _ => {
                log::warn!("Ignoring corrupt threshold value '{}'", raw);
                Ok(None)
            }
        }
    }

    pub fn set_threshold(&self, meters: f64) -> MonitorResult<()> {
        if !is_valid_threshold(meters) {
            return Err(MonitorError::InvalidThreshold(meters));
        }
        self.store.set(KEY_THRESHOLD, &meters.to_string())
    }

    /// Current alert flag; an absent key means armed.
    ///
    /// An unreadable flag is an error rather than a default: guessing `Armed`
    /// could produce a duplicate alert.
    pub fn alert_state(&self) -> MonitorResult<AlertState> {
        match self.store.get(KEY_ALERT_STATE)? {
            None => Ok(AlertState::Armed),
            Some(raw) => AlertState::parse(&raw).ok_or_else(|| MonitorError::CorruptValue {
                key: KEY_ALERT_STATE.to_string(),
                reason: format!("unexpected value '{}'", raw),
            }),
        }
    }

    /// Atomically move `armed -> fired`. Returns false if another context got there first.
    pub fn try_fire(&self) -> MonitorResult<bool> {
        let fired = AlertState::Fired.as_str();
        match self.store.get(KEY_ALERT_STATE)?.as_deref() {
            None => self.store.compare_and_swap(KEY_ALERT_STATE, None, fired),
            Some("armed") => self
                .store
                .compare_and_swap(KEY_ALERT_STATE, Some("armed"), fired),
            Some("fired") => Ok(false),
            Some(other) => Err(MonitorError::CorruptValue {
                key: KEY_ALERT_STATE.to_string(),
                reason: format!("unexpected value '{}'", other),
            }),
        }
    }

    pub fn set_alert_state(&self, state: AlertState) -> MonitorResult<()> {
        self.store.set(KEY_ALERT_STATE, state.as_str())
    }

    pub fn last_notification_at(&self) -> MonitorResult<Option<DateTime<Utc>>> {
        let raw = match self.store.get(KEY_LAST_NOTIFICATION)? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(ts) => Ok(Some(ts.with_timezone(&Utc))),
            Err(e) => {
                log::warn!("Ignoring corrupt notification timestamp '{}': {}", raw, e);
                Ok(None)
            }
        }
    }

    pub fn set_last_notification_at(&self, at: DateTime<Utc>) -> MonitorResult<()> {
        self.store.set(
            KEY_LAST_NOTIFICATION,
            &at.to_rfc3339_opts(SecondsFormat::Millis, true),
        )
    }

    pub fn clear_last_notification(&self) -> MonitorResult<()> {
        self.store.remove(KEY_LAST_NOTIFICATION)
    }
}

use crate::error::{MonitorError, MonitorResult};
use serde::{Deserialize, Serialize};

/// Location fix from the platform position stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in meters (smaller is better)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_meters: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_meters: None,
            speed_mps: None,
        }
    }

    pub fn with_accuracy(mut self, accuracy_meters: f64) -> Self {
        self.accuracy_meters = Some(accuracy_meters);
        self
    }

    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }

    /// Reject coordinates a real receiver can't produce
    pub fn validate(&self) -> MonitorResult<()> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(MonitorError::InvalidPosition(format!(
                "latitude {} out of range",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(MonitorError::InvalidPosition(format!(
                "longitude {} out of range",
                self.longitude
            )));
        }
        Ok(())
    }
}

/// Reference origin of the home zone, persisted across restarts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HomeAnchor {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy_meters: Option<f64>,
}

impl HomeAnchor {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_meters: None,
        }
    }

    pub fn as_position(&self) -> Position {
        Position {
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy_meters: self.accuracy_meters,
            speed_mps: None,
        }
    }
}

impl From<Position> for HomeAnchor {
    fn from(pos: Position) -> Self {
        HomeAnchor {
            latitude: pos.latitude,
            longitude: pos.longitude,
            accuracy_meters: pos.accuracy_meters,
        }
    }
}

use crate::error::{MonitorError, MonitorResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_THRESHOLD_METERS: f64 = 10.0;
pub const DEFAULT_COOLDOWN_SECS: u64 = 60;
/// One year
pub const MAX_COOLDOWN_SECS: u64 = 365 * 24 * 60 * 60;

/// What happens to a fired alert when the subject walks back into the home zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnPolicy {
    /// Only an explicit reset, a new home, or a threshold change re-arms
    #[default]
    StayFired,
    /// Re-entry re-arms once the cooldown since the last alert has elapsed
    RearmOnReturn,
}

impl std::str::FromStr for ReturnPolicy {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stay_fired" | "stay-fired" => Ok(ReturnPolicy::StayFired),
            "rearm_on_return" | "rearm-on-return" => Ok(ReturnPolicy::RearmOnReturn),
            other => Err(MonitorError::ConfigError(format!(
                "unknown return policy '{}'",
                other
            ))),
        }
    }
}

/// Monitor configuration.
///
/// Loaded from a JSON file (missing fields take their defaults) and then
/// overridden by `HOME_MONITOR_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Home zone radius used until the user persists one.
    pub threshold_meters: f64,
    pub return_policy: ReturnPolicy,
    /// Minimum time between an alert and a return re-arm (`RearmOnReturn` only).
    pub cooldown_secs: u64,
    /// Foreground tracker turns the first accepted fix into home when none is stored.
    pub adopt_first_fix_as_home: bool,
    /// Run background fixes through their own median window.
    pub relay_smoothing: bool,
    /// Drop fixes whose reported accuracy radius is worse than this.
    pub max_accuracy_meters: Option<f64>,
    /// `{distance}` is replaced with the rounded distance in meters.
    pub notification_title: String,
    pub notification_body: String,
    pub urgent: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            threshold_meters: DEFAULT_THRESHOLD_METERS,
            return_policy: ReturnPolicy::StayFired,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            adopt_first_fix_as_home: true,
            relay_smoothing: false,
            max_accuracy_meters: None,
            notification_title: "Left home".to_string(),
            notification_body: "You are {distance} m away from home.".to_string(),
            urgent: true,
        }
    }
}

impl MonitorConfig {
    /// Load from a JSON file, falling back to defaults when the file doesn't exist
    pub fn load(path: &Path) -> MonitorResult<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config: MonitorConfig = serde_json::from_str(&text)
            .map_err(|e| MonitorError::ConfigError(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `HOME_MONITOR_*` environment overrides
    pub fn with_env_overrides(self) -> MonitorResult<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> MonitorResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("HOME_MONITOR_THRESHOLD_METERS") {
            self.threshold_meters = parse_env("HOME_MONITOR_THRESHOLD_METERS", &v)?;
        }
        if let Some(v) = lookup("HOME_MONITOR_RETURN_POLICY") {
            self.return_policy = v.parse()?;
        }
        if let Some(v) = lookup("HOME_MONITOR_COOLDOWN_SECS") {
            self.cooldown_secs = parse_env("HOME_MONITOR_COOLDOWN_SECS", &v)?;
        }
        if let Some(v) = lookup("HOME_MONITOR_ADOPT_FIRST_FIX") {
            self.adopt_first_fix_as_home = v != "0";
        }
        if let Some(v) = lookup("HOME_MONITOR_RELAY_SMOOTHING") {
            self.relay_smoothing = v != "0";
        }
        if let Some(v) = lookup("HOME_MONITOR_MAX_ACCURACY_METERS") {
            self.max_accuracy_meters = Some(parse_env("HOME_MONITOR_MAX_ACCURACY_METERS", &v)?);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> MonitorResult<()> {
        if !is_valid_threshold(self.threshold_meters) {
            return Err(MonitorError::InvalidThreshold(self.threshold_meters));
        }
        if self.cooldown_secs > MAX_COOLDOWN_SECS {
            return Err(MonitorError::ConfigError(format!(
                "cooldown_secs must be at most {}, got {}",
                MAX_COOLDOWN_SECS, self.cooldown_secs
            )));
        }
        if let Some(acc) = self.max_accuracy_meters {
            if !acc.is_finite() || acc <= 0.0 {
                return Err(MonitorError::ConfigError(format!(
                    "max_accuracy_meters must be positive, got {}",
                    acc
                )));
            }
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Whether a fix is precise enough to be evaluated
    pub fn accepts_accuracy(&self, accuracy_meters: Option<f64>) -> bool {
        match (self.max_accuracy_meters, accuracy_meters) {
            (Some(max), Some(acc)) => acc <= max,
            _ => true,
        }
    }
}

pub fn is_valid_threshold(meters: f64) -> bool {
    meters.is_finite() && meters > 0.0
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> MonitorResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| MonitorError::ConfigError(format!("{}: can't parse '{}'", key, value)))
}

use crate::config::MonitorConfig;
use crate::engine::{Decision, HomeExitEngine};
use crate::error::{MonitorError, MonitorResult};
use crate::notify::{Alert, NotificationSink};
use crate::position::Position;
use crate::status::{AppLifecycle, MonitorStatus, PermissionStatus};
use crate::store::KeyValueStore;
use chrono::Utc;
use std::sync::Arc;

/// Everything the foreground loop reacts to, in delivery order
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    Fix(Position),
    Permission(PermissionStatus),
    Lifecycle(AppLifecycle),
    /// Use the latest accepted fix as the new home
    SetHome,
    /// User reset: re-arm the alert
    Reset,
    SetThreshold(f64),
    Stop,
}

/// Foreground position loop.
///
/// Pulls events from any iterator (a channel receiver, a replayed track) and
/// drives the decision engine. Fixes are ignored while location permission
/// is missing and while the host is backgrounded; the background relay
/// covers the latter.
pub struct ForegroundTracker {
    engine: HomeExitEngine,
    sink: Arc<dyn NotificationSink>,
    last_fix: Option<Position>,
    status: MonitorStatus,
}

impl ForegroundTracker {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        config: MonitorConfig,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let engine = HomeExitEngine::new(store, config);
        let mut status = MonitorStatus::new();
        status.refresh(&engine);
        ForegroundTracker {
            engine,
            sink,
            last_fix: None,
            status,
        }
    }

    pub fn status(&self) -> &MonitorStatus {
        &self.status
    }

    pub fn engine(&self) -> &HomeExitEngine {
        &self.engine
    }

    pub fn reconfigure(&mut self, config: MonitorConfig) {
        self.engine.set_config(config);
        self.status.refresh(&self.engine);
    }

    pub fn is_blocked(&self) -> bool {
        self.status.permission != PermissionStatus::Granted
    }

    /// Consume events until `Stop` or the source runs dry. Returns alerts delivered.
    pub fn run<I>(&mut self, events: I) -> u64
    where
        I: IntoIterator<Item = TrackerEvent>,
    {
        let start = self.status.alerts_sent;
        for event in events {
            if event == TrackerEvent::Stop {
                log::info!("Tracker stopped");
                break;
            }
            if let Err(e) = self.handle(event) {
                log::warn!("Tracker event failed: {}", e);
            }
        }
        self.status.alerts_sent - start
    }

    pub fn handle(&mut self, event: TrackerEvent) -> MonitorResult<Decision> {
        let result = match event {
            TrackerEvent::Fix(position) => Ok(self.on_fix(position)),
            TrackerEvent::Permission(permission) => {
                self.on_permission(permission);
                Ok(Decision::None)
            }
            TrackerEvent::Lifecycle(lifecycle) => {
                self.on_lifecycle(lifecycle);
                Ok(Decision::None)
            }
            TrackerEvent::SetHome => self.set_home_here().map(|_| Decision::None),
            TrackerEvent::Reset => self.engine.rearm().map(|_| Decision::None),
            TrackerEvent::SetThreshold(meters) => {
                self.engine.set_threshold(meters).map(|_| Decision::None)
            }
            TrackerEvent::Stop => Ok(Decision::None),
        };
        self.status.refresh(&self.engine);
        result
    }

    fn on_fix(&mut self, position: Position) -> Decision {
        self.status.fixes_received += 1;

        if self.is_blocked() {
            log::debug!("Location permission missing, ignoring fix");
            self.status.fixes_dropped += 1;
            return Decision::None;
        }
        if self.status.lifecycle == AppLifecycle::Background {
            self.status.fixes_dropped += 1;
            return Decision::None;
        }
        if let Err(e) = position.validate() {
            log::warn!("Dropping fix: {}", e);
            self.status.fixes_dropped += 1;
            return Decision::None;
        }
        if !self.engine.config().accepts_accuracy(position.accuracy_meters) {
            log::debug!("Dropping imprecise fix ({:?} m)", position.accuracy_meters);
            self.status.fixes_dropped += 1;
            return Decision::None;
        }

        self.last_fix = Some(position);

        if self.engine.config().adopt_first_fix_as_home {
            match self.engine.home_anchor() {
                Ok(None) => {
                    if let Err(e) = self.engine.set_home(&position) {
                        log::warn!("Failed to adopt first fix as home: {}", e);
                    }
                    return Decision::None;
                }
                Ok(Some(_)) => {}
                Err(e) => {
                    log::warn!("Can't read home anchor: {}", e);
                    return Decision::None;
                }
            }
        }

        self.status.fixes_evaluated += 1;
        let decision = self.engine.on_position(&position);
        if let Decision::Alert { distance_meters } = decision {
            let alert = Alert::left_home(self.engine.config(), distance_meters, Utc::now());
            self.sink.deliver(&alert);
            self.status.alerts_sent += 1;
        }
        decision
    }

    fn on_permission(&mut self, permission: PermissionStatus) {
        if permission != PermissionStatus::Granted {
            log::warn!("Location permission {:?}, monitoring paused", permission);
        } else if self.status.permission != PermissionStatus::Granted {
            log::info!("Location permission granted");
        }
        self.status.permission = permission;
    }

    fn on_lifecycle(&mut self, lifecycle: AppLifecycle) {
        if lifecycle == self.status.lifecycle {
            return;
        }
        // The relay owns the fixes while hidden; our samples and distance go stale
        self.engine.clear_window();
        log::debug!("Host lifecycle -> {:?}", lifecycle);
        self.status.lifecycle = lifecycle;
    }

    fn set_home_here(&mut self) -> MonitorResult<()> {
        let position = self.last_fix.ok_or(MonitorError::NoFix)?;
        self.engine.set_home(&position)?;
        Ok(())
    }
}

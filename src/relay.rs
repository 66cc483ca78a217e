use crate::config::MonitorConfig;
use crate::engine::{Decision, HomeExitEngine};
use crate::notify::{Alert, NotificationSink};
use crate::position::Position;
use crate::store::KeyValueStore;
use chrono::Utc;
use std::sync::Arc;

/// Runs the home-exit decision while the foreground loop is suspended.
///
/// The platform's background task hands over whatever fixes it collected
/// (typically one every few seconds). The relay reads home, threshold and the
/// alert flag from the same store as the foreground tracker, so a crossing
/// is alerted once no matter which context sees it first.
pub struct BackgroundRelay {
    engine: HomeExitEngine,
    sink: Arc<dyn NotificationSink>,
}

impl BackgroundRelay {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        config: MonitorConfig,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let smoothing = config.relay_smoothing;
        let engine = HomeExitEngine::new(store, config);
        let engine = if smoothing {
            engine
        } else {
            engine.without_smoothing()
        };
        BackgroundRelay { engine, sink }
    }

    /// Evaluate one batch of background fixes. Returns one decision per evaluated fix.
    pub fn on_background_locations(&mut self, positions: &[Position]) -> Vec<Decision> {
        let home = match self.engine.home_anchor() {
            Ok(Some(home)) => home,
            Ok(None) => {
                log::debug!("[RELAY] No home anchor, ignoring {} fix(es)", positions.len());
                return Vec::new();
            }
            Err(e) => {
                log::warn!("[RELAY] Can't read home anchor, skipping batch: {}", e);
                return Vec::new();
            }
        };
        let threshold = match self.engine.threshold() {
            Ok(threshold) => threshold,
            Err(e) => {
                log::warn!("[RELAY] Can't read threshold, skipping batch: {}", e);
                return Vec::new();
            }
        };

        let mut decisions = Vec::with_capacity(positions.len());
        for position in positions {
            if let Err(e) = position.validate() {
                log::warn!("[RELAY] Dropping fix: {}", e);
                continue;
            }
            if !self.engine.config().accepts_accuracy(position.accuracy_meters) {
                log::debug!(
                    "[RELAY] Dropping imprecise fix ({:?} m)",
                    position.accuracy_meters
                );
                continue;
            }

            let decision = self.engine.on_position_update(position, &home, threshold);
            if let Decision::Alert { distance_meters } = decision {
                let alert = Alert::left_home(self.engine.config(), distance_meters, Utc::now());
                self.sink.deliver(&alert);
            }
            decisions.push(decision);
        }
        decisions
    }

    /// Latest distance from home seen by the relay
    pub fn current_distance(&self) -> Option<f64> {
        self.engine.current_distance()
    }
}

/// One-shot relay invocation for hosts that rebuild all state on every wake-up
pub fn run_background_task(
    store: Arc<dyn KeyValueStore>,
    config: MonitorConfig,
    sink: Arc<dyn NotificationSink>,
    positions: &[Position],
) -> Vec<Decision> {
    BackgroundRelay::new(store, config, sink).on_background_locations(positions)
}

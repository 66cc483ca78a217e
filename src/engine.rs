use crate::config::{is_valid_threshold, MonitorConfig, ReturnPolicy};
use crate::error::{MonitorError, MonitorResult};
use crate::persisted::{AlertState, PersistedState};
use crate::position::{HomeAnchor, Position};
use crate::stabilizer::{distance_between, DistanceStabilizer};
use crate::store::KeyValueStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Outcome of evaluating one fix
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    None,
    /// Subject left the home zone; deliver exactly one notification
    Alert { distance_meters: f64 },
}

impl Decision {
    pub fn is_alert(&self) -> bool {
        matches!(self, Decision::Alert { .. })
    }
}

/// One-shot home-exit state machine.
///
/// The alert flag lives in the injected store, not in this struct, so any
/// number of engines (foreground loop, background relay, another process)
/// over the same store behave as a single state machine. The median window
/// is local to each engine.
pub struct HomeExitEngine {
    persisted: PersistedState,
    stabilizer: DistanceStabilizer,
    config: MonitorConfig,
}

impl HomeExitEngine {
    pub fn new(store: Arc<dyn KeyValueStore>, config: MonitorConfig) -> Self {
        HomeExitEngine {
            persisted: PersistedState::new(store),
            stabilizer: DistanceStabilizer::new(),
            config,
        }
    }

    /// Evaluate raw distances directly, for sparse background delivery
    pub fn without_smoothing(mut self) -> Self {
        self.stabilizer = DistanceStabilizer::unfiltered();
        self
    }

    /// Replace the median window, e.g. to resume with known in-zone samples
    pub fn seed_window(&mut self, samples: &[f64]) {
        self.stabilizer.seed(samples);
    }

    /// Drop buffered samples and the last distance without touching persisted state
    pub fn clear_window(&mut self) {
        self.stabilizer.clear();
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Swap in a new configuration; persisted state and the window are kept
    pub fn set_config(&mut self, config: MonitorConfig) {
        self.config = config;
    }

    pub fn persisted(&self) -> &PersistedState {
        &self.persisted
    }

    /// Latest stabilized distance from home, if a fix has been evaluated since the last re-arm
    pub fn current_distance(&self) -> Option<f64> {
        self.stabilizer.last()
    }

    pub fn alert_state(&self) -> MonitorResult<AlertState> {
        self.persisted.alert_state()
    }

    pub fn home_anchor(&self) -> MonitorResult<Option<HomeAnchor>> {
        self.persisted.home_anchor()
    }

    /// Persisted threshold, or the configured default when none is stored
    pub fn threshold(&self) -> MonitorResult<f64> {
        Ok(self
            .persisted
            .threshold()?
            .unwrap_or(self.config.threshold_meters))
    }

    /// Evaluate a fix against the stored home anchor and threshold.
    ///
    /// No anchor means "not configured yet": every fix is a no-op.
    pub fn on_position(&mut self, position: &Position) -> Decision {
        self.on_position_at(position, Utc::now())
    }

    pub fn on_position_at(&mut self, position: &Position, now: DateTime<Utc>) -> Decision {
        let loaded = self
            .persisted
            .home_anchor()
            .and_then(|home| Ok((home, self.threshold()?)));

        match loaded {
            Ok((Some(home), threshold)) => self.on_position_update_at(position, &home, threshold, now),
            Ok((None, _)) => {
                log::debug!("No home anchor configured, skipping fix");
                Decision::None
            }
            Err(e) => {
                log::warn!("Skipping fix, can't load monitor state: {}", e);
                Decision::None
            }
        }
    }

    pub fn on_position_update(
        &mut self,
        position: &Position,
        home: &HomeAnchor,
        threshold_meters: f64,
    ) -> Decision {
        self.on_position_update_at(position, home, threshold_meters, Utc::now())
    }

    /// Storage failures abandon this evaluation (never a duplicate alert);
    /// the next fix retries.
    pub fn on_position_update_at(
        &mut self,
        position: &Position,
        home: &HomeAnchor,
        threshold_meters: f64,
        now: DateTime<Utc>,
    ) -> Decision {
        match self.evaluate(position, home, threshold_meters, now) {
            Ok(decision) => decision,
            Err(e) => {
                log::warn!("Abandoning evaluation: {}", e);
                Decision::None
            }
        }
    }

    fn evaluate(
        &mut self,
        position: &Position,
        home: &HomeAnchor,
        threshold_meters: f64,
        now: DateTime<Utc>,
    ) -> MonitorResult<Decision> {
        let raw = distance_between(position, &home.as_position());
        let stable = self.stabilizer.stabilize(raw);

        if self.persisted.alert_state()? == AlertState::Fired {
            if stable <= threshold_meters {
                self.maybe_rearm_on_return(stable, now)?;
            }
            return Ok(Decision::None);
        }

        if stable <= threshold_meters {
            return Ok(Decision::None);
        }

        if !self.persisted.try_fire()? {
            log::debug!("Alert already claimed by another context");
            return Ok(Decision::None);
        }

        // The flag is authoritative; a lost timestamp only affects cooldown bookkeeping
        if let Err(e) = self.persisted.set_last_notification_at(now) {
            log::warn!("Failed to record notification time: {}", e);
        }

        log::info!(
            "Left home zone: {:.1} m (raw {:.1} m) > {:.1} m",
            stable,
            raw,
            threshold_meters
        );
        Ok(Decision::Alert {
            distance_meters: stable,
        })
    }

    fn maybe_rearm_on_return(&mut self, stable: f64, now: DateTime<Utc>) -> MonitorResult<()> {
        if self.config.return_policy != ReturnPolicy::RearmOnReturn {
            return Ok(());
        }

        if let Some(last) = self.persisted.last_notification_at()? {
            // A cooldown too large for chrono never elapses
            let elapsed = now.signed_duration_since(last);
            match chrono::Duration::from_std(self.config.cooldown()) {
                Ok(cooldown) if elapsed >= cooldown => {}
                _ => return Ok(()),
            }
        }

        self.persisted.set_alert_state(AlertState::Armed)?;
        log::info!("Back inside home zone ({:.1} m), alert re-armed", stable);
        Ok(())
    }

    /// Forget the current episode: arm the alert, clear the window and the
    /// notification timestamp.
    pub fn rearm(&mut self) -> MonitorResult<()> {
        self.persisted.set_alert_state(AlertState::Armed)?;
        self.persisted.clear_last_notification()?;
        self.stabilizer.clear();
        log::info!("Alert re-armed");
        Ok(())
    }

    /// Make `position` the new home and start a fresh episode
    pub fn set_home(&mut self, position: &Position) -> MonitorResult<HomeAnchor> {
        position.validate()?;
        let anchor = HomeAnchor::from(*position);
        self.persisted.set_home_anchor(&anchor)?;
        log::info!(
            "Home set to ({:.6}, {:.6})",
            anchor.latitude,
            anchor.longitude
        );
        self.rearm()?;
        Ok(anchor)
    }

    /// Persist a new radius.
    ///
    /// Re-arms only when the latest distance is inside both the previous and
    /// the new zone. A crossing that happened under the previous radius stays
    /// fired, and a tighter radius never causes a re-fire.
    pub fn set_threshold(&mut self, new_threshold: f64) -> MonitorResult<()> {
        if !is_valid_threshold(new_threshold) {
            return Err(MonitorError::InvalidThreshold(new_threshold));
        }

        let previous = self.threshold()?;
        self.persisted.set_threshold(new_threshold)?;
        log::info!(
            "Threshold changed {:.1} m -> {:.1} m",
            previous,
            new_threshold
        );

        if let Some(distance) = self.current_distance() {
            if distance <= new_threshold && distance <= previous {
                self.rearm()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::persisted::KEY_ALERT_STATE;
    use crate::stabilizer::EARTH_RADIUS_M;
    use crate::store::{JsonFileStore, MemoryStore};
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    pub(crate) fn home() -> HomeAnchor {
        HomeAnchor::new(37.0, -122.0)
    }

    /// Fix `meters` due north of `home`
    pub(crate) fn at_distance(home: &HomeAnchor, meters: f64) -> Position {
        Position::new(
            home.latitude + (meters / EARTH_RADIUS_M).to_degrees(),
            home.longitude,
        )
    }

    fn engine_with(config: MonitorConfig) -> (Arc<MemoryStore>, HomeExitEngine) {
        let store = Arc::new(MemoryStore::new());
        let engine = HomeExitEngine::new(store.clone(), config);
        engine.persisted().set_home_anchor(&home()).unwrap();
        (store, engine)
    }

    fn engine() -> (Arc<MemoryStore>, HomeExitEngine) {
        engine_with(MonitorConfig::default())
    }

    fn feed(engine: &mut HomeExitEngine, distances: &[f64]) -> Vec<Decision> {
        let anchor = home();
        distances
            .iter()
            .map(|&d| engine.on_position(&at_distance(&anchor, d)))
            .collect()
    }

    fn alert_count(decisions: &[Decision]) -> usize {
        decisions.iter().filter(|d| d.is_alert()).count()
    }

    #[test]
    fn test_single_alert_across_repeated_crossings() {
        let (_, mut engine) = engine();
        let decisions = feed(
            &mut engine,
            &[2.0, 3.0, 4.0, 15.0, 16.0, 17.0, 3.0, 2.0, 1.0, 20.0, 25.0, 30.0, 2.0, 18.0, 40.0],
        );
        assert_eq!(alert_count(&decisions), 1);
        assert_eq!(engine.alert_state().unwrap(), AlertState::Fired);
    }

    #[test]
    fn test_no_home_never_alerts() {
        let store = Arc::new(MemoryStore::new());
        let mut engine = HomeExitEngine::new(store, MonitorConfig::default());
        for lat in [0.0, 10.0, 45.0, -60.0] {
            for lon in [-170.0, 0.0, 120.0] {
                assert_eq!(engine.on_position(&Position::new(lat, lon)), Decision::None);
            }
        }
        assert_eq!(engine.current_distance(), None);
    }

    #[test]
    fn test_fix_on_anchor_is_zero_distance() {
        let (_, mut engine) = engine();
        let anchor = home();
        engine.on_position(&anchor.as_position());
        assert_eq!(engine.current_distance(), Some(0.0));
    }

    #[test]
    fn test_median_waits_for_stable_crossing() {
        let (_, mut engine) = engine();
        engine.seed_window(&[2.0, 3.0]);
        let decisions = feed(&mut engine, &[12.0, 3.0, 11.0]);
        assert_eq!(decisions[0], Decision::None);
        assert_eq!(decisions[1], Decision::None);
        match decisions[2] {
            Decision::Alert { distance_meters } => assert_relative_eq!(distance_meters, 11.0, epsilon = 1e-6),
            other => panic!("expected alert, got {:?}", other),
        }
    }

    #[test]
    fn test_scenario_walk_out_of_zone() {
        let (_, mut engine) = engine();
        let decisions = feed(&mut engine, &[2.0, 3.0, 4.0, 12.0, 11.0, 13.0]);
        // Window [3, 4, 12] -> 4, then [4, 12, 11] -> 11
        assert_eq!(&decisions[..4], &[Decision::None; 4]);
        assert!(decisions[4].is_alert());
        assert_eq!(decisions[5], Decision::None);
    }

    #[test]
    fn test_rearm_allows_one_new_alert() {
        let (_, mut engine) = engine();
        assert_eq!(alert_count(&feed(&mut engine, &[20.0, 21.0, 22.0])), 1);

        engine.rearm().unwrap();
        assert_eq!(engine.alert_state().unwrap(), AlertState::Armed);
        assert_eq!(engine.current_distance(), None);
        assert_eq!(engine.persisted().last_notification_at().unwrap(), None);

        assert_eq!(alert_count(&feed(&mut engine, &[25.0, 26.0, 27.0, 28.0])), 1);
    }

    #[test]
    fn test_threshold_widen_while_outside_stays_fired() {
        let (_, mut engine) = engine();
        assert_eq!(alert_count(&feed(&mut engine, &[15.0, 15.0, 15.0])), 1);

        engine.set_threshold(20.0).unwrap();
        assert_eq!(engine.threshold().unwrap(), 20.0);
        assert_eq!(engine.alert_state().unwrap(), AlertState::Fired);
        assert_eq!(feed(&mut engine, &[16.0]), vec![Decision::None]);
        assert_eq!(engine.alert_state().unwrap(), AlertState::Fired);
    }

    #[test]
    fn test_threshold_tighten_after_return_stays_fired() {
        let (_, mut engine) = engine();
        feed(&mut engine, &[15.0, 15.0, 15.0, 8.0, 8.0, 8.0]);
        assert_eq!(engine.alert_state().unwrap(), AlertState::Fired);

        engine.set_threshold(5.0).unwrap();
        assert_eq!(engine.alert_state().unwrap(), AlertState::Fired);
    }

    #[test]
    fn test_threshold_widen_after_return_rearms() {
        let (_, mut engine) = engine();
        feed(&mut engine, &[15.0, 15.0, 15.0, 8.0, 8.0, 8.0]);
        assert_eq!(engine.alert_state().unwrap(), AlertState::Fired);

        engine.set_threshold(20.0).unwrap();
        assert_eq!(engine.alert_state().unwrap(), AlertState::Armed);
        assert_eq!(alert_count(&feed(&mut engine, &[25.0])), 1);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let (_, mut engine) = engine();
        assert_eq!(
            engine.set_threshold(0.0),
            Err(MonitorError::InvalidThreshold(0.0))
        );
        assert!(engine.set_threshold(f64::NAN).is_err());
        assert_eq!(engine.threshold().unwrap(), 10.0);
    }

    #[test]
    fn test_set_home_rearms_and_moves_zone() {
        let (_, mut engine) = engine();
        feed(&mut engine, &[30.0, 30.0, 30.0]);
        assert_eq!(engine.alert_state().unwrap(), AlertState::Fired);

        let new_home = at_distance(&home(), 30.0);
        let anchor = engine.set_home(&new_home).unwrap();
        assert_eq!(engine.home_anchor().unwrap(), Some(anchor));
        assert_eq!(engine.alert_state().unwrap(), AlertState::Armed);
        assert!(engine.current_distance().is_none());

        // Standing on the new home is inside the zone
        assert_eq!(engine.on_position(&new_home), Decision::None);
    }

    #[test]
    fn test_set_home_rejects_invalid_position() {
        let (_, mut engine) = engine();
        assert!(engine.set_home(&Position::new(120.0, 0.0)).is_err());
        assert_eq!(engine.home_anchor().unwrap(), Some(home()));
    }

    #[test]
    fn test_notification_time_recorded() {
        let (_, mut engine) = engine();
        let now = Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap();
        let decision = engine.on_position_at(&at_distance(&home(), 50.0), now);
        assert!(decision.is_alert());
        assert_eq!(engine.persisted().last_notification_at().unwrap(), Some(now));
    }

    #[test]
    fn test_stay_fired_ignores_return() {
        let (_, mut engine) = engine();
        feed(&mut engine, &[15.0, 1.0, 1.0, 1.0, 1.0]);
        assert_eq!(engine.alert_state().unwrap(), AlertState::Fired);
    }

    #[test]
    fn test_rearm_on_return_after_cooldown() {
        let config = MonitorConfig {
            return_policy: ReturnPolicy::RearmOnReturn,
            cooldown_secs: 60,
            ..MonitorConfig::default()
        };
        let (_, mut engine) = engine_with(config);
        let anchor = home();
        let t0 = Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap();
        let at = |secs: i64| t0 + chrono::Duration::seconds(secs);

        assert!(engine.on_position_at(&at_distance(&anchor, 30.0), at(0)).is_alert());

        // Back inside but still cooling down
        for s in 1..=3 {
            engine.on_position_at(&at_distance(&anchor, 1.0), at(s));
        }
        assert_eq!(engine.alert_state().unwrap(), AlertState::Fired);

        // Cooldown elapsed
        engine.on_position_at(&at_distance(&anchor, 1.0), at(61));
        assert_eq!(engine.alert_state().unwrap(), AlertState::Armed);

        let decisions: Vec<Decision> = (62..65)
            .map(|s| engine.on_position_at(&at_distance(&anchor, 40.0), at(s)))
            .collect();
        assert_eq!(alert_count(&decisions), 1);
    }

    #[test]
    fn test_unsmoothed_engine_uses_raw_distance() {
        let store = Arc::new(MemoryStore::new());
        let mut engine =
            HomeExitEngine::new(store.clone(), MonitorConfig::default()).without_smoothing();
        engine.persisted().set_home_anchor(&home()).unwrap();
        engine.seed_window(&[1.0, 1.0]);

        // A smoothing engine would report the median (1 m) here
        assert!(feed(&mut engine, &[30.0])[0].is_alert());
        assert_relative_eq!(engine.current_distance().unwrap(), 30.0, epsilon = 1e-6);
    }

    #[test]
    fn test_read_failure_abandons_without_duplicate() {
        let (store, mut engine) = engine();
        store.set_fail_reads(true);
        assert_eq!(feed(&mut engine, &[30.0, 30.0, 30.0]), vec![Decision::None; 3]);

        store.set_fail_reads(false);
        assert_eq!(alert_count(&feed(&mut engine, &[30.0, 30.0, 30.0])), 1);
    }

    #[test]
    fn test_write_failure_retries_on_next_fix() {
        let (store, mut engine) = engine();
        store.set_fail_writes(true);
        assert_eq!(feed(&mut engine, &[30.0]), vec![Decision::None]);
        assert_eq!(store.get(KEY_ALERT_STATE).unwrap(), None);

        store.set_fail_writes(false);
        let decisions = feed(&mut engine, &[30.0, 30.0, 30.0]);
        assert_eq!(alert_count(&decisions), 1);
        assert!(decisions[0].is_alert());
    }

    #[test]
    fn test_corrupt_alert_flag_never_alerts() {
        let (store, mut engine) = engine();
        store.set(KEY_ALERT_STATE, "???").unwrap();
        assert_eq!(alert_count(&feed(&mut engine, &[50.0, 50.0, 50.0])), 0);
    }

    #[test]
    fn test_engines_sharing_store_alert_once() {
        let store = Arc::new(MemoryStore::new());
        let mut foreground = HomeExitEngine::new(store.clone(), MonitorConfig::default());
        let mut background = HomeExitEngine::new(store.clone(), MonitorConfig::default());
        foreground.persisted().set_home_anchor(&home()).unwrap();

        let far = at_distance(&home(), 40.0);
        let first = foreground.on_position(&far);
        let second = background.on_position(&far);
        assert!(first.is_alert());
        assert_eq!(second, Decision::None);
    }

    #[test]
    fn test_concurrent_engines_alert_once() {
        let store = Arc::new(MemoryStore::new());
        PersistedState::new(store.clone())
            .set_home_anchor(&home())
            .unwrap();
        let far = at_distance(&home(), 40.0);

        let alerts: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let store = store.clone();
                    scope.spawn(move || {
                        let mut engine = HomeExitEngine::new(store, MonitorConfig::default());
                        (0..20).filter(|_| engine.on_position(&far).is_alert()).count()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(alerts, 1);
    }

    #[test]
    fn test_concurrent_engines_alert_once_over_file_store() {
        let dir = std::env::temp_dir().join(format!(
            "home_monitor_engine_race_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("state.json");
        PersistedState::new(Arc::new(JsonFileStore::open(&path).unwrap()))
            .set_home_anchor(&home())
            .unwrap();
        let far = at_distance(&home(), 40.0);

        let alerts: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..6)
                .map(|_| {
                    let path = path.clone();
                    scope.spawn(move || {
                        let store = Arc::new(JsonFileStore::open(&path).unwrap());
                        let mut engine = HomeExitEngine::new(store, MonitorConfig::default());
                        (0..10).filter(|_| engine.on_position(&far).is_alert()).count()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(alerts, 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_clear_window_forgets_distance() {
        let (_, mut engine) = engine();
        feed(&mut engine, &[1.0, 2.0, 2.0]);
        assert!(engine.current_distance().is_some());

        engine.clear_window();
        assert_eq!(engine.current_distance(), None);

        // Fired elsewhere while this engine wasn't looking
        engine.persisted().set_alert_state(AlertState::Fired).unwrap();
        engine.set_threshold(15.0).unwrap();
        assert_eq!(engine.alert_state().unwrap(), AlertState::Fired);
        assert!(!feed(&mut engine, &[55.0])[0].is_alert());
    }

    #[test]
    fn test_oversized_cooldown_never_elapses() {
        let config = MonitorConfig {
            return_policy: ReturnPolicy::RearmOnReturn,
            cooldown_secs: 10_000_000_000_000_000,
            ..MonitorConfig::default()
        };
        let (_, mut engine) = engine_with(config);
        let anchor = home();
        let t0 = Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap();

        assert!(engine.on_position_at(&at_distance(&anchor, 50.0), t0).is_alert());
        let later = t0 + chrono::Duration::days(3650);
        for _ in 0..3 {
            engine.on_position_at(&at_distance(&anchor, 1.0), later);
        }
        assert_eq!(engine.alert_state().unwrap(), AlertState::Fired);
    }

    #[test]
    fn test_failed_rearm_keeps_window() {
        let (store, mut engine) = engine();
        feed(&mut engine, &[30.0, 30.0, 30.0]);
        let distance = engine.current_distance();
        assert!(distance.is_some());

        store.set_fail_writes(true);
        assert!(engine.rearm().is_err());
        assert_eq!(engine.current_distance(), distance);
        assert_eq!(engine.alert_state().unwrap(), AlertState::Fired);
    }
}

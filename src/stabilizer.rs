use crate::position::Position;
use std::collections::VecDeque;

/// Mean earth radius used for all distance-from-home computations
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Number of raw samples the median is taken over
pub const WINDOW_SIZE: usize = 3;

/// Great-circle distance in meters between two fixes (spherical earth).
///
/// Bit-identical coordinates short-circuit to exactly `0.0` so a device
/// sitting on its own home anchor never reports trigonometric noise.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    if lat1.to_bits() == lat2.to_bits() && lon1.to_bits() == lon2.to_bits() {
        return 0.0;
    }

    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

/// Distance between two positions, see [`haversine_distance`]
pub fn distance_between(a: &Position, b: &Position) -> f64 {
    haversine_distance(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Median-of-three filter over raw distance-from-home samples.
///
/// Rejects single-sample GPS jumps: one outlier fix can never move the
/// stabilized value across the zone boundary on its own once the window
/// is full. Until then raw values pass through unchanged.
#[derive(Debug, Clone, Default)]
pub struct DistanceStabilizer {
    window: VecDeque<f64>,
    last: Option<f64>,
    unfiltered: bool,
}

impl DistanceStabilizer {
    pub fn new() -> Self {
        DistanceStabilizer {
            window: VecDeque::with_capacity(WINDOW_SIZE),
            last: None,
            unfiltered: false,
        }
    }

    /// Pass raw distances straight through while still tracking `last()`
    pub fn unfiltered() -> Self {
        DistanceStabilizer {
            unfiltered: true,
            ..Self::new()
        }
    }

    /// Pre-fill the window; only the most recent `WINDOW_SIZE` samples are kept
    pub fn seeded(samples: &[f64]) -> Self {
        let mut stabilizer = Self::new();
        stabilizer.seed(samples);
        stabilizer
    }

    /// Replace the window contents, keeping the filtering mode
    pub fn seed(&mut self, samples: &[f64]) {
        self.clear();
        for &sample in samples {
            self.push(sample);
        }
    }

    /// Push a raw distance and return the stabilized distance
    pub fn stabilize(&mut self, raw_distance: f64) -> f64 {
        self.push(raw_distance);

        let stable = if self.unfiltered || self.window.len() < WINDOW_SIZE {
            raw_distance
        } else {
            median3(self.window[0], self.window[1], self.window[2])
        };
        self.last = Some(stable);
        stable
    }

    /// Most recent stabilized value since construction or the last `clear`
    pub fn last(&self) -> Option<f64> {
        self.last
    }

    fn push(&mut self, raw_distance: f64) {
        self.window.push_back(raw_distance);
        while self.window.len() > WINDOW_SIZE {
            self.window.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.window.clear();
        self.last = None;
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

fn median3(a: f64, b: f64, c: f64) -> f64 {
    let mut values = [a, b, c];
    values.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));
    values[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identical_points_are_exactly_zero() {
        let points = [
            (0.0, 0.0),
            (37.0, -122.0),
            (37.774_912_345_678, -122.419_412_345_678),
            (-33.868_820_1, 151.209_295_7),
            (89.999_999, 179.999_999),
        ];
        for (lat, lon) in points {
            assert_eq!(haversine_distance(lat, lon, lat, lon), 0.0);
        }
    }

    #[test]
    fn test_one_degree_longitude_at_equator() {
        let dist = haversine_distance(0.0, 0.0, 0.0, 1.0);
        // 2πR / 360
        assert_relative_eq!(dist, 111_194.93, epsilon = 0.01);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = Position::new(37.0, -122.0);
        let b = Position::new(37.0001, -122.0001);
        assert_relative_eq!(distance_between(&a, &b), distance_between(&b, &a), epsilon = 1e-9);
    }

    #[test]
    fn test_short_distance_north() {
        // 10 m due north of the anchor
        let lat = (10.0 / EARTH_RADIUS_M).to_degrees();
        let dist = haversine_distance(0.0, 0.0, lat, 0.0);
        assert_relative_eq!(dist, 10.0, epsilon = 1e-6);
    }

    #[test]
    fn test_unfilled_window_passes_raw_values() {
        let mut stabilizer = DistanceStabilizer::new();
        assert_eq!(stabilizer.stabilize(12.0), 12.0);
        assert_eq!(stabilizer.stabilize(3.0), 3.0);
        assert_eq!(stabilizer.len(), 2);
    }

    #[test]
    fn test_median_of_three() {
        let mut stabilizer = DistanceStabilizer::new();
        stabilizer.stabilize(12.0);
        stabilizer.stabilize(3.0);
        assert_eq!(stabilizer.stabilize(11.0), 11.0);
    }

    #[test]
    fn test_window_drops_oldest() {
        let mut stabilizer = DistanceStabilizer::new();
        stabilizer.stabilize(100.0);
        stabilizer.stabilize(1.0);
        stabilizer.stabilize(2.0);
        // Window is now [1, 2, 3]: the 100 m outlier is gone
        assert_eq!(stabilizer.stabilize(3.0), 2.0);
        assert_eq!(stabilizer.len(), 3);
    }

    #[test]
    fn test_single_outlier_rejected() {
        let mut stabilizer = DistanceStabilizer::seeded(&[2.0, 3.0]);
        assert_eq!(stabilizer.stabilize(250.0), 3.0);
    }

    #[test]
    fn test_seeded_keeps_latest_samples() {
        let mut stabilizer = DistanceStabilizer::seeded(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(stabilizer.len(), WINDOW_SIZE);
        // Window [4, 5, 0]
        assert_eq!(stabilizer.stabilize(0.0), 4.0);
    }

    #[test]
    fn test_clear() {
        let mut stabilizer = DistanceStabilizer::seeded(&[1.0, 2.0, 3.0]);
        stabilizer.stabilize(4.0);
        stabilizer.clear();
        assert!(stabilizer.is_empty());
        assert_eq!(stabilizer.last(), None);
        assert_eq!(stabilizer.stabilize(42.0), 42.0);
    }

    #[test]
    fn test_last_tracks_stabilized_value() {
        let mut stabilizer = DistanceStabilizer::seeded(&[2.0, 3.0]);
        assert_eq!(stabilizer.last(), None);
        stabilizer.stabilize(250.0);
        assert_eq!(stabilizer.last(), Some(3.0));
    }

    #[test]
    fn test_unfiltered_passes_raw_values() {
        let mut stabilizer = DistanceStabilizer::unfiltered();
        stabilizer.seed(&[1.0, 1.0]);
        assert_eq!(stabilizer.stabilize(30.0), 30.0);
        assert_eq!(stabilizer.last(), Some(30.0));
        assert_eq!(stabilizer.len(), WINDOW_SIZE);
    }
}

//! Frame-rate value type with tolerant comparisons.
//!
//! Every comparison that decides mode selection goes through the
//! margin-tolerant forms; strict float equality is only used by the total
//! ordering required for sorting.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Tolerance for frame-rate equality, in Hz.
pub const FPS_EPSILON: f64 = 0.001;

/// Refresh cadences common content is authored at, ascending.
pub const KNOWN_FRAME_RATES: [Fps; 6] = [
    Fps(24.0),
    Fps(30.0),
    Fps(45.0),
    Fps(60.0),
    Fps(72.0),
    Fps(90.0),
];

/// A non-negative refresh frequency in Hz.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fps(f64);

impl Fps {
    pub const ZERO: Fps = Fps(0.0);

    /// Upper bound used by unbounded policy ranges.
    pub const MAX: Fps = Fps(f64::MAX);

    pub fn from_hz(hz: f64) -> Self {
        Fps(hz.max(0.0))
    }

    /// Rate equivalent to one frame every `period_ns` nanoseconds.
    pub fn from_period_ns(period_ns: i64) -> Self {
        if period_ns <= 0 {
            return Fps::ZERO;
        }
        Fps(1_000_000_000f64 / period_ns as f64)
    }

    pub fn as_hz(self) -> f64 {
        self.0
    }

    /// Vsync period in nanoseconds, truncated. Zero for a zero rate.
    pub fn period_ns(self) -> i64 {
        if self.0 < FPS_EPSILON {
            return 0;
        }
        (1_000_000_000f64 / self.0) as i64
    }

    /// Tolerant equality: the two rates differ by less than [`FPS_EPSILON`].
    pub fn eq_within_margin(self, other: Fps) -> bool {
        (self.0 - other.0).abs() < FPS_EPSILON
    }

    /// `self` is meaningfully below `other`.
    pub fn less_than_with_margin(self, other: Fps) -> bool {
        self.0 + FPS_EPSILON < other.0
    }

    /// `self` is at or below `other`, tolerating the margin.
    pub fn less_than_or_equal_with_margin(self, other: Fps) -> bool {
        self.0 <= other.0 + FPS_EPSILON
    }

    /// Integer `k` with `self * k ≈ other` within margin, if one exists.
    pub fn divides(self, other: Fps) -> Option<u32> {
        if self.0 < FPS_EPSILON {
            return None;
        }
        let ratio = other.0 / self.0;
        let rounded = ratio.round();
        if rounded >= 1.0 && (other.0 - rounded * self.0).abs() < FPS_EPSILON {
            Some(rounded as u32)
        } else {
            None
        }
    }
}

impl Eq for Fps {}

impl Ord for Fps {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for Fps {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Fps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}Hz", self.0)
    }
}

/// Snap `desired` to the nearest entry of [`KNOWN_FRAME_RATES`].
///
/// Ties break toward the lower rate; anything at or below 24 snaps to 24
/// and anything at or above 90 snaps to 90.
pub fn closest_known_rate(desired: Fps) -> Fps {
    let mut best = KNOWN_FRAME_RATES[0];
    let mut best_distance = (desired.0 - best.0).abs();
    for &known in &KNOWN_FRAME_RATES[1..] {
        let distance = (desired.0 - known.0).abs();
        if distance < best_distance {
            best = known;
            best_distance = distance;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_equality_within_margin() {
        assert!(Fps::from_hz(60.0).eq_within_margin(Fps::from_hz(60.0009)));
        assert!(Fps::from_hz(60.0).eq_within_margin(Fps::from_hz(59.9991)));
        assert!(!Fps::from_hz(60.0).eq_within_margin(Fps::from_hz(60.0011)));
        assert!(!Fps::from_hz(60.0).eq_within_margin(Fps::from_hz(90.0)));
    }

    #[test]
    fn test_period_round_trip() {
        assert_eq!(Fps::from_hz(60.0).period_ns(), 16_666_666);
        assert_eq!(Fps::from_hz(90.0).period_ns(), 11_111_111);
        assert_eq!(Fps::from_hz(120.0).period_ns(), 8_333_333);
        let rate = Fps::from_period_ns(16_666_666);
        assert!(rate.eq_within_margin(Fps::from_hz(60.0)));
    }

    #[test]
    fn test_zero_rate_has_zero_period() {
        assert_eq!(Fps::ZERO.period_ns(), 0);
        assert_eq!(Fps::from_period_ns(0), Fps::ZERO);
        assert_eq!(Fps::from_period_ns(-5), Fps::ZERO);
    }

    #[test]
    fn test_negative_input_clamps_to_zero() {
        assert_eq!(Fps::from_hz(-10.0), Fps::ZERO);
    }

    #[test]
    fn test_ordering() {
        let mut rates = vec![Fps::from_hz(90.0), Fps::from_hz(24.0), Fps::from_hz(60.0)];
        rates.sort();
        assert_eq!(rates[0], Fps::from_hz(24.0));
        assert_eq!(rates[2], Fps::from_hz(90.0));
    }

    #[test]
    fn test_divides() {
        assert_eq!(Fps::from_hz(24.0).divides(Fps::from_hz(72.0)), Some(3));
        assert_eq!(Fps::from_hz(30.0).divides(Fps::from_hz(120.0)), Some(4));
        assert_eq!(Fps::from_hz(60.0).divides(Fps::from_hz(60.0)), Some(1));
        assert_eq!(Fps::from_hz(24.0).divides(Fps::from_hz(70.0)), None);
        assert_eq!(Fps::from_hz(90.0).divides(Fps::from_hz(60.0)), None);
        assert_eq!(Fps::ZERO.divides(Fps::from_hz(60.0)), None);
    }

    #[test]
    fn test_closest_known_rate_buckets() {
        // Below the table and above it clamp to the ends.
        assert_eq!(closest_known_rate(Fps::from_hz(1.0)), Fps::from_hz(24.0));
        assert_eq!(closest_known_rate(Fps::from_hz(23.9)), Fps::from_hz(24.0));
        assert_eq!(closest_known_rate(Fps::from_hz(119.0)), Fps::from_hz(90.0));

        // Bucket boundaries sit at the midpoints; ties go to the lower rate.
        assert_eq!(closest_known_rate(Fps::from_hz(26.9)), Fps::from_hz(24.0));
        assert_eq!(closest_known_rate(Fps::from_hz(27.0)), Fps::from_hz(24.0));
        assert_eq!(closest_known_rate(Fps::from_hz(27.1)), Fps::from_hz(30.0));
        assert_eq!(closest_known_rate(Fps::from_hz(37.5)), Fps::from_hz(30.0));
        assert_eq!(closest_known_rate(Fps::from_hz(37.6)), Fps::from_hz(45.0));
        assert_eq!(closest_known_rate(Fps::from_hz(52.5)), Fps::from_hz(45.0));
        assert_eq!(closest_known_rate(Fps::from_hz(52.6)), Fps::from_hz(60.0));
        assert_eq!(closest_known_rate(Fps::from_hz(66.0)), Fps::from_hz(60.0));
        assert_eq!(closest_known_rate(Fps::from_hz(66.1)), Fps::from_hz(72.0));
        assert_eq!(closest_known_rate(Fps::from_hz(81.0)), Fps::from_hz(72.0));
        assert_eq!(closest_known_rate(Fps::from_hz(81.1)), Fps::from_hz(90.0));
    }

    #[test]
    fn test_known_rates_are_fixed_points() {
        for known in KNOWN_FRAME_RATES {
            assert_eq!(closest_known_rate(known), known);
        }
    }

    proptest! {
        #[test]
        fn prop_closest_known_is_nearest(hz in 0.1f64..200.0) {
            let snapped = closest_known_rate(Fps::from_hz(hz));
            prop_assert!(KNOWN_FRAME_RATES.contains(&snapped));

            // No table entry is strictly closer than the chosen one.
            let chosen_distance = (snapped.as_hz() - hz).abs();
            for known in KNOWN_FRAME_RATES {
                prop_assert!((known.as_hz() - hz).abs() >= chosen_distance - 1e-9);
            }
        }

        #[test]
        fn prop_divides_is_exact(base in 1.0f64..120.0, k in 1u32..8) {
            let rate = Fps::from_hz(base);
            let multiple = Fps::from_hz(base * k as f64);
            prop_assert_eq!(rate.divides(multiple), Some(k));
        }
    }
}

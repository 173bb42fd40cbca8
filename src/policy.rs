//! Mode-selection policy: rate ranges, group-switch permission, and the
//! restrictive merge of the display-manager and override policy layers.

use crate::error::PolicyError;
use crate::fps::Fps;
use crate::mode::{ModeCatalog, ModeId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inclusive refresh-rate interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FpsRange {
    pub min: Fps,
    pub max: Fps,
}

impl FpsRange {
    /// The whole axis; in force until a policy narrows it.
    pub const UNBOUNDED: FpsRange = FpsRange {
        min: Fps::ZERO,
        max: Fps::MAX,
    };

    pub fn new(min: Fps, max: Fps) -> Self {
        Self { min, max }
    }

    /// Margin-tolerant inclusive containment.
    pub fn contains(self, rate: Fps) -> bool {
        self.min.less_than_or_equal_with_margin(rate)
            && rate.less_than_or_equal_with_margin(self.max)
    }

    /// The range admits a single rate.
    pub fn is_single_rate(self) -> bool {
        self.min.eq_within_margin(self.max)
    }

    /// Every rate `other` admits is admitted by `self` too.
    pub fn covers(self, other: FpsRange) -> bool {
        self.min.less_than_or_equal_with_margin(other.min)
            && other.max.less_than_or_equal_with_margin(self.max)
    }

    /// Intersection: the tighter bound wins on each side.
    pub fn intersect(self, other: FpsRange) -> FpsRange {
        FpsRange {
            min: self.min.max(other.min),
            max: self.max.min(other.max),
        }
    }
}

impl fmt::Display for FpsRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Restriction on which catalog modes may be chosen.
///
/// `primary_range` bounds everything except focused explicit layer
/// requests, which may reach anywhere in the wider `app_request_range`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Mode whose group defines the seamless-switch equivalence class.
    pub default_mode_id: ModeId,
    pub primary_range: FpsRange,
    pub app_request_range: FpsRange,
    /// When false, only modes in the default mode's group are candidates.
    pub allow_group_switching: bool,
}

impl Policy {
    /// Unbounded ranges, pinned to `default_mode_id`'s group.
    pub fn new(default_mode_id: ModeId) -> Self {
        Self {
            default_mode_id,
            primary_range: FpsRange::UNBOUNDED,
            app_request_range: FpsRange::UNBOUNDED,
            allow_group_switching: false,
        }
    }

    /// Policy whose app-request range equals the primary range.
    pub fn with_range(default_mode_id: ModeId, range: FpsRange) -> Self {
        Self {
            default_mode_id,
            primary_range: range,
            app_request_range: range,
            allow_group_switching: false,
        }
    }

    pub fn with_ranges(
        default_mode_id: ModeId,
        primary_range: FpsRange,
        app_request_range: FpsRange,
    ) -> Self {
        Self {
            default_mode_id,
            primary_range,
            app_request_range,
            allow_group_switching: false,
        }
    }

    /// Check the policy invariants against a catalog:
    /// the default mode exists, both ranges are ordered, the app-request
    /// range covers the primary range, and at least one mode survives the
    /// primary range after group filtering.
    pub fn validate(&self, catalog: &ModeCatalog) -> Result<(), PolicyError> {
        let default_mode = catalog
            .get(self.default_mode_id)
            .map_err(|_| PolicyError::UnknownMode(self.default_mode_id))?;

        if self.primary_range.max.less_than_with_margin(self.primary_range.min) {
            return Err(PolicyError::BadRange(self.primary_range));
        }
        if self
            .app_request_range
            .max
            .less_than_with_margin(self.app_request_range.min)
        {
            return Err(PolicyError::BadRange(self.app_request_range));
        }
        if !self.app_request_range.covers(self.primary_range) {
            return Err(PolicyError::InconsistentRanges {
                primary: self.primary_range,
                app_request: self.app_request_range,
            });
        }

        let some_mode_selectable = catalog.modes().iter().any(|mode| {
            (self.allow_group_switching || mode.group() == default_mode.group())
                && self.primary_range.contains(mode.refresh_rate())
        });
        if !some_mode_selectable {
            return Err(PolicyError::BadRange(self.primary_range));
        }

        Ok(())
    }

    /// Per-field restrictive merge with an override layer: range bounds
    /// intersect, group switching needs both layers to allow it, and the
    /// override decides the default mode.
    pub fn restricted_by(&self, override_policy: &Policy) -> Policy {
        Policy {
            default_mode_id: override_policy.default_mode_id,
            primary_range: self.primary_range.intersect(override_policy.primary_range),
            app_request_range: self
                .app_request_range
                .intersect(override_policy.app_request_range),
            allow_group_switching: self.allow_group_switching
                && override_policy.allow_group_switching,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::DisplayMode;

    fn mode(id: u32, group: i32, hz: f64) -> DisplayMode {
        DisplayMode::new(ModeId(id), group, Fps::from_hz(hz).period_ns())
    }

    fn range(min: f64, max: f64) -> FpsRange {
        FpsRange::new(Fps::from_hz(min), Fps::from_hz(max))
    }

    fn catalog_60_90() -> ModeCatalog {
        ModeCatalog::new(vec![mode(0, 0, 60.0), mode(1, 0, 90.0)]).unwrap()
    }

    #[test]
    fn test_range_contains_with_margin() {
        let r = range(60.0, 90.0);
        assert!(r.contains(Fps::from_hz(60.0)));
        assert!(r.contains(Fps::from_hz(90.0)));
        assert!(r.contains(Fps::from_hz(59.9995)));
        assert!(r.contains(Fps::from_hz(75.0)));
        assert!(!r.contains(Fps::from_hz(59.99)));
        assert!(!r.contains(Fps::from_hz(90.1)));
    }

    #[test]
    fn test_single_rate_detection() {
        assert!(range(60.0, 60.0).is_single_rate());
        assert!(range(60.0, 60.0005).is_single_rate());
        assert!(!range(60.0, 90.0).is_single_rate());
    }

    #[test]
    fn test_valid_policy() {
        let policy = Policy::with_ranges(ModeId(0), range(60.0, 90.0), range(60.0, 90.0));
        assert!(policy.validate(&catalog_60_90()).is_ok());
    }

    #[test]
    fn test_unknown_default_mode_rejected() {
        let policy = Policy::with_range(ModeId(10), range(60.0, 60.0));
        assert_eq!(
            policy.validate(&catalog_60_90()),
            Err(PolicyError::UnknownMode(ModeId(10)))
        );
    }

    #[test]
    fn test_inverted_primary_range_rejected() {
        let policy = Policy::with_range(ModeId(0), range(90.0, 60.0));
        assert!(matches!(
            policy.validate(&catalog_60_90()),
            Err(PolicyError::BadRange(_))
        ));
    }

    #[test]
    fn test_range_matching_no_mode_rejected() {
        let policy = Policy::with_range(ModeId(0), range(20.0, 40.0));
        assert!(matches!(
            policy.validate(&catalog_60_90()),
            Err(PolicyError::BadRange(_))
        ));
    }

    #[test]
    fn test_app_request_must_cover_primary() {
        let policy = Policy::with_ranges(ModeId(0), range(60.0, 90.0), range(60.0, 60.0));
        assert!(matches!(
            policy.validate(&catalog_60_90()),
            Err(PolicyError::InconsistentRanges { .. })
        ));
    }

    #[test]
    fn test_group_filter_applies_to_validation() {
        // 90Hz sits in another group; with switching disallowed a
        // 90-only primary range has nothing to select.
        let catalog = ModeCatalog::new(vec![mode(0, 0, 60.0), mode(1, 1, 90.0)]).unwrap();
        let policy = Policy::with_range(ModeId(0), range(90.0, 90.0));
        assert!(matches!(
            policy.validate(&catalog),
            Err(PolicyError::BadRange(_))
        ));

        let mut allowed = policy.clone();
        allowed.allow_group_switching = true;
        allowed.app_request_range = range(90.0, 90.0);
        assert!(allowed.validate(&catalog).is_ok());
    }

    #[test]
    fn test_restrictive_merge() {
        let display = Policy {
            default_mode_id: ModeId(0),
            primary_range: range(30.0, 90.0),
            app_request_range: range(30.0, 120.0),
            allow_group_switching: true,
        };
        let override_policy = Policy {
            default_mode_id: ModeId(1),
            primary_range: range(60.0, 120.0),
            app_request_range: range(60.0, 120.0),
            allow_group_switching: false,
        };

        let merged = display.restricted_by(&override_policy);
        assert_eq!(merged.default_mode_id, ModeId(1));
        assert_eq!(merged.primary_range, range(60.0, 90.0));
        assert_eq!(merged.app_request_range, range(60.0, 120.0));
        assert!(!merged.allow_group_switching);
    }

    #[test]
    fn test_policy_serde_round_trip() {
        let policy = Policy {
            default_mode_id: ModeId(3),
            primary_range: range(48.0, 90.0),
            app_request_range: range(30.0, 120.0),
            allow_group_switching: true,
        };
        let json = serde_json::to_string(&policy).unwrap();
        let parsed: Policy = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, policy);
    }
}

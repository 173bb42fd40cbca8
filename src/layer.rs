//! Per-surface frame-rate requirements and global selection signals.

use crate::fps::Fps;
use serde::{Deserialize, Serialize};

/// What a surface asks of the refresh rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerVote {
    /// No opinion; the layer must not influence the choice.
    #[default]
    NoVote,
    /// Pull toward the lowest rate the policy admits.
    Min,
    /// Pull toward the highest rate the policy admits.
    Max,
    /// Rate inferred from the layer's presentation history.
    Heuristic,
    /// Rate set through the app's frame-rate API; any cadence is fine.
    ExplicitDefault,
    /// Rate set through the app's frame-rate API; only exact multiples
    /// play back without judder (24/25/30 fps video).
    ExplicitExactOrMultiple,
}

impl LayerVote {
    /// Votes produced by the explicit app frame-rate API.
    pub fn is_explicit(self) -> bool {
        matches!(
            self,
            LayerVote::ExplicitDefault | LayerVote::ExplicitExactOrMultiple
        )
    }
}

/// How a surface tolerates a mode switch that crosses mode groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Seamlessness {
    /// Only seamless (same-group) switches are acceptable.
    OnlySeamless,
    /// Group-crossing switches are acceptable too.
    SeamedAndSeamless,
    /// No stated preference.
    #[default]
    Default,
}

/// One surface's input to a selection round.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerRequirement {
    /// Diagnostic name carried into trace output.
    pub name: String,
    /// Owning app UID; consumed only by the override planner.
    pub owner_uid: u32,
    pub vote: LayerVote,
    /// Meaningful for `Heuristic` and the explicit votes.
    pub desired_rate: Fps,
    /// Relative importance when score totals are summed.
    pub weight: f32,
    pub seamlessness: Seamlessness,
    /// Unfocused explicit votes are confined to the primary range.
    pub focused: bool,
}

impl Default for LayerRequirement {
    fn default() -> Self {
        Self {
            name: String::new(),
            owner_uid: 0,
            vote: LayerVote::NoVote,
            desired_rate: Fps::ZERO,
            weight: 1.0,
            seamlessness: Seamlessness::Default,
            focused: false,
        }
    }
}

/// Touch/idle flags passed into a selection, and the report of which of
/// them decided it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GlobalSignals {
    pub touch: bool,
    pub idle: bool,
}

impl GlobalSignals {
    pub const NONE: GlobalSignals = GlobalSignals {
        touch: false,
        idle: false,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_votes() {
        assert!(LayerVote::ExplicitDefault.is_explicit());
        assert!(LayerVote::ExplicitExactOrMultiple.is_explicit());
        assert!(!LayerVote::Heuristic.is_explicit());
        assert!(!LayerVote::NoVote.is_explicit());
        assert!(!LayerVote::Min.is_explicit());
        assert!(!LayerVote::Max.is_explicit());
    }

    #[test]
    fn test_vote_serialization_names() {
        let json = serde_json::to_string(&LayerVote::ExplicitExactOrMultiple).unwrap();
        assert_eq!(json, "\"explicit_exact_or_multiple\"");
        let parsed: LayerVote = serde_json::from_str("\"heuristic\"").unwrap();
        assert_eq!(parsed, LayerVote::Heuristic);
    }

    #[test]
    fn test_default_layer_is_inert() {
        let layer = LayerRequirement::default();
        assert_eq!(layer.vote, LayerVote::NoVote);
        assert_eq!(layer.seamlessness, Seamlessness::Default);
        assert!(!layer.focused);
        assert_eq!(layer.weight, 1.0);
    }
}

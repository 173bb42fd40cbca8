//! Hardware display modes and the immutable catalog the panel exposes.

use crate::error::CatalogError;
use crate::fps::Fps;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Stable identifier the display hardware assigns to a mode.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ModeId(pub u32);

impl fmt::Display for ModeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One hardware display configuration.
///
/// Modes sharing a group id can be switched between without a visible
/// glitch; crossing groups is a seamed switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMode {
    id: ModeId,
    group: i32,
    vsync_period_ns: i64,
    resolution: Option<(u32, u32)>,
}

impl DisplayMode {
    pub fn new(id: ModeId, group: i32, vsync_period_ns: i64) -> Self {
        Self {
            id,
            group,
            vsync_period_ns,
            resolution: None,
        }
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Some((width, height));
        self
    }

    pub fn id(&self) -> ModeId {
        self.id
    }

    pub fn group(&self) -> i32 {
        self.group
    }

    pub fn vsync_period_ns(&self) -> i64 {
        self.vsync_period_ns
    }

    pub fn resolution(&self) -> Option<(u32, u32)> {
        self.resolution
    }

    /// Refresh rate derived from the vsync period.
    pub fn refresh_rate(&self) -> Fps {
        Fps::from_period_ns(self.vsync_period_ns)
    }

    /// Whether a switch from `other` to this mode is seamless.
    pub fn same_group(&self, other: &DisplayMode) -> bool {
        self.group == other.group
    }
}

/// The ordered, validated set of modes the panel supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeCatalog {
    modes: Vec<DisplayMode>,
    min_supported: usize,
    max_supported: usize,
}

impl ModeCatalog {
    /// Validate and build the catalog: non-empty, unique ids, positive
    /// periods. Mode order is preserved.
    pub fn new(modes: Vec<DisplayMode>) -> Result<Self, CatalogError> {
        if modes.is_empty() {
            return Err(CatalogError::EmptyCatalog);
        }

        let mut seen = HashSet::new();
        for mode in &modes {
            if mode.vsync_period_ns <= 0 {
                return Err(CatalogError::InvalidPeriod {
                    id: mode.id,
                    period_ns: mode.vsync_period_ns,
                });
            }
            if !seen.insert(mode.id) {
                return Err(CatalogError::DuplicateModeId(mode.id));
            }
        }

        let mut min_supported = 0;
        let mut max_supported = 0;
        for (index, mode) in modes.iter().enumerate() {
            if mode.refresh_rate() < modes[min_supported].refresh_rate() {
                min_supported = index;
            }
            if mode.refresh_rate() > modes[max_supported].refresh_rate() {
                max_supported = index;
            }
        }

        Ok(Self {
            modes,
            min_supported,
            max_supported,
        })
    }

    pub fn get(&self, id: ModeId) -> Result<&DisplayMode, CatalogError> {
        self.modes
            .iter()
            .find(|m| m.id == id)
            .ok_or(CatalogError::UnknownMode(id))
    }

    pub fn contains(&self, id: ModeId) -> bool {
        self.modes.iter().any(|m| m.id == id)
    }

    /// Mode with the lowest refresh rate.
    pub fn min_supported(&self) -> &DisplayMode {
        &self.modes[self.min_supported]
    }

    /// Mode with the highest refresh rate.
    pub fn max_supported(&self) -> &DisplayMode {
        &self.modes[self.max_supported]
    }

    pub fn modes(&self) -> &[DisplayMode] {
        &self.modes
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }
}

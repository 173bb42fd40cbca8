//! Error types for the refresh-rate arbitration engine.
//!
//! Each component gets its own error enum with descriptive messages
//! carrying the offending values, so callers can log them as-is.

use crate::mode::ModeId;
use crate::policy::FpsRange;
use thiserror::Error;

/// Errors raised while building or querying the mode catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("mode catalog is empty")]
    EmptyCatalog,

    #[error("duplicate mode id {0}")]
    DuplicateModeId(ModeId),

    #[error("mode {id} has non-positive vsync period {period_ns}ns")]
    InvalidPeriod { id: ModeId, period_ns: i64 },

    #[error("mode {0} is not in the catalog")]
    UnknownMode(ModeId),
}

/// Errors raised by policy and current-mode updates.
///
/// An update that fails leaves the stored state untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    #[error("mode {0} is not in the catalog")]
    UnknownMode(ModeId),

    #[error("range {0} is inverted or matches no catalog mode")]
    BadRange(FpsRange),

    #[error("app-request range {app_request} does not cover primary range {primary}")]
    InconsistentRanges {
        primary: FpsRange,
        app_request: FpsRange,
    },
}

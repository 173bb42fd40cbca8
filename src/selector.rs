//! Mode arbitration: layer votes + policy + global signals → one mode.
//!
//! The selector reconciles per-surface frame-rate votes against the
//! active policy and the touch/idle signals, scores every candidate mode,
//! and returns the winner together with a report of which signal (if any)
//! decided the round. It also plans per-UID frame-rate overrides and
//! advises the platform kernel idle timer.

use crate::error::PolicyError;
use crate::fps::{closest_known_rate, Fps, FPS_EPSILON};
use crate::layer::{GlobalSignals, LayerRequirement, LayerVote, Seamlessness};
use crate::mode::{DisplayMode, ModeCatalog, ModeId};
use crate::policy::Policy;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Advice to the platform's kernel idle timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleTimerAction {
    TurnOn,
    TurnOff,
    /// The previously emitted action still stands.
    NoChange,
}

/// Period slack for cadence fitting; content clocks drift about this much.
const PERIOD_MARGIN_NS: i64 = 800_000;

/// Cadence fitting stops once a frame would span this many vsyncs.
const MAX_FRAMES_TO_FIT: i64 = 10;

/// Group-crossing candidates pay this factor on cadence scores, so equal
/// fits resolve toward a seamless switch.
const SEAMED_SWITCH_PENALTY: f32 = 0.95;

/// Ratio slack accepted when rounding a rate quotient to a divider.
const DIVIDER_THRESHOLD: f64 = 0.1;

/// Mutable state guarded by the selector's single lock.
struct SelectorState {
    display_policy: Policy,
    override_policy: Option<Policy>,
    current_mode_id: ModeId,
    last_idle_timer_action: Option<IdleTimerAction>,
}

impl SelectorState {
    /// The policy in force: display-manager layer restricted by the
    /// override layer when one is present.
    fn effective_policy(&self) -> Policy {
        match &self.override_policy {
            Some(override_policy) => self.display_policy.restricted_by(override_policy),
            None => self.display_policy.clone(),
        }
    }
}

/// The refresh-rate arbitration engine.
///
/// One writer (policy updates) and many readers (per-frame selections)
/// share it; a single exclusive lock guards the small mutable record and
/// every operation runs to completion without blocking on anything else.
pub struct RefreshRateSelector {
    catalog: ModeCatalog,
    state: Mutex<SelectorState>,
}

impl RefreshRateSelector {
    /// Build a selector over `catalog`, believing `current_mode_id` is
    /// programmed. The initial policy pins the default mode to the
    /// current one and leaves the ranges unbounded.
    pub fn new(catalog: ModeCatalog, current_mode_id: ModeId) -> Result<Self, PolicyError> {
        if !catalog.contains(current_mode_id) {
            return Err(PolicyError::UnknownMode(current_mode_id));
        }
        Ok(Self {
            catalog,
            state: Mutex::new(SelectorState {
                display_policy: Policy::new(current_mode_id),
                override_policy: None,
                current_mode_id,
                last_idle_timer_action: None,
            }),
        })
    }

    pub fn catalog(&self) -> &ModeCatalog {
        &self.catalog
    }

    /// Snapshot of the effective policy.
    pub fn policy(&self) -> Policy {
        self.state().effective_policy()
    }

    /// Replace the display-manager policy layer. Returns whether the
    /// stored policy changed; on error nothing mutates.
    pub fn set_display_policy(&self, policy: Policy) -> Result<bool, PolicyError> {
        let mut state = self.state();
        policy.validate(&self.catalog)?;
        if let Some(override_policy) = &state.override_policy {
            policy.restricted_by(override_policy).validate(&self.catalog)?;
        }
        if state.display_policy == policy {
            return Ok(false);
        }
        debug!(?policy, "display policy replaced");
        state.display_policy = policy;
        // Idle-timer advice is policy-derived; clear the idempotence state.
        state.last_idle_timer_action = None;
        Ok(true)
    }

    /// Install or clear the override policy layer. The merge with the
    /// display-manager layer must stay valid; on error nothing mutates.
    pub fn set_override_policy(&self, policy: Option<Policy>) -> Result<bool, PolicyError> {
        let mut state = self.state();
        if let Some(policy) = &policy {
            policy.validate(&self.catalog)?;
            state.display_policy.restricted_by(policy).validate(&self.catalog)?;
        }
        if state.override_policy == policy {
            return Ok(false);
        }
        debug!(?policy, "override policy replaced");
        state.override_policy = policy;
        state.last_idle_timer_action = None;
        Ok(true)
    }

    /// Record the mode the compositor just programmed.
    pub fn set_current_mode_id(&self, id: ModeId) -> Result<(), PolicyError> {
        if !self.catalog.contains(id) {
            return Err(PolicyError::UnknownMode(id));
        }
        self.state().current_mode_id = id;
        Ok(())
    }

    pub fn current_mode(&self) -> DisplayMode {
        let state = self.state();
        self.resolve(state.current_mode_id).clone()
    }

    /// Lowest-rate mode the panel supports, policy aside.
    pub fn min_supported(&self) -> DisplayMode {
        self.catalog.min_supported().clone()
    }

    /// Highest-rate mode the panel supports, policy aside.
    pub fn max_supported(&self) -> DisplayMode {
        self.catalog.max_supported().clone()
    }

    /// Lowest-rate mode admitted by the primary range.
    pub fn min_by_policy(&self) -> DisplayMode {
        let state = self.state();
        self.min_by_policy_locked(&state)
    }

    /// Highest-rate mode admitted by the primary range.
    pub fn max_by_policy(&self) -> DisplayMode {
        let state = self.state();
        self.max_by_policy_locked(&state)
    }

    /// Pick the best mode for the given layer votes and signals.
    ///
    /// Never fails: degenerate inputs fall back to the primary-range
    /// maximum, and an over-constrained candidate set falls back to the
    /// policy's default mode. The returned signals mark which of
    /// touch/idle decided the round; neither is set on the scored path.
    pub fn best_mode(
        &self,
        layers: &[LayerRequirement],
        signals: GlobalSignals,
    ) -> (DisplayMode, GlobalSignals) {
        let state = self.state();
        self.best_mode_locked(&state, layers, signals)
    }

    fn best_mode_locked(
        &self,
        state: &SelectorState,
        layers: &[LayerRequirement],
        signals: GlobalSignals,
    ) -> (DisplayMode, GlobalSignals) {
        let policy = state.effective_policy();

        // A focused explicit request wins over both global signals.
        let has_focused_explicit = layers.iter().any(|l| l.focused && l.vote.is_explicit());
        if !has_focused_explicit {
            if signals.touch {
                let mode = self.max_by_policy_locked(state);
                debug!(mode = %mode.id(), "touch signal selects the primary-range maximum");
                return (
                    mode,
                    GlobalSignals {
                        touch: true,
                        idle: false,
                    },
                );
            }
            if signals.idle {
                let mode = self.min_by_policy_locked(state);
                debug!(mode = %mode.id(), "idle signal selects the primary-range minimum");
                return (
                    mode,
                    GlobalSignals {
                        touch: false,
                        idle: true,
                    },
                );
            }
        }

        if layers.iter().all(|l| l.vote == LayerVote::NoVote) {
            return (self.max_by_policy_locked(state), GlobalSignals::NONE);
        }

        let current = self.resolve(state.current_mode_id);
        let default_group = self.resolve(policy.default_mode_id).group();
        let only_seamless = layers
            .iter()
            .any(|l| l.seamlessness == Seamlessness::OnlySeamless);
        let any_seamed = layers
            .iter()
            .any(|l| l.seamlessness == Seamlessness::SeamedAndSeamless);

        let mut candidates: Vec<&DisplayMode> = self.catalog.modes().iter().collect();
        if !policy.allow_group_switching {
            candidates.retain(|m| m.group() == default_group);
        }
        if only_seamless {
            candidates.retain(|m| m.group() == current.group());
        }
        // With no seamed request active, return home to the default group.
        // A seamlessness demand takes precedence: going home would itself
        // be a seamed switch.
        if !any_seamed && !only_seamless && current.group() != default_group {
            candidates.retain(|m| m.group() == default_group);
        }
        candidates.sort_by(|a, b| rate_then_id(a, b));

        if candidates.is_empty() {
            warn!(
                default_mode = %policy.default_mode_id,
                "no candidate modes survive the group constraints; using the default mode"
            );
            return (
                self.resolve(policy.default_mode_id).clone(),
                GlobalSignals::NONE,
            );
        }

        let mut totals = vec![0.0f32; candidates.len()];
        for layer in layers {
            if layer.vote == LayerVote::NoVote {
                continue;
            }
            let weight = layer.weight.max(0.0);
            if weight == 0.0 {
                continue;
            }

            // Focused explicit votes may reach the app-request range;
            // everything else stays inside the primary range.
            let range = if layer.focused && layer.vote.is_explicit() {
                policy.app_request_range
            } else {
                policy.primary_range
            };
            let scorable: Vec<usize> = candidates
                .iter()
                .enumerate()
                .filter(|(_, m)| range.contains(m.refresh_rate()))
                .map(|(index, _)| index)
                .collect();
            let (Some(&lowest), Some(&highest)) = (scorable.first(), scorable.last()) else {
                continue;
            };

            match layer.vote {
                LayerVote::Min => totals[lowest] += weight,
                LayerVote::Max => totals[highest] += weight,
                LayerVote::Heuristic
                | LayerVote::ExplicitDefault
                | LayerVote::ExplicitExactOrMultiple => {
                    if layer.desired_rate.as_hz() < FPS_EPSILON {
                        continue;
                    }
                    let desired = if layer.vote == LayerVote::Heuristic {
                        closest_known_rate(layer.desired_rate)
                    } else {
                        layer.desired_rate
                    };
                    for &index in &scorable {
                        let mode = candidates[index];
                        let score = if layer.vote == LayerVote::ExplicitDefault {
                            score_achievable(desired, mode)
                        } else {
                            score_cadence_fit(desired, mode, mode.group() == current.group())
                        };
                        totals[index] += weight * score;
                    }
                }
                LayerVote::NoVote => {}
            }
        }

        if totals.iter().all(|&total| total <= 0.0) {
            debug!("no layer produced a score; falling back to the primary-range maximum");
            return (self.max_by_policy_locked(state), GlobalSignals::NONE);
        }

        // Ties resolve toward the lower rate unless some layer asked for
        // Max, in which case the higher rate wins.
        let prefer_higher = layers.iter().any(|l| l.vote == LayerVote::Max);
        let mut best_index = if prefer_higher { candidates.len() - 1 } else { 0 };
        if prefer_higher {
            for index in (0..candidates.len()).rev() {
                if totals[index] > totals[best_index] {
                    best_index = index;
                }
            }
        } else {
            for index in 0..candidates.len() {
                if totals[index] > totals[best_index] {
                    best_index = index;
                }
            }
        }

        let chosen = candidates[best_index];
        debug!(
            mode = %chosen.id(),
            total = totals[best_index],
            "vote scoring selected a mode"
        );
        (chosen.clone(), GlobalSignals::NONE)
    }

    /// Per-UID frame rates achievable by integer division of the chosen
    /// rate. Only UIDs whose layers all vote explicitly participate: a
    /// non-explicit layer means the app is animating at the display rate
    /// and must not be pinned down. A later layer wins when two explicit
    /// layers share a UID and disagree.
    pub fn frame_rate_overrides(
        &self,
        layers: &[LayerRequirement],
        chosen_rate: Fps,
    ) -> HashMap<u32, Fps> {
        let mut overrides = HashMap::new();
        if chosen_rate.as_hz() < FPS_EPSILON {
            return overrides;
        }

        let mut disqualified = HashSet::new();
        for layer in layers {
            if layer.owner_uid != 0 && !layer.vote.is_explicit() {
                disqualified.insert(layer.owner_uid);
            }
        }

        for layer in layers {
            if !layer.vote.is_explicit() || layer.owner_uid == 0 {
                continue;
            }
            if disqualified.contains(&layer.owner_uid) {
                continue;
            }
            let desired = layer.desired_rate.as_hz();
            if desired <= FPS_EPSILON {
                continue;
            }
            // Largest divider that still reaches the desired rate.
            let divider = ((chosen_rate.as_hz() / (desired - FPS_EPSILON)).floor() as u32).max(1);
            overrides.insert(
                layer.owner_uid,
                Fps::from_hz(chosen_rate.as_hz() / f64::from(divider)),
            );
        }
        overrides
    }

    /// Integer divider `k` of the current mode rate closest to `rate`,
    /// or 0 when `rate` exceeds the current rate or fits no integer
    /// division of it.
    pub fn divider_for(&self, rate: Fps) -> u32 {
        let state = self.state();
        let current_rate = self.resolve(state.current_mode_id).refresh_rate();
        frame_rate_divider(current_rate, rate)
    }

    /// Advise the kernel idle timer.
    ///
    /// The advice derives from the policy shape and the current mode;
    /// any accepted policy update clears the stored last action so the
    /// next call re-derives it, while a repeat call under an unchanged
    /// policy collapses to `NoChange`.
    pub fn idle_timer_action(&self) -> IdleTimerAction {
        let mut state = self.state();
        let policy = state.effective_policy();
        let min_by_policy = self.min_by_policy_locked(&state);

        let device_min = self.catalog.min_supported().refresh_rate();
        let desired = if device_min.less_than_with_margin(min_by_policy.refresh_rate()) {
            // The timer drops the panel to the device minimum, which the
            // policy floor no longer admits.
            IdleTimerAction::TurnOff
        } else if policy.primary_range.is_single_rate()
            && self.current_mode_by_policy(&state, &policy).id() == min_by_policy.id()
        {
            // Pinned at the only admissible rate; leave the timer alone.
            IdleTimerAction::NoChange
        } else {
            IdleTimerAction::TurnOn
        };

        if state.last_idle_timer_action == Some(desired) {
            return IdleTimerAction::NoChange;
        }
        state.last_idle_timer_action = Some(desired);
        desired
    }

    fn state(&self) -> MutexGuard<'_, SelectorState> {
        // The lock only guards plain data; a poisoned guard is still valid.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a mode id already validated on entry.
    fn resolve(&self, id: ModeId) -> &DisplayMode {
        self.catalog
            .get(id)
            .unwrap_or_else(|_| self.catalog.max_supported())
    }

    /// The mode the engine is effectively at under `policy`: the current
    /// mode while the policy still admits it, the default mode otherwise.
    fn current_mode_by_policy(&self, state: &SelectorState, policy: &Policy) -> &DisplayMode {
        let current = self.resolve(state.current_mode_id);
        let default_group = self.resolve(policy.default_mode_id).group();
        let admitted = (policy.allow_group_switching || current.group() == default_group)
            && policy.app_request_range.contains(current.refresh_rate());
        if admitted {
            current
        } else {
            self.resolve(policy.default_mode_id)
        }
    }

    /// Modes admitted by the primary range, honoring the group filter.
    fn primary_modes(&self, policy: &Policy) -> Vec<&DisplayMode> {
        let default_group = self.resolve(policy.default_mode_id).group();
        self.catalog
            .modes()
            .iter()
            .filter(|m| policy.allow_group_switching || m.group() == default_group)
            .filter(|m| policy.primary_range.contains(m.refresh_rate()))
            .collect()
    }

    fn min_by_policy_locked(&self, state: &SelectorState) -> DisplayMode {
        let policy = state.effective_policy();
        self.primary_modes(&policy)
            .into_iter()
            .min_by(|a, b| rate_then_id(a, b))
            .cloned()
            .unwrap_or_else(|| {
                warn!("no mode inside the primary range; using the default mode");
                self.resolve(policy.default_mode_id).clone()
            })
    }

    fn max_by_policy_locked(&self, state: &SelectorState) -> DisplayMode {
        let policy = state.effective_policy();
        self.primary_modes(&policy)
            .into_iter()
            .max_by(|a, b| rate_then_id(a, b))
            .cloned()
            .unwrap_or_else(|| {
                warn!("no mode inside the primary range; using the default mode");
                self.resolve(policy.default_mode_id).clone()
            })
    }
}

fn rate_then_id(a: &DisplayMode, b: &DisplayMode) -> Ordering {
    a.refresh_rate()
        .cmp(&b.refresh_rate())
        .then(a.id().cmp(&b.id()))
}

/// How well `desired` content cadence fits a mode, in [0, 1].
///
/// Exact multiples score full marks regardless of the multiplier; near
/// misses decay with the length of the beat pattern they produce, and
/// content faster than the mode is graded by how much of a frame fits.
fn score_cadence_fit(desired: Fps, mode: &DisplayMode, seamless: bool) -> f32 {
    let layer_period = desired.period_ns();
    let display_period = mode.vsync_period_ns();
    if layer_period <= 0 {
        return 0.0;
    }
    let stickiness = if seamless { 1.0 } else { SEAMED_SWITCH_PENALTY };

    let mut quotient = layer_period / display_period;
    let mut remainder = layer_period % display_period;
    if remainder <= PERIOD_MARGIN_NS || display_period - remainder <= PERIOD_MARGIN_NS {
        quotient += 1;
        remainder = 0;
    }

    if remainder == 0 {
        return stickiness;
    }
    if quotient == 0 {
        // Content outpaces the mode and will drop frames.
        return (layer_period as f32 / display_period as f32)
            * (1.0 / (MAX_FRAMES_TO_FIT as f32 + 1.0));
    }
    // Count vsyncs until the phase error between content and display
    // re-converges; the longer the beat, the worse the fit.
    let mut diff = (remainder - (display_period - remainder)).abs();
    let mut vsyncs = 2i64;
    while diff > PERIOD_MARGIN_NS && vsyncs < MAX_FRAMES_TO_FIT {
        diff -= display_period - diff;
        vsyncs += 1;
    }
    (1.0 / vsyncs as f32) * stickiness
}

/// Rate the content will actually render at on `mode`, assuming its
/// desired period is the fastest it can produce frames: the first integer
/// multiple of the mode period long enough to hold one.
fn score_achievable(desired: Fps, mode: &DisplayMode) -> f32 {
    let layer_period = desired.period_ns();
    let display_period = mode.vsync_period_ns();
    if layer_period <= 0 {
        return 0.0;
    }
    let mut achievable_period = display_period;
    while layer_period > achievable_period + PERIOD_MARGIN_NS {
        achievable_period += display_period;
    }
    (layer_period as f32 / achievable_period as f32).min(1.0)
}

/// Integer divider of `display_rate` closest to `content_rate`, or 0
/// when the content is faster than the display or fits no divider.
fn frame_rate_divider(display_rate: Fps, content_rate: Fps) -> u32 {
    if content_rate.as_hz() < FPS_EPSILON {
        return 0;
    }
    if content_rate.as_hz() > display_rate.as_hz() + FPS_EPSILON {
        return 0;
    }
    let ratio = display_rate.as_hz() / content_rate.as_hz();
    let rounded = ratio.round();
    if (ratio - rounded).abs() > DIVIDER_THRESHOLD {
        return 0;
    }
    rounded as u32
}

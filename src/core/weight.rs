//! Weight: the local learning cell shared by slots, synapses and tract edges.
//!
//! Two rules run on every evaluation:
//! - **Reinforcement**: a fixed step scaled by the bus modulation and
//!   attenuated by inhibition, clamped to `[-1, 1]`.
//! - **Threshold homeostasis**: the threshold is imprinted on the first input
//!   (`|x| * (1 + EPSILON)`) and then drifts with the firing-rate EMA toward
//!   `TARGET_RATE`. It starts strict and relaxes or tightens from there.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Reinforcement stops counting once a weight has been hit this often.
pub const HIT_SATURATION: u32 = 10_000;
/// Imprint margin applied on the first evaluation.
pub const EPSILON: f64 = 0.02;
/// EMA smoothing for the firing rate.
pub const BETA: f64 = 0.01;
/// Threshold adaptation speed.
pub const ETA: f64 = 0.02;
/// Target firing rate for homeostasis.
pub const TARGET_RATE: f64 = 0.05;
/// Floor for the adaptive threshold.
pub const MIN_THRESHOLD: f64 = 1e-6;
/// Default reinforcement step.
pub const DEFAULT_STEP: f64 = 0.001;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Weight {
    step_value: f64,
    strength: f64,
    threshold: f64,
    ema_rate: f64,
    hit_count: u32,
    seen_first: bool,
    frozen: bool,
}

impl Default for Weight {
    fn default() -> Self {
        Self::with_step(DEFAULT_STEP)
    }
}

impl Weight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step(step_value: f64) -> Self {
        Self {
            step_value,
            strength: 0.0,
            threshold: 0.0,
            ema_rate: 0.0,
            hit_count: 0,
            seen_first: false,
            frozen: false,
        }
    }

    /// Nudge strength by one modulated step.
    ///
    /// No-op while frozen or once `HIT_SATURATION` is reached.
    ///
    /// # Arguments
    /// * `modulation` - bus modulation factor, negative values count as zero
    /// * `inhibition` - bus inhibition in `[0, 1]`; 0 leaves the step unchanged
    pub fn reinforce(&mut self, modulation: f64, inhibition: f64) {
        if self.frozen || self.hit_count >= HIT_SATURATION {
            return;
        }
        let attenuation = 1.0 - inhibition.clamp(0.0, 1.0);
        let step = self.step_value * modulation.max(0.0) * attenuation;
        self.strength = smooth_clamp(self.strength + step, -1.0, 1.0);
        self.hit_count += 1;
    }

    /// Evaluate `input` against the adaptive threshold and report whether the
    /// cell fires. Frozen weights answer without mutating anything.
    pub fn update_threshold(&mut self, input: f64) -> bool {
        if self.frozen {
            return input.abs() > self.threshold || self.strength > self.threshold;
        }

        if !self.seen_first {
            self.threshold = input.abs() * (1.0 + EPSILON);
            self.seen_first = true;
        }

        let fired = self.strength > self.threshold;
        let sample = if fired { 1.0 } else { 0.0 };
        self.ema_rate = (1.0 - BETA) * self.ema_rate + BETA * sample;
        self.threshold += ETA * (self.ema_rate - TARGET_RATE);
        self.threshold = self.threshold.max(MIN_THRESHOLD);
        fired
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn unfreeze(&mut self) {
        self.frozen = false;
    }

    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    #[inline]
    pub fn strength(&self) -> f64 {
        self.strength
    }

    #[inline]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    #[inline]
    pub fn ema_rate(&self) -> f64 {
        self.ema_rate
    }

    #[inline]
    pub fn hit_count(&self) -> u32 {
        self.hit_count
    }

    #[inline]
    pub fn seen_first(&self) -> bool {
        self.seen_first
    }

    /// Readiness margin used by neuron readouts.
    #[inline]
    pub fn margin(&self) -> f64 {
        self.strength - self.threshold
    }
}

/// Clamp `value` into `[lo, hi]`. In-range values pass through unchanged.
#[inline]
pub fn smooth_clamp(value: f64, lo: f64, hi: f64) -> f64 {
    if value < lo {
        lo
    } else if value > hi {
        hi
    } else {
        value
    }
}

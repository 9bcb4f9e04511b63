//! Ephemeral per-tick signals.
//!
//! A [`LateralBus`] is owned by one layer and read by every neuron in it; the
//! [`RegionBus`] sits above all layers and drives tract-edge learning. Both
//! reset to neutral on `decay()` and advance their step counter by one.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Neutral inhibition: learning runs at full rate.
pub const NEUTRAL_INHIBITION: f64 = 0.0;
/// Neutral modulation: learning runs at its base step.
pub const NEUTRAL_MODULATION: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LateralBus {
    inhibition: f64,
    modulation: f64,
    current_step: u64,
}

impl Default for LateralBus {
    fn default() -> Self {
        Self::starting_at(0)
    }
}

impl LateralBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus whose step counter starts at `step`, so layers created mid-run
    /// measure staleness on the same clock as their neighbours.
    pub fn starting_at(step: u64) -> Self {
        Self {
            inhibition: NEUTRAL_INHIBITION,
            modulation: NEUTRAL_MODULATION,
            current_step: step,
        }
    }

    pub fn set_inhibition(&mut self, factor: f64) {
        self.inhibition = factor;
    }

    pub fn set_modulation(&mut self, factor: f64) {
        self.modulation = factor;
    }

    #[inline]
    pub fn inhibition(&self) -> f64 {
        self.inhibition
    }

    #[inline]
    pub fn modulation(&self) -> f64 {
        self.modulation
    }

    #[inline]
    pub fn current_step(&self) -> u64 {
        self.current_step
    }

    /// End-of-tick reset.
    pub fn decay(&mut self) {
        self.inhibition = NEUTRAL_INHIBITION;
        self.modulation = NEUTRAL_MODULATION;
        self.current_step += 1;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegionBus {
    inner: LateralBus,
}

impl RegionBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-tick region-wide inhibition pulse.
    pub fn pulse_inhibition(&mut self, factor: f64) {
        self.inner.set_inhibition(factor);
    }

    /// One-tick region-wide modulation pulse.
    pub fn pulse_modulation(&mut self, factor: f64) {
        self.inner.set_modulation(factor);
    }

    #[inline]
    pub fn inhibition(&self) -> f64 {
        self.inner.inhibition()
    }

    #[inline]
    pub fn modulation(&self) -> f64 {
        self.inner.modulation()
    }

    #[inline]
    pub fn current_step(&self) -> u64 {
        self.inner.current_step()
    }

    pub fn decay(&mut self) {
        self.inner.decay();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_resets_to_neutral_and_advances_once() {
        let mut bus = LateralBus::new();
        bus.set_inhibition(0.7);
        bus.set_modulation(1.5);
        bus.set_inhibition(0.9);
        bus.set_modulation(3.0);
        bus.decay();
        assert_eq!(bus.inhibition(), NEUTRAL_INHIBITION);
        assert_eq!(bus.modulation(), NEUTRAL_MODULATION);
        assert_eq!(bus.current_step(), 1);

        // No pulses at all: same result, same single increment.
        bus.decay();
        assert_eq!(bus.current_step(), 2);
        assert_eq!(bus.modulation(), NEUTRAL_MODULATION);
    }

    #[test]
    fn region_bus_pulses_last_one_tick() {
        let mut bus = RegionBus::new();
        bus.pulse_inhibition(0.4);
        bus.pulse_modulation(2.0);
        assert_eq!(bus.inhibition(), 0.4);
        assert_eq!(bus.modulation(), 2.0);
        bus.decay();
        assert_eq!(bus.inhibition(), NEUTRAL_INHIBITION);
        assert_eq!(bus.modulation(), NEUTRAL_MODULATION);
        assert_eq!(bus.current_step(), 1);
    }

    #[test]
    fn late_bus_starts_on_the_shared_clock() {
        let bus = LateralBus::starting_at(42);
        assert_eq!(bus.current_step(), 42);
    }
}

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::weight::Weight;

/// Directed intra-layer edge, owned by its source neuron.
///
/// `target` is an index into the owning layer's neuron arena.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Synapse {
    pub target: usize,
    pub feedback: bool,
    pub weight: Weight,
    /// Layer-bus step of the last reinforcement.
    pub last_used_step: u64,
}

impl Synapse {
    pub fn new(target: usize, feedback: bool, created_step: u64) -> Self {
        Self {
            target,
            feedback,
            weight: Weight::new(),
            last_used_step: created_step,
        }
    }

    /// Reinforce, stamp `step`, and report whether the signal passes.
    #[inline]
    pub fn transmit(&mut self, value: f64, modulation: f64, inhibition: f64, step: u64) -> bool {
        self.weight.reinforce(modulation, inhibition);
        self.last_used_step = step;
        self.weight.update_threshold(value)
    }

    /// Stale (unused for more than `stale_window` steps) and weak.
    #[inline]
    pub fn is_prunable(&self, now: u64, stale_window: u64, min_strength: f64) -> bool {
        let stale = now.saturating_sub(self.last_used_step) > stale_window;
        stale && self.weight.strength() < min_strength
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recently_used_synapse_is_never_prunable() {
        let mut s = Synapse::new(1, false, 0);
        s.transmit(0.5, 1.0, 0.0, 10);
        assert_eq!(s.last_used_step, 10);
        assert!(!s.is_prunable(15, 5, f64::INFINITY));
        assert!(s.is_prunable(16, 5, f64::INFINITY));
        assert!(!s.is_prunable(16, 5, 0.0));
    }
}

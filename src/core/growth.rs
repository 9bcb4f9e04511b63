//! Layer-growth policy and the engine that applies it.
//!
//! Neuron growth is decided inline by each neuron (see `Neuron::on_input`).
//! Layer growth is decided here, once per tick, after metrics are captured.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error;
use crate::region::Region;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GrowthPolicy {
    pub enable_layer_growth: bool,
    /// Hard cap on the region's layer count, edge layers included.
    pub max_layers: usize,
    /// Mean slots per neuron that triggers a new layer.
    pub avg_slots_threshold: f64,
    /// Minimum region steps between two layer additions.
    pub layer_cooldown_ticks: u64,
    /// Percent of neurons at capacity on the fallback path that triggers a
    /// new layer. 0 disables this trigger.
    pub percent_at_cap_fallback_threshold: f64,
    pub new_layer_excitatory_count: usize,
    /// Probability used to wire a new layer from its source layer.
    pub wire_probability: f64,
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self {
            enable_layer_growth: true,
            max_layers: 8,
            avg_slots_threshold: 8.0,
            layer_cooldown_ticks: 50,
            percent_at_cap_fallback_threshold: 0.0,
            new_layer_excitatory_count: 4,
            wire_probability: 1.0,
        }
    }
}

impl GrowthPolicy {
    pub const MAX_LAYERS_LIMIT: usize = 4096;

    pub fn with_max_layers(mut self, max_layers: usize) -> Self {
        self.max_layers = max_layers;
        self
    }

    pub fn with_avg_slots_threshold(mut self, threshold: f64) -> Self {
        self.avg_slots_threshold = threshold;
        self
    }

    pub fn with_layer_cooldown(mut self, ticks: u64) -> Self {
        self.layer_cooldown_ticks = ticks;
        self
    }

    pub fn with_percent_at_cap_fallback(mut self, pct: f64) -> Self {
        self.percent_at_cap_fallback_threshold = pct;
        self
    }

    pub fn with_new_layer_size(mut self, excitatory: usize) -> Self {
        self.new_layer_excitatory_count = excitatory;
        self
    }

    pub fn with_wire_probability(mut self, p: f64) -> Self {
        self.wire_probability = p;
        self
    }

    pub fn with_layer_growth(mut self, enabled: bool) -> Self {
        self.enable_layer_growth = enabled;
        self
    }

    /// Validate the policy, returning an error message if invalid.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_layers == 0 || self.max_layers > Self::MAX_LAYERS_LIMIT {
            return Err("max_layers must be in 1..=4096");
        }
        if !(self.avg_slots_threshold >= 0.0) {
            return Err("avg_slots_threshold must be >= 0");
        }
        if !(0.0..=100.0).contains(&self.percent_at_cap_fallback_threshold) {
            return Err("percent_at_cap_fallback_threshold must be in [0,100]");
        }
        if self.new_layer_excitatory_count == 0 {
            return Err("new_layer_excitatory_count must be > 0");
        }
        if !(0.0..=1.0).contains(&self.wire_probability) {
            return Err("wire_probability must be in [0,1]");
        }
        Ok(())
    }

    /// Whether the region's current pressure asks for a new layer.
    ///
    /// # Arguments
    /// * `mean_slots` - mean slots per neuron across all layers
    /// * `pct_at_cap_fallback` - percent of neurons saturated on the fallback path
    pub fn pressure_exceeded(&self, mean_slots: f64, pct_at_cap_fallback: f64) -> bool {
        let by_slots = mean_slots >= self.avg_slots_threshold;
        let by_fallback = self.percent_at_cap_fallback_threshold > 0.0
            && pct_at_cap_fallback >= self.percent_at_cap_fallback_threshold;
        by_slots || by_fallback
    }

    /// Cap and cooldown check. `last_growth` is `None` before the first addition.
    pub fn allows_layer(&self, layer_count: usize, now: u64, last_growth: Option<u64>) -> bool {
        if !self.enable_layer_growth || layer_count >= self.max_layers {
            return false;
        }
        match last_growth {
            None => true,
            Some(t) => now.saturating_sub(t) >= self.layer_cooldown_ticks,
        }
    }
}

/// Stateless layer-growth logic over a region and a policy.
pub struct GrowthEngine;

impl GrowthEngine {
    /// Add at most one layer, wired from the current last layer.
    ///
    /// Returns the new layer index when growth happened.
    pub fn maybe_grow(region: &mut Region, policy: &GrowthPolicy) -> error::Result<Option<usize>> {
        if !policy.allows_layer(
            region.layers().len(),
            region.current_step(),
            region.last_layer_growth_tick(),
        ) {
            return Ok(None);
        }
        if !policy.pressure_exceeded(region.mean_slots_per_neuron(), region.percent_at_cap_fallback()) {
            return Ok(None);
        }
        let Some(source) = region.layers().len().checked_sub(1) else {
            return Ok(None);
        };
        region.grow_layer_from(source, policy).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(GrowthPolicy::default().validate().is_ok());
        let bad = GrowthPolicy {
            wire_probability: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert!(GrowthPolicy::default().with_max_layers(0).validate().is_err());
    }

    #[test]
    fn fallback_trigger_is_disabled_at_zero() {
        let policy = GrowthPolicy::default();
        assert!(!policy.pressure_exceeded(1.0, 100.0));
        assert!(policy.pressure_exceeded(8.0, 0.0));

        let policy = policy.with_percent_at_cap_fallback(25.0);
        assert!(policy.pressure_exceeded(1.0, 30.0));
        assert!(!policy.pressure_exceeded(1.0, 20.0));
    }

    #[test]
    fn cooldown_and_cap_gate_growth() {
        let policy = GrowthPolicy::default().with_layer_cooldown(10).with_max_layers(3);
        assert!(policy.allows_layer(2, 0, None));
        assert!(!policy.allows_layer(3, 100, None));
        assert!(!policy.allows_layer(2, 15, Some(10)));
        assert!(policy.allows_layer(2, 20, Some(10)));
        assert!(!policy.with_layer_growth(false).allows_layer(0, 0, None));
    }

    #[test]
    fn engine_grows_from_the_last_layer() {
        let mut region = Region::new("growth");
        region.add_layer(2, 0, 0);
        region.add_layer(2, 0, 0);
        let policy = GrowthPolicy::default()
            .with_avg_slots_threshold(0.0)
            .with_new_layer_size(3);

        let grown = GrowthEngine::maybe_grow(&mut region, &policy).expect("growth");
        assert_eq!(grown, Some(2));
        assert_eq!(region.layers()[2].len(), 3);
        let rule = region.mesh_rules().last().expect("rule");
        assert_eq!((rule.source, rule.destination), (1, 2));

        // Cooldown of 50 blocks an immediate second layer.
        assert_eq!(GrowthEngine::maybe_grow(&mut region, &policy).expect("growth"), None);
    }

    #[test]
    fn empty_region_never_grows() {
        let mut region = Region::new("empty");
        let policy = GrowthPolicy::default().with_avg_slots_threshold(0.0);
        assert_eq!(GrowthEngine::maybe_grow(&mut region, &policy).expect("growth"), None);
    }
}

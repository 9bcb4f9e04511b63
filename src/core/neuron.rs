//! Neuron: slot map, outgoing synapses, role, and growth bookkeeping.
//!
//! A neuron never touches other neurons directly. [`Neuron::on_input`] runs the
//! local learning rule and reports whether it fired; the owning layer turns a
//! firing into role-specific effects (propagation, bus pulses, output capture).

use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::bus::LateralBus;
use crate::slot::{GridPos, SlotChoice, SlotConfig, SlotEngine};
use crate::synapse::Synapse;
use crate::weight::Weight;

/// Inhibition level set on the layer bus when an inhibitory neuron fires.
pub const INHIBITION_PULSE: f64 = 0.7;
/// Modulation level set on the layer bus when a modulatory neuron fires.
pub const MODULATION_PULSE: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Role {
    /// Propagates along outgoing synapses.
    Excitatory,
    /// Pulses bus inhibition; no propagation.
    Inhibitory,
    /// Pulses bus modulation; no propagation.
    Modulatory,
    /// Single-slot sensor with an input gain and an emission floor.
    Input { gain: f64, epsilon_fire: f64 },
    /// Sink that records emitted amplitudes for read-back.
    Output { smoothing: f64 },
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Excitatory => "excitatory",
            Role::Inhibitory => "inhibitory",
            Role::Modulatory => "modulatory",
            Role::Input { .. } => "input",
            Role::Output { .. } => "output",
        }
    }
}

/// Scalar summaries of a neuron's slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ReadoutMode {
    /// Best strength-minus-threshold margin.
    #[default]
    Readiness,
    /// Mean firing-rate EMA.
    FiringRate,
    /// Sum of absolute strengths.
    Memory,
}

/// What one `on_input` call produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputResponse {
    pub fired: bool,
    /// Amplitude to propagate (gain-scaled for input neurons).
    pub amplitude: f64,
    /// Fallback streak crossed the growth threshold with the cooldown elapsed.
    /// The cooldown starts only once the owner confirms with
    /// [`Neuron::record_growth`].
    pub wants_growth: bool,
}

impl InputResponse {
    fn quiet(amplitude: f64) -> Self {
        Self {
            fired: false,
            amplitude,
            wants_growth: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct OutputTrace {
    value: f64,
    last_emitted: f64,
    sum: f64,
    count: u32,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Neuron {
    index: usize,
    role: Role,
    slot_limit: Option<usize>,
    slots: BTreeMap<usize, Weight>,
    pub(crate) outgoing: Vec<Synapse>,

    focus_anchor: Option<f64>,
    spatial_anchor: Option<(usize, usize)>,
    last_input: Option<f64>,

    last_slot_id: Option<usize>,
    frozen_slot_id: Option<usize>,
    prefer_slot_once: Option<usize>,

    // Growth bookkeeping.
    last_slot_used_fallback: bool,
    last_missing_slot_id: Option<usize>,
    prev_missing_slot_id: Option<usize>,
    last_delta_pct: f64,
    fallback_streak: u32,
    last_growth_tick: Option<u64>,

    output: OutputTrace,
}

impl Neuron {
    /// A neuron at `index` in its layer. Input and output roles are capped at
    /// one slot; other roles use the layer's `SlotConfig` limit.
    pub fn new(index: usize, role: Role) -> Self {
        let slot_limit = match role {
            Role::Input { .. } | Role::Output { .. } => Some(1),
            _ => None,
        };
        Self {
            index,
            role,
            slot_limit,
            slots: BTreeMap::new(),
            outgoing: Vec::new(),
            focus_anchor: None,
            spatial_anchor: None,
            last_input: None,
            last_slot_id: None,
            frozen_slot_id: None,
            prefer_slot_once: None,
            last_slot_used_fallback: false,
            last_missing_slot_id: None,
            prev_missing_slot_id: None,
            last_delta_pct: 0.0,
            fallback_streak: 0,
            last_growth_tick: None,
            output: OutputTrace::default(),
        }
    }

    /// Override the slot capacity for this neuron only.
    pub fn with_slot_limit(mut self, limit: usize) -> Self {
        self.slot_limit = Some(limit);
        self
    }

    /// Fresh neuron with the same role and capacity, for growth.
    pub fn sibling(&self, index: usize) -> Self {
        let mut n = Neuron::new(index, self.role);
        n.slot_limit = self.slot_limit;
        n
    }

    #[inline]
    fn effective_limit(&self, cfg: &SlotConfig) -> usize {
        self.slot_limit.unwrap_or(cfg.slot_limit)
    }

    /// Route `value` to a slot, learn, and report whether the neuron fired.
    pub fn on_input(&mut self, value: f64, bus: &LateralBus, cfg: &SlotConfig) -> InputResponse {
        if let Role::Input { gain, epsilon_fire } = self.role {
            return self.on_sensor_input(value, gain, epsilon_fire, bus);
        }
        let anchor = *self.focus_anchor.get_or_insert(value);
        self.learn(value, bus, cfg, |slots, limit| {
            SlotEngine::select_or_create(slots, anchor, value, limit, cfg)
        })
    }

    /// As [`Neuron::on_input`], but the slot is chosen by where the input
    /// came from. The first position seen becomes the spatial anchor.
    pub fn on_input_2d(&mut self, value: f64, at: GridPos, bus: &LateralBus, cfg: &SlotConfig) -> InputResponse {
        if let Role::Input { gain, epsilon_fire } = self.role {
            return self.on_sensor_input(value, gain, epsilon_fire, bus);
        }
        let anchor = *self.spatial_anchor.get_or_insert((at.row, at.col));
        self.learn(value, bus, cfg, |slots, limit| {
            SlotEngine::select_or_create_2d(slots, anchor, at, limit, cfg)
        })
    }

    fn learn(
        &mut self,
        value: f64,
        bus: &LateralBus,
        cfg: &SlotConfig,
        select: impl FnOnce(&mut BTreeMap<usize, Weight>, usize) -> SlotChoice,
    ) -> InputResponse {
        let limit = self.effective_limit(cfg);

        let hinted = self
            .prefer_slot_once
            .take()
            .filter(|id| self.slots.contains_key(id));
        let slot_id = match hinted {
            Some(id) => {
                self.last_slot_used_fallback = false;
                self.last_missing_slot_id = None;
                id
            }
            None => {
                let choice = select(&mut self.slots, limit);
                self.last_slot_used_fallback = choice.used_fallback;
                self.last_missing_slot_id = choice.used_fallback.then_some(choice.desired_id);
                self.last_delta_pct = choice.delta_pct;
                choice.slot_id
            }
        };
        self.last_slot_id = Some(slot_id);

        let fired = match self.slots.get_mut(&slot_id) {
            Some(slot) => {
                slot.reinforce(bus.modulation(), bus.inhibition());
                slot.update_threshold(value)
            }
            None => false,
        };
        self.last_input = Some(value);

        let wants_growth = self.track_fallback(limit, bus.current_step(), cfg);
        InputResponse {
            fired,
            amplitude: value,
            wants_growth,
        }
    }

    fn on_sensor_input(
        &mut self,
        value: f64,
        gain: f64,
        epsilon_fire: f64,
        bus: &LateralBus,
    ) -> InputResponse {
        let amplified = gain * value;
        self.output.value = amplified;
        self.last_input = Some(value);
        if amplified.abs() < epsilon_fire {
            return InputResponse::quiet(amplified);
        }

        self.focus_anchor.get_or_insert(amplified);
        self.last_slot_id = Some(0);
        let slot = self.slots.entry(0).or_default();
        slot.reinforce(bus.modulation(), bus.inhibition());
        InputResponse {
            fired: slot.update_threshold(amplified),
            amplitude: amplified,
            wants_growth: false,
        }
    }

    /// Update the fallback streak; true when the owner should try to grow.
    fn track_fallback(&mut self, limit: usize, now: u64, cfg: &SlotConfig) -> bool {
        if !cfg.neuron_growth_active() {
            return false;
        }

        let at_capacity = limit > 0 && self.slots.len() >= limit;
        if !(at_capacity && self.last_slot_used_fallback) {
            self.reset_streak();
            return false;
        }
        if cfg.min_delta_pct_for_growth > 0.0 && self.last_delta_pct < cfg.min_delta_pct_for_growth {
            self.fallback_streak = 0;
            self.prev_missing_slot_id = None;
            return false;
        }

        if cfg.fallback_growth_requires_same_missing_slot {
            if self.prev_missing_slot_id == self.last_missing_slot_id {
                self.fallback_streak += 1;
            } else {
                self.fallback_streak = 1;
                self.prev_missing_slot_id = self.last_missing_slot_id;
            }
        } else {
            self.fallback_streak += 1;
        }

        if self.fallback_streak < cfg.fallback_growth_threshold.max(1) {
            return false;
        }

        let cooled = match self.last_growth_tick {
            None => true,
            Some(t) => now.saturating_sub(t) >= cfg.neuron_growth_cooldown_ticks,
        };
        // The streak restarts whether or not growth is allowed.
        self.reset_streak();
        cooled
    }

    /// The owner accepted this neuron's growth request at step `now`; the
    /// cooldown runs from here.
    pub fn record_growth(&mut self, now: u64) {
        self.last_growth_tick = Some(now);
    }

    fn reset_streak(&mut self) {
        self.fallback_streak = 0;
        self.prev_missing_slot_id = None;
        self.last_missing_slot_id = None;
    }

    /// Record an emitted amplitude. Only input and output roles keep it.
    pub fn on_output(&mut self, amplitude: f64) {
        match self.role {
            Role::Output { .. } => {
                self.output.last_emitted = amplitude;
                self.output.sum += amplitude;
                self.output.count += 1;
            }
            Role::Input { .. } => self.output.value = amplitude,
            _ => {}
        }
    }

    /// Publish this tick's mean emission, or decay toward zero if silent.
    pub fn end_tick(&mut self) {
        if let Role::Output { smoothing } = self.role {
            let trace = &mut self.output;
            if trace.count > 0 {
                trace.value = trace.sum / f64::from(trace.count);
                trace.sum = 0.0;
                trace.count = 0;
            } else {
                trace.value *= 1.0 - smoothing.clamp(0.0, 1.0);
            }
        }
    }

    /// Connect to `target` (an index in the same layer).
    pub fn connect(&mut self, target: usize, feedback: bool, step: u64) -> usize {
        self.outgoing.push(Synapse::new(target, feedback, step));
        self.outgoing.len() - 1
    }

    /// Drop outgoing synapses that are both stale and weak.
    pub fn prune_synapses(&mut self, now: u64, stale_window: u64, min_strength: f64) -> usize {
        let before = self.outgoing.len();
        self.outgoing
            .retain(|s| !s.is_prunable(now, stale_window, min_strength));
        before - self.outgoing.len()
    }

    /// Freeze the most recently used slot. Returns false if there is none.
    pub fn freeze_last_slot(&mut self) -> bool {
        let Some(id) = self.last_slot_id else {
            return false;
        };
        match self.slots.get_mut(&id) {
            Some(w) => {
                w.freeze();
                self.frozen_slot_id = Some(id);
                true
            }
            None => false,
        }
    }

    /// Unfreeze the frozen (or last used) slot and steer the next input to it once.
    pub fn unfreeze_last_slot(&mut self) -> bool {
        let Some(id) = self.frozen_slot_id.or(self.last_slot_id) else {
            return false;
        };
        match self.slots.get_mut(&id) {
            Some(w) => {
                w.unfreeze();
                self.prefer_slot_once = Some(id);
                self.frozen_slot_id = None;
                true
            }
            None => false,
        }
    }

    pub fn neuron_value(&self, mode: ReadoutMode) -> f64 {
        if self.slots.is_empty() {
            return 0.0;
        }
        match mode {
            ReadoutMode::Readiness => self
                .slots
                .values()
                .map(Weight::margin)
                .fold(f64::NEG_INFINITY, f64::max),
            ReadoutMode::FiringRate => {
                self.slots.values().map(Weight::ema_rate).sum::<f64>() / self.slots.len() as f64
            }
            ReadoutMode::Memory => self.slots.values().map(|w| w.strength().abs()).sum(),
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    #[inline]
    pub fn slots(&self) -> &BTreeMap<usize, Weight> {
        &self.slots
    }

    #[inline]
    pub fn outgoing(&self) -> &[Synapse] {
        &self.outgoing
    }

    #[inline]
    pub fn slot_limit(&self) -> Option<usize> {
        self.slot_limit
    }

    #[inline]
    pub fn focus_anchor(&self) -> Option<f64> {
        self.focus_anchor
    }

    #[inline]
    pub fn spatial_anchor(&self) -> Option<(usize, usize)> {
        self.spatial_anchor
    }

    #[inline]
    pub fn last_input(&self) -> Option<f64> {
        self.last_input
    }

    #[inline]
    pub fn last_slot_id(&self) -> Option<usize> {
        self.last_slot_id
    }

    #[inline]
    pub fn last_slot_used_fallback(&self) -> bool {
        self.last_slot_used_fallback
    }

    #[inline]
    pub fn fallback_streak(&self) -> u32 {
        self.fallback_streak
    }

    #[inline]
    pub fn last_growth_tick(&self) -> Option<u64> {
        self.last_growth_tick
    }

    /// At capacity under `cfg` and the last selection fell back.
    pub fn is_saturated(&self, cfg: &SlotConfig) -> bool {
        let limit = self.effective_limit(cfg);
        limit > 0 && self.slots.len() >= limit && self.last_slot_used_fallback
    }

    /// Published output (output role) or last amplified input (input role).
    #[inline]
    pub fn output_value(&self) -> f64 {
        self.output.value
    }

    #[inline]
    pub fn last_emitted(&self) -> f64 {
        self.output.last_emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SlotConfig {
        SlotConfig::default()
    }

    #[test]
    fn anchor_binning_opens_exactly_two_slots() {
        let bus = LateralBus::new();
        let mut n = Neuron::new(0, Role::Excitatory);
        n.on_input(100.0, &bus, &cfg());
        n.on_input(110.0, &bus, &cfg());
        assert_eq!(n.slots().len(), 2);
        assert_eq!(n.focus_anchor(), Some(100.0));

        n.on_input(112.0, &bus, &cfg());
        assert_eq!(n.last_slot_id(), Some(1));
        assert_eq!(n.slots().len(), 2);
        assert_eq!(n.last_input(), Some(112.0));
    }

    #[test]
    fn unfreeze_steers_next_input_to_the_frozen_slot() {
        let bus = LateralBus::new();
        let mut n = Neuron::new(0, Role::Excitatory);
        n.on_input(10.0, &bus, &cfg());
        assert!(n.freeze_last_slot());
        assert!(n.slots()[&0].is_frozen());

        // Frozen slot ignores learning.
        let before = n.slots()[&0].clone();
        n.on_input(10.0, &bus, &cfg());
        assert_eq!(n.slots()[&0], before);

        assert!(n.unfreeze_last_slot());
        // 50% away would normally open bucket 5.
        n.on_input(15.0, &bus, &cfg());
        assert_eq!(n.last_slot_id(), Some(0));
        assert!(!n.slots()[&0].is_frozen());

        // The hint is one-shot.
        n.on_input(15.0, &bus, &cfg());
        assert_eq!(n.last_slot_id(), Some(5));
    }

    #[test]
    fn freeze_without_history_is_refused() {
        let mut n = Neuron::new(0, Role::Excitatory);
        assert!(!n.freeze_last_slot());
        assert!(!n.unfreeze_last_slot());
    }

    #[test]
    fn sustained_fallback_requests_growth_once_per_threshold() {
        let bus = LateralBus::new();
        let cfg = SlotConfig::default()
            .with_slot_limit(1)
            .with_fallback_growth_threshold(3);
        let mut n = Neuron::new(0, Role::Excitatory);
        n.on_input(1.0, &bus, &cfg);

        let mut requests = 0;
        for _ in 0..6 {
            if n.on_input(5.0, &bus, &cfg).wants_growth {
                requests += 1;
            }
        }
        assert_eq!(requests, 2);
        assert_eq!(n.fallback_streak(), 0);
        // Nobody confirmed the requests, so no cooldown is running.
        assert_eq!(n.last_growth_tick(), None);
    }

    #[test]
    fn cooldown_suppresses_repeat_requests() {
        let mut bus = LateralBus::new();
        let cfg = SlotConfig::default()
            .with_slot_limit(1)
            .with_fallback_growth_threshold(1)
            .with_neuron_growth_cooldown(10);
        let mut n = Neuron::new(0, Role::Excitatory);
        n.on_input(1.0, &bus, &cfg);
        assert!(n.on_input(9.0, &bus, &cfg).wants_growth);
        n.record_growth(bus.current_step());
        bus.decay();
        assert!(!n.on_input(9.0, &bus, &cfg).wants_growth);
        for _ in 0..10 {
            bus.decay();
        }
        assert!(n.on_input(9.0, &bus, &cfg).wants_growth);
    }

    #[test]
    fn unconfirmed_request_starts_no_cooldown() {
        let mut bus = LateralBus::new();
        let cfg = SlotConfig::default()
            .with_slot_limit(1)
            .with_fallback_growth_threshold(1)
            .with_neuron_growth_cooldown(10);
        let mut n = Neuron::new(0, Role::Excitatory);
        n.on_input(1.0, &bus, &cfg);
        assert!(n.on_input(9.0, &bus, &cfg).wants_growth);
        bus.decay();
        assert!(n.on_input(9.0, &bus, &cfg).wants_growth);
        assert_eq!(n.last_growth_tick(), None);
    }

    #[test]
    fn spatial_input_bins_by_position() {
        let bus = LateralBus::new();
        let cfg = SlotConfig::default().with_spatial(true);
        let grid = |row, col| GridPos {
            row,
            col,
            height: 4,
            width: 4,
        };
        let mut n = Neuron::new(0, Role::Excitatory);
        n.on_input_2d(1.0, grid(1, 1), &bus, &cfg);
        assert_eq!(n.spatial_anchor(), Some((1, 1)));
        assert_eq!(n.last_slot_id(), Some(0));

        // Same value, one column over: 25% of the width is column bin 2.
        n.on_input_2d(1.0, grid(1, 2), &bus, &cfg);
        assert_eq!(n.last_slot_id(), Some(2));
        assert_eq!(n.slots().len(), 2);
        assert_eq!(n.spatial_anchor(), Some((1, 1)));
        assert_eq!(n.focus_anchor(), None);
    }

    #[test]
    fn spatial_fallback_feeds_the_growth_streak() {
        let bus = LateralBus::new();
        let cfg = SlotConfig::default()
            .with_slot_limit(1)
            .with_fallback_growth_threshold(2);
        let grid = |row| GridPos {
            row,
            col: 0,
            height: 4,
            width: 4,
        };
        let mut n = Neuron::new(0, Role::Excitatory);
        n.on_input_2d(0.5, grid(0), &bus, &cfg);
        assert!(!n.on_input_2d(0.5, grid(3), &bus, &cfg).wants_growth);
        assert!(n.last_slot_used_fallback());
        assert!(n.on_input_2d(0.5, grid(3), &bus, &cfg).wants_growth);
        assert_eq!(n.slots().len(), 1);
    }

    #[test]
    fn same_missing_slot_guard_ignores_oscillation() {
        let bus = LateralBus::new();
        let cfg = SlotConfig::default()
            .with_slot_limit(2)
            .with_fallback_growth_threshold(2)
            .with_same_missing_slot_guard(true);
        let mut n = Neuron::new(0, Role::Excitatory);
        n.on_input(10.0, &bus, &cfg);
        n.on_input(11.0, &bus, &cfg);

        // Alternate between buckets 3 and 6: the streak keeps restarting.
        for i in 0..10 {
            let v = if i % 2 == 0 { 13.0 } else { 16.0 };
            assert!(!n.on_input(v, &bus, &cfg).wants_growth);
        }
        assert!(!n.on_input(13.0, &bus, &cfg).wants_growth);
        assert!(n.on_input(13.0, &bus, &cfg).wants_growth);
    }

    #[test]
    fn min_delta_filters_small_fallbacks() {
        let bus = LateralBus::new();
        let cfg = SlotConfig::default()
            .with_slot_limit(1)
            .with_fallback_growth_threshold(1)
            .with_min_delta_pct_for_growth(80.0);
        let mut n = Neuron::new(0, Role::Excitatory);
        n.on_input(10.0, &bus, &cfg);
        assert!(!n.on_input(15.0, &bus, &cfg).wants_growth);
        assert!(n.on_input(30.0, &bus, &cfg).wants_growth);
    }

    #[test]
    fn in_range_input_resets_the_streak() {
        let bus = LateralBus::new();
        let cfg = SlotConfig::default()
            .with_slot_limit(1)
            .with_fallback_growth_threshold(3);
        let mut n = Neuron::new(0, Role::Excitatory);
        n.on_input(1.0, &bus, &cfg);
        n.on_input(5.0, &bus, &cfg);
        n.on_input(5.0, &bus, &cfg);
        assert_eq!(n.fallback_streak(), 2);
        n.on_input(1.0, &bus, &cfg);
        assert_eq!(n.fallback_streak(), 0);
    }

    #[test]
    fn input_role_gates_on_epsilon_and_scales_by_gain() {
        let bus = LateralBus::new();
        let mut n = Neuron::new(
            0,
            Role::Input {
                gain: 2.0,
                epsilon_fire: 0.1,
            },
        );
        let quiet = n.on_input(0.01, &bus, &cfg());
        assert!(!quiet.fired);
        assert!(n.slots().is_empty());
        assert!((n.output_value() - 0.02).abs() < 1e-12);

        let r = n.on_input(0.5, &bus, &cfg());
        assert_eq!(r.amplitude, 1.0);
        assert_eq!(n.slots().len(), 1);
        assert!(n.slots()[&0].seen_first());
    }

    #[test]
    fn output_role_averages_then_decays() {
        let mut n = Neuron::new(0, Role::Output { smoothing: 0.5 });
        n.on_output(1.0);
        n.on_output(0.5);
        n.end_tick();
        assert!((n.output_value() - 0.75).abs() < 1e-12);
        assert_eq!(n.last_emitted(), 0.5);
        n.end_tick();
        assert!((n.output_value() - 0.375).abs() < 1e-12);
    }

    #[test]
    fn readouts_summarise_slots() {
        let bus = LateralBus::new();
        let mut n = Neuron::new(0, Role::Excitatory);
        assert_eq!(n.neuron_value(ReadoutMode::Memory), 0.0);
        n.on_input(1.0, &bus, &cfg());
        n.on_input(2.0, &bus, &cfg());
        assert!(n.neuron_value(ReadoutMode::Memory) > 0.0);
        assert!(n.neuron_value(ReadoutMode::Readiness) < 0.0);
        assert_eq!(n.neuron_value(ReadoutMode::FiringRate), 0.0);
    }

    #[test]
    fn pruning_keeps_recent_synapses() {
        let mut n = Neuron::new(0, Role::Excitatory);
        n.connect(1, false, 0);
        n.connect(2, false, 8);
        assert_eq!(n.prune_synapses(10, 5, 0.5), 1);
        assert_eq!(n.outgoing()[0].target, 2);
    }
}

//! Layer: a neuron arena sharing one lateral bus.
//!
//! Propagation inside a layer is synchronous and recursive. Fire events and
//! growth requests are collected here and picked up by the region after the
//! cascade, so nothing outside the layer changes mid-propagation.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::bus::LateralBus;
use crate::neuron::{Neuron, ReadoutMode, Role, INHIBITION_PULSE, MODULATION_PULSE};
use crate::prng::Prng;
use crate::slot::{GridPos, SlotConfig};

/// Default bound on intra-layer recursion depth.
pub const DEFAULT_MAX_CASCADE_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LayerKind {
    /// Mixed excitatory / inhibitory / modulatory population.
    Hidden,
    Input2D { height: usize, width: usize },
    InputNd { shape: Vec<usize> },
    Output2D { height: usize, width: usize },
}

impl LayerKind {
    pub fn name(&self) -> &'static str {
        match self {
            LayerKind::Hidden => "hidden",
            LayerKind::Input2D { .. } => "input2d",
            LayerKind::InputNd { .. } => "input_nd",
            LayerKind::Output2D { .. } => "output2d",
        }
    }

    /// Declared tensor shape for input edges.
    pub fn input_shape(&self) -> Option<Vec<usize>> {
        match self {
            LayerKind::Input2D { height, width } => Some(vec![*height, *width]),
            LayerKind::InputNd { shape } => Some(shape.clone()),
            _ => None,
        }
    }

    /// Grid geometry for 2D layers.
    pub fn grid(&self) -> Option<(usize, usize)> {
        match self {
            LayerKind::Input2D { height, width } | LayerKind::Output2D { height, width } => {
                Some((*height, *width))
            }
            _ => None,
        }
    }
}

/// A neuron fired with `amplitude` during propagation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FireEvent {
    pub neuron: usize,
    pub amplitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeuronGrowth {
    Grown(usize),
    /// The layer is at its neuron cap; the caller should grow a layer instead.
    AtCapacity,
}

#[derive(Debug, Clone)]
pub struct Layer {
    kind: LayerKind,
    neurons: Vec<Neuron>,
    bus: LateralBus,
    slot_config: SlotConfig,
    neuron_limit: Option<usize>,
    max_cascade_depth: usize,

    frame: Vec<f64>,
    outbox: Vec<FireEvent>,
    growth_request: Option<usize>,
    on_stack: Vec<bool>,
}

impl Layer {
    fn from_neurons(kind: LayerKind, neurons: Vec<Neuron>, slot_config: SlotConfig) -> Self {
        let frame = match kind {
            LayerKind::Output2D { height, width } => vec![0.0; height * width],
            _ => Vec::new(),
        };
        let on_stack = vec![false; neurons.len()];
        Self {
            kind,
            neurons,
            bus: LateralBus::new(),
            slot_config,
            neuron_limit: None,
            max_cascade_depth: DEFAULT_MAX_CASCADE_DEPTH,
            frame,
            outbox: Vec::new(),
            growth_request: None,
            on_stack,
        }
    }

    /// Mixed population: excitatory first, then inhibitory, then modulatory.
    pub fn mixed(excitatory: usize, inhibitory: usize, modulatory: usize, slot_config: SlotConfig) -> Self {
        let roles = core::iter::repeat(Role::Excitatory)
            .take(excitatory)
            .chain(core::iter::repeat(Role::Inhibitory).take(inhibitory))
            .chain(core::iter::repeat(Role::Modulatory).take(modulatory));
        let neurons = roles
            .enumerate()
            .map(|(i, role)| Neuron::new(i, role))
            .collect();
        Self::from_neurons(LayerKind::Hidden, neurons, slot_config)
    }

    pub fn input_2d(height: usize, width: usize, gain: f64, epsilon_fire: f64, slot_config: SlotConfig) -> Self {
        let role = Role::Input { gain, epsilon_fire };
        let neurons = (0..height * width).map(|i| Neuron::new(i, role)).collect();
        Self::from_neurons(LayerKind::Input2D { height, width }, neurons, slot_config)
    }

    pub fn input_nd(shape: &[usize], gain: f64, epsilon_fire: f64, slot_config: SlotConfig) -> Self {
        let role = Role::Input { gain, epsilon_fire };
        let size = shape.iter().product();
        let neurons = (0..size).map(|i| Neuron::new(i, role)).collect();
        let kind = LayerKind::InputNd {
            shape: shape.to_vec(),
        };
        Self::from_neurons(kind, neurons, slot_config)
    }

    pub fn output_2d(height: usize, width: usize, smoothing: f64, slot_config: SlotConfig) -> Self {
        let role = Role::Output { smoothing };
        let neurons = (0..height * width).map(|i| Neuron::new(i, role)).collect();
        Self::from_neurons(LayerKind::Output2D { height, width }, neurons, slot_config)
    }

    pub fn with_neuron_limit(mut self, limit: Option<usize>) -> Self {
        self.neuron_limit = limit;
        self
    }

    pub fn with_max_cascade_depth(mut self, depth: usize) -> Self {
        self.max_cascade_depth = depth.max(1);
        self
    }

    /// Start the bus step counter at `step` (layers added mid-run).
    pub fn with_bus_step(mut self, step: u64) -> Self {
        self.bus = LateralBus::starting_at(step);
        self
    }

    /// Each ordered pair of distinct neurons gets an edge with probability `p`.
    pub fn wire_random_feedforward(&mut self, probability: f64, rng: &mut Prng) -> usize {
        self.wire_random(probability, false, rng)
    }

    /// As feedforward, but each edge points from the later-visited neuron back
    /// to the earlier one and is tagged as feedback.
    pub fn wire_random_feedback(&mut self, probability: f64, rng: &mut Prng) -> usize {
        self.wire_random(probability, true, rng)
    }

    fn wire_random(&mut self, probability: f64, feedback: bool, rng: &mut Prng) -> usize {
        let n = self.neurons.len();
        let step = self.bus.current_step();
        let mut created = 0;
        for a in 0..n {
            for b in 0..n {
                if a == b || !rng.chance(probability) {
                    continue;
                }
                let (from, to) = if feedback { (b, a) } else { (a, b) };
                self.neurons[from].connect(to, feedback, step);
                created += 1;
            }
        }
        created
    }

    /// Drive every neuron with `value`; returns how many fired.
    pub fn forward(&mut self, value: f64) -> usize {
        (0..self.neurons.len())
            .filter(|&i| self.propagate_from(i, value))
            .count()
    }

    /// Drive neuron `i` with `values[i]` (row-major for 2D inputs).
    pub fn forward_values(&mut self, values: &[f64]) -> usize {
        let n = values.len().min(self.neurons.len());
        (0..n).filter(|&i| self.propagate_from(i, values[i])).count()
    }

    /// Deliver `value` to one neuron and run the resulting cascade.
    pub fn propagate_from(&mut self, index: usize, value: f64) -> bool {
        self.propagate_at(index, value, None)
    }

    /// Deliver `value` that originated at `origin` on a 2D source. With
    /// spatial slotting enabled the receiving neuron picks its slot by that
    /// position; cascades inside the layer carry no position.
    pub fn propagate_at(&mut self, index: usize, value: f64, origin: Option<GridPos>) -> bool {
        if index >= self.neurons.len() {
            return false;
        }
        self.cascade(index, value, 0, origin)
    }

    fn cascade(&mut self, index: usize, value: f64, depth: usize, origin: Option<GridPos>) -> bool {
        if depth >= self.max_cascade_depth || self.on_stack[index] {
            return false;
        }

        let neuron = &mut self.neurons[index];
        let response = match origin.filter(|_| self.slot_config.spatial_enabled) {
            Some(at) => neuron.on_input_2d(value, at, &self.bus, &self.slot_config),
            None => neuron.on_input(value, &self.bus, &self.slot_config),
        };
        if response.wants_growth && self.kind == LayerKind::Hidden && self.growth_request.is_none() {
            // One request per layer per tick; only the accepted neuron cools down.
            self.growth_request = Some(index);
            self.neurons[index].record_growth(self.bus.current_step());
        }
        if !response.fired {
            return false;
        }

        self.outbox.push(FireEvent {
            neuron: index,
            amplitude: response.amplitude,
        });
        self.on_stack[index] = true;
        self.fire(index, response.amplitude, depth);
        self.on_stack[index] = false;
        true
    }

    fn fire(&mut self, index: usize, amplitude: f64, depth: usize) {
        match self.neurons[index].role() {
            Role::Excitatory | Role::Input { .. } => {
                for k in 0..self.neurons[index].outgoing.len() {
                    let (modulation, inhibition) = (self.bus.modulation(), self.bus.inhibition());
                    let step = self.bus.current_step();
                    let synapse = &mut self.neurons[index].outgoing[k];
                    let target = synapse.target;
                    if synapse.transmit(amplitude, modulation, inhibition, step) {
                        self.cascade(target, amplitude, depth + 1, None);
                    }
                }
            }
            Role::Inhibitory => self.bus.set_inhibition(INHIBITION_PULSE),
            Role::Modulatory => self.bus.set_modulation(MODULATION_PULSE),
            Role::Output { .. } => {}
        }
        self.neurons[index].on_output(amplitude);
    }

    /// Publish outputs, snapshot the 2D frame, and decay the bus.
    pub fn end_tick(&mut self) {
        for neuron in &mut self.neurons {
            neuron.end_tick();
        }
        if let LayerKind::Output2D { .. } = self.kind {
            for (pixel, neuron) in self.frame.iter_mut().zip(&self.neurons) {
                *pixel = neuron.output_value();
            }
        }
        self.bus.decay();
    }

    /// Fire events since the last call, in firing order.
    pub fn take_fired(&mut self) -> Vec<FireEvent> {
        core::mem::take(&mut self.outbox)
    }

    pub fn take_growth_request(&mut self) -> Option<usize> {
        self.growth_request.take()
    }

    /// Append a sibling of `seed` unless the layer is at its neuron cap.
    pub fn try_grow_neuron(&mut self, seed: usize) -> NeuronGrowth {
        if let Some(limit) = self.neuron_limit {
            if self.neurons.len() >= limit {
                return NeuronGrowth::AtCapacity;
            }
        }
        let index = self.neurons.len();
        let sibling = match self.neurons.get(seed) {
            Some(n) => n.sibling(index),
            None => Neuron::new(index, Role::Excitatory),
        };
        self.neurons.push(sibling);
        self.on_stack.push(false);
        NeuronGrowth::Grown(index)
    }

    /// Remove stale, weak synapses; staleness is measured on this layer's bus.
    pub fn prune_synapses(&mut self, stale_window: u64, min_strength: f64) -> usize {
        let now = self.bus.current_step();
        self.neurons
            .iter_mut()
            .map(|n| n.prune_synapses(now, stale_window, min_strength))
            .sum()
    }

    #[inline]
    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }

    #[inline]
    pub fn neurons(&self) -> &[Neuron] {
        &self.neurons
    }

    pub fn neuron_mut(&mut self, index: usize) -> Option<&mut Neuron> {
        self.neurons.get_mut(index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.neurons.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.neurons.is_empty()
    }

    #[inline]
    pub fn bus(&self) -> &LateralBus {
        &self.bus
    }

    #[inline]
    pub fn bus_mut(&mut self) -> &mut LateralBus {
        &mut self.bus
    }

    #[inline]
    pub fn slot_config(&self) -> &SlotConfig {
        &self.slot_config
    }

    #[inline]
    pub fn neuron_limit(&self) -> Option<usize> {
        self.neuron_limit
    }

    /// Row-major output frame, for `Output2D` layers.
    pub fn frame(&self) -> Option<&[f64]> {
        match self.kind {
            LayerKind::Output2D { .. } => Some(&self.frame),
            _ => None,
        }
    }

    pub fn total_slots(&self) -> usize {
        self.neurons.iter().map(|n| n.slots().len()).sum()
    }

    pub fn total_synapses(&self) -> usize {
        self.neurons.iter().map(|n| n.outgoing().len()).sum()
    }

    /// Mean of a readout across the layer (0 for an empty layer).
    pub fn mean_readout(&self, mode: ReadoutMode) -> f64 {
        if self.neurons.is_empty() {
            return 0.0;
        }
        self.neurons.iter().map(|n| n.neuron_value(mode)).sum::<f64>() / self.neurons.len() as f64
    }
}

//! Region: layers, tracts, named input ports and the two-phase tick.
//!
//! A tick runs four phases in strict order:
//! - **A**: drive the port's edge layer; intra-layer cascades run to completion
//!   and every firing is queued on the outgoing tracts.
//! - **B**: flush each tract once, in insertion order. Firings caused by a
//!   flush are queued in turn; tracts already flushed hold them for next tick.
//! - **C**: end-of-tick on every layer and the region bus, then metrics.
//! - **D**: best-effort growth. Failures are logged and dropped.
//!
//! Argument and shape checks happen before Phase A, so a failed call leaves
//! the region untouched.

use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bus::RegionBus;
use crate::error::{GrowNetError, Result};
use crate::growth::{GrowthEngine, GrowthPolicy};
use crate::layer::{Layer, LayerKind, NeuronGrowth, DEFAULT_MAX_CASCADE_DEPTH};
use crate::metrics::{PruneSummary, RegionMetrics, SpatialMetrics};
use crate::pal::ParallelOptions;
use crate::prng::Prng;
use crate::slot::SlotConfig;
use crate::topographic::{KernelWeights, TopographicConfig};
use crate::tract::Tract;
use crate::window::{build_window_map, WindowSpec};

/// Gain of the single-neuron edge behind a scalar port.
pub const SCALAR_EDGE_GAIN: f64 = 1.0;
/// Emission floor of the single-neuron edge behind a scalar port.
pub const SCALAR_EDGE_EPSILON: f64 = 0.01;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RegionConfig {
    /// Seed for intra-layer wiring and tract edge draws.
    pub seed: u64,
    /// Copied into every layer the region creates.
    pub slot: SlotConfig,
    /// `None` disables the layer-growth engine.
    pub growth: Option<GrowthPolicy>,
    /// Compute active pixels, centroid and bbox on 2D ticks.
    pub enable_spatial_metrics: bool,
    /// Neuron cap for layers created with `add_layer` (and by growth).
    pub layer_neuron_limit: Option<usize>,
    pub max_cascade_depth: usize,
    /// Execution options for bulk tract wiring.
    pub parallel: ParallelOptions,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            seed: 1234,
            slot: SlotConfig::default(),
            growth: None,
            enable_spatial_metrics: false,
            layer_neuron_limit: None,
            max_cascade_depth: DEFAULT_MAX_CASCADE_DEPTH,
            parallel: ParallelOptions::default(),
        }
    }
}

impl RegionConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_slot_config(mut self, slot: SlotConfig) -> Self {
        self.slot = slot;
        self
    }

    pub fn with_growth_policy(mut self, policy: Option<GrowthPolicy>) -> Self {
        self.growth = policy;
        self
    }

    pub fn with_spatial_metrics(mut self, enabled: bool) -> Self {
        self.enable_spatial_metrics = enabled;
        self
    }

    pub fn with_layer_neuron_limit(mut self, limit: Option<usize>) -> Self {
        self.layer_neuron_limit = limit;
        self
    }

    pub fn with_max_cascade_depth(mut self, depth: usize) -> Self {
        self.max_cascade_depth = depth;
        self
    }

    pub fn with_parallel(mut self, parallel: ParallelOptions) -> Self {
        self.parallel = parallel;
        self
    }

    /// Validate the configuration, returning an error message if invalid.
    pub fn validate(&self) -> core::result::Result<(), &'static str> {
        self.slot.validate()?;
        if let Some(policy) = &self.growth {
            policy.validate()?;
        }
        if self.max_cascade_depth == 0 {
            return Err("max_cascade_depth must be > 0");
        }
        if self.layer_neuron_limit == Some(0) {
            return Err("layer_neuron_limit must be > 0 when set");
        }
        Ok(())
    }
}

/// A recorded `(source, destination, probability, feedback)` wiring, replayed
/// onto neurons that growth adds later.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MeshRule {
    pub source: usize,
    pub destination: usize,
    pub probability: f64,
    pub feedback: bool,
    /// Tract that carries this rule's edges.
    pub tract: usize,
}

enum Drive<'a> {
    Scalar(f64),
    Values(&'a [f64]),
}

#[derive(Debug, Clone)]
pub struct Region {
    name: String,
    config: RegionConfig,
    layers: Vec<Layer>,
    tracts: Vec<Tract>,
    bus: RegionBus,
    ports: BTreeMap<String, usize>,
    mesh_rules: Vec<MeshRule>,
    rng: Prng,
    last_layer_growth_tick: Option<u64>,
}

impl Region {
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), RegionConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: RegionConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|msg| GrowNetError::Configuration(msg.to_string()))?;
        Ok(Self::build(name.into(), config))
    }

    fn build(name: String, config: RegionConfig) -> Self {
        let rng = Prng::new(config.seed);
        Self {
            name,
            config,
            layers: Vec::new(),
            tracts: Vec::new(),
            bus: RegionBus::new(),
            ports: BTreeMap::new(),
            mesh_rules: Vec::new(),
            rng,
            last_layer_growth_tick: None,
        }
    }


    /// Add a mixed hidden layer; returns its index.
    pub fn add_layer(&mut self, excitatory: usize, inhibitory: usize, modulatory: usize) -> usize {
        let layer = Layer::mixed(excitatory, inhibitory, modulatory, self.config.slot.clone())
            .with_neuron_limit(self.config.layer_neuron_limit);
        self.push_layer(layer)
    }

    pub fn add_input_layer_2d(&mut self, height: usize, width: usize, gain: f64, epsilon_fire: f64) -> usize {
        let layer = Layer::input_2d(height, width, gain, epsilon_fire, self.config.slot.clone());
        self.push_layer(layer)
    }

    pub fn add_input_layer_nd(&mut self, shape: &[usize], gain: f64, epsilon_fire: f64) -> usize {
        let layer = Layer::input_nd(shape, gain, epsilon_fire, self.config.slot.clone());
        self.push_layer(layer)
    }

    pub fn add_output_layer_2d(&mut self, height: usize, width: usize, smoothing: f64) -> usize {
        let layer = Layer::output_2d(height, width, smoothing, self.config.slot.clone());
        self.push_layer(layer)
    }

    fn push_layer(&mut self, layer: Layer) -> usize {
        let layer = layer
            .with_max_cascade_depth(self.config.max_cascade_depth)
            .with_bus_step(self.bus.current_step());
        let index = self.layers.len();
        debug!(region = %self.name, index, kind = layer.kind().name(), neurons = layer.len(), "layer added");
        self.layers.push(layer);
        index
    }

    /// Random intra-layer wiring from the region's seeded stream.
    pub fn wire_layer_random(&mut self, layer: usize, probability: f64, feedback: bool) -> Result<usize> {
        self.check_layer(layer)?;
        check_probability(probability)?;
        let target = &mut self.layers[layer];
        let created = if feedback {
            target.wire_random_feedback(probability, &mut self.rng)
        } else {
            target.wire_random_feedforward(probability, &mut self.rng)
        };
        Ok(created)
    }


    /// Dense-random tract from `src` to `dst`, recorded as a mesh rule.
    /// Returns the number of edges created.
    pub fn connect_layers(&mut self, src: usize, dst: usize, probability: f64, feedback: bool) -> Result<usize> {
        self.check_layer(src)?;
        self.check_layer(dst)?;
        check_probability(probability)?;
        Ok(self.wire_dense(src, dst, probability, feedback))
    }

    fn wire_dense(&mut self, src: usize, dst: usize, probability: f64, feedback: bool) -> usize {
        let id = self.tracts.len();
        let tract = Tract::dense(
            id,
            (src, dst),
            (self.layers[src].len(), self.layers[dst].len()),
            probability,
            feedback,
            self.config.seed,
            self.bus.current_step(),
            &self.config.parallel,
        )
        .with_source_grid(self.layers[src].kind().grid());
        let edges = tract.edge_count();
        self.tracts.push(tract);
        self.mesh_rules.push(MeshRule {
            source: src,
            destination: dst,
            probability,
            feedback,
            tract: id,
        });
        debug!(region = %self.name, src, dst, edges, "dense tract wired");
        edges
    }

    /// Windowed tract. Geometry comes from a 2D source layer, or from a 2D
    /// output destination. Returns the number of unique subscribed sources.
    pub fn connect_layers_windowed(&mut self, src: usize, dst: usize, spec: WindowSpec, feedback: bool) -> Result<usize> {
        self.check_layer(src)?;
        self.check_layer(dst)?;
        spec.validate()?;

        let to_output = matches!(self.layers[dst].kind(), LayerKind::Output2D { .. });
        let geometry = self.layers[src].kind().grid().or_else(|| {
            if to_output {
                self.layers[dst].kind().grid()
            } else {
                None
            }
        });
        let Some((height, width)) = geometry else {
            return Err(GrowNetError::InvalidArgument(
                "windowed wiring needs a 2D source or a 2D output destination",
            ));
        };

        let map = build_window_map(height, width, &spec, to_output)?;
        let unique = map.unique_sources();
        let id = self.tracts.len();
        let tract = Tract::windowed(id, (src, dst), map, feedback).with_source_grid(self.layers[src].kind().grid());
        self.tracts.push(tract);
        debug!(region = %self.name, src, dst, unique, "windowed tract wired");
        Ok(unique)
    }

    /// Windowed tract from a 2D source into a 2D output, carrying Gaussian
    /// or difference-of-Gaussians weights per `(source, center)` pair.
    /// Returns the number of unique subscribed sources.
    pub fn connect_layers_topographic(&mut self, src: usize, dst: usize, cfg: &TopographicConfig) -> Result<usize> {
        self.check_layer(src)?;
        self.check_layer(dst)?;
        cfg.validate()
            .map_err(|msg| GrowNetError::Configuration(msg.to_string()))?;
        let Some((height, width)) = self.layers[src].kind().grid() else {
            return Err(GrowNetError::InvalidArgument("topographic wiring needs a 2D source"));
        };
        if !matches!(self.layers[dst].kind(), LayerKind::Output2D { .. }) {
            return Err(GrowNetError::InvalidArgument(
                "topographic wiring needs a 2D output destination",
            ));
        }

        let kernel = KernelWeights::compute(height, width, cfg)?;
        let unique = self.connect_layers_windowed(src, dst, cfg.window_spec(), cfg.feedback)?;
        let weights = kernel.len();
        if let Some(tract) = self.tracts.last_mut() {
            tract.set_kernel_weights(kernel);
        }
        debug!(region = %self.name, src, dst, unique, weights, "topographic tract wired");
        Ok(unique)
    }


    /// Bind a scalar port to a single-neuron edge wired into `targets`.
    pub fn bind_input(&mut self, port: &str, targets: &[usize]) -> Result<usize> {
        let kind = LayerKind::InputNd { shape: vec![1] };
        self.bind_edge(port, kind, SCALAR_EDGE_GAIN, SCALAR_EDGE_EPSILON, targets)
    }

    pub fn bind_input_2d(
        &mut self,
        port: &str,
        height: usize,
        width: usize,
        gain: f64,
        epsilon_fire: f64,
        targets: &[usize],
    ) -> Result<usize> {
        let kind = LayerKind::Input2D { height, width };
        self.bind_edge(port, kind, gain, epsilon_fire, targets)
    }

    pub fn bind_input_nd(
        &mut self,
        port: &str,
        shape: &[usize],
        gain: f64,
        epsilon_fire: f64,
        targets: &[usize],
    ) -> Result<usize> {
        let kind = LayerKind::InputNd {
            shape: shape.to_vec(),
        };
        self.bind_edge(port, kind, gain, epsilon_fire, targets)
    }

    /// Create or reuse the port's edge layer, then wire it into each target
    /// at probability 1.0 unless that pair is already wired.
    fn bind_edge(
        &mut self,
        port: &str,
        kind: LayerKind,
        gain: f64,
        epsilon_fire: f64,
        targets: &[usize],
    ) -> Result<usize> {
        for &target in targets {
            self.check_layer(target)?;
        }

        let edge = match self.ports.get(port) {
            Some(&edge) => {
                self.check_edge_kind(port, edge, &kind)?;
                edge
            }
            None => {
                let layer = match &kind {
                    LayerKind::Input2D { height, width } => {
                        Layer::input_2d(*height, *width, gain, epsilon_fire, self.config.slot.clone())
                    }
                    LayerKind::InputNd { shape } => {
                        Layer::input_nd(shape, gain, epsilon_fire, self.config.slot.clone())
                    }
                    _ => return Err(GrowNetError::InvalidArgument("ports bind to input edges only")),
                };
                let edge = self.push_layer(layer);
                self.ports.insert(port.to_string(), edge);
                edge
            }
        };

        for &target in targets {
            let wired = self
                .tracts
                .iter()
                .any(|t| t.source() == edge && t.destination() == target);
            if !wired {
                self.wire_dense(edge, target, 1.0, false);
            }
        }
        Ok(edge)
    }

    fn check_edge_kind(&self, port: &str, edge: usize, wanted: &LayerKind) -> Result<()> {
        let existing = self.layers[edge].kind();
        if core::mem::discriminant(existing) != core::mem::discriminant(wanted) {
            return Err(GrowNetError::Configuration(format!(
                "port '{port}' is bound to a {} edge, not {}",
                existing.name(),
                wanted.name()
            )));
        }
        let expected = existing.input_shape().unwrap_or_default();
        let actual = wanted.input_shape().unwrap_or_default();
        if expected != actual {
            return Err(GrowNetError::ShapeMismatch {
                port: port.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn edge_for(&self, port: &str) -> Result<usize> {
        self.ports
            .get(port)
            .copied()
            .ok_or_else(|| GrowNetError::unbound_port(port))
    }


    /// Drive a port with one scalar value.
    pub fn tick(&mut self, port: &str, value: f64) -> Result<RegionMetrics> {
        let edge = self.edge_for(port)?;
        Ok(self.run_tick(edge, Drive::Scalar(value), None))
    }

    /// Drive a 2D port with a row-major `height × width` frame.
    pub fn tick_2d(&mut self, port: &str, frame: &[f64], height: usize, width: usize) -> Result<RegionMetrics> {
        let edge = self.edge_for(port)?;
        let expected = self.layers[edge].kind().input_shape().unwrap_or_default();
        match self.layers[edge].kind() {
            LayerKind::Input2D { height: h, width: w } if (*h, *w) == (height, width) => {}
            _ => {
                return Err(GrowNetError::ShapeMismatch {
                    port: port.to_string(),
                    expected,
                    actual: vec![height, width],
                })
            }
        }
        check_flat_len(port, frame, height * width)?;
        Ok(self.run_tick(edge, Drive::Values(frame), Some((frame, height, width))))
    }

    /// Drive an ND port with a flat row-major tensor of `shape`.
    pub fn tick_nd(&mut self, port: &str, flat: &[f64], shape: &[usize]) -> Result<RegionMetrics> {
        let edge = self.edge_for(port)?;
        let expected = self.layers[edge].kind().input_shape().unwrap_or_default();
        if expected != shape {
            return Err(GrowNetError::ShapeMismatch {
                port: port.to_string(),
                expected,
                actual: shape.to_vec(),
            });
        }
        check_flat_len(port, flat, shape.iter().product())?;
        Ok(self.run_tick(edge, Drive::Values(flat), None))
    }

    fn run_tick(&mut self, edge: usize, drive: Drive<'_>, input_frame: Option<(&[f64], usize, usize)>) -> RegionMetrics {
        let mut metrics = RegionMetrics::default();

        // Phase A
        match drive {
            Drive::Scalar(value) => self.layers[edge].forward(value),
            Drive::Values(values) => self.layers[edge].forward_values(values),
        };
        metrics.inc_delivered_events(1);
        self.route_fired(edge);

        // Phase B
        for t in 0..self.tracts.len() {
            let dst = self.tracts[t].destination();
            let fired = self.tracts[t].flush(&mut self.layers[dst]);
            metrics.inc_delivered_events(fired as u64);
            self.route_fired(dst);
        }

        // Phase C
        for layer in &mut self.layers {
            layer.end_tick();
        }
        self.bus.decay();
        metrics.total_slots = self.layers.iter().map(Layer::total_slots).sum();
        metrics.total_synapses = self.layers.iter().map(Layer::total_synapses).sum::<usize>()
            + self.tracts.iter().map(Tract::edge_count).sum::<usize>();
        if self.config.enable_spatial_metrics {
            if let Some((frame, height, width)) = input_frame {
                metrics.spatial = Some(self.spatial_metrics(frame, height, width));
            }
        }

        // Phase D
        if let Err(err) = self.run_growth() {
            warn!(region = %self.name, %err, "growth step failed; tick result kept");
        }
        metrics
    }

    /// Queue a layer's fresh firings on every tract it feeds.
    fn route_fired(&mut self, layer: usize) {
        let events = self.layers[layer].take_fired();
        if events.is_empty() {
            return;
        }
        let bus = &self.bus;
        for tract in self.tracts.iter_mut().filter(|t| t.source() == layer) {
            for event in &events {
                tract.on_source_fire(event.neuron, event.amplitude, bus);
            }
        }
    }

    /// Most downstream output frame, or the input frame when that output is
    /// still dark (or absent).
    fn spatial_metrics(&self, input: &[f64], height: usize, width: usize) -> SpatialMetrics {
        let input_lit = input.iter().any(|&v| v != 0.0);
        let output = self.layers.iter().rev().find_map(|layer| {
            let (h, w) = layer.kind().grid().filter(|_| layer.frame().is_some())?;
            Some((layer.frame()?, h, w))
        });
        match output {
            Some((frame, h, w)) if !(input_lit && frame.iter().all(|&v| v == 0.0)) => {
                SpatialMetrics::from_frame(frame, h, w)
            }
            _ => SpatialMetrics::from_frame(input, height, width),
        }
    }


    /// Phase D. Deferred neuron growth first, then the layer engine, with at
    /// most one new layer per tick.
    fn run_growth(&mut self) -> Result<()> {
        let mut layer_added = false;
        let existing = self.layers.len();

        for index in 0..existing {
            let Some(seed) = self.layers[index].take_growth_request() else {
                continue;
            };
            match self.layers[index].try_grow_neuron(seed) {
                NeuronGrowth::Grown(neuron) => {
                    let edges = self.autowire_neuron(index, neuron);
                    debug!(region = %self.name, layer = index, neuron, edges, "neuron grown");
                }
                NeuronGrowth::AtCapacity if !layer_added => {
                    let policy = self.config.growth.clone().unwrap_or_default();
                    if policy.allows_layer(self.layers.len(), self.current_step(), self.last_layer_growth_tick) {
                        self.grow_layer_from(index, &policy)?;
                        layer_added = true;
                    }
                }
                NeuronGrowth::AtCapacity => {}
            }
        }

        if !layer_added {
            if let Some(policy) = self.config.growth.clone() {
                GrowthEngine::maybe_grow(self, &policy)?;
            }
        }
        Ok(())
    }

    /// Replay every mesh rule touching `layer` onto its new neuron.
    fn autowire_neuron(&mut self, layer: usize, neuron: usize) -> usize {
        let step = self.bus.current_step();
        let mut added = 0;
        for rule in &self.mesh_rules {
            let tract = &mut self.tracts[rule.tract];
            if rule.source == layer {
                added += tract.attach_source_neuron(neuron, self.layers[rule.destination].len(), step);
            }
            if rule.destination == layer {
                added += tract.attach_target_neuron(neuron, self.layers[rule.source].len(), step);
            }
        }
        added
    }

    /// Append a layer of `policy.new_layer_excitatory_count` neurons wired
    /// from `source`. Callers check the cap and cooldown.
    pub(crate) fn grow_layer_from(&mut self, source: usize, policy: &GrowthPolicy) -> Result<usize> {
        self.check_layer(source)?;
        check_probability(policy.wire_probability)?;
        let grown = self.add_layer(policy.new_layer_excitatory_count, 0, 0);
        self.wire_dense(source, grown, policy.wire_probability, false);
        self.last_layer_growth_tick = Some(self.current_step());
        debug!(region = %self.name, source, layer = grown, step = self.current_step(), "layer grown");
        Ok(grown)
    }

    pub fn set_growth_policy(&mut self, policy: Option<GrowthPolicy>) -> Result<()> {
        if let Some(p) = &policy {
            p.validate()
                .map_err(|msg| GrowNetError::Configuration(msg.to_string()))?;
        }
        self.config.growth = policy;
        Ok(())
    }

    pub fn set_spatial_metrics(&mut self, enabled: bool) {
        self.config.enable_spatial_metrics = enabled;
    }


    /// Remove synapses and dense tract edges that are both stale and weak.
    pub fn prune(&mut self, stale_window: u64, min_strength: f64) -> Result<PruneSummary> {
        if !min_strength.is_finite() {
            return Err(GrowNetError::InvalidArgument("min_strength must be finite"));
        }
        let pruned_synapses = self
            .layers
            .iter_mut()
            .map(|l| l.prune_synapses(stale_window, min_strength))
            .sum();
        let now = self.bus.current_step();
        let pruned_edges = self
            .tracts
            .iter_mut()
            .map(|t| t.prune_edges(now, stale_window, min_strength))
            .sum();
        let summary = PruneSummary {
            pruned_synapses,
            pruned_edges,
        };
        debug!(region = %self.name, pruned_synapses, pruned_edges, "pruned");
        Ok(summary)
    }

    pub fn pulse_inhibition(&mut self, factor: f64) {
        self.bus.pulse_inhibition(factor);
    }

    pub fn pulse_modulation(&mut self, factor: f64) {
        self.bus.pulse_modulation(factor);
    }


    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    #[inline]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    #[inline]
    pub fn tracts(&self) -> &[Tract] {
        &self.tracts
    }

    #[inline]
    pub fn bus(&self) -> &RegionBus {
        &self.bus
    }

    #[inline]
    pub fn mesh_rules(&self) -> &[MeshRule] {
        &self.mesh_rules
    }

    /// Edge layer behind `port`, if bound.
    pub fn port_layer(&self, port: &str) -> Option<usize> {
        self.ports.get(port).copied()
    }

    /// `(port, edge layer)` pairs in port-name order.
    pub fn ports(&self) -> impl Iterator<Item = (&str, usize)> + '_ {
        self.ports.iter().map(|(name, &edge)| (name.as_str(), edge))
    }

    #[inline]
    pub fn current_step(&self) -> u64 {
        self.bus.current_step()
    }

    #[inline]
    pub fn last_layer_growth_tick(&self) -> Option<u64> {
        self.last_layer_growth_tick
    }

    pub fn neuron_count(&self) -> usize {
        self.layers.iter().map(Layer::len).sum()
    }

    /// Mean slots per neuron over every layer (0 for an empty region).
    pub fn mean_slots_per_neuron(&self) -> f64 {
        let neurons = self.neuron_count();
        if neurons == 0 {
            return 0.0;
        }
        self.layers.iter().map(Layer::total_slots).sum::<usize>() as f64 / neurons as f64
    }

    /// Percent of neurons at slot capacity whose last selection fell back.
    pub fn percent_at_cap_fallback(&self) -> f64 {
        let neurons = self.neuron_count();
        if neurons == 0 {
            return 0.0;
        }
        let saturated = self
            .layers
            .iter()
            .flat_map(|l| l.neurons().iter().map(move |n| n.is_saturated(l.slot_config())))
            .filter(|&s| s)
            .count();
        100.0 * saturated as f64 / neurons as f64
    }

    fn check_layer(&self, index: usize) -> Result<()> {
        if index < self.layers.len() {
            Ok(())
        } else {
            Err(GrowNetError::layer_index(index, self.layers.len()))
        }
    }
}

fn check_probability(p: f64) -> Result<()> {
    if (0.0..=1.0).contains(&p) {
        Ok(())
    } else {
        Err(GrowNetError::InvalidArgument("probability must be in [0,1]"))
    }
}

fn check_flat_len(port: &str, values: &[f64], expected: usize) -> Result<()> {
    if values.len() == expected {
        Ok(())
    } else {
        Err(GrowNetError::ShapeMismatch {
            port: port.to_string(),
            expected: vec![expected],
            actual: vec![values.len()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::Padding;

    fn growth_slots() -> SlotConfig {
        SlotConfig::default()
            .with_slot_limit(1)
            .with_fallback_growth_threshold(1)
    }

    /// Leave a growth request on neuron 0 of `layer`.
    fn request_growth(region: &mut Region, layer: usize) {
        let target = &mut region.layers[layer];
        target.propagate_from(0, 1.0);
        target.propagate_from(0, 9.0);
        target.take_fired();
    }

    #[test]
    fn scalar_tick_end_to_end() {
        let mut region = Region::new("e2e");
        let hidden = region.add_layer(1, 0, 0);
        region.bind_input("x", &[hidden]).expect("bind");

        let metrics = region.tick("x", 0.42).expect("tick");
        assert_eq!(metrics.delivered_events, 1);
        assert!(metrics.total_slots >= 1);
        assert!(metrics.spatial.is_none());

        let err = region.tick("y", 0.42).expect_err("unbound port");
        assert!(err.is_configuration());
        assert_eq!(region.current_step(), 1);
    }

    #[test]
    fn flushed_firings_count_as_deliveries() {
        let mut region = Region::new("flow");
        let hidden = region.add_layer(1, 0, 0);
        let edge = region.bind_input("x", &[hidden]).expect("bind");

        // Bring every weight on the chain to the point of firing.
        while !region.layers[edge].propagate_from(0, 0.42) {}
        region.layers[edge].take_fired();
        while region.tracts[0].pending() == 0 {
            region.tracts[0].on_source_fire(0, 0.42, &region.bus);
        }
        let mut scratch = region.layers[hidden].clone();
        region.tracts[0].flush(&mut scratch);
        while !region.layers[hidden].propagate_from(0, 0.42) {}
        region.layers[hidden].take_fired();

        let metrics = region.tick("x", 0.42).expect("tick");
        assert_eq!(metrics.delivered_events, 2);
    }

    #[test]
    fn rebinding_reuses_the_edge() {
        let mut region = Region::new("ports");
        let hidden = region.add_layer(2, 0, 0);
        let edge = region.bind_input("x", &[hidden]).expect("bind");
        assert_eq!(region.bind_input("x", &[hidden]).expect("rebind"), edge);
        assert_eq!(region.tracts().len(), 1);
        assert_eq!(region.port_layer("x"), Some(edge));
        assert_eq!(region.tracts()[0].edge_count(), 2);
    }

    #[test]
    fn shape_errors_leave_the_region_untouched() {
        let mut region = Region::new("shapes");
        region.bind_input_2d("img", 2, 2, 1.0, 0.01, &[]).expect("bind");

        let err = region.tick_2d("img", &[0.0; 6], 2, 3).expect_err("wrong dims");
        assert!(matches!(err, GrowNetError::ShapeMismatch { .. }));
        let err = region.tick_2d("img", &[0.0; 3], 2, 2).expect_err("short frame");
        assert!(matches!(err, GrowNetError::ShapeMismatch { .. }));
        let err = region.tick_nd("img", &[0.0; 4], &[4]).expect_err("wrong rank");
        assert!(matches!(err, GrowNetError::ShapeMismatch { .. }));
        assert_eq!(region.current_step(), 0);

        let err = region.bind_input_nd("img", &[4], 1.0, 0.01, &[]).expect_err("kind");
        assert!(err.is_configuration());
        let err = region.bind_input_2d("img", 3, 3, 1.0, 0.01, &[]).expect_err("dims");
        assert!(matches!(err, GrowNetError::ShapeMismatch { .. }));

        region.bind_input_nd("vec", &[2, 3], 1.0, 0.01, &[]).expect("bind nd");
        assert!(region.tick_nd("vec", &[0.5; 6], &[2, 3]).is_ok());
    }

    #[test]
    fn bad_indices_and_probabilities_are_rejected() {
        let mut region = Region::new("args");
        region.add_layer(1, 0, 0);
        let err = region.connect_layers(0, 5, 0.5, false).expect_err("index");
        assert_eq!(
            err,
            GrowNetError::IndexOutOfRange {
                what: "layer",
                index: 5,
                len: 1
            }
        );
        assert!(region.connect_layers(0, 0, 1.5, false).is_err());
        assert!(region.bind_input("x", &[3]).is_err());
        assert_eq!(region.port_layer("x"), None);
        assert!(region.prune(1, f64::NAN).is_err());
    }

    #[test]
    fn windowed_connect_reports_unique_sources() {
        let mut region = Region::new("window");
        let edge = region.bind_input_2d("img", 4, 4, 1.0, 0.01, &[]).expect("bind");
        let out = region.add_output_layer_2d(4, 4, 0.0);
        let spec = WindowSpec::square(3, 1, Padding::Same);
        assert_eq!(region.connect_layers_windowed(edge, out, spec, false).expect("wire"), 16);

        let hidden = region.add_layer(2, 0, 0);
        let err = region
            .connect_layers_windowed(hidden, hidden, spec, false)
            .expect_err("no geometry");
        assert!(matches!(err, GrowNetError::InvalidArgument(_)));
    }

    #[test]
    fn spatial_metrics_fall_back_to_the_input_frame() {
        let config = RegionConfig::default().with_spatial_metrics(true);
        let mut region = Region::with_config("spatial", config).expect("config");
        let edge = region.bind_input_2d("img", 4, 4, 1.0, 0.01, &[]).expect("bind");
        let out = region.add_output_layer_2d(4, 4, 0.0);
        region
            .connect_layers_windowed(edge, out, WindowSpec::square(3, 1, Padding::Same), false)
            .expect("wire");

        let mut frame = vec![0.0; 16];
        frame[6] = 1.0;
        let spatial = region
            .tick_2d("img", &frame, 4, 4)
            .expect("tick")
            .spatial
            .expect("spatial metrics");
        assert_eq!(spatial.active_pixels, 1);
        assert_eq!(spatial.bbox, (1, 1, 2, 2));
        assert_eq!(spatial.centroid, (1.0, 2.0));
    }

    #[test]
    fn layer_growth_is_capped_per_tick_and_overall() {
        let policy = GrowthPolicy::default()
            .with_avg_slots_threshold(0.0)
            .with_layer_cooldown(0)
            .with_max_layers(4);
        let config = RegionConfig::default().with_growth_policy(Some(policy));
        let mut region = Region::with_config("grow", config).expect("config");
        let hidden = region.add_layer(1, 0, 0);
        region.bind_input("x", &[hidden]).expect("bind");

        let mut previous = region.layers().len();
        for i in 0..30 {
            region.tick("x", (i as f64).sin()).expect("tick");
            let now = region.layers().len();
            assert!(now <= previous + 1);
            assert!(now <= 4);
            previous = now;
        }
        assert_eq!(previous, 4);
        assert_eq!(region.mesh_rules().last().map(|r| r.destination), Some(3));
    }

    #[test]
    fn grown_neuron_is_autowired_by_mesh_rules() {
        let config = RegionConfig::default().with_slot_config(growth_slots());
        let mut region = Region::with_config("neurons", config).expect("config");
        let a = region.add_layer(1, 0, 0);
        let b = region.add_layer(2, 0, 0);
        assert_eq!(region.connect_layers(a, b, 1.0, false).expect("wire"), 2);

        request_growth(&mut region, a);
        region.run_growth().expect("growth");
        assert_eq!(region.layers()[a].len(), 2);
        assert_eq!(region.tracts()[0].edge_count(), 4);
        assert_eq!(region.layers().len(), 2);
    }

    #[test]
    fn saturated_layer_escalates_to_layer_growth() {
        let config = RegionConfig::default()
            .with_slot_config(growth_slots())
            .with_layer_neuron_limit(Some(1));
        let mut region = Region::with_config("escalate", config).expect("config");
        let a = region.add_layer(1, 0, 0);

        request_growth(&mut region, a);
        region.run_growth().expect("growth");
        assert_eq!(region.layers()[a].len(), 1);
        assert_eq!(region.layers().len(), 2);
        let rule = region.mesh_rules()[0];
        assert_eq!((rule.source, rule.destination), (a, 1));
        assert_eq!(region.last_layer_growth_tick(), Some(0));
    }

    #[test]
    fn prune_keeps_recently_used_synapses() {
        let mut region = Region::new("prune");
        let hidden = region.add_layer(2, 0, 0);
        region.bind_input("clock", &[]).expect("bind");
        assert_eq!(region.wire_layer_random(hidden, 1.0, false).expect("wire"), 2);

        for _ in 0..10 {
            region.tick("clock", 0.0).expect("tick");
        }
        let now = region.layers()[hidden].bus().current_step();
        if let Some(neuron) = region.layers[hidden].neuron_mut(0) {
            neuron.outgoing[0].last_used_step = now;
        }

        let summary = region.prune(5, 1.0).expect("prune");
        assert_eq!(summary.pruned_synapses, 1);
        assert_eq!(region.layers()[hidden].neurons()[0].outgoing().len(), 1);
    }

    #[test]
    fn late_layers_share_the_region_clock() {
        let mut region = Region::new("clock");
        region.bind_input("x", &[]).expect("bind");
        for _ in 0..3 {
            region.tick("x", 0.0).expect("tick");
        }
        let late = region.add_layer(1, 0, 0);
        assert_eq!(region.layers()[late].bus().current_step(), 3);
    }

    #[test]
    fn region_pulses_last_one_tick() {
        let mut region = Region::new("pulse");
        region.bind_input("x", &[]).expect("bind");
        region.pulse_inhibition(0.5);
        region.pulse_modulation(2.0);
        assert_eq!(region.bus().inhibition(), 0.5);
        region.tick("x", 0.0).expect("tick");
        assert_eq!(region.bus().inhibition(), 0.0);
        assert_eq!(region.bus().modulation(), 1.0);
    }

    #[test]
    fn topographic_wiring_stores_kernel_weights() {
        let mut region = Region::new("topo");
        let edge = region.bind_input_2d("img", 8, 8, 1.0, 0.01, &[]).expect("bind");
        let out = region.add_output_layer_2d(8, 8, 0.0);
        let cfg = TopographicConfig::default().with_kernel(3, 3).with_gaussian(1.5);
        assert_eq!(region.connect_layers_topographic(edge, out, &cfg).expect("wire"), 64);

        let tract = region.tracts().last().expect("tract");
        assert!(tract.is_windowed());
        assert_eq!(tract.source_grid(), Some((8, 8)));
        let kernel = tract.kernel_weights().expect("kernel weights");
        let center = 3 * 8 + 3;
        let at_center = kernel.get(center, center).expect("center weight");
        let beside = kernel.get(center + 1, center).expect("neighbour weight");
        assert!(at_center > beside);
        for sum in kernel.incoming_sums(64).into_iter().filter(|&s| s > 0.0) {
            assert!((sum - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn topographic_wiring_rejects_bad_targets_and_configs() {
        let mut region = Region::new("topo-args");
        let edge = region.bind_input_2d("img", 4, 4, 1.0, 0.01, &[]).expect("bind");
        let hidden = region.add_layer(2, 0, 0);
        let out = region.add_output_layer_2d(4, 4, 0.0);

        let err = region
            .connect_layers_topographic(edge, hidden, &TopographicConfig::default())
            .expect_err("hidden destination");
        assert!(matches!(err, GrowNetError::InvalidArgument(_)));

        let bad = TopographicConfig::default().with_difference_of_gaussians(2.0, 1.0, 0.5);
        let err = region.connect_layers_topographic(edge, out, &bad).expect_err("sigmas");
        assert!(err.is_configuration());
        assert!(region.tracts().is_empty());
    }

    #[test]
    fn spatial_slots_follow_the_firing_pixel() {
        let config = RegionConfig::default().with_slot_config(SlotConfig::default().with_spatial(true));
        let mut region = Region::with_config("spatial-slots", config).expect("config");
        let edge = region.bind_input_2d("img", 4, 4, 1.0, 0.01, &[]).expect("bind");
        let hidden = region.add_layer(8, 0, 0);
        region
            .connect_layers_windowed(edge, hidden, WindowSpec::square(2, 2, Padding::Valid), false)
            .expect("wire");

        for pixel in [5, 6] {
            while !region.layers[edge].propagate_from(pixel, 1.0) {}
        }
        region.layers[edge].take_fired();

        for pixel in [5, 6] {
            let mut frame = vec![0.0; 16];
            frame[pixel] = 1.0;
            region.tick_2d("img", &frame, 4, 4).expect("tick");
        }
        for neuron in region.layers()[hidden].neurons() {
            assert_eq!(neuron.spatial_anchor(), Some((1, 1)));
            let ids: Vec<usize> = neuron.slots().keys().copied().collect();
            assert_eq!(ids, vec![0, 2]);
        }
    }

    #[test]
    fn invalid_config_is_a_configuration_error() {
        let config = RegionConfig::default().with_max_cascade_depth(0);
        let err = Region::with_config("bad", config).expect_err("invalid");
        assert!(err.is_configuration());
    }
}

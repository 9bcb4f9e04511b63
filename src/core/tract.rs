//! Tract: queued inter-layer delivery between a source and a destination layer.
//!
//! Source firings are turned into queued events as they happen; nothing
//! reaches the destination until [`Tract::flush`], which the region calls
//! exactly once per tick after all intra-layer propagation is finished.

use std::collections::{BTreeMap, VecDeque};

use hashbrown::{HashMap, HashSet};

use crate::bus::RegionBus;
use crate::layer::Layer;
use crate::pal::{counter_rng, draw_kind, parallel_map_ordered, ParallelOptions};
use crate::slot::GridPos;
use crate::topographic::KernelWeights;
use crate::weight::Weight;
use crate::window::WindowMap;

/// One gated inter-layer edge.
#[derive(Debug, Clone)]
pub struct TractEdge {
    pub target: usize,
    pub weight: Weight,
    /// Region-bus step of the last source firing that touched this edge.
    pub last_step: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Delivery {
    One(usize),
    /// Fan out to every destination neuron.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct QueuedEvent {
    source: usize,
    delivery: Delivery,
    amplitude: f64,
    step: u64,
}

#[derive(Debug, Clone)]
enum Routing {
    Dense {
        probability: f64,
        seed: u64,
        edges: HashMap<usize, Vec<TractEdge>>,
    },
    Windowed {
        allowed: HashSet<usize>,
        /// Source index → destination center (2D output destinations only).
        centers: BTreeMap<usize, usize>,
    },
}

#[derive(Debug, Clone)]
pub struct Tract {
    id: usize,
    source: usize,
    destination: usize,
    feedback: bool,
    routing: Routing,
    queue: VecDeque<QueuedEvent>,
    /// `(height, width)` of a 2D source; flushed events then carry the
    /// firing pixel's position.
    source_grid: Option<(usize, usize)>,
    kernel: Option<KernelWeights>,
}

impl Tract {
    /// Dense-random wiring: each (source, target) pair is kept with
    /// probability `p`. Pairs are decided by counter draws keyed on the tract
    /// id, so the result does not depend on how enumeration is scheduled.
    ///
    /// # Arguments
    /// * `id` - the tract's index in its region; part of the draw key
    /// * `layers` - `(source, destination)` layer indices
    /// * `sizes` - `(source, destination)` neuron counts at wiring time
    /// * `step` - region-bus step stamped on new edges
    #[allow(clippy::too_many_arguments)]
    pub fn dense(
        id: usize,
        layers: (usize, usize),
        sizes: (usize, usize),
        probability: f64,
        feedback: bool,
        seed: u64,
        step: u64,
        opts: &ParallelOptions,
    ) -> Self {
        let (source, destination) = layers;
        let (src_len, dst_len) = sizes;
        let same_layer = source == destination;
        let mut edges: HashMap<usize, Vec<TractEdge>> = HashMap::new();

        parallel_map_ordered(
            0..src_len,
            opts,
            |s| {
                (0..dst_len)
                    .filter(|&t| !(same_layer && s == t))
                    .filter(|&t| edge_draw(seed, id, s, t) < probability)
                    .collect::<Vec<usize>>()
            },
            |s, targets| {
                if !targets.is_empty() {
                    edges.insert(s, targets.into_iter().map(|t| new_edge(t, step)).collect());
                }
            },
        );

        Self {
            id,
            source,
            destination,
            feedback,
            routing: Routing::Dense {
                probability,
                seed,
                edges,
            },
            queue: VecDeque::new(),
            source_grid: None,
            kernel: None,
        }
    }

    /// Windowed wiring from a prebuilt window map. When the map carries
    /// centers, each allowed source delivers to its center neuron only;
    /// otherwise it fans out to the whole destination.
    pub fn windowed(id: usize, layers: (usize, usize), map: WindowMap, feedback: bool) -> Self {
        let (source, destination) = layers;
        Self {
            id,
            source,
            destination,
            feedback,
            routing: Routing::Windowed {
                allowed: map.allowed.into_iter().collect(),
                centers: map.centers,
            },
            queue: VecDeque::new(),
            source_grid: None,
            kernel: None,
        }
    }

    /// Declare the source layer's grid so deliveries carry positions.
    pub fn with_source_grid(mut self, grid: Option<(usize, usize)>) -> Self {
        self.source_grid = grid;
        self
    }

    /// Attach per-edge kernel weights computed for this tract's windows.
    pub(crate) fn set_kernel_weights(&mut self, kernel: KernelWeights) {
        self.kernel = Some(kernel);
    }

    /// Fire hook for source neuron `neuron`.
    pub fn on_source_fire(&mut self, neuron: usize, amplitude: f64, bus: &RegionBus) {
        let step = bus.current_step();
        match &mut self.routing {
            Routing::Dense { edges, .. } => {
                let Some(list) = edges.get_mut(&neuron) else {
                    return;
                };
                for edge in list {
                    edge.weight.reinforce(bus.modulation(), bus.inhibition());
                    edge.last_step = step;
                    if edge.weight.update_threshold(amplitude) {
                        self.queue.push_back(QueuedEvent {
                            source: neuron,
                            delivery: Delivery::One(edge.target),
                            amplitude,
                            step,
                        });
                    }
                }
            }
            Routing::Windowed { allowed, centers } => {
                if !allowed.contains(&neuron) {
                    return;
                }
                let delivery = if centers.is_empty() {
                    Delivery::All
                } else {
                    match centers.get(&neuron) {
                        Some(&center) => Delivery::One(center),
                        None => return,
                    }
                };
                self.queue.push_back(QueuedEvent {
                    source: neuron,
                    delivery,
                    amplitude,
                    step,
                });
            }
        }
    }

    /// Drain the queue into `destination` in insertion order.
    ///
    /// Returns how many target neurons fired.
    pub fn flush(&mut self, destination: &mut Layer) -> usize {
        let mut fired = 0;
        while let Some(event) = self.queue.pop_front() {
            let origin = self
                .source_grid
                .map(|(height, width)| GridPos::from_index(event.source, height, width));
            match event.delivery {
                Delivery::One(target) => {
                    if destination.propagate_at(target, event.amplitude, origin) {
                        fired += 1;
                    }
                }
                Delivery::All => {
                    for target in 0..destination.len() {
                        if destination.propagate_at(target, event.amplitude, origin) {
                            fired += 1;
                        }
                    }
                }
            }
        }
        fired
    }

    /// Remove edges that are both stale and weak. Windowed tracts have no
    /// edges and never prune.
    pub fn prune_edges(&mut self, now: u64, stale_window: u64, min_strength: f64) -> usize {
        let Routing::Dense { edges, .. } = &mut self.routing else {
            return 0;
        };
        let mut removed = 0;
        edges.retain(|_, list| {
            let before = list.len();
            list.retain(|e| {
                let stale = now.saturating_sub(e.last_step) > stale_window;
                !(stale && e.weight.strength() < min_strength)
            });
            removed += before - list.len();
            !list.is_empty()
        });
        removed
    }

    /// Wire a newly grown source neuron with the tract's recorded probability.
    pub fn attach_source_neuron(&mut self, index: usize, dst_len: usize, step: u64) -> usize {
        let same_layer = self.source == self.destination;
        let id = self.id;
        let Routing::Dense {
            probability,
            seed,
            edges,
        } = &mut self.routing
        else {
            return 0;
        };
        let list: Vec<TractEdge> = (0..dst_len)
            .filter(|&t| !(same_layer && t == index))
            .filter(|&t| edge_draw(*seed, id, index, t) < *probability)
            .map(|t| new_edge(t, step))
            .collect();
        let added = list.len();
        if added > 0 {
            edges.entry(index).or_default().extend(list);
        }
        added
    }

    /// Wire every existing source to a newly grown destination neuron.
    pub fn attach_target_neuron(&mut self, index: usize, src_len: usize, step: u64) -> usize {
        let same_layer = self.source == self.destination;
        let id = self.id;
        let Routing::Dense {
            probability,
            seed,
            edges,
        } = &mut self.routing
        else {
            return 0;
        };
        let mut added = 0;
        for s in 0..src_len {
            if same_layer && s == index {
                continue;
            }
            if edge_draw(*seed, id, s, index) < *probability {
                edges.entry(s).or_default().push(new_edge(index, step));
                added += 1;
            }
        }
        added
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn source(&self) -> usize {
        self.source
    }

    #[inline]
    pub fn destination(&self) -> usize {
        self.destination
    }

    #[inline]
    pub fn is_feedback(&self) -> bool {
        self.feedback
    }

    #[inline]
    pub fn is_windowed(&self) -> bool {
        matches!(self.routing, Routing::Windowed { .. })
    }

    /// Queued events awaiting the next flush.
    #[inline]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn edge_count(&self) -> usize {
        match &self.routing {
            Routing::Dense { edges, .. } => edges.values().map(Vec::len).sum(),
            Routing::Windowed { .. } => 0,
        }
    }

    /// Edges leaving source neuron `neuron`.
    pub fn edges_from(&self, neuron: usize) -> &[TractEdge] {
        match &self.routing {
            Routing::Dense { edges, .. } => edges.get(&neuron).map(Vec::as_slice).unwrap_or(&[]),
            Routing::Windowed { .. } => &[],
        }
    }

    /// Subscribed source indices for windowed tracts.
    pub fn unique_sources(&self) -> usize {
        match &self.routing {
            Routing::Windowed { allowed, .. } => allowed.len(),
            Routing::Dense { edges, .. } => edges.len(),
        }
    }

    /// Destination center for a windowed source, if one was assigned.
    pub fn center_of(&self, source_index: usize) -> Option<usize> {
        match &self.routing {
            Routing::Windowed { centers, .. } => centers.get(&source_index).copied(),
            Routing::Dense { .. } => None,
        }
    }

    /// Kernel weights from topographic wiring, if any.
    pub fn kernel_weights(&self) -> Option<&KernelWeights> {
        self.kernel.as_ref()
    }

    #[inline]
    pub fn source_grid(&self) -> Option<(usize, usize)> {
        self.source_grid
    }

    /// Step stamped on the oldest queued event.
    pub fn oldest_pending_step(&self) -> Option<u64> {
        self.queue.front().map(|e| e.step)
    }
}

#[inline]
fn edge_draw(seed: u64, tract: usize, source: usize, target: usize) -> f64 {
    counter_rng(seed, 0, draw_kind::TRACT_WIRING, tract as u64, source as u64, target as u64)
}

#[inline]
fn new_edge(target: usize, step: u64) -> TractEdge {
    TractEdge {
        target,
        weight: Weight::new(),
        last_step: step,
    }
}

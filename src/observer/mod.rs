use crate::layer::Layer;
use crate::neuron::ReadoutMode;
use crate::region::Region;
use crate::tract::Tract;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A read-only snapshot of what a region is doing.
///
/// Design intent:
/// - Observers cannot mutate or steer the region.
/// - Snapshotting is *on-demand* and can allocate; the tick loop stays unchanged.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegionSnapshot {
    pub name: String,
    pub step: u64,
    pub layers: Vec<LayerSummary>,
    pub tracts: Vec<TractSummary>,
    pub ports: Vec<PortBinding>,
    pub last_layer_growth_tick: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LayerSummary {
    pub index: usize,
    pub kind: String,
    pub neurons: usize,
    pub slots: usize,
    pub synapses: usize,
    pub inhibition: f64,
    pub modulation: f64,
    /// Mean slot firing-rate EMA across the layer.
    pub firing_rate: f64,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TractSummary {
    pub source: usize,
    pub destination: usize,
    pub edges: usize,
    pub pending: usize,
    pub windowed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PortBinding {
    pub port: String,
    pub layer: usize,
}

pub struct RegionAdapter<'a> {
    region: &'a Region,
}

impl<'a> RegionAdapter<'a> {
    pub fn new(region: &'a Region) -> Self {
        Self { region }
    }

    pub fn snapshot(&self) -> RegionSnapshot {
        RegionSnapshot {
            name: self.region.name().to_string(),
            step: self.region.current_step(),
            layers: self
                .region
                .layers()
                .iter()
                .enumerate()
                .map(|(i, l)| summarize_layer(i, l))
                .collect(),
            tracts: self.region.tracts().iter().map(summarize_tract).collect(),
            ports: self
                .region
                .ports()
                .map(|(port, layer)| PortBinding {
                    port: port.to_string(),
                    layer,
                })
                .collect(),
            last_layer_growth_tick: self.region.last_layer_growth_tick(),
        }
    }
}

fn summarize_layer(index: usize, layer: &Layer) -> LayerSummary {
    LayerSummary {
        index,
        kind: layer.kind().name().to_string(),
        neurons: layer.len(),
        slots: layer.total_slots(),
        synapses: layer.total_synapses(),
        inhibition: layer.bus().inhibition(),
        modulation: layer.bus().modulation(),
        firing_rate: layer.mean_readout(ReadoutMode::FiringRate),
    }
}

fn summarize_tract(tract: &Tract) -> TractSummary {
    TractSummary {
        source: tract.source(),
        destination: tract.destination(),
        edges: tract.edge_count(),
        pending: tract.pending(),
        windowed: tract.is_windowed(),
    }
}

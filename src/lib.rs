//! # grownet
//!
//! A growing neural substrate built from slot-based neurons that learn
//! locally and add capacity (slots, neurons, layers) under sustained pressure.
//!
//! No gradients. Every weight runs the same two local rules: bounded
//! reinforcement and a first-seen threshold that drifts toward a target
//! firing rate.
//!
//! ## Quick Start
//!
//! ```
//! use grownet::prelude::*;
//!
//! let mut region = Region::new("demo");
//! let hidden = region.add_layer(4, 1, 1);
//! region.bind_input("x", &[hidden]).unwrap();
//!
//! let metrics = region.tick("x", 0.42).unwrap();
//! assert_eq!(metrics.delivered_events, 1);
//! assert!(region.tick("missing", 0.42).is_err());
//! ```
//!
//! ## Feature Flags
//!
//! - `serde` (default): Serialize/deserialize configs, metrics and snapshots
//! - `parallel`: Run bulk wiring tiles on rayon
//!
//! ## Modules
//!
//! - [`weight`], [`slot`]: the learning cell and slot selection
//! - [`neuron`], [`synapse`], [`bus`], [`layer`]: populations and propagation
//! - [`tract`], [`window`]: queued inter-layer delivery
//! - [`topographic`]: distance-weighted windowed wiring presets
//! - [`region`], [`growth`], [`metrics`]: orchestration and structural growth
//! - [`pal`]: deterministic parallel helpers for bulk work
//! - [`observer`]: Read-only observation adapters

#[path = "core/error.rs"]
pub mod error;

#[path = "core/weight.rs"]
pub mod weight;

#[path = "core/slot.rs"]
pub mod slot;

#[path = "core/bus.rs"]
pub mod bus;

#[path = "core/synapse.rs"]
pub mod synapse;

#[path = "core/neuron.rs"]
pub mod neuron;

#[path = "core/layer.rs"]
pub mod layer;

#[path = "core/window.rs"]
pub mod window;

#[path = "core/topographic.rs"]
pub mod topographic;

#[path = "core/tract.rs"]
pub mod tract;

#[path = "core/metrics.rs"]
pub mod metrics;

#[path = "core/growth.rs"]
pub mod growth;

#[path = "core/region.rs"]
pub mod region;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/pal.rs"]
pub mod pal;

pub mod observer;

pub use error::{GrowNetError, Result};

/// Prelude module for convenient imports.
///
/// ```
/// use grownet::prelude::*;
/// ```
pub mod prelude {
    pub use crate::bus::{LateralBus, RegionBus};
    pub use crate::error::GrowNetError;
    pub use crate::growth::{GrowthEngine, GrowthPolicy};
    pub use crate::layer::{Layer, LayerKind};
    pub use crate::metrics::{PruneSummary, RegionMetrics, SpatialMetrics};
    pub use crate::neuron::{Neuron, ReadoutMode, Role};
    pub use crate::observer::{RegionAdapter, RegionSnapshot};
    pub use crate::pal::ParallelOptions;
    pub use crate::region::{MeshRule, Region, RegionConfig};
    pub use crate::slot::{GridPos, SlotConfig};
    pub use crate::topographic::{TopographicConfig, WeightMode};
    pub use crate::weight::Weight;
    pub use crate::window::{Padding, WindowSpec};
}

//! Slot selection: maps a neuron's anchor and a new input to a slot id.
//!
//! The anchor is the first input the neuron ever saw (FIRST policy). Inputs
//! are binned by their percent distance from it. When capacity prevents the
//! desired bin from opening, selection falls back to the highest legal id
//! (`limit - 1`) and records that it did so.
//!
//! Spatial selection works the same way over `(row, col)` positions: the
//! first position seen is the anchor, each axis is binned by its distance in
//! percent of the grid extent, and the two bins are packed into one slot id.

use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::weight::Weight;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SlotConfig {
    /// Width of one slot bucket, in percent of the anchor magnitude.
    pub bin_width_pct: f64,
    /// Lower bound for the anchor magnitude used as the percent denominator.
    pub epsilon_scale: f64,
    /// Default per-neuron slot capacity. 0 means unbounded.
    pub slot_limit: usize,

    pub growth_enabled: bool,
    pub neuron_growth_enabled: bool,
    /// Consecutive at-capacity fallbacks before a neuron asks to grow.
    pub fallback_growth_threshold: u32,
    /// Minimum layer-bus steps between two growth requests from one neuron.
    pub neuron_growth_cooldown_ticks: u64,
    /// Only count a fallback toward the streak if it missed the same slot id.
    pub fallback_growth_requires_same_missing_slot: bool,
    /// Ignore fallbacks whose percent delta is smaller than this (0 disables).
    pub min_delta_pct_for_growth: f64,

    /// Select slots by input position on 2D deliveries.
    pub spatial_enabled: bool,
    /// Row bin width, in percent of the grid height.
    pub row_bin_width_pct: f64,
    /// Column bin width, in percent of the grid width.
    pub col_bin_width_pct: f64,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            bin_width_pct: 10.0,
            epsilon_scale: 1e-6,
            slot_limit: 16,
            growth_enabled: true,
            neuron_growth_enabled: true,
            fallback_growth_threshold: 3,
            neuron_growth_cooldown_ticks: 0,
            fallback_growth_requires_same_missing_slot: false,
            min_delta_pct_for_growth: 0.0,
            spatial_enabled: false,
            row_bin_width_pct: 10.0,
            col_bin_width_pct: 10.0,
        }
    }
}

impl SlotConfig {
    /// Largest accepted slot capacity.
    pub const MAX_SLOT_LIMIT: usize = 1 << 16;
    /// Narrowest spatial bin; keeps column bins below `SPATIAL_KEY_STRIDE`.
    pub const MIN_SPATIAL_BIN_WIDTH_PCT: f64 = 0.01;

    /// One slot per neuron; used by input and output neurons.
    pub fn single_slot() -> Self {
        Self {
            slot_limit: 1,
            ..Default::default()
        }
    }

    pub fn with_bin_width_pct(mut self, pct: f64) -> Self {
        self.bin_width_pct = pct;
        self
    }

    pub fn with_slot_limit(mut self, limit: usize) -> Self {
        self.slot_limit = limit;
        self
    }

    pub fn with_fallback_growth_threshold(mut self, threshold: u32) -> Self {
        self.fallback_growth_threshold = threshold;
        self
    }

    pub fn with_neuron_growth_cooldown(mut self, ticks: u64) -> Self {
        self.neuron_growth_cooldown_ticks = ticks;
        self
    }

    pub fn with_same_missing_slot_guard(mut self, enabled: bool) -> Self {
        self.fallback_growth_requires_same_missing_slot = enabled;
        self
    }

    pub fn with_min_delta_pct_for_growth(mut self, pct: f64) -> Self {
        self.min_delta_pct_for_growth = pct;
        self
    }

    pub fn with_neuron_growth(mut self, enabled: bool) -> Self {
        self.neuron_growth_enabled = enabled;
        self
    }

    pub fn with_spatial(mut self, enabled: bool) -> Self {
        self.spatial_enabled = enabled;
        self
    }

    pub fn with_spatial_bins(mut self, row_pct: f64, col_pct: f64) -> Self {
        self.row_bin_width_pct = row_pct;
        self.col_bin_width_pct = col_pct;
        self
    }

    /// Validate the configuration, returning an error message if invalid.
    pub fn validate(&self) -> Result<(), &'static str> {
        if !(self.bin_width_pct > 0.0) || !self.bin_width_pct.is_finite() {
            return Err("bin_width_pct must be a positive finite number");
        }
        if !(self.epsilon_scale > 0.0) {
            return Err("epsilon_scale must be > 0");
        }
        if self.slot_limit > Self::MAX_SLOT_LIMIT {
            return Err("slot_limit too large");
        }
        if self.min_delta_pct_for_growth < 0.0 {
            return Err("min_delta_pct_for_growth must be >= 0");
        }
        for width in [self.row_bin_width_pct, self.col_bin_width_pct] {
            if !(width >= Self::MIN_SPATIAL_BIN_WIDTH_PCT) || !width.is_finite() {
                return Err("spatial bin widths must be finite and >= 0.01");
            }
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn neuron_growth_active(&self) -> bool {
        self.growth_enabled && self.neuron_growth_enabled
    }
}

/// Outcome of one slot selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotChoice {
    pub slot_id: usize,
    /// The bucket the input asked for, before any fallback.
    pub desired_id: usize,
    pub used_fallback: bool,
    /// Percent distance of the input from the anchor.
    pub delta_pct: f64,
}

/// Packing stride for spatial slot ids: `row_bin * SPATIAL_KEY_STRIDE + col_bin`.
pub const SPATIAL_KEY_STRIDE: usize = 100_000;

/// Where a 2D input came from: a cell of a `height × width` grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridPos {
    pub row: usize,
    pub col: usize,
    pub height: usize,
    pub width: usize,
}

impl GridPos {
    /// Position of row-major `index` on a `height × width` grid.
    pub fn from_index(index: usize, height: usize, width: usize) -> Self {
        let width_nz = width.max(1);
        Self {
            row: index / width_nz,
            col: index % width_nz,
            height,
            width,
        }
    }
}

#[inline]
pub fn pack_spatial(row_bin: usize, col_bin: usize) -> usize {
    row_bin.saturating_mul(SPATIAL_KEY_STRIDE).saturating_add(col_bin)
}

/// Stateless selector; all per-neuron state is passed in.
pub struct SlotEngine;

impl SlotEngine {
    /// Percent-delta bucket of `input` relative to `anchor`.
    pub fn bucket(anchor: f64, input: f64, cfg: &SlotConfig) -> (usize, f64) {
        let denom = anchor.abs().max(cfg.epsilon_scale);
        let delta_pct = (input - anchor).abs() / denom * 100.0;
        let raw = (delta_pct / cfg.bin_width_pct).floor();
        // Saturating float-to-int cast keeps huge outliers in range.
        (raw as usize, delta_pct)
    }

    /// Pick a slot for `input` and create it in `slots` when allowed.
    ///
    /// The slot is created only if it is absent and either the neuron is below
    /// capacity or owns no slots yet. At capacity an absent fallback id is
    /// resolved to the lowest existing id.
    ///
    /// # Arguments
    /// * `slots` - the neuron's slot map
    /// * `anchor` - the neuron's FIRST anchor (already set by the caller)
    /// * `input` - the new input value
    /// * `limit` - effective capacity for this neuron (0 = unbounded)
    pub fn select_or_create(
        slots: &mut BTreeMap<usize, Weight>,
        anchor: f64,
        input: f64,
        limit: usize,
        cfg: &SlotConfig,
    ) -> SlotChoice {
        let (desired, delta_pct) = Self::bucket(anchor, input, cfg);
        let out_of_domain = limit > 0 && desired >= limit;
        let fallback = limit.saturating_sub(1);
        let (slot_id, used_fallback) = Self::claim(slots, desired, out_of_domain, fallback, limit);
        SlotChoice {
            slot_id,
            desired_id: desired,
            used_fallback,
            delta_pct,
        }
    }

    /// Per-axis bins of `at` relative to `anchor`, and the larger of the two
    /// axis deltas in percent.
    pub fn spatial_bins(anchor: (usize, usize), at: GridPos, cfg: &SlotConfig) -> ((usize, usize), f64) {
        let row_pct = at.row.abs_diff(anchor.0) as f64 / at.height.max(1) as f64 * 100.0;
        let col_pct = at.col.abs_diff(anchor.1) as f64 / at.width.max(1) as f64 * 100.0;
        let row_bin = (row_pct / cfg.row_bin_width_pct).floor() as usize;
        let col_bin = ((col_pct / cfg.col_bin_width_pct).floor() as usize).min(SPATIAL_KEY_STRIDE - 1);
        ((row_bin, col_bin), row_pct.max(col_pct))
    }

    /// Spatial counterpart of [`SlotEngine::select_or_create`].
    ///
    /// A position whose row or column bin reaches `limit` is out of domain and
    /// falls back to the packed `(limit - 1, limit - 1)` id. Capacity is
    /// handled exactly as on the scalar path.
    ///
    /// # Arguments
    /// * `anchor` - the neuron's first `(row, col)` (already set by the caller)
    /// * `at` - position of the new input
    pub fn select_or_create_2d(
        slots: &mut BTreeMap<usize, Weight>,
        anchor: (usize, usize),
        at: GridPos,
        limit: usize,
        cfg: &SlotConfig,
    ) -> SlotChoice {
        let ((row_bin, col_bin), delta_pct) = Self::spatial_bins(anchor, at, cfg);
        let desired = pack_spatial(row_bin, col_bin);
        let out_of_domain = limit > 0 && (row_bin >= limit || col_bin >= limit);
        let last = limit.saturating_sub(1);
        let fallback = pack_spatial(last, last);
        let (slot_id, used_fallback) = Self::claim(slots, desired, out_of_domain, fallback, limit);
        SlotChoice {
            slot_id,
            desired_id: desired,
            used_fallback,
            delta_pct,
        }
    }

    /// Shared capacity rule. The chosen id is created only if it is absent and
    /// the neuron is below capacity or owns no slots yet; otherwise an absent
    /// id resolves to the lowest existing one.
    fn claim(
        slots: &mut BTreeMap<usize, Weight>,
        desired: usize,
        out_of_domain: bool,
        fallback: usize,
        limit: usize,
    ) -> (usize, bool) {
        let bounded = limit > 0;
        let at_capacity = bounded && slots.len() >= limit;
        let want_new = !slots.contains_key(&desired);
        let used_fallback = out_of_domain || (at_capacity && want_new);

        let mut slot_id = if used_fallback && bounded { fallback } else { desired };
        if !slots.contains_key(&slot_id) {
            if !at_capacity || slots.is_empty() {
                slots.insert(slot_id, Weight::new());
            } else if let Some(&existing) = slots.keys().next() {
                slot_id = existing;
            }
        }
        (slot_id, used_fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(
        slots: &mut BTreeMap<usize, Weight>,
        anchor: f64,
        input: f64,
        limit: usize,
    ) -> SlotChoice {
        SlotEngine::select_or_create(slots, anchor, input, limit, &SlotConfig::default())
    }

    #[test]
    fn anchor_relative_binning() {
        let mut slots = BTreeMap::new();
        assert_eq!(select(&mut slots, 100.0, 100.0, 16).slot_id, 0);
        assert_eq!(select(&mut slots, 100.0, 110.0, 16).slot_id, 1);
        assert_eq!(slots.len(), 2);

        // 1.8% from the previous input but 12% from the anchor: bucket 1 again.
        let choice = select(&mut slots, 100.0, 112.0, 16);
        assert_eq!(choice.slot_id, 1);
        assert!(!choice.used_fallback);
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn out_of_domain_falls_back_to_last_legal_id() {
        let mut slots = BTreeMap::new();
        select(&mut slots, 1.0, 1.0, 4);
        let choice = select(&mut slots, 1.0, 10.0, 4);
        assert_eq!(choice.desired_id, 90);
        assert!(choice.used_fallback);
        assert_eq!(choice.slot_id, 3);
        // Below capacity, so the fallback bucket is opened.
        assert!(slots.contains_key(&3));
    }

    #[test]
    fn capacity_blocks_new_slots() {
        let mut slots = BTreeMap::new();
        select(&mut slots, 10.0, 10.0, 2);
        select(&mut slots, 10.0, 11.0, 2);
        assert_eq!(slots.len(), 2);

        let choice = select(&mut slots, 10.0, 10.55, 2);
        assert_eq!(choice.slot_id, 0);
        assert!(!choice.used_fallback);

        // Bucket 1 exists; bucket 5 is out of domain and maps to 1.
        let choice = select(&mut slots, 10.0, 15.0, 2);
        assert!(choice.used_fallback);
        assert_eq!(choice.slot_id, 1);
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn first_slot_is_always_created() {
        let mut slots = BTreeMap::new();
        let choice = select(&mut slots, 0.0, 0.0, 1);
        assert_eq!(choice.slot_id, 0);
        assert_eq!(slots.len(), 1);
    }

    #[test]
    fn zero_anchor_uses_epsilon_denominator() {
        let (bucket, delta) = SlotEngine::bucket(0.0, 1e-6, &SlotConfig::default());
        assert!((delta - 100.0).abs() < 1e-9);
        assert_eq!(bucket, 10);
    }

    #[test]
    fn unbounded_limit_never_falls_back() {
        let mut slots = BTreeMap::new();
        select(&mut slots, 1.0, 1.0, 0);
        let choice = select(&mut slots, 1.0, 50.0, 0);
        assert!(!choice.used_fallback);
        assert_eq!(choice.slot_id, 490);
    }

    #[test]
    fn validate_rejects_bad_bins() {
        assert!(SlotConfig::default().validate().is_ok());
        let cfg = SlotConfig {
            bin_width_pct: 0.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    fn at(row: usize, col: usize) -> GridPos {
        GridPos {
            row,
            col,
            height: 4,
            width: 4,
        }
    }

    #[test]
    fn spatial_bins_are_anchor_relative_and_packed() {
        let cfg = SlotConfig::default().with_spatial_bins(50.0, 25.0);
        let mut slots = BTreeMap::new();
        let anchor = (1, 1);

        let first = SlotEngine::select_or_create_2d(&mut slots, anchor, at(1, 1), 16, &cfg);
        assert_eq!(first.slot_id, 0);

        // One column over is 25% of the width: column bin 1.
        let right = SlotEngine::select_or_create_2d(&mut slots, anchor, at(1, 2), 16, &cfg);
        assert_eq!(right.slot_id, pack_spatial(0, 1));
        assert_eq!(right.delta_pct, 25.0);

        // Two rows down is 50% of the height: row bin 1.
        let down = SlotEngine::select_or_create_2d(&mut slots, anchor, at(3, 1), 16, &cfg);
        assert_eq!(down.slot_id, pack_spatial(1, 0));
        assert_eq!(slots.len(), 3);

        // The row above shares bin 0 with the anchor row.
        let up = SlotEngine::select_or_create_2d(&mut slots, anchor, at(0, 1), 16, &cfg);
        assert_eq!(up.slot_id, 0);
        assert_eq!(slots.len(), 3);
    }

    #[test]
    fn spatial_out_of_domain_uses_the_last_packed_id() {
        let cfg = SlotConfig::default();
        let mut slots = BTreeMap::new();
        SlotEngine::select_or_create_2d(&mut slots, (0, 0), at(0, 0), 2, &cfg);

        // 75% down the grid is row bin 7, past a limit of 2.
        let choice = SlotEngine::select_or_create_2d(&mut slots, (0, 0), at(3, 0), 2, &cfg);
        assert!(choice.used_fallback);
        assert_eq!(choice.desired_id, pack_spatial(7, 0));
        assert_eq!(choice.slot_id, pack_spatial(1, 1));
        assert_eq!(slots.len(), 2);

        // At capacity an absent fallback id resolves to the lowest existing id.
        let mut full = BTreeMap::new();
        SlotEngine::select_or_create_2d(&mut full, (0, 0), at(0, 0), 1, &cfg);
        let choice = SlotEngine::select_or_create_2d(&mut full, (0, 0), at(2, 2), 1, &cfg);
        assert!(choice.used_fallback);
        assert_eq!(choice.slot_id, 0);
        assert_eq!(full.len(), 1);
    }

    #[test]
    fn grid_pos_from_row_major_index() {
        let pos = GridPos::from_index(6, 4, 4);
        assert_eq!((pos.row, pos.col), (1, 2));
        assert!(SlotConfig::default().with_spatial_bins(0.0, 10.0).validate().is_err());
    }
}

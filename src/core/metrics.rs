//! Per-tick metrics and prune summaries.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// What one tick produced.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegionMetrics {
    /// Driven edge layers plus destination neurons that fired in Phase B.
    pub delivered_events: u64,
    pub total_slots: usize,
    /// Intra-layer synapses plus tract edges.
    pub total_synapses: usize,
    /// Only for 2D ticks with spatial metrics enabled.
    pub spatial: Option<SpatialMetrics>,
}

impl RegionMetrics {
    pub fn inc_delivered_events(&mut self, n: u64) {
        self.delivered_events += n;
    }
}

/// Activity statistics over a 2D frame. Pixels with `v > 0` count as active.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpatialMetrics {
    pub active_pixels: usize,
    /// Value-weighted centroid `(row, col)`; `(0, 0)` when nothing is active.
    pub centroid: (f64, f64),
    /// `(row_min, row_max, col_min, col_max)`; `(0, -1, 0, -1)` when empty.
    pub bbox: (isize, isize, isize, isize),
}

impl Default for SpatialMetrics {
    fn default() -> Self {
        Self {
            active_pixels: 0,
            centroid: (0.0, 0.0),
            bbox: (0, -1, 0, -1),
        }
    }
}

impl SpatialMetrics {
    /// Compute over a row-major `height × width` frame. Extra values beyond
    /// `height * width` are ignored.
    pub fn from_frame(frame: &[f64], height: usize, width: usize) -> Self {
        let mut out = Self::default();
        if width == 0 {
            return out;
        }

        let (mut row_min, mut row_max) = (usize::MAX, 0usize);
        let (mut col_min, mut col_max) = (usize::MAX, 0usize);
        let (mut total, mut sum_r, mut sum_c) = (0.0, 0.0, 0.0);

        for (i, &v) in frame.iter().take(height * width).enumerate() {
            if v <= 0.0 {
                continue;
            }
            let (r, c) = (i / width, i % width);
            out.active_pixels += 1;
            total += v;
            sum_r += v * r as f64;
            sum_c += v * c as f64;
            row_min = row_min.min(r);
            row_max = row_max.max(r);
            col_min = col_min.min(c);
            col_max = col_max.max(c);
        }

        if out.active_pixels > 0 {
            out.centroid = (sum_r / total, sum_c / total);
            out.bbox = (row_min as isize, row_max as isize, col_min as isize, col_max as isize);
        }
        out
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.active_pixels == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PruneSummary {
    pub pruned_synapses: usize,
    pub pruned_edges: usize,
}

impl PruneSummary {
    pub fn total(&self) -> usize {
        self.pruned_synapses + self.pruned_edges
    }
}

//! Topographic wiring: windowed tracts with deterministic distance-based
//! kernel weights.
//!
//! Each covered source pixel is weighted by its distance to the center of the
//! window that claims it, either as a Gaussian or as a difference of
//! Gaussians (center minus a scaled surround, floored at zero). Weights can
//! be normalized so every center's incoming weights sum to 1.

use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::window::{windows, Padding, WindowSpec};

/// Incoming sums below this are left unnormalized.
const NORMALIZE_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WeightMode {
    #[default]
    Gaussian,
    /// Center Gaussian minus `surround_ratio` times a wider surround.
    DifferenceOfGaussians,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TopographicConfig {
    pub kernel: (usize, usize),
    pub stride: (usize, usize),
    pub padding: Padding,
    pub feedback: bool,
    pub weight_mode: WeightMode,
    pub sigma_center: f64,
    pub sigma_surround: f64,
    pub surround_ratio: f64,
    /// Scale each center's incoming weights to sum to 1.
    pub normalize_incoming: bool,
}

impl Default for TopographicConfig {
    fn default() -> Self {
        Self {
            kernel: (7, 7),
            stride: (1, 1),
            padding: Padding::Same,
            feedback: false,
            weight_mode: WeightMode::Gaussian,
            sigma_center: 2.0,
            sigma_surround: 4.0,
            surround_ratio: 0.5,
            normalize_incoming: true,
        }
    }
}

impl TopographicConfig {
    pub fn with_kernel(mut self, height: usize, width: usize) -> Self {
        self.kernel = (height, width);
        self
    }

    pub fn with_stride(mut self, rows: usize, cols: usize) -> Self {
        self.stride = (rows, cols);
        self
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_feedback(mut self, feedback: bool) -> Self {
        self.feedback = feedback;
        self
    }

    pub fn with_gaussian(mut self, sigma: f64) -> Self {
        self.weight_mode = WeightMode::Gaussian;
        self.sigma_center = sigma;
        self
    }

    pub fn with_difference_of_gaussians(mut self, sigma_center: f64, sigma_surround: f64, surround_ratio: f64) -> Self {
        self.weight_mode = WeightMode::DifferenceOfGaussians;
        self.sigma_center = sigma_center;
        self.sigma_surround = sigma_surround;
        self.surround_ratio = surround_ratio;
        self
    }

    pub fn with_normalize_incoming(mut self, normalize: bool) -> Self {
        self.normalize_incoming = normalize;
        self
    }

    /// Validate the configuration, returning an error message if invalid.
    pub fn validate(&self) -> core::result::Result<(), &'static str> {
        if self.kernel.0 == 0 || self.kernel.1 == 0 {
            return Err("kernel dimensions must be >= 1");
        }
        if self.stride.0 == 0 || self.stride.1 == 0 {
            return Err("stride must be >= 1");
        }
        if !(self.sigma_center > 0.0) || !self.sigma_center.is_finite() {
            return Err("sigma_center must be > 0");
        }
        if self.weight_mode == WeightMode::DifferenceOfGaussians {
            if !(self.sigma_surround > self.sigma_center) || !self.sigma_surround.is_finite() {
                return Err("sigma_surround must be > sigma_center for difference of Gaussians");
            }
            if !(self.surround_ratio >= 0.0) {
                return Err("surround_ratio must be >= 0");
            }
        }
        Ok(())
    }

    pub fn window_spec(&self) -> WindowSpec {
        WindowSpec::new(self.kernel, self.stride, self.padding)
    }

    /// Kernel value at squared pixel distance `d2` from the center.
    pub fn kernel_value(&self, d2: f64) -> f64 {
        let center = gaussian(d2, self.sigma_center);
        match self.weight_mode {
            WeightMode::Gaussian => center,
            WeightMode::DifferenceOfGaussians => {
                (center - self.surround_ratio * gaussian(d2, self.sigma_surround)).max(0.0)
            }
        }
    }
}

#[inline]
fn gaussian(d2: f64, sigma: f64) -> f64 {
    (-d2 / (2.0 * sigma * sigma)).exp()
}

/// `(source, center)` → weight, for every pixel a window covers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KernelWeights {
    weights: BTreeMap<(usize, usize), f64>,
}

impl KernelWeights {
    /// Compute weights over a `height × width` source. Center indices are
    /// row-major on the same grid, matching the windowed tract's center map.
    /// A pixel covered by several windows with the same center keeps its
    /// first weight.
    pub fn compute(height: usize, width: usize, cfg: &TopographicConfig) -> Result<Self> {
        let mut weights = BTreeMap::new();
        for window in windows(height, width, &cfg.window_spec())? {
            let (center_row, center_col) = window.center;
            let center = center_row * width + center_col;
            for row in window.rows.clone() {
                for col in window.cols.clone() {
                    let dr = row as f64 - center_row as f64;
                    let dc = col as f64 - center_col as f64;
                    weights
                        .entry((row * width + col, center))
                        .or_insert_with(|| cfg.kernel_value(dr * dr + dc * dc));
                }
            }
        }

        if cfg.normalize_incoming {
            let mut sums: BTreeMap<usize, f64> = BTreeMap::new();
            for (&(_, center), &w) in &weights {
                *sums.entry(center).or_default() += w;
            }
            for (&(_, center), w) in weights.iter_mut() {
                let sum = sums.get(&center).copied().unwrap_or(0.0);
                if sum > NORMALIZE_EPSILON {
                    *w /= sum;
                }
            }
        }
        Ok(Self { weights })
    }

    pub fn get(&self, source: usize, center: usize) -> Option<f64> {
        self.weights.get(&(source, center)).copied()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// `((source, center), weight)` in key order.
    pub fn iter(&self) -> impl Iterator<Item = ((usize, usize), f64)> + '_ {
        self.weights.iter().map(|(&k, &w)| (k, w))
    }

    /// Total incoming weight per center, for `len` destination cells.
    pub fn incoming_sums(&self, len: usize) -> Vec<f64> {
        let mut sums = vec![0.0; len];
        for (&(_, center), &w) in &self.weights {
            if let Some(slot) = sums.get_mut(center) {
                *slot += w;
            }
        }
        sums
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_centers_sum_to_one() {
        let cfg = TopographicConfig::default()
            .with_kernel(3, 3)
            .with_gaussian(1.5);
        let kernel = KernelWeights::compute(8, 8, &cfg).expect("weights");
        let sums = kernel.incoming_sums(64);
        assert!(sums.iter().any(|&s| s > 0.0));
        for s in sums.into_iter().filter(|&s| s > 0.0) {
            assert!((s - 1.0).abs() < 1e-9, "sum {s}");
        }
    }

    #[test]
    fn gaussian_falls_off_with_distance() {
        let cfg = TopographicConfig::default()
            .with_kernel(5, 5)
            .with_padding(Padding::Valid)
            .with_gaussian(2.0)
            .with_normalize_incoming(false);
        let kernel = KernelWeights::compute(5, 5, &cfg).expect("weights");
        let center = 2 * 5 + 2;
        let at = |src| kernel.get(src, center).expect("weight");
        assert_eq!(at(center), 1.0);
        assert!(at(center) > at(center + 1));
        assert!(at(center + 1) > at(center + 2));
        assert_eq!(kernel.len(), 25);
    }

    #[test]
    fn difference_of_gaussians_is_non_negative() {
        let cfg = TopographicConfig::default()
            .with_kernel(7, 7)
            .with_padding(Padding::Valid)
            .with_difference_of_gaussians(1.5, 3.0, 0.5)
            .with_normalize_incoming(false);
        let kernel = KernelWeights::compute(7, 7, &cfg).expect("weights");
        let center = 3 * 7 + 3;
        assert!((kernel.get(center, center).expect("center") - 0.5).abs() < 1e-12);
        assert!(kernel.iter().all(|(_, w)| w >= 0.0));
        // The far corner sits in the suppressed surround.
        assert_eq!(kernel.get(0, center), Some(0.0));
    }

    #[test]
    fn weights_are_deterministic() {
        let cfg = TopographicConfig::default().with_kernel(3, 3).with_gaussian(1.7);
        let a = KernelWeights::compute(6, 6, &cfg).expect("weights");
        let b = KernelWeights::compute(6, 6, &cfg).expect("weights");
        assert_eq!(a, b);
    }

    #[test]
    fn validate_rejects_degenerate_kernels() {
        assert!(TopographicConfig::default().validate().is_ok());
        assert!(TopographicConfig::default().with_kernel(0, 3).validate().is_err());
        assert!(TopographicConfig::default().with_stride(1, 0).validate().is_err());
        assert!(TopographicConfig::default().with_gaussian(0.0).validate().is_err());
        let dog = TopographicConfig::default().with_difference_of_gaussians(2.0, 2.0, 0.5);
        assert!(dog.validate().is_err());
        let dog = TopographicConfig::default().with_difference_of_gaussians(1.0, 2.0, -0.1);
        assert!(dog.validate().is_err());
    }
}

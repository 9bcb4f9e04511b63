//! Convolution-like window enumeration for windowed tracts.
//!
//! Produces the set of source pixels any window covers and, for 2D output
//! destinations, a source→center map where each source pixel belongs to the
//! first window that claims it.

use std::collections::BTreeMap;
use std::ops::Range;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{GrowNetError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Padding {
    /// Only fully in-bounds windows.
    #[default]
    Valid,
    /// Symmetric padding; `ceil(dim / stride)` windows per axis.
    Same,
}

impl core::str::FromStr for Padding {
    type Err = GrowNetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "valid" => Ok(Padding::Valid),
            "same" => Ok(Padding::Same),
            _ => Err(GrowNetError::InvalidArgument(
                "padding must be \"valid\" or \"same\"",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WindowSpec {
    pub kernel: (usize, usize),
    pub stride: (usize, usize),
    pub padding: Padding,
}

impl WindowSpec {
    pub fn new(kernel: (usize, usize), stride: (usize, usize), padding: Padding) -> Self {
        Self {
            kernel,
            stride,
            padding,
        }
    }

    /// Square kernel, uniform stride.
    pub fn square(kernel: usize, stride: usize, padding: Padding) -> Self {
        Self::new((kernel, kernel), (stride, stride), padding)
    }

    pub fn validate(&self) -> Result<()> {
        if self.kernel.0 == 0 || self.kernel.1 == 0 {
            return Err(GrowNetError::InvalidArgument("kernel dimensions must be > 0"));
        }
        if self.stride.0 == 0 || self.stride.1 == 0 {
            return Err(GrowNetError::InvalidArgument("stride must be > 0"));
        }
        Ok(())
    }
}

/// Window origins along one axis (may be negative under `Same`).
pub fn axis_origins(dim: usize, kernel: usize, stride: usize, padding: Padding) -> Vec<isize> {
    let (dim, kernel, stride) = (dim as isize, kernel as isize, stride as isize);
    match padding {
        Padding::Valid => {
            let mut out = Vec::new();
            let mut origin = 0;
            while origin + kernel <= dim {
                out.push(origin);
                origin += stride;
            }
            out
        }
        Padding::Same => {
            let count = (dim + stride - 1) / stride;
            let pad_total = ((count - 1) * stride + kernel - dim).max(0);
            let pad_before = pad_total / 2;
            (0..count).map(|i| i * stride - pad_before).collect()
        }
    }
}

/// Result of enumerating windows over an `height × width` source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowMap {
    /// Every source index covered by at least one window, ascending.
    pub allowed: Vec<usize>,
    /// Source index → center index, first window wins. Empty unless built
    /// for a 2D output destination.
    pub centers: BTreeMap<usize, usize>,
}

impl WindowMap {
    pub fn unique_sources(&self) -> usize {
        self.allowed.len()
    }
}

/// One window clipped to the grid, with its center clamped inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub rows: Range<usize>,
    pub cols: Range<usize>,
    pub center: (usize, usize),
}

/// Windows over a `height × width` grid in row-major origin order. Windows
/// that fall entirely in the padding are skipped.
pub fn windows(height: usize, width: usize, spec: &WindowSpec) -> Result<Vec<Window>> {
    spec.validate()?;
    if height == 0 || width == 0 {
        return Ok(Vec::new());
    }

    let (kh, kw) = spec.kernel;
    let rows = axis_origins(height, kh, spec.stride.0, spec.padding);
    let cols = axis_origins(width, kw, spec.stride.1, spec.padding);
    let (h, w) = (height as isize, width as isize);

    let mut out = Vec::with_capacity(rows.len() * cols.len());
    for &r0 in &rows {
        for &c0 in &cols {
            let (row_lo, row_hi) = (r0.max(0), (r0 + kh as isize).min(h));
            let (col_lo, col_hi) = (c0.max(0), (c0 + kw as isize).min(w));
            if row_lo >= row_hi || col_lo >= col_hi {
                continue;
            }
            out.push(Window {
                rows: row_lo as usize..row_hi as usize,
                cols: col_lo as usize..col_hi as usize,
                center: (
                    (r0 + kh as isize / 2).clamp(0, h - 1) as usize,
                    (c0 + kw as isize / 2).clamp(0, w - 1) as usize,
                ),
            });
        }
    }
    Ok(out)
}

/// Enumerate windows over a `height × width` grid.
///
/// # Arguments
/// * `with_centers` - also build the first-writer-wins center map
pub fn build_window_map(height: usize, width: usize, spec: &WindowSpec, with_centers: bool) -> Result<WindowMap> {
    let mut map = WindowMap::default();
    let mut covered = vec![false; height * width];
    for window in windows(height, width, spec)? {
        let center = window.center.0 * width + window.center.1;
        for row in window.rows.clone() {
            for col in window.cols.clone() {
                let src = row * width + col;
                covered[src] = true;
                if with_centers {
                    map.centers.entry(src).or_insert(center);
                }
            }
        }
    }

    map.allowed = covered
        .iter()
        .enumerate()
        .filter_map(|(i, hit)| hit.then_some(i))
        .collect();
    Ok(map)
}

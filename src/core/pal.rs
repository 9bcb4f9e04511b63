//! Deterministic parallel-execution helpers for bulk, bus-free work.
//!
//! Results never depend on tiling or worker count: maps are reduced in index
//! order, and random decisions inside kernels should come from
//! [`counter_rng`], which is a pure function of its counters.
//!
//! With the `parallel` feature tiles run on rayon; without it everything runs
//! on the calling thread. Never call these from inside a region tick.

use core::ops::Range;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::prng::counter_uniform;

/// Indices handed to one worker at a time when no tile size is given.
pub const DEFAULT_TILE_SIZE: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParallelOptions {
    /// `Some(1)` forces sequential execution; `None` uses the global pool.
    pub max_workers: Option<usize>,
    pub tile_size: Option<usize>,
}

impl ParallelOptions {
    pub fn sequential() -> Self {
        Self {
            max_workers: Some(1),
            tile_size: None,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers.max(1));
        self
    }

    pub fn with_tile_size(mut self, tile: usize) -> Self {
        self.tile_size = Some(tile.max(1));
        self
    }

    #[cfg(feature = "parallel")]
    fn tile(&self) -> usize {
        self.tile_size.unwrap_or(DEFAULT_TILE_SIZE).max(1)
    }
}

/// Random-draw families for [`counter_rng`].
pub mod draw_kind {
    pub const TRACT_WIRING: u64 = 1;
    pub const LAYER_WIRING: u64 = 2;
    pub const USER: u64 = 1 << 32;
}

/// Uniform draw in [0,1) identified by its counters alone.
#[inline]
pub fn counter_rng(seed: u64, step: u64, draw_kind: u64, layer: u64, unit: u64, draw: u64) -> f64 {
    counter_uniform(seed, step, draw_kind, layer, unit, draw)
}

/// Run `kernel` once per index in `domain`.
pub fn parallel_for<F>(domain: Range<usize>, opts: &ParallelOptions, kernel: F)
where
    F: Fn(usize) + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        if opts.max_workers != Some(1) {
            let tile = opts.tile();
            let run = || domain.clone().into_par_iter().with_min_len(tile).for_each(&kernel);
            match dedicated_pool(opts) {
                Some(pool) => pool.install(run),
                None => run(),
            }
            return;
        }
    }
    #[cfg(not(feature = "parallel"))]
    let _ = opts;

    domain.for_each(kernel);
}

/// Map every index through `kernel`, then hand the results to
/// `reduce_in_order` in ascending index order.
pub fn parallel_map_ordered<T, F, R>(domain: Range<usize>, opts: &ParallelOptions, kernel: F, mut reduce_in_order: R)
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
    R: FnMut(usize, T),
{
    #[cfg(feature = "parallel")]
    {
        if opts.max_workers != Some(1) {
            let tile = opts.tile();
            let start = domain.start;
            let run = || {
                domain
                    .clone()
                    .into_par_iter()
                    .with_min_len(tile)
                    .map(&kernel)
                    .collect::<Vec<T>>()
            };
            let values = match dedicated_pool(opts) {
                Some(pool) => pool.install(run),
                None => run(),
            };
            for (offset, value) in values.into_iter().enumerate() {
                reduce_in_order(start + offset, value);
            }
            return;
        }
    }
    #[cfg(not(feature = "parallel"))]
    let _ = opts;

    for index in domain {
        reduce_in_order(index, kernel(index));
    }
}

#[cfg(feature = "parallel")]
fn dedicated_pool(opts: &ParallelOptions) -> Option<rayon::ThreadPool> {
    let workers = opts.max_workers?;
    match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => Some(pool),
        Err(err) => {
            tracing::debug!(%err, "falling back to the global rayon pool");
            None
        }
    }
}

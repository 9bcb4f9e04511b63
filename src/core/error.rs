//! Failure kinds surfaced by region construction and ticking.
//!
//! Capacity fallback is deliberately absent: reusing a slot at capacity is
//! normal operation and only feeds the growth heuristics.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GrowNetError {
    /// Unbound port, mismatched edge kind, or an invalid config.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Frame or tensor shape differs from the bound edge's declared shape.
    #[error("shape mismatch on port '{port}': expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        port: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("{what} index {index} out of range (len {len})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

pub type Result<T> = core::result::Result<T, GrowNetError>;

impl GrowNetError {
    pub(crate) fn unbound_port(port: &str) -> Self {
        Self::Configuration(format!("no input edge bound for port '{port}'"))
    }

    pub(crate) fn layer_index(index: usize, len: usize) -> Self {
        Self::IndexOutOfRange {
            what: "layer",
            index,
            len,
        }
    }

    /// True for the configuration failure kind.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

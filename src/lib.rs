//! # Veles - Spatial pooling on Sparse Distributed Representations
//!
//! Veles is an idiomatic Rust implementation of the Spatial Pooler, the
//! unsupervised learning primitive at the core of Hierarchical Temporal
//! Memory (HTM), ported from the htm.core C++ library.
//!
//! ## Overview
//!
//! The Spatial Pooler maps arbitrary binary input patterns to fixed-sparsity
//! binary output patterns. Similar inputs produce overlapping outputs, every
//! output bit participates roughly equally often, and no output bit dominates.
//! The crate provides:
//!
//! - **Sparse Distributed Representations (SDR)**: a multi-dimensional binary
//!   tensor with three lazily-cached views (dense, sparse, coordinates)
//! - **Spatial Pooler**: potential pools, Hebbian permanence learning,
//!   k-winners-take-all inhibition, homeostatic boosting
//! - **Connections**: the synaptic graph the pooler learns on
//! - **Topology** helpers and a seedable deterministic **Random** generator
//!
//! ## Quick Start
//!
//! ```rust
//! use veles::prelude::*;
//!
//! let mut sp = SpatialPooler::new(SpatialPoolerParams {
//!     input_dimensions: vec![100],
//!     column_dimensions: vec![256],
//!     potential_radius: 50,
//!     ..Default::default()
//! }).unwrap();
//!
//! let mut input = Sdr::new(&[100]).unwrap();
//! let mut active = Sdr::new(&[256]).unwrap();
//!
//! input.set_sparse(&[3, 14, 15, 62, 83]).unwrap();
//! let overlaps = sp.compute(&input, true, &mut active).unwrap();
//!
//! assert!(active.get_sum().unwrap() > 0);
//! assert_eq!(overlaps.len(), 256);
//! ```
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization support
//!
//! ## Determinism
//!
//! Given a fixed seed and a fixed input sequence, `compute` produces
//! bit-identical outputs and internal state across runs. All randomness
//! flows through a single explicitly-threaded [`utils::Random`] instance.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::similar_names)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod types;
pub mod algorithms;
pub mod utils;

/// Re-export of commonly used types and traits for convenience.
pub mod prelude {
    pub use crate::types::{
        Sdr, SdrCoordinates, SdrDense, SdrSparse,
        CellIdx, ElemDense, ElemSparse, Permanence, Real, Real64, Segment, Synapse, SynapseIdx,
        UInt, MAX_PERMANENCE, MIN_PERMANENCE,
    };
    pub use crate::algorithms::{Connections, SpatialPooler, SpatialPoolerParams};
    pub use crate::utils::{CoordinateConverter, Neighborhood, Random, WrappingNeighborhood};
    pub use crate::error::{Result, VelesError};
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for the library.
pub mod error {
    use thiserror::Error;

    /// Main error type for veles operations.
    #[derive(Error, Debug)]
    pub enum VelesError {
        /// Argument outside its documented range.
        #[error("Invalid parameter '{name}': {message}")]
        InvalidParameter {
            /// Name of the offending parameter.
            name: &'static str,
            /// Description of the violated range.
            message: String,
        },

        /// SDR or vector dimensions inconsistent with what the operation expects.
        #[error("Dimension mismatch: expected {expected:?}, got {actual:?}")]
        DimensionMismatch {
            /// Expected dimensions.
            expected: Vec<u32>,
            /// Actual dimensions.
            actual: Vec<u32>,
        },

        /// Index out of bounds.
        #[error("Index {index} out of bounds (size: {size})")]
        IndexOutOfBounds {
            /// The invalid index.
            index: usize,
            /// The valid size.
            size: usize,
        },

        /// SDR setter data is malformed (e.g. unsorted sparse indices).
        #[error("Invalid SDR data: {0}")]
        InvalidSdrData(String),

        /// SDR getter called before any value has been assigned.
        #[error("SDR has no value")]
        NoValue,

        /// Callback handle was never issued or has already been removed.
        #[error("Unknown callback handle: {0}")]
        UnknownHandle(usize),

        /// Density settings would select zero active columns.
        #[error("Exhaustion: {0}")]
        Exhaustion(String),

        /// Stream failure during save/load.
        #[error("I/O error: {message}")]
        Io {
            /// Description of the I/O failure.
            message: String,
        },

        /// Malformed serialized record.
        #[error("Parse error: {0}")]
        ParseError(String),
    }

    /// Result type alias using `VelesError`.
    pub type Result<T> = std::result::Result<T, VelesError>;
}

pub use error::{Result, VelesError};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}

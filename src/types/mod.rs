//! Core types for the library.
//!
//! This module contains the fundamental type aliases and the SDR (Sparse
//! Distributed Representation) container every algorithm operates on.

mod primitives;
mod sdr;

pub use primitives::*;
pub use sdr::*;

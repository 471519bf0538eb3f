//! Primitive type definitions shared across the library.
//!
//! These aliases keep the numeric conventions of the original C++
//! implementation while staying ordinary Rust integers and floats.

/// 32-bit unsigned integer, the default index/count type.
pub type UInt = u32;

/// 32-bit floating point number, the default real type.
pub type Real = f32;

/// 64-bit floating point number, used where extra precision matters
/// (random draws, long-running averages).
pub type Real64 = f64;

/// Index of a cell in the connections graph. For the Spatial Pooler every
/// column is a single cell, so this doubles as a column index.
pub type CellIdx = u32;

/// Unique identifier of a segment in the connections flat list.
pub type Segment = u32;

/// Unique identifier of a synapse in the connections flat list.
pub type Synapse = u32;

/// Per-segment synapse count; overlap scores are sums of these.
pub type SynapseIdx = u16;

/// Synapse permanence value, clamped to `[MIN_PERMANENCE, MAX_PERMANENCE]`.
pub type Permanence = Real;

/// Lower bound of the permanence range.
pub const MIN_PERMANENCE: Permanence = 0.0;

/// Upper bound of the permanence range.
pub const MAX_PERMANENCE: Permanence = 1.0;

/// Epsilon for floating point comparisons.
pub const EPSILON: Real = 1e-6;

/// Element type of the dense SDR view (one byte per bit, 0 or 1).
pub type ElemDense = u8;

/// Element type of the sparse SDR view (flat bit indices).
pub type ElemSparse = u32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_sizes() {
        assert_eq!(core::mem::size_of::<CellIdx>(), 4);
        assert_eq!(core::mem::size_of::<Segment>(), 4);
        assert_eq!(core::mem::size_of::<Synapse>(), 4);
        assert_eq!(core::mem::size_of::<SynapseIdx>(), 2);
        assert_eq!(core::mem::size_of::<Permanence>(), 4);
    }

    #[test]
    fn test_permanence_bounds() {
        assert!(MIN_PERMANENCE < MAX_PERMANENCE);
        assert!(EPSILON > 0.0);
        assert!(EPSILON < 0.001);
    }
}

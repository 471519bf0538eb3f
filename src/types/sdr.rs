//! Sparse Distributed Representation (SDR).
//!
//! An SDR is a multi-dimensional binary tensor kept in three mutually
//! consistent views:
//! - **Dense**: one byte per bit, 0 or 1
//! - **Sparse**: ascending flat indices of the set bits
//! - **Coordinates**: per-axis coordinate lists, parallel to the sparse view
//!
//! Views are materialized lazily and cached; setters install one view,
//! invalidate the others, and notify registered callbacks. A freshly
//! constructed SDR holds *no value*: every getter fails until `zero()` or a
//! setter has run.

use crate::error::{Result, VelesError};
use crate::types::{ElemDense, ElemSparse, Real, UInt};
use crate::utils::{CoordinateConverter, Random};

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::io::{BufRead, Write};

/// Type alias for the dense SDR view (array of bytes, 0 or 1).
pub type SdrDense = Vec<ElemDense>;

/// Type alias for the sparse SDR view (ascending indices of set bits).
pub type SdrSparse = Vec<ElemSparse>;

/// Type alias for the coordinates SDR view (one list per axis).
pub type SdrCoordinates = Vec<Vec<UInt>>;

/// Callback invoked whenever the SDR's value changes.
pub type SdrCallback = Box<dyn FnMut() + Send>;

/// Magic token opening a serialized SDR record.
const SAVE_MAGIC: &str = "SDR";

/// Token closing a serialized SDR record.
const SAVE_END: &str = "~SDR";

/// Cached views; `None` means stale.
#[derive(Default)]
struct SdrCache {
    dense: Option<SdrDense>,
    sparse: Option<SdrSparse>,
    coordinates: Option<SdrCoordinates>,
}

/// Sparse Distributed Representation.
///
/// # Example
///
/// ```rust
/// use veles::types::Sdr;
///
/// let mut sdr = Sdr::new(&[3, 3]).unwrap();
/// sdr.set_sparse(&[1, 4, 8]).unwrap();
///
/// assert_eq!(sdr.get_sum().unwrap(), 3);
/// assert_eq!(sdr.get_dense().unwrap(), vec![0, 1, 0, 0, 1, 0, 0, 0, 1]);
/// assert_eq!(sdr.get_coordinates().unwrap(), vec![vec![0, 1, 2], vec![1, 1, 2]]);
/// ```
pub struct Sdr {
    /// Dimensions, immutable after construction except through `reshape`.
    dimensions: Vec<UInt>,

    /// Total size (product of dimensions), invariant under `reshape`.
    size: usize,

    /// Cached views (interior mutability for lazy materialization).
    cache: RefCell<SdrCache>,

    /// Value-change observers, paired with their handles.
    callbacks: RefCell<Vec<(usize, SdrCallback)>>,

    /// Next callback handle; handles are never reused.
    next_handle: Cell<usize>,
}

// Serialization carries dimensions plus the sparse view.
#[cfg(feature = "serde")]
mod serde_impl {
    use super::*;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct SdrState {
        dimensions: Vec<UInt>,
        sparse: Option<SdrSparse>,
    }

    impl Serialize for Sdr {
        fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let state = SdrState {
                dimensions: self.dimensions.clone(),
                sparse: if self.has_value() {
                    Some(self.get_sparse().map_err(serde::ser::Error::custom)?)
                } else {
                    None
                },
            };
            state.serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for Sdr {
        fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            let state = SdrState::deserialize(deserializer)?;
            let mut sdr = Sdr::new(&state.dimensions).map_err(serde::de::Error::custom)?;
            if let Some(sparse) = state.sparse {
                sdr.set_sparse_owned(sparse).map_err(serde::de::Error::custom)?;
            }
            Ok(sdr)
        }
    }
}

impl Sdr {
    /// Creates a new SDR with the given dimensions and no value.
    ///
    /// # Errors
    ///
    /// Fails if the shape is empty or any dimension is zero.
    pub fn new(dimensions: &[UInt]) -> Result<Self> {
        if dimensions.is_empty() {
            return Err(VelesError::InvalidParameter {
                name: "dimensions",
                message: "shape cannot be empty".to_string(),
            });
        }
        if dimensions.contains(&0) {
            return Err(VelesError::InvalidParameter {
                name: "dimensions",
                message: format!("all dimensions must be positive, got {dimensions:?}"),
            });
        }

        Ok(Self {
            dimensions: dimensions.to_vec(),
            size: dimensions.iter().map(|&d| d as usize).product(),
            cache: RefCell::new(SdrCache::default()),
            callbacks: RefCell::new(Vec::new()),
            next_handle: Cell::new(0),
        })
    }

    /// Returns the dimensions of this SDR.
    #[inline]
    #[must_use]
    pub fn dimensions(&self) -> &[UInt] {
        &self.dimensions
    }

    /// Returns the total number of bits.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the number of dimensions.
    #[inline]
    #[must_use]
    pub fn num_dimensions(&self) -> usize {
        self.dimensions.len()
    }

    /// Returns true once a value has been assigned (and not `clear`ed).
    #[must_use]
    pub fn has_value(&self) -> bool {
        let cache = self.cache.borrow();
        cache.dense.is_some() || cache.sparse.is_some() || cache.coordinates.is_some()
    }

    /// Reshapes to new dimensions with the same total size.
    ///
    /// # Errors
    ///
    /// Fails if the new shape has a different total size.
    pub fn reshape(&mut self, new_dimensions: &[UInt]) -> Result<()> {
        let new_size: usize = new_dimensions.iter().map(|&d| d as usize).product();
        if new_size != self.size || new_dimensions.is_empty() {
            return Err(VelesError::DimensionMismatch {
                expected: self.dimensions.clone(),
                actual: new_dimensions.to_vec(),
            });
        }

        self.dimensions = new_dimensions.to_vec();

        // Coordinates depend on the shape; dense and sparse do not.
        self.cache.get_mut().coordinates = None;
        Ok(())
    }

    /// Sets all bits to zero. The sparse view becomes valid.
    pub fn zero(&mut self) {
        {
            let cache = self.cache.get_mut();
            cache.sparse = Some(Vec::new());
            cache.dense = None;
            cache.coordinates = None;
        }
        self.notify();
    }

    /// Drops the value entirely; getters fail with `NoValue` until the next
    /// setter. Does not notify callbacks.
    pub fn clear(&mut self) {
        let cache = self.cache.get_mut();
        cache.dense = None;
        cache.sparse = None;
        cache.coordinates = None;
    }

    /// Invokes all registered callbacks.
    fn notify(&self) {
        for (_, callback) in self.callbacks.borrow_mut().iter_mut() {
            callback();
        }
    }

    // ========================================================================
    // Dense view
    // ========================================================================

    /// Sets the value from a dense byte array; nonzero means set.
    ///
    /// # Errors
    ///
    /// Fails with a dimension mismatch if the length is not `size`.
    pub fn set_dense(&mut self, data: &[ElemDense]) -> Result<()> {
        self.set_dense_owned(data.to_vec())
    }

    /// Sets the value from a dense byte array, taking ownership of the
    /// buffer. No copy is made when the length matches.
    ///
    /// # Errors
    ///
    /// Fails with a dimension mismatch if the length is not `size`.
    pub fn set_dense_owned(&mut self, data: SdrDense) -> Result<()> {
        if data.len() != self.size {
            return Err(VelesError::DimensionMismatch {
                expected: vec![self.size as UInt],
                actual: vec![data.len() as UInt],
            });
        }

        {
            let cache = self.cache.get_mut();
            cache.dense = Some(data);
            cache.sparse = None;
            cache.coordinates = None;
        }
        self.notify();
        Ok(())
    }

    /// Returns a copy of the dense view, materializing it if stale.
    ///
    /// # Errors
    ///
    /// Fails with `NoValue` if no value has been assigned.
    pub fn get_dense(&self) -> Result<SdrDense> {
        self.with_dense(Clone::clone)
    }

    /// Calls `f` with a reference to the dense view, materializing it if
    /// stale, without copying the buffer out.
    ///
    /// # Errors
    ///
    /// Fails with `NoValue` if no value has been assigned.
    pub fn with_dense<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&SdrDense) -> R,
    {
        self.ensure_dense()?;
        let cache = self.cache.borrow();
        Ok(f(cache.dense.as_ref().unwrap()))
    }

    /// Returns a mutable reference to the materialized dense buffer, for
    /// in-place edits. Commit with [`Sdr::set_dense_inplace`]; until then
    /// the cached views may disagree.
    ///
    /// # Errors
    ///
    /// Fails with `NoValue` if no value has been assigned.
    pub fn dense_mut(&mut self) -> Result<&mut SdrDense> {
        self.ensure_dense()?;
        Ok(self.cache.get_mut().dense.as_mut().unwrap())
    }

    /// Commits an in-place edit of the dense buffer: marks dense as the only
    /// valid view and notifies callbacks.
    ///
    /// # Errors
    ///
    /// Fails with `NoValue` if there is no dense buffer to commit.
    pub fn set_dense_inplace(&mut self) -> Result<()> {
        {
            let cache = self.cache.get_mut();
            if cache.dense.is_none() {
                return Err(VelesError::NoValue);
            }
            cache.sparse = None;
            cache.coordinates = None;
        }
        self.notify();
        Ok(())
    }

    fn ensure_dense(&self) -> Result<()> {
        if self.cache.borrow().dense.is_some() {
            return Ok(());
        }

        self.ensure_sparse()?;
        let mut cache = self.cache.borrow_mut();
        let mut dense = vec![0; self.size];
        for &idx in cache.sparse.as_ref().unwrap() {
            dense[idx as usize] = 1;
        }
        cache.dense = Some(dense);
        Ok(())
    }

    // ========================================================================
    // Sparse view
    // ========================================================================

    /// Sets the value from ascending flat indices.
    ///
    /// # Errors
    ///
    /// Fails if indices are unsorted, duplicated, or out of bounds.
    pub fn set_sparse(&mut self, indices: &[ElemSparse]) -> Result<()> {
        self.set_sparse_owned(indices.to_vec())
    }

    /// Sets the value from ascending flat indices, taking ownership.
    ///
    /// # Errors
    ///
    /// Fails if indices are unsorted, duplicated, or out of bounds.
    pub fn set_sparse_owned(&mut self, indices: SdrSparse) -> Result<()> {
        self.validate_sparse(&indices)?;

        {
            let cache = self.cache.get_mut();
            cache.sparse = Some(indices);
            cache.dense = None;
            cache.coordinates = None;
        }
        self.notify();
        Ok(())
    }

    /// Returns a copy of the sparse view, materializing it if stale.
    ///
    /// # Errors
    ///
    /// Fails with `NoValue` if no value has been assigned.
    pub fn get_sparse(&self) -> Result<SdrSparse> {
        self.with_sparse(Clone::clone)
    }

    /// Calls `f` with a reference to the sparse view, materializing it if
    /// stale, without copying the buffer out.
    ///
    /// # Errors
    ///
    /// Fails with `NoValue` if no value has been assigned.
    pub fn with_sparse<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&SdrSparse) -> R,
    {
        self.ensure_sparse()?;
        let cache = self.cache.borrow();
        Ok(f(cache.sparse.as_ref().unwrap()))
    }

    /// Returns a mutable reference to the materialized sparse buffer, for
    /// in-place edits. Commit with [`Sdr::set_sparse_inplace`].
    ///
    /// # Errors
    ///
    /// Fails with `NoValue` if no value has been assigned.
    pub fn sparse_mut(&mut self) -> Result<&mut SdrSparse> {
        self.ensure_sparse()?;
        Ok(self.cache.get_mut().sparse.as_mut().unwrap())
    }

    /// Commits an in-place edit of the sparse buffer.
    ///
    /// # Errors
    ///
    /// Fails with `NoValue` if there is no sparse buffer to commit, or with
    /// a validation error if the edited buffer is not ascending and unique.
    pub fn set_sparse_inplace(&mut self) -> Result<()> {
        {
            let cache = self.cache.borrow();
            let Some(sparse) = cache.sparse.as_ref() else {
                return Err(VelesError::NoValue);
            };
            self.validate_sparse(sparse)?;
        }
        {
            let cache = self.cache.get_mut();
            cache.dense = None;
            cache.coordinates = None;
        }
        self.notify();
        Ok(())
    }

    fn validate_sparse(&self, indices: &[ElemSparse]) -> Result<()> {
        let mut prev: Option<ElemSparse> = None;
        for &idx in indices {
            if idx as usize >= self.size {
                return Err(VelesError::IndexOutOfBounds {
                    index: idx as usize,
                    size: self.size,
                });
            }
            if let Some(p) = prev {
                if idx <= p {
                    return Err(VelesError::InvalidSdrData(
                        "sparse indices must be ascending and unique".to_string(),
                    ));
                }
            }
            prev = Some(idx);
        }
        Ok(())
    }

    fn ensure_sparse(&self) -> Result<()> {
        {
            let cache = self.cache.borrow();
            if cache.sparse.is_some() {
                return Ok(());
            }
            if cache.dense.is_none() && cache.coordinates.is_none() {
                return Err(VelesError::NoValue);
            }
        }

        let mut cache = self.cache.borrow_mut();
        let sparse = if let Some(dense) = cache.dense.as_ref() {
            dense
                .iter()
                .enumerate()
                .filter(|(_, &v)| v != 0)
                .map(|(i, _)| i as ElemSparse)
                .collect()
        } else {
            self.coordinates_to_sparse(cache.coordinates.as_ref().unwrap())
        };
        cache.sparse = Some(sparse);
        Ok(())
    }

    // ========================================================================
    // Coordinates view
    // ========================================================================

    /// Sets the value from per-axis coordinate lists.
    ///
    /// # Errors
    ///
    /// Fails if the number of axes is wrong, the lists have unequal lengths,
    /// or any coordinate is out of range.
    pub fn set_coordinates(&mut self, coordinates: &SdrCoordinates) -> Result<()> {
        self.validate_coordinates(coordinates)?;

        {
            let cache = self.cache.get_mut();
            cache.coordinates = Some(coordinates.clone());
            cache.dense = None;
            cache.sparse = None;
        }
        self.notify();
        Ok(())
    }

    /// Returns a copy of the coordinates view, materializing it if stale.
    ///
    /// # Errors
    ///
    /// Fails with `NoValue` if no value has been assigned.
    pub fn get_coordinates(&self) -> Result<SdrCoordinates> {
        self.with_coordinates(Clone::clone)
    }

    /// Calls `f` with a reference to the coordinates view, materializing it
    /// if stale, without copying the buffers out.
    ///
    /// # Errors
    ///
    /// Fails with `NoValue` if no value has been assigned.
    pub fn with_coordinates<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&SdrCoordinates) -> R,
    {
        self.ensure_coordinates()?;
        let cache = self.cache.borrow();
        Ok(f(cache.coordinates.as_ref().unwrap()))
    }

    /// Returns a mutable reference to the materialized coordinate lists, for
    /// in-place edits. Commit with [`Sdr::set_coordinates_inplace`].
    ///
    /// # Errors
    ///
    /// Fails with `NoValue` if no value has been assigned.
    pub fn coordinates_mut(&mut self) -> Result<&mut SdrCoordinates> {
        self.ensure_coordinates()?;
        Ok(self.cache.get_mut().coordinates.as_mut().unwrap())
    }

    /// Commits an in-place edit of the coordinate lists.
    ///
    /// # Errors
    ///
    /// Fails with `NoValue` if there are no coordinate lists to commit, or
    /// with a validation error if the edited lists are malformed.
    pub fn set_coordinates_inplace(&mut self) -> Result<()> {
        {
            let cache = self.cache.borrow();
            let Some(coordinates) = cache.coordinates.as_ref() else {
                return Err(VelesError::NoValue);
            };
            self.validate_coordinates(coordinates)?;
        }
        {
            let cache = self.cache.get_mut();
            cache.dense = None;
            cache.sparse = None;
        }
        self.notify();
        Ok(())
    }

    fn validate_coordinates(&self, coordinates: &SdrCoordinates) -> Result<()> {
        if coordinates.len() != self.dimensions.len() {
            return Err(VelesError::DimensionMismatch {
                expected: vec![self.dimensions.len() as UInt],
                actual: vec![coordinates.len() as UInt],
            });
        }

        let len = coordinates[0].len();
        for (axis, coords) in coordinates.iter().enumerate() {
            if coords.len() != len {
                return Err(VelesError::InvalidSdrData(format!(
                    "coordinate list for axis {axis} has length {}, expected {len}",
                    coords.len()
                )));
            }
            let dim = self.dimensions[axis];
            for &c in coords {
                if c >= dim {
                    return Err(VelesError::IndexOutOfBounds {
                        index: c as usize,
                        size: dim as usize,
                    });
                }
            }
        }
        Ok(())
    }

    fn ensure_coordinates(&self) -> Result<()> {
        if self.cache.borrow().coordinates.is_some() {
            return Ok(());
        }

        self.ensure_sparse()?;
        let mut cache = self.cache.borrow_mut();
        let sparse = cache.sparse.as_ref().unwrap();

        let converter = CoordinateConverter::new(&self.dimensions);
        let mut coordinates: SdrCoordinates =
            vec![Vec::with_capacity(sparse.len()); self.dimensions.len()];
        for &idx in sparse {
            for (axis, c) in converter.to_coord(idx).into_iter().enumerate() {
                coordinates[axis].push(c);
            }
        }

        cache.coordinates = Some(coordinates);
        Ok(())
    }

    /// Converts coordinate lists to ascending flat indices.
    fn coordinates_to_sparse(&self, coordinates: &SdrCoordinates) -> SdrSparse {
        if coordinates.is_empty() || coordinates[0].is_empty() {
            return Vec::new();
        }

        let converter = CoordinateConverter::new(&self.dimensions);
        let num_points = coordinates[0].len();
        let mut coord = vec![0; self.dimensions.len()];
        let mut sparse = Vec::with_capacity(num_points);

        for point in 0..num_points {
            for (axis, c) in coord.iter_mut().enumerate() {
                *c = coordinates[axis][point];
            }
            sparse.push(converter.to_index(&coord));
        }

        sparse.sort_unstable();
        sparse.dedup();
        sparse
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Returns the bit at the given coordinates.
    ///
    /// # Errors
    ///
    /// Fails with `NoValue` if no value has been assigned, or with a
    /// mismatch/bounds error if the coordinate tuple is malformed.
    pub fn at(&self, coordinates: &[UInt]) -> Result<bool> {
        if coordinates.len() != self.dimensions.len() {
            return Err(VelesError::DimensionMismatch {
                expected: vec![self.dimensions.len() as UInt],
                actual: vec![coordinates.len() as UInt],
            });
        }
        for (&c, &dim) in coordinates.iter().zip(&self.dimensions) {
            if c >= dim {
                return Err(VelesError::IndexOutOfBounds {
                    index: c as usize,
                    size: dim as usize,
                });
            }
        }

        let flat = CoordinateConverter::new(&self.dimensions).to_index(coordinates);
        self.with_dense(|dense| dense[flat as usize] != 0)
    }

    /// Returns the number of set bits.
    ///
    /// # Errors
    ///
    /// Fails with `NoValue` if no value has been assigned.
    pub fn get_sum(&self) -> Result<usize> {
        self.with_sparse(Vec::len)
    }

    /// Returns the fraction of set bits.
    ///
    /// # Errors
    ///
    /// Fails with `NoValue` if no value has been assigned.
    pub fn get_sparsity(&self) -> Result<Real> {
        Ok(self.get_sum()? as Real / self.size as Real)
    }

    /// Returns the number of bits set in both SDRs.
    ///
    /// # Errors
    ///
    /// Fails if the dimensions differ or either SDR has no value.
    pub fn get_overlap(&self, other: &Sdr) -> Result<usize> {
        if self.dimensions != other.dimensions {
            return Err(VelesError::DimensionMismatch {
                expected: self.dimensions.clone(),
                actual: other.dimensions.clone(),
            });
        }

        self.with_sparse(|a| {
            other.with_sparse(|b| {
                // Two-pointer intersection over sorted index lists.
                let mut count = 0;
                let (mut i, mut j) = (0, 0);
                while i < a.len() && j < b.len() {
                    match a[i].cmp(&b[j]) {
                        std::cmp::Ordering::Less => i += 1,
                        std::cmp::Ordering::Greater => j += 1,
                        std::cmp::Ordering::Equal => {
                            count += 1;
                            i += 1;
                            j += 1;
                        }
                    }
                }
                count
            })
        })?
    }

    /// Copies the value from another SDR of the same dimensions, preserving
    /// which views are materialized. Callbacks are notified.
    ///
    /// # Errors
    ///
    /// Fails if the dimensions differ.
    pub fn set_sdr(&mut self, other: &Sdr) -> Result<()> {
        if self.dimensions != other.dimensions {
            return Err(VelesError::DimensionMismatch {
                expected: self.dimensions.clone(),
                actual: other.dimensions.clone(),
            });
        }

        {
            let other_cache = other.cache.borrow();
            let cache = self.cache.get_mut();
            cache.dense = other_cache.dense.clone();
            cache.sparse = other_cache.sparse.clone();
            cache.coordinates = other_cache.coordinates.clone();
        }
        self.notify();
        Ok(())
    }

    // ========================================================================
    // Randomness
    // ========================================================================

    /// Assigns a uniformly random value with `round(sparsity * size)` bits
    /// set.
    ///
    /// # Errors
    ///
    /// Fails if `sparsity` is outside `[0, 1]`.
    pub fn randomize(&mut self, sparsity: Real, rng: &mut Random) -> Result<()> {
        if !(0.0..=1.0).contains(&sparsity) {
            return Err(VelesError::InvalidParameter {
                name: "sparsity",
                message: format!("must be in [0, 1], got {sparsity}"),
            });
        }

        let num_active = (sparsity as f64 * self.size as f64).round() as usize;
        let indices: Vec<ElemSparse> = (0..self.size as ElemSparse).collect();
        let mut sparse = rng.sample(&indices, num_active)?;
        sparse.sort_unstable();

        {
            let cache = self.cache.get_mut();
            cache.sparse = Some(sparse);
            cache.dense = None;
            cache.coordinates = None;
        }
        self.notify();
        Ok(())
    }

    /// Moves `round(fraction * sum)` set bits to currently-unset positions,
    /// preserving the cardinality.
    ///
    /// # Errors
    ///
    /// Fails if `fraction` is outside `[0, 1]`, the SDR has no value, or
    /// there are not enough unset bits to move into.
    pub fn add_noise(&mut self, fraction: Real, rng: &mut Random) -> Result<()> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(VelesError::InvalidParameter {
                name: "fraction",
                message: format!("must be in [0, 1], got {fraction}"),
            });
        }

        let sparse = self.get_sparse()?;
        let num_flip = (fraction as f64 * sparse.len() as f64).round() as usize;
        if num_flip == 0 {
            return Ok(());
        }
        if num_flip > self.size - sparse.len() {
            return Err(VelesError::InvalidParameter {
                name: "fraction",
                message: format!(
                    "cannot move {num_flip} bits into {} unset positions",
                    self.size - sparse.len()
                ),
            });
        }

        let turn_off: HashSet<ElemSparse> =
            rng.sample(&sparse, num_flip)?.into_iter().collect();

        let active: HashSet<ElemSparse> = sparse.iter().copied().collect();
        let inactive: Vec<ElemSparse> = (0..self.size as ElemSparse)
            .filter(|i| !active.contains(i))
            .collect();
        let turn_on = rng.sample(&inactive, num_flip)?;

        let mut noised: SdrSparse = sparse
            .into_iter()
            .filter(|i| !turn_off.contains(i))
            .chain(turn_on)
            .collect();
        noised.sort_unstable();

        {
            let cache = self.cache.get_mut();
            cache.sparse = Some(noised);
            cache.dense = None;
            cache.coordinates = None;
        }
        self.notify();
        Ok(())
    }

    // ========================================================================
    // Callbacks
    // ========================================================================

    /// Registers a callback fired on every value change. Returns a handle
    /// for removal. Handles increase monotonically and are never reused.
    pub fn add_callback(&self, callback: SdrCallback) -> usize {
        let handle = self.next_handle.get();
        self.next_handle.set(handle + 1);
        self.callbacks.borrow_mut().push((handle, callback));
        handle
    }

    /// Removes a callback by handle.
    ///
    /// # Errors
    ///
    /// Fails if the handle was never issued or was already removed.
    pub fn remove_callback(&self, handle: usize) -> Result<()> {
        let mut callbacks = self.callbacks.borrow_mut();
        match callbacks.iter().position(|(h, _)| *h == handle) {
            Some(pos) => {
                callbacks.remove(pos);
                Ok(())
            }
            None => Err(VelesError::UnknownHandle(handle)),
        }
    }

    // ========================================================================
    // Serialization (ASCII, streamable)
    // ========================================================================

    /// Writes the SDR as one whitespace-delimited ASCII record:
    /// magic token, rank, dimensions, has-value flag, then (if set) the
    /// index count followed by the ascending indices, then an end token.
    /// Records can be written back-to-back onto one stream.
    ///
    /// # Errors
    ///
    /// Fails on stream errors.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        let io_err = |e: std::io::Error| VelesError::Io {
            message: e.to_string(),
        };

        writeln!(writer, "{SAVE_MAGIC}").map_err(io_err)?;
        write!(writer, "{}", self.dimensions.len()).map_err(io_err)?;
        for dim in &self.dimensions {
            write!(writer, " {dim}").map_err(io_err)?;
        }
        writeln!(writer).map_err(io_err)?;

        if self.has_value() {
            writeln!(writer, "1").map_err(io_err)?;
            self.with_sparse(|sparse| -> std::io::Result<()> {
                write!(writer, "{}", sparse.len())?;
                for idx in sparse {
                    write!(writer, " {idx}")?;
                }
                writeln!(writer)
            })?
            .map_err(io_err)?;
        } else {
            writeln!(writer, "0").map_err(io_err)?;
        }

        writeln!(writer, "{SAVE_END}").map_err(io_err)?;
        Ok(())
    }

    /// Reads one SDR record written by [`Sdr::save`]. The stream may hold
    /// further records after it.
    ///
    /// # Errors
    ///
    /// Fails on stream errors or a malformed record.
    pub fn load<R: BufRead>(reader: &mut R) -> Result<Self> {
        let magic = next_token(reader)?;
        if magic != SAVE_MAGIC {
            return Err(VelesError::ParseError(format!(
                "expected '{SAVE_MAGIC}', got '{magic}'"
            )));
        }

        let rank: usize = parse_token(reader, "rank")?;
        if rank == 0 {
            return Err(VelesError::ParseError("rank must be positive".to_string()));
        }
        let mut dimensions = Vec::with_capacity(rank);
        for _ in 0..rank {
            let dim: UInt = parse_token(reader, "dimension")?;
            dimensions.push(dim);
        }
        if dimensions.contains(&0) {
            return Err(VelesError::ParseError(
                "dimensions must be positive".to_string(),
            ));
        }

        let mut sdr = Sdr::new(&dimensions)?;

        let has_value: u8 = parse_token(reader, "has-value flag")?;
        match has_value {
            0 => {}
            1 => {
                let count: usize = parse_token(reader, "index count")?;
                let mut sparse = Vec::with_capacity(count);
                for _ in 0..count {
                    let index: ElemSparse = parse_token(reader, "index")?;
                    sparse.push(index);
                }
                sdr.set_sparse_owned(sparse)
                    .map_err(|e| VelesError::ParseError(e.to_string()))?;
            }
            other => {
                return Err(VelesError::ParseError(format!(
                    "has-value flag must be 0 or 1, got {other}"
                )))
            }
        }

        let end = next_token(reader)?;
        if end != SAVE_END {
            return Err(VelesError::ParseError(format!(
                "expected '{SAVE_END}', got '{end}'"
            )));
        }

        Ok(sdr)
    }
}

/// Reads the next whitespace-delimited token from the stream.
fn next_token<R: BufRead>(reader: &mut R) -> Result<String> {
    let mut token = String::new();
    let mut byte = [0u8; 1];
    loop {
        let n = reader.read(&mut byte).map_err(|e| VelesError::Io {
            message: e.to_string(),
        })?;
        if n == 0 {
            if token.is_empty() {
                return Err(VelesError::ParseError(
                    "unexpected end of stream".to_string(),
                ));
            }
            break;
        }
        let c = byte[0] as char;
        if c.is_ascii_whitespace() {
            if token.is_empty() {
                continue;
            }
            break;
        }
        token.push(c);
    }
    Ok(token)
}

fn parse_token<T: std::str::FromStr>(reader: &mut impl BufRead, what: &str) -> Result<T> {
    let token = next_token(reader)?;
    token
        .parse()
        .map_err(|_| VelesError::ParseError(format!("invalid {what}: '{token}'")))
}

impl Clone for Sdr {
    /// Copies dimensions and data. Callbacks are not copied.
    fn clone(&self) -> Self {
        let clone = Self {
            dimensions: self.dimensions.clone(),
            size: self.size,
            cache: RefCell::new(SdrCache::default()),
            callbacks: RefCell::new(Vec::new()),
            next_handle: Cell::new(0),
        };

        {
            let source = self.cache.borrow();
            let mut cache = clone.cache.borrow_mut();
            cache.dense = source.dense.clone();
            cache.sparse = source.sparse.clone();
            cache.coordinates = source.coordinates.clone();
        }
        clone
    }
}

impl PartialEq for Sdr {
    /// Equality by dimensions and the set of active indices. Two no-value
    /// SDRs of equal dimensions compare equal.
    fn eq(&self, other: &Self) -> bool {
        if self.dimensions != other.dimensions {
            return false;
        }
        match (self.has_value(), other.has_value()) {
            (false, false) => true,
            (true, true) => self
                .with_sparse(|a| other.with_sparse(|b| a == b))
                .and_then(|inner| inner)
                .unwrap_or(false),
            _ => false,
        }
    }
}

impl Eq for Sdr {}

impl fmt::Debug for Sdr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get_sparse() {
            Ok(sparse) => write!(f, "SDR({:?}) {:?}", self.dimensions, sparse),
            Err(_) => write!(f, "SDR({:?}) <no value>", self.dimensions),
        }
    }
}

impl fmt::Display for Sdr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SDR( ")?;
        for (i, dim) in self.dimensions.iter().enumerate() {
            write!(f, "{dim}")?;
            if i + 1 != self.dimensions.len() {
                write!(f, ", ")?;
            }
        }
        write!(f, " ) ")?;

        if let Ok(sparse) = self.get_sparse() {
            for (i, idx) in sparse.iter().enumerate() {
                write!(f, "{idx}")?;
                if i + 1 != sparse.len() {
                    write!(f, ", ")?;
                }
            }
        } else {
            write!(f, "<no value>")?;
        }
        Ok(())
    }
}

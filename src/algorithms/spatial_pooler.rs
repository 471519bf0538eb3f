//! Spatial Pooler.
//!
//! The Spatial Pooler maps binary input patterns to fixed-sparsity binary
//! column activations. Each column owns a potential pool of inputs and a
//! set of synapses whose permanences are learned Hebbian-style; columns
//! compete for activation through global or local k-winners-take-all
//! inhibition, while duty-cycle bookkeeping and boosting keep chronically
//! silent columns in the game.

use crate::algorithms::Connections;
use crate::error::{Result, VelesError};
use crate::types::{
    CellIdx, Permanence, Real, Sdr, Segment, SynapseIdx, UInt, EPSILON, MAX_PERMANENCE,
    MIN_PERMANENCE,
};
use crate::utils::{num_elements, CoordinateConverter, Neighborhood, Random, WrappingNeighborhood};

use std::cmp::Ordering;
use std::io::Write;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Hard cap on the target density of active columns.
pub const MAX_LOCAL_AREA_DENSITY: Real = 0.5;

/// How often (in iterations) the inhibition radius and minimum duty cycles
/// are refreshed.
const UPDATE_PERIOD: UInt = 50;

/// Fraction of each potential pool initialized in the connected range.
const INIT_CONNECTED_PCT: Real = 0.5;

/// Parameters for creating a [`SpatialPooler`].
///
/// Exactly one of `num_active_columns_per_inh_area` (> 0) and
/// `local_area_density` (> 0) must be set; they are mutually exclusive ways
/// of choosing the output sparsity.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpatialPoolerParams {
    /// Shape of the input space (e.g. `vec![32, 32]`).
    pub input_dimensions: Vec<UInt>,

    /// Shape of the column space. Must have the same rank as the input.
    pub column_dimensions: Vec<UInt>,

    /// Radius, in input space, of the neighborhood each column may ever
    /// connect to. Clamped to the number of inputs.
    pub potential_radius: UInt,

    /// Fraction of the potential neighborhood actually sampled into each
    /// column's pool, in `(0, 1]`.
    pub potential_pct: Real,

    /// If true all columns compete in one arena; otherwise columns compete
    /// within their inhibition neighborhood.
    pub global_inhibition: bool,

    /// Target fraction of active columns, in `(0, MAX_LOCAL_AREA_DENSITY]`.
    /// Mutually exclusive with `num_active_columns_per_inh_area`.
    pub local_area_density: Real,

    /// Target count of winners per inhibition area. Mutually exclusive with
    /// `local_area_density`.
    pub num_active_columns_per_inh_area: UInt,

    /// Minimum overlap for a column to be considered for activation at all.
    pub stimulus_threshold: UInt,

    /// Permanence decrement for synapses to inactive inputs, in `[0, 1]`.
    pub syn_perm_inactive_dec: Permanence,

    /// Permanence increment for synapses to active inputs, in `(0, 1]`.
    pub syn_perm_active_inc: Permanence,

    /// Permanence threshold for a synapse to count as connected, in `(0, 1)`.
    pub syn_perm_connected: Permanence,

    /// Floor on a column's overlap duty cycle, as a fraction of the best
    /// duty cycle in its neighborhood, in `(0, 1]`.
    pub min_pct_overlap_duty_cycles: Real,

    /// Averaging window of the duty-cycle EMAs, at least 1.
    pub duty_cycle_period: UInt,

    /// Strength of boosting; 0 disables it.
    pub boost_strength: Real,

    /// RNG seed. 0 picks a nondeterministic seed once.
    pub seed: u64,

    /// Whether topology wraps around the borders (toroidal).
    pub wrap_around: bool,
}

impl Default for SpatialPoolerParams {
    fn default() -> Self {
        Self {
            input_dimensions: vec![100],
            column_dimensions: vec![2048],
            potential_radius: 16,
            potential_pct: 0.5,
            global_inhibition: true,
            local_area_density: 0.05,
            num_active_columns_per_inh_area: 0,
            stimulus_threshold: 0,
            syn_perm_inactive_dec: 0.008,
            syn_perm_active_inc: 0.05,
            syn_perm_connected: 0.1,
            min_pct_overlap_duty_cycles: 0.001,
            duty_cycle_period: 1000,
            boost_strength: 0.0,
            seed: 1,
            wrap_around: true,
        }
    }
}

/// The Spatial Pooler algorithm.
///
/// # Example
///
/// ```rust
/// use veles::algorithms::{SpatialPooler, SpatialPoolerParams};
/// use veles::types::Sdr;
///
/// let mut sp = SpatialPooler::new(SpatialPoolerParams {
///     input_dimensions: vec![100],
///     column_dimensions: vec![200],
///     potential_radius: 50,
///     ..Default::default()
/// }).unwrap();
///
/// let mut input = Sdr::new(&[100]).unwrap();
/// let mut active = Sdr::new(&[200]).unwrap();
///
/// input.set_sparse(&[1, 5, 10, 20, 30]).unwrap();
/// sp.compute(&input, true, &mut active).unwrap();
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpatialPooler {
    // Topology
    input_dimensions: Vec<UInt>,
    column_dimensions: Vec<UInt>,
    num_inputs: usize,
    num_columns: usize,

    // Parameters
    potential_radius: UInt,
    potential_pct: Real,
    init_connected_pct: Real,
    global_inhibition: bool,
    local_area_density: Real,
    num_active_columns_per_inh_area: UInt,
    stimulus_threshold: UInt,
    syn_perm_inactive_dec: Permanence,
    syn_perm_active_inc: Permanence,
    syn_perm_below_stimulus_inc: Permanence,
    syn_perm_connected: Permanence,
    min_pct_overlap_duty_cycles: Real,
    duty_cycle_period: UInt,
    boost_strength: Real,
    wrap_around: bool,
    update_period: UInt,

    // State
    inhibition_radius: UInt,
    boost_factors: Vec<Real>,
    overlap_duty_cycles: Vec<Real>,
    active_duty_cycles: Vec<Real>,
    min_overlap_duty_cycles: Vec<Real>,
    boosted_overlaps: Vec<Real>,
    iteration_num: UInt,
    iteration_learn_num: UInt,

    connections: Connections,
    rng: Random,
}

impl SpatialPooler {
    /// Creates and initializes a Spatial Pooler.
    ///
    /// Every column is mapped to its center in input space, given a potential
    /// pool sampled from the surrounding neighborhood, seeded with random
    /// permanences, and raised until it has `stimulus_threshold` connected
    /// synapses.
    ///
    /// # Errors
    ///
    /// Fails if any parameter is outside its documented range, the shapes
    /// have unequal ranks, or the density settings cannot produce a winner.
    pub fn new(params: SpatialPoolerParams) -> Result<Self> {
        Self::validate_params(&params)?;

        let num_inputs = num_elements(&params.input_dimensions);
        let num_columns = num_elements(&params.column_dimensions);

        let mut sp = Self {
            input_dimensions: params.input_dimensions.clone(),
            column_dimensions: params.column_dimensions.clone(),
            num_inputs,
            num_columns,

            potential_radius: params.potential_radius.min(num_inputs as UInt),
            potential_pct: params.potential_pct,
            init_connected_pct: INIT_CONNECTED_PCT,
            global_inhibition: params.global_inhibition,
            local_area_density: params.local_area_density,
            num_active_columns_per_inh_area: params.num_active_columns_per_inh_area,
            stimulus_threshold: params.stimulus_threshold,
            syn_perm_inactive_dec: params.syn_perm_inactive_dec,
            syn_perm_active_inc: params.syn_perm_active_inc,
            syn_perm_below_stimulus_inc: params.syn_perm_connected / 10.0,
            syn_perm_connected: params.syn_perm_connected,
            min_pct_overlap_duty_cycles: params.min_pct_overlap_duty_cycles,
            duty_cycle_period: params.duty_cycle_period,
            boost_strength: params.boost_strength,
            wrap_around: params.wrap_around,
            update_period: UPDATE_PERIOD,

            inhibition_radius: 0,
            boost_factors: vec![1.0; num_columns],
            overlap_duty_cycles: vec![0.0; num_columns],
            active_duty_cycles: vec![0.0; num_columns],
            min_overlap_duty_cycles: vec![0.0; num_columns],
            boosted_overlaps: vec![0.0; num_columns],
            iteration_num: 0,
            iteration_learn_num: 0,

            connections: Connections::new(num_columns as CellIdx, params.syn_perm_connected),
            rng: Random::new(params.seed),
        };

        sp.initialize_columns()?;
        sp.update_inhibition_radius();
        Ok(sp)
    }

    fn validate_params(params: &SpatialPoolerParams) -> Result<()> {
        if params.input_dimensions.is_empty() || params.input_dimensions.contains(&0) {
            return Err(VelesError::InvalidParameter {
                name: "input_dimensions",
                message: "must be a nonempty list of positive integers".to_string(),
            });
        }
        if params.column_dimensions.is_empty() || params.column_dimensions.contains(&0) {
            return Err(VelesError::InvalidParameter {
                name: "column_dimensions",
                message: "must be a nonempty list of positive integers".to_string(),
            });
        }
        if params.input_dimensions.len() != params.column_dimensions.len() {
            return Err(VelesError::DimensionMismatch {
                expected: params.input_dimensions.clone(),
                actual: params.column_dimensions.clone(),
            });
        }

        let num_columns = num_elements(&params.column_dimensions) as UInt;
        let by_count = params.num_active_columns_per_inh_area > 0;
        let by_density = params.local_area_density > 0.0;
        if by_count == by_density {
            return Err(VelesError::InvalidParameter {
                name: "num_active_columns_per_inh_area",
                message: "exactly one of num_active_columns_per_inh_area and \
                          local_area_density must be set"
                    .to_string(),
            });
        }
        if by_count && params.num_active_columns_per_inh_area > num_columns {
            return Err(VelesError::InvalidParameter {
                name: "num_active_columns_per_inh_area",
                message: format!("must be <= the number of columns ({num_columns})"),
            });
        }
        if by_density {
            if params.local_area_density > MAX_LOCAL_AREA_DENSITY {
                return Err(VelesError::InvalidParameter {
                    name: "local_area_density",
                    message: format!("must be in (0, {MAX_LOCAL_AREA_DENSITY}]"),
                });
            }
            if (params.local_area_density * num_columns as Real).round() < 1.0 {
                return Err(VelesError::Exhaustion(format!(
                    "density {} of {num_columns} columns selects zero active columns",
                    params.local_area_density
                )));
            }
        }

        if params.potential_pct <= 0.0 || params.potential_pct > 1.0 {
            return Err(VelesError::InvalidParameter {
                name: "potential_pct",
                message: "must be in (0, 1]".to_string(),
            });
        }
        if params.syn_perm_connected <= MIN_PERMANENCE
            || params.syn_perm_connected >= MAX_PERMANENCE
        {
            return Err(VelesError::InvalidParameter {
                name: "syn_perm_connected",
                message: "must be in (0, 1)".to_string(),
            });
        }
        if params.syn_perm_active_inc <= 0.0 || params.syn_perm_active_inc > MAX_PERMANENCE {
            return Err(VelesError::InvalidParameter {
                name: "syn_perm_active_inc",
                message: "must be in (0, 1]".to_string(),
            });
        }
        if params.syn_perm_inactive_dec < 0.0 || params.syn_perm_inactive_dec > MAX_PERMANENCE {
            return Err(VelesError::InvalidParameter {
                name: "syn_perm_inactive_dec",
                message: "must be in [0, 1]".to_string(),
            });
        }
        if params.min_pct_overlap_duty_cycles <= 0.0 || params.min_pct_overlap_duty_cycles > 1.0 {
            return Err(VelesError::InvalidParameter {
                name: "min_pct_overlap_duty_cycles",
                message: "must be in (0, 1]".to_string(),
            });
        }
        if params.duty_cycle_period < 1 {
            return Err(VelesError::InvalidParameter {
                name: "duty_cycle_period",
                message: "must be at least 1".to_string(),
            });
        }
        if params.boost_strength < 0.0 {
            return Err(VelesError::InvalidParameter {
                name: "boost_strength",
                message: "must be nonnegative".to_string(),
            });
        }
        Ok(())
    }

    // ========================================================================
    // Initialization
    // ========================================================================

    fn initialize_columns(&mut self) -> Result<()> {
        for column in 0..self.num_columns as CellIdx {
            let segment = self.connections.create_segment(column);

            let pool = self.init_map_potential(column)?;
            for &input in &pool {
                let permanence = self.init_permanence();
                self.connections.create_synapse(segment, input, permanence);
            }

            self.connections
                .raise_permanences_to_threshold(segment, self.stimulus_threshold);
        }
        Ok(())
    }

    /// Maps a column to the input index at the center of its receptive
    /// field, by scaling its coordinate axis-wise into input space.
    fn init_map_column(&self, column: CellIdx) -> UInt {
        let column_coord = CoordinateConverter::new(&self.column_dimensions).to_coord(column);

        let input_coord: Vec<UInt> = column_coord
            .iter()
            .zip(&self.column_dimensions)
            .zip(&self.input_dimensions)
            .map(|((&c, &col_dim), &input_dim)| {
                let scaled = (c as Real + 0.5) * (input_dim as Real / col_dim as Real);
                scaled.floor() as UInt
            })
            .collect();

        CoordinateConverter::new(&self.input_dimensions).to_index(&input_coord)
    }

    /// Samples a column's potential pool from its input neighborhood.
    /// Returned indices are ascending; sampling order only decides
    /// membership.
    fn init_map_potential(&mut self, column: CellIdx) -> Result<Vec<UInt>> {
        let center = self.init_map_column(column);

        let neighborhood: Vec<UInt> = if self.wrap_around {
            WrappingNeighborhood::new(center, self.potential_radius, &self.input_dimensions)
                .collect()
        } else {
            Neighborhood::new(center, self.potential_radius, &self.input_dimensions).collect()
        };

        let num_potential = (neighborhood.len() as Real * self.potential_pct).round() as usize;
        let mut pool = self.rng.sample(&neighborhood, num_potential)?;
        pool.sort_unstable();
        Ok(pool)
    }

    /// Draws one initial permanence: connected range with probability
    /// `init_connected_pct`, otherwise below the threshold.
    fn init_permanence(&mut self) -> Permanence {
        if self.rng.real_in_unit() <= f64::from(self.init_connected_pct) {
            self.rng.real_in_range(
                f64::from(self.syn_perm_connected),
                f64::from(MAX_PERMANENCE),
            ) as Permanence
        } else {
            self.rng.real_in_range(
                f64::from(MIN_PERMANENCE),
                f64::from(self.syn_perm_connected),
            ) as Permanence
        }
    }

    // ========================================================================
    // Compute
    // ========================================================================

    /// Runs one timestep: computes overlaps against `input`, selects the
    /// winning columns into `active` (ascending flat indices), and, when
    /// `learn` is set, adapts permanences, duty cycles, and boost factors.
    ///
    /// Returns the raw per-column overlap counts.
    ///
    /// # Errors
    ///
    /// Fails if either SDR's size does not match this pooler, if `input`
    /// holds no value, or if the density settings would select zero winners.
    /// A failed call leaves the pooler's state untouched.
    pub fn compute(&mut self, input: &Sdr, learn: bool, active: &mut Sdr) -> Result<Vec<SynapseIdx>> {
        if input.size() != self.num_inputs {
            return Err(VelesError::DimensionMismatch {
                expected: self.input_dimensions.clone(),
                actual: input.dimensions().to_vec(),
            });
        }
        if active.size() != self.num_columns {
            return Err(VelesError::DimensionMismatch {
                expected: self.column_dimensions.clone(),
                actual: active.dimensions().to_vec(),
            });
        }

        let density = self.inhibition_density();
        if self.inhibits_globally()
            && (density * self.num_columns as Real).round() < 1.0
        {
            return Err(VelesError::Exhaustion(format!(
                "density {density} of {} columns selects zero active columns",
                self.num_columns
            )));
        }

        let input_sparse = input.get_sparse()?;
        active.reshape(&self.column_dimensions)?;

        // All failure paths are behind us; state changes start here.
        self.iteration_num += 1;
        if learn {
            self.iteration_learn_num += 1;
        }

        let overlaps = self.connections.compute_activity(&input_sparse, learn);
        self.boost_overlaps(&overlaps);

        let mut active_columns = self.inhibit_columns(&self.boosted_overlaps, density);
        active_columns.sort_unstable();
        active.set_sparse(&active_columns)?;

        if learn {
            self.adapt_synapses(input, &active_columns);
            self.update_duty_cycles(&overlaps, &active_columns);
            self.bump_up_weak_columns();
            self.update_boost_factors();
            if self.is_update_round() {
                self.update_inhibition_radius();
                self.update_min_duty_cycles();
            }
        }

        Ok(overlaps)
    }

    /// Applies boost factors to the raw overlaps. When boosting is disabled
    /// the overlaps are copied through unchanged.
    fn boost_overlaps(&mut self, overlaps: &[SynapseIdx]) {
        if self.boost_strength < EPSILON {
            for (boosted, &overlap) in self.boosted_overlaps.iter_mut().zip(overlaps) {
                *boosted = Real::from(overlap);
            }
        } else {
            for ((boosted, &overlap), &factor) in self
                .boosted_overlaps
                .iter_mut()
                .zip(overlaps)
                .zip(&self.boost_factors)
            {
                *boosted = Real::from(overlap) * factor;
            }
        }
    }

    // ========================================================================
    // Inhibition
    // ========================================================================

    /// True when the whole region competes as one arena: either global
    /// inhibition was requested or the inhibition radius has outgrown the
    /// column space.
    fn inhibits_globally(&self) -> bool {
        self.inhibition_radius > self.max_column_dimension() || self.global_inhibition
    }

    fn max_column_dimension(&self) -> UInt {
        *self.column_dimensions.iter().max().unwrap()
    }

    /// Target density of winners for the current inhibition radius.
    fn inhibition_density(&self) -> Real {
        if self.num_active_columns_per_inh_area == 0 {
            return self.local_area_density;
        }

        let diameter = 2 * self.inhibition_radius + 1;
        let inhibition_area = (diameter as Real)
            .powi(self.column_dimensions.len() as i32)
            .min(self.num_columns as Real);
        (self.num_active_columns_per_inh_area as Real / inhibition_area)
            .min(MAX_LOCAL_AREA_DENSITY)
    }

    fn inhibit_columns(&self, boosted: &[Real], density: Real) -> Vec<CellIdx> {
        if self.inhibits_globally() {
            self.inhibit_columns_global(boosted, density)
        } else {
            self.inhibit_columns_local(boosted, density)
        }
    }

    /// Global k-winners-take-all over the whole region.
    ///
    /// Columns are ranked by boosted overlap; on ties the higher index
    /// ranks first, which pins the winner set without a tiebreaker array.
    /// Sub-threshold columns are trimmed off the tail of the winner list.
    fn inhibit_columns_global(&self, boosted: &[Real], density: Real) -> Vec<CellIdx> {
        let num_desired = (density * self.num_columns as Real).round() as usize;
        debug_assert!(num_desired > 0, "density was validated before compute");

        let rank = |a: &CellIdx, b: &CellIdx| -> Ordering {
            boosted[*b as usize]
                .partial_cmp(&boosted[*a as usize])
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.cmp(a))
        };

        let mut winners: Vec<CellIdx> = (0..self.num_columns as CellIdx).collect();
        // Partition winners from losers before paying for a full sort.
        if num_desired < winners.len() {
            winners.select_nth_unstable_by(num_desired, rank);
            winners.truncate(num_desired);
        }
        winners.sort_unstable_by(rank);

        let stimulus = self.stimulus_threshold as Real;
        while let Some(&last) = winners.last() {
            if boosted[last as usize] >= stimulus {
                break;
            }
            winners.pop();
        }
        winners
    }

    /// Local inhibition: each column above the stimulus threshold competes
    /// with its neighborhood and wins if fewer than `k` neighbors beat it.
    /// A neighbor with an equal score beats the column only if it was
    /// already selected, so earlier (lower-indexed) columns win ties.
    fn inhibit_columns_local(&self, boosted: &[Real], density: Real) -> Vec<CellIdx> {
        let mut active = Vec::new();
        let mut selected = vec![false; self.num_columns];
        let stimulus = self.stimulus_threshold as Real;

        for column in 0..self.num_columns as CellIdx {
            let overlap = boosted[column as usize];
            if overlap < stimulus {
                continue;
            }

            if self.wrap_around {
                // With wrapping, the neighbor count depends only on the
                // radius and the shape.
                let diameter = 2 * self.inhibition_radius + 1;
                let num_neighbors = self
                    .column_dimensions
                    .iter()
                    .map(|&dim| dim.min(diameter) as usize)
                    .product::<usize>()
                    - 1;
                let num_active = (0.5 + density * (num_neighbors + 1) as Real) as usize;

                let mut num_bigger = 0;
                for neighbor in WrappingNeighborhood::new(
                    column,
                    self.inhibition_radius,
                    &self.column_dimensions,
                ) {
                    if neighbor == column {
                        continue;
                    }
                    let difference = boosted[neighbor as usize] - overlap;
                    if difference > 0.0 || (difference == 0.0 && selected[neighbor as usize]) {
                        num_bigger += 1;
                        if num_bigger >= num_active {
                            break;
                        }
                    }
                }

                if num_bigger < num_active {
                    active.push(column);
                    selected[column as usize] = true;
                }
            } else {
                let mut num_neighbors = 0;
                let mut num_bigger = 0;
                for neighbor in
                    Neighborhood::new(column, self.inhibition_radius, &self.column_dimensions)
                {
                    if neighbor == column {
                        continue;
                    }
                    num_neighbors += 1;
                    let difference = boosted[neighbor as usize] - overlap;
                    if difference > 0.0 || (difference == 0.0 && selected[neighbor as usize]) {
                        num_bigger += 1;
                    }
                }

                let num_active = (0.5 + density * (num_neighbors + 1) as Real) as usize;
                if num_bigger < num_active {
                    active.push(column);
                    selected[column as usize] = true;
                }
            }
        }

        active
    }

    // ========================================================================
    // Learning
    // ========================================================================

    /// Hebbian adaptation of every winning column, followed by raising its
    /// permanences back above the stimulus threshold.
    fn adapt_synapses(&mut self, input: &Sdr, active_columns: &[CellIdx]) {
        for &column in active_columns {
            self.connections.adapt_segment(
                column,
                input,
                self.syn_perm_active_inc,
                self.syn_perm_inactive_dec,
            );
            self.connections
                .raise_permanences_to_threshold(column, self.stimulus_threshold);
        }
    }

    fn update_duty_cycles(&mut self, overlaps: &[SynapseIdx], active_columns: &[CellIdx]) {
        let period = self.duty_cycle_period.min(self.iteration_num);

        let overlapping: Vec<CellIdx> = overlaps
            .iter()
            .enumerate()
            .filter(|(_, &o)| o > 0)
            .map(|(i, _)| i as CellIdx)
            .collect();

        update_duty_cycles_helper(&mut self.overlap_duty_cycles, &overlapping, period);
        update_duty_cycles_helper(&mut self.active_duty_cycles, active_columns, period);
    }

    /// Gives every under-performing column a uniform permanence bump toward
    /// the connected threshold.
    fn bump_up_weak_columns(&mut self) {
        for column in 0..self.num_columns {
            if self.overlap_duty_cycles[column] >= self.min_overlap_duty_cycles[column] {
                continue;
            }
            self.connections
                .bump_segment(column as Segment, self.syn_perm_below_stimulus_inc);
        }
    }

    fn update_boost_factors(&mut self) {
        if self.global_inhibition {
            self.update_boost_factors_global();
        } else {
            self.update_boost_factors_local();
        }
    }

    /// Boost toward one region-wide target density.
    fn update_boost_factors_global(&mut self) {
        let target_density = if self.num_active_columns_per_inh_area > 0 {
            let diameter = 2 * self.inhibition_radius + 1;
            let inhibition_area: UInt = self
                .column_dimensions
                .iter()
                .map(|&dim| dim.min(diameter))
                .product();
            debug_assert!(inhibition_area > 0 && inhibition_area as usize <= self.num_columns);
            (self.num_active_columns_per_inh_area as Real / inhibition_area as Real)
                .min(MAX_LOCAL_AREA_DENSITY)
        } else {
            self.local_area_density
        };

        if self.boost_strength < EPSILON {
            return;
        }
        for (factor, &duty) in self.boost_factors.iter_mut().zip(&self.active_duty_cycles) {
            *factor = ((target_density - duty) * self.boost_strength).exp();
        }
    }

    /// Boost each column toward the mean activity of its neighborhood.
    fn update_boost_factors_local(&mut self) {
        if self.boost_strength < EPSILON {
            return;
        }

        for column in 0..self.num_columns as CellIdx {
            let mut density_sum = 0.0;
            let mut num_neighbors = 0usize;
            if self.wrap_around {
                for neighbor in WrappingNeighborhood::new(
                    column,
                    self.inhibition_radius,
                    &self.column_dimensions,
                ) {
                    density_sum += self.active_duty_cycles[neighbor as usize];
                    num_neighbors += 1;
                }
            } else {
                for neighbor in
                    Neighborhood::new(column, self.inhibition_radius, &self.column_dimensions)
                {
                    density_sum += self.active_duty_cycles[neighbor as usize];
                    num_neighbors += 1;
                }
            }

            let target_density = density_sum / num_neighbors as Real;
            self.boost_factors[column as usize] = ((target_density
                - self.active_duty_cycles[column as usize])
                * self.boost_strength)
                .exp();
        }
    }

    // ========================================================================
    // Periodic refresh
    // ========================================================================

    fn is_update_round(&self) -> bool {
        self.iteration_num % self.update_period == 0
    }

    /// Recomputes the inhibition radius from the average connected span of
    /// the columns' receptive fields.
    fn update_inhibition_radius(&mut self) {
        if self.global_inhibition {
            self.inhibition_radius = self.max_column_dimension();
            return;
        }

        let mut connected_span = 0.0;
        for column in 0..self.num_columns as CellIdx {
            connected_span += self.avg_connected_span_for_column(column);
        }
        connected_span /= self.num_columns as Real;

        let diameter = connected_span * self.avg_columns_per_input();
        let radius = ((diameter - 1.0) / 2.0).max(1.0);
        self.inhibition_radius = radius.round() as UInt;
    }

    /// Mean ratio of column-space extent to input-space extent, per axis.
    fn avg_columns_per_input(&self) -> Real {
        let num_dims = self.column_dimensions.len().max(self.input_dimensions.len());
        let mut columns_per_input = 0.0;
        for dim in 0..num_dims {
            let columns = self.column_dimensions.get(dim).copied().unwrap_or(1) as Real;
            let inputs = self.input_dimensions.get(dim).copied().unwrap_or(1) as Real;
            columns_per_input += columns / inputs;
        }
        columns_per_input / num_dims as Real
    }

    /// Average, over axes, of the extent (`max - min + 1`) covered by this
    /// column's connected synapses in input space; 0 when none are
    /// connected.
    fn avg_connected_span_for_column(&self, column: CellIdx) -> Real {
        let num_dims = self.input_dimensions.len();
        let converter = CoordinateConverter::new(&self.input_dimensions);

        // The min tracker starts at the largest input dimension; any
        // connected coordinate, including a lone one below that value,
        // pulls it down correctly.
        let seed_min = *self.input_dimensions.iter().max().unwrap();
        let mut max_coord = vec![0 as UInt; num_dims];
        let mut min_coord = vec![seed_min; num_dims];

        let mut any_connected = false;
        for &synapse in self.connections.synapses_for_segment(column) {
            let data = self.connections.data_for_synapse(synapse);
            if data.permanence < self.syn_perm_connected + EPSILON {
                continue;
            }
            any_connected = true;
            for (axis, c) in converter.to_coord(data.presynaptic_cell).into_iter().enumerate() {
                max_coord[axis] = max_coord[axis].max(c);
                min_coord[axis] = min_coord[axis].min(c);
            }
        }
        if !any_connected {
            return 0.0;
        }

        let total_span: UInt = max_coord
            .iter()
            .zip(&min_coord)
            .map(|(&max, &min)| max - min + 1)
            .sum();
        total_span as Real / num_dims as Real
    }

    fn update_min_duty_cycles(&mut self) {
        if self.global_inhibition || self.inhibition_radius >= self.max_column_dimension() {
            self.update_min_duty_cycles_global();
        } else {
            self.update_min_duty_cycles_local();
        }
    }

    fn update_min_duty_cycles_global(&mut self) {
        let max_duty = self
            .overlap_duty_cycles
            .iter()
            .copied()
            .fold(0.0, Real::max);
        let floor = self.min_pct_overlap_duty_cycles * max_duty;
        self.min_overlap_duty_cycles.fill(floor);
    }

    fn update_min_duty_cycles_local(&mut self) {
        for column in 0..self.num_columns as CellIdx {
            let mut max_duty = 0.0;
            if self.wrap_around {
                for neighbor in WrappingNeighborhood::new(
                    column,
                    self.inhibition_radius,
                    &self.column_dimensions,
                ) {
                    max_duty = Real::max(max_duty, self.overlap_duty_cycles[neighbor as usize]);
                }
            } else {
                for neighbor in
                    Neighborhood::new(column, self.inhibition_radius, &self.column_dimensions)
                {
                    max_duty = Real::max(max_duty, self.overlap_duty_cycles[neighbor as usize]);
                }
            }
            self.min_overlap_duty_cycles[column as usize] =
                max_duty * self.min_pct_overlap_duty_cycles;
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the input dimensions.
    pub fn input_dimensions(&self) -> &[UInt] {
        &self.input_dimensions
    }

    /// Returns the column dimensions.
    pub fn column_dimensions(&self) -> &[UInt] {
        &self.column_dimensions
    }

    /// Returns the number of inputs.
    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    /// Returns the number of columns.
    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    /// Returns the potential radius.
    pub fn potential_radius(&self) -> UInt {
        self.potential_radius
    }

    /// Sets the potential radius for later pool replacements.
    ///
    /// # Errors
    ///
    /// Fails unless `potential_radius < num_inputs`.
    pub fn set_potential_radius(&mut self, potential_radius: UInt) -> Result<()> {
        if potential_radius as usize >= self.num_inputs {
            return Err(VelesError::InvalidParameter {
                name: "potential_radius",
                message: format!("must be < the number of inputs ({})", self.num_inputs),
            });
        }
        self.potential_radius = potential_radius;
        Ok(())
    }

    /// Returns the potential percent.
    pub fn potential_pct(&self) -> Real {
        self.potential_pct
    }

    /// Sets the potential percent, in `(0, 1]`.
    ///
    /// # Errors
    ///
    /// Fails when outside the range.
    pub fn set_potential_pct(&mut self, potential_pct: Real) -> Result<()> {
        if potential_pct <= 0.0 || potential_pct > 1.0 {
            return Err(VelesError::InvalidParameter {
                name: "potential_pct",
                message: "must be in (0, 1]".to_string(),
            });
        }
        self.potential_pct = potential_pct;
        Ok(())
    }

    /// Returns whether global inhibition is enabled.
    pub fn global_inhibition(&self) -> bool {
        self.global_inhibition
    }

    /// Enables or disables global inhibition.
    pub fn set_global_inhibition(&mut self, global_inhibition: bool) {
        self.global_inhibition = global_inhibition;
    }

    /// Returns the winner count per inhibition area (0 when density-driven).
    pub fn num_active_columns_per_inh_area(&self) -> UInt {
        self.num_active_columns_per_inh_area
    }

    /// Sets the winner count per inhibition area and zeroes the density
    /// parameter (they are mutually exclusive).
    ///
    /// # Errors
    ///
    /// Fails unless `0 < n <= num_columns`.
    pub fn set_num_active_columns_per_inh_area(&mut self, n: UInt) -> Result<()> {
        if n == 0 || n as usize > self.num_columns {
            return Err(VelesError::InvalidParameter {
                name: "num_active_columns_per_inh_area",
                message: format!("must be in [1, {}]", self.num_columns),
            });
        }
        self.num_active_columns_per_inh_area = n;
        self.local_area_density = 0.0;
        Ok(())
    }

    /// Returns the local area density (0 when count-driven).
    pub fn local_area_density(&self) -> Real {
        self.local_area_density
    }

    /// Sets the target density and zeroes the per-area winner count (they
    /// are mutually exclusive).
    ///
    /// # Errors
    ///
    /// Fails when outside `(0, MAX_LOCAL_AREA_DENSITY]`, or when the density
    /// would select zero columns.
    pub fn set_local_area_density(&mut self, density: Real) -> Result<()> {
        if density <= 0.0 || density > MAX_LOCAL_AREA_DENSITY {
            return Err(VelesError::InvalidParameter {
                name: "local_area_density",
                message: format!("must be in (0, {MAX_LOCAL_AREA_DENSITY}]"),
            });
        }
        if (density * self.num_columns as Real).round() < 1.0 {
            return Err(VelesError::Exhaustion(format!(
                "density {density} of {} columns selects zero active columns",
                self.num_columns
            )));
        }
        self.local_area_density = density;
        self.num_active_columns_per_inh_area = 0;
        Ok(())
    }

    /// Returns the stimulus threshold.
    pub fn stimulus_threshold(&self) -> UInt {
        self.stimulus_threshold
    }

    /// Sets the stimulus threshold.
    pub fn set_stimulus_threshold(&mut self, stimulus_threshold: UInt) {
        self.stimulus_threshold = stimulus_threshold;
    }

    /// Returns the inhibition radius.
    pub fn inhibition_radius(&self) -> UInt {
        self.inhibition_radius
    }

    /// Overrides the inhibition radius until the next periodic refresh.
    pub fn set_inhibition_radius(&mut self, inhibition_radius: UInt) {
        self.inhibition_radius = inhibition_radius;
    }

    /// Returns the duty cycle period.
    pub fn duty_cycle_period(&self) -> UInt {
        self.duty_cycle_period
    }

    /// Sets the duty cycle period, at least 1.
    ///
    /// # Errors
    ///
    /// Fails on 0.
    pub fn set_duty_cycle_period(&mut self, duty_cycle_period: UInt) -> Result<()> {
        if duty_cycle_period < 1 {
            return Err(VelesError::InvalidParameter {
                name: "duty_cycle_period",
                message: "must be at least 1".to_string(),
            });
        }
        self.duty_cycle_period = duty_cycle_period;
        Ok(())
    }

    /// Returns the boost strength.
    pub fn boost_strength(&self) -> Real {
        self.boost_strength
    }

    /// Sets the boost strength, nonnegative.
    ///
    /// # Errors
    ///
    /// Fails on negative values.
    pub fn set_boost_strength(&mut self, boost_strength: Real) -> Result<()> {
        if boost_strength < 0.0 {
            return Err(VelesError::InvalidParameter {
                name: "boost_strength",
                message: "must be nonnegative".to_string(),
            });
        }
        self.boost_strength = boost_strength;
        Ok(())
    }

    /// Returns the current iteration number.
    pub fn iteration_num(&self) -> UInt {
        self.iteration_num
    }

    /// Overrides the iteration counter.
    pub fn set_iteration_num(&mut self, iteration_num: UInt) {
        self.iteration_num = iteration_num;
    }

    /// Returns the learning iteration number.
    pub fn iteration_learn_num(&self) -> UInt {
        self.iteration_learn_num
    }

    /// Overrides the learning iteration counter.
    pub fn set_iteration_learn_num(&mut self, iteration_learn_num: UInt) {
        self.iteration_learn_num = iteration_learn_num;
    }

    /// Returns whether topology wraps at the borders.
    pub fn wrap_around(&self) -> bool {
        self.wrap_around
    }

    /// Sets whether topology wraps at the borders.
    pub fn set_wrap_around(&mut self, wrap_around: bool) {
        self.wrap_around = wrap_around;
    }

    /// Returns the refresh period of the inhibition radius and duty-cycle
    /// floors.
    pub fn update_period(&self) -> UInt {
        self.update_period
    }

    /// Returns the active-synapse permanence increment.
    pub fn syn_perm_active_inc(&self) -> Permanence {
        self.syn_perm_active_inc
    }

    /// Sets the active-synapse permanence increment, in `(0, 1]`.
    ///
    /// # Errors
    ///
    /// Fails when outside the range.
    pub fn set_syn_perm_active_inc(&mut self, inc: Permanence) -> Result<()> {
        if inc <= MIN_PERMANENCE || inc > MAX_PERMANENCE {
            return Err(VelesError::InvalidParameter {
                name: "syn_perm_active_inc",
                message: "must be in (0, 1]".to_string(),
            });
        }
        self.syn_perm_active_inc = inc;
        Ok(())
    }

    /// Returns the inactive-synapse permanence decrement.
    pub fn syn_perm_inactive_dec(&self) -> Permanence {
        self.syn_perm_inactive_dec
    }

    /// Sets the inactive-synapse permanence decrement, in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Fails when outside the range.
    pub fn set_syn_perm_inactive_dec(&mut self, dec: Permanence) -> Result<()> {
        if dec < MIN_PERMANENCE || dec > MAX_PERMANENCE {
            return Err(VelesError::InvalidParameter {
                name: "syn_perm_inactive_dec",
                message: "must be in [0, 1]".to_string(),
            });
        }
        self.syn_perm_inactive_dec = dec;
        Ok(())
    }

    /// Returns the below-stimulus permanence increment.
    pub fn syn_perm_below_stimulus_inc(&self) -> Permanence {
        self.syn_perm_below_stimulus_inc
    }

    /// Returns the connected-permanence threshold.
    pub fn syn_perm_connected(&self) -> Permanence {
        self.syn_perm_connected
    }

    /// Returns the maximum permanence value.
    pub fn syn_perm_max(&self) -> Permanence {
        MAX_PERMANENCE
    }

    /// Returns the minimum-overlap-duty-cycle fraction.
    pub fn min_pct_overlap_duty_cycles(&self) -> Real {
        self.min_pct_overlap_duty_cycles
    }

    /// Sets the minimum-overlap-duty-cycle fraction, in `(0, 1]`.
    ///
    /// # Errors
    ///
    /// Fails when outside the range.
    pub fn set_min_pct_overlap_duty_cycles(&mut self, pct: Real) -> Result<()> {
        if pct <= 0.0 || pct > 1.0 {
            return Err(VelesError::InvalidParameter {
                name: "min_pct_overlap_duty_cycles",
                message: "must be in (0, 1]".to_string(),
            });
        }
        self.min_pct_overlap_duty_cycles = pct;
        Ok(())
    }

    /// Returns the per-column boost factors.
    pub fn boost_factors(&self) -> &[Real] {
        &self.boost_factors
    }

    /// Overrides the per-column boost factors.
    ///
    /// # Errors
    ///
    /// Fails when the length is not the number of columns.
    pub fn set_boost_factors(&mut self, boost_factors: &[Real]) -> Result<()> {
        self.copy_column_vector(boost_factors, "boost_factors")?;
        self.boost_factors.copy_from_slice(boost_factors);
        Ok(())
    }

    /// Returns the per-column overlap duty cycles.
    pub fn overlap_duty_cycles(&self) -> &[Real] {
        &self.overlap_duty_cycles
    }

    /// Overrides the per-column overlap duty cycles.
    ///
    /// # Errors
    ///
    /// Fails when the length is not the number of columns.
    pub fn set_overlap_duty_cycles(&mut self, duty_cycles: &[Real]) -> Result<()> {
        self.copy_column_vector(duty_cycles, "overlap_duty_cycles")?;
        self.overlap_duty_cycles.copy_from_slice(duty_cycles);
        Ok(())
    }

    /// Returns the per-column active duty cycles.
    pub fn active_duty_cycles(&self) -> &[Real] {
        &self.active_duty_cycles
    }

    /// Overrides the per-column active duty cycles.
    ///
    /// # Errors
    ///
    /// Fails when the length is not the number of columns.
    pub fn set_active_duty_cycles(&mut self, duty_cycles: &[Real]) -> Result<()> {
        self.copy_column_vector(duty_cycles, "active_duty_cycles")?;
        self.active_duty_cycles.copy_from_slice(duty_cycles);
        Ok(())
    }

    /// Returns the per-column minimum overlap duty cycles.
    pub fn min_overlap_duty_cycles(&self) -> &[Real] {
        &self.min_overlap_duty_cycles
    }

    /// Overrides the per-column minimum overlap duty cycles.
    ///
    /// # Errors
    ///
    /// Fails when the length is not the number of columns.
    pub fn set_min_overlap_duty_cycles(&mut self, duty_cycles: &[Real]) -> Result<()> {
        self.copy_column_vector(duty_cycles, "min_overlap_duty_cycles")?;
        self.min_overlap_duty_cycles.copy_from_slice(duty_cycles);
        Ok(())
    }

    fn copy_column_vector(&self, values: &[Real], name: &'static str) -> Result<()> {
        if values.len() == self.num_columns {
            Ok(())
        } else {
            Err(VelesError::InvalidParameter {
                name,
                message: format!(
                    "expected {} values, got {}",
                    self.num_columns,
                    values.len()
                ),
            })
        }
    }

    /// Returns the boosted overlaps from the last compute call.
    pub fn boosted_overlaps(&self) -> &[Real] {
        &self.boosted_overlaps
    }

    /// Returns a column's potential pool as ascending input indices.
    pub fn get_potential(&self, column: CellIdx) -> Vec<UInt> {
        let mut pool: Vec<UInt> = self
            .connections
            .synapses_for_segment(column)
            .iter()
            .map(|&s| self.connections.data_for_synapse(s).presynaptic_cell)
            .collect();
        pool.sort_unstable();
        pool
    }

    /// Replaces a column's potential pool wholesale. Existing synapses are
    /// destroyed and the new pool receives freshly drawn permanences.
    ///
    /// # Errors
    ///
    /// Fails if any index is out of the input range.
    pub fn set_potential(&mut self, column: CellIdx, potential: &[UInt]) -> Result<()> {
        for &input in potential {
            if input as usize >= self.num_inputs {
                return Err(VelesError::IndexOutOfBounds {
                    index: input as usize,
                    size: self.num_inputs,
                });
            }
        }

        let segment: Segment = column;
        while let Some(&synapse) = self.connections.synapses_for_segment(segment).first() {
            self.connections.destroy_synapse(synapse);
        }

        let mut pool = potential.to_vec();
        pool.sort_unstable();
        pool.dedup();
        for &input in &pool {
            let permanence = self.init_permanence();
            self.connections.create_synapse(segment, input, permanence);
        }
        Ok(())
    }

    /// Returns a column's permanences as a dense vector over all inputs.
    /// Only synapses at or above `threshold` are reported; pass 0 to get
    /// every synapse in the pool.
    pub fn get_permanence(&self, column: CellIdx, threshold: Permanence) -> Vec<Permanence> {
        let mut permanences = vec![0.0; self.num_inputs];
        for &synapse in self.connections.synapses_for_segment(column) {
            let data = self.connections.data_for_synapse(synapse);
            if data.permanence >= threshold {
                permanences[data.presynaptic_cell as usize] = data.permanence;
            }
        }
        permanences
    }

    /// Overrides a column's permanences from a dense vector over all
    /// inputs. Only positions inside the column's potential pool are
    /// applied.
    ///
    /// # Errors
    ///
    /// Fails when the length is not the number of inputs.
    pub fn set_permanence(&mut self, column: CellIdx, permanences: &[Permanence]) -> Result<()> {
        if permanences.len() != self.num_inputs {
            return Err(VelesError::InvalidParameter {
                name: "permanences",
                message: format!(
                    "expected {} values, got {}",
                    self.num_inputs,
                    permanences.len()
                ),
            });
        }

        let synapses: Vec<_> = self.connections.synapses_for_segment(column).to_vec();
        for synapse in synapses {
            let input = self.connections.data_for_synapse(synapse).presynaptic_cell;
            self.connections
                .update_synapse_permanence(synapse, permanences[input as usize]);
        }
        Ok(())
    }

    /// Returns each column's connected synapse count.
    pub fn connected_counts(&self) -> Vec<UInt> {
        (0..self.num_columns)
            .map(|column| {
                UInt::from(
                    self.connections
                        .data_for_segment(column as Segment)
                        .num_connected,
                )
            })
            .collect()
    }

    /// Returns the underlying connections graph.
    pub fn connections(&self) -> &Connections {
        &self.connections
    }

    /// Writes the main creation parameters and counters to `out`.
    ///
    /// # Errors
    ///
    /// Fails on stream errors.
    pub fn print_parameters<W: Write>(&self, out: &mut W) -> Result<()> {
        let io_err = |e: std::io::Error| VelesError::Io {
            message: e.to_string(),
        };
        writeln!(out, "------------ SpatialPooler Parameters ------------------").map_err(io_err)?;
        writeln!(out, "iterationNum                = {}", self.iteration_num).map_err(io_err)?;
        writeln!(out, "iterationLearnNum           = {}", self.iteration_learn_num)
            .map_err(io_err)?;
        writeln!(out, "numInputs                   = {}", self.num_inputs).map_err(io_err)?;
        writeln!(out, "numColumns                  = {}", self.num_columns).map_err(io_err)?;
        writeln!(
            out,
            "numActiveColumnsPerInhArea  = {}",
            self.num_active_columns_per_inh_area
        )
        .map_err(io_err)?;
        writeln!(out, "potentialPct                = {}", self.potential_pct).map_err(io_err)?;
        writeln!(out, "globalInhibition            = {}", self.global_inhibition)
            .map_err(io_err)?;
        writeln!(out, "localAreaDensity            = {}", self.local_area_density)
            .map_err(io_err)?;
        writeln!(out, "stimulusThreshold           = {}", self.stimulus_threshold)
            .map_err(io_err)?;
        writeln!(out, "synPermActiveInc            = {}", self.syn_perm_active_inc)
            .map_err(io_err)?;
        writeln!(out, "synPermInactiveDec          = {}", self.syn_perm_inactive_dec)
            .map_err(io_err)?;
        writeln!(out, "synPermConnected            = {}", self.syn_perm_connected)
            .map_err(io_err)?;
        writeln!(
            out,
            "minPctOverlapDutyCycles     = {}",
            self.min_pct_overlap_duty_cycles
        )
        .map_err(io_err)?;
        writeln!(out, "dutyCyclePeriod             = {}", self.duty_cycle_period)
            .map_err(io_err)?;
        writeln!(out, "boostStrength               = {}", self.boost_strength).map_err(io_err)?;
        writeln!(out, "wrapAround                  = {}", self.wrap_around).map_err(io_err)?;
        Ok(())
    }
}

/// Exponential moving average update, split into a dense decay pass and a
/// sparse increment pass over the indices that fired.
fn update_duty_cycles_helper(duty_cycles: &mut [Real], active: &[CellIdx], period: UInt) {
    debug_assert!(period > 0);
    let decay = (period - 1) as Real / period as Real;
    for duty in duty_cycles.iter_mut() {
        *duty *= decay;
    }

    let increment = 1.0 / period as Real;
    for &index in active {
        duty_cycles[index as usize] += increment;
    }
}

#[allow(clippy::float_cmp)]
impl PartialEq for SpatialPooler {
    /// Field-by-field equality over everything that defines the pooler's
    /// observable behavior, including the RNG state and the full synapse
    /// graph. Two equal poolers stay equal under identical inputs.
    fn eq(&self, other: &Self) -> bool {
        self.input_dimensions == other.input_dimensions
            && self.column_dimensions == other.column_dimensions
            && self.potential_radius == other.potential_radius
            && self.potential_pct == other.potential_pct
            && self.init_connected_pct == other.init_connected_pct
            && self.global_inhibition == other.global_inhibition
            && self.local_area_density == other.local_area_density
            && self.num_active_columns_per_inh_area == other.num_active_columns_per_inh_area
            && self.stimulus_threshold == other.stimulus_threshold
            && self.syn_perm_inactive_dec == other.syn_perm_inactive_dec
            && self.syn_perm_active_inc == other.syn_perm_active_inc
            && self.syn_perm_below_stimulus_inc == other.syn_perm_below_stimulus_inc
            && self.syn_perm_connected == other.syn_perm_connected
            && self.min_pct_overlap_duty_cycles == other.min_pct_overlap_duty_cycles
            && self.duty_cycle_period == other.duty_cycle_period
            && self.boost_strength == other.boost_strength
            && self.wrap_around == other.wrap_around
            && self.update_period == other.update_period
            && self.inhibition_radius == other.inhibition_radius
            && self.boost_factors == other.boost_factors
            && self.overlap_duty_cycles == other.overlap_duty_cycles
            && self.active_duty_cycles == other.active_duty_cycles
            && self.min_overlap_duty_cycles == other.min_overlap_duty_cycles
            && self.iteration_num == other.iteration_num
            && self.iteration_learn_num == other.iteration_learn_num
            && self.rng == other.rng
            && self.connections == other.connections
    }
}

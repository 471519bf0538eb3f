//! Connections - the synaptic connectivity graph.
//!
//! Stores cells, their segments, and the synapses on those segments, and
//! provides the bulk permanence operations the Spatial Pooler learns with.
//! The pooler gives every column exactly one segment, created in column
//! order, so segment ids coincide with column ids there.

use crate::types::{
    CellIdx, ElemSparse, Permanence, Sdr, Segment, Synapse, SynapseIdx, UInt, MAX_PERMANENCE,
    MIN_PERMANENCE,
};

use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Data associated with a synapse.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SynapseData {
    /// The presynaptic input this synapse listens to.
    pub presynaptic_cell: CellIdx,

    /// The permanence strength, in `[MIN_PERMANENCE, MAX_PERMANENCE]`.
    pub permanence: Permanence,

    /// The segment this synapse belongs to.
    pub segment: Segment,
}

/// Data associated with a segment.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SegmentData {
    /// The synapses on this segment.
    pub synapses: SmallVec<[Synapse; 32]>,

    /// The cell this segment belongs to.
    pub cell: CellIdx,

    /// Number of synapses at or above the connected threshold.
    pub num_connected: SynapseIdx,
}

impl SegmentData {
    fn new(cell: CellIdx) -> Self {
        Self {
            synapses: SmallVec::new(),
            cell,
            num_connected: 0,
        }
    }
}

/// Data associated with a cell.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct CellData {
    /// The segments on this cell.
    segments: SmallVec<[Segment; 1]>,
}

/// The synaptic connections between a set of cells and their inputs.
///
/// Synapses live in an arena indexed by stable handles; destroyed slots are
/// recycled. A presynaptic lookup map keeps [`Connections::compute_activity`]
/// proportional to the number of *active* inputs rather than the number of
/// synapses.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Connections {
    cells: Vec<CellData>,
    segments: Vec<SegmentData>,
    synapses: Vec<SynapseData>,

    /// Destroyed synapse slots, available for reuse.
    destroyed_synapses: Vec<Synapse>,

    /// Permanence threshold at which a synapse counts as connected.
    connected_threshold: Permanence,

    /// Presynaptic input -> synapses currently at or above the threshold.
    connected_synapses_for_input: AHashMap<CellIdx, Vec<Synapse>>,
}

impl Connections {
    /// Creates a graph over `num_cells` cells with the given connected
    /// threshold.
    #[must_use]
    pub fn new(num_cells: CellIdx, connected_threshold: Permanence) -> Self {
        Self {
            cells: vec![CellData::default(); num_cells as usize],
            segments: Vec::new(),
            synapses: Vec::new(),
            destroyed_synapses: Vec::new(),
            connected_threshold,
            connected_synapses_for_input: AHashMap::new(),
        }
    }

    /// Returns the number of cells.
    #[inline]
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    /// Returns the connected threshold.
    #[inline]
    pub fn connected_threshold(&self) -> Permanence {
        self.connected_threshold
    }

    /// Returns the number of segments.
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// Returns the number of live synapses.
    pub fn num_synapses(&self) -> usize {
        self.synapses.len() - self.destroyed_synapses.len()
    }

    /// Returns the number of live synapses on a segment.
    pub fn num_synapses_on_segment(&self, segment: Segment) -> usize {
        self.segments[segment as usize].synapses.len()
    }

    // ========================================================================
    // Segments
    // ========================================================================

    /// Creates a new segment on `cell` and returns its id.
    ///
    /// Segment ids are assigned in creation order, so creating one segment
    /// per cell, in cell order, makes segment ids equal cell ids.
    pub fn create_segment(&mut self, cell: CellIdx) -> Segment {
        let segment = self.segments.len() as Segment;
        self.segments.push(SegmentData::new(cell));
        self.cells[cell as usize].segments.push(segment);
        segment
    }

    /// Gets the segments for a cell.
    #[inline]
    pub fn segments_for_cell(&self, cell: CellIdx) -> &[Segment] {
        &self.cells[cell as usize].segments
    }

    /// Gets the cell that owns a segment.
    #[inline]
    pub fn cell_for_segment(&self, segment: Segment) -> CellIdx {
        self.segments[segment as usize].cell
    }

    /// Gets the segment data.
    #[inline]
    pub fn data_for_segment(&self, segment: Segment) -> &SegmentData {
        &self.segments[segment as usize]
    }

    // ========================================================================
    // Synapses
    // ========================================================================

    /// Creates a synapse on `segment` listening to `presynaptic_cell`, with
    /// the given (clamped) permanence, and returns its id.
    ///
    /// If the segment already has a synapse to that input, the existing
    /// synapse is returned instead; its permanence is raised if the new
    /// value is higher.
    pub fn create_synapse(
        &mut self,
        segment: Segment,
        presynaptic_cell: CellIdx,
        permanence: Permanence,
    ) -> Synapse {
        let existing = self.segments[segment as usize]
            .synapses
            .iter()
            .find(|&&s| self.synapses[s as usize].presynaptic_cell == presynaptic_cell)
            .copied();

        if let Some(synapse) = existing {
            if permanence > self.synapses[synapse as usize].permanence {
                self.update_synapse_permanence(synapse, permanence);
            }
            return synapse;
        }

        let permanence = permanence.clamp(MIN_PERMANENCE, MAX_PERMANENCE);
        let data = SynapseData {
            presynaptic_cell,
            permanence,
            segment,
        };

        let synapse = if let Some(recycled) = self.destroyed_synapses.pop() {
            self.synapses[recycled as usize] = data;
            recycled
        } else {
            let synapse = self.synapses.len() as Synapse;
            self.synapses.push(data);
            synapse
        };

        self.segments[segment as usize].synapses.push(synapse);

        if permanence >= self.connected_threshold {
            self.segments[segment as usize].num_connected += 1;
            self.connected_synapses_for_input
                .entry(presynaptic_cell)
                .or_default()
                .push(synapse);
        }

        synapse
    }

    /// Destroys a synapse. Its slot is recycled by later creations.
    pub fn destroy_synapse(&mut self, synapse: Synapse) {
        let (segment, presynaptic_cell, was_connected) = {
            let data = &self.synapses[synapse as usize];
            (
                data.segment,
                data.presynaptic_cell,
                data.permanence >= self.connected_threshold,
            )
        };

        let segment_synapses = &mut self.segments[segment as usize].synapses;
        if let Some(pos) = segment_synapses.iter().position(|&s| s == synapse) {
            segment_synapses.remove(pos);
        }

        if was_connected {
            self.segments[segment as usize].num_connected -= 1;
            self.unlink_connected(synapse, presynaptic_cell);
        }

        // Poison the slot so stale handles are visibly dead.
        self.synapses[synapse as usize].permanence = -1.0;
        self.destroyed_synapses.push(synapse);
    }

    /// Sets a synapse's permanence, clamping to the permanence range and
    /// maintaining the connected bookkeeping.
    pub fn update_synapse_permanence(&mut self, synapse: Synapse, permanence: Permanence) {
        let permanence = permanence.clamp(MIN_PERMANENCE, MAX_PERMANENCE);

        let (old, presynaptic_cell, segment) = {
            let data = &self.synapses[synapse as usize];
            (data.permanence, data.presynaptic_cell, data.segment)
        };

        let was_connected = old >= self.connected_threshold;
        let is_connected = permanence >= self.connected_threshold;
        self.synapses[synapse as usize].permanence = permanence;

        if was_connected != is_connected {
            if is_connected {
                self.segments[segment as usize].num_connected += 1;
                self.connected_synapses_for_input
                    .entry(presynaptic_cell)
                    .or_default()
                    .push(synapse);
            } else {
                self.segments[segment as usize].num_connected -= 1;
                self.unlink_connected(synapse, presynaptic_cell);
            }
        }
    }

    fn unlink_connected(&mut self, synapse: Synapse, presynaptic_cell: CellIdx) {
        if let Some(list) = self.connected_synapses_for_input.get_mut(&presynaptic_cell) {
            if let Some(pos) = list.iter().position(|&s| s == synapse) {
                list.swap_remove(pos);
            }
        }
    }

    /// Gets the synapses on a segment.
    #[inline]
    pub fn synapses_for_segment(&self, segment: Segment) -> &[Synapse] {
        &self.segments[segment as usize].synapses
    }

    /// Gets the synapse data.
    #[inline]
    pub fn data_for_synapse(&self, synapse: Synapse) -> &SynapseData {
        &self.synapses[synapse as usize]
    }

    // ========================================================================
    // Activity
    // ========================================================================

    /// Computes per-segment overlap with a set of active inputs: the number
    /// of *connected* synapses whose presynaptic input is active.
    ///
    /// The result is indexed by segment id. The `learn` flag is part of the
    /// call contract for callers that track learning epochs; activity
    /// computation itself never mutates the graph.
    pub fn compute_activity(
        &self,
        active_inputs: &[ElemSparse],
        _learn: bool,
    ) -> Vec<SynapseIdx> {
        let mut overlaps = vec![0; self.segments.len()];

        for input in active_inputs {
            if let Some(synapses) = self.connected_synapses_for_input.get(input) {
                for &synapse in synapses {
                    let segment = self.synapses[synapse as usize].segment;
                    overlaps[segment as usize] += 1;
                }
            }
        }

        overlaps
    }

    // ========================================================================
    // Learning
    // ========================================================================

    /// Hebbian update of one segment against an input pattern: synapses to
    /// active inputs gain `increment`, all others lose `decrement`, clamped.
    pub fn adapt_segment(
        &mut self,
        segment: Segment,
        inputs: &Sdr,
        increment: Permanence,
        decrement: Permanence,
    ) {
        debug_assert!(inputs.has_value());
        let active: AHashSet<ElemSparse> = inputs
            .with_sparse(|sparse| sparse.iter().copied().collect())
            .unwrap_or_default();

        let synapses: Vec<Synapse> = self.segments[segment as usize]
            .synapses
            .iter()
            .copied()
            .collect();

        for synapse in synapses {
            let data = &self.synapses[synapse as usize];
            let delta = if active.contains(&data.presynaptic_cell) {
                increment
            } else {
                -decrement
            };

            let updated = (data.permanence + delta).clamp(MIN_PERMANENCE, MAX_PERMANENCE);
            if updated != data.permanence {
                self.update_synapse_permanence(synapse, updated);
            }
        }
    }

    /// Raises every permanence on the segment by the below-stimulus
    /// increment (one tenth of the connected threshold), repeatedly, until
    /// at least `threshold` synapses are connected.
    ///
    /// If the segment has fewer synapses than `threshold` the loop stops
    /// once all of them are connected; permanences only ever increase, so
    /// the loop terminates.
    pub fn raise_permanences_to_threshold(&mut self, segment: Segment, threshold: UInt) {
        let increment = self.connected_threshold / 10.0;
        if increment <= 0.0 {
            return;
        }

        loop {
            let data = &self.segments[segment as usize];
            let connected = UInt::from(data.num_connected);
            if connected >= threshold || connected as usize >= data.synapses.len() {
                return;
            }
            self.bump_segment(segment, increment);
        }
    }

    /// Adds `delta` to every permanence on the segment, clamping.
    pub fn bump_segment(&mut self, segment: Segment, delta: Permanence) {
        let synapses: Vec<Synapse> = self.segments[segment as usize]
            .synapses
            .iter()
            .copied()
            .collect();

        for synapse in synapses {
            let updated = self.synapses[synapse as usize].permanence + delta;
            self.update_synapse_permanence(synapse, updated);
        }
    }
}

impl PartialEq for Connections {
    fn eq(&self, other: &Self) -> bool {
        self.cells == other.cells
            && self.segments == other.segments
            && self.synapses == other.synapses
            && self.connected_threshold == other.connected_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> Connections {
        Connections::new(100, 0.5)
    }

    #[test]
    fn test_create() {
        let conn = graph();
        assert_eq!(conn.num_cells(), 100);
        assert_eq!(conn.num_segments(), 0);
        assert_eq!(conn.num_synapses(), 0);
    }

    #[test]
    fn test_segment_ids_follow_cell_order() {
        let mut conn = graph();
        for cell in 0..100 {
            let segment = conn.create_segment(cell);
            assert_eq!(segment, cell);
            assert_eq!(conn.cell_for_segment(segment), cell);
        }
        assert_eq!(conn.num_segments(), 100);
    }

    #[test]
    fn test_create_synapse_clamps() {
        let mut conn = graph();
        let seg = conn.create_segment(10);
        let syn = conn.create_synapse(seg, 50, 1.5);
        assert_eq!(conn.data_for_synapse(syn).permanence, MAX_PERMANENCE);

        let syn2 = conn.create_synapse(seg, 51, -0.5);
        assert_eq!(conn.data_for_synapse(syn2).permanence, MIN_PERMANENCE);
    }

    #[test]
    fn test_connected_count() {
        let mut conn = graph();
        let seg = conn.create_segment(10);
        conn.create_synapse(seg, 50, 0.6);
        conn.create_synapse(seg, 51, 0.4);
        conn.create_synapse(seg, 52, 0.5); // at threshold counts

        assert_eq!(conn.data_for_segment(seg).num_connected, 2);
    }

    #[test]
    fn test_update_permanence_tracks_connectivity() {
        let mut conn = graph();
        let seg = conn.create_segment(10);
        let syn = conn.create_synapse(seg, 50, 0.4);
        assert_eq!(conn.data_for_segment(seg).num_connected, 0);

        conn.update_synapse_permanence(syn, 0.6);
        assert_eq!(conn.data_for_segment(seg).num_connected, 1);
        assert_eq!(conn.compute_activity(&[50], false)[seg as usize], 1);

        conn.update_synapse_permanence(syn, 0.3);
        assert_eq!(conn.data_for_segment(seg).num_connected, 0);
        assert_eq!(conn.compute_activity(&[50], false)[seg as usize], 0);
    }

    #[test]
    fn test_destroy_synapse() {
        let mut conn = graph();
        let seg = conn.create_segment(10);
        let syn = conn.create_synapse(seg, 50, 0.6);
        assert_eq!(conn.num_synapses(), 1);

        conn.destroy_synapse(syn);
        assert_eq!(conn.num_synapses(), 0);
        assert_eq!(conn.num_synapses_on_segment(seg), 0);
        assert_eq!(conn.data_for_segment(seg).num_connected, 0);
        assert_eq!(conn.compute_activity(&[50], false)[seg as usize], 0);

        // Destroyed slot is recycled.
        let syn2 = conn.create_synapse(seg, 51, 0.2);
        assert_eq!(syn2, syn);
    }

    #[test]
    fn test_duplicate_synapse_returns_existing() {
        let mut conn = graph();
        let seg = conn.create_segment(10);
        let syn1 = conn.create_synapse(seg, 50, 0.5);
        let syn2 = conn.create_synapse(seg, 50, 0.3);

        assert_eq!(syn1, syn2);
        assert_eq!(conn.num_synapses_on_segment(seg), 1);
        assert_eq!(conn.data_for_synapse(syn1).permanence, 0.5);

        // Higher permanence wins.
        conn.create_synapse(seg, 50, 0.7);
        assert_eq!(conn.data_for_synapse(syn1).permanence, 0.7);
    }

    #[test]
    fn test_compute_activity() {
        let mut conn = graph();
        let seg1 = conn.create_segment(10);
        conn.create_synapse(seg1, 50, 0.6);
        conn.create_synapse(seg1, 51, 0.6);
        conn.create_synapse(seg1, 52, 0.4); // not connected

        let seg2 = conn.create_segment(20);
        conn.create_synapse(seg2, 50, 0.6);

        let activity = conn.compute_activity(&[50, 51, 53], false);
        assert_eq!(activity[seg1 as usize], 2);
        assert_eq!(activity[seg2 as usize], 1);
    }

    #[test]
    fn test_adapt_segment() {
        let mut conn = graph();
        let seg = conn.create_segment(10);
        let syn1 = conn.create_synapse(seg, 50, 0.5);
        let syn2 = conn.create_synapse(seg, 51, 0.5);

        let mut input = Sdr::new(&[100]).unwrap();
        input.set_sparse(&[50]).unwrap();

        conn.adapt_segment(seg, &input, 0.1, 0.1);

        assert!((conn.data_for_synapse(syn1).permanence - 0.6).abs() < 1e-6);
        assert!((conn.data_for_synapse(syn2).permanence - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_adapt_segment_clamps_at_bounds() {
        let mut conn = graph();
        let seg = conn.create_segment(10);
        let syn1 = conn.create_synapse(seg, 50, 0.95);
        let syn2 = conn.create_synapse(seg, 51, 0.05);

        let mut input = Sdr::new(&[100]).unwrap();
        input.set_sparse(&[50]).unwrap();

        conn.adapt_segment(seg, &input, 0.2, 0.2);

        assert_eq!(conn.data_for_synapse(syn1).permanence, MAX_PERMANENCE);
        assert_eq!(conn.data_for_synapse(syn2).permanence, MIN_PERMANENCE);
    }

    #[test]
    fn test_raise_permanences_bumps_uniformly() {
        let mut conn = graph();
        let seg = conn.create_segment(10);
        conn.create_synapse(seg, 50, 0.45);
        conn.create_synapse(seg, 51, 0.30);
        conn.create_synapse(seg, 52, 0.10);
        assert_eq!(conn.data_for_segment(seg).num_connected, 0);

        conn.raise_permanences_to_threshold(seg, 1);

        // One bump of threshold/10 = 0.05 connects the 0.45 synapse; the
        // others moved by exactly the same amount.
        assert_eq!(conn.data_for_segment(seg).num_connected, 1);
        let perms: Vec<Permanence> = conn
            .synapses_for_segment(seg)
            .iter()
            .map(|&s| conn.data_for_synapse(s).permanence)
            .collect();
        assert!((perms[0] - 0.50).abs() < 1e-6);
        assert!((perms[1] - 0.35).abs() < 1e-6);
        assert!((perms[2] - 0.15).abs() < 1e-6);
    }

    #[test]
    fn test_raise_permanences_loops_until_met() {
        let mut conn = graph();
        let seg = conn.create_segment(10);
        conn.create_synapse(seg, 50, 0.45);
        conn.create_synapse(seg, 51, 0.30);

        conn.raise_permanences_to_threshold(seg, 2);
        assert_eq!(conn.data_for_segment(seg).num_connected, 2);
    }

    #[test]
    fn test_raise_permanences_stops_on_small_pool() {
        let mut conn = graph();
        let seg = conn.create_segment(10);
        conn.create_synapse(seg, 50, 0.1);

        // Threshold larger than the pool: all synapses end connected and the
        // loop must still terminate.
        conn.raise_permanences_to_threshold(seg, 5);
        assert_eq!(conn.data_for_segment(seg).num_connected, 1);
    }

    #[test]
    fn test_bump_segment() {
        let mut conn = graph();
        let seg = conn.create_segment(10);
        conn.create_synapse(seg, 50, 0.5);
        conn.create_synapse(seg, 51, 0.95);

        conn.bump_segment(seg, 0.1);

        let perms: Vec<Permanence> = conn
            .synapses_for_segment(seg)
            .iter()
            .map(|&s| conn.data_for_synapse(s).permanence)
            .collect();
        assert!((perms[0] - 0.6).abs() < 1e-6);
        assert_eq!(perms[1], MAX_PERMANENCE); // clamped
    }

    #[test]
    fn test_equality() {
        let build = || {
            let mut conn = Connections::new(10, 0.5);
            let seg = conn.create_segment(0);
            conn.create_synapse(seg, 3, 0.4);
            conn.create_synapse(seg, 4, 0.6);
            conn
        };

        let a = build();
        let mut b = build();
        assert_eq!(a, b);

        b.update_synapse_permanence(0, 0.9);
        assert_ne!(a, b);
    }
}

//! Core algorithms.
//!
//! - **Connections**: the synaptic connectivity graph
//! - **Spatial Pooler**: sparse representations from input patterns

mod connections;
mod spatial_pooler;

pub use connections::{Connections, SegmentData, SynapseData};
pub use spatial_pooler::{SpatialPooler, SpatialPoolerParams, MAX_LOCAL_AREA_DENSITY};

//! # shift-algo: Feeder Synthesis Algorithms
//!
//! Turns customer locations and a road network into a radial distribution
//! feeder, then decorates it with phases, voltages and equipment.
//!
//! ## Stages
//!
//! | Stage | Entry point | Output |
//! |-------|-------------|--------|
//! | Clustering | [`cluster::kmeans`] | one [`ClusterGroup`](shift_core::ClusterGroup) per transformer |
//! | Topology | [`TopologyBuilder::build`] | [`BuiltTopology`] |
//! | Phasing | [`assign_phases`] | [`PhaseAssignment`] |
//! | Voltage | [`assign_voltages`] | [`VoltageAssignment`] |
//! | Equipment | [`EquipmentMapper::mapping`] | [`EquipmentMapping`] |
//!
//! [`pipeline::synthesize`] runs the first four from a [`ShiftConfig`].
//!
//! ## Example
//!
//! ```ignore
//! use shift_algo::{synthesize, ShiftConfig};
//!
//! let config = ShiftConfig::load_from("feeder.toml".as_ref())?;
//! let feeder = synthesize(&parcels, substation, &roads, &config)?;
//!
//! let mut equipment = feeder.equipment(catalog, &config);
//! for (edge, record) in &equipment.mapping()?.edges {
//!     println!("{edge}: {}", record.name);
//! }
//! ```

pub mod builder;
pub mod cluster;
pub mod config;
pub mod equipment;
pub mod mesh;
pub mod nearest;
pub mod paths;
pub mod phase;
pub mod pipeline;
pub mod road;
pub mod voltage;

pub use builder::{
    default_descriptors, BuilderConfig, BuiltTopology, TopologyBuilder, TransformerDefaults,
    TransformerSite,
};
pub use cluster::{cluster_count_for, kmeans, ClusterSizing, KMeansConfig};
pub use config::ShiftConfig;
pub use equipment::{
    CatalogEntry, EquipmentCatalog, EquipmentKind, EquipmentMapper, EquipmentMapping,
    EquipmentQuery, EquipmentRecord, InMemoryCatalog,
};
pub use nearest::{nearest, NearestMatch};
pub use phase::{
    assign_phases, BalancingMethod, Phase, PhaseAssignment, PhaseConfig, PhaseSet,
    TransformerDescriptor, TransformerType,
};
pub use pipeline::{synthesize, Synthesis};
pub use road::{RoadNetwork, RoadNetworkProvider, RoadNode};
pub use voltage::{assign_voltages, TransformerVoltage, VoltageAssignment, VoltageMismatch};

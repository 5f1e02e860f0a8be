//! # shift-core: Distribution Network Model
//!
//! Data structures shared by every stage of feeder synthesis.
//!
//! ## Design Philosophy
//!
//! A synthesized feeder is modeled as a **named, directed graph** where:
//! - **Nodes** carry a location and a set of asset tags (Load, Solar,
//!   Capacitor, VoltageSource)
//! - **Edges** are either branches (lines) or transformers
//!
//! Edges are stored oriented away from the source, but the network is treated
//! as undirected when it is walked. Exactly one node may carry the
//! VoltageSource tag, and the phase and voltage mappers walk the depth-first
//! spanning tree rooted there.
//!
//! ## Quick Start
//!
//! ```rust
//! use shift_core::*;
//!
//! let mut graph = DistributionGraph::new();
//! graph.add_node(Node::new("sub", GeoPoint::new(-97.3308, 32.7555)).with_asset(AssetKind::VoltageSource))?;
//! graph.add_node(Node::new("ht", GeoPoint::new(-97.3300, 32.7555)))?;
//! graph.add_node(Node::new("lt", GeoPoint::new(-97.3300, 32.7556)).with_asset(AssetKind::Load))?;
//!
//! graph.add_edge("sub", "ht", Edge::branch("line-1", Some(Meters(75.0))))?;
//! graph.add_edge("ht", "lt", Edge::transformer("xfmr-1"))?;
//!
//! ensure_connected_from_source(&graph)?;
//! assert_eq!(graph_stats(&graph).transformer_count, 1);
//! # Ok::<(), ShiftError>(())
//! ```
//!
//! ## Modules
//!
//! - [`network`] - The [`DistributionGraph`] ADT and its DFS spanning tree
//! - [`geometry`] - [`GeoPoint`], bounding boxes, parcels and cluster groups
//! - [`units`] - Length, voltage and apparent-power newtypes
//! - [`graph_utils`] - Statistics, islands and the connectivity check
//! - [`error`] - The [`ShiftError`] taxonomy

pub mod error;
pub mod geometry;
pub mod graph_utils;
pub mod network;
pub mod units;

pub use error::{ShiftError, ShiftResult};
pub use geometry::{
    parcel_points, project_onto_segment, BoundingBox, ClusterGroup, GeoPoint, Parcel,
    ParcelGeometry,
};
pub use graph_utils::*;
pub use network::{
    AssetKind, DfsTree, DistributionGraph, Edge, EdgeKind, Node, TreeEdge, UndirectedNetwork,
};
pub use units::{KilovoltAmperes, Kilovolts, Meters, METERS_PER_DEGREE};

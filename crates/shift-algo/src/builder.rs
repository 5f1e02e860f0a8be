//! Topology builder: clusters + roads → one radial distribution graph.
//!
//! # Algorithm
//!
//! 1. Snap the source and every cluster centre to the nearest road node.
//! 2. **Primary**: one Dijkstra from the source's road node; the union of
//!    the shortest paths to every centre's road node becomes the primary
//!    network. The source's road node carries the voltage source.
//! 3. **Secondary**: per cluster, a mesh over its members, pruned to a tree
//!    from the node nearest the centre (see [`crate::mesh`]).
//! 4. One Transformer edge per cluster joins the centre's road node (HT) to
//!    the secondary root (LT).
//!
//! Road nodes keep their ids under an `r:` namespace so they never clash
//! with generated secondary names. Every edge is oriented away from the
//! source and the finished graph is checked to be fully reachable from it.

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use shift_core::{
    ensure_connected_from_source, AssetKind, BoundingBox, ClusterGroup, DistributionGraph, Edge,
    GeoPoint, KilovoltAmperes, Meters, Node, ShiftError, ShiftResult,
};
use tracing::{debug, info};

use crate::mesh::{build_secondary, MeshSettings};
use crate::nearest::PointIndex;
use crate::paths::shortest_path_tree;
use crate::phase::{TransformerDescriptor, TransformerType};
use crate::road::{RoadNetwork, RoadNetworkProvider};

/// Tunables for [`TopologyBuilder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    #[serde(rename = "mesh_spacing_m")]
    pub mesh_spacing: Meters,
    /// Members farther than this from a free mesh node get their own node.
    #[serde(rename = "max_snap_distance_m")]
    pub max_snap_distance: Meters,
    /// Split road segments longer than this before routing.
    #[serde(rename = "road_split_length_m")]
    pub road_split_length: Option<Meters>,
    /// Margin around the parcels when requesting roads from a provider.
    #[serde(rename = "road_buffer_m")]
    pub road_buffer: Meters,
    pub max_mesh_nodes: usize,
    /// Prepended to every generated node and edge name.
    pub name_prefix: String,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            mesh_spacing: Meters(50.0),
            max_snap_distance: Meters(25.0),
            road_split_length: Some(Meters(150.0)),
            road_buffer: Meters(20.0),
            max_mesh_nodes: 250_000,
            name_prefix: String::new(),
        }
    }
}

/// One transformer placed by the builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformerSite {
    /// Transformer edge name.
    pub name: String,
    pub cluster: usize,
    /// Location of the HT (road) node.
    pub location: GeoPoint,
    pub ht_node: String,
    pub lt_node: String,
    pub load_count: usize,
}

/// Output of [`TopologyBuilder::build`].
#[derive(Debug, Clone)]
pub struct BuiltTopology {
    pub graph: DistributionGraph,
    /// Each input member point and the Load node created for it.
    pub point_node_mapping: Vec<(GeoPoint, String)>,
    pub transformers: Vec<TransformerSite>,
}

impl BuiltTopology {
    pub fn node_for(&self, point: &GeoPoint) -> Option<&str> {
        self.point_node_mapping
            .iter()
            .find(|(p, _)| p == point)
            .map(|(_, name)| name.as_str())
    }
}

/// Sizing rule for [`default_descriptors`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformerDefaults {
    #[serde(rename = "type")]
    pub kind: TransformerType,
    pub kva_per_load: KilovoltAmperes,
    /// Smallest rating handed out, whatever the load count.
    pub min_kva: KilovoltAmperes,
}

impl Default for TransformerDefaults {
    fn default() -> Self {
        Self {
            kind: TransformerType::SplitPhase,
            kva_per_load: KilovoltAmperes(5.0),
            min_kva: KilovoltAmperes(10.0),
        }
    }
}

/// Descriptors for builder-placed transformers, rated `kva_per_load` per
/// served load (at least `min_kva`).
pub fn default_descriptors(
    sites: &[TransformerSite],
    defaults: &TransformerDefaults,
) -> Vec<TransformerDescriptor> {
    sites
        .iter()
        .map(|site| {
            let sized = defaults.kva_per_load * site.load_count as f64;
            let capacity = if sized.value() < defaults.min_kva.value() {
                defaults.min_kva
            } else {
                sized
            };
            TransformerDescriptor::new(&site.name, defaults.kind, capacity, site.location)
        })
        .collect()
}

/// Builds a radial feeder from clustered customer points and a road network.
#[derive(Debug, Clone, Default)]
pub struct TopologyBuilder {
    config: BuilderConfig,
}

impl TopologyBuilder {
    pub fn new(config: BuilderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Fetch roads for the buffered area around all members, then [`build`](Self::build).
    pub fn build_from_provider<P: RoadNetworkProvider + ?Sized>(
        &self,
        groups: &[ClusterGroup],
        source: GeoPoint,
        provider: &P,
    ) -> ShiftResult<BuiltTopology> {
        let mut points: Vec<GeoPoint> = groups
            .iter()
            .flat_map(|g| g.points.iter().copied())
            .collect();
        points.push(source);
        let bounds = BoundingBox::from_points(&points)
            .ok_or_else(|| ShiftError::InvalidInput("no points to build around".to_string()))?
            .buffered(self.config.road_buffer);
        let road = provider.road_network(&bounds)?;
        debug!(
            nodes = road.node_count(),
            segments = road.segment_count(),
            "road network fetched"
        );
        self.build(groups, source, &road)
    }

    pub fn build(
        &self,
        groups: &[ClusterGroup],
        source: GeoPoint,
        road: &RoadNetwork,
    ) -> ShiftResult<BuiltTopology> {
        if groups.is_empty() {
            return Err(ShiftError::InvalidInput(
                "at least one cluster is required".to_string(),
            ));
        }
        if let Some(k) = groups.iter().position(ClusterGroup::is_empty) {
            return Err(ShiftError::InvalidInput(format!(
                "cluster {k} has no member points"
            )));
        }
        if !source.is_finite() {
            return Err(ShiftError::InvalidInput(format!(
                "source location {source} is not finite"
            )));
        }
        for (k, group) in groups.iter().enumerate() {
            if let Some(p) = std::iter::once(&group.center)
                .chain(&group.points)
                .find(|p| !p.is_finite())
            {
                return Err(ShiftError::InvalidInput(format!(
                    "cluster {k} has a non-finite point {p}"
                )));
            }
        }
        if road.is_empty() {
            return Err(ShiftError::EmptyGraph(
                "road network has no nodes".to_string(),
            ));
        }

        let split;
        let road = match self.config.road_split_length {
            Some(max_length) => {
                split = road.split_long_segments(max_length)?;
                &split
            }
            None => road,
        };

        let index = PointIndex::new(&road.locations());
        let snap = |p: &GeoPoint| {
            index
                .nearest(p)
                .map(|m| NodeIndex::new(m.index))
                .ok_or_else(|| ShiftError::EmptyGraph("road network has no nodes".to_string()))
        };
        let source_node = snap(&source)?;
        let center_nodes = groups
            .iter()
            .map(|g| snap(&g.center))
            .collect::<ShiftResult<Vec<_>>>()?;

        let prefix = self.config.name_prefix.as_str();
        let road_name = |idx: NodeIndex| format!("{prefix}r:{}", road.node(idx).id);

        let primary = shortest_path_tree(road.graph(), source_node, &center_nodes, |s| {
            s.length.value()
        })
        .map_err(|unreachable| {
            let cluster = center_nodes
                .iter()
                .position(|&c| c == unreachable)
                .unwrap_or_default();
            ShiftError::InvalidInput(format!(
                "cluster {cluster} snaps to road node '{}', which is not reachable from the source road node '{}'",
                road.node(unreachable).id,
                road.node(source_node).id
            ))
        })?;

        let mut graph = DistributionGraph::new();
        graph.add_node(
            Node::new(road_name(source_node), road.node(source_node).location)
                .with_asset(AssetKind::VoltageSource),
        )?;
        for (n, &(parent, child)) in primary.iter().enumerate() {
            let from = road.node(parent);
            let to = road.node(child);
            graph.add_node(Node::new(road_name(child), to.location))?;
            let length = from.location.haversine(&to.location);
            graph.add_edge(
                &road_name(parent),
                &road_name(child),
                Edge::branch(format!("{prefix}p{n}"), Some(length)),
            )?;
        }
        debug!(
            primary_nodes = primary.len() + 1,
            "primary network routed"
        );

        let settings = MeshSettings {
            spacing: self.config.mesh_spacing,
            max_snap_distance: self.config.max_snap_distance,
            max_nodes: self.config.max_mesh_nodes,
        };
        let mut point_node_mapping = Vec::new();
        let mut transformers = Vec::with_capacity(groups.len());
        for (k, group) in groups.iter().enumerate() {
            let secondary = build_secondary(k, group, prefix, &settings)?;
            for node in &secondary.nodes {
                let mut n = Node::new(node.name.clone(), node.location);
                if node.is_load {
                    n = n.with_asset(AssetKind::Load);
                }
                graph.add_node(n)?;
            }
            for (i, (parent, child, length)) in secondary.edges.iter().enumerate() {
                graph.add_edge(
                    parent,
                    child,
                    Edge::branch(format!("{prefix}c{k}-e{i}"), Some(*length)),
                )?;
            }

            let ht = road_name(center_nodes[k]);
            let name = format!("{prefix}xfmr-{k}");
            graph.add_edge(&ht, &secondary.root, Edge::transformer(name.clone()))?;
            transformers.push(TransformerSite {
                name,
                cluster: k,
                location: road.node(center_nodes[k]).location,
                ht_node: ht,
                lt_node: secondary.root.clone(),
                load_count: secondary.loads.len(),
            });
            point_node_mapping.extend(secondary.loads);
        }

        ensure_connected_from_source(&graph)?;
        info!(
            clusters = groups.len(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            loads = point_node_mapping.len(),
            "topology built"
        );
        Ok(BuiltTopology {
            graph,
            point_node_mapping,
            transformers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shift_core::EdgeKind;

    fn street() -> RoadNetwork {
        let mut road = RoadNetwork::new();
        for i in 0..4 {
            road.add_node(format!("r{i}"), GeoPoint::new(i as f64 * 0.002, 0.0))
                .unwrap();
        }
        for i in 0..3 {
            road.add_segment(&format!("r{i}"), &format!("r{}", i + 1), None)
                .unwrap();
        }
        road
    }

    fn group_near(x: f64) -> ClusterGroup {
        let points = vec![
            GeoPoint::new(x, 0.0003),
            GeoPoint::new(x + 0.0002, 0.0003),
        ];
        ClusterGroup::new(GeoPoint::centroid(&points).unwrap(), points)
    }

    fn builder() -> TopologyBuilder {
        TopologyBuilder::new(BuilderConfig {
            road_split_length: None,
            ..BuilderConfig::default()
        })
    }

    #[test]
    fn test_primary_follows_road_to_far_cluster() {
        let built = builder()
            .build(&[group_near(0.006)], GeoPoint::new(0.0, 0.0), &street())
            .unwrap();
        let graph = &built.graph;
        assert_eq!(graph.vsource_node(), Some("r:r0"));
        for r in ["r:r0", "r:r1", "r:r2", "r:r3"] {
            assert!(graph.has_node(r), "missing {r}");
        }
        let (ht, _, edge) = graph.edge_by_name("xfmr-0").unwrap();
        assert_eq!(ht, "r:r3");
        assert_eq!(edge.kind, EdgeKind::Transformer);
        assert_eq!(built.transformers[0].load_count, 2);
    }

    #[test]
    fn test_pass_through_nodes_are_dropped() {
        let built = builder()
            .build(&[group_near(0.002)], GeoPoint::new(0.0, 0.0), &street())
            .unwrap();
        assert!(built.graph.has_node("r:r1"));
        assert!(!built.graph.has_node("r:r2"));
        assert!(!built.graph.has_node("r:r3"));
    }

    #[test]
    fn test_name_prefix_and_point_mapping() {
        let builder = TopologyBuilder::new(BuilderConfig {
            name_prefix: "f1-".to_string(),
            road_split_length: None,
            ..BuilderConfig::default()
        });
        let group = group_near(0.004);
        let built = builder
            .build(&[group.clone()], GeoPoint::new(0.0, 0.0), &street())
            .unwrap();
        assert!(built.graph.has_node("f1-r:r0"));
        assert!(built.graph.edge_by_name("f1-xfmr-0").is_some());
        for p in &group.points {
            let node = built.node_for(p).unwrap();
            assert!(built.graph.get_node(node).unwrap().has_asset(AssetKind::Load));
        }
    }

    #[test]
    fn test_road_splitting_adds_primary_nodes() {
        let split = TopologyBuilder::new(BuilderConfig {
            road_split_length: Some(Meters(100.0)),
            ..BuilderConfig::default()
        });
        let built = split
            .build(&[group_near(0.006)], GeoPoint::new(0.0, 0.0), &street())
            .unwrap();
        // each ~222 m block is cut into 3 pieces
        assert!(built.graph.has_node("r:r0~r1#1"));
        assert!(built.graph.has_node("r:r2~r3#2"));
    }

    #[test]
    fn test_default_descriptors() {
        let site = |name: &str, loads| TransformerSite {
            name: name.to_string(),
            cluster: 0,
            location: GeoPoint::new(0.0, 0.0),
            ht_node: "h".to_string(),
            lt_node: "l".to_string(),
            load_count: loads,
        };
        let descs = default_descriptors(
            &[site("a", 1), site("b", 6)],
            &TransformerDefaults::default(),
        );
        assert_eq!(descs[0].capacity, KilovoltAmperes(10.0));
        assert_eq!(descs[1].capacity, KilovoltAmperes(30.0));
        assert_eq!(descs[1].kind, TransformerType::SplitPhase);
    }

    #[test]
    fn test_rejects_empty_inputs() {
        let b = builder();
        assert!(matches!(
            b.build(&[], GeoPoint::new(0.0, 0.0), &street()),
            Err(ShiftError::InvalidInput(_))
        ));
        assert!(matches!(
            b.build(&[group_near(0.0)], GeoPoint::new(0.0, 0.0), &RoadNetwork::new()),
            Err(ShiftError::EmptyGraph(_))
        ));
    }

    #[test]
    fn test_rejects_non_finite_inputs() {
        let b = builder();
        assert!(matches!(
            b.build(&[group_near(0.002)], GeoPoint::new(f64::NAN, 0.0), &street()),
            Err(ShiftError::InvalidInput(_))
        ));
        let mut group = group_near(0.002);
        group.points.push(GeoPoint::new(0.002, f64::INFINITY));
        match b.build(&[group_near(0.004), group], GeoPoint::new(0.0, 0.0), &street()) {
            Err(ShiftError::InvalidInput(msg)) => assert!(msg.contains("cluster 1"), "{msg}"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_road_ids_do_not_clash_with_secondary_names() {
        let mut road = RoadNetwork::new();
        road.add_node("c0-g0-0", GeoPoint::new(0.0, 0.0)).unwrap();
        road.add_node("c0-d0", GeoPoint::new(0.002, 0.0)).unwrap();
        road.add_segment("c0-g0-0", "c0-d0", None).unwrap();

        let built = builder()
            .build(&[group_near(0.002)], GeoPoint::new(0.0, 0.0), &road)
            .unwrap();
        assert_eq!(built.graph.vsource_node(), Some("r:c0-g0-0"));
        assert_eq!(built.transformers[0].ht_node, "r:c0-d0");
        assert!(built.graph.has_node("c0-g0-0"));
    }
}

//! Road networks used to route the primary feeder.
//!
//! A [`RoadNetwork`] is an undirected graph of named intersections joined by
//! segments with a metric length. Where the road data comes from is left to a
//! [`RoadNetworkProvider`]; the builder asks it for the area around the
//! parcels once per build.

use std::collections::HashMap;

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use shift_core::{BoundingBox, GeoPoint, Meters, ShiftError, ShiftResult};
use tracing::debug;

/// A named road intersection or shape point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadNode {
    pub id: String,
    pub location: GeoPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoadSegment {
    pub length: Meters,
}

/// Undirected road graph with lookup by node id.
#[derive(Debug, Clone, Default)]
pub struct RoadNetwork {
    graph: UnGraph<RoadNode, RoadSegment>,
    ids: HashMap<String, NodeIndex>,
}

impl RoadNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(
        &mut self,
        id: impl Into<String>,
        location: GeoPoint,
    ) -> ShiftResult<NodeIndex> {
        let id = id.into();
        if !location.is_finite() {
            return Err(ShiftError::InvalidNodeData(format!(
                "road node '{id}' has a non-finite location {location}"
            )));
        }
        if self.ids.contains_key(&id) {
            return Err(ShiftError::NodeAlreadyExists(id));
        }
        let idx = self.graph.add_node(RoadNode {
            id: id.clone(),
            location,
        });
        self.ids.insert(id, idx);
        Ok(idx)
    }

    /// Join two existing nodes. The haversine distance is used when `length`
    /// is `None`.
    pub fn add_segment(&mut self, a: &str, b: &str, length: Option<Meters>) -> ShiftResult<()> {
        let ia = self.index_of(a)?;
        let ib = self.index_of(b)?;
        if ia == ib {
            return Err(ShiftError::InvalidEdgeData(format!(
                "road segment '{a}' -> '{b}' is a self loop"
            )));
        }
        if self.graph.find_edge(ia, ib).is_some() {
            return Err(ShiftError::EdgeAlreadyExists(format!("road segment {a} - {b}")));
        }
        let length = match length {
            Some(l) if !l.is_finite() || l.value() < 0.0 => {
                return Err(ShiftError::InvalidEdgeData(format!(
                    "road segment '{a}' -> '{b}' has invalid length {l}"
                )))
            }
            Some(l) => l,
            None => self.graph[ia].location.haversine(&self.graph[ib].location),
        };
        self.graph.add_edge(ia, ib, RoadSegment { length });
        Ok(())
    }

    pub fn index_of(&self, id: &str) -> ShiftResult<NodeIndex> {
        self.ids
            .get(id)
            .copied()
            .ok_or_else(|| ShiftError::NodeDoesNotExist(id.to_string()))
    }

    pub fn node(&self, idx: NodeIndex) -> &RoadNode {
        &self.graph[idx]
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn segment_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &RoadNode> + '_ {
        self.graph.node_weights()
    }

    /// Node locations in insertion (index) order.
    pub fn locations(&self) -> Vec<GeoPoint> {
        self.nodes().map(|n| n.location).collect()
    }

    pub fn total_length(&self) -> Meters {
        self.graph.edge_weights().map(|s| s.length).sum()
    }

    pub fn graph(&self) -> &UnGraph<RoadNode, RoadSegment> {
        &self.graph
    }

    pub fn bounds(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(&self.locations())
    }

    /// Copy of this network where no segment is longer than `max_length`.
    ///
    /// A segment of length `L` is cut into `ceil(L / max_length)` equal
    /// pieces; intermediate nodes are named `<a>~<b>#<i>` and placed by linear
    /// interpolation. Total length is preserved.
    pub fn split_long_segments(&self, max_length: Meters) -> ShiftResult<RoadNetwork> {
        if !max_length.is_finite() || max_length.value() <= 0.0 {
            return Err(ShiftError::InvalidInput(format!(
                "road split length must be positive, got {max_length}"
            )));
        }
        let mut out = RoadNetwork::new();
        for node in self.nodes() {
            out.add_node(node.id.clone(), node.location)?;
        }
        let mut inserted = 0usize;
        for edge in self.graph.edge_references() {
            let a = &self.graph[edge.source()];
            let b = &self.graph[edge.target()];
            let length = edge.weight().length;
            let pieces = (length.value() / max_length.value()).ceil().max(1.0) as usize;
            if pieces == 1 {
                out.add_segment(&a.id, &b.id, Some(length))?;
                continue;
            }
            let piece = length / pieces as f64;
            let mut previous = a.id.clone();
            for i in 1..pieces {
                let id = format!("{}~{}#{i}", a.id, b.id);
                let location = a.location.lerp(&b.location, i as f64 / pieces as f64);
                out.add_node(id.clone(), location)?;
                out.add_segment(&previous, &id, Some(piece))?;
                previous = id;
                inserted += 1;
            }
            out.add_segment(&previous, &b.id, Some(piece))?;
        }
        debug!(inserted, max_length = max_length.value(), "split long road segments");
        Ok(out)
    }
}

/// Source of road data for an area of interest.
pub trait RoadNetworkProvider {
    fn road_network(&self, bounds: &BoundingBox) -> ShiftResult<RoadNetwork>;
}

/// A provider that always hands out the same in-memory network.
impl RoadNetworkProvider for RoadNetwork {
    fn road_network(&self, _bounds: &BoundingBox) -> ShiftResult<RoadNetwork> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> RoadNetwork {
        let mut road = RoadNetwork::new();
        road.add_node("a", GeoPoint::new(0.0, 0.0)).unwrap();
        road.add_node("b", GeoPoint::new(0.001, 0.0)).unwrap();
        road.add_node("c", GeoPoint::new(0.002, 0.0)).unwrap();
        road.add_segment("a", "b", Some(Meters(400.0))).unwrap();
        road.add_segment("b", "c", Some(Meters(100.0))).unwrap();
        road
    }

    #[test]
    fn test_add_segment_validation() {
        let mut road = line();
        assert!(matches!(
            road.add_segment("a", "zz", None),
            Err(ShiftError::NodeDoesNotExist(_))
        ));
        assert!(matches!(
            road.add_segment("b", "a", None),
            Err(ShiftError::EdgeAlreadyExists(_))
        ));
        assert!(matches!(
            road.add_segment("a", "a", None),
            Err(ShiftError::InvalidEdgeData(_))
        ));
        assert!(matches!(
            road.add_node("a", GeoPoint::new(1.0, 1.0)),
            Err(ShiftError::NodeAlreadyExists(_))
        ));
    }

    #[test]
    fn test_rejects_non_finite_location() {
        let mut road = RoadNetwork::new();
        assert!(matches!(
            road.add_node("nan", GeoPoint::new(f64::NAN, 0.0)),
            Err(ShiftError::InvalidNodeData(_))
        ));
        assert!(road.is_empty());
    }

    #[test]
    fn test_default_length_is_haversine() {
        let mut road = line();
        road.add_segment("a", "c", None).unwrap();
        let expected = GeoPoint::new(0.0, 0.0).haversine(&GeoPoint::new(0.002, 0.0));
        assert!(road.total_length().approx_eq(Meters(500.0) + expected, 1e-9));
    }

    #[test]
    fn test_split_long_segments() {
        let road = line();
        let split = road.split_long_segments(Meters(150.0)).unwrap();
        // 400 m -> 3 pieces, 100 m untouched
        assert_eq!(split.node_count(), 5);
        assert_eq!(split.segment_count(), 4);
        assert!(split.total_length().approx_eq(road.total_length(), 1e-9));
        assert!(split
            .graph()
            .edge_weights()
            .all(|s| s.length.value() <= 150.0 + 1e-9));
        let mid = split.node(split.index_of("a~b#1").unwrap());
        assert!((mid.location.longitude - 0.001 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_split_rejects_non_positive_length() {
        assert!(line().split_long_segments(Meters(0.0)).is_err());
    }
}

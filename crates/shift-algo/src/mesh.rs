//! Secondary (low-voltage) networks built on a rectangular mesh.
//!
//! For one cluster a grid is laid over the members' bounding box; each
//! member becomes its own node on that grid, and the grid is then pruned to
//! the shortest paths from the node nearest the cluster centre.

use std::collections::HashSet;

use petgraph::graph::{EdgeIndex, NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use shift_core::{project_onto_segment, ClusterGroup, GeoPoint, Meters, ShiftError, ShiftResult};
use tracing::debug;

use crate::nearest::PointIndex;
use crate::paths::shortest_path_tree;

/// Projections this close to an edge end count as landing on the end node.
const ENDPOINT_EPS: f64 = 1e-9;

/// Grid and snapping parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshSettings {
    pub spacing: Meters,
    pub max_snap_distance: Meters,
    pub max_nodes: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeshNode {
    pub name: String,
    pub location: GeoPoint,
    pub is_load: bool,
}

/// A pruned secondary network for one cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryNetwork {
    /// Node nearest the cluster centre, the transformer's LT side.
    pub root: String,
    /// Root first, every other node after its parent.
    pub nodes: Vec<MeshNode>,
    /// `(parent, child, length)` oriented away from the root.
    pub edges: Vec<(String, String, Meters)>,
    /// Each member point and the node that represents it, in member order.
    pub loads: Vec<(GeoPoint, String)>,
}

struct EdgeHit {
    id: EdgeIndex,
    from: NodeIndex,
    to: NodeIndex,
    projection: GeoPoint,
    t: f64,
}

struct Mesh {
    graph: UnGraph<MeshNode, f64>,
    cluster: usize,
    prefix: String,
    extra: usize,
}

impl Mesh {
    fn grid(
        cluster: usize,
        group: &ClusterGroup,
        prefix: &str,
        settings: &MeshSettings,
    ) -> ShiftResult<Self> {
        let bounds = group.bounds().ok_or_else(|| {
            ShiftError::InvalidInput(format!("cluster {cluster} has no member points"))
        })?;
        let step = settings.spacing.to_degrees();
        if !step.is_finite() || step <= 0.0 {
            return Err(ShiftError::InvalidInput(format!(
                "mesh spacing must be positive, got {}",
                settings.spacing
            )));
        }
        let cols = ((bounds.width_deg() / step).ceil() as usize).saturating_add(1);
        let rows = ((bounds.height_deg() / step).ceil() as usize).saturating_add(1);
        match cols.checked_mul(rows) {
            Some(n) if n <= settings.max_nodes => {}
            _ => {
                return Err(ShiftError::InvalidInput(format!(
                    "cluster {cluster} needs a {cols} x {rows} mesh, above the limit of {} nodes",
                    settings.max_nodes
                )))
            }
        }

        let mut graph = UnGraph::with_capacity(cols * rows, 2 * cols * rows);
        for i in 0..cols {
            for j in 0..rows {
                let location = GeoPoint::new(
                    bounds.min.longitude + i as f64 * step,
                    bounds.min.latitude + j as f64 * step,
                );
                graph.add_node(MeshNode {
                    name: format!("{prefix}c{cluster}-g{i}-{j}"),
                    location,
                    is_load: false,
                });
            }
        }
        let at = |i: usize, j: usize| NodeIndex::new(i * rows + j);
        for i in 0..cols {
            for j in 0..rows {
                if i + 1 < cols {
                    let len = graph[at(i, j)].location.haversine(&graph[at(i + 1, j)].location);
                    graph.add_edge(at(i, j), at(i + 1, j), len.value());
                }
                if j + 1 < rows {
                    let len = graph[at(i, j)].location.haversine(&graph[at(i, j + 1)].location);
                    graph.add_edge(at(i, j), at(i, j + 1), len.value());
                }
            }
        }
        debug!(cluster, cols, rows, "laid out secondary mesh");
        Ok(Self {
            graph,
            cluster,
            prefix: prefix.to_string(),
            extra: 0,
        })
    }

    fn add_extra(&mut self, tag: char, location: GeoPoint) -> NodeIndex {
        let name = format!("{}c{}-{tag}{}", self.prefix, self.cluster, self.extra);
        self.extra += 1;
        self.graph.add_node(MeshNode {
            name,
            location,
            is_load: false,
        })
    }

    fn connect(&mut self, a: NodeIndex, b: NodeIndex) {
        let len = self.graph[a].location.haversine(&self.graph[b].location);
        self.graph.add_edge(a, b, len.value());
    }

    /// Closest edge to `p`, lowest edge index among ties.
    fn nearest_edge(&self, p: &GeoPoint) -> Option<EdgeHit> {
        let mut best: Option<(EdgeHit, f64)> = None;
        for edge in self.graph.edge_references() {
            let (u, v) = (edge.source(), edge.target());
            let (projection, t) =
                project_onto_segment(p, &self.graph[u].location, &self.graph[v].location);
            let d = projection.distance_sq_deg(p);
            if best.as_ref().map_or(true, |(_, bd)| d < *bd) {
                let hit = EdgeHit {
                    id: edge.id(),
                    from: u,
                    to: v,
                    projection,
                    t,
                };
                best = Some((hit, d));
            }
        }
        best.map(|(hit, _)| hit)
    }

    /// Give `member` its own node: an unclaimed grid node within reach, a
    /// split of the nearest edge, or a service drop off an edge end.
    fn attach(
        &mut self,
        member: &GeoPoint,
        grid: &PointIndex,
        claimed: &HashSet<NodeIndex>,
        max_snap: Meters,
    ) -> ShiftResult<NodeIndex> {
        let near = grid.nearest(member).ok_or_else(|| {
            ShiftError::EmptyGraph(format!("cluster {} mesh has no nodes", self.cluster))
        })?;
        let grid_node = NodeIndex::new(near.index);
        if !claimed.contains(&grid_node) && member.haversine(&near.point) <= max_snap {
            return Ok(grid_node);
        }

        match self.nearest_edge(member) {
            Some(hit) if hit.t > ENDPOINT_EPS && hit.t < 1.0 - ENDPOINT_EPS => {
                self.graph.remove_edge(hit.id);
                let split = self.add_extra('s', hit.projection);
                self.connect(hit.from, split);
                self.connect(split, hit.to);
                Ok(split)
            }
            Some(hit) => {
                let end = if hit.t <= ENDPOINT_EPS { hit.from } else { hit.to };
                let drop = self.add_extra('d', *member);
                self.connect(end, drop);
                Ok(drop)
            }
            None => {
                let drop = self.add_extra('d', *member);
                self.connect(grid_node, drop);
                Ok(drop)
            }
        }
    }
}

/// Build the pruned secondary network for cluster `cluster`.
pub fn build_secondary(
    cluster: usize,
    group: &ClusterGroup,
    prefix: &str,
    settings: &MeshSettings,
) -> ShiftResult<SecondaryNetwork> {
    let mut mesh = Mesh::grid(cluster, group, prefix, settings)?;
    let grid_points: Vec<GeoPoint> = mesh.graph.node_weights().map(|n| n.location).collect();
    let grid = PointIndex::new(&grid_points);

    let mut claimed: HashSet<NodeIndex> = HashSet::new();
    let mut load_nodes = Vec::with_capacity(group.len());
    for member in &group.points {
        let node = mesh.attach(member, &grid, &claimed, settings.max_snap_distance)?;
        claimed.insert(node);
        mesh.graph[node].is_load = true;
        load_nodes.push(node);
    }

    let root = grid
        .nearest(&group.center)
        .map(|m| NodeIndex::new(m.index))
        .ok_or_else(|| ShiftError::EmptyGraph(format!("cluster {cluster} mesh has no nodes")))?;
    let tree = shortest_path_tree(&mesh.graph, root, &load_nodes, |w| *w).map_err(|n| {
        ShiftError::InvalidInput(format!(
            "mesh node '{}' of cluster {cluster} is not reachable from its centre",
            mesh.graph[n].name
        ))
    })?;

    let g = &mesh.graph;
    let mut nodes = vec![g[root].clone()];
    nodes.extend(tree.iter().map(|&(_, child)| g[child].clone()));
    let edges = tree
        .iter()
        .map(|&(parent, child)| {
            let length = g
                .find_edge(parent, child)
                .map(|e| Meters(g[e]))
                .unwrap_or_else(|| g[parent].location.haversine(&g[child].location));
            (g[parent].name.clone(), g[child].name.clone(), length)
        })
        .collect();
    let loads = group
        .points
        .iter()
        .zip(&load_nodes)
        .map(|(p, &n)| (*p, g[n].name.clone()))
        .collect();

    debug!(
        cluster,
        members = group.len(),
        nodes = nodes.len(),
        "pruned secondary network"
    );
    Ok(SecondaryNetwork {
        root: g[root].name.clone(),
        nodes,
        edges,
        loads,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> MeshSettings {
        MeshSettings {
            spacing: Meters(50.0),
            max_snap_distance: Meters(30.0),
            max_nodes: 10_000,
        }
    }

    fn square_cluster() -> ClusterGroup {
        // ~100 m x 100 m, members on three corners and the middle
        let d = 100.0 / shift_core::METERS_PER_DEGREE;
        let points = vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(d, 0.0),
            GeoPoint::new(0.0, d),
            GeoPoint::new(d / 2.0, d / 2.0),
        ];
        let center = GeoPoint::centroid(&points).unwrap();
        ClusterGroup::new(center, points)
    }

    #[test]
    fn test_each_member_gets_its_own_load_node() {
        let net = build_secondary(0, &square_cluster(), "", &settings()).unwrap();
        assert_eq!(net.loads.len(), 4);
        let names: HashSet<&str> = net.loads.iter().map(|(_, n)| n.as_str()).collect();
        assert_eq!(names.len(), 4);
        let load_count = net.nodes.iter().filter(|n| n.is_load).count();
        assert_eq!(load_count, 4);
    }

    #[test]
    fn test_pruned_network_is_a_tree_rooted_at_centre() {
        let net = build_secondary(2, &square_cluster(), "x-", &settings()).unwrap();
        assert_eq!(net.nodes[0].name, net.root);
        assert_eq!(net.edges.len(), net.nodes.len() - 1);
        assert!(net.root.starts_with("x-c2-g"));

        let mut seen: HashSet<&str> = HashSet::from([net.root.as_str()]);
        for (parent, child, length) in &net.edges {
            assert!(seen.contains(parent.as_str()), "parent {parent} listed late");
            assert!(seen.insert(child.as_str()));
            assert!(length.value() >= 0.0);
        }
    }

    #[test]
    fn test_coincident_members_get_drops() {
        let p = GeoPoint::new(-97.0, 32.0);
        let group = ClusterGroup::new(p, vec![p, p, p]);
        let net = build_secondary(0, &group, "", &settings()).unwrap();
        assert_eq!(net.loads.len(), 3);
        // one grid node, two service drops hanging off it
        assert_eq!(net.nodes.len(), 3);
        assert_eq!(net.edges.len(), 2);
        assert!(net.loads[1].1.contains("-d"));
    }

    #[test]
    fn test_single_member_cluster() {
        let p = GeoPoint::new(10.0, 10.0);
        let net = build_secondary(0, &ClusterGroup::new(p, vec![p]), "", &settings()).unwrap();
        assert_eq!(net.nodes.len(), 1);
        assert!(net.edges.is_empty());
        assert_eq!(net.loads[0].1, net.root);
    }

    #[test]
    fn test_mesh_limit() {
        let limited = MeshSettings {
            max_nodes: 4,
            ..settings()
        };
        let err = build_secondary(0, &square_cluster(), "", &limited).unwrap_err();
        assert!(matches!(err, ShiftError::InvalidInput(_)));
    }
}

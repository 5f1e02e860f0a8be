use crate::error::{ShiftError, ShiftResult};
use crate::network::{AssetKind, DistributionGraph, EdgeKind};
use std::collections::{HashMap, HashSet, VecDeque};

/// Summary statistics for a synthesized feeder (size, degree distribution, components).
#[derive(Debug, Clone, PartialEq)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub branch_count: usize,
    pub transformer_count: usize,
    pub load_count: usize,
    pub connected_components: usize,
    pub min_degree: usize,
    pub avg_degree: f64,
    pub max_degree: usize,
}

/// Island summary (standard BFS component labelling).
#[derive(Debug, Clone, PartialEq)]
pub struct IslandSummary {
    pub island_id: usize,
    pub node_count: usize,
}

/// Island membership of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeAssignment {
    pub name: String,
    pub island_id: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IslandAnalysis {
    pub islands: Vec<IslandSummary>,
    pub assignments: Vec<NodeAssignment>,
}

fn adjacency(graph: &DistributionGraph) -> HashMap<&str, Vec<&str>> {
    let mut adj: HashMap<&str, Vec<&str>> = graph
        .nodes()
        .map(|n| (n.name.as_str(), Vec::new()))
        .collect();
    for (from, to, _) in graph.edges() {
        adj.entry(from).or_default().push(to);
        adj.entry(to).or_default().push(from);
    }
    adj
}

/// Size, degree and component statistics, treating edges as undirected.
pub fn graph_stats(graph: &DistributionGraph) -> GraphStats {
    let adj = adjacency(graph);
    let node_count = graph.node_count();
    let degrees: Vec<usize> = adj.values().map(Vec::len).collect();
    let min_degree = degrees.iter().copied().min().unwrap_or(0);
    let max_degree = degrees.iter().copied().max().unwrap_or(0);
    let avg_degree = if node_count == 0 {
        0.0
    } else {
        degrees.iter().sum::<usize>() as f64 / node_count as f64
    };
    let transformer_count = graph
        .edges()
        .filter(|(_, _, e)| e.kind == EdgeKind::Transformer)
        .count();

    GraphStats {
        node_count,
        edge_count: graph.edge_count(),
        branch_count: graph.edge_count() - transformer_count,
        transformer_count,
        load_count: graph.get_nodes(|n| n.has_asset(AssetKind::Load)).count(),
        connected_components: find_islands(graph).islands.len(),
        min_degree,
        avg_degree,
        max_degree,
    }
}

/// Labels connected components with a breadth-first search.
///
/// Islands are numbered in the insertion order of their first node.
pub fn find_islands(graph: &DistributionGraph) -> IslandAnalysis {
    let adj = adjacency(graph);
    let mut visited: HashSet<&str> = HashSet::new();
    let mut islands = Vec::new();
    let mut assignments = Vec::new();

    for start in graph.nodes().map(|n| n.name.as_str()) {
        if visited.contains(start) {
            continue;
        }
        let island_id = islands.len();
        let mut queue = VecDeque::from([start]);
        let mut members = 0;
        while let Some(node) = queue.pop_front() {
            if !visited.insert(node) {
                continue;
            }
            members += 1;
            assignments.push(NodeAssignment {
                name: node.to_string(),
                island_id,
            });
            for &neighbor in adj.get(node).into_iter().flatten() {
                if !visited.contains(neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
        islands.push(IslandSummary {
            island_id,
            node_count: members,
        });
    }

    IslandAnalysis {
        islands,
        assignments,
    }
}

/// Checks the two invariants a finished feeder must satisfy: a voltage
/// source exists and the DFS tree from it reaches every node.
///
/// Fails with [`ShiftError::InvalidInput`] naming (up to five of) the unreachable nodes.
pub fn ensure_connected_from_source(graph: &DistributionGraph) -> ShiftResult<()> {
    let tree = graph.get_dfs_tree(None)?;
    if tree.len() == graph.node_count() {
        return Ok(());
    }
    let unreachable: Vec<&str> = graph
        .nodes()
        .map(|n| n.name.as_str())
        .filter(|name| !tree.contains(name))
        .collect();
    let sample = unreachable
        .iter()
        .take(5)
        .copied()
        .collect::<Vec<_>>()
        .join(", ");
    Err(ShiftError::InvalidInput(format!(
        "{} of {} nodes are not reachable from the voltage source: {sample}",
        unreachable.len(),
        graph.node_count()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Edge, GeoPoint, Node};

    fn two_islands() -> DistributionGraph {
        let mut graph = DistributionGraph::new();
        let at = |x| GeoPoint::new(x, 0.0);
        graph
            .add_node(Node::new("s", at(0.0)).with_asset(AssetKind::VoltageSource))
            .unwrap();
        graph.add_node(Node::new("a", at(1.0))).unwrap();
        graph
            .add_node(Node::new("b", at(2.0)).with_asset(AssetKind::Load))
            .unwrap();
        graph.add_node(Node::new("x", at(5.0))).unwrap();
        graph.add_node(Node::new("y", at(6.0))).unwrap();
        graph.add_edge("s", "a", Edge::branch("s-a", None)).unwrap();
        graph.add_edge("a", "b", Edge::transformer("t")).unwrap();
        graph.add_edge("x", "y", Edge::branch("x-y", None)).unwrap();
        graph
    }

    #[test]
    fn test_graph_stats() {
        let stats = graph_stats(&two_islands());
        assert_eq!(stats.node_count, 5);
        assert_eq!(stats.edge_count, 3);
        assert_eq!(stats.transformer_count, 1);
        assert_eq!(stats.branch_count, 2);
        assert_eq!(stats.load_count, 1);
        assert_eq!(stats.connected_components, 2);
        assert_eq!(stats.min_degree, 1);
        assert_eq!(stats.max_degree, 2);
        assert!((stats.avg_degree - 6.0 / 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_find_islands() {
        let analysis = find_islands(&two_islands());
        assert_eq!(analysis.islands.len(), 2);
        assert_eq!(analysis.islands[0].node_count, 3);
        let y = analysis.assignments.iter().find(|a| a.name == "y").unwrap();
        assert_eq!(y.island_id, 1);
    }

    #[test]
    fn test_connectivity_check() {
        let mut graph = two_islands();
        let err = ensure_connected_from_source(&graph).unwrap_err();
        assert!(err.to_string().contains("2 of 5"));

        graph.add_edge("b", "x", Edge::branch("b-x", None)).unwrap();
        assert!(ensure_connected_from_source(&graph).is_ok());
    }
}

//! Deterministic shortest-path trees over undirected petgraph graphs.
//!
//! Used for the primary network (road graph) and for pruning each secondary
//! mesh down to the paths that actually reach a load.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;

#[derive(Clone, Copy, PartialEq)]
struct State {
    cost: f64,
    node: NodeIndex,
}

impl Eq for State {}

// Min-heap on cost, then lowest node index.
impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.index().cmp(&self.node.index()))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Union of the shortest paths from `root` to every target.
///
/// Returns `(parent, child)` pairs ordered so that every parent appears
/// before (or is) the root, i.e. in Dijkstra settle order of the child. On
/// failure returns the first target that cannot be reached.
pub fn shortest_path_tree<N, E, F>(
    graph: &UnGraph<N, E>,
    root: NodeIndex,
    targets: &[NodeIndex],
    weight: F,
) -> Result<Vec<(NodeIndex, NodeIndex)>, NodeIndex>
where
    F: Fn(&E) -> f64,
{
    let n = graph.node_count();
    let mut dist = vec![f64::INFINITY; n];
    let mut pred: Vec<Option<NodeIndex>> = vec![None; n];
    let mut settled = vec![usize::MAX; n];
    let mut heap = BinaryHeap::new();

    dist[root.index()] = 0.0;
    heap.push(State {
        cost: 0.0,
        node: root,
    });
    let mut rank = 0;
    while let Some(State { cost, node }) = heap.pop() {
        if settled[node.index()] != usize::MAX {
            continue;
        }
        settled[node.index()] = rank;
        rank += 1;

        let mut incident: Vec<_> = graph.edges(node).collect();
        incident.sort_by_key(|e| e.id().index());
        for edge in incident {
            let next = if edge.source() == node {
                edge.target()
            } else {
                edge.source()
            };
            let candidate = cost + weight(edge.weight());
            if candidate < dist[next.index()] {
                dist[next.index()] = candidate;
                pred[next.index()] = Some(node);
                heap.push(State {
                    cost: candidate,
                    node: next,
                });
            }
        }
    }

    let mut seen: HashSet<NodeIndex> = HashSet::new();
    let mut tree = Vec::new();
    for &target in targets {
        if settled[target.index()] == usize::MAX {
            return Err(target);
        }
        let mut child = target;
        while let Some(parent) = pred[child.index()] {
            if !seen.insert(child) {
                break;
            }
            tree.push((parent, child));
            child = parent;
        }
    }
    tree.sort_by_key(|(_, child)| settled[child.index()]);
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_of_paths() {
        // 0 - 1 - 2
        //     |
        //     3 - 4
        let mut g: UnGraph<(), f64> = UnGraph::new_undirected();
        let n: Vec<_> = (0..6).map(|_| g.add_node(())).collect();
        g.add_edge(n[0], n[1], 1.0);
        g.add_edge(n[1], n[2], 1.0);
        g.add_edge(n[1], n[3], 1.0);
        g.add_edge(n[3], n[4], 1.0);
        g.add_edge(n[0], n[4], 10.0);

        let tree = shortest_path_tree(&g, n[0], &[n[2], n[4]], |w| *w).unwrap();
        assert_eq!(tree.len(), 4);
        assert!(tree.contains(&(n[3], n[4])));
        assert!(!tree.iter().any(|&(p, c)| (p, c) == (n[0], n[4])));
        assert_eq!(tree[0], (n[0], n[1]));

        // node 5 is isolated
        assert_eq!(shortest_path_tree(&g, n[0], &[n[5]], |w| *w), Err(n[5]));
    }

    #[test]
    fn test_root_as_target_yields_no_edges() {
        let mut g: UnGraph<(), f64> = UnGraph::new_undirected();
        let a = g.add_node(());
        assert!(shortest_path_tree(&g, a, &[a], |w| *w).unwrap().is_empty());
    }
}

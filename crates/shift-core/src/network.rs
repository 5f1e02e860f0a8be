//! The distribution graph ADT.
//!
//! [`DistributionGraph`] stores nodes and edges by name on top of a petgraph
//! `StableDiGraph`, so indices survive removals. Storage is directed (the
//! builder orients edges away from the source) but every traversal here treats
//! the network as undirected.
//!
//! Invariants enforced on mutation:
//! - node names are unique
//! - edge names are unique, and at most one edge per ordered `(from, to)` pair
//! - at most one node carries [`AssetKind::VoltageSource`]
//!
//! ```
//! use shift_core::{AssetKind, DistributionGraph, Edge, GeoPoint, Node};
//!
//! let mut graph = DistributionGraph::new();
//! graph.add_node(Node::new("sub", GeoPoint::new(-97.33, 32.75)).with_asset(AssetKind::VoltageSource))?;
//! graph.add_node(Node::new("n1", GeoPoint::new(-97.32, 32.75)))?;
//! graph.add_edge("sub", "n1", Edge::branch("sub-n1", None))?;
//!
//! let tree = graph.get_dfs_tree(None)?;
//! assert_eq!(tree.order(), &["sub".to_string(), "n1".to_string()]);
//! # Ok::<(), shift_core::ShiftError>(())
//! ```

use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::{Direction, Graph, Undirected};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ShiftError, ShiftResult};
use crate::geometry::GeoPoint;
use crate::units::Meters;

/// Asset tags a node can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AssetKind {
    Load,
    Solar,
    Capacitor,
    VoltageSource,
}

/// Edge type tag. A transformer edge is the only place a phase or voltage
/// boundary may occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    Branch,
    Transformer,
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeKind::Branch => write!(f, "branch"),
            EdgeKind::Transformer => write!(f, "transformer"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub location: GeoPoint,
    #[serde(default)]
    pub assets: BTreeSet<AssetKind>,
}

impl Node {
    pub fn new(name: impl Into<String>, location: GeoPoint) -> Self {
        Self {
            name: name.into(),
            location,
            assets: BTreeSet::new(),
        }
    }

    pub fn with_asset(mut self, asset: AssetKind) -> Self {
        self.assets.insert(asset);
        self
    }

    #[inline]
    pub fn has_asset(&self, asset: AssetKind) -> bool {
        self.assets.contains(&asset)
    }

    #[inline]
    pub fn is_vsource(&self) -> bool {
        self.has_asset(AssetKind::VoltageSource)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub name: String,
    pub kind: EdgeKind,
    /// Geographic length, when known
    pub length: Option<Meters>,
}

impl Edge {
    pub fn branch(name: impl Into<String>, length: Option<Meters>) -> Self {
        Self {
            name: name.into(),
            kind: EdgeKind::Branch,
            length,
        }
    }

    pub fn transformer(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EdgeKind::Transformer,
            length: None,
        }
    }

    #[inline]
    pub fn is_transformer(&self) -> bool {
        self.kind == EdgeKind::Transformer
    }
}

/// Directed, attributed distribution network keyed by node and edge names.
///
/// Not safe for concurrent mutation; shared `&` access for traversal is fine
/// once construction is finished.
#[derive(Debug, Clone, Default)]
pub struct DistributionGraph {
    graph: StableDiGraph<Node, Edge>,
    nodes_by_name: HashMap<String, NodeIndex>,
    edges_by_name: HashMap<String, EdgeIndex>,
    vsource: Option<NodeIndex>,
    revision: u64,
}

impl DistributionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Mutation counter, bumped by every successful structural change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Name of the voltage source node, if one has been added.
    pub fn vsource_node(&self) -> Option<&str> {
        self.vsource.map(|idx| self.graph[idx].name.as_str())
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.nodes_by_name.contains_key(name)
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.edge_index(from, to).is_some()
    }

    /// Add a node.
    ///
    /// # Errors
    /// - [`ShiftError::InvalidNodeData`] for an empty name or non-finite location
    /// - [`ShiftError::NodeAlreadyExists`] if the name is taken
    /// - [`ShiftError::VsourceNodeAlreadyExists`] for a second voltage source
    pub fn add_node(&mut self, node: Node) -> ShiftResult<()> {
        if node.name.is_empty() {
            return Err(ShiftError::InvalidNodeData("node name is empty".into()));
        }
        if !node.location.is_finite() {
            return Err(ShiftError::InvalidNodeData(format!(
                "node '{}' has a non-finite location",
                node.name
            )));
        }
        if self.nodes_by_name.contains_key(&node.name) {
            return Err(ShiftError::NodeAlreadyExists(node.name));
        }
        if node.is_vsource() {
            if let Some(existing) = self.vsource_node() {
                return Err(ShiftError::VsourceNodeAlreadyExists {
                    existing: existing.to_string(),
                    rejected: node.name,
                });
            }
        }

        let name = node.name.clone();
        let is_vsource = node.is_vsource();
        let idx = self.graph.add_node(node);
        self.nodes_by_name.insert(name, idx);
        if is_vsource {
            self.vsource = Some(idx);
        }
        self.revision += 1;
        Ok(())
    }

    /// Add several nodes, stopping at the first failure.
    pub fn add_nodes(&mut self, nodes: impl IntoIterator<Item = Node>) -> ShiftResult<()> {
        for node in nodes {
            self.add_node(node)?;
        }
        Ok(())
    }

    /// Tag an existing node with an extra asset.
    pub fn add_asset(&mut self, name: &str, asset: AssetKind) -> ShiftResult<()> {
        let idx = self.node_idx(name)?;
        if asset == AssetKind::VoltageSource {
            if let Some(existing) = self.vsource.filter(|v| *v != idx) {
                return Err(ShiftError::VsourceNodeAlreadyExists {
                    existing: self.graph[existing].name.clone(),
                    rejected: name.to_string(),
                });
            }
            self.vsource = Some(idx);
        }
        if self.graph[idx].assets.insert(asset) {
            self.revision += 1;
        }
        Ok(())
    }

    /// Add an edge between two existing nodes.
    ///
    /// # Errors
    /// - [`ShiftError::NodeDoesNotExist`] if either endpoint is missing
    /// - [`ShiftError::EdgeAlreadyExists`] for a duplicate name or `(from, to)` pair
    /// - [`ShiftError::InvalidEdgeData`] for an empty name, a self loop or a bad length
    pub fn add_edge(&mut self, from: &str, to: &str, edge: Edge) -> ShiftResult<()> {
        let a = self.node_idx(from)?;
        let b = self.node_idx(to)?;
        if edge.name.is_empty() {
            return Err(ShiftError::InvalidEdgeData(format!(
                "edge between '{from}' and '{to}' has an empty name"
            )));
        }
        if a == b {
            return Err(ShiftError::InvalidEdgeData(format!(
                "edge '{}' is a self loop on '{from}'",
                edge.name
            )));
        }
        if let Some(length) = edge.length {
            if !length.is_finite() || length.value() < 0.0 {
                return Err(ShiftError::InvalidEdgeData(format!(
                    "edge '{}' has invalid length {length}",
                    edge.name
                )));
            }
        }
        if self.edges_by_name.contains_key(&edge.name) {
            return Err(ShiftError::EdgeAlreadyExists(format!(
                "an edge named '{}' is already present",
                edge.name
            )));
        }
        if self.graph.find_edge(a, b).is_some() {
            return Err(ShiftError::EdgeAlreadyExists(format!(
                "'{from}' -> '{to}' is already connected"
            )));
        }

        let name = edge.name.clone();
        let idx = self.graph.add_edge(a, b, edge);
        self.edges_by_name.insert(name, idx);
        self.revision += 1;
        Ok(())
    }

    pub fn get_node(&self, name: &str) -> ShiftResult<&Node> {
        let idx = self.node_idx(name)?;
        Ok(&self.graph[idx])
    }

    /// Edge stored with exactly this orientation.
    pub fn get_edge(&self, from: &str, to: &str) -> ShiftResult<&Edge> {
        self.edge_index(from, to)
            .map(|e| &self.graph[e])
            .ok_or_else(|| ShiftError::EdgeDoesNotExist {
                from: from.to_string(),
                to: to.to_string(),
            })
    }

    /// Edge connecting `a` and `b` in either orientation, with its stored endpoints.
    pub fn find_edge_between(&self, a: &str, b: &str) -> Option<(&str, &str, &Edge)> {
        self.edge_index(a, b)
            .or_else(|| self.edge_index(b, a))
            .and_then(|e| self.edge_view(e))
    }

    /// Look an edge up by name.
    pub fn edge_by_name(&self, name: &str) -> Option<(&str, &str, &Edge)> {
        self.edges_by_name
            .get(name)
            .and_then(|e| self.edge_view(*e))
    }

    /// Every node, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.graph.node_indices().map(move |idx| &self.graph[idx])
    }

    /// Nodes matching `filter`, in insertion order. Call again to restart.
    pub fn get_nodes<'a, F>(&'a self, filter: F) -> impl Iterator<Item = &'a Node> + 'a
    where
        F: Fn(&Node) -> bool + 'a,
    {
        self.nodes().filter(move |node| filter(node))
    }

    /// Every edge as `(from, to, edge)`, in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str, &Edge)> + '_ {
        self.graph
            .edge_indices()
            .filter_map(move |idx| self.edge_view(idx))
    }

    /// Edges matching `filter`, in insertion order.
    pub fn get_edges<'a, F>(
        &'a self,
        filter: F,
    ) -> impl Iterator<Item = (&'a str, &'a str, &'a Edge)> + 'a
    where
        F: Fn(&Edge) -> bool + 'a,
    {
        self.edges().filter(move |(_, _, edge)| filter(edge))
    }

    pub fn transformer_edges(&self) -> impl Iterator<Item = (&str, &str, &Edge)> + '_ {
        self.get_edges(Edge::is_transformer)
    }

    /// Remove a node **and every edge incident to it**.
    ///
    /// The removed edges are returned so callers can see exactly what the
    /// cascade took with it. Removing the voltage source clears the marker.
    pub fn remove_node(&mut self, name: &str) -> ShiftResult<(Node, Vec<Edge>)> {
        let idx = self.node_idx(name)?;
        let incident: Vec<EdgeIndex> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .chain(self.graph.edges_directed(idx, Direction::Incoming))
            .map(|e| e.id())
            .collect();

        let mut removed = Vec::with_capacity(incident.len());
        for e in incident {
            if let Some(edge) = self.graph.remove_edge(e) {
                self.edges_by_name.remove(&edge.name);
                removed.push(edge);
            }
        }
        let node = self
            .graph
            .remove_node(idx)
            .ok_or_else(|| ShiftError::NodeDoesNotExist(name.to_string()))?;
        self.nodes_by_name.remove(name);
        if self.vsource == Some(idx) {
            self.vsource = None;
        }
        if !removed.is_empty() {
            debug!(node = name, edges = removed.len(), "cascade-removed incident edges");
        }
        self.revision += 1;
        Ok((node, removed))
    }

    pub fn remove_edge(&mut self, from: &str, to: &str) -> ShiftResult<Edge> {
        let idx = self
            .edge_index(from, to)
            .ok_or_else(|| ShiftError::EdgeDoesNotExist {
                from: from.to_string(),
                to: to.to_string(),
            })?;
        let edge = self
            .graph
            .remove_edge(idx)
            .ok_or_else(|| ShiftError::EdgeDoesNotExist {
                from: from.to_string(),
                to: to.to_string(),
            })?;
        self.edges_by_name.remove(&edge.name);
        self.revision += 1;
        Ok(edge)
    }

    /// Swap the data on an existing `(from, to)` edge, e.g. to substitute a
    /// branch type before mapping. Returns the previous edge.
    pub fn replace_edge(&mut self, from: &str, to: &str, edge: Edge) -> ShiftResult<Edge> {
        let idx = self
            .edge_index(from, to)
            .ok_or_else(|| ShiftError::EdgeDoesNotExist {
                from: from.to_string(),
                to: to.to_string(),
            })?;
        if self.graph[idx].name != edge.name {
            if self.edges_by_name.contains_key(&edge.name) {
                return Err(ShiftError::EdgeAlreadyExists(format!(
                    "an edge named '{}' is already present",
                    edge.name
                )));
            }
            self.edges_by_name.remove(&self.graph[idx].name);
            self.edges_by_name.insert(edge.name.clone(), idx);
        }
        let old = std::mem::replace(&mut self.graph[idx], edge);
        self.revision += 1;
        Ok(old)
    }

    /// An independent undirected copy of the current nodes and edges.
    pub fn get_undirected_graph(&self) -> UndirectedNetwork {
        let mut graph: Graph<Node, Edge, Undirected> =
            Graph::with_capacity(self.node_count(), self.edge_count());
        let mut index = HashMap::with_capacity(self.node_count());
        for node in self.nodes() {
            let idx = graph.add_node(node.clone());
            index.insert(node.name.clone(), idx);
        }
        for (from, to, edge) in self.edges() {
            graph.add_edge(index[from], index[to], edge.clone());
        }
        UndirectedNetwork { graph, index }
    }

    /// Depth-first spanning tree, pre-order.
    ///
    /// Starts at `root` when given, otherwise at the voltage source node.
    /// Edges are followed in both orientations; neighbours are explored in
    /// edge insertion order, so the visit order is deterministic.
    ///
    /// # Errors
    /// - [`ShiftError::VsourceNodeDoesNotExist`] when no root is given and no source exists
    /// - [`ShiftError::NodeDoesNotExist`] for an unknown explicit root
    pub fn get_dfs_tree(&self, root: Option<&str>) -> ShiftResult<DfsTree> {
        let root_idx = match root {
            Some(name) => self.node_idx(name)?,
            None => self.vsource.ok_or(ShiftError::VsourceNodeDoesNotExist)?,
        };

        struct Frame {
            node: NodeIndex,
            incident: Vec<(EdgeIndex, NodeIndex)>,
            pos: usize,
        }

        let root_name = self.graph[root_idx].name.clone();
        let mut tree = DfsTree::new(root_name);
        let mut visited: HashSet<NodeIndex> = HashSet::from([root_idx]);
        let mut stack = vec![Frame {
            node: root_idx,
            incident: self.incident_edges(root_idx),
            pos: 0,
        }];

        loop {
            let step = match stack.last_mut() {
                None => break,
                Some(frame) if frame.pos < frame.incident.len() => {
                    let next = frame.incident[frame.pos];
                    frame.pos += 1;
                    Some((frame.node, next))
                }
                Some(_) => None,
            };
            match step {
                Some((parent, (edge, child))) => {
                    if !visited.insert(child) {
                        continue;
                    }
                    let edge = &self.graph[edge];
                    tree.push(
                        &self.graph[parent].name,
                        &self.graph[child].name,
                        &edge.name,
                        edge.kind,
                    );
                    stack.push(Frame {
                        node: child,
                        incident: self.incident_edges(child),
                        pos: 0,
                    });
                }
                None => {
                    stack.pop();
                }
            }
        }
        Ok(tree)
    }

    fn node_idx(&self, name: &str) -> ShiftResult<NodeIndex> {
        self.nodes_by_name
            .get(name)
            .copied()
            .ok_or_else(|| ShiftError::NodeDoesNotExist(name.to_string()))
    }

    fn edge_index(&self, from: &str, to: &str) -> Option<EdgeIndex> {
        let a = self.nodes_by_name.get(from)?;
        let b = self.nodes_by_name.get(to)?;
        self.graph.find_edge(*a, *b)
    }

    fn edge_view(&self, idx: EdgeIndex) -> Option<(&str, &str, &Edge)> {
        let (a, b) = self.graph.edge_endpoints(idx)?;
        Some((
            self.graph[a].name.as_str(),
            self.graph[b].name.as_str(),
            &self.graph[idx],
        ))
    }

    /// Incident edges in both orientations, sorted by insertion order.
    fn incident_edges(&self, node: NodeIndex) -> Vec<(EdgeIndex, NodeIndex)> {
        let mut incident: Vec<(EdgeIndex, NodeIndex)> = self
            .graph
            .edges_directed(node, Direction::Outgoing)
            .map(|e| (e.id(), e.target()))
            .chain(
                self.graph
                    .edges_directed(node, Direction::Incoming)
                    .map(|e| (e.id(), e.source())),
            )
            .collect();
        incident.sort_by_key(|(e, _)| e.index());
        incident
    }
}

/// Edge of a [`DfsTree`], stored on the child.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeEdge {
    pub parent: String,
    pub edge: String,
    pub kind: EdgeKind,
}

/// Result of [`DistributionGraph::get_dfs_tree`].
#[derive(Debug, Clone, PartialEq)]
pub struct DfsTree {
    root: String,
    order: Vec<String>,
    parents: HashMap<String, TreeEdge>,
    children: HashMap<String, Vec<String>>,
}

impl DfsTree {
    fn new(root: String) -> Self {
        Self {
            order: vec![root.clone()],
            root,
            parents: HashMap::new(),
            children: HashMap::new(),
        }
    }

    fn push(&mut self, parent: &str, child: &str, edge: &str, kind: EdgeKind) {
        self.order.push(child.to_string());
        self.parents.insert(
            child.to_string(),
            TreeEdge {
                parent: parent.to_string(),
                edge: edge.to_string(),
                kind,
            },
        );
        self.children
            .entry(parent.to_string())
            .or_default()
            .push(child.to_string());
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Visited node names in pre-order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        name == self.root || self.parents.contains_key(name)
    }

    pub fn parent(&self, name: &str) -> Option<&str> {
        self.parents.get(name).map(|e| e.parent.as_str())
    }

    /// The tree edge that reached `name`. `None` for the root.
    pub fn parent_edge(&self, name: &str) -> Option<&TreeEdge> {
        self.parents.get(name)
    }

    pub fn children(&self, name: &str) -> &[String] {
        self.children.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// True when the tree walks `parent -> child` directly.
    pub fn has_tree_edge(&self, parent: &str, child: &str) -> bool {
        self.parent(child) == Some(parent)
    }

    /// Tree edges as `(parent, child, edge)` in pre-order of the child.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str, &TreeEdge)> + '_ {
        self.order[1..].iter().filter_map(move |child| {
            self.parents
                .get(child)
                .map(|e| (e.parent.as_str(), child.as_str(), e))
        })
    }

    /// Every node below `name`, pre-order, `name` excluded.
    pub fn descendants(&self, name: &str) -> Vec<&str> {
        self.descendants_until(name, |_| false)
    }

    /// Like [`DfsTree::descendants`], but does not descend through a tree
    /// edge for which `stop` returns true (the child of that edge is excluded too).
    pub fn descendants_until<F>(&self, name: &str, stop: F) -> Vec<&str>
    where
        F: Fn(&TreeEdge) -> bool,
    {
        let mut out = Vec::new();
        let mut stack: Vec<&str> = self.children(name).iter().rev().map(String::as_str).collect();
        while let Some(node) = stack.pop() {
            if self.parents.get(node).is_some_and(&stop) {
                continue;
            }
            out.push(node);
            stack.extend(self.children(node).iter().rev().map(String::as_str));
        }
        out
    }

    /// Path from the root down to `name`, inclusive. Empty when not in the tree.
    pub fn path_from_root<'a>(&'a self, name: &'a str) -> Vec<&'a str> {
        if !self.contains(name) {
            return Vec::new();
        }
        let mut path = vec![name];
        let mut current = name;
        while let Some(parent) = self.parent(current) {
            path.push(parent);
            current = parent;
        }
        path.reverse();
        path
    }
}

/// Undirected, independent copy of a [`DistributionGraph`].
#[derive(Debug, Clone)]
pub struct UndirectedNetwork {
    graph: Graph<Node, Edge, Undirected>,
    index: HashMap<String, petgraph::graph::NodeIndex>,
}

impl UndirectedNetwork {
    pub fn graph(&self) -> &Graph<Node, Edge, Undirected> {
        &self.graph
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.index.get(name).map(|idx| &self.graph[*idx])
    }

    /// Edge joining `a` and `b`, regardless of the original orientation.
    pub fn edge(&self, a: &str, b: &str) -> Option<&Edge> {
        let (a, b) = (self.index.get(a)?, self.index.get(b)?);
        self.graph.find_edge(*a, *b).map(|e| &self.graph[e])
    }

    /// Neighbour names, sorted.
    pub fn neighbors(&self, name: &str) -> Vec<&str> {
        let Some(idx) = self.index.get(name) else {
            return Vec::new();
        };
        let mut out: Vec<&str> = self
            .graph
            .neighbors(*idx)
            .map(|n| self.graph[n].name.as_str())
            .collect();
        out.sort_unstable();
        out
    }

    fn signature(&self) -> (Vec<&Node>, Vec<(&str, &str, &Edge)>) {
        let mut nodes: Vec<&Node> = self.graph.node_weights().collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        let mut edges: Vec<(&str, &str, &Edge)> = self
            .graph
            .edge_indices()
            .filter_map(|e| {
                let (a, b) = self.graph.edge_endpoints(e)?;
                let (a, b) = (self.graph[a].name.as_str(), self.graph[b].name.as_str());
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                Some((lo, hi, &self.graph[e]))
            })
            .collect();
        edges.sort_by(|x, y| (x.0, x.1, &x.2.name).cmp(&(y.0, y.1, &y.2.name)));
        (nodes, edges)
    }
}

impl PartialEq for UndirectedNetwork {
    fn eq(&self, other: &Self) -> bool {
        self.signature() == other.signature()
    }
}

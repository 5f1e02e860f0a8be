//! Phase assignment.
//!
//! Transformers are grouped by [`TransformerType`] and each group is spread
//! over the primary phase buckets its type allows, balancing rated capacity.
//! The secondary phases of every transformer are then pushed down the DFS
//! tree to the nodes it serves, stopping at the next transformer.
//!
//! | Type | Primary buckets | Secondary |
//! |------|-----------------|-----------|
//! | `THREE_PHASE` | {A,B,C} | {A,B,C} |
//! | `SINGLE_PHASE` | {A} {B} {C} | primary bucket |
//! | `SPLIT_PHASE` | {A} {B} {C} | {S1,S2,N} |
//! | `SINGLE_PHASE_PRIMARY_DELTA` | {A,B} {B,C} {C,A} | primary bucket |
//! | `SPLIT_PHASE_PRIMARY_DELTA` | {A,B} {B,C} {C,A} | {S1,S2,N} |

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use shift_core::{
    AssetKind, DistributionGraph, EdgeKind, GeoPoint, KilovoltAmperes, ShiftError, ShiftResult,
};
use tracing::{debug, info};

use crate::cluster::{kmeans_labels, KMeansConfig};

/// A conductor phase. `S1`/`S2` are the hot legs of a split-phase secondary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    A,
    B,
    C,
    N,
    S1,
    S2,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::A => "A",
            Phase::B => "B",
            Phase::C => "C",
            Phase::N => "N",
            Phase::S1 => "S1",
            Phase::S2 => "S2",
        };
        f.write_str(s)
    }
}

/// A non-empty set of phases.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "BTreeSet<Phase>", into = "BTreeSet<Phase>")]
pub struct PhaseSet(BTreeSet<Phase>);

impl PhaseSet {
    pub fn new(phases: impl IntoIterator<Item = Phase>) -> ShiftResult<Self> {
        let set: BTreeSet<Phase> = phases.into_iter().collect();
        if set.is_empty() {
            return Err(ShiftError::AllocationMapping(
                "a phase set needs at least one phase".to_string(),
            ));
        }
        Ok(Self(set))
    }

    fn of(phases: &[Phase]) -> Self {
        Self(phases.iter().copied().collect())
    }

    pub fn three_phase() -> Self {
        Self::of(&[Phase::A, Phase::B, Phase::C])
    }

    pub fn split_phase() -> Self {
        Self::of(&[Phase::S1, Phase::S2, Phase::N])
    }

    pub fn contains(&self, phase: Phase) -> bool {
        self.0.contains(&phase)
    }

    pub fn is_subset(&self, other: &PhaseSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn union(&self, other: &PhaseSet) -> PhaseSet {
        Self(self.0.union(&other.0).copied().collect())
    }

    /// Number of energised conductors (neutral excluded).
    pub fn phase_count(&self) -> usize {
        self.0.iter().filter(|p| **p != Phase::N).count()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Phase> + '_ {
        self.0.iter().copied()
    }
}

impl TryFrom<BTreeSet<Phase>> for PhaseSet {
    type Error = ShiftError;

    fn try_from(set: BTreeSet<Phase>) -> ShiftResult<Self> {
        PhaseSet::new(set)
    }
}

impl From<PhaseSet> for BTreeSet<Phase> {
    fn from(set: PhaseSet) -> Self {
        set.0
    }
}

impl fmt::Display for PhaseSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.0.iter().map(Phase::to_string).collect();
        write!(f, "{{{}}}", names.join(","))
    }
}

/// Transformer connection kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransformerType {
    ThreePhase,
    SinglePhase,
    SplitPhase,
    SinglePhasePrimaryDelta,
    SplitPhasePrimaryDelta,
}

impl TransformerType {
    /// Phase buckets the primary winding may be connected to.
    pub fn primary_buckets(self) -> Vec<PhaseSet> {
        use Phase::*;
        match self {
            TransformerType::ThreePhase => vec![PhaseSet::three_phase()],
            TransformerType::SinglePhase | TransformerType::SplitPhase => {
                vec![PhaseSet::of(&[A]), PhaseSet::of(&[B]), PhaseSet::of(&[C])]
            }
            TransformerType::SinglePhasePrimaryDelta | TransformerType::SplitPhasePrimaryDelta => {
                vec![
                    PhaseSet::of(&[A, B]),
                    PhaseSet::of(&[B, C]),
                    PhaseSet::of(&[C, A]),
                ]
            }
        }
    }

    /// Phases available on the secondary side given the primary bucket.
    pub fn secondary_phases(self, primary: &PhaseSet) -> PhaseSet {
        match self {
            TransformerType::ThreePhase => PhaseSet::three_phase(),
            TransformerType::SinglePhase | TransformerType::SinglePhasePrimaryDelta => {
                primary.clone()
            }
            TransformerType::SplitPhase | TransformerType::SplitPhasePrimaryDelta => {
                PhaseSet::split_phase()
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransformerType::ThreePhase => "THREE_PHASE",
            TransformerType::SinglePhase => "SINGLE_PHASE",
            TransformerType::SplitPhase => "SPLIT_PHASE",
            TransformerType::SinglePhasePrimaryDelta => "SINGLE_PHASE_PRIMARY_DELTA",
            TransformerType::SplitPhasePrimaryDelta => "SPLIT_PHASE_PRIMARY_DELTA",
        }
    }
}

impl fmt::Display for TransformerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransformerType {
    type Err = ShiftError;

    /// Accepts `THREE_PHASE`, `three-phase`, `three_phase` and so on.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "THREE_PHASE" => Ok(TransformerType::ThreePhase),
            "SINGLE_PHASE" => Ok(TransformerType::SinglePhase),
            "SPLIT_PHASE" => Ok(TransformerType::SplitPhase),
            "SINGLE_PHASE_PRIMARY_DELTA" => Ok(TransformerType::SinglePhasePrimaryDelta),
            "SPLIT_PHASE_PRIMARY_DELTA" => Ok(TransformerType::SplitPhasePrimaryDelta),
            _ => Err(ShiftError::UnsupportedTransformerType(s.to_string())),
        }
    }
}

/// What phase balancing needs to know about one transformer edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformerDescriptor {
    /// Name of the Transformer edge in the graph.
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TransformerType,
    #[serde(rename = "capacity_kva")]
    pub capacity: KilovoltAmperes,
    pub location: GeoPoint,
}

impl TransformerDescriptor {
    pub fn new(
        name: impl Into<String>,
        kind: TransformerType,
        capacity: KilovoltAmperes,
        location: GeoPoint,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            capacity,
            location,
        }
    }
}

/// How transformers are spread over phase buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalancingMethod {
    /// Largest first onto the least-loaded bucket.
    #[default]
    Greedy,
    /// Cluster transformers spatially, then balance the clusters.
    #[serde(alias = "kmeans")]
    Agglomerative,
}

impl FromStr for BalancingMethod {
    type Err = ShiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "greedy" => Ok(BalancingMethod::Greedy),
            "agglomerative" | "kmeans" => Ok(BalancingMethod::Agglomerative),
            _ => Err(ShiftError::InvalidPhaseAllocationMethod(s.to_string())),
        }
    }
}

/// Balancing method plus the seed used by the agglomerative variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseConfig {
    pub method: BalancingMethod,
    pub seed: Option<u64>,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            method: BalancingMethod::Greedy,
            seed: Some(0),
        }
    }
}

impl From<BalancingMethod> for PhaseConfig {
    fn from(method: BalancingMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }
}

/// Result of [`assign_phases`]. All maps are keyed by graph names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseAssignment {
    /// Primary bucket chosen for each transformer edge.
    pub transformer_phases: HashMap<String, PhaseSet>,
    /// Secondary-side nodes and their phases.
    pub node_phases: HashMap<String, PhaseSet>,
    /// Phases of each tagged asset on a secondary-side node.
    pub asset_phases: HashMap<String, BTreeMap<AssetKind, PhaseSet>>,
    /// Primary-side nodes and the phases the transformers below them need.
    pub upstream_phase_requirements: HashMap<String, PhaseSet>,
}

impl PhaseAssignment {
    /// Phases present at a node, whichever side of the transformers it is on.
    pub fn phases_at(&self, node: &str) -> Option<&PhaseSet> {
        self.node_phases
            .get(node)
            .or_else(|| self.upstream_phase_requirements.get(node))
    }

    /// Override the phases of one asset. The asset must be served by its
    /// node's phases.
    pub fn set_asset_phases(
        &mut self,
        node: &str,
        asset: AssetKind,
        phases: PhaseSet,
    ) -> ShiftResult<()> {
        let node_phases = self.node_phases.get(node).ok_or_else(|| {
            ShiftError::AllocationMapping(format!("node '{node}' has no phase assignment"))
        })?;
        if !phases.is_subset(node_phases) {
            return Err(ShiftError::AllocationMapping(format!(
                "{asset:?} on '{node}' uses {phases} but the node only carries {node_phases}"
            )));
        }
        self.asset_phases
            .entry(node.to_string())
            .or_default()
            .insert(asset, phases);
        Ok(())
    }

    /// Rated capacity connected to each primary bucket.
    pub fn bucket_totals(
        &self,
        descriptors: &[TransformerDescriptor],
    ) -> BTreeMap<PhaseSet, KilovoltAmperes> {
        let mut totals: BTreeMap<PhaseSet, KilovoltAmperes> = BTreeMap::new();
        for d in descriptors {
            if let Some(bucket) = self.transformer_phases.get(&d.name) {
                *totals.entry(bucket.clone()).or_default() += d.capacity;
            }
        }
        totals
    }
}

/// Assign primary buckets to every transformer and propagate phases to the
/// nodes each one serves.
pub fn assign_phases(
    graph: &DistributionGraph,
    descriptors: &[TransformerDescriptor],
    config: impl Into<PhaseConfig>,
) -> ShiftResult<PhaseAssignment> {
    let config = config.into();
    check_descriptors(graph, descriptors)?;

    let mut by_kind: BTreeMap<TransformerType, Vec<&TransformerDescriptor>> = BTreeMap::new();
    for d in descriptors {
        by_kind.entry(d.kind).or_default().push(d);
    }

    let mut assignment = PhaseAssignment::default();
    for (kind, group) in &by_kind {
        let buckets = kind.primary_buckets();
        let slots = match config.method {
            BalancingMethod::Greedy => greedy_allocation(group, buckets.len()),
            BalancingMethod::Agglomerative => {
                agglomerative_allocation(group, buckets.len(), config.seed)?
            }
        };
        for (d, slot) in group.iter().zip(slots) {
            assignment
                .transformer_phases
                .insert(d.name.clone(), buckets[slot].clone());
        }
        debug!(kind = %kind, transformers = group.len(), "allocated phase buckets");
    }

    propagate(graph, descriptors, &mut assignment)?;

    info!(
        transformers = descriptors.len(),
        secondary_nodes = assignment.node_phases.len(),
        primary_nodes = assignment.upstream_phase_requirements.len(),
        method = ?config.method,
        "phase assignment complete"
    );
    Ok(assignment)
}

fn check_descriptors(
    graph: &DistributionGraph,
    descriptors: &[TransformerDescriptor],
) -> ShiftResult<()> {
    let edges: HashSet<&str> = graph
        .transformer_edges()
        .map(|(_, _, e)| e.name.as_str())
        .collect();
    let mut named: HashSet<&str> = HashSet::new();
    for d in descriptors {
        if !named.insert(d.name.as_str()) {
            return Err(ShiftError::AllocationMapping(format!(
                "transformer '{}' is described more than once",
                d.name
            )));
        }
        if !edges.contains(d.name.as_str()) {
            return Err(ShiftError::MissingTransformerMapping(format!(
                "descriptor '{}' does not match a transformer edge in the graph",
                d.name
            )));
        }
        if !d.capacity.is_finite() || d.capacity.value() <= 0.0 {
            return Err(ShiftError::InvalidInput(format!(
                "transformer '{}' has non-positive capacity {}",
                d.name, d.capacity
            )));
        }
    }
    if let Some((_, _, missing)) = graph
        .transformer_edges()
        .find(|(_, _, e)| !named.contains(e.name.as_str()))
    {
        return Err(ShiftError::MissingTransformerMapping(format!(
            "no descriptor for transformer edge '{}'",
            missing.name
        )));
    }
    Ok(())
}

/// Largest capacity first (ties by name) onto the bucket with the smallest
/// running total (ties to the first bucket). Returns a slot per item.
fn greedy_allocation(group: &[&TransformerDescriptor], buckets: usize) -> Vec<usize> {
    let weighted: Vec<(f64, &str)> = group
        .iter()
        .map(|d| (d.capacity.value(), d.name.as_str()))
        .collect();
    balance(&weighted, buckets)
}

fn balance(items: &[(f64, &str)], buckets: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| {
        items[b]
            .0
            .total_cmp(&items[a].0)
            .then_with(|| items[a].1.cmp(items[b].1))
    });
    let mut totals = vec![0.0; buckets];
    let mut slots = vec![0; items.len()];
    for i in order {
        let mut best = 0;
        for b in 1..buckets {
            if totals[b] < totals[best] {
                best = b;
            }
        }
        totals[best] += items[i].0;
        slots[i] = best;
    }
    slots
}

/// Cluster transformer locations into one group per bucket, then balance the
/// groups' aggregate capacity.
fn agglomerative_allocation(
    group: &[&TransformerDescriptor],
    buckets: usize,
    seed: Option<u64>,
) -> ShiftResult<Vec<usize>> {
    if buckets == 1 || group.is_empty() {
        return Ok(vec![0; group.len()]);
    }
    let locations: Vec<GeoPoint> = group.iter().map(|d| d.location).collect();
    let config = KMeansConfig {
        seed,
        ..KMeansConfig::new(buckets.min(group.len()))
    };
    let clustering = kmeans_labels(&locations, &config)?;

    let mut aggregate = vec![0.0; clustering.centers.len()];
    for (d, &label) in group.iter().zip(&clustering.labels) {
        aggregate[label] += d.capacity.value();
    }
    let keys: Vec<String> = (0..aggregate.len()).map(|c| format!("{c:04}")).collect();
    let weighted: Vec<(f64, &str)> = aggregate
        .iter()
        .zip(&keys)
        .map(|(w, k)| (*w, k.as_str()))
        .collect();
    let cluster_slots = balance(&weighted, buckets);
    Ok(clustering
        .labels
        .iter()
        .map(|&label| cluster_slots[label])
        .collect())
}

fn propagate(
    graph: &DistributionGraph,
    descriptors: &[TransformerDescriptor],
    assignment: &mut PhaseAssignment,
) -> ShiftResult<()> {
    let tree = graph.get_dfs_tree(None)?;
    let kinds: HashMap<&str, TransformerType> = descriptors
        .iter()
        .map(|d| (d.name.as_str(), d.kind))
        .collect();

    let mut high_sides: Vec<(String, PhaseSet)> = Vec::new();
    for (from, to, edge) in graph.transformer_edges() {
        let (ht, lt) = if tree.has_tree_edge(from, to) {
            (from, to)
        } else if tree.has_tree_edge(to, from) {
            (to, from)
        } else {
            return Err(ShiftError::AllocationMapping(format!(
                "transformer '{}' is not on the spanning tree from the voltage source",
                edge.name
            )));
        };
        let primary = assignment
            .transformer_phases
            .get(&edge.name)
            .cloned()
            .ok_or_else(|| ShiftError::MissingTransformerMapping(edge.name.clone()))?;
        let kind = kinds
            .get(edge.name.as_str())
            .copied()
            .ok_or_else(|| ShiftError::MissingTransformerMapping(edge.name.clone()))?;
        let secondary = kind.secondary_phases(&primary);

        let served = std::iter::once(lt).chain(
            tree.descendants_until(lt, |e| e.kind == EdgeKind::Transformer),
        );
        for node in served {
            assignment
                .node_phases
                .insert(node.to_string(), secondary.clone());
        }
        high_sides.push((ht.to_string(), primary));
    }

    for (ht, primary) in &high_sides {
        for node in tree.path_from_root(ht) {
            if assignment.node_phases.contains_key(node) {
                continue;
            }
            let merged = match assignment.upstream_phase_requirements.get(node) {
                Some(existing) => existing.union(primary),
                None => primary.clone(),
            };
            assignment
                .upstream_phase_requirements
                .insert(node.to_string(), promote_two_phase(merged));
        }
    }

    for (name, phases) in &assignment.node_phases {
        let node = graph.get_node(name)?;
        if node.assets.is_empty() {
            continue;
        }
        let per_asset = node
            .assets
            .iter()
            .map(|asset| (*asset, phases.clone()))
            .collect();
        assignment.asset_phases.insert(name.clone(), per_asset);
    }
    Ok(())
}

/// A primary line carrying two of the three phases is built as three-phase.
fn promote_two_phase(phases: PhaseSet) -> PhaseSet {
    let abc = PhaseSet::three_phase();
    if phases.is_subset(&abc) && phases.len() == 2 {
        abc
    } else {
        phases
    }
}

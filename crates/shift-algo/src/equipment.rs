//! Equipment resolution against an external catalog.
//!
//! [`EquipmentMapper`] turns the phase and voltage results into one catalog
//! query per edge and per Load asset. The mapping is computed on the first
//! call to [`EquipmentMapper::mapping`] and cached until an input changes.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use shift_core::{
    AssetKind, DistributionGraph, EdgeKind, KilovoltAmperes, Kilovolts, ShiftError, ShiftResult,
};
use tracing::{debug, info};

use crate::phase::{PhaseAssignment, PhaseSet, TransformerDescriptor};
use crate::voltage::VoltageAssignment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EquipmentKind {
    Transformer,
    Conductor,
    Load,
}

/// What a piece of equipment must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentQuery {
    pub kind: EquipmentKind,
    pub voltage: Kilovolts,
    pub phases: PhaseSet,
    /// Minimum rating the record must carry.
    pub capacity_hint: KilovoltAmperes,
}

impl EquipmentQuery {
    pub fn phase_count(&self) -> usize {
        self.phases.phase_count()
    }
}

impl fmt::Display for EquipmentQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} at {} on {} ({} phase), >= {}",
            self.kind,
            self.voltage,
            self.phases,
            self.phase_count(),
            self.capacity_hint
        )
    }
}

/// A catalog entry returned for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentRecord {
    pub name: String,
    pub kind: EquipmentKind,
    #[serde(rename = "rating_kva")]
    pub rating: KilovoltAmperes,
    /// Catalog-specific data passed through untouched (impedances, codes, ...).
    #[serde(default)]
    pub attributes: serde_json::Value,
}

/// Source of equipment records.
pub trait EquipmentCatalog {
    fn find(&self, query: &EquipmentQuery) -> Option<EquipmentRecord>;
}

/// One catalog row: a record plus the conditions it applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub record: EquipmentRecord,
    #[serde(rename = "voltage_kv")]
    pub voltage: Kilovolts,
    pub phase_count: usize,
}

/// In-memory catalog answering with the smallest sufficient rating.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryCatalog {
    entries: Vec<CatalogEntry>,
}

impl InMemoryCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    pub fn push(&mut self, entry: CatalogEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl EquipmentCatalog for InMemoryCatalog {
    fn find(&self, query: &EquipmentQuery) -> Option<EquipmentRecord> {
        self.entries
            .iter()
            .filter(|e| {
                e.record.kind == query.kind
                    && e.phase_count == query.phase_count()
                    && e.voltage.approx_eq(query.voltage, 1e-6)
                    && e.record.rating.value() >= query.capacity_hint.value()
            })
            .min_by(|a, b| a.record.rating.value().total_cmp(&b.record.rating.value()))
            .map(|e| e.record.clone())
    }
}

/// Resolved equipment, keyed by graph names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EquipmentMapping {
    pub edges: HashMap<String, EquipmentRecord>,
    pub nodes: HashMap<String, BTreeMap<AssetKind, EquipmentRecord>>,
}

/// Resolves equipment for a finished, phased and energised graph.
///
/// The borrows of the graph and the assignment results keep them frozen
/// while the mapper is alive.
pub struct EquipmentMapper<'a, C> {
    graph: &'a DistributionGraph,
    phases: &'a PhaseAssignment,
    voltages: &'a VoltageAssignment,
    descriptors: HashMap<&'a str, &'a TransformerDescriptor>,
    catalog: C,
    load_kva: KilovoltAmperes,
    cache: Option<EquipmentMapping>,
}

impl<'a, C: EquipmentCatalog> EquipmentMapper<'a, C> {
    pub fn new(
        graph: &'a DistributionGraph,
        phases: &'a PhaseAssignment,
        voltages: &'a VoltageAssignment,
        descriptors: &'a [TransformerDescriptor],
        catalog: C,
    ) -> Self {
        Self {
            graph,
            phases,
            voltages,
            descriptors: descriptors.iter().map(|d| (d.name.as_str(), d)).collect(),
            catalog,
            load_kva: KilovoltAmperes(5.0),
            cache: None,
        }
    }

    pub fn with_load_kva(mut self, load_kva: KilovoltAmperes) -> Self {
        self.set_load_kva(load_kva);
        self
    }

    /// Change the per-load demand used for sizing; drops the cached mapping.
    pub fn set_load_kva(&mut self, load_kva: KilovoltAmperes) {
        self.load_kva = load_kva;
        self.invalidate();
    }

    pub fn load_kva(&self) -> KilovoltAmperes {
        self.load_kva
    }

    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// The full mapping, resolved on first use.
    pub fn mapping(&mut self) -> ShiftResult<&EquipmentMapping> {
        let mapping = match self.cache.take() {
            Some(cached) => cached,
            None => self.resolve()?,
        };
        Ok(&*self.cache.insert(mapping))
    }

    pub fn edge_equipment(&mut self, edge: &str) -> ShiftResult<Option<&EquipmentRecord>> {
        Ok(self.mapping()?.edges.get(edge))
    }

    fn resolve(&self) -> ShiftResult<EquipmentMapping> {
        let tree = self.graph.get_dfs_tree(None)?;

        // Loads at or below each node.
        let mut served: HashMap<&str, usize> = HashMap::with_capacity(tree.len());
        for name in tree.order().iter().rev() {
            let own = usize::from(self.graph.get_node(name)?.has_asset(AssetKind::Load));
            let total = own + served.get(name.as_str()).copied().unwrap_or(0);
            served.insert(name.as_str(), total);
            if let Some(parent) = tree.parent(name) {
                *served.entry(parent).or_default() += total;
            }
        }

        let mut mapping = EquipmentMapping::default();
        for (from, to, edge) in self.graph.edges() {
            let child = if tree.has_tree_edge(to, from) { from } else { to };
            let query = match edge.kind {
                EdgeKind::Transformer => {
                    let descriptor = self
                        .descriptors
                        .get(edge.name.as_str())
                        .ok_or_else(|| ShiftError::MissingTransformerMapping(edge.name.clone()))?;
                    EquipmentQuery {
                        kind: EquipmentKind::Transformer,
                        voltage: self
                            .voltages
                            .voltage(child)
                            .ok_or_else(|| ShiftError::MissingVoltageMapping(edge.name.clone()))?,
                        phases: self.node_phases(child)?,
                        capacity_hint: descriptor.capacity,
                    }
                }
                EdgeKind::Branch => EquipmentQuery {
                    kind: EquipmentKind::Conductor,
                    voltage: self.node_voltage(child)?,
                    phases: self.node_phases(child)?,
                    capacity_hint: self.load_kva
                        * served.get(child).copied().unwrap_or(0) as f64,
                },
            };
            let record = self.lookup(&query, &edge.name)?;
            mapping.edges.insert(edge.name.clone(), record);
        }

        for node in self.graph.get_nodes(|n| n.has_asset(AssetKind::Load)) {
            let query = EquipmentQuery {
                kind: EquipmentKind::Load,
                voltage: self.node_voltage(&node.name)?,
                phases: self.node_phases(&node.name)?,
                capacity_hint: self.load_kva,
            };
            let record = self.lookup(&query, &node.name)?;
            mapping
                .nodes
                .entry(node.name.clone())
                .or_default()
                .insert(AssetKind::Load, record);
        }

        info!(
            edges = mapping.edges.len(),
            loads = mapping.nodes.len(),
            "equipment resolved"
        );
        Ok(mapping)
    }

    fn node_voltage(&self, node: &str) -> ShiftResult<Kilovolts> {
        self.voltages.voltage(node).ok_or_else(|| {
            ShiftError::AllocationMapping(format!("node '{node}' has no assigned voltage"))
        })
    }

    fn node_phases(&self, node: &str) -> ShiftResult<PhaseSet> {
        self.phases.phases_at(node).cloned().ok_or_else(|| {
            ShiftError::AllocationMapping(format!("node '{node}' has no phase information"))
        })
    }

    fn lookup(&self, query: &EquipmentQuery, owner: &str) -> ShiftResult<EquipmentRecord> {
        let record = self.catalog.find(query).ok_or_else(|| {
            ShiftError::EquipmentNotFound(format!("'{owner}' needs {query}"))
        })?;
        if record.kind != query.kind || record.rating.value() < query.capacity_hint.value() {
            return Err(ShiftError::WrongEquipmentAssigned(format!(
                "'{owner}' needs {query} but the catalog returned '{}' ({:?}, {})",
                record.name, record.kind, record.rating
            )));
        }
        debug!(owner, equipment = %record.name, "equipment matched");
        Ok(record)
    }
}

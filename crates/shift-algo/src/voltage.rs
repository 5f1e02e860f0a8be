//! Voltage assignment.
//!
//! Nodes are visited in DFS pre-order from the voltage source. Everything
//! reached before a transformer sits at the source voltage; crossing a
//! Transformer edge switches the sub-tree below it to that transformer's
//! secondary voltage. There is no fallback: every transformer edge needs an
//! entry in the mapping.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use shift_core::{DistributionGraph, EdgeKind, Kilovolts, ShiftError, ShiftResult};
use tracing::{info, warn};

/// Rated primary and secondary voltage of one transformer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformerVoltage {
    #[serde(rename = "primary_kv")]
    pub primary: Kilovolts,
    #[serde(rename = "secondary_kv")]
    pub secondary: Kilovolts,
}

impl TransformerVoltage {
    pub fn new(primary: Kilovolts, secondary: Kilovolts) -> Self {
        Self { primary, secondary }
    }
}

/// A transformer whose rated primary does not match the voltage feeding it.
#[derive(Debug, Clone, PartialEq)]
pub struct VoltageMismatch {
    pub transformer: String,
    pub rated_primary: Kilovolts,
    pub supplied: Kilovolts,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoltageAssignment {
    pub source_voltage: Kilovolts,
    pub node_voltages: HashMap<String, Kilovolts>,
    /// Transformer edge name -> (HT node, LT node) as walked from the source.
    transformer_ends: HashMap<String, (String, String)>,
}

impl VoltageAssignment {
    pub fn voltage(&self, node: &str) -> Option<Kilovolts> {
        self.node_voltages.get(node).copied()
    }

    /// Transformers whose mapped primary differs from the voltage on their
    /// HT node, in graph edge order.
    pub fn primary_mismatches(
        &self,
        graph: &DistributionGraph,
        mapping: &HashMap<String, TransformerVoltage>,
    ) -> Vec<VoltageMismatch> {
        graph
            .transformer_edges()
            .filter_map(|(_, _, edge)| {
                let (ht, _) = self.transformer_ends.get(&edge.name)?;
                let supplied = self.voltage(ht)?;
                let rated = mapping.get(&edge.name)?;
                (!rated.primary.approx_eq(supplied, 1e-9)).then(|| VoltageMismatch {
                    transformer: edge.name.clone(),
                    rated_primary: rated.primary,
                    supplied,
                })
            })
            .collect()
    }
}

/// Assign a voltage to every node reachable from the voltage source.
///
/// # Errors
/// - [`ShiftError::MissingVoltageMapping`] for the first transformer edge
///   (graph order) without an entry in `mapping`
/// - [`ShiftError::InvalidInput`] for a non-positive voltage
/// - [`ShiftError::VsourceNodeDoesNotExist`] when the graph has no source
pub fn assign_voltages(
    graph: &DistributionGraph,
    source_voltage: Kilovolts,
    mapping: &HashMap<String, TransformerVoltage>,
) -> ShiftResult<VoltageAssignment> {
    if !source_voltage.is_finite() || source_voltage.value() <= 0.0 {
        return Err(ShiftError::InvalidInput(format!(
            "source voltage must be positive, got {source_voltage}"
        )));
    }
    let mut known: HashSet<&str> = HashSet::new();
    for (_, _, edge) in graph.transformer_edges() {
        let pair = mapping
            .get(&edge.name)
            .ok_or_else(|| ShiftError::MissingVoltageMapping(edge.name.clone()))?;
        for kv in [pair.primary, pair.secondary] {
            if !kv.is_finite() || kv.value() <= 0.0 {
                return Err(ShiftError::InvalidInput(format!(
                    "transformer '{}' has non-positive voltage {kv}",
                    edge.name
                )));
            }
        }
        known.insert(edge.name.as_str());
    }
    for name in mapping.keys().filter(|n| !known.contains(n.as_str())) {
        warn!(transformer = %name, "voltage mapping names a transformer not in the graph");
    }

    let tree = graph.get_dfs_tree(None)?;
    let mut node_voltages = HashMap::with_capacity(tree.len());
    let mut transformer_ends = HashMap::new();
    node_voltages.insert(tree.root().to_string(), source_voltage);

    for node in &tree.order()[1..] {
        let Some(via) = tree.parent_edge(node) else {
            continue;
        };
        let voltage = match via.kind {
            EdgeKind::Transformer => {
                let pair = mapping
                    .get(&via.edge)
                    .ok_or_else(|| ShiftError::MissingVoltageMapping(via.edge.clone()))?;
                transformer_ends.insert(via.edge.clone(), (via.parent.clone(), node.clone()));
                pair.secondary
            }
            EdgeKind::Branch => node_voltages
                .get(&via.parent)
                .copied()
                .ok_or_else(|| ShiftError::NodeDoesNotExist(via.parent.clone()))?,
        };
        node_voltages.insert(node.clone(), voltage);
    }

    info!(
        nodes = node_voltages.len(),
        transformers = transformer_ends.len(),
        source_kv = source_voltage.value(),
        "voltage assignment complete"
    );
    Ok(VoltageAssignment {
        source_voltage,
        node_voltages,
        transformer_ends,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shift_core::{AssetKind, Edge, GeoPoint, Node};

    /// sub - a =(t1)=> b - c =(t2)=> d
    fn nested() -> DistributionGraph {
        let mut graph = DistributionGraph::new();
        let at = |x| GeoPoint::new(x, 0.0);
        graph
            .add_node(Node::new("sub", at(0.0)).with_asset(AssetKind::VoltageSource))
            .unwrap();
        for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
            graph.add_node(Node::new(*name, at(i as f64 + 1.0))).unwrap();
        }
        graph.add_edge("sub", "a", Edge::branch("l1", None)).unwrap();
        graph.add_edge("a", "b", Edge::transformer("t1")).unwrap();
        graph.add_edge("b", "c", Edge::branch("l2", None)).unwrap();
        graph.add_edge("c", "d", Edge::transformer("t2")).unwrap();
        graph
    }

    fn mapping() -> HashMap<String, TransformerVoltage> {
        HashMap::from([
            (
                "t1".to_string(),
                TransformerVoltage::new(Kilovolts(12.47), Kilovolts(4.16)),
            ),
            (
                "t2".to_string(),
                TransformerVoltage::new(Kilovolts(4.16), Kilovolts(0.24)),
            ),
        ])
    }

    #[test]
    fn test_nested_transformers() {
        let result = assign_voltages(&nested(), Kilovolts(12.47), &mapping()).unwrap();
        assert_eq!(result.voltage("sub"), Some(Kilovolts(12.47)));
        assert_eq!(result.voltage("a"), Some(Kilovolts(12.47)));
        assert_eq!(result.voltage("b"), Some(Kilovolts(4.16)));
        assert_eq!(result.voltage("c"), Some(Kilovolts(4.16)));
        assert_eq!(result.voltage("d"), Some(Kilovolts(0.24)));
    }

    #[test]
    fn test_missing_mapping_names_transformer() {
        let mut partial = mapping();
        partial.remove("t2");
        let err = assign_voltages(&nested(), Kilovolts(12.47), &partial).unwrap_err();
        assert!(matches!(err, ShiftError::MissingVoltageMapping(ref name) if name == "t2"));
    }

    #[test]
    fn test_primary_mismatch_is_reported_not_fixed() {
        let graph = nested();
        let map = mapping();
        let result = assign_voltages(&graph, Kilovolts(7.2), &map).unwrap();
        assert_eq!(result.voltage("a"), Some(Kilovolts(7.2)));
        let mismatches = result.primary_mismatches(&graph, &map);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].transformer, "t1");
        assert_eq!(mismatches[0].supplied, Kilovolts(7.2));
    }

    #[test]
    fn test_rejects_bad_source_voltage() {
        assert!(matches!(
            assign_voltages(&nested(), Kilovolts(0.0), &mapping()),
            Err(ShiftError::InvalidInput(_))
        ));
    }
}

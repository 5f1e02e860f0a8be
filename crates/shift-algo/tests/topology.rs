//! Integration tests for the topology builder and the mappers that run on
//! its output.

use std::collections::HashMap;

use shift_algo::{
    assign_phases, assign_voltages, default_descriptors, BalancingMethod, BuilderConfig,
    RoadNetwork, TopologyBuilder, TransformerDefaults, TransformerType, TransformerVoltage,
};
use shift_core::{
    graph_stats, AssetKind, ClusterGroup, EdgeKind, GeoPoint, KilovoltAmperes, Kilovolts,
    ShiftError,
};

/// A straight street r0..r10 along the equator, one node every ~111 m.
fn street() -> RoadNetwork {
    let mut road = RoadNetwork::new();
    for i in 0..=10 {
        road.add_node(format!("r{i}"), GeoPoint::new(i as f64 * 0.001, 0.0))
            .unwrap();
    }
    for i in 0..10 {
        road.add_segment(&format!("r{i}"), &format!("r{}", i + 1), None)
            .unwrap();
    }
    road
}

/// Four houses in a small block north of the street around `x`.
fn block(x: f64) -> ClusterGroup {
    let points = vec![
        GeoPoint::new(x - 0.0002, 0.0003),
        GeoPoint::new(x + 0.0002, 0.0003),
        GeoPoint::new(x - 0.0002, 0.0006),
        GeoPoint::new(x + 0.0002, 0.0006),
    ];
    ClusterGroup::new(GeoPoint::centroid(&points).unwrap(), points)
}

fn three_blocks() -> Vec<ClusterGroup> {
    vec![block(0.002), block(0.005), block(0.008)]
}

#[test]
fn test_three_clusters_of_four() {
    let built = TopologyBuilder::new(BuilderConfig::default())
        .build(&three_blocks(), GeoPoint::new(0.0, 0.0), &street())
        .unwrap();
    let graph = &built.graph;

    let sources: Vec<_> = graph.get_nodes(|n| n.is_vsource()).collect();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].name, "r:r0");

    let stats = graph_stats(graph);
    assert_eq!(stats.transformer_count, 3);
    assert_eq!(stats.load_count, 12);
    assert_eq!(stats.connected_components, 1);

    let tree = graph.get_dfs_tree(None).unwrap();
    assert_eq!(tree.len(), graph.node_count());

    assert_eq!(built.point_node_mapping.len(), 12);
    assert_eq!(built.transformers.len(), 3);
    for site in &built.transformers {
        assert_eq!(site.load_count, 4);
        // HT is on the road, LT is in the mesh
        assert!(site.ht_node.starts_with("r:"));
        assert!(site.lt_node.starts_with(&format!("c{}-", site.cluster)));
        assert_eq!(
            graph.get_edge(&site.ht_node, &site.lt_node).unwrap().kind,
            EdgeKind::Transformer
        );
    }
}

#[test]
fn test_edges_point_away_from_source() {
    let built = TopologyBuilder::new(BuilderConfig::default())
        .build(&three_blocks(), GeoPoint::new(0.0, 0.0), &street())
        .unwrap();
    let tree = built.graph.get_dfs_tree(None).unwrap();
    for (from, to, edge) in built.graph.edges() {
        assert!(
            tree.has_tree_edge(from, to),
            "{} is stored {from} -> {to} against the walk",
            edge.name
        );
    }
}

#[test]
fn test_unreachable_cluster_is_rejected() {
    let mut road = street();
    road.add_node("x0", GeoPoint::new(0.05, 0.0)).unwrap();
    road.add_node("x1", GeoPoint::new(0.051, 0.0)).unwrap();
    road.add_segment("x0", "x1", None).unwrap();

    let groups = vec![block(0.002), block(0.0505)];
    let err = TopologyBuilder::new(BuilderConfig::default())
        .build(&groups, GeoPoint::new(0.0, 0.0), &road)
        .unwrap_err();
    match err {
        ShiftError::InvalidInput(msg) => assert!(msg.contains("cluster 1"), "{msg}"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_greedy_balance_on_built_feeder() {
    let groups = vec![
        block(0.001),
        block(0.003),
        block(0.005),
        block(0.007),
        block(0.009),
    ];
    let built = TopologyBuilder::new(BuilderConfig::default())
        .build(&groups, GeoPoint::new(0.0, 0.0), &street())
        .unwrap();
    let mut descriptors = default_descriptors(
        &built.transformers,
        &TransformerDefaults {
            kind: TransformerType::SinglePhase,
            ..TransformerDefaults::default()
        },
    );
    let capacities = [50.0, 37.5, 25.0, 25.0, 15.0];
    for (d, c) in descriptors.iter_mut().zip(capacities) {
        d.capacity = KilovoltAmperes(c);
    }

    let phases = assign_phases(&built.graph, &descriptors, BalancingMethod::Greedy).unwrap();
    let totals = phases.bucket_totals(&descriptors);
    let values: Vec<f64> = totals.values().map(|v| v.value()).collect();
    let spread = values.iter().cloned().fold(f64::MIN, f64::max)
        - values.iter().cloned().fold(f64::MAX, f64::min);
    assert!(spread <= 50.0, "bucket spread {spread} exceeds largest unit");

    // every house inherits the phase of its transformer
    for site in &built.transformers {
        let bucket = &phases.transformer_phases[&site.name];
        for (_, node) in built
            .point_node_mapping
            .iter()
            .filter(|(_, n)| n.starts_with(&format!("c{}-", site.cluster)))
        {
            assert_eq!(&phases.node_phases[node], bucket);
            assert_eq!(&phases.asset_phases[node][&AssetKind::Load], bucket);
        }
    }
}

#[test]
fn test_voltages_across_built_feeder() {
    let built = TopologyBuilder::new(BuilderConfig::default())
        .build(&three_blocks(), GeoPoint::new(0.0, 0.0), &street())
        .unwrap();
    let mut mapping: HashMap<String, TransformerVoltage> = built
        .transformers
        .iter()
        .map(|s| {
            (
                s.name.clone(),
                TransformerVoltage::new(Kilovolts(7.2), Kilovolts(0.24)),
            )
        })
        .collect();

    let voltages = assign_voltages(&built.graph, Kilovolts(7.2), &mapping).unwrap();
    assert_eq!(voltages.node_voltages.len(), built.graph.node_count());
    for site in &built.transformers {
        assert_eq!(voltages.voltage(&site.ht_node), Some(Kilovolts(7.2)));
        assert_eq!(voltages.voltage(&site.lt_node), Some(Kilovolts(0.24)));
    }
    for (_, load) in &built.point_node_mapping {
        assert_eq!(voltages.voltage(load), Some(Kilovolts(0.24)));
    }
    assert!(voltages
        .primary_mismatches(&built.graph, &mapping)
        .is_empty());

    mapping.remove("xfmr-1");
    let err = assign_voltages(&built.graph, Kilovolts(7.2), &mapping).unwrap_err();
    assert!(matches!(err, ShiftError::MissingVoltageMapping(ref t) if t == "xfmr-1"));
}

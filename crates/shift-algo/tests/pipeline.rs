//! End-to-end synthesis from parcels, through a road provider, to equipment.

use std::cell::{Cell, RefCell};

use shift_algo::{
    synthesize, CatalogEntry, EquipmentKind, EquipmentRecord, InMemoryCatalog, RoadNetwork,
    RoadNetworkProvider, ShiftConfig, TransformerVoltage,
};
use shift_core::{
    BoundingBox, GeoPoint, KilovoltAmperes, Kilovolts, Parcel, ParcelGeometry, ShiftError,
    ShiftResult,
};

/// Hands out a fixed street and remembers what it was asked for.
struct RecordingProvider {
    road: RoadNetwork,
    calls: Cell<usize>,
    last_bounds: RefCell<Option<BoundingBox>>,
}

impl RecordingProvider {
    fn new() -> Self {
        let mut road = RoadNetwork::new();
        for i in 0..=10 {
            road.add_node(format!("r{i}"), GeoPoint::new(i as f64 * 0.001, 0.0))
                .unwrap();
        }
        for i in 0..10 {
            road.add_segment(&format!("r{i}"), &format!("r{}", i + 1), None)
                .unwrap();
        }
        Self {
            road,
            calls: Cell::new(0),
            last_bounds: RefCell::new(None),
        }
    }
}

impl RoadNetworkProvider for RecordingProvider {
    fn road_network(&self, bounds: &BoundingBox) -> ShiftResult<RoadNetwork> {
        self.calls.set(self.calls.get() + 1);
        *self.last_bounds.borrow_mut() = Some(*bounds);
        Ok(self.road.clone())
    }
}

fn parcels() -> Vec<Parcel> {
    let mut parcels = Vec::new();
    for (b, x) in [0.002, 0.005, 0.008].into_iter().enumerate() {
        for (i, (dx, y)) in [(-0.0002, 0.0003), (0.0002, 0.0003), (-0.0002, 0.0006)]
            .into_iter()
            .enumerate()
        {
            parcels.push(Parcel::new(
                format!("b{b}-p{i}"),
                ParcelGeometry::Point(GeoPoint::new(x + dx, y)),
            ));
        }
        // one footprint per block
        let (cx, cy) = (x + 0.0002, 0.0006);
        let d = 0.00002;
        parcels.push(Parcel::new(
            format!("b{b}-house"),
            ParcelGeometry::Polygon(vec![
                GeoPoint::new(cx - d, cy - d),
                GeoPoint::new(cx + d, cy - d),
                GeoPoint::new(cx + d, cy + d),
                GeoPoint::new(cx - d, cy + d),
            ]),
        ));
    }
    parcels
}

fn config() -> ShiftConfig {
    ShiftConfig::from_toml_str(
        r#"
        [clustering]
        count = 3
        seed = 7

        [voltage]
        source_kv = 7.2
        all_transformers = { primary_kv = 7.2, secondary_kv = 0.24 }
        "#,
    )
    .unwrap()
}

fn catalog() -> InMemoryCatalog {
    let entry = |kind, name: &str, kv, phase_count| CatalogEntry {
        record: EquipmentRecord {
            name: name.to_string(),
            kind,
            rating: KilovoltAmperes(1000.0),
            attributes: serde_json::Value::Null,
        },
        voltage: Kilovolts(kv),
        phase_count,
    };
    let mut catalog = InMemoryCatalog::default();
    for phases in 1..=3 {
        catalog.push(entry(EquipmentKind::Conductor, "oh-primary", 7.2, phases));
    }
    catalog.push(entry(EquipmentKind::Conductor, "triplex", 0.24, 2));
    catalog.push(entry(EquipmentKind::Transformer, "pad-split", 0.24, 2));
    catalog.push(entry(EquipmentKind::Load, "residential", 0.24, 2));
    catalog
}

#[test]
fn test_synthesize_and_resolve_equipment() {
    let provider = RecordingProvider::new();
    let config = config();
    let feeder = synthesize(&parcels(), GeoPoint::new(0.0, 0.0), &provider, &config).unwrap();

    assert_eq!(provider.calls.get(), 1);
    let bounds = provider.last_bounds.borrow().unwrap();
    for parcel in parcels() {
        assert!(bounds.contains(&parcel.representative_point().unwrap()));
    }

    let graph = &feeder.topology.graph;
    assert_eq!(feeder.topology.transformers.len(), 3);
    assert_eq!(feeder.topology.point_node_mapping.len(), 12);
    assert_eq!(feeder.descriptors.len(), 3);
    assert_eq!(feeder.voltages.node_voltages.len(), graph.node_count());

    let mut equipment = feeder.equipment(catalog(), &config);
    let mapping = equipment.mapping().unwrap();
    assert_eq!(mapping.edges.len(), graph.edge_count());
    assert_eq!(mapping.nodes.len(), 12);
    for site in &feeder.topology.transformers {
        assert_eq!(mapping.edges[&site.name].name, "pad-split");
    }
    assert!(equipment.is_cached());
}

#[test]
fn test_missing_voltage_pair_names_transformer() {
    let provider = RecordingProvider::new();
    let mut config = config();
    config.voltage.all_transformers = None;
    config.voltage.transformers.push(shift_algo::config::NamedTransformerVoltage {
        name: "xfmr-0".to_string(),
        voltage: TransformerVoltage::new(Kilovolts(7.2), Kilovolts(0.24)),
    });

    let err = synthesize(&parcels(), GeoPoint::new(0.0, 0.0), &provider, &config).unwrap_err();
    assert!(matches!(err, ShiftError::MissingVoltageMapping(ref t) if t == "xfmr-1"));
}

#[test]
fn test_empty_catalog_surfaces_not_found() {
    let provider = RecordingProvider::new();
    let config = config();
    let feeder = synthesize(&parcels(), GeoPoint::new(0.0, 0.0), &provider, &config).unwrap();
    let mut equipment = feeder.equipment(InMemoryCatalog::default(), &config);
    assert!(matches!(
        equipment.mapping(),
        Err(ShiftError::EquipmentNotFound(_))
    ));
}

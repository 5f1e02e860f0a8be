//! End-to-end synthesis: parcels → clusters → topology → phases → voltages.

use shift_core::{parcel_points, GeoPoint, Parcel, ShiftResult};
use tracing::info;

use crate::builder::{default_descriptors, BuiltTopology, TopologyBuilder};
use crate::cluster::{cluster_count_for, kmeans};
use crate::config::ShiftConfig;
use crate::equipment::{EquipmentCatalog, EquipmentMapper};
use crate::phase::{assign_phases, PhaseAssignment, TransformerDescriptor};
use crate::road::RoadNetworkProvider;
use crate::voltage::{assign_voltages, VoltageAssignment};

/// Everything produced for one feeder.
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub topology: BuiltTopology,
    pub descriptors: Vec<TransformerDescriptor>,
    pub phases: PhaseAssignment,
    pub voltages: VoltageAssignment,
}

impl Synthesis {
    /// An equipment mapper over this feeder's results.
    pub fn equipment<C: EquipmentCatalog>(
        &self,
        catalog: C,
        config: &ShiftConfig,
    ) -> EquipmentMapper<'_, C> {
        EquipmentMapper::new(
            &self.topology.graph,
            &self.phases,
            &self.voltages,
            &self.descriptors,
            catalog,
        )
        .with_load_kva(config.equipment.load_kva)
    }
}

/// Run every stage up to voltage assignment.
///
/// Transformer descriptors come from `config.transformers` when given, and
/// are otherwise sized from `config.transformer_defaults`.
pub fn synthesize<P: RoadNetworkProvider + ?Sized>(
    parcels: &[Parcel],
    source: GeoPoint,
    provider: &P,
    config: &ShiftConfig,
) -> ShiftResult<Synthesis> {
    config.validate()?;
    let points = parcel_points(parcels)?;
    let k = cluster_count_for(points.len(), config.clustering.sizing()?)?;
    let groups = kmeans(&points, &config.clustering.kmeans(k))?;
    info!(parcels = parcels.len(), clusters = groups.len(), "parcels clustered");

    let topology =
        TopologyBuilder::new(config.builder.clone()).build_from_provider(&groups, source, provider)?;

    let descriptors = if config.transformers.is_empty() {
        default_descriptors(&topology.transformers, &config.transformer_defaults)
    } else {
        config.transformers.clone()
    };
    let phases = assign_phases(&topology.graph, &descriptors, config.phase)?;

    let mapping = config.voltage.mapping_for_sites(&topology.transformers)?;
    let voltages = assign_voltages(&topology.graph, config.voltage.source_kv, &mapping)?;

    Ok(Synthesis {
        topology,
        descriptors,
        phases,
        voltages,
    })
}
